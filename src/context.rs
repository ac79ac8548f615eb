use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::command::GeneratorRegistry;
use crate::config::AppConfig;
use crate::core::ProgressTracker;
use crate::remote::Connector;

/// Everything a run shares: resolved config, the generator registry, the
/// transport, live progress and the cancellation signal.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub registry: Arc<GeneratorRegistry>,
    pub connector: Arc<dyn Connector>,
    pub progress: ProgressTracker,
    pub cancel: CancellationToken,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        registry: GeneratorRegistry,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            connector,
            progress: ProgressTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
