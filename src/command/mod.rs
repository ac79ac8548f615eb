//! Per-engine dump command synthesis.
//!
//! A [`GeneratorRegistry`] maps a driver key (`psql`, `mysql`) to a
//! [`DumpGenerator`]. The registry is built once at startup and handed to
//! the scheduler; tests register their own generators.

mod mysql;
mod postgres;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{DumpFormat, Settings};
use crate::error::{BackupError, Result};

pub use mysql::MysqlGenerator;
pub use postgres::PostgresGenerator;

/// Declarative inputs for one dump.
#[derive(Debug, Clone)]
pub struct DumpParams {
    pub user: String,
    pub password: String,
    /// Logical database name.
    pub name: String,
    pub port: Option<String>,
    pub host: String,
    /// File name stem produced by the naming template.
    pub dump_name: String,
    pub format: DumpFormat,
}

/// A synthesized instruction: what to run and where the dump lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpCommand {
    pub command: String,
    pub remote_path: Option<String>,
}

pub trait DumpGenerator: Send + Sync {
    fn generate(&self, params: &DumpParams, settings: &Settings) -> DumpCommand;
}

#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    generators: HashMap<String, Arc<dyn DumpGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `mysql` and `psql` generators.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("mysql", MysqlGenerator);
        registry.register("psql", PostgresGenerator);
        registry
    }

    pub fn register(&mut self, driver: impl Into<String>, generator: impl DumpGenerator + 'static) {
        self.generators.insert(driver.into(), Arc::new(generator));
    }

    pub fn contains(&self, driver: &str) -> bool {
        self.generators.contains_key(driver)
    }

    pub fn drivers(&self) -> Vec<&str> {
        let mut drivers: Vec<&str> = self.generators.keys().map(String::as_str).collect();
        drivers.sort_unstable();
        drivers
    }

    pub fn synthesize(
        &self,
        driver: &str,
        params: &DumpParams,
        settings: &Settings,
    ) -> Result<DumpCommand> {
        let generator = self
            .generators
            .get(driver)
            .ok_or_else(|| BackupError::UnsupportedDriver(driver.to_string()))?;

        Ok(generator.generate(params, settings))
    }
}
