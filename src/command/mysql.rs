use super::{DumpCommand, DumpGenerator, DumpParams};
use crate::config::Settings;
use crate::remote::shell_quote;

const DEFAULT_PORT: &str = "3306";

/// `mysqldump` strategy, registered as `mysql`.
///
/// Writes the dump to stdout and names no remote file, so the executor
/// refuses to run it end to end.
pub struct MysqlGenerator;

impl DumpGenerator for MysqlGenerator {
    fn generate(&self, params: &DumpParams, _settings: &Settings) -> DumpCommand {
        let port = params
            .port
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PORT);

        DumpCommand {
            command: format!(
                "mysqldump -u{} -p{} -h127.0.0.1 -P{} {}",
                shell_quote(&params.user),
                shell_quote(&params.password),
                port,
                shell_quote(&params.name)
            ),
            remote_path: None,
        }
    }
}
