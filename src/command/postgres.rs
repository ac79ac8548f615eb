use super::{DumpCommand, DumpGenerator, DumpParams};
use crate::config::{DumpFormat, DumpLocation, Settings};
use crate::remote::shell_quote;

const DEFAULT_PORT: &str = "5432";

/// `pg_dump` strategy, registered as `psql`.
///
/// With compression on, the command is `pg_dump ... | gzip > path` run by a
/// POSIX `sh` that has no `pipefail`. Its exit status is gzip's, so a
/// `pg_dump` that fails mid-stream still yields a zero exit and a truncated
/// (but valid) gzip file. Uncompressed and native formats report `pg_dump`'s
/// own status.
pub struct PostgresGenerator;

impl DumpGenerator for PostgresGenerator {
    fn generate(&self, params: &DumpParams, settings: &Settings) -> DumpCommand {
        let port = params
            .port
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PORT);

        let (format_flag, mut ext) = match params.format {
            DumpFormat::Plain => ("-Fp", "sql".to_string()),
            DumpFormat::Dump => ("-Fc", "dump".to_string()),
            DumpFormat::Tar => ("-Ft", "tar".to_string()),
        };

        let url = format!(
            "postgresql://{}:{}@127.0.0.1:{}/{}",
            params.user, params.password, port, params.name
        );
        let mut command = format!(
            "/usr/bin/pg_dump --dbname={} --clean --if-exists --no-owner {}",
            shell_quote(&url),
            format_flag
        );

        // Custom and tar formats are already compact; only plain SQL is gzipped.
        if settings.compress && params.format == DumpFormat::Plain {
            command.push_str(" | gzip");
            ext.push_str(".gz");
        }

        let remote_path = format!("./{}.{}", params.dump_name, ext);

        if settings.location == DumpLocation::Server {
            command = format!("{} > {}", command, shell_quote(&remote_path));
        }

        DumpCommand {
            command,
            remote_path: Some(remote_path),
        }
    }
}
