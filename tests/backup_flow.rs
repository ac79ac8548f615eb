use async_trait::async_trait;
use echodb::command::{DumpCommand, DumpGenerator, DumpParams, GeneratorRegistry};
use echodb::config::{AppConfig, Database, Server, Settings};
use echodb::context::AppContext;
use echodb::core::{Executor, Scheduler, Selection, Target};
use echodb::error::{BackupError, Result};
use echodb::remote::{
    CommandOutput, Connection, Connector, Endpoint, LocalConnector, OutputStream, RemoteSession,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Writes a small fixed payload instead of running a real dump tool.
/// Databases named `broken` fail to dump.
struct FixtureGenerator;

impl DumpGenerator for FixtureGenerator {
    fn generate(&self, params: &DumpParams, _settings: &Settings) -> DumpCommand {
        let remote_path = format!("./{}.sql", params.dump_name);
        let command = if params.name == "broken" {
            "echo 'dump failed' >&2; exit 2".to_string()
        } else {
            format!("printf '%s' 'payload-{}' > '{}'", params.name, remote_path)
        };
        DumpCommand {
            command,
            remote_path: Some(remote_path),
        }
    }
}

/// Wraps the local shell and remembers every command it was asked to run.
#[derive(Clone)]
struct RecordingConnector {
    inner: LocalConnector,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingConnector {
    fn new(root: &Path) -> Self {
        Self {
            inner: LocalConnector::new(root),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn RemoteSession>> {
        let inner = self.inner.connect(endpoint).await?;
        Ok(Box::new(RecordingSession {
            inner,
            log: self.log.clone(),
        }))
    }
}

struct RecordingSession {
    inner: Box<dyn RemoteSession>,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RemoteSession for RecordingSession {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        self.log.lock().unwrap().push(command.to_string());
        self.inner.exec(command).await
    }

    async fn open_output_stream(&self, command: &str) -> Result<OutputStream> {
        self.log.lock().unwrap().push(command.to_string());
        self.inner.open_output_stream(command).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

struct Fixture {
    _temp: TempDir,
    remote: PathBuf,
    local: PathBuf,
    archive: PathBuf,
    connector: RecordingConnector,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let remote = temp.path().join("remote");
        let local = temp.path().join("local");
        let archive = temp.path().join("archived");
        fs::create_dir_all(&remote).unwrap();
        fs::create_dir_all(&local).unwrap();

        Self {
            connector: RecordingConnector::new(&remote),
            _temp: temp,
            remote,
            local,
            archive,
        }
    }

    /// Servers `alpha` and `beta`; databases `a1..a3` on alpha, `b1`, `b2`
    /// on beta. `a2` is the one that fails to dump.
    fn config(&self, archive: bool) -> AppConfig {
        let mut config = AppConfig::default();
        config.settings.driver = "fixture".into();
        config.settings.template = "{%srv%}_{%db%}".into();
        config.settings.dir_dump = self.local.clone();
        config.settings.dir_archived = if archive {
            self.archive.clone()
        } else {
            PathBuf::new()
        };

        for id in ["alpha", "beta"] {
            config.servers.insert(
                id.into(),
                Server {
                    host: format!("{id}.internal"),
                    user: "deploy".into(),
                    name: Some(id.into()),
                    ..Default::default()
                },
            );
        }

        let databases = [
            ("a1", "alpha", "one"),
            ("a2", "alpha", "broken"),
            ("a3", "alpha", "three"),
            ("b1", "beta", "four"),
            ("b2", "beta", "five"),
        ];
        for (id, server, name) in databases {
            config.databases.insert(
                id.into(),
                Database {
                    user: "app".into(),
                    password: "secret".into(),
                    name: Some(name.into()),
                    server: server.into(),
                    ..Default::default()
                },
            );
        }
        config
    }

    fn context(&self, config: AppConfig) -> AppContext {
        let mut registry = GeneratorRegistry::with_defaults();
        registry.register("fixture", FixtureGenerator);
        AppContext::new(config, registry, Arc::new(self.connector.clone()))
    }

    async fn connection(&self, ctx: &AppContext, target: &Target) -> Connection {
        let endpoint = Endpoint::from_config(&target.server, &ctx.config.settings);
        let mut conn = Connection::new(endpoint, ctx.connector.clone());
        conn.connect().await.unwrap();
        conn
    }
}

#[tokio::test]
async fn test_fresh_dump_is_created_downloaded_and_removed() {
    let fx = Fixture::new();
    let ctx = fx.context(fx.config(false));
    let target = Target::resolve(&ctx.config, "a1").unwrap();
    let conn = fx.connection(&ctx, &target).await;

    let outcome = Executor::new(&ctx).execute(&conn, &target).await.unwrap();

    assert!(outcome.created_remote);
    assert_eq!(outcome.local_path, fx.local.join("alpha_one.sql"));
    assert_eq!(fs::read(&outcome.local_path).unwrap(), b"payload-one");
    assert_eq!(outcome.bytes, "payload-one".len() as u64);
    assert!(!fx.remote.join("alpha_one.sql").exists());

    assert_eq!(fx.connector.count("printf"), 1);
    assert_eq!(fx.connector.count("rm -f"), 1);
    assert!(ctx.progress.get(&outcome.job_id).await.is_none());
}

#[tokio::test]
async fn test_existing_remote_dump_is_never_recreated_or_deleted() {
    let fx = Fixture::new();
    fs::write(fx.remote.join("alpha_one.sql"), b"already here").unwrap();

    let ctx = fx.context(fx.config(false));
    let target = Target::resolve(&ctx.config, "a1").unwrap();
    let conn = fx.connection(&ctx, &target).await;

    let outcome = Executor::new(&ctx).execute(&conn, &target).await.unwrap();

    assert!(!outcome.created_remote);
    assert_eq!(fs::read(&outcome.local_path).unwrap(), b"already here");
    assert!(fx.remote.join("alpha_one.sql").exists());

    assert_eq!(fx.connector.count("printf"), 0);
    assert_eq!(fx.connector.count("rm -f"), 0);
}

#[tokio::test]
async fn test_failed_creation_leaves_nothing_behind() {
    let fx = Fixture::new();
    let ctx = fx.context(fx.config(false));
    let target = Target::resolve(&ctx.config, "a2").unwrap();
    let conn = fx.connection(&ctx, &target).await;

    let err = Executor::new(&ctx)
        .execute(&conn, &target)
        .await
        .unwrap_err();

    match err {
        BackupError::RemoteCommand { status, output, .. } => {
            assert_eq!(status, 2);
            assert!(output.contains("dump failed"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fx.connector.count("cat"), 0);
    assert_eq!(fx.connector.count("rm -f"), 0);
    assert!(!fx.local.join("alpha_broken.sql").exists());
}

#[tokio::test]
async fn test_superseded_local_dumps_are_archived() {
    let fx = Fixture::new();
    fs::write(fx.local.join("alpha_one_2023.sql"), b"old").unwrap();
    fs::write(fx.local.join("alpha_three.sql"), b"other target").unwrap();

    let ctx = fx.context(fx.config(true));
    let target = Target::resolve(&ctx.config, "a1").unwrap();
    let conn = fx.connection(&ctx, &target).await;

    let outcome = Executor::new(&ctx).execute(&conn, &target).await.unwrap();

    assert_eq!(outcome.archived.len(), 1);
    assert!(fx.archive.join("alpha_one_2023.sql").exists());
    assert!(fx.local.join("alpha_one.sql").exists());
    assert!(fx.local.join("alpha_three.sql").exists());
}

#[tokio::test]
async fn test_archiving_matches_names_with_spaces() {
    let fx = Fixture::new();
    fs::write(fx.local.join("main_box_one_2023.sql"), b"old").unwrap();

    let mut config = fx.config(true);
    config.servers.get_mut("alpha").unwrap().name = Some("main box".into());
    let ctx = fx.context(config);
    let target = Target::resolve(&ctx.config, "a1").unwrap();
    let conn = fx.connection(&ctx, &target).await;

    let outcome = Executor::new(&ctx).execute(&conn, &target).await.unwrap();

    assert_eq!(outcome.local_path, fx.local.join("main_box_one.sql"));
    assert_eq!(outcome.archived.len(), 1);
    assert!(fx.archive.join("main_box_one_2023.sql").exists());
    assert!(fx.local.join("main_box_one.sql").exists());
}

#[tokio::test]
async fn test_mysql_without_remote_path_is_rejected_before_remote_work() {
    let fx = Fixture::new();
    let mut config = fx.config(false);
    config.settings.driver = "mysql".into();
    let ctx = fx.context(config);
    let target = Target::resolve(&ctx.config, "a1").unwrap();
    let conn = fx.connection(&ctx, &target).await;

    let err = Executor::new(&ctx)
        .execute(&conn, &target)
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::MissingRemotePath(ref d) if d == "mysql"));
    assert!(fx.connector.commands().is_empty());
}

#[tokio::test]
async fn test_cancelled_job_does_no_remote_work() {
    let fx = Fixture::new();
    let cancel = CancellationToken::new();
    let ctx = fx.context(fx.config(false)).with_cancel(cancel.clone());
    let target = Target::resolve(&ctx.config, "a1").unwrap();
    let conn = fx.connection(&ctx, &target).await;

    cancel.cancel();
    let err = Executor::new(&ctx)
        .execute(&conn, &target)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(fx.connector.commands().is_empty());
}

#[tokio::test]
async fn test_scheduler_isolates_failing_server() {
    let fx = Fixture::new();
    let ctx = fx.context(fx.config(false));

    let err = Scheduler::new(ctx)
        .run(&Selection::parse("a1,a2,a3,b1,b2"))
        .await
        .unwrap_err();

    // a2 is the only failure, so it is the error reported.
    assert!(matches!(err, BackupError::RemoteCommand { status: 2, .. }));

    // a1 finished completely before a2 failed.
    assert_eq!(fs::read(fx.local.join("alpha_one.sql")).unwrap(), b"payload-one");
    assert!(!fx.remote.join("alpha_one.sql").exists());

    // a3 was never attempted.
    assert!(!fx.local.join("alpha_three.sql").exists());
    assert!(
        !fx.connector
            .commands()
            .iter()
            .any(|c| c.contains("alpha_three"))
    );

    // beta's targets are unaffected.
    assert_eq!(fs::read(fx.local.join("beta_four.sql")).unwrap(), b"payload-four");
    assert_eq!(fs::read(fx.local.join("beta_five.sql")).unwrap(), b"payload-five");
    assert!(!fx.remote.join("beta_four.sql").exists());
    assert!(!fx.remote.join("beta_five.sql").exists());
}

#[tokio::test]
async fn test_scheduler_success_reports_every_outcome() {
    let fx = Fixture::new();
    let ctx = fx.context(fx.config(false));

    let report = Scheduler::new(ctx)
        .run(&Selection::parse("a1,ghost,b1"))
        .await
        .unwrap();

    assert_eq!(report.valid_targets, 2);
    assert_eq!(report.outcomes.len(), 2);
    assert!(fx.local.join("alpha_one.sql").exists());
    assert!(fx.local.join("beta_four.sql").exists());

    // one liveness check per server
    assert_eq!(fx.connector.count("true"), 2);
}

#[tokio::test]
async fn test_scheduler_fails_fast_without_valid_targets() {
    let fx = Fixture::new();
    let ctx = fx.context(fx.config(false));

    let err = Scheduler::new(ctx)
        .run(&Selection::parse("ghost,phantom"))
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::NoValidTargets));
    assert!(fx.connector.commands().is_empty());
}

#[tokio::test]
async fn test_scheduler_cancelled_before_start() {
    let fx = Fixture::new();
    let cancel = CancellationToken::new();
    let ctx = fx.context(fx.config(false)).with_cancel(cancel.clone());
    cancel.cancel();

    let err = Scheduler::new(ctx)
        .run(&Selection::parse("a1,b1"))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(!fx.local.join("alpha_one.sql").exists());
    assert!(!fx.local.join("beta_four.sql").exists());
}
