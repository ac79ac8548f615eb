use anyhow::{Context, Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Toml, Yaml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

const DEFAULT_TEMPLATE: &str = "{%srv%}_{%db%}_{%time%}";
const DEFAULT_SERVER_PORT: &str = "22";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub settings: Settings,
    pub servers: BTreeMap<String, Server>,
    pub databases: BTreeMap<String, Database>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ssh: SshSettings,
    pub template: String,
    /// Pipe plain dumps through gzip.
    #[serde(alias = "archive")]
    pub compress: bool,
    pub driver: String,
    pub db_port: Option<String>,
    pub server_port: Option<String>,
    pub location: DumpLocation,
    pub format: DumpFormat,
    pub dir_dump: PathBuf,
    /// Empty disables archiving of superseded dumps.
    pub dir_archived: PathBuf,
    pub logging: bool,
    /// Run "remote" commands on this machine instead of over SSH.
    pub simulation: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ssh: SshSettings::default(),
            template: DEFAULT_TEMPLATE.to_string(),
            compress: true,
            driver: String::new(),
            db_port: None,
            server_port: None,
            location: DumpLocation::Server,
            format: DumpFormat::Plain,
            dir_dump: PathBuf::from("./"),
            dir_archived: PathBuf::from("./archived"),
            logging: false,
            simulation: false,
        }
    }
}

impl Settings {
    pub fn archive_dir(&self) -> Option<&Path> {
        if self.dir_archived.as_os_str().is_empty() {
            None
        } else {
            Some(&self.dir_archived)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub private_key: Option<PathBuf>,
    pub passphrase: Option<String>,
    pub is_passphrase: bool,
}

/// Where the dump file is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DumpLocation {
    /// On the database host, then streamed down over SSH.
    #[default]
    Server,
    LocalSsh,
    LocalDirect,
}

impl DumpLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::LocalSsh => "local-ssh",
            Self::LocalDirect => "local-direct",
        }
    }
}

impl fmt::Display for DumpLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of the dump tool. Unrecognised names read as `plain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum DumpFormat {
    #[default]
    Plain,
    Dump,
    Tar,
}

impl From<String> for DumpFormat {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "dump" => Self::Dump,
            "tar" => Self::Tar,
            _ => Self::Plain,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub host: String,
    pub user: String,
    pub name: Option<String>,
    pub port: Option<String>,
    pub key: Option<PathBuf>,
    pub password: Option<String>,
}

impl Server {
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.host,
        }
    }

    pub fn port_or<'a>(&'a self, fallback: Option<&'a str>) -> &'a str {
        non_empty(self.port.as_deref())
            .or(non_empty(fallback))
            .unwrap_or(DEFAULT_SERVER_PORT)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    pub user: String,
    pub password: String,
    pub name: Option<String>,
    pub server: String,
    pub port: Option<String>,
}

impl Database {
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.user,
        }
    }

    pub fn port_or<'a>(&'a self, fallback: Option<&'a str>) -> Option<&'a str> {
        non_empty(self.port.as_deref()).or(non_empty(fallback))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Load from a YAML (or `.toml`) file, then `ECHODB_` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Configuration file not found: {}", path.display());
        }

        let figment = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Figment::new().merge(Toml::file(path)),
            _ => Figment::new().merge(Yaml::file(path)),
        };

        Self::from_figment(figment.merge(Env::prefixed("ECHODB_").split("__")))
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: AppConfig = figment.extract().context("Failed to parse configuration")?;
        config.validate()?;
        config.expand_paths();
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.settings.driver.trim().is_empty() {
            bail!("config validation failed: settings.driver is required");
        }

        for (key, server) in &self.servers {
            if server.host.is_empty() {
                bail!("config validation failed: servers.{key}.host is required");
            }
            if server.user.is_empty() {
                bail!("config validation failed: servers.{key}.user is required");
            }
        }

        for (key, database) in &self.databases {
            if database.server.is_empty() {
                bail!("config validation failed: databases.{key}.server is required");
            }
        }

        Ok(())
    }

    fn expand_paths(&mut self) {
        if let Some(key) = self.settings.ssh.private_key.take() {
            self.settings.ssh.private_key = Some(expand_home(&key));
        }
        for server in self.servers.values_mut() {
            if let Some(key) = server.key.take() {
                server.key = Some(expand_home(&key));
            }
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}
