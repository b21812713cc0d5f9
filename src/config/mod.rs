//! Node configuration.
//!
//! `Config` is what files and environment provide; `Config::resolve` turns it
//! into a `NodeConfig` with the job type, FQFN, port and process UUID fixed.
//! The resolved value is handed to the node at construction.

mod runnable;

pub use runnable::{RunnableFile, RUNNABLE_FILE};

use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info};

use crate::coordinator::{DeliveryConfig, DeliveryPolicy};
use crate::fqfn::Fqfn;
use crate::invoker::CommandConfig;
use crate::mesh::MeshConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "meshrun.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "MESHRUN_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "MESHRUN";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "MESHRUN_LOG";
/// Environment variable overriding the application identifier of a disk runnable.
pub const RUNNABLE_IDENT_ENV_VAR: &str = "MESHRUN_RUNNABLE_IDENT";
/// Environment variable overriding the version of a disk runnable.
pub const RUNNABLE_VERSION_ENV_VAR: &str = "MESHRUN_RUNNABLE_VERSION";

/// Lower bound of the randomly chosen HTTP port.
const RANDOM_PORT_MIN: u16 = 1000;
/// Number of candidate random ports.
const RANDOM_PORT_SPAN: u16 = 10000;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("missing argument: runnable (path or FQFN)")]
    MissingRunnable,

    #[error("uuid is set, but '{value}' is not a valid UUID: {source}")]
    InvalidUuid {
        value: String,
        #[source]
        source: uuid::Error,
    },

    #[error("failed to read {path}: {source}")]
    RunnableRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    RunnableParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to. Chosen at random when unset.
    pub port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: None,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path or FQFN of the function this node hosts.
    pub runnable: String,
    /// Process used to run the function. Program defaults to the runnable path.
    pub command: CommandConfig,
    pub server: ServerConfig,
    pub mesh: MeshConfig,
    pub delivery: DeliveryConfig,
    /// Process UUID. Generated when absent.
    pub uuid: Option<String>,
    /// Read one input from stdin, print the output and exit.
    pub use_stdin: bool,
}

/// Runnable identity overrides applied to a disk runnable.
#[derive(Debug, Clone, Default)]
pub struct RunnableOverride {
    pub identifier: Option<String>,
    pub version: Option<String>,
}

impl RunnableOverride {
    /// Read the overrides from the process environment.
    pub fn from_env() -> Self {
        Self {
            identifier: std::env::var(RUNNABLE_IDENT_ENV_VAR).ok(),
            version: std::env::var(RUNNABLE_VERSION_ENV_VAR).ok(),
        }
    }
}

/// Fully resolved node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// The runnable argument as given.
    pub runnable_arg: String,
    /// Job type the function is registered under; the FQFN when known.
    pub job_type: String,
    pub fqfn: Fqfn,
    /// Display name used in logs.
    pub pretty_name: String,
    /// Metadata from `.runnable.yml`, when present.
    pub runnable: Option<RunnableFile>,
    /// Application identifier the node belongs to; static peers of other
    /// applications are ignored.
    pub identifier: String,
    pub host: String,
    pub port: u16,
    pub use_stdin: bool,
    pub proc_uuid: String,
    pub mesh: MeshConfig,
    pub delivery: DeliveryPolicy,
    pub command: CommandConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `meshrun.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Resolve using runnable overrides from the environment.
    pub fn resolve(self) -> Result<NodeConfig, ConfigError> {
        self.resolve_with(RunnableOverride::from_env())
    }

    /// Resolve the node identity and runtime settings.
    ///
    /// An argument that parses as a qualified FQFN names the function
    /// directly. Otherwise it is a path: the job type is the file name with
    /// any `.wasm` suffix trimmed, unless a `.runnable.yml` beside it supplies
    /// an FQFN.
    pub fn resolve_with(self, overrides: RunnableOverride) -> Result<NodeConfig, ConfigError> {
        let runnable_arg = self.runnable.trim().to_string();
        if runnable_arg.is_empty() {
            return Err(ConfigError::MissingRunnable);
        }

        let proc_uuid = match self.uuid {
            Some(value) => match uuid::Uuid::parse_str(&value) {
                Ok(id) => id.to_string(),
                Err(source) => return Err(ConfigError::InvalidUuid { value, source }),
            },
            None => uuid::Uuid::new_v4().to_string(),
        };

        let arg_fqfn = Fqfn::parse(&runnable_arg);
        let runnable = if arg_fqfn.is_qualified() {
            None
        } else {
            let mut disk = RunnableFile::find(&runnable_arg)?;
            if let (Some(file), Some(ident), Some(version)) =
                (disk.as_mut(), &overrides.identifier, &overrides.version)
            {
                file.override_fqfn(ident, version);
            }
            disk
        };

        let mut job_type = if arg_fqfn.is_qualified() {
            runnable_arg.clone()
        } else {
            file_job_type(&runnable_arg)
        };
        let mut pretty_name = job_type.clone();

        if let Some(file) = runnable.as_ref().filter(|f| !f.fqfn.is_empty()) {
            job_type = file.fqfn.clone();
            pretty_name = format!("{}-{}", job_type, &proc_uuid[..6]);
        }

        let fqfn = Fqfn::parse(&job_type);
        let identifier = self
            .mesh
            .identifier
            .clone()
            .unwrap_or_else(|| fqfn.identifier.clone());

        if identifier.is_empty() {
            debug!(job_type = %job_type, "Configuring");
        } else {
            info!(job_type = %job_type, identifier = %identifier, "Configuring, joining app");
        }

        let port = self.server.port.unwrap_or_else(random_port);

        let mut command = self.command;
        if command.program.is_empty() {
            command.program = runnable_arg.clone();
        }

        Ok(NodeConfig {
            runnable_arg,
            job_type,
            fqfn,
            pretty_name,
            runnable,
            identifier,
            host: self.server.host,
            port,
            use_stdin: self.use_stdin,
            proc_uuid,
            mesh: self.mesh,
            delivery: self.delivery.policy(),
            command,
        })
    }
}

fn file_job_type(runnable_arg: &str) -> String {
    let base = std::path::Path::new(runnable_arg)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(runnable_arg);
    base.strip_suffix(".wasm").unwrap_or(base).to_string()
}

fn random_port() -> u16 {
    RANDOM_PORT_MIN + rand::rng().random_range(0..RANDOM_PORT_SPAN)
}
