use core_config::database::DatabaseConfig;
use core_config::{AppInfo, FromEnv, app_info, server::ServerConfig};
use event_pipeline::PipelineConfig;

// Re-export Environment for use in other modules
pub use core_config::Environment;

/// Application-specific configuration
/// Composes shared config components from the `config` library
#[derive(Clone, Debug)]
pub struct Config {
    pub app: AppInfo,
    /// Unset `DATABASE_URL` keeps events in memory
    pub database: Option<DatabaseConfig>,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
    pub environment: Environment,
}

impl Config {
    pub fn from_env() -> eyre::Result<Self> {
        let environment = Environment::from_env();
        let database = DatabaseConfig::from_env_optional()?;
        let pipeline = PipelineConfig::from_env()?;
        let server = ServerConfig::from_env()?; // Uses defaults: HOST=0.0.0.0, PORT=9000

        Ok(Self {
            app: app_info!(),
            database,
            pipeline,
            server,
            environment,
        })
    }
}
