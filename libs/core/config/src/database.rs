use crate::{env_optional, env_parse, env_required, ConfigError, FromEnv};

/// Database configuration
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn new(url: String) -> Self {
        Self {
            url,
            max_connections: 20,
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Like [`FromEnv::from_env`], but an unset `DATABASE_URL` yields `None`
    /// instead of an error.
    pub fn from_env_optional() -> Result<Option<Self>, ConfigError> {
        match env_optional("DATABASE_URL") {
            Some(_) => Self::from_env().map(Some),
            None => Ok(None),
        }
    }
}

impl FromEnv for DatabaseConfig {
    /// Requires DATABASE_URL to be set (no default)
    fn from_env() -> Result<Self, ConfigError> {
        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 20)?;
        Ok(Self::new(env_required("DATABASE_URL")?).with_max_connections(max_connections))
    }
}
