use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
    /// How long a writer waits on a locked database before giving up
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ImportConfig {
    pub workers: usize,
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SweepConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "fas.db".to_string(),
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 25,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { interval_secs: 3600 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "fas=info".to_string(),
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `FAS_*` environment variables.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Config::default();
        let config = config::Config::builder()
            .set_default("database.path", defaults.database.path)?
            .set_default("database.busy_timeout_ms", defaults.database.busy_timeout_ms)?
            .set_default("import.workers", defaults.import.workers as u64)?
            .set_default("import.batch_size", defaults.import.batch_size as u64)?
            .set_default("sweep.interval_secs", defaults.sweep.interval_secs)?
            .set_default("logging.filter", defaults.logging.filter)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("FAS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.path.trim().is_empty() {
            anyhow::bail!("database.path must not be empty");
        }
        if self.import.workers == 0 {
            anyhow::bail!("import.workers must be at least 1");
        }
        if self.import.batch_size == 0 {
            anyhow::bail!("import.batch_size must be at least 1");
        }
        Ok(())
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
