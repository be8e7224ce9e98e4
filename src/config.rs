use clap::Parser;
use sqlx::SqlitePool;
use tracing::Level;

use crate::pipeline::PipelineOptions;
use crate::reconcile::lease::DEFAULT_LEASE_TTL_MINUTES;

#[derive(clap::ValueEnum, Debug, Clone)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<&LogLevel> for Level {
    fn from(log_level: &LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Environment/flag surface of the job. Parsed once at startup and turned
/// into a [`Config`].
#[derive(Parser, Debug, Clone)]
pub struct Env {
    #[clap(long = "db", env = "DATABASE_URL")]
    database_url: String,
    #[clap(long, env, default_value = "info")]
    log_level: LogLevel,
    /// Base asset ids to reconcile, in order.
    #[clap(long, env = "BASE_ASSETS", value_delimiter = ',', num_args = 0..)]
    base_assets: Vec<i64>,
    /// Ceiling in seconds for a single store operation.
    #[clap(long, env, default_value = "30")]
    op_timeout_secs: u64,
    /// Minutes after which a crashed run's lease is considered stale.
    #[clap(long, env, default_value_t = DEFAULT_LEASE_TTL_MINUTES)]
    lease_ttl_minutes: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) database_url: String,
    pub log_level: LogLevel,
    pub base_assets: Vec<i64>,
    pub op_timeout_secs: u64,
    pub lease_ttl_minutes: u32,
}

impl Env {
    pub fn into_config(self) -> Config {
        Config {
            database_url: self.database_url,
            log_level: self.log_level,
            base_assets: self.base_assets,
            op_timeout_secs: self.op_timeout_secs,
            lease_ttl_minutes: self.lease_ttl_minutes,
        }
    }
}

impl Config {
    pub async fn get_sqlite_pool(&self) -> Result<SqlitePool, sqlx::Error> {
        configure_sqlite_pool(&self.database_url).await
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            op_timeout: std::time::Duration::from_secs(self.op_timeout_secs),
            lease_ttl_minutes: self.lease_ttl_minutes,
            cancel_flag: None,
        }
    }
}

pub(crate) async fn configure_sqlite_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePool::connect(database_url).await?;

    // WAL allows the ingestion process to keep reading while a backfill
    // transaction writes; only one writer runs at a time across processes.
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    // When ingestion holds the write lock, wait up to 10s before surfacing
    // "database is locked" as a (retryable) failure.
    sqlx::query("PRAGMA busy_timeout = 10000")
        .execute(&pool)
        .await?;

    Ok(pool)
}

pub fn setup_tracing(log_level: &LogLevel) {
    let level: Level = log_level.into();
    let default_filter = format!("swap_reconciler={level},reconciler={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn create_test_config() -> Config {
        Config {
            database_url: ":memory:".to_string(),
            log_level: LogLevel::Debug,
            base_assets: vec![1],
            op_timeout_secs: 30,
            lease_ttl_minutes: DEFAULT_LEASE_TTL_MINUTES,
        }
    }

    #[test]
    fn env_parses_comma_separated_base_assets() {
        let env = Env::try_parse_from([
            "reconciler",
            "--db",
            ":memory:",
            "--base-assets",
            "3,7,11",
        ])
        .unwrap();
        let config = env.into_config();
        assert_eq!(config.base_assets, vec![3, 7, 11]);
        assert_eq!(config.op_timeout_secs, 30);
        assert_eq!(config.lease_ttl_minutes, DEFAULT_LEASE_TTL_MINUTES);
    }

    #[test]
    fn base_assets_may_be_omitted_for_admin_commands() {
        let env = Env::try_parse_from(["reconciler", "--db", ":memory:"]).unwrap();
        assert!(env.into_config().base_assets.is_empty());
    }

    #[tokio::test]
    async fn sqlite_pool_creation_succeeds_in_memory() {
        let config = create_test_config();
        assert!(config.get_sqlite_pool().await.is_ok());
    }

    #[test]
    fn log_level_conversion_covers_all_variants() {
        assert_eq!(Level::from(&LogLevel::Trace), Level::TRACE);
        assert_eq!(Level::from(&LogLevel::Error), Level::ERROR);
    }
}
