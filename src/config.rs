use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use sqlx::postgres::PgConnectOptions;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

const DEFAULT_INPUT_DIR: &str = "/data/raw";
const DEFAULT_THRESHOLDS_PATH: &str = "/app/config/thresholds.json";
const DEFAULT_DB_PORT: u16 = 5432;
/// Keeps a 19-column summary insert under the Postgres bind-parameter limit.
const MAX_WRITE_BATCH_SIZE: usize = 3000;

/// Where the output tables live. Either a full URL or the discrete `DB_*` settings.
#[derive(Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Url(String),
    Params {
        host: String,
        port: u16,
        name: String,
        user: String,
        password: String,
    },
}

impl DatabaseTarget {
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        match self {
            DatabaseTarget::Url(url) => url
                .parse::<PgConnectOptions>()
                .context("DATABASE_URL is not a valid postgres connection string"),
            DatabaseTarget::Params {
                host,
                port,
                name,
                user,
                password,
            } => Ok(PgConnectOptions::new()
                .host(host)
                .port(*port)
                .database(name)
                .username(user)
                .password(password)),
        }
    }
}

impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseTarget::Url(_) => f.write_str("Url(<redacted>)"),
            DatabaseTarget::Params {
                host, port, name, user, ..
            } => f
                .debug_struct("Params")
                .field("host", host)
                .field("port", port)
                .field("name", name)
                .field("user", user)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database: DatabaseTarget,
    pub db_pool_size: u32,
    pub input_dir: PathBuf,
    pub thresholds_path: PathBuf,
    pub write_batch_size: usize,
    pub partition_workers: usize,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let database = match get("DATABASE_URL") {
            Some(url) => DatabaseTarget::Url(normalize_database_url(url)),
            None => {
                let required = |key: &str| {
                    get(key).with_context(|| {
                        format!("{key} is required when DATABASE_URL is not set")
                    })
                };
                let port = match get("DB_PORT") {
                    Some(raw) => raw
                        .parse::<u16>()
                        .with_context(|| format!("DB_PORT must be a port number, got {raw:?}"))?,
                    None => DEFAULT_DB_PORT,
                };
                DatabaseTarget::Params {
                    host: required("DB_HOST")?,
                    port,
                    name: required("DB_NAME")?,
                    user: required("DB_USER")?,
                    password: required("DB_PASS")?,
                }
            }
        };

        let db_pool_size = get("AGGREGATOR_DB_POOL_SIZE")
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(4);
        let input_dir = get("AGGREGATOR_INPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INPUT_DIR));
        let thresholds_path = get("AGGREGATOR_THRESHOLDS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_THRESHOLDS_PATH));
        let write_batch_size = get("AGGREGATOR_WRITE_BATCH_SIZE")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(1000)
            .clamp(1, MAX_WRITE_BATCH_SIZE);
        let partition_workers = get("AGGREGATOR_PARTITION_WORKERS")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            });
        let otlp_endpoint = get("OTEL_EXPORTER_OTLP_ENDPOINT");

        Ok(Self {
            database,
            db_pool_size,
            input_dir,
            thresholds_path,
            write_batch_size,
            partition_workers,
            otlp_endpoint,
        })
    }

    pub fn input_path(&self, file_name: &str) -> Result<PathBuf> {
        resolve_input_path(&self.input_dir, file_name)
    }
}

/// Joins a bare `.csv` file name onto the input directory. Anything that could point
/// outside it is rejected.
pub fn resolve_input_path(input_dir: &Path, file_name: &str) -> Result<PathBuf> {
    let name = file_name.trim();
    if name.is_empty() {
        bail!("input file name must not be empty");
    }
    if name.contains('/') || name.contains('\\') {
        bail!("input file name {name:?} must not contain a path separator");
    }
    if !name.to_ascii_lowercase().ends_with(".csv") {
        bail!("input file name {name:?} must end in .csv");
    }
    Ok(input_dir.join(name))
}

fn normalize_database_url(url: String) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg2://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    url
}
