use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub temp_dir: String,
    pub ffprobe_path: String,
    pub session_ttl_hours: i64,
    pub size_tolerance_percent: f64,
    pub conflict_retries: u32,
    pub max_chunk_bytes: usize,
    pub max_chunks: u32,
}

/// What the binary should do after loading configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    SweepExpired,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable media upload service")]
pub struct Args {
    /// Host to bind to (overrides SCRIBE_UPLOADS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SCRIBE_UPLOADS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where chunks and assembled media are stored (overrides SCRIBE_UPLOADS_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides SCRIBE_UPLOADS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Scratch directory for merge files (overrides SCRIBE_UPLOADS_TEMP_DIR)
    #[arg(long)]
    pub temp_dir: Option<String>,

    /// Path to the ffprobe binary (overrides SCRIBE_UPLOADS_FFPROBE)
    #[arg(long)]
    pub ffprobe: Option<String>,

    /// Hours an upload session stays open (overrides SCRIBE_UPLOADS_SESSION_TTL_HOURS)
    #[arg(long)]
    pub session_ttl_hours: Option<i64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Expire stale upload sessions once and exit
    #[arg(long, conflicts_with = "migrate")]
    pub sweep_expired: bool,
}

const DEFAULT_MAX_CHUNKS: u32 = 10_000;

/// Knobs of the upload state machine.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// How long a session accepts chunks after creation.
    pub session_ttl: chrono::Duration,
    /// Allowed relative deviation between declared and assembled size (0.10 = 10%).
    pub size_tolerance: f64,
    /// Bound on optimistic-concurrency retries per write.
    pub conflict_retries: u32,
    /// Largest chunk count a session may declare or derive.
    pub max_chunks: u32,
    /// Where merge files are staged before upload.
    pub temp_dir: PathBuf,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            session_ttl: chrono::Duration::hours(24),
            size_tolerance: 0.10,
            conflict_retries: 16,
            max_chunks: DEFAULT_MAX_CHUNKS,
            temp_dir: env::temp_dir(),
        }
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        Self::resolve(Args::parse(), |key| env::var(key).ok())
    }

    /// Merge parsed CLI args with values from `lookup` (the environment in production).
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, RunMode)> {
        let env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        // --- Environment fallback ---
        let env_host = env_or("SCRIBE_UPLOADS_HOST", "0.0.0.0");
        let env_port = parse_var(&lookup, "SCRIBE_UPLOADS_PORT", 3000)?;
        let env_storage = env_or("SCRIBE_UPLOADS_STORAGE_DIR", "./data/objects");
        let env_db = env_or(
            "SCRIBE_UPLOADS_DATABASE_URL",
            "sqlite://./data/meta/uploads.db",
        );
        let env_temp = lookup("SCRIBE_UPLOADS_TEMP_DIR")
            .unwrap_or_else(|| env::temp_dir().to_string_lossy().into_owned());
        let env_ffprobe = env_or("SCRIBE_UPLOADS_FFPROBE", "ffprobe");
        let env_ttl = parse_var(&lookup, "SCRIBE_UPLOADS_SESSION_TTL_HOURS", 24)?;

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            temp_dir: args.temp_dir.unwrap_or(env_temp),
            ffprobe_path: args.ffprobe.unwrap_or(env_ffprobe),
            session_ttl_hours: args.session_ttl_hours.unwrap_or(env_ttl),
            size_tolerance_percent: parse_var(&lookup, "SCRIBE_UPLOADS_SIZE_TOLERANCE_PERCENT", 10.0)?,
            conflict_retries: parse_var(&lookup, "SCRIBE_UPLOADS_CONFLICT_RETRIES", 16)?,
            max_chunk_bytes: parse_var(&lookup, "SCRIBE_UPLOADS_MAX_CHUNK_BYTES", 16 * 1024 * 1024)?,
            max_chunks: parse_var(&lookup, "SCRIBE_UPLOADS_MAX_CHUNKS", DEFAULT_MAX_CHUNKS)?,
        };

        if cfg.session_ttl_hours <= 0 {
            anyhow::bail!("session TTL must be positive, got {} hours", cfg.session_ttl_hours);
        }
        if cfg.max_chunks == 0 {
            anyhow::bail!("SCRIBE_UPLOADS_MAX_CHUNKS must be positive");
        }
        if !(0.0..=100.0).contains(&cfg.size_tolerance_percent) {
            anyhow::bail!(
                "size tolerance must be between 0 and 100 percent, got {}",
                cfg.size_tolerance_percent
            );
        }

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.sweep_expired {
            RunMode::SweepExpired
        } else {
            RunMode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            session_ttl: chrono::Duration::hours(self.session_ttl_hours),
            size_tolerance: self.size_tolerance_percent / 100.0,
            conflict_retries: self.conflict_retries,
            max_chunks: self.max_chunks,
            temp_dir: PathBuf::from(&self.temp_dir),
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}
