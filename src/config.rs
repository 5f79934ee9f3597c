use anyhow::{Result, anyhow};
use clap::{Parser, ValueEnum};
use std::{env, fmt, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "MEDIA_GATEWAY_";

/// Which object store backs the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Local disk plus a SQLite catalog.
    Local,
    /// AWS S3 or an S3-compatible endpoint.
    S3,
    /// Process memory; contents vanish on exit.
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Backend as ValueEnum>::from_str(s, true)
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; CLI wins.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub bucket: String,
    pub storage_dir: String,
    pub database_url: String,
    /// Root URL clients use to reach this gateway.
    pub public_url: String,
    pub signing_secret: Option<String>,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    pub s3_force_path_style: bool,
    pub max_upload_bytes: u64,
    pub signed_url_ttl: Duration,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("backend", &self.backend)
            .field("bucket", &self.bucket)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("public_url", &self.public_url)
            .field(
                "signing_secret",
                &self.signing_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("s3_region", &self.s3_region)
            .field("s3_endpoint", &self.s3_endpoint)
            .field("s3_force_path_style", &self.s3_force_path_style)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("signed_url_ttl", &self.signed_url_ttl)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Media upload and delivery gateway")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend (overrides MEDIA_GATEWAY_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Bucket name (overrides MEDIA_GATEWAY_BUCKET / S3_BUCKET_NAME)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Directory where local objects are stored (overrides MEDIA_GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL for the local catalog (overrides MEDIA_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Externally reachable URL of this gateway (overrides MEDIA_GATEWAY_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Largest accepted upload in MiB (overrides MEDIA_GATEWAY_MAX_UPLOAD_MB)
    #[arg(long)]
    pub max_upload_mb: Option<u64>,

    /// Create the local catalog schema and exit
    #[arg(long)]
    pub migrate: bool,
}

fn var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(&format!("{ENV_PREFIX}{name}")).filter(|value| !value.trim().is_empty())
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    var(lookup, name)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|err| anyhow!("parsing {ENV_PREFIX}{name} value `{value}`: {err}"))
        })
        .transpose()
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<bool> {
    match var(lookup, name) {
        None => Ok(false),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(anyhow!(
                "parsing {ENV_PREFIX}{name} value `{other}`: expected true or false"
            )),
        },
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::resolve(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge `args` over the variables visible through `lookup`.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, bool)> {
        let port = match args.port {
            Some(port) => port,
            None => parse_var(&lookup, "PORT")?.unwrap_or(3000),
        };
        let backend = match args.backend {
            Some(backend) => backend,
            None => parse_var(&lookup, "BACKEND")?.unwrap_or(Backend::Local),
        };
        let max_upload_mb = match args.max_upload_mb {
            Some(mb) => mb,
            None => parse_var(&lookup, "MAX_UPLOAD_MB")?.unwrap_or(100),
        };
        if max_upload_mb == 0 {
            anyhow::bail!("upload limit must be at least 1 MiB");
        }
        let ttl_secs: u64 = parse_var(&lookup, "SIGNED_URL_TTL_SECS")?.unwrap_or(3600);
        if ttl_secs == 0 {
            anyhow::bail!("{ENV_PREFIX}SIGNED_URL_TTL_SECS must be positive");
        }

        let bucket = args
            .bucket
            .or_else(|| var(&lookup, "BUCKET"))
            .or_else(|| lookup("S3_BUCKET_NAME").filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| "media".into());
        let s3_region = var(&lookup, "S3_REGION")
            .or_else(|| lookup("AWS_REGION").filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| "eu-west-2".into());

        let cfg = Self {
            host: args
                .host
                .or_else(|| var(&lookup, "HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port,
            backend,
            bucket,
            storage_dir: args
                .storage_dir
                .or_else(|| var(&lookup, "STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .or_else(|| var(&lookup, "DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/media_gateway.db".into()),
            public_url: args
                .public_url
                .or_else(|| var(&lookup, "PUBLIC_URL"))
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            signing_secret: var(&lookup, "SIGNING_SECRET"),
            s3_region,
            s3_endpoint: var(&lookup, "S3_ENDPOINT"),
            s3_force_path_style: parse_flag(&lookup, "S3_FORCE_PATH_STYLE")?,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            signed_url_ttl: Duration::from_secs(ttl_secs),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
