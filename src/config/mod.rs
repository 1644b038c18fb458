use serde::Deserialize;

/// Settings for the HTTP API and the validation worker.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the validation queue
    pub redis_url: String,

    /// Bucket holding uploaded source files
    pub s3_bucket: String,

    /// S3-compatible endpoint URL
    pub s3_endpoint: String,

    /// Access key ID
    pub s3_access_key: String,

    /// Secret access key
    pub s3_secret_key: String,

    /// HS256 secret used to verify bearer tokens
    pub jwt_secret: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}

/// Settings for talking to the import backend, read from `HUELLA_*` variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the backend, e.g. "http://localhost:3000"
    pub api_url: String,

    /// Bearer credential from the session; passed through untouched
    pub api_token: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_token: api_token.into(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed("HUELLA_").from_env()
    }
}
