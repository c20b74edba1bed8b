//! Backend selection from the environment

use std::path::PathBuf;

/// Default namespace / database
pub const DEFAULT_NAMESPACE: &str = "devstory";
pub const DEFAULT_DATABASE: &str = "main";

/// Default on-disk location for local persistence
pub const DEFAULT_DATA_DIR: &str = ".devstory";

/// Remote SurrealDB credentials
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// WebSocket endpoint URL (e.g., "wss://xxx.aws-use1.surrealdb.cloud")
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
    /// Whether this is a root user (true) or database user (false)
    pub is_root: bool,
}

impl CloudConfig {
    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_ENDPOINT (required)
    /// - SURREALDB_USERNAME (required)
    /// - SURREALDB_PASSWORD (required)
    /// - SURREALDB_NAMESPACE (optional, default: "devstory")
    /// - SURREALDB_DATABASE (optional, default: "main")
    /// - SURREALDB_ROOT (optional, default: "false")
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint =
            std::env::var("SURREALDB_ENDPOINT").map_err(|_| "SURREALDB_ENDPOINT not set")?;
        let username =
            std::env::var("SURREALDB_USERNAME").map_err(|_| "SURREALDB_USERNAME not set")?;
        let password =
            std::env::var("SURREALDB_PASSWORD").map_err(|_| "SURREALDB_PASSWORD not set")?;
        let namespace = std::env::var("SURREALDB_NAMESPACE")
            .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
        let database =
            std::env::var("SURREALDB_DATABASE").unwrap_or_else(|_| DEFAULT_DATABASE.to_string());
        let is_root = std::env::var("SURREALDB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            endpoint,
            username,
            password,
            namespace,
            database,
            is_root,
        })
    }
}

/// Where runs and artifacts are persisted.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// Authenticated remote instance
    Cloud(CloudConfig),
    /// Any SurrealDB URL (`mem://`, `ws://...`, `surrealkv://...`)
    Url(String),
    /// Local `surrealkv://` database under a data directory
    Local(PathBuf),
}

impl StoreConfig {
    /// Resolve from the environment: cloud credentials, then `SURREALDB_URL`,
    /// then `DEVSTORY_DATA_DIR` (default `.devstory`).
    pub fn from_env() -> Self {
        if let Ok(cloud) = CloudConfig::from_env() {
            return StoreConfig::Cloud(cloud);
        }
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return StoreConfig::Url(url);
        }
        let dir = std::env::var("DEVSTORY_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.into());
        StoreConfig::Local(PathBuf::from(dir))
    }

    /// Directory used for local blobs and the local database.
    pub fn data_dir(&self) -> PathBuf {
        match self {
            StoreConfig::Local(dir) => dir.clone(),
            _ => std::env::var("DEVSTORY_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR)),
        }
    }

    /// Short human-readable description (never includes credentials).
    pub fn describe(&self) -> String {
        match self {
            StoreConfig::Cloud(c) => format!("cloud {} ({}/{})", c.endpoint, c.namespace, c.database),
            StoreConfig::Url(url) => url.clone(),
            StoreConfig::Local(dir) => format!("surrealkv://{}", dir.join("db").display()),
        }
    }
}
