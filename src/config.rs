use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub mongodb_uri: String,
    pub device_agent_uri: String,
    pub device_push_timeout_secs: u64,
    pub migration_retention_days: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()?;

        let mongodb_uri = env::var("MONGODB_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let device_agent_uri = env::var("DEVICE_AGENT_URI")
            .unwrap_or_else(|_| "http://127.0.0.1:9090".to_string());

        let device_push_timeout_secs = env::var("DEVICE_PUSH_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()?;

        let migration_retention_days = env::var("MIGRATION_RETENTION_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()?;

        Ok(Self {
            port,
            mongodb_uri,
            device_agent_uri,
            device_push_timeout_secs,
            migration_retention_days,
        })
    }
}
