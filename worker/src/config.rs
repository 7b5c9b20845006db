use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct WorkerConfig {
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: Option<String>,
    pub redis_db: u8,
    pub queue_name: String,
    pub database_url: Option<String>,
    pub batch_size: usize,
    pub worker_concurrency: usize,
    pub max_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_password: None,
            redis_db: 0,
            queue_name: "transactions".to_string(),
            database_url: None,
            batch_size: 10_000,
            worker_concurrency: 8,
            max_retries: 3,
        }
    }
}

impl WorkerConfig {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("GRAPH.toml"))
            .merge(Env::raw().only(&[
                "REDIS_HOST",
                "REDIS_PORT",
                "REDIS_PASSWORD",
                "REDIS_DB",
                "QUEUE_NAME",
                "DATABASE_URL",
                "BATCH_SIZE",
                "WORKER_CONCURRENCY",
                "MAX_RETRIES",
            ]))
    }

    pub fn config() -> figment::Result<Self> {
        Self::figment().extract()
    }

    /// Assembles a `redis://` connection URL from the discrete
    /// `REDIS_HOST`/`REDIS_PORT`/`REDIS_PASSWORD`/`REDIS_DB` variables.
    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                percent_encoding::utf8_percent_encode(
                    password,
                    percent_encoding::NON_ALPHANUMERIC
                ),
                self.redis_host,
                self.redis_port,
                self.redis_db
            ),
            None => format!("redis://{}:{}/{}", self.redis_host, self.redis_port, self.redis_db),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_without_password() {
        let config = WorkerConfig {
            redis_password: None,
            ..WorkerConfig::default()
        };
        assert_eq!(config.redis_url(), "redis://localhost:6379/0");
    }

    #[test]
    fn redis_url_with_password_is_percent_encoded() {
        let config = WorkerConfig {
            redis_password: Some("p@ss/word".to_string()),
            ..WorkerConfig::default()
        };
        assert_eq!(config.redis_url(), "redis://:p%40ss%2Fword@localhost:6379/0");
    }

    #[test]
    fn defaults_match_spec_table() {
        let config = WorkerConfig::default();
        assert_eq!(config.batch_size, 10_000);
        assert_eq!(config.queue_name, "transactions");
        assert_eq!(config.worker_concurrency, 8);
        assert_eq!(config.max_retries, 3);
    }
}
