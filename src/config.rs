use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Верхняя граница задержки опроса очереди
pub const MAX_POLL_DELAY_MS: u64 = 10_000;

/// Конфигурация multi-buffer провайдера обмена ключами
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CryptoMbConfig {
    /// Сколько неполный батч ждёт новых запросов перед принудительной обработкой
    pub poll_delay_ms: u64,
}

impl Default for CryptoMbConfig {
    fn default() -> Self {
        dotenv().ok();

        Self {
            poll_delay_ms: env::var("CRYPTOMB_POLL_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(200),
        }
    }
}

impl CryptoMbConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_delay_ms == 0 {
            return Err(ConfigError::InvalidPollDelay(
                "poll_delay_ms cannot be zero".to_string()
            ));
        }

        if self.poll_delay_ms > MAX_POLL_DELAY_MS {
            return Err(ConfigError::InvalidPollDelay(
                format!("poll_delay_ms cannot exceed {}ms", MAX_POLL_DELAY_MS)
            ));
        }

        Ok(())
    }

    pub fn get_poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    pub fn test_config() -> Self {
        Self {
            poll_delay_ms: 200,
        }
    }
}

/// Конфигурация демонстрационного хоста
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub cryptomb: CryptoMbConfig,
    pub worker_threads: usize,
    pub connections_per_worker: usize,
    /// Отказываться стартовать без AVX-512 IFMA
    pub require_avx512: bool,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        dotenv().ok();

        Self {
            cryptomb: CryptoMbConfig::from_env(),
            worker_threads: env::var("CRYPTOMB_WORKER_THREADS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(num_cpus::get),
            connections_per_worker: env::var("CRYPTOMB_CONNECTIONS_PER_WORKER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(64),
            require_avx512: env::var("CRYPTOMB_REQUIRE_AVX512")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cryptomb.validate()?;

        if self.worker_threads == 0 {
            return Err(ConfigError::InvalidWorkerCount(self.worker_threads));
        }

        if self.worker_threads > 1024 {
            return Err(ConfigError::InvalidWorkerCount(self.worker_threads));
        }

        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }

        Ok(())
    }

    pub fn test_config() -> Self {
        Self {
            cryptomb: CryptoMbConfig::test_config(),
            worker_threads: 2,
            connections_per_worker: 16,
            require_avx512: false,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid poll delay: {0}")]
    InvalidPollDelay(String),
    #[error("Invalid worker thread count: {0}")]
    InvalidWorkerCount(usize),
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),
}
