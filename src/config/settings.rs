use std::{path::Path, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{
    logging::LoggingConfig,
    network::ConnectionConfig,
    routing::{NodeConfig, RetryPolicy},
};

/// Префикс переменных окружения: `SENSORLINK_MAX_CONNECTIONS`,
/// `SENSORLINK_RETRY__MAX_ATTEMPTS`.
pub const ENV_PREFIX: &str = "SENSORLINK";

/// Параметры повторов операций брокера.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// Настройки инстанса.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub listen_address: String,
    pub max_connections: usize,
    /// Ёмкость исходящей очереди одного соединения
    pub outbound_buffer: usize,
    /// Таймаут строки приветствия
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub idle_timeout_secs: u64,
    /// Ёмкость канала одного топика во встроенной шине
    pub bus_capacity: usize,
    pub retry: RetrySettings,
    /// Период сверки подписок, 0 отключает сверку
    pub reconcile_interval_secs: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Загружает настройки из значений по умолчанию и окружения.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Загружает настройки: значения по умолчанию, затем файл (если указан),
    /// затем переменные окружения с префиксом `SENSORLINK_`.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Добавляем значения по умолчанию
            .set_default("listen_address", "127.0.0.1:7070")?
            .set_default("max_connections", 10_000)?
            .set_default("outbound_buffer", 256)?
            .set_default("read_timeout_ms", 10_000)?
            .set_default("write_timeout_ms", 10_000)?
            .set_default("idle_timeout_secs", 300)?
            .set_default("bus_capacity", 1024)?
            .set_default("retry.max_attempts", 5)?
            .set_default("retry.base_delay_ms", 100)?
            .set_default("retry.max_delay_ms", 5_000)?
            .set_default("reconcile_interval_secs", 30)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let cfg = builder
            // Добавляем переменные окружения с префиксом SENSORLINK_
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("logging.directives")
                    .try_parsing(true),
            )
            .build()?;

        // Десериализуем конфигурацию в нашу структуру
        let settings: Self = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Проверяет, что ёмкости и лимиты ненулевые.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.max_connections == 0, "max_connections must be positive"),
            (self.outbound_buffer == 0, "outbound_buffer must be positive"),
            (self.bus_capacity == 0, "bus_capacity must be positive"),
            (self.retry.max_attempts == 0, "retry.max_attempts must be positive"),
            (
                self.retry.base_delay_ms > self.retry.max_delay_ms,
                "retry.base_delay_ms must not exceed retry.max_delay_ms",
            ),
            (self.read_timeout_ms == 0, "read_timeout_ms must be positive"),
            (self.write_timeout_ms == 0, "write_timeout_ms must be positive"),
            (self.idle_timeout_secs == 0, "idle_timeout_secs must be positive"),
        ];
        if let Some((_, message)) = checks.iter().find(|(failed, _)| *failed) {
            return Err(ConfigError::Message((*message).to_string()));
        }
        self.logging
            .validate()
            .map_err(|e| ConfigError::Message(format!("logging: {e}")))
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_connections: self.max_connections,
            outbound_buffer: self.outbound_buffer,
            handshake_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            ..ConnectionConfig::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
        )
    }

    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            retry: self.retry_policy(),
            reconcile_interval: (self.reconcile_interval_secs > 0)
                .then(|| Duration::from_secs(self.reconcile_interval_secs)),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
