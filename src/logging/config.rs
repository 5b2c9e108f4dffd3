use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::LoggingError;

/// Формат вывода логов в консоль.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Многострочный формат для разработки
    Pretty,
    /// Однострочный формат
    #[default]
    Compact,
    /// JSON для сборщиков логов
    Json,
}

/// Конфигурация подсистемы логирования.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: trace, debug, info, warn, error
    pub level: String,
    /// Дополнительные директивы фильтра, например `sensorlink::routing=debug`
    pub directives: Vec<String>,
    pub format: LogFormat,
    pub console_enabled: bool,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
    /// Запись в файл с ежедневной ротацией
    pub file_enabled: bool,
    pub log_dir: PathBuf,
    pub file_name: String,
}

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl LoggingConfig {
    /// Проверяет корректность конфигурации.
    pub fn validate(&self) -> Result<(), LoggingError> {
        let level = self.level.to_ascii_lowercase();
        if !LEVELS.contains(&level.as_str()) {
            return Err(LoggingError::InvalidLevel(self.level.clone()));
        }
        if self.file_enabled && self.file_name.trim().is_empty() {
            return Err(LoggingError::InvalidFileName);
        }
        Ok(())
    }

    /// Собирает директиву `EnvFilter` из уровня и дополнительных директив.
    pub fn build_filter_directive(&self) -> String {
        let mut parts = vec![self.level.to_ascii_lowercase()];
        parts.extend(
            self.directives
                .iter()
                .map(|d| d.trim())
                .filter(|d| !d.is_empty())
                .map(str::to_string),
        );
        parts.join(",")
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directives: Vec::new(),
            format: LogFormat::Compact,
            console_enabled: true,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
            file_enabled: false,
            log_dir: PathBuf::from("logs"),
            file_name: "sensorlink.log".to_string(),
        }
    }
}
