use std::fs;

use tracing_appender::{non_blocking::WorkerGuard, rolling::daily};
use tracing_subscriber::registry::LookupSpan;

use crate::logging::{
    config::LoggingConfig,
    formatter::{self, BoxedLayer},
    LoggingError,
};

/// Создаёт file layer с ежедневной ротацией.
///
/// Возвращённый [`WorkerGuard`] должен жить до завершения процесса: при его
/// удалении буфер неблокирующего writer-а сбрасывается на диск.
pub fn layer<S>(config: &LoggingConfig) -> Result<(BoxedLayer<S>, WorkerGuard), LoggingError>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fs::create_dir_all(&config.log_dir).map_err(|source| LoggingError::LogDir {
        path: config.log_dir.clone(),
        source,
    })?;

    let file_appender = daily(&config.log_dir, &config.file_name);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let layer = formatter::build_formatter(config, config.format, writer, false);
    Ok((layer, guard))
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;

    /// Тест проверяет, что file layer создаёт каталог и пишет в него.
    #[test]
    fn test_file_layer_writes_into_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("nested");
        let cfg = LoggingConfig {
            file_enabled: true,
            log_dir: log_dir.clone(),
            file_name: "relay.log".to_string(),
            ..Default::default()
        };

        let (layer, guard) = layer::<Registry>(&cfg).unwrap();
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("written to file");
        });
        drop(guard);

        assert!(log_dir.is_dir());
        let files: Vec<_> = fs::read_dir(&log_dir).unwrap().collect();
        assert!(!files.is_empty());
    }
}
