use std::sync::atomic::{AtomicBool, Ordering};

use tracing_appender::non_blocking::WorkerGuard;

/// Handle для управления жизненным циклом логирования.
///
/// Держит guard файлового writer-а: пока handle жив, фоновый поток
/// `tracing-appender` продолжает писать логи на диск.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    shutdown_called: AtomicBool,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            shutdown_called: AtomicBool::new(false),
        }
    }

    /// Включена ли запись в файл.
    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Сбрасывает буферы и освобождает ресурсы логирования.
    pub fn shutdown(mut self) {
        self.shutdown_called.store(true, Ordering::Release);
        tracing::info!(
            file_sink = self.file_guard.is_some(),
            "Logging shutdown initiated"
        );
        let start = std::time::Instant::now();
        drop(self.file_guard.take());
        // После drop guard-а в файл уже ничего не попадёт, пишем только в stderr.
        let elapsed = start.elapsed();
        if elapsed.as_secs() >= 5 {
            eprintln!("WARNING: Logging shutdown took {}ms", elapsed.as_millis());
        }
    }
}

impl std::fmt::Debug for LoggingHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LoggingHandle")
            .field("file_sink", &self.file_guard.is_some())
            .field("shutdown_called", &self.shutdown_called.load(Ordering::Acquire))
            .finish()
    }
}

impl Drop for LoggingHandle {
    fn drop(&mut self) {
        if !self.shutdown_called.load(Ordering::Acquire) && self.file_guard.is_some() {
            eprintln!(
                "WARNING: LoggingHandle dropped without explicit shutdown(). \
                 Some logs may be lost. Call .shutdown() for graceful cleanup."
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет shutdown handle-а без файлового sink-а.
    #[test]
    fn test_shutdown_without_file_sink() {
        let handle = LoggingHandle::new(None);
        assert!(!handle.has_file_sink());
        handle.shutdown();
    }

    /// Тест проверяет, что shutdown освобождает guard файлового writer-а.
    #[test]
    fn test_shutdown_with_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let appender = tracing_appender::rolling::never(dir.path(), "h.log");
        let (_writer, guard) = tracing_appender::non_blocking(appender);

        let handle = LoggingHandle::new(Some(guard));
        assert!(handle.has_file_sink());
        assert!(format!("{handle:?}").contains("file_sink: true"));
        handle.shutdown();
    }
}
