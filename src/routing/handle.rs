use std::sync::Arc;

use sensorlink_error::SendError;

use super::ConnectionContext;

/// Живой двунаправленный поток к одному клиенту.
///
/// Хэндлом владеет транспорт. Реестр хранит на него только слабую ссылку и
/// никогда не закрывает его сам.
pub trait ConnectionHandle: Send + Sync + 'static {
    /// Идентичность соединения, зафиксированная при рукопожатии.
    fn context(&self) -> &ConnectionContext;

    /// Неблокирующая отправка текстового сообщения.
    fn send(
        &self,
        text: &str,
    ) -> Result<(), SendError>;

    fn is_open(&self) -> bool;

    /// Просит транспорт закрыть соединение. Повторный вызов ничего не делает.
    fn close(&self);
}

/// Разделяемый хэндл соединения.
pub type SharedHandle = Arc<dyn ConnectionHandle>;
