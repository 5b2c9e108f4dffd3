use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, RoutingError, StatusCode};

/// Ошибки отправки сообщения в живое соединение.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Соединение уже закрыто транспортом
    #[error("connection {connection_id} is closed")]
    Closed { connection_id: u64 },

    /// Исходящий буфер соединения переполнен (клиент не успевает читать)
    #[error("outbound buffer of connection {connection_id} is full")]
    BufferFull { connection_id: u64 },
}

/// Ошибки рукопожатия транспортного уровня.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// Строка приветствия не соответствует формату `HELLO <class> <id>`
    #[error("malformed handshake: {line}")]
    Malformed { line: String },

    /// Класс или идентификатор не прошли проверку
    #[error(transparent)]
    Identity(#[from] RoutingError),

    /// Клиент не прислал приветствие вовремя
    #[error("handshake timed out")]
    Timeout,

    /// Соединение закрыто до завершения рукопожатия
    #[error("connection closed during handshake")]
    Eof,
}

impl ErrorExt for SendError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Closed { .. } => StatusCode::ConnectionClosed,
            Self::BufferFull { .. } => StatusCode::BufferFull,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ErrorExt for HandshakeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Malformed { .. } => StatusCode::InvalidCommand,
            Self::Identity(inner) => inner.status_code(),
            Self::Timeout => StatusCode::ReadTimeout,
            Self::Eof => StatusCode::UnexpectedEof,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_error_status() {
        let full = SendError::BufferFull { connection_id: 7 };
        assert_eq!(full.status_code(), StatusCode::BufferFull);
        assert_eq!(full.to_string(), "outbound buffer of connection 7 is full");
        assert_eq!(
            SendError::Closed { connection_id: 7 }.status_code(),
            StatusCode::ConnectionClosed
        );
    }

    #[test]
    fn test_handshake_identity_is_transparent() {
        let err: HandshakeError = RoutingError::UnknownClass {
            value: "robot".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::InvalidIdentity);
        assert_eq!(err.to_string(), "unknown connection class 'robot'");
    }
}
