use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки разбора топиков и идентичности соединений.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// Топик не начинается ни с одного известного префикса
    #[error("topic '{topic}' has an unknown prefix")]
    UnknownPrefix { topic: String },

    /// После префикса нет идентификатора
    #[error("topic '{topic}' has an empty identifier")]
    EmptyIdentifier { topic: String },

    /// Неизвестный класс соединения
    #[error("unknown connection class '{value}'")]
    UnknownClass { value: String },

    /// Полезная нагрузка не является текстом UTF-8
    #[error("payload on topic '{topic}' is not valid UTF-8")]
    NonTextPayload { topic: String },
}

impl ErrorExt for RoutingError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownPrefix { .. } | Self::EmptyIdentifier { .. } => StatusCode::InvalidTopic,
            Self::UnknownClass { .. } => StatusCode::InvalidIdentity,
            Self::NonTextPayload { .. } => StatusCode::InvalidUtf8,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
