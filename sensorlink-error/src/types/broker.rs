use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки адаптера брокера сообщений.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Брокер временно недоступен (сеть, перегрузка)
    #[error("broker is unavailable: {reason}")]
    Unavailable { reason: String },

    /// Брокер отклонил подписку
    #[error("subscribe to '{topic}' failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    /// Брокер отклонил отписку
    #[error("unsubscribe from '{topic}' failed: {reason}")]
    UnsubscribeFailed { topic: String, reason: String },

    /// Публикация не принята брокером
    #[error("publish to '{topic}' failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    /// Операция не уложилась в отведённое время
    #[error("broker operation timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// Клиент брокера остановлен
    #[error("broker is closed")]
    Closed,
}

impl ErrorExt for BrokerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unavailable { .. } => StatusCode::BrokerUnavailable,
            Self::SubscribeFailed { .. } => StatusCode::SubscribeFailed,
            Self::UnsubscribeFailed { .. } => StatusCode::UnsubscribeFailed,
            Self::PublishFailed { .. } => StatusCode::PublishFailed,
            Self::Timeout { .. } => StatusCode::Timeout,
            Self::Closed => StatusCode::BrokerClosed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::Closed | Self::Unavailable { .. } | Self::Timeout { .. } => {
                "Message broker unavailable".to_string()
            }
            Self::PublishFailed { topic, .. } => format!("Publish to {topic} failed"),
            _ => "Internal server error".to_string(),
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "broker".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::SubscribeFailed { topic, .. }
            | Self::UnsubscribeFailed { topic, .. }
            | Self::PublishFailed { topic, .. } => tags.push(("topic", topic.clone())),
            _ => {}
        }

        tags
    }
}
