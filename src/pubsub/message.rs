use std::sync::Arc;

use bytes::Bytes;

/// Сообщение, передаваемое через шину.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: Arc<str>,
    pub payload: Bytes,
}

impl Message {
    pub fn new(
        topic: impl Into<Arc<str>>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет создание сообщения из &str и статических байт.
    #[test]
    fn test_message_creation() {
        let msg = Message::new("user.alice", Bytes::from_static(b"{\"kind\":\"update\"}"));

        assert_eq!(&*msg.topic, "user.alice");
        assert_eq!(msg.payload, Bytes::from_static(b"{\"kind\":\"update\"}"));
    }

    /// Тест проверяет, что клонирование не копирует полезную нагрузку.
    #[test]
    fn test_message_clone_shares_payload() {
        let msg = Message::new(String::from("device.42"), vec![1u8, 2, 3]);
        let copy = msg.clone();

        assert_eq!(copy.payload.as_ptr(), msg.payload.as_ptr());
        assert!(Arc::ptr_eq(&copy.topic, &msg.topic));
    }
}
