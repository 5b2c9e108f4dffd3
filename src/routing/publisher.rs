use std::sync::Arc;

use bytes::Bytes;
use sensorlink_error::{BrokerError, GenericError, RelayResult, ResultExt, StatusCode};
use serde::Serialize;
use tracing::trace;

use super::ConnectionKey;
use crate::pubsub::Broker;

/// Публикация сообщений для пользователей и устройств.
///
/// Формирует топик по ключу цели, поэтому бизнес-логика не собирает имена
/// топиков вручную. Доставку выполняет тот инстанс, на котором живёт
/// соединение цели.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Публикует текст для цели.
    pub async fn send_text(
        &self,
        target: &ConnectionKey,
        text: &str,
    ) -> Result<(), BrokerError> {
        let topic = target.topic();
        trace!(topic = %topic, bytes = text.len(), "Publishing text message");
        self.broker
            .publish(&topic, Bytes::copy_from_slice(text.as_bytes()))
            .await
    }

    /// Сериализует значение в JSON и публикует его для цели.
    pub async fn send_json<T>(
        &self,
        target: &ConnectionKey,
        value: &T,
    ) -> RelayResult<()>
    where
        T: Serialize + ?Sized,
    {
        let text = serde_json::to_string(value).map_err(|err| {
            GenericError::new(StatusCode::InvalidData, format!("payload is not serializable: {err}"))
        })?;

        self.send_text(target, &text)
            .await
            .with_context(|| format!("publishing to {target}"))
    }

    /// Публикует текст пользователю.
    pub async fn to_user(
        &self,
        username: &str,
        text: &str,
    ) -> RelayResult<()> {
        let target = ConnectionKey::user(username)?;
        self.send_text(&target, text).await?;
        Ok(())
    }

    /// Публикует текст устройству.
    pub async fn to_device(
        &self,
        identifier: &str,
        text: &str,
    ) -> RelayResult<()> {
        let target = ConnectionKey::device(identifier)?;
        self.send_text(&target, text).await?;
        Ok(())
    }

    /// Публикует уже готовый топик после проверки его формата.
    pub async fn send_to_topic(
        &self,
        topic: &str,
        text: &str,
    ) -> RelayResult<()> {
        let target = ConnectionKey::from_topic(topic)?;
        self.send_text(&target, text).await?;
        Ok(())
    }
}
