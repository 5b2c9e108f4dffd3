use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use sensorlink_error::BrokerError;

/// Обработчик доставки сообщений от брокера.
///
/// Вызывается из задачи доставки брокера; не должен блокироваться и не должен
/// паниковать.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(
        &self,
        topic: &str,
        payload: Bytes,
    );
}

/// Тонкий интерфейс над общим pub/sub транспортом.
///
/// `subscribe` идемпотентен: повторная подписка на тот же топик заменяет
/// обработчик, а не добавляет второй.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BrokerError>;

    async fn unsubscribe(
        &self,
        topic: &str,
    ) -> Result<(), BrokerError>;

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> Result<(), BrokerError>;
}
