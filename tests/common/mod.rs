//! Общие помощники интеграционных тестов.
#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use sensorlink::{
    Broker, BusClient, ChannelHandle, ConnectionContext, ConnectionId, ConnectionKey,
    MessageHandler, SharedHandle,
};
use sensorlink_error::BrokerError;
use tokio::{sync::mpsc, time::timeout};

/// Время, за которое задачи доставки шины успевают отработать.
pub const SETTLE: Duration = Duration::from_millis(50);

pub async fn settle() {
    tokio::time::sleep(SETTLE).await;
}

/// Создаёт хэндл соединения и приёмник его исходящих сообщений.
pub fn connection(key: &ConnectionKey) -> (Arc<ChannelHandle>, mpsc::Receiver<Bytes>) {
    let context = ConnectionContext::new(ConnectionId::next(), key.clone());
    ChannelHandle::new(context, 16)
}

pub fn shared(handle: &Arc<ChannelHandle>) -> SharedHandle {
    handle.clone()
}

/// Ждёт следующего сообщения соединения не дольше секунды.
pub async fn next_text(rx: &mut mpsc::Receiver<Bytes>) -> Option<String> {
    match timeout(Duration::from_secs(1), rx.recv()).await {
        Ok(Some(bytes)) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        _ => None,
    }
}

/// Проверяет, что в приёмнике нет сообщений.
pub fn assert_silent(rx: &mut mpsc::Receiver<Bytes>) {
    assert!(
        rx.try_recv().is_err(),
        "connection must not receive anything"
    );
}

/// Клиент шины, отказывающий заданное число раз.
pub struct FlakyBroker {
    inner: BusClient,
    subscribe_failures: AtomicU32,
    unsubscribe_failures: AtomicU32,
}

impl FlakyBroker {
    pub fn new(inner: BusClient) -> Arc<Self> {
        Arc::new(Self {
            inner,
            subscribe_failures: AtomicU32::new(0),
            unsubscribe_failures: AtomicU32::new(0),
        })
    }

    pub fn fail_subscribes(
        &self,
        times: u32,
    ) {
        self.subscribe_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_unsubscribes(
        &self,
        times: u32,
    ) {
        self.unsubscribe_failures.store(times, Ordering::SeqCst);
    }

    pub fn client(&self) -> &BusClient {
        &self.inner
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Broker for FlakyBroker {
    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BrokerError> {
        if Self::take(&self.subscribe_failures) {
            return Err(BrokerError::SubscribeFailed {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.inner.subscribe(topic, handler).await
    }

    async fn unsubscribe(
        &self,
        topic: &str,
    ) -> Result<(), BrokerError> {
        if Self::take(&self.unsubscribe_failures) {
            return Err(BrokerError::UnsubscribeFailed {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.inner.unsubscribe(topic).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> Result<(), BrokerError> {
        self.inner.publish(topic, payload).await
    }
}
