use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::RwLock;
use sensorlink_error::BrokerError;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, error, trace, warn};

use super::{Broker, Message, MessageHandler};

type TopicKey = Arc<str>;

/// Внутрипроцессная pub/sub шина, общая для нескольких инстансов.
///
/// Каждый топик представлен `broadcast`-каналом. Инстансы подключаются к шине
/// через [`BusClient`], поэтому сообщение, опубликованное одним инстансом,
/// получают все инстансы, подписанные на топик.
pub struct InMemoryBus {
    /// Топик → `Sender`
    channels: DashMap<TopicKey, broadcast::Sender<Message>>,
    /// Ёмкость буфера каждого `broadcast::channel`
    capacity: usize,
    /// Общее количество вызовов `publish`
    publish_count: AtomicU64,
    /// Публикации, не нашедшие ни одного подписчика
    undelivered_count: AtomicU64,
    client_counter: AtomicU64,
}

/// Подключение одного инстанса к [`InMemoryBus`].
///
/// Для каждого топика держит ровно одну задачу доставки и один получатель
/// канала. Повторная подписка на тот же топик только подменяет обработчик,
/// так что сообщение никогда не доставляется дважды. Закрытие клиента
/// останавливает все задачи.
pub struct BusClient {
    id: u64,
    bus: Arc<InMemoryBus>,
    subscriptions: DashMap<TopicKey, Subscription>,
    closed: AtomicBool,
}

/// Подписка клиента на один топик.
struct Subscription {
    slot: Arc<HandlerSlot>,
    task: JoinHandle<()>,
}

/// Текущий обработчик топика, общий для подписки и её задачи доставки.
struct HandlerSlot {
    handler: RwLock<Arc<dyn MessageHandler>>,
    /// Сбрасывается при отписке; задача не вызывает обработчик после сброса,
    /// даже если `abort` ещё не сработал.
    active: AtomicBool,
}

/// Статистика шины.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    pub topics: usize,
    pub publish_count: u64,
    pub undelivered_count: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl InMemoryBus {
    /// Создаёт шину с заданной ёмкостью буфера на топик.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
            publish_count: AtomicU64::new(0),
            undelivered_count: AtomicU64::new(0),
            client_counter: AtomicU64::new(0),
        })
    }

    /// Создаёт клиента шины для одного инстанса.
    pub fn client(self: &Arc<Self>) -> BusClient {
        BusClient {
            id: self.client_counter.fetch_add(1, Ordering::Relaxed) + 1,
            bus: self.clone(),
            subscriptions: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Публикует сообщение и возвращает число получателей.
    ///
    /// Если у топика не осталось получателей, канал удаляется.
    pub fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> usize {
        self.publish_count.fetch_add(1, Ordering::Relaxed);

        let Some(entry) = self.channels.get(topic) else {
            self.undelivered_count.fetch_add(1, Ordering::Relaxed);
            trace!(topic, "Publish to topic without subscribers");
            return 0;
        };

        let tx = entry.value().clone();
        let key = entry.key().clone();
        drop(entry);

        match tx.send(Message::new(key.clone(), payload)) {
            Ok(receivers) => receivers,
            Err(_) => {
                self.undelivered_count.fetch_add(1, Ordering::Relaxed);
                self.channels
                    .remove_if(&key, |_, sender| sender.receiver_count() == 0);
                0
            }
        }
    }

    /// Количество получателей топика на всех клиентах.
    pub fn subscriber_count(
        &self,
        topic: &str,
    ) -> usize {
        self.channels
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            topics: self.channels.len(),
            publish_count: self.publish_count.load(Ordering::Relaxed),
            undelivered_count: self.undelivered_count.load(Ordering::Relaxed),
        }
    }

    fn receiver(
        &self,
        topic: &str,
    ) -> (TopicKey, broadcast::Receiver<Message>) {
        let entry = self
            .channels
            .entry(Arc::from(topic))
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        (entry.key().clone(), entry.value().subscribe())
    }
}

impl BusClient {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Подписан ли клиент на топик.
    pub fn is_subscribed(
        &self,
        topic: &str,
    ) -> bool {
        self.subscriptions.contains_key(topic)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Закрывает клиента и останавливает все задачи доставки.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.abort_all();
        debug!(client = self.id, "Bus client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    fn abort_all(&self) {
        self.subscriptions.retain(|_, subscription| {
            subscription.cancel();
            false
        });
    }
}

impl Subscription {
    fn cancel(&self) {
        self.slot.active.store(false, Ordering::Release);
        self.task.abort();
    }
}

impl HandlerSlot {
    fn new(handler: Arc<dyn MessageHandler>) -> Arc<Self> {
        Arc::new(Self {
            handler: RwLock::new(handler),
            active: AtomicBool::new(true),
        })
    }

    /// Обработчик для очередного сообщения или `None` после отписки.
    fn current(&self) -> Option<Arc<dyn MessageHandler>> {
        if !self.active.load(Ordering::Acquire) {
            return None;
        }
        Some(self.handler.read().clone())
    }

    fn replace(
        &self,
        handler: Arc<dyn MessageHandler>,
    ) {
        *self.handler.write() = handler;
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

#[async_trait]
impl Broker for BusClient {
    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;

        match self.subscriptions.entry(Arc::from(topic)) {
            Entry::Occupied(entry) => {
                entry.get().slot.replace(handler);
                trace!(client = self.id, topic, "Subscription handler replaced");
            }
            Entry::Vacant(entry) => {
                let (key, rx) = self.bus.receiver(topic);
                let slot = HandlerSlot::new(handler);
                let task = tokio::spawn(deliver(key, rx, slot.clone(), self.id));
                entry.insert(Subscription { slot, task });
                trace!(client = self.id, topic, "Subscribed");
            }
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        topic: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;

        if let Some((_, subscription)) = self.subscriptions.remove(topic) {
            subscription.cancel();
            trace!(client = self.id, topic, "Unsubscribed");
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let receivers = self.bus.publish(topic, payload);
        trace!(client = self.id, topic, receivers, "Published");
        Ok(())
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.abort_all();
    }
}

impl std::fmt::Debug for InMemoryBus {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("InMemoryBus")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Внутренние функции
////////////////////////////////////////////////////////////////////////////////

/// Цикл доставки сообщений одного топика текущему обработчику подписки.
async fn deliver(
    topic: TopicKey,
    mut rx: broadcast::Receiver<Message>,
    slot: Arc<HandlerSlot>,
    client: u64,
) {
    loop {
        match rx.recv().await {
            Ok(msg) => {
                let Some(handler) = slot.current() else {
                    break;
                };
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    handler.on_message(&msg.topic, msg.payload);
                }));
                if outcome.is_err() {
                    error!(client, topic = %topic, "Message handler panicked");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(
                    client,
                    topic = %topic,
                    skipped,
                    "Subscriber lagged behind, messages dropped"
                );
            }
            Err(RecvError::Closed) => break,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use tokio::time::{sleep, Duration};

    use super::*;

    #[derive(Default)]
    struct Collector(Mutex<Vec<(String, Bytes)>>);

    impl MessageHandler for Collector {
        fn on_message(
            &self,
            topic: &str,
            payload: Bytes,
        ) {
            self.0.lock().push((topic.to_string(), payload));
        }
    }

    async fn settle() {
        sleep(Duration::from_millis(20)).await;
    }

    /// Тест проверяет доставку сообщения подписанному клиенту.
    #[tokio::test]
    async fn test_publish_and_deliver() {
        let bus = InMemoryBus::new(16);
        let client = bus.client();
        let collector = Arc::new(Collector::default());

        client.subscribe("user.alice", collector.clone()).await.unwrap();
        client
            .publish("user.alice", Bytes::from_static(b"hi"))
            .await
            .unwrap();
        settle().await;

        let got = collector.0.lock().clone();
        assert_eq!(got, vec![("user.alice".to_string(), Bytes::from_static(b"hi"))]);
        assert_eq!(bus.stats().publish_count, 1);
    }

    /// Тест проверяет, что сообщение одного клиента получают все подписанные
    /// клиенты шины.
    #[tokio::test]
    async fn test_fanout_between_clients() {
        let bus = InMemoryBus::new(16);
        let a = bus.client();
        let b = bus.client();
        let collector = Arc::new(Collector::default());

        b.subscribe("device.42", collector.clone()).await.unwrap();
        a.publish("device.42", Bytes::from_static(b"on")).await.unwrap();
        settle().await;

        assert_eq!(collector.0.lock().len(), 1);
        assert_eq!(bus.subscriber_count("device.42"), 1);
    }

    /// Тест проверяет, что повторная подписка заменяет обработчик, а не
    /// дублирует доставку.
    #[tokio::test]
    async fn test_resubscribe_replaces_in_place() {
        let bus = InMemoryBus::new(16);
        let client = bus.client();
        let first = Arc::new(Collector::default());
        let second = Arc::new(Collector::default());

        client.subscribe("user.bob", first.clone()).await.unwrap();
        client.subscribe("user.bob", second.clone()).await.unwrap();
        settle().await;
        client.publish("user.bob", Bytes::from_static(b"x")).await.unwrap();
        settle().await;

        assert!(first.0.lock().is_empty());
        assert_eq!(second.0.lock().len(), 1);
        assert_eq!(client.subscription_count(), 1);
    }

    /// Обработчик, который задерживается на сообщении `first`, имитируя
    /// медленного потребителя.
    #[derive(Default)]
    struct Slow(Mutex<Vec<Bytes>>);

    impl MessageHandler for Slow {
        fn on_message(
            &self,
            _topic: &str,
            payload: Bytes,
        ) {
            if payload.as_ref() == b"first" {
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
            self.0.lock().push(payload);
        }
    }

    fn count(
        handler: &Slow,
        payload: &[u8],
    ) -> usize {
        handler
            .0
            .lock()
            .iter()
            .filter(|p| p.as_ref() == payload)
            .count()
    }

    /// Тест проверяет, что повторная подписка во время работы медленного
    /// обработчика не создаёт второго получателя и сообщение доставляется
    /// ровно один раз.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_resubscribe_during_slow_delivery_is_exactly_once() {
        let bus = InMemoryBus::new(16);
        let client = bus.client();
        let old = Arc::new(Slow::default());
        let new = Arc::new(Slow::default());

        client.subscribe("user.alice", old.clone()).await.unwrap();
        client
            .publish("user.alice", Bytes::from_static(b"first"))
            .await
            .unwrap();
        // Задача доставки застряла внутри `first`.
        sleep(Duration::from_millis(20)).await;

        client.subscribe("user.alice", new.clone()).await.unwrap();
        assert_eq!(bus.subscriber_count("user.alice"), 1);

        client
            .publish("user.alice", Bytes::from_static(b"second"))
            .await
            .unwrap();
        sleep(Duration::from_millis(300)).await;

        assert_eq!(count(&old, b"first"), 1);
        assert_eq!(count(&old, b"second") + count(&new, b"second"), 1);
        assert_eq!(count(&new, b"second"), 1);
    }

    /// Тест проверяет, что отписка с немедленной повторной подпиской не
    /// оставляет старую задачу доставки живой.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unsubscribe_then_resubscribe_is_exactly_once() {
        let bus = InMemoryBus::new(16);
        let client = bus.client();
        let old = Arc::new(Slow::default());
        let new = Arc::new(Slow::default());

        client.subscribe("device.7", old.clone()).await.unwrap();
        client
            .publish("device.7", Bytes::from_static(b"first"))
            .await
            .unwrap();
        sleep(Duration::from_millis(20)).await;

        client.unsubscribe("device.7").await.unwrap();
        client.subscribe("device.7", new.clone()).await.unwrap();
        client
            .publish("device.7", Bytes::from_static(b"second"))
            .await
            .unwrap();
        sleep(Duration::from_millis(300)).await;

        assert_eq!(count(&old, b"second"), 0);
        assert_eq!(count(&new, b"second"), 1);
    }

    /// Тест проверяет, что после отписки сообщения не доставляются, а
    /// повторная отписка безопасна.
    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = InMemoryBus::new(16);
        let client = bus.client();
        let collector = Arc::new(Collector::default());

        client.subscribe("user.carol", collector.clone()).await.unwrap();
        client.unsubscribe("user.carol").await.unwrap();
        client.unsubscribe("user.carol").await.unwrap();
        settle().await;
        client
            .publish("user.carol", Bytes::from_static(b"x"))
            .await
            .unwrap();
        settle().await;

        assert!(collector.0.lock().is_empty());
        assert!(!client.is_subscribed("user.carol"));
    }

    /// Тест проверяет, что закрытый клиент отвечает `BrokerError::Closed`.
    #[tokio::test]
    async fn test_closed_client_rejects_operations() {
        let bus = InMemoryBus::new(4);
        let client = bus.client();
        client.close();

        let err = client
            .publish("user.alice", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::Closed);
        assert!(client
            .subscribe("user.alice", Arc::new(Collector::default()))
            .await
            .is_err());
    }

    /// Тест проверяет, что паника обработчика не останавливает доставку.
    #[tokio::test]
    async fn test_handler_panic_does_not_stop_delivery() {
        struct Flaky(Mutex<u32>);

        impl MessageHandler for Flaky {
            fn on_message(
                &self,
                _topic: &str,
                _payload: Bytes,
            ) {
                let mut calls = self.0.lock();
                *calls += 1;
                if *calls == 1 {
                    drop(calls);
                    panic!("first message");
                }
            }
        }

        let bus = InMemoryBus::new(16);
        let client = bus.client();
        let handler = Arc::new(Flaky(Mutex::new(0)));

        client.subscribe("device.1", handler.clone()).await.unwrap();
        client.publish("device.1", Bytes::from_static(b"a")).await.unwrap();
        client.publish("device.1", Bytes::from_static(b"b")).await.unwrap();
        settle().await;

        assert_eq!(*handler.0.lock(), 2);
    }
}
