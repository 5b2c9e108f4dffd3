use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info, trace, warn};

use super::{
    ConnectionId, ConnectionKey, ConnectionRegistry, Generation, LifecycleEvent,
    LifecycleListener, RetryPolicy, SharedHandle,
};
use crate::pubsub::{Broker, MessageHandler};

/// Состояние подписки на топик.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Подписка на брокере активна
    Active,
    /// Подписаться не удалось: соединение зарегистрировано, но недостижимо
    Unroutable,
}

/// Запись о подписке: поколение регистрации, для которого она сделана.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionRecord {
    pub generation: Generation,
    pub state: SubscriptionState,
}

/// Уведомление маршрутизатора о хэндле, который уже закрыт или освобождён.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleConnection {
    pub key: ConnectionKey,
    pub generation: Generation,
}

/// Итог одного прохода сверки подписок.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Подписки без владельца, успешно снятые с брокера
    pub released: usize,
    /// Недостижимые соединения, для которых подписка восстановлена
    pub resubscribed: usize,
    /// Операции, снова завершившиеся ошибкой
    pub failed: usize,
}

/// Результат попытки привести топик в нужное состояние.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepOutcome {
    Released,
    Resubscribed,
    Failed,
    Skipped,
}

/// Менеджер подписок на топики.
///
/// Реагирует на события жизненного цикла, обновляет реестр и держит ровно одну
/// подписку на брокере для каждого локально зарегистрированного ключа. Все
/// операции с брокером для одного топика сериализуются асинхронным мьютексом
/// топика, а перед каждой операцией под этим мьютексом заново проверяется
/// текущее поколение ключа в реестре. Поэтому устаревшая отписка не может
/// обогнать более новую подписку.
pub struct TopicSubscriptionManager {
    registry: Arc<ConnectionRegistry>,
    broker: Arc<dyn Broker>,
    handler: Arc<dyn MessageHandler>,
    retry: RetryPolicy,
    /// Поколение, выданное каждому физическому соединению
    owners: DashMap<ConnectionId, Generation>,
    /// Топик → запись о подписке
    records: DashMap<String, SubscriptionRecord>,
    /// Топики, отписка от которых не удалась
    leaked: DashSet<String>,
    topic_locks: DashMap<String, Arc<Mutex<()>>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl TopicSubscriptionManager {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broker: Arc<dyn Broker>,
        handler: Arc<dyn MessageHandler>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            broker,
            handler,
            retry,
            owners: DashMap::new(),
            records: DashMap::new(),
            leaked: DashSet::new(),
            topic_locks: DashMap::new(),
        }
    }

    /// Обрабатывает установленное соединение.
    ///
    /// Регистрирует хэндл и подписывается на его топик, если к моменту захвата
    /// мьютекса топика регистрация всё ещё актуальна.
    pub async fn on_established(
        &self,
        handle: &SharedHandle,
    ) -> Generation {
        let context = handle.context();
        let key = context.key().clone();
        let generation = self.registry.register(key.clone(), handle);
        self.owners.insert(context.id(), generation);

        let topic = key.topic();
        debug!(
            topic = %topic,
            connection_id = %context.id(),
            generation = %generation,
            "Connection established"
        );

        self.with_topic_lock(&topic, || self.subscribe_if_current(&key, &topic, generation))
            .await;

        generation
    }

    /// Обрабатывает закрытое соединение.
    ///
    /// Возвращает `true`, если регистрация этого соединения была актуальной и
    /// снята.
    pub async fn on_closed(
        &self,
        handle: &SharedHandle,
    ) -> bool {
        let context = handle.context();
        let Some((_, generation)) = self.owners.remove(&context.id()) else {
            debug!(
                connection_id = %context.id(),
                key = %context.key(),
                "Closed event for unknown connection"
            );
            return false;
        };

        debug!(
            key = %context.key(),
            connection_id = %context.id(),
            generation = %generation,
            "Connection closed"
        );
        self.release(context.key(), generation).await
    }

    /// Снимает регистрацию данного поколения и отписывается от топика, если
    /// более новой регистрации не появилось.
    ///
    /// Используется и при закрытии соединения, и при неявном закрытии,
    /// обнаруженном маршрутизатором.
    pub async fn release(
        &self,
        key: &ConnectionKey,
        generation: Generation,
    ) -> bool {
        if !self.registry.unregister(key, generation) {
            trace!(key = %key, generation = %generation, "Registration already superseded");
            return false;
        }

        let topic = key.topic();
        self.with_topic_lock(&topic, || self.unsubscribe_if_vacant(key, &topic))
            .await;
        true
    }

    /// Сверяет подписки с реестром.
    ///
    /// Снимает подписки, отписка от которых ранее не удалась, и подписки без
    /// владельца, а также повторяет подписку для недостижимых соединений.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let mut topics: Vec<String> = self.leaked.iter().map(|t| t.key().clone()).collect();
        topics.extend(self.records.iter().map(|r| r.key().clone()));
        for key in self.registry.keys() {
            let topic = key.topic();
            if !self.records.contains_key(&topic) {
                topics.push(topic);
            }
        }
        topics.sort_unstable();
        topics.dedup();

        for topic in topics {
            let key = match ConnectionKey::from_topic(&topic) {
                Ok(key) => key,
                Err(err) => {
                    warn!(topic = %topic, error = %err, "Dropping record with malformed topic");
                    self.leaked.remove(&topic);
                    self.records.remove(&topic);
                    continue;
                }
            };

            let outcome = self
                .with_topic_lock(&topic, || self.sweep_topic(&key, &topic))
                .await;

            match outcome {
                SweepOutcome::Released => report.released += 1,
                SweepOutcome::Resubscribed => report.resubscribed += 1,
                SweepOutcome::Failed => report.failed += 1,
                SweepOutcome::Skipped => {}
            }
        }

        if report != ReconcileReport::default() {
            info!(
                released = report.released,
                resubscribed = report.resubscribed,
                failed = report.failed,
                "Subscription reconciliation finished"
            );
        }

        report
    }

    /// Запись о подписке топика.
    pub fn record(
        &self,
        topic: &str,
    ) -> Option<SubscriptionRecord> {
        self.records.get(topic).map(|r| *r.value())
    }

    /// Топики, ожидающие повторной отписки.
    pub fn leaked_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.leaked.iter().map(|t| t.key().clone()).collect();
        topics.sort_unstable();
        topics
    }

    /// Количество записей в данном состоянии.
    pub fn count_in_state(
        &self,
        state: SubscriptionState,
    ) -> usize {
        self.records.iter().filter(|r| r.state == state).count()
    }

    /// Поколение, выданное физическому соединению, если оно ещё не закрыто.
    pub fn generation_of(
        &self,
        connection_id: ConnectionId,
    ) -> Option<Generation> {
        self.owners.get(&connection_id).map(|g| *g)
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Запускает задачу, снимающую регистрации, которые маршрутизатор
    /// обнаружил закрытыми.
    pub fn spawn_cleanup_task(
        self: &Arc<Self>,
        mut stale: mpsc::UnboundedReceiver<StaleConnection>,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(StaleConnection { key, generation }) = stale.recv().await {
                if manager.release(&key, generation).await {
                    debug!(key = %key, generation = %generation, "Stale connection released");
                }
            }
            trace!("Stale connection channel closed, cleanup task stopped");
        })
    }

    /// Запускает периодическую сверку подписок.
    pub fn spawn_reconcile_task(
        self: &Arc<Self>,
        period: Duration,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Первый тик срабатывает сразу.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let report = manager.reconcile().await;
                trace!(?report, "Reconcile tick");
            }
        })
    }

    async fn subscribe_if_current(
        &self,
        key: &ConnectionKey,
        topic: &str,
        generation: Generation,
    ) {
        if self.registry.current_generation(key) != Some(generation) {
            debug!(
                topic,
                generation = %generation,
                "Registration superseded before subscribe, skipping"
            );
            return;
        }

        // Подписка брокера уже действует для этого инстанса: достаточно
        // перевести запись на новое поколение.
        if let Some(mut record) = self.records.get_mut(topic) {
            if record.state == SubscriptionState::Active {
                let previous = record.generation;
                record.generation = generation;
                trace!(
                    topic,
                    previous = %previous,
                    generation = %generation,
                    "Subscription already active, generation updated"
                );
                return;
            }
        }

        let result = self
            .retry
            .run("subscribe", || self.broker.subscribe(topic, self.handler.clone()))
            .await;

        match result {
            Ok(()) => {
                self.leaked.remove(topic);
                self.records.insert(
                    topic.to_string(),
                    SubscriptionRecord {
                        generation,
                        state: SubscriptionState::Active,
                    },
                );
                trace!(topic, generation = %generation, "Subscription active");
            }
            Err(err) => {
                error!(
                    topic,
                    generation = %generation,
                    error = %err,
                    "Subscribe failed, connection is unroutable"
                );
                self.records.insert(
                    topic.to_string(),
                    SubscriptionRecord {
                        generation,
                        state: SubscriptionState::Unroutable,
                    },
                );
            }
        }
    }

    async fn unsubscribe_if_vacant(
        &self,
        key: &ConnectionKey,
        topic: &str,
    ) {
        if let Some(current) = self.registry.current_generation(key) {
            debug!(
                topic,
                current = %current,
                "Newer registration owns topic, keeping subscription"
            );
            return;
        }

        let result = self
            .retry
            .run("unsubscribe", || self.broker.unsubscribe(topic))
            .await;

        self.records.remove(topic);
        match result {
            Ok(()) => trace!(topic, "Subscription removed"),
            Err(err) => {
                error!(topic, error = %err, "Unsubscribe failed, subscription leaked");
                self.leaked.insert(topic.to_string());
            }
        }
    }

    /// Приводит один топик в соответствие с реестром. Вызывается под
    /// мьютексом топика.
    async fn sweep_topic(
        &self,
        key: &ConnectionKey,
        topic: &str,
    ) -> SweepOutcome {
        let Some(current) = self.registry.current_generation(key) else {
            let pending = self.leaked.contains(topic) || self.records.contains_key(topic);
            if !pending {
                return SweepOutcome::Skipped;
            }

            return match self.broker.unsubscribe(topic).await {
                Ok(()) => {
                    self.leaked.remove(topic);
                    self.records.remove(topic);
                    debug!(topic, "Orphaned subscription released");
                    SweepOutcome::Released
                }
                Err(err) => {
                    warn!(topic, error = %err, "Orphaned subscription still not released");
                    self.records.remove(topic);
                    self.leaked.insert(topic.to_string());
                    SweepOutcome::Failed
                }
            };
        };

        // Ключ снова занят: подписка нужна, утечки больше нет.
        self.leaked.remove(topic);

        let healthy = matches!(
            self.record(topic),
            Some(SubscriptionRecord { generation, state: SubscriptionState::Active }) if generation == current
        );
        if healthy {
            return SweepOutcome::Skipped;
        }

        match self
            .broker
            .subscribe(topic, self.handler.clone())
            .await
        {
            Ok(()) => {
                self.records.insert(
                    topic.to_string(),
                    SubscriptionRecord {
                        generation: current,
                        state: SubscriptionState::Active,
                    },
                );
                info!(topic, generation = %current, "Subscription restored");
                SweepOutcome::Resubscribed
            }
            Err(err) => {
                warn!(topic, error = %err, "Connection is still unroutable");
                self.records.insert(
                    topic.to_string(),
                    SubscriptionRecord {
                        generation: current,
                        state: SubscriptionState::Unroutable,
                    },
                );
                SweepOutcome::Failed
            }
        }
    }

    /// Выполняет `f` под мьютексом топика.
    async fn with_topic_lock<F, Fut, T>(
        &self,
        topic: &str,
        f: F,
    ) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self
            .topic_locks
            .entry(topic.to_string())
            .or_default()
            .clone();

        let result = {
            let _guard = lock.lock().await;
            f().await
        };

        drop(lock);
        self.topic_locks
            .remove_if(topic, |_, lock| Arc::strong_count(lock) == 1);
        result
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для TopicSubscriptionManager
////////////////////////////////////////////////////////////////////////////////

#[async_trait]
impl LifecycleListener for TopicSubscriptionManager {
    async fn on_lifecycle(
        &self,
        event: &LifecycleEvent,
    ) {
        match event {
            LifecycleEvent::Established { handle } => {
                self.on_established(handle).await;
            }
            LifecycleEvent::Closed { handle } => {
                self.on_closed(handle).await;
            }
        }
    }
}

impl std::fmt::Debug for TopicSubscriptionManager {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TopicSubscriptionManager")
            .field("records", &self.records.len())
            .field("leaked", &self.leaked.len())
            .field("owners", &self.owners.len())
            .field("retry", &self.retry)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
