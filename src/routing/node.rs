use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info};

use super::{
    ConnectionRegistry, EventBus, InboundMessageRouter, LifecycleEvent, Publisher,
    ReconcileReport, RetryPolicy, RouterStats, SharedHandle, TopicSubscriptionManager,
};
use crate::pubsub::Broker;

/// Параметры одного инстанса маршрутизации.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    pub retry: RetryPolicy,
    /// Период сверки подписок; `None` отключает фоновую сверку
    pub reconcile_interval: Option<Duration>,
}

/// Корень композиции одного инстанса.
///
/// Связывает реестр, маршрутизатор, менеджер подписок, шину событий и клиента
/// брокера, а также владеет фоновыми задачами очистки и сверки. Должен
/// создаваться внутри runtime Tokio.
pub struct RelayNode {
    registry: Arc<ConnectionRegistry>,
    router: Arc<InboundMessageRouter>,
    manager: Arc<TopicSubscriptionManager>,
    events: Arc<EventBus>,
    broker: Arc<dyn Broker>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayNode {
    pub fn new(
        broker: Arc<dyn Broker>,
        config: NodeConfig,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let (stale_tx, stale_rx) = mpsc::unbounded_channel();
        let router = Arc::new(InboundMessageRouter::new(registry.clone(), stale_tx));
        let manager = Arc::new(TopicSubscriptionManager::new(
            registry.clone(),
            broker.clone(),
            router.clone(),
            config.retry,
        ));

        let events = Arc::new(EventBus::new());
        events.subscribe(manager.clone());

        let mut tasks = vec![manager.spawn_cleanup_task(stale_rx)];
        if let Some(period) = config.reconcile_interval {
            tasks.push(manager.spawn_reconcile_task(period));
        }

        info!(
            max_attempts = config.retry.max_attempts,
            reconcile_interval_secs = config.reconcile_interval.map(|p| p.as_secs()),
            "Relay node started"
        );

        Self {
            registry,
            router,
            manager,
            events,
            broker,
            tasks: Mutex::new(tasks),
        }
    }

    /// Публикует `Established` для соединения.
    pub async fn connect(
        &self,
        handle: SharedHandle,
    ) {
        self.events
            .publish(LifecycleEvent::Established { handle })
            .await;
    }

    /// Публикует `Closed` для соединения.
    pub async fn disconnect(
        &self,
        handle: SharedHandle,
    ) {
        self.events.publish(LifecycleEvent::Closed { handle }).await;
    }

    /// Немедленная сверка подписок.
    pub async fn reconcile(&self) -> ReconcileReport {
        self.manager.reconcile().await
    }

    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.broker.clone())
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn manager(&self) -> &Arc<TopicSubscriptionManager> {
        &self.manager
    }

    pub fn router(&self) -> &Arc<InboundMessageRouter> {
        &self.router
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn router_stats(&self) -> RouterStats {
        self.router.stats()
    }

    /// Останавливает фоновые задачи инстанса.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return;
        }
        for task in &tasks {
            task.abort();
        }
        debug!(tasks = tasks.len(), "Relay node background tasks stopped");
    }
}

impl Drop for RelayNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RelayNode {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RelayNode")
            .field("registry", &self.registry)
            .field("manager", &self.manager)
            .field("router", &self.router)
            .finish()
    }
}
