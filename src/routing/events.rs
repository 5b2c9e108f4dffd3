use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use super::{ConnectionContext, SharedHandle};

/// Событие жизненного цикла соединения.
///
/// Класс и идентификатор берутся из неизменяемого контекста хэндла.
#[derive(Clone)]
pub enum LifecycleEvent {
    /// Соединение прошло рукопожатие и готово принимать сообщения
    Established { handle: SharedHandle },
    /// Соединение закрыто транспортом
    Closed { handle: SharedHandle },
}

/// Подписчик на события жизненного цикла.
#[async_trait]
pub trait LifecycleListener: Send + Sync + 'static {
    async fn on_lifecycle(
        &self,
        event: &LifecycleEvent,
    );
}

/// Внутрипроцессная шина событий жизненного цикла.
///
/// `publish` дожидается обработки события всеми подписчиками по очереди,
/// поэтому события одного соединения обрабатываются в порядке публикации.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn LifecycleListener>>>,
    published: AtomicU64,
}

impl LifecycleEvent {
    pub fn handle(&self) -> &SharedHandle {
        match self {
            Self::Established { handle } | Self::Closed { handle } => handle,
        }
    }

    pub fn context(&self) -> &ConnectionContext {
        self.handle().context()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Established { .. } => "established",
            Self::Closed { .. } => "closed",
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавляет подписчика.
    pub fn subscribe(
        &self,
        listener: Arc<dyn LifecycleListener>,
    ) {
        self.listeners.write().push(listener);
    }

    /// Доставляет событие всем подписчикам.
    pub async fn publish(
        &self,
        event: LifecycleEvent,
    ) {
        self.published.fetch_add(1, Ordering::Relaxed);

        // Список копируется, чтобы не держать блокировку через await.
        let listeners = self.listeners.read().clone();

        trace!(
            kind = event.kind(),
            key = %event.context().key(),
            connection_id = %event.context().id(),
            listeners = listeners.len(),
            "Publishing lifecycle event"
        );

        for listener in listeners {
            listener.on_lifecycle(&event).await;
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for LifecycleEvent {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LifecycleEvent")
            .field("kind", &self.kind())
            .field("context", self.context())
            .finish()
    }
}
