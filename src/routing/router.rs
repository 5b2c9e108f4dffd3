use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use bytes::Bytes;
use sensorlink_error::RoutingError;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{ConnectionKey, ConnectionRegistry, Generation, StaleConnection};
use crate::pubsub::MessageHandler;

/// Итог маршрутизации одного сообщения.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Сообщение передано в соединение
    Delivered,
    /// Топик или полезная нагрузка некорректны
    Malformed,
    /// Цели нет на этом инстансе
    NotFound,
    /// Хэндл найден, но уже закрыт или освобождён
    Stale,
    /// Соединение отказалось принять сообщение
    SendFailed,
}

/// Снимок счётчиков маршрутизатора.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    pub delivered: u64,
    pub malformed: u64,
    pub not_found: u64,
    pub stale: u64,
    pub send_failed: u64,
}

#[derive(Debug, Default)]
struct RouterCounters {
    delivered: AtomicU64,
    malformed: AtomicU64,
    not_found: AtomicU64,
    stale: AtomicU64,
    send_failed: AtomicU64,
}

/// Обработчик входящих сообщений брокера.
///
/// Разбирает топик обратно в ключ, находит локальное соединение и передаёт
/// ему текст. Никогда не паникует и не возвращает ошибок: всё, что нельзя
/// доставить, логируется и отбрасывается. Закрытые хэндлы не закрываются
/// здесь, а передаются задаче очистки менеджера подписок.
pub struct InboundMessageRouter {
    registry: Arc<ConnectionRegistry>,
    stale_tx: mpsc::UnboundedSender<StaleConnection>,
    counters: RouterCounters,
}

impl InboundMessageRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        stale_tx: mpsc::UnboundedSender<StaleConnection>,
    ) -> Self {
        Self {
            registry,
            stale_tx,
            counters: RouterCounters::default(),
        }
    }

    /// Маршрутизирует одно сообщение.
    pub fn route(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> RouteOutcome {
        let key = match ConnectionKey::from_topic(topic) {
            Ok(key) => key,
            Err(err) => {
                debug!(topic, error = %err, "Discarding message on malformed topic");
                return self.count(RouteOutcome::Malformed);
            }
        };

        let text = match std::str::from_utf8(payload) {
            Ok(text) => text,
            Err(_) => {
                let err = RoutingError::NonTextPayload {
                    topic: topic.to_string(),
                };
                debug!(topic, error = %err, bytes = payload.len(), "Discarding non-text payload");
                return self.count(RouteOutcome::Malformed);
            }
        };

        let Some(registration) = self.registry.entry(&key) else {
            debug!(topic, "No local connection for topic");
            return self.count(RouteOutcome::NotFound);
        };

        let handle = match registration.handle {
            Some(handle) if handle.is_open() => handle,
            _ => {
                debug!(
                    topic,
                    connection_id = %registration.connection_id,
                    generation = %registration.generation,
                    "Target connection is closed, scheduling cleanup"
                );
                self.report_stale(key, registration.generation);
                return self.count(RouteOutcome::Stale);
            }
        };

        match handle.send(text) {
            Ok(()) => {
                trace!(topic, connection_id = %registration.connection_id, "Message delivered");
                self.count(RouteOutcome::Delivered)
            }
            Err(err) => {
                warn!(
                    topic,
                    connection_id = %registration.connection_id,
                    error = %err,
                    "Failed to send message to connection"
                );
                self.count(RouteOutcome::SendFailed)
            }
        }
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            not_found: self.counters.not_found.load(Ordering::Relaxed),
            stale: self.counters.stale.load(Ordering::Relaxed),
            send_failed: self.counters.send_failed.load(Ordering::Relaxed),
        }
    }

    fn report_stale(
        &self,
        key: ConnectionKey,
        generation: Generation,
    ) {
        let notice = StaleConnection { key, generation };
        if self.stale_tx.send(notice).is_err() {
            warn!("Cleanup task is not running, stale connection left registered");
        }
    }

    fn count(
        &self,
        outcome: RouteOutcome,
    ) -> RouteOutcome {
        let counter = match outcome {
            RouteOutcome::Delivered => &self.counters.delivered,
            RouteOutcome::Malformed => &self.counters.malformed,
            RouteOutcome::NotFound => &self.counters.not_found,
            RouteOutcome::Stale => &self.counters.stale,
            RouteOutcome::SendFailed => &self.counters.send_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        outcome
    }
}

impl MessageHandler for InboundMessageRouter {
    fn on_message(
        &self,
        topic: &str,
        payload: Bytes,
    ) {
        self.route(topic, &payload);
    }
}

impl std::fmt::Debug for InboundMessageRouter {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("InboundMessageRouter")
            .field("stats", &self.stats())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
