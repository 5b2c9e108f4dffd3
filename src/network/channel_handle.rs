use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use bytes::Bytes;
use sensorlink_error::SendError;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Notify,
};

use crate::routing::{ConnectionContext, ConnectionHandle};

/// Хэндл соединения поверх ограниченного `mpsc`-канала.
///
/// Маршрутизатор кладёт сообщения в канал без блокировки, а задача
/// соединения вычитывает их и пишет в сокет. При переполнении канала
/// сообщение отбрасывается и учитывается в `dropped_messages`.
pub struct ChannelHandle {
    context: ConnectionContext,
    tx: mpsc::Sender<Bytes>,
    open: AtomicBool,
    close_signal: Notify,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl ChannelHandle {
    /// Создаёт хэндл и приёмник его исходящих сообщений.
    pub fn new(
        context: ConnectionContext,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Arc::new(Self {
            context,
            tx,
            open: AtomicBool::new(true),
            close_signal: Notify::new(),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        (handle, rx)
    }

    /// Ждёт вызова [`ConnectionHandle::close`].
    pub async fn closed(&self) {
        if !self.open.load(Ordering::Acquire) {
            return;
        }
        self.close_signal.notified().await;
    }

    pub fn sent_messages(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ConnectionHandle for ChannelHandle {
    fn context(&self) -> &ConnectionContext {
        &self.context
    }

    fn send(
        &self,
        text: &str,
    ) -> Result<(), SendError> {
        let connection_id = self.context.id().as_u64();
        if !self.open.load(Ordering::Acquire) {
            return Err(SendError::Closed { connection_id });
        }

        match self.tx.try_send(Bytes::copy_from_slice(text.as_bytes())) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(SendError::BufferFull { connection_id })
            }
            Err(TrySendError::Closed(_)) => {
                self.open.store(false, Ordering::Release);
                Err(SendError::Closed { connection_id })
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            // notify_one сохраняет разрешение, если ожидающего ещё нет.
            self.close_signal.notify_one();
        }
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("context", &self.context)
            .field("open", &self.open.load(Ordering::Relaxed))
            .field("sent", &self.sent_messages())
            .field("dropped", &self.dropped_messages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::routing::{ConnectionId, ConnectionKey};

    fn handle(capacity: usize) -> (Arc<ChannelHandle>, mpsc::Receiver<Bytes>) {
        let context = ConnectionContext::new(ConnectionId::next(), ConnectionKey::user("alice").unwrap());
        ChannelHandle::new(context, capacity)
    }

    #[test]
    fn test_send_and_receive() {
        let (h, mut rx) = handle(2);
        h.send("hello").unwrap();
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(h.sent_messages(), 1);
    }

    /// Тест проверяет, что переполнение буфера не блокирует отправителя.
    #[test]
    fn test_full_buffer_drops() {
        let (h, _rx) = handle(1);
        h.send("a").unwrap();
        assert!(matches!(h.send("b"), Err(SendError::BufferFull { .. })));
        assert_eq!(h.dropped_messages(), 1);
        assert!(h.is_open());
    }

    /// Тест проверяет, что после закрытия отправка отвергается.
    #[test]
    fn test_close_rejects_send() {
        let (h, _rx) = handle(1);
        h.close();
        h.close();
        assert!(!h.is_open());
        assert!(matches!(h.send("a"), Err(SendError::Closed { .. })));
    }

    /// Тест проверяет, что уход приёмника делает хэндл закрытым.
    #[test]
    fn test_dropped_receiver_closes_handle() {
        let (h, rx) = handle(1);
        drop(rx);
        assert!(!h.is_open());
        assert!(matches!(h.send("a"), Err(SendError::Closed { .. })));
    }

    /// Тест проверяет, что `closed()` завершается и при закрытии до ожидания.
    #[tokio::test]
    async fn test_closed_resolves() {
        let (h, _rx) = handle(1);
        let waiter = {
            let h = h.clone();
            tokio::spawn(async move { h.closed().await })
        };
        h.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), h.closed())
            .await
            .unwrap();
    }
}
