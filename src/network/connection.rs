use std::{
    io::ErrorKind,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use sensorlink_error::{ErrorExt, HandshakeError};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    select,
    sync::{mpsc, watch, Semaphore},
    time::{sleep_until, timeout, Instant},
};
use tracing::{debug, error, info, trace, warn};

use super::{parse_hello, ChannelHandle, Command, Reply};
use crate::routing::{
    ConnectionContext, ConnectionHandle, ConnectionId, ConnectionKey, RelayNode, SharedHandle,
};

/// Конфигурация для обработки соединений
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Максимальное кол-во одновременных соединений
    pub max_connections: usize,
    /// Ёмкость исходящего буфера каждого соединения (сообщений)
    pub outbound_buffer: usize,
    /// Таймаут ожидания строки приветствия
    pub handshake_timeout: Duration,
    /// Таймаут записи в сокет
    pub write_timeout: Duration,
    /// Таймаут простоя: соединение без входящих строк закрывается
    pub idle_timeout: Duration,
    /// Размер буфера для чтения
    pub read_buffer_size: usize,
}

/// Менеджер соединений с ограничением числа клиентов и graceful shutdown
#[derive(Debug)]
pub struct ConnectionManager {
    config: ConnectionConfig,
    node: Arc<RelayNode>,
    /// Семафор общего лимита соединений
    connection_semaphore: Arc<Semaphore>,
    /// Общий счётчик активных соединений
    active_connections: Arc<AtomicUsize>,
    /// Соединения, отклонённые из-за лимита
    rejected_connections: AtomicU64,
    /// Сигнал для graceful shutdown
    shutdown_signal: watch::Sender<bool>,
}

/// Обработчик отдельного соединения
struct ConnectionHandler {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    addr: SocketAddr,
    node: Arc<RelayNode>,
    config: ConnectionConfig,
    shutdown_signal: watch::Receiver<bool>,
}

/// Причина завершения цикла соединения.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Quit,
    ClientClosed,
    ClosedByServer,
    IdleTimeout,
    Shutdown,
    WriteFailed,
    ReadFailed,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        node: Arc<RelayNode>,
    ) -> Self {
        Self {
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            config,
            node,
            active_connections: Arc::new(AtomicUsize::new(0)),
            rejected_connections: AtomicU64::new(0),
            shutdown_signal: watch::Sender::new(false),
        }
    }

    /// Текущее кол-во активных соединений
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn rejected_connections(&self) -> u64 {
        self.rejected_connections.load(Ordering::Relaxed)
    }

    pub fn node(&self) -> &Arc<RelayNode> {
        &self.node
    }

    /// Инициализация graceful shutdown
    pub fn shutdown(&self) {
        info!(
            active = self.active_connections(),
            "Initiating graceful shutdown for connection manager"
        );
        self.shutdown_signal.send_replace(true);
    }

    /// Ждать завершения всех активных соединений
    pub async fn wait_for_shutdown(
        &self,
        timeout_duration: Duration,
    ) -> Result<()> {
        let start = Instant::now();

        while self.active_connections() > 0 {
            if start.elapsed() > timeout_duration {
                warn!(
                    active = self.active_connections(),
                    "Shutdown timeout reached with active connections"
                );
                return Err(anyhow!("Shutdown timeout exceeded"));
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        info!("All connections closed gracefully");
        Ok(())
    }

    /// Обрабатывает новое соединение до его закрытия.
    pub async fn handle_connection(
        &self,
        mut socket: TcpStream,
        addr: SocketAddr,
    ) -> Result<()> {
        let Ok(_permit) = self.connection_semaphore.clone().try_acquire_owned() else {
            self.rejected_connections.fetch_add(1, Ordering::Relaxed);
            warn!(%addr, max = self.config.max_connections, "Maximum connections limit reached");
            let reply = Reply::Error("too many connections".into()).encode();
            let _ = timeout(self.config.write_timeout, socket.write_all(reply.as_bytes())).await;
            return Ok(());
        };

        let active = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(%addr, active, "TCP connection accepted");

        let handler = ConnectionHandler::new(
            socket,
            addr,
            self.node.clone(),
            self.config.clone(),
            self.shutdown_signal.subscribe(),
        );
        let result = handler.run().await;

        let remaining = self.active_connections.fetch_sub(1, Ordering::Relaxed) - 1;
        match &result {
            Ok(()) => debug!(%addr, remaining, "TCP connection finished"),
            Err(e) => error!(%addr, remaining, error = %e, "TCP connection finished with error"),
        }

        result
    }
}

impl ConnectionHandler {
    fn new(
        socket: TcpStream,
        addr: SocketAddr,
        node: Arc<RelayNode>,
        config: ConnectionConfig,
        shutdown_signal: watch::Receiver<bool>,
    ) -> Self {
        // Разделяем socket на части для чтения и записи
        let (read_half, write_half) = socket.into_split();
        let reader = BufReader::with_capacity(config.read_buffer_size, read_half);

        Self {
            lines: reader.lines(),
            writer: write_half,
            addr,
            node,
            config,
            shutdown_signal,
        }
    }

    /// Рукопожатие, регистрация и основной цикл соединения.
    async fn run(mut self) -> Result<()> {
        let key = match self.handshake().await {
            Ok(key) => key,
            Err(err) => {
                info!(addr = %self.addr, error = %err, "Handshake rejected");
                if !matches!(err, HandshakeError::Eof) {
                    let reply = Reply::Error(err.client_message()).encode();
                    let _ = self.write(reply.as_bytes()).await;
                }
                return self.graceful_close().await;
            }
        };

        let context = ConnectionContext::new(ConnectionId::next(), key);
        let connection_id = context.id();
        let (handle, outbound) = ChannelHandle::new(context, self.config.outbound_buffer);
        let shared: SharedHandle = handle.clone();

        self.node.connect(shared.clone()).await;
        info!(
            addr = %self.addr,
            connection_id = %connection_id,
            key = %handle.context().key(),
            "Connection identified"
        );

        let reason = match self.write(Reply::Ok.encode().as_bytes()).await {
            Ok(()) => self.serve(&handle, outbound).await,
            Err(_) => CloseReason::WriteFailed,
        };

        handle.close();
        self.node.disconnect(shared).await;

        debug!(
            addr = %self.addr,
            connection_id = %connection_id,
            ?reason,
            sent = handle.sent_messages(),
            dropped = handle.dropped_messages(),
            "Connection closed"
        );

        self.graceful_close().await
    }

    async fn handshake(&mut self) -> Result<ConnectionKey, HandshakeError> {
        let line = match timeout(self.config.handshake_timeout, self.lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => return Err(HandshakeError::Eof),
            Ok(Err(e)) => {
                return Err(HandshakeError::Malformed {
                    line: e.to_string(),
                })
            }
            Err(_) => return Err(HandshakeError::Timeout),
        };

        trace!(addr = %self.addr, line = line.trim(), "Handshake line received");
        parse_hello(&line)
    }

    /// Основной цикл: команды клиента и исходящие сообщения.
    async fn serve(
        &mut self,
        handle: &ChannelHandle,
        mut outbound: mpsc::Receiver<Bytes>,
    ) -> CloseReason {
        let connection_id = handle.context().id();
        let mut idle_deadline = Instant::now() + self.config.idle_timeout;

        if *self.shutdown_signal.borrow() {
            return CloseReason::Shutdown;
        }

        loop {
            select! {
                _ = self.shutdown_signal.changed() => {
                    let _ = self.write(Reply::Error("server shutting down".into()).encode().as_bytes()).await;
                    return CloseReason::Shutdown;
                }

                _ = handle.closed() => return CloseReason::ClosedByServer,

                _ = sleep_until(idle_deadline) => {
                    warn!(addr = %self.addr, connection_id = %connection_id, "Idle timeout");
                    let _ = self.write(Reply::Error("idle timeout".into()).encode().as_bytes()).await;
                    return CloseReason::IdleTimeout;
                }

                message = outbound.recv() => {
                    let Some(payload) = message else {
                        return CloseReason::ClosedByServer;
                    };
                    let mut frame = Vec::with_capacity(payload.len() + 1);
                    frame.extend_from_slice(&payload);
                    frame.push(b'\n');
                    if let Err(e) = self.write(&frame).await {
                        warn!(addr = %self.addr, connection_id = %connection_id, error = %e, "Failed to write routed message");
                        return CloseReason::WriteFailed;
                    }
                }

                line = self.lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            idle_deadline = Instant::now() + self.config.idle_timeout;
                            trace!(addr = %self.addr, connection_id = %connection_id, line = line.trim(), "Command received");

                            let (reply, quit) = self.execute(&line).await;
                            if let Err(e) = self.write(reply.encode().as_bytes()).await {
                                warn!(addr = %self.addr, connection_id = %connection_id, error = %e, "Failed to send reply");
                                return CloseReason::WriteFailed;
                            }
                            if quit {
                                return CloseReason::Quit;
                            }
                        }
                        Ok(None) => return CloseReason::ClientClosed,
                        Err(e) if e.kind() == ErrorKind::InvalidData => {
                            warn!(addr = %self.addr, connection_id = %connection_id, "Ignoring invalid UTF-8 from client");
                        }
                        Err(e) => {
                            if Self::is_recoverable_error(&e) {
                                debug!(addr = %self.addr, connection_id = %connection_id, error = %e, "Connection dropped by peer");
                            } else {
                                error!(addr = %self.addr, connection_id = %connection_id, error = %e, "Fatal read error");
                            }
                            return CloseReason::ReadFailed;
                        }
                    }
                }
            }
        }
    }

    /// Выполняет команду и возвращает ответ и признак завершения.
    async fn execute(
        &self,
        line: &str,
    ) -> (Reply, bool) {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(err) => return (Reply::Error(err.client_message()), false),
        };

        match command {
            Command::Ping => (Reply::Pong, false),
            Command::Quit => (Reply::Ok, true),
            Command::Publish { topic, payload } => {
                match self.node.publisher().send_to_topic(&topic, &payload).await {
                    Ok(()) => (Reply::Ok, false),
                    Err(err) => {
                        warn!(addr = %self.addr, topic = %topic, error = %err, "Publish failed");
                        (Reply::Error(err.client_message()), false)
                    }
                }
            }
        }
    }

    /// Пишет байты с таймаутом.
    async fn write(
        &mut self,
        bytes: &[u8],
    ) -> Result<()> {
        timeout(self.config.write_timeout, self.writer.write_all(bytes))
            .await
            .context("Write timeout")?
            .context("Failed to write to socket")?;

        Ok(())
    }

    /// Проверяет, является ли ошибка штатным обрывом соединения
    fn is_recoverable_error(error: &std::io::Error) -> bool {
        matches!(
            error.kind(),
            ErrorKind::UnexpectedEof
                | ErrorKind::BrokenPipe
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::TimedOut
        )
    }

    /// Graceful закрытие соединения
    async fn graceful_close(mut self) -> Result<()> {
        if let Err(e) = self.writer.shutdown().await {
            // Игнорируем ошибки при закрытии уже закрытого соединения
            if e.kind() != ErrorKind::NotConnected {
                debug!(addr = %self.addr, error = %e, "Error during socket shutdown");
            }
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            outbound_buffer: 256,
            handshake_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            read_buffer_size: 8192,
        }
    }
}
