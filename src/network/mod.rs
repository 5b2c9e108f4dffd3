//! Эталонный TCP-транспорт.
//!
//! Транспорт определяет идентичность клиента при рукопожатии, владеет
//! хэндлами соединений и публикует события жизненного цикла в узел
//! маршрутизации.
//!
//! ## Подмодули
//!
//! - `channel_handle`: хэндл соединения поверх ограниченного канала.
//! - `protocol`: построчный протокол (рукопожатие, команды, ответы).
//! - `connection`: управление соединениями, таймауты и graceful shutdown.
//! - `server`: цикл приёма TCP-соединений.

pub mod channel_handle;
pub mod connection;
pub mod protocol;
pub mod server;

// Публичный экспорт всех типов из вложенных модулей, чтобы упростить доступ
// к ним из внешнего кода.
pub use channel_handle::*;
pub use connection::*;
pub use protocol::*;
pub use server::*;
