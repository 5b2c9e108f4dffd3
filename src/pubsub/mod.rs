//! Подсистема Publish–Subscribe.
//!
//! Слой маршрутизации работает с брокером только через трейт [`Broker`]:
//!
//! - `broker`: трейты брокера и обработчика доставки.
//! - `memory`: внутрипроцессная шина [`InMemoryBus`] и её клиенты
//!   [`BusClient`], по одному на инстанс.
//! - `message`: сообщение, доставляемое через шину.

pub mod broker;
pub mod memory;
pub mod message;

// Публичный экспорт всех типов из вложенных модулей, чтобы упростить доступ
// к ним из внешнего кода.
pub use broker::*;
pub use memory::*;
pub use message::*;
