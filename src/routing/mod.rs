//! Слой маршрутизации сообщений к пользователям и устройствам.
//!
//! Соединение живёт ровно на одном инстансе, поэтому доставка идёт через общий
//! брокер: каждый инстанс подписан на топики своих локальных соединений.
//!
//! ## Подмодули
//!
//! - `types`: классы, ключи, поколения и контекст соединения.
//! - `handle`: трейт хэндла живого соединения.
//! - `registry`: локальный реестр `ключ → хэндл`.
//! - `events`: события жизненного цикла и шина событий.
//! - `retry`: политика повторов операций с брокером.
//! - `manager`: менеджер подписок на топики.
//! - `router`: обработчик входящих сообщений брокера.
//! - `publisher`: публикация сообщений по ключу цели.
//! - `node`: корень композиции одного инстанса.

pub mod events;
pub mod handle;
pub mod manager;
pub mod node;
pub mod publisher;
pub mod registry;
pub mod retry;
pub mod router;
pub mod types;

// Публичный экспорт всех типов из вложенных модулей, чтобы упростить доступ
// к ним из внешнего кода.
pub use events::*;
pub use handle::*;
pub use manager::*;
pub use node::*;
pub use publisher::*;
pub use registry::*;
pub use retry::*;
pub use router::*;
pub use types::*;
