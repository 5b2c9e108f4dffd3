use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use sensorlink_error::RoutingError;

/// Префикс топиков пользовательских соединений.
pub const USER_TOPIC_PREFIX: &str = "user.";
/// Префикс топиков соединений устройств.
pub const DEVICE_TOPIC_PREFIX: &str = "device.";

/// Глобальный счётчик физических соединений.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Класс соединения: два непересекающихся пространства идентификаторов.
///
/// Пользователь `42` и устройство `42` являются разными целями.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectionClass {
    User,
    Device,
}

/// Ключ маршрутизации: класс + непустой идентификатор.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    class: ConnectionClass,
    identifier: Arc<str>,
}

/// Уникальный идентификатор одного физического соединения.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

/// Номер регистрации ключа в реестре.
///
/// Выдаётся из одного счётчика на весь реестр, поэтому для одного ключа
/// поколения строго растут в порядке регистраций и никогда не переиспользуются.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

/// Неизменяемая идентичность соединения, определённая при рукопожатии.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    id: ConnectionId,
    key: ConnectionKey,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ConnectionClass {
    /// Все классы соединений в порядке объявления.
    pub const ALL: [ConnectionClass; 2] = [ConnectionClass::User, ConnectionClass::Device];

    /// Префикс топика для данного класса.
    pub const fn topic_prefix(self) -> &'static str {
        match self {
            Self::User => USER_TOPIC_PREFIX,
            Self::Device => DEVICE_TOPIC_PREFIX,
        }
    }

    /// Имя класса в рукопожатии и логах: `user` или `device`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Device => "device",
        }
    }
}

impl ConnectionKey {
    /// Создаёт ключ, отвергая пустой идентификатор.
    pub fn new(
        class: ConnectionClass,
        identifier: impl Into<Arc<str>>,
    ) -> Result<Self, RoutingError> {
        let identifier = identifier.into();
        if identifier.is_empty() {
            return Err(RoutingError::EmptyIdentifier {
                topic: class.topic_prefix().to_string(),
            });
        }
        Ok(Self { class, identifier })
    }

    /// Ключ пользовательского соединения.
    ///
    /// # Пример
    ///
    /// ```
    /// use sensorlink::{ConnectionClass, ConnectionKey};
    ///
    /// let key = ConnectionKey::user("alice").unwrap();
    /// assert_eq!(key.class(), ConnectionClass::User);
    /// assert_eq!(key.identifier(), "alice");
    /// assert_eq!(key.topic(), "user.alice");
    /// assert!(ConnectionKey::user("").is_err());
    /// ```
    pub fn user(username: impl Into<Arc<str>>) -> Result<Self, RoutingError> {
        Self::new(ConnectionClass::User, username)
    }

    /// Ключ соединения устройства.
    pub fn device(identifier: impl Into<Arc<str>>) -> Result<Self, RoutingError> {
        Self::new(ConnectionClass::Device, identifier)
    }

    /// Разбирает имя топика обратно в ключ.
    ///
    /// Всё, что идёт после префикса, является идентификатором (включая точки).
    pub fn from_topic(topic: &str) -> Result<Self, RoutingError> {
        let (class, identifier) = if let Some(rest) = topic.strip_prefix(USER_TOPIC_PREFIX) {
            (ConnectionClass::User, rest)
        } else if let Some(rest) = topic.strip_prefix(DEVICE_TOPIC_PREFIX) {
            (ConnectionClass::Device, rest)
        } else {
            return Err(RoutingError::UnknownPrefix {
                topic: topic.to_string(),
            });
        };

        if identifier.is_empty() {
            return Err(RoutingError::EmptyIdentifier {
                topic: topic.to_string(),
            });
        }

        Ok(Self {
            class,
            identifier: Arc::from(identifier),
        })
    }

    /// Каноническое имя топика брокера для ключа.
    pub fn topic(&self) -> String {
        let prefix = self.class.topic_prefix();
        let mut topic = String::with_capacity(prefix.len() + self.identifier.len());
        topic.push_str(prefix);
        topic.push_str(&self.identifier);
        topic
    }

    /// Класс ключа.
    pub fn class(&self) -> ConnectionClass {
        self.class
    }

    /// Идентификатор без префикса топика.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl ConnectionId {
    /// Выделяет следующий идентификатор из глобального счётчика.
    pub fn next() -> Self {
        Self(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Восстанавливает идентификатор из числа, например из лога.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Числовое значение идентификатора.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl Generation {
    /// Создаёт поколение из числа. Реестр выдаёт поколения сам, вручную они
    /// нужны только для сравнения и тестов.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Числовое значение поколения.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl ConnectionContext {
    /// Фиксирует идентичность соединения после рукопожатия.
    pub fn new(
        id: ConnectionId,
        key: ConnectionKey,
    ) -> Self {
        Self { id, key }
    }

    /// Идентификатор физического соединения.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Ключ маршрутизации соединения.
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Класс соединения, сокращение для `key().class()`.
    pub fn class(&self) -> ConnectionClass {
        self.key.class
    }

    /// Идентификатор пользователя или устройства.
    pub fn identifier(&self) -> &str {
        self.key.identifier()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl FromStr for ConnectionClass {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("user") {
            Ok(Self::User)
        } else if s.eq_ignore_ascii_case("device") {
            Ok(Self::Device)
        } else {
            Err(RoutingError::UnknownClass {
                value: s.to_string(),
            })
        }
    }
}

impl fmt::Display for ConnectionClass {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}{}", self.class.topic_prefix(), self.identifier)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Generation {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет формирование топиков для обоих классов.
    #[test]
    fn test_topic_naming() {
        assert_eq!(ConnectionKey::user("alice").unwrap().topic(), "user.alice");
        assert_eq!(ConnectionKey::device("42").unwrap().topic(), "device.42");
    }

    /// Тест проверяет разбор топика с точками в идентификаторе.
    #[test]
    fn test_from_topic_keeps_dots_in_identifier() {
        let key = ConnectionKey::from_topic("device.greenhouse.7").unwrap();
        assert_eq!(key.class(), ConnectionClass::Device);
        assert_eq!(key.identifier(), "greenhouse.7");
    }

    /// Тест проверяет отказ на неизвестный префикс и пустой идентификатор.
    #[test]
    fn test_from_topic_rejects_malformed() {
        assert!(matches!(
            ConnectionKey::from_topic("foo.bar"),
            Err(RoutingError::UnknownPrefix { .. })
        ));
        assert!(matches!(
            ConnectionKey::from_topic("user."),
            Err(RoutingError::EmptyIdentifier { .. })
        ));
        assert!(matches!(
            ConnectionKey::from_topic("user"),
            Err(RoutingError::UnknownPrefix { .. })
        ));
        assert!(ConnectionKey::user("").is_err());
    }

    /// Тест проверяет, что пользователь и устройство с одним идентификатором
    /// являются разными ключами.
    #[test]
    fn test_namespaces_are_disjoint() {
        let user = ConnectionKey::user("42").unwrap();
        let device = ConnectionKey::device("42").unwrap();
        assert_ne!(user, device);
        assert_ne!(user.topic(), device.topic());
    }

    /// Тест проверяет разбор класса без учёта регистра.
    #[test]
    fn test_class_from_str() {
        assert_eq!("USER".parse::<ConnectionClass>().unwrap(), ConnectionClass::User);
        assert_eq!("Device".parse::<ConnectionClass>().unwrap(), ConnectionClass::Device);
        assert!("robot".parse::<ConnectionClass>().is_err());
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert!(b > a);
    }
}
