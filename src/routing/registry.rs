use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use dashmap::{mapref::entry::Entry, DashMap};
use tracing::{debug, trace};

use super::{ConnectionClass, ConnectionHandle, ConnectionId, ConnectionKey, Generation, SharedHandle};

/// Запись реестра: слабая ссылка на хэндл и поколение регистрации.
struct RegistryEntry {
    handle: Weak<dyn ConnectionHandle>,
    generation: Generation,
    connection_id: ConnectionId,
}

/// Снимок записи реестра для одного ключа.
///
/// `handle` равен `None`, если транспорт уже освободил соединение, но запись
/// ещё не удалена.
#[derive(Clone)]
pub struct Registration {
    pub handle: Option<SharedHandle>,
    pub generation: Generation,
    pub connection_id: ConnectionId,
}

/// Локальная таблица живых соединений инстанса.
///
/// Отображает `(класс, идентификатор)` на единственный живой хэндл. Основана на
/// шардированной `DashMap`: блокировка берётся на шард, глобальной блокировки
/// нет. Новая регистрация ключа вытесняет старую (побеждает последнее
/// подключение), вытесненный хэндл реестр не закрывает.
pub struct ConnectionRegistry {
    entries: DashMap<ConnectionKey, RegistryEntry>,
    generations: AtomicU64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            generations: AtomicU64::new(0),
        }
    }

    /// Регистрирует хэндл под ключом и возвращает новое поколение.
    ///
    /// Поколение выделяется под блокировкой шарда, поэтому порядок поколений
    /// одного ключа совпадает с порядком вставок.
    pub fn register(
        &self,
        key: ConnectionKey,
        handle: &SharedHandle,
    ) -> Generation {
        let connection_id = handle.context().id();
        let weak = Arc::downgrade(handle);

        match self.entries.entry(key) {
            Entry::Occupied(mut slot) => {
                let generation = self.next_generation();
                let previous = slot.insert(RegistryEntry {
                    handle: weak,
                    generation,
                    connection_id,
                });
                debug!(
                    key = %slot.key(),
                    connection_id = %connection_id,
                    generation = %generation,
                    superseded_connection = %previous.connection_id,
                    superseded_generation = %previous.generation,
                    "Registration superseded"
                );
                generation
            }
            Entry::Vacant(slot) => {
                let generation = self.next_generation();
                trace!(
                    key = %slot.key(),
                    connection_id = %connection_id,
                    generation = %generation,
                    "Connection registered"
                );
                slot.insert(RegistryEntry {
                    handle: weak,
                    generation,
                    connection_id,
                });
                generation
            }
        }
    }

    /// Удаляет запись, только если её поколение совпадает с переданным.
    ///
    /// Возвращает `true`, если запись была удалена.
    pub fn unregister(
        &self,
        key: &ConnectionKey,
        generation: Generation,
    ) -> bool {
        let removed = self
            .entries
            .remove_if(key, |_, entry| entry.generation == generation)
            .is_some();

        trace!(key = %key, generation = %generation, removed, "Unregister requested");
        removed
    }

    /// Возвращает живой хэндл для ключа.
    ///
    /// Хэндл, уже освобождённый транспортом, считается отсутствующим.
    pub fn lookup(
        &self,
        key: &ConnectionKey,
    ) -> Option<SharedHandle> {
        self.entries.get(key).and_then(|entry| entry.handle.upgrade())
    }

    /// Возвращает снимок записи вместе с поколением.
    pub fn entry(
        &self,
        key: &ConnectionKey,
    ) -> Option<Registration> {
        self.entries.get(key).map(|entry| Registration {
            handle: entry.handle.upgrade(),
            generation: entry.generation,
            connection_id: entry.connection_id,
        })
    }

    /// Текущее поколение ключа, если он зарегистрирован.
    pub fn current_generation(
        &self,
        key: &ConnectionKey,
    ) -> Option<Generation> {
        self.entries.get(key).map(|entry| entry.generation)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Количество зарегистрированных ключей данного класса.
    pub fn count_by_class(
        &self,
        class: ConnectionClass,
    ) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.key().class() == class)
            .count()
    }

    /// Снимок всех зарегистрированных ключей.
    pub fn keys(&self) -> Vec<ConnectionKey> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    fn next_generation(&self) -> Generation {
        Generation::from_raw(self.generations.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для ConnectionRegistry
////////////////////////////////////////////////////////////////////////////////

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("entries", &self.entries.len())
            .field("generations", &self.generations.load(Ordering::Relaxed))
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
