use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::StoreError;
use crate::types::Batch;

pub type StoreResult = Result<(), StoreError>;

// ════════════════════════════════════════════════════════════════
//  Store — общий контракт узла пайплайна
// ════════════════════════════════════════════════════════════════

/// Узел дерева доставки сообщений.
///
/// Дерево строится из конфигурации на старте: каждый узел владеет своими
/// детьми как boxed trait-объектами, дерево строго ацикличное. Воркер
/// категории владеет корнем эксклюзивно, поэтому все методы принимают
/// `&mut self` и могут блокироваться на диске или сети.
///
/// Контракт `handle_messages`: после успешного вызова batch пуст; после
/// неуспешного — batch содержит ровно те записи, которые НЕ были приняты,
/// чтобы вызывающий мог повторить или отбуферизовать их.
pub trait Store: Send {
    /// Тип узла, для логов и статуса ("file", "buffer", ...).
    fn kind(&self) -> &'static str;

    /// Категория, которую обслуживает узел.
    fn category(&self) -> &str;

    /// Захватить ресурсы (файл, соединение). Можно звать повторно;
    /// неуспех — нормальный транзиентный исход, не паника.
    fn open(&mut self) -> StoreResult;

    fn is_open(&self) -> bool;

    /// Освободить ресурсы. После close() `is_open` возвращает false.
    fn close(&mut self);

    /// Попытаться надёжно принять batch. См. контракт в доке трейта.
    fn handle_messages(&mut self, batch: &mut Batch) -> StoreResult;

    /// Фоновая работа по таймеру (~1с): ротация, переподключение,
    /// слив буфера. `now_ms` приходит от воркера (инжектируемые часы).
    fn periodic_check(&mut self, now_ms: i64) {
        let _ = now_ms;
    }

    /// Синхронно протолкнуть данные из памяти к назначению.
    fn flush(&mut self);

    /// Сконфигурированный (но не открытый) клон для другой категории.
    /// Используется category-store'ом для создания детей из модели.
    fn copy(&self, category: &str) -> Result<Box<dyn Store>, StoreError>;

    /// Последнее непустое статусное сообщение узла (или его детей).
    fn status(&self) -> String;

    // ── Read side — только для readable-узлов (буферные store'ы) ──
    //
    // "Oldest" — наименее свежая единица ротации (один файл буфера).
    // read и delete разделены, чтобы вызывающий гейтил удаление на
    // успешную пересылку; replace_oldest перезаписывает единицу
    // непересланным хвостом при частичном успехе.

    fn read_oldest(&mut self, out: &mut Batch, now_ms: i64) -> StoreResult {
        let _ = (out, now_ms);
        Err(StoreError::internal(format!(
            "store type '{}' is not readable",
            self.kind()
        )))
    }

    fn replace_oldest(&mut self, batch: &mut Batch, now_ms: i64) -> StoreResult {
        let _ = (batch, now_ms);
        Err(StoreError::internal(format!(
            "store type '{}' is not readable",
            self.kind()
        )))
    }

    fn delete_oldest(&mut self, now_ms: i64) -> StoreResult {
        let _ = now_ms;
        Err(StoreError::internal(format!(
            "store type '{}' is not readable",
            self.kind()
        )))
    }

    /// Пуст ли буфер на момент `now_ms`. Для не-readable узлов — true.
    fn empty(&self, now_ms: i64) -> bool {
        let _ = now_ms;
        true
    }
}

// ════════════════════════════════════════════════════════════════
//  StatusSlot
// ════════════════════════════════════════════════════════════════

/// Статус узла: write-mostly атомарный слот.
///
/// Писатель (воркер) публикует новое сообщение целиком; читатели
/// (status API) никогда не блокируют писателя. Пустая строка — "ошибок
/// нет".
#[derive(Clone)]
pub struct StatusSlot(Arc<ArcSwap<String>>);

impl StatusSlot {
    pub fn new() -> Self {
        Self(Arc::new(ArcSwap::from_pointee(String::new())))
    }

    pub fn set(&self, msg: impl Into<String>) {
        self.0.store(Arc::new(msg.into()));
    }

    pub fn clear(&self) {
        self.0.store(Arc::new(String::new()));
    }

    pub fn get(&self) -> String {
        self.0.load().as_str().to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.0.load().is_empty()
    }
}

impl Default for StatusSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_slot_last_write_wins() {
        let slot = StatusSlot::new();
        assert!(slot.is_empty());
        slot.set("disk full");
        slot.set("reconnected");
        assert_eq!(slot.get(), "reconnected");
        slot.clear();
        assert!(slot.is_empty());
    }

    #[test]
    fn status_slot_shared_across_clones() {
        let a = StatusSlot::new();
        let b = a.clone();
        a.set("from a");
        assert_eq!(b.get(), "from a");
    }
}
