use rand::Rng;

use barge_api::{Batch, StatusSlot, Store, StoreError, StoreResult};

use crate::config::BufferStoreConfig;
use crate::{StoreContext, build_store_inner};

// ════════════════════════════════════════════════════════════════
//  BufferStore — state machine восстановления
// ════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BufferState {
    /// Подключены к primary, пишем напрямую.
    Streaming,
    /// Primary недоступен, пишем в secondary.
    Disconnected,
    /// Primary вернулся, сливаем накопленный secondary.
    SendingBuffer,
}

impl BufferState {
    fn as_str(self) -> &'static str {
        match self {
            BufferState::Streaming => "STREAMING",
            BufferState::Disconnected => "DISCONNECTED",
            BufferState::SendingBuffer => "SENDING_BUFFER",
        }
    }
}

/// Буферизующий store: primary (куда хотим доставить) + readable
/// secondary (дисковый fallback).
///
/// Инварианты:
/// - не больше одного перехода за periodic_check, кроме атомарного
///   STREAMING → DISCONNECTED + запись в secondary внутри одного
///   handle_messages;
/// - в SENDING_BUFFER новые сообщения идут в secondary, не в primary —
///   иначе они обогнали бы уже отбуферизованные;
/// - retry_interval пересэмплируется на каждую попытку, чтобы парк
///   buffer-store'ов не стучался в peer синхронно.
pub struct BufferStore {
    cfg: BufferStoreConfig,
    category: String,
    multi_category: bool,
    ctx: StoreContext,
    status: StatusSlot,

    state: BufferState,
    primary: Box<dyn Store>,
    secondary: Box<dyn Store>,
    last_write_time_ms: i64,
    last_open_attempt_ms: i64,
    retry_interval_ms: i64,
}

impl BufferStore {
    pub(crate) fn new(
        cfg: BufferStoreConfig,
        category: &str,
        multi_category: bool,
        ctx: &StoreContext,
    ) -> Result<Self, StoreError> {
        let primary = build_store_inner(&cfg.primary, category, ctx, multi_category, false)?;
        let secondary = build_store_inner(&cfg.secondary, category, ctx, multi_category, true)?;
        let mut store = Self {
            cfg,
            category: category.to_string(),
            multi_category,
            ctx: ctx.clone(),
            status: StatusSlot::new(),
            state: BufferState::Disconnected,
            primary,
            secondary,
            last_write_time_ms: 0,
            last_open_attempt_ms: 0,
            retry_interval_ms: 0,
        };
        store.retry_interval_ms = store.new_retry_interval();
        Ok(store)
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        cfg: BufferStoreConfig,
        category: &str,
        ctx: &StoreContext,
        primary: Box<dyn Store>,
        secondary: Box<dyn Store>,
    ) -> Self {
        let mut store = Self {
            cfg,
            category: category.to_string(),
            multi_category: false,
            ctx: ctx.clone(),
            status: StatusSlot::new(),
            state: BufferState::Disconnected,
            primary,
            secondary,
            last_write_time_ms: 0,
            last_open_attempt_ms: 0,
            retry_interval_ms: 0,
        };
        store.retry_interval_ms = store.new_retry_interval();
        store
    }

    fn new_retry_interval(&self) -> i64 {
        let avg = (self.cfg.retry_interval * 1000) as i64;
        let range = (self.cfg.retry_interval_range * 1000) as i64;
        if range == 0 {
            return avg;
        }
        let sampled = avg - range / 2 + rand::rng().random_range(0..range);
        sampled.max(0)
    }

    fn change_state(&mut self, new_state: BufferState) {
        if new_state == self.state {
            return;
        }
        tracing::info!(
            category = %self.category,
            from = self.state.as_str(),
            to = new_state.as_str(),
            "buffer state change"
        );
        match new_state {
            BufferState::Streaming => {
                // Secondary больше не нужен открытым; переоткроется лениво.
                self.secondary.close();
                self.status.clear();
            }
            BufferState::Disconnected => {
                self.primary.close();
                self.last_open_attempt_ms = self.ctx.clock.now_ms();
                self.retry_interval_ms = self.new_retry_interval();
            }
            BufferState::SendingBuffer => {}
        }
        self.state = new_state;
    }

    fn write_secondary(&mut self, batch: &mut Batch) -> StoreResult {
        match self.secondary.handle_messages(batch) {
            Ok(()) => {
                self.last_write_time_ms = self.ctx.clock.now_ms();
                Ok(())
            }
            Err(e) => {
                self.status.set(format!("secondary store failed: {}", e.message()));
                tracing::error!(category = %self.category, error = ?e, "secondary store failed");
                Err(e)
            }
        }
    }

    fn try_reopen_primary(&mut self, now_ms: i64) {
        if now_ms < self.last_open_attempt_ms + self.retry_interval_ms {
            return;
        }
        self.last_open_attempt_ms = now_ms;
        self.retry_interval_ms = self.new_retry_interval();

        tracing::info!(category = %self.category, "retrying primary store");
        match self.primary.open() {
            Ok(()) => {
                if self.secondary.empty(now_ms) {
                    self.change_state(BufferState::Streaming);
                } else {
                    self.change_state(BufferState::SendingBuffer);
                }
            }
            Err(e) => {
                tracing::debug!(category = %self.category, error = ?e, "primary still down");
            }
        }
    }

    /// Переслать в primary до buffer_send_rate старейших единиц буфера.
    fn send_buffer(&mut self, now_ms: i64) {
        for _ in 0..self.cfg.buffer_send_rate.max(1) {
            let mut batch = Batch::new();
            if let Err(e) = self.secondary.read_oldest(&mut batch, now_ms) {
                self.status.set(format!("buffer read failed: {}", e.message()));
                tracing::error!(category = %self.category, error = ?e, "buffer read failed");
                return;
            }

            if batch.is_empty() {
                // Единица без полезных записей (padding, meta) — убрать,
                // иначе слив встанет на ней навсегда.
                if self.secondary.empty(now_ms) {
                    break;
                }
                if let Err(e) = self.secondary.delete_oldest(now_ms) {
                    self.status.set(format!("buffer delete failed: {}", e.message()));
                    return;
                }
                continue;
            }

            let total = batch.len();
            match self.primary.handle_messages(&mut batch) {
                Ok(()) => {
                    if let Err(e) = self.secondary.delete_oldest(now_ms) {
                        self.status.set(format!("buffer delete failed: {}", e.message()));
                        tracing::error!(category = %self.category, error = ?e, "buffer delete failed");
                        return;
                    }
                    tracing::debug!(category = %self.category, count = total, "buffer unit replayed");
                }
                Err(e) => {
                    if batch.len() < total {
                        // Частичный успех: единица перезаписывается
                        // непересланным хвостом, порядок сохранён.
                        if let Err(re) = self.secondary.replace_oldest(&mut batch, now_ms) {
                            self.status.set(format!(
                                "buffer replace failed: {}",
                                re.message()
                            ));
                            tracing::error!(category = %self.category, error = ?re, "buffer replace failed");
                        }
                    }
                    tracing::warn!(
                        category = %self.category,
                        error = ?e,
                        "primary failed while draining buffer"
                    );
                    self.change_state(BufferState::Disconnected);
                    return;
                }
            }
        }

        if self.secondary.empty(now_ms) {
            self.change_state(BufferState::Streaming);
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> BufferState {
        self.state
    }
}

impl Store for BufferStore {
    fn kind(&self) -> &'static str {
        "buffer"
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn open(&mut self) -> StoreResult {
        match self.primary.open() {
            Ok(()) => {
                let now_ms = self.ctx.clock.now_ms();
                if self.cfg.replay_buffer && !self.secondary.empty(now_ms) {
                    self.change_state(BufferState::SendingBuffer);
                } else {
                    self.change_state(BufferState::Streaming);
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    category = %self.category,
                    error = ?e,
                    "primary open failed, starting disconnected"
                );
                self.change_state(BufferState::Disconnected);
                self.last_open_attempt_ms = self.ctx.clock.now_ms();
                // Buffer поглощает сбой primary: работаем через secondary.
                self.secondary.open()
            }
        }
    }

    fn is_open(&self) -> bool {
        self.primary.is_open() || self.secondary.is_open()
    }

    fn close(&mut self) {
        self.primary.close();
        self.secondary.close();
    }

    fn handle_messages(&mut self, batch: &mut Batch) -> StoreResult {
        match self.state {
            BufferState::Streaming => match self.primary.handle_messages(batch) {
                Ok(()) => {
                    self.last_write_time_ms = self.ctx.clock.now_ms();
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(
                        category = %self.category,
                        error = ?e,
                        "primary write failed, switching to buffer"
                    );
                    self.change_state(BufferState::Disconnected);
                    self.write_secondary(batch)
                }
            },
            // В SENDING_BUFFER новые записи тоже идут в secondary,
            // чтобы не обогнать уже отбуферизованные.
            BufferState::Disconnected | BufferState::SendingBuffer => {
                self.write_secondary(batch)
            }
        }
    }

    fn periodic_check(&mut self, now_ms: i64) {
        self.primary.periodic_check(now_ms);
        self.secondary.periodic_check(now_ms);
        match self.state {
            BufferState::Streaming => {}
            BufferState::Disconnected => self.try_reopen_primary(now_ms),
            BufferState::SendingBuffer => self.send_buffer(now_ms),
        }
    }

    fn flush(&mut self) {
        self.primary.flush();
        self.secondary.flush();
    }

    fn copy(&self, category: &str) -> Result<Box<dyn Store>, StoreError> {
        Ok(Box::new(Self::new(
            self.cfg.clone(),
            category,
            self.multi_category,
            &self.ctx,
        )?))
    }

    fn status(&self) -> String {
        if !self.status.is_empty() {
            return self.status.get();
        }
        let primary = self.primary.status();
        if !primary.is_empty() {
            return primary;
        }
        self.secondary.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileStoreConfig, RotatePeriod, StoreConfig};
    use crate::test_support::{MockBuffer, MockMode, MockStore};
    use barge_api::{Clock, LogEntry, ManualClock};
    use std::sync::Arc;
    use tempfile::TempDir;

    const T0: i64 = 1_686_823_200_000;

    fn buffer_cfg() -> BufferStoreConfig {
        BufferStoreConfig {
            primary: Box::new(StoreConfig::Null),
            secondary: Box::new(StoreConfig::Null),
            max_queue_length: 2_000_000,
            buffer_send_rate: 1,
            retry_interval: 1,
            retry_interval_range: 0, // детерминированный retry в тестах
            replay_buffer: true,
        }
    }

    fn test_ctx(clock: Arc<ManualClock>) -> StoreContext {
        StoreContext {
            clock,
            pool: Arc::new(conn_pool::ConnectionPool::new()),
            resolver: Arc::new(conn_pool::StaticResolver::empty()),
        }
    }

    fn entries(msgs: &[&str]) -> Batch {
        msgs.iter().map(|m| LogEntry::new("cat", *m)).collect()
    }

    fn messages(batches: &[LogEntry]) -> Vec<String> {
        batches.iter().map(|e| e.message.clone()).collect()
    }

    #[test]
    fn happy_path_streams_to_primary() {
        let clock = Arc::new(ManualClock::new(T0));
        let primary = MockStore::new("primary");
        let secondary = MockBuffer::new();
        let mut store = BufferStore::from_parts(
            buffer_cfg(),
            "cat",
            &test_ctx(clock),
            primary.store(),
            secondary.store(),
        );

        store.open().unwrap();
        assert_eq!(store.state(), BufferState::Streaming);

        let mut batch = entries(&["a", "b"]);
        store.handle_messages(&mut batch).unwrap();
        assert!(batch.is_empty());
        assert_eq!(messages(&primary.received()), vec!["a", "b"]);
        assert!(secondary.is_empty());
    }

    #[test]
    fn outage_then_recovery_replays_in_order() {
        let clock = Arc::new(ManualClock::new(T0));
        let primary = MockStore::new("primary");
        let secondary = MockBuffer::new();
        let mut store = BufferStore::from_parts(
            buffer_cfg(),
            "cat",
            &test_ctx(clock.clone()),
            primary.store(),
            secondary.store(),
        );

        store.open().unwrap();
        primary.set_mode(MockMode::Fail);

        let mut batch = entries(&["x", "y"]);
        store.handle_messages(&mut batch).unwrap();
        assert_eq!(store.state(), BufferState::Disconnected);
        assert_eq!(secondary.unit_count(), 1);

        // Primary вернулся; первый tick переоткрывает, второй сливает.
        primary.set_mode(MockMode::Ok);
        clock.advance(1_500);
        store.periodic_check(clock.now_ms());
        assert_eq!(store.state(), BufferState::SendingBuffer);
        assert!(primary.received().is_empty(), "drain happens on its own tick");

        store.periodic_check(clock.now_ms());
        assert_eq!(store.state(), BufferState::Streaming);
        assert_eq!(messages(&primary.received()), vec!["x", "y"]);
        assert!(secondary.is_empty());
    }

    #[test]
    fn new_submissions_during_drain_go_to_secondary() {
        let clock = Arc::new(ManualClock::new(T0));
        let primary = MockStore::new("primary");
        let secondary = MockBuffer::new();
        secondary.push_unit(entries(&["old1", "old2"]));
        let mut store = BufferStore::from_parts(
            buffer_cfg(),
            "cat",
            &test_ctx(clock.clone()),
            primary.store(),
            secondary.store(),
        );

        // replay_buffer: стартуем в SENDING_BUFFER, secondary не пуст.
        store.open().unwrap();
        assert_eq!(store.state(), BufferState::SendingBuffer);

        let mut batch = entries(&["new"]);
        store.handle_messages(&mut batch).unwrap();
        assert!(primary.received().is_empty());
        assert_eq!(secondary.unit_count(), 2);

        // Два tick'а: по одной единице за periodic_check (buffer_send_rate=1).
        store.periodic_check(clock.now_ms());
        assert_eq!(store.state(), BufferState::SendingBuffer);
        store.periodic_check(clock.now_ms());
        assert_eq!(store.state(), BufferState::Streaming);
        assert_eq!(messages(&primary.received()), vec!["old1", "old2", "new"]);
    }

    #[test]
    fn partial_drain_failure_rewrites_tail_and_disconnects() {
        let clock = Arc::new(ManualClock::new(T0));
        let primary = MockStore::new("primary");
        let secondary = MockBuffer::new();
        secondary.push_unit(entries(&["m1", "m2", "m3"]));
        let mut store = BufferStore::from_parts(
            buffer_cfg(),
            "cat",
            &test_ctx(clock.clone()),
            primary.store(),
            secondary.store(),
        );

        store.open().unwrap();
        assert_eq!(store.state(), BufferState::SendingBuffer);

        primary.set_mode(MockMode::AcceptFirst(1));
        store.periodic_check(clock.now_ms());

        assert_eq!(store.state(), BufferState::Disconnected);
        assert_eq!(messages(&primary.received()), vec!["m1"]);
        // Старейшая единица перезаписана непересланным хвостом.
        assert_eq!(messages(&secondary.front_unit().unwrap()), vec!["m2", "m3"]);
    }

    #[test]
    fn both_children_failing_returns_error_to_caller() {
        let clock = Arc::new(ManualClock::new(T0));
        let primary = MockStore::new("primary");
        let secondary = MockStore::new("secondary");
        primary.set_mode(MockMode::Fail);
        secondary.set_mode(MockMode::Fail);
        let mut store = BufferStore::from_parts(
            buffer_cfg(),
            "cat",
            &test_ctx(clock),
            primary.store(),
            secondary.store(),
        );
        store.state = BufferState::Streaming;

        let mut batch = entries(&["m"]);
        assert!(store.handle_messages(&mut batch).is_err());
        assert_eq!(batch.len(), 1, "batch stays with the caller");
        assert!(!store.status().is_empty());
    }

    #[test]
    fn retry_respects_interval() {
        let clock = Arc::new(ManualClock::new(T0));
        let primary = MockStore::new("primary");
        primary.set_mode(MockMode::Fail);
        let secondary = MockBuffer::new();
        let mut store = BufferStore::from_parts(
            buffer_cfg(),
            "cat",
            &test_ctx(clock.clone()),
            primary.store(),
            secondary.store(),
        );

        store.open().unwrap();
        assert_eq!(store.state(), BufferState::Disconnected);
        let attempts_after_open = primary.open_attempts();

        // Рано: retry_interval = 1s ещё не прошёл.
        clock.advance(300);
        store.periodic_check(clock.now_ms());
        assert_eq!(primary.open_attempts(), attempts_after_open);

        clock.advance(1_000);
        store.periodic_check(clock.now_ms());
        assert_eq!(primary.open_attempts(), attempts_after_open + 1);
    }

    #[test]
    fn recovery_with_real_file_secondary() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = test_ctx(clock.clone());

        let primary = MockStore::new("primary");
        let secondary = crate::build_store_inner(
            &StoreConfig::File(FileStoreConfig {
                file_path: dir.path().to_str().unwrap().to_string(),
                base_filename: None,
                max_size: 1_000_000_000,
                rotate_period: RotatePeriod::Never,
                rotate_hour: 1,
                rotate_minute: 15,
                chunk_size: 0,
                write_meta: false,
                write_category: false,
                add_newlines: false,
                create_symlink: false,
                fs_type: "std".to_string(),
            }),
            "cat",
            &ctx,
            false,
            true, // buffer secondary: add_newlines принудительно включён
        )
        .unwrap();

        let mut store = BufferStore::from_parts(
            buffer_cfg(),
            "cat",
            &ctx,
            primary.store(),
            secondary,
        );

        store.open().unwrap();
        primary.set_mode(MockMode::Fail);
        let mut batch = entries(&["x", "y"]);
        store.handle_messages(&mut batch).unwrap();
        assert_eq!(store.state(), BufferState::Disconnected);

        let date = barge_api::civil_from_ms(T0).date_string();
        let content =
            std::fs::read_to_string(dir.path().join(format!("cat_{date}_00001"))).unwrap();
        assert_eq!(content, "x\ny\n");

        primary.set_mode(MockMode::Ok);
        clock.advance(1_500);
        store.periodic_check(clock.now_ms());
        store.periodic_check(clock.now_ms());

        assert_eq!(store.state(), BufferState::Streaming);
        assert_eq!(messages(&primary.received()), vec!["x", "y"]);
        assert!(!dir.path().join(format!("cat_{date}_00001")).exists());
    }
}
