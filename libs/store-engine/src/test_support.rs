//! Мок-store'ы для тестов композитных узлов.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use barge_api::{Batch, LogEntry, Store, StoreError, StoreResult};

// ════════════════════════════════════════════════════════════════
//  MockStore — скриптуемый лист дерева
// ════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug)]
pub enum MockMode {
    /// open и handle успешны.
    Ok,
    /// open и handle падают, batch не потребляется.
    Fail,
    /// handle принимает первые N записей каждого batch'а и падает,
    /// оставляя хвост (частичный успех).
    AcceptFirst(usize),
}

struct MockInner {
    mode: MockMode,
    opened: bool,
    open_attempts: usize,
    received: Vec<LogEntry>,
}

/// Хэндл теста: сам store уезжает в дерево boxed, хэндл остаётся
/// снаружи для скриптования и инспекции.
#[derive(Clone)]
pub struct MockStore {
    name: &'static str,
    inner: Arc<Mutex<MockInner>>,
}

impl MockStore {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(MockInner {
                mode: MockMode::Ok,
                opened: false,
                open_attempts: 0,
                received: Vec::new(),
            })),
        }
    }

    pub fn store(&self) -> Box<dyn Store> {
        Box::new(self.clone())
    }

    pub fn set_mode(&self, mode: MockMode) {
        self.inner.lock().mode = mode;
    }

    pub fn received(&self) -> Vec<LogEntry> {
        self.inner.lock().received.clone()
    }

    pub fn open_attempts(&self) -> usize {
        self.inner.lock().open_attempts
    }
}

impl Store for MockStore {
    fn kind(&self) -> &'static str {
        self.name
    }

    fn category(&self) -> &str {
        "mock"
    }

    fn open(&mut self) -> StoreResult {
        let mut inner = self.inner.lock();
        inner.open_attempts += 1;
        match inner.mode {
            MockMode::Fail => Err(StoreError::io("mock open failure")),
            _ => {
                inner.opened = true;
                Ok(())
            }
        }
    }

    fn is_open(&self) -> bool {
        self.inner.lock().opened
    }

    fn close(&mut self) {
        self.inner.lock().opened = false;
    }

    fn handle_messages(&mut self, batch: &mut Batch) -> StoreResult {
        let mut inner = self.inner.lock();
        match inner.mode {
            MockMode::Ok => {
                inner.received.append(batch);
                Ok(())
            }
            MockMode::Fail => Err(StoreError::io("mock handle failure")),
            MockMode::AcceptFirst(n) => {
                let take = n.min(batch.len());
                inner.received.extend(batch.drain(..take));
                Err(StoreError::io("mock partial failure"))
            }
        }
    }

    fn flush(&mut self) {}

    fn copy(&self, _category: &str) -> Result<Box<dyn Store>, StoreError> {
        Ok(self.store())
    }

    fn status(&self) -> String {
        String::new()
    }
}

// ════════════════════════════════════════════════════════════════
//  MockBuffer — readable store поверх VecDeque единиц
// ════════════════════════════════════════════════════════════════

/// In-memory secondary: каждая запись batch'а образует отдельную
/// единицу буфера; read/delete/replace работают со старейшей.
#[derive(Clone)]
pub struct MockBuffer {
    units: Arc<Mutex<VecDeque<Batch>>>,
}

impl MockBuffer {
    pub fn new() -> Self {
        Self { units: Arc::new(Mutex::new(VecDeque::new())) }
    }

    pub fn store(&self) -> Box<dyn Store> {
        Box::new(self.clone())
    }

    pub fn push_unit(&self, unit: Batch) {
        self.units.lock().push_back(unit);
    }

    pub fn unit_count(&self) -> usize {
        self.units.lock().len()
    }

    pub fn front_unit(&self) -> Option<Batch> {
        self.units.lock().front().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.units.lock().iter().all(|u| u.is_empty())
    }
}

impl Store for MockBuffer {
    fn kind(&self) -> &'static str {
        "mock_buffer"
    }

    fn category(&self) -> &str {
        "mock"
    }

    fn open(&mut self) -> StoreResult {
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }

    fn close(&mut self) {}

    fn handle_messages(&mut self, batch: &mut Batch) -> StoreResult {
        self.units.lock().push_back(std::mem::take(batch));
        Ok(())
    }

    fn flush(&mut self) {}

    fn copy(&self, _category: &str) -> Result<Box<dyn Store>, StoreError> {
        Ok(self.store())
    }

    fn status(&self) -> String {
        String::new()
    }

    fn read_oldest(&mut self, out: &mut Batch, _now_ms: i64) -> StoreResult {
        if let Some(front) = self.units.lock().front() {
            out.extend(front.iter().cloned());
        }
        Ok(())
    }

    fn replace_oldest(&mut self, batch: &mut Batch, _now_ms: i64) -> StoreResult {
        if let Some(front) = self.units.lock().front_mut() {
            *front = std::mem::take(batch);
        }
        Ok(())
    }

    fn delete_oldest(&mut self, _now_ms: i64) -> StoreResult {
        self.units.lock().pop_front();
        Ok(())
    }

    fn empty(&self, _now_ms: i64) -> bool {
        self.is_empty()
    }
}

impl Default for MockBuffer {
    fn default() -> Self {
        Self::new()
    }
}
