use barge_api::{Batch, Store, StoreError, StoreResult};

/// Принимает и молча выбрасывает. Readable, но читать нечего —
/// placeholder для подавленных категорий.
pub struct NullStore {
    category: String,
    opened: bool,
}

impl NullStore {
    pub(crate) fn new(category: &str) -> Self {
        Self { category: category.to_string(), opened: false }
    }
}

impl Store for NullStore {
    fn kind(&self) -> &'static str {
        "null"
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn open(&mut self) -> StoreResult {
        self.opened = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn handle_messages(&mut self, batch: &mut Batch) -> StoreResult {
        tracing::trace!(category = %self.category, count = batch.len(), "discarded");
        batch.clear();
        Ok(())
    }

    fn flush(&mut self) {}

    fn copy(&self, category: &str) -> Result<Box<dyn Store>, StoreError> {
        Ok(Box::new(Self::new(category)))
    }

    fn status(&self) -> String {
        String::new()
    }

    fn read_oldest(&mut self, _out: &mut Batch, _now_ms: i64) -> StoreResult {
        Ok(())
    }

    fn replace_oldest(&mut self, batch: &mut Batch, _now_ms: i64) -> StoreResult {
        batch.clear();
        Ok(())
    }

    fn delete_oldest(&mut self, _now_ms: i64) -> StoreResult {
        Ok(())
    }

    fn empty(&self, _now_ms: i64) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barge_api::LogEntry;

    #[test]
    fn accepts_everything_reads_nothing() {
        let mut store = NullStore::new("suppressed");
        let mut batch = vec![LogEntry::new("suppressed", "m")];
        store.handle_messages(&mut batch).unwrap();
        assert!(batch.is_empty());

        let mut out = Batch::new();
        store.read_oldest(&mut out, 0).unwrap();
        assert!(out.is_empty());
        assert!(store.empty(0));
    }
}
