use barge_api::{Batch, LogEntry, StatusSlot, Store, StoreError, StoreResult};

use crate::config::{BucketStoreConfig, BucketType};
use crate::{StoreContext, build_store_inner};

// ════════════════════════════════════════════════════════════════
//  BucketStore
// ════════════════════════════════════════════════════════════════

/// Стабильный 64-битный хеш строкового ключа (FNV-1a).
///
/// std-хешер не годится: он сидирован per-process, а раскладка по
/// bucket'ам должна совпадать между перезапусками и хостами.
pub(crate) fn fnv1a64(data: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Партиционирует batch по N дочерним store'ам детерминированной
/// функцией от префикса-ключа сообщения. Bucket 0 зарезервирован под
/// сообщения, которые не удалось bucketizе'ировать.
pub struct BucketStore {
    cfg: BucketStoreConfig,
    category: String,
    multi_category: bool,
    ctx: StoreContext,
    status: StatusSlot,
    delimiter: u8,
    /// Дети 0..=num_buckets; индекс — номер bucket'а.
    buckets: Vec<Box<dyn Store>>,
    opened: bool,
}

impl BucketStore {
    pub(crate) fn new(
        cfg: BucketStoreConfig,
        category: &str,
        multi_category: bool,
        ctx: &StoreContext,
    ) -> Result<Self, StoreError> {
        let delimiter = *cfg
            .delimiter
            .as_bytes()
            .first()
            .ok_or_else(|| StoreError::config("empty bucket delimiter"))?;

        let mut buckets = Vec::with_capacity(cfg.num_buckets as usize + 1);
        for i in 0..=cfg.num_buckets {
            let template = if i == 0 {
                cfg.bucket0.as_deref().unwrap_or(&cfg.bucket)
            } else {
                &cfg.bucket
            };
            let child_category = format!("{category}_{i:03}");
            buckets.push(build_store_inner(
                template,
                &child_category,
                ctx,
                multi_category,
                false,
            )?);
        }

        Ok(Self {
            cfg,
            category: category.to_string(),
            multi_category,
            ctx: ctx.clone(),
            status: StatusSlot::new(),
            delimiter,
            buckets,
            opened: false,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        cfg: BucketStoreConfig,
        category: &str,
        ctx: &StoreContext,
        buckets: Vec<Box<dyn Store>>,
    ) -> Self {
        let delimiter = cfg.delimiter.as_bytes()[0];
        Self {
            cfg,
            category: category.to_string(),
            multi_category: false,
            ctx: ctx.clone(),
            status: StatusSlot::new(),
            delimiter,
            buckets,
            opened: false,
        }
    }

    /// Номер bucket'а для сообщения; 0 = не bucketizable.
    pub(crate) fn bucketize(&self, message: &str) -> usize {
        let n = self.cfg.num_buckets as u64;
        let Some(pos) = message.bytes().position(|b| b == self.delimiter) else {
            return 0;
        };
        let key = &message[..pos];
        match self.cfg.bucket_type {
            BucketType::KeyHash => (fnv1a64(key.as_bytes()) % n) as usize + 1,
            BucketType::KeyModulo => match key.parse::<u64>() {
                Ok(k) => (k % n) as usize + 1,
                Err(_) => 0,
            },
            // Legacy-формат: десятичный номер в фиксированной позиции
            // (начало ключа); хвост ключа игнорируется.
            BucketType::ContextLog => {
                let digits: String =
                    key.chars().take_while(|c| c.is_ascii_digit()).collect();
                match digits.parse::<u64>() {
                    Ok(k) => (k % n) as usize + 1,
                    Err(_) => 0,
                }
            }
        }
    }

    fn message_without_key<'a>(&self, message: &'a str) -> Option<&'a str> {
        message
            .bytes()
            .position(|b| b == self.delimiter)
            .map(|pos| &message[pos + 1..])
    }
}

impl Store for BucketStore {
    fn kind(&self) -> &'static str {
        "bucket"
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn open(&mut self) -> StoreResult {
        for bucket in &mut self.buckets {
            bucket.open()?;
        }
        self.opened = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    fn close(&mut self) {
        for bucket in &mut self.buckets {
            bucket.close();
        }
        self.opened = false;
    }

    fn handle_messages(&mut self, batch: &mut Batch) -> StoreResult {
        if !self.opened {
            self.open()?;
        }

        let mut groups: Vec<Batch> = (0..self.buckets.len()).map(|_| Batch::new()).collect();
        for entry in batch.drain(..) {
            let bucket = self.bucketize(&entry.message);
            let message = if self.cfg.remove_key && bucket != 0 {
                self.message_without_key(&entry.message)
                    .map(str::to_string)
                    .unwrap_or(entry.message)
            } else {
                entry.message
            };
            groups[bucket].push(LogEntry { category: entry.category, message });
        }

        let mut leftover = Batch::new();
        let mut last_err: Option<StoreError> = None;
        for (i, mut group) in groups.into_iter().enumerate() {
            if group.is_empty() {
                continue;
            }
            if let Err(e) = self.buckets[i].handle_messages(&mut group) {
                self.status.set(format!("bucket {i} failed: {}", e.message()));
                leftover.append(&mut group);
                last_err = Some(e);
            }
        }

        match last_err {
            None => Ok(()),
            Some(e) => {
                *batch = leftover;
                Err(e)
            }
        }
    }

    fn periodic_check(&mut self, now_ms: i64) {
        for bucket in &mut self.buckets {
            bucket.periodic_check(now_ms);
        }
    }

    fn flush(&mut self) {
        for bucket in &mut self.buckets {
            bucket.flush();
        }
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
        self.buckets
            .iter()
            .map(|b| b.status())
            .find(|s| !s.is_empty())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::test_support::{MockMode, MockStore};
    use barge_api::ManualClock;
    use std::sync::Arc;

    fn test_ctx() -> StoreContext {
        StoreContext {
            clock: Arc::new(ManualClock::new(0)),
            pool: Arc::new(conn_pool::ConnectionPool::new()),
            resolver: Arc::new(conn_pool::StaticResolver::empty()),
        }
    }

    fn bucket_cfg(bucket_type: BucketType, num_buckets: u32, remove_key: bool) -> BucketStoreConfig {
        BucketStoreConfig {
            bucket_type,
            delimiter: ":".to_string(),
            remove_key,
            num_buckets,
            bucket: Box::new(StoreConfig::Null),
            bucket0: None,
        }
    }

    fn make(
        bucket_type: BucketType,
        num_buckets: u32,
        remove_key: bool,
    ) -> (BucketStore, Vec<MockStore>) {
        let mocks: Vec<MockStore> = (0..=num_buckets).map(|_| MockStore::new("bucket")).collect();
        let store = BucketStore::from_parts(
            bucket_cfg(bucket_type, num_buckets, remove_key),
            "cat",
            &test_ctx(),
            mocks.iter().map(|m| m.store()).collect(),
        );
        (store, mocks)
    }

    fn msgs(mock: &MockStore) -> Vec<String> {
        mock.received().into_iter().map(|e| e.message).collect()
    }

    #[test]
    fn key_hash_routes_and_strips_key() {
        let (mut store, mocks) = make(BucketType::KeyHash, 4, true);

        let mut batch = vec![
            LogEntry::new("cat", "7:hello"),
            LogEntry::new("cat", "k:world"),
            LogEntry::new("cat", "nodelim"),
        ];
        store.handle_messages(&mut batch).unwrap();
        assert!(batch.is_empty());

        let b7 = (fnv1a64(b"7") % 4) as usize + 1;
        let bk = (fnv1a64(b"k") % 4) as usize + 1;
        assert!(msgs(&mocks[b7]).contains(&"hello".to_string()));
        assert!(msgs(&mocks[bk]).contains(&"world".to_string()));
        assert_eq!(msgs(&mocks[0]), vec!["nodelim"]);
    }

    #[test]
    fn key_modulo_is_deterministic() {
        let (mut store, mocks) = make(BucketType::KeyModulo, 4, false);

        let mut batch = vec![
            LogEntry::new("cat", "7:a"),   // (7 % 4) + 1 = 4
            LogEntry::new("cat", "8:b"),   // (8 % 4) + 1 = 1
            LogEntry::new("cat", "bad:c"), // не целое → 0
        ];
        store.handle_messages(&mut batch).unwrap();

        assert_eq!(msgs(&mocks[4]), vec!["7:a"]);
        assert_eq!(msgs(&mocks[1]), vec!["8:b"]);
        assert_eq!(msgs(&mocks[0]), vec!["bad:c"]);
    }

    #[test]
    fn context_log_reads_leading_digits() {
        let (store, _) = make(BucketType::ContextLog, 4, false);
        assert_eq!(store.bucketize("6abc:payload"), (6 % 4) + 1);
        assert_eq!(store.bucketize("xyz:payload"), 0);
    }

    #[test]
    fn failed_bucket_returns_its_group() {
        let (mut store, mocks) = make(BucketType::KeyModulo, 2, false);
        store.open().unwrap();
        // Bucket 2 (ключ 1) падает, остальные принимают.
        mocks[2].set_mode(MockMode::Fail);

        let mut batch = vec![
            LogEntry::new("cat", "0:ok"),   // bucket 1
            LogEntry::new("cat", "1:lost"), // bucket 2 — падает
            LogEntry::new("cat", "2:ok2"),  // bucket 1
        ];
        let err = store.handle_messages(&mut batch).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message, "1:lost");
        assert_eq!(msgs(&mocks[1]), vec!["0:ok", "2:ok2"]);
        assert!(!store.status().is_empty());
    }

    #[test]
    fn intra_bucket_order_is_preserved() {
        let (mut store, mocks) = make(BucketType::KeyModulo, 2, true);
        let mut batch = vec![
            LogEntry::new("cat", "1:first"),
            LogEntry::new("cat", "3:second"),
            LogEntry::new("cat", "5:third"),
        ];
        store.handle_messages(&mut batch).unwrap();
        // Все три ключа нечётные → bucket (1 % 2) + 1 = 2.
        assert_eq!(msgs(&mocks[2]), vec!["first", "second", "third"]);
    }
}
