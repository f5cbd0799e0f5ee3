use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// ════════════════════════════════════════════════════════════════
//  Counters
// ════════════════════════════════════════════════════════════════

/// Счётчики одной категории. Пишут воркер и приёмный слой (relaxed),
/// читает status API снапшотом.
#[derive(Default)]
pub struct Counters {
    received: AtomicU64,
    sent: AtomicU64,
    try_later: AtomicU64,
    dropped: AtomicU64,
    /// Сообщений в очереди + удерживаемых воркером на retry.
    queued: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CounterSnapshot {
    pub received: u64,
    pub sent: u64,
    pub try_later: u64,
    pub dropped: u64,
    pub queued: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_received(&self, n: u64) {
        self.received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_sent(&self, n: u64) {
        self.sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_try_later(&self, n: u64) {
        self.try_later.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    /// Атомарно зарезервировать n сообщений в очереди. Отказ, если
    /// лимит был бы превышен; проверка и инкремент — один CAS, гонка
    /// конкурентных submit'ов не может переполнить очередь.
    pub fn try_reserve(&self, n: u64, max: u64) -> bool {
        self.queued
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                if cur + n > max { None } else { Some(cur + n) }
            })
            .is_ok()
    }

    pub fn queue_sub(&self, n: u64) {
        // Насыщающее вычитание: depth — оценка, не инвариант.
        let mut cur = self.queued.load(Ordering::Relaxed);
        loop {
            let next = cur.saturating_sub(n);
            match self.queued.compare_exchange_weak(
                cur,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            try_later: self.try_later.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_adds() {
        let c = Counters::new();
        c.add_received(5);
        assert!(c.try_reserve(5, 100));
        c.add_sent(3);
        c.queue_sub(3);
        let s = c.snapshot();
        assert_eq!(s.received, 5);
        assert_eq!(s.sent, 3);
        assert_eq!(s.queued, 2);
    }

    #[test]
    fn try_reserve_enforces_the_cap() {
        let c = Counters::new();
        assert!(c.try_reserve(8, 10));
        // 8 + 3 > 10: отказ, счётчик не тронут.
        assert!(!c.try_reserve(3, 10));
        assert_eq!(c.queued(), 8);
        assert!(c.try_reserve(2, 10));
        assert_eq!(c.queued(), 10);
        assert!(!c.try_reserve(1, 10));
    }

    #[test]
    fn queue_sub_saturates() {
        let c = Counters::new();
        assert!(c.try_reserve(1, 10));
        c.queue_sub(10);
        assert_eq!(c.queued(), 0);
    }
}
