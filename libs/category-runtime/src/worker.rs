use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use barge_api::{Batch, StatusSlot, Store};

use crate::counters::Counters;

// ════════════════════════════════════════════════════════════════
//  Category worker
// ════════════════════════════════════════════════════════════════

/// Блокирующий цикл воркера категории. Воркер эксклюзивно владеет
/// корневым store'ом: все вызовы дерева идут из этого потока, поэтому
/// store'ам не нужны внутренние локи.
///
/// Таймаут recv одновременно задаёт каденцию periodic_check: тишина в
/// очереди не останавливает ротацию и retry буфера.
pub(crate) fn run_worker(
    name: String,
    mut store: Box<dyn Store>,
    rx: Receiver<Batch>,
    counters: Arc<Counters>,
    status: StatusSlot,
    check_interval: Duration,
    token: CancellationToken,
) {
    tracing::info!(category = %name, kind = store.kind(), "worker started");

    if let Err(e) = store.open() {
        // Не фатально: buffer-store переживает это сам, остальные
        // переоткроются при первой записи.
        tracing::warn!(category = %name, error = ?e, "store open failed at startup");
    }

    // Batch'и, которые store пока не принял; голова — самая старая.
    let mut pending: VecDeque<Batch> = VecDeque::new();
    let check_ms = check_interval.as_millis() as i64;
    let mut last_check = barge_api::now_ms();

    loop {
        if token.is_cancelled() {
            break;
        }

        match rx.recv_timeout(check_interval) {
            Ok(batch) => pending.push_back(batch),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        drain_pending(&mut *store, &mut pending, &counters, &status);

        let now = barge_api::now_ms();
        if now - last_check >= check_ms {
            store.periodic_check(now);
            last_check = now;
            // После tick'а буфер мог восстановиться — добить хвост.
            drain_pending(&mut *store, &mut pending, &counters, &status);
            status.set(store.status());
        }
    }

    // Graceful drain: забрать остаток очереди и попытаться дослать.
    while let Ok(batch) = rx.try_recv() {
        pending.push_back(batch);
    }
    drain_pending(&mut *store, &mut pending, &counters, &status);

    let undelivered: usize = pending.iter().map(|b| b.len()).sum();
    if undelivered > 0 {
        counters.add_dropped(undelivered as u64);
        counters.queue_sub(undelivered as u64);
        tracing::warn!(
            category = %name,
            count = undelivered,
            "dropping undelivered messages at shutdown"
        );
    }

    store.flush();
    store.close();
    status.set(store.status());
    tracing::info!(category = %name, "worker stopped");
}

/// Слить pending в store по порядку, остановившись на первом отказе.
/// Частично принятый batch продолжает держать непринятый хвост.
fn drain_pending(
    store: &mut dyn Store,
    pending: &mut VecDeque<Batch>,
    counters: &Counters,
    status: &StatusSlot,
) {
    while let Some(front) = pending.front_mut() {
        let before = front.len();
        match store.handle_messages(front) {
            Ok(()) => {
                counters.add_sent(before as u64);
                counters.queue_sub(before as u64);
                pending.pop_front();
            }
            Err(e) => {
                let accepted = before - front.len();
                if accepted > 0 {
                    counters.add_sent(accepted as u64);
                    counters.queue_sub(accepted as u64);
                }
                tracing::debug!(error = ?e, "store not accepting, will retry");
                status.set(store.status());
                break;
            }
        }
    }
}
