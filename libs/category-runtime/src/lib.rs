mod counters;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{SyncSender, TrySendError, sync_channel};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use barge_api::{Batch, LogEntry, LogResult, StatusSlot, StoreError};
use store_engine::{StoreConfig, StoreContext, build_store};

pub use counters::{CounterSnapshot, Counters};

// ════════════════════════════════════════════════════════════════
//  CategoryTable — реестр категорий и их воркеров
// ════════════════════════════════════════════════════════════════

/// Хэндл одной категории: очередь к воркеру + наблюдаемое состояние.
pub struct CategoryHandle {
    pub name: String,
    pub counters: Arc<Counters>,
    /// Последний статус корневого store'а, опубликованный воркером.
    pub status: StatusSlot,
    sender: SyncSender<Batch>,
    max_queue: u64,
}

/// Реестр всех категорий. Приёмный слой кладёт batch'и в очереди;
/// по одному воркеру на категорию, каждый владеет своим деревом.
///
/// Категории из конфигурации создаются на старте; категория `default`
/// служит шаблоном — неизвестная категория лениво получает воркер с
/// копией default-дерева. Без default'а неизвестные категории молча
/// выбрасываются.
pub struct CategoryTable {
    categories: RwLock<HashMap<String, Arc<CategoryHandle>>>,
    default_model: Option<StoreConfig>,
    ctx: StoreContext,
    check_interval: Duration,
    default_max_queue: u64,
    token: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CategoryTable {
    pub fn new(
        ctx: StoreContext,
        default_model: Option<StoreConfig>,
        check_interval: Duration,
        default_max_queue: u64,
        token: CancellationToken,
    ) -> Result<Self, StoreError> {
        if let Some(model) = &default_model {
            model.validate()?;
        }
        Ok(Self {
            categories: RwLock::new(HashMap::new()),
            default_model,
            ctx,
            check_interval,
            default_max_queue,
            token,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Завести категорию с её деревом store'ов и воркером.
    pub fn add_category(&self, name: &str, cfg: &StoreConfig) -> Result<(), StoreError> {
        let mut categories = self.categories.write();
        if categories.contains_key(name) {
            return Err(StoreError::config(format!("duplicate category '{name}'")));
        }
        let handle = self.spawn_category(name, cfg)?;
        categories.insert(name.to_string(), handle);
        Ok(())
    }

    fn spawn_category(
        &self,
        name: &str,
        cfg: &StoreConfig,
    ) -> Result<Arc<CategoryHandle>, StoreError> {
        let store = build_store(cfg, name, &self.ctx)?;
        let max_queue = cfg.max_queue_length().unwrap_or(self.default_max_queue);

        // Слотов в канале хватает всегда: batch'и непустые, поэтому
        // резервация max_queue сообщений ограничивает и число batch'ей.
        let slots = usize::try_from(max_queue).unwrap_or(usize::MAX);
        let (sender, rx) = sync_channel::<Batch>(slots);
        let counters = Arc::new(Counters::new());
        let status = StatusSlot::new();

        let worker_name = name.to_string();
        let worker_counters = counters.clone();
        let worker_status = status.clone();
        let check_interval = self.check_interval;
        let token = self.token.clone();
        let handle = tokio::task::spawn_blocking(move || {
            worker::run_worker(
                worker_name,
                store,
                rx,
                worker_counters,
                worker_status,
                check_interval,
                token,
            );
        });
        self.workers.lock().push(handle);

        tracing::info!(category = %name, store = cfg.kind_name(), "category registered");
        Ok(Arc::new(CategoryHandle {
            name: name.to_string(),
            counters,
            status,
            sender,
            max_queue,
        }))
    }

    fn get_or_create(&self, category: &str) -> Option<Arc<CategoryHandle>> {
        if let Some(handle) = self.categories.read().get(category) {
            return Some(handle.clone());
        }
        let model = self.default_model.as_ref()?.clone();

        let mut categories = self.categories.write();
        // Гонка с другим submit'ом: перепроверить под write-локом.
        if let Some(handle) = categories.get(category) {
            return Some(handle.clone());
        }
        match self.spawn_category(category, &model) {
            Ok(handle) => {
                categories.insert(category.to_string(), handle.clone());
                Some(handle)
            }
            Err(e) => {
                tracing::error!(category = %category, error = ?e, "default store build failed");
                None
            }
        }
    }

    /// Принять batch записей от wire-адаптера.
    ///
    /// `Ok` — каждая запись поставлена в очередь (или её категория
    /// подавлена); `TryLater` — ни одна: какая-то из очередей полна.
    pub fn submit(&self, entries: Vec<LogEntry>) -> LogResult {
        if entries.is_empty() {
            return LogResult::Ok;
        }

        // Разбить по категориям, сохранив порядок внутри каждой.
        let mut groups: Vec<(String, Batch)> = Vec::new();
        for entry in entries {
            match groups.iter_mut().find(|(cat, _)| *cat == entry.category) {
                Some((_, group)) => group.push(entry),
                None => groups.push((entry.category.clone(), vec![entry])),
            }
        }

        // Фаза 1: атомарно зарезервировать место во всех очередях —
        // иначе не кладём ничего, клиент повторит весь batch целиком.
        // Отказ любой категории откатывает резервации предыдущих.
        let mut targets: Vec<(Arc<CategoryHandle>, Batch)> = Vec::with_capacity(groups.len());
        for (category, group) in groups {
            let Some(handle) = self.get_or_create(&category) else {
                tracing::debug!(category = %category, count = group.len(), "no store configured, discarding");
                continue;
            };
            if !handle.counters.try_reserve(group.len() as u64, handle.max_queue) {
                handle.counters.add_try_later(group.len() as u64);
                tracing::warn!(category = %category, "queue full, asking client to try later");
                for (reserved, batch) in &targets {
                    reserved.counters.queue_sub(batch.len() as u64);
                }
                return LogResult::TryLater;
            }
            targets.push((handle, group));
        }

        // Фаза 2: положить всё. Место уже зарезервировано.
        for (handle, group) in targets {
            let n = group.len() as u64;
            handle.counters.add_received(n);
            match handle.sender.try_send(group) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Недостижимо при непустых batch'ах: слотов в канале
                    // не меньше, чем зарезервированных сообщений.
                    handle.counters.queue_sub(n);
                    handle.counters.add_try_later(n);
                    tracing::warn!(category = %handle.name, "queue slots exhausted");
                    return LogResult::TryLater;
                }
                Err(TrySendError::Disconnected(_)) => {
                    // Воркер уже остановлен (shutdown) — batch не доставлен.
                    handle.counters.queue_sub(n);
                    handle.counters.add_dropped(n);
                    return LogResult::TryLater;
                }
            }
        }
        LogResult::Ok
    }

    pub fn category_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.categories.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn category_info(&self, name: &str) -> Option<(String, CounterSnapshot)> {
        self.categories
            .read()
            .get(name)
            .map(|h| (h.status.get(), h.counters.snapshot()))
    }

    /// Забрать JoinHandle'ы воркеров для ожидания на shutdown'е.
    pub fn take_workers(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut self.workers.lock())
    }
}
