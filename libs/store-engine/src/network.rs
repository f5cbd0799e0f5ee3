use std::sync::Arc;
use std::time::Duration;

use conn_pool::{ConnectionPool, NameResolver, WireClient};

use barge_api::{Batch, LogResult, StatusSlot, Store, StoreError, StoreResult};

use crate::config::NetworkStoreConfig;
use crate::StoreContext;

// ════════════════════════════════════════════════════════════════
//  NetworkStore
// ════════════════════════════════════════════════════════════════

/// Пересылает batch одним вызовом `Log` на peer-демон.
///
/// С `use_conn_pool` store — тонкий адаптер к общему пулу: держит
/// только ключ, соединением владеет пул и делит его между store'ами,
/// нацеленными на один peer. Без пула — собственное выделенное
/// соединение.
pub struct NetworkStore {
    cfg: NetworkStoreConfig,
    category: String,
    multi_category: bool,
    pool: Arc<ConnectionPool>,
    resolver: Arc<dyn NameResolver>,
    status: StatusSlot,

    opened: bool,
    pool_key: Option<String>,
    dedicated: Option<WireClient>,
}

impl NetworkStore {
    pub(crate) fn new(
        cfg: NetworkStoreConfig,
        category: &str,
        multi_category: bool,
        ctx: &StoreContext,
    ) -> Self {
        Self {
            cfg,
            category: category.to_string(),
            multi_category,
            pool: ctx.pool.clone(),
            resolver: ctx.resolver.clone(),
            status: StatusSlot::new(),
            opened: false,
            pool_key: None,
            dedicated: None,
        }
    }

    /// Адрес peer'а: резолвер для service_name, иначе явный host:port.
    fn peer_addr(&self) -> Result<(String, u16), StoreError> {
        match &self.cfg.service_name {
            Some(service) => self.resolver.resolve(service),
            None => Ok((self.cfg.remote_host.clone(), self.cfg.remote_port)),
        }
    }

    fn pool_key(&self, host: &str, port: u16) -> String {
        match &self.cfg.service_name {
            Some(service) => ConnectionPool::service_key(service),
            None => ConnectionPool::host_key(host, port),
        }
    }
}

impl Store for NetworkStore {
    fn kind(&self) -> &'static str {
        "network"
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn open(&mut self) -> StoreResult {
        if self.opened {
            return Ok(());
        }
        let (host, port) = self.peer_addr().inspect_err(|e| {
            self.status.set(format!("peer resolution failed: {}", e.message()));
        })?;
        let timeout = Duration::from_millis(self.cfg.timeout_ms);

        if self.cfg.use_conn_pool {
            let key = self.pool_key(&host, port);
            self.pool.open(&key, &host, port, timeout).inspect_err(|e| {
                self.status.set(format!("connect failed: {}", e.message()));
            })?;
            self.pool_key = Some(key);
        } else {
            let client = WireClient::connect(&host, port, timeout).inspect_err(|e| {
                self.status.set(format!("connect failed: {}", e.message()));
            })?;
            self.dedicated = Some(client);
        }

        self.opened = true;
        self.status.clear();
        tracing::info!(category = %self.category, peer = %format!("{host}:{port}"), "peer connected");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    fn close(&mut self) {
        if let Some(key) = self.pool_key.take() {
            self.pool.close(&key);
        }
        self.dedicated = None;
        self.opened = false;
    }

    fn handle_messages(&mut self, batch: &mut Batch) -> StoreResult {
        if !self.opened {
            return Err(StoreError::closed("network store is not open"));
        }

        let result = if let Some(key) = &self.pool_key {
            self.pool.send(key, batch)
        } else if let Some(client) = &mut self.dedicated {
            client.send(batch)
        } else {
            Err(StoreError::closed("no connection"))
        };

        match result {
            Ok(LogResult::Ok) => {
                batch.clear();
                Ok(())
            }
            Ok(LogResult::TryLater) => {
                // Peer перегружен: batch остаётся у вызывающего.
                self.status.set("peer asked to try later");
                Err(StoreError::try_later("peer asked to try later"))
            }
            Err(e) => {
                self.status.set(format!("send failed: {}", e.message()));
                tracing::warn!(category = %self.category, error = ?e, "peer send failed, closing");
                self.close();
                Err(e)
            }
        }
    }

    fn flush(&mut self) {}

    fn copy(&self, category: &str) -> Result<Box<dyn Store>, StoreError> {
        Ok(Box::new(Self {
            cfg: self.cfg.clone(),
            category: category.to_string(),
            multi_category: self.multi_category,
            pool: self.pool.clone(),
            resolver: self.resolver.clone(),
            status: StatusSlot::new(),
            opened: false,
            pool_key: None,
            dedicated: None,
        }))
    }

    fn status(&self) -> String {
        self.status.get()
    }
}
