use barge_api::{Batch, StatusSlot, Store, StoreError, StoreResult};

use crate::config::{MultiStoreConfig, ReportSuccess};
use crate::{StoreContext, build_store_inner};

// ════════════════════════════════════════════════════════════════
//  MultiStore
// ════════════════════════════════════════════════════════════════

/// Раздаёт каждый batch всем детям.
///
/// `report_success = any`: успех, если принял хотя бы один ребёнок;
/// `all`: успех только при полном единогласии — иначе весь batch
/// возвращается вызывающему непринятым (дубликаты у принявших детей
/// возможны, это at-least-once).
pub struct MultiStore {
    cfg: MultiStoreConfig,
    category: String,
    multi_category: bool,
    ctx: StoreContext,
    status: StatusSlot,
    stores: Vec<Box<dyn Store>>,
    opened: bool,
}

impl MultiStore {
    pub(crate) fn new(
        cfg: MultiStoreConfig,
        category: &str,
        multi_category: bool,
        ctx: &StoreContext,
    ) -> Result<Self, StoreError> {
        let mut stores = Vec::with_capacity(cfg.stores.len());
        for child in &cfg.stores {
            stores.push(build_store_inner(child, category, ctx, multi_category, false)?);
        }
        Ok(Self {
            cfg,
            category: category.to_string(),
            multi_category,
            ctx: ctx.clone(),
            status: StatusSlot::new(),
            stores,
            opened: false,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        cfg: MultiStoreConfig,
        category: &str,
        ctx: &StoreContext,
        stores: Vec<Box<dyn Store>>,
    ) -> Self {
        Self {
            cfg,
            category: category.to_string(),
            multi_category: false,
            ctx: ctx.clone(),
            status: StatusSlot::new(),
            stores,
            opened: false,
        }
    }
}

impl Store for MultiStore {
    fn kind(&self) -> &'static str {
        "multi"
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn open(&mut self) -> StoreResult {
        for store in &mut self.stores {
            store.open()?;
        }
        self.opened = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    fn close(&mut self) {
        for store in &mut self.stores {
            store.close();
        }
        self.opened = false;
    }

    fn handle_messages(&mut self, batch: &mut Batch) -> StoreResult {
        if !self.opened {
            self.open()?;
        }

        let mut successes = 0usize;
        let mut last_err: Option<StoreError> = None;
        for (i, store) in self.stores.iter_mut().enumerate() {
            let mut clone = batch.clone();
            match store.handle_messages(&mut clone) {
                Ok(()) => successes += 1,
                Err(e) => {
                    self.status.set(format!("child {i} failed: {}", e.message()));
                    last_err = Some(e);
                }
            }
        }

        let ok = match self.cfg.report_success {
            ReportSuccess::Any => successes > 0,
            ReportSuccess::All => successes == self.stores.len(),
        };
        if ok {
            batch.clear();
            Ok(())
        } else {
            // Весь batch считается непринятым.
            Err(last_err.unwrap_or_else(|| StoreError::internal("no children configured")))
        }
    }

    fn periodic_check(&mut self, now_ms: i64) {
        for store in &mut self.stores {
            store.periodic_check(now_ms);
        }
    }

    fn flush(&mut self) {
        for store in &mut self.stores {
            store.flush();
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
        self.stores
            .iter()
            .map(|s| s.status())
            .find(|s| !s.is_empty())
            .unwrap_or_default()
    }
}
