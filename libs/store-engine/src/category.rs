use std::collections::BTreeMap;

use barge_api::{Batch, StatusSlot, Store, StoreError, StoreResult};

// ════════════════════════════════════════════════════════════════
//  CategoryStore
// ════════════════════════════════════════════════════════════════

/// Store, заводящий по отдельному ребёнку на каждую встреченную
/// категорию.
///
/// Держит модель (шаблон из конфигурации) и карту `категория → store`;
/// ребёнок чеканится лениво через `model.copy(category)` при первом
/// сообщении категории. `multi_file` и `framed_multi_file` — это
/// category-store'ы с файловой моделью.
pub struct CategoryStore {
    kind_name: &'static str,
    category: String,
    model: Box<dyn Store>,
    children: BTreeMap<String, Box<dyn Store>>,
    status: StatusSlot,
    opened: bool,
}

impl CategoryStore {
    pub(crate) fn from_model(
        kind_name: &'static str,
        category: &str,
        model: Box<dyn Store>,
    ) -> Self {
        Self {
            kind_name,
            category: category.to_string(),
            model,
            children: BTreeMap::new(),
            status: StatusSlot::new(),
            opened: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn child_categories(&self) -> Vec<String> {
        self.children.keys().cloned().collect()
    }
}

impl Store for CategoryStore {
    fn kind(&self) -> &'static str {
        self.kind_name
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn open(&mut self) -> StoreResult {
        // Дети открываются лениво при чеканке.
        self.opened = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    fn close(&mut self) {
        for child in self.children.values_mut() {
            child.close();
        }
        self.opened = false;
    }

    fn handle_messages(&mut self, batch: &mut Batch) -> StoreResult {
        if !self.opened {
            self.open()?;
        }

        // Разбить по категориям, сохранив порядок внутри каждой.
        let mut groups: Vec<(String, Batch)> = Vec::new();
        for entry in batch.drain(..) {
            match groups.iter_mut().find(|(cat, _)| *cat == entry.category) {
                Some((_, group)) => group.push(entry),
                None => groups.push((entry.category.clone(), vec![entry])),
            }
        }

        let mut leftover = Batch::new();
        let mut last_err: Option<StoreError> = None;
        for (cat, mut group) in groups {
            if !self.children.contains_key(&cat) {
                let minted = self.model.copy(&cat).and_then(|mut child| {
                    child.open()?;
                    Ok(child)
                });
                match minted {
                    Ok(child) => {
                        tracing::info!(category = %cat, kind = self.kind_name, "created store for new category");
                        self.children.insert(cat.clone(), child);
                    }
                    Err(e) => {
                        self.status.set(format!(
                            "minting store for '{cat}' failed: {}",
                            e.message()
                        ));
                        tracing::error!(category = %cat, error = ?e, "minting store failed");
                        leftover.append(&mut group);
                        last_err = Some(e);
                        continue;
                    }
                }
            }

            if let Some(child) = self.children.get_mut(&cat) {
                if let Err(e) = child.handle_messages(&mut group) {
                    leftover.append(&mut group);
                    last_err = Some(e);
                }
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
        for child in self.children.values_mut() {
            child.periodic_check(now_ms);
        }
    }

    fn flush(&mut self) {
        for child in self.children.values_mut() {
            child.flush();
        }
    }

    fn copy(&self, category: &str) -> Result<Box<dyn Store>, StoreError> {
        let model = self.model.copy(self.model.category())?;
        Ok(Box::new(Self::from_model(self.kind_name, category, model)))
    }

    fn status(&self) -> String {
        if !self.status.is_empty() {
            return self.status.get();
        }
        self.children
            .values()
            .map(|c| c.status())
            .find(|s| !s.is_empty())
            .unwrap_or_default()
    }
}
