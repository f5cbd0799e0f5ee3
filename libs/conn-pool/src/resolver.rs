use std::collections::HashMap;

use barge_api::StoreError;

// ════════════════════════════════════════════════════════════════
//  Name resolution
// ════════════════════════════════════════════════════════════════

/// Резолвер имени сервиса в адрес peer-демона.
///
/// Сетевой store может указывать либо явный host:port, либо имя
/// сервиса; во втором случае адрес даёт резолвер. Это pluggable seam
/// для интеграции с внешним service discovery — встроена только
/// статическая таблица.
pub trait NameResolver: Send + Sync {
    fn resolve(&self, service: &str) -> Result<(String, u16), StoreError>;
}

/// Статическая таблица `service → (host, port)` из конфигурации.
pub struct StaticResolver {
    services: HashMap<String, (String, u16)>,
}

impl StaticResolver {
    pub fn new(services: HashMap<String, (String, u16)>) -> Self {
        Self { services }
    }

    pub fn empty() -> Self {
        Self { services: HashMap::new() }
    }
}

impl NameResolver for StaticResolver {
    fn resolve(&self, service: &str) -> Result<(String, u16), StoreError> {
        self.services
            .get(service)
            .cloned()
            .ok_or_else(|| {
                StoreError::config(format!("no resolver entry for service '{service}'"))
            })
    }
}
