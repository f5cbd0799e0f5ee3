pub mod config;
pub mod fs;

mod bucket;
mod buffer;
mod category;
mod file;
mod framed_file;
mod multi;
mod network;
mod null;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use barge_api::{Clock, Store, StoreError};
use conn_pool::{ConnectionPool, NameResolver};

pub use bucket::BucketStore;
pub use buffer::BufferStore;
pub use category::CategoryStore;
pub use config::StoreConfig;
pub use file::FileStore;
pub use framed_file::FramedFileStore;
pub use multi::MultiStore;
pub use network::NetworkStore;
pub use null::NullStore;

// ════════════════════════════════════════════════════════════════
//  Store factory
// ════════════════════════════════════════════════════════════════

/// Общие ресурсы процесса, раздаваемые store'ам при сборке дерева:
/// инжектируемые часы, пул соединений, name-резолвер.
#[derive(Clone)]
pub struct StoreContext {
    pub clock: Arc<dyn Clock>,
    pub pool: Arc<ConnectionPool>,
    pub resolver: Arc<dyn NameResolver>,
}

/// Собрать дерево store'ов по конфигурации для одной категории.
///
/// Дерево валидируется целиком до сборки: ошибки конфигурации —
/// permanent, узел отказывается стартовать.
pub fn build_store(
    cfg: &StoreConfig,
    category: &str,
    ctx: &StoreContext,
) -> Result<Box<dyn Store>, StoreError> {
    cfg.validate()?;
    build_store_inner(cfg, category, ctx, false, false)
}

/// Рекурсивная сборка. `multi_category` — узел видит записи нескольких
/// категорий (файловые store'ы раскладываются по поддиректориям);
/// `is_buffer` — узел стоит secondary под buffer'ом (файловый store
/// переключается в режим replayable-очереди).
pub(crate) fn build_store_inner(
    cfg: &StoreConfig,
    category: &str,
    ctx: &StoreContext,
    multi_category: bool,
    is_buffer: bool,
) -> Result<Box<dyn Store>, StoreError> {
    match cfg {
        StoreConfig::File(c) => Ok(Box::new(FileStore::new(
            c.clone(),
            category,
            multi_category,
            is_buffer,
            ctx.clock.clone(),
        )?)),
        StoreConfig::FramedFile(c) => Ok(Box::new(FramedFileStore::new(
            c.clone(),
            category,
            multi_category,
            ctx.clock.clone(),
        )?)),
        StoreConfig::Network(c) => {
            Ok(Box::new(NetworkStore::new(c.clone(), category, multi_category, ctx)))
        }
        StoreConfig::Buffer(c) => Ok(Box::new(BufferStore::new(
            c.clone(),
            category,
            multi_category,
            ctx,
        )?)),
        StoreConfig::Bucket(c) => Ok(Box::new(BucketStore::new(
            c.clone(),
            category,
            multi_category,
            ctx,
        )?)),
        StoreConfig::Multi(c) => Ok(Box::new(MultiStore::new(
            c.clone(),
            category,
            multi_category,
            ctx,
        )?)),
        StoreConfig::Category(c) => {
            let model = build_store_inner(&c.model, category, ctx, true, false)?;
            Ok(Box::new(CategoryStore::from_model("category", category, model)))
        }
        StoreConfig::MultiFile(c) => {
            let model = Box::new(FileStore::new(
                c.clone(),
                category,
                true,
                false,
                ctx.clock.clone(),
            )?);
            Ok(Box::new(CategoryStore::from_model("multi_file", category, model)))
        }
        StoreConfig::FramedMultiFile(c) => {
            let model = Box::new(FramedFileStore::new(
                c.clone(),
                category,
                true,
                ctx.clock.clone(),
            )?);
            Ok(Box::new(CategoryStore::from_model(
                "framed_multi_file",
                category,
                model,
            )))
        }
        StoreConfig::Null => Ok(Box::new(NullStore::new(category))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barge_api::ManualClock;
    use conn_pool::StaticResolver;
    use tempfile::TempDir;

    fn test_ctx() -> StoreContext {
        StoreContext {
            clock: Arc::new(ManualClock::new(0)),
            pool: Arc::new(ConnectionPool::new()),
            resolver: Arc::new(StaticResolver::empty()),
        }
    }

    #[test]
    fn builds_each_kind_from_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_str().unwrap();
        let ctx = test_ctx();

        let toml_cfg = format!(
            r#"
            type = "buffer"

            [primary]
            type = "multi"
            report_success = "all"

            [[primary.stores]]
            type = "network"
            remote_host = "127.0.0.1"
            remote_port = 1463

            [[primary.stores]]
            type = "framed_file"
            file_path = "{path}"

            [secondary]
            type = "file"
            file_path = "{path}"
            "#
        );
        let cfg: StoreConfig = toml::from_str(&toml_cfg).unwrap();
        let store = build_store(&cfg, "events", &ctx).unwrap();
        assert_eq!(store.kind(), "buffer");
        assert_eq!(store.category(), "events");
    }

    #[test]
    fn invalid_tree_is_rejected_before_building() {
        let cfg: StoreConfig = toml::from_str(
            r#"
            type = "buffer"

            [primary]
            type = "null"

            [secondary]
            type = "framed_file"
            file_path = "/tmp/x"
            "#,
        )
        .unwrap();
        let err = build_store(&cfg, "events", &test_ctx()).err().unwrap();
        assert_eq!(err.kind(), barge_api::ErrorKind::Config);
    }

    #[test]
    fn category_store_kind_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_str().unwrap();
        let ctx = test_ctx();

        let cfg: StoreConfig =
            toml::from_str(&format!("type = \"multi_file\"\nfile_path = \"{path}\"")).unwrap();
        assert_eq!(build_store(&cfg, "c", &ctx).unwrap().kind(), "multi_file");

        let cfg: StoreConfig = toml::from_str(
            &format!("type = \"category\"\n[model]\ntype = \"file\"\nfile_path = \"{path}\""),
        )
        .unwrap();
        assert_eq!(build_store(&cfg, "c", &ctx).unwrap().kind(), "category");
    }
}
