use std::collections::HashMap;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use store_engine::StoreConfig;

#[derive(Parser)]
#[command(name = "barge-server", about = "Демон доставки категоризованных логов")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить сервер
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Порт wire-протокола `Log`.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Порт status/admin HTTP API.
    #[serde(default = "default_status_port")]
    pub status_port: u16,
    /// Каденция periodic_check воркеров.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Потолок очереди категории в сообщениях, если дерево store'ов
    /// не задаёт свой.
    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: u64,
    /// Потолок фрейма запроса в байтах.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Таблица name-резолвера: `service → "host:port"`.
    #[serde(default)]
    pub services: HashMap<String, String>,
    #[serde(default, rename = "category")]
    pub categories: Vec<CategoryConfig>,
}

#[derive(Debug, Deserialize)]
pub struct CategoryConfig {
    /// Имя категории; `default` — шаблон для неизвестных категорий.
    pub name: String,
    pub store: StoreConfig,
}

fn default_port() -> u16 {
    1463
}
fn default_status_port() -> u16 {
    1464
}
fn default_check_interval_ms() -> u64 {
    1_000
}
fn default_max_queue_length() -> u64 {
    5_000_000
}
fn default_max_frame_size() -> usize {
    16 * 1024 * 1024
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, crate::error::ServerError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::ServerError::Config { context: "read", detail: format!("'{path}': {e}") }
        })?;
        toml::from_str(&content).map_err(|e| {
            crate::error::ServerError::Config { context: "parse", detail: format!("'{path}': {e}") }
        })
    }
}

/// Разобрать значение services-таблицы вида `host:port`.
pub fn parse_host_port(value: &str) -> Result<(String, u16), crate::error::ServerError> {
    let (host, port) = value.rsplit_once(':').ok_or_else(|| {
        crate::error::ServerError::Config {
            context: "services",
            detail: format!("'{value}': expected host:port"),
        }
    })?;
    let port = port.parse().map_err(|_| crate::error::ServerError::Config {
        context: "services",
        detail: format!("'{value}': bad port"),
    })?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_parses() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            port = 1463
            max_queue_length = 100000

            [services]
            "peers.west" = "10.0.0.7:1463"

            [[category]]
            name = "default"

            [category.store]
            type = "buffer"

            [category.store.primary]
            type = "network"
            service_name = "peers.west"

            [category.store.secondary]
            type = "file"
            file_path = "/var/spool/barge"

            [[category]]
            name = "debug"

            [category.store]
            type = "null"
            "#,
        )
        .unwrap();

        let cfg = ServerConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.port, 1463);
        assert_eq!(cfg.status_port, 1464);
        assert_eq!(cfg.categories.len(), 2);
        assert_eq!(cfg.categories[0].name, "default");
        assert_eq!(cfg.categories[0].store.kind_name(), "buffer");
        assert_eq!(cfg.categories[1].store.kind_name(), "null");
        assert_eq!(
            parse_host_port(&cfg.services["peers.west"]).unwrap(),
            ("10.0.0.7".to_string(), 1463)
        );
    }

    #[test]
    fn bad_service_entry_rejected() {
        assert!(parse_host_port("noport").is_err());
        assert!(parse_host_port("host:notanumber").is_err());
    }
}
