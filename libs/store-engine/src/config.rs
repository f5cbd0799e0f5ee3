use serde::Deserialize;

use barge_api::StoreError;

// ════════════════════════════════════════════════════════════════
//  Store configuration tree
// ════════════════════════════════════════════════════════════════
//
// Конфигурация — рекурсивное дерево типизированных блоков: каждый блок
// называет `type` store'а и его опции; композитные store'ы вкладывают
// дочерние блоки (primary/secondary, bucket, stores, model). TOML:
//
//   [category.store]
//   type = "buffer"
//   retry_interval = 120
//
//   [category.store.primary]
//   type = "network"
//   remote_host = "10.0.0.7"
//   remote_port = 1463
//
//   [category.store.secondary]
//   type = "file"
//   file_path = "/var/spool/barge"

/// Один блок конфигурации store'а.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    File(FileStoreConfig),
    FramedFile(FramedFileStoreConfig),
    Network(NetworkStoreConfig),
    Buffer(BufferStoreConfig),
    Bucket(BucketStoreConfig),
    Multi(MultiStoreConfig),
    Category(CategoryStoreConfig),
    MultiFile(FileStoreConfig),
    FramedMultiFile(FramedFileStoreConfig),
    Null,
}

impl StoreConfig {
    pub fn kind_name(&self) -> &'static str {
        match self {
            StoreConfig::File(_) => "file",
            StoreConfig::FramedFile(_) => "framed_file",
            StoreConfig::Network(_) => "network",
            StoreConfig::Buffer(_) => "buffer",
            StoreConfig::Bucket(_) => "bucket",
            StoreConfig::Multi(_) => "multi",
            StoreConfig::Category(_) => "category",
            StoreConfig::MultiFile(_) => "multi_file",
            StoreConfig::FramedMultiFile(_) => "framed_multi_file",
            StoreConfig::Null => "null",
        }
    }

    /// Может ли store этого типа служить читаемым буфером.
    pub fn is_readable(&self) -> bool {
        matches!(self, StoreConfig::File(_) | StoreConfig::Null)
    }

    /// Лимит очереди категории, если корень задаёт его (buffer store).
    pub fn max_queue_length(&self) -> Option<u64> {
        match self {
            StoreConfig::Buffer(c) => Some(c.max_queue_length),
            _ => None,
        }
    }

    /// Рекурсивная проверка дерева. Ошибки конфигурации — permanent:
    /// узел отказывается стартовать.
    pub fn validate(&self) -> Result<(), StoreError> {
        match self {
            StoreConfig::File(c) | StoreConfig::MultiFile(c) => c.validate(),
            StoreConfig::FramedFile(c) | StoreConfig::FramedMultiFile(c) => c.validate(),
            StoreConfig::Network(c) => c.validate(),
            StoreConfig::Buffer(c) => {
                if !c.secondary.is_readable() {
                    return Err(StoreError::config(format!(
                        "buffer secondary must be a readable store, got '{}'",
                        c.secondary.kind_name()
                    )));
                }
                c.primary.validate()?;
                c.secondary.validate()
            }
            StoreConfig::Bucket(c) => {
                if c.num_buckets == 0 {
                    return Err(StoreError::config("bucket store needs num_buckets >= 1"));
                }
                if c.delimiter.len() != 1 {
                    return Err(StoreError::config(format!(
                        "delimiter must be a single character, got {:?}",
                        c.delimiter
                    )));
                }
                c.bucket.validate()?;
                if let Some(b0) = &c.bucket0 {
                    b0.validate()?;
                }
                Ok(())
            }
            StoreConfig::Multi(c) => {
                if c.stores.is_empty() {
                    return Err(StoreError::config("multi store needs at least one child"));
                }
                for s in &c.stores {
                    s.validate()?;
                }
                Ok(())
            }
            StoreConfig::Category(c) => c.model.validate(),
            StoreConfig::Null => Ok(()),
        }
    }
}

// ── File ──

/// Период временнОй ротации файлов.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotatePeriod {
    #[default]
    Never,
    Hourly,
    Daily,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FileStoreConfig {
    /// Директория с выходными файлами.
    pub file_path: String,
    /// Префикс имени файла; по умолчанию — имя категории.
    #[serde(default)]
    pub base_filename: Option<String>,
    /// Ротация по размеру: закрыть файл после этого числа байт.
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    #[serde(default)]
    pub rotate_period: RotatePeriod,
    /// Граница внутри периода ротации.
    #[serde(default = "default_rotate_hour")]
    pub rotate_hour: u32,
    #[serde(default = "default_rotate_minute")]
    pub rotate_minute: u32,
    /// Выравнивание по chunk'ам, 0 = выключено.
    #[serde(default)]
    pub chunk_size: u64,
    /// При ротации дописать trailer с именем следующего файла.
    #[serde(default)]
    pub write_meta: bool,
    /// Префиксовать каждую строку `category:`.
    #[serde(default)]
    pub write_category: bool,
    /// Дописывать '\n' к сообщению, если его нет.
    #[serde(default)]
    pub add_newlines: bool,
    /// Поддерживать symlink `{base}_current` на новейший файл.
    #[serde(default = "default_true")]
    pub create_symlink: bool,
    /// Файловый backend: "std" (локальный POSIX), ...
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
}

impl FileStoreConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.file_path.is_empty() {
            return Err(StoreError::config("file store needs file_path"));
        }
        if self.rotate_hour > 23 {
            return Err(StoreError::config(format!(
                "rotate_hour out of range: {}",
                self.rotate_hour
            )));
        }
        if self.rotate_minute > 59 {
            return Err(StoreError::config(format!(
                "rotate_minute out of range: {}",
                self.rotate_minute
            )));
        }
        Ok(())
    }
}

// ── Framed file ──

#[derive(Clone, Debug, Deserialize)]
pub struct FramedFileStoreConfig {
    #[serde(flatten)]
    pub file: FileStoreConfig,
    /// Период фонового flush'а буфера записи на диск.
    #[serde(default = "default_flush_frequency_ms")]
    pub flush_frequency_ms: u64,
    /// Потолок буфера записи в байтах, 0 = без лимита. Сообщение
    /// длиннее буфера отвергается.
    #[serde(default)]
    pub msg_buffer_size: u64,
}

impl FramedFileStoreConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        self.file.validate()
    }
}

// ── Network ──

#[derive(Clone, Debug, Deserialize)]
pub struct NetworkStoreConfig {
    #[serde(default)]
    pub remote_host: String,
    #[serde(default)]
    pub remote_port: u16,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Делить соединение с другими store'ами через общий пул.
    #[serde(default = "default_true")]
    pub use_conn_pool: bool,
    /// Имя сервиса для name-резолвера вместо явного host:port.
    #[serde(default)]
    pub service_name: Option<String>,
}

impl NetworkStoreConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        let has_addr = !self.remote_host.is_empty() && self.remote_port != 0;
        if self.service_name.is_none() && !has_addr {
            return Err(StoreError::config(
                "network store needs remote_host + remote_port or service_name",
            ));
        }
        Ok(())
    }
}

// ── Buffer ──

#[derive(Clone, Debug, Deserialize)]
pub struct BufferStoreConfig {
    pub primary: Box<StoreConfig>,
    /// Дисковый fallback; обязан быть readable.
    pub secondary: Box<StoreConfig>,
    /// Потолок сообщений в памяти (очередь категории), дальше — drop.
    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: u64,
    /// Сколько буферных файлов сливать за один periodic_check.
    #[serde(default = "default_buffer_send_rate")]
    pub buffer_send_rate: u32,
    /// Средний интервал между попытками открыть primary, секунды.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,
    /// Окно джиттера вокруг retry_interval, секунды.
    #[serde(default = "default_retry_interval_range")]
    pub retry_interval_range: u64,
    /// Сливать ли secondary при старте, если в нём остались данные.
    #[serde(default = "default_true")]
    pub replay_buffer: bool,
}

// ── Bucket ──

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketType {
    /// Legacy-формат: номер bucket'а — целое в фиксированной позиции ключа.
    ContextLog,
    /// Стабильный 64-битный хеш ключа.
    KeyHash,
    /// Ключ — целое, берётся по модулю.
    KeyModulo,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BucketStoreConfig {
    pub bucket_type: BucketType,
    /// Разделитель ключа и остатка сообщения.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Пересылать остаток сообщения вместо целого.
    #[serde(default)]
    pub remove_key: bool,
    pub num_buckets: u32,
    /// Шаблон дочернего store'а (bucket'ы 1..N).
    pub bucket: Box<StoreConfig>,
    /// Отдельный шаблон для bucket 0 (не-bucketizable сообщения).
    #[serde(default)]
    pub bucket0: Option<Box<StoreConfig>>,
}

// ── Multi ──

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSuccess {
    /// Успех, если принял хотя бы один ребёнок.
    #[default]
    Any,
    /// Успех, только если приняли все.
    All,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MultiStoreConfig {
    #[serde(default)]
    pub report_success: ReportSuccess,
    pub stores: Vec<StoreConfig>,
}

// ── Category ──

#[derive(Clone, Debug, Deserialize)]
pub struct CategoryStoreConfig {
    /// Модель: шаблон, из которого copy() чеканит store на категорию.
    pub model: Box<StoreConfig>,
}

// ── Defaults ──

fn default_true() -> bool {
    true
}
fn default_max_size() -> u64 {
    1_000_000_000
}
fn default_rotate_hour() -> u32 {
    1
}
fn default_rotate_minute() -> u32 {
    15
}
fn default_fs_type() -> String {
    "std".to_string()
}
fn default_flush_frequency_ms() -> u64 {
    1_000
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_max_queue_length() -> u64 {
    2_000_000
}
fn default_buffer_send_rate() -> u32 {
    1
}
fn default_retry_interval() -> u64 {
    300
}
fn default_retry_interval_range() -> u64 {
    60
}
fn default_delimiter() -> String {
    ":".to_string()
}
