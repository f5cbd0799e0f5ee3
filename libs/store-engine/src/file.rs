use std::path::PathBuf;
use std::sync::Arc;

use barge_api::{Batch, CivilTime, Clock, LogEntry, StatusSlot, Store, StoreError, StoreResult, civil_from_ms};

use crate::config::{FileStoreConfig, RotatePeriod};
use crate::fs::{FileBackend, LogFile, backend_for};

/// Trailer-строка, которую пишет ротация при write_meta. Префикс
/// сохранён байт-в-байт для совместимости с существующим tooling'ом.
pub(crate) const META_PREFIX: &str = "scribe_meta<!!>:";

/// Имя файла статистики в директории store'а.
const STATS_FILE: &str = "scribe_stats";

// ════════════════════════════════════════════════════════════════
//  FileBase — имена, ротация, suffix discovery
// ════════════════════════════════════════════════════════════════
//
// Общая часть файловых store'ов: схема имён
// `{base}_{YYYY-MM-DD}_{suffix:05}`, решение "пора ли ротировать",
// поиск старейшего/новейшего файла, выравнивание по chunk'ам.

pub(crate) struct FileBase {
    pub cfg: FileStoreConfig,
    pub category: String,
    pub multi_category: bool,
    pub backend: Arc<dyn FileBackend>,
    pub clock: Arc<dyn Clock>,
    pub status: StatusSlot,

    // state текущего открытого файла
    pub current_suffix: u32,
    pub current_size: u64,
    pub current_filename: String,
    /// Час или день года открытого файла, по rotate_period.
    pub last_roll_time: u32,
    /// Сообщений записано в текущий файл (не обязательно строк).
    pub events_written: u64,
}

impl FileBase {
    pub fn new(
        cfg: FileStoreConfig,
        category: &str,
        multi_category: bool,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let backend = backend_for(&cfg.fs_type)?;
        Ok(Self {
            cfg,
            category: category.to_string(),
            multi_category,
            backend,
            clock,
            status: StatusSlot::new(),
            current_suffix: 0,
            current_size: 0,
            current_filename: String::new(),
            last_roll_time: 0,
            events_written: 0,
        })
    }

    pub fn base_filename(&self) -> &str {
        self.cfg.base_filename.as_deref().unwrap_or(&self.category)
    }

    /// Директория store'а. Multi-category store'ы держат по
    /// поддиректории на категорию, иначе дети категорий столкнулись бы
    /// на одном имени файла.
    pub fn dir(&self) -> PathBuf {
        let base = PathBuf::from(&self.cfg.file_path);
        if self.multi_category {
            base.join(&self.category)
        } else {
            base
        }
    }

    pub fn dated_base(&self, date: &CivilTime) -> String {
        format!("{}_{}", self.base_filename(), date.date_string())
    }

    pub fn full_name(&self, suffix: u32, date: &CivilTime) -> String {
        format!("{}_{:05}", self.dated_base(date), suffix)
    }

    pub fn symlink_name(&self) -> String {
        format!("{}_current", self.base_filename())
    }

    /// Разобрать имя файла этого store'а: `(дата, suffix)`.
    fn parse_name(&self, name: &str) -> Option<(String, u32)> {
        let rest = name.strip_prefix(self.base_filename())?.strip_prefix('_')?;
        if rest.len() < 10 {
            return None;
        }
        let (date, tail) = rest.split_at(10);
        let bytes = date.as_bytes();
        let date_ok = bytes[4] == b'-'
            && bytes[7] == b'-'
            && bytes
                .iter()
                .enumerate()
                .all(|(i, &b)| i == 4 || i == 7 || b.is_ascii_digit());
        if !date_ok {
            return None;
        }
        let suffix = tail.strip_prefix('_')?.parse().ok()?;
        Some((date.to_string(), suffix))
    }

    /// Наибольший suffix среди файлов данной даты.
    pub fn find_newest_suffix(&self, date: &CivilTime) -> Result<Option<u32>, StoreError> {
        let wanted = date.date_string();
        let mut newest = None;
        for name in self.backend.list_dir(&self.dir())? {
            if let Some((d, suffix)) = self.parse_name(&name) {
                if d == wanted {
                    newest = Some(newest.map_or(suffix, |n: u32| n.max(suffix)));
                }
            }
        }
        Ok(newest)
    }

    /// Старейший файл store'а: наименьший suffix самой ранней даты.
    pub fn find_oldest_file(&self) -> Result<Option<String>, StoreError> {
        let mut oldest: Option<(String, u32)> = None;
        for name in self.backend.list_dir(&self.dir())? {
            if let Some(parsed) = self.parse_name(&name) {
                if oldest.as_ref().is_none_or(|cur| parsed < *cur) {
                    oldest = Some(parsed);
                }
            }
        }
        Ok(oldest.map(|(date, suffix)| {
            format!("{}_{}_{:05}", self.base_filename(), date, suffix)
        }))
    }

    /// Пора ли ротировать по времени.
    pub fn should_rotate(&self, now: &CivilTime) -> bool {
        let past_boundary = now.hour > self.cfg.rotate_hour
            || (now.hour == self.cfg.rotate_hour && now.minute >= self.cfg.rotate_minute);
        match self.cfg.rotate_period {
            RotatePeriod::Never => false,
            RotatePeriod::Hourly => {
                now.hour != self.last_roll_time && now.minute >= self.cfg.rotate_minute
            }
            RotatePeriod::Daily => now.day_of_year != self.last_roll_time && past_boundary,
        }
    }

    pub fn mark_rolled(&mut self, now: &CivilTime) {
        self.last_roll_time = match self.cfg.rotate_period {
            RotatePeriod::Never => 0,
            RotatePeriod::Hourly => now.hour,
            RotatePeriod::Daily => now.day_of_year,
        };
    }

    /// Строка для записи: опциональный префикс категории + сообщение +
    /// опциональный '\n'.
    pub fn frame_line(&self, entry: &LogEntry) -> Vec<u8> {
        let mut line =
            Vec::with_capacity(entry.category.len() + entry.message.len() + 2);
        if self.cfg.write_category {
            line.extend_from_slice(entry.category.as_bytes());
            line.push(b':');
        }
        line.extend_from_slice(entry.message.as_bytes());
        if self.cfg.add_newlines && !entry.message.ends_with('\n') {
            line.push(b'\n');
        }
        line
    }

    /// Одна человекочитаемая строка в `scribe_stats` на открытие/ротацию.
    pub fn print_stats(&self, event: &str) {
        let now = civil_from_ms(self.clock.now_ms());
        let line = format!(
            "{} {:02}:{:02}:{:02} [{}] {} {} events_written={}\n",
            now.date_string(),
            now.hour,
            now.minute,
            now.second,
            self.category,
            event,
            self.current_filename,
            self.events_written,
        );
        let path = self.dir().join(STATS_FILE);
        match self.backend.open_append(&path) {
            Ok(mut f) => {
                if let Err(e) = f.write(line.as_bytes()) {
                    tracing::debug!(category = %self.category, error = ?e, "stats write failed");
                }
            }
            Err(e) => {
                tracing::debug!(category = %self.category, error = ?e, "stats open failed");
            }
        }
    }
}

/// Сколько null-байт вставить перед сообщением, чтобы оно не пересекло
/// границу chunk'а. Сообщение длиннее chunk'а пишется без выравнивания.
pub(crate) fn bytes_to_pad(msg_len: u64, offset: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 || msg_len > chunk_size {
        return 0;
    }
    let space = chunk_size - offset % chunk_size;
    if msg_len > space { space } else { 0 }
}

// ════════════════════════════════════════════════════════════════
//  FileStore
// ════════════════════════════════════════════════════════════════

/// Построчный файловый store с ротацией.
///
/// Вторая роль — replayable-очередь: когда store стоит secondary под
/// buffer'ом, read-side операции читают/удаляют/перезаписывают
/// старейший файл как единицу буфера.
pub struct FileStore {
    base: FileBase,
    /// Secondary под buffer-store'ом: ротация по времени выключена,
    /// newline-разделители включены, чтобы буфер replay'ился построчно.
    is_buffer: bool,
    write_file: Option<Box<dyn LogFile>>,
}

impl FileStore {
    pub(crate) fn new(
        mut cfg: FileStoreConfig,
        category: &str,
        multi_category: bool,
        is_buffer: bool,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        if is_buffer {
            cfg.rotate_period = RotatePeriod::Never;
            cfg.add_newlines = true;
            if multi_category {
                cfg.write_category = true;
            }
        }
        Ok(Self {
            base: FileBase::new(cfg, category, multi_category, clock)?,
            is_buffer,
            write_file: None,
        })
    }

    fn clone_for(&self, category: &str) -> Self {
        Self {
            base: FileBase {
                cfg: self.base.cfg.clone(),
                category: category.to_string(),
                multi_category: self.base.multi_category,
                backend: self.base.backend.clone(),
                clock: self.base.clock.clone(),
                status: StatusSlot::new(),
                current_suffix: 0,
                current_size: 0,
                current_filename: String::new(),
                last_roll_time: 0,
                events_written: 0,
            },
            is_buffer: self.is_buffer,
            write_file: None,
        }
    }

    fn open_internal(&mut self, increment: bool, now: &CivilTime) -> StoreResult {
        let dir = self.base.dir();
        self.base.backend.create_dir_all(&dir).inspect_err(|e| {
            self.base.status.set(format!("create dir failed: {}", e.message()));
        })?;

        let newest = self.base.find_newest_suffix(now)?;
        let suffix = match newest {
            Some(s) if increment => s + 1,
            Some(s) => s,
            None => 1,
        };
        let name = self.base.full_name(suffix, now);
        let path = dir.join(&name);

        let file = self.base.backend.open_append(&path).inspect_err(|e| {
            self.base.status.set(format!("open file failed: {}", e.message()));
        })?;

        self.base.current_size = file.size();
        self.base.current_suffix = suffix;
        self.base.current_filename = name.clone();
        self.base.events_written = 0;
        self.base.mark_rolled(now);
        self.write_file = Some(file);

        if self.base.cfg.create_symlink {
            let link = dir.join(self.base.symlink_name());
            if let Err(e) = self.base.backend.symlink(std::path::Path::new(&name), &link) {
                tracing::warn!(category = %self.base.category, error = ?e, "symlink update failed");
            }
        }

        self.base.print_stats("opened");
        tracing::info!(category = %self.base.category, file = %name, "file opened");
        self.base.status.clear();
        Ok(())
    }

    fn rotate_file(&mut self, now: &CivilTime) -> StoreResult {
        // Предсказать имя следующего файла для meta-trailer'а.
        let next_name = {
            let same_day = self
                .base
                .parse_name(&self.base.current_filename)
                .map(|(date, _)| date == now.date_string())
                .unwrap_or(false);
            if same_day {
                self.base.full_name(self.base.current_suffix + 1, now)
            } else {
                self.base.full_name(1, now)
            }
        };

        if let Some(file) = &mut self.write_file {
            if self.base.cfg.write_meta {
                let meta = format!("{META_PREFIX}{next_name}\n");
                let pad = bytes_to_pad(
                    meta.len() as u64,
                    self.base.current_size,
                    self.base.cfg.chunk_size,
                );
                let mut buf = vec![0u8; pad as usize];
                buf.extend_from_slice(meta.as_bytes());
                file.write(&buf).inspect_err(|e| {
                    self.base.status.set(format!("meta write failed: {}", e.message()));
                })?;
                self.base.current_size += buf.len() as u64;
            }
            let _ = file.sync();
        }

        self.base.print_stats("rotated");
        tracing::info!(
            category = %self.base.category,
            from = %self.base.current_filename,
            to = %next_name,
            "rotating file"
        );
        self.write_file = None;
        self.open_internal(true, now)
    }

    /// Записать batch, с ротацией по размеру посреди batch'а при
    /// необходимости. Возвращает число полностью записанных сообщений;
    /// при ошибке записанный префикс уже на диске.
    fn write_messages(&mut self, batch: &Batch) -> Result<usize, (usize, StoreError)> {
        let mut written = 0usize;
        let mut pending: Vec<u8> = Vec::new();
        let mut pending_msgs = 0usize;

        for entry in batch {
            let line = self.base.frame_line(entry);

            let offset = self.base.current_size + pending.len() as u64;
            if self.base.cfg.max_size > 0
                && offset > 0
                && offset + line.len() as u64 > self.base.cfg.max_size
            {
                self.flush_pending(&mut pending, &mut pending_msgs, &mut written)?;
                let now = civil_from_ms(self.base.clock.now_ms());
                self.rotate_file(&now).map_err(|e| (written, e))?;
            }

            let pad = bytes_to_pad(
                line.len() as u64,
                self.base.current_size + pending.len() as u64,
                self.base.cfg.chunk_size,
            );
            pending.resize(pending.len() + pad as usize, 0);
            pending.extend_from_slice(&line);
            pending_msgs += 1;
        }

        self.flush_pending(&mut pending, &mut pending_msgs, &mut written)?;
        Ok(written)
    }

    fn flush_pending(
        &mut self,
        pending: &mut Vec<u8>,
        pending_msgs: &mut usize,
        written: &mut usize,
    ) -> Result<(), (usize, StoreError)> {
        if pending.is_empty() {
            return Ok(());
        }
        let Some(file) = &mut self.write_file else {
            return Err((*written, StoreError::closed("write file is not open")));
        };
        if let Err(e) = file.write(pending) {
            self.base.status.set(format!("file write failed: {}", e.message()));
            tracing::error!(category = %self.base.category, error = ?e, "file write failed");
            return Err((*written, e));
        }
        self.base.current_size += pending.len() as u64;
        self.base.events_written += *pending_msgs as u64;
        *written += *pending_msgs;
        pending.clear();
        *pending_msgs = 0;
        Ok(())
    }

    fn oldest_path(&self) -> Result<Option<(String, PathBuf)>, StoreError> {
        Ok(self
            .base
            .find_oldest_file()?
            .map(|name| (name.clone(), self.base.dir().join(name))))
    }

    /// Разобрать содержимое буферного файла обратно в записи.
    fn parse_buffer_file(&self, bytes: &[u8], out: &mut Batch) {
        let mut i = 0usize;
        while i < bytes.len() {
            if bytes[i] == 0 {
                // chunk padding
                i += 1;
                continue;
            }
            let end = bytes[i..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|p| i + p)
                .unwrap_or(bytes.len());
            let line = &bytes[i..end];
            i = end + 1;

            if line.is_empty() || line.starts_with(META_PREFIX.as_bytes()) {
                continue;
            }

            let (category, message) = if self.base.cfg.write_category {
                match line.iter().position(|&b| b == b':') {
                    Some(pos) => (
                        String::from_utf8_lossy(&line[..pos]).into_owned(),
                        String::from_utf8_lossy(&line[pos + 1..]).into_owned(),
                    ),
                    None => (
                        self.base.category.clone(),
                        String::from_utf8_lossy(line).into_owned(),
                    ),
                }
            } else {
                (
                    self.base.category.clone(),
                    String::from_utf8_lossy(line).into_owned(),
                )
            };
            out.push(LogEntry { category, message });
        }
    }
}

impl Store for FileStore {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn category(&self) -> &str {
        &self.base.category
    }

    fn open(&mut self) -> StoreResult {
        if self.write_file.is_some() {
            return Ok(());
        }
        let now = civil_from_ms(self.base.clock.now_ms());
        self.open_internal(false, &now)
    }

    fn is_open(&self) -> bool {
        self.write_file.is_some()
    }

    fn close(&mut self) {
        if let Some(mut file) = self.write_file.take() {
            let _ = file.sync();
            tracing::debug!(category = %self.base.category, file = %self.base.current_filename, "file closed");
        }
    }

    fn handle_messages(&mut self, batch: &mut Batch) -> StoreResult {
        if batch.is_empty() {
            return Ok(());
        }
        if self.write_file.is_none() {
            self.open()?;
        }

        let now = civil_from_ms(self.base.clock.now_ms());
        if self.base.should_rotate(&now) {
            self.rotate_file(&now)?;
        }

        match self.write_messages(batch) {
            Ok(_) => {
                batch.clear();
                Ok(())
            }
            Err((written, e)) => {
                // Записанный префикс уже на диске; в batch'е остаётся хвост.
                batch.drain(..written);
                Err(e)
            }
        }
    }

    fn periodic_check(&mut self, now_ms: i64) {
        if self.write_file.is_none() {
            return;
        }
        let now = civil_from_ms(now_ms);
        if self.base.should_rotate(&now) {
            if let Err(e) = self.rotate_file(&now) {
                tracing::error!(category = %self.base.category, error = ?e, "rotation failed");
            }
        }
    }

    fn flush(&mut self) {
        if let Some(file) = &mut self.write_file {
            if let Err(e) = file.sync() {
                self.base.status.set(format!("fsync failed: {}", e.message()));
            }
        }
    }

    fn copy(&self, category: &str) -> Result<Box<dyn Store>, StoreError> {
        Ok(Box::new(self.clone_for(category)))
    }

    fn status(&self) -> String {
        self.base.status.get()
    }

    // ── Read side: store как replayable-очередь ──

    fn read_oldest(&mut self, out: &mut Batch, _now_ms: i64) -> StoreResult {
        let Some((_, path)) = self.oldest_path()? else {
            return Ok(());
        };
        let bytes = self.base.backend.read_whole(&path).inspect_err(|e| {
            self.base.status.set(format!("buffer read failed: {}", e.message()));
        })?;
        self.parse_buffer_file(&bytes, out);
        Ok(())
    }

    fn replace_oldest(&mut self, batch: &mut Batch, _now_ms: i64) -> StoreResult {
        let Some((name, path)) = self.oldest_path()? else {
            tracing::warn!(category = %self.base.category, "replace_oldest with no buffer files");
            return Ok(());
        };

        let mut buf = Vec::new();
        for entry in batch.iter() {
            let line = self.base.frame_line(entry);
            let pad = bytes_to_pad(line.len() as u64, buf.len() as u64, self.base.cfg.chunk_size);
            buf.resize(buf.len() + pad as usize, 0);
            buf.extend_from_slice(&line);
        }

        let mut file = self.base.backend.open_truncate(&path).inspect_err(|e| {
            self.base.status.set(format!("buffer rewrite failed: {}", e.message()));
        })?;
        file.write(&buf)?;
        let _ = file.sync();

        if name == self.base.current_filename {
            // Текущий файл записи переписан под нами — переоткрыться.
            self.write_file = None;
        }
        batch.clear();
        Ok(())
    }

    fn delete_oldest(&mut self, _now_ms: i64) -> StoreResult {
        let Some((name, path)) = self.oldest_path()? else {
            return Ok(());
        };
        self.base.backend.unlink(&path).inspect_err(|e| {
            self.base.status.set(format!("buffer delete failed: {}", e.message()));
        })?;
        if name == self.base.current_filename {
            self.write_file = None;
            self.base.current_filename.clear();
        }
        tracing::debug!(category = %self.base.category, file = %name, "buffer unit deleted");
        Ok(())
    }

    fn empty(&self, _now_ms: i64) -> bool {
        let names = match self.base.backend.list_dir(&self.base.dir()) {
            Ok(names) => names,
            Err(_) => return true,
        };
        for name in names {
            if self.base.parse_name(&name).is_some() {
                match self.base.backend.file_size(&self.base.dir().join(&name)) {
                    Ok(0) => {}
                    Ok(_) => return false,
                    Err(_) => {}
                }
            }
        }
        true
    }
}
