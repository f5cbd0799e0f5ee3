use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use barge_api::{Batch, CivilTime, Clock, StatusSlot, Store, StoreError, StoreResult, civil_from_ms};

use crate::config::FramedFileStoreConfig;
use crate::file::{FileBase, bytes_to_pad};

// ════════════════════════════════════════════════════════════════
//  FramedFileStore
// ════════════════════════════════════════════════════════════════

/// Состояние, разделяемое с фоновым flush-воркером.
struct FramedShared {
    file: Option<Box<dyn crate::fs::LogFile>>,
    buf: Vec<u8>,
}

impl FramedShared {
    /// Записать накопленный буфер в файл. Буфер без открытого файла
    /// ждёт следующего открытия.
    fn flush_locked(&mut self, status: &StatusSlot) -> StoreResult {
        if self.buf.is_empty() {
            return Ok(());
        }
        let Some(file) = &mut self.file else {
            return Ok(());
        };
        if let Err(e) = file.write(&self.buf) {
            status.set(format!("framed flush failed: {}", e.message()));
            return Err(e);
        }
        self.buf.clear();
        let _ = file.sync();
        Ok(())
    }

    fn total_size(&self) -> u64 {
        self.file.as_ref().map(|f| f.size()).unwrap_or(0) + self.buf.len() as u64
    }
}

struct Flusher {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

/// Файловый store с length-prefixed фреймингом записей.
///
/// Та же схема имён и ротации, что у построчного store'а, но на диске
/// лежат записи `u32-BE длина || payload`, а запись идёт через буфер в
/// памяти, который фоновый воркер сбрасывает раз в `flush_frequency_ms`.
/// Не readable: как secondary под buffer'ом не годится.
pub struct FramedFileStore {
    base: FileBase,
    flush_frequency_ms: u64,
    msg_buffer_size: u64,
    shared: Arc<Mutex<FramedShared>>,
    flusher: Option<Flusher>,
}

impl FramedFileStore {
    pub(crate) fn new(
        cfg: FramedFileStoreConfig,
        category: &str,
        multi_category: bool,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            base: FileBase::new(cfg.file, category, multi_category, clock)?,
            flush_frequency_ms: cfg.flush_frequency_ms,
            msg_buffer_size: cfg.msg_buffer_size,
            shared: Arc::new(Mutex::new(FramedShared { file: None, buf: Vec::new() })),
            flusher: None,
        })
    }

    fn cfg_snapshot(&self) -> FramedFileStoreConfig {
        FramedFileStoreConfig {
            file: self.base.cfg.clone(),
            flush_frequency_ms: self.flush_frequency_ms,
            msg_buffer_size: self.msg_buffer_size,
        }
    }

    fn open_internal(&mut self, increment: bool, now: &CivilTime) -> StoreResult {
        let dir = self.base.dir();
        self.base.backend.create_dir_all(&dir).inspect_err(|e| {
            self.base.status.set(format!("create dir failed: {}", e.message()));
        })?;

        let suffix = match self.base.find_newest_suffix(now)? {
            Some(s) if increment => s + 1,
            Some(s) => s,
            None => 1,
        };
        let name = self.base.full_name(suffix, now);
        let file = self.base.backend.open_append(&dir.join(&name)).inspect_err(|e| {
            self.base.status.set(format!("open file failed: {}", e.message()));
        })?;

        self.base.current_size = file.size();
        self.base.current_suffix = suffix;
        self.base.current_filename = name.clone();
        self.base.events_written = 0;
        self.base.mark_rolled(now);
        self.shared.lock().file = Some(file);

        if self.base.cfg.create_symlink {
            let link = dir.join(self.base.symlink_name());
            if let Err(e) = self.base.backend.symlink(std::path::Path::new(&name), &link) {
                tracing::warn!(category = %self.base.category, error = ?e, "symlink update failed");
            }
        }

        self.start_flusher();
        self.base.print_stats("opened");
        tracing::info!(category = %self.base.category, file = %name, "framed file opened");
        self.base.status.clear();
        Ok(())
    }

    fn start_flusher(&mut self) {
        if self.flusher.is_some() || self.flush_frequency_ms == 0 {
            return;
        }
        let stop = Arc::new(AtomicBool::new(false));
        let shared = self.shared.clone();
        let status = self.base.status.clone();
        let category = self.base.category.clone();
        let freq = std::time::Duration::from_millis(self.flush_frequency_ms);
        let thread_stop = stop.clone();

        let handle = std::thread::Builder::new()
            .name(format!("flush-{category}"))
            .spawn(move || {
                while !thread_stop.load(Ordering::Relaxed) {
                    std::thread::sleep(freq);
                    if let Err(e) = shared.lock().flush_locked(&status) {
                        tracing::error!(category = %category, error = ?e, "background flush failed");
                    }
                }
            });

        match handle {
            Ok(handle) => self.flusher = Some(Flusher { stop, handle: Some(handle) }),
            Err(e) => {
                tracing::error!(category = %self.base.category, error = %e, "flush worker spawn failed");
            }
        }
    }

    fn stop_flusher(&mut self) {
        if let Some(mut flusher) = self.flusher.take() {
            flusher.stop.store(true, Ordering::Relaxed);
            if let Some(handle) = flusher.handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn rotate_file(&mut self, now: &CivilTime) -> StoreResult {
        {
            let mut shared = self.shared.lock();
            shared.flush_locked(&self.base.status)?;
            shared.file = None;
        }
        self.base.print_stats("rotated");
        tracing::info!(
            category = %self.base.category,
            from = %self.base.current_filename,
            "rotating framed file"
        );
        self.open_internal(true, now)
    }
}

impl Store for FramedFileStore {
    fn kind(&self) -> &'static str {
        "framed_file"
    }

    fn category(&self) -> &str {
        &self.base.category
    }

    fn open(&mut self) -> StoreResult {
        if self.is_open() {
            return Ok(());
        }
        let now = civil_from_ms(self.base.clock.now_ms());
        self.open_internal(false, &now)
    }

    fn is_open(&self) -> bool {
        self.shared.lock().file.is_some()
    }

    fn close(&mut self) {
        self.stop_flusher();
        let mut shared = self.shared.lock();
        let _ = shared.flush_locked(&self.base.status);
        if let Some(mut file) = shared.file.take() {
            let _ = file.sync();
        }
    }

    fn handle_messages(&mut self, batch: &mut Batch) -> StoreResult {
        if batch.is_empty() {
            return Ok(());
        }
        if !self.is_open() {
            self.open()?;
        }

        let now = civil_from_ms(self.base.clock.now_ms());
        let over_size = self.base.cfg.max_size > 0
            && self.shared.lock().total_size() > self.base.cfg.max_size;
        if self.base.should_rotate(&now) || over_size {
            self.rotate_file(&now)?;
        }

        let mut written = 0usize;
        let mut rejected: Option<StoreError> = None;
        {
            let mut shared = self.shared.lock();
            for entry in batch.iter() {
                let mut payload =
                    Vec::with_capacity(entry.category.len() + entry.message.len() + 1);
                if self.base.cfg.write_category {
                    payload.extend_from_slice(entry.category.as_bytes());
                    payload.push(b':');
                }
                payload.extend_from_slice(entry.message.as_bytes());

                let record_len = payload.len() as u64 + 4;
                if self.msg_buffer_size > 0 && record_len > self.msg_buffer_size {
                    self.base.status.set(format!(
                        "message of {} bytes exceeds msg_buffer_size",
                        payload.len()
                    ));
                    rejected = Some(StoreError::protocol("oversized message rejected"));
                    break;
                }

                // Запись не должна пересекать границу chunk'а; нулевой
                // padding читатель пропускает как записи нулевой длины.
                let offset = shared.total_size();
                let pad = bytes_to_pad(record_len, offset, self.base.cfg.chunk_size);
                let new_len = shared.buf.len() + pad as usize;
                shared.buf.resize(new_len, 0);
                shared
                    .buf
                    .extend_from_slice(&(payload.len() as u32).to_be_bytes());
                shared.buf.extend_from_slice(&payload);
                written += 1;
            }

            if self.msg_buffer_size > 0 && shared.buf.len() as u64 >= self.msg_buffer_size {
                shared.flush_locked(&self.base.status)?;
            }
        }

        self.base.events_written += written as u64;
        if let Some(e) = rejected {
            batch.drain(..written);
            return Err(e);
        }
        batch.clear();
        Ok(())
    }

    fn periodic_check(&mut self, now_ms: i64) {
        if !self.is_open() {
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
        if let Err(e) = self.shared.lock().flush_locked(&self.base.status) {
            tracing::error!(category = %self.base.category, error = ?e, "flush failed");
        }
    }

    fn copy(&self, category: &str) -> Result<Box<dyn Store>, StoreError> {
        Ok(Box::new(Self::new(
            self.cfg_snapshot(),
            category,
            self.base.multi_category,
            self.base.clock.clone(),
        )?))
    }

    fn status(&self) -> String {
        self.base.status.get()
    }
}

impl Drop for FramedFileStore {
    fn drop(&mut self) {
        self.stop_flusher();
    }
}
