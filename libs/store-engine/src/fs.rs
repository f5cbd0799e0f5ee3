use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use barge_api::StoreError;

// ════════════════════════════════════════════════════════════════
//  File backend — узкий интерфейс к файловой системе
// ════════════════════════════════════════════════════════════════
//
// Файловые store'ы не трогают std::fs напрямую: всё идёт через этот
// интерфейс, выбираемый опцией `fs_type`. Встроен локальный POSIX
// backend; это seam для distributed-FS варианта.

/// Открытый на запись лог-файл.
pub trait LogFile: Send {
    fn write(&mut self, data: &[u8]) -> Result<(), StoreError>;
    fn sync(&mut self) -> Result<(), StoreError>;
    /// Текущий размер файла в байтах.
    fn size(&self) -> u64;
}

/// Операции над директорией лог-файлов.
pub trait FileBackend: Send + Sync {
    fn create_dir_all(&self, dir: &Path) -> Result<(), StoreError>;
    fn open_append(&self, path: &Path) -> Result<Box<dyn LogFile>, StoreError>;
    fn open_truncate(&self, path: &Path) -> Result<Box<dyn LogFile>, StoreError>;
    fn read_whole(&self, path: &Path) -> Result<Vec<u8>, StoreError>;
    /// Имена файлов в директории. Отсутствующая директория — пустой список.
    fn list_dir(&self, dir: &Path) -> Result<Vec<String>, StoreError>;
    fn unlink(&self, path: &Path) -> Result<(), StoreError>;
    fn file_size(&self, path: &Path) -> Result<u64, StoreError>;
    /// Пересоздать symlink `link → target`. На платформах без symlink'ов — no-op.
    fn symlink(&self, target: &Path, link: &Path) -> Result<(), StoreError>;
}

/// Выбрать backend по `fs_type` из конфигурации.
pub fn backend_for(fs_type: &str) -> Result<Arc<dyn FileBackend>, StoreError> {
    match fs_type {
        "std" => Ok(Arc::new(StdBackend)),
        other => Err(StoreError::config(format!("unknown fs_type '{other}'"))),
    }
}

// ════════════════════════════════════════════════════════════════
//  Std backend
// ════════════════════════════════════════════════════════════════

pub struct StdBackend;

struct StdLogFile {
    file: File,
    path: PathBuf,
    size: u64,
}

impl LogFile for StdLogFile {
    fn write(&mut self, data: &[u8]) -> Result<(), StoreError> {
        self.file
            .write_all(data)
            .map_err(|e| StoreError::io(format!("write {}: {e}", self.path.display())))?;
        self.size += data.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        self.file
            .sync_data()
            .map_err(|e| StoreError::io(format!("fsync {}: {e}", self.path.display())))
    }

    fn size(&self) -> u64 {
        self.size
    }
}

impl StdBackend {
    fn open_with(
        &self,
        path: &Path,
        opts: &OpenOptions,
    ) -> Result<Box<dyn LogFile>, StoreError> {
        let file = opts
            .open(path)
            .map_err(|e| StoreError::io(format!("open {}: {e}", path.display())))?;
        let size = file
            .metadata()
            .map_err(|e| StoreError::io(format!("stat {}: {e}", path.display())))?
            .len();
        Ok(Box::new(StdLogFile {
            file,
            path: path.to_path_buf(),
            size,
        }))
    }
}

impl FileBackend for StdBackend {
    fn create_dir_all(&self, dir: &Path) -> Result<(), StoreError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| StoreError::io(format!("mkdir {}: {e}", dir.display())))
    }

    fn open_append(&self, path: &Path) -> Result<Box<dyn LogFile>, StoreError> {
        self.open_with(path, OpenOptions::new().create(true).append(true))
    }

    fn open_truncate(&self, path: &Path) -> Result<Box<dyn LogFile>, StoreError> {
        self.open_with(path, OpenOptions::new().create(true).write(true).truncate(true))
    }

    fn read_whole(&self, path: &Path) -> Result<Vec<u8>, StoreError> {
        std::fs::read(path).map_err(|e| StoreError::io(format!("read {}: {e}", path.display())))
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<String>, StoreError> {
        let rd = match std::fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(format!("list {}: {e}", dir.display()))),
        };
        let mut names = Vec::new();
        for entry in rd {
            let entry =
                entry.map_err(|e| StoreError::io(format!("list {}: {e}", dir.display())))?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn unlink(&self, path: &Path) -> Result<(), StoreError> {
        std::fs::remove_file(path)
            .map_err(|e| StoreError::io(format!("unlink {}: {e}", path.display())))
    }

    fn file_size(&self, path: &Path) -> Result<u64, StoreError> {
        Ok(std::fs::metadata(path)
            .map_err(|e| StoreError::io(format!("stat {}: {e}", path.display())))?
            .len())
    }

    #[cfg(unix)]
    fn symlink(&self, target: &Path, link: &Path) -> Result<(), StoreError> {
        let _ = std::fs::remove_file(link);
        std::os::unix::fs::symlink(target, link)
            .map_err(|e| StoreError::io(format!("symlink {}: {e}", link.display())))
    }

    #[cfg(not(unix))]
    fn symlink(&self, _target: &Path, link: &Path) -> Result<(), StoreError> {
        tracing::debug!(link = %link.display(), "symlinks not supported on this platform");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_tracks_size() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log");
        let backend = StdBackend;

        let mut f = backend.open_append(&path).unwrap();
        assert_eq!(f.size(), 0);
        f.write(b"hello").unwrap();
        f.write(b" world").unwrap();
        assert_eq!(f.size(), 11);
        f.sync().unwrap();
        drop(f);

        // Повторное открытие видит существующий размер.
        let f = backend.open_append(&path).unwrap();
        assert_eq!(f.size(), 11);
        assert_eq!(backend.read_whole(&path).unwrap(), b"hello world");
    }

    #[test]
    fn list_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let backend = StdBackend;
        let names = backend.list_dir(&tmp.path().join("nope")).unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn truncate_replaces_contents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log");
        let backend = StdBackend;

        backend.open_append(&path).unwrap().write(b"old data").unwrap();
        let mut f = backend.open_truncate(&path).unwrap();
        assert_eq!(f.size(), 0);
        f.write(b"new").unwrap();
        drop(f);
        assert_eq!(backend.read_whole(&path).unwrap(), b"new");
    }

    #[test]
    fn unknown_fs_type_is_config_error() {
        let err = backend_for("hdfs").err().unwrap();
        assert_eq!(err.kind(), barge_api::ErrorKind::Config);
        assert!(backend_for("std").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_points_at_target() {
        let tmp = TempDir::new().unwrap();
        let backend = StdBackend;
        let target = tmp.path().join("file_a");
        std::fs::write(&target, b"x").unwrap();

        let link = tmp.path().join("current");
        backend.symlink(Path::new("file_a"), &link).unwrap();
        // Пересоздание на новый target не падает.
        backend.symlink(Path::new("file_a"), &link).unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), Path::new("file_a"));
    }
}
