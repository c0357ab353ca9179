//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// How a [`FileBackend`] may touch its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the file if needed and accept writes.
    ReadWrite,
    /// Require an existing file and refuse every write.
    ReadOnly,
}

#[derive(Debug)]
struct FileState {
    file: File,
    // Logical end of the data; kept here so appends never ask the OS.
    len: u64,
}

/// A file-based storage backend.
///
/// `flush()` pushes buffered bytes to the OS and `sync()` waits for them
/// to reach the disk. The file handle and its length share one lock, so
/// a read never observes a half-applied append.
///
/// # Example
///
/// ```no_run
/// use ridgedb_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("tx.log")).unwrap();
/// backend.append(b"decision").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    mode: OpenMode,
    state: Mutex<FileState>,
}

impl FileBackend {
    /// Opens or creates a file for reading and writing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_mode(path, OpenMode::ReadWrite)
    }

    /// Opens an existing file without write access.
    ///
    /// Inspection tools use this to read logs that a running database may
    /// hold open.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be read.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        Self::open_with_mode(path, OpenMode::ReadOnly)
    }

    /// Opens a file in the given mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open_with_mode(path: &Path, mode: OpenMode) -> StorageResult<Self> {
        let mut options = OpenOptions::new();
        options.read(true);
        if mode == OpenMode::ReadWrite {
            options.write(true).create(true).truncate(false);
        }
        let file = options.open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            mode,
            state: Mutex::new(FileState { file, len }),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns how the file was opened.
    #[must_use]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    #[cfg(unix)]
    fn sync_parent(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_parent(&self) -> StorageResult<()> {
        Ok(())
    }

    fn writable(&self) -> StorageResult<()> {
        match self.mode {
            OpenMode::ReadWrite => Ok(()),
            OpenMode::ReadOnly => Err(StorageError::ReadOnly {
                path: self.path.display().to_string(),
            }),
        }
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut state = self.state.lock();
        let size = state.len;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let mut buffer = vec![0u8; len];
        if len > 0 {
            state.file.seek(SeekFrom::Start(offset))?;
            state.file.read_exact(&mut buffer)?;
        }
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.writable()?;
        let state = self.state.get_mut();
        let offset = state.len;
        if !data.is_empty() {
            state.file.seek(SeekFrom::Start(offset))?;
            state.file.write_all(data)?;
            state.len += data.len() as u64;
        }
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.writable()?;
        let state = self.state.get_mut();
        if offset > state.len {
            return Err(StorageError::WriteGap {
                offset,
                size: state.len,
            });
        }
        if !data.is_empty() {
            state.file.seek(SeekFrom::Start(offset))?;
            state.file.write_all(data)?;
            state.len = state.len.max(offset + data.len() as u64);
        }
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.mode == OpenMode::ReadWrite {
            self.state.get_mut().file.flush()?;
        }
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.state.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.mode == OpenMode::ReadWrite {
            self.state.get_mut().file.sync_all()?;
        }
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.writable()?;
        let state = self.state.get_mut();
        if new_size > state.len {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: state.len,
            });
        }
        state.file.set_len(new_size)?;
        state.file.sync_all()?;
        state.len = new_size;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        self.writable()?;
        // Write-then-rename: the old file stays intact until the rename.
        let temp_path = self.temp_path();
        let mut temp = File::create(&temp_path)?;
        temp.write_all(data)?;
        temp.sync_all()?;
        drop(temp);

        fs::rename(&temp_path, &self.path)?;
        self.sync_parent()?;

        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        *self.state.get_mut() = FileState {
            file,
            len: data.len() as u64,
        };
        Ok(())
    }
}
