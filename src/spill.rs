//! File-backed swap stores.

use crate::error::FillError;
use crate::virtualization::{StoreHandle, SwapStore};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(0);

fn store_prefix(kind: &str) -> String {
    let id = NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed);
    format!("reportfill_{kind}_{}_{id}", std::process::id())
}

/// One file per stored page inside a directory.
pub struct SpillStore {
    dir: PathBuf,
    prefix: String,
    next: u64,
    files: u64,
    bytes: u64,
    live: HashMap<StoreHandle, PathBuf>,
}

impl SpillStore {
    pub fn new(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            prefix: store_prefix("page"),
            next: 0,
            files: 0,
            bytes: 0,
            live: HashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written and bytes spilled since creation.
    pub fn metrics(&self) -> (u64, u64) {
        (self.files, self.bytes)
    }
}

impl SwapStore for SpillStore {
    fn store(&mut self, bytes: &[u8]) -> Result<StoreHandle, FillError> {
        let id = self.next;
        self.next += 1;
        let path = self.dir.join(format!("{}_{id}.bin", self.prefix));
        let mut file = File::create(&path)?;
        file.write_all(bytes)?;
        file.sync_data()?;
        self.files += 1;
        self.bytes += bytes.len() as u64;
        let handle = StoreHandle(id);
        self.live.insert(handle, path);
        Ok(handle)
    }

    fn load(&mut self, handle: StoreHandle) -> Result<Vec<u8>, FillError> {
        let path = self
            .live
            .get(&handle)
            .ok_or(FillError::UnknownHandle(handle.0))?;
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn discard(&mut self, handle: StoreHandle) -> Result<(), FillError> {
        if let Some(path) = self.live.remove(&handle) {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn dispose(&mut self) -> Result<(), FillError> {
        let mut first_error = None;
        for (_, path) in self.live.drain() {
            if let Err(err) = fs::remove_file(&path) {
                log::warn!("failed to remove spill file {}: {err}", path.display());
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Extent {
    offset: u64,
    len: u64,
}

/// A single append-only swap file. Discarded extents are not reclaimed until
/// the file is disposed.
pub struct SwapFileStore {
    path: PathBuf,
    file: Option<File>,
    end: u64,
    next: u64,
    extents: HashMap<StoreHandle, Extent>,
}

impl SwapFileStore {
    /// Creates a fresh swap file inside `dir`.
    pub fn create_in(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.swap", store_prefix("swap")));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Some(file),
            end: 0,
            next: 0,
            extents: HashMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes appended so far, including discarded extents.
    pub fn file_len(&self) -> u64 {
        self.end
    }

    fn file(&mut self) -> Result<&mut File, FillError> {
        self.file.as_mut().ok_or(FillError::StoreDisposed)
    }
}

impl SwapStore for SwapFileStore {
    fn store(&mut self, bytes: &[u8]) -> Result<StoreHandle, FillError> {
        let offset = self.end;
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        let len = bytes.len() as u64;
        self.end += len;
        let handle = StoreHandle(self.next);
        self.next += 1;
        self.extents.insert(handle, Extent { offset, len });
        Ok(handle)
    }

    fn load(&mut self, handle: StoreHandle) -> Result<Vec<u8>, FillError> {
        let extent = *self
            .extents
            .get(&handle)
            .ok_or(FillError::UnknownHandle(handle.0))?;
        let len = usize::try_from(extent.len)
            .map_err(|_| FillError::UnknownHandle(handle.0))?;
        let file = self.file()?;
        file.seek(SeekFrom::Start(extent.offset))?;
        let mut bytes = vec![0u8; len];
        file.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn discard(&mut self, handle: StoreHandle) -> Result<(), FillError> {
        self.extents.remove(&handle);
        Ok(())
    }

    fn dispose(&mut self) -> Result<(), FillError> {
        self.extents.clear();
        if self.file.take().is_some() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
