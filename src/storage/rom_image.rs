// ROM images: read a cartridge file into one contiguous, shared,
// read-only buffer drawn from the ROM memory pool (PSRAM on the device).

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::latch::InitLatch;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("ROM file {path} does not exist or cannot be opened")]
    NotFound { path: PathBuf },
    #[error("cannot allocate {requested} bytes for ROM (pool holds {capacity})")]
    OutOfMemory { requested: u64, capacity: usize },
    #[error("reading {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A loaded cartridge. Cloning shares the same bytes; the emulation core
/// reads straight from this region.
#[derive(Debug, Clone)]
pub struct RomImage {
    path: PathBuf,
    bytes: Arc<[u8]>,
    md5: String,
}

impl RomImage {
    pub fn new(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        let md5 = format!("{:x}", md5::compute(&bytes));
        Self {
            path: path.into(),
            bytes: bytes.into(),
            md5,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lowercase hex MD5 of the image, used as its identity in logs.
    pub fn md5(&self) -> &str {
        &self.md5
    }

    /// True when both handles point at the same buffer.
    pub fn same_buffer(&self, other: &RomImage) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

/// Holds at most one loaded image and enforces the pool capacity.
#[derive(Debug)]
pub struct RomStore {
    capacity: usize,
    current: Mutex<Option<RomImage>>,
    latch: InitLatch,
}

impl RomStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            current: Mutex::new(None),
            latch: InitLatch::new(),
        }
    }

    pub fn init(&self) -> bool {
        let ran = self
            .latch
            .run(|| -> Result<(), std::convert::Infallible> { Ok(()) })
            .unwrap_or(false);
        if ran {
            log::info!("ROM pool ready: {} bytes", self.capacity);
        }
        ran
    }

    fn slot(&self) -> MutexGuard<'_, Option<RomImage>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read the whole file at `path` into a new image and make it current.
    /// On failure the previous image stays current.
    pub fn load(&self, path: &Path) -> Result<RomImage, LoadError> {
        let mut file = File::open(path).map_err(|e| {
            log::error!("ROM file {} cannot be opened: {e}", path.display());
            LoadError::NotFound {
                path: path.to_path_buf(),
            }
        })?;
        let io_err = |source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        };

        let len = file.metadata().map_err(io_err)?.len();
        let oom = LoadError::OutOfMemory {
            requested: len,
            capacity: self.capacity,
        };
        let size = match usize::try_from(len) {
            Ok(n) if n <= self.capacity => n,
            _ => {
                log::error!("{oom}");
                return Err(oom);
            }
        };

        let mut buf = Vec::new();
        if buf.try_reserve_exact(size).is_err() {
            log::error!("{oom}");
            return Err(oom);
        }
        (&mut file).take(len).read_to_end(&mut buf).map_err(io_err)?;
        if buf.len() != size {
            return Err(io_err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("expected {size} bytes, read {}", buf.len()),
            )));
        }

        let image = RomImage::new(path, buf);
        log::info!(
            "Loaded {} bytes for ROM {} (md5 {})",
            image.len(),
            path.display(),
            image.md5()
        );
        *self.slot() = Some(image.clone());
        Ok(image)
    }

    /// The current image; the same buffer on every call until the next
    /// successful load or `release`.
    pub fn current(&self) -> Option<RomImage> {
        self.slot().clone()
    }

    pub fn release(&self) {
        if self.slot().take().is_some() {
            log::debug!("ROM image released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_is_byte_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mario.nes");
        let data: Vec<u8> = (0..40_000u32).map(|i| (i * 7 + 3) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let store = RomStore::new(1 << 20);
        let image = store.load(&path).unwrap();
        assert_eq!(image.len(), data.len());
        assert_eq!(image.as_bytes(), &data[..]);
        assert_eq!(image.md5(), format!("{:x}", md5::compute(&data)));

        let a = store.current().unwrap();
        let b = store.current().unwrap();
        assert!(a.same_buffer(&b));
        assert!(a.same_buffer(&image));
    }

    #[test]
    fn missing_file_keeps_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("tetris.gb");
        std::fs::write(&good, [1u8, 2, 3]).unwrap();

        let store = RomStore::new(1024);
        let first = store.load(&good).unwrap();
        let err = store.load(&dir.path().join("missing.nes")).unwrap_err();
        assert!(matches!(err, LoadError::NotFound { .. }));
        assert!(store.current().unwrap().same_buffer(&first));
    }

    #[test]
    fn oversized_rom_is_out_of_memory() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("small.gb");
        let big = dir.path().join("big.gb");
        std::fs::write(&small, [0u8; 16]).unwrap();
        std::fs::write(&big, [0u8; 64]).unwrap();

        let store = RomStore::new(32);
        store.load(&small).unwrap();
        let err = store.load(&big).unwrap_err();
        assert!(matches!(
            err,
            LoadError::OutOfMemory {
                requested: 64,
                capacity: 32
            }
        ));
        assert_eq!(store.current().unwrap().len(), 16);
    }

    #[test]
    fn release_and_init() {
        let store = RomStore::new(8);
        assert!(store.init());
        assert!(!store.init());
        assert!(store.current().is_none());
        store.release();
        assert!(store.current().is_none());
    }
}
