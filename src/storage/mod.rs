// ROM storage pipeline: mount check, catalog scan, save scan.
//
// Layout on the volume:
//   <mount>/<rom_dir>/*.nes|*.gb|*.gbc   cartridge images
//   <mount>/<save_dir>/*.sav             battery saves (never catalogued)

pub mod rom_image;

use std::fmt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::latch::InitLatch;

pub use rom_image::{LoadError, RomImage, RomStore};

// ─────────────────────────────────────────────────────────────────────────────
//  Catalog types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Nes,
    Gameboy,
    GameboyColor,
    Unknown,
}

impl Platform {
    pub fn label(self) -> &'static str {
        match self {
            Self::Nes => "NES",
            Self::Gameboy => "Game Boy",
            Self::GameboyColor => "Game Boy Color",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a directory entry is, judged by its suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Rom(Platform),
    Save,
    Other,
}

/// Classify a file name by suffix (case-insensitive).
pub fn classify(name: &str) -> EntryKind {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_ascii_lowercase().to_string_lossy().to_string())
        .unwrap_or_default();
    match ext.as_str() {
        "nes" => EntryKind::Rom(Platform::Nes),
        "gb" => EntryKind::Rom(Platform::Gameboy),
        "gbc" => EntryKind::Rom(Platform::GameboyColor),
        "sav" => EntryKind::Save,
        _ => EntryKind::Other,
    }
}

/// One catalogued cartridge. Never mutated after the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomDescriptor {
    display_name: String,
    storage_path: PathBuf,
    platform: Platform,
}

impl RomDescriptor {
    pub fn new(
        display_name: impl Into<String>,
        storage_path: impl Into<PathBuf>,
        platform: Platform,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            storage_path: storage_path.into(),
            platform,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }
}

/// Result of a directory scan. An unreadable directory is not an error
/// for the caller, but it is distinguishable from an empty one.
#[derive(Debug)]
pub enum ScanOutcome {
    Catalog(Vec<RomDescriptor>),
    Unavailable { path: PathBuf, reason: String },
}

impl ScanOutcome {
    /// The catalog, or an empty one when the directory was unavailable.
    pub fn into_roms(self) -> Vec<RomDescriptor> {
        match self {
            Self::Catalog(roms) => roms,
            Self::Unavailable { .. } => Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Scanning
// ─────────────────────────────────────────────────────────────────────────────

/// Direct children of `dir` that are regular, non-hidden files, sorted by name.
fn visible_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, String> {
    let meta = std::fs::metadata(dir).map_err(|e| e.to_string())?;
    if !meta.is_dir() {
        return Err("not a directory".into());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.depth() == 0 => return Err(e.to_string()),
            Err(e) => {
                log::warn!("skipping unreadable entry in {}: {e}", dir.display());
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !entry.file_type().is_file() {
            continue;
        }
        files.push((name, entry.into_path()));
    }
    Ok(files)
}

/// Build the ROM catalog from `dir`. Saves are logged and skipped,
/// unknown suffixes are skipped silently.
pub fn scan(dir: &Path) -> ScanOutcome {
    let files = match visible_files(dir) {
        Ok(f) => f,
        Err(reason) => {
            log::warn!("Cannot open {}: {reason}", dir.display());
            return ScanOutcome::Unavailable {
                path: dir.to_path_buf(),
                reason,
            };
        }
    };

    let mut roms = Vec::new();
    for (name, path) in files {
        match classify(&name) {
            EntryKind::Rom(platform) => {
                log::info!("Found ROM '{name}' ({platform}) at {}", path.display());
                roms.push(RomDescriptor::new(name, path, platform));
            }
            EntryKind::Save => log::info!("Found save '{name}'"),
            EntryKind::Other => {}
        }
    }
    ScanOutcome::Catalog(roms)
}

/// List the save files in `dir`. Kept apart from the ROM catalog.
pub fn scan_saves(dir: &Path) -> Vec<PathBuf> {
    match visible_files(dir) {
        Ok(files) => files
            .into_iter()
            .filter(|(name, _)| classify(name) == EntryKind::Save)
            .map(|(name, path)| {
                log::info!("Found save '{name}'");
                path
            })
            .collect(),
        Err(reason) => {
            log::debug!("No save directory at {}: {reason}", dir.display());
            Vec::new()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Mount
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("cannot mount {path}: {reason}")]
    MountFailure { path: PathBuf, reason: String },
}

/// The mounted ROM volume.
#[derive(Debug)]
pub struct Storage {
    mount_point: PathBuf,
    rom_dir: PathBuf,
    save_dir: PathBuf,
    latch: InitLatch,
}

impl Storage {
    /// `rom_dir` and `save_dir` are relative to `mount_point` unless absolute.
    pub fn new(
        mount_point: impl Into<PathBuf>,
        rom_dir: impl AsRef<Path>,
        save_dir: impl AsRef<Path>,
    ) -> Self {
        let mount_point = mount_point.into();
        Self {
            rom_dir: mount_point.join(rom_dir),
            save_dir: mount_point.join(save_dir),
            mount_point,
            latch: InitLatch::new(),
        }
    }

    /// Check the volume is present. Idempotent once it succeeded.
    pub fn mount(&self) -> Result<bool, StorageError> {
        let ran = self.latch.run(|| match std::fs::metadata(&self.mount_point) {
            Ok(m) if m.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::MountFailure {
                path: self.mount_point.clone(),
                reason: "not a directory".into(),
            }),
            Err(e) => Err(StorageError::MountFailure {
                path: self.mount_point.clone(),
                reason: e.to_string(),
            }),
        })?;
        if ran {
            log::info!("storage mounted at {}", self.mount_point.display());
        }
        Ok(ran)
    }

    pub fn is_mounted(&self) -> bool {
        self.latch.is_set()
    }

    /// Scan the ROM directory. An unmounted volume yields `Unavailable`.
    pub fn scan_roms(&self) -> ScanOutcome {
        if !self.is_mounted() {
            return ScanOutcome::Unavailable {
                path: self.rom_dir.clone(),
                reason: "storage not mounted".into(),
            };
        }
        scan(&self.rom_dir)
    }

    pub fn scan_saves(&self) -> Vec<PathBuf> {
        if !self.is_mounted() {
            return Vec::new();
        }
        scan_saves(&self.save_dir)
    }
}
