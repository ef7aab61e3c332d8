//! On-disk IODD collection
//!
//! A collection is a flat directory of IODD XML files plus
//! `iodd_collection_index.json`, which lists the device family of every file.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use iotbox_common::{COLLECTION_INDEX_FILE, IotBoxError, UNIT_DEFINITIONS_FILE};

use crate::parser::Iodd;
use crate::units::UnitDefinitions;

/// File name pattern of IODD 1.1 documents inside vendor archives
const IODD_FILE_MARKER: &str = "IODD1.1.xml";

/// Largest IODD file accepted from an archive
pub const MAX_IODD_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Serialises rebuilds and rewrites of collection indexes
static INDEX_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub family: Vec<String>,
    pub file: PathBuf,
}

/// Parsed IODDs of a collection directory
#[derive(Debug, Clone, Default)]
pub struct IoddCollection {
    dir: PathBuf,
    iodds: Vec<Iodd>,
}

impl IoddCollection {
    pub fn empty(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            iodds: Vec::new(),
        }
    }

    /// Parse every file listed in the collection index. A missing index is rebuilt
    /// from the directory contents first.
    pub fn load(dir: &Path, units: &UnitDefinitions) -> anyhow::Result<Self> {
        ensure_dir(dir)?;
        if !index_path(dir).exists() {
            info!("No IODD collection index in {}, building it", dir.display());
            update_index(dir)?;
        }

        let entries = read_index(dir)?;
        let mut iodds = Vec::with_capacity(entries.len());
        for entry in entries {
            let file = resolve(dir, &entry.file);
            match Iodd::parse_file(&file, units) {
                Ok(iodd) => iodds.push(iodd),
                Err(e) => warn!("Skipping IODD {}: {}", file.display(), e),
            }
        }
        info!(
            "Loaded {} IODD(s) from collection {}",
            iodds.len(),
            dir.display()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            iodds,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn iodds(&self) -> &[Iodd] {
        &self.iodds
    }

    pub fn len(&self) -> usize {
        self.iodds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iodds.is_empty()
    }

    /// The last IODD whose family contains the sensor.
    pub fn find_for_sensor(&self, sensor: &str) -> Option<&Iodd> {
        self.iodds.iter().rev().find(|iodd| iodd.matches(sensor))
    }

    pub fn require_for_sensor(&self, sensor: &str) -> Result<&Iodd, IotBoxError> {
        self.find_for_sensor(sensor)
            .ok_or_else(|| IotBoxError::IoddNotFound {
                sensor: sensor.to_string(),
                collection: self.dir.display().to_string(),
            })
    }

    pub fn find_by_file_name(&self, name: &str) -> Option<&Iodd> {
        self.iodds.iter().find(|iodd| iodd.file_name() == name)
    }
}

pub fn index_path(dir: &Path) -> PathBuf {
    dir.join(COLLECTION_INDEX_FILE)
}

pub fn ensure_dir(dir: &Path) -> anyhow::Result<()> {
    if !dir.exists() {
        debug!("Folder {} doesn't exist and will be created.", dir.display());
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

pub fn read_index(dir: &Path) -> anyhow::Result<Vec<IndexEntry>> {
    let location = index_path(dir);
    if !location.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&location)?;
    Ok(serde_json::from_str(&content)?)
}

/// Replace the index file. Readers see either the old or the new index.
pub fn write_index(dir: &Path, entries: &[IndexEntry]) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(entries)?;
    let location = index_path(dir);
    let staging = location.with_extension("json.tmp");
    std::fs::write(&staging, content)?;
    std::fs::rename(&staging, &location)?;
    Ok(())
}

/// Rebuild the index from the XML files in the collection directory.
pub fn update_index(dir: &Path) -> anyhow::Result<Vec<IndexEntry>> {
    ensure_dir(dir)?;
    let _guard = INDEX_LOCK.lock();

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_iodd_candidate(path))
        .collect();
    files.sort();

    let mut entries = Vec::with_capacity(files.len());
    for file in files {
        let family = std::fs::read_to_string(&file)
            .map_err(|e| e.to_string())
            .and_then(|content| Iodd::read_family(&content));
        match family {
            Ok(family) => entries.push(IndexEntry { family, file }),
            Err(e) => warn!("Could not read family of {}: {}", file.display(), e),
        }
    }

    write_index(dir, &entries)?;
    info!(
        "Updated IODD collection index {} with {} entries",
        index_path(dir).display(),
        entries.len()
    );
    Ok(entries)
}

/// Drop index entries whose file is gone or no longer describes the indexed family.
///
/// Returns the removed entries.
pub fn verify_index(dir: &Path) -> anyhow::Result<Vec<IndexEntry>> {
    let _guard = INDEX_LOCK.lock();
    let entries = read_index(dir)?;
    let (kept, removed): (Vec<_>, Vec<_>) = entries.into_iter().partition(|entry| {
        let file = resolve(dir, &entry.file);
        std::fs::read_to_string(&file)
            .ok()
            .and_then(|content| Iodd::read_family(&content).ok())
            .is_some_and(|family| family == entry.family)
    });

    if !removed.is_empty() {
        for entry in &removed {
            warn!("Removing stale IODD index entry {}", entry.file.display());
        }
        write_index(dir, &kept)?;
    }
    Ok(removed)
}

/// Extract the IODD files of a zip archive into the collection and update the index.
///
/// Returns the extracted files.
pub fn import_archive(dir: &Path, bytes: &[u8]) -> anyhow::Result<Vec<PathBuf>> {
    let extracted = extract_archive(dir, bytes)?;
    if !extracted.is_empty() {
        update_index(dir)?;
    }
    Ok(extracted)
}

pub(crate) fn extract_archive(dir: &Path, bytes: &[u8]) -> anyhow::Result<Vec<PathBuf>> {
    extract_archive_limited(dir, bytes, MAX_IODD_FILE_SIZE)
}

fn extract_archive_limited(
    dir: &Path,
    bytes: &[u8],
    max_file_size: u64,
) -> anyhow::Result<Vec<PathBuf>> {
    ensure_dir(dir)?;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| IotBoxError::IllegalArgument(format!("invalid IODD archive: {}", e)))?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() || !entry.name().contains(IODD_FILE_MARKER) {
            continue;
        }
        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_os_string()))
        else {
            return Err(IotBoxError::IllegalArgument(format!(
                "IODD archive entry escapes the collection: {}",
                entry.name()
            ))
            .into());
        };

        let target = dir.join(name);
        if target.exists() {
            debug!(
                "IODD file {} already exists and will be replaced.",
                target.display()
            );
        }
        if entry.size() > max_file_size {
            return Err(too_large(entry.name(), max_file_size));
        }
        // the declared size is not trusted, the read is capped as well
        let mut content = Vec::new();
        (&mut entry)
            .take(max_file_size + 1)
            .read_to_end(&mut content)?;
        if content.len() as u64 > max_file_size {
            return Err(too_large(entry.name(), max_file_size));
        }
        std::fs::write(&target, content)?;
        debug!("Extracted IODD file {}", target.display());
        extracted.push(target);
    }

    if extracted.is_empty() {
        warn!("Couldn't find IODD file in zip archive.");
    }
    Ok(extracted)
}

fn too_large(name: &str, max_file_size: u64) -> anyhow::Error {
    IotBoxError::IllegalArgument(format!(
        "IODD archive entry {} exceeds {} bytes",
        name, max_file_size
    ))
    .into()
}

fn is_iodd_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name != COLLECTION_INDEX_FILE
        && name != UNIT_DEFINITIONS_FILE
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
}

/// Index entries may point into a collection directory that has since moved.
fn resolve(dir: &Path, file: &Path) -> PathBuf {
    if file.exists() {
        return file.to_path_buf();
    }
    match file.file_name() {
        Some(name) => dir.join(name),
        None => file.to_path_buf(),
    }
}
