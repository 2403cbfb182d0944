//! Directory-backed storage backend.
//!
//! Each key is one file named by the SHA-256 digest of the key, so filenames
//! have a fixed length however long the key is. The file holds a small JSON
//! envelope carrying the key itself next to the value. Writes go to a `.tmp`
//! sibling first and are renamed into place.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{StorageBackend, StorageError, StorageResult};

const TMP_SUFFIX: &str = ".tmp";

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Deserialize)]
struct Envelope {
    key: String,
    value: String,
}

// == File Storage ==
/// Stores each key as one file under `dir`.
///
/// All operations are blocking `std::fs` calls and the engine invokes them
/// while holding its state lock. Inside an async server this stalls the
/// calling worker thread for the duration of the disk write, so prefer
/// [`MemoryStorage`](super::MemoryStorage) on latency-sensitive paths.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
    quota: Option<u64>,
}

impl FileStorage {
    /// Opens (creating if needed) a storage directory.
    pub fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, quota: None })
    }

    /// Caps the total bytes on disk, envelopes included.
    pub fn with_quota(mut self, quota: u64) -> Self {
        self.quota = Some(quota);
        self
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name(key))
    }

    fn used_bytes_excluding(&self, skip: &Path) -> StorageResult<u64> {
        let mut total = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path == skip || is_tmp(&path) {
                continue;
            }
            total += entry.metadata()?.len();
        }
        Ok(total)
    }
}

impl StorageBackend for FileStorage {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        let contents = match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let envelope = read_envelope(&contents)?;
        Ok((envelope.key == key).then_some(envelope.value))
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.path_for(key);
        let contents = serde_json::to_string(&EnvelopeRef { key, value })
            .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;

        if let Some(quota) = self.quota {
            let used = self.used_bytes_excluding(&path)?;
            if used + contents.len() as u64 > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);

        if let Err(err) = fs::write(&tmp, contents) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    // Files that cannot be read back as an envelope are not ours; skip them.
    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if is_tmp(&path) || !path.is_file() {
                continue;
            }
            let Ok(contents) = fs::read_to_string(&path) else {
                continue;
            };
            if let Ok(envelope) = read_envelope(&contents) {
                keys.push(envelope.key);
            }
        }
        Ok(keys)
    }
}

fn is_tmp(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == &TMP_SUFFIX[1..])
}

fn file_name(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn read_envelope(contents: &str) -> StorageResult<Envelope> {
    serde_json::from_str(contents)
        .map_err(|err| StorageError::Io(io::Error::new(ErrorKind::InvalidData, err)))
}
