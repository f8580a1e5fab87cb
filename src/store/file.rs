//! File-based store.
//!
//! Keeps two files in a directory:
//! - `term` - current term
//! - `voted_for` - voted-for candidate
//!
//! Each file holds a single `"{json} {crc32_hex}"` line; the checksum
//! detects corruption from partial writes. Every write goes to a temp file,
//! is fsynced, and renamed into place.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{Store, StoreError};
use crate::NodeId;

/// CRC32 checksum (IEEE polynomial).
fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFFFFFF;
    for byte in data {
        crc ^= *byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

/// Store persisting term and vote to checksummed files in a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(FileStore { dir })
    }

    fn term_path(&self) -> PathBuf {
        self.dir.join("term")
    }

    fn voted_for_path(&self) -> PathBuf {
        self.dir.join("voted_for")
    }

    /// Write "{data} {crc32_hex}\n" and fsync.
    fn write_with_checksum(&self, path: &Path, data: &str) -> Result<(), StoreError> {
        let checksum = crc32(data.as_bytes());
        let content = format!("{} {:08x}\n", data, checksum);

        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp).map_err(|e| StoreError::Io(e.to_string()))?;
        file.write_all(content.as_bytes())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        file.sync_all().map_err(|e| StoreError::Io(e.to_string()))?;
        fs::rename(&tmp, path).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    /// Read a line back, verify the checksum, return the data portion.
    fn read_with_checksum(&self, path: &Path) -> Result<Option<String>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).map_err(|e| StoreError::Io(e.to_string()))?;
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }

        let parts: Vec<&str> = content.rsplitn(2, ' ').collect();
        if parts.len() != 2 {
            return Err(StoreError::Corruption(format!(
                "invalid format in {:?}: missing checksum",
                path
            )));
        }
        let (checksum_str, data) = (parts[0], parts[1]);

        let stored = u32::from_str_radix(checksum_str, 16).map_err(|_| {
            StoreError::Corruption(format!("invalid checksum format in {:?}", path))
        })?;
        let computed = crc32(data.as_bytes());
        if stored != computed {
            return Err(StoreError::Corruption(format!(
                "checksum mismatch in {:?}: stored {:08x}, computed {:08x}",
                path, stored, computed
            )));
        }

        Ok(Some(data.to_string()))
    }
}

impl Store for FileStore {
    fn current_term(&self) -> Result<u64, StoreError> {
        match self.read_with_checksum(&self.term_path())? {
            None => Ok(0),
            Some(data) => serde_json::from_str(&data)
                .map_err(|e| StoreError::Corruption(format!("invalid term: {}", e))),
        }
    }

    fn set_current_term(&mut self, term: u64) -> Result<(), StoreError> {
        let data = serde_json::to_string(&term)
            .map_err(|e| StoreError::Io(format!("encode term: {}", e)))?;
        self.write_with_checksum(&self.term_path(), &data)
    }

    fn voted_for(&self) -> Result<Option<NodeId>, StoreError> {
        match self.read_with_checksum(&self.voted_for_path())? {
            None => Ok(None),
            Some(data) => serde_json::from_str(&data)
                .map_err(|e| StoreError::Corruption(format!("invalid voted_for: {}", e))),
        }
    }

    fn set_voted_for(&mut self, voted_for: Option<NodeId>) -> Result<(), StoreError> {
        let data = serde_json::to_string(&voted_for)
            .map_err(|e| StoreError::Io(format!("encode voted_for: {}", e)))?;
        self.write_with_checksum(&self.voted_for_path(), &data)
    }
}
