//! Durable storage for buffers that could not be delivered.
//!
//! One file per buffer, named by its 12-digit timestamp, no extension,
//! holding exactly the wire bytes.

use log::{debug, warn};
use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use crate::buffer::layout::TIMESTAMP_LEN;

/// What a write did to the name it targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Written {
    Created,
    /// An earlier file with the same name was overwritten.
    Replaced,
}

pub trait Storage: Send + Sync {
    fn is_mounted(&self) -> bool;

    /// Pending file names in chronological order, skipping `offset`.
    fn list(&self, offset: usize, limit: usize) -> io::Result<Vec<String>>;

    /// Creates or replaces `name` with `bytes`.
    fn write(&self, name: &str, bytes: &[u8]) -> io::Result<Written>;

    /// Reads `name` into `out`; the file must be exactly `out.len()` bytes.
    fn read(&self, name: &str, out: &mut [u8]) -> io::Result<()>;

    fn delete(&self, name: &str) -> io::Result<()>;
}

/// Whether `name` is a storage file name (12 ASCII digits).
pub fn is_pending_name(name: &str) -> bool {
    name.len() == TIMESTAMP_LEN && name.bytes().all(|b| b.is_ascii_digit())
}

/// Files in a directory. Mounted means the directory exists.
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the directory if needed.
    pub fn create(root: impl Into<PathBuf>) -> io::Result<Self> {
        let storage = Self::new(root);
        fs::create_dir_all(&storage.root)?;
        Ok(storage)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> io::Result<PathBuf> {
        if !is_pending_name(name) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not a storage file name", name),
            ));
        }
        Ok(self.root.join(name))
    }
}

impl Storage for DirStorage {
    fn is_mounted(&self) -> bool {
        self.root.is_dir()
    }

    fn list(&self, offset: usize, limit: usize) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| is_pending_name(name))
            .collect();
        names.sort_unstable();
        Ok(names.into_iter().skip(offset).take(limit).collect())
    }

    fn write(&self, name: &str, bytes: &[u8]) -> io::Result<Written> {
        let path = self.path_of(name)?;
        let written = if path.exists() {
            warn!("[Storage] {} exists, overwriting", name);
            Written::Replaced
        } else {
            Written::Created
        };
        // Complete or absent: write aside, then rename over.
        let tmp = self.root.join(format!(".{}.tmp", name));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        debug!("[Storage] wrote {} ({} bytes)", name, bytes.len());
        Ok(written)
    }

    fn read(&self, name: &str, out: &mut [u8]) -> io::Result<()> {
        let path = self.path_of(name)?;
        let mut file = File::open(&path)?;
        let len = file.metadata()?.len();
        if len != out.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} holds {} bytes, expected {}", name, len, out.len()),
            ));
        }
        file.read_exact(out)
    }

    fn delete(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.path_of(name)?)
    }
}
