/// Save storage: a narrow store trait plus in-memory and RON-file implementations.
use ron::ser::PrettyConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::schema::save::SaveRecord;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("RON serialization error: {0}")]
    Serialize(#[from] ron::Error),
    #[error("invalid save name '{0}'")]
    InvalidName(String),
}

/// Where save records live, keyed by save name and slot.
pub trait PersistenceStore {
    fn save(&mut self, name: &str, slot: u32, record: &SaveRecord) -> Result<(), PersistenceError>;
    /// `Ok(None)` when nothing is saved under this name and slot.
    fn load(&self, name: &str, slot: u32) -> Result<Option<SaveRecord>, PersistenceError>;
    /// Returns false if there was nothing to delete.
    fn delete(&mut self, name: &str, slot: u32) -> Result<bool, PersistenceError>;
    fn exists(&self, name: &str, slot: u32) -> bool;
}

fn to_ron(record: &SaveRecord) -> Result<String, PersistenceError> {
    Ok(ron::ser::to_string_pretty(record, PrettyConfig::default())?)
}

fn check_name(name: &str) -> Result<(), PersistenceError> {
    if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
        return Err(PersistenceError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Keeps saves as RON text in memory. Useful for tests and dedicated servers.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    saves: BTreeMap<(String, u32), String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.saves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.saves.is_empty()
    }
}

impl PersistenceStore for MemoryStore {
    fn save(&mut self, name: &str, slot: u32, record: &SaveRecord) -> Result<(), PersistenceError> {
        check_name(name)?;
        self.saves.insert((name.to_string(), slot), to_ron(record)?);
        Ok(())
    }

    fn load(&self, name: &str, slot: u32) -> Result<Option<SaveRecord>, PersistenceError> {
        match self.saves.get(&(name.to_string(), slot)) {
            Some(text) => Ok(Some(ron::from_str(text)?)),
            None => Ok(None),
        }
    }

    fn delete(&mut self, name: &str, slot: u32) -> Result<bool, PersistenceError> {
        Ok(self.saves.remove(&(name.to_string(), slot)).is_some())
    }

    fn exists(&self, name: &str, slot: u32) -> bool {
        self.saves.contains_key(&(name.to_string(), slot))
    }
}

/// One `{name}_{slot}.ron` file per save under a directory.
#[derive(Debug, Clone)]
pub struct RonFileStore {
    dir: PathBuf,
}

impl RonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str, slot: u32) -> PathBuf {
        self.dir.join(format!("{}_{}.ron", name, slot))
    }
}

impl PersistenceStore for RonFileStore {
    fn save(&mut self, name: &str, slot: u32, record: &SaveRecord) -> Result<(), PersistenceError> {
        check_name(name)?;
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(name, slot);
        std::fs::write(&path, to_ron(record)?)?;
        debug!(path = %path.display(), "wrote save");
        Ok(())
    }

    fn load(&self, name: &str, slot: u32) -> Result<Option<SaveRecord>, PersistenceError> {
        check_name(name)?;
        let path = self.path_for(name, slot);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(Some(ron::from_str(&contents)?))
    }

    fn delete(&mut self, name: &str, slot: u32) -> Result<bool, PersistenceError> {
        check_name(name)?;
        let path = self.path_for(name, slot);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }

    fn exists(&self, name: &str, slot: u32) -> bool {
        check_name(name).is_ok() && self.path_for(name, slot).exists()
    }
}
