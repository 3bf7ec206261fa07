/// Definition library: validated dialogue and quest definitions keyed by name.
///
/// Both sides of a session load the same library so that node IDs sent over
/// the wire resolve to the same nodes.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::core::dialogue::validate_dialogue;
use crate::core::quest::validate_quest;
use crate::core::registry::DefinitionError;
use crate::schema::dialogue::DialogueDef;
use crate::schema::quest::QuestDef;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid definition: {0}")]
    Definition(#[from] DefinitionError),
    #[error("a dialogue named '{0}' is already loaded")]
    DuplicateDialogue(String),
    #[error("a quest named '{0}' is already loaded")]
    DuplicateQuest(String),
}

/// One definition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Definition {
    Dialogue(DialogueDef),
    Quest(QuestDef),
}

impl Definition {
    pub fn name(&self) -> &str {
        match self {
            Definition::Dialogue(d) => &d.name,
            Definition::Quest(q) => &q.name,
        }
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        match self {
            Definition::Dialogue(d) => validate_dialogue(d).map(|_| ()),
            Definition::Quest(q) => validate_quest(q).map(|_| ()),
        }
    }

    pub fn load_from_ron(path: &Path) -> Result<Self, LibraryError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<Self, LibraryError> {
        Ok(ron::from_str(input)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DefinitionLibrary {
    dialogues: BTreeMap<String, DialogueDef>,
    quests: BTreeMap<String, QuestDef>,
}

impl DefinitionLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `.ron` file in `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self, LibraryError> {
        let mut library = Self::new();
        load_ron_files_from_dir(dir, |path| {
            let definition = Definition::load_from_ron(path)?;
            debug!(path = %path.display(), name = definition.name(), "loaded definition");
            library.add(definition)
        })?;
        Ok(library)
    }

    pub fn add(&mut self, definition: Definition) -> Result<(), LibraryError> {
        match definition {
            Definition::Dialogue(d) => self.add_dialogue(d),
            Definition::Quest(q) => self.add_quest(q),
        }
    }

    pub fn add_dialogue(&mut self, def: DialogueDef) -> Result<(), LibraryError> {
        validate_dialogue(&def)?;
        if self.dialogues.contains_key(&def.name) {
            return Err(LibraryError::DuplicateDialogue(def.name));
        }
        self.dialogues.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn add_quest(&mut self, def: QuestDef) -> Result<(), LibraryError> {
        validate_quest(&def)?;
        if self.quests.contains_key(&def.name) {
            return Err(LibraryError::DuplicateQuest(def.name));
        }
        self.quests.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn dialogue(&self, name: &str) -> Option<&DialogueDef> {
        self.dialogues.get(name)
    }

    pub fn quest(&self, name: &str) -> Option<&QuestDef> {
        self.quests.get(name)
    }

    pub fn dialogue_names(&self) -> Vec<&str> {
        self.dialogues.keys().map(String::as_str).collect()
    }

    pub fn quest_names(&self) -> Vec<&str> {
        self.quests.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.dialogues.is_empty() && self.quests.is_empty()
    }
}

/// Load all .ron files from a directory, calling `loader` for each.
pub fn load_ron_files_from_dir<F>(dir: &Path, mut loader: F) -> Result<(), LibraryError>
where
    F: FnMut(&Path) -> Result<(), LibraryError>,
{
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    paths.sort();
    for path in paths {
        if path.extension().and_then(|s| s.to_str()) == Some("ron") {
            loader(&path)?;
        }
    }
    Ok(())
}
