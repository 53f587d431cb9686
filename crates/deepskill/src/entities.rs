//! Mapping between external entity names and dense codes.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::storage::{self, ArtifactKind};
use crate::types::{EngineError, EngineResult, EntityCode};

/// Entity names indexed by code. Codes are positions in the table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityTable {
    names: Vec<String>,
    codes: HashMap<String, EntityCode>,
}

#[derive(Serialize, Deserialize)]
struct SerializedTable {
    names: Vec<String>,
}

impl EntityTable {
    pub fn from_names(names: Vec<String>) -> EngineResult<Self> {
        let mut codes = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let code = EntityCode::try_from(i).map_err(|_| {
                EngineError::CorruptArtifact("entity table exceeds the code range".to_string())
            })?;
            if codes.insert(name.clone(), code).is_some() {
                return Err(EngineError::CorruptArtifact(format!(
                    "entity table lists {name:?} twice"
                )));
            }
        }
        Ok(Self { names, codes })
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let table: SerializedTable = storage::read_artifact_file(ArtifactKind::Entities, path)?;
        let table = Self::from_names(table.names)?;
        tracing::info!("Loaded entity table: {} entities", table.len());
        Ok(table)
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let table = SerializedTable {
            names: self.names.clone(),
        };
        storage::write_artifact_file(ArtifactKind::Entities, self.len() as u64, &table, path)
    }

    pub fn code(&self, name: &str) -> Option<EntityCode> {
        self.codes.get(name).copied()
    }

    pub fn name(&self, code: EntityCode) -> Option<&str> {
        self.names.get(code as usize).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
