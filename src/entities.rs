//! Entity corpus: one text file per named entity, addressed by id.
//!
//! Annotated `{name, description}` pairs are accumulated across documents
//! in [`EntityDescriptions`], then [`EntityCorpus::materialize`] assigns
//! sequential ids and writes each entity to
//! `{entity_root}/{digit}/{digit}/…/{sanitized_name}.txt`.
//!
//! Ids are reassigned from zero on every rebuild.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ExpansionError, SkipReason};
use crate::models::EntityId;

/// Canonical entity key: whitespace becomes `_`, path separators are
/// removed, surrounding `_` trimmed.
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .trim()
        .chars()
        .filter(|c| *c != '/' && *c != '\\')
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    replaced.trim_matches('_').to_string()
}

/// One accumulated entity, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityEntry {
    pub key: String,
    pub display_name: String,
    /// Every description seen, each followed by `\n`.
    pub descriptions: String,
}

/// Running map of entity descriptions across all annotated documents.
#[derive(Debug, Default, Clone)]
pub struct EntityDescriptions {
    entries: Vec<EntityEntry>,
    index: HashMap<String, usize>,
}

impl EntityDescriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `description` to the entity called `name`. Names that
    /// sanitize to nothing are ignored.
    pub fn add(&mut self, name: &str, description: &str) {
        let key = sanitize_name(name);
        if key.is_empty() {
            return;
        }
        let pos = match self.index.get(&key) {
            Some(&pos) => pos,
            None => {
                self.entries.push(EntityEntry {
                    key: key.clone(),
                    display_name: name.trim().to_string(),
                    descriptions: String::new(),
                });
                self.index.insert(key, self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[pos];
        entry.descriptions.push_str(description);
        entry.descriptions.push('\n');
    }

    pub fn get(&self, name: &str) -> Option<&EntityEntry> {
        self.index
            .get(&sanitize_name(name))
            .map(|&pos| &self.entries[pos])
    }

    pub fn entries(&self) -> &[EntityEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of writing one accumulated entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityWriteOutcome {
    Written { id: EntityId, path: PathBuf },
    Skipped { name: String, reason: SkipReason },
}

#[derive(Debug, Default, Clone)]
pub struct MaterializeReport {
    pub written: usize,
    pub rejected_too_long: usize,
    pub failed: usize,
}

impl MaterializeReport {
    fn record(&mut self, outcome: &EntityWriteOutcome) {
        match outcome {
            EntityWriteOutcome::Written { .. } => self.written += 1,
            EntityWriteOutcome::Skipped {
                reason: SkipReason::NameTooLong { .. },
                ..
            } => self.rejected_too_long += 1,
            EntityWriteOutcome::Skipped { .. } => self.failed += 1,
        }
    }
}

/// The entity root on disk.
pub struct EntityCorpus {
    root: PathBuf,
    max_filename_len: usize,
}

impl EntityCorpus {
    pub fn new(root: impl Into<PathBuf>, max_filename_len: usize) -> Self {
        Self {
            root: root.into(),
            max_filename_len,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the file for `id`.
    pub fn id_dir(&self, id: EntityId) -> PathBuf {
        self.root.join(id.shallow_path())
    }

    /// Remove every previously materialized entity.
    pub fn clear(&self) -> Result<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root).with_context(|| {
                format!("Failed to clear entity root {}", self.root.display())
            })?;
        }
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create entity root {}", self.root.display()))?;
        Ok(())
    }

    /// Write every accumulated entity, assigning ids from 0 to those whose
    /// filename fits the length bound.
    pub fn materialize(&self, descriptions: &EntityDescriptions) -> MaterializeReport {
        let mut report = MaterializeReport::default();
        let mut next_id: u64 = 0;

        for entry in descriptions.entries() {
            let outcome = self.write_entity(entry, next_id);
            if matches!(outcome, EntityWriteOutcome::Written { .. }) {
                next_id += 1;
            }
            if let EntityWriteOutcome::Skipped { name, reason } = &outcome {
                debug!(entity = %name, reason = %reason, "entity not written");
            }
            report.record(&outcome);
        }

        info!(
            written = report.written,
            rejected = report.rejected_too_long,
            "entity corpus materialized"
        );
        report
    }

    /// Append one entity's name and descriptions to its id file.
    pub fn write_entity(&self, entry: &EntityEntry, id: u64) -> EntityWriteOutcome {
        let skipped = |reason| EntityWriteOutcome::Skipped {
            name: entry.display_name.clone(),
            reason,
        };
        if entry.key.is_empty() {
            return skipped(SkipReason::EmptyName);
        }
        let filename = format!("{}.txt", entry.key);
        let len = filename.chars().count();
        if len > self.max_filename_len {
            return skipped(SkipReason::NameTooLong {
                len,
                limit: self.max_filename_len,
            });
        }

        let id = EntityId(id);
        let dir = self.id_dir(id);
        let path = dir.join(&filename);
        let result = std::fs::create_dir_all(&dir).and_then(|_| {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            write!(file, "{}\n{}", entry.display_name, entry.descriptions)
        });
        match result {
            Ok(()) => EntityWriteOutcome::Written { id, path },
            Err(e) => skipped(SkipReason::from(e)),
        }
    }

    /// Locate the description file for `id`: the single `.txt` file
    /// directly inside its id directory.
    pub fn resolve(&self, id: EntityId) -> Result<PathBuf, ExpansionError> {
        let dir = self.id_dir(id);
        let read = match std::fs::read_dir(&dir) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExpansionError::UnknownEntity(id.to_string()))
            }
            Err(source) => {
                return Err(ExpansionError::Io {
                    id: id.to_string(),
                    source,
                })
            }
        };

        let mut found = Vec::new();
        for entry in read {
            let entry = entry.map_err(|source| ExpansionError::Io {
                id: id.to_string(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("txt") {
                found.push(path);
            }
        }

        match found.len() {
            0 => Err(ExpansionError::UnknownEntity(id.to_string())),
            1 => Ok(found.remove(0)),
            count => Err(ExpansionError::Ambiguous {
                id: id.to_string(),
                count,
            }),
        }
    }

    /// Stored description text for `id`.
    pub fn read(&self, id: EntityId) -> Result<String, ExpansionError> {
        let path = self.resolve(id)?;
        std::fs::read_to_string(&path).map_err(|source| ExpansionError::Io {
            id: id.to_string(),
            source,
        })
    }

    /// Id encoded in an entity file's location under the root.
    pub fn id_for_path(&self, path: &Path) -> Option<EntityId> {
        let rel = path.strip_prefix(&self.root).ok()?.parent()?;
        let digits: String = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(EntityId)
    }
}
