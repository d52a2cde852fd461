//! Persisted gallery of enrolled faces.
//!
//! On disk the gallery is a single bincode blob holding two positionally
//! aligned sequences (templates, labels). In memory it is one sequence of
//! paired records so the two halves cannot drift apart. The file is always
//! rewritten wholesale.

use crate::types::{FaceRecord, FaceTemplate};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read face store {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to write face store {path}: {source}")]
    Write { path: String, source: std::io::Error },
    #[error("face store {path} is corrupt: {source}")]
    Corrupt { path: String, source: bincode::Error },
    #[error("face store {path} is corrupt: {templates} templates but {labels} labels")]
    Misaligned { path: String, templates: usize, labels: usize },
    #[error("failed to encode face store: {0}")]
    Encode(bincode::Error),
}

/// Serialized layout: two aligned sequences, no version tag.
#[derive(Serialize, Deserialize)]
struct StoreBlob {
    templates: Vec<FaceTemplate>,
    labels: Vec<String>,
}

/// Ordered list of enrolled faces bound to its backing file.
#[derive(Debug, Clone)]
pub struct FaceStore {
    path: PathBuf,
    records: Vec<FaceRecord>,
}

impl FaceStore {
    /// Empty store that will save to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), records: Vec::new() }
    }

    /// Load the store from `path`. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let shown = path.display().to_string();

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %shown, "no face store yet, starting empty");
                return Ok(Self::new(path));
            }
            Err(source) => return Err(StoreError::Read { path: shown, source }),
        };

        let blob: StoreBlob = bincode::deserialize(&bytes)
            .map_err(|source| StoreError::Corrupt { path: shown.clone(), source })?;

        if blob.templates.len() != blob.labels.len() {
            return Err(StoreError::Misaligned {
                path: shown,
                templates: blob.templates.len(),
                labels: blob.labels.len(),
            });
        }

        let records: Vec<FaceRecord> = blob
            .templates
            .into_iter()
            .zip(blob.labels)
            .map(|(template, label)| FaceRecord { template, label })
            .collect();

        tracing::info!(path = %shown, records = records.len(), "loaded face store");
        Ok(Self { path, records })
    }

    /// Rewrite the whole store file.
    ///
    /// Writes to a sibling temporary file and renames it over the target, so
    /// readers never observe a half-written store.
    pub fn save(&self) -> Result<(), StoreError> {
        let shown = self.path.display().to_string();

        let blob = StoreBlob {
            templates: self.records.iter().map(|r| r.template.clone()).collect(),
            labels: self.records.iter().map(|r| r.label.clone()).collect(),
        };
        let bytes = bincode::serialize(&blob).map_err(StoreError::Encode)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| StoreError::Write { path: shown.clone(), source })?;
        }

        let tmp = temp_path(&self.path);
        fs::write(&tmp, &bytes)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|source| {
                let _ = fs::remove_file(&tmp);
                StoreError::Write { path: shown.clone(), source }
            })?;

        tracing::info!(path = %shown, records = self.records.len(), bytes = bytes.len(), "saved face store");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[FaceRecord] {
        &self.records
    }

    /// Labels in store order, duplicates included.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a record in memory. Call [`save`](Self::save) to persist.
    pub fn push(&mut self, record: FaceRecord) {
        self.records.push(record);
    }

    /// Drop the most recently appended record.
    pub fn pop(&mut self) -> Option<FaceRecord> {
        self.records.pop()
    }

    /// Remove every record whose label is one of `names`.
    ///
    /// Survivors keep their relative order. Returns the removed labels in
    /// the order they appeared, one entry per removed record.
    pub fn remove<S: AsRef<str>>(&mut self, names: &[S]) -> Vec<String> {
        let mut removed = Vec::new();
        self.records.retain(|record| {
            let hit = names.iter().any(|n| n.as_ref() == record.label);
            if hit {
                removed.push(record.label.clone());
            }
            !hit
        });

        tracing::info!(removed = removed.len(), remaining = self.records.len(), "removed face records");
        removed
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
