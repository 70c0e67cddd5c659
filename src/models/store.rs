use std::collections::HashMap;
use std::fmt;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AppError, Result, ResultExt};

/// Persisted mapping from gallery file name to its embedding vector.
///
/// Entries keep insertion order, which is the tie-break order when ranking
/// matches. Every vector in one store has the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingStore {
    entries: Vec<(String, Vec<f32>)>,
    index: HashMap<String, usize>,
}

impl EmbeddingStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored embeddings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store holds no embeddings.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dimensionality shared by every vector, or `None` for an empty store.
    pub fn dimensions(&self) -> Option<usize> {
        self.entries.first().map(|(_, v)| v.len())
    }

    /// Inserts an embedding, replacing any existing vector under `name` in place.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] if the vector is empty, holds a NaN or
    /// infinite component, or its length differs from the vectors already
    /// stored.
    pub fn insert(&mut self, name: impl Into<String>, embedding: Vec<f32>) -> Result<()> {
        let name = name.into();
        if embedding.is_empty() {
            return Err(AppError::Validation(format!(
                "embedding for {} is empty",
                name
            )));
        }
        // JSON has no NaN or infinity, such a vector could not be loaded back
        if let Some(pos) = embedding.iter().position(|x| !x.is_finite()) {
            return Err(AppError::Validation(format!(
                "embedding for {} has a non-finite value at index {}",
                name, pos
            )));
        }

        match self.index.get(&name).copied() {
            Some(pos) => {
                if self.entries[pos].1.len() != embedding.len() {
                    return Err(self.dimension_error(&name, embedding.len()));
                }
                self.entries[pos].1 = embedding;
            }
            None => {
                if let Some(dims) = self.dimensions() {
                    if dims != embedding.len() {
                        return Err(self.dimension_error(&name, embedding.len()));
                    }
                }
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, embedding));
            }
        }
        Ok(())
    }

    fn dimension_error(&self, name: &str, got: usize) -> AppError {
        AppError::Validation(format!(
            "embedding for {} has {} dimensions, store expects {}",
            name,
            got,
            self.dimensions().unwrap_or_default()
        ))
    }

    /// Looks up the embedding stored under `name`.
    pub fn get(&self, name: &str) -> Option<&[f32]> {
        self.index
            .get(name)
            .map(|&pos| self.entries[pos].1.as_slice())
    }

    /// Returns `true` if an embedding is stored under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Iterates over `(name, embedding)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.entries
            .iter()
            .map(|(name, v)| (name.as_str(), v.as_slice()))
    }

    /// Names of all stored images in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Serializes the store to a JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes a store from a JSON string.
    pub fn from_json(json_str: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    /// Returns `true` if a store file exists at `path`.
    pub fn exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().is_file()
    }

    /// Loads the store from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotInitialized`] if the file does not exist, and a
    /// JSON error if it is not a name → vector object with uniform dimensions.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !Self::exists(path) {
            return Err(AppError::NotInitialized(path.to_path_buf()));
        }

        let data = std::fs::read_to_string(path)?;
        let store = Self::from_json(&data)?;
        log::debug!(
            "Loaded {} embeddings from {}",
            store.len(),
            path.display()
        );
        Ok(store)
    }

    /// Writes the whole store to `path`, replacing any previous content.
    ///
    /// The JSON is written to a temporary file next to `path` and renamed
    /// over it, so readers never observe a partially written store.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        crate::utils::ensure_dir_exists(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }
        tmp.persist(path)
            .with_context(|| format!("failed to replace {}", path.display()))?;

        log::debug!("Wrote {} embeddings to {}", self.len(), path.display());
        Ok(())
    }
}

impl Serialize for EmbeddingStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, embedding) in &self.entries {
            map.serialize_entry(name, embedding)?;
        }
        map.end()
    }
}

struct StoreVisitor;

impl<'de> Visitor<'de> for StoreVisitor {
    type Value = EmbeddingStore;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an object mapping image names to arrays of numbers")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
        let mut store = EmbeddingStore::new();
        while let Some((name, embedding)) = access.next_entry::<String, Vec<f32>>()? {
            store
                .insert(name, embedding)
                .map_err(serde::de::Error::custom)?;
        }
        Ok(store)
    }
}

impl<'de> Deserialize<'de> for EmbeddingStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(StoreVisitor)
    }
}
