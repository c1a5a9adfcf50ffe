//! Vector index with HNSW-style configuration and persistence.
//!
//! The search path is the sanctioned brute-cosine fallback over normalized
//! vectors; the configuration surface (M, ef_construction, ef_search) and
//! the on-disk pair (data file + `.meta` sidecar) match what a native HNSW
//! backend would use, so one can be slotted in without changing callers.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{Error, Result};

/// Configuration for the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswConfig {
    pub dim: usize,
    pub max_elements: usize,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub space: String,
}

impl HnswConfig {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            max_elements: 1_000_000,
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            space: "cosine".to_string(),
        }
    }

    pub fn with_max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = max_elements;
        self
    }

    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(Error::Config("dim must be positive".to_string()));
        }
        if self.m < 2 {
            return Err(Error::Config("M must be at least 2".to_string()));
        }
        if self.ef_construction == 0 {
            return Err(Error::Config("ef_construction must be positive".to_string()));
        }
        if self.ef_search == 0 {
            return Err(Error::Config("ef_search must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Default, Serialize, Deserialize)]
struct HnswData {
    vectors: HashMap<String, Vec<f32>>,
    id_to_label: HashMap<String, usize>,
    next_label: usize,
}

/// Sidecar metadata persisted next to the index data.
#[derive(Serialize, Deserialize)]
struct HnswMeta {
    config: HnswConfig,
    id_to_label: HashMap<String, usize>,
    next_label: usize,
}

/// Approximate nearest neighbor index over normalized vectors.
///
/// Add/search are guarded by a reader-writer lock: add requires exclusive
/// access, search shared.
pub struct HnswIndex {
    config: HnswConfig,
    data: RwLock<HnswData>,
}

impl HnswIndex {
    pub fn new(config: HnswConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            data: RwLock::new(HnswData::default()),
        })
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Number of stored vectors.
    pub fn count(&self) -> usize {
        self.data.read().expect("index lock").vectors.len()
    }

    fn normalize(&self, vector: &[f32]) -> Result<Vec<f32>> {
        if vector.len() != self.config.dim {
            return Err(Error::Validation(format!(
                "Vector dimension {} does not match index dimension {}",
                vector.len(),
                self.config.dim
            )));
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(Error::Validation("Cannot normalize zero vector".to_string()));
        }
        Ok(vector.iter().map(|x| x / norm).collect())
    }

    /// Add a vector; re-adding an existing id replaces it.
    pub fn add(&self, id: &str, vector: &[f32]) -> Result<()> {
        let normalized = self.normalize(vector)?;
        let mut data = self.data.write().expect("index lock");

        if !data.id_to_label.contains_key(id) {
            if data.vectors.len() >= self.config.max_elements {
                return Err(Error::Capacity {
                    max_elements: self.config.max_elements,
                });
            }
            let label = data.next_label;
            data.next_label += 1;
            data.id_to_label.insert(id.to_string(), label);
        }
        data.vectors.insert(id.to_string(), normalized);
        Ok(())
    }

    /// Add several vectors, stopping on the first error.
    pub fn add_batch(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()> {
        for (id, vector) in ids.iter().zip(vectors.iter()) {
            self.add(id, vector)?;
        }
        Ok(())
    }

    /// k-nearest neighbors by cosine similarity; when a filter set is
    /// supplied, results are intersected with it.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter_ids: Option<&HashSet<String>>,
    ) -> Result<Vec<(String, f64)>> {
        let data = self.data.read().expect("index lock");
        if data.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.normalize(query)?;

        let mut results: Vec<(String, f64)> = data
            .vectors
            .iter()
            .map(|(id, vector)| {
                let similarity: f64 = query
                    .iter()
                    .zip(vector.iter())
                    .map(|(a, b)| (*a as f64) * (*b as f64))
                    .sum();
                (id.clone(), similarity)
            })
            .collect();

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(k);

        if let Some(filter) = filter_ids {
            results.retain(|(id, _)| filter.contains(id));
        }

        Ok(results)
    }

    /// Persist the index: data file plus a `.meta` JSON sidecar, both
    /// written via a temp file + rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let data = self.data.read().expect("index lock");

        let data_json = serde_json::to_string(&*data)?;
        write_atomic(path, &data_json)?;

        let meta = HnswMeta {
            config: self.config.clone(),
            id_to_label: data.id_to_label.clone(),
            next_label: data.next_label,
        };
        let meta_path = meta_sidecar_path(path);
        write_atomic(&meta_path, &serde_json::to_string(&meta)?)?;

        Ok(())
    }

    /// Load a previously saved index.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::storage(format!(
                "Index file not found: {}",
                path.display()
            )));
        }
        let meta_path = meta_sidecar_path(path);
        if !meta_path.exists() {
            return Err(Error::storage(format!(
                "Index metadata not found: {}",
                meta_path.display()
            )));
        }

        let meta: HnswMeta = serde_json::from_str(&std::fs::read_to_string(&meta_path)?)?;
        let mut data: HnswData = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        data.id_to_label = meta.id_to_label;
        data.next_label = meta.next_label;

        meta.config.validate()?;
        Ok(Self {
            config: meta.config,
            data: RwLock::new(data),
        })
    }
}

fn meta_sidecar_path(path: &Path) -> PathBuf {
    let mut os_string = path.as_os_str().to_os_string();
    os_string.push(".meta");
    PathBuf::from(os_string)
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
