// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workspace registry: one lazily-constructed handle per canonicalized
//! root, holding the store, lexical index, memory, query cache, evidence
//! log, and embedding gateway for that workspace. Callers receive the
//! handle and pass it around; nothing else in the crate keeps ambient
//! mutable state.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::cache::QueryCache;
use crate::config::Config;
use crate::embed::EmbeddingGateway;
use crate::errors::RootResolutionError;
use crate::evidence::EvidenceLog;
use crate::lexical::LexicalIndex;
use crate::memory::MemoryStore;
use crate::rank::{SearchEngine, SearchHit};
use crate::store::Store;

static REGISTRY: Lazy<Mutex<HashMap<PathBuf, Arc<Workspace>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Everything scoped to one workspace root.
pub struct Workspace {
    pub root: PathBuf,
    pub config: Config,
    pub store: Store,
    pub lexical: LexicalIndex,
    pub memory: MemoryStore,
    pub cache: QueryCache<Vec<SearchHit>>,
    pub gateway: EmbeddingGateway,
    pub evidence: EvidenceLog,
}

impl Workspace {
    /// Construct a handle for a root. Prefer [`workspace_for`], which
    /// reuses handles across calls.
    pub fn open(root: &Path) -> Result<Arc<Self>> {
        let root = root
            .canonicalize()
            .with_context(|| format!("invalid workspace path: {}", root.display()))?;

        let config = Config::load_for_dir(&root);
        let store = Store::open(&root, config.storage.compression())?;
        let lexical = LexicalIndex::open_or_create(&store.dir().join("lexical"))?;
        let memory = MemoryStore::load(store.dir())?;
        let evidence = EvidenceLog::open(store.dir())?;
        let cache = QueryCache::new(config.cache.ttl_ms(), config.cache.capacity());
        let gateway = EmbeddingGateway::new(&config.embedding);

        Ok(Arc::new(Self {
            root,
            config,
            store,
            lexical,
            memory,
            cache,
            gateway,
            evidence,
        }))
    }

    /// A search engine view over this workspace.
    pub fn engine(&self) -> SearchEngine<'_> {
        SearchEngine {
            store: &self.store,
            lexical: &self.lexical,
            memory: &self.memory,
            gateway: &self.gateway,
            cache: &self.cache,
            config: &self.config,
        }
    }
}

/// Get (or lazily construct) the shared handle for a root.
pub fn workspace_for(root: &Path) -> Result<Arc<Workspace>> {
    let canonical = root
        .canonicalize()
        .with_context(|| format!("invalid workspace path: {}", root.display()))?;

    let mut registry = REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(existing) = registry.get(&canonical) {
        return Ok(existing.clone());
    }

    let workspace = Workspace::open(&canonical)?;
    registry.insert(canonical, workspace.clone());
    Ok(workspace)
}

/// Resolve the workspace root: explicit target, then the CTXGREP_ROOT
/// environment override, then the process working directory.
pub fn resolve_root(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_root) = std::env::var("CTXGREP_ROOT") {
        if !env_root.is_empty() {
            return Ok(PathBuf::from(env_root));
        }
    }
    std::env::current_dir().map_err(|_| RootResolutionError.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn registry_reuses_handles_per_root() {
        let dir = TempDir::new().unwrap();
        let a = workspace_for(dir.path()).unwrap();
        let b = workspace_for(dir.path()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = TempDir::new().unwrap();
        let c = workspace_for(other.path()).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn resolve_root_prefers_explicit() {
        let dir = TempDir::new().unwrap();
        let resolved = resolve_root(Some(dir.path())).unwrap();
        assert_eq!(resolved, dir.path());
    }
}
