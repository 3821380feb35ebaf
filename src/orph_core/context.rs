use std::path::{Path, PathBuf};

use crate::orph_core::metadata::MetadataReader;
use crate::orph_core::store::OrphdatSet;

/// One-slot cache of the most recently opened per-directory catalog.
/// Sequential access to files in the same directory stays O(1); opening any
/// other catalog evicts the slot. Sets are cloned in and out so cached state
/// never aliases a caller's copy.
#[derive(Default)]
pub struct StoreCache {
    slot: Option<(PathBuf, OrphdatSet)>,
}

impl StoreCache {
    pub fn cached_set(&self, store_path: &Path) -> Option<&OrphdatSet> {
        match &self.slot {
            Some((path, set)) if path == store_path => Some(set),
            _ => None,
        }
    }

    pub fn remember(&mut self, store_path: &Path, set: &OrphdatSet) {
        self.slot = Some((store_path.to_path_buf(), set.clone()));
    }

    pub fn forget(&mut self, store_path: &Path) {
        if let Some((path, _)) = &self.slot {
            if path == store_path {
                self.slot = None;
            }
        }
    }
}

/// Mutable session state threaded through operations.
pub struct Context {
    pub cache: StoreCache,
    pub metadata: MetadataReader,
    /// Replay the previous interactive command on an empty input line.
    pub repeat_commands: bool,
    pub last_command: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Context {
            cache: StoreCache::default(),
            metadata: MetadataReader::new(),
            repeat_commands: true,
            last_command: None,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
