use std::path::{Path, PathBuf};

/// Finds the on-disk blob for a content ID under a source root.
#[derive(Debug, Clone)]
pub struct ContentLocator {
    source_root: PathBuf,
}

impl ContentLocator {
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Sharded layout (`root/<first char>/<id>`) first, then flat
    /// (`root/<id>`). When neither exists the sharded candidate is returned
    /// so callers can report the exact path that was missing. An empty or
    /// absent content ID resolves to the root itself.
    pub fn resolve(&self, content_id: Option<&str>) -> PathBuf {
        resolve_content_path(&self.source_root, content_id)
    }
}

pub fn resolve_content_path(source_root: &Path, content_id: Option<&str>) -> PathBuf {
    let Some(cid) = content_id.filter(|c| !c.is_empty()) else {
        return source_root.to_path_buf();
    };

    let sharded = match cid.chars().next() {
        Some(first) => source_root.join(first.to_string()).join(cid),
        None => source_root.join(cid),
    };
    if sharded.exists() {
        return sharded;
    }

    let flat = source_root.join(cid);
    if flat.exists() {
        return flat;
    }

    sharded
}
