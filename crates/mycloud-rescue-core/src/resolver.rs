use crate::index::MetadataIndex;
use ahash::AHashSet;
use tracing::debug;

/// How the auth-root ancestor is chosen for stripping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RootStrip {
    /// Use [`MetadataIndex::find_auth_root`].
    #[default]
    Detect,
    /// Strip this exact name.
    Explicit(String),
    /// Keep paths as stored.
    Disabled,
}

/// Rebuild the logical relative path of `id` by walking parent pointers.
///
/// The walk stops at a dangling parent or at the first id seen twice, so
/// corrupt trees still yield a finite (possibly partial) path. Separators are
/// normalised to `/`, `root_to_strip` is removed, leading slashes dropped and,
/// if asked, `|` becomes `-`. Returns `None` for unknown ids, for paths that
/// end up empty and for paths containing a `..` segment.
pub fn reconstruct_path(
    index: &MetadataIndex,
    id: &str,
    root_to_strip: Option<&str>,
    sanitize_pipes: bool,
) -> Option<String> {
    let record = index.get(id)?;

    let mut parts: Vec<&str> = vec![record.name.as_str()];
    let mut visited: AHashSet<&str> = AHashSet::new();
    visited.insert(record.id.as_str());

    let mut next = record.parent_id.as_deref();
    while let Some(parent_id) = next {
        if !visited.insert(parent_id) {
            debug!("Parent cycle detected at {} while resolving {}", parent_id, id);
            break;
        }
        let Some(parent) = index.get(parent_id) else {
            break;
        };
        parts.push(parent.name.as_str());
        next = parent.parent_id.as_deref();
    }
    parts.reverse();

    let mut path = parts.join("/").replace('\\', "/");

    if let Some(root) = root_to_strip.filter(|r| !r.is_empty()) {
        path = path.replacen(&format!("{}/", root), "", 1);
        path = path.replace(root, "");
    }

    let mut path = path.trim_start_matches('/').to_string();
    if sanitize_pipes {
        path = path.replace('|', "-");
    }

    if path.split('/').any(|segment| segment == "..") {
        debug!("Refusing path {} for {}: it leaves the destination root", path, id);
        return None;
    }

    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}

/// [`reconstruct_path`] bound to one index and one set of options, so every
/// caller in a run produces identical paths.
#[derive(Debug, Clone)]
pub struct PathResolver<'a> {
    index: &'a MetadataIndex,
    root_to_strip: Option<String>,
    sanitize_pipes: bool,
}

impl<'a> PathResolver<'a> {
    pub fn new(index: &'a MetadataIndex, strip: &RootStrip, sanitize_pipes: bool) -> Self {
        let root_to_strip = match strip {
            RootStrip::Detect => index.find_auth_root().map(str::to_string),
            RootStrip::Explicit(name) if !name.is_empty() => Some(name.clone()),
            RootStrip::Explicit(_) | RootStrip::Disabled => None,
        };
        if let Some(root) = &root_to_strip {
            debug!("Stripping root directory prefix: {}", root);
        }
        Self {
            index,
            root_to_strip,
            sanitize_pipes,
        }
    }

    pub fn resolve(&self, id: &str) -> Option<String> {
        reconstruct_path(
            self.index,
            id,
            self.root_to_strip.as_deref(),
            self.sanitize_pipes,
        )
    }

    pub fn root_to_strip(&self) -> Option<&str> {
        self.root_to_strip.as_deref()
    }
}
