use crate::{PodFsError, PodFsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ROOT_PATH: &str = "/";
pub const DEFAULT_MAX_NAME_LENGTH: usize = 100;

/// Canonical absolute path inside a namespace.
///
/// Always starts with `/`, never ends with `/` (except the root itself) and
/// never contains empty components. Two paths that name the same node compare
/// equal, which matters because the feed topic is derived from this string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodPath(String);

impl PodPath {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(normalize_path(path.as_ref()))
    }

    pub fn root() -> Self {
        Self(ROOT_PATH.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return non-empty path components split by `/`.
    /// Example: `/a/b` -> ["a", "b"], `/` -> []
    pub fn components(&self) -> Vec<&str> {
        self.0.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Split path into parent and name components
    pub fn split_parent_name(&self) -> Option<(PodPath, String)> {
        if self.is_root() {
            return None;
        }
        let last_slash = self.0.rfind('/')?;
        let parent = if last_slash == 0 {
            ROOT_PATH.to_string()
        } else {
            self.0[..last_slash].to_string()
        };
        let name = self.0[last_slash + 1..].to_string();
        if name.is_empty() {
            None
        } else {
            Some((PodPath(parent), name))
        }
    }

    pub fn parent(&self) -> Option<PodPath> {
        self.split_parent_name().map(|(parent, _)| parent)
    }

    pub fn name(&self) -> Option<String> {
        self.split_parent_name().map(|(_, name)| name)
    }

    pub fn join(&self, name: &str) -> PodPath {
        if self.is_root() {
            PodPath::new(format!("/{}", name))
        } else {
            PodPath::new(format!("{}/{}", self.0, name))
        }
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_PATH
    }

    /// True when `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &PodPath) -> bool {
        is_descendant_path(&self.0, &ancestor.0)
    }

    /// Replace the `old_prefix` part of this path by `new_prefix`.
    pub fn rebase(&self, old_prefix: &PodPath, new_prefix: &PodPath) -> Option<PodPath> {
        if self == old_prefix {
            return Some(new_prefix.clone());
        }
        if !self.is_descendant_of(old_prefix) {
            return None;
        }
        let rest = if old_prefix.is_root() {
            &self.0[1..]
        } else {
            &self.0[old_prefix.0.len() + 1..]
        };
        Some(new_prefix.join(rest))
    }
}

impl fmt::Display for PodPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PodPath {
    fn from(value: &str) -> Self {
        PodPath::new(value)
    }
}

impl From<String> for PodPath {
    fn from(value: String) -> Self {
        PodPath::new(value)
    }
}

pub fn normalize_path(path: &str) -> String {
    let components: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if components.is_empty() {
        return ROOT_PATH.to_string();
    }
    format!("/{}", components.join("/"))
}

fn is_descendant_path(potential_child: &str, potential_parent: &str) -> bool {
    let child = potential_child.trim_end_matches('/');
    let parent = potential_parent.trim_end_matches('/');

    if child.len() <= parent.len() {
        return false;
    }

    child.starts_with(parent) && (child.as_bytes().get(parent.len()) == Some(&b'/') || parent.is_empty())
}

/// Check a single file or directory name before it is used to build a path.
pub fn validate_name(name: &str, max_len: usize) -> PodFsResult<()> {
    if name.is_empty() {
        return Err(PodFsError::InvalidParam("name is empty".to_string()));
    }
    if name.chars().count() > max_len {
        return Err(PodFsError::InvalidParam(format!(
            "name too long: {} chars, limit {}",
            name.chars().count(),
            max_len
        )));
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(PodFsError::InvalidParam(format!("invalid name: {}", name)));
    }
    Ok(())
}
