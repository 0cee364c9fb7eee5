//! Mapping between the local watch root and the remote path prefix.

use crate::error::{Result, SyncError};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// An absolute path on the remote side, always `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePath(String);

impl RemotePath {
    /// Build a remote path, collapsing duplicate and trailing separators.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref();
        let absolute = raw.starts_with('/');
        let joined = raw
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect::<Vec<_>>()
            .join("/");

        if absolute {
            RemotePath(format!("/{}", joined))
        } else if joined.is_empty() {
            RemotePath(".".to_string())
        } else {
            RemotePath(joined)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, segment: &str) -> Self {
        if self.0 == "/" {
            RemotePath::new(format!("/{}", segment))
        } else {
            RemotePath::new(format!("{}/{}", self.0, segment))
        }
    }

    /// Parent directory, or `None` for the filesystem root.
    pub fn parent(&self) -> Option<RemotePath> {
        if self.0 == "/" || self.0 == "." {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(RemotePath("/".to_string())),
            Some(idx) => Some(RemotePath(self.0[..idx].to_string())),
            None => Some(RemotePath(".".to_string())),
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pure prefix substitution from the watch root to the remote prefix.
#[derive(Debug, Clone)]
pub struct PathTranslator {
    root: PathBuf,
    prefix: RemotePath,
}

impl PathTranslator {
    pub fn new(root: impl Into<PathBuf>, prefix: RemotePath) -> Self {
        Self {
            root: normalize_path(&root.into()),
            prefix,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn prefix(&self) -> &RemotePath {
        &self.prefix
    }

    /// Path of `local` relative to the watch root, with `/` separators.
    ///
    /// The root itself maps to an empty string.
    pub fn relative(&self, local: &Path) -> Result<String> {
        let outside = || SyncError::PathOutsideRoot {
            path: local.to_path_buf(),
            root: self.root.clone(),
        };

        // Reject traversal before normalizing so `root/../etc` never maps inside
        if local
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(outside());
        }

        let rel = normalize_path(local)
            .strip_prefix(&self.root)
            .map_err(|_| outside())?
            .to_path_buf();

        let mut segments = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(s) => segments.push(s.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return Err(outside()),
            }
        }
        Ok(segments.join("/"))
    }

    pub fn to_remote(&self, local: &Path) -> Result<RemotePath> {
        let rel = self.relative(local)?;
        if rel.is_empty() {
            Ok(self.prefix.clone())
        } else {
            Ok(self.prefix.join(&rel))
        }
    }
}

/// Normalize a path without requiring it to exist (unlike canonicalize)
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            c => normalized.push(c),
        }
    }
    normalized
}
