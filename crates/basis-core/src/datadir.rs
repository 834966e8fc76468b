//! On-disk data directories
//!
//! Layout: `<root>/<basis>/projects/<project>/targets/<target>`.

use std::io;
use std::path::{Component, Path, PathBuf};

/// A data directory owned by one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Data directory rooted at `root`
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create the directory and its parents
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    /// Directory for basis `name` under `root`
    #[must_use]
    pub fn basis(root: &Path, name: &str) -> Self {
        Self::new(root.join(sanitize(name)))
    }

    /// Child directory for project `name`
    #[must_use]
    pub fn project(&self, name: &str) -> Self {
        Self::new(self.root.join("projects").join(sanitize(name)))
    }

    /// Child directory for target `name`
    #[must_use]
    pub fn target(&self, name: &str) -> Self {
        Self::new(self.root.join("targets").join(sanitize(name)))
    }
}

/// Map `name` to a single normal path segment
///
/// Separators become `_`; anything that would not be one plain component
/// (empty, `.`, `..`, a drive prefix) is prefixed with `_`.
fn sanitize(name: &str) -> String {
    let flat = name.replace(['/', '\\'], "_");
    let mut components = Path::new(&flat).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => flat,
        _ => format!("_{flat}"),
    }
}
