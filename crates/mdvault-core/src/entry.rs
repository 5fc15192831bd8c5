use serde::{Deserialize, Serialize};

/// Storage locations a file can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageLocation {
    Local,
    Remote,
}

impl Default for StorageLocation {
    fn default() -> Self {
        Self::Local
    }
}

impl std::fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// Minimal descriptor used to address a file or directory.
///
/// `path` is in the address space of `storage_location`: a POSIX path for
/// local storage, a URL (or base-relative path) for remote storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub path: String,
    #[serde(default)]
    pub storage_location: StorageLocation,
    #[serde(default)]
    pub is_dir: bool,
}

impl FileRef {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            storage_location: StorageLocation::Local,
            is_dir: false,
        }
    }

    pub fn remote(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            storage_location: StorageLocation::Remote,
            is_dir: false,
        }
    }

    pub fn dir(mut self) -> Self {
        self.is_dir = true;
        self
    }

    /// Same location and kind, different path.
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            storage_location: self.storage_location,
            is_dir: self.is_dir,
        }
    }
}

/// A file or directory as reported by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Canonical address in its storage address space
    pub path: String,
    /// Display name (decorated with the path for tree roots)
    pub name: String,
    pub storage_location: StorageLocation,
    pub is_dir: bool,
    /// Size in bytes (0 for directories)
    #[serde(default)]
    pub size: u64,
    /// Last modified time in Unix milliseconds, backend clock
    #[serde(default)]
    pub last_modified: i64,
    /// Opaque staleness token: `"{mtime}-{size}"` locally, ETag remotely
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub readonly: bool,
    /// Set only on entries explicitly opened as a tree root
    #[serde(default)]
    pub is_root: bool,
    /// `Some` only for directories. `Some(vec![])` is an empty (or unloaded
    /// depth) directory, `None` is a file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileEntry>>,
}

impl FileEntry {
    pub fn file_ref(&self) -> FileRef {
        FileRef {
            path: self.path.clone(),
            storage_location: self.storage_location,
            is_dir: self.is_dir,
        }
    }

    /// Child entries, empty for files.
    pub fn children(&self) -> &[FileEntry] {
        self.children.as_deref().unwrap_or(&[])
    }

    /// The same entry with children dropped to match a plain stat result.
    pub fn without_children(&self) -> Self {
        Self {
            children: if self.is_dir { Some(Vec::new()) } else { None },
            ..self.clone()
        }
    }

    /// Visit this entry and every descendant, parents first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a FileEntry)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }
}

/// Version token synthesized for local files.
pub fn local_version(mtime_ms: i64, size: u64) -> String {
    format!("{}-{}", mtime_ms, size)
}

/// Order a listing: directories first, then case-insensitive by name.
pub fn sort_entries(entries: &mut [FileEntry]) {
    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, is_dir: bool, children: Option<Vec<FileEntry>>) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            storage_location: StorageLocation::Local,
            is_dir,
            size: 0,
            last_modified: 0,
            version: None,
            readonly: false,
            is_root: false,
            children,
        }
    }

    #[test]
    fn test_walk_visits_parents_first() {
        let tree = entry(
            "/a",
            true,
            Some(vec![
                entry("/a/b", true, Some(vec![entry("/a/b/c.md", false, None)])),
                entry("/a/d.md", false, None),
            ]),
        );
        let mut seen = Vec::new();
        tree.walk(&mut |e| seen.push(e.path.as_str()));
        assert_eq!(seen, vec!["/a", "/a/b", "/a/b/c.md", "/a/d.md"]);
    }

    #[test]
    fn test_children_absent_for_files() {
        let file = entry("/a.md", false, None);
        assert!(file.children.is_none());
        assert!(file.children().is_empty());
        assert!(file.without_children().children.is_none());

        let dir = entry("/a", true, Some(vec![entry("/a/x", false, None)]));
        assert_eq!(dir.without_children().children, Some(Vec::new()));
    }

    #[test]
    fn test_serde_uses_camel_case() {
        let json = serde_json::to_value(entry("/a.md", false, None)).unwrap();
        assert_eq!(json["storageLocation"], "local");
        assert_eq!(json["isDir"], false);
        assert!(json.get("children").is_none());
    }

    #[test]
    fn test_sort_entries_puts_directories_first() {
        let mut entries = vec![
            entry("/r/b.md", false, None),
            entry("/r/Zeta", true, Some(vec![])),
            entry("/r/A.md", false, None),
            entry("/r/alpha", true, Some(vec![])),
        ];
        sort_entries(&mut entries);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "Zeta", "A.md", "b.md"]);
    }

    #[test]
    fn test_local_version_format() {
        assert_eq!(local_version(1700000000000, 42), "1700000000000-42");
    }
}
