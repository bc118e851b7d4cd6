//! Path to directory-handle resolution with a handle cache.
//!
//! The store only knows handles, so every path-based operation walks from
//! the root one segment at a time. Walked directories are cached by their
//! joined path; only the Executor touches the cache, so it needs no lock.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use tracing::trace;

use vfsbridge_store::DirectoryHandle;

/// Split a path into segments.
///
/// Empty segments and `.` are dropped, `..` removes the previous segment
/// (and never climbs above the root). Leading, trailing and doubled
/// separators therefore do not matter.
pub fn segments(path: &str) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            name => out.push(name),
        }
    }
    out
}

/// Normalized form of `path`: its segments joined with `/`, no leading slash.
pub fn normalize(path: &str) -> String {
    segments(path).join("/")
}

/// Normalized parent of `path`, or `None` at the root.
pub fn parent(path: &str) -> Option<String> {
    let mut parts = segments(path);
    parts.pop()?;
    Some(parts.join("/"))
}

#[derive(Debug)]
pub struct Resolver {
    root: Arc<dyn DirectoryHandle>,
    cache: HashMap<String, Arc<dyn DirectoryHandle>>,
}

impl Resolver {
    pub fn new(root: Arc<dyn DirectoryHandle>) -> Self {
        Self {
            root,
            cache: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Arc<dyn DirectoryHandle> {
        &self.root
    }

    /// Resolve `path` to its parent directory handle and leaf name.
    ///
    /// With `create`, missing intermediate directories are created; the
    /// leaf itself is never touched. A path naming only the root is
    /// rejected because it has no leaf.
    pub async fn resolve(
        &mut self,
        path: &str,
        create: bool,
    ) -> io::Result<(Arc<dyn DirectoryHandle>, String)> {
        let mut parts = segments(path);
        let Some(leaf) = parts.pop() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path {path:?} names no entry"),
            ));
        };
        let leaf = leaf.to_string();

        let key = parts.join("/");
        if let Some(dir) = self.cache.get(&key) {
            return Ok((dir.clone(), leaf));
        }

        let mut dir = self.root.clone();
        let mut walked = String::new();
        for part in parts {
            if !walked.is_empty() {
                walked.push('/');
            }
            walked.push_str(part);

            dir = match self.cache.get(&walked).cloned() {
                Some(cached) => cached,
                None => {
                    let child = dir.get_directory(part, create).await?;
                    trace!(dir = %walked, "cached directory handle");
                    self.cache.insert(walked.clone(), child.clone());
                    child
                }
            };
        }
        Ok((dir, leaf))
    }

    /// Forget `path` and everything cached beneath it.
    pub fn evict(&mut self, path: &str) {
        let key = normalize(path);
        if key.is_empty() {
            self.cache.clear();
            return;
        }
        let prefix = format!("{key}/");
        self.cache
            .retain(|cached, _| cached != &key && !cached.starts_with(&prefix));
    }

    pub fn cached(&self, path: &str) -> bool {
        self.cache.contains_key(&normalize(path))
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use vfsbridge_store::MemoryDir;

    #[rstest]
    #[case("/a/b/c.db", vec!["a", "b", "c.db"])]
    #[case("a//b/./c", vec!["a", "b", "c"])]
    #[case("/a/../b", vec!["b"])]
    #[case("/../../x", vec!["x"])]
    #[case("/", vec![])]
    #[case("", vec![])]
    fn test_segments(#[case] path: &str, #[case] expected: Vec<&str>) {
        assert_eq!(segments(path), expected);
    }

    #[test]
    fn test_parent() {
        assert_eq!(parent("/a/b/c.db").as_deref(), Some("a/b"));
        assert_eq!(parent("/top").as_deref(), Some(""));
        assert_eq!(parent("/"), None);
    }

    #[tokio::test]
    async fn test_resolve_creates_intermediate_dirs() {
        let root = MemoryDir::root();
        let mut resolver = Resolver::new(root.clone());

        let (dir, leaf) = resolver.resolve("/a/b/c.db", true).await.unwrap();
        assert_eq!(leaf, "c.db");
        assert_eq!(dir.name(), "b");
        assert!(resolver.cached("a"));
        assert!(resolver.cached("a/b"));

        // The leaf is not created
        assert!(!dir.contains("c.db").await);
        assert!(root.contains("a").await);
    }

    #[tokio::test]
    async fn test_resolve_without_create_fails_on_missing_dir() {
        let mut resolver = Resolver::new(MemoryDir::root());
        let err = resolver.resolve("/missing/file", false).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(resolver.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_resolve_top_level_uses_root() {
        let root = MemoryDir::root();
        let mut resolver = Resolver::new(root);
        let (dir, leaf) = resolver.resolve("top.db", false).await.unwrap();
        assert_eq!(leaf, "top.db");
        assert_eq!(dir.name(), "");
    }

    #[tokio::test]
    async fn test_resolve_root_is_rejected() {
        let mut resolver = Resolver::new(MemoryDir::root());
        let err = resolver.resolve("/", true).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_evict_drops_descendants_only() {
        let mut resolver = Resolver::new(MemoryDir::root());
        resolver.resolve("/a/b/c/d", true).await.unwrap();
        resolver.resolve("/ab/x", true).await.unwrap();
        assert!(resolver.cached("a/b/c"));

        resolver.evict("/a/b");
        assert!(resolver.cached("a"));
        assert!(!resolver.cached("a/b"));
        assert!(!resolver.cached("a/b/c"));
        assert!(resolver.cached("ab"));
    }
}
