//! Recursive listing over directory handles.

use super::traits::{DirEntryKind, DirectoryHandle};
use std::io;
use std::sync::Arc;

/// List every entry under `dir` as a relative path.
///
/// Directories carry a trailing `/`. Output is sorted, so two trees with
/// the same shape list identically.
pub async fn tree(dir: Arc<dyn DirectoryHandle>) -> io::Result<Vec<String>> {
    let mut out = Vec::new();
    let mut stack = vec![(String::new(), dir)];

    while let Some((prefix, current)) = stack.pop() {
        for entry in current.list().await? {
            let path = format!("{prefix}{}", entry.name);
            match entry.kind {
                DirEntryKind::File => out.push(path),
                DirEntryKind::Directory => {
                    let child = current.get_directory(&entry.name, false).await?;
                    out.push(format!("{path}/"));
                    stack.push((format!("{path}/"), child));
                }
            }
        }
    }

    out.sort();
    Ok(out)
}
