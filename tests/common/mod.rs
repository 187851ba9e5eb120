use std::fs;
use std::path::Path;

use tempfile::TempDir;

/// Specification for a single file or directory in a test tree
pub struct FileSpec {
    /// Relative path within the test directory
    pub path: &'static str,
    /// Content of the file (None for directories)
    pub content: Option<&'static str>,
    /// Whether this is a directory
    pub is_dir: bool,
}

impl FileSpec {
    /// Create a file specification with empty content
    pub fn new(path: &'static str) -> Self {
        Self {
            path,
            content: Some(""),
            is_dir: false,
        }
    }

    /// Mark this as a directory
    pub fn dir(mut self) -> Self {
        self.is_dir = true;
        self.content = None;
        self
    }

    /// Set the file content
    pub fn content(mut self, content: &'static str) -> Self {
        self.content = Some(content);
        self
    }
}

/// Creates a temporary directory with the specified file structure.
/// The returned TempDir is cleaned up automatically when dropped.
pub fn create_test_tree(specs: &[FileSpec]) -> TempDir {
    let temp = TempDir::new().expect("Failed to create temp directory");
    populate_tree(temp.path(), specs);
    temp
}

/// Creates the specified structure under an existing root.
pub fn populate_tree(root: &Path, specs: &[FileSpec]) {
    for spec in specs {
        let path = root.join(spec.path);
        if spec.is_dir {
            fs::create_dir_all(&path).expect("Failed to create directory");
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("Failed to create parent directory");
            }
            fs::write(&path, spec.content.unwrap_or_default()).expect("Failed to write file");
        }
    }
}

/// Collects every path under `root` relative to it, sorted, excluding the
/// root itself.
#[allow(dead_code)]
pub fn list_tree(root: &Path) -> Vec<String> {
    let mut paths = Vec::new();
    collect_tree(root, root, &mut paths);
    paths.sort();
    paths
}

fn collect_tree(root: &Path, current: &Path, paths: &mut Vec<String>) {
    for entry in fs::read_dir(current).expect("Failed to read directory") {
        let entry = entry.expect("Failed to read entry");
        let path = entry.path();
        paths.push(
            path.strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/"),
        );
        if path.is_dir() {
            collect_tree(root, &path, paths);
        }
    }
}
