//! File system capability handed to the sandbox.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::resolve::normalize;

/// Everything the module loader and the `fs` built-in may touch.
pub trait Host {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
}

/// The real file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsHost;

impl Host for FsHost {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

/// A virtual file system; directories exist implicitly above each file.
#[derive(Debug, Default, Clone)]
pub struct MemoryHost {
    files: BTreeMap<PathBuf, String>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, contents: impl Into<String>) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, contents: impl Into<String>) {
        self.files.insert(normalize(path.as_ref()), contents.into());
    }
}

impl Host for MemoryHost {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(&normalize(path)).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("ENOENT: no such file or directory, open '{}'", path.display()),
            )
        })
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files.contains_key(&normalize(path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        let dir = normalize(path);
        self.files
            .keys()
            .any(|file| file != &dir && file.starts_with(&dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_host() {
        let host = MemoryHost::new().with_file("/app/src/theme.js", "module.exports = 1;");
        assert!(host.is_file(Path::new("/app/src/theme.js")));
        assert!(host.is_file(Path::new("/app/src/../src/theme.js")));
        assert!(host.is_dir(Path::new("/app/src")));
        assert!(host.is_dir(Path::new("/app")));
        assert!(!host.is_dir(Path::new("/app/src/theme.js")));
        assert!(!host.is_file(Path::new("/app/src")));
        assert_eq!(
            host.read_to_string(Path::new("/app/src/theme.js")).unwrap(),
            "module.exports = 1;"
        );
        let err = host.read_to_string(Path::new("/missing.js")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
