//! Node-style module resolution over a [`Host`].

use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use super::host::Host;

const NODE_BUILTINS: &[&str] = &[
    "assert",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "crypto",
    "dgram",
    "dns",
    "events",
    "fs",
    "http",
    "http2",
    "https",
    "module",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "querystring",
    "readline",
    "stream",
    "string_decoder",
    "timers",
    "tls",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "worker_threads",
    "zlib",
];

/// Built-ins the sandbox implements on top of the host.
pub const SUPPORTED_BUILTINS: &[&str] = &["fs", "path", "os", "url"];

/// Platform module name for `specifier`, accepting the `node:` prefix.
pub fn builtin_name(specifier: &str) -> Option<&str> {
    let name = specifier.strip_prefix("node:").unwrap_or(specifier);
    let root = name.split('/').next().unwrap_or(name);
    NODE_BUILTINS.contains(&root).then_some(name)
}

/// Lexically resolve `.` and `..` components.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn is_path_like(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
        || Path::new(specifier).is_absolute()
}

pub struct Resolver {
    host: Rc<dyn Host>,
    extensions: Vec<String>,
    root_dir: Option<PathBuf>,
}

impl Resolver {
    pub fn new(host: Rc<dyn Host>, extensions: Vec<String>, root_dir: Option<PathBuf>) -> Self {
        Self {
            host,
            extensions,
            root_dir,
        }
    }

    /// Resolve `specifier` as required from a module living in `from_dir`.
    pub fn resolve(&self, from_dir: &Path, specifier: &str) -> Option<PathBuf> {
        if is_path_like(specifier) {
            let base = normalize(&from_dir.join(specifier));
            return self.load(&base);
        }

        for dir in from_dir.ancestors() {
            if dir.file_name().is_some_and(|name| name == "node_modules") {
                continue;
            }
            let candidate = dir.join("node_modules").join(specifier);
            if let Some(found) = self.load(&candidate) {
                return Some(found);
            }
        }

        let root = self.root_dir.as_ref()?;
        self.load(&normalize(&root.join(specifier)))
    }

    fn load(&self, base: &Path) -> Option<PathBuf> {
        self.load_as_file(base).or_else(|| self.load_as_dir(base))
    }

    fn load_as_file(&self, base: &Path) -> Option<PathBuf> {
        if self.host.is_file(base) {
            return Some(base.to_path_buf());
        }
        self.extensions.iter().find_map(|ext| {
            let mut candidate = base.as_os_str().to_owned();
            candidate.push(ext);
            let candidate = PathBuf::from(candidate);
            self.host.is_file(&candidate).then_some(candidate)
        })
    }

    fn load_as_dir(&self, dir: &Path) -> Option<PathBuf> {
        if !self.host.is_dir(dir) {
            return None;
        }
        if let Some(main) = self.package_main(dir) {
            let entry = normalize(&dir.join(main));
            if let Some(found) = self
                .load_as_file(&entry)
                .or_else(|| self.load_index(&entry))
            {
                return Some(found);
            }
        }
        self.load_index(dir)
    }

    fn load_index(&self, dir: &Path) -> Option<PathBuf> {
        self.extensions.iter().find_map(|ext| {
            let candidate = dir.join(format!("index{}", ext));
            self.host.is_file(&candidate).then_some(candidate)
        })
    }

    fn package_main(&self, dir: &Path) -> Option<String> {
        let manifest = self.host.read_to_string(&dir.join("package.json")).ok()?;
        let json: serde_json::Value = serde_json::from_str(&manifest).ok()?;
        json.get("main")?.as_str().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::host::MemoryHost;

    fn resolver(host: MemoryHost, root_dir: Option<&str>) -> Resolver {
        Resolver::new(
            Rc::new(host),
            vec![".json".into(), ".js".into(), ".ts".into()],
            root_dir.map(PathBuf::from),
        )
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize(Path::new("/app/src/../lib/./a.js")),
            PathBuf::from("/app/lib/a.js")
        );
        assert_eq!(normalize(Path::new("/../a")), PathBuf::from("/a"));
    }

    #[test]
    fn test_builtin_names() {
        assert_eq!(builtin_name("fs"), Some("fs"));
        assert_eq!(builtin_name("node:path"), Some("path"));
        assert_eq!(builtin_name("fs/promises"), Some("fs/promises"));
        assert_eq!(builtin_name("lodash"), None);
        assert_eq!(builtin_name("./fs"), None);
    }

    #[test]
    fn test_relative_with_extensions_and_index() {
        let host = MemoryHost::new()
            .with_file("/app/src/theme.ts", "")
            .with_file("/app/src/tokens/index.js", "")
            .with_file("/app/src/data.json", "{}");
        let r = resolver(host, None);
        let from = Path::new("/app/src");
        assert_eq!(r.resolve(from, "./theme"), Some(PathBuf::from("/app/src/theme.ts")));
        assert_eq!(
            r.resolve(from, "./tokens"),
            Some(PathBuf::from("/app/src/tokens/index.js"))
        );
        assert_eq!(r.resolve(from, "./data.json"), Some(PathBuf::from("/app/src/data.json")));
        assert_eq!(r.resolve(from, "../src/theme"), Some(PathBuf::from("/app/src/theme.ts")));
        assert_eq!(r.resolve(from, "./missing"), None);
    }

    #[test]
    fn test_node_modules_walk_and_package_main() {
        let host = MemoryHost::new()
            .with_file("/app/node_modules/colors/package.json", r#"{ "main": "lib/main" }"#)
            .with_file("/app/node_modules/colors/lib/main.js", "")
            .with_file("/app/node_modules/plain/index.js", "");
        let r = resolver(host, None);
        let from = Path::new("/app/src/components");
        assert_eq!(
            r.resolve(from, "colors"),
            Some(PathBuf::from("/app/node_modules/colors/lib/main.js"))
        );
        assert_eq!(
            r.resolve(from, "plain"),
            Some(PathBuf::from("/app/node_modules/plain/index.js"))
        );
        assert_eq!(r.resolve(from, "absent"), None);
    }

    #[test]
    fn test_root_dir_fallback() {
        let host = MemoryHost::new().with_file("/app/src/styles/vars.js", "");
        let r = resolver(host, Some("/app/src"));
        assert_eq!(
            r.resolve(Path::new("/app/src/pages"), "styles/vars"),
            Some(PathBuf::from("/app/src/styles/vars.js"))
        );
    }
}
