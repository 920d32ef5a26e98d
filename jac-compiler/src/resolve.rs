//! Resolution of dotted module names to source files.
//!
//! Search order: the importing package's own directory, then the configured
//! Jac roots, then (flag-gated) host-language roots for prebuilt fallbacks.

use std::fmt;
use std::path::{Path, PathBuf};

pub const JAC_EXT: &str = "jac";
pub const PACKAGE_INIT: &str = "__init__.jac";
/// Extension of prebuilt host modules preferred for bootstrap names.
pub const HOST_EXT: &str = "jir";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolvedKind {
    Package,
    Module,
    HostModule,
}

#[derive(Clone, Debug)]
pub struct Resolved {
    pub path: PathBuf,
    pub kind: ResolvedKind,
}

#[derive(Clone, Debug)]
pub struct ModuleNotFound {
    pub name: String,
    pub searched_paths: Vec<PathBuf>,
}

impl fmt::Display for ModuleNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "module '{}' not found (searched {} locations)",
            self.name,
            self.searched_paths.len()
        )
    }
}

impl std::error::Error for ModuleNotFound {}

#[derive(Clone, Debug, Default)]
pub struct SourceResolver {
    jac_roots: Vec<PathBuf>,
    host_roots: Vec<PathBuf>,
    /// When set, missing Jac modules fall back to host roots.
    pub host_fallback: bool,
}

impl SourceResolver {
    pub fn new(jac_roots: Vec<PathBuf>) -> Self {
        Self {
            jac_roots,
            host_roots: Vec::new(),
            host_fallback: false,
        }
    }

    pub fn with_host_roots(mut self, host_roots: Vec<PathBuf>) -> Self {
        self.host_roots = host_roots;
        self
    }

    pub fn jac_roots(&self) -> &[PathBuf] {
        &self.jac_roots
    }

    pub fn add_root(&mut self, root: PathBuf) {
        if !self.jac_roots.contains(&root) {
            self.jac_roots.push(root);
        }
    }

    /// Resolve a dotted logical name. `parent` is the directory of the
    /// importing package, searched first. `prefer_host` makes an adjacent
    /// prebuilt host module win over `.jac` (bootstrap-minimal names).
    pub fn resolve(
        &self,
        dotted: &str,
        parent: Option<&Path>,
        prefer_host: bool,
    ) -> Result<Resolved, ModuleNotFound> {
        let parts: Vec<&str> = dotted.split('.').collect();
        let mut searched = Vec::new();

        let roots = parent
            .map(|p| p.to_path_buf())
            .into_iter()
            .chain(self.jac_roots.iter().cloned());

        for root in roots {
            let candidate = parts.iter().fold(root, |acc, part| acc.join(part));

            let init = candidate.join(PACKAGE_INIT);
            if init.is_file() {
                return Ok(Resolved {
                    path: init,
                    kind: ResolvedKind::Package,
                });
            }

            let jac_file = candidate.with_extension(JAC_EXT);
            if jac_file.is_file() {
                if prefer_host {
                    let host_file = candidate.with_extension(HOST_EXT);
                    if host_file.is_file() {
                        return Ok(Resolved {
                            path: host_file,
                            kind: ResolvedKind::HostModule,
                        });
                    }
                }
                return Ok(Resolved {
                    path: jac_file,
                    kind: ResolvedKind::Module,
                });
            }
            searched.push(candidate);
        }

        if self.host_fallback {
            for root in &self.host_roots {
                let candidate = parts.iter().fold(root.clone(), |acc, part| acc.join(part));
                let host_file = candidate.with_extension(HOST_EXT);
                if host_file.is_file() {
                    return Ok(Resolved {
                        path: host_file,
                        kind: ResolvedKind::HostModule,
                    });
                }
                searched.push(candidate);
            }
        }

        Err(ModuleNotFound {
            name: dotted.to_string(),
            searched_paths: searched,
        })
    }

    /// Map a changed file path back to the dotted module it defines.
    /// Annex suffixes resolve to their base module. Used by hot reload.
    pub fn reverse(&self, path: &Path) -> Option<String> {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        for root in &self.jac_roots {
            let root = root.canonicalize().unwrap_or_else(|_| root.clone());
            let Ok(rel) = path.strip_prefix(&root) else {
                continue;
            };
            let mut parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            let file = parts.pop()?;
            if file == PACKAGE_INIT {
                return Some(parts.join("."));
            }
            let stem = file.strip_suffix(".jac")?;
            let base = stem
                .trim_end_matches(".impl")
                .trim_end_matches(".cl")
                .trim_end_matches(".test");
            parts.push(base.to_string());
            return Some(parts.join("."));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn resolves_plain_module() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("tasks.jac"));
        let resolver = SourceResolver::new(vec![tmp.path().to_path_buf()]);
        let resolved = resolver.resolve("tasks", None, false).unwrap();
        assert_eq!(resolved.kind, ResolvedKind::Module);
        assert!(resolved.path.ends_with("tasks.jac"));
    }

    #[test]
    fn resolves_package_init() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("pkg").join(PACKAGE_INIT));
        let resolver = SourceResolver::new(vec![tmp.path().to_path_buf()]);
        let resolved = resolver.resolve("pkg", None, false).unwrap();
        assert_eq!(resolved.kind, ResolvedKind::Package);
    }

    #[test]
    fn resolves_dotted_submodule() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("pkg").join(PACKAGE_INIT));
        touch(&tmp.path().join("pkg").join("inner.jac"));
        let resolver = SourceResolver::new(vec![tmp.path().to_path_buf()]);
        let resolved = resolver.resolve("pkg.inner", None, false).unwrap();
        assert!(resolved.path.ends_with("pkg/inner.jac"));
    }

    #[test]
    fn bootstrap_prefers_host_module() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("builtin.jac"));
        touch(&tmp.path().join("builtin.jir"));
        let resolver = SourceResolver::new(vec![tmp.path().to_path_buf()]);

        let normal = resolver.resolve("builtin", None, false).unwrap();
        assert_eq!(normal.kind, ResolvedKind::Module);

        let bootstrap = resolver.resolve("builtin", None, true).unwrap();
        assert_eq!(bootstrap.kind, ResolvedKind::HostModule);
    }

    #[test]
    fn parent_package_searched_first() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("root").join("util.jac"));
        touch(&tmp.path().join("pkg").join("util.jac"));
        let resolver = SourceResolver::new(vec![tmp.path().join("root")]);
        let resolved = resolver
            .resolve("util", Some(&tmp.path().join("pkg")), false)
            .unwrap();
        assert!(resolved.path.starts_with(tmp.path().join("pkg")));
    }

    #[test]
    fn missing_module_reports_searched_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = SourceResolver::new(vec![tmp.path().to_path_buf()]);
        let err = resolver.resolve("ghost", None, false).unwrap_err();
        assert_eq!(err.name, "ghost");
        assert!(!err.searched_paths.is_empty());
    }

    #[test]
    fn reverse_maps_annex_to_base_module() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("tasks.impl.jac"));
        let resolver = SourceResolver::new(vec![tmp.path().to_path_buf()]);
        assert_eq!(
            resolver.reverse(&tmp.path().join("tasks.impl.jac")).as_deref(),
            Some("tasks")
        );
    }

    #[test]
    fn reverse_maps_package_init() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("pkg").join(PACKAGE_INIT));
        let resolver = SourceResolver::new(vec![tmp.path().to_path_buf()]);
        assert_eq!(
            resolver.reverse(&tmp.path().join("pkg").join(PACKAGE_INIT)).as_deref(),
            Some("pkg")
        );
    }
}
