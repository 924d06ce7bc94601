//! Include graph.
//!
//! Sources are scanned for `#include` directives once per run; resolved
//! lookups and per-root closures are memoized in concurrent maps so every
//! compile worker can query the graph without coordination. Memo keys carry
//! the fingerprint of the [`HeaderScope`] they were computed under, so
//! projects with different include paths never see each other's answers.

use crate::project::Project;
use dashmap::DashMap;
use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock};

static INCLUDE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*#\s*include\s*([<"])([^">]+)[">]"#).expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    pub name: String,
    pub angled: bool,
}

/// The lookup context a closure is computed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderScope {
    pub include_dirs: Vec<PathBuf>,
    pub working_dir: PathBuf,
    /// Maximum include nesting followed; zero means unlimited.
    pub depth: usize,
    /// Leave headers outside the working directory out of the result.
    pub ignore_external: bool,
}

impl HeaderScope {
    pub fn for_project(project: &Project) -> Self {
        Self {
            include_dirs: project.settings.direct.include_dirs.clone(),
            working_dir: project.working_dir.clone(),
            depth: project.header_recursion_depth,
            ignore_external: project.ignore_external_headers,
        }
    }

    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.include_dirs.hash(&mut hasher);
        self.working_dir.hash(&mut hasher);
        self.ignore_external.hash(&mut hasher);
        hasher.finish()
    }

    fn is_external(&self, header: &Path) -> bool {
        !header.starts_with(&self.working_dir)
    }
}

/// Lexically resolve `.` and `..` without touching the file system.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn scan_includes(text: &str) -> Vec<Include> {
    text.lines()
        .filter_map(|line| INCLUDE.captures(line))
        .map(|caps| Include {
            angled: &caps[1] == "<",
            name: caps[2].trim().to_string(),
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct HeaderGraph {
    includes: DashMap<PathBuf, Arc<Vec<Include>>>,
    lookups: DashMap<(PathBuf, String, u64), Option<PathBuf>>,
    closures: DashMap<(PathBuf, usize, u64), Arc<BTreeSet<PathBuf>>>,
}

impl HeaderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include directives of `file`. Unreadable files include nothing.
    pub fn includes(&self, file: &Path) -> Arc<Vec<Include>> {
        if let Some(hit) = self.includes.get(file) {
            return Arc::clone(&hit);
        }
        let found = fs::read(file)
            .map(|bytes| scan_includes(&String::from_utf8_lossy(&bytes)))
            .unwrap_or_default();
        Arc::clone(
            &self
                .includes
                .entry(file.to_path_buf())
                .or_insert_with(|| Arc::new(found)),
        )
    }

    /// Resolve one include of a file living in `dir`: the including file's
    /// directory first, then each include directory in order.
    fn lookup(&self, dir: &Path, include: &Include, scope: &HeaderScope, ctx: u64) -> Option<PathBuf> {
        let key = (dir.to_path_buf(), include.name.clone(), ctx);
        if let Some(hit) = self.lookups.get(&key) {
            return hit.clone();
        }
        let found = std::iter::once(dir)
            .chain(scope.include_dirs.iter().map(PathBuf::as_path))
            .map(|base| normalize_path(&base.join(&include.name)))
            .find(|candidate| candidate.is_file());
        self.lookups.entry(key).or_insert(found).clone()
    }

    /// Every header `root` transitively includes, the root itself excluded.
    ///
    /// Angle-bracket includes without an extension (`<vector>`) are standard
    /// library headers and are never followed. Unresolvable includes are
    /// skipped.
    pub fn resolve_headers(&self, root: &Path, scope: &HeaderScope) -> Arc<BTreeSet<PathBuf>> {
        let root = normalize_path(root);
        let ctx = scope.fingerprint();
        let memo_key = (root.clone(), scope.depth, ctx);
        if let Some(hit) = self.closures.get(&memo_key) {
            return Arc::clone(&hit);
        }

        // Breadth-first, so each header is expanded at its shallowest level.
        let mut result = BTreeSet::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        visited.insert(root.clone());
        let mut queue: VecDeque<(PathBuf, usize)> = VecDeque::new();
        queue.push_back((root.clone(), 0));

        while let Some((file, level)) = queue.pop_front() {
            let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
            for include in self.includes(&file).iter() {
                if include.angled && !include.name.contains('.') {
                    continue;
                }
                let Some(header) = self.lookup(&dir, include, scope, ctx) else {
                    continue;
                };
                if !visited.insert(header.clone()) {
                    continue;
                }
                if !(scope.ignore_external && scope.is_external(&header)) {
                    result.insert(header.clone());
                }
                if scope.depth == 0 || level + 1 < scope.depth {
                    queue.push_back((header, level + 1));
                }
            }
        }

        Arc::clone(
            &self
                .closures
                .entry(memo_key)
                .or_insert_with(|| Arc::new(result)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scope(dir: &Path) -> HeaderScope {
        HeaderScope {
            include_dirs: vec![dir.join("include")],
            working_dir: dir.to_path_buf(),
            depth: 0,
            ignore_external: false,
        }
    }

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_scan_includes() {
        let text = "#include <vector>\n  #  include \"a.h\"\n// #include \"b.h\" is still seen\nint x;\n#include <sys/types.h>\n";
        let found = scan_includes(text);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0], Include { name: "vector".into(), angled: true });
        assert_eq!(found[1], Include { name: "a.h".into(), angled: false });
        assert!(found[2].angled);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/w/src/../include/./a.h")),
            PathBuf::from("/w/include/a.h")
        );
    }

    #[test]
    fn test_transitive_and_cycles() {
        let tmp = TempDir::new().unwrap();
        let d = tmp.path();
        write(&d.join("main.cpp"), "#include \"a.h\"\n#include <string>\n");
        write(&d.join("a.h"), "#include <b.h>\n");
        write(&d.join("include/b.h"), "#include \"../a.h\"\n#include \"c.h\"\n");
        write(&d.join("include/c.h"), "#include \"b.h\"\n");

        let graph = HeaderGraph::new();
        let set = graph.resolve_headers(&d.join("main.cpp"), &scope(d));
        let expected: BTreeSet<PathBuf> = [d.join("a.h"), d.join("include/b.h"), d.join("include/c.h")]
            .into_iter()
            .collect();
        assert_eq!(*set, expected);

        let from_b = graph.resolve_headers(&d.join("include/b.h"), &scope(d));
        assert!(!from_b.contains(&d.join("include/b.h")));
        assert!(from_b.contains(&d.join("a.h")));
    }

    #[test]
    fn test_local_directory_wins_over_include_dirs() {
        let tmp = TempDir::new().unwrap();
        let d = tmp.path();
        write(&d.join("src/main.c"), "#include \"config.h\"\n");
        write(&d.join("src/config.h"), "");
        write(&d.join("include/config.h"), "");
        let graph = HeaderGraph::new();
        let set = graph.resolve_headers(&d.join("src/main.c"), &scope(d));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![&d.join("src/config.h")]);
    }

    #[test]
    fn test_depth_limit() {
        let tmp = TempDir::new().unwrap();
        let d = tmp.path();
        write(&d.join("main.c"), "#include \"a.h\"\n");
        write(&d.join("a.h"), "#include \"b.h\"\n");
        write(&d.join("b.h"), "#include \"c.h\"\n");
        write(&d.join("c.h"), "");
        let graph = HeaderGraph::new();

        let mut s = scope(d);
        s.depth = 1;
        assert_eq!(graph.resolve_headers(&d.join("main.c"), &s).len(), 1);
        s.depth = 2;
        assert_eq!(graph.resolve_headers(&d.join("main.c"), &s).len(), 2);
        s.depth = 0;
        assert_eq!(graph.resolve_headers(&d.join("main.c"), &s).len(), 3);
    }

    #[test]
    fn test_external_headers_ignored_but_traversed() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("proj");
        let external = tmp.path().join("sdk");
        write(&project.join("main.c"), "#include <sdk.h>\n");
        write(&external.join("sdk.h"), "#include \"local_shim.h\"\n");
        write(&external.join("local_shim.h"), "");

        let s = HeaderScope {
            include_dirs: vec![external.clone()],
            working_dir: project.clone(),
            depth: 0,
            ignore_external: true,
        };
        let graph = HeaderGraph::new();
        assert!(graph.resolve_headers(&project.join("main.c"), &s).is_empty());

        let s = HeaderScope {
            ignore_external: false,
            ..s
        };
        assert_eq!(graph.resolve_headers(&project.join("main.c"), &s).len(), 2);
    }

    #[test]
    fn test_concurrent_queries_agree() {
        let tmp = TempDir::new().unwrap();
        let d = tmp.path().to_path_buf();
        for i in 0..20 {
            let next = if i < 19 {
                format!("#include \"h{}.h\"\n#include \"h{}.h\"\n", i + 1, (i + 7) % 20)
            } else {
                String::new()
            };
            write(&d.join(format!("h{}.h", i)), &next);
        }
        write(&d.join("main.cpp"), "#include \"h0.h\"\n");

        let graph = Arc::new(HeaderGraph::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let graph = Arc::clone(&graph);
                let d = d.clone();
                std::thread::spawn(move || (*graph.resolve_headers(&d.join("main.cpp"), &scope(&d))).clone())
            })
            .collect();
        let sets: Vec<BTreeSet<PathBuf>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(sets[0].len(), 20);
        assert!(sets.windows(2).all(|w| w[0] == w[1]));
    }
}
