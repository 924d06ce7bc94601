//! Source chunking.
//!
//! [`make_chunks`] packs a project's sources into chunks; [`plan_units`]
//! then decides, per chunk and per run, whether the chunk is compiled as one
//! merged translation unit or as individual files.
//!
//! Whether a chunk was last built merged is kept in an explicit record
//! (`chunks.json` in the project cache), not guessed from which object files
//! happen to exist.

use crate::cache::sha256_hex;
use crate::error::BuildError;
use crate::headers::normalize_path;
use crate::project::{ChunkSettings, Language, Project};
use crate::staleness::StalenessOracle;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub name: String,
    pub files: Vec<PathBuf>,
    pub size: u64,
}

impl Chunk {
    fn new(stem: &str, files: Vec<PathBuf>, size: u64) -> Self {
        Self {
            name: chunk_name(stem, &files),
            files,
            size,
        }
    }

    pub fn is_single(&self) -> bool {
        self.files.len() == 1
    }

    pub fn is_cpp(&self) -> bool {
        self.files
            .first()
            .and_then(|f| Language::from_path(f))
            .is_some_and(Language::is_cpp_class)
    }
}

/// `<stem>_chunk_<hash>`, where the hash covers the normalized member paths.
pub fn chunk_name(stem: &str, files: &[PathBuf]) -> String {
    let joined = files
        .iter()
        .map(|f| normalize_path(f).to_string_lossy().replace('\\', "/"))
        .collect::<Vec<_>>()
        .join("__");
    let mut digest = sha256_hex(joined.as_bytes());
    digest.truncate(16);
    format!("{}_chunk_{}", stem, digest)
}

/// Turn a path pattern with `*` and `?` wildcards into an anchored regex.
fn wildcard(pattern: &str, base: &Path) -> Result<Regex, regex::Error> {
    let full = if Path::new(pattern).is_absolute() {
        PathBuf::from(pattern)
    } else {
        base.join(pattern)
    };
    let escaped = regex::escape(&normalize_path(&full).to_string_lossy());
    let body = escaped.replace(r"\*", ".*").replace(r"\?", ".");
    Regex::new(&format!("^{}$", body))
}

fn path_matches(regex: &Regex, path: &Path) -> bool {
    regex.is_match(&normalize_path(path).to_string_lossy())
}

/// Which files may share a chunk.
#[derive(Debug, Default)]
pub struct ChunkRules {
    no_chunk: Vec<Regex>,
    no_chunk_together: Vec<Vec<Regex>>,
}

impl ChunkRules {
    pub fn new(settings: &ChunkSettings, working_dir: &Path) -> Result<Self, regex::Error> {
        let no_chunk = settings
            .no_chunk
            .iter()
            .map(|p| wildcard(p, working_dir))
            .collect::<Result<_, _>>()?;
        let no_chunk_together = settings
            .no_chunk_together
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|p| wildcard(p, working_dir))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            no_chunk,
            no_chunk_together,
        })
    }

    /// Files that are always compiled alone.
    pub fn is_excluded(&self, file: &Path) -> bool {
        Language::from_path(file).is_none_or(Language::is_objective)
            || self.no_chunk.iter().any(|r| path_matches(r, file))
    }

    fn in_group(group: &[Regex], file: &Path) -> bool {
        group.iter().any(|r| path_matches(r, file))
    }

    /// Whether `file` may join a chunk currently holding `members`.
    pub fn can_join(&self, members: &[PathBuf], file: &Path) -> bool {
        if self.is_excluded(file) {
            return false;
        }
        let class = Language::from_path(file).map(Language::is_cpp_class);
        if let Some(first) = members.first()
            && Language::from_path(first).map(Language::is_cpp_class) != class
        {
            return false;
        }
        self.no_chunk_together.iter().all(|group| {
            !Self::in_group(group, file) || !members.iter().any(|m| Self::in_group(group, m))
        })
    }
}

/// Pack `sources` into chunks.
///
/// Files are taken largest first. Each chunk opens with the largest file
/// still unplaced and takes following files until the count or byte limit
/// would be exceeded; files that may not join the open chunk wait for a
/// later one.
pub fn make_chunks(
    sources: &[PathBuf],
    settings: &ChunkSettings,
    rules: &ChunkRules,
    stem: &str,
    size_of: impl Fn(&Path) -> u64,
) -> Vec<Chunk> {
    let mut sized: Vec<(PathBuf, u64)> = sources.iter().map(|s| (s.clone(), size_of(s))).collect();
    sized.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    if !settings.use_chunks && !settings.unity {
        return sized
            .into_iter()
            .map(|(file, size)| Chunk::new(stem, vec![file], size))
            .collect();
    }

    let mut chunks = Vec::new();
    let mut pending: VecDeque<(PathBuf, u64)> = VecDeque::new();
    for (file, size) in sized {
        if rules.is_excluded(&file) {
            chunks.push(Chunk::new(stem, vec![file], size));
        } else {
            pending.push_back((file, size));
        }
    }

    // Unity mode only separates what may never share a translation unit.
    let (count_limit, byte_limit) = if settings.unity {
        (0, 0)
    } else {
        (settings.chunk_size, settings.chunk_filesize)
    };

    while let Some((first, first_size)) = pending.pop_front() {
        let mut files = vec![first];
        let mut total = first_size;
        let mut deferred = VecDeque::new();
        while let Some((file, size)) = pending.pop_front() {
            if !rules.can_join(&files, &file) {
                deferred.push_back((file, size));
                continue;
            }
            let over_count = count_limit > 0 && files.len() + 1 > count_limit;
            let over_bytes = byte_limit > 0 && total + size > byte_limit;
            if over_count || over_bytes {
                pending.push_front((file, size));
                break;
            }
            files.push(file);
            total += size;
        }
        // Deferred files were larger than everything still pending.
        deferred.extend(pending);
        pending = deferred;
        chunks.push(Chunk::new(stem, files, total));
    }
    chunks
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub members: Vec<PathBuf>,
    pub merged: bool,
}

/// How each chunk was last built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunks: BTreeMap<String, ChunkEntry>,
}

impl ChunkRecord {
    pub fn path(project: &Project) -> PathBuf {
        project.cache_dir.join("chunks.json")
    }

    /// A missing or unreadable record means no chunk was built merged.
    pub fn load(path: &Path) -> Self {
        let Ok(text) = fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!("ignoring corrupt chunk record {}: {}", path.display(), e);
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), BuildError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::io("failed to create", parent, e))?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| BuildError::io("failed to serialize", path, e.into()))?;
        fs::write(path, text).map_err(|e| BuildError::io("failed to write", path, e))
    }

    fn was_merged(&self, chunk: &Chunk) -> bool {
        self.chunks
            .get(&chunk.name)
            .is_some_and(|e| e.merged && e.members == chunk.files)
    }
}

/// One compile job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildUnit {
    File {
        source: PathBuf,
        object: PathBuf,
    },
    Merged {
        chunk_name: String,
        unity_source: PathBuf,
        object: PathBuf,
        members: Vec<PathBuf>,
    },
}

impl BuildUnit {
    /// The file handed to the compiler.
    pub fn input(&self) -> &Path {
        match self {
            BuildUnit::File { source, .. } => source,
            BuildUnit::Merged { unity_source, .. } => unity_source,
        }
    }

    pub fn object(&self) -> &Path {
        match self {
            BuildUnit::File { object, .. } | BuildUnit::Merged { object, .. } => object,
        }
    }

    /// Sources whose file state follows this unit.
    pub fn sources(&self) -> Vec<PathBuf> {
        match self {
            BuildUnit::File { source, .. } => vec![source.clone()],
            BuildUnit::Merged { members, .. } => members.clone(),
        }
    }

    pub fn language(&self) -> Language {
        Language::from_path(self.input()).unwrap_or(Language::Cpp)
    }

    pub fn label(&self) -> String {
        match self {
            BuildUnit::File { source, .. } => source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            BuildUnit::Merged {
                chunk_name, members, ..
            } => format!("{} ({} files)", chunk_name, members.len()),
        }
    }
}

#[derive(Debug, Default)]
pub struct ChunkPlan {
    pub units: Vec<BuildUnit>,
    /// Every object the link step consumes, in source order.
    pub objects: Vec<PathBuf>,
}

struct Decision<'c> {
    chunk: &'c Chunk,
    merged_object: PathBuf,
    unity_source: PathBuf,
    was_merged: bool,
    /// Members judged stale against whatever object currently holds them.
    stale: Vec<PathBuf>,
    merge: bool,
}

fn merged_paths(project: &Project, chunk: &Chunk) -> (PathBuf, PathBuf) {
    let ext = if chunk.is_cpp() { "cpp" } else { "c" };
    let unity = project.cache_dir.join(format!("{}.{}", chunk.name, ext));
    let object = project.obj_dir.join(format!(
        "{}.{}{}",
        chunk.name,
        ext,
        project.toolchain.compiler().object_extension()
    ));
    (unity, object)
}

/// Decide how every chunk is built this run and prepare the files that
/// decision needs: unity sources are (re)written, objects made obsolete by a
/// change of plan are removed, and the chunk record is updated.
pub fn plan_units(
    project: &Project,
    chunks: &[Chunk],
    oracle: &StalenessOracle,
    workers: usize,
    size_of: impl Fn(&Path) -> u64,
) -> Result<ChunkPlan, BuildError> {
    let settings = &project.chunking;
    let by_bytes = settings.chunk_size == 0 && settings.chunk_filesize > 0;
    let record_path = ChunkRecord::path(project);
    let previous = ChunkRecord::load(&record_path);

    let mut decisions = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let (unity_source, merged_object) = merged_paths(project, chunk);
        if chunk.is_single() {
            let file = &chunk.files[0];
            let stale = oracle
                .check(file, &project.object_path(file))
                .map(|_| vec![file.clone()])
                .unwrap_or_default();
            decisions.push(Decision {
                chunk,
                merged_object,
                unity_source,
                was_merged: false,
                stale,
                merge: false,
            });
            continue;
        }

        let was_merged = previous.was_merged(chunk) && merged_object.exists();
        let stale: Vec<PathBuf> = chunk
            .files
            .iter()
            .filter(|f| {
                let object = if was_merged {
                    merged_object.clone()
                } else {
                    project.object_path(f)
                };
                oracle.check(f, &object).is_some()
            })
            .cloned()
            .collect();
        let over_tolerance = if by_bytes {
            stale.iter().map(|f| size_of(f)).sum::<u64>() > settings.chunk_size_tolerance
        } else {
            stale.len() > settings.chunk_tolerance
        };
        let merge = !stale.is_empty() && (settings.unity || over_tolerance);
        tracing::debug!(
            "{}: chunk {} has {}/{} stale files, merged before: {}, merge now: {}",
            project.key,
            chunk.name,
            stale.len(),
            chunk.files.len(),
            was_merged,
            merge
        );
        decisions.push(Decision {
            chunk,
            merged_object,
            unity_source,
            was_merged,
            stale,
            merge,
        });
    }

    let planned = decisions
        .iter()
        .map(|d| match (d.merge, d.was_merged && !d.stale.is_empty()) {
            (true, _) => 1,
            (false, true) => d.chunk.files.len(),
            (false, false) => d.stale.len(),
        })
        .sum::<usize>();
    if !settings.unity && planned < workers {
        for d in decisions.iter_mut().filter(|d| d.merge) {
            tracing::debug!("{}: splitting {} to keep {} workers busy", project.key, d.chunk.name, workers);
            d.merge = false;
        }
    }

    let mut plan = ChunkPlan::default();
    let mut record = ChunkRecord::default();
    for d in decisions {
        let chunk = d.chunk;
        if d.merge {
            write_unity_source(&d.unity_source, &chunk.files, &size_of)?;
            for member in &chunk.files {
                remove_if_present(&project.object_path(member))?;
            }
            plan.units.push(BuildUnit::Merged {
                chunk_name: chunk.name.clone(),
                unity_source: d.unity_source,
                object: d.merged_object.clone(),
                members: chunk.files.clone(),
            });
            plan.objects.push(d.merged_object);
        } else if d.was_merged && d.stale.is_empty() {
            plan.objects.push(d.merged_object);
        } else {
            let rebuild_all = d.was_merged;
            if rebuild_all {
                tracing::warn!(
                    "Breaking chunk {} into individual files to improve future iteration turnaround",
                    chunk.name
                );
                remove_if_present(&d.merged_object)?;
            }
            for file in &chunk.files {
                let object = project.object_path(file);
                if rebuild_all || d.stale.contains(file) {
                    plan.units.push(BuildUnit::File {
                        source: file.clone(),
                        object: object.clone(),
                    });
                }
                plan.objects.push(object);
            }
        }

        if !chunk.is_single() {
            let merged = d.merge || (d.was_merged && d.stale.is_empty());
            record.chunks.insert(
                chunk.name.clone(),
                ChunkEntry {
                    members: chunk.files.clone(),
                    merged,
                },
            );
        }
    }

    if record != previous {
        record.save(&record_path)?;
    }
    Ok(plan)
}

fn remove_if_present(path: &Path) -> Result<(), BuildError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BuildError::io("failed to remove", path, e)),
    }
}

pub fn unity_source_text(members: &[PathBuf], size_of: impl Fn(&Path) -> u64) -> String {
    let mut text = String::from("// Automatically generated file, do not edit.\n");
    let mut total = 0;
    for member in members {
        let size = size_of(member);
        total += size;
        text.push_str(&format!(
            "#include \"{}\" // {} bytes\n",
            member.display().to_string().replace('\\', "/"),
            size
        ));
    }
    text.push_str(&format!("// Total size: {} bytes\n", total));
    text
}

/// Rewrite the unity source only when its content changes.
fn write_unity_source(
    path: &Path,
    members: &[PathBuf],
    size_of: impl Fn(&Path) -> u64,
) -> Result<(), BuildError> {
    let text = unity_source_text(members, size_of);
    if fs::read_to_string(path).ok().as_deref() == Some(text.as_str()) {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BuildError::io("failed to create", parent, e))?;
    }
    fs::write(path, text).map_err(|e| BuildError::io("failed to write", path, e))
}

pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BuildCache;
    use crate::headers::HeaderGraph;
    use crate::project::ProjectType;
    use crate::project::testing::project;
    use tempfile::TempDir;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from(format!("/w/{}", n))).collect()
    }

    fn by_count(n: usize) -> ChunkSettings {
        ChunkSettings {
            chunk_size: n,
            chunk_filesize: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_largest_first_count_limit() {
        let files = paths(&["a.cpp", "b.cpp", "c.cpp", "d.cpp", "e.cpp"]);
        let sizes = |p: &Path| match p.file_name().unwrap().to_str().unwrap() {
            "a.cpp" => 10,
            "b.cpp" => 50,
            "c.cpp" => 30,
            "d.cpp" => 40,
            _ => 20,
        };
        let chunks = make_chunks(&files, &by_count(2), &ChunkRules::default(), "app", sizes);
        let names: Vec<Vec<String>> = chunks
            .iter()
            .map(|c| c.files.iter().map(|f| f.file_name().unwrap().to_string_lossy().to_string()).collect())
            .collect();
        assert_eq!(
            names,
            vec![
                vec!["b.cpp".to_string(), "d.cpp".to_string()],
                vec!["c.cpp".to_string(), "e.cpp".to_string()],
                vec!["a.cpp".to_string()],
            ]
        );
    }

    #[test]
    fn test_byte_limit_overflow_starts_next_chunk() {
        let files = paths(&["a.cpp", "b.cpp", "c.cpp"]);
        let settings = ChunkSettings {
            chunk_size: 0,
            chunk_filesize: 100,
            ..Default::default()
        };
        let chunks = make_chunks(&files, &settings, &ChunkRules::default(), "app", |_| 40);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].files.len(), 2);
        assert_eq!(chunks[0].size, 80);
        assert_eq!(chunks[1].files, vec![PathBuf::from("/w/c.cpp")]);
    }

    #[test]
    fn test_languages_never_mix() {
        let files = paths(&["a.c", "b.cpp", "c.c", "d.cc", "e.m"]);
        let chunks = make_chunks(&files, &by_count(10), &ChunkRules::default(), "app", |_| 1);
        for chunk in &chunks {
            let classes: Vec<bool> = chunk.files.iter().map(|f| Language::from_path(f).unwrap().is_cpp_class()).collect();
            assert!(classes.windows(2).all(|w| w[0] == w[1]));
        }
        let objc = chunks.iter().find(|c| c.files[0].ends_with("e.m")).unwrap();
        assert!(objc.is_single());
        assert_eq!(chunks.iter().map(|c| c.files.len()).sum::<usize>(), 5);
    }

    #[test]
    fn test_mutually_exclusive_files_never_share_a_chunk() {
        let names: Vec<String> = (0..24).map(|i| format!("f{:02}.cpp", i)).collect();
        let files: Vec<PathBuf> = names.iter().map(|n| PathBuf::from("/w").join(n)).collect();
        let settings = ChunkSettings {
            no_chunk: vec!["f23.cpp".into()],
            no_chunk_together: vec![
                vec!["f0?.cpp".into()],
                vec!["f10.cpp".into(), "f2*.cpp".into()],
            ],
            ..by_count(0)
        };
        let rules = ChunkRules::new(&settings, Path::new("/w")).unwrap();
        let group_a = Regex::new(r"f0\d\.cpp$").unwrap();
        let group_b = Regex::new(r"f(10|2\d)\.cpp$").unwrap();

        for limit in [0, 1, 2, 3, 5, 8, 13, 24] {
            for bytes in [0u64, 30, 70, 1000] {
                let s = ChunkSettings {
                    chunk_size: if bytes == 0 { limit } else { 0 },
                    chunk_filesize: bytes,
                    ..settings.clone()
                };
                let chunks = make_chunks(&files, &s, &rules, "app", |p| {
                    p.to_string_lossy().len() as u64 + 3
                });
                assert_eq!(chunks.iter().map(|c| c.files.len()).sum::<usize>(), files.len());
                for chunk in &chunks {
                    let count = |r: &Regex| chunk.files.iter().filter(|f| r.is_match(&f.to_string_lossy())).count();
                    assert!(count(&group_a) <= 1, "{:?}", chunk.files);
                    assert!(count(&group_b) <= 1, "{:?}", chunk.files);
                    if chunk.files.iter().any(|f| f.ends_with("f23.cpp")) {
                        assert!(chunk.is_single());
                    }
                }
            }
        }
    }

    #[test]
    fn test_disabled_chunking_yields_singletons() {
        let files = paths(&["a.cpp", "b.cpp"]);
        let settings = ChunkSettings {
            use_chunks: false,
            ..Default::default()
        };
        let chunks = make_chunks(&files, &settings, &ChunkRules::default(), "app", |_| 1);
        assert!(chunks.iter().all(Chunk::is_single));
    }

    #[test]
    fn test_unity_is_one_chunk_per_language_class() {
        let files = paths(&["a.cpp", "b.cpp", "c.c", "d.cc"]);
        let settings = ChunkSettings {
            unity: true,
            ..by_count(2)
        };
        let chunks = make_chunks(&files, &settings, &ChunkRules::default(), "app", |_| 1);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_chunk_name_is_stable() {
        let files = paths(&["a.cpp", "b.cpp"]);
        let name = chunk_name("core", &files);
        assert!(name.starts_with("core_chunk_"));
        assert_eq!(name, chunk_name("core", &files));
        assert_ne!(name, chunk_name("core", &paths(&["a.cpp", "c.cpp"])));
    }

    #[test]
    fn test_same_file_names_in_different_dirs_get_distinct_chunks() {
        let net = paths(&["net/init.cpp", "net/util.cpp"]);
        let gfx = paths(&["gfx/init.cpp", "gfx/util.cpp"]);
        assert_ne!(chunk_name("app", &net), chunk_name("app", &gfx));
        assert_eq!(
            chunk_name("app", &net),
            chunk_name("app", &paths(&["net/../net/init.cpp", "net/util.cpp"]))
        );

        let sources: Vec<PathBuf> = net.iter().chain(&gfx).cloned().collect();
        let settings = by_count(2);
        let rules = ChunkRules::new(&settings, Path::new("/w")).unwrap();
        let chunks = make_chunks(&sources, &settings, &rules, "app", |_| 100);
        assert_eq!(chunks.len(), 2);
        assert_ne!(chunks[0].name, chunks[1].name);
    }

    #[test]
    fn test_unity_source_text() {
        let text = unity_source_text(&paths(&["a.cpp", "b.cpp"]), |_| 12);
        assert!(text.starts_with("// Automatically generated file, do not edit.\n"));
        assert!(text.contains("#include \"/w/a.cpp\" // 12 bytes\n"));
        assert!(text.ends_with("// Total size: 24 bytes\n"));
    }

    struct Fixture {
        _tmp: TempDir,
        project: Project,
        chunk: Chunk,
    }

    /// Five sources in one chunk, each with an up-to-date object except the
    /// first `stale` ones.
    fn fixture(stale: usize) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let mut p = project("app", ProjectType::Application, tmp.path());
        p.chunking = by_count(10);
        let files: Vec<PathBuf> = (0..5)
            .map(|i| {
                let f = tmp.path().join(format!("s{}.cpp", i));
                fs::write(&f, format!("int s{}() {{ return {}; }}\n", i, i)).unwrap();
                f
            })
            .collect();
        let cache = BuildCache::new();
        let graph = HeaderGraph::new();
        StalenessOracle::new(&p, &cache, &graph, false)
            .persist_hashes(&files)
            .unwrap();
        for f in files.iter().skip(stale) {
            let obj = p.object_path(f);
            fs::create_dir_all(obj.parent().unwrap()).unwrap();
            fs::write(obj, b"o").unwrap();
        }
        p.sources = files.clone();
        let chunk = Chunk::new("app", files, 5);
        Fixture {
            _tmp: tmp,
            project: p,
            chunk,
        }
    }

    fn plan(f: &Fixture, workers: usize) -> ChunkPlan {
        let cache = BuildCache::new();
        let graph = HeaderGraph::new();
        let oracle = StalenessOracle::new(&f.project, &cache, &graph, false);
        plan_units(&f.project, std::slice::from_ref(&f.chunk), &oracle, workers, |_| 1).unwrap()
    }

    #[test]
    fn test_three_stale_build_individually() {
        let f = fixture(3);
        let p = plan(&f, 1);
        assert_eq!(p.units.len(), 3);
        assert!(p.units.iter().all(|u| matches!(u, BuildUnit::File { .. })));
        assert_eq!(p.objects.len(), 5);
    }

    #[test]
    fn test_four_stale_build_merged() {
        let f = fixture(4);
        let p = plan(&f, 1);
        assert_eq!(p.units.len(), 1);
        let BuildUnit::Merged { unity_source, members, .. } = &p.units[0] else {
            panic!("expected a merged unit");
        };
        assert_eq!(members.len(), 5);
        assert!(unity_source.exists());
        assert_eq!(p.objects.len(), 1);
        // The lone up-to-date member object is superseded by the chunk object.
        assert!(!f.project.object_path(&f.chunk.files[4]).exists());

        let record = ChunkRecord::load(&ChunkRecord::path(&f.project));
        assert!(record.chunks[&f.chunk.name].merged);
    }

    #[test]
    fn test_merged_chunk_split_when_workers_idle() {
        let f = fixture(4);
        let p = plan(&f, 8);
        assert_eq!(p.units.len(), 4);
        assert!(p.units.iter().all(|u| matches!(u, BuildUnit::File { .. })));
    }

    #[test]
    fn test_previously_merged_chunk_is_broken_up() {
        let f = fixture(5);
        let first = plan(&f, 1);
        let object = first.units[0].object().to_path_buf();
        fs::write(&object, b"chunk").unwrap();

        // One edited member is below tolerance.
        let edited = &f.chunk.files[2];
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(edited, "int s2() { return 42; }\n").unwrap();
        let fut = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        fs::File::options().write(true).open(edited).unwrap().set_modified(fut).unwrap();

        let second = plan(&f, 1);
        assert_eq!(second.units.len(), 5);
        assert!(!object.exists());
        let record = ChunkRecord::load(&ChunkRecord::path(&f.project));
        assert!(!record.chunks[&f.chunk.name].merged);
    }

    #[test]
    fn test_up_to_date_merged_chunk_is_linked_as_is() {
        let f = fixture(5);
        let first = plan(&f, 1);
        let object = first.units[0].object().to_path_buf();
        fs::write(&object, b"chunk").unwrap();
        let fut = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        fs::File::options().write(true).open(&object).unwrap().set_modified(fut).unwrap();

        let second = plan(&f, 1);
        assert!(second.units.is_empty());
        assert_eq!(second.objects, vec![object]);
    }
}
