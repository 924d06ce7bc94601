use ccforge::cache::sha256_hex;
use ccforge::chunk::{ChunkRules, make_chunks};
use ccforge::headers::{HeaderGraph, HeaderScope};
use ccforge::project::ChunkSettings;
use ccforge::staleness::normalize_source;
use criterion::{Criterion, criterion_group, criterion_main};
use std::fs;
use std::hint::black_box;
use std::path::{Path, PathBuf};

const SOURCE: &str = r#"
// Licensed under the usual terms.
#include "widget.h"
#include <vector>

/* Block comment
   spanning lines */
int widget_count(const std::vector<int>& v) {
    const char* s = "// not a comment";
    return static_cast<int>(v.size()); // trailing
}
"#;

fn bench_chunking(c: &mut Criterion) {
    let sources: Vec<PathBuf> = (0..500)
        .map(|i| PathBuf::from(format!("/w/src/file_{:03}.cpp", i)))
        .collect();
    let settings = ChunkSettings {
        chunk_size: 10,
        chunk_filesize: 0,
        no_chunk_together: vec![vec!["file_1*.cpp".into(), "file_2*.cpp".into()]],
        ..Default::default()
    };
    let rules = ChunkRules::new(&settings, Path::new("/w/src")).unwrap();
    let size_of = |p: &Path| p.to_string_lossy().len() as u64 * 97 % 4096;

    c.bench_function("make_chunks_500", |b| {
        b.iter(|| make_chunks(black_box(&sources), &settings, &rules, "bench", size_of))
    });
}

fn bench_header_resolution(c: &mut Criterion) {
    // A layered include tree: each header pulls in the two below it.
    let dir = std::env::temp_dir().join("ccforge_bench_headers");
    fs::create_dir_all(&dir).unwrap();
    for i in 0..64 {
        let mut text = String::new();
        for j in [i * 2 + 1, i * 2 + 2] {
            if j < 64 {
                text.push_str(&format!("#include \"h{}.h\"\n", j));
            }
        }
        fs::write(dir.join(format!("h{}.h", i)), text).unwrap();
    }
    fs::write(dir.join("main.cpp"), "#include \"h0.h\"\n").unwrap();
    let root = dir.join("main.cpp");
    let scope = HeaderScope {
        include_dirs: vec![dir.clone()],
        working_dir: dir.clone(),
        depth: 0,
        ignore_external: false,
    };

    c.bench_function("resolve_headers_cold", |b| {
        b.iter(|| HeaderGraph::new().resolve_headers(black_box(&root), &scope))
    });
    let warm = HeaderGraph::new();
    warm.resolve_headers(&root, &scope);
    c.bench_function("resolve_headers_warm", |b| {
        b.iter(|| warm.resolve_headers(black_box(&root), &scope))
    });
}

fn bench_content_hash(c: &mut Criterion) {
    let text = SOURCE.repeat(200);
    c.bench_function("normalize_and_hash", |b| {
        b.iter(|| sha256_hex(normalize_source(black_box(&text)).as_bytes()))
    });
}

criterion_group!(
    benches,
    bench_chunking,
    bench_header_resolution,
    bench_content_hash
);
criterion_main!(benches);
