//! Criterion benchmarks for vfs-search.
//!
//! - Text analysis and markup extraction
//! - Engine upserts and searches
//! - Backfilling a pinned folder end to end

use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use vfs_search::analysis::{Analyzer, content_analyzer};
use vfs_search::config::IndexerConfig;
use vfs_search::engine::memory::MemoryIndex;
use vfs_search::engine::{Document, FIELD_CONTENT, FIELD_NAME, SearchEngine, SearchRequest};
use vfs_search::fs::memory::MemoryFs;
use vfs_search::fs::{FsPath, SyncMode, TlfId};
use vfs_search::index::{CancelToken, DocumentId, Extractor, Indexer};

/// Generate test documents for benchmarking.
fn generate_test_documents(count: usize) -> Vec<String> {
    let words = [
        "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit",
        "mauris", "neque", "nisi", "condimentum", "fringilla", "augue", "feugiat", "tortor",
        "viverra", "egestas", "justo", "tincidunt", "cras", "volutpat", "purus", "interdum",
        "luctus", "velit", "accumsan",
    ];

    let mut documents = Vec::with_capacity(count);
    for i in 0..count {
        let doc_length = 50 + (i % 100); // Variable length documents
        let mut doc_words = Vec::with_capacity(doc_length);

        for j in 0..doc_length {
            let word_idx = (i * 7 + j * 13) % words.len(); // Pseudo-random distribution
            doc_words.push(words[word_idx]);
        }

        documents.push(doc_words.join(" "));
    }

    documents
}

fn bench_text_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("text_analysis");

    let analyzer = content_analyzer();
    let texts = generate_test_documents(1000);

    group.bench_function("analyze_single_document", |b| {
        b.iter(|| {
            let tokens = analyzer.analyze(black_box(&texts[0])).unwrap();
            black_box(tokens.count())
        })
    });

    group.throughput(Throughput::Elements(100));
    group.bench_function("analyze_batch_documents", |b| {
        b.iter(|| {
            for text in texts.iter().take(100) {
                let tokens = analyzer.analyze(black_box(text)).unwrap();
                black_box(tokens.count());
            }
        })
    });

    let extractor = Extractor::with_defaults(1 << 20).unwrap();
    let html: Vec<u8> = texts
        .iter()
        .take(20)
        .map(|text| format!("<p class=\"para\">{text}</p><!-- note --><br/>"))
        .collect::<String>()
        .into_bytes();
    group.throughput(Throughput::Bytes(html.len() as u64));
    group.bench_function("extract_markup", |b| {
        b.iter(|| black_box(extractor.extract_bytes("page.html", black_box(&html)).unwrap()))
    });

    group.finish();
}

fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    let texts = generate_test_documents(500);

    group.throughput(Throughput::Elements(texts.len() as u64));
    group.bench_function("upsert_500_documents", |b| {
        b.iter_with_setup(
            || MemoryIndex::new().unwrap(),
            |engine| {
                for (i, text) in texts.iter().enumerate() {
                    let document = Document::new()
                        .with_field(FIELD_NAME, format!("file_{i}.txt"))
                        .with_field(FIELD_CONTENT, text.as_str());
                    engine.upsert(DocumentId::new(i as u64 + 1), document).unwrap();
                }
                black_box(engine)
            },
        )
    });

    let engine = MemoryIndex::new().unwrap();
    for (i, text) in texts.iter().enumerate() {
        let document = Document::new()
            .with_field(FIELD_NAME, format!("file_{i}.txt"))
            .with_field(FIELD_CONTENT, text.as_str());
        engine.upsert(DocumentId::new(i as u64 + 1), document).unwrap();
    }

    group.throughput(Throughput::Elements(1));
    group.bench_function("search_single_term", |b| {
        let request = SearchRequest::new("condimentum");
        b.iter(|| black_box(engine.search(black_box(&request)).unwrap()))
    });

    group.bench_function("search_two_terms", |b| {
        let request = SearchRequest::new("dolor viverra").with_limit(20);
        b.iter(|| black_box(engine.search(black_box(&request)).unwrap()))
    });

    group.finish();
}

fn bench_backfill(c: &mut Criterion) {
    let mut group = c.benchmark_group("backfill");
    group.sample_size(10);

    let texts = generate_test_documents(200);
    let tlf = TlfId::new("bench");

    group.throughput(Throughput::Elements(texts.len() as u64));
    group.bench_function("pinned_tlf_200_files", |b| {
        b.iter_with_setup(
            || {
                let fs = Arc::new(MemoryFs::new());
                for dir in 0..10 {
                    let dir_path = FsPath::parse(tlf.clone(), &format!("dir{dir}"));
                    fs.create_dir(&dir_path).unwrap();
                    for (i, text) in texts.iter().enumerate().skip(dir * 20).take(20) {
                        fs.create_file(&dir_path.join(&format!("file{i}.txt")), text.as_bytes())
                            .unwrap();
                    }
                }
                fs.sync_all(&tlf);
                fs.sync_from_server(&tlf);
                let indexer = Indexer::open(
                    IndexerConfig::with_name("bench"),
                    fs.clone(),
                    Arc::new(MemoryIndex::new().unwrap()),
                )
                .unwrap();
                (fs, indexer)
            },
            |(fs, indexer)| {
                fs.set_sync_mode(&tlf, SyncMode::Pinned);
                indexer
                    .wait_for_syncs(&CancelToken::with_timeout(Duration::from_secs(60)))
                    .unwrap();
                black_box(indexer.status().indexed_documents);
                indexer.shutdown(&CancelToken::new()).unwrap();
            },
        )
    });

    group.finish();
}

criterion_group!(benches, bench_text_analysis, bench_engine, bench_backfill);
criterion_main!(benches);
