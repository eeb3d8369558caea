use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use textforge_core::{
    Buffer, BufferId, BufferSettings, CancelToken, CompiledQuery, Edit, HighlightEngine,
    HighlightSpan, LexState, LineLexer, SearchQuery, TokenCategory,
};

fn large_text(lines: usize) -> String {
    let mut out = String::new();
    for i in 0..lines {
        out.push_str(&format!("line {i}: let value_{i} = compute({i});\n"));
    }
    out
}

fn bench_buffer_edits(c: &mut Criterion) {
    let text = large_text(1_000);

    c.bench_function("buffer_random_inserts_100", |b| {
        b.iter(|| {
            let mut buf = Buffer::new(BufferId::from_raw(0), &text, BufferSettings::default());
            let mut rng = StdRng::seed_from_u64(42);
            for _ in 0..100 {
                let offset = rng.gen_range(0..buf.len_chars());
                buf.apply(Edit::insert(offset, "x")).unwrap();
            }
            black_box(buf.revision())
        })
    });

    c.bench_function("buffer_undo_redo_100", |b| {
        b.iter(|| {
            let mut buf = Buffer::new(BufferId::from_raw(0), &text, BufferSettings::default());
            for i in 0..100 {
                buf.apply(Edit::insert(i, "y")).unwrap();
                buf.end_coalescing();
            }
            while buf.undo().is_some() {}
            while buf.redo().is_some() {}
            black_box(buf.len_chars())
        })
    });
}

struct BenchLexer;

impl LineLexer for BenchLexer {
    fn lex_line(&self, line: &str, _entry: LexState) -> (Vec<HighlightSpan>, LexState) {
        let spans = line
            .split_whitespace()
            .filter_map(|word| {
                let start = line.find(word)?;
                let start = line[..start].chars().count();
                Some(HighlightSpan::new(
                    start,
                    start + word.chars().count(),
                    TokenCategory::Identifier,
                ))
            })
            .collect();
        (spans, LexState::DEFAULT)
    }
}

fn bench_incremental_relex(c: &mut Criterion) {
    let text = large_text(5_000);
    let mut buf = Buffer::new(BufferId::from_raw(0), &text, BufferSettings::default());
    let mut engine = HighlightEngine::new(Arc::new(BenchLexer));
    engine.update(buf.snapshot(), 0..0).unwrap().collect_all();
    let mut revision = buf.revision();

    c.bench_function("relex_single_line_edit_in_5k_lines", |b| {
        b.iter(|| {
            revision = buf.apply(Edit::insert(50, "z")).unwrap();
            let batches = engine.update(buf.snapshot(), 50..51).unwrap().collect_all();
            black_box(batches.len())
        })
    });
}

fn bench_search(c: &mut Criterion) {
    let text = large_text(10_000);
    let compiled = CompiledQuery::compile(&SearchQuery::literal("value_5")).unwrap();
    let token = CancelToken::new();

    c.bench_function("search_literal_10k_lines", |b| {
        b.iter(|| {
            let mut count = 0usize;
            compiled.search_text(&text, None, &token, &mut |_m| count += 1);
            black_box(count)
        })
    });
}

criterion_group!(benches, bench_buffer_edits, bench_incremental_relex, bench_search);
criterion_main!(benches);
