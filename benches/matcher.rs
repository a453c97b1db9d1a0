//! Benchmark the bit-parallel approximate matcher over a synthetic
//! vocabulary, which is the hot loop of every `=N` search.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use mairix::search::matcher::PatternMatcher;

fn vocabulary(n: usize) -> Vec<String> {
    // Deterministic pseudo-words with a realistic length spread.
    let mut words = Vec::with_capacity(n);
    let mut state: u32 = 0x1234_5678;
    for _ in 0..n {
        let mut word = String::new();
        let len = 3 + (state % 12) as usize;
        for _ in 0..len {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            word.push((b'a' + (state % 26) as u8) as char);
        }
        words.push(word);
    }
    words
}

fn bench_matcher(c: &mut Criterion) {
    let words = vocabulary(50_000);

    for errors in [0usize, 1, 3] {
        c.bench_function(&format!("scan_50k_tokens_k{errors}"), |b| {
            let matcher = PatternMatcher::new(b"telephone", errors, false).unwrap();
            b.iter(|| {
                let mut hits = 0usize;
                for w in &words {
                    if matcher.matches(black_box(w.as_bytes())) {
                        hits += 1;
                    }
                }
                black_box(hits)
            })
        });
    }
}

criterion_group!(benches, bench_matcher);
criterion_main!(benches);
