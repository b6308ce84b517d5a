use criterion::{black_box, criterion_group, criterion_main, Criterion};

use stepcode_core::verifier::{normalize, verify};

fn bench_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("verify");

    let short = "[1, 3, 6, 10]\n";

    let table = {
        let mut s = String::new();
        for i in 0..500 {
            s.push_str(&format!("row {i:>4}\t|  value = {}\r\n", i * i));
        }
        s
    };
    let table_expected = normalize(&table);

    let indented = "    Total students: 4\n        Average:   87.5\n\n\n";

    group.bench_function("short_match", |b| {
        b.iter(|| verify(black_box(short), black_box("[1, 3, 6, 10]")))
    });

    group.bench_function("large_table", |b| {
        b.iter(|| verify(black_box(&table), black_box(&table_expected)))
    });

    group.bench_function("normalize_indented", |b| {
        b.iter(|| normalize(black_box(indented)))
    });

    group.finish();
}

criterion_group!(benches, bench_verify);
criterion_main!(benches);
