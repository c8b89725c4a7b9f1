//! End-to-end throughput of the fusing person deduplication.

#[path = "../src/test_support.rs"]
mod test_support;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use dedupe_rs::classifier::Classifier;
use dedupe_rs::model::Candidate;
use std::hint::black_box;
use std::time::Duration;
use test_support::{generate_dataset, person_classifier, person_deduplication};

fn bench_classifier(c: &mut Criterion) {
    let dataset = generate_dataset(2, 1.0, 11);
    let candidate = Candidate::new(dataset.records[1].clone(), dataset.records[0].clone());
    let classifier = person_classifier();

    c.bench_function("person_classifier/classify", |b| {
        b.iter(|| black_box(classifier.classify(black_box(&candidate))))
    });
}

fn bench_deduplicate_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("fusing_deduplication");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for &duplicate_share in &[0.05, 0.3] {
        let dataset = generate_dataset(2_000, duplicate_share, 3);
        group.throughput(Throughput::Elements(dataset.records.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("deduplicate_all", duplicate_share),
            &dataset.records,
            |b, records| {
                b.iter_batched(
                    || (person_deduplication(), records.clone()),
                    |(mut deduplication, records)| black_box(deduplication.deduplicate_all(records)),
                    BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(pipeline_benches, bench_classifier, bench_deduplicate_stream);
criterion_main!(pipeline_benches);
