use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use image::{DynamicImage, RgbImage};
use imsimilar::signature::{COEF_COUNT, TOP_COEFS, compute_signature, select_threshold};
use imsimilar::{BucketIndex, ImageId, SignatureIndex};
use rand::prelude::*;

fn sorted_threshold(values: &[f64], k: usize) -> f64 {
    let mut abs = values.iter().map(|v| v.abs()).collect::<Vec<_>>();
    abs.sort_by(|a, b| b.total_cmp(a));
    abs[k - 1]
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("Threshold");
    let mut rng = StdRng::seed_from_u64(42);
    let values = (0..COEF_COUNT).map(|_| rng.random_range(-1.0..1.0)).collect::<Vec<f64>>();

    group.bench_function("quickselect", |b| {
        b.iter(|| select_threshold(black_box(&values), TOP_COEFS))
    });
    group.bench_function("sort", |b| b.iter(|| sorted_threshold(black_box(&values), TOP_COEFS)));
    group.finish();
}

fn random_image(rng: &mut StdRng) -> DynamicImage {
    let mut img = RgbImage::new(64, 64);
    img.pixels_mut().for_each(|p| p.0 = rng.random());
    DynamicImage::ImageRgb8(img)
}

fn bench_signature(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let image = random_image(&mut rng);
    c.bench_function("compute_signature", |b| b.iter(|| compute_signature(black_box(&image))));
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("BucketIndex query");
    let mut rng = StdRng::seed_from_u64(1);
    for n in [100, 1000] {
        let mut index = BucketIndex::new();
        for id in 0..n {
            index.add(ImageId(id), &compute_signature(&random_image(&mut rng)));
        }
        let query = compute_signature(&random_image(&mut rng));
        group.bench_with_input(BenchmarkId::from_parameter(n), &index, |b, index| {
            b.iter(|| index.query(black_box(&query)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_select, bench_signature, bench_query);
criterion_main!(benches);
