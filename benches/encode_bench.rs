use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use podsync::encode::{encode, ContentEncoder, Encoding, DEFAULT_INLINE_LIMIT};
use podsync::path::RemotePath;
use std::path::Path;

fn text_content(size: usize) -> Vec<u8> {
    let line = b"fn main() { println!(\"100% done\\n\"); } // -- tabs\there\n";
    line.iter().copied().cycle().take(size).collect()
}

fn bench_encodings(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for size in [1024, 16 * 1024, 64 * 1024].iter() {
        let content = text_content(*size);
        group.throughput(Throughput::Bytes(*size as u64));

        for encoding in [Encoding::Base64, Encoding::Printf] {
            group.bench_with_input(
                BenchmarkId::new(encoding.to_string(), size),
                &content,
                |b, content| {
                    b.iter(|| encode(black_box(encoding), black_box(content)).unwrap());
                },
            );
        }
    }
    group.finish();
}

fn bench_write_command(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_command");
    let remote = RemotePath::new("/app/src/main.rs");

    // Inline below the limit, archive above it
    for size in [4 * 1024, 256 * 1024].iter() {
        let content = text_content(*size);
        let encoder = ContentEncoder::new(Encoding::Base64, DEFAULT_INLINE_LIMIT, None);
        group.throughput(Throughput::Bytes(*size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &content, |b, content| {
            b.iter(|| {
                encoder
                    .write_command(Path::new("/ws/src/main.rs"), black_box(&remote), black_box(content))
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encodings, bench_write_command);
criterion_main!(benches);
