use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use layers::mlp::{FeedForward, FeedForwardConfig};

fn bench_feed_forward(c: &mut Criterion) {
    let device = Device::Cpu;
    let batch = 4usize;
    let seq = 64usize;
    let model_dim = 512usize;
    let hidden_sizes = [1024usize, 2048];

    for dtype in [DType::F32, DType::BF16] {
        let mut group = c.benchmark_group(format!("feed_forward/{dtype:?}"));
        for &hidden in &hidden_sizes {
            let block = FeedForward::new(FeedForwardConfig::new(hidden, model_dim))
                .expect("feed-forward config");
            block.set_training(false);
            let input = Tensor::randn(0f32, 1.0, (batch, seq, model_dim), &device)
                .and_then(|t| t.to_dtype(dtype))
                .expect("input");
            // First call creates the kernels.
            block.forward(&input).expect("warmup");

            group.throughput(Throughput::Elements((batch * seq * model_dim) as u64));
            group.bench_with_input(BenchmarkId::new("hidden", hidden), &input, |b, input| {
                b.iter(|| black_box(block.forward(black_box(input)).expect("forward")));
            });
        }
        group.finish();
    }
}

criterion_group!(benches, bench_feed_forward);
criterion_main!(benches);
