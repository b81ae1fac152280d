use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tessera_ipc::{DEFAULT_CAPACITY, TensorChannel};
use tessera_perf::{make_observation, temp_shm_name};
use tessera_tensor::Tensor;

fn bench_round_trip(c: &mut Criterion) {
    let mut channel = TensorChannel::create(&temp_shm_name("crit_rt"), DEFAULT_CAPACITY)
        .expect("failed to create channel");

    let mut group = c.benchmark_group("channel");
    for &len in &[1usize, 64, 1024, 4096] {
        let values = make_observation(len);
        group.throughput(Throughput::Bytes((len * 4) as u64));
        group.bench_with_input(BenchmarkId::new("round_trip_f32", len), &values, |b, v| {
            b.iter(|| {
                channel.send("obs", black_box(v)).expect("send");
                black_box(channel.receive::<f32>("obs").expect("receive"));
            });
        });
    }
    group.finish();
}

fn bench_scalar_action(c: &mut Criterion) {
    let mut channel = TensorChannel::create(&temp_shm_name("crit_act"), DEFAULT_CAPACITY)
        .expect("failed to create channel");

    let mut group = c.benchmark_group("channel");
    group.throughput(Throughput::Elements(1));
    group.bench_function("round_trip_i32_scalar", |b| {
        b.iter(|| {
            channel.send("action", black_box(&[1i32])).expect("send");
            black_box(channel.receive::<i32>("action").expect("receive"));
        });
    });
    group.finish();
}

fn bench_tensor(c: &mut Criterion) {
    let mut channel = TensorChannel::create(&temp_shm_name("crit_tensor"), DEFAULT_CAPACITY)
        .expect("failed to create channel");
    let tensor = Tensor::from_f32(make_observation(256));

    let mut group = c.benchmark_group("channel");
    group.throughput(Throughput::Elements(1));
    group.bench_function("round_trip_tensor_256", |b| {
        b.iter(|| {
            channel.send_tensor("obs", black_box(&tensor)).expect("send");
            black_box(channel.receive_tensor("obs").expect("receive"));
        });
    });
    group.finish();
}

fn bench_receive_absent(c: &mut Criterion) {
    let mut channel = TensorChannel::create(&temp_shm_name("crit_absent"), DEFAULT_CAPACITY)
        .expect("failed to create channel");

    let mut group = c.benchmark_group("channel");
    group.bench_function("receive (absent)", |b| {
        b.iter(|| black_box(channel.receive::<f32>("missing").expect("receive")));
    });
    group.finish();
}

fn bench_fragmented(c: &mut Criterion) {
    let mut channel = TensorChannel::create(&temp_shm_name("crit_frag"), DEFAULT_CAPACITY)
        .expect("failed to create channel");
    // Pin a spread of live values so the allocator has to walk past them.
    for i in 0..32 {
        channel
            .send(&format!("pin{i}"), &make_observation(8 + i * 4))
            .expect("pin");
    }
    let values = make_observation(64);

    let mut group = c.benchmark_group("channel");
    group.bench_function("round_trip_fragmented", |b| {
        b.iter(|| {
            channel.send("obs", black_box(&values)).expect("send");
            black_box(channel.receive::<f32>("obs").expect("receive"));
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_round_trip,
    bench_scalar_action,
    bench_tensor,
    bench_receive_absent,
    bench_fragmented,
);
criterion_main!(benches);
