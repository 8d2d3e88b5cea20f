use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde_json::json;
use flight_order_pipeline::codec::{sign, PayloadCodec};

// Encrypt/decrypt throughput over payload sizes typical for vendor calls
pub fn codec_benchmark(c: &mut Criterion) {
    let codec = PayloadCodec::default();
    let mut group = c.benchmark_group("vendor_payload_codec");

    for size in [64usize, 1024, 16 * 1024].iter() {
        let plaintext: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(*size)
            .map(char::from)
            .collect();
        let ciphertext = codec.encrypt(plaintext.as_bytes());

        group.bench_with_input(BenchmarkId::new("encrypt", size), &plaintext, |b, p| {
            b.iter(|| codec.encrypt(black_box(p.as_bytes())))
        });
        group.bench_with_input(BenchmarkId::new("decrypt", size), &ciphertext, |b, c| {
            b.iter(|| codec.decrypt(black_box(c)).unwrap())
        });
    }

    group.finish();
}

pub fn seal_benchmark(c: &mut Criterion) {
    let codec = PayloadCodec::default();
    let payload = json!({
        "mobile": "13800000000",
        "verifyCode": "123456",
        "deviceId": "0f8fad5b-d9cb-469f-a165-70867728950e",
        "platId": 1201,
    });

    c.bench_function("seal_member_payload", |b| {
        b.iter(|| codec.seal(black_box(&payload)).unwrap())
    });
    c.bench_function("sign_member_payload", |b| {
        let plaintext = payload.to_string();
        b.iter(|| sign(black_box(&plaintext), black_box("salt")))
    });
}

criterion_group!(benches, codec_benchmark, seal_benchmark);
criterion_main!(benches);
