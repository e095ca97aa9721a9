//! Throughput benchmarks.
//!
//! Record protection in isolation, and application data through an
//! established connection pair.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sectls_benchmarks::{configs, handshake};
use sectls_core::cipher::{select_suite, CipherSuite};
use sectls_core::key_schedule::ConnectionKeys;
use sectls_core::record_protection::{Direction, RecordProtection};
use sectls_core::ContentType;
use sectls_crypto::CryptoProvider;
use sectls_crypto_rustcrypto::RustCryptoProvider;
use std::sync::Arc;

const SUITES: [CipherSuite; 3] = [
    CipherSuite::Aes128GcmSha256,
    CipherSuite::Aes256GcmSha384,
    CipherSuite::ChaCha20Poly1305Sha256,
];

fn benchmark_record_seal(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_seal");
    let plaintext = vec![0xabu8; 16384];
    group.throughput(Throughput::Bytes(plaintext.len() as u64));
    for suite in SUITES {
        let provider: Arc<dyn CryptoProvider> = Arc::new(RustCryptoProvider::new());
        let crypto_suite = select_suite(provider, suite).unwrap();
        let keys = ConnectionKeys::new(vec![7; suite.key_length()], vec![9; suite.iv_length()]);
        let mut protection = RecordProtection::new();
        protection.install(Direction::Write, crypto_suite, keys);

        group.bench_with_input(BenchmarkId::new("16k", suite.name()), &suite, |b, _| {
            b.iter(|| {
                protection
                    .seal(ContentType::ApplicationData, black_box(&plaintext))
                    .unwrap()
            })
        });
    }
    group.finish();
}

/// Client to server transfer, sealing and opening included.
fn benchmark_application_data(c: &mut Criterion) {
    let mut group = c.benchmark_group("application_data");
    for size in [1024usize, 16 * 1024, 256 * 1024] {
        let data = vec![0x5au8; size];
        group.throughput(Throughput::Bytes(size as u64));
        for suite in SUITES {
            let (client_config, server_config) = configs(suite).unwrap();
            let (mut client, mut server) = handshake(&client_config, &server_config).unwrap();
            group.bench_with_input(
                BenchmarkId::new(suite.name(), size),
                &size,
                |b, _| {
                    b.iter(|| {
                        client.send_application_data(black_box(&data)).unwrap();
                        server.read_tls(&client.take_output()).unwrap();
                        server.process().unwrap();
                        black_box(server.recv_application_data())
                    })
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, benchmark_record_seal, benchmark_application_data);
criterion_main!(benches);
