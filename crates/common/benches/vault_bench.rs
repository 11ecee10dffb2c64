//! Credential vault benchmarks
//!
//! Sealing cost is dominated by Argon2id; these numbers size the refresh
//! batch and connect paths.
//!
//! ```bash
//! cargo bench -p orgsync-common --features runtime --bench vault_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use orgsync_common::crypto::{KdfParams, KeyRing};

const MASTER: &str = "benchmark-master-key-aaaaaaaaaaaaaaaaaaaaaaaa";

fn token_document() -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "access_token": "x".repeat(180),
        "refresh_token": "y".repeat(100),
        "expires_at": "2026-01-01T00:00:00Z",
    }))
    .unwrap_or_default()
}

fn bench_seal_open(c: &mut Criterion) {
    let document = token_document();
    let mut group = c.benchmark_group("vault");

    for (label, params) in [("testing", KdfParams::testing()), ("default", KdfParams::default())] {
        let Ok(ring) = KeyRing::new(1, MASTER, params) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::new("seal", label), &document, |b, doc| {
            b.iter(|| ring.seal(black_box(doc)));
        });
        if let Ok(sealed) = ring.seal(&document) {
            group.bench_with_input(BenchmarkId::new("open", label), &sealed, |b, sealed| {
                b.iter(|| ring.open(black_box(sealed)));
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_seal_open);
criterion_main!(benches);
