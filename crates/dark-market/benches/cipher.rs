//! cipher benchmarks
//!
//! Usage:
//!   cargo bench -p dark-market               # run all benchmarks
//!   cargo bench -p dark-market -- encrypt    # cipher only
//!   cargo bench -p dark-market -- bet        # bet encoding only

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dark_market::bet::{encode_bet, BetInput};
use dark_market::keys::{generate_ephemeral_keypair, NetworkKeyPair};
use dark_market::nonce::Nonce;
use dark_market::rescue;
use dark_market::RescueCipher;
use rand::Rng;

fn bench_permutation(c: &mut Criterion) {
    let mut state = [dark_market::field::Fe::ONE; rescue::WIDTH];
    c.bench_function("rescue/permute", |b| {
        b.iter(|| {
            rescue::permute(black_box(&mut state));
        });
    });
}

fn bench_encrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("encrypt");

    let alice = generate_ephemeral_keypair();
    let bob = generate_ephemeral_keypair();
    let shared = alice.private_key.diffie_hellman(&bob.public_key).unwrap();
    let cipher = RescueCipher::new(&shared);
    let nonce = Nonce::random();

    for len in [2usize, 3, 16] {
        let mut rng = rand::thread_rng();
        let values: Vec<u64> = (0..len).map(|_| rng.gen()).collect();
        let ct = cipher.encrypt(&values, &nonce);

        group.bench_with_input(BenchmarkId::new("encrypt", len), &values, |b, v| {
            b.iter(|| black_box(cipher.encrypt(black_box(v), &nonce)));
        });
        group.bench_with_input(BenchmarkId::new("decrypt", len), &ct, |b, ct| {
            b.iter(|| black_box(cipher.decrypt(black_box(ct), &nonce).unwrap()));
        });
    }

    group.finish();
}

fn bench_bet(c: &mut Criterion) {
    let network = NetworkKeyPair::generate();
    let input = BetInput::new(1, 5_000_000_000, 1, 0).unwrap();

    c.bench_function("bet/encode", |b| {
        b.iter(|| black_box(encode_bet(black_box(&input), &network.public_key).unwrap()));
    });
}

criterion_group!(benches, bench_permutation, bench_encrypt, bench_bet);
criterion_main!(benches);
