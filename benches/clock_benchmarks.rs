use criterion::{criterion_group, criterion_main, Criterion};
use ringcom::com::{Claim, ClaimBook};
use ringcom::{LamportClock, Message, Rank};
use std::hint::black_box;

fn benchmark_clock_increment(c: &mut Criterion) {
    let clock = LamportClock::new();

    c.bench_function("clock_increment", |b| b.iter(|| black_box(clock.increment())));
}

fn benchmark_clock_merge(c: &mut Criterion) {
    let clock = LamportClock::new();

    c.bench_function("clock_merge", |b| {
        let mut remote = 0u64;
        b.iter(|| {
            // remote clock alternately ahead of and behind the local one
            remote += 3;
            black_box(clock.merge(remote % 1000))
        })
    });
}

fn benchmark_naming_resolution(c: &mut Criterion) {
    let mut book = ClaimBook::new();
    for i in 0..64u32 {
        book.record(Claim {
            candidate: i * 7919 % 1_000_003,
            name: format!("P{}", i),
        });
    }

    c.bench_function("naming_resolve_64", |b| {
        b.iter(|| black_box(book.resolve(7919 * 5 % 1_000_003, "P5")))
    });
}

fn benchmark_message_encoding(c: &mut Criterion) {
    let message = Message::user(
        Rank::new(0),
        Some(Rank::new(1)),
        "left you a message, shall we sync up?".into(),
        42,
        false,
    );

    c.bench_function("message_encode_decode", |b| {
        b.iter(|| {
            let bytes = serde_json::to_vec(black_box(&message)).unwrap();
            black_box(serde_json::from_slice::<Message>(&bytes).unwrap())
        })
    });
}

criterion_group!(
    benches,
    benchmark_clock_increment,
    benchmark_clock_merge,
    benchmark_naming_resolution,
    benchmark_message_encoding
);
criterion_main!(benches);
