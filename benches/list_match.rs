//! Static-list matching benchmarks
//!
//! Every observed answer is tested against both override lists before
//! anything else happens, so matching sits on the observation hot path.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use clearway::governor::{site_from_fqdn, DomainList};

fn bench_list_match(c: &mut Criterion) {
    let small = DomainList::from_patterns(["ru", "example.com", "blocked.example"]);
    let large = DomainList::from_patterns(
        (0..500).map(|i| format!("domain-{i}.example")).collect::<Vec<_>>(),
    );

    c.bench_function("match_small_list_hit", |b| {
        b.iter(|| small.matches(black_box("foo.example.ru.")));
    });

    c.bench_function("match_small_list_miss", |b| {
        b.iter(|| small.matches(black_box("www.unrelated.org.")));
    });

    c.bench_function("match_large_list_miss", |b| {
        b.iter(|| large.matches(black_box("www.unrelated.org.")));
    });
}

fn bench_site_derivation(c: &mut Criterion) {
    c.bench_function("site_from_fqdn_plain", |b| {
        b.iter(|| site_from_fqdn(black_box("www.example.com.")));
    });

    c.bench_function("site_from_fqdn_public_suffix", |b| {
        b.iter(|| site_from_fqdn(black_box("deep.sub.example.co.uk.")));
    });
}

criterion_group!(benches, bench_list_match, bench_site_derivation);
criterion_main!(benches);
