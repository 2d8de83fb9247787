//! Reduction Algorithm Scalability Benchmarks
//!
//! Compares the five reduction variants across team sizes and vector
//! lengths, run in-process over `LocalRma` (one thread per simulated PE).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shcoll::reduce::{binomial, linear, rabenseifner, rabenseifner_ring, rec_dbl};
use shcoll::substrate::local::LocalRma;
use shcoll::sync::{default_region, ARENA_BYTES};
use shcoll::{Rma, SymAddr, Team};

fn sum(a: i64, b: i64) -> i64 {
    a + b
}

fn run_reduce<F>(n_pes: usize, n: usize, f: F)
where
    F: Fn(&LocalRma, &Team, SymAddr, SymAddr, usize) + Send + Sync,
{
    let pes = LocalRma::new_world(n_pes, ARENA_BYTES + 2 * n * 8 + 64);
    let team = Team::world(n_pes);
    let src = SymAddr(ARENA_BYTES);
    let dest = SymAddr(ARENA_BYTES + n * 8);

    for pe in &pes {
        let values: Vec<u8> = (0..n).flat_map(|i| ((i + 1) as i64).to_le_bytes()).collect();
        pe.put(src, &values, pe.my_pe()).unwrap();
    }

    crossbeam::scope(|scope| {
        for pe in &pes {
            let team = &team;
            let f = &f;
            scope.spawn(move |_| f(pe, team, dest, src, n));
        }
    })
    .unwrap();
}

fn bench_pow2_team_algorithms(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce_pow2_team");
    for &n_pes in &[4usize, 8, 16] {
        for &n in &[1usize, 64, 1024] {
            group.throughput(Throughput::Elements((n_pes * n) as u64));
            let region = default_region();

            group.bench_with_input(
                BenchmarkId::new(format!("linear/n={n}"), n_pes),
                &n_pes,
                |b, &n_pes| {
                    b.iter(|| {
                        run_reduce(n_pes, n, |rma, team, dest, src, n| {
                            black_box(linear(rma, team, region, dest, src, n, sum).unwrap());
                        });
                    });
                },
            );
            group.bench_with_input(
                BenchmarkId::new(format!("binomial/n={n}"), n_pes),
                &n_pes,
                |b, &n_pes| {
                    b.iter(|| {
                        run_reduce(n_pes, n, |rma, team, dest, src, n| {
                            black_box(binomial(rma, team, region, dest, src, n, sum).unwrap());
                        });
                    });
                },
            );
            group.bench_with_input(
                BenchmarkId::new(format!("rec_dbl/n={n}"), n_pes),
                &n_pes,
                |b, &n_pes| {
                    b.iter(|| {
                        run_reduce(n_pes, n, |rma, team, dest, src, n| {
                            black_box(rec_dbl(rma, team, region, dest, src, n, sum).unwrap());
                        });
                    });
                },
            );
            // Rabenseifner requires nelems divisible by the power-of-2
            // subset size; the 1-element case is skipped for n_pes > 1.
            if n % n_pes == 0 {
                group.bench_with_input(
                    BenchmarkId::new(format!("rabenseifner/n={n}"), n_pes),
                    &n_pes,
                    |b, &n_pes| {
                        b.iter(|| {
                            run_reduce(n_pes, n, |rma, team, dest, src, n| {
                                black_box(
                                    rabenseifner(rma, team, region, dest, src, n, sum).unwrap(),
                                );
                            });
                        });
                    },
                );
                group.bench_with_input(
                    BenchmarkId::new(format!("rabenseifner_ring/n={n}"), n_pes),
                    &n_pes,
                    |b, &n_pes| {
                        b.iter(|| {
                            run_reduce(n_pes, n, |rma, team, dest, src, n| {
                                black_box(
                                    rabenseifner_ring(rma, team, region, dest, src, n, sum)
                                        .unwrap(),
                                );
                            });
                        });
                    },
                );
            }
        }
    }
    group.finish();
}

fn bench_nonpow2_team(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce_nonpow2_team");
    for &n_pes in &[5usize, 6, 11] {
        group.throughput(Throughput::Elements(n_pes as u64));
        let region = default_region();
        group.bench_with_input(
            BenchmarkId::new("rec_dbl_with_donors", n_pes),
            &n_pes,
            |b, &n_pes| {
                b.iter(|| {
                    run_reduce(n_pes, 1, |rma, team, dest, src, n| {
                        black_box(rec_dbl(rma, team, region, dest, src, n, sum).unwrap());
                    });
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_pow2_team_algorithms, bench_nonpow2_team);
criterion_main!(benches);
