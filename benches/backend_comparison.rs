/// Backend Comparison Benchmarks
///
/// Compares the three storage backends on the same catalog operations:
/// 1. SQLite (relational) - joins resolve evolutions in one round of queries
/// 2. Document engine - lookup / unwind / group pipeline per direction
/// 3. LMDB key-value - full key scan plus pipelined fan-out reads
///
/// Every backend is seeded with the starter Pokedex before measuring.
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tempfile::TempDir;

use pokedex_server::models::{ListParams, PokemonNumber, UpdatePokemon};
use pokedex_server::storage::seed_data;
use pokedex_server::{init_storage, usecases, StorageConfig, UnitOfWorkFactory};

struct Backend {
    name: &'static str,
    factory: Arc<dyn UnitOfWorkFactory>,
    _dir: Option<TempDir>,
}

fn open_backends(runtime: &tokio::runtime::Runtime) -> Vec<Backend> {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let lmdb_uri = format!("lmdb://{}", dir.path().display());

    let specs: Vec<(&'static str, String, Option<TempDir>)> = vec![
        ("1_sqlite_relational", "sqlite::memory:".to_string(), None),
        ("2_document_engine", "document://memory".to_string(), None),
        ("3_lmdb_key_value", lmdb_uri, Some(dir)),
    ];

    specs
        .into_iter()
        .map(|(name, uri, dir)| {
            let factory = runtime.block_on(async {
                let factory = init_storage(&StorageConfig::new(uri))
                    .await
                    .expect("Failed to open backend");
                seed_data::seed_pokedex(factory.as_ref())
                    .await
                    .expect("Failed to seed backend");
                factory
            });
            Backend {
                name,
                factory,
                _dir: dir,
            }
        })
        .collect()
}

/// Benchmark: single Pokemon read with both evolution directions resolved
fn bench_get_pokemon(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let backends = open_backends(&runtime);
    let ivysaur = PokemonNumber::parse("0002").unwrap();

    let mut group = c.benchmark_group("get_pokemon");
    for backend in &backends {
        group.bench_with_input(BenchmarkId::from_parameter(backend.name), backend, |b, backend| {
            b.to_async(&runtime).iter(|| {
                let factory = backend.factory.clone();
                let number = ivysaur.clone();
                async move { usecases::pokemon::get(factory.as_ref(), &number).await.unwrap() }
            });
        });
    }
    group.finish();
}

/// Benchmark: full catalog listing
fn bench_list_pokemon(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let backends = open_backends(&runtime);

    let mut group = c.benchmark_group("list_pokemon");
    for backend in &backends {
        group.bench_with_input(BenchmarkId::from_parameter(backend.name), backend, |b, backend| {
            b.to_async(&runtime).iter(|| {
                let factory = backend.factory.clone();
                async move {
                    usecases::pokemon::list(factory.as_ref(), ListParams::default())
                        .await
                        .unwrap()
                }
            });
        });
    }
    group.finish();
}

/// Benchmark: replacing next evolutions (reverse-index maintenance)
fn bench_replace_evolutions(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let backends = open_backends(&runtime);
    let eevee = PokemonNumber::parse("0133").unwrap();
    let lineups = [
        vec!["0134", "0135", "0136"],
        vec!["0134"],
    ];
    let patches: Vec<UpdatePokemon> = lineups
        .iter()
        .map(|numbers| UpdatePokemon {
            next_evolution_numbers: Some(
                numbers.iter().map(|n| PokemonNumber::parse(n).unwrap()).collect(),
            ),
            ..Default::default()
        })
        .collect();

    let mut group = c.benchmark_group("replace_next_evolutions");
    for backend in &backends {
        group.bench_with_input(BenchmarkId::from_parameter(backend.name), backend, |b, backend| {
            let mut round = 0usize;
            b.to_async(&runtime).iter(|| {
                let factory = backend.factory.clone();
                let number = eevee.clone();
                let patch = patches[round % patches.len()].clone();
                round += 1;
                async move {
                    usecases::pokemon::update(factory.as_ref(), &number, &patch)
                        .await
                        .unwrap()
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_get_pokemon,
    bench_list_pokemon,
    bench_replace_evolutions
);
criterion_main!(benches);
