use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pokedex_server::models::ListParams;
use pokedex_server::storage::seed_data;
use pokedex_server::{init_storage, usecases, StorageConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (RUST_LOG overrides the default level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    info!("Starting Pokedex server...");

    // ========================================================================
    // 1. Configuration
    // ========================================================================
    let config = StorageConfig::from_env();
    let backend = config.backend().context("invalid DATABASE_URI")?;
    info!(
        "Backend: {} (uri={}, reinitialize={}, timeout={:?})",
        backend,
        config.location(),
        config.reinitialize(),
        config.operation_timeout
    );

    // ========================================================================
    // 2. Storage
    // ========================================================================
    let factory = init_storage(&config)
        .await
        .context("failed to initialize storage")?;

    // ========================================================================
    // 3. Optional seed
    // ========================================================================
    if config.seed_data {
        let created = usecases::with_deadline(
            config.operation_timeout * seed_data::starter_count() as u32,
            seed_data::seed_pokedex(factory.as_ref()),
        )
        .await
        .context("failed to seed starter Pokedex")?;
        info!("Starter Pokedex loaded ({} new)", created);
    }

    // ========================================================================
    // 4. Catalog summary
    // ========================================================================
    let pokemon = usecases::with_deadline(
        config.operation_timeout,
        usecases::pokemon::list(factory.as_ref(), ListParams::default()),
    )
    .await?;
    let trainers = usecases::with_deadline(
        config.operation_timeout,
        usecases::trainer::list(factory.as_ref()),
    )
    .await?;

    info!(
        "Catalog ready: {} Pokemon on the first page, {} trainers",
        pokemon.len(),
        trainers.len()
    );
    for p in pokemon.iter().take(10) {
        info!("  #{} {} [{}]", p.number, p.name, p.type_names().join(", "));
    }

    Ok(())
}
