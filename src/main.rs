//! Variant Roll allocation engine host
//!
//! Loads configuration, restores the last snapshot, runs the background sweeper, and
//! persists the store periodically and on shutdown. Collaborators are the in-memory
//! implementations; `--demo` drives one roll, reroll and assignment end to end.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use variant_roll::external::memory::{MemoryPayments, MemoryRegistry, SwitchOracle};
use variant_roll::{
    ChargeKind, Collaborators, CouponRef, EngineConfig, EngineEvent, Keypair, PoolConfig,
    RollRequest, Storage, TierKey, VariantConfig, VariantEngine,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "variant-roll", version, about = "Variant Roll: reservation and commitment engine")]
struct Args {
    /// Engine configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Override the background sweep interval (seconds)
    #[arg(long)]
    sweep_interval: Option<u64>,

    /// Snapshot interval (seconds)
    #[arg(long, default_value = "30")]
    snapshot_interval: u64,

    /// Run a roll → reroll → assign walkthrough against a demo pool
    #[arg(long)]
    demo: bool,
}

fn demo_pool() -> PoolConfig {
    PoolConfig {
        pool_id: 1,
        tier: 1,
        default_variant: Some(1),
        variants: vec![
            VariantConfig { variant: 1, max_supply: 10, active: true },
            VariantConfig { variant: 2, max_supply: 5, active: true },
            VariantConfig { variant: 3, max_supply: 1, active: true },
        ],
    }
}

fn handle_event(event: EngineEvent) {
    match event {
        EngineEvent::Rolled { roll_hash, slot, expires_at, .. } => {
            info!("Event: rolled {} on {} until {}", hex::encode(&roll_hash[..8]), slot, expires_at);
        }
        EngineEvent::Rerolled { previous, roll_hash, slot, rerolls_used, .. } => {
            info!(
                "Event: rerolled {} -> {} on {} ({} used)",
                hex::encode(&previous[..8]),
                hex::encode(&roll_hash[..8]),
                slot,
                rerolls_used
            );
        }
        EngineEvent::Assigned { roll_hash, slot, token_ref, .. } => {
            info!("Event: assigned {} to token {} ({})", slot, token_ref, hex::encode(&roll_hash[..8]));
        }
        EngineEvent::Expired { roll_hash, slot, coupon } => match coupon {
            Some(coupon) => info!("Event: expired {} on {}, {} reset", hex::encode(&roll_hash[..8]), slot, coupon),
            None => info!("Event: released {} on {}", hex::encode(&roll_hash[..8]), slot),
        },
        EngineEvent::CounterRepaired(repair) => {
            warn!("Event: counter repair on {}: {} -> {}", repair.slot, repair.before, repair.after);
        }
    }
}

async fn run_demo(engine: &VariantEngine, registry: &MemoryRegistry) -> Result<(), Box<dyn std::error::Error>> {
    let key = TierKey::new(1, 1);
    let coupon = CouponRef::new(100, 1);
    let keypair = Keypair::generate();
    let user = keypair.address();
    registry.mint(coupon, user);
    info!("Demo user: {}", hex::encode(user));

    let first = engine.roll(user, RollRequest::new(key, coupon)).await?;
    info!("Rolled variant {} ({} rerolls left)", first.variant, first.rerolls_remaining);
    info!("Sign: {}", first.message);

    let mut request = RollRequest::new(key, coupon);
    request.previous = Some((first.roll_hash, keypair.sign_message(&first.message)));
    let second = engine.roll(user, request).await?;
    info!("Rerolled to variant {} ({} rerolls left)", second.variant, second.rerolls_remaining);

    let commitment = keypair.sign_message(&second.message);
    let assignment = engine.assign(user, key.pool_id, key.tier, second.roll_hash, &commitment).await?;
    info!(
        "Assigned variant {} to token {} (paid {})",
        assignment.variant, assignment.token_ref, assignment.amount_paid
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("variant_roll=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load config {}: {}", path.display(), e);
                return;
            }
        },
        None => EngineConfig::default(),
    };
    if let Some(secs) = args.sweep_interval {
        config.sweep_interval_secs = secs.max(1);
    }
    if args.demo && config.pools.is_empty() {
        config.pools.push(demo_pool());
    }

    info!("════════════════════════════════════════════════════════════");
    info!("  Variant Roll v{}", VERSION);
    info!("════════════════════════════════════════════════════════════");
    info!(
        "TTL: {}s | grace: {}s | rerolls: {} | sweep every {}s",
        config.roll_ttl_secs, config.grace_period_secs, config.max_rerolls_per_user, config.sweep_interval_secs
    );

    if let Err(e) = std::fs::create_dir_all(&args.data_dir) {
        error!("Failed to create data dir: {}", e);
        return;
    }
    let storage = match Storage::open(&args.data_dir) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to open storage: {}", e);
            return;
        }
    };
    let restored = match storage.load_store() {
        Ok(restored) => restored,
        Err(e) => {
            error!("Failed to restore snapshot: {}", e);
            return;
        }
    };
    if let Ok(Some(saved_at)) = storage.saved_at() {
        info!("Restoring snapshot saved at {}", saved_at);
    }

    let registry = Arc::new(MemoryRegistry::new());
    let payments = Arc::new(MemoryPayments::new([0u8; 32]));
    payments.set_price(ChargeKind::Reroll, 1);
    let collab = Collaborators::new(registry.clone(), payments, Arc::new(SwitchOracle::new()));

    let mut builder = VariantEngine::builder(config, collab);
    if let Some(store) = restored {
        builder = builder.store(store);
    }
    let (engine, mut event_rx) = match builder.build() {
        Ok(built) => built,
        Err(e) => {
            error!("Failed to start engine: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            handle_event(event);
        }
    });

    let sweeper = engine.spawn_sweeper();

    // Snapshot writer
    let engine_clone = engine.clone();
    let storage_clone = storage.clone();
    let period = Duration::from_secs(args.snapshot_interval.max(1));
    let snapshotter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let store = engine_clone.snapshot().await;
            match storage_clone.save_store(&store, engine_clone.now()) {
                Ok(()) => info!("Status: {} open rolls | {} consumed", store.roll_count(), store.consumed_count()),
                Err(e) => warn!("Snapshot failed: {}", e),
            }
        }
    });

    if args.demo {
        if let Err(e) = run_demo(&engine, &registry).await {
            error!("Demo failed: {}", e);
        }
    }

    info!("Variant Roll running. Ctrl-C to stop.");
    tokio::signal::ctrl_c().await.ok();
    info!("Shutting down...");

    sweeper.abort();
    snapshotter.abort();
    let store = engine.snapshot().await;
    if let Err(e) = storage.save_store(&store, engine.now()) {
        error!("Final snapshot failed: {}", e);
    }
}
