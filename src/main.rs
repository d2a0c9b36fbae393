use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use quantcore::cache::{get_redis_client, MarketCache, RedisMarketCache};
use quantcore::collector::Collector;
use quantcore::config::{load_exchange_configs, Config};
use quantcore::exchange::ExchangeRegistry;
use quantcore::monitor::{ErrorMonitor, RedisErrorMonitor};
use quantcore::scheduler::{Heartbeat, JobName, RedisSchedStore, SchedStore};
use quantcore::store::{
    get_db_connection, load_credential_overrides, BalanceStore, KlineStore, PositionStore,
    SeaBalanceStore, SeaKlineStore, SeaPositionStore, SeaSettingsStore, SeaStrategyStore,
    SettingsStore, StrategyStore,
};
use quantcore::strategy::StrategyEngine;
use quantcore::sync::TradingSync;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting QuantCore...");
    let config = Config::from_env()?;

    let db = get_db_connection(&config.database_url).await?;
    let redis = get_redis_client(&config.redis_url)?;

    let entries = load_exchange_configs(Path::new(&config.exchange_config_path))?;
    let overrides = match &config.credential_passphrase {
        Some(passphrase) => load_credential_overrides(&db, passphrase).await?,
        None => {
            warn!("CREDENTIAL_PASSPHRASE not set, stored credentials will not be used");
            HashMap::new()
        }
    };
    let registry = Arc::new(ExchangeRegistry::build(entries, &overrides));
    info!(exchanges = ?registry.names(), "exchange registry built");

    let klines: Arc<dyn KlineStore> = Arc::new(SeaKlineStore::new(db.clone()));
    let balances: Arc<dyn BalanceStore> = Arc::new(SeaBalanceStore::new(db.clone()));
    let positions: Arc<dyn PositionStore> = Arc::new(SeaPositionStore::new(db.clone()));
    let settings: Arc<dyn SettingsStore> = Arc::new(SeaSettingsStore::new(db.clone()));
    let strategies: Arc<dyn StrategyStore> = Arc::new(SeaStrategyStore::new(db.clone()));
    let cache: Arc<dyn MarketCache> = Arc::new(RedisMarketCache::new(redis.clone()));
    let monitor: Arc<dyn ErrorMonitor> = Arc::new(RedisErrorMonitor::new(redis.clone()));
    let sched_store: Arc<dyn SchedStore> = Arc::new(RedisSchedStore::new(redis));

    let collector = Arc::new(Collector::new(
        registry.clone(),
        klines.clone(),
        cache,
        monitor.clone(),
    ));
    let sync = Arc::new(TradingSync::new(
        registry.clone(),
        balances,
        positions,
        monitor.clone(),
    ));
    let engine = Arc::new(StrategyEngine::new(klines, strategies));

    let (job_tx, mut job_rx) = mpsc::channel::<JobName>(32);
    let heartbeat = Heartbeat::new(sched_store, settings.clone(), monitor.clone(), job_tx);

    let worker = tokio::spawn({
        let registry = registry.clone();
        async move {
            while let Some(job) = job_rx.recv().await {
                let job_settings = match settings.job_settings().await {
                    Ok(job_settings) => job_settings,
                    Err(err) => {
                        error!(job = %job, error = %err, "failed to load settings, skipping run");
                        continue;
                    }
                };

                match job {
                    JobName::MarketCollect => {
                        let targets = registry.collect_targets();
                        collector.run(&targets, &job_settings).await;
                    }
                    JobName::TradingSync => {
                        sync.run(job_settings.sync_interval_secs).await;
                    }
                    JobName::StrategyTick => {
                        let tick =
                            Duration::from_secs(job_settings.strategy_interval_secs.max(1) as u64);
                        if let Err(err) = engine.reconcile(&registry, tick).await {
                            error!(error = %err, "strategy reconcile failed");
                        }
                    }
                }
            }
        }
    });

    info!("QuantCore is running");
    heartbeat.run().await;
    worker.await?;
    Ok(())
}
