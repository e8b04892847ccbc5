//! Wiring: build the store, generator, notifier, and engines from config,
//! register the background cycles, then wait for shutdown.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::AppConfig;
use crate::evolution::EvolutionEngine;
use crate::heartbeat::HeartbeatCoordinator;
use crate::monitor::{GithubEventsSource, HttpPageSource, MonitorEngine};
use crate::notify::{LogNotifier, TelegramNotifier};
use crate::providers::make_generator;
use crate::store::DocumentStore;
use crate::traits::Notifier;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let store = Arc::new(DocumentStore::new(&config.store.document_path));
    let generator = make_generator(&config.provider)?;

    let notifier: Arc<dyn Notifier> = if config.notifier.telegram_enabled() {
        info!("Notifications go to Telegram");
        Arc::new(TelegramNotifier::new(
            &config.notifier.telegram_bot_token,
            &config.notifier.telegram_chat_id,
        )?)
    } else {
        info!("No notifier configured, notifications go to the log");
        Arc::new(LogNotifier)
    };

    let monitor_engine = Arc::new(MonitorEngine::new(
        store.clone(),
        notifier.clone(),
        Arc::new(GithubEventsSource::new(&config.monitors.github_token)?),
        Arc::new(HttpPageSource::new()?),
    ));
    let evolution_engine = Arc::new(EvolutionEngine::new(
        store.clone(),
        generator,
        notifier.clone(),
        &config.owner,
    ));

    let mut heartbeat = HeartbeatCoordinator::new();
    if config.monitors.enabled {
        let engine = monitor_engine.clone();
        heartbeat.register_job(
            "monitors",
            Duration::from_secs(config.monitors.tick_secs),
            move || {
                let engine = engine.clone();
                async move {
                    engine.run_cycle().await?;
                    Ok(())
                }
            },
        );
    }
    if config.evolution.enabled {
        let engine = evolution_engine.clone();
        heartbeat.register_job(
            "evolution",
            Duration::from_secs(config.evolution.interval_hours * 3600),
            move || {
                let engine = engine.clone();
                async move {
                    engine.run_cycle().await?;
                    Ok(())
                }
            },
        );
    }
    heartbeat.spawn();

    info!(
        document = %config.store.document_path,
        owner = %config.owner,
        "evolvd running"
    );
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
