mod avito;
mod config;
mod http;
mod metrics;
mod report;
mod schedule;
mod sheets;
mod status;
#[cfg(test)]
mod testing;
mod worker;

use avito::{MetricsClient, TokenCache};
use config::AppConfig;
use eyre::WrapErr;
use metrics_exporter_prometheus::PrometheusBuilder;
use report::ReportRepository;
use schedule::{Scheduler, Trigger};
use sheets::{ServiceAccountAuth, SheetSink, SheetsClient};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use worker::{CycleRunner, ShopThrottle};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "avito.main", "worker crashed: {err:?}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let dotenv = dotenvy::dotenv();
    init_tracing();
    if let Err(err) = dotenv
        && !err.not_found()
    {
        warn!(target = "avito.main", error = %err, "dotenv_unreadable");
    }

    let config = AppConfig::from_env().wrap_err("loading configuration")?;
    let offset = config.schedule.reference_offset();
    info!(
        target = "avito.main",
        shops = config.shops.len(),
        spreadsheet = %config.spreadsheet_id,
        "config_loaded"
    );

    let http = http::build_client();
    let tokens = Arc::new(TokenCache::new(http.clone(), config.urls.token_url.clone()));
    let client = Arc::new(MetricsClient::new(
        http.clone(),
        tokens,
        &config.urls,
        offset,
    ));
    let auth = ServiceAccountAuth::from_file(&config.service_account_path)
        .await
        .wrap_err("loading service account key")?;
    let sink: Arc<dyn SheetSink> = Arc::new(SheetsClient::new(
        http,
        config.spreadsheet_id.clone(),
        Arc::new(auth),
    ));
    let report = Arc::new(ReportRepository::new(sink, config.shops.clone(), offset));
    let runner = Arc::new(CycleRunner::new(
        client,
        report.clone(),
        config.shops.clone(),
        ShopThrottle::new(config.schedule.shop_delay()),
    ));

    let cancel = CancellationToken::new();
    let status_server = match status_port() {
        Some(port) => {
            let prometheus = PrometheusBuilder::new()
                .install_recorder()
                .wrap_err("installing prometheus recorder")?;
            let state = status::StatusState {
                prometheus,
                last_cycle: runner.last_report(),
                metrics_key: std::env::var("METRICS_KEY").ok().filter(|k| !k.is_empty()),
            };
            let cancel = cancel.clone();
            Some(tokio::spawn(async move {
                if let Err(err) = status::serve(port, state, cancel).await {
                    error!(target = "avito.status", error = %err, "status_server_failed");
                }
            }))
        }
        None => None,
    };

    let mut scheduler = Scheduler::new(offset, cancel.clone());
    let cycle_cancel = cancel.clone();
    scheduler.add_immediate("cycle", Trigger::parse(&config.schedule.cycle)?, move |_| {
        let runner = runner.clone();
        let cancel = cycle_cancel.clone();
        async move {
            runner.run_cycle(&cancel).await;
        }
    });
    let save_report = report.clone();
    scheduler.add(
        "snapshot_save",
        Trigger::parse(&config.schedule.snapshot_save)?,
        move |fired_at| {
            let report = save_report.clone();
            async move {
                if let Err(err) = report.save_due_snapshots(fired_at).await {
                    error!(target = "avito.report", error = %err, "snapshot_save_failed");
                }
            }
        },
    );
    scheduler.add(
        "snapshot_clear",
        Trigger::parse(&config.schedule.snapshot_clear)?,
        move |_| {
            let report = report.clone();
            async move {
                if let Err(err) = report.clear_all_snapshot_ranges().await {
                    error!(target = "avito.report", error = %err, "snapshot_clear_failed");
                }
            }
        },
    );
    info!(
        target = "avito.main",
        cycle = %config.schedule.cycle,
        snapshot_save = %config.schedule.snapshot_save,
        snapshot_clear = %config.schedule.snapshot_clear,
        "scheduler_started"
    );

    tokio::signal::ctrl_c()
        .await
        .wrap_err("listening for shutdown signal")?;
    warn!(target = "avito.main", "shutdown_requested");
    cancel.cancel();
    scheduler.wait().await;
    if let Some(server) = status_server {
        status::join(server).await;
    }
    info!(target = "avito.main", "worker_stopped");
    Ok(())
}

fn status_port() -> Option<u16> {
    std::env::var("STATUS_PORT")
        .ok()
        .and_then(|value| value.parse().ok())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
