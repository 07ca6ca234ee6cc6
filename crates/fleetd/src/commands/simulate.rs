//! `fleetd simulate` — the supervisor against the in-memory demo fleet.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleet_core::config::{ControlMode, FleetConfig};
use fleetgrid_controller::{Services, Supervisor};
use fleetgrid_sim::SimFleet;

/// Real time between sim clock advances.
const CLOCK_STEP: Duration = Duration::from_millis(100);

pub async fn run(
    config_path: Option<&Path>,
    port: Option<u16>,
    speed: f64,
    mode: Option<ControlMode>,
) -> anyhow::Result<()> {
    if !speed.is_finite() || speed <= 0.0 {
        anyhow::bail!("--speed must be a positive number, got {speed}");
    }

    let mut config = match config_path {
        Some(path) => FleetConfig::from_file(path)?,
        None => FleetConfig::default(),
    };
    if let Some(port) = port {
        config.api.port = port;
    }
    if let Some(mode) = mode {
        config.controller.mode = mode;
    }
    let interval = config.tick_interval()?;

    info!(
        mode = ?config.controller.mode,
        root = %config.topology.root,
        speed,
        "fleetd starting against the simulated fleet"
    );

    let fleet = Arc::new(
        SimFleet::demo_builder()
            .programs(config.programs.clone())
            .build(),
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    let clock_handle = tokio::spawn(drive_clock(fleet.clone(), speed, shutdown_rx.clone()));

    let mut supervisor = Supervisor::new(Services::from_backend(fleet.clone()), config.clone());
    let snapshots = supervisor.subscribe();
    let supervisor_shutdown = shutdown_rx.clone();
    let supervisor_handle = tokio::spawn(async move {
        supervisor.run(interval, supervisor_shutdown).await;
    });

    // ── API server ─────────────────────────────────────────────

    let router = fleetgrid_api::build_router(snapshots);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C, shutting down");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = supervisor_handle.await;
    let _ = clock_handle.await;

    info!(
        completions = fleet.completions().len(),
        running = fleet.running(),
        "fleetd stopped"
    );
    Ok(())
}

/// Advance the sim clock by `speed * CLOCK_STEP` every `CLOCK_STEP`.
async fn drive_clock(fleet: Arc<SimFleet>, speed: f64, mut shutdown: watch::Receiver<bool>) {
    // The sim clock counts whole milliseconds.
    let step = Duration::from_millis((CLOCK_STEP.as_millis() as f64 * speed).round() as u64);
    let mut ticker = tokio::time::interval(CLOCK_STEP);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for done in fleet.advance(step) {
                    debug!(
                        pid = done.pid,
                        kind = %done.kind,
                        target = %done.target,
                        threads = done.threads,
                        "job landed"
                    );
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn clock_advances_until_shutdown() {
        let fleet = Arc::new(SimFleet::demo());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(drive_clock(fleet.clone(), 10.0, rx));

        tokio::time::advance(CLOCK_STEP * 2).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        // The first interval tick fires immediately: one step is 1000 sim ms.
        let stopped_at = fleet.now();
        assert!(stopped_at >= 1000);
        assert_eq!(stopped_at % 1000, 0);

        tokio::time::advance(CLOCK_STEP * 5).await;
        assert_eq!(fleet.now(), stopped_at);
    }

    #[tokio::test]
    async fn rejects_non_positive_speed() {
        let err = run(None, Some(0), 0.0, None).await.unwrap_err();
        assert!(err.to_string().contains("--speed"));
    }
}
