//! Operator session: sign in, pick a machine, subscribe, shut down.

use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{error, info, warn};

use gnbwatch_broker_connection::{
    BrokerSession, Lifecycle, ShutdownReport, SubscriptionWorker, WorkerConfig, WorkerError,
    WsConnector, auth_headers,
};
use gnbwatch_identity::{AuthSession, MachineDirectory, authenticate};
use gnbwatch_protocol::SessionState;
use gnbwatch_telemetry::{ExportRequest, TelemetryBuffer};

use crate::config::AppConfig;
use crate::console::Console;
use crate::render::LiveRenderer;

/// Waits for the operator's interrupt. A failure to listen counts as one
/// and returns `false`.
async fn interrupted() -> bool {
    match tokio::signal::ctrl_c().await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "failed to listen for interrupt");
            false
        }
    }
}

/// Waits until the broker link drops on its own.
async fn connection_lost(lifecycle: &Lifecycle) {
    let mut rx = lifecycle.subscribe();
    let _ = rx.wait_for(|s| *s >= SessionState::Disconnected).await;
}

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let endpoints = config.endpoints()?;
    let lifecycle = Lifecycle::new();
    let mut console = Console::stdio();

    lifecycle.advance(SessionState::Authenticating);
    let auth = AuthSession::new(&endpoints.access_token_url)?;
    let token = authenticate(&auth, &mut console, config.max_login_attempts)
        .await
        .context("authentication failed")?;

    let directory = MachineDirectory::new(&endpoints.tenant_api_url, &token.access_token)?;
    let mut devices = directory
        .devices()
        .await
        .context("failed to list machines")?;
    lifecycle.advance(SessionState::MachineListed);
    if devices.is_empty() {
        bail!("no machines are registered for this account");
    }

    console.list_devices(&devices)?;
    let index = console.select_device(&devices)?;
    let device = devices.swap_remove(index);
    let save = console.confirm_save()?;
    lifecycle.advance(SessionState::MachineSelected);
    info!(device = %device.id, tenant = %device.tenant_id, save, "machine selected");

    let session = BrokerSession::new(
        WsConnector {
            heartbeat: config.heartbeat(),
        },
        endpoints.broker_url,
        auth_headers(&token.access_token),
        config.retry.policy(),
    );
    let export = save.then(|| ExportRequest {
        dir: config.output_dir.clone(),
        device_id: device.id.clone(),
        alignment: config.alignment,
    });
    let buffer = TelemetryBuffer::new();
    let worker = Arc::new(SubscriptionWorker::new(
        session,
        buffer.clone(),
        lifecycle.clone(),
        WorkerConfig {
            topic: device.telemetry_topic(),
            export,
        },
    ));

    console.say("Establishing STOMP connection...")?;
    worker.start().await?;

    tokio::select! {
        result = worker.wait_connected() => {
            if let Err(e) = result {
                return Err(subscription_failed(e, worker.quit().await));
            }
        }
        _ = interrupted() => {
            info!("interrupted before the subscription was live");
            let report = worker.quit().await?;
            return finish(&mut console, &report);
        }
    }

    console.say(format!(
        "Receiving telemetry from {}, press Ctrl+C to stop.",
        device.id
    ))?;

    let renderer = (!save).then(|| {
        let view = LiveRenderer::new(
            Arc::new(buffer.clone()),
            config.render_interval(),
            std::io::stdout(),
        );
        tokio::spawn(view.run(worker.renderer_token()))
    });

    tokio::select! {
        _ = interrupted() => info!("interrupt received"),
        () = connection_lost(&lifecycle) => warn!("broker connection lost, shutting down"),
    }

    // Repeated interrupts while shutting down join the same shutdown.
    let repeat = {
        let worker = worker.clone();
        tokio::spawn(async move {
            while interrupted().await {
                info!("shutdown already in progress");
                let _ = worker.quit().await;
            }
        })
    };

    let result = worker.quit().await;
    repeat.abort();
    if let Some(handle) = renderer {
        match handle.await {
            Ok(Err(e)) => warn!(error = %e, "live view failed"),
            Err(e) => warn!(error = %e, "live view task failed"),
            Ok(Ok(())) => {}
        }
    }

    let report = result.context("shutdown failed")?;
    finish(&mut console, &report)
}

/// Combines a failed subscription with the outcome of the shutdown that
/// followed it, so a failed export is not lost.
fn subscription_failed(
    connect: WorkerError,
    shutdown: Result<ShutdownReport, WorkerError>,
) -> anyhow::Error {
    let mut err = anyhow::Error::new(connect);
    if let Err(e) = shutdown {
        warn!(error = %e, "shutdown after the failed subscription also failed");
        err = err.context(format!("shutdown also failed: {e}"));
    }
    err.context("could not subscribe to telemetry")
}

fn finish<R, W>(console: &mut Console<R, W>, report: &ShutdownReport) -> anyhow::Result<()>
where
    R: std::io::BufRead,
    W: std::io::Write,
{
    if let Some(export) = &report.export {
        console.say(format!(
            "File saved as {} ({} rows)",
            export.path.display(),
            export.rows
        ))?;
    }
    console.say(format!("Job done, {} frames received.", report.frames))?;
    Ok(())
}
