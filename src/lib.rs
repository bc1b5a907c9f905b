pub mod api;
pub mod capture;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod services;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::capture::pnet_backend::{self, PnetSource};
use crate::capture::{CaptureEngine, CaptureState};
use crate::cli::Cli;
use crate::core::{DeviceRegistry, Monitor, SubscriberRegistry};
use crate::services::BackgroundServices;

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in lanwatch: {info}");
        default_hook(info);
    }));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lanwatch=info,lanwatch_lib=info".into()),
        )
        .init();

    let interfaces = pnet_backend::list_interfaces();
    if cli.list {
        for (index, iface) in interfaces.iter().enumerate() {
            println!("{}", pnet_backend::describe_interface(index, iface));
        }
        return Ok(());
    }

    let config = cli.to_config()?;
    let iface = pnet_backend::select_interface(&interfaces, config.interface.as_deref())?;
    tracing::info!(interface = %iface.name, "Using capture interface");
    match pnet_backend::local_ipv4(&iface) {
        Some(ip) => tracing::info!(
            "Dashboard reachable from the LAN at http://{ip}:{}",
            config.bind_addr.port()
        ),
        None => tracing::warn!(interface = %iface.name, "Interface has no IPv4 address"),
    }

    let source = PnetSource::open(&iface, config.capture_read_timeout).with_context(|| {
        format!(
            "cannot capture on {}; run as root or grant CAP_NET_RAW",
            iface.name
        )
    })?;

    let devices = Arc::new(DeviceRegistry::new());
    let subscribers = Arc::new(SubscriberRegistry::new());
    let monitor = Monitor::new(
        Arc::clone(&devices),
        Arc::clone(&subscribers),
        config.delivery_timeout,
    );

    // Capture first so the very first snapshot already has data behind it.
    let capture = CaptureEngine::start(Box::new(source), devices)?;
    let capture_state = capture.state();
    let services = BackgroundServices::start(&monitor, &config);
    let state = api::AppState::new(monitor, services.shutdown_signal());

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "Server listening");

    let app = api::router(state).into_make_service_with_connect_info::<SocketAddr>();
    let stop = stop_requested(capture_state.clone());
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            stop.await;
            // Stops the timer, drains the broadcaster and closes every subscriber,
            // which lets open websocket tasks finish so serving can return.
            services.shutdown().await;
        })
        .await;

    capture.stop();
    if tokio::task::spawn_blocking(move || capture.join()).await.is_err() {
        tracing::error!("Capture join task failed");
    }

    served.context("HTTP server failed")?;

    let final_state = capture_state.borrow().clone();
    match final_state {
        CaptureState::Failed(reason) => Err(anyhow::anyhow!("capture failed: {reason}")),
        CaptureState::Exhausted => Err(anyhow::anyhow!("capture source ended unexpectedly")),
        CaptureState::Running | CaptureState::Stopped => {
            tracing::info!("lanwatch stopped");
            Ok(())
        }
    }
}

/// Resolves on Ctrl-C, SIGTERM, or the capture thread reaching a terminal state.
async fn stop_requested(mut capture: watch::Receiver<CaptureState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let capture_ended = async {
        // A dropped sender means the capture thread is gone as well.
        let _ = capture.wait_for(CaptureState::is_terminal).await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("Interrupt received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
        _ = capture_ended => tracing::warn!("Capture ended, shutting down"),
    }
}
