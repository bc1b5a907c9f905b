//! Shared state handed to every HTTP and websocket handler.

use tokio::sync::watch;

use crate::core::Monitor;

#[derive(Clone)]
pub struct AppState {
    pub monitor: Monitor,
    /// Flips to `true` when the process starts shutting down.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(monitor: Monitor, shutdown: watch::Receiver<bool>) -> Self {
        Self { monitor, shutdown }
    }
}
