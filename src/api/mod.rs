//! HTTP and websocket surface.
//!
//! | Route               | Handler                 |
//! |---------------------|-------------------------|
//! | `GET /api/health`   | [`stats::health`]       |
//! | `GET /api/stats`    | [`stats::get_stats`]    |
//! | `GET /api/devices/:mac` | [`stats::get_device`] |
//! | `GET /ws`           | [`ws::ws_handler`]      |

pub mod state;
pub mod stats;
pub mod ws;

use axum::routing::get;
use axum::Router;

pub use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(stats::health))
        .route("/api/stats", get(stats::get_stats))
        .route("/api/devices/:mac", get(stats::get_device))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}
