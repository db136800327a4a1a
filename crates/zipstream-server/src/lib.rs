pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod validation;

use std::future::Future;

use tokio::net::TcpListener;

pub use config::{AppConfig, Environment};
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;

/// Serve the API on `listener` until `shutdown` resolves, letting in-flight
/// requests finish.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
