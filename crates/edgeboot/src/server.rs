//! HTTP surface: liveness on `/` and the subscription route once published.

use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use edgeboot_bootstrap::SubscriptionSlot;
use tracing::debug;

pub const LIVENESS_BODY: &str = "Hello world!";

pub fn router(slot: SubscriptionSlot) -> Router {
    Router::new()
        .route("/", get(health))
        .fallback(subscription)
        .with_state(slot)
}

async fn health() -> &'static str {
    debug!("Health check received");
    LIVENESS_BODY
}

/// Serves the bundle only after the orchestrator has published it.
async fn subscription(State(slot): State<SubscriptionSlot>, method: Method, uri: Uri) -> Response {
    if method != Method::GET {
        return StatusCode::NOT_FOUND.into_response();
    }

    match slot.lookup(uri.path()) {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body.to_string(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn serve(slot: SubscriptionSlot) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(slot)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_liveness() {
        let base = serve(SubscriptionSlot::new()).await;
        let response = reqwest::get(&base).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), LIVENESS_BODY);
    }

    #[tokio::test]
    async fn test_subscription_route_appears_after_publish() {
        let slot = SubscriptionSlot::new();
        let base = serve(slot.clone()).await;
        let url = format!("{}/sub", base);

        let before = reqwest::get(&url).await.unwrap();
        assert_eq!(before.status(), 404);

        assert!(slot.publish("sub", "dmxlc3M6Ly94".to_string()));

        let after = reqwest::get(&url).await.unwrap();
        assert_eq!(after.status(), 200);
        let content_type = after.headers()[reqwest::header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/plain"));
        assert_eq!(after.text().await.unwrap(), "dmxlc3M6Ly94");

        let other = reqwest::get(format!("{}/other", base)).await.unwrap();
        assert_eq!(other.status(), 404);
        let health = reqwest::get(&base).await.unwrap();
        assert_eq!(health.text().await.unwrap(), LIVENESS_BODY);
    }
}
