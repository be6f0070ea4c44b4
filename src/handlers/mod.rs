pub mod health;
pub mod diagnostics;

pub use health::*;
pub use diagnostics::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::MemoryDocumentStore;
    use crate::ws::Relay;
    use crate::AppState;
    use axum::{extract::State, http::StatusCode};
    use std::sync::Arc;

    fn state() -> (AppState, Relay) {
        let (relay, handle) = Relay::new(Arc::new(MemoryDocumentStore::new()));
        let state = AppState {
            relay: handle,
            config: Arc::new(Config::default()),
        };
        (state, relay)
    }

    #[tokio::test]
    async fn health_reports_service_name() {
        let (state, _relay) = state();
        let response = health_check(State(state)).await;
        assert_eq!(response.0.status, "ok");
        assert_eq!(response.0.service, "collab-relay");
    }

    #[tokio::test]
    async fn ready_and_diagnostics_follow_the_relay() {
        let (state, relay) = state();
        let running = tokio::spawn(relay.run());

        let ready = ready_check(State(state.clone())).await.unwrap();
        assert_eq!(ready.0.store, "memory");

        let (status, body) = diagnostics(State(state.clone())).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.0.n_conn, 0);
        assert_eq!(body.0.n_rooms, 0);

        running.abort();
        let _ = running.await;
        let (status, _) = ready_check(State(state)).await.unwrap_err();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
