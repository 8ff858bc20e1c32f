use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::hub::{HubHandle, HubState};

// -----------------------------------------------------------------------------
// Intent payloads
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    pub index: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct TabRequest {
    pub tab: String,
}

#[derive(Debug, Deserialize)]
pub struct ComposerRequest {
    pub text: String,
}

// -----------------------------------------------------------------------------
// Router
// -----------------------------------------------------------------------------

/// HTTP adapter for a rendering surface: state reads and intent forwarding,
/// nothing else.
pub struct SurfaceServer {
    hub: HubHandle,
}

impl SurfaceServer {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/state", get(state_handler))
            .route("/events", get(events_handler))
            .route("/select", post(select_handler))
            .route("/search", post(search_handler))
            .route("/tab", post(tab_handler))
            .route("/composer", post(composer_handler))
            .route("/submit", post(submit_handler))
            .with_state(self.hub.clone())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }
}

async fn state_handler(State(hub): State<HubHandle>) -> Json<HubState> {
    Json(hub.state())
}

async fn events_handler(
    State(hub): State<HubHandle>,
) -> Sse<impl Stream<Item = Result<Event, axum::BoxError>>> {
    info!("New state stream connection");

    let mut rx = hub.watch();

    let stream = async_stream::stream! {
        loop {
            let state = rx.borrow_and_update().clone();
            match Event::default().event("state").json_data(&state) {
                Ok(event) => yield Ok(event),
                Err(e) => {
                    error!("Failed to encode hub state: {}", e);
                    break;
                }
            }

            if rx.changed().await.is_err() {
                // Hub stopped.
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn select_handler(
    State(hub): State<HubHandle>,
    Json(request): Json<SelectRequest>,
) -> StatusCode {
    hub.select_conversation(request.index);
    StatusCode::ACCEPTED
}

async fn search_handler(
    State(hub): State<HubHandle>,
    Json(request): Json<SearchRequest>,
) -> StatusCode {
    hub.set_search_query(request.query);
    StatusCode::ACCEPTED
}

async fn tab_handler(State(hub): State<HubHandle>, Json(request): Json<TabRequest>) -> StatusCode {
    hub.set_tab(request.tab.as_str());
    StatusCode::ACCEPTED
}

async fn composer_handler(
    State(hub): State<HubHandle>,
    Json(request): Json<ComposerRequest>,
) -> StatusCode {
    hub.set_composer_text(request.text);
    StatusCode::ACCEPTED
}

async fn submit_handler(State(hub): State<HubHandle>) -> StatusCode {
    hub.submit_message();
    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::filter::Tab;
    use crate::hub::Hub;
    use crate::store::{CollectionPath, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    async fn wait_until(hub: &HubHandle, check: impl Fn(&HubState) -> bool) -> HubState {
        let mut rx = hub.watch();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let state = rx.borrow_and_update().clone();
                if check(&state) {
                    return state;
                }
                rx.changed().await.expect("hub stopped");
            }
        })
        .await
        .expect("state never matched")
    }

    #[tokio::test]
    async fn intents_posted_over_http_reach_the_hub() {
        let store = MemoryStore::new();
        store.insert(
            &CollectionPath::root("chats"),
            "c1",
            json!({ "userName": "Amy", "lastActivity": "2024-01-01T10:00:00.000000Z" })
                .as_object()
                .cloned()
                .unwrap(),
        );
        let hub = Hub::spawn(Arc::new(store), &HubConfig::default()).unwrap();
        wait_until(&hub, |s| s.total_conversations == 1).await;

        let status = select_handler(
            State(hub.clone()),
            Json(SelectRequest { index: Some(0) }),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        tab_handler(State(hub.clone()), Json(TabRequest { tab: "unassigned".into() })).await;
        composer_handler(State(hub.clone()), Json(ComposerRequest { text: "draft".into() })).await;

        let state = wait_until(&hub, |s| s.composer_text == "draft").await;
        assert_eq!(state.tab, Tab::Unassigned);
        assert_eq!(state.selected_conversation.map(|c| c.id), Some("c1".to_string()));

        let Json(read) = state_handler(State(hub.clone())).await;
        assert_eq!(read.composer_text, "draft");

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn router_builds_with_every_route() {
        let hub = Hub::spawn(Arc::new(MemoryStore::new()), &HubConfig::default()).unwrap();
        let _router = SurfaceServer::new(hub.clone()).router();
        hub.shutdown().await;
    }
}
