use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use operator_hub::chat::fields;
use operator_hub::store::{encode_timestamp, CollectionPath, Fields, MemoryStore};
use operator_hub::surface::SurfaceServer;
use operator_hub::{Hub, HubConfig};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG may come from .env, so read it before building the filter.
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = dotenv {
        info!("Using process environment only ({})", e);
    }

    info!("Operator hub starting...");

    let config = HubConfig::from_env().context("Invalid hub configuration")?;

    let store = MemoryStore::new();
    if config.seed_demo {
        info!("Seeding demo conversations into '{}'", config.chats_collection);
        seed_demo(&store, &config);
    }

    let hub = Hub::spawn(Arc::new(store), &config).context("Failed to start the hub")?;
    let app = SurfaceServer::new(hub.clone()).router();

    info!("Starting surface server on port {}", config.port);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                info!("Server stopped with error: {}", e);
            }
        }
    }

    hub.shutdown().await;
    Ok(())
}

fn seed_demo(store: &MemoryStore, config: &HubConfig) {
    let chats = CollectionPath::root(config.chats_collection.as_str());
    let now = Utc::now();

    let conversations = [
        ("demo-amy", "Amy Smith", "amy@example.com", "Where is my order?", 3, "online", 2),
        ("demo-bob", "Bob Jones", "bob@example.com", "Thanks, that worked", 0, "away", 15),
        ("demo-anon", "", "visitor@example.com", "Hello?", 1, "offline", 40),
    ];

    for (id, name, email, last_message, unread, status, minutes_ago) in conversations {
        let at = now - ChronoDuration::minutes(minutes_ago);

        let mut record = Fields::new();
        if !name.is_empty() {
            record.insert(fields::USER_NAME.to_string(), Value::from(name));
        }
        record.insert(fields::USER_EMAIL.to_string(), Value::from(email));
        record.insert(fields::LAST_MESSAGE.to_string(), Value::from(last_message));
        record.insert(fields::LAST_ACTIVITY.to_string(), encode_timestamp(at));
        record.insert(fields::UNREAD_COUNT.to_string(), Value::from(unread));
        record.insert(fields::STATUS.to_string(), Value::from(status));
        store.insert(&chats, id, record);

        let mut message = Fields::new();
        message.insert(fields::TEXT.to_string(), Value::from(last_message));
        message.insert(fields::SENDER.to_string(), Value::from("user"));
        if !name.is_empty() {
            message.insert(fields::SENDER_NAME.to_string(), Value::from(name));
        }
        message.insert(fields::TIMESTAMP.to_string(), encode_timestamp(at));
        store.insert(
            &CollectionPath::sub(config.chats_collection.as_str(), id, config.messages_collection.as_str()),
            format!("{}-first", id),
            message,
        );
    }
}
