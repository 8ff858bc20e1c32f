use crate::entity::Operator;
use anyhow::{Context, Result};
use std::time::Duration;

/// Runtime settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    pub chats_collection: String,
    pub messages_collection: String,
    pub operator: Operator,
    pub typing_idle: Duration,
    pub port: u16,
    pub seed_demo: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            chats_collection: "chats".to_string(),
            messages_collection: "messages".to_string(),
            operator: Operator::default(),
            typing_idle: Duration::from_millis(1000),
            port: 3000,
            seed_demo: false,
        }
    }
}

impl HubConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let typing_idle = match get("HUB_TYPING_IDLE_MS") {
            Some(raw) => Duration::from_millis(
                raw.parse()
                    .with_context(|| format!("HUB_TYPING_IDLE_MS is not a number: {}", raw))?,
            ),
            None => defaults.typing_idle,
        };

        let port = match get("HUB_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("HUB_PORT is not a valid port: {}", raw))?,
            None => defaults.port,
        };

        let seed_demo = get("HUB_SEED_DEMO")
            .map(|raw| matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.seed_demo);

        Ok(Self {
            chats_collection: get("HUB_CHATS_COLLECTION").unwrap_or(defaults.chats_collection),
            messages_collection: get("HUB_MESSAGES_COLLECTION")
                .unwrap_or(defaults.messages_collection),
            operator: Operator::new(
                get("HUB_OPERATOR_NAME").unwrap_or(defaults.operator.name),
                get("HUB_OPERATOR_EMAIL").unwrap_or(defaults.operator.email),
            ),
            typing_idle,
            port,
            seed_demo,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = HubConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, HubConfig::default());
        assert_eq!(config.typing_idle, Duration::from_millis(1000));
    }

    #[test]
    fn overrides_are_read() {
        let config = HubConfig::from_lookup(lookup(&[
            ("HUB_CHATS_COLLECTION", "conversations"),
            ("HUB_OPERATOR_NAME", "Support"),
            ("HUB_TYPING_IDLE_MS", "250"),
            ("HUB_PORT", "8080"),
            ("HUB_SEED_DEMO", "TRUE"),
        ]))
        .unwrap();
        assert_eq!(config.chats_collection, "conversations");
        assert_eq!(config.messages_collection, "messages");
        assert_eq!(config.operator.name, "Support");
        assert_eq!(config.operator.email, "admin@talexus.ai");
        assert_eq!(config.typing_idle, Duration::from_millis(250));
        assert_eq!(config.port, 8080);
        assert!(config.seed_demo);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        assert!(HubConfig::from_lookup(lookup(&[("HUB_PORT", "http")])).is_err());
        assert!(HubConfig::from_lookup(lookup(&[("HUB_TYPING_IDLE_MS", "-5")])).is_err());
    }
}
