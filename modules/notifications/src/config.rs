use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Nats,
    InMemory,
    /// No transport at all: events are logged and dropped, consumers are not
    /// started. The module still serves its API and webhook.
    Disabled,
}

impl BusKind {
    pub fn from_env() -> Self {
        match env::var("BUS_TYPE")
            .unwrap_or_else(|_| "inmemory".to_string())
            .to_lowercase()
            .as_str()
        {
            "nats" => BusKind::Nats,
            "inmemory" => BusKind::InMemory,
            "disabled" => BusKind::Disabled,
            _ => {
                tracing::warn!("Unknown BUS_TYPE, defaulting to inmemory");
                BusKind::InMemory
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bus_kind: BusKind,
    pub database_url: String,
    pub nats_url: Option<String>,
    /// Attempt ceiling for the delivery retry sweep
    pub max_send_attempts: i32,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let bus_kind = BusKind::from_env();
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        let nats_url = match bus_kind {
            BusKind::Nats => Some(
                env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            ),
            BusKind::InMemory | BusKind::Disabled => None,
        };

        let max_send_attempts = env::var("MAX_SEND_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        Ok(Self {
            bus_kind,
            database_url,
            nats_url,
            max_send_attempts,
        })
    }
}
