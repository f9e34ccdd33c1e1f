use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_FRAME_BYTES: usize = 4096; // inbound frames above this never reach the router
pub const MAILBOX_CAPACITY: usize = 256; // per-connection outbound queue depth
pub const PING_INTERVAL_SECS: u64 = 30; // liveness probe after this much idle time
pub const HISTORY_LIMIT: usize = 50; // messages replayed to a new connection
pub const CONTROL_CAPACITY: usize = 1024; // hub control channel depth
pub const MAX_PAGE_SIZE: usize = 100; // largest history page served by the store
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// Top-level config (lounge.toml + LOUNGE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoungeConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Broadcast hub tuning. Every field has a default so a partial `[hub]`
/// table is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Outbound frames buffered per connection before it counts as a slow
    /// consumer and gets evicted.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Idle time before the write pump sends a ping frame.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Hard cap on inbound frame size, enforced at the transport.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Number of persisted messages replayed on join.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_control_capacity")]
    pub control_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: MAILBOX_CAPACITY,
            ping_interval_secs: PING_INTERVAL_SECS,
            max_frame_bytes: MAX_FRAME_BYTES,
            history_limit: HISTORY_LIMIT,
            control_capacity: CONTROL_CAPACITY,
        }
    }
}

impl HubConfig {
    /// Never zero; `tokio::time::interval` panics on a zero period.
    pub fn ping_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ping_interval_secs.max(1))
    }

    /// Reject values the hub cannot run with. Channels and the ping timer
    /// panic on zero, and the store only serves pages up to `MAX_PAGE_SIZE`.
    pub fn validate(&self) -> crate::error::Result<()> {
        let invalid = |msg: String| Err(crate::error::LoungeError::Config(msg));
        if self.ping_interval_secs == 0 {
            return invalid("hub.ping_interval_secs must be at least 1".to_string());
        }
        if self.mailbox_capacity == 0 {
            return invalid("hub.mailbox_capacity must be at least 1".to_string());
        }
        if self.control_capacity == 0 {
            return invalid("hub.control_capacity must be at least 1".to_string());
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.history_limit) {
            return invalid(format!(
                "hub.history_limit must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.history_limit
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_mailbox_capacity() -> usize {
    MAILBOX_CAPACITY
}
fn default_ping_interval_secs() -> u64 {
    PING_INTERVAL_SECS
}
fn default_max_frame_bytes() -> usize {
    MAX_FRAME_BYTES
}
fn default_history_limit() -> usize {
    HISTORY_LIMIT
}
fn default_control_capacity() -> usize {
    CONTROL_CAPACITY
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.lounge/lounge.db", home)
}

impl LoungeConfig {
    /// Load config from a TOML file with LOUNGE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.lounge/lounge.toml
    ///
    /// Nested keys use a double underscore, e.g. `LOUNGE_HUB__MAILBOX_CAPACITY=512`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::from(Serialized::defaults(LoungeConfig::default()))
                .merge(Toml::file(&path))
                .merge(Env::prefixed("LOUNGE_").split("__")),
        )
    }

    /// Extract a config from an already-assembled figment.
    pub fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        let cfg: Self = figment
            .extract()
            .map_err(|e| crate::error::LoungeError::Config(e.to_string()))?;
        cfg.hub.validate()?;
        Ok(cfg)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.lounge/lounge.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_hub_constants() {
        let cfg = LoungeConfig::default();
        assert_eq!(cfg.hub.mailbox_capacity, 256);
        assert_eq!(cfg.hub.max_frame_bytes, 4096);
        assert_eq!(cfg.hub.history_limit, 50);
        assert_eq!(cfg.hub.ping_interval(), std::time::Duration::from_secs(30));
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let figment = Figment::from(Serialized::defaults(LoungeConfig::default())).merge(
            Toml::string(
                "[hub]\nmailbox_capacity = 8\n\n[gateway]\nport = 9000\n",
            ),
        );
        let cfg = LoungeConfig::from_figment(figment).expect("valid config");
        assert_eq!(cfg.hub.mailbox_capacity, 8);
        assert_eq!(cfg.hub.history_limit, HISTORY_LIMIT);
        assert_eq!(cfg.gateway.port, 9000);
        assert_eq!(cfg.gateway.bind, DEFAULT_BIND);
    }

    #[test]
    fn wrong_type_is_a_config_error() {
        let figment = Figment::from(Serialized::defaults(LoungeConfig::default()))
            .merge(Toml::string("[hub]\nmailbox_capacity = \"lots\"\n"));
        let err = LoungeConfig::from_figment(figment).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    fn with_hub(toml: &str) -> crate::error::Result<LoungeConfig> {
        LoungeConfig::from_figment(
            Figment::from(Serialized::defaults(LoungeConfig::default()))
                .merge(Toml::string(toml)),
        )
    }

    #[test]
    fn zero_ping_interval_is_rejected() {
        let err = with_hub("[hub]\nping_interval_secs = 0\n").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(err.to_string().contains("ping_interval_secs"));

        let built = HubConfig {
            ping_interval_secs: 0,
            ..HubConfig::default()
        };
        assert_eq!(built.ping_interval(), std::time::Duration::from_secs(1));
    }

    #[test]
    fn zero_capacities_are_rejected() {
        for toml in ["[hub]\nmailbox_capacity = 0\n", "[hub]\ncontrol_capacity = 0\n"] {
            assert_eq!(with_hub(toml).unwrap_err().code(), "CONFIG_ERROR");
        }
    }

    #[test]
    fn history_limit_outside_page_size_is_rejected() {
        let err = with_hub("[hub]\nhistory_limit = 500\n").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(err.to_string().contains("history_limit"));

        assert_eq!(
            with_hub("[hub]\nhistory_limit = 0\n").unwrap_err().code(),
            "CONFIG_ERROR"
        );

        let cfg = with_hub("[hub]\nhistory_limit = 100\nping_interval_secs = 1\n").unwrap();
        assert_eq!(cfg.hub.history_limit, MAX_PAGE_SIZE);
        assert_eq!(cfg.hub.ping_interval(), std::time::Duration::from_secs(1));
    }
}
