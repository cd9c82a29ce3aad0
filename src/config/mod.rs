pub use crate::config::cache::CacheConfig;
pub use crate::config::client::AsClientConfig;
pub use crate::config::uma::UmaConfig;
use confique::Config;

pub mod cache;
pub mod client;
pub mod uma;

/// Main configuration structure for the RP server
#[derive(Debug, Config, Clone)]
pub struct RpConfig {
    /// API Key protecting every proxy endpoint except health and
    /// request-object retrieval
    #[config(env = "RP_API_KEY", default = "")]
    pub api_key: String,

    /// The port the RP server will listen to
    #[config(env = "RP_PORT", default = 8553)]
    pub port: u16,

    /// Externally reachable base URL of this server, used to build the
    /// request_uri handed to the authorization server
    #[config(env = "RP_BASE_URL", default = "http://localhost:8553")]
    pub base_url: String,

    /// Cache configuration (backs the expired-object store)
    #[config(nested)]
    pub cache: CacheConfig,

    /// UMA / token lifetimes and realm
    #[config(nested)]
    pub uma: UmaConfig,

    /// HTTP client settings for calls to the authorization server
    #[config(nested)]
    pub client: AsClientConfig,
}

impl RpConfig {
    /// Creates a new configuration from environment variables
    pub fn new() -> Result<Self, String> {
        Self::builder().env().load().map_err(|e| e.to_string())
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            api_key: "test_api_key".to_string(),
            port: 0, // Let the OS choose a port
            base_url: "http://localhost:8553".to_string(),
            cache: CacheConfig {
                store: "in-memory".to_string(),
                ttl: 60,
                memory_capacity: 16,
                redis_url: String::new(),
            },
            uma: UmaConfig {
                nonce_ttl: 60,
                state_ttl: 60,
                request_object_ttl: 60,
                pat_max_ttl: 60,
                discovery_ttl: 60,
                realm: "rp".to_string(),
            },
            client: AsClientConfig {
                timeout: 5,
                connect_timeout: 2,
            },
        }
    }
}
