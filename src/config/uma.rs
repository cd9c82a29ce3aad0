use confique::Config;

/// Lifetimes for the anti-replay objects and the UMA protection token,
/// plus the realm advertised in WWW-Authenticate hints.
#[derive(Debug, Config, Clone)]
pub struct UmaConfig {
    /// TTL in seconds for nonces issued at authorization initiation
    #[config(env = "RP_UMA_NONCE_TTL", default = 600)]
    pub nonce_ttl: u64,

    /// TTL in seconds for states issued at authorization initiation
    #[config(env = "RP_UMA_STATE_TTL", default = 600)]
    pub state_ttl: u64,

    /// TTL in seconds for stored one-shot request objects
    #[config(env = "RP_UMA_REQUEST_OBJECT_TTL", default = 600)]
    pub request_object_ttl: u64,

    /// Upper bound in seconds on how long a protection access token is
    /// cached, regardless of the expiry the authorization server reports
    #[config(env = "RP_UMA_PAT_MAX_TTL", default = 3600)]
    pub pat_max_ttl: u64,

    /// TTL in seconds for cached uma2-configuration discovery documents
    #[config(env = "RP_UMA_DISCOVERY_TTL", default = 3600)]
    pub discovery_ttl: u64,

    /// Realm reported in UMA WWW-Authenticate ticket hints
    #[config(env = "RP_UMA_REALM", default = "rp")]
    pub realm: String,
}
