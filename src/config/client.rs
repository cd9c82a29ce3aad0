use confique::Config;

/// HTTP client settings for all calls made to the authorization server.
/// Timeouts must be finite: an unbounded call would hold the per-RP
/// serialization lock indefinitely.
#[derive(Debug, Config, Clone)]
pub struct AsClientConfig {
    /// Request timeout in seconds
    #[config(env = "RP_AS_CLIENT_TIMEOUT", default = 10)]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[config(env = "RP_AS_CLIENT_CONNECT_TIMEOUT", default = 2)]
    pub connect_timeout: u64,
}
