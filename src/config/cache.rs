use confique::Config;

/// Configuration for the caching subsystem backing the expired-object store
#[derive(Debug, Config, Clone)]
pub struct CacheConfig {
    /// Cache store type: "in-memory", "redis" or "none"
    #[config(env = "RP_CACHE_STORE", default = "in-memory")]
    pub store: String,

    /// Default TTL in seconds, used when an entry does not carry its own
    #[config(env = "RP_CACHE_TTL", default = 3600)]
    pub ttl: u64,

    /// In-memory cache capacity in MiB
    #[config(env = "RP_CACHE_MEMORY_CAPACITY", default = 128)]
    pub memory_capacity: usize,

    /// Redis connection URL, required when store is "redis"
    #[config(env = "RP_CACHE_REDIS_URL", default = "")]
    pub redis_url: String,
}
