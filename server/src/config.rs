use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Simulation ticks per second, per room
    pub tick_rate_hz: u32,
    /// Snapshot rate while balls are rolling
    pub broadcast_rate_hz: u32,
    /// Snapshot rate while the table is settled
    pub idle_broadcast_rate_hz: u32,
    /// A room with no accepted shot for this long is torn down
    pub idle_timeout: Duration,
    pub max_rooms: usize,
    pub max_connections: usize,
    /// Frames larger than this close the connection
    pub max_message_bytes: usize,
    /// Unparseable frames tolerated per connection
    pub max_parse_errors: u32,
    pub max_shots_per_sec: u32,
    /// Fixed seed for every room's rack; random per room when unset
    pub rng_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9001".to_string(),
            tick_rate_hz: 60,
            broadcast_rate_hz: 20,
            idle_broadcast_rate_hz: 2,
            idle_timeout: Duration::from_secs(30 * 60),
            max_rooms: 1000,
            max_connections: 2000,
            max_message_bytes: 1024,
            max_parse_errors: 5,
            max_shots_per_sec: 5,
            rng_seed: None,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `EIGHTBALL_*` environment variables.
    pub fn from_env() -> Self {
        use std::env;

        let mut config = Self::default();
        if let Ok(addr) = env::var("EIGHTBALL_LISTEN_ADDR") {
            let addr = addr.trim();
            if !addr.is_empty() {
                config.listen_addr = addr.to_string();
            }
        }
        config.rng_seed = env::var("EIGHTBALL_RNG_SEED")
            .ok()
            .and_then(|s| s.trim().parse().ok());
        if let Some(secs) = env::var("EIGHTBALL_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            config.idle_timeout = Duration::from_secs(secs);
        }
        config
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.tick_rate_hz == 0 {
            return Err("tick_rate_hz must be > 0".to_string());
        }
        if self.broadcast_rate_hz == 0 || self.broadcast_rate_hz > self.tick_rate_hz {
            return Err("broadcast_rate_hz must be in 1..=tick_rate_hz".to_string());
        }
        if self.idle_broadcast_rate_hz == 0 || self.idle_broadcast_rate_hz > self.broadcast_rate_hz
        {
            return Err("idle_broadcast_rate_hz must be in 1..=broadcast_rate_hz".to_string());
        }
        if self.idle_timeout.is_zero() {
            return Err("idle_timeout must be > 0".to_string());
        }
        if self.max_rooms == 0 {
            return Err("max_rooms must be > 0".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }
        if self.max_message_bytes < 64 {
            return Err("max_message_bytes must be >= 64".to_string());
        }
        if self.max_shots_per_sec == 0 {
            return Err("max_shots_per_sec must be > 0".to_string());
        }
        Ok(())
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz as f64)
    }

    /// Ticks between snapshots while moving
    pub fn broadcast_every(&self) -> u64 {
        (self.tick_rate_hz / self.broadcast_rate_hz).max(1) as u64
    }

    /// Ticks between snapshots while settled
    pub fn idle_broadcast_every(&self) -> u64 {
        (self.tick_rate_hz / self.idle_broadcast_rate_hz).max(1) as u64
    }
}
