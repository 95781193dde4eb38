use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Address the HTTP listener binds to.
    pub bind_addr: String,

    /// Database connection string. When unset the broker runs on the
    /// in-memory store and loses all state on restart.
    pub database_url: Option<String>,

    // =========================
    // Auction configuration
    // =========================
    /// Number of admitted bids that triggers immediate settlement of the
    /// current batch.
    ///
    /// Settlement also happens without reaching this threshold once the
    /// batch timeout expires, so a lone bidder is never stuck waiting
    /// for company.
    pub batch_threshold: usize,

    /// Milliseconds between the first admission of a batch and the alarm
    /// that forces settlement.
    ///
    /// Measured from the FIRST bid only; later admissions do not extend
    /// the deadline.
    pub batch_timeout_ms: u64,

    /// Reward credited to every losing bidder at settlement, clamped
    /// against `max_bal`. Acts as a subsidy that keeps losing clients
    /// liquid across rounds.
    pub accumulate_bal: i64,

    /// Balance issued to a freshly registered client.
    pub start_bal: i64,

    /// Upper bound any balance is clamped to.
    pub max_bal: i64,

    // =========================
    // Admin configuration
    // =========================
    /// Bearer token required by the admin endpoints. When empty, the
    /// admin surface is effectively disabled (every request is rejected
    /// as unauthorized).
    pub admin_token: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),

            batch_threshold: env_or("N", 5),
            batch_timeout_ms: env_or("TIMEOUT", 5_000),
            accumulate_bal: env_or("ACCUMULATE_BAL", 0),
            start_bal: env_or("START_BAL", 10),
            max_bal: env_or("MAX_BAL", 100),

            admin_token: std::env::var("ADMIN_TOKEN").unwrap_or_default(),
        }
    }
}

/// Reads `key` from the environment, falling back to `default` when the
/// variable is unset or fails to parse.
fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
