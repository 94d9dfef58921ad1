//! Environment-driven runtime configuration.
//!
//! Every knob has a default matching the documented protocol values; a value
//! that is present but unparsable logs a warning and falls back rather than
//! aborting startup.

use chrono::Duration;
use tracing::warn;

const DEFAULT_RESET_TOKEN_TTL_SECS: i64 = 30 * 60;
const DEFAULT_THROTTLE_TTL_SECS: i64 = 60 * 60;
const DEFAULT_ARGON2_M_COST_KIB: u32 = 64 * 1024;
const DEFAULT_ARGON2_T_COST: u32 = 3;
const DEFAULT_ARGON2_P_COST: u32 = 1;

#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Lifetime of a PIN reset token.
    pub reset_token_ttl: Duration,
    /// Lifetime of a throttle record after its last failed attempt.
    pub throttle_ttl: Duration,
    pub argon2_m_cost_kib: u32,
    pub argon2_t_cost: u32,
    pub argon2_p_cost: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            reset_token_ttl: Duration::seconds(DEFAULT_RESET_TOKEN_TTL_SECS),
            throttle_ttl: Duration::seconds(DEFAULT_THROTTLE_TTL_SECS),
            argon2_m_cost_kib: DEFAULT_ARGON2_M_COST_KIB,
            argon2_t_cost: DEFAULT_ARGON2_T_COST,
            argon2_p_cost: DEFAULT_ARGON2_P_COST,
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reset_token_ttl: Duration::seconds(env_parse(
                "TACET_RESET_TOKEN_TTL_SECS",
                DEFAULT_RESET_TOKEN_TTL_SECS,
            )),
            throttle_ttl: Duration::seconds(env_parse(
                "TACET_THROTTLE_TTL_SECS",
                DEFAULT_THROTTLE_TTL_SECS,
            )),
            argon2_m_cost_kib: env_parse("TACET_ARGON2_M_COST_KIB", defaults.argon2_m_cost_kib),
            argon2_t_cost: env_parse("TACET_ARGON2_T_COST", defaults.argon2_t_cost),
            argon2_p_cost: env_parse("TACET_ARGON2_P_COST", defaults.argon2_p_cost),
        }
    }
}

fn env_parse<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(var = name, value = %raw, "unparsable config value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
