//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::util::time::SIMULATION_TPS;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,
    /// Gameplay rules applied to every session
    pub rules: GameRules,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            rules: GameRules::from_env()?,
        })
    }
}

/// Gameplay constants shared by the authority and every client mirror.
///
/// Sent to clients on join so the sender-side precondition checks use the
/// same limits as the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRules {
    /// Starting and maximum hit points
    pub max_hp: i32,
    /// Magazine size
    pub max_bullet_count: u32,
    /// Damage dealt by one hit
    pub damage_per_hit: i32,
    /// Radius of the client-side pickup scan
    pub pickup_radius: f32,
    /// Extra distance the authority tolerates on pickup (latency slack)
    pub pickup_tolerance: f32,
    /// Maximum length of the fire ray
    pub fire_range: f32,
    /// Height of the view origin above the character's feet
    pub eye_height: f32,
    /// Character hit box radius
    pub capsule_radius: f32,
    /// Character hit box half height
    pub capsule_half_height: f32,
    /// Time a reload takes before ammo is restored
    pub reload_duration_ms: u64,
    /// Multiple of the reload duration after which a client drops a stuck reload gate
    pub stale_reload_factor: u32,
    /// Characters per session
    pub max_characters: usize,
    /// Weapons scattered in a fresh arena
    pub weapon_count: usize,
    /// Static cover boxes in a fresh arena
    pub obstacle_count: usize,
    /// Half the width of the square arena
    pub arena_half_extent: f32,
    /// Chat messages are truncated to this many characters
    pub chat_max_len: usize,
    /// Fixed arena seed, random when absent
    pub arena_seed: Option<u64>,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            max_hp: 3,
            max_bullet_count: 21,
            damage_per_hit: 1,
            pickup_radius: 150.0,
            pickup_tolerance: 50.0,
            fire_range: 100_000.0,
            eye_height: 150.0,
            capsule_radius: 42.0,
            capsule_half_height: 96.0,
            reload_duration_ms: 2_000,
            stale_reload_factor: 3,
            max_characters: 16,
            weapon_count: 6,
            obstacle_count: 8,
            arena_half_extent: 3_000.0,
            chat_max_len: 256,
            arena_seed: None,
        }
    }
}

impl GameRules {
    /// Load gameplay rules, falling back to defaults for unset variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let rules = Self {
            max_hp: parse_or("MAX_HP", defaults.max_hp)?,
            max_bullet_count: parse_or("MAX_BULLET_COUNT", defaults.max_bullet_count)?,
            damage_per_hit: parse_or("DAMAGE_PER_HIT", defaults.damage_per_hit)?,
            pickup_radius: parse_or("PICKUP_RADIUS", defaults.pickup_radius)?,
            pickup_tolerance: parse_or("PICKUP_TOLERANCE", defaults.pickup_tolerance)?,
            fire_range: parse_or("FIRE_RANGE", defaults.fire_range)?,
            reload_duration_ms: parse_or("RELOAD_DURATION_MS", defaults.reload_duration_ms)?,
            max_characters: parse_or("MAX_CHARACTERS", defaults.max_characters)?,
            weapon_count: parse_or("WEAPON_COUNT", defaults.weapon_count)?,
            chat_max_len: parse_or("CHAT_MAX_LEN", defaults.chat_max_len)?,
            arena_seed: match env::var("ARENA_SEED") {
                Ok(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid("ARENA_SEED"))?),
                Err(_) => None,
            },
            ..defaults
        };

        rules.validate()?;
        Ok(rules)
    }

    /// Reject rule sets the controllers cannot uphold their invariants with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_hp <= 0 {
            return Err(ConfigError::Invalid("MAX_HP"));
        }
        if self.max_bullet_count == 0 {
            return Err(ConfigError::Invalid("MAX_BULLET_COUNT"));
        }
        if self.damage_per_hit < 0 {
            return Err(ConfigError::Invalid("DAMAGE_PER_HIT"));
        }
        if self.pickup_radius <= 0.0 || self.fire_range <= 0.0 {
            return Err(ConfigError::Invalid("PICKUP_RADIUS/FIRE_RANGE"));
        }
        if self.max_characters == 0 {
            return Err(ConfigError::Invalid("MAX_CHARACTERS"));
        }
        Ok(())
    }

    /// Reload duration expressed in simulation ticks (at least one)
    pub fn reload_ticks(&self) -> u64 {
        let ticks = (self.reload_duration_ms * SIMULATION_TPS as u64).div_ceil(1000);
        ticks.max(1)
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_are_valid() {
        let rules = GameRules::default();
        assert_eq!(rules.max_hp, 3);
        assert_eq!(rules.max_bullet_count, 21);
        assert_eq!(rules.damage_per_hit, 1);
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn reload_ticks_rounds_up() {
        let rules = GameRules {
            reload_duration_ms: 1_010,
            ..GameRules::default()
        };
        // 30 TPS: 1.01s is 30.3 ticks
        assert_eq!(rules.reload_ticks(), 31);

        let instant = GameRules {
            reload_duration_ms: 0,
            ..GameRules::default()
        };
        assert_eq!(instant.reload_ticks(), 1);
    }

    #[test]
    fn zero_magazine_is_rejected() {
        let rules = GameRules {
            max_bullet_count: 0,
            ..GameRules::default()
        };
        assert!(matches!(
            rules.validate(),
            Err(ConfigError::Invalid("MAX_BULLET_COUNT"))
        ));
    }
}
