use std::collections::HashMap;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Server {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Base URL used when building referral links.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Origin allowed by CORS.
    #[serde(default = "default_client_url")]
    pub client_url: String,
    #[serde(default)]
    pub production: bool,
}

impl Default for Server {
    fn default() -> Self {
        Server {
            listen: default_listen(),
            public_url: default_public_url(),
            client_url: default_client_url(),
            production: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum Storage {
    Postgres(Postgres),
    Memory,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum Auth {
    /// Verifies ID tokens against the Identity Toolkit `accounts:lookup` API.
    IdentityToolkit { url: String, api_key: String },
    /// Fixed token -> user id table for local development.
    Static { tokens: HashMap<String, String> },
}

#[derive(Debug, Deserialize)]
pub struct Mining {
    #[serde(default = "default_base_rate")]
    pub base_rate: f64,
    #[serde(default = "default_daily_target")]
    pub daily_target: f64,
    #[serde(default = "default_cycle_hours")]
    pub cycle_hours: i64,
    #[serde(default = "default_ad_boost_minutes")]
    pub ad_boost_minutes: i64,
    #[serde(default = "default_ad_boost_percent")]
    pub ad_boost_percent: u32,
    #[serde(default = "default_referral_boost_percent")]
    pub referral_boost_percent: u32,
    #[serde(default = "default_max_referrals")]
    pub max_referrals: u32,
}

impl Default for Mining {
    fn default() -> Self {
        Mining {
            base_rate: default_base_rate(),
            daily_target: default_daily_target(),
            cycle_hours: default_cycle_hours(),
            ad_boost_minutes: default_ad_boost_minutes(),
            ad_boost_percent: default_ad_boost_percent(),
            referral_boost_percent: default_referral_boost_percent(),
            max_referrals: default_max_referrals(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: Server,
    pub storage: Storage,
    pub auth: Auth,
    #[serde(default)]
    pub mining: Mining,
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("AUMINER").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_public_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_client_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_base_rate() -> f64 {
    0.0042
}

fn default_daily_target() -> f64 {
    0.1
}

fn default_cycle_hours() -> i64 {
    24
}

fn default_ad_boost_minutes() -> i64 {
    120
}

fn default_ad_boost_percent() -> u32 {
    200
}

fn default_referral_boost_percent() -> u32 {
    10
}

fn default_max_referrals() -> u32 {
    20
}
