// src/config/mod.rs
// All tunables load from the environment (.env supported), with working defaults.

use once_cell::sync::Lazy;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct SolaceConfig {
    // Database Configuration
    pub database_url: String,
    pub sqlite_max_connections: u32,

    // Server Configuration
    pub host: String,
    pub port: u16,
    pub cors_origin: String,

    // WebSocket Settings
    pub ws_heartbeat_interval: u64,

    // Emotion Pipeline Settings
    /// Analyze every Nth inbound video frame.
    pub frame_decimation: u64,
    /// Push a trend snapshot to the therapist every Mth analyzed sample.
    pub trend_push_every: u64,
    /// Rolling window capacity per session.
    pub window_capacity: usize,
    /// Adjacent valence delta that counts as an emotional shift.
    pub valence_shift_threshold: f32,
    /// Stability below this triggers an emotion_warning.
    pub low_stability_threshold: f32,

    // Session Rules
    /// Hours before scheduled start after which cancel/reschedule is refused.
    pub cancellation_cutoff_hours: i64,

    // External Classifier Service
    pub classifier_url: String,
    pub classifier_timeout: u64,

    // RTC Provider Credentials
    pub rtc_app_id: String,
    pub rtc_app_certificate: String,
    pub rtc_token_ttl: u64,

    // Logging Configuration
    pub log_level: String,
}

fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => {
            // Tolerate trailing comments and whitespace in .env values
            let clean_val = val.split('#').next().unwrap_or("").trim();
            match clean_val.parse::<T>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    eprintln!("Config: {} = '{}' (parse failed, using default)", key, val);
                    default
                }
            }
        }
        Err(_) => default,
    }
}

impl SolaceConfig {
    pub fn from_env() -> Self {
        if dotenvy::dotenv().is_err() {
            eprintln!("Warning: .env file not found. Using environment variables and defaults.");
        }

        Self {
            database_url: env_var_or("DATABASE_URL", "sqlite:./solace.db".to_string()),
            sqlite_max_connections: env_var_or("SQLITE_MAX_CONNECTIONS", 10),
            host: env_var_or("SOLACE_HOST", "0.0.0.0".to_string()),
            port: env_var_or("SOLACE_PORT", 3001),
            cors_origin: env_var_or("SOLACE_CORS_ORIGIN", "http://localhost:3000".to_string()),
            ws_heartbeat_interval: env_var_or("SOLACE_WS_HEARTBEAT_INTERVAL", 30),
            frame_decimation: env_var_or("SOLACE_FRAME_DECIMATION", 5),
            trend_push_every: env_var_or("SOLACE_TREND_PUSH_EVERY", 10),
            window_capacity: env_var_or("SOLACE_WINDOW_CAPACITY", 30),
            valence_shift_threshold: env_var_or("SOLACE_VALENCE_SHIFT_THRESHOLD", 0.3),
            low_stability_threshold: env_var_or("SOLACE_LOW_STABILITY_THRESHOLD", 0.4),
            cancellation_cutoff_hours: env_var_or("SOLACE_CANCELLATION_CUTOFF_HOURS", 24),
            classifier_url: env_var_or(
                "SOLACE_CLASSIFIER_URL",
                "http://localhost:8500/classify".to_string(),
            ),
            classifier_timeout: env_var_or("SOLACE_CLASSIFIER_TIMEOUT", 10),
            rtc_app_id: env_var_or("SOLACE_RTC_APP_ID", "solace-dev-app".to_string()),
            rtc_app_certificate: env_var_or(
                "SOLACE_RTC_APP_CERTIFICATE",
                "solace-dev-certificate".to_string(),
            ),
            rtc_token_ttl: env_var_or("SOLACE_RTC_TOKEN_TTL", 3600),
            log_level: env_var_or("SOLACE_LOG_LEVEL", "solace=info,tower_http=info".to_string()),
        }
    }
}

pub static CONFIG: Lazy<SolaceConfig> = Lazy::new(SolaceConfig::from_env);
