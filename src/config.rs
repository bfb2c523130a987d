use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use std::fmt;

#[derive(Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub enable_file_logs: bool,
    pub log_dir: String,
    pub sled_path: String,
    pub jwt_secret: String,
    pub admin_jwt_secret: String,
    pub cors_origin: String,
    pub worker: WorkerConfig,
    pub llm: LLMConfig,
    pub progression: ProgressionConfig,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub generation_enabled: bool,
    pub queue_capacity: usize,
    pub concurrency: usize,
}

#[derive(Clone)]
pub struct LLMConfig {
    pub enabled: bool,
    pub mock: bool,
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

/// 学习进度规则参数，默认值与线上课程保持一致
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressionConfig {
    pub max_hearts: u32,
    pub points_per_challenge: u64,
    /// Price of a full heart refill.
    pub points_to_refill: u64,
    pub pending_lesson_threshold: usize,
    pub weak_topic_window: usize,
    pub advance_perfect_lessons: usize,
    pub advance_fast_lessons: usize,
    pub fast_seconds_per_challenge: f64,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            max_hearts: 10,
            points_per_challenge: 10,
            points_to_refill: 10,
            pending_lesson_threshold: 2,
            weak_topic_window: 30,
            advance_perfect_lessons: 60,
            advance_fast_lessons: 20,
            fast_seconds_per_challenge: 5.0,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("enable_file_logs", &self.enable_file_logs)
            .field("log_dir", &self.log_dir)
            .field("sled_path", &self.sled_path)
            .field("jwt_secret", &"***REDACTED***")
            .field("admin_jwt_secret", &"***REDACTED***")
            .field("cors_origin", &self.cors_origin)
            .field("worker", &self.worker)
            .field("llm", &self.llm)
            .field("progression", &self.progression)
            .finish()
    }
}

impl fmt::Debug for LLMConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LLMConfig")
            .field("enabled", &self.enabled)
            .field("mock", &self.mock)
            .field("api_url", &self.api_url)
            .field("api_key", &"***REDACTED***")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = ProgressionConfig::default();
        Self {
            host: env_or_parse("HOST", IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
            port: env_or_parse("PORT", 3000_u16),
            log_level: env_or("RUST_LOG", "info"),
            enable_file_logs: env_or_bool("ENABLE_FILE_LOGS", false),
            log_dir: env_or("LOG_DIR", "./logs"),
            sled_path: env_or("SLED_PATH", "./data/progression.sled"),
            jwt_secret: env_or(
                "JWT_SECRET",
                "change_me_to_random_64_chars_change_me_to_random_64_chars",
            ),
            admin_jwt_secret: env_or(
                "ADMIN_JWT_SECRET",
                "change_me_to_another_random_64_chars_change_me_to_another",
            ),
            cors_origin: env_or("CORS_ORIGIN", "http://localhost:3001"),
            worker: WorkerConfig {
                generation_enabled: env_or_bool("GENERATION_WORKER_ENABLED", true),
                queue_capacity: env_or_parse("GENERATION_QUEUE_CAPACITY", 64_usize),
                concurrency: env_or_parse("GENERATION_CONCURRENCY", 2_usize),
            },
            llm: LLMConfig {
                enabled: env_or_bool("LLM_ENABLED", false),
                mock: env_or_bool("LLM_MOCK", true),
                api_url: env_or("LLM_API_URL", "https://api.anthropic.com"),
                api_key: env_or("LLM_API_KEY", ""),
                model: env_or("LLM_MODEL", "claude-sonnet-4-20250514"),
                max_tokens: env_or_parse("LLM_MAX_TOKENS", 8000_u32),
                timeout_secs: env_or_parse("LLM_TIMEOUT_SECS", 120_u64),
            },
            progression: ProgressionConfig {
                max_hearts: env_or_parse("MAX_HEARTS", defaults.max_hearts),
                points_per_challenge: env_or_parse(
                    "POINTS_PER_CHALLENGE",
                    defaults.points_per_challenge,
                ),
                points_to_refill: env_or_parse("POINTS_TO_REFILL", defaults.points_to_refill),
                pending_lesson_threshold: env_or_parse(
                    "PENDING_LESSON_THRESHOLD",
                    defaults.pending_lesson_threshold,
                ),
                weak_topic_window: env_or_parse("WEAK_TOPIC_WINDOW", defaults.weak_topic_window),
                advance_perfect_lessons: env_or_parse(
                    "ADVANCE_PERFECT_LESSONS",
                    defaults.advance_perfect_lessons,
                ),
                advance_fast_lessons: env_or_parse(
                    "ADVANCE_FAST_LESSONS",
                    defaults.advance_fast_lessons,
                ),
                fast_seconds_per_challenge: env_or_parse(
                    "FAST_SECONDS_PER_CHALLENGE",
                    defaults.fast_seconds_per_challenge,
                ),
            },
        }
    }
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_or_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(
                    key,
                    value = %raw,
                    "Failed to parse env var, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

pub fn env_or_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, OnceLock};

    use super::*;

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn managed_keys() -> &'static [&'static str] {
        &[
            "PORT",
            "RUST_LOG",
            "LLM_ENABLED",
            "LLM_MOCK",
            "LLM_TIMEOUT_SECS",
            "MAX_HEARTS",
            "FAST_SECONDS_PER_CHALLENGE",
            "GENERATION_QUEUE_CAPACITY",
        ]
    }

    fn clear_keys(keys: &[&str]) {
        for key in keys {
            env::remove_var(key);
        }
    }

    #[test]
    fn loads_defaults_when_missing() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        let cfg = Config::from_env();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.log_level, "info");
        assert!(!cfg.llm.enabled);
        assert_eq!(cfg.progression, ProgressionConfig::default());
        assert_eq!(cfg.worker.queue_capacity, 64);
    }

    #[test]
    fn parses_numeric_values() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        env::set_var("PORT", "4000");
        env::set_var("MAX_HEARTS", "5");
        env::set_var("FAST_SECONDS_PER_CHALLENGE", "3.5");
        env::set_var("LLM_TIMEOUT_SECS", "42");

        let cfg = Config::from_env();
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.progression.max_hearts, 5);
        assert_eq!(cfg.progression.fast_seconds_per_challenge, 3.5);
        assert_eq!(cfg.llm.timeout_secs, 42);
        clear_keys(managed_keys());
    }

    #[test]
    fn invalid_values_fall_back() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        env::set_var("PORT", "bad");
        env::set_var("GENERATION_QUEUE_CAPACITY", "-3");

        let cfg = Config::from_env();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.worker.queue_capacity, 64);
        clear_keys(managed_keys());
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        let mut cfg = Config::from_env();
        cfg.llm.api_key = "sk-very-secret".to_string();
        let printed = format!("{cfg:?}");
        assert!(!printed.contains("sk-very-secret"));
        assert!(!printed.contains("change_me_to_random"));
    }
}
