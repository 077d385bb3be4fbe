use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::Difficulty;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotBackend {
    File,
    Redis,
    Memory,
}

/// What to do when a snapshot is resumed after more wall-clock time has passed
/// since its last save than it had remaining on the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleResumePolicy {
    /// Restore the saved countdown as-is.
    Resume,
    /// Finish and score the session right away.
    AutoFinish,
    /// Restore with this many seconds on the clock.
    Grace(u32),
}

impl FromStr for StaleResumePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "resume" => Ok(StaleResumePolicy::Resume),
            "auto_finish" | "auto-finish" => Ok(StaleResumePolicy::AutoFinish),
            _ => s
                .strip_prefix("grace:")
                .and_then(|secs| secs.parse::<u32>().ok())
                .filter(|secs| *secs > 0)
                .map(StaleResumePolicy::Grace)
                .ok_or_else(|| format!("invalid stale resume policy '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultyDurations {
    pub easy_seconds: u32,
    pub medium_seconds: u32,
    pub hard_seconds: u32,
    pub mixed_seconds: u32,
}

impl Default for DifficultyDurations {
    fn default() -> Self {
        Self {
            easy_seconds: 20 * 60,
            medium_seconds: 25 * 60,
            hard_seconds: 30 * 60,
            mixed_seconds: 25 * 60,
        }
    }
}

impl DifficultyDurations {
    pub fn for_difficulty(&self, difficulty: Difficulty) -> u32 {
        match difficulty {
            Difficulty::Easy => self.easy_seconds,
            Difficulty::Medium => self.medium_seconds,
            Difficulty::Hard => self.hard_seconds,
            Difficulty::Mixed => self.mixed_seconds,
        }
    }
}

/// Tunables of the quiz engine.
#[derive(Debug, Clone)]
pub struct QuizSettings {
    pub target_count: u32,
    pub reduced_count: u32,
    pub rate_limit_max_attempts: usize,
    pub rate_limit_backoff: Duration,
    pub tick_interval: Duration,
    pub autosave_interval: Duration,
    pub detail_retention: usize,
    pub summary_retention: usize,
    pub durations: DifficultyDurations,
    pub stale_resume: StaleResumePolicy,
    pub shuffle_seed: Option<u64>,
    pub history_default_limit: usize,
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            target_count: 25,
            reduced_count: 10,
            rate_limit_max_attempts: 3,
            rate_limit_backoff: Duration::from_secs(3),
            tick_interval: Duration::from_secs(1),
            autosave_interval: Duration::from_secs(5),
            detail_retention: 10,
            summary_retention: 20,
            durations: DifficultyDurations::default(),
            stale_resume: StaleResumePolicy::Resume,
            shuffle_seed: None,
            history_default_limit: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub trivia_api_url: String,
    pub mongo_uri: String,
    pub mongo_database: String,
    pub persistence_backend: PersistenceBackend,
    pub redis_uri: String,
    pub snapshot_backend: SnapshotBackend,
    pub snapshot_path: String,
    pub quiz: QuizSettings,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then a local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + ENV overrides (prefix: APP_)
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let lookup = |key: &str, var: &str| -> Option<String> {
            settings.get_string(key).ok().or_else(|| env::var(var).ok())
        };

        let bind_addr = lookup("server.bind_addr", "BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8081".to_string());

        let trivia_api_url = lookup("trivia.url", "TRIVIA_API_URL")
            .unwrap_or_else(|| "https://opentdb.com/api.php".to_string());

        let mongo_uri = lookup("database.mongo_uri", "MONGO_URI")
            .unwrap_or_else(|| "mongodb://localhost:27017".to_string());

        let mongo_database = lookup("database.mongo_database", "MONGO_DATABASE")
            .unwrap_or_else(|| "quiz".to_string());

        let persistence_backend = match lookup("persistence.backend", "PERSISTENCE_BACKEND")
            .as_deref()
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            None | Some("mongo") => PersistenceBackend::Mongo,
            Some("memory") => PersistenceBackend::Memory,
            Some(other) => {
                return Err(config::ConfigError::Message(format!(
                    "unknown persistence backend '{}'",
                    other
                )))
            }
        };

        let redis_uri = lookup("redis.uri", "REDIS_URI")
            .unwrap_or_else(|| "redis://127.0.0.1:6379/0".to_string());

        let snapshot_backend = match lookup("snapshot.backend", "SNAPSHOT_BACKEND")
            .as_deref()
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            None | Some("file") => SnapshotBackend::File,
            Some("redis") => SnapshotBackend::Redis,
            Some("memory") => SnapshotBackend::Memory,
            Some(other) => {
                return Err(config::ConfigError::Message(format!(
                    "unknown snapshot backend '{}'",
                    other
                )))
            }
        };

        let snapshot_path = lookup("snapshot.path", "SNAPSHOT_PATH")
            .unwrap_or_else(|| ".quiz/current-session.json".to_string());

        let quiz = load_quiz_settings(&settings)?;

        Ok(Config {
            bind_addr,
            trivia_api_url,
            mongo_uri,
            mongo_database,
            persistence_backend,
            redis_uri,
            snapshot_backend,
            snapshot_path,
            quiz,
        })
    }
}

fn load_quiz_settings(settings: &config::Config) -> Result<QuizSettings, config::ConfigError> {
    let defaults = QuizSettings::default();

    let int = |key: &str, var: &str| -> Option<u64> {
        settings
            .get_int(&format!("quiz.{}", key))
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .or_else(|| env::var(var).ok().and_then(|v| v.parse::<u64>().ok()))
    };
    let positive = |key: &str, var: &str| int(key, var).filter(|v| *v > 0);
    let out_of_range = |key: &str, v: u64| {
        config::ConfigError::Message(format!("quiz.{} ({}) is out of range", key, v))
    };
    let positive_u32 = |key: &str, var: &str| -> Result<Option<u32>, config::ConfigError> {
        positive(key, var)
            .map(|v| u32::try_from(v).map_err(|_| out_of_range(key, v)))
            .transpose()
    };
    let positive_usize = |key: &str, var: &str| -> Result<Option<usize>, config::ConfigError> {
        positive(key, var)
            .map(|v| usize::try_from(v).map_err(|_| out_of_range(key, v)))
            .transpose()
    };

    let stale_resume = match settings
        .get_string("quiz.stale_resume")
        .ok()
        .or_else(|| env::var("QUIZ_STALE_RESUME").ok())
    {
        Some(raw) => raw.parse().map_err(config::ConfigError::Message)?,
        None => defaults.stale_resume,
    };

    let durations = DifficultyDurations {
        easy_seconds: positive_u32("duration_easy_seconds", "QUIZ_DURATION_EASY_SECONDS")?
            .unwrap_or(defaults.durations.easy_seconds),
        medium_seconds: positive_u32("duration_medium_seconds", "QUIZ_DURATION_MEDIUM_SECONDS")?
            .unwrap_or(defaults.durations.medium_seconds),
        hard_seconds: positive_u32("duration_hard_seconds", "QUIZ_DURATION_HARD_SECONDS")?
            .unwrap_or(defaults.durations.hard_seconds),
        mixed_seconds: positive_u32("duration_mixed_seconds", "QUIZ_DURATION_MIXED_SECONDS")?
            .unwrap_or(defaults.durations.mixed_seconds),
    };

    let target_count = positive_u32("target_count", "QUIZ_TARGET_COUNT")?
        .unwrap_or(defaults.target_count);
    let reduced_count = positive_u32("reduced_count", "QUIZ_REDUCED_COUNT")?
        .unwrap_or(defaults.reduced_count);
    if reduced_count > target_count {
        return Err(config::ConfigError::Message(format!(
            "quiz.reduced_count ({}) must not exceed quiz.target_count ({})",
            reduced_count, target_count
        )));
    }

    Ok(QuizSettings {
        target_count,
        reduced_count,
        rate_limit_max_attempts: positive_usize("rate_limit_max_attempts", "QUIZ_RATE_LIMIT_MAX_ATTEMPTS")?
            .unwrap_or(defaults.rate_limit_max_attempts),
        rate_limit_backoff: int("rate_limit_backoff_ms", "QUIZ_RATE_LIMIT_BACKOFF_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.rate_limit_backoff),
        tick_interval: positive("tick_interval_ms", "QUIZ_TICK_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.tick_interval),
        autosave_interval: positive("autosave_interval_ms", "QUIZ_AUTOSAVE_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.autosave_interval),
        detail_retention: positive_usize("detail_retention", "QUIZ_DETAIL_RETENTION")?
            .unwrap_or(defaults.detail_retention),
        summary_retention: positive_usize("summary_retention", "QUIZ_SUMMARY_RETENTION")?
            .unwrap_or(defaults.summary_retention),
        durations,
        stale_resume,
        shuffle_seed: int("shuffle_seed", "QUIZ_SHUFFLE_SEED"),
        history_default_limit: positive_usize("history_default_limit", "QUIZ_HISTORY_DEFAULT_LIMIT")?
            .unwrap_or(defaults.history_default_limit),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiz_defaults_match_documented_values() {
        let s = QuizSettings::default();
        assert_eq!(s.target_count, 25);
        assert_eq!(s.reduced_count, 10);
        assert_eq!(s.rate_limit_max_attempts, 3);
        assert_eq!(s.rate_limit_backoff, Duration::from_secs(3));
        assert_eq!(s.autosave_interval, Duration::from_secs(5));
        assert_eq!(s.detail_retention, 10);
        assert_eq!(s.summary_retention, 20);
    }

    #[test]
    fn parses_stale_resume_policies() {
        assert_eq!("resume".parse(), Ok(StaleResumePolicy::Resume));
        assert_eq!("auto_finish".parse(), Ok(StaleResumePolicy::AutoFinish));
        assert_eq!("grace:60".parse(), Ok(StaleResumePolicy::Grace(60)));
        assert!("grace:0".parse::<StaleResumePolicy>().is_err());
        assert!("later".parse::<StaleResumePolicy>().is_err());
    }

    #[test]
    fn durations_per_difficulty() {
        let d = DifficultyDurations::default();
        assert_eq!(d.for_difficulty(Difficulty::Hard), 1800);
        assert_eq!(d.for_difficulty(Difficulty::Mixed), d.mixed_seconds);
    }

    #[test]
    fn oversized_duration_is_rejected_not_truncated() {
        let settings = config::Config::builder()
            .set_override("quiz.duration_easy_seconds", 5_000_000_000i64)
            .unwrap()
            .build()
            .unwrap();

        let err = load_quiz_settings(&settings).unwrap_err();
        assert!(err.to_string().contains("duration_easy_seconds"));
    }

    #[test]
    fn in_range_duration_is_kept() {
        let settings = config::Config::builder()
            .set_override("quiz.duration_hard_seconds", 2400i64)
            .unwrap()
            .build()
            .unwrap();

        let quiz = load_quiz_settings(&settings).unwrap();
        assert_eq!(quiz.durations.hard_seconds, 2400);
    }

    #[test]
    #[serial_test::serial]
    fn load_reads_env_overrides() {
        env::set_var("SKIP_ROOT_ENV", "1");
        env::set_var("PERSISTENCE_BACKEND", "memory");
        env::set_var("SNAPSHOT_BACKEND", "memory");
        env::set_var("QUIZ_TARGET_COUNT", "30");
        env::set_var("QUIZ_STALE_RESUME", "grace:120");

        let config = Config::load().unwrap();
        assert_eq!(config.persistence_backend, PersistenceBackend::Memory);
        assert_eq!(config.snapshot_backend, SnapshotBackend::Memory);
        assert_eq!(config.quiz.target_count, 30);
        assert_eq!(config.quiz.stale_resume, StaleResumePolicy::Grace(120));

        env::remove_var("PERSISTENCE_BACKEND");
        env::remove_var("SNAPSHOT_BACKEND");
        env::remove_var("QUIZ_TARGET_COUNT");
        env::remove_var("QUIZ_STALE_RESUME");
    }
}
