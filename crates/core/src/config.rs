use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_list(profile: &str, key: &str, default: &[&str]) -> Vec<String> {
    match profiled_env_opt(profile, key) {
        Some(v) => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub postgres: PostgresConfig,
    pub pacing: PacingConfig,
    pub retention: RetentionConfig,
    pub ingest: IngestConfig,
    pub notify: NotifyConfig,
    pub eligibility: EligibilityConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SHELF_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("SHELF_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            pacing: PacingConfig::from_env_profiled(p),
            retention: RetentionConfig::from_env_profiled(p),
            ingest: IngestConfig::from_env_profiled(p),
            notify: NotifyConfig::from_env_profiled(p),
            eligibility: EligibilityConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:      {}:{}", self.server.host, self.server.port);
        if self.postgres.is_configured() {
            tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        } else {
            tracing::info!("  postgres:    (not configured, in-memory stores)");
        }
        tracing::info!(
            "  pacing:      interval={}ms, think={}..{}ms, long pause every {}..{} jobs",
            self.pacing.fetch_interval_ms,
            self.pacing.think_min_ms,
            self.pacing.think_max_ms,
            self.pacing.long_pause_every_min,
            self.pacing.long_pause_every_max
        );
        tracing::info!(
            "  retention:   keep={}s, stale={}s, sweep every {}s",
            self.retention.job_retention_secs,
            self.retention.job_stale_secs,
            self.retention.reaper_interval_secs
        );
        tracing::info!(
            "  ingest:      series_member_limit={}, series_rejection={}, instant_suppress={}ms",
            self.ingest.series_member_limit,
            self.ingest.series_rejection,
            self.ingest.instant_suppress_ms
        );
        tracing::info!(
            "  notify:      requester_webhook={}, moderation_webhook={}, authorization={}, timeout={}s",
            self.notify.requester_webhook_url.is_some(),
            self.notify.moderation_webhook_url.is_some(),
            self.notify.webhook_authorization.is_some(),
            self.notify.timeout_secs
        );
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_parse(p, "PORT", 3001),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_parse(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "shelf"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_parse(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Pacing ────────────────────────────────────────────────────

/// Worker fetch cadence. All durations in milliseconds unless suffixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Minimum spacing per unit of fetch cost.
    pub fetch_interval_ms: u64,
    pub think_min_ms: u64,
    pub think_max_ms: u64,
    pub job_delay_short_min_ms: u64,
    pub job_delay_short_max_ms: u64,
    pub job_delay_long_min_ms: u64,
    pub job_delay_long_max_ms: u64,
    /// Probability of drawing the long inter-job delay instead of the short one.
    pub job_delay_long_chance: f64,
    pub long_pause_every_min: u32,
    pub long_pause_every_max: u32,
    pub long_pause_min_secs: u64,
    pub long_pause_max_secs: u64,
    /// Sleep when the queue is empty.
    pub idle_poll_ms: u64,
}

impl PacingConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            fetch_interval_ms: profiled_env_parse(p, "FETCH_INTERVAL_MS", 5_000),
            think_min_ms: profiled_env_parse(p, "THINK_MIN_MS", 500),
            think_max_ms: profiled_env_parse(p, "THINK_MAX_MS", 2_000),
            job_delay_short_min_ms: profiled_env_parse(p, "JOB_DELAY_SHORT_MIN_MS", 2_000),
            job_delay_short_max_ms: profiled_env_parse(p, "JOB_DELAY_SHORT_MAX_MS", 8_000),
            job_delay_long_min_ms: profiled_env_parse(p, "JOB_DELAY_LONG_MIN_MS", 15_000),
            job_delay_long_max_ms: profiled_env_parse(p, "JOB_DELAY_LONG_MAX_MS", 45_000),
            job_delay_long_chance: profiled_env_parse(p, "JOB_DELAY_LONG_CHANCE", 0.15),
            long_pause_every_min: profiled_env_parse(p, "LONG_PAUSE_EVERY_MIN", 10),
            long_pause_every_max: profiled_env_parse(p, "LONG_PAUSE_EVERY_MAX", 20),
            long_pause_min_secs: profiled_env_parse(p, "LONG_PAUSE_MIN_SECS", 60),
            long_pause_max_secs: profiled_env_parse(p, "LONG_PAUSE_MAX_SECS", 180),
            idle_poll_ms: profiled_env_parse(p, "IDLE_POLL_MS", 3_000),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self::from_env_profiled("")
    }
}

// ── Retention (reaper) ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Terminal jobs older than this are purged.
    pub job_retention_secs: u64,
    /// `processing` jobs untouched for this long are force-failed.
    pub job_stale_secs: u64,
    pub reaper_interval_secs: u64,
}

impl RetentionConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            job_retention_secs: profiled_env_parse(p, "JOB_RETENTION_SECS", 86_400),
            job_stale_secs: profiled_env_parse(p, "JOB_STALE_SECS", 1_800),
            reaper_interval_secs: profiled_env_parse(p, "REAPER_INTERVAL_SECS", 300),
        }
    }
}

// ── Ingest ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Maximum number of series members fetched per series job.
    pub series_member_limit: usize,
    /// `all-members` | `any-member` | `never`.
    pub series_rejection: String,
    /// Suppress notifications for instant-candidate jobs finishing within this
    /// many ms of submission (0 disables).
    pub instant_suppress_ms: u64,
    /// Base URL of the fetch-and-parse service.
    pub fetcher_url: String,
    pub fetcher_timeout_secs: u64,
}

impl IngestConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            series_member_limit: profiled_env_parse(p, "SERIES_MEMBER_LIMIT", 5),
            series_rejection: profiled_env_or(p, "SERIES_REJECTION", "all-members"),
            instant_suppress_ms: profiled_env_parse(p, "INSTANT_SUPPRESS_MS", 0),
            fetcher_url: profiled_env_or(p, "FETCHER_URL", "http://localhost:8088"),
            fetcher_timeout_secs: profiled_env_parse(p, "FETCHER_TIMEOUT_SECS", 30),
        }
    }
}

// ── Notifications ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub requester_webhook_url: Option<String>,
    pub moderation_webhook_url: Option<String>,
    /// Sent verbatim as the `Authorization` header on every webhook call.
    pub webhook_authorization: Option<String>,
    /// Upper bound on one webhook delivery; the worker waits on it inline.
    pub timeout_secs: u64,
}

impl NotifyConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            requester_webhook_url: profiled_env_opt(p, "REQUESTER_WEBHOOK_URL"),
            moderation_webhook_url: profiled_env_opt(p, "MODERATION_WEBHOOK_URL"),
            webhook_authorization: profiled_env_opt(p, "NOTIFY_WEBHOOK_AUTHORIZATION"),
            timeout_secs: profiled_env_parse(p, "NOTIFY_TIMEOUT_SECS", 10),
        }
    }
}

// ── Eligibility policy ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityConfig {
    /// Fandom tag every accepted work must carry.
    pub category_tag: String,
    /// The privileged pairing, written `A/B`.
    pub canonical_pairing: String,
    /// Entities that may only be paired with their canonical partner.
    pub protected: Vec<String>,
}

impl EligibilityConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            category_tag: profiled_env_or(p, "ELIGIBILITY_CATEGORY_TAG", "Supernatural (TV 2005)"),
            canonical_pairing: profiled_env_or(
                p,
                "ELIGIBILITY_CANONICAL_PAIRING",
                "Castiel/Dean Winchester",
            ),
            protected: profiled_env_list(p, "ELIGIBILITY_PROTECTED", &["Castiel", "Dean Winchester"]),
        }
    }
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self::from_env_profiled("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string() {
        let pg = PostgresConfig {
            host: "db.internal".to_string(),
            port: 5433,
            database: "shelf".to_string(),
            username: Some("svc".to_string()),
            password: Some("pw".to_string()),
            ssl_mode: "require".to_string(),
            max_connections: 4,
        };
        assert_eq!(
            pg.connection_string(),
            "postgres://svc:pw@db.internal:5433/shelf?sslmode=require"
        );
        assert!(pg.is_configured());
    }

    #[test]
    fn test_profiled_lookup_prefers_prefixed_key() {
        std::env::set_var("SHELFTEST_FETCH_INTERVAL_MS", "1234");
        std::env::set_var("FETCH_INTERVAL_MS_UNUSED", "1");
        let pacing = PacingConfig::from_env_profiled("SHELFTEST");
        assert_eq!(pacing.fetch_interval_ms, 1234);
        std::env::remove_var("SHELFTEST_FETCH_INTERVAL_MS");
        std::env::remove_var("FETCH_INTERVAL_MS_UNUSED");
    }

    #[test]
    fn test_profiled_list_parsing() {
        std::env::set_var("LISTTEST_ELIGIBILITY_PROTECTED", "A, B ,,C");
        let list = profiled_env_list("LISTTEST", "ELIGIBILITY_PROTECTED", &["x"]);
        assert_eq!(list, vec!["A", "B", "C"]);
        std::env::remove_var("LISTTEST_ELIGIBILITY_PROTECTED");
        let fallback = profiled_env_list("LISTTEST", "NO_SUCH_LIST_KEY_SHELF", &["x"]);
        assert_eq!(fallback, vec!["x"]);
    }

    #[test]
    fn test_notify_timeout_and_authorization() {
        std::env::set_var("NOTIFYTEST_NOTIFY_TIMEOUT_SECS", "3");
        std::env::set_var("NOTIFYTEST_NOTIFY_WEBHOOK_AUTHORIZATION", "Bearer abc");
        let notify = NotifyConfig::from_env_profiled("NOTIFYTEST");
        assert_eq!(notify.timeout_secs, 3);
        assert_eq!(notify.webhook_authorization.as_deref(), Some("Bearer abc"));
        std::env::remove_var("NOTIFYTEST_NOTIFY_TIMEOUT_SECS");
        std::env::remove_var("NOTIFYTEST_NOTIFY_WEBHOOK_AUTHORIZATION");

        let defaults = NotifyConfig::from_env_profiled("NOTIFYTEST");
        assert_eq!(defaults.timeout_secs, 10);
    }
}
