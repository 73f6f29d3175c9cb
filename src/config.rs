use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::models::NotificationType;
use crate::{InsightsError, Result};

/// Process-wide configuration, built once at startup and shared read-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsightsConfig {
    /// Snapshot and trend analysis tuning
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Notification dispatch configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Knowledge base article thresholds
    #[serde(default)]
    pub articles: ArticleThresholds,
}

impl InsightsConfig {
    /// Parse from a JSON document; missing fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| InsightsError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatch.retry.max_attempts == 0 {
            return Err(InsightsError::Configuration(
                "dispatch.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.dispatch.max_concurrency == 0 {
            return Err(InsightsError::Configuration(
                "dispatch.max_concurrency must be at least 1".to_string(),
            ));
        }
        let similarity = self.analytics.similarity_threshold;
        if !(similarity > 0.0 && similarity <= 1.0) {
            return Err(InsightsError::Configuration(format!(
                "analytics.similarity_threshold must be in (0, 1], got {}",
                similarity
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// A description cluster is recurring when its frequency exceeds this
    #[serde(default = "default_recurrence_threshold")]
    pub recurrence_threshold: u64,

    /// Minimum token overlap (Jaccard) for two descriptions to share a cluster
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Resolution within this many minutes of first response counts as first-contact
    #[serde(default = "default_first_contact_window")]
    pub first_contact_window_minutes: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            recurrence_threshold: default_recurrence_threshold(),
            similarity_threshold: default_similarity_threshold(),
            first_contact_window_minutes: default_first_contact_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Transport calls in flight at once for a single dispatch
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_templates")]
    pub templates: HashMap<NotificationType, NotificationTemplate>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_concurrency: default_max_concurrency(),
            templates: default_templates(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per transport call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay before attempt number `attempt` (1-based); the first attempt has none.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = u64::from(self.backoff_multiplier).saturating_pow(attempt - 2);
        let delay = self.initial_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Title and body templates; `{{ticket_id}}`, `{{title}}`, `{{status}}`,
/// `{{component}}` and `{{detail}}` are interpolated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTemplate {
    pub title: String,
    pub body: String,
}

impl NotificationTemplate {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    /// Replace every `{{key}}` with its value. Unknown placeholders are left as-is
    /// and substituted values are never scanned for placeholders themselves.
    pub fn render(&self, vars: &HashMap<&str, String>) -> (String, String) {
        (fill(&self.title, vars), fill(&self.body, vars))
    }
}

fn fill(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            rest = &rest[open..];
            break;
        };

        match vars.get(&after_open[..close]) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after_open[close + 2..];
    }

    out.push_str(rest);
    out
}

/// Knowledge base thresholds for the popular and well-rated badges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleThresholds {
    /// Views strictly above this mark an article popular
    #[serde(default = "default_popular_views")]
    pub popular_views: u64,

    /// Ratings at or above this mark an article well rated
    #[serde(default = "default_well_rated_score")]
    pub well_rated_score: Decimal,
}

impl Default for ArticleThresholds {
    fn default() -> Self {
        Self {
            popular_views: default_popular_views(),
            well_rated_score: default_well_rated_score(),
        }
    }
}

// Default value functions
fn default_recurrence_threshold() -> u64 {
    3
}

fn default_similarity_threshold() -> f64 {
    0.8
}

fn default_first_contact_window() -> i64 {
    60
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_backoff_multiplier() -> u32 {
    2
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_popular_views() -> u64 {
    100
}

fn default_well_rated_score() -> Decimal {
    Decimal::new(4, 0)
}

fn default_templates() -> HashMap<NotificationType, NotificationTemplate> {
    HashMap::from([
        (
            NotificationType::NewTicket,
            NotificationTemplate::new(
                "New ticket #{{ticket_id}}",
                "Ticket #{{ticket_id}} \"{{title}}\" was opened with status {{status}}.",
            ),
        ),
        (
            NotificationType::StatusChange,
            NotificationTemplate::new(
                "Ticket #{{ticket_id}} updated",
                "Ticket #{{ticket_id}} \"{{title}}\" is now {{status}}.",
            ),
        ),
        (
            NotificationType::Escalation,
            NotificationTemplate::new(
                "Ticket #{{ticket_id}} escalated",
                "Ticket #{{ticket_id}} \"{{title}}\" was escalated and needs attention. Current status: {{status}}.",
            ),
        ),
        (
            NotificationType::HealthCheckDegradation,
            NotificationTemplate::new(
                "{{component}} degraded",
                "Health check reported {{component}} as degraded: {{detail}}",
            ),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = InsightsConfig::from_json("{}").unwrap();
        assert_eq!(config.analytics.recurrence_threshold, 3);
        assert_eq!(config.dispatch.retry.max_attempts, 3);
        assert_eq!(config.dispatch.max_concurrency, 4);
        assert_eq!(config.articles.popular_views, 100);
        assert_eq!(config.dispatch.templates.len(), 4);
    }

    #[test]
    fn partial_sections_override_only_given_fields() {
        let config = InsightsConfig::from_json(
            r#"{"analytics": {"recurrence_threshold": 5}, "dispatch": {"retry": {"max_attempts": 5}}}"#,
        )
        .unwrap();
        assert_eq!(config.analytics.recurrence_threshold, 5);
        assert_eq!(config.analytics.similarity_threshold, 0.8);
        assert_eq!(config.dispatch.retry.max_attempts, 5);
        assert_eq!(config.dispatch.retry.initial_backoff_ms, 200);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(InsightsConfig::from_json(r#"{"dispatch": {"retry": {"max_attempts": 0}}}"#).is_err());
        assert!(InsightsConfig::from_json(r#"{"dispatch": {"max_concurrency": 0}}"#).is_err());
        assert!(InsightsConfig::from_json(r#"{"analytics": {"similarity_threshold": 1.5}}"#).is_err());
        assert!(InsightsConfig::from_json("not json").is_err());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 100,
            backoff_multiplier: 2,
            max_backoff_ms: 300,
        };
        assert_eq!(policy.backoff_for(1), Duration::ZERO);
        assert_eq!(policy.backoff_for(2), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(300));
    }

    #[test]
    fn template_interpolates_known_placeholders() {
        let template = NotificationTemplate::new("#{{ticket_id}}", "{{title}} is {{status}} {{missing}}");
        let vars = HashMap::from([
            ("ticket_id", "42".to_string()),
            ("title", "VPN down".to_string()),
            ("status", "Resolved".to_string()),
        ]);

        let (title, body) = template.render(&vars);
        assert_eq!(title, "#42");
        assert_eq!(body, "VPN down is Resolved {{missing}}");
    }

    #[test]
    fn interpolated_values_are_not_expanded_again() {
        let template = NotificationTemplate::new("{{title}}", "{{title}} is now {{status}}");
        let vars = HashMap::from([
            ("title", "literal {{status}}".to_string()),
            ("status", "Closed".to_string()),
            ("ticket_id", "{{title}}".to_string()),
        ]);

        for _ in 0..50 {
            let (title, body) = template.render(&vars);
            assert_eq!(title, "literal {{status}}");
            assert_eq!(body, "literal {{status}} is now Closed");
        }
    }

    #[test]
    fn unterminated_placeholder_is_kept_verbatim() {
        let template = NotificationTemplate::new("{{ticket_id}} {{title", "{{}} {{status}}}");
        let vars = HashMap::from([
            ("ticket_id", "7".to_string()),
            ("status", "Open".to_string()),
        ]);

        let (title, body) = template.render(&vars);
        assert_eq!(title, "7 {{title");
        assert_eq!(body, "{{}} Open}");
    }
}
