//! REST source configuration
//!
//! Configuration types for the source-of-record REST client.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use hpcsync_connector::entity::EntityKind;
use hpcsync_connector::error::{ConnectorError, ConnectorResult};

/// Configuration for [`RestSourceOfRecord`](crate::RestSourceOfRecord).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestSourceConfig {
    /// Base URL for API requests (e.g., "https://account.example.org/api").
    pub base_url: String,

    /// Bearer token sent on every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Requested page size.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Whole-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Collection path per entity kind.
    #[serde(default)]
    pub endpoints: EndpointConfig,

    /// How result pages are chained.
    #[serde(default)]
    pub pagination: PaginationStyle,

    /// Where records and their metadata live in responses.
    #[serde(default)]
    pub response: ResponseConfig,

    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_page_size() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl RestSourceConfig {
    /// Create a new config with required fields.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            endpoints: EndpointConfig::default(),
            pagination: PaginationStyle::default(),
            response: ResponseConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Set bearer token authentication.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the pagination style.
    #[must_use]
    pub fn with_pagination(mut self, style: PaginationStyle) -> Self {
        self.pagination = style;
        self
    }

    /// Set retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Build the full URL for a path below the base URL.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.base_url.is_empty() {
            return Err(ConnectorError::InvalidConfiguration {
                message: "source base_url is required".to_string(),
            });
        }

        let url =
            url::Url::parse(&self.base_url).map_err(|e| ConnectorError::InvalidConfiguration {
                message: format!("invalid source base_url: {e}"),
            })?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ConnectorError::InvalidConfiguration {
                message: format!("unsupported scheme: {}", url.scheme()),
            });
        }

        if self.page_size == 0 {
            return Err(ConnectorError::InvalidConfiguration {
                message: "page_size must be positive".to_string(),
            });
        }

        Ok(())
    }

    /// Copy of the config with the token masked, for logging.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.token.is_some() {
            config.token = Some("***".to_string());
        }
        config
    }
}

/// Collection path per entity kind, relative to the base URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_account_endpoint")]
    pub account: String,
    #[serde(default = "default_group_endpoint")]
    pub group: String,
    #[serde(default = "default_vo_endpoint")]
    pub vo: String,
    #[serde(default = "default_pubkey_endpoint")]
    pub pubkey: String,
    #[serde(default = "default_user_quota_endpoint")]
    pub user_quota: String,
    #[serde(default = "default_vo_quota_endpoint")]
    pub vo_quota: String,
}

fn default_account_endpoint() -> String {
    "account".to_string()
}

fn default_group_endpoint() -> String {
    "group".to_string()
}

fn default_vo_endpoint() -> String {
    "vo".to_string()
}

fn default_pubkey_endpoint() -> String {
    "pubkey".to_string()
}

fn default_user_quota_endpoint() -> String {
    "quota/user".to_string()
}

fn default_vo_quota_endpoint() -> String {
    "quota/vo".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            account: default_account_endpoint(),
            group: default_group_endpoint(),
            vo: default_vo_endpoint(),
            pubkey: default_pubkey_endpoint(),
            user_quota: default_user_quota_endpoint(),
            vo_quota: default_vo_quota_endpoint(),
        }
    }
}

impl EndpointConfig {
    /// Collection path for a kind.
    pub fn path(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::Account => &self.account,
            EntityKind::Group => &self.group,
            EntityKind::Vo => &self.vo,
            EntityKind::Pubkey => &self.pubkey,
            EntityKind::UserQuota => &self.user_quota,
            EntityKind::VoQuota => &self.vo_quota,
        }
    }
}

/// How consecutive result pages are located.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationStyle {
    /// Follow the URL in the response's `next` field until it is null.
    #[default]
    NextLink,
    /// Increment a `page` query parameter until a short page is returned.
    PageNumber,
}

/// Response layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Dotted path of the results array in a page. A bare array response is
    /// accepted as a single page.
    #[serde(default = "default_results_path")]
    pub results_path: String,

    /// Dotted path of the next-page link.
    #[serde(default = "default_next_path")]
    pub next_path: String,

    /// Field holding the stable key.
    #[serde(default = "default_key_field")]
    pub key_field: String,

    /// Field holding the owning entity's key.
    #[serde(default = "default_parent_field")]
    pub parent_field: String,

    /// Field holding the modification instant.
    #[serde(default = "default_modified_field")]
    pub modified_field: String,

    /// Field flagging an upstream deletion.
    #[serde(default = "default_deleted_field")]
    pub deleted_field: String,
}

fn default_results_path() -> String {
    "results".to_string()
}

fn default_next_path() -> String {
    "next".to_string()
}

fn default_key_field() -> String {
    "key".to_string()
}

fn default_parent_field() -> String {
    "parent".to_string()
}

fn default_modified_field() -> String {
    "modified".to_string()
}

fn default_deleted_field() -> String {
    "deleted".to_string()
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            results_path: default_results_path(),
            next_path: default_next_path(),
            key_field: default_key_field(),
            parent_field: default_parent_field(),
            modified_field: default_modified_field(),
            deleted_field: default_deleted_field(),
        }
    }
}

/// Retry policy for reads against the source-of-record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds (default: 200).
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds (default: 10000).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// HTTP status codes that trigger a retry.
    #[serde(default = "default_retry_status_codes")]
    pub retry_status_codes: Vec<u16>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_retry_status_codes() -> Vec<u16> {
    vec![429, 502, 503, 504]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            retry_status_codes: default_retry_status_codes(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom max retries.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Disable retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Set the initial backoff.
    #[must_use]
    pub fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Whether a response status should be retried.
    pub fn should_retry(&self, status: u16) -> bool {
        self.retry_status_codes.contains(&status)
    }

    /// Exponential backoff for the given attempt (1-based), capped.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_yaml_shape() {
        let config: RestSourceConfig =
            serde_json::from_str(r#"{"base_url": "https://account.example.org/api"}"#).unwrap();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.pagination, PaginationStyle::NextLink);
        assert_eq!(config.endpoints.path(EntityKind::UserQuota), "quota/user");
        assert_eq!(config.response.key_field, "key");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        assert!(RestSourceConfig::new("").validate().is_err());
        assert!(RestSourceConfig::new("not a url").validate().is_err());
        assert!(RestSourceConfig::new("ftp://example.org").validate().is_err());
        assert!(RestSourceConfig::new("https://example.org")
            .with_page_size(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_url_joining() {
        let config = RestSourceConfig::new("https://example.org/api/");
        assert_eq!(config.url("/account"), "https://example.org/api/account");
    }

    #[test]
    fn test_redacted_masks_token() {
        let config = RestSourceConfig::new("https://example.org").with_token("secret");
        assert_eq!(config.redacted().token.as_deref(), Some("***"));
    }

    #[test]
    fn test_backoff_is_capped() {
        let retry = RetryConfig::default();
        assert_eq!(retry.calculate_backoff(1), Duration::from_millis(200));
        assert_eq!(retry.calculate_backoff(2), Duration::from_millis(400));
        assert_eq!(retry.calculate_backoff(30), Duration::from_millis(10_000));
        assert!(retry.should_retry(503));
        assert!(!retry.should_retry(500));
    }
}
