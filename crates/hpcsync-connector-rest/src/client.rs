//! Source-of-record client
//!
//! Implements [`SourceOfRecord`] over a paginated JSON API.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use hpcsync_connector::entity::{Entity, EntityKind};
use hpcsync_connector::error::{ConnectorError, ConnectorResult};
use hpcsync_connector::operation::{AttributeSet, AttributeValue};
use hpcsync_connector::traits::SourceOfRecord;

use crate::config::{PaginationStyle, RestSourceConfig};

/// Read-only client for the source-of-record API.
pub struct RestSourceOfRecord {
    config: RestSourceConfig,
    client: Client,
}

impl std::fmt::Debug for RestSourceOfRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestSourceOfRecord")
            .field("config", &self.config.redacted())
            .finish()
    }
}

impl RestSourceOfRecord {
    /// Create a new client with the given configuration.
    pub fn new(config: RestSourceConfig) -> ConnectorResult<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| ConnectorError::InvalidConfiguration {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self { config, client })
    }

    /// The configuration in use.
    pub fn config(&self) -> &RestSourceConfig {
        &self.config
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        self.config.url(self.config.endpoints.path(kind))
    }

    fn item_url(&self, kind: EntityKind, key: &str) -> ConnectorResult<String> {
        let collection = self.collection_url(kind);
        let mut url = url::Url::parse(&collection).map_err(|e| {
            ConnectorError::InvalidConfiguration {
                message: format!("invalid endpoint URL {collection}: {e}"),
            }
        })?;
        url.path_segments_mut()
            .map_err(|()| ConnectorError::InvalidConfiguration {
                message: format!("endpoint URL cannot take a path: {collection}"),
            })?
            .pop_if_empty()
            .push(key);
        Ok(url.to_string())
    }

    fn build_request(&self, url: &str, query: &[(String, String)]) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json")
            .query(query);
        if let Some(ref token) = self.config.token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
    }

    /// GET a JSON document, retrying transient failures with backoff.
    async fn get_json(&self, url: &str, query: &[(String, String)]) -> ConnectorResult<Value> {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(url = %url, attempt = attempt, "Sending source-of-record request");

            match self.build_request(url, query).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.json::<Value>().await.map_err(|e| {
                            ConnectorError::invalid_data(format!(
                                "Failed to parse response from {url}: {e}"
                            ))
                        });
                    }

                    if retry.should_retry(status.as_u16()) && attempt <= retry.max_retries {
                        let backoff = retry.calculate_backoff(attempt);
                        warn!(
                            url = %url,
                            status = %status,
                            attempt = attempt,
                            wait_ms = backoff.as_millis(),
                            "Transient error, retrying with backoff"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    let body = resp.text().await.unwrap_or_default();
                    return Err(map_status(status, url, &body));
                }
                Err(e) => {
                    if attempt <= retry.max_retries {
                        let backoff = retry.calculate_backoff(attempt);
                        warn!(
                            url = %url,
                            error = %e,
                            attempt = attempt,
                            wait_ms = backoff.as_millis(),
                            "Request failed, retrying with backoff"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    if e.is_timeout() {
                        return Err(ConnectorError::ConnectionTimeout {
                            timeout_secs: self.config.timeout_secs,
                        });
                    }
                    return Err(ConnectorError::connection_failed_with_source(
                        format!("Request failed after {attempt} attempts: {url}"),
                        e,
                    ));
                }
            }
        }
    }

    /// Fetch every page of a collection query.
    async fn fetch_all(
        &self,
        kind: EntityKind,
        query: Vec<(String, String)>,
    ) -> ConnectorResult<Vec<Entity>> {
        let page_size = self.config.page_size;
        let mut url = self.collection_url(kind);
        let mut params = query.clone();
        params.push(("page_size".to_string(), page_size.to_string()));
        let mut page: u32 = 1;
        let mut entities = Vec::new();

        loop {
            let mut request_params = params.clone();
            if self.config.pagination == PaginationStyle::PageNumber {
                request_params.push(("page".to_string(), page.to_string()));
            }

            let body = self.get_json(&url, &request_params).await?;
            let results = self.extract_results(&body)?;
            let count = results.len();
            for record in &results {
                entities.push(self.parse_entity(kind, record)?);
            }

            match self.config.pagination {
                PaginationStyle::NextLink => match self.extract_next(&body) {
                    Some(next) => {
                        let next = if next.starts_with("http://") || next.starts_with("https://") {
                            next
                        } else {
                            self.config.url(&next)
                        };
                        if next == url {
                            return Err(ConnectorError::invalid_data(format!(
                                "pagination loop: next link points back to {url}"
                            )));
                        }
                        url = next;
                        // The next link carries its own query string.
                        params.clear();
                    }
                    None => break,
                },
                PaginationStyle::PageNumber => {
                    if count < page_size as usize {
                        break;
                    }
                    page += 1;
                }
            }
        }

        debug!(kind = %kind, count = entities.len(), "Drained source-of-record pages");
        Ok(entities)
    }

    fn extract_results(&self, body: &Value) -> ConnectorResult<Vec<Value>> {
        if let Some(arr) = body.as_array() {
            return Ok(arr.clone());
        }
        lookup_path(body, &self.config.response.results_path)
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                ConnectorError::invalid_data(format!(
                    "response has no '{}' array",
                    self.config.response.results_path
                ))
            })
    }

    fn extract_next(&self, body: &Value) -> Option<String> {
        lookup_path(body, &self.config.response.next_path)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    }

    /// Convert one JSON record into an entity snapshot.
    fn parse_entity(&self, kind: EntityKind, record: &Value) -> ConnectorResult<Entity> {
        let fields = &self.config.response;
        let obj = record
            .as_object()
            .ok_or_else(|| ConnectorError::invalid_data(format!("{kind} record is not an object")))?;

        let key = obj
            .get(&fields.key_field)
            .and_then(scalar_to_string)
            .ok_or_else(|| {
                ConnectorError::invalid_data(format!(
                    "{kind} record has no '{}' field",
                    fields.key_field
                ))
            })?;

        let modified = obj
            .get(&fields.modified_field)
            .ok_or_else(|| {
                ConnectorError::invalid_data(format!("{kind} {key} has no modification timestamp"))
            })
            .and_then(|v| parse_timestamp(v, &key))?;

        let parent = obj.get(&fields.parent_field).and_then(scalar_to_string);
        let deleted = obj
            .get(&fields.deleted_field)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let attributes: AttributeSet = obj
            .iter()
            .filter(|(name, _)| {
                *name != &fields.key_field
                    && *name != &fields.parent_field
                    && *name != &fields.modified_field
                    && *name != &fields.deleted_field
            })
            .map(|(name, value)| (name.clone(), AttributeValue::from(value.clone())))
            .collect();

        let mut entity = Entity::new(kind, key, attributes, modified);
        entity.parent = parent;
        entity.deleted = deleted;
        Ok(entity)
    }
}

/// Map a non-success status to a connector error.
fn map_status(status: StatusCode, url: &str, body: &str) -> ConnectorError {
    match status {
        StatusCode::UNAUTHORIZED => ConnectorError::AuthenticationFailed,
        StatusCode::FORBIDDEN => ConnectorError::AuthorizationFailed {
            operation: format!("GET {url}"),
        },
        StatusCode::NOT_FOUND => ConnectorError::ObjectNotFound {
            identifier: url.to_string(),
        },
        s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
            ConnectorError::TargetUnavailable {
                message: format!("HTTP {status}: {body}"),
            }
        }
        _ => ConnectorError::operation_failed(format!("HTTP {status}: {body}")),
    }
}

fn lookup_path<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    body.pointer(&format!("/{}", path.replace('.', "/")))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accept RFC 3339 strings or integer epoch seconds.
fn parse_timestamp(value: &Value, key: &str) -> ConnectorResult<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ConnectorError::invalid_data(format!("bad timestamp '{s}' on {key}: {e}"))),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| ConnectorError::invalid_data(format!("bad timestamp {n} on {key}"))),
        _ => Err(ConnectorError::invalid_data(format!(
            "timestamp on {key} is neither a string nor a number"
        ))),
    }
}

#[async_trait]
impl SourceOfRecord for RestSourceOfRecord {
    #[instrument(skip(self), fields(since = %since))]
    async fn list_modified(
        &self,
        kind: EntityKind,
        since: DateTime<Utc>,
    ) -> ConnectorResult<Vec<Entity>> {
        let query = vec![(
            "modified_since".to_string(),
            since.to_rfc3339_opts(SecondsFormat::Secs, true),
        )];
        self.fetch_all(kind, query).await
    }

    #[instrument(skip(self))]
    async fn get(&self, kind: EntityKind, key: &str) -> ConnectorResult<Option<Entity>> {
        let url = self.item_url(kind, key)?;
        match self.get_json(&url, &[]).await {
            Ok(body) => self.parse_entity(kind, &body).map(Some),
            Err(ConnectorError::ObjectNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn list_children(
        &self,
        kind: EntityKind,
        parent: &str,
    ) -> ConnectorResult<Vec<Entity>> {
        let query = vec![("parent".to_string(), parent.to_string())];
        let mut children = self.fetch_all(kind, query).await?;
        for child in &mut children {
            if child.parent.is_none() {
                child.parent = Some(parent.to_string());
            }
        }
        Ok(children)
    }

    #[instrument(skip(self))]
    async fn list_all(&self, kind: EntityKind) -> ConnectorResult<Vec<Entity>> {
        self.fetch_all(kind, Vec::new()).await
    }
}
