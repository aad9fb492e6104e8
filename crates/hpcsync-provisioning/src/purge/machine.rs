//! Grace-period purge.
//!
//! Identifiers that drop out of an eligible set are warned three times over
//! a grace period and then have their access revoked. Dropping back in at
//! any point before the deadline cancels the whole sequence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use hpcsync_connector::entity::EntityKind;
use hpcsync_connector::error::{ConnectorError, ConnectorResult};
use hpcsync_connector::traits::{Notifier, Revoker, SourceOfRecord};

use super::cache::{PurgeCache, PurgeCacheFile};
use super::state::{PurgeState, PurgeThresholds, PurgeeRecord};
use crate::error::SyncResult;
use crate::sync::directory::MEMBERS_ATTRIBUTE;
use crate::sync::report::RunReport;

/// The message sent for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    First,
    Second,
    Final,
    Expired,
    Reinstated,
}

impl Notice {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Notice::First => "first",
            Notice::Second => "second",
            Notice::Final => "final",
            Notice::Expired => "expired",
            Notice::Reinstated => "reinstated",
        }
    }
}

/// Subject and body of one notice. `{identifier}`, `{group}` and
/// `{deadline}` are substituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeTemplate {
    pub subject: String,
    pub body: String,
}

impl NoticeTemplate {
    fn new(subject: &str, body: &str) -> Self {
        Self {
            subject: subject.to_string(),
            body: body.to_string(),
        }
    }

    /// Render subject and body.
    pub fn render(&self, identifier: &str, group: &str, deadline: Option<DateTime<Utc>>) -> (String, String) {
        let deadline = deadline
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let fill = |text: &str| {
            text.replace("{identifier}", identifier)
                .replace("{group}", group)
                .replace("{deadline}", &deadline)
        };
        (fill(&self.subject), fill(&self.body))
    }
}

/// Templates for every notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeTemplates {
    #[serde(default = "default_first")]
    pub first: NoticeTemplate,
    #[serde(default = "default_second")]
    pub second: NoticeTemplate,
    #[serde(default = "default_final", rename = "final")]
    pub final_notice: NoticeTemplate,
    #[serde(default = "default_expired")]
    pub expired: NoticeTemplate,
    #[serde(default = "default_reinstated")]
    pub reinstated: NoticeTemplate,
}

fn default_first() -> NoticeTemplate {
    NoticeTemplate::new(
        "Your access to {group} will be removed",
        "Dear {identifier},\n\nYou are no longer entitled to {group}. Your access will be removed on {deadline}.\n",
    )
}

fn default_second() -> NoticeTemplate {
    NoticeTemplate::new(
        "Reminder: your access to {group} will be removed",
        "Dear {identifier},\n\nThis is a reminder that your access to {group} will be removed on {deadline}.\n",
    )
}

fn default_final() -> NoticeTemplate {
    NoticeTemplate::new(
        "Final notice: your access to {group} will be removed",
        "Dear {identifier},\n\nYour access to {group} will be removed on {deadline}. This is the last notice.\n",
    )
}

fn default_expired() -> NoticeTemplate {
    NoticeTemplate::new(
        "Your access to {group} has been removed",
        "Dear {identifier},\n\nYour grace period for {group} has ended and your access has been removed.\n",
    )
}

fn default_reinstated() -> NoticeTemplate {
    NoticeTemplate::new(
        "Your access to {group} is no longer scheduled for removal",
        "Dear {identifier},\n\nYou are entitled to {group} again. Earlier removal notices no longer apply.\n",
    )
}

impl Default for NoticeTemplates {
    fn default() -> Self {
        Self {
            first: default_first(),
            second: default_second(),
            final_notice: default_final(),
            expired: default_expired(),
            reinstated: default_reinstated(),
        }
    }
}

impl NoticeTemplates {
    /// Template for a notice.
    pub fn get(&self, notice: Notice) -> &NoticeTemplate {
        match notice {
            Notice::First => &self.first,
            Notice::Second => &self.second,
            Notice::Final => &self.final_notice,
            Notice::Expired => &self.expired,
            Notice::Reinstated => &self.reinstated,
        }
    }
}

/// A purge policy: which eligible set to watch and how long the grace
/// period lasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgePolicy {
    /// Policy name, also names the cache file.
    pub name: String,
    /// Kind of the entity whose members are eligible.
    #[serde(default = "default_group_kind")]
    pub group_kind: EntityKind,
    /// Key of that entity.
    pub group: String,
    #[serde(default)]
    pub thresholds: PurgeThresholds,
    #[serde(default)]
    pub templates: NoticeTemplates,
}

fn default_group_kind() -> EntityKind {
    EntityKind::Vo
}

/// One state change decided for an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub identifier: String,
    pub from: PurgeState,
    pub to: PurgeState,
}

impl Transition {
    fn new(identifier: &str, from: PurgeState, to: PurgeState) -> Self {
        Self {
            identifier: identifier.to_string(),
            from,
            to,
        }
    }

    /// Notice sent when this transition is applied.
    pub fn notice(&self) -> Option<Notice> {
        match self.to {
            PurgeState::Warned1 => Some(Notice::First),
            PurgeState::Warned2 => Some(Notice::Second),
            PurgeState::WarnedFinal => Some(Notice::Final),
            PurgeState::Purged => Some(Notice::Expired),
            PurgeState::Reinstated => Some(Notice::Reinstated),
            PurgeState::Active => None,
        }
    }
}

/// Decide this run's transitions.
///
/// Reinstatements are decided first, so an identifier back in the eligible
/// set is never escalated in the same run. Tracked identifiers still absent
/// escalate at most one tier per run. Identifiers that just left the
/// eligible set start at the first warning.
pub fn plan_transitions(
    cache: &PurgeCache,
    current: &BTreeSet<String>,
    thresholds: &PurgeThresholds,
    now: DateTime<Utc>,
) -> Vec<Transition> {
    let mut transitions = Vec::new();

    for (identifier, record) in &cache.purgees {
        if current.contains(identifier) {
            transitions.push(Transition::new(identifier, record.state(), PurgeState::Reinstated));
        }
    }

    for (identifier, record) in &cache.purgees {
        if current.contains(identifier) {
            continue;
        }
        let elapsed = record.elapsed(now);
        let to = if elapsed > thresholds.deadline() {
            PurgeState::Purged
        } else if elapsed > thresholds.second_notice_after() && record.second_warning.is_none() {
            PurgeState::Warned2
        } else if elapsed > thresholds.final_notice_after() && record.final_warning.is_none() {
            PurgeState::WarnedFinal
        } else {
            continue;
        };
        transitions.push(Transition::new(identifier, record.state(), to));
    }

    for identifier in cache.previous_eligible_set.difference(current) {
        if !cache.purgees.contains_key(identifier) {
            transitions.push(Transition::new(identifier, PurgeState::Active, PurgeState::Warned1));
        }
    }

    transitions
}

/// Resolves the address notices for an identifier go to.
#[async_trait]
pub trait RecipientResolver: Send + Sync {
    async fn resolve(&self, identifier: &str) -> ConnectorResult<Option<String>>;
}

/// Reads the recipient from an account attribute in the source-of-record.
pub struct SourceRecipientResolver {
    source: Arc<dyn SourceOfRecord>,
    attribute: String,
}

impl SourceRecipientResolver {
    /// Resolve through the account `email` attribute.
    pub fn new(source: Arc<dyn SourceOfRecord>) -> Self {
        Self {
            source,
            attribute: "email".to_string(),
        }
    }

    /// Use another account attribute.
    #[must_use]
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = attribute.into();
        self
    }
}

#[async_trait]
impl RecipientResolver for SourceRecipientResolver {
    async fn resolve(&self, identifier: &str) -> ConnectorResult<Option<String>> {
        Ok(self
            .source
            .get(EntityKind::Account, identifier)
            .await?
            .and_then(|account| {
                account
                    .attributes
                    .get_string(&self.attribute)
                    .map(String::from)
            }))
    }
}

/// What a purge run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeSummary {
    /// Policy name.
    pub policy: String,
    /// Newly warned identifiers.
    #[serde(default)]
    pub warned: Vec<String>,
    /// Identifiers moved to a later warning tier.
    #[serde(default)]
    pub escalated: Vec<String>,
    /// Identifiers whose access was revoked.
    #[serde(default)]
    pub purged: Vec<String>,
    /// Identifiers eligible again.
    #[serde(default)]
    pub reinstated: Vec<String>,
    pub notification_failures: usize,
    pub revoke_failures: usize,
}

impl PurgeSummary {
    /// Whether a revocation failed. Notification failures are not counted:
    /// delivery is best-effort.
    pub fn has_failures(&self) -> bool {
        self.revoke_failures > 0
    }

    /// Number of transitions.
    pub fn total(&self) -> usize {
        self.warned.len() + self.escalated.len() + self.purged.len() + self.reinstated.len()
    }
}

/// Runs one purge policy.
pub struct GracePeriodPurge {
    source: Arc<dyn SourceOfRecord>,
    notifier: Arc<dyn Notifier>,
    revoker: Arc<dyn Revoker>,
    resolver: Arc<dyn RecipientResolver>,
    policy: PurgePolicy,
    cache_file: PurgeCacheFile,
    dry_run: bool,
}

impl GracePeriodPurge {
    /// Create a purge run for a policy.
    pub fn new(
        source: Arc<dyn SourceOfRecord>,
        notifier: Arc<dyn Notifier>,
        revoker: Arc<dyn Revoker>,
        resolver: Arc<dyn RecipientResolver>,
        policy: PurgePolicy,
        cache_file: PurgeCacheFile,
    ) -> Self {
        Self {
            source,
            notifier,
            revoker,
            resolver,
            policy,
            cache_file,
            dry_run: false,
        }
    }

    /// Enable dry-run mode: transitions are logged, nothing is sent,
    /// revoked or saved.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Current eligible set. A missing group is an error rather than an
    /// empty set, which would start warning everyone.
    async fn eligible_set(&self) -> SyncResult<BTreeSet<String>> {
        let group = self
            .source
            .get(self.policy.group_kind, &self.policy.group)
            .await?
            .ok_or_else(|| ConnectorError::ObjectNotFound {
                identifier: format!("{}:{}", self.policy.group_kind, self.policy.group),
            })?;
        Ok(group
            .attributes
            .get_strings(MEMBERS_ATTRIBUTE)
            .into_iter()
            .map(String::from)
            .collect())
    }

    /// Send a notice; failures are logged and counted only.
    async fn notify(
        &self,
        identifier: &str,
        notice: Notice,
        deadline: Option<DateTime<Utc>>,
        summary: &mut PurgeSummary,
    ) {
        let recipient = match self.resolver.resolve(identifier).await {
            Ok(Some(recipient)) => recipient,
            Ok(None) => {
                warn!(identifier, notice = notice.as_str(), "No recipient, notice not sent");
                summary.notification_failures += 1;
                return;
            }
            Err(e) => {
                warn!(identifier, notice = notice.as_str(), error = %e, "Could not resolve recipient");
                summary.notification_failures += 1;
                return;
            }
        };

        let (subject, body) =
            self.policy
                .templates
                .get(notice)
                .render(identifier, &self.policy.group, deadline);
        match self.notifier.send(&recipient, &subject, &body).await {
            Ok(()) => debug!(identifier, recipient = %recipient, notice = notice.as_str(), "Notice sent"),
            Err(e) => {
                warn!(identifier, recipient = %recipient, notice = notice.as_str(), error = %e, "Failed to send notice");
                summary.notification_failures += 1;
            }
        }
    }

    /// Apply transitions to `cache`, performing their side effects.
    async fn apply(
        &self,
        transitions: &[Transition],
        cache: &mut PurgeCache,
        now: DateTime<Utc>,
        summary: &mut PurgeSummary,
    ) {
        let thresholds = &self.policy.thresholds;

        for transition in transitions {
            let id = transition.identifier.as_str();
            let notice = transition.notice();

            if self.dry_run {
                info!(
                    identifier = id,
                    from = %transition.from,
                    to = %transition.to,
                    "Dry run: would transition"
                );
            }

            match transition.to {
                PurgeState::Reinstated => {
                    if !self.dry_run {
                        if let Some(notice) = notice {
                            self.notify(id, notice, None, summary).await;
                        }
                    }
                    cache.purgees.remove(id);
                    summary.reinstated.push(id.to_string());
                }
                PurgeState::Warned1 => {
                    let record = PurgeeRecord::new(now);
                    if !self.dry_run {
                        if let Some(notice) = notice {
                            let deadline = thresholds.deadline_for(record.first_warning);
                            self.notify(id, notice, Some(deadline), summary).await;
                        }
                    }
                    cache.purgees.insert(id.to_string(), record);
                    summary.warned.push(id.to_string());
                }
                PurgeState::Warned2 | PurgeState::WarnedFinal => {
                    let Some(record) = cache.purgees.get_mut(id) else {
                        continue;
                    };
                    if transition.to == PurgeState::Warned2 {
                        record.second_warning = Some(now);
                    } else {
                        record.final_warning = Some(now);
                    }
                    let deadline = thresholds.deadline_for(record.first_warning);
                    if !self.dry_run {
                        if let Some(notice) = notice {
                            self.notify(id, notice, Some(deadline), summary).await;
                        }
                    }
                    summary.escalated.push(id.to_string());
                }
                PurgeState::Purged => {
                    if !self.dry_run {
                        if let Err(e) = self.revoker.revoke(id).await {
                            warn!(identifier = id, error = %e, "Failed to revoke access, keeping record");
                            summary.revoke_failures += 1;
                            continue;
                        }
                        info!(identifier = id, "Access revoked");
                        if let Some(notice) = notice {
                            self.notify(id, notice, None, summary).await;
                        }
                    }
                    cache.purgees.remove(id);
                    summary.purged.push(id.to_string());
                }
                PurgeState::Active => {}
            }
        }
    }

    /// Run the policy once at `now`.
    #[instrument(skip(self), fields(policy = %self.policy.name, dry_run = self.dry_run))]
    pub async fn run(&self, now: DateTime<Utc>) -> SyncResult<RunReport> {
        self.policy.thresholds.validate()?;
        let mut report = RunReport::start(format!("purge-{}", self.policy.name), self.dry_run);

        let current = self.eligible_set().await?;
        let mut cache = self.cache_file.load();
        if cache.is_empty() {
            info!(eligible = current.len(), "Seeding purge baseline");
        }

        let transitions = plan_transitions(&cache, &current, &self.policy.thresholds, now);
        let mut summary = PurgeSummary {
            policy: self.policy.name.clone(),
            ..PurgeSummary::default()
        };
        self.apply(&transitions, &mut cache, now, &mut summary).await;
        cache.previous_eligible_set = current;

        if self.dry_run {
            info!(transitions = transitions.len(), "Dry run: purge cache not saved");
        } else {
            self.cache_file.save(&cache)?;
        }

        report.purge = Some(summary);
        report.finish();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn thresholds() -> PurgeThresholds {
        PurgeThresholds::new(100, 200, 300).unwrap()
    }

    #[test]
    fn test_cold_start_warns_nobody() {
        let cache = PurgeCache::default();
        let transitions = plan_transitions(&cache, &set(&["a", "b"]), &thresholds(), t0());
        assert!(transitions.is_empty());
    }

    #[test]
    fn test_leaving_starts_first_warning() {
        let cache = PurgeCache {
            previous_eligible_set: set(&["a", "b"]),
            ..PurgeCache::default()
        };
        let transitions = plan_transitions(&cache, &set(&["a"]), &thresholds(), t0());
        assert_eq!(
            transitions,
            vec![Transition::new("b", PurgeState::Active, PurgeState::Warned1)]
        );
        assert_eq!(transitions[0].notice(), Some(Notice::First));
    }

    #[test]
    fn test_thresholds_are_strict() {
        let mut cache = PurgeCache::default();
        cache.purgees.insert("b".to_string(), PurgeeRecord::new(t0()));

        let at_threshold = t0() + Duration::seconds(100);
        assert!(plan_transitions(&cache, &set(&[]), &thresholds(), at_threshold).is_empty());

        let past = at_threshold + Duration::seconds(1);
        assert_eq!(
            plan_transitions(&cache, &set(&[]), &thresholds(), past)[0].to,
            PurgeState::Warned2
        );
    }

    #[test]
    fn test_reinstatement_before_escalation() {
        let mut cache = PurgeCache::default();
        let mut record = PurgeeRecord::new(t0());
        record.second_warning = Some(t0() + Duration::seconds(101));
        cache.purgees.insert("b".to_string(), record);

        let almost_deadline = t0() + Duration::seconds(299);
        let transitions = plan_transitions(&cache, &set(&["b"]), &thresholds(), almost_deadline);
        assert_eq!(
            transitions,
            vec![Transition::new("b", PurgeState::Warned2, PurgeState::Reinstated)]
        );
    }

    #[test]
    fn test_template_render() {
        let templates = NoticeTemplates::default();
        let deadline = Utc.with_ymd_and_hms(2024, 3, 29, 0, 0, 0).unwrap();
        let (subject, body) = templates
            .get(Notice::First)
            .render("vsc40002", "gvo00002", Some(deadline));
        assert_eq!(subject, "Your access to gvo00002 will be removed");
        assert!(body.contains("vsc40002"));
        assert!(body.contains("2024-03-29"));
    }

    #[test]
    fn test_policy_defaults_from_json() {
        let policy: PurgePolicy =
            serde_json::from_str(r#"{"name": "gvo00002", "group": "gvo00002"}"#).unwrap();
        assert_eq!(policy.group_kind, EntityKind::Vo);
        assert_eq!(policy.thresholds, PurgeThresholds::default());
    }
}
