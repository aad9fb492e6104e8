//! Change-set fetcher.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use hpcsync_connector::entity::{Entity, EntityKind};
use hpcsync_connector::traits::SourceOfRecord;

use super::window::ChangeWindow;
use crate::error::SyncResult;

/// Entities modified inside a window, grouped by kind.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    window: ChangeWindow,
    entities: BTreeMap<EntityKind, Vec<Entity>>,
}

impl ChangeSet {
    /// Create an empty change set for a window.
    pub fn new(window: ChangeWindow) -> Self {
        Self {
            window,
            entities: BTreeMap::new(),
        }
    }

    /// Add entities of one kind.
    pub fn insert(&mut self, kind: EntityKind, entities: Vec<Entity>) {
        self.entities.entry(kind).or_default().extend(entities);
    }

    /// The window these changes were fetched for.
    pub fn window(&self) -> &ChangeWindow {
        &self.window
    }

    /// Changed entities of a kind, in source order.
    pub fn get(&self, kind: EntityKind) -> &[Entity] {
        self.entities.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of changed entities.
    pub fn len(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }

    /// Check if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fetches the entities modified inside a change window.
pub struct ChangeSetFetcher {
    source: Arc<dyn SourceOfRecord>,
}

impl ChangeSetFetcher {
    /// Create a fetcher over a source-of-record.
    pub fn new(source: Arc<dyn SourceOfRecord>) -> Self {
        Self { source }
    }

    /// Entities of `kind` with `window.last <= modified < window.now`.
    ///
    /// The source is queried with the window start only; the upper bound is
    /// applied here. A key seen more than once (a record moving between pages
    /// while paginating) keeps its first position and its newest copy.
    #[instrument(skip(self), fields(window = %window))]
    pub async fn fetch(&self, kind: EntityKind, window: &ChangeWindow) -> SyncResult<Vec<Entity>> {
        let fetched = self.source.list_modified(kind, window.last()).await?;
        let total = fetched.len();

        let mut position: HashMap<String, usize> = HashMap::new();
        let mut entities: Vec<Entity> = Vec::with_capacity(total);
        for entity in fetched.into_iter().filter(|e| window.contains(e.modified)) {
            match position.get(&entity.key) {
                Some(&i) => {
                    if entity.modified > entities[i].modified {
                        entities[i] = entity;
                    }
                }
                None => {
                    position.insert(entity.key.clone(), entities.len());
                    entities.push(entity);
                }
            }
        }

        if entities.len() != total {
            debug!(
                kind = %kind,
                fetched = total,
                kept = entities.len(),
                "Dropped entities outside the window or duplicated"
            );
        }

        Ok(entities)
    }

    /// Fetch every kind in `kinds`.
    pub async fn fetch_kinds(
        &self,
        kinds: &[EntityKind],
        window: &ChangeWindow,
    ) -> SyncResult<ChangeSet> {
        let mut changes = ChangeSet::new(*window);
        for kind in kinds {
            let entities = self.fetch(*kind, window).await?;
            info!(kind = %kind, count = entities.len(), "Fetched changed entities");
            changes.insert(*kind, entities);
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use hpcsync_connector::error::ConnectorResult;
    use hpcsync_connector::operation::AttributeSet;

    /// Returns a fixed page sequence, duplicates included.
    struct Pages(Vec<Entity>);

    #[async_trait]
    impl SourceOfRecord for Pages {
        async fn list_modified(
            &self,
            _kind: EntityKind,
            _since: DateTime<Utc>,
        ) -> ConnectorResult<Vec<Entity>> {
            Ok(self.0.clone())
        }

        async fn get(&self, _kind: EntityKind, _key: &str) -> ConnectorResult<Option<Entity>> {
            Ok(None)
        }

        async fn list_children(
            &self,
            _kind: EntityKind,
            _parent: &str,
        ) -> ConnectorResult<Vec<Entity>> {
            Ok(Vec::new())
        }

        async fn list_all(&self, _kind: EntityKind) -> ConnectorResult<Vec<Entity>> {
            Ok(Vec::new())
        }
    }

    fn account(key: &str, hour: u32, home: &str) -> Entity {
        Entity::new(
            EntityKind::Account,
            key,
            AttributeSet::new().with("homeDirectory", home),
            Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_duplicate_key_keeps_newest_copy() {
        let fetcher = ChangeSetFetcher::new(Arc::new(Pages(vec![
            account("vsc40001", 2, "/home/old"),
            account("vsc40002", 3, "/home/vsc40002"),
            account("vsc40001", 5, "/home/new"),
            account("vsc40001", 4, "/home/between"),
            // Outside the window; never replaces an in-window copy.
            account("vsc40002", 12, "/home/late"),
        ])));
        let window = ChangeWindow::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
        )
        .unwrap();

        let entities = fetcher.fetch(EntityKind::Account, &window).await.unwrap();

        let keys: Vec<_> = entities.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["vsc40001", "vsc40002"]);
        assert_eq!(entities[0], account("vsc40001", 5, "/home/new"));
        assert_eq!(entities[1], account("vsc40002", 3, "/home/vsc40002"));
    }
}
