//! # In-Memory Store
//!
//! `MemoryStore` is a `DataProvider` backed by `BTreeMap`s behind a
//! `tokio::sync::RwLock`. It backs the tests and the CLI; nothing is durable.
//!
//! - Entities of one type are listed in creation order
//! - Provider-assigned ids are `<type>-<n>` with a store-wide counter
//! - Lexical search scores token overlap between query and searchable text

use crate::provider::{DataProvider, Link, ListOptions, SearchHit};
use crate::{Entity, EntityId, EntityRef, FieldMap, FieldValue, WeaveError};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Default)]
struct Table {
    /// Creation order.
    order: Vec<EntityId>,
    rows: BTreeMap<EntityId, Entity>,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Table>,
    links: Vec<Link>,
    next_id: u64,
}

/// In-memory `DataProvider`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load entities from a `{"Type": [{...}, ...]}` document.
    ///
    /// An object may carry its own `$id`; fields are read with `FieldValue::from_json`.
    pub async fn load_json(&self, doc: &serde_json::Value) -> Result<usize, WeaveError> {
        let tables = doc
            .as_object()
            .ok_or_else(|| WeaveError::InvalidInput("data must be an object of arrays".into()))?;
        let mut loaded = 0;
        for (entity_type, rows) in tables {
            let rows = rows.as_array().ok_or_else(|| {
                WeaveError::InvalidInput(format!("data for {} must be an array", entity_type))
            })?;
            for row in rows {
                let object = row.as_object().ok_or_else(|| {
                    WeaveError::InvalidInput(format!("{} rows must be objects", entity_type))
                })?;
                let id = object
                    .get("$id")
                    .and_then(serde_json::Value::as_str)
                    .map(EntityId::new);
                let fields = object
                    .iter()
                    .filter(|(k, _)| !k.starts_with('$'))
                    .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                    .collect();
                self.create(entity_type, id, fields).await?;
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// Every stored entity, grouped by type name then creation order.
    pub async fn snapshot(&self) -> Vec<Entity> {
        let state = self.state.read().await;
        state
            .tables
            .values()
            .flat_map(|t| t.order.iter().filter_map(|id| t.rows.get(id)).cloned())
            .collect()
    }

    /// Number of entities of one type.
    pub async fn count(&self, entity_type: &str) -> usize {
        let state = self.state.read().await;
        state.tables.get(entity_type).map_or(0, |t| t.order.len())
    }

    /// Every recorded link in creation order.
    pub async fn links(&self) -> Vec<Link> {
        self.state.read().await.links.clone()
    }
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn matches_filter(entity: &Entity, opts: &ListOptions) -> bool {
    match &opts.filter {
        None => true,
        Some(f) => entity
            .get(&f.field)
            .is_some_and(|v| v.points_at(&f.target)),
    }
}

// =============================================================================
// PROVIDER
// =============================================================================

#[async_trait]
impl DataProvider for MemoryStore {
    async fn get(&self, entity_type: &str, id: &EntityId) -> Result<Option<Entity>, WeaveError> {
        let state = self.state.read().await;
        Ok(state
            .tables
            .get(entity_type)
            .and_then(|t| t.rows.get(id))
            .cloned())
    }

    async fn list(&self, entity_type: &str, opts: &ListOptions) -> Result<Vec<Entity>, WeaveError> {
        let state = self.state.read().await;
        let Some(table) = state.tables.get(entity_type) else {
            return Ok(Vec::new());
        };
        let rows = table
            .order
            .iter()
            .filter_map(|id| table.rows.get(id))
            .filter(|e| matches_filter(e, opts))
            .take(opts.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(rows)
    }

    async fn search(
        &self,
        entity_type: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, WeaveError> {
        let wanted = tokens(query);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.read().await;
        let Some(table) = state.tables.get(entity_type) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<(usize, SearchHit)> = table
            .order
            .iter()
            .filter_map(|id| table.rows.get(id))
            .enumerate()
            .filter_map(|(pos, entity)| {
                let have = tokens(&entity.searchable_text());
                let overlap = wanted.intersection(&have).count();
                (overlap > 0).then(|| {
                    let score = overlap as f32 / wanted.len() as f32;
                    (
                        pos,
                        SearchHit {
                            entity: entity.clone(),
                            score,
                        },
                    )
                })
            })
            .collect();

        // Best score first; equal scores favour the most recently created.
        hits.sort_by(|(pa, a), (pb, b)| b.score.total_cmp(&a.score).then(pb.cmp(pa)));
        Ok(hits.into_iter().take(limit).map(|(_, h)| h).collect())
    }

    async fn create(
        &self,
        entity_type: &str,
        id: Option<EntityId>,
        fields: FieldMap,
    ) -> Result<Entity, WeaveError> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let id = match id {
            Some(id) => id,
            None => EntityId::new(format!(
                "{}-{}",
                entity_type.to_lowercase(),
                state.next_id
            )),
        };

        let table = state.tables.entry(entity_type.to_string()).or_default();
        if table.rows.contains_key(&id) {
            return Err(WeaveError::Provider(format!(
                "{} {} already exists",
                entity_type, id
            )));
        }
        let entity = Entity::new(entity_type, id.clone(), fields);
        table.order.push(id.clone());
        table.rows.insert(id, entity.clone());
        tracing::trace!(entity_type, id = %entity.id, "memory store create");
        Ok(entity)
    }

    async fn update(
        &self,
        entity_type: &str,
        id: &EntityId,
        fields: FieldMap,
    ) -> Result<Entity, WeaveError> {
        let mut state = self.state.write().await;
        let entity = state
            .tables
            .get_mut(entity_type)
            .and_then(|t| t.rows.get_mut(id))
            .ok_or_else(|| WeaveError::NotFound {
                entity_type: entity_type.to_string(),
                id: id.clone(),
            })?;
        entity.fields.extend(fields);
        Ok(entity.clone())
    }

    async fn delete(&self, entity_type: &str, id: &EntityId) -> Result<bool, WeaveError> {
        let mut state = self.state.write().await;
        let removed = match state.tables.get_mut(entity_type) {
            Some(table) => {
                table.order.retain(|o| o != id);
                table.rows.remove(id).is_some()
            }
            None => false,
        };
        if removed {
            state
                .links
                .retain(|l| &l.from.id != id && &l.to.id != id);
        }
        Ok(removed)
    }

    async fn related(
        &self,
        entity_type: &str,
        id: &EntityId,
        relation: &str,
    ) -> Result<Vec<EntityRef>, WeaveError> {
        let state = self.state.read().await;
        Ok(state
            .links
            .iter()
            .filter(|l| l.from.entity_type == entity_type && &l.from.id == id && l.field == relation)
            .map(|l| l.to.clone())
            .collect())
    }

    async fn relate(&self, link: &Link) -> Result<(), WeaveError> {
        let mut state = self.state.write().await;
        let exists = state
            .links
            .iter()
            .any(|l| l.from == link.from && l.field == link.field && l.to == link.to);
        if !exists {
            state.links.push(link.clone());
        }
        Ok(())
    }

    async fn unrelate(
        &self,
        from: &EntityRef,
        field: &str,
        to: &EntityRef,
    ) -> Result<bool, WeaveError> {
        let mut state = self.state.write().await;
        let before = state.links.len();
        state
            .links
            .retain(|l| !(&l.from == from && l.field == field && &l.to == to));
        Ok(state.links.len() != before)
    }
}

// =============================================================================
// TESTS
// =============================================================================
