//! In-memory change source for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use etl_types::{ChangedRow, EntityKind, RawFilmWork, Watermark};

use super::ChangeSource;
use crate::error::PipelineError;

#[derive(Default)]
struct Tables {
    /// Modification times per entity, keyed by row id
    modified: HashMap<EntityKind, HashMap<String, DateTime<Utc>>>,
    /// Film work aggregates by film work id
    films: BTreeMap<String, RawFilmWork>,
    /// (entity, row id) -> related film work ids
    links: HashMap<(EntityKind, String), BTreeSet<String>>,
    /// (entity, after_id) of every aggregate query
    aggregate_queries: Vec<(EntityKind, String)>,
}

/// Change source backed by in-memory tables.
///
/// Answers both queries with the same ordering and pagination rules as the
/// PostgreSQL source. Safe to mutate while a pipeline holds it.
#[derive(Default)]
pub struct MemorySource {
    tables: Mutex<Tables>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a row of `entity` as modified at `modified`.
    pub fn touch(&self, entity: EntityKind, id: &str, modified: DateTime<Utc>) {
        self.tables()
            .modified
            .entry(entity)
            .or_default()
            .insert(id.to_string(), modified);
    }

    /// Store a film work aggregate and mark it modified.
    ///
    /// Persons in the aggregate are linked by id; genres need [`link`](Self::link)
    /// because aggregates only carry genre names.
    pub fn put_film(&self, film: RawFilmWork, modified: DateTime<Utc>) {
        let mut tables = self.tables();
        for person in &film.persons {
            if let Some(person_id) = &person.id {
                tables
                    .links
                    .entry((EntityKind::Person, person_id.clone()))
                    .or_default()
                    .insert(film.id.clone());
            }
        }
        tables
            .modified
            .entry(EntityKind::FilmWork)
            .or_default()
            .insert(film.id.clone(), modified);
        tables.films.insert(film.id.clone(), film);
    }

    /// Relate a person or genre row to a film work.
    pub fn link(&self, entity: EntityKind, id: &str, film_id: &str) {
        self.tables()
            .links
            .entry((entity, id.to_string()))
            .or_default()
            .insert(film_id.to_string());
    }

    /// `(entity, after_id)` of every aggregate query answered so far.
    pub fn aggregate_queries(&self) -> Vec<(EntityKind, String)> {
        self.tables().aggregate_queries.clone()
    }
}

#[async_trait]
impl ChangeSource for MemorySource {
    async fn modified_since(
        &self,
        entity: EntityKind,
        since: &Watermark,
        limit: usize,
    ) -> Result<Vec<ChangedRow>, PipelineError> {
        let tables = self.tables();
        let mut rows: Vec<ChangedRow> = tables
            .modified
            .get(&entity)
            .into_iter()
            .flatten()
            .map(|(id, modified)| ChangedRow {
                id: id.clone(),
                modified: *modified,
            })
            .filter(|row| since.precedes(row))
            .collect();
        rows.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.id.cmp(&b.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn aggregates(
        &self,
        entity: EntityKind,
        pkeys: &[String],
        after_id: &str,
        limit: usize,
    ) -> Result<Vec<RawFilmWork>, PipelineError> {
        let mut tables = self.tables();
        tables
            .aggregate_queries
            .push((entity, after_id.to_string()));

        let roots: BTreeSet<&String> = match entity {
            EntityKind::FilmWork => pkeys.iter().collect(),
            _ => pkeys
                .iter()
                .filter_map(|key| tables.links.get(&(entity, key.clone())))
                .flatten()
                .collect(),
        };

        Ok(roots
            .into_iter()
            .filter(|id| id.as_str() > after_id)
            .filter_map(|id| tables.films.get(id))
            .take(limit)
            .cloned()
            .collect())
    }
}
