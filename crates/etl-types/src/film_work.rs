//! Film work data as it flows through the pipeline.
//!
//! - [`ChangeBatch`]: primary keys detected as modified, with their timestamps
//! - [`RawFilmWork`]: one aggregate row joined from the source tables
//! - [`FilmWorkDocument`]: the validated document written to the search index

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkpoint::Watermark;
use crate::entity::EntityKind;

/// A row reported as modified by the change detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedRow {
    /// Primary key of the modified row
    pub id: String,
    /// Modification timestamp of the row
    pub modified: DateTime<Utc>,
}

/// Modified rows of one entity kind, ascending by `(modified, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub entity: EntityKind,
    pub rows: Vec<ChangedRow>,
}

impl ChangeBatch {
    pub fn new(entity: EntityKind, rows: Vec<ChangedRow>) -> Self {
        Self { entity, rows }
    }

    /// Primary keys in detection order.
    pub fn primary_keys(&self) -> Vec<String> {
        self.rows.iter().map(|row| row.id.clone()).collect()
    }

    /// Position of the trailing row: the watermark once the batch is delivered.
    pub fn last_position(&self) -> Option<Watermark> {
        self.rows.last().map(Watermark::from)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Role a person plays in a film work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonRole {
    Director,
    Actor,
    Writer,
}

impl PersonRole {
    /// Parse a role tag from the link table. Unknown tags yield `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "director" => Some(PersonRole::Director),
            "actor" => Some(PersonRole::Actor),
            "writer" => Some(PersonRole::Writer),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            PersonRole::Director => "director",
            PersonRole::Actor => "actor",
            PersonRole::Writer => "writer",
        }
    }
}

/// Role-tagged person reference nested in a raw aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRef {
    pub role: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl PersonRef {
    pub fn new(role: &str, id: &str, name: &str) -> Self {
        Self {
            role: role.to_string(),
            id: Some(id.to_string()),
            name: Some(name.to_string()),
        }
    }
}

/// Aggregate row produced by the enricher.
///
/// Fields stay optional so that incomplete source data survives until
/// the transformer validates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFilmWork {
    pub id: String,
    #[serde(default)]
    pub imdb_rating: Option<f64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Type discriminator (`movie` or `tv_show`)
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub persons: Vec<PersonRef>,
    #[serde(default)]
    pub genre: Vec<String>,
}

impl RawFilmWork {
    /// Minimal well-formed row, used as a starting point by callers and tests.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            imdb_rating: None,
            title: Some(title.into()),
            description: None,
            kind: Some("movie".to_string()),
            modified: None,
            persons: Vec::new(),
            genre: Vec::new(),
        }
    }

    pub fn with_person(mut self, person: PersonRef) -> Self {
        self.persons.push(person);
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre.push(genre.into());
        self
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.imdb_rating = Some(rating);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Person entry in a transformed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub name: String,
}

/// Document stored in the search index, keyed by film work id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmWorkDocument {
    pub id: String,
    pub imdb_rating: Option<f64>,
    pub genre: Vec<String>,
    pub title: String,
    pub description: Option<String>,
    pub director: Vec<String>,
    pub actors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub directors: Vec<Person>,
    pub actors: Vec<Person>,
    pub writers: Vec<Person>,
}

/// Reasons a raw aggregate fails the document schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("person #{index} with role `{role}` has no {missing}")]
    IncompletePerson {
        index: usize,
        role: String,
        missing: &'static str,
    },
}
