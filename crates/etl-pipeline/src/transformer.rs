//! Transformation: reshapes raw aggregates into index documents.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use etl_storage::CheckpointStore;
use etl_types::{
    Checkpoint, FilmWorkDocument, Person, PersonRole, RawFilmWork, Stage, ValidationError,
};

use crate::error::PipelineError;
use crate::handoff::Handoff;
use crate::retry::BackoffPolicy;
use crate::state::StageState;

/// Checkpoint key of the batch being transformed.
pub const IN_FLIGHT_KEY: &str = "in_flight";

/// Ratings outside this range are rejected.
const RATING_RANGE: std::ops::RangeInclusive<f64> = 0.0..=100.0;

fn required(value: Option<&str>, field: &'static str) -> Result<String, ValidationError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ValidationError::MissingField(field)),
    }
}

fn names(people: &[Person]) -> Vec<String> {
    people.iter().map(|p| p.name.clone()).collect()
}

/// Build the index document for one aggregate.
///
/// Persons are partitioned by role; roles other than director, actor and
/// writer are ignored.
pub fn transform(raw: &RawFilmWork) -> Result<FilmWorkDocument, ValidationError> {
    let id = required(Some(&raw.id), "id")?;
    let title = required(raw.title.as_deref(), "title")?;

    if let Some(rating) = raw.imdb_rating {
        if !rating.is_finite() || !RATING_RANGE.contains(&rating) {
            return Err(ValidationError::InvalidField {
                field: "imdb_rating",
                reason: format!("{} is outside 0..=100", rating),
            });
        }
    }

    let mut directors = Vec::new();
    let mut actors = Vec::new();
    let mut writers = Vec::new();
    for (index, person) in raw.persons.iter().enumerate() {
        let Some(role) = PersonRole::from_tag(&person.role) else {
            continue;
        };
        let incomplete = |missing| ValidationError::IncompletePerson {
            index,
            role: person.role.clone(),
            missing,
        };
        let entry = Person {
            id: required(person.id.as_deref(), "id").map_err(|_| incomplete("id"))?,
            name: required(person.name.as_deref(), "name").map_err(|_| incomplete("name"))?,
        };
        match role {
            PersonRole::Director => directors.push(entry),
            PersonRole::Actor => actors.push(entry),
            PersonRole::Writer => writers.push(entry),
        }
    }

    Ok(FilmWorkDocument {
        id,
        imdb_rating: raw.imdb_rating,
        genre: raw.genre.clone(),
        title,
        description: raw.description.clone(),
        director: names(&directors),
        actors_names: names(&actors),
        writers_names: names(&writers),
        directors,
        actors,
        writers,
    })
}

pub struct Transformer<H> {
    state: StageState,
    next: H,
}

impl<H> Transformer<H>
where
    H: Handoff<Vec<FilmWorkDocument>>,
{
    pub async fn new(
        store: Arc<dyn CheckpointStore>,
        policy: BackoffPolicy,
        next: H,
    ) -> Result<Self, PipelineError> {
        let state = StageState::load(Stage::Transformer, store, policy).await?;
        Ok(Self { state, next })
    }

    /// Batch left in flight by a previous run, if any.
    pub fn in_flight(&self) -> Result<Option<&Vec<RawFilmWork>>, PipelineError> {
        match self.state.get(IN_FLIGHT_KEY) {
            None => Ok(None),
            Some(Checkpoint::RawBatch(batch)) => Ok(Some(batch)),
            Some(other) => Err(PipelineError::Checkpoint(format!(
                "expected raw batch, found {}",
                other.kind()
            ))),
        }
    }

    /// Re-run the batch a previous run did not finish.
    pub async fn resume(&mut self) -> Result<bool, PipelineError> {
        let Some(batch) = self.in_flight()?.filter(|b| !b.is_empty()).cloned() else {
            return Ok(false);
        };
        info!(count = batch.len(), "Resuming transformation");
        self.process(batch).await?;
        Ok(true)
    }

    /// Transform and validate `batch`, dropping invalid documents, and hand
    /// the rest to the loader.
    ///
    /// Returns the number of valid documents.
    pub async fn process(&mut self, batch: Vec<RawFilmWork>) -> Result<usize, PipelineError> {
        if batch.is_empty() {
            return Ok(0);
        }
        self.state
            .set(IN_FLIGHT_KEY, Checkpoint::RawBatch(batch.clone()))
            .await?;

        let mut documents = Vec::with_capacity(batch.len());
        for raw in &batch {
            match transform(raw) {
                Ok(document) => documents.push(document),
                Err(e) => {
                    error!(
                        id = %raw.id,
                        error = %e,
                        payload = %serde_json::to_string(raw).unwrap_or_default(),
                        "Dropping invalid film work"
                    );
                }
            }
        }

        let valid = documents.len();
        debug!(valid, dropped = batch.len() - valid, "Transformed batch");
        if valid > 0 {
            self.next.handoff(documents).await?;
        }

        self.state.clear(IN_FLIGHT_KEY).await;
        Ok(valid)
    }

    /// Downstream stage.
    pub fn next_mut(&mut self) -> &mut H {
        &mut self.next
    }
}

#[async_trait]
impl<H> Handoff<Vec<RawFilmWork>> for Transformer<H>
where
    H: Handoff<Vec<FilmWorkDocument>>,
{
    async fn handoff(&mut self, batch: Vec<RawFilmWork>) -> Result<(), PipelineError> {
        self.process(batch).await?;
        Ok(())
    }
}
