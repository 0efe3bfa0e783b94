//! Entity kinds polled by the extractor and the stage namespaces that
//! partition the checkpoint store.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::EtlError;

/// A source table whose modifications trigger re-indexing of film works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Root aggregate: `content.film_work`
    FilmWork,
    /// `content.person`, linked through `person_film_work`
    Person,
    /// `content.genre`, linked through `genre_film_work`
    Genre,
}

impl EntityKind {
    /// All entity kinds in polling order.
    pub const ALL: [EntityKind; 3] = [EntityKind::FilmWork, EntityKind::Person, EntityKind::Genre];

    /// Table name inside the source schema.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::FilmWork => "film_work",
            EntityKind::Person => "person",
            EntityKind::Genre => "genre",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for EntityKind {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "film_work" => Ok(EntityKind::FilmWork),
            "person" => Ok(EntityKind::Person),
            "genre" => Ok(EntityKind::Genre),
            other => Err(EtlError::UnknownEntity(other.to_string())),
        }
    }
}

/// Pipeline stage. Each stage owns exactly one checkpoint namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extractor,
    Enricher,
    Transformer,
    Loader,
}

impl Stage {
    /// All stages, upstream first.
    pub const ALL: [Stage; 4] = [
        Stage::Extractor,
        Stage::Enricher,
        Stage::Transformer,
        Stage::Loader,
    ];

    /// Namespace name used by the checkpoint store.
    pub fn namespace(&self) -> &'static str {
        match self {
            Stage::Extractor => "extractor",
            Stage::Enricher => "enricher",
            Stage::Transformer => "transformer",
            Stage::Loader => "loader",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.namespace())
    }
}

impl FromStr for Stage {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.namespace() == s.trim())
            .ok_or_else(|| EtlError::UnknownStage(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_tables() {
        assert_eq!(EntityKind::FilmWork.table(), "film_work");
        assert_eq!(EntityKind::Person.table(), "person");
        assert_eq!(EntityKind::Genre.table(), "genre");
    }

    #[test]
    fn test_entity_parse() {
        assert_eq!("person".parse::<EntityKind>().unwrap(), EntityKind::Person);
        assert_eq!(" genre ".parse::<EntityKind>().unwrap(), EntityKind::Genre);
        assert!(matches!(
            "studio".parse::<EntityKind>(),
            Err(EtlError::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_entity_serialization() {
        let json = serde_json::to_string(&EntityKind::FilmWork).unwrap();
        assert_eq!(json, "\"film_work\"");
        let kind: EntityKind = serde_json::from_str("\"genre\"").unwrap();
        assert_eq!(kind, EntityKind::Genre);
    }

    #[test]
    fn test_stage_namespaces_are_distinct() {
        let names: std::collections::HashSet<_> =
            Stage::ALL.iter().map(|s| s.namespace()).collect();
        assert_eq!(names.len(), 4);
        assert_eq!("loader".parse::<Stage>().unwrap(), Stage::Loader);
        assert!("sink".parse::<Stage>().is_err());
    }
}
