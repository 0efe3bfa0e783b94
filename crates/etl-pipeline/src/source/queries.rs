//! SQL templates.
//!
//! Table names come from [`EntityKind`] and the schema name is validated at
//! configuration load, so formatting them into the statement is safe. All
//! values are bound parameters.

use etl_types::EntityKind;

/// Modified rows of one table in keyset order: `$1` watermark timestamp,
/// `$2` watermark id, `$3` limit.
///
/// Ids compare in the "C" collation so that the order matches a bytewise
/// string comparison.
pub fn change_query(schema: &str, entity: EntityKind) -> String {
    format!(
        "SELECT id::text AS id, modified \
         FROM {schema}.{table} \
         WHERE (modified, id::text COLLATE \"C\") > ($1, $2::text COLLATE \"C\") \
         ORDER BY modified, id::text COLLATE \"C\" \
         LIMIT $3",
        schema = schema,
        table = entity.table(),
    )
}

/// Restriction of film work roots to those related to the given keys.
///
/// Person and genre keys are resolved through the link tables in a
/// subquery, so the aggregate still carries every person and genre of the
/// film work rather than only the changed ones.
fn root_filter(schema: &str, entity: EntityKind) -> String {
    match entity {
        EntityKind::FilmWork => "film_work.id::text = ANY($1)".to_string(),
        EntityKind::Person => format!(
            "film_work.id IN (SELECT film_work_id FROM {}.person_film_work \
             WHERE person_id::text = ANY($1))",
            schema
        ),
        EntityKind::Genre => format!(
            "film_work.id IN (SELECT film_work_id FROM {}.genre_film_work \
             WHERE genre_id::text = ANY($1))",
            schema
        ),
    }
}

/// Film work aggregates: `$1` keys, `$2` last root id, `$3` limit.
pub fn aggregate_query(schema: &str, entity: EntityKind) -> String {
    format!(
        "SELECT \
             film_work.id::text AS id, \
             film_work.rating::float8 AS imdb_rating, \
             film_work.title AS title, \
             film_work.description AS description, \
             film_work.type::text AS type, \
             film_work.modified AS modified, \
             COALESCE( \
                 json_agg(DISTINCT jsonb_build_object( \
                     'role', pfw.role, \
                     'id', person.id::text, \
                     'name', person.full_name \
                 )) FILTER (WHERE person.id IS NOT NULL), \
                 '[]' \
             ) AS persons, \
             COALESCE( \
                 array_agg(DISTINCT genre.name) FILTER (WHERE genre.id IS NOT NULL), \
                 '{{}}' \
             ) AS genre \
         FROM {schema}.film_work \
             LEFT JOIN {schema}.person_film_work pfw ON pfw.film_work_id = film_work.id \
             LEFT JOIN {schema}.person ON person.id = pfw.person_id \
             LEFT JOIN {schema}.genre_film_work gfw ON gfw.film_work_id = film_work.id \
             LEFT JOIN {schema}.genre ON genre.id = gfw.genre_id \
         WHERE {filter} \
             AND film_work.id::text > $2 \
         GROUP BY film_work.id \
         ORDER BY film_work.id \
         LIMIT $3",
        schema = schema,
        filter = root_filter(schema, entity),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_query_targets_entity_table() {
        let sql = change_query("content", EntityKind::Person);
        assert!(sql.contains("FROM content.person "));
        assert!(sql.contains(r#"WHERE (modified, id::text COLLATE "C") > ($1, $2::text COLLATE "C")"#));
        assert!(sql.contains(r#"ORDER BY modified, id::text COLLATE "C""#));
        assert!(sql.contains("LIMIT $3"));
    }

    #[test]
    fn test_aggregate_query_filters_by_entity() {
        let film = aggregate_query("content", EntityKind::FilmWork);
        assert!(film.contains("WHERE film_work.id::text = ANY($1)"));

        let person = aggregate_query("content", EntityKind::Person);
        assert!(person.contains("FROM content.person_film_work WHERE person_id::text = ANY($1)"));

        let genre = aggregate_query("content", EntityKind::Genre);
        assert!(genre.contains("FROM content.genre_film_work WHERE genre_id::text = ANY($1)"));
    }

    #[test]
    fn test_aggregate_query_paginates_by_root_id() {
        let sql = aggregate_query("public", EntityKind::Genre);
        assert!(sql.contains("film_work.id::text > $2"));
        assert!(sql.contains("ORDER BY film_work.id"));
        assert!(sql.contains("LIMIT $3"));
        assert!(sql.contains("FROM public.film_work"));
        // Escaped braces render as an empty array literal
        assert!(sql.contains("'{}'"));
    }
}
