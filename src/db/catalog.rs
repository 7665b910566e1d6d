//! Catalog lookups against `pg_matviews`.

use serde::Serialize;

use super::Session;
use crate::errors::DbError;
use crate::sql::ViewName;

/// One row of the final materialized-view listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatviewInfo {
    pub name: String,
    /// `pg_size_pretty` of the view and its indexes.
    pub size: Option<String>,
    pub populated: bool,
}

/// Quote a string as a SQL literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Whether `view` exists as a materialized view. Unqualified names are
/// looked up in `default_schema`.
pub async fn view_exists<S>(
    session: &mut S,
    default_schema: &str,
    view: &ViewName,
) -> Result<bool, DbError>
where
    S: Session + ?Sized,
{
    let schema = view.schema.as_deref().unwrap_or(default_schema);
    let sql = format!(
        "SELECT 1 FROM pg_matviews WHERE schemaname = {} AND matviewname = {}",
        quote_literal(schema),
        quote_literal(&view.name)
    );
    Ok(!session.query(&sql).await?.is_empty())
}

/// All materialized views in `schema`, ordered by name.
pub async fn list_materialized_views<S>(
    session: &mut S,
    schema: &str,
) -> Result<Vec<MatviewInfo>, DbError>
where
    S: Session + ?Sized,
{
    let sql = format!(
        "SELECT matviewname, \
         pg_size_pretty(pg_total_relation_size(format('%I.%I', schemaname, matviewname)::regclass)), \
         ispopulated \
         FROM pg_matviews WHERE schemaname = {} ORDER BY matviewname",
        quote_literal(schema)
    );
    let rows = session.query(&sql).await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let mut cols = row.into_iter();
            let name = cols.next().flatten()?;
            let size = cols.next().flatten();
            let populated = cols.next().flatten().is_some_and(|v| v == "t" || v == "true");
            Some(MatviewInfo {
                name,
                size,
                populated,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fake::FakeDb;

    #[test]
    fn test_quote_literal_escapes() {
        assert_eq!(quote_literal("region_summary"), "'region_summary'");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }

    #[tokio::test]
    async fn test_view_exists_lookup() {
        let db = FakeDb::with_views(&["region_summary"]);
        let mut session = db.session();

        let present = ViewName::parse("region_summary").unwrap();
        let missing = ViewName::parse("region_hotspots").unwrap();
        assert!(view_exists(&mut session, "public", &present).await.unwrap());
        assert!(!view_exists(&mut session, "public", &missing).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_materialized_views_sorted() {
        let db = FakeDb::with_views(&["temporal_insights", "industry_insights"]);
        let mut session = db.session();

        let views = list_materialized_views(&mut session, "public").await.unwrap();
        let names: Vec<_> = views.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["industry_insights", "temporal_insights"]);
        assert!(views.iter().all(|v| v.populated));
    }
}
