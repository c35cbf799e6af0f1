//! Dataset accessor
//!
//! The boundary abstraction over the read-only relational sales dataset.
//! The fixture is a pre-populated SQLite file with a star schema
//! (fact_sales plus customer/product/date/store dimensions) and
//! precomputed reporting views.

use crate::error::PipelineError;
use crate::models::RowSet;
use crate::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Column, Row, TypeInfo};
use std::sync::Mutex;
use tracing::debug;

/// Trait for executing read-only queries against the sales dataset.
#[async_trait]
pub trait DatasetAccessor: Send + Sync {
    async fn query(&self, sql: &str) -> Result<RowSet>;
}

/// Reject anything that is not a plain read.
///
/// The query-generation role is instructed never to emit DML, but the
/// accessor refuses it anyway rather than trusting model output.
fn ensure_read_only(sql: &str) -> Result<()> {
    let first_word = sql
        .trim()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    match first_word.as_str() {
        "select" | "with" => Ok(()),
        other => Err(PipelineError::Query(format!(
            "only read statements are allowed, got '{}'",
            other
        ))),
    }
}

/// SQLite-backed accessor over the sales fixture database.
pub struct SqliteDataset {
    pool: SqlitePool,
}

impl SqliteDataset {
    /// Connect to the fixture database, e.g. `sqlite://data/sales.db`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| PipelineError::Query(format!("failed to open dataset: {}", e)))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl DatasetAccessor for SqliteDataset {
    async fn query(&self, sql: &str) -> Result<RowSet> {
        ensure_read_only(sql)?;

        debug!(sql = %sql, "Executing dataset query");

        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PipelineError::Query(format!("query failed: {}", e)))?;

        let columns = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect()
            })
            .unwrap_or_default();

        let rows = rows
            .iter()
            .map(row_to_values)
            .collect::<Result<Vec<_>>>()?;

        Ok(RowSet { columns, rows })
    }
}

fn row_to_values(row: &SqliteRow) -> Result<Vec<serde_json::Value>> {
    let mut values = Vec::with_capacity(row.columns().len());

    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INTEGER" | "BOOLEAN" => row
                .try_get::<Option<i64>, _>(i)
                .map_err(decode_err)?
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
            "REAL" | "NUMERIC" => row
                .try_get::<Option<f64>, _>(i)
                .map_err(decode_err)?
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
            "NULL" => serde_json::Value::Null,
            _ => row
                .try_get::<Option<String>, _>(i)
                .map_err(decode_err)?
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
        };
        values.push(value);
    }

    Ok(values)
}

fn decode_err(e: sqlx::Error) -> PipelineError {
    PipelineError::Query(format!("failed to decode row: {}", e))
}

/// Mock accessor for testing: returns a canned row set and records every
/// SQL string it receives.
#[derive(Default)]
pub struct MockDataset {
    rows: RowSet,
    fail: bool,
    queries: Mutex<Vec<String>>,
}

impl MockDataset {
    pub fn returning(rows: RowSet) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatasetAccessor for MockDataset {
    async fn query(&self, sql: &str) -> Result<RowSet> {
        ensure_read_only(sql)?;
        self.queries.lock().unwrap().push(sql.to_string());

        if self.fail {
            return Err(PipelineError::Query("mock query failure".to_string()));
        }
        Ok(self.rows.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_guard_allows_select_and_cte() {
        assert!(ensure_read_only("SELECT 1").is_ok());
        assert!(ensure_read_only("  with t as (select 1) select * from t").is_ok());
    }

    #[test]
    fn test_read_only_guard_rejects_dml() {
        for sql in [
            "INSERT INTO fact_sales VALUES (1)",
            "UPDATE dim_product SET price = 0",
            "DELETE FROM fact_sales",
            "DROP TABLE dim_store",
        ] {
            let err = ensure_read_only(sql).unwrap_err();
            assert!(matches!(err, PipelineError::Query(_)), "sql: {}", sql);
        }
    }

    #[tokio::test]
    async fn test_mock_dataset_records_queries() {
        let rows = RowSet {
            columns: vec!["category".to_string()],
            rows: vec![vec![serde_json::json!("Electronics")]],
        };
        let dataset = MockDataset::returning(rows);

        let result = dataset.query("SELECT category FROM dim_product").await.unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(dataset.queries(), vec!["SELECT category FROM dim_product"]);
    }

    #[tokio::test]
    async fn test_mock_dataset_failure() {
        let dataset = MockDataset::failing();
        let err = dataset.query("SELECT 1").await.unwrap_err();
        assert!(matches!(err, PipelineError::Query(_)));
    }
}
