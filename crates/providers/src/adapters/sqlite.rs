//! SQLite tables.
//!
//! Geometries are stored as GeoJSON text in the storage CRS with an (x, y)
//! envelope in `min_x`/`min_y`/`max_x`/`max_y` for bbox pushdown. Timestamps
//! are stored as UTC RFC 3339 text with second precision so they compare
//! lexically. Booleans come back as 0/1.

use std::path::Path;

use async_trait::async_trait;
use feature_query::{BackendKind, Feature, FilterOp};
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use tracing::{debug, info, instrument};

use super::sql::{
    decode_row, quote, timestamp_text, Dialect, SqlBuilder, SqlStatement, SqlTable, SqlValue,
    ENVELOPE_COLUMNS,
};
use crate::error::{ProviderError, ProviderResult};
use crate::eval::{xy_envelope, FeatureSchema};
use crate::traits::{
    FeatureProvider, FeatureWriter, FetchRequest, FetchResult, MatchCount, ProviderCapabilities,
    ProviderRow,
};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_all<'q>(mut query: SqliteQuery<'q>, params: &'q [SqlValue]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Text(s) => query.bind(s.as_str()),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Time(t) => query.bind(timestamp_text(t)),
        };
    }
    query
}

fn decode(row: &SqliteRow, id_field: &str) -> ProviderRow {
    let id = row.try_get::<Option<String>, _>("fid").ok().flatten();
    let geometry = row.try_get::<Option<String>, _>("geometry");
    let properties = row.try_get::<Option<String>, _>("properties");
    match (geometry, properties) {
        (Ok(geometry), Ok(properties)) => decode_row(id, geometry, properties, id_field, false),
        (Err(e), _) | (_, Err(e)) => Err(feature_query::RecordError::new(
            id.as_deref(),
            format!("column decode failed: {}", e),
        )),
    }
}

pub struct SqliteProvider {
    pool: SqlitePool,
    table: SqlTable,
    schema: FeatureSchema,
}

impl SqliteProvider {
    /// Open (creating if missing) the database file at `path`.
    pub async fn open(path: &Path, table: SqlTable, schema: FeatureSchema) -> ProviderResult<Self> {
        table.validate()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ProviderError::Config(format!("{}: {}", parent.display(), e)))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        info!(path = %path.display(), table = %table.table, "Opened SQLite dataset");
        Ok(Self { pool, table, schema })
    }

    /// Private in-memory database.
    pub async fn in_memory(table: SqlTable, schema: FeatureSchema) -> ProviderResult<Self> {
        table.validate()?;
        let options = SqliteConnectOptions::new().in_memory(true);
        // every connection to :memory: is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool, table, schema })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the table layout this adapter reads, if missing.
    pub async fn create_table(&self) -> ProviderResult<()> {
        let mut columns = vec![
            format!("{} TEXT PRIMARY KEY", quote(&self.table.id_column)),
            format!("{} TEXT", quote(&self.table.geometry_column)),
        ];
        columns.extend(ENVELOPE_COLUMNS.iter().map(|c| format!("{} REAL", quote(c))));
        columns.extend(self.table.property_columns().into_iter().map(quote));

        let table = quote(&self.table.table);
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table,
            columns.join(", ")
        ))
        .execute(&self.pool)
        .await?;

        let index = quote(&format!("{}_envelope", self.table.table.replace('.', "_")));
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (\"min_x\", \"max_x\", \"min_y\", \"max_y\")",
            index, table
        ))
        .execute(&self.pool)
        .await?;
        debug!(table = %self.table.table, "Ensured SQLite table");
        Ok(())
    }

    fn builder(&self) -> SqlBuilder<'_> {
        SqlBuilder::new(&self.table, Dialect::Sqlite, &self.schema.id_field, self.schema.crs.srid())
    }

    fn geometry_parts(&self, feature: &Feature) -> ProviderResult<(Option<String>, Option<[f64; 4]>)> {
        match &feature.geometry {
            None => Ok((None, None)),
            Some(geometry) => {
                let json = serde_json::to_string(geometry)
                    .map_err(|e| ProviderError::Unsupported(format!("geometry: {}", e)))?;
                let envelope = xy_envelope(geometry, self.schema.crs)
                    .map(|b| [b.min_x, b.min_y, b.max_x, b.max_y]);
                Ok((Some(json), envelope))
            }
        }
    }

    async fn execute(&self, statement: SqlStatement) -> ProviderResult<u64> {
        let mut tx = self.pool.begin().await?;
        let result = bind_all(sqlx::query(&statement.sql), &statement.params)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl FeatureProvider for SqliteProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            bbox: true,
            datetime: self.table.time_column.is_some(),
            // LIKE is case-insensitive in SQLite
            filter_ops: vec![FilterOp::Eq, FilterOp::Lt, FilterOp::Gt, FilterOp::In],
            sort: true,
            keyset: false,
            exact_count: true,
            write: true,
        }
    }

    #[instrument(skip(self, request), fields(table = %self.table.table))]
    async fn fetch(&self, request: &FetchRequest) -> ProviderResult<FetchResult> {
        let matched = if request.count {
            let statement = self.builder().count(request)?;
            let row = bind_all(sqlx::query(&statement.sql), &statement.params)
                .fetch_one(&self.pool)
                .await?;
            let value: i64 = row.try_get(0)?;
            Some(MatchCount {
                value: value.max(0) as u64,
                exact: true,
            })
        } else {
            None
        };

        let rows = if request.limit == 0 {
            Vec::new()
        } else {
            let statement = self.builder().select(request)?;
            debug!(sql = %statement.sql, "SQLite select");
            bind_all(sqlx::query(&statement.sql), &statement.params)
                .fetch_all(&self.pool)
                .await?
                .iter()
                .map(|row| decode(row, &self.schema.id_field))
                .collect()
        };

        Ok(FetchResult { rows, matched })
    }

    async fn get(&self, id: &str) -> ProviderResult<Option<ProviderRow>> {
        let statement = self.builder().get(id);
        let row = bind_all(sqlx::query(&statement.sql), &statement.params)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| decode(&r, &self.schema.id_field)))
    }

    fn writer(&self) -> Option<&dyn FeatureWriter> {
        Some(self)
    }
}

#[async_trait]
impl FeatureWriter for SqliteProvider {
    async fn create(&self, mut feature: Feature) -> ProviderResult<String> {
        if feature.id.is_empty() {
            feature.id = uuid::Uuid::new_v4().to_string();
        }
        let (geometry, envelope) = self.geometry_parts(&feature)?;
        let statement = self.builder().insert(&feature, geometry, envelope)?;
        self.execute(statement).await?;
        Ok(feature.id)
    }

    async fn update(&self, id: &str, feature: Feature) -> ProviderResult<bool> {
        let (geometry, envelope) = self.geometry_parts(&feature)?;
        let statement = self.builder().update(id, &feature, geometry, envelope)?;
        Ok(self.execute(statement).await? > 0)
    }

    async fn delete(&self, id: &str) -> ProviderResult<bool> {
        let statement = self.builder().delete(id);
        Ok(self.execute(statement).await? > 0)
    }
}
