//! PostGIS tables.
//!
//! Bbox pushdown uses the `&&` envelope operator so a GiST index on the
//! geometry column applies. PostGIS keeps (x, y) order for every SRID, so
//! geometries are swapped on the way in and out when the storage CRS is
//! latitude-first.

use async_trait::async_trait;
use feature_query::{BackendKind, Feature, FilterOp};
use ogc_common::AxisOrder;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::Row;
use tracing::{debug, info, instrument};

use super::sql::{decode_row, Dialect, SqlBuilder, SqlStatement, SqlTable, SqlValue};
use crate::error::{ProviderError, ProviderResult};
use crate::eval::{swap_axes, FeatureSchema};
use crate::traits::{
    FeatureProvider, FeatureWriter, FetchRequest, FetchResult, MatchCount, ProviderCapabilities,
    ProviderRow,
};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

fn bind_all<'q>(mut query: PgQuery<'q>, params: &'q [SqlValue]) -> PgQuery<'q> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Text(s) => query.bind(s.as_str()),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Time(t) => query.bind(*t),
        };
    }
    query
}

pub struct PostgresProvider {
    pool: PgPool,
    table: SqlTable,
    schema: FeatureSchema,
}

impl PostgresProvider {
    pub async fn connect(
        url: &str,
        max_connections: u32,
        table: SqlTable,
        schema: FeatureSchema,
    ) -> ProviderResult<Self> {
        table.validate()?;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)
            .map_err(|e| ProviderError::Config(format!("postgres url: {}", e)))?;
        info!(table = %table.table, "Configured PostGIS dataset");
        Ok(Self::with_pool(pool, table, schema))
    }

    pub fn with_pool(pool: PgPool, table: SqlTable, schema: FeatureSchema) -> Self {
        Self { pool, table, schema }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn swap(&self) -> bool {
        self.schema.crs.axis_order() == AxisOrder::LatLon
    }

    fn builder(&self) -> SqlBuilder<'_> {
        SqlBuilder::new(
            &self.table,
            Dialect::Postgres,
            &self.schema.id_field,
            self.schema.crs.srid(),
        )
    }

    fn decode(&self, row: &PgRow) -> ProviderRow {
        let id = row.try_get::<Option<String>, _>("fid").ok().flatten();
        let geometry = row.try_get::<Option<String>, _>("geometry");
        let properties = row.try_get::<Option<String>, _>("properties");
        match (geometry, properties) {
            (Ok(geometry), Ok(properties)) => {
                decode_row(id, geometry, properties, &self.schema.id_field, self.swap())
            }
            (Err(e), _) | (_, Err(e)) => Err(feature_query::RecordError::new(
                id.as_deref(),
                format!("column decode failed: {}", e),
            )),
        }
    }

    fn geometry_json(&self, feature: &Feature) -> ProviderResult<Option<String>> {
        feature
            .geometry
            .as_ref()
            .map(|g| {
                let g = if self.swap() { swap_axes(g) } else { g.clone() };
                serde_json::to_string(&g)
                    .map_err(|e| ProviderError::Unsupported(format!("geometry: {}", e)))
            })
            .transpose()
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
impl FeatureProvider for PostgresProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            bbox: true,
            datetime: self.table.time_column.is_some(),
            filter_ops: FilterOp::all().to_vec(),
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
            debug!(sql = %statement.sql, "PostGIS select");
            bind_all(sqlx::query(&statement.sql), &statement.params)
                .fetch_all(&self.pool)
                .await?
                .iter()
                .map(|row| self.decode(row))
                .collect()
        };

        Ok(FetchResult { rows, matched })
    }

    async fn get(&self, id: &str) -> ProviderResult<Option<ProviderRow>> {
        let statement = self.builder().get(id);
        let row = bind_all(sqlx::query(&statement.sql), &statement.params)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| self.decode(&r)))
    }

    fn writer(&self) -> Option<&dyn FeatureWriter> {
        Some(self)
    }
}

#[async_trait]
impl FeatureWriter for PostgresProvider {
    async fn create(&self, mut feature: Feature) -> ProviderResult<String> {
        if feature.id.is_empty() {
            feature.id = uuid::Uuid::new_v4().to_string();
        }
        let geometry = self.geometry_json(&feature)?;
        let statement = self.builder().insert(&feature, geometry, None)?;
        self.execute(statement).await?;
        Ok(feature.id)
    }

    async fn update(&self, id: &str, feature: Feature) -> ProviderResult<bool> {
        let geometry = self.geometry_json(&feature)?;
        let statement = self.builder().update(id, &feature, geometry, None)?;
        Ok(self.execute(statement).await? > 0)
    }

    async fn delete(&self, id: &str) -> ProviderResult<bool> {
        let statement = self.builder().delete(id);
        Ok(self.execute(statement).await? > 0)
    }
}
