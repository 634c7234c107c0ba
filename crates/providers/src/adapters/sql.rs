//! SQL statement building shared by the relational adapters.
//!
//! Statements are built as text with positional parameters; identifiers come
//! only from validated configuration and are always quoted, values are
//! always bound.

use chrono::{DateTime, SecondsFormat, Utc};
use feature_query::{Feature, FilterOp, Literal, PropertyFilter, RecordError, SortKey};
use ogc_common::{time::parse_timestamp, DateTimeFilter};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProviderError, ProviderResult};
use crate::traits::{FetchRequest, FetchStart};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

/// A bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Time(DateTime<Utc>),
}

impl SqlValue {
    fn from_literal(literal: &Literal) -> ProviderResult<SqlValue> {
        match literal {
            Literal::Null => Ok(SqlValue::Null),
            Literal::Bool(b) => Ok(SqlValue::Bool(*b)),
            Literal::Number(n) => Ok(SqlValue::Float(*n)),
            Literal::String(s) => Ok(SqlValue::Text(s.clone())),
            Literal::List(_) => Err(ProviderError::Unsupported(
                "list literal outside of 'in'".to_string(),
            )),
        }
    }

    /// A property value to store.
    pub fn from_json(value: &Value) -> ProviderResult<SqlValue> {
        match value {
            Value::Null => Ok(SqlValue::Null),
            Value::Bool(b) => Ok(SqlValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(SqlValue::Int(i)),
                None => n
                    .as_f64()
                    .map(SqlValue::Float)
                    .ok_or_else(|| ProviderError::Unsupported(format!("number {} out of range", n))),
            },
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => Err(ProviderError::Unsupported(
                "nested property values cannot be stored".to_string(),
            )),
        }
    }
}

/// Canonical text form of stored timestamps; sorts lexically.
pub fn timestamp_text(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// A statement and its parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Table layout of a relational dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlTable {
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_geometry_column")]
    pub geometry_column: String,
    #[serde(default)]
    pub time_column: Option<String>,
    /// Property columns; each is exposed under its own name.
    #[serde(default)]
    pub columns: Vec<String>,
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_geometry_column() -> String {
    "geom".to_string()
}

/// Envelope columns kept next to the GeoJSON text in SQLite tables.
pub const ENVELOPE_COLUMNS: [&str; 4] = ["min_x", "min_y", "max_x", "max_y"];

fn valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Double-quote a validated identifier, part by part.
pub fn quote(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part))
        .collect::<Vec<_>>()
        .join(".")
}

impl SqlTable {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: default_id_column(),
            geometry_column: default_geometry_column(),
            time_column: None,
            columns: Vec::new(),
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_time_column(mut self, column: impl Into<String>) -> Self {
        self.time_column = Some(column.into());
        self
    }

    /// Reject identifiers that cannot be quoted safely.
    pub fn validate(&self) -> ProviderResult<()> {
        let names = [&self.table, &self.id_column, &self.geometry_column]
            .into_iter()
            .chain(self.time_column.iter())
            .chain(self.columns.iter());
        for name in names {
            if !valid_identifier(name) {
                return Err(ProviderError::Config(format!("invalid SQL identifier '{}'", name)));
            }
        }
        Ok(())
    }

    /// Every property column, the time column included.
    pub fn property_columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = self.columns.iter().map(String::as_str).collect();
        if let Some(time) = self.time_column.as_deref() {
            if !columns.contains(&time) {
                columns.push(time);
            }
        }
        columns
    }

    /// Column backing a queryable name.
    fn column_for(&self, name: &str, id_field: &str) -> ProviderResult<String> {
        if name == id_field || name == self.id_column {
            return Ok(quote(&self.id_column));
        }
        if self.property_columns().contains(&name) {
            return Ok(quote(name));
        }
        Err(ProviderError::Unsupported(format!(
            "'{}' is not a column of {}",
            name, self.table
        )))
    }
}

/// Incremental statement builder.
pub struct SqlBuilder<'a> {
    table: &'a SqlTable,
    dialect: Dialect,
    id_field: &'a str,
    srid: i32,
    params: Vec<SqlValue>,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(table: &'a SqlTable, dialect: Dialect, id_field: &'a str, srid: i32) -> Self {
        Self {
            table,
            dialect,
            id_field,
            srid,
            params: Vec::new(),
        }
    }

    fn bind(&mut self, value: SqlValue) -> String {
        self.params.push(value);
        match self.dialect {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${}", self.params.len()),
        }
    }

    /// A value expression; nulls are written as a literal so they take the
    /// column's type.
    fn value(&mut self, value: SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_string(),
            other => self.bind(other),
        }
    }

    fn bind_time(&mut self, t: &DateTime<Utc>) -> String {
        match self.dialect {
            Dialect::Sqlite => self.bind(SqlValue::Text(timestamp_text(t))),
            Dialect::Postgres => self.bind(SqlValue::Time(*t)),
        }
    }

    fn finish(self, sql: String) -> SqlStatement {
        SqlStatement {
            sql,
            params: self.params,
        }
    }

    /// Text form of the id, geometry GeoJSON and properties JSON object.
    fn select_list(&self) -> String {
        let id = quote(&self.table.id_column);
        let geom = quote(&self.table.geometry_column);
        let pairs: Vec<String> = self
            .table
            .property_columns()
            .into_iter()
            .map(|c| format!("'{}', {}", c, quote(c)))
            .collect();
        match self.dialect {
            Dialect::Sqlite => format!(
                "CAST({} AS TEXT) AS fid, {} AS geometry, json_object({}) AS properties",
                id,
                geom,
                pairs.join(", ")
            ),
            Dialect::Postgres => format!(
                "{}::text AS fid, ST_AsGeoJSON({}) AS geometry, json_build_object({})::text AS properties",
                id,
                geom,
                pairs.join(", ")
            ),
        }
    }

    fn filter_clause(&mut self, filter: &PropertyFilter) -> ProviderResult<String> {
        let column = self.table.column_for(&filter.name, self.id_field)?;
        match (filter.op, &filter.value) {
            (FilterOp::In, Literal::List(items)) => {
                if items.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                let mut alternatives = Vec::with_capacity(items.len());
                for item in items {
                    alternatives.push(self.comparison(&column, "=", item)?);
                }
                Ok(format!("({})", alternatives.join(" OR ")))
            }
            (FilterOp::Eq | FilterOp::In, literal) => self.comparison(&column, "=", literal),
            (FilterOp::Lt, literal) => self.comparison(&column, "<", literal),
            (FilterOp::Gt, literal) => self.comparison(&column, ">", literal),
            (FilterOp::Like, literal @ Literal::String(_)) => {
                self.comparison(&column, "LIKE", literal)
            }
            (FilterOp::Like, _) => Ok("1 = 0".to_string()),
        }
    }

    /// `column <operator> literal`, holding only for stored values of the
    /// literal's kind. A number never matches text and text never matches a
    /// number, the same as in-memory evaluation.
    fn comparison(&mut self, column: &str, operator: &str, literal: &Literal) -> ProviderResult<String> {
        // (sqlite typeof names, jsonb_typeof name, postgres parameter type)
        let (storage_types, json_type, param_type) = match literal {
            Literal::Null if operator == "=" => return Ok(format!("{} IS NULL", column)),
            Literal::Null => return Ok("1 = 0".to_string()),
            Literal::Number(_) => ("'integer', 'real'", "number", "float8"),
            Literal::String(_) => ("'text'", "string", "text"),
            // booleans are stored as 0/1 in SQLite
            Literal::Bool(_) => ("'integer'", "boolean", "boolean"),
            Literal::List(_) => {
                return Err(ProviderError::Unsupported(
                    "list literal outside of 'in'".to_string(),
                ))
            }
        };
        let placeholder = self.bind(SqlValue::from_literal(literal)?);
        let clause = match self.dialect {
            Dialect::Sqlite => format!(
                "(typeof({c}) IN ({t}) AND {c} {op} {p})",
                c = column,
                t = storage_types,
                op = operator,
                p = placeholder
            ),
            Dialect::Postgres if operator == "LIKE" => format!(
                "(jsonb_typeof(to_jsonb({c})) = 'string' AND (to_jsonb({c}) #>> '{{}}') LIKE {p})",
                c = column,
                p = placeholder
            ),
            // jsonb comparison never raises on a column of another type
            Dialect::Postgres => format!(
                "(jsonb_typeof(to_jsonb({c})) = '{j}' AND to_jsonb({c}) {op} to_jsonb({p}::{t}))",
                c = column,
                j = json_type,
                op = operator,
                p = placeholder,
                t = param_type
            ),
        };
        Ok(clause)
    }

    fn datetime_clause(&mut self, datetime: &DateTimeFilter) -> ProviderResult<String> {
        let column = match &self.table.time_column {
            Some(c) => quote(c),
            None => {
                return Err(ProviderError::Unsupported(format!(
                    "{} has no time column",
                    self.table.table
                )))
            }
        };
        let interval = datetime.as_interval();
        let mut parts = vec![format!("{} IS NOT NULL", column)];
        if let Some(start) = &interval.start {
            let p = self.bind_time(start);
            parts.push(format!("{} >= {}", column, p));
        }
        if let Some(end) = &interval.end {
            let p = self.bind_time(end);
            parts.push(format!("{} <= {}", column, p));
        }
        Ok(parts.join(" AND "))
    }

    fn where_clause(&mut self, request: &FetchRequest) -> ProviderResult<String> {
        let mut clauses = Vec::new();

        if let Some(bbox) = &request.bbox {
            let clause = match self.dialect {
                Dialect::Sqlite => {
                    let a = self.bind(SqlValue::Float(bbox.min_x));
                    let b = self.bind(SqlValue::Float(bbox.max_x));
                    let c = self.bind(SqlValue::Float(bbox.min_y));
                    let d = self.bind(SqlValue::Float(bbox.max_y));
                    format!(
                        "\"max_x\" >= {} AND \"min_x\" <= {} AND \"max_y\" >= {} AND \"min_y\" <= {}",
                        a, b, c, d
                    )
                }
                Dialect::Postgres => {
                    let a = self.bind(SqlValue::Float(bbox.min_x));
                    let b = self.bind(SqlValue::Float(bbox.min_y));
                    let c = self.bind(SqlValue::Float(bbox.max_x));
                    let d = self.bind(SqlValue::Float(bbox.max_y));
                    format!(
                        "{} && ST_MakeEnvelope({}, {}, {}, {}, {})",
                        quote(&self.table.geometry_column),
                        a,
                        b,
                        c,
                        d,
                        self.srid
                    )
                }
            };
            clauses.push(clause);
        }

        if let Some(datetime) = &request.datetime {
            clauses.push(self.datetime_clause(datetime)?);
        }

        for filter in &request.filters {
            clauses.push(self.filter_clause(filter)?);
        }

        Ok(if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        })
    }

    fn order_clause(&self, sort_by: &[SortKey]) -> ProviderResult<String> {
        let mut terms = Vec::with_capacity(sort_by.len() + 1);
        for key in sort_by {
            let column = self.table.column_for(&key.field, self.id_field)?;
            // nulls lowest in both dialects
            let term = match (self.dialect, key.is_desc()) {
                (Dialect::Sqlite, false) => format!("{} ASC", column),
                (Dialect::Sqlite, true) => format!("{} DESC", column),
                (Dialect::Postgres, false) => format!("{} ASC NULLS FIRST", column),
                (Dialect::Postgres, true) => format!("{} DESC NULLS LAST", column),
            };
            terms.push(term);
        }
        terms.push(format!("{} ASC", quote(&self.table.id_column)));
        Ok(format!(" ORDER BY {}", terms.join(", ")))
    }

    /// Page of rows for an offset-positioned request.
    pub fn select(mut self, request: &FetchRequest) -> ProviderResult<SqlStatement> {
        let offset = match request.start {
            FetchStart::Offset(n) => n,
            FetchStart::After { .. } => {
                return Err(ProviderError::Unsupported(
                    "keyset paging is not available for SQL tables".to_string(),
                ))
            }
        };
        let select_list = self.select_list();
        let where_clause = self.where_clause(request)?;
        let order = self.order_clause(&request.sort_by)?;
        let limit = self.bind(SqlValue::Int(request.limit as i64));
        let offset = self.bind(SqlValue::Int(offset as i64));
        let sql = format!(
            "SELECT {} FROM {}{}{} LIMIT {} OFFSET {}",
            select_list,
            quote(&self.table.table),
            where_clause,
            order,
            limit,
            offset,
        );
        Ok(self.finish(sql))
    }

    pub fn count(mut self, request: &FetchRequest) -> ProviderResult<SqlStatement> {
        let where_clause = self.where_clause(request)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            quote(&self.table.table),
            where_clause
        );
        Ok(self.finish(sql))
    }

    pub fn get(mut self, id: &str) -> SqlStatement {
        let select_list = self.select_list();
        let p = self.bind(SqlValue::Text(id.to_string()));
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {}",
            select_list,
            quote(&self.table.table),
            id_text(self.dialect, &self.table.id_column),
            p
        );
        self.finish(sql)
    }

    /// Column names and values for a feature's properties, in table order.
    fn property_values(&self, feature: &Feature) -> ProviderResult<Vec<(String, SqlValue)>> {
        let columns = self.table.property_columns();
        if let Some(unknown) = feature
            .properties
            .keys()
            .find(|k| !columns.contains(&k.as_str()) && k.as_str() != self.id_field)
        {
            return Err(ProviderError::Unsupported(format!(
                "property '{}' has no column in {}",
                unknown, self.table.table
            )));
        }
        columns
            .into_iter()
            .map(|column| {
                let value = feature.properties.get(column).unwrap_or(&Value::Null);
                let value = if Some(column) == self.table.time_column.as_deref() {
                    match value {
                        Value::String(s) => {
                            let t = parse_timestamp(s).map_err(|e| {
                                ProviderError::Unsupported(format!("{}: {}", column, e))
                            })?;
                            match self.dialect {
                                Dialect::Sqlite => SqlValue::Text(timestamp_text(&t)),
                                Dialect::Postgres => SqlValue::Time(t),
                            }
                        }
                        other => SqlValue::from_json(other)?,
                    }
                } else {
                    SqlValue::from_json(value)?
                };
                Ok((column.to_string(), value))
            })
            .collect()
    }

    /// Geometry assignments: GeoJSON text plus, for SQLite, the envelope.
    ///
    /// `geometry_json` and `envelope` are already in backend axis order.
    fn geometry_values(
        &mut self,
        geometry_json: Option<String>,
        envelope: Option<[f64; 4]>,
    ) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let geom_column = quote(&self.table.geometry_column);
        match self.dialect {
            Dialect::Sqlite => {
                let p = self.value(geometry_json.map_or(SqlValue::Null, SqlValue::Text));
                out.push((geom_column, p));
                let values = envelope.map_or([None; 4], |e| e.map(Some));
                for (name, value) in ENVELOPE_COLUMNS.iter().zip(values) {
                    let p = self.value(value.map_or(SqlValue::Null, SqlValue::Float));
                    out.push((quote(name), p));
                }
            }
            Dialect::Postgres => {
                let expr = match geometry_json {
                    Some(json) => {
                        let p = self.bind(SqlValue::Text(json));
                        format!("ST_SetSRID(ST_GeomFromGeoJSON({}), {})", p, self.srid)
                    }
                    None => "NULL".to_string(),
                };
                out.push((geom_column, expr));
            }
        }
        out
    }

    pub fn insert(
        mut self,
        feature: &Feature,
        geometry_json: Option<String>,
        envelope: Option<[f64; 4]>,
    ) -> ProviderResult<SqlStatement> {
        let properties = self.property_values(feature)?;
        let mut columns = vec![quote(&self.table.id_column)];
        let mut values = vec![self.bind(SqlValue::Text(feature.id.clone()))];
        for (column, expr) in self.geometry_values(geometry_json, envelope) {
            columns.push(column);
            values.push(expr);
        }
        for (column, value) in properties {
            columns.push(quote(&column));
            values.push(self.value(value));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(&self.table.table),
            columns.join(", "),
            values.join(", ")
        );
        Ok(self.finish(sql))
    }

    pub fn update(
        mut self,
        id: &str,
        feature: &Feature,
        geometry_json: Option<String>,
        envelope: Option<[f64; 4]>,
    ) -> ProviderResult<SqlStatement> {
        let properties = self.property_values(feature)?;
        let mut assignments = Vec::new();
        for (column, expr) in self.geometry_values(geometry_json, envelope) {
            assignments.push(format!("{} = {}", column, expr));
        }
        for (column, value) in properties {
            let p = self.value(value);
            assignments.push(format!("{} = {}", quote(&column), p));
        }
        let p = self.bind(SqlValue::Text(id.to_string()));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            quote(&self.table.table),
            assignments.join(", "),
            id_text(self.dialect, &self.table.id_column),
            p
        );
        Ok(self.finish(sql))
    }

    pub fn delete(mut self, id: &str) -> SqlStatement {
        let p = self.bind(SqlValue::Text(id.to_string()));
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            quote(&self.table.table),
            id_text(self.dialect, &self.table.id_column),
            p
        );
        self.finish(sql)
    }
}

fn id_text(dialect: Dialect, id_column: &str) -> String {
    match dialect {
        Dialect::Sqlite => format!("CAST({} AS TEXT)", quote(id_column)),
        Dialect::Postgres => format!("{}::text", quote(id_column)),
    }
}

/// Decode one selected row.
///
/// `geometry` is GeoJSON text in backend axis order; `swap` converts it to
/// the authority order of the storage CRS.
pub fn decode_row(
    id: Option<String>,
    geometry: Option<String>,
    properties: Option<String>,
    id_field: &str,
    swap: bool,
) -> Result<Feature, RecordError> {
    let id = id.ok_or_else(|| RecordError::new(None, "row has a null id"))?;

    let geometry = match geometry {
        None => Value::Null,
        Some(text) => serde_json::from_str(&text)
            .map_err(|e| RecordError::new(Some(&id), format!("geometry is not JSON: {}", e)))?,
    };
    let properties = match properties {
        None => Value::Object(Map::new()),
        Some(text) => serde_json::from_str(&text)
            .map_err(|e| RecordError::new(Some(&id), format!("properties are not JSON: {}", e)))?,
    };

    let mut object = Map::new();
    object.insert("id".to_string(), Value::String(id.clone()));
    object.insert("geometry".to_string(), geometry);
    object.insert("properties".to_string(), properties);

    let mut feature = Feature::from_geojson(Value::Object(object), id_field).map_err(|e| RecordError {
        id: e.id.or(Some(id)),
        message: e.message,
    })?;
    if swap {
        feature.geometry = feature.geometry.as_ref().map(crate::eval::swap_axes);
    }
    Ok(feature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogc_common::BoundingBox;

    fn table() -> SqlTable {
        SqlTable::new("roads")
            .with_columns(["name", "lanes"])
            .with_time_column("opened")
    }

    #[test]
    fn test_identifier_validation() {
        assert!(table().validate().is_ok());
        assert!(SqlTable::new("public.roads").validate().is_ok());
        assert!(SqlTable::new("roads; drop table x").validate().is_err());
        assert!(table().with_columns(["na\"me"]).validate().is_err());
        assert_eq!(quote("public.roads"), "\"public\".\"roads\"");
    }

    #[test]
    fn test_sqlite_select() {
        let t = table();
        let mut request = FetchRequest::all(10);
        request.bbox = Some(BoundingBox::new(0.0, 1.0, 2.0, 3.0));
        request.filters = vec![
            PropertyFilter::new("lanes", FilterOp::Gt, Literal::Number(2.0)),
            PropertyFilter::new(
                "name",
                FilterOp::In,
                Literal::List(vec![Literal::String("a".into()), Literal::String("b".into())]),
            ),
        ];
        request.sort_by = vec![SortKey::desc("lanes")];
        request.start = FetchStart::Offset(20);

        let stmt = SqlBuilder::new(&t, Dialect::Sqlite, "id", 4326).select(&request).unwrap();
        assert!(stmt.sql.contains("\"max_x\" >= ? AND \"min_x\" <= ?"));
        assert!(stmt
            .sql
            .contains("(typeof(\"lanes\") IN ('integer', 'real') AND \"lanes\" > ?)"));
        assert!(stmt.sql.contains(
            "((typeof(\"name\") IN ('text') AND \"name\" = ?) OR (typeof(\"name\") IN ('text') AND \"name\" = ?))"
        ));
        assert!(stmt.sql.contains("ORDER BY \"lanes\" DESC, \"id\" ASC"));
        assert!(stmt.sql.ends_with("LIMIT ? OFFSET ?"));
        assert_eq!(stmt.params.len(), 9);
        assert_eq!(stmt.params[0], SqlValue::Float(0.0));
        assert_eq!(stmt.params[8], SqlValue::Int(20));
    }

    #[test]
    fn test_postgres_placeholders_and_nulls_order() {
        let t = table();
        let mut request = FetchRequest::all(5);
        request.bbox = Some(BoundingBox::new(0.0, 1.0, 2.0, 3.0));
        request.datetime = Some(DateTimeFilter::parse("2024-01-01T00:00:00Z/..").unwrap());
        request.sort_by = vec![SortKey::asc("name"), SortKey::desc("lanes")];

        let stmt = SqlBuilder::new(&t, Dialect::Postgres, "id", 3857).select(&request).unwrap();
        assert!(stmt.sql.contains("\"geom\" && ST_MakeEnvelope($1, $2, $3, $4, 3857)"));
        assert!(stmt.sql.contains("\"opened\" >= $5"));
        assert!(stmt.sql.contains("\"name\" ASC NULLS FIRST, \"lanes\" DESC NULLS LAST, \"id\" ASC"));
        assert!(stmt.sql.ends_with("LIMIT $6 OFFSET $7"));
        assert!(matches!(stmt.params[4], SqlValue::Time(_)));
    }

    #[test]
    fn test_null_and_unknown_column() {
        let t = table();
        let mut request = FetchRequest::all(1);
        request.filters = vec![PropertyFilter::new("name", FilterOp::Eq, Literal::Null)];
        let stmt = SqlBuilder::new(&t, Dialect::Sqlite, "id", 4326).count(&request).unwrap();
        assert_eq!(stmt.sql, "SELECT COUNT(*) FROM \"roads\" WHERE \"name\" IS NULL");
        assert!(stmt.params.is_empty());

        request.filters = vec![PropertyFilter::eq("colour", Literal::String("red".into()))];
        assert!(SqlBuilder::new(&t, Dialect::Sqlite, "id", 4326).count(&request).is_err());
    }

    #[test]
    fn test_comparisons_require_matching_kind() {
        let t = table();
        let mut request = FetchRequest::all(1);
        request.filters = vec![
            PropertyFilter::new("lanes", FilterOp::Lt, Literal::String("x".into())),
            PropertyFilter::new("name", FilterOp::Like, Literal::String("A%".into())),
        ];
        let stmt = SqlBuilder::new(&t, Dialect::Postgres, "id", 4326).count(&request).unwrap();
        assert!(stmt.sql.contains(
            "(jsonb_typeof(to_jsonb(\"lanes\")) = 'string' AND to_jsonb(\"lanes\") < to_jsonb($1::text))"
        ));
        assert!(stmt.sql.contains("(to_jsonb(\"name\") #>> '{}') LIKE $2"));

        request.filters = vec![
            PropertyFilter::new("lanes", FilterOp::Gt, Literal::Null),
            PropertyFilter::new("name", FilterOp::Like, Literal::Number(1.0)),
        ];
        let stmt = SqlBuilder::new(&t, Dialect::Sqlite, "id", 4326).count(&request).unwrap();
        assert_eq!(stmt.sql, "SELECT COUNT(*) FROM \"roads\" WHERE 1 = 0 AND 1 = 0");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_insert_rejects_unknown_property() {
        let t = table();
        let feature = Feature::new("r1").with_property("name", "A1").with_property("surface", "x");
        let err = SqlBuilder::new(&t, Dialect::Sqlite, "id", 4326)
            .insert(&feature, None, None)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(_)));
    }

    #[test]
    fn test_insert_normalizes_time() {
        let t = table();
        let feature = Feature::new("r1")
            .with_property("name", "A1")
            .with_property("opened", "2024-03-01T12:00:00+02:00");
        let stmt = SqlBuilder::new(&t, Dialect::Sqlite, "id", 4326)
            .insert(&feature, Some("{}".into()), Some([0.0, 0.0, 1.0, 1.0]))
            .unwrap();
        assert!(stmt.sql.starts_with("INSERT INTO \"roads\" (\"id\", \"geom\", \"min_x\""));
        assert!(stmt
            .params
            .contains(&SqlValue::Text("2024-03-01T10:00:00Z".to_string())));
    }

    #[test]
    fn test_decode_row() {
        let feature = decode_row(
            Some("7".into()),
            Some(r#"{"type":"Point","coordinates":[50.0,5.0]}"#.into()),
            Some(r#"{"name":"x"}"#.into()),
            "id",
            true,
        )
        .unwrap();
        assert_eq!(feature.geometry, Some(ogc_common::Geometry::point(5.0, 50.0)));

        let err = decode_row(Some("8".into()), Some("not json".into()), None, "id", false)
            .unwrap_err();
        assert_eq!(err.id.as_deref(), Some("8"));
    }
}
