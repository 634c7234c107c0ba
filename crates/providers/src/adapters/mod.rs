//! Backend adapters.

pub mod geojson;
pub mod memory;
pub mod postgres;
pub mod redis;
pub mod remote;
pub mod sql;
pub mod sqlite;

pub use self::geojson::{GeoJsonProvider, GeoJsonSource, ObjectStorageConfig};
pub use self::memory::MemoryProvider;
pub use self::postgres::PostgresProvider;
pub use self::redis::RedisProvider;
pub use self::remote::RemoteProvider;
pub use self::sql::{Dialect, SqlTable};
pub use self::sqlite::SqliteProvider;
