//! Entity mapping over SQLite.
//!
//! # Intention
//!
//! - Let model types declare their persisted fields once and derive their
//!   table layout from that declaration.
//! - Build parameterized statements for fetching, counting, saving and
//!   truncating entities, and map result rows back into typed entities.
//!
//! # Architectural Boundaries
//!
//! - Only mapping and statement construction belong here; SQL execution is
//!   delegated to a [`StorageClient`] ([`SqliteDatabase`] by default).
//! - No transactions, migrations beyond adding missing columns, or
//!   connection pooling.
//!
//! # Example
//!
//! ```ignore
//! use rust_sqlite_entities::{EntityStore, Field, Model};
//!
//! #[derive(Debug, Default)]
//! struct Person {
//!     name: String,
//!     age: i64,
//! }
//!
//! impl Model for Person {
//!     fn fields() -> Vec<Field<Self>> {
//!         vec![
//!             Field::text("name", |p: &Person| &p.name, |p: &mut Person| &mut p.name),
//!             Field::integer("age", |p: &Person| &p.age, |p: &mut Person| &mut p.age),
//!         ]
//!     }
//! }
//!
//! let store = EntityStore::open_in_memory()?;
//! let mut ada = store.create_entity::<Person>()?;
//! ada.name = "Ada".to_string();
//! store.save_entity(&ada)?;
//! let adults = store.fetch_all_where::<Person>("age >= 18")?;
//! ```

pub mod error;
pub mod mapper;
pub mod query;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use error::{Error, InvalidQueryError, Result, SchemaError, StorageError};
pub use query::{Page, QuerySpec};
pub use schema::{schema_of, Field, FieldDescriptor, Model, Schema, ValueKind, OBJECT_ID_COLUMN};
pub use sqlite::{Params, Row, SqlQuery, SqliteDatabase, StorageClient, StoreConfig, Value};
pub use store::{new_identifier, Entity, EntityStore};
