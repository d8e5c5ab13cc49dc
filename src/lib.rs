//! Model-to-row mapping and CRUD helpers over SQLite.
//!
//! # Intention
//!
//! - Run raw SQL and hand back fully materialized results.
//! - Turn result rows into typed models and models into INSERT, UPDATE and
//!   DELETE statements, driven by field metadata declared with [`model!`].
//! - Execute batches atomically: all statements commit or none do.
//!
//! # Architectural Boundaries
//!
//! - Whole-table CRUD with a single equality predicate; no query DSL.
//! - No pooling and no migrations. Connections come from a [`ConnectionProvider`].
//!
//! # Example
//!
//! ```no_run
//! use rust_sql_helper::{model, SqlHelper, SqliteConfig};
//!
//! model! {
//!     #[derive(Debug, Clone, Default, PartialEq)]
//!     pub struct Person {
//!         #[identity]
//!         pub id: i64,
//!         pub name: String,
//!         #[excluded]
//!         pub display: String,
//!     }
//! }
//!
//! # fn main() -> rust_sql_helper::Result<()> {
//! let helper = SqlHelper::new(SqliteConfig::new("app.db"));
//! helper.insert_model(&Person { name: "Ada".into(), ..Person::default() }, "people")?;
//! let people: Vec<Person> = helper.get_all_models("people")?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod executor;
pub mod helper;
pub mod mapper;
pub mod model;
pub mod statement;
pub mod value;

pub use error::{Error, ErrorKind, Result};
pub use executor::{ConnectionProvider, Executor, SqliteConfig};
pub use helper::SqlHelper;
pub use mapper::{map_first, map_rows};
pub use model::{describe, FieldDescriptor, FieldKind, Model};
pub use statement::{Operation, StatementTemplate};
pub use value::{FromValue, Params, Row, Table, Value};
