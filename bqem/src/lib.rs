//! Local BigQuery emulator management for automated tests.
//!
//! A [`manager::Manager`] finds a free pair of ports, launches and supervises a
//! `bigquery-emulator` process on them, connects a client, and creates datasets and tables on
//! demand. Table schemas come from a local cache file ([`schema::SchemaStore`]) that is filled
//! lazily from a production BigQuery project ([`schema::SchemaResolver`]).
//!
//! ```rust,no_run
//! use bqem::prelude::*;
//!
//! # async fn example() -> BqemResult<()> {
//! let _rows = with_manager(ManagerConfig::default(), async |manager: &mut Manager| {
//!     let row = serde_json::json!({"id": 1, "name": "alice"});
//!     manager.load(vec![row.as_object().cloned().unwrap()], "shop.users").await?;
//!
//!     manager.query("select * from shop.users").await
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod emulator;
pub mod error;
mod macros;
pub mod manager;
pub mod schema;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use manager::with_manager;

/// Commonly used types.
pub mod prelude {
    pub use crate::client::{BigQueryRestClient, DatabaseClient, QueryResult, Row, TableRef};
    pub use crate::error::{BqemError, BqemResult, ErrorKind};
    pub use crate::manager::{Manager, TableSchemaSource, with_manager};
    pub use crate::schema::{FieldMode, FieldType, SchemaField, TableSchema};
    pub use config::shared::ManagerConfig;
}
