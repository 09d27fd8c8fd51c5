//! dbconn - A small, driver-agnostic layer over relational database connectivity
//!
//! # Example
//! ```ignore
//! use dbconn::{Connection, ConnectionParameters, InsertStatement};
//!
//! // Connect to database
//! let params = ConnectionParameters::new("postgres", "127.0.0.1", 5432, "postgres", "pw", "shop")?;
//! let conn = Connection::open(&params).await?;
//!
//! // Insert a row and get it back, id included
//! let inserted = conn
//!     .insert(&InsertStatement::into_table("users").value("name", "John"))
//!     .await?
//!     .single_row()?;
//! let id = inserted.get("id")?;
//!
//! // Run an ad-hoc query and serialize it
//! let json = conn.query("SELECT * FROM users").await?.to_json()?;
//!
//! conn.close().await?;
//! ```

pub mod builders;
pub mod config;
pub mod drivers;
pub mod error;
pub mod traits;
pub mod types;

mod client;

// Re-export main types for convenient access
pub use builders::{InsertStatement, ProcedureCall};
pub use client::Connection;
pub use config::{connection_string, connection_string_for, ConnectionParameters, Driver};
pub use error::{DbError, Result};
pub use traits::DatabaseDriver;
pub use types::{QueryResult, RawQueryResult, Row, SqlValue};
