//! Single-row Active-Record handles for Runar projects.
//!
//! # Intention
//!
//! - Let callers load, change, persist and delete one table row without
//!   writing SQL.
//! - Keep execution behind the [`Engine`] trait; a SQLite engine is bundled.
//!
//! # Architectural Boundaries
//!
//! - A [`Record`] only builds [`Command`]s; it never touches a connection.
//! - No multi-row queries, relations, caching or validation.

pub mod command;
pub mod engine;
pub mod error;
pub mod record;
pub mod sqlite;
pub mod value;

pub use command::{Command, ConnectionId, Reply};
pub use engine::Engine;
pub use error::{EngineError, RecordError, Result};
pub use record::Record;
pub use sqlite::{SqliteConfig, SqliteEngine};
pub use value::{Params, Row, Value, ValueMap};
