//! # roster-core — Collection model for the roster sync service
//!
//! A collection is a fixed set of named groups, each holding an ordered
//! sequence of [`Record`]s. This crate owns the data model and every
//! mutation invariant; it does no I/O and never suspends.
//!
//! ## Modules
//!
//! - [`record`] — Record shape and loosely-typed request fields
//! - [`collection`] — Serializable snapshot of the whole collection
//! - [`store`] — [`CollectionStore`]: add / update / bulk replace / delete
//! - [`error`] — [`StoreError`] with stable error kinds

pub mod collection;
pub mod error;
pub mod record;
pub mod store;

pub use collection::Collection;
pub use error::StoreError;
pub use record::{Record, RecordFields, RecordId};
pub use store::{CollectionStore, SchemaConfig, Upsert};
