//! Shared types and storage for the squib detonation sandbox.
//!
//! The scheduler and the on-machine agent never talk to each other directly;
//! they coordinate through the job and machine records in the document store.
//! Everything both sides need lives here: the record types and their state
//! machine, the store and blob clients, the event canonicalizer, and the
//! fingerprint store.

pub mod events;
pub mod goodlist;
pub mod hash;
pub mod store;
pub mod telemetry;
pub mod types;

pub use types::error::CoreError;

pub type Result<T> = std::result::Result<T, CoreError>;
