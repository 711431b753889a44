//! # galedb cluster metadata catalog
//!
//! The authoritative, replicated state machine recording every database,
//! retention policy, measurement, shard group, index group, shard,
//! partition, node, replica group, subscription, user, stream and in-flight
//! migration event in a galedb cluster.
//!
//! The catalog is a single in-memory value, [`catalog::MetaData`],
//! deterministically mutated by applying [`log::MetaOp`] commands in the
//! order an external consensus layer delivers them. Two replicas replaying
//! the same log arrive at byte-identical state, which is why every
//! identifier counter lives inside the state itself and why commands carry
//! their own timestamps instead of reading the clock.
//!
//! ## Persistence
//!
//! The catalog performs no I/O. [`serialize`] provides a framed binary
//! encoding — a 10-byte file type identifier (`gale.001.s` for snapshots,
//! `gale.001.l` for log entries, `gale.001.u` for the user subset), a CRC32,
//! and a bitcode payload — that the consensus layer stores wherever it
//! pleases. Map-valued fields encode in key order, so snapshot bytes are a
//! pure function of logical state.
//!
//! ## Concurrency
//!
//! [`catalog::Catalog`] wraps the state in a `RwLock`: the apply path takes
//! the exclusive lock, readers deep-clone a snapshot under the shared lock
//! and never observe partial mutation.

pub mod catalog;
pub mod error;
pub mod log;
pub mod serialize;

pub use error::MetaError;
pub type Result<T, E = MetaError> = std::result::Result<T, E>;
