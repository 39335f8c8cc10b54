//! An open-addressed hash map from `u32` keys to `i32` values, built for
//! workloads that reduce richer keys to integer digests and want a
//! cache-friendly table with predictable latency tails.
//!
//! Three mechanisms work together:
//!
//! * **Robin Hood linear probing** over a power-of-two bucket array, indexed
//!   by a Fibonacci multiply of the XOR-folded key. Insertions displace
//!   entries that sit closer to their home slot than the incoming entry,
//!   and removal backward-shifts the remainder of the chain, so the table
//!   needs no tombstones.
//! * **Incremental two-space resizing.** Growing or shrinking installs a
//!   fresh space and drains the retiring one in small batches charged to
//!   subsequent mutating operations, so no single operation pays for a full
//!   rehash. Lookups consult both spaces while a migration is in flight.
//! * **Bounded probing.** Each space tracks the largest probe length it has
//!   ever seen, which caps the cost of negative lookups, and a configurable
//!   probe ceiling forces a grow when chains get too long.
//!
//! [`RobinMap::new`] picks reasonable defaults; [`Config`] exposes the load
//! factors, the probe ceiling and the migration batch size.
//!
//! The map is single-threaded by design: it contains no interior
//! synchronization, and callers needing shared access wrap it in a lock at
//! their own boundary.
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]
#![warn(missing_docs)]

mod config;
mod map;
mod space;

mod test_map;

pub use config::{Config, MAX_LOG2_SIZE, MIGRATE_ALL, MIN_LOG2_SIZE};
pub use map::{PutResult, RobinMap};
pub use space::Entry;
