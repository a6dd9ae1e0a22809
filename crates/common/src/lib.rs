//! Shared core of the hive build accelerator.
//!
//! The master and every worker keep an [`attr::AttributeCache`] mirroring
//! the metadata of the project tree. Workers fill theirs lazily from the
//! master and receive the master's changes as ordered [`attr::FileSet`]
//! deltas through the per-client [`attr::FanoutRegistry`].
//!
//! ```rust,no_run
//! use common::attr::{AttributeCache, LocalTree};
//!
//! let tree = LocalTree::new("/src/project");
//! let cache = AttributeCache::new(tree.getter(), tree.statter());
//!
//! let main = cache.get("src/main.rs", false);
//! if main.is_deletion() {
//!     println!("no such file");
//! }
//! ```

pub mod attr;
pub mod error;
pub mod hash;
pub mod single_flight;
pub mod stat;
pub mod wire;

pub use error::{FanoutError, WaitError, WireError};
pub use hash::ContentHash;
pub use single_flight::SingleFlight;
pub use stat::StatBlock;
