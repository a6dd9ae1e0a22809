//! File metadata: the data model, the cache, and how deltas move between peers.

mod cache;
mod fanout;
mod file_attr;
mod file_set;
pub mod local;
pub mod rpc;
mod waiter;

pub use cache::{AttrCacheConfig, AttributeCache, Getter, Statter};
pub use fanout::{FanoutClient, FanoutRegistry};
pub use file_attr::{
    is_valid_child_name, join_path, split_path, Entry, FileAttr, Metadata, NameModeMap,
};
pub use file_set::{canonical_order, FileSet};
pub use local::LocalTree;
pub use rpc::{AttrClient, AttrRequest, AttrResponse, AttrServer, UpdateHandler};
pub use waiter::{FileSetWaiter, Process, ProcessError};
