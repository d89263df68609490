//! kwatch store: per-kind snapshot caches, event routing and the watch
//! supervisor that drives them.

#![forbid(unsafe_code)]

pub mod cache;
pub mod router;
pub mod sink;
pub mod supervisor;

pub use cache::SnapshotCache;
pub use router::{EventRouter, RouteError};
pub use sink::{MemoryBuffer, OutputSink};
pub use supervisor::{EventStream, KindSource, Supervisor, TaskSummary};
