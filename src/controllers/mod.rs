//! Watch-driven controllers
//!
//! This module contains the watch loop that feeds lifecycle events to a
//! reconciler, its resumption cursor, and the Kubernetes-backed watch source
//! and resource store.

mod cursor;
mod kube;
mod watch_loop;

pub use cursor::ResourceCursor;
pub use kube::{KubeResourceStore, KubeWatchSource};
pub use watch_loop::{WatchConfig, WatchItem, WatchLoop, WatchSource, WatchStream};
