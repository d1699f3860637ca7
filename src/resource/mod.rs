//! Kind-agnostic data model shared by every controller

mod kind;
mod managed;
mod spec;
mod store;

pub use kind::*;
pub use managed::*;
pub use spec::*;
pub use store::*;
