//! Harness — resource admission control and shutdown coordination shared by
//! the daemon's worker pool and HTTP surface.

pub mod governor;
pub mod shutdown;
