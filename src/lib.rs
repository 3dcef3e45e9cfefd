//! FitSync application library.
//!
//! Holds the reference document server so it can be exercised in-process by
//! tests as well as served by the `fitsync-server` binary.

pub mod server;
