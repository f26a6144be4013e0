//! Core traits for the hosts sync agent
//!
//! This module defines the abstract interfaces that collaborators implement.
//!
//! - [`RouteSource`]: Fetch the remote-declared route set

pub mod route_source;

pub use route_source::{Route, RouteSource};
