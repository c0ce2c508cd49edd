//! # oxidp-server
//!
//! HTTP assembly for the oxidp authorization server: dependency wiring,
//! the router, background maintenance, and process lifecycle.

mod bootstrap;
mod maintenance;
mod observability;
mod routes;
mod server;

pub use bootstrap::{AppContext, bootstrap};
pub use observability::init_tracing;
pub use routes::build_router;
pub use server::run;
