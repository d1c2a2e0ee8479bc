//! HTTP API and command line for the playground services.

pub mod cli;
pub mod router;
