pub mod config;
pub mod decompose;
pub mod error;
pub mod graph;
pub mod handlers;
pub mod logging;
pub mod runtime;
pub mod worker;
