pub mod config;
pub mod error;
pub mod harness;
pub mod mail;
pub mod marker;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod server;
pub mod species;
pub mod store;
