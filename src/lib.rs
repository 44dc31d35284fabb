pub mod app;
pub mod assemble;
pub mod client;
pub mod coerce;
pub mod config;
pub mod domain;
pub mod error;
pub mod header;
pub mod output;
pub mod schema;
pub mod sheet;
pub mod template;
