pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod fees;
pub mod gateway;
pub mod idgen;
pub mod notify;
pub mod phone;
pub mod pin;
pub mod responses;
pub mod routes;
pub mod schema;
pub mod sweeper;

pub use error::{Error, Result};
