//! Media gateway: uploads land in an object store, images get a thumbnail,
//! and everything is handed back out through signed, time-limited URLs.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
