pub mod config;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod service;
pub mod stores;
pub mod utils;
