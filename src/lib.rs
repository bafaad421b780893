pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod models;
pub mod render;
pub mod reports;
pub mod routes;
pub mod store;
