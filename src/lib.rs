pub mod auth;
pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;
