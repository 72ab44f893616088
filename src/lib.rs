pub mod agent;
pub mod ai;
pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod extract;
pub mod service;
