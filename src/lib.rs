pub mod api;
pub mod auth;
pub mod battle;
pub mod config;
pub mod db;
pub mod elo;
pub mod judge;
pub mod locks;
pub mod metrics;
