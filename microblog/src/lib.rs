pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod favorites;
pub mod model;
pub mod tweets;
pub mod users;
