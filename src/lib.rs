pub mod api;
pub mod config;
pub mod data_models;
pub mod error;
pub mod msgess;
pub mod renderer;
pub mod search_client;
