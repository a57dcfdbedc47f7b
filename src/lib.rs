pub mod audit;
pub mod config;
pub mod error;
pub mod store;

pub mod api;
pub mod auth;
pub mod identity;
pub mod status;
pub mod validation;
