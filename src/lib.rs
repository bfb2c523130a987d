pub mod auth;
pub mod config;
pub mod constants;
pub mod events;
pub mod extractors;
pub mod generation;
pub mod logging;
pub mod progression;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod workers;
