pub mod canonical;
pub mod config;
pub mod error;
pub mod provider;
pub mod resolver;
pub mod routes;
pub mod upstream;
