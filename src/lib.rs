pub mod api;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod observability;
pub mod ratelimit;
pub mod state;
pub mod storage;
pub mod upstream;
