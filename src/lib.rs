pub mod aggregate;
pub mod config;
pub mod dimension;
pub mod error;
pub mod injury;
pub mod models;
pub mod pipeline;
pub mod run_state;
pub mod snapshot;
pub mod staging;
pub mod warehouse;
