pub mod batch;
pub mod cli;
pub mod client;
pub mod common;
pub mod constants;
pub mod error;
pub mod export;
pub mod npi;
pub mod profile;
pub mod server;
pub mod store;
pub mod view;
