pub mod analytics;
pub mod auth;
pub mod config;
pub mod context;
pub mod copy_manager;
pub mod data_types;
pub mod datasets;
pub mod error;
pub mod frame;
pub mod frontend;
pub mod locks;
pub mod metadata;
pub mod operations;
pub mod repository;
pub mod store;

extern crate lazy_static;

#[cfg(test)]
pub(crate) mod testutils;
