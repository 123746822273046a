// src/lib.rs

pub mod config;
pub mod dataset;
pub mod entity;
pub mod error;
pub mod fetch;
pub mod process;
pub mod reconcile;
pub mod schema;
pub mod store;
