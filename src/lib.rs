pub mod config;
pub mod database;
pub mod models;
pub mod storage;
pub mod task;
pub mod upload;
pub mod store;
pub mod status;
pub mod publisher;
pub mod messaging;
pub mod transform;
pub mod service;
pub mod routes;
pub mod worker_processing;

#[cfg(test)]
mod test_support;
