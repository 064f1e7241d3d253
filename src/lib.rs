pub mod agent;
pub mod config;
pub mod ingest;
pub mod publish;
pub mod rollup;
pub mod store;
