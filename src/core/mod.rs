pub mod agent;
pub mod config;
pub mod delivery;
pub mod executor;
pub mod report;
pub mod subscription;
pub mod summary;
pub mod terminal;
