pub mod config;
pub mod error;
pub mod fixture;
pub mod lifecycle;
pub mod message;
pub mod metrics;
pub mod publish;
pub mod resources;
