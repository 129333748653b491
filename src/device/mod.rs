pub mod activation;
pub mod adapter;
pub mod btle;
pub mod constants;
pub mod decoder;
pub mod discovery;
pub mod movement;
pub mod pacing;
pub mod resolver;
pub mod session;
pub mod subscription;
pub mod types;
