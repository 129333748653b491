pub mod gateway;
pub mod metrics;
pub mod rest;
