#![allow(clippy::result_large_err)]

pub mod app;
pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod handle;
pub mod logging;
pub mod mapping;
pub mod protocol;
pub mod status;
pub mod telemetry;
pub mod transport;
