pub mod adapters;
pub mod config;
pub mod db;
pub mod error;
pub mod htlc;
pub mod monitor;
pub mod ports;
pub mod services;

pub use config::Config;
pub use error::AppError;
