pub mod broker;
pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod handler;

pub use entity::*;
pub use error::{ApiError, Classify, ErrorKind, ErrorResponse};
