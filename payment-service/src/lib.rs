pub mod api;
pub mod commands;
pub mod domain;
pub mod handlers;
