pub mod api;
pub mod commands;
pub mod domain;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod repository;
pub mod schema;
