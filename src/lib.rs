pub mod application;
pub mod composition;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
