pub mod auth;
pub mod config;
pub mod error;
pub mod flatfile;
pub mod server;
pub mod transfer;
pub mod warehouse;
