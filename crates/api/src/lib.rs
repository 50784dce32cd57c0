// acsp-members-api: authorization, lifecycle and HTTP surface of the ACSP membership service

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod etag;
pub mod listing;
pub mod outbox;
pub mod store;
pub mod validation;
