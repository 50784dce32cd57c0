// acsp-members-common: domain types and authorization rules shared by the ACSP membership service

pub mod context;
pub mod guard;
pub mod permissions;
pub mod types;
