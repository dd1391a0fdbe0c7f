//! Shared types and collaborator interfaces

pub mod traits;
pub mod types;
