//! Data Transfer Objects for REST request/response serialization.

pub mod ssh_dto;

pub use ssh_dto::*;
