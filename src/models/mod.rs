//! Request and Response models for the cache server API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP query strings and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::SetParams;
pub use responses::{
    DeleteResponse, HealthResponse, RefreshResponse, SetResponse, StatsResponse,
};
