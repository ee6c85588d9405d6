//! Response models for the product cache API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing HTTP response bodies.

pub mod responses;

// Re-export commonly used types
pub use responses::{
    ErrorResponse, GetResponse, HealthResponse, InvalidateResponse, StatsResponse,
};
