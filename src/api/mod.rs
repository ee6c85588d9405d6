//! API Module
//!
//! HTTP handlers and routing for the product cache server.
//!
//! # Endpoints
//! - `GET /products/:id` - Read a product through the cache
//! - `DELETE /products/:id` - Invalidate one product
//! - `DELETE /products` - Invalidate every product
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
