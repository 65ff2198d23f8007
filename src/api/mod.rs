//! API Module
//!
//! HTTP handlers and routing for the cache server REST API.
//!
//! # Endpoints
//! - `PUT /set/:key` - Store the request body (expiration in the query string)
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Delete a key
//! - `POST /refresh/:key` - Extend a sliding expiration without reading
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Probe the backing store

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
