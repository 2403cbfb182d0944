//! API Module
//!
//! HTTP handlers and routing for the cache diagnostics API.
//!
//! # Endpoints
//! - `PUT /set` - Store a JSON value
//! - `GET /get/:key` - Retrieve a fresh value by key
//! - `GET /inspect/:key` - Entry snapshot without side effects
//! - `DELETE /del/:key` - Remove a key
//! - `GET /keys` - List keys, most recently used first
//! - `POST /clear` - Clear everything or keys matching a pattern
//! - `POST /revalidate` - Notify every revalidation subscriber
//! - `POST /revalidate/:key` - Notify one key's subscribers
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
