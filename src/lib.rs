//! Session authorization with a HAL / HAL-FORMS HTTP surface.
//!
//! Sessions are bound to the client context they were opened from: the
//! stored signature is derived from a client-held session key, the client's
//! IP address and user agent, and a server salt. Every response is a HAL
//! resource whose `_templates` advertise exactly the actions the caller may
//! take next; GET responses are served through an ETag cache.

pub mod cache;
pub mod client;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod hal;
pub mod handlers;
pub mod middleware_layer;
pub mod models;
pub mod negotiation;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod state;
pub mod validation;
pub mod verifier;
