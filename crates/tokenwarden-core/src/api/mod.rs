//! REST client module for the authentication endpoints.
//!
//! This module provides the `AuthBackend` seam, its reqwest implementation
//! `HttpAuthBackend`, and normalization of the response envelopes the
//! backend is known to answer with.

pub mod client;
pub mod envelope;
pub mod error;

pub use client::{AuthBackend, HttpAuthBackend, LoginRequest};
pub use envelope::{IdentityShape, LoginGrant, UserClaims};
pub use error::ApiError;
