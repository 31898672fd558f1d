//! # HTTP Gateway
//!
//! The axum surface of Cartvoice: preference extraction, voice commands,
//! saved products, the alert webhook and a health check. Requests are
//! authenticated with bearer session tokens and every failure is rendered as
//! `{success: false, error}` with a status derived from the error variant.

mod auth;
mod server;

pub use auth::SessionAuth;
pub use server::{ApiError, AppState, SharedState, router as gateway_router, run as run_gateway};
