//! HTTP middleware.

pub mod audit;
pub mod auth;
pub mod rate_limit;

pub use auth::{AuthContext, CurrentUser};
