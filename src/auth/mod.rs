//! Authentication and authorization module

pub mod cookies;
pub mod middleware;
pub mod phone;
pub mod rbac;
pub mod secret;
pub mod token;

pub use middleware::{resolve_auth_context, session_auth_middleware, AuthContext};
pub use phone::PhoneNormalizer;
pub use secret::constant_time_eq;
pub use token::{TokenCodec, TokenError};
