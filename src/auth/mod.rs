//! Authentication Module
//! Mission: Identify callers by bearer token and carry their role to the service

pub mod jwt;
pub mod middleware;
pub mod models;

pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
pub use models::{Claims, Principal, Role};
