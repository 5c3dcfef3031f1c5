//! Authentication for realtime connections

pub mod jwt;

pub use jwt::{Claims, JwtError, JwtManager};
