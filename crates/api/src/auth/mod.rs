//! Authentication for EduHub API routes

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtError, JwtManager};
pub use middleware::{
    require_auth, require_build_token, AuthState, AuthUser, PlatformRole, BUILD_TOKEN_HEADER,
};
