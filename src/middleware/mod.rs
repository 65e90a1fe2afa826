pub mod rate_limit;
pub mod security;

pub use rate_limit::{client_identifier, rate_limit, RateLimitStatus, RateLimiter};
pub use security::{add_security_headers, cors_layer};
