// =====================================================================================
// SECURITY CELL - REQUEST RATE LIMITING
// =====================================================================================

pub mod identifier;
pub mod middleware;
pub mod models;
pub mod services;

pub use middleware::{rate_limit_middleware, RateLimitState};
pub use models::{DegradePolicy, RateLimitError, RateLimitPreset, RateLimitResult};
pub use services::RateLimiter;
