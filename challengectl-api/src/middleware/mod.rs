pub mod auth_extract;
pub mod rate_limit;

pub use auth_extract::{check_csrf, AgentAuth, OperatorAuth, PasswordVerifiedAuth, ProvisioningAuth};
pub use rate_limit::{Bucket, RateLimitedError, RateLimiters};
