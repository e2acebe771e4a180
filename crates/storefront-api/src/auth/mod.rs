//! Session authentication and authorization
//!
//! - Token codec: signed session tokens with sealed claims
//! - Invalidation gate over a key/TTL cache
//! - Route guards for sessions and signed machine-to-machine requests
//! - Password hashing with Argon2id
//! - Account service for signup, login and sensitive state changes
//! - Delivery of password reset tokens

pub mod cache;
pub mod gate;
pub mod middleware;
pub mod notifier;
pub mod password;
pub mod seal;
pub mod service;
pub mod signature;
pub mod token;

pub use cache::{CacheError, InvalidationCache, MemoryInvalidationCache, RedisInvalidationCache};
pub use gate::InvalidationGate;
pub use middleware::{
    query_signature_guard, require_plan, require_store_connection, session_guard,
    webhook_signature_guard, AuthorizationContext, GuardRejection, SessionGuard,
};
pub use notifier::{NotifyError, ResetNotice, ResetNotifier, TracingResetNotifier};
pub use password::{
    hash_password_with_config, validate_password_strength, verify_password, PasswordConfig,
    PasswordError,
};
pub use seal::{FieldFailure, FieldSealer, SealAlgorithm, SealError, SealParams};
pub use service::{
    AuthService, ChangePasswordRequest, ConnectStoreRequest, ForgotPasswordRequest, LoginRequest,
    ProfileInfo, ResetPasswordRequest, SelectPlanRequest, SessionResponse, SignupRequest,
};
pub use signature::{is_authentic_signature, SignatureError, SignedPayload};
pub use token::{ClaimSet, IssuedToken, TokenCodec, TokenError, Unsealed};
