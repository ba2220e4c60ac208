//! Trust core error taxonomy
//!
//! One `thiserror`-derived enum covering every failure surfaced by the trust
//! and identity core. Variants map 1:1 onto the error codes the HTTP layer
//! is expected to emit; callers that need the wire-stable string use
//! [`TrustError::code`], callers that need an HTTP status use
//! [`TrustError::http_status`].

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TrustError>;

/// Every error the trust core can produce.
///
/// Fail-closed by construction: there is no variant that represents "allow
/// with caveats". Anything ambiguous becomes one of these and the caller
/// denies.
#[derive(Debug, Error)]
pub enum TrustError {
    /// No active signing key is available (C1).
    #[error("no active signing key")]
    NoActiveKey,

    /// Signing a JWT failed after an active key was found.
    #[error("jwt signing failed: {0}")]
    JwtSignFailed(String),

    /// A JWT could not be decoded (malformed header/payload).
    #[error("jwt decode failed: {0}")]
    JwtDecodeFailed(String),

    /// A JWT failed signature, claim, or replay validation.
    #[error("jwt invalid: {0}")]
    JwtInvalid(String),

    /// The anti-replay set could not register a freshly minted `jti`.
    #[error("jti registration failed: {0}")]
    JtiRegistrationFailed(String),

    /// A `jti` was presented a second time within its validity window.
    #[error("replay detected for jti {0}")]
    ReplayDetected(String),

    /// Permission resolution could not complete (fails closed to empty).
    #[error("authorization resolution failed: {0}")]
    AuthzResolveFailed(String),

    /// The permission check itself raised (treated as deny).
    #[error("authorization check failed: {0}")]
    AuthzCheckFailed(String),

    /// Actor lacked a required permission.
    #[error("permission denied: missing {0}")]
    PermissionDenied(String),

    /// A role lookup by id or key came back empty.
    #[error("role not found: {0}")]
    RoleNotFound(String),

    /// Attempted to disable a system role.
    #[error("cannot disable system role {0}")]
    CannotDisableSystemRole(String),

    /// Attempted to hard-delete a system role.
    #[error("cannot delete system role {0}")]
    CannotDeleteSystemRole(String),

    /// Attempted to hard-delete a role that is not disabled.
    #[error("role {0} must be disabled before deletion")]
    RoleMustBeDisabled(String),

    /// A module lookup by id or indicator came back empty.
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    /// Attempted to disable a system module.
    #[error("cannot disable system module {0}")]
    CannotDisableSystemModule(String),

    /// A user lookup came back empty.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The requested primary/additional role combination violates §3.
    #[error("invalid role combination: {0}")]
    InvalidRoleCombination(String),

    /// A user already has `MAX_DEVICES_PER_USER` active devices.
    #[error("device limit reached")]
    DeviceLimitReached,

    /// The device's ECDH public key failed format validation.
    #[error("invalid device key: {0}")]
    InvalidDeviceKey(String),

    /// An audit event could not be persisted (never propagated to the
    /// request path; kept for internal logging and tests).
    #[error("audit log failed: {0}")]
    AuditLogFailed(String),

    /// Failure to read/write the external secret store.
    #[error("secret store error: {0}")]
    SecretStore(String),

    /// Failure to deliver an event to the external event bus.
    #[error("event bus error: {0}")]
    EventBus(String),

    /// A caller-supplied argument failed validation (400-class).
    #[error("validation error: {0}")]
    Validation(String),
}

impl TrustError {
    /// The stable wire `code` string for this error, per spec.md §7.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoActiveKey => "NO_ACTIVE_KEY",
            Self::JwtSignFailed(_) => "JWT_SIGN_FAILED",
            Self::JwtDecodeFailed(_) => "JWT_DECODE_FAILED",
            Self::JwtInvalid(_) => "JWT_INVALID",
            Self::JtiRegistrationFailed(_) => "JTI_REGISTRATION_FAILED",
            Self::ReplayDetected(_) => "REPLAY_DETECTED",
            Self::AuthzResolveFailed(_) => "AUTHZ_RESOLVE_FAILED",
            Self::AuthzCheckFailed(_) => "AUTHZ_CHECK_FAILED",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::RoleNotFound(_) => "ROLE_NOT_FOUND",
            Self::CannotDisableSystemRole(_) => "CANNOT_DISABLE_SYSTEM_ROLE",
            Self::CannotDeleteSystemRole(_) => "CANNOT_DELETE_SYSTEM_ROLE",
            Self::RoleMustBeDisabled(_) => "ROLE_MUST_BE_DISABLED",
            Self::ModuleNotFound(_) => "MODULE_NOT_FOUND",
            Self::CannotDisableSystemModule(_) => "CANNOT_DISABLE_SYSTEM_MODULE",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::InvalidRoleCombination(_) => "INVALID_ROLE_COMBINATION",
            Self::DeviceLimitReached => "DEVICE_LIMIT_REACHED",
            Self::InvalidDeviceKey(_) => "INVALID_DEVICE_KEY",
            Self::AuditLogFailed(_) => "AUDIT_LOG_FAILED",
            Self::SecretStore(_) => "SECRET_STORE_ERROR",
            Self::EventBus(_) => "EVENT_BUS_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }

    /// The HTTP status family this error surfaces as, per §7's propagation
    /// policy. System errors never leak an internal stack; only `code()`
    /// and `message` cross the boundary.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::JwtInvalid(_)
            | Self::JwtDecodeFailed(_)
            | Self::ReplayDetected(_)
            | Self::NoActiveKey => 401,

            Self::PermissionDenied(_)
            | Self::CannotDisableSystemRole(_)
            | Self::CannotDeleteSystemRole(_)
            | Self::CannotDisableSystemModule(_) => 403,

            Self::RoleNotFound(_) | Self::ModuleNotFound(_) | Self::UserNotFound(_) => 404,

            Self::InvalidRoleCombination(_)
            | Self::InvalidDeviceKey(_)
            | Self::RoleMustBeDisabled(_)
            | Self::Validation(_) => 400,

            Self::DeviceLimitReached => 409,

            Self::JwtSignFailed(_)
            | Self::JtiRegistrationFailed(_)
            | Self::AuthzResolveFailed(_)
            | Self::AuthzCheckFailed(_)
            | Self::AuditLogFailed(_)
            | Self::SecretStore(_)
            | Self::EventBus(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(TrustError::NoActiveKey.code(), "NO_ACTIVE_KEY");
        assert_eq!(
            TrustError::PermissionDenied("roles.delete".into()).code(),
            "PERMISSION_DENIED"
        );
    }

    #[test]
    fn auth_failures_are_401() {
        assert_eq!(TrustError::NoActiveKey.http_status(), 401);
        assert_eq!(TrustError::JwtInvalid("bad sig".into()).http_status(), 401);
    }

    #[test]
    fn denial_is_403() {
        assert_eq!(
            TrustError::PermissionDenied("x".into()).http_status(),
            403
        );
    }

    #[test]
    fn device_cap_is_409() {
        assert_eq!(TrustError::DeviceLimitReached.http_status(), 409);
    }
}
