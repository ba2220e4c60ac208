//! JWT claim shape (§3 `JwtClaims`)

use serde::{Deserialize, Serialize};

/// The claims carried by every trust-core token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject — the actor's invariable id.
    pub sub: String,
    /// Issuer, must equal `config.jwt_issuer`.
    pub iss: String,
    /// Audience, must equal `config.jwt_audience`.
    pub aud: String,
    /// Space-separated scope set.
    #[serde(default)]
    pub scope: String,
    /// Per-token unique identifier, used for replay detection.
    pub jti: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
    /// `"refresh"` opts this token out of anti-replay; absent for access tokens.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub token_type: Option<String>,
}

impl JwtClaims {
    /// `scope` split into its individual entries.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scope.split_whitespace().collect()
    }

    /// True when `type == "refresh"`.
    #[must_use]
    pub fn is_refresh(&self) -> bool {
        self.token_type.as_deref() == Some("refresh")
    }
}
