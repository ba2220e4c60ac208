//! # trust-core — Trust and Identity Core
//!
//! JWT issuance and verification (RS256 + rotating JWKS), RBAC permission
//! resolution with wildcard algebra, ECDH P-256 device key exchange, and an
//! async tamper-evident audit pipeline for a multi-tenant, payment-adjacent
//! back office.
//!
//! ## Architecture
//!
//! - `keyring` — RSA signing keys and JWKS view (C1)
//! - `replay` — anti-replay `jti` set (C2)
//! - `jwt` — RS256 sign/verify engine (C3)
//! - `context` — request-scoped actor/request-id propagation (C4)
//! - `authz` — permission resolution and the Tower permission guard (C5, C6)
//! - `devices` — ECDH P-256 + HKDF device key exchange (C7)
//! - `audit` — structured, redacted, async audit trail (C8)
//! - `registry` — role and module definitional stores (C9)
//! - `identity` — user accounts and argon2id password hashing (C10)
//! - `rate_limit` — login/device-exchange brute-force throttling
//! - `metrics` — optional `metrics`-crate counters/histograms (feature: `metrics`)
//! - `core` — `TrustCore`, the façade wiring every component together
//!
//! ## Feature Flags
//!
//! - `default` — `middleware`
//! - `middleware` — the permission guard as a `tower::Layer`/`Service` pair
//! - `metrics` — counters/histograms for sign/verify/guard/device/audit paths
//! - `full` — `middleware` + `metrics`

pub mod api_key_validation;
pub mod audit;
pub mod authz;
pub mod config;
pub mod context;
pub mod core;
pub mod devices;
pub mod error;
pub mod event_bus;
pub mod identity;
pub mod jwt;
pub mod keyring;
pub mod metrics;
pub mod rate_limit;
pub mod registry;
pub mod replay;
pub mod secret_store;

#[doc(inline)]
pub use config::TrustConfig;
#[doc(inline)]
pub use context::{Actor, HttpMetadata, RequestContext, RequestContextValues};
#[doc(inline)]
pub use core::TrustCore;
#[doc(inline)]
pub use error::{Result, TrustError};
