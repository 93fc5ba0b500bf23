//! Authorization module - Policy Enforcement Point and decision clients
//!
//! This module implements externalized authorization:
//! - Subject extraction from access tokens
//! - Ordered action derivation from method and path
//! - Resource and context resolution per request
//! - Remote (OPA-compatible) and local policy decision points

pub mod action;
pub mod context;
mod decision;
mod local;
mod middleware;
mod principal;

pub use decision::{Decision, OpaClient, PolicyDecisionPoint, PolicyInput, FAIL_CLOSED_REASON};
pub use local::LocalPolicy;
pub use middleware::{enforce, is_public, PolicyContext, PUBLIC_PREFIXES};
pub use principal::{Role, Subject};

/// Well-known role names
pub mod roles {
    pub const ADMIN: &str = "ADMIN";
    pub const USER: &str = "USER";
    pub const GUEST: &str = "GUEST";
}
