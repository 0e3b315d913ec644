//! OIDC login gateway
//!
//! This library wires an embedded OAuth 2.0 / OpenID Connect provider engine
//! (oxide-auth) behind a small authentication gateway: a single-page login
//! application, an interaction controller that resolves pending login
//! prompts, an account resolver seam, and a couple of convenience endpoints.

pub mod config;
pub mod gateway;
