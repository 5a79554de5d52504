//! gcp-bindings
//!
//! Grants IAM roles on Google Cloud resources in bulk. Each request names a
//! principal, a role and a fully-qualified asset name; the engine parses the
//! name, reads the resource's current access policy, merges the grant in and
//! writes the policy back only when it changed.
//!
//! - [`asset`] - Asset-type registry and asset-name parser
//! - [`policy`] - Policy shapes, merging, and per-kind fetch/commit handlers
//! - [`engine`] - The single-request `add_binding` flow
//! - [`batch`] - CSV input and the sequential batch runner
//! - [`gcp`] - Credentials and REST transport
//! - [`config`] - Engine configuration

pub mod asset;
pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod gcp;
pub mod policy;

pub use config::VERSION;
