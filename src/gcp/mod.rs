//! GCP API interaction module
//!
//! This module provides the transport the binding engine talks through:
//! authentication, an HTTP client, and per-service REST handles.
//!
//! # Module Structure
//!
//! - [`api`] - The [`api::ServiceApi`] / [`api::ApiConnector`] boundary
//! - [`auth`] - GCP authentication using Application Default Credentials
//! - [`client`] - REST implementation of the boundary
//! - [`http`] - HTTP utilities and [`http::TransportError`]
//!
//! # Example
//!
//! ```ignore
//! use gcp_bindings::gcp::{auth::GcpCredentials, client::RestConnector};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let credentials = GcpCredentials::new().await?;
//!     let connector = RestConnector::new(credentials, "gcp-bindings")?;
//!     let bigquery = connector.connect("bigquery", "v2").await?;
//!     let dataset = bigquery.get_resource("projects/p1/datasets/d1").await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod client;
pub mod http;
