//! Asset types
//!
//! - [`registry`] - Asset type descriptors, built-ins, and config documents
//! - [`parser`] - Asset name to resource coordinates

mod parser;
mod registry;

pub use parser::{parse, ResourceCoordinates};
pub use registry::*;
