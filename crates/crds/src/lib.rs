//! Meshlink CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Meshlink controllers.

pub mod labels;
pub mod service_export;
pub mod service_import;

pub use service_export::*;
pub use service_import::*;
