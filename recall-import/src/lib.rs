//! recall-import - export-format detection, extraction, and import
//!
//! The import pipeline: a payload is matched against the format registry by
//! schema shape, gated on capabilities, extracted into normalized messages,
//! deduplicated by content hash, and written together with its embedding
//! jobs in one transaction per conversation (outbox pattern).

pub mod error;
pub mod format;
pub mod license;
pub mod result;
pub mod service;

pub use error::ImportError;
pub use format::{detect_format, registered_formats, Format};
pub use license::{AllowAll, CapabilityOracle, LicenseManager, LicenseStatus};
pub use result::ImportResult;
pub use service::ImportService;
