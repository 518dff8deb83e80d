//! Provenance Archives
//!
//! Portable export of provenance graph closures and idempotent merge of
//! archives into a target store.
//!
//! # Core Concepts
//!
//! - [`export`]: closure traversal, consistency validation and collection of
//!   auxiliary entities into an [`Archive`]
//! - [`import_archive`]: transactional, uuid-keyed merge that can be
//!   replayed any number of times
//! - [`ExtrasMode`] / [`CommentMode`]: merge policies for mutable side data
//! - [`Archive::write_folder`] / [`Archive::read_folder`]: on-disk format
//!   with content-hashed payloads
//!
//! # Example
//!
//! ```rust,ignore
//! use prov_archive::{export, import_archive, ExportConfig, ExportRequest, ImportConfig};
//!
//! let (archive, _) = export(&source, &ExportRequest::nodes([output]), &ExportConfig::default())?;
//! let report = import_archive(&mut target, &archive, &ImportConfig::default())?;
//! println!("{} nodes created", report.created(EntityKind::Node));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
mod config;
mod consistency;
mod error;
mod export;
mod format;
mod hash;
mod lookup;
mod merge;

// Re-exports
pub use config::{ExportConfig, ImportConfig, DEFAULT_BATCH_SIZE};
pub use consistency::{check_licenses, check_sealed, LicenseCheck, LicensePolicy};
pub use error::ArchiveError;
pub use export::{export, export_to_folder, ExportReport, ExportRequest};
pub use format::{
    check_version, Archive, ExportParameters, LinkRecord, Manifest, ARCHIVE_FORMAT_VERSION,
    DATA_FILE, METADATA_FILE, REPO_DIR, SUPPORTED_VERSIONS,
};
pub use hash::{ContentHash, HashError};
pub use merge::{
    import_archive, import_from_folder, CommentMode, ConflictPolicy, CreatePolicy, ExtrasMode,
    ImportReport, KeepPolicy, NewExtrasMode, Renamed,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
