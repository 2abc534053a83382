//! TORE Incremental - Change Detection and Incremental Reprocessing
//!
//! [`ChangeDetector`] hashes documents and pages and classifies differences;
//! [`IncrementalProcessor`] uses it to reprocess only what changed, caching
//! results through a shared [`tore_cache::MultiLevelCache`].

pub mod change_detector;
pub mod processor;

pub use change_detector::{hash_page, ChangeDetector};
pub use processor::{DocumentPipeline, IncrementalProcessor};
