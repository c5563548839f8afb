//! Change detection

pub mod detector;

pub use detector::{ChangeDetector, ChangeSet, ClassificationError, PathChange, Removal, RemovedArtifact};
