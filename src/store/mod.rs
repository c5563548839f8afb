//! Knowledge artifact storage

pub mod artifact;
pub mod layout;

pub use artifact::{
    backup_artifact, read_artifact, read_header, remove_artifact, write_artifact,
    write_json_atomic, Artifact, ArtifactHeader,
};
pub use layout::{ArtifactLocation, KnowledgeLayout};
