pub mod filesystem;

pub use filesystem::{Artifact, CandidateStorage};
