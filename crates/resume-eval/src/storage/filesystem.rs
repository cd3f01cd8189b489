use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::candidate::CandidateId;
use crate::error::StorageError;

/// Files kept per candidate under `<root>/candidates/<id>/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Resume,
    ExtractedText,
    Structured,
    Evaluation,
    Summary,
    ErrorLog,
}

impl Artifact {
    /// Produced by a run, as opposed to the uploaded resume.
    pub const DERIVED: [Artifact; 5] = [
        Artifact::ExtractedText,
        Artifact::Structured,
        Artifact::Evaluation,
        Artifact::Summary,
        Artifact::ErrorLog,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Artifact::Resume => "resume.pdf",
            Artifact::ExtractedText => "extracted_text.txt",
            Artifact::Structured => "structured.json",
            Artifact::Evaluation => "evaluation.json",
            Artifact::Summary => "summary.txt",
            Artifact::ErrorLog => "error.log",
        }
    }
}

/// Per-candidate artifact directory tree.
///
/// Every write lands in a temp file in the same directory and is renamed
/// into place, so readers see either the old file or the new one.
#[derive(Debug, Clone)]
pub struct CandidateStorage {
    root: PathBuf,
}

impl CandidateStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn candidate_dir(&self, id: CandidateId) -> PathBuf {
        self.root.join("candidates").join(id.to_string())
    }

    pub fn artifact_path(&self, id: CandidateId, artifact: Artifact) -> PathBuf {
        self.candidate_dir(id).join(artifact.file_name())
    }

    /// Stores the uploaded PDF and returns its path.
    pub fn save_resume(&self, id: CandidateId, content: &[u8]) -> Result<PathBuf, StorageError> {
        self.write_bytes(id, Artifact::Resume, content)
    }

    pub fn read_resume(&self, id: CandidateId) -> Result<Vec<u8>, StorageError> {
        let path = self.artifact_path(id, Artifact::Resume);
        std::fs::read(&path).map_err(|e| StorageError::ReadFile { path, source: e })
    }

    pub fn write_text(
        &self,
        id: CandidateId,
        artifact: Artifact,
        text: &str,
    ) -> Result<PathBuf, StorageError> {
        self.write_bytes(id, artifact, text.as_bytes())
    }

    pub fn write_json<T: Serialize>(
        &self,
        id: CandidateId,
        artifact: Artifact,
        value: &T,
    ) -> Result<PathBuf, StorageError> {
        let json = serde_json::to_vec_pretty(value)?;
        self.write_bytes(id, artifact, &json)
    }

    pub fn append_text(
        &self,
        id: CandidateId,
        artifact: Artifact,
        text: &str,
    ) -> Result<PathBuf, StorageError> {
        let dir = self.candidate_dir(id);
        ensure_directory(&dir)?;
        let path = dir.join(artifact.file_name());
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        file.write_all(text.as_bytes())
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        Ok(path)
    }

    /// `None` when the artifact has not been written.
    pub fn read_text(
        &self,
        id: CandidateId,
        artifact: Artifact,
    ) -> Result<Option<String>, StorageError> {
        let path = self.artifact_path(id, artifact);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadFile { path, source: e }),
        }
    }

    /// Removes everything a previous run produced, keeping the resume.
    pub fn clear_derived(&self, id: CandidateId) -> Result<(), StorageError> {
        for artifact in Artifact::DERIVED {
            let path = self.artifact_path(id, artifact);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::RemoveFile { path, source: e }),
            }
        }
        Ok(())
    }

    fn write_bytes(
        &self,
        id: CandidateId,
        artifact: Artifact,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self.candidate_dir(id);
        ensure_directory(&dir)?;
        let path = dir.join(artifact.file_name());

        let write_err = |source: std::io::Error| StorageError::WriteFile {
            path: path.clone(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
        tmp.write_all(content).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;

        Ok(path)
    }
}

fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}
