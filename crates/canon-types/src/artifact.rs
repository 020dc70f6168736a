//! Candidate artifacts and the metadata scope resolution runs against

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What kind of thing is being evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Document,
    Code,
    Commit,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Document => "document",
            ArtifactKind::Code => "code",
            ArtifactKind::Commit => "commit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "document" | "doc" => Some(ArtifactKind::Document),
            "code" => Some(ArtifactKind::Code),
            "commit" => Some(ArtifactKind::Commit),
            _ => None,
        }
    }
}

/// Confidentiality tier of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessLevel {
    Public,
    Internal,
    Restricted,
    Confidential,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Public => "public",
            AccessLevel::Internal => "internal",
            AccessLevel::Restricted => "restricted",
            AccessLevel::Confidential => "confidential",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "public" => Some(AccessLevel::Public),
            "internal" => Some(AccessLevel::Internal),
            "restricted" => Some(AccessLevel::Restricted),
            "confidential" => Some(AccessLevel::Confidential),
            _ => None,
        }
    }
}

/// Scope dimensions of an artifact
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArtifactMetadata {
    pub document_type: Option<String>,
    pub persona: Option<String>,
    pub jurisdiction: Option<String>,
    pub access_level: Option<AccessLevel>,
    /// Set from the artifact's kind when metadata is attached to an `Artifact`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<ArtifactKind>,
}

impl ArtifactMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document_type(mut self, value: impl Into<String>) -> Self {
        self.document_type = Some(value.into());
        self
    }

    pub fn persona(mut self, value: impl Into<String>) -> Self {
        self.persona = Some(value.into());
        self
    }

    pub fn jurisdiction(mut self, value: impl Into<String>) -> Self {
        self.jurisdiction = Some(value.into());
        self
    }

    pub fn access_level(mut self, value: AccessLevel) -> Self {
        self.access_level = Some(value);
        self
    }

    pub fn artifact_type(mut self, value: ArtifactKind) -> Self {
        self.artifact_type = Some(value);
        self
    }
}

/// A document, code change or commit under evaluation. Lives for one evaluation only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub content: String,
    pub kind: ArtifactKind,
    pub metadata: ArtifactMetadata,
    /// Where the content was read from; relative references resolve against its directory
    pub origin: Option<PathBuf>,
}

impl Artifact {
    pub fn new(content: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            content: content.into(),
            kind,
            metadata: ArtifactMetadata::new().artifact_type(kind),
            origin: None,
        }
    }

    pub fn document(content: impl Into<String>) -> Self {
        Self::new(content, ArtifactKind::Document)
    }

    /// Attach scope metadata. The artifact's own kind always wins over any
    /// `artifact_type` in `metadata`.
    pub fn with_metadata(mut self, metadata: ArtifactMetadata) -> Self {
        self.metadata = metadata.artifact_type(self.kind);
        self
    }

    pub fn with_origin(mut self, origin: impl Into<PathBuf>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// SHA-256 over kind, content and metadata. The origin path is not part of identity.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.content.as_bytes());
        hasher.update([0u8]);
        hasher.update(serde_json::to_vec(&self.metadata).unwrap_or_default());
        hex::encode(hasher.finalize())
    }
}
