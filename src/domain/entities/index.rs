use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::{DocumentId, Embedding, Passage};
use crate::domain::errors::DomainError;

/// Summary stored next to an artifact's vectors and passages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub document_id: DocumentId,
    /// Embedding schema the vectors were produced under.
    pub schema_version: String,
    /// Digest of the source content the artifact was built from.
    pub source_sha256: String,
    pub dimension: usize,
    pub passage_count: usize,
    pub built_at: DateTime<Utc>,
}

impl IndexManifest {
    pub fn is_current(&self, schema_version: &str, source_sha256: &str) -> bool {
        self.schema_version == schema_version && self.source_sha256 == source_sha256
    }
}

/// The derived, searchable representation of one source document.
///
/// `vectors[i]` is the embedding of `passages[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexArtifact {
    pub manifest: IndexManifest,
    pub vectors: Vec<Embedding>,
    pub passages: Vec<Passage>,
}

impl IndexArtifact {
    pub fn new(
        document_id: DocumentId,
        schema_version: impl Into<String>,
        source_sha256: impl Into<String>,
        vectors: Vec<Embedding>,
        passages: Vec<Passage>,
    ) -> Result<Self, DomainError> {
        let dimension = vectors.first().map(Embedding::dimension).unwrap_or(0);
        let artifact = Self {
            manifest: IndexManifest {
                document_id,
                schema_version: schema_version.into(),
                source_sha256: source_sha256.into(),
                dimension,
                passage_count: passages.len(),
                built_at: Utc::now(),
            },
            vectors,
            passages,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    /// Checks the position mapping and vector shapes.
    pub fn validate(&self) -> Result<(), DomainError> {
        let id = self.manifest.document_id;
        if self.vectors.len() != self.passages.len() {
            return Err(DomainError::corrupt(format!(
                "artifact {id}: {} vectors for {} passages",
                self.vectors.len(),
                self.passages.len()
            )));
        }
        if self.manifest.passage_count != self.passages.len() {
            return Err(DomainError::corrupt(format!(
                "artifact {id}: manifest lists {} passages, found {}",
                self.manifest.passage_count,
                self.passages.len()
            )));
        }
        if let Some(bad) = self
            .vectors
            .iter()
            .position(|v| v.dimension() != self.manifest.dimension || !v.is_well_formed())
        {
            return Err(DomainError::corrupt(format!(
                "artifact {id}: vector {bad} is malformed or has the wrong dimension"
            )));
        }
        Ok(())
    }

    pub fn document_id(&self) -> DocumentId {
        self.manifest.document_id
    }

    /// Pages referenced by at least one passage.
    pub fn pages_covered(&self) -> BTreeSet<usize> {
        self.passages.iter().map(|p| p.page).collect()
    }

    /// Brute-force cosine search, best first.
    pub fn search(&self, query: &Embedding, top_k: usize) -> Vec<ScoredPassage<'_>> {
        let mut scored: Vec<ScoredPassage<'_>> = self
            .vectors
            .iter()
            .zip(self.passages.iter())
            .map(|(vector, passage)| ScoredPassage {
                passage,
                score: query.cosine_similarity(vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.passage.chunk_index.cmp(&b.passage.chunk_index))
        });
        scored.truncate(top_k);
        scored
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScoredPassage<'a> {
    pub passage: &'a Passage,
    pub score: f32,
}

/// Where a document stands with respect to its derived index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IndexStatus {
    /// Document stored, no artifact published.
    Missing,
    /// Artifact exists but was built under another schema or from other content.
    Stale { schema_version: String },
    Current { passages: usize },
}

impl IndexStatus {
    pub fn of(manifest: Option<&IndexManifest>, schema_version: &str, source_sha256: &str) -> Self {
        match manifest {
            None => Self::Missing,
            Some(m) if m.is_current(schema_version, source_sha256) => Self::Current {
                passages: m.passage_count,
            },
            Some(m) => Self::Stale {
                schema_version: m.schema_version.clone(),
            },
        }
    }

    pub fn needs_build(&self) -> bool {
        !matches!(self, Self::Current { .. })
    }
}
