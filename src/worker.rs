use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use rag_api::application::DocumentService;
use rag_api::domain::{onace, ContentType, DocumentId, DocumentMetadata, DomainError};
use rag_api::infrastructure::{build_services, telemetry, AppConfig};

#[derive(Debug, Parser)]
#[command(name = "indexer", version, about = "Maintain stored documents and their indexes")]
struct Cli {
    /// Parallel index builds; defaults to `indexing.concurrency`.
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Repair the store and build every missing or stale index.
    Reconcile,
    /// Store every PDF, XLSX, text and markdown file in a directory and index it.
    Ingest(IngestArgs),
    /// Delete every stored document, then ingest a directory.
    Replace(IngestArgs),
}

#[derive(Debug, Args)]
struct IngestArgs {
    dir: PathBuf,
    /// Comma separated ÖNACE codes for files the codes file does not list.
    #[arg(long, default_value = "")]
    industry_codes: String,
    #[arg(long)]
    primary: bool,
    #[arg(long)]
    source: Option<String>,
    /// YAML file mapping file stems to codes and a primary flag.
    #[arg(long)]
    codes_file: Option<PathBuf>,
    /// Files whose name contains this text (any case) are primary and ingested first.
    #[arg(long)]
    primary_marker: Option<String>,
}

/// Per-file overrides, keyed by file name without extension.
///
/// ```yaml
/// documents:
///   EU_2022_2464_CSRD: "0"
///   EU_2006_1907_REACH: "C"
///   EU_2025_1710_VSME: { industry_codes: "0", primary: true }
/// ```
#[derive(Debug, Default, Deserialize)]
struct CodesFile {
    #[serde(default)]
    documents: HashMap<String, FileEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum FileEntry {
    Codes(String),
    Detailed {
        #[serde(default)]
        industry_codes: Option<String>,
        #[serde(default)]
        primary: Option<bool>,
        #[serde(default)]
        source: Option<String>,
    },
}

/// Decides the metadata of each ingested file.
#[derive(Debug)]
struct MetadataPlan {
    defaults: DocumentMetadata,
    files: HashMap<String, FileEntry>,
    primary_marker: Option<String>,
}

impl MetadataPlan {
    fn from_args(args: &IngestArgs) -> anyhow::Result<Self> {
        let codes = match &args.codes_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read {}", path.display()))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("cannot parse {}", path.display()))?
            }
            None => CodesFile::default(),
        };
        Ok(Self {
            defaults: DocumentMetadata {
                industry_codes: onace::parse_codes(&args.industry_codes),
                primary: args.primary,
                source: args.source.clone(),
            },
            files: codes.documents,
            primary_marker: args
                .primary_marker
                .as_deref()
                .map(str::to_lowercase)
                .filter(|m| !m.is_empty()),
        })
    }

    fn metadata_for(&self, path: &Path) -> DocumentMetadata {
        let mut metadata = self.defaults.clone();
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();

        match self.files.get(stem) {
            Some(FileEntry::Codes(codes)) => metadata.industry_codes = onace::parse_codes(codes),
            Some(FileEntry::Detailed {
                industry_codes,
                primary,
                source,
            }) => {
                if let Some(codes) = industry_codes {
                    metadata.industry_codes = onace::parse_codes(codes);
                }
                if let Some(primary) = primary {
                    metadata.primary = *primary;
                }
                if source.is_some() {
                    metadata.source = source.clone();
                }
            }
            None => {}
        }

        if self.is_marked(path) {
            metadata.primary = true;
        }
        metadata
    }

    fn is_marked(&self, path: &Path) -> bool {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        self.primary_marker
            .as_deref()
            .is_some_and(|marker| name.to_lowercase().contains(marker))
    }

    /// Primary files first, otherwise in name order.
    fn order(&self, mut files: Vec<PathBuf>) -> Vec<PathBuf> {
        files.sort_by_key(|path| !self.metadata_for(path).primary);
        files
    }
}

#[derive(Debug, Default)]
struct Summary {
    stored: usize,
    rejected: usize,
    built: usize,
    failed: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init("indexer=info,rag_api=info");

    let cli = Cli::parse();
    let config = AppConfig::load().context("failed to load configuration")?;
    let concurrency = cli
        .concurrency
        .unwrap_or(config.config.indexing.concurrency)
        .max(1);
    let documents = build_services(&config)?.documents;

    let mut summary = Summary::default();
    match cli.command {
        Command::Reconcile => {
            let pending = documents.reconcile().await?;
            build_all(&documents, pending, concurrency, &mut summary).await;
        }
        Command::Ingest(args) => {
            let ids = ingest(&documents, &args, &mut summary).await?;
            build_all(&documents, ids, concurrency, &mut summary).await;
        }
        Command::Replace(args) => {
            let removed = remove_all(&documents).await?;
            info!(removed, "existing documents deleted");
            let ids = ingest(&documents, &args, &mut summary).await?;
            build_all(&documents, ids, concurrency, &mut summary).await;
        }
    }

    info!(
        stored = summary.stored,
        rejected = summary.rejected,
        built = summary.built,
        failed = summary.failed,
        "indexer finished"
    );
    if summary.failed > 0 || summary.rejected > 0 {
        anyhow::bail!(
            "{} file(s) rejected, {} index build(s) failed",
            summary.rejected,
            summary.failed
        );
    }
    Ok(())
}

fn supported_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("cannot read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .and_then(ContentType::from_filename)
                .is_some()
        })
        .collect();
    files.sort();
    Ok(files)
}

async fn ingest(
    documents: &DocumentService,
    args: &IngestArgs,
    summary: &mut Summary,
) -> anyhow::Result<Vec<DocumentId>> {
    let plan = MetadataPlan::from_args(args)?;

    let mut ids = Vec::new();
    for path in plan.order(supported_files(&args.dir)?) {
        let metadata = plan.metadata_for(&path);
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let content = tokio::fs::read(&path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;

        match documents
            .put_document(content, &filename, None, metadata)
            .await
        {
            Ok(record) => {
                info!(
                    document_id = %record.id,
                    filename,
                    primary = record.metadata.primary,
                    "stored"
                );
                summary.stored += 1;
                ids.push(record.id);
            }
            Err(e @ DomainError::InvalidInput(_)) => {
                tracing::warn!(filename, error = %e, "file rejected");
                summary.rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(ids)
}

async fn remove_all(documents: &DocumentService) -> anyhow::Result<usize> {
    let mut removed = 0;
    for record in documents.list_documents().await? {
        match documents.delete(record.id).await {
            Ok(()) => removed += 1,
            Err(DomainError::DocumentNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(removed)
}

async fn build_all(
    documents: &Arc<DocumentService>,
    ids: Vec<DocumentId>,
    concurrency: usize,
    summary: &mut Summary,
) {
    info!(documents = ids.len(), concurrency, "building indexes");
    let results: Vec<(DocumentId, Result<_, DomainError>)> = stream::iter(ids)
        .map(|id| {
            let documents = documents.clone();
            async move { (id, documents.build_index(id).await) }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    for (id, result) in results {
        match result {
            Ok(manifest) => {
                info!(document_id = %id, passages = manifest.passage_count, "index built");
                summary.built += 1;
            }
            Err(DomainError::AlreadyIndexed(_)) => {}
            Err(e) => {
                tracing::error!(document_id = %id, error = %e, "index build failed");
                summary.failed += 1;
            }
        }
    }
}
