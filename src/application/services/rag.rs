use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use crate::application::services::document::DocumentService;
use crate::domain::{
    format_history, links, onace,
    ports::{EmbeddingService, LlmService},
    DocumentId, DomainError, IndexArtifact, Message,
};

#[derive(Debug, Clone)]
pub struct RagOptions {
    pub top_k: usize,
    /// Alternative phrasings requested from the LLM per question; 0 disables expansion.
    pub query_expansions: usize,
    pub system_prompt: String,
    pub expansion_prompt: String,
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalRequest {
    pub query: String,
    pub top_k: Option<usize>,
    /// ÖNACE section of the asking user; `None` searches every document.
    pub industry_code: Option<String>,
    /// Free-form context about the asking user, appended to the system prompt.
    pub meta_information: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedPassage {
    pub document_id: DocumentId,
    pub filename: String,
    pub primary: bool,
    pub page: usize,
    pub chunk_index: usize,
    pub score: f32,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Retrieval {
    pub passages: Vec<RetrievedPassage>,
    /// Relevant documents whose index is missing or stale; they were not searched.
    pub pending_documents: Vec<DocumentId>,
    /// LLM-generated phrasings searched alongside the original query.
    pub expanded_queries: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
    pub passages: Vec<RetrievedPassage>,
    pub pending_documents: Vec<DocumentId>,
    pub expanded_queries: Vec<String>,
    pub relevant_links: Vec<String>,
}

struct Searchable {
    filename: String,
    primary: bool,
    artifact: IndexArtifact,
}

/// Similarity search over current indexes plus answer generation.
pub struct RagService {
    documents: Arc<DocumentService>,
    embedding: Arc<dyn EmbeddingService>,
    llm: Option<Arc<dyn LlmService>>,
    options: RagOptions,
}

impl RagService {
    pub fn new(
        documents: Arc<DocumentService>,
        embedding: Arc<dyn EmbeddingService>,
        llm: Option<Arc<dyn LlmService>>,
        options: RagOptions,
    ) -> Self {
        Self {
            documents,
            embedding,
            llm,
            options,
        }
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    pub fn llm_model(&self) -> Option<&str> {
        self.llm.as_deref().map(|llm| llm.model())
    }

    /// Searches documents with a current index only.
    ///
    /// Fails with `IndexNotReady` when relevant documents exist but none is searchable
    /// yet; an empty collection yields an empty result.
    #[instrument(
        skip(self, request),
        fields(top_k = tracing::field::Empty, industry_code = ?request.industry_code)
    )]
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<Retrieval, DomainError> {
        let top_k = request.top_k.unwrap_or(self.options.top_k).max(1);
        tracing::Span::current().record("top_k", top_k);

        let (searchable, pending_documents) = self.searchable(request.industry_code.as_deref()).await?;
        if searchable.is_empty() {
            if !pending_documents.is_empty() {
                return Err(DomainError::IndexNotReady {
                    pending: pending_documents.len(),
                });
            }
            return Ok(Retrieval::default());
        }

        let expanded_queries = self.expand_query(&request.query).await;
        let mut queries = vec![request.query.clone()];
        queries.extend(expanded_queries.iter().cloned());
        let texts: Vec<&str> = queries.iter().map(String::as_str).collect();
        let vectors = self.embedding.embed_batch(&texts).await?;

        // Deduplicated by passage text, keeping the best score.
        let mut candidates: HashMap<String, RetrievedPassage> = HashMap::new();
        for vector in &vectors {
            for doc in &searchable {
                for hit in doc.artifact.search(vector, top_k) {
                    let key = hit.passage.text.trim().to_string();
                    let better = candidates.get(&key).is_none_or(|c| hit.score > c.score);
                    if better {
                        candidates.insert(
                            key,
                            RetrievedPassage {
                                document_id: doc.artifact.document_id(),
                                filename: doc.filename.clone(),
                                primary: doc.primary,
                                page: hit.passage.page,
                                chunk_index: hit.passage.chunk_index,
                                score: hit.score,
                                text: hit.passage.text.clone(),
                            },
                        );
                    }
                }
            }
        }

        let passages = allocate(candidates.into_values().collect(), top_k);
        tracing::debug!(
            queries = queries.len(),
            documents = searchable.len(),
            passages = passages.len(),
            pending = pending_documents.len(),
            "retrieval finished"
        );
        Ok(Retrieval {
            passages,
            pending_documents,
            expanded_queries,
        })
    }

    #[instrument(skip(self, request))]
    pub async fn answer(&self, request: &RetrievalRequest) -> Result<Answer, DomainError> {
        self.respond(request, &[]).await
    }

    #[instrument(skip(self, request, history), fields(turns = history.len()))]
    pub async fn chat(
        &self,
        request: &RetrievalRequest,
        history: &[Message],
    ) -> Result<Answer, DomainError> {
        self.respond(request, history).await
    }

    async fn respond(
        &self,
        request: &RetrievalRequest,
        history: &[Message],
    ) -> Result<Answer, DomainError> {
        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| DomainError::external("no language model is configured"))?;
        if request.query.trim().is_empty() {
            return Err(DomainError::invalid("question is empty"));
        }

        let retrieval = self.retrieve(request).await?;

        let mut system = self.options.system_prompt.clone();
        if let Some(meta) = request
            .meta_information
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
        {
            system.push_str(&format!("\n\nAdditional context from the user:\n{meta}"));
        }
        let history = format_history(history);
        if !history.is_empty() {
            system.push_str(&format!("\n\nConversation so far:\n{history}"));
        }
        let prompt = format!(
            "Context:\n{}\n\nQuestion: {}",
            format_context(&retrieval.passages),
            request.query.trim()
        );
        let answer = llm.complete_with_system(&system, &prompt).await?;

        let mut sources: Vec<String> = Vec::new();
        for passage in &retrieval.passages {
            if !sources.contains(&passage.filename) {
                sources.push(passage.filename.clone());
            }
        }

        Ok(Answer {
            answer,
            sources,
            relevant_links: links::relevant_links(&request.query, request.industry_code.as_deref()),
            passages: retrieval.passages,
            pending_documents: retrieval.pending_documents,
            expanded_queries: retrieval.expanded_queries,
        })
    }

    /// Loads the current artifacts of documents relevant to `industry_code`.
    async fn searchable(
        &self,
        industry_code: Option<&str>,
    ) -> Result<(Vec<Searchable>, Vec<DocumentId>), DomainError> {
        let mut searchable = Vec::new();
        let mut pending = Vec::new();

        for entry in self.documents.overview().await? {
            let codes = &entry.record.metadata.industry_codes;
            if industry_code.is_some_and(|code| !onace::is_relevant(codes, code)) {
                continue;
            }
            if entry.index.needs_build() {
                pending.push(entry.record.id);
                continue;
            }
            match self.documents.get_index(entry.record.id).await {
                Ok(artifact) => searchable.push(Searchable {
                    filename: entry.record.filename,
                    primary: entry.record.metadata.primary,
                    artifact,
                }),
                // Deleted since the listing.
                Err(DomainError::DocumentNotFound(_)) => {}
                Err(DomainError::IndexNotBuilt(id)) => pending.push(id),
                Err(e) => return Err(e),
            }
        }
        Ok((searchable, pending))
    }

    /// Alternative phrasings of `query`. Failures fall back to no expansion.
    async fn expand_query(&self, query: &str) -> Vec<String> {
        let wanted = self.options.query_expansions;
        let Some(llm) = self.llm.as_ref().filter(|_| wanted > 0) else {
            return Vec::new();
        };

        let prompt = format!("Generate {wanted} alternative versions of this query:\n{query}");
        match llm
            .complete_with_system(&self.options.expansion_prompt, &prompt)
            .await
        {
            Ok(raw) => parse_expansions(&raw, query, wanted),
            Err(e) => {
                tracing::warn!(error = %e, "query expansion failed, using original query");
                Vec::new()
            }
        }
    }
}

/// Parses a numbered list of queries, dropping numbering, bullets, quotes and repeats
/// of the original.
pub fn parse_expansions(raw: &str, original: &str, limit: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        let unnumbered = line.trim_start_matches(|c: char| c.is_ascii_digit());
        let line = match unnumbered.strip_prefix(['.', ')']) {
            Some(rest) if unnumbered.len() < line.len() => rest,
            _ => line,
        };
        let line = line
            .trim_start_matches(['-', '*', '•'])
            .trim()
            .trim_matches(['"', '\'', '“', '”'])
            .trim();

        if line.is_empty()
            || line.eq_ignore_ascii_case(original.trim())
            || out.iter().any(|q| q.eq_ignore_ascii_case(line))
        {
            continue;
        }
        out.push(line.to_string());
        if out.len() == limit {
            break;
        }
    }
    out
}

/// Picks `top_k` passages: primary documents get up to half the slots (at least one
/// when any primary passage exists), the rest go to the best remaining passages.
fn allocate(mut candidates: Vec<RetrievedPassage>, top_k: usize) -> Vec<RetrievedPassage> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.document_id.cmp(&b.document_id))
            .then(a.chunk_index.cmp(&b.chunk_index))
    });

    let primary_slots = (top_k / 2).max(1);
    let (primary, others): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|p| p.primary);

    let mut primary = primary.into_iter();
    let mut selected: Vec<RetrievedPassage> = primary.by_ref().take(primary_slots).collect();
    let mut rest: Vec<RetrievedPassage> = others.into_iter().chain(primary).collect();
    rest.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let remaining = top_k.saturating_sub(selected.len());
    selected.extend(rest.into_iter().take(remaining));
    selected.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    selected
}

/// Renders passages as numbered `[Chunk n - Source: file]` blocks.
pub fn format_context(passages: &[RetrievedPassage]) -> String {
    if passages.is_empty() {
        return "No relevant documents were found.".to_string();
    }
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[Chunk {} - Source: {}]\n{}", i + 1, p.filename, p.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    use crate::application::services::document::tests::{put_text, service};
    use crate::domain::{DocumentMetadata, MessageRole};
    use crate::infrastructure::HashedEmbedding;

    #[derive(Default)]
    struct ScriptedLlm {
        expansion: Option<String>,
        prompts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl LlmService for ScriptedLlm {
        async fn complete(&self, prompt: &str) -> Result<String, DomainError> {
            self.complete_with_system("", prompt).await
        }

        async fn complete_with_system(
            &self,
            system: &str,
            prompt: &str,
        ) -> Result<String, DomainError> {
            self.prompts
                .lock()
                .unwrap()
                .push((system.to_string(), prompt.to_string()));
            if system == "expand" {
                return self
                    .expansion
                    .clone()
                    .ok_or_else(|| DomainError::external("expansion unavailable"));
            }
            Ok("generated answer".to_string())
        }
    }

    fn options(top_k: usize, query_expansions: usize) -> RagOptions {
        RagOptions {
            top_k,
            query_expansions,
            system_prompt: "answer from context".into(),
            expansion_prompt: "expand".into(),
        }
    }

    fn rag(
        documents: Arc<DocumentService>,
        llm: Arc<ScriptedLlm>,
        options: RagOptions,
    ) -> RagService {
        let llm: Arc<dyn LlmService> = llm;
        RagService::new(documents, Arc::new(HashedEmbedding::new(8)), Some(llm), options)
    }

    fn request(query: &str) -> RetrievalRequest {
        RetrievalRequest {
            query: query.into(),
            ..RetrievalRequest::default()
        }
    }

    async fn put_tagged(
        documents: &DocumentService,
        name: &str,
        text: &str,
        codes: &[&str],
        primary: bool,
    ) -> DocumentId {
        let metadata = DocumentMetadata {
            industry_codes: codes.iter().map(|c| c.to_string()).collect::<BTreeSet<_>>(),
            primary,
            source: None,
        };
        let id = documents
            .put_document(text.as_bytes().to_vec(), name, None, metadata)
            .await
            .unwrap()
            .id;
        documents.build_index(id).await.unwrap();
        id
    }

    fn passage(score: f32, primary: bool, chunk_index: usize) -> RetrievedPassage {
        RetrievedPassage {
            document_id: DocumentId::new(),
            filename: "f.txt".into(),
            primary,
            page: 1,
            chunk_index,
            score,
            text: format!("text {chunk_index}"),
        }
    }

    #[test]
    fn test_parse_expansions() {
        let raw = "1. \"energy use in offices\"\n2) Office power consumption\n\n- energy use in offices\n3. Heating costs";
        assert_eq!(
            parse_expansions(raw, "office energy", 2),
            vec!["energy use in offices", "Office power consumption"]
        );
        assert!(parse_expansions("1. office energy", "Office Energy", 3).is_empty());
        assert_eq!(parse_expansions("2024 targets", "goals", 1), vec!["2024 targets"]);
    }

    #[test]
    fn test_allocate_reserves_slots_for_primary() {
        let candidates = vec![
            passage(0.9, false, 0),
            passage(0.8, false, 1),
            passage(0.7, false, 2),
            passage(0.3, true, 3),
            passage(0.2, true, 4),
        ];
        let selected = allocate(candidates, 4);

        let chunks: Vec<usize> = selected.iter().map(|p| p.chunk_index).collect();
        assert_eq!(chunks, vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_allocate_fills_from_primary_when_others_run_out() {
        let candidates = vec![passage(0.9, true, 0), passage(0.8, true, 1), passage(0.1, false, 2)];
        assert_eq!(allocate(candidates, 3).len(), 3);
    }

    #[test]
    fn test_format_context() {
        let context = format_context(&[passage(0.5, false, 0)]);
        assert_eq!(context, "[Chunk 1 - Source: f.txt]\ntext 0");
        assert_eq!(format_context(&[]), "No relevant documents were found.");
    }

    #[tokio::test]
    async fn test_empty_collection_answers_from_empty_context() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedLlm::default());
        let rag = rag(service(&dir), llm.clone(), options(3, 0));

        let answer = rag.answer(&request("anything")).await.unwrap();
        assert_eq!(answer.answer, "generated answer");
        assert!(answer.passages.is_empty());

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].1.contains("No relevant documents were found."));
    }

    #[tokio::test]
    async fn test_unindexed_documents_are_not_ready() {
        let dir = TempDir::new().unwrap();
        let documents = service(&dir);
        put_text(&documents, "waiting for an index").await;
        let rag = rag(documents, Arc::new(ScriptedLlm::default()), options(3, 0));

        let err = rag.answer(&request("index")).await.unwrap_err();
        assert!(matches!(err, DomainError::IndexNotReady { pending: 1 }));
    }

    #[tokio::test]
    async fn test_pending_documents_are_reported() {
        let dir = TempDir::new().unwrap();
        let documents = service(&dir);
        put_tagged(&documents, "water.txt", "river water quality", &[], false).await;
        let pending = put_text(&documents, "not yet indexed").await;
        let rag = rag(documents, Arc::new(ScriptedLlm::default()), options(3, 0));

        let retrieval = rag.retrieve(&request("water quality")).await.unwrap();
        assert_eq!(retrieval.pending_documents, vec![pending]);
        assert_eq!(retrieval.passages[0].filename, "water.txt");
    }

    #[tokio::test]
    async fn test_industry_filter() {
        let dir = TempDir::new().unwrap();
        let documents = service(&dir);
        put_tagged(&documents, "general.txt", "emission reporting rules", &["0"], false).await;
        put_tagged(&documents, "farming.txt", "emission from livestock", &["A"], false).await;
        put_tagged(&documents, "energy.txt", "emission from power plants", &["D"], false).await;
        let rag = rag(documents, Arc::new(ScriptedLlm::default()), options(5, 0));

        let filenames = |retrieval: Retrieval| {
            let mut names: Vec<String> =
                retrieval.passages.into_iter().map(|p| p.filename).collect();
            names.sort();
            names
        };

        let farming = RetrievalRequest {
            industry_code: Some("A".into()),
            ..request("emission")
        };
        assert_eq!(
            filenames(rag.retrieve(&farming).await.unwrap()),
            vec!["farming.txt", "general.txt"]
        );

        let general_only = RetrievalRequest {
            industry_code: Some("0".into()),
            ..request("emission")
        };
        assert_eq!(
            filenames(rag.retrieve(&general_only).await.unwrap()),
            vec!["general.txt"]
        );
        assert_eq!(filenames(rag.retrieve(&request("emission")).await.unwrap()).len(), 3);
    }

    #[tokio::test]
    async fn test_chat_includes_history_and_context() {
        let dir = TempDir::new().unwrap();
        let documents = service(&dir);
        put_tagged(&documents, "policy.txt", "travel policy allows trains", &[], true).await;
        let llm = Arc::new(ScriptedLlm::default());
        let rag = rag(documents, llm.clone(), options(2, 0));

        let history = vec![Message::new(MessageRole::User, "Hi")];
        let answer = rag.chat(&request("travel policy"), &history).await.unwrap();
        assert_eq!(answer.sources, vec!["policy.txt"]);

        let prompts = llm.prompts.lock().unwrap();
        let (system, prompt) = &prompts[0];
        assert!(system.ends_with("Conversation so far:\nUser: Hi"));
        assert!(prompt.contains("[Chunk 1 - Source: policy.txt]"));
        assert!(prompt.ends_with("Question: travel policy"));
    }

    #[tokio::test]
    async fn test_failed_expansion_falls_back_to_original_query() {
        let dir = TempDir::new().unwrap();
        let documents = service(&dir);
        put_tagged(&documents, "a.txt", "bicycle commuting", &[], false).await;
        let llm = Arc::new(ScriptedLlm::default());
        let rag = rag(documents, llm.clone(), options(2, 2));

        let retrieval = rag.retrieve(&request("bicycle")).await.unwrap();
        assert_eq!(retrieval.passages.len(), 1);
        assert_eq!(llm.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expanded_queries_are_deduplicated() {
        let dir = TempDir::new().unwrap();
        let documents = service(&dir);
        put_tagged(&documents, "a.txt", "bicycle commuting", &[], false).await;
        let llm = Arc::new(ScriptedLlm {
            expansion: Some("1. bike commuting\n2. cycling to work".into()),
            ..ScriptedLlm::default()
        });
        let rag = rag(documents, llm, options(5, 2));

        let retrieval = rag.retrieve(&request("bicycle")).await.unwrap();
        assert_eq!(retrieval.passages.len(), 1);
        assert_eq!(
            retrieval.expanded_queries,
            vec!["bike commuting", "cycling to work"]
        );
    }

    #[tokio::test]
    async fn test_answer_carries_user_context_expansions_and_links() {
        let dir = TempDir::new().unwrap();
        let documents = service(&dir);
        put_tagged(&documents, "water.txt", "groundwater monitoring duties", &[], false).await;
        let llm = Arc::new(ScriptedLlm {
            expansion: Some("1. groundwater sampling".into()),
            ..ScriptedLlm::default()
        });
        let rag = rag(documents, llm.clone(), options(2, 1));

        let question = RetrievalRequest {
            meta_information: Some("  We run a small brewery.  ".into()),
            ..request("groundwater monitoring")
        };
        let answer = rag.answer(&question).await.unwrap();

        assert_eq!(answer.expanded_queries, vec!["groundwater sampling"]);
        assert_eq!(answer.relevant_links, vec!["https://maps.wisa.bmluk.gv.at/emreg"]);

        let prompts = llm.prompts.lock().unwrap();
        let (system, _) = prompts.last().unwrap();
        assert!(system.ends_with("Additional context from the user:\nWe run a small brewery."));
    }

    #[tokio::test]
    async fn test_blank_user_context_is_ignored() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedLlm::default());
        let rag = rag(service(&dir), llm.clone(), options(2, 0));

        let question = RetrievalRequest {
            meta_information: Some("   ".into()),
            ..request("tax rules")
        };
        let answer = rag.answer(&question).await.unwrap();
        assert!(answer.relevant_links.is_empty());
        assert_eq!(llm.prompts.lock().unwrap()[0].0, "answer from context");
    }
}
