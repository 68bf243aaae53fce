//! Query pipeline orchestration
//!
//! Stages run strictly in order over one [`QueryContext`]; the only shared
//! mutable state across queries is the embedding cache and the keyword-
//! frequency cache. The whole run is bounded by the per-query deadline.

pub mod expander;
pub mod normalizer;
pub mod parser;
pub mod router;

use crate::answer::{pack_context, validate, Composer};
use crate::backend::{
    CachedEmbedder, ElasticLexicalBackend, Embedder, LexicalBackend, LlmClient, OllamaClient,
    OllamaEmbedder, QdrantVectorBackend, VectorBackend,
};
use crate::cache::{LruCache, KEYWORD_FREQ_CACHE_CAPACITY};
use crate::config::Config;
use crate::error::Result;
use crate::model::{Intent, QueryContext, Route};
use crate::retrieval::{promote_blocks, ChunkRetriever, FindingRetriever};
use expander::Expander;
use parser::Parser;
use std::collections::HashMap;
use std::sync::Arc;

/// The query pipeline with its external collaborators.
///
/// Fully re-entrant: one instance serves any number of concurrent queries.
pub struct Pipeline {
    config: Config,
    lexical: Arc<dyn LexicalBackend>,
    vector: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LlmClient>,
    keyword_freq_cache: Arc<LruCache<String, HashMap<String, u64>>>,
}

impl Pipeline {
    /// Build a pipeline against the configured live backends.
    pub fn new(config: Config) -> Result<Self> {
        let lexical = Arc::new(ElasticLexicalBackend::new(config.lexical.clone())?);
        let vector = Arc::new(QdrantVectorBackend::new(&config.vector)?);
        let embedder: Arc<dyn Embedder> = Arc::new(CachedEmbedder::new(Arc::new(
            OllamaEmbedder::new(&config.llm)?,
        )));
        let llm = Arc::new(OllamaClient::new(config.llm.clone())?);
        Ok(Self::with_backends(config, lexical, vector, embedder, llm))
    }

    /// Build a pipeline over explicit backends; tests inject mocks here.
    pub fn with_backends(
        config: Config,
        lexical: Arc<dyn LexicalBackend>,
        vector: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            config,
            lexical,
            vector,
            embedder,
            llm,
            keyword_freq_cache: Arc::new(LruCache::new(KEYWORD_FREQ_CACHE_CAPACITY)),
        }
    }

    /// Answer one query. The deadline bounds every sub-call; on expiry the
    /// standard timeout message is returned instead of partial output.
    pub async fn run_query(&self, text: &str) -> Result<String> {
        self.run_context(text)
            .await
            .map(|ctx| ctx.answer.unwrap_or_default())
    }

    /// Answer one query, returning the full stage-by-stage context. The
    /// validated answer text is in `answer`.
    pub async fn run_context(&self, text: &str) -> Result<QueryContext> {
        match tokio::time::timeout(self.config.query_deadline(), self.run_inner(text)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "query deadline expired after {:?}",
                    self.config.query_deadline()
                );
                let mut ctx = QueryContext::new(text);
                ctx.error = Some("deadline exceeded".to_string());
                ctx.answer = Some(crate::answer::validator::timeout_message());
                Ok(ctx)
            }
        }
    }

    async fn run_inner(&self, text: &str) -> Result<QueryContext> {
        let mut ctx = QueryContext::new(text);
        ctx.normalized = normalizer::normalize(&ctx.raw);
        tracing::info!("normalized query: {}", ctx.normalized);

        Parser { llm: self.llm.as_ref() }.parse(&mut ctx).await;

        if ctx.intent == Intent::CaseLookup {
            Expander { llm: self.llm.as_ref() }.expand(&mut ctx).await;
        }

        let route = router::route(&ctx, self.config.retrieval.confidence_threshold);
        ctx.route = Some(route);
        tracing::info!("routed to {:?}", route);

        let composer = Composer { llm: self.llm.as_ref() };
        match route {
            Route::Clarify => {
                ctx.answer = Some(router::clarify_message(&ctx));
            }
            Route::Explain => {
                composer.explain(&mut ctx).await;
            }
            Route::Search => {
                FindingRetriever {
                    lexical: self.lexical.as_ref(),
                    vector: self.vector.as_ref(),
                    embedder: self.embedder.as_ref(),
                    config: &self.config,
                    keyword_freq_cache: &self.keyword_freq_cache,
                }
                .retrieve(&mut ctx)
                .await?;

                if !ctx.finding_hits.is_empty() {
                    ChunkRetriever {
                        lexical: self.lexical.as_ref(),
                        vector: self.vector.as_ref(),
                        embedder: self.embedder.as_ref(),
                        config: &self.config,
                    }
                    .retrieve(&mut ctx)
                    .await?;

                    promote_blocks(&mut ctx, &self.config.answer);

                    if !ctx.block_ranking.is_empty() {
                        ctx.context =
                            Some(pack_context(&ctx.block_ranking, &self.config.answer));
                        composer.compose(&mut ctx).await;
                    }
                }
            }
        }

        let final_answer = validate(&mut ctx);
        ctx.answer = Some(final_answer);
        Ok(ctx)
    }
}
