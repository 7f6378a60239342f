use crate::config::Settings;
use crate::domain::document::ScoredDocument;
use crate::embed::Embedder;
use crate::llm::LlmClient;
use crate::storage::vector_index::VectorIndex;
use anyhow::{ensure, Context};
use serde::Serialize;
use std::sync::Arc;

const CONTEXT: &str = "{context}";
const QUESTION: &str = "{question}";

const DEFAULT_TEMPLATE: &str = "Answer the question based only on the following context:\n\
{context}\n\
\n\
Question: {question}\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> anyhow::Result<Self> {
        let template = template.into();
        ensure!(
            template.contains(CONTEXT),
            "prompt template must contain {CONTEXT}"
        );
        ensure!(
            template.contains(QUESTION),
            "prompt template must contain {QUESTION}"
        );
        Ok(Self { template })
    }

    /// Substitutes both placeholders in one pass; placeholder-looking text in
    /// the substituted values is left as is.
    pub fn render(&self, context: &str, question: &str) -> String {
        let mut out = String::with_capacity(self.template.len() + context.len() + question.len());
        let mut rest = self.template.as_str();
        loop {
            let next = [(CONTEXT, context), (QUESTION, question)]
                .into_iter()
                .filter_map(|(p, v)| rest.find(p).map(|at| (at, p, v)))
                .min_by_key(|(at, _, _)| *at);
            let Some((at, placeholder, value)) = next else {
                out.push_str(rest);
                return out;
            };
            out.push_str(&rest[..at]);
            out.push_str(value);
            rest = &rest[at + placeholder.len()..];
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub text: String,
    pub sources: Vec<ScoredDocument>,
}

#[derive(Clone)]
pub struct QueryResponder {
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LlmClient>,
    template: PromptTemplate,
    collection: String,
    top_k: usize,
}

impl QueryResponder {
    pub fn new(
        index: VectorIndex,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmClient>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            index,
            embedder,
            llm,
            template: PromptTemplate::default(),
            collection: collection.into(),
            top_k: 2,
        }
    }

    /// Uses `PROMPT_TEMPLATE` when set; it must contain both placeholders.
    pub fn from_settings(
        settings: &Settings,
        index: VectorIndex,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmClient>,
    ) -> anyhow::Result<Self> {
        let responder = Self::new(index, embedder, llm, settings.collection.clone())
            .with_top_k(settings.top_k);
        match &settings.prompt_template {
            Some(template) => Ok(responder.with_template(
                PromptTemplate::new(template.as_str()).context("invalid PROMPT_TEMPLATE")?,
            )),
            None => Ok(responder),
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn retrieve(&self, question: &str) -> anyhow::Result<Vec<ScoredDocument>> {
        let query = self
            .embedder
            .embed_query(question)
            .await
            .with_context(|| format!("embedding question with {} failed", self.embedder.model()))?;
        self.index
            .similarity_search(&self.collection, &query, self.top_k)
            .await
    }

    pub async fn answer(&self, question: &str) -> anyhow::Result<Answer> {
        let question = question.trim();
        ensure!(!question.is_empty(), "question must be non-empty");

        let sources = self.retrieve(question).await?;
        if sources.is_empty() {
            tracing::warn!(collection = %self.collection, "no documents retrieved; prompting without context");
        }

        let context = sources
            .iter()
            .map(|s| s.document.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = self.template.render(&context, question);

        let text = self
            .llm
            .generate(&prompt)
            .await
            .with_context(|| format!("generation with {} failed", self.llm.model()))?;

        tracing::info!(
            collection = %self.collection,
            sources = sources.len(),
            model = %self.llm.model(),
            answer_len = text.len(),
            "question answered"
        );

        Ok(Answer {
            question: question.to_string(),
            text,
            sources,
        })
    }
}
