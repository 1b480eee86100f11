//! Prompt construction and grounded answer synthesis.
//!
//! The prompt is a versioned template with three named slots (instructions,
//! context blocks, question) so its rendering can be audited and tested
//! without touching the generation model.

use tracing::debug;

use handbookqa_providers::GenerationClient;
use handbookqa_shared::{Answer, AnswerSource, Result, RetrievedChunk};

/// Bumped whenever the rendered prompt shape changes.
pub const PROMPT_VERSION: &str = "v1";

/// Fixed answer returned when retrieval produced nothing to ground on.
pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "I don't know. The handbook excerpts available to me do not cover that question.";

const INSTRUCTIONS: &str = "Use the following excerpts from the employee handbook to answer the \
question. Answer only from the supplied context. If the context does not contain the answer, \
say that you don't know; never make up an answer.";

/// The versioned prompt template.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    version: &'static str,
}

impl PromptTemplate {
    /// The template currently in use.
    pub fn current() -> Self {
        Self {
            version: PROMPT_VERSION,
        }
    }

    pub fn version(&self) -> &'static str {
        self.version
    }

    /// Render the prompt: instructions, then source-tagged context blocks
    /// in retrieval order, then the question.
    pub fn render(&self, question: &str, results: &[RetrievedChunk]) -> String {
        let mut prompt = String::new();
        prompt.push_str(INSTRUCTIONS);
        prompt.push_str("\n\nContext:\n");
        for (i, result) in results.iter().enumerate() {
            prompt.push_str(&format!(
                "[source {}] {}\n{}\n\n",
                i + 1,
                result.record.document_url,
                result.record.text.trim()
            ));
        }
        prompt.push_str("Question: ");
        prompt.push_str(question);
        prompt.push_str("\n\nAnswer:");
        prompt
    }
}

/// Turns retrieved chunks into a grounded answer with source attribution.
#[derive(Debug, Clone, Copy)]
pub struct Synthesizer {
    template: PromptTemplate,
}

impl Synthesizer {
    pub fn new() -> Self {
        Self {
            template: PromptTemplate::current(),
        }
    }

    /// Synthesize an answer for `question` from `results`.
    ///
    /// Empty `results` short-circuits to the fixed insufficient-context
    /// answer without calling the generation model. Sources mirror the
    /// prompt's context blocks: same order, originating URL, exact chunk
    /// text.
    pub async fn synthesize<G: GenerationClient>(
        &self,
        generator: &G,
        question: &str,
        results: &[RetrievedChunk],
    ) -> Result<Answer> {
        if results.is_empty() {
            debug!("no retrieval results, returning insufficient-context answer");
            return Ok(Answer {
                text: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
            });
        }

        let prompt = self.template.render(question, results);
        debug!(
            prompt_version = self.template.version(),
            context_blocks = results.len(),
            prompt_chars = prompt.chars().count(),
            model = generator.model(),
            "generating answer"
        );

        let text = generator.generate(&prompt).await?;

        Ok(Answer {
            text,
            sources: results
                .iter()
                .map(|r| AnswerSource {
                    source: r.record.document_url.clone(),
                    content: r.record.text.clone(),
                })
                .collect(),
        })
    }
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new()
    }
}
