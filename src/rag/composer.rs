//! Grounded answer composition.
//!
//! Builds the persona/grounding prompt from retrieved documents, runs one
//! bounded generation call, and post-processes the output. Composition never
//! errors to its caller: every failure mode degrades to a structured,
//! template-assembled fallback built from the same documents.

use std::sync::Arc;
use std::time::Duration;

use super::parse::ResponseParser;
use super::types::{ComposedAnswer, GeneratedVia, RetrievedDocument};
use crate::llm::LlmProvider;

/// Why a composed answer fell back to the template. Logged, not surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FallbackReason {
    NoDocuments,
    GenerationFailed,
    Unhelpful,
}

const NO_DOCS_SUGGESTIONS: [&str; 3] = [
    "Could you please rephrase your question more specifically?",
    "What specific Lumina ERP module are you interested in?",
    "Would you like me to connect you with a human support agent?",
];

const EXCERPT_SUGGESTIONS: [&str; 3] = [
    "How can I rephrase my question to get a better answer?",
    "Can you tell me more about [topic from excerpt]?",
    "Is there a contact for human support?",
];

pub struct AnswerComposer {
    provider: Arc<dyn LlmProvider>,
    parser: ResponseParser,
    generation_timeout: Duration,
    /// Canned reply when there is nothing to ground on at all.
    no_results_message: String,
}

impl AnswerComposer {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        generation_timeout: Duration,
        no_results_message: String,
    ) -> Self {
        Self {
            provider,
            parser: ResponseParser::new(),
            generation_timeout,
            no_results_message,
        }
    }

    /// Compose an answer to `question` grounded on `docs`.
    pub async fn compose(&self, question: &str, docs: &[RetrievedDocument]) -> ComposedAnswer {
        let prompt = build_prompt(question, docs);

        let raw = match tokio::time::timeout(
            self.generation_timeout,
            self.provider.generate(&prompt),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => {
                tracing::warn!("Generation failed, using structured fallback: {}", err);
                return self.structured_fallback(docs, FallbackReason::GenerationFailed);
            }
            Err(_) => {
                tracing::warn!(
                    "Generation exceeded {}s deadline, using structured fallback",
                    self.generation_timeout.as_secs()
                );
                return self.structured_fallback(docs, FallbackReason::GenerationFailed);
            }
        };

        let cleaned = self.parser.clean(&raw);
        let suggested_questions = self.parser.extract_suggested_questions(&cleaned);
        let body = self.parser.strip_suggested_block(&cleaned, &suggested_questions);

        if body.is_empty() || self.parser.is_unhelpful(&body) {
            return self.structured_fallback(docs, FallbackReason::Unhelpful);
        }

        ComposedAnswer {
            text: body,
            sources: docs.to_vec(),
            suggested_questions,
            generated_via: GeneratedVia::Model,
        }
    }

    /// Template-assembled answer used when generation is unavailable or
    /// declined to answer. With documents in hand, their excerpts are
    /// surfaced directly; otherwise the canned no-information reply.
    fn structured_fallback(
        &self,
        docs: &[RetrievedDocument],
        reason: FallbackReason,
    ) -> ComposedAnswer {
        tracing::info!("Structured fallback ({:?}), {} documents", reason, docs.len());

        if docs.is_empty() {
            return ComposedAnswer {
                text: self.no_results_message.clone(),
                sources: Vec::new(),
                suggested_questions: string_vec(&NO_DOCS_SUGGESTIONS),
                generated_via: GeneratedVia::Fallback,
            };
        }

        let excerpts: Vec<String> = docs
            .iter()
            .map(|doc| {
                format!(
                    "From {} (related to '{}...'): {}...",
                    doc.source(),
                    truncate_chars(doc.label().unwrap_or(""), 100),
                    truncate_chars(&doc.content, 300)
                )
            })
            .collect();

        let text = format!(
            "I apologize, I couldn't provide a direct, comprehensive answer to your question \
             based on the specific information I have at hand. However, here's some related \
             information from our documentation that might be helpful:\n\n{}\n\nIf this doesn't \
             fully address your query, please try rephrasing it or providing more details. \
             I'm here to assist you further.",
            excerpts.join("\n\n")
        );

        ComposedAnswer {
            text,
            sources: docs.to_vec(),
            suggested_questions: string_vec(&EXCERPT_SUGGESTIONS),
            generated_via: GeneratedVia::Fallback,
        }
    }
}

/// Fixed persona and grounding instructions around the retrieved context.
fn build_prompt(question: &str, docs: &[RetrievedDocument]) -> String {
    let context_parts: Vec<String> = docs
        .iter()
        .map(|doc| match doc.label() {
            Some(label) => format!(
                "**Source: {}**\n**Question:** {}\n**Answer:** {}",
                doc.source(),
                label,
                doc.content
            ),
            None => format!(
                "**Source: {}**\n**Content:** {}",
                doc.source(),
                doc.content
            ),
        })
        .collect();
    let context = context_parts.join("\n\n");

    format!(
        "You are the Lumina Assistant, a highly intelligent, polite, and friendly customer \
         service chatbot for Lumina Software Solutions, a company specializing in ERP systems. \
         Your primary role is to assist customers by providing accurate, formal, and helpful \
         answers based *strictly* on the provided \"Documentation Context\".\n\
         \n\
         **Your persona guidelines:**\n\
         -   **Formal yet Friendly**: Maintain a professional and respectful tone, but be \
         approachable and helpful.\n\
         -   **Polite**: Always use polite language (e.g., \"Certainly,\" \"Please,\" \
         \"Thank you,\" \"I apologize\").\n\
         -   **Data-driven**: ONLY use information directly provided in the \"Documentation \
         Context\" below. Do not use outside knowledge.\n\
         -   **Concise**: Provide clear and to-the-point answers without unnecessary jargon.\n\
         -   **Handling Unknowns**: If the answer is NOT present in the provided context, \
         politely state that you couldn't find the information in your documentation. Do NOT \
         invent information.\n\
         -   **Structured Answers**: Use bullet points or numbered lists for steps, features, \
         or lists when appropriate for readability.\n\
         -   **Suggested Questions**: Conclude your response by suggesting 1-3 concise, \
         relevant follow-up questions that a user might have, based on the current interaction \
         and the provided context. Format these as a clear list.\n\
         \n\
         ---\n\
         Documentation Context:\n\
         {}\n\
         ---\n\
         \n\
         User Question: {}\n\
         \n\
         AI Assistant's Answer:\n",
        context, question
    )
}

fn string_vec(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
