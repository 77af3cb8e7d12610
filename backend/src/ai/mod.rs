//! Generative-model integration: the injected client capability and the content
//! service built on top of it (listing drafts, audits, translations).

mod client;
mod content;
mod gemini;

pub use client::{AiClient, AiError, DisabledAiClient, GenerationRequest, InlineImage};
pub use content::{
    strip_code_fences, AiContentService, AuditInput, AuditResult, ListingDraft,
    TranslationBatch, MAX_TRANSLATION_BATCH,
};
pub use gemini::GeminiClient;
