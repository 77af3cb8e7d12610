use super::client::{AiClient, AiError, GenerationRequest, InlineImage};
use crate::category::{classify, SystemCategory};
use crate::i18n::Language;
use crate::models::{DeliveryType, TranslatableItem};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

/// Upper bound of items sent to the model in one translation call.
pub const MAX_TRANSLATION_BATCH: usize = 50;

const TRANSLATION_ATTEMPTS: usize = 2;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListingDraft {
    pub title: String,
    pub description: String,
    pub category: SystemCategory,
    pub suggested_price: f64,
    pub suggested_delivery_type: DeliveryType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawListingDraft {
    title: String,
    description: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    suggested_price: f64,
    suggested_delivery_type: DeliveryType,
}

#[derive(Debug, Clone)]
pub struct AuditInput {
    pub title: String,
    pub description: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditResult {
    pub is_safe: bool,
    pub category_correct: bool,
    #[serde(default)]
    pub suggested_category: Option<String>,
    #[serde(default)]
    pub suggested_subcategory: Option<String>,
    #[serde(default)]
    pub flagged_reason: Option<String>,
    pub confidence: f64,
}

impl AuditResult {
    /// Safe and confident enough to publish without a human. NaN never passes.
    pub fn approvable(&self) -> bool {
        self.is_safe && self.confidence > 0.6
    }

    /// Confidence clamped to [0, 1] for display; the model does not guarantee the range.
    pub fn display_confidence(&self) -> f64 {
        if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence.clamp(0.0, 1.0)
        }
    }
}

/// Result of one translation pass. `items` keeps the input order; ids in
/// `translated` are the ones the model actually produced.
#[derive(Debug, Clone, Default)]
pub struct TranslationBatch {
    pub items: Vec<TranslatableItem>,
    pub translated: HashSet<String>,
}

impl TranslationBatch {
    pub fn is_translated(&self, id: &str) -> bool {
        self.translated.contains(id)
    }
}

pub struct AiContentService {
    client: Arc<dyn AiClient>,
    retry_backoff: Duration,
}

/**
 * strip_code_fences
 * 去掉模型偶尔包裹的 markdown 代码块（```json ... ```），返回里面的 JSON 文本。
 */
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, AiError> {
    serde_json::from_str(strip_code_fences(text))
        .map_err(|e| AiError::MalformedResponse(e.to_string()))
}

fn category_enum() -> Vec<&'static str> {
    SystemCategory::ALL.iter().map(|c| c.as_str()).collect()
}

fn draft_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "title": { "type": "STRING" },
            "description": { "type": "STRING" },
            "category": { "type": "STRING", "enum": category_enum() },
            "suggestedPrice": { "type": "NUMBER" },
            "suggestedDeliveryType": { "type": "STRING", "enum": ["meetup", "shipping", "both"] }
        },
        "required": ["title", "description", "category", "suggestedPrice", "suggestedDeliveryType"]
    })
}

fn audit_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "isSafe": { "type": "BOOLEAN" },
            "categoryCorrect": { "type": "BOOLEAN" },
            "suggestedCategory": { "type": "STRING" },
            "suggestedSubcategory": { "type": "STRING" },
            "flaggedReason": { "type": "STRING" },
            "confidence": { "type": "NUMBER" }
        },
        "required": ["isSafe", "categoryCorrect", "confidence"]
    })
}

fn translation_schema() -> serde_json::Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "id": { "type": "STRING" },
                "title": { "type": "STRING" },
                "description": { "type": "STRING" }
            },
            "required": ["id", "title", "description"]
        }
    })
}

fn draft_prompt(language: Language) -> String {
    format!(
        "You are helping a user sell a secondhand item on an online marketplace.\n\
         Look at the photo and write a listing in {language}.\n\
         Return JSON with: title (short, max 80 characters), description (2-4 sentences \
         describing condition and notable features), category (one of: {categories}), \
         suggestedPrice (a fair secondhand price as a number, no currency symbol) and \
         suggestedDeliveryType (meetup, shipping or both).\n\
         Rules:\n\
         - If the photo shows a car, motorcycle, truck or any other vehicle, use category \"vehicles\".\n\
         - If the photo shows a house, apartment, building or land, use category \"real_estate\".\n\
         - Large or heavy items (furniture, appliances, vehicles, real estate) must use \
           suggestedDeliveryType \"meetup\".\n\
         - If the image contains hateful or extremist symbols, violence, adult content, or \
           political misinformation, do not describe it: set title to a neutral \
           placeholder, set description to a short neutral statement that the image cannot \
           be used for a listing, category \"other\" and suggestedPrice 0.\n",
        language = language.english_name(),
        categories = category_enum().join(", "),
    )
}

fn audit_prompt(input: &AuditInput) -> String {
    format!(
        "You are a content moderator for a secondhand marketplace.\n\
         Review the listing below.\n\
         - isSafe: false if it sells prohibited goods (weapons, drugs, counterfeit items, \
           animals, adult content), contains hate speech, scams or contact-harvesting spam.\n\
         - categoryCorrect: whether the category fits the item. Valid categories: {categories}.\n\
         - suggestedCategory / suggestedSubcategory: your best category and a short \
           subcategory when the given one is wrong.\n\
         - flaggedReason: short explanation when not safe.\n\
         - confidence: a number between 0 and 1.\n\n\
         Title: {title}\nDescription: {description}\nCategory: {category}\n",
        categories = category_enum().join(", "),
        title = input.title,
        description = input.description,
        category = input.category,
    )
}

fn translation_prompt(items: &[TranslatableItem], language: Language) -> String {
    let payload = serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Translate the title and description of every item into {language}.\n\
         Keep each id unchanged, keep brand and model names as-is, and return a JSON array \
         with one object per input item.\n\nItems:\n{payload}\n",
        language = language.english_name(),
        payload = payload,
    )
}

impl AiContentService {
    pub fn new(client: Arc<dyn AiClient>) -> Self {
        Self {
            client,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /**
     * extract_listing_draft
     * 根据图片生成商品草稿；调用方是交互用户，所以失败类型直接返回给 handler。
     */
    pub async fn extract_listing_draft(
        &self,
        image: Vec<u8>,
        mime_type: &str,
        language: Option<Language>,
    ) -> Result<ListingDraft, AiError> {
        let language = language.unwrap_or(Language::Es);
        let text = self
            .client
            .generate(GenerationRequest {
                prompt: draft_prompt(language),
                image: Some(InlineImage {
                    mime_type: mime_type.to_string(),
                    data: image,
                }),
                response_schema: draft_schema(),
                temperature: 0.4,
            })
            .await?;

        let raw: RawListingDraft = parse_json(&text)?;
        Ok(ListingDraft {
            title: raw.title.trim().to_string(),
            description: raw.description.trim().to_string(),
            category: classify(raw.category.as_deref()),
            suggested_price: if raw.suggested_price.is_finite() && raw.suggested_price > 0.0 {
                raw.suggested_price
            } else {
                0.0
            },
            suggested_delivery_type: raw.suggested_delivery_type,
        })
    }

    pub async fn try_audit_listing(&self, input: &AuditInput) -> Result<AuditResult, AiError> {
        let text = self
            .client
            .generate(GenerationRequest {
                prompt: audit_prompt(input),
                image: None,
                response_schema: audit_schema(),
                temperature: 0.1,
            })
            .await?;
        parse_json(&text)
    }

    /// Best-effort audit: `None` when the model is unavailable or answers garbage.
    pub async fn audit_listing(&self, input: &AuditInput) -> Option<AuditResult> {
        match self.try_audit_listing(input).await {
            Ok(result) => Some(result),
            Err(e) => {
                log::warn!("AI audit failed for '{}': {}", input.title, e);
                None
            }
        }
    }

    async fn request_translation(
        &self,
        batch: &[TranslatableItem],
        language: Language,
    ) -> Result<Vec<TranslatableItem>, AiError> {
        let text = self
            .client
            .generate(GenerationRequest {
                prompt: translation_prompt(batch, language),
                image: None,
                response_schema: translation_schema(),
                temperature: 0.2,
            })
            .await?;
        parse_json(&text)
    }

    /**
     * try_translate
     * 只把前 50 条（按输入顺序）交给模型，其余原样返回；模型调用最多尝试 2 次，间隔固定退避。
     */
    pub async fn try_translate(
        &self,
        items: &[TranslatableItem],
        language: Language,
    ) -> Result<TranslationBatch, AiError> {
        if items.is_empty() {
            return Ok(TranslationBatch::default());
        }

        let batch = &items[..items.len().min(MAX_TRANSLATION_BATCH)];
        if items.len() > MAX_TRANSLATION_BATCH {
            log::info!(
                "Translation batch truncated: {} items, {} left untranslated",
                items.len(),
                items.len() - MAX_TRANSLATION_BATCH
            );
        }

        let mut last_err: Option<AiError> = None;
        for attempt in 0..TRANSLATION_ATTEMPTS {
            if attempt > 0 && !self.retry_backoff.is_zero() {
                tokio::time::sleep(self.retry_backoff).await;
            }

            match self.request_translation(batch, language).await {
                Ok(translated) => return Ok(merge_translations(items, batch.len(), translated)),
                Err(AiError::Configuration(msg)) => return Err(AiError::Configuration(msg)),
                Err(e) => {
                    log::warn!(
                        "Translation to {} failed (attempt {}/{}): {}",
                        language,
                        attempt + 1,
                        TRANSLATION_ATTEMPTS,
                        e
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(AiError::UpstreamEmptyResponse))
    }

    /// Best-effort translation by language name or code; unknown languages and
    /// failures return the input unchanged.
    pub async fn translate(
        &self,
        items: Vec<TranslatableItem>,
        target_language: &str,
    ) -> Vec<TranslatableItem> {
        let Some(language) = Language::resolve(target_language) else {
            log::info!(
                "Unsupported translation target '{}', returning items unchanged",
                target_language
            );
            return items;
        };

        match self.try_translate(&items, language).await {
            Ok(batch) => batch.items,
            Err(e) => {
                log::error!("Translation to {} failed: {}", language, e);
                items
            }
        }
    }
}

fn merge_translations(
    items: &[TranslatableItem],
    sent: usize,
    translated: Vec<TranslatableItem>,
) -> TranslationBatch {
    let mut by_id: HashMap<String, TranslatableItem> = translated
        .into_iter()
        .map(|item| (item.id.clone(), item))
        .collect();

    let mut result = TranslationBatch::default();
    for (idx, item) in items.iter().enumerate() {
        match by_id.remove(&item.id).filter(|_| idx < sent) {
            Some(t) => {
                result.translated.insert(item.id.clone());
                result.items.push(TranslatableItem {
                    id: item.id.clone(),
                    title: t.title,
                    description: t.description,
                });
            }
            None => result.items.push(item.clone()),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{items, FnAiClient};

    fn service(client: Arc<FnAiClient>) -> AiContentService {
        AiContentService::new(client).with_retry_backoff(Duration::ZERO)
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1,2]\n```"), "[1,2]");
        assert_eq!(strip_code_fences("```json{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_audit_confidence_guards() {
        let mut audit = AuditResult {
            is_safe: true,
            category_correct: true,
            suggested_category: None,
            suggested_subcategory: None,
            flagged_reason: None,
            confidence: f64::NAN,
        };
        assert!(!audit.approvable());
        assert_eq!(audit.display_confidence(), 0.0);

        audit.confidence = 1.7;
        assert!(audit.approvable());
        assert_eq!(audit.display_confidence(), 1.0);

        audit.confidence = 0.6;
        assert!(!audit.approvable());
    }

    #[tokio::test]
    async fn test_extract_listing_draft_normalises_category() {
        let client = Arc::new(FnAiClient::new(|req| {
            assert!(req.image.is_some());
            assert!(req.prompt.contains("Spanish"));
            Ok("```json\n{\"title\":\" Bicicleta de montaña \",\"description\":\"Buen estado.\",\
                \"category\":\"Mountain bikes\",\"suggestedPrice\":2500,\
                \"suggestedDeliveryType\":\"meetup\"}\n```"
                .to_string())
        }));

        let draft = service(client)
            .extract_listing_draft(vec![0xFF, 0xD8], "image/jpeg", None)
            .await
            .unwrap();
        assert_eq!(draft.title, "Bicicleta de montaña");
        assert_eq!(draft.category, SystemCategory::Sports);
        assert_eq!(draft.suggested_price, 2500.0);
        assert_eq!(draft.suggested_delivery_type, DeliveryType::Meetup);
    }

    #[tokio::test]
    async fn test_extract_listing_draft_error_kinds() {
        let empty = Arc::new(FnAiClient::new(|_| Err(AiError::UpstreamEmptyResponse)));
        let err = service(empty)
            .extract_listing_draft(vec![1], "image/png", Some(Language::En))
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::UpstreamEmptyResponse));

        let garbage = Arc::new(FnAiClient::new(|_| Ok("not json at all".to_string())));
        let err = service(garbage)
            .extract_listing_draft(vec![1], "image/png", Some(Language::En))
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_audit_listing_returns_none_on_failure() {
        let client = Arc::new(FnAiClient::new(|_| Ok("{oops".to_string())));
        let input = AuditInput {
            title: "Sofa".to_string(),
            description: "Three seats".to_string(),
            category: "furniture".to_string(),
        };
        assert!(service(client.clone()).audit_listing(&input).await.is_none());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_translate_unsupported_language_is_noop() {
        let client = Arc::new(FnAiClient::new(|_| panic!("must not be called")));
        let input = items(3);
        let output = service(client.clone()).translate(input.clone(), "French").await;
        assert_eq!(output, input);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_translate_caps_batch_at_fifty() {
        let client = Arc::new(FnAiClient::new(|req| {
            assert!(req.prompt.contains("\"item-49\""));
            assert!(!req.prompt.contains("\"item-50\""));
            let translated: Vec<TranslatableItem> = (0..50)
                .map(|i| TranslatableItem {
                    id: format!("item-{}", i),
                    title: format!("标题 {}", i),
                    description: format!("描述 {}", i),
                })
                .collect();
            Ok(serde_json::to_string(&translated).unwrap())
        }));

        let input = items(60);
        let output = service(client.clone()).translate(input.clone(), "Chinese").await;

        assert_eq!(client.calls(), 1);
        assert_eq!(output.len(), 60);
        assert_eq!(output[0].title, "标题 0");
        assert_eq!(output[49].title, "标题 49");
        assert_eq!(&output[50..], &input[50..]);
    }

    #[tokio::test]
    async fn test_translate_retries_once_then_falls_back() {
        let client = Arc::new(FnAiClient::new(|_| {
            Err(AiError::Api {
                status: 503,
                body: "overloaded".to_string(),
            })
        }));
        let input = items(2);
        let output = service(client.clone()).translate(input.clone(), "english").await;
        assert_eq!(output, input);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_translate_does_not_retry_configuration_errors() {
        let client = Arc::new(FnAiClient::new(|_| {
            Err(AiError::Configuration("missing key".to_string()))
        }));
        let err = service(client.clone())
            .try_translate(&items(1), Language::Es)
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Configuration(_)));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_translate_keeps_items_missing_from_answer() {
        let client = Arc::new(FnAiClient::new(|_| {
            Ok("[{\"id\":\"item-1\",\"title\":\"Title 1\",\"description\":\"Desc 1\"}]".to_string())
        }));
        let input = items(2);
        let batch = service(client)
            .try_translate(&input, Language::En)
            .await
            .unwrap();
        assert_eq!(batch.items[0], input[0]);
        assert_eq!(batch.items[1].title, "Title 1");
        assert!(!batch.is_translated("item-0"));
        assert!(batch.is_translated("item-1"));
    }
}
