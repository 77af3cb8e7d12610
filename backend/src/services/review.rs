use crate::ai::{AiContentService, AuditInput, AuditResult};
use crate::category::classify;
use crate::error::MarketError;
use crate::i18n::Language;
use crate::models::{AutoReviewReport, Product, ProductStatus, TranslatableItem};
use crate::repository::{ProductPatch, ProductRepository};
use crate::services::translation::TranslationService;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_REVIEW_LIMIT: usize = 20;
pub const MAX_REVIEW_LIMIT: usize = 100;

/// Batch moderation of `pending_review` listings through the AI audit.
pub struct AutoReviewPipeline {
    products: Arc<dyn ProductRepository>,
    ai: Arc<AiContentService>,
    translations: Arc<TranslationService>,
    item_delay: Duration,
}

enum Outcome {
    Approved { category_corrected: bool },
    Flagged,
    /// The listing left `pending_review` while it was being audited.
    Skipped,
}

impl AutoReviewPipeline {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        ai: Arc<AiContentService>,
        translations: Arc<TranslationService>,
    ) -> Self {
        Self {
            products,
            ai,
            translations,
            item_delay: Duration::from_millis(200),
        }
    }

    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    /**
     * run
     * 按创建时间从旧到新取待审核商品，逐个（非并发）调用 AI 审核：
     * 安全且置信度 > 0.6 → 上架（必要时纠正分类），否则保留 pending_review 并写备注等待人工。
     */
    pub async fn run(
        &self,
        limit: Option<usize>,
        hours_ago: Option<i64>,
    ) -> Result<AutoReviewReport, MarketError> {
        let limit = limit
            .unwrap_or(DEFAULT_REVIEW_LIMIT)
            .clamp(1, MAX_REVIEW_LIMIT);
        // A window reaching past the representable range means no lower bound.
        let created_after = hours_ago
            .filter(|h| *h > 0)
            .and_then(ChronoDuration::try_hours)
            .and_then(|window| Utc::now().checked_sub_signed(window));

        let pending = self
            .products
            .find_pending_review(limit, created_after)
            .await?;
        log::info!(
            "Auto-review started: {} pending listings (limit {}, hours_ago {:?})",
            pending.len(),
            limit,
            hours_ago
        );

        let mut report = AutoReviewReport::default();
        for (idx, product) in pending.iter().enumerate() {
            if idx > 0 && !self.item_delay.is_zero() {
                tokio::time::sleep(self.item_delay).await;
            }

            let input = AuditInput {
                title: product.title.clone(),
                description: product.description.clone(),
                category: product.category.as_str().to_string(),
            };
            let Some(audit) = self.ai.audit_listing(&input).await else {
                report.errors += 1;
                continue;
            };

            match self.apply_audit(product, &audit).await {
                Ok(Outcome::Approved { category_corrected }) => {
                    report.approved += 1;
                    if category_corrected {
                        report.category_corrected += 1;
                    }
                }
                Ok(Outcome::Flagged) => report.flagged += 1,
                Ok(Outcome::Skipped) => {
                    log::info!("Listing {} left pending_review during audit, skipped", product.id)
                }
                Err(e) => {
                    log::error!("Failed to store review for listing {}: {:?}", product.id, e);
                    report.errors += 1;
                }
            }
        }

        log::info!(
            "Auto-review finished: approved={}, category_corrected={}, flagged={}, errors={}",
            report.approved,
            report.category_corrected,
            report.flagged,
            report.errors
        );
        Ok(report)
    }

    async fn apply_audit(&self, product: &Product, audit: &AuditResult) -> anyhow::Result<Outcome> {
        let now = Utc::now();
        let confidence = audit.display_confidence();

        if !audit.approvable() {
            let reason = audit
                .flagged_reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or("low confidence");
            let patch = ProductPatch {
                review_note: Some(format!(
                    "Flagged for manual review by AI audit: {} (confidence {:.2})",
                    reason, confidence
                )),
                reviewed_at: Some(now),
                updated_at: Some(now),
                ..ProductPatch::default()
            };
            let updated = self
                .products
                .update_product_in_status(&product.id, ProductStatus::PendingReview, &patch)
                .await?;
            log::info!("Listing {} flagged: {}", product.id, reason);
            return Ok(match updated {
                Some(_) => Outcome::Flagged,
                None => Outcome::Skipped,
            });
        }

        let mut patch = ProductPatch {
            status: Some(ProductStatus::Active),
            reviewed_at: Some(now),
            updated_at: Some(now),
            ..ProductPatch::default()
        };

        let mut category_corrected = false;
        if !audit.category_correct {
            let mapped = classify(audit.suggested_category.as_deref());
            if mapped != product.category {
                patch.category = Some(mapped);
                category_corrected = true;
            }
            if let Some(sub) = audit
                .suggested_subcategory
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
            {
                patch.subcategory = Some(sub.to_string());
            }
        }

        patch.review_note = Some(match patch.category {
            Some(category) => format!(
                "Auto-approved by AI audit (confidence {:.2}); category corrected from {} to {}",
                confidence, product.category, category
            ),
            None => format!("Auto-approved by AI audit (confidence {:.2})", confidence),
        });

        let Some(approved) = self
            .products
            .update_product_in_status(&product.id, ProductStatus::PendingReview, &patch)
            .await?
        else {
            return Ok(Outcome::Skipped);
        };
        log::info!(
            "Listing {} approved (category {})",
            approved.id,
            approved.category
        );

        self.translate_approved(&approved).await;
        Ok(Outcome::Approved { category_corrected })
    }

    /// Stores per-language title/description. Failures never undo the approval.
    async fn translate_approved(&self, product: &Product) {
        let item = TranslatableItem {
            id: product.id.clone(),
            title: product.title.clone(),
            description: product.description.clone(),
        };

        for language in Language::ALL {
            let batch = match self
                .translations
                .translate_items(std::slice::from_ref(&item), language)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    log::warn!(
                        "Post-approval translation of {} to {} failed: {}",
                        product.id,
                        language,
                        e
                    );
                    continue;
                }
            };

            let Some(translated) = batch
                .items
                .into_iter()
                .find(|t| t.id == product.id && batch.translated.contains(&t.id))
            else {
                continue;
            };

            let patch =
                ProductPatch::translation(language, translated.title, translated.description);
            if let Err(e) = self.products.update_product(&product.id, &patch).await {
                log::warn!(
                    "Failed to store {} translation for {}: {:?}",
                    language,
                    product.id,
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiError;
    use crate::category::SystemCategory;
    use crate::repository::MemoryStore;
    use crate::test_utils::{product_fixture, FnAiClient};

    const SAFE: &str = r#"{"isSafe":true,"categoryCorrect":true,"confidence":0.9}"#;

    fn translation_answer(req: &crate::ai::GenerationRequest) -> Option<String> {
        if !req.prompt.starts_with("Translate") {
            return None;
        }
        let lang = ["Chinese", "English", "Spanish"]
            .into_iter()
            .find(|l| req.prompt.contains(l))
            .unwrap_or("?");
        let start = req.prompt.find('[').unwrap();
        let end = req.prompt.rfind(']').unwrap();
        let input: Vec<TranslatableItem> = serde_json::from_str(&req.prompt[start..=end]).unwrap();
        let out: Vec<TranslatableItem> = input
            .into_iter()
            .map(|i| TranslatableItem {
                id: i.id,
                title: format!("[{}] {}", lang, i.title),
                description: i.description,
            })
            .collect();
        Some(serde_json::to_string(&out).unwrap())
    }

    fn pipeline(client: Arc<FnAiClient>, store: Arc<MemoryStore>) -> AutoReviewPipeline {
        let ai = Arc::new(AiContentService::new(client).with_retry_backoff(Duration::ZERO));
        let translations = Arc::new(TranslationService::new(store.clone(), ai.clone()));
        AutoReviewPipeline::new(store, ai, translations).with_item_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_non_pending_listings_are_never_touched() {
        let store = Arc::new(MemoryStore::new());
        let active = product_fixture("active", "s", ProductStatus::Active);
        let inactive = product_fixture("inactive", "s", ProductStatus::Inactive);
        store.insert_product(&active).await.unwrap();
        store.insert_product(&inactive).await.unwrap();

        let client = Arc::new(FnAiClient::new(|_| Ok(SAFE.to_string())));
        let report = pipeline(client.clone(), store.clone())
            .run(Some(10), None)
            .await
            .unwrap();

        assert_eq!(report, AutoReviewReport::default());
        assert_eq!(client.calls(), 0);
        let after = store.find_product("active").await.unwrap().unwrap();
        assert!(after.reviewed_at.is_none());
        assert_eq!(after.updated_at, active.updated_at);
    }

    #[tokio::test]
    async fn test_huge_time_window_means_no_lower_bound() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_product(&product_fixture("p1", "s", ProductStatus::PendingReview))
            .await
            .unwrap();

        let client = Arc::new(FnAiClient::new(|req| {
            Ok(translation_answer(req).unwrap_or_else(|| SAFE.to_string()))
        }));
        let report = pipeline(client, store.clone())
            .run(Some(5), Some(i64::MAX))
            .await
            .unwrap();

        assert_eq!(report.approved, 1);
    }

    #[tokio::test]
    async fn test_safe_listing_is_approved_and_translated() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_product(&product_fixture("p1", "s", ProductStatus::PendingReview))
            .await
            .unwrap();

        let client = Arc::new(FnAiClient::new(|req| {
            Ok(translation_answer(req).unwrap_or_else(|| SAFE.to_string()))
        }));
        let report = pipeline(client, store.clone()).run(None, None).await.unwrap();

        assert_eq!(report.approved, 1);
        assert_eq!(report.flagged, 0);
        let product = store.find_product("p1").await.unwrap().unwrap();
        assert_eq!(product.status, ProductStatus::Active);
        assert!(product.reviewed_at.is_some());
        assert!(product.review_note.unwrap().contains("0.90"));
        assert_eq!(product.title_zh.as_deref(), Some("[Chinese] Sofá de tres plazas"));
        assert_eq!(product.title_en.as_deref(), Some("[English] Sofá de tres plazas"));
        assert!(product.title_es.is_some());
    }

    #[tokio::test]
    async fn test_wrong_category_is_corrected_through_classifier() {
        let store = Arc::new(MemoryStore::new());
        let mut product = product_fixture("p1", "s", ProductStatus::PendingReview);
        product.category = SystemCategory::Other;
        store.insert_product(&product).await.unwrap();

        let client = Arc::new(FnAiClient::new(|req| {
            if req.prompt.starts_with("Translate") {
                return Err(AiError::UpstreamEmptyResponse);
            }
            Ok(r#"{"isSafe":true,"categoryCorrect":false,"suggestedCategory":"Living room furniture","suggestedSubcategory":"sofas","confidence":0.8}"#.to_string())
        }));
        let report = pipeline(client, store.clone()).run(None, None).await.unwrap();

        assert_eq!(report.approved, 1);
        assert_eq!(report.category_corrected, 1);
        let product = store.find_product("p1").await.unwrap().unwrap();
        assert_eq!(product.category, SystemCategory::Furniture);
        assert_eq!(product.subcategory.as_deref(), Some("sofas"));
        // translation failures do not undo approval
        assert_eq!(product.status, ProductStatus::Active);
        assert!(product.title_zh.is_none());
    }

    #[tokio::test]
    async fn test_unsafe_or_unsure_listing_is_flagged_not_rejected() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_product(&product_fixture("unsafe", "s", ProductStatus::PendingReview))
            .await
            .unwrap();

        let client = Arc::new(FnAiClient::new(|_| {
            Ok(r#"{"isSafe":false,"categoryCorrect":true,"flaggedReason":"weapon","confidence":0.95}"#.to_string())
        }));
        let report = pipeline(client, store.clone()).run(None, None).await.unwrap();

        assert_eq!(report.flagged, 1);
        assert_eq!(report.approved, 0);
        let product = store.find_product("unsafe").await.unwrap().unwrap();
        assert_eq!(product.status, ProductStatus::PendingReview);
        assert!(product.review_note.unwrap().contains("weapon"));
        assert!(product.reviewed_at.is_some());
    }

    #[tokio::test]
    async fn test_ai_failure_counts_error_and_leaves_listing() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_product(&product_fixture("p1", "s", ProductStatus::PendingReview))
            .await
            .unwrap();
        store
            .insert_product(&product_fixture("p2", "s", ProductStatus::PendingReview))
            .await
            .unwrap();

        let client = Arc::new(FnAiClient::new(|_| Ok("not json".to_string())));
        let report = pipeline(client.clone(), store.clone())
            .run(None, None)
            .await
            .unwrap();

        assert_eq!(report.errors, 2);
        assert_eq!(client.calls(), 2);
        let product = store.find_product("p1").await.unwrap().unwrap();
        assert_eq!(product.status, ProductStatus::PendingReview);
        assert!(product.reviewed_at.is_none());
    }

    #[tokio::test]
    async fn test_nan_confidence_is_flagged() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_product(&product_fixture("p1", "s", ProductStatus::PendingReview))
            .await
            .unwrap();
        let audit = AuditResult {
            is_safe: true,
            category_correct: true,
            suggested_category: None,
            suggested_subcategory: None,
            flagged_reason: None,
            confidence: f64::NAN,
        };
        let client = Arc::new(FnAiClient::new(|_| Ok(SAFE.to_string())));
        let pipeline = pipeline(client, store.clone());
        let product = store.find_product("p1").await.unwrap().unwrap();

        let outcome = pipeline.apply_audit(&product, &audit).await.unwrap();
        assert!(matches!(outcome, Outcome::Flagged));
    }

    #[tokio::test]
    async fn test_limit_takes_oldest_first() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for (id, age) in [("new", 1), ("old", 10), ("mid", 5)] {
            let mut p = product_fixture(id, "s", ProductStatus::PendingReview);
            p.created_at = now - ChronoDuration::hours(age);
            store.insert_product(&p).await.unwrap();
        }
        let client = Arc::new(FnAiClient::new(|req| {
            Ok(translation_answer(req).unwrap_or_else(|| SAFE.to_string()))
        }));
        let report = pipeline(client, store.clone()).run(Some(2), None).await.unwrap();

        assert_eq!(report.approved, 2);
        let newest = store.find_product("new").await.unwrap().unwrap();
        assert_eq!(newest.status, ProductStatus::PendingReview);
        let oldest = store.find_product("old").await.unwrap().unwrap();
        assert_eq!(oldest.status, ProductStatus::Active);
    }
}
