use crate::ai::{AiContentService, AiError, TranslationBatch};
use crate::i18n::Language;
use crate::models::{TranslatableItem, TranslationEntry};
use crate::repository::TranslationCacheRepository;
use chrono::Utc;
use std::sync::Arc;

/// Read-through / write-through translation cache keyed by `(product_id, language)`.
pub struct TranslationService {
    cache: Arc<dyn TranslationCacheRepository>,
    ai: Arc<AiContentService>,
}

impl TranslationService {
    pub fn new(cache: Arc<dyn TranslationCacheRepository>, ai: Arc<AiContentService>) -> Self {
        Self { cache, ai }
    }

    /**
     * translate_items
     * 先查缓存；未命中的按原顺序交给 AI，新翻译写回缓存（写失败只记日志）。
     * 返回结果保持输入顺序，`translated` 包含缓存命中和新翻译的 id。
     */
    pub async fn translate_items(
        &self,
        items: &[TranslatableItem],
        language: Language,
    ) -> Result<TranslationBatch, AiError> {
        let mut slots: Vec<Option<TranslatableItem>> = Vec::with_capacity(items.len());
        let mut misses: Vec<TranslatableItem> = Vec::new();
        let mut result = TranslationBatch::default();

        for item in items {
            let cached = match self.cache.get_translation(&item.id, language).await {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!(
                        "Translation cache read failed for {} ({}): {:?}",
                        item.id,
                        language,
                        e
                    );
                    None
                }
            };

            match cached {
                Some(entry) => {
                    result.translated.insert(item.id.clone());
                    slots.push(Some(TranslatableItem {
                        id: item.id.clone(),
                        title: entry.title,
                        description: entry.description,
                    }));
                }
                None => {
                    misses.push(item.clone());
                    slots.push(None);
                }
            }
        }

        let mut fresh = if misses.is_empty() {
            TranslationBatch::default()
        } else {
            log::debug!(
                "Translation cache: {} hits, {} misses for {}",
                items.len() - misses.len(),
                misses.len(),
                language
            );
            self.ai.try_translate(&misses, language).await?
        };

        for item in &fresh.items {
            if !fresh.is_translated(&item.id) {
                continue;
            }
            let entry = TranslationEntry {
                product_id: item.id.clone(),
                language,
                title: item.title.clone(),
                description: item.description.clone(),
                updated_at: Utc::now(),
            };
            if let Err(e) = self.cache.upsert_translation(&entry).await {
                log::warn!(
                    "Translation cache write failed for {} ({}): {:?}",
                    item.id,
                    language,
                    e
                );
            }
        }

        result.translated.extend(fresh.translated.drain());
        let mut fresh_items = fresh.items.into_iter();
        result.items = slots
            .into_iter()
            .map(|slot| slot.or_else(|| fresh_items.next()))
            .collect::<Option<Vec<_>>>()
            .unwrap_or_else(|| items.to_vec());

        Ok(result)
    }

    /// Best-effort: unknown languages and failures return the input unchanged.
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

        match self.translate_items(&items, language).await {
            Ok(batch) => batch.items,
            Err(e) => {
                log::error!("Translation to {} failed: {}", language, e);
                items
            }
        }
    }
}
