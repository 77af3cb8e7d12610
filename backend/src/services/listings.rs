use crate::auth::AuthUser;
use crate::category::{classify, SystemCategory};
use crate::error::MarketError;
use crate::i18n::Language;
use crate::models::{
    CreateListingRequest, ListingQuery, Product, ProductStatus, ReviewAction,
    ReviewListingRequest, UpdateListingRequest,
};
use crate::repository::{ListingFilter, ProductPatch, ProductRepository, TranslationCacheRepository};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

const MAX_TITLE_CHARS: usize = 120;
const MAX_DESCRIPTION_CHARS: usize = 5000;
const DEFAULT_PAGE: i64 = 20;
const MAX_PAGE: i64 = 100;
const DEFAULT_CURRENCY: &str = "MXN";

fn validate_title(title: &str) -> Result<String, MarketError> {
    let title = title.trim();
    let len = title.chars().count();
    if len == 0 || len > MAX_TITLE_CHARS {
        return Err(MarketError::Validation("invalid_title"));
    }
    Ok(title.to_string())
}

fn validate_description(description: &str) -> Result<String, MarketError> {
    let description = description.trim();
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(MarketError::Validation("invalid_description"));
    }
    Ok(description.to_string())
}

fn validate_price(price: f64) -> Result<f64, MarketError> {
    if !price.is_finite() || price < 0.0 {
        return Err(MarketError::Validation("invalid_price"));
    }
    Ok(price)
}

fn can_manage(product: &Product, user: &AuthUser) -> bool {
    product.seller_id == user.id || user.is_admin
}

pub struct ListingService {
    products: Arc<dyn ProductRepository>,
    translations: Arc<dyn TranslationCacheRepository>,
}

impl ListingService {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        translations: Arc<dyn TranslationCacheRepository>,
    ) -> Self {
        Self {
            products,
            translations,
        }
    }

    async fn load(&self, id: &str) -> Result<Product, MarketError> {
        self.products
            .find_product(id)
            .await?
            .filter(|p| p.deleted_at.is_none())
            .ok_or(MarketError::NotFound("product_not_found"))
    }

    /**
     * create
     * 发布商品：校验标题/描述/价格，分类经 classify 归一化，初始状态 pending_review。
     */
    pub async fn create(
        &self,
        seller: &AuthUser,
        request: CreateListingRequest,
    ) -> Result<Product, MarketError> {
        let title = validate_title(&request.title)?;
        let description = validate_description(&request.description)?;
        let price = validate_price(request.price)?;
        let now = Utc::now();

        let product = Product {
            id: Uuid::new_v4().to_string(),
            seller_id: seller.id.clone(),
            title,
            description,
            title_zh: None,
            title_en: None,
            title_es: None,
            description_zh: None,
            description_en: None,
            description_es: None,
            price,
            currency: request
                .currency
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            category: classify(Some(&request.category)),
            subcategory: request.subcategory.filter(|s| !s.trim().is_empty()),
            status: ProductStatus::PendingReview,
            images: request.images,
            delivery_type: request.delivery_type,
            latitude: request.latitude,
            longitude: request.longitude,
            location_name: request.location_name,
            deleted_at: None,
            view_count: 0,
            report_count: 0,
            is_promoted: false,
            review_note: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
        };

        let product = self.products.insert_product(&product).await?;
        log::info!(
            "Listing {} created by {} in {}",
            product.id,
            product.seller_id,
            product.category
        );
        Ok(product)
    }

    /// Non-active listings are only visible to their seller and to admins.
    pub async fn get(
        &self,
        id: &str,
        viewer: Option<&AuthUser>,
        lang: Language,
    ) -> Result<Product, MarketError> {
        let product = self.load(id).await?;
        let visible = product.is_listed() || viewer.map_or(false, |u| can_manage(&product, u));
        if !visible {
            return Err(MarketError::NotFound("product_not_found"));
        }
        Ok(product.localized(lang))
    }

    pub async fn list(
        &self,
        query: ListingQuery,
        lang: Language,
    ) -> Result<Vec<Product>, MarketError> {
        let category = match query.category.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(
                SystemCategory::parse(raw).ok_or(MarketError::Validation("invalid_category"))?,
            ),
            _ => None,
        };
        let filter = ListingFilter {
            category,
            search: query.search.filter(|s| !s.trim().is_empty()),
            seller_id: query.seller_id.filter(|s| !s.trim().is_empty()),
            limit: query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE) as usize,
            offset: query.offset.unwrap_or(0).max(0) as usize,
        };

        let products = self.products.list_active_products(&filter).await?;
        Ok(products.into_iter().map(|p| p.localized(lang)).collect())
    }

    /**
     * update
     * 卖家修改自己的商品。内容变化（标题/描述/价格/分类/图片）后重新进入 pending_review，
     * 并清掉旧的翻译缓存；状态只能下架，或把已下架的重新提交审核。
     */
    pub async fn update(
        &self,
        id: &str,
        owner: &AuthUser,
        request: UpdateListingRequest,
    ) -> Result<Product, MarketError> {
        let current = self.load(id).await?;
        if current.seller_id != owner.id {
            return Err(MarketError::Forbidden);
        }

        let mut patch = ProductPatch {
            title: request.title.as_deref().map(validate_title).transpose()?,
            description: request
                .description
                .as_deref()
                .map(validate_description)
                .transpose()?,
            price: request.price.map(validate_price).transpose()?,
            category: request.category.as_deref().map(|c| classify(Some(c))),
            subcategory: request.subcategory,
            images: request.images,
            delivery_type: request.delivery_type,
            location_name: request.location_name,
            updated_at: Some(Utc::now()),
            ..ProductPatch::default()
        };

        let content_changed = patch.title.is_some()
            || patch.description.is_some()
            || patch.price.is_some()
            || patch.category.is_some()
            || patch.subcategory.is_some()
            || patch.images.is_some();

        patch.status = match request.status {
            None => None,
            Some(ProductStatus::Inactive) => Some(ProductStatus::Inactive),
            Some(ProductStatus::Active) if current.status == ProductStatus::Inactive => {
                Some(ProductStatus::PendingReview)
            }
            Some(requested) if requested == current.status => None,
            Some(_) => return Err(MarketError::Validation("validation_error")),
        };
        // Hidden or sold listings stay hidden after an edit until the owner reactivates them.
        if content_changed && patch.status.is_none() && current.status != ProductStatus::Inactive {
            patch.status = Some(ProductStatus::PendingReview);
        }

        let updated = self
            .products
            .update_product(id, &patch)
            .await?
            .ok_or(MarketError::NotFound("product_not_found"))?;

        if content_changed {
            if let Err(e) = self.translations.invalidate_translations(id).await {
                log::warn!("Failed to invalidate translations of {}: {:?}", id, e);
            }
        }
        Ok(updated)
    }

    pub async fn delete(&self, id: &str, user: &AuthUser) -> Result<(), MarketError> {
        let current = self.load(id).await?;
        if !can_manage(&current, user) {
            return Err(MarketError::Forbidden);
        }

        let now = Utc::now();
        let patch = ProductPatch {
            status: Some(ProductStatus::Deleted),
            deleted_at: Some(now),
            updated_at: Some(now),
            ..ProductPatch::default()
        };
        self.products.update_product(id, &patch).await?;
        log::info!("Listing {} deleted by {}", id, user.id);
        Ok(())
    }

    pub async fn pending(&self, limit: Option<i64>) -> Result<Vec<Product>, MarketError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE) as usize;
        Ok(self.products.find_pending_review(limit, None).await?)
    }

    pub async fn review(
        &self,
        id: &str,
        admin: &AuthUser,
        request: ReviewListingRequest,
    ) -> Result<Product, MarketError> {
        self.load(id).await?;
        let now = Utc::now();
        let status = match request.action {
            ReviewAction::Approve => ProductStatus::Active,
            ReviewAction::Reject => ProductStatus::Inactive,
        };
        let patch = ProductPatch {
            status: Some(status),
            review_note: request.note.filter(|n| !n.trim().is_empty()),
            reviewed_at: Some(now),
            updated_at: Some(now),
            ..ProductPatch::default()
        };

        let product = self
            .products
            .update_product(id, &patch)
            .await?
            .ok_or(MarketError::NotFound("product_not_found"))?;
        log::info!(
            "Listing {} reviewed by admin {}: {}",
            id,
            admin.id,
            product.status.as_str()
        );
        Ok(product)
    }

    pub async fn promote(&self, id: &str, promoted: bool) -> Result<Product, MarketError> {
        self.load(id).await?;
        let patch = ProductPatch {
            is_promoted: Some(promoted),
            updated_at: Some(Utc::now()),
            ..ProductPatch::default()
        };
        self.products
            .update_product(id, &patch)
            .await?
            .ok_or(MarketError::NotFound("product_not_found"))
    }
}
