//! Persistence seams. One trait per entity; `supabase` talks to PostgREST and
//! `memory` backs local development and tests.

mod memory;
mod supabase;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

use crate::category::SystemCategory;
use crate::i18n::Language;
use crate::models::{
    Conversation, DeliveryType, Message, Order, OrderStatus, OrderTimelineEntry, PartyRole,
    Product, ProductStatus, TranslationEntry,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub category: Option<SystemCategory>,
    pub search: Option<String>,
    pub seller_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Partial update of a listing. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProductPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<SystemCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_type: Option<DeliveryType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProductStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_promoted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_zh: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_en: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_es: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_zh: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_en: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_es: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProductPatch {
    /// Stores a translation in the per-language columns of the listing.
    pub fn translation(language: Language, title: String, description: String) -> Self {
        let mut patch = Self {
            updated_at: Some(Utc::now()),
            ..Self::default()
        };
        match language {
            Language::Zh => {
                patch.title_zh = Some(title);
                patch.description_zh = Some(description);
            }
            Language::En => {
                patch.title_en = Some(title);
                patch.description_en = Some(description);
            }
            Language::Es => {
                patch.title_es = Some(title);
                patch.description_es = Some(description);
            }
        }
        patch
    }

    pub fn apply(&self, product: &mut Product) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }
        fn set_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *target = value.clone();
            }
        }

        set(&mut product.title, &self.title);
        set(&mut product.description, &self.description);
        set(&mut product.price, &self.price);
        set(&mut product.category, &self.category);
        set_opt(&mut product.subcategory, &self.subcategory);
        set(&mut product.images, &self.images);
        set_opt(&mut product.delivery_type, &self.delivery_type);
        set_opt(&mut product.location_name, &self.location_name);
        set(&mut product.status, &self.status);
        set_opt(&mut product.deleted_at, &self.deleted_at);
        set(&mut product.is_promoted, &self.is_promoted);
        set_opt(&mut product.review_note, &self.review_note);
        set_opt(&mut product.reviewed_at, &self.reviewed_at);
        set_opt(&mut product.title_zh, &self.title_zh);
        set_opt(&mut product.title_en, &self.title_en);
        set_opt(&mut product.title_es, &self.title_es);
        set_opt(&mut product.description_zh, &self.description_zh);
        set_opt(&mut product.description_en, &self.description_en);
        set_opt(&mut product.description_es, &self.description_es);
        set(&mut product.updated_at, &self.updated_at);
    }
}

/// Partial update of an order. The confirmation timestamps are double options so
/// that `Some(None)` clears them (serialized as an explicit `null`).
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_confirmed_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_confirmed_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipped_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meetup_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meetup_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispute_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderPatch {
    pub fn status(status: OrderStatus, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            updated_at: Some(now),
            ..Self::default()
        }
    }

    pub fn apply(&self, order: &mut Order) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(v) = self.buyer_confirmed_at {
            order.buyer_confirmed_at = v;
        }
        if let Some(v) = self.seller_confirmed_at {
            order.seller_confirmed_at = v;
        }
        order.paid_at = self.paid_at.or(order.paid_at);
        order.shipped_at = self.shipped_at.or(order.shipped_at);
        order.completed_at = self.completed_at.or(order.completed_at);
        order.cancelled_at = self.cancelled_at.or(order.cancelled_at);
        order.meetup_time = self.meetup_time.or(order.meetup_time);
        if let Some(v) = &self.meetup_location {
            order.meetup_location = Some(v.clone());
        }
        if let Some(v) = &self.tracking_number {
            order.tracking_number = Some(v.clone());
        }
        if let Some(v) = &self.payment_reference {
            order.payment_reference = Some(v.clone());
        }
        if let Some(v) = &self.cancel_reason {
            order.cancel_reason = Some(v.clone());
        }
        if let Some(v) = &self.dispute_reason {
            order.dispute_reason = Some(v.clone());
        }
        if let Some(v) = self.updated_at {
            order.updated_at = v;
        }
    }
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn insert_product(&self, product: &Product) -> Result<Product>;

    async fn find_product(&self, id: &str) -> Result<Option<Product>>;

    /// Active, non-deleted listings; promoted first, then newest first.
    async fn list_active_products(&self, filter: &ListingFilter) -> Result<Vec<Product>>;

    /// `pending_review` and not deleted, oldest first.
    async fn find_pending_review(
        &self,
        limit: usize,
        created_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Product>>;

    async fn update_product(&self, id: &str, patch: &ProductPatch) -> Result<Option<Product>>;

    /// Applies `patch` only while the listing is still in `expected`. Returns `None`
    /// when the row moved on (or does not exist).
    async fn update_product_in_status(
        &self,
        id: &str,
        expected: ProductStatus,
        patch: &ProductPatch,
    ) -> Result<Option<Product>>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert_order(&self, order: &Order) -> Result<Order>;

    async fn find_order(&self, id: &str) -> Result<Option<Order>>;

    async fn list_orders_for_user(
        &self,
        user_id: &str,
        role: Option<PartyRole>,
    ) -> Result<Vec<Order>>;

    /// Compare-and-swap on the status column: the patch lands only while the order
    /// is in one of `from`.
    async fn transition_order(
        &self,
        id: &str,
        from: &[OrderStatus],
        patch: &OrderPatch,
    ) -> Result<Option<Order>>;

    /// Like `transition_order`, but also requires that neither party confirmed yet.
    async fn transition_unconfirmed(
        &self,
        id: &str,
        from: &[OrderStatus],
        patch: &OrderPatch,
    ) -> Result<Option<Order>>;

    /// Sets the party's confirmation timestamp while it is still null and the order
    /// is in one of `allowed`.
    async fn confirm_party(
        &self,
        id: &str,
        role: PartyRole,
        at: DateTime<Utc>,
        allowed: &[OrderStatus],
    ) -> Result<Option<Order>>;

    /// Moves the order to `completed` when both confirmations are set and it is
    /// still in one of `from`. Exactly one concurrent caller gets `Some`.
    async fn complete_if_confirmed(
        &self,
        id: &str,
        from: &[OrderStatus],
        at: DateTime<Utc>,
    ) -> Result<Option<Order>>;

    async fn find_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Order>>;

    async fn append_timeline(&self, entry: &OrderTimelineEntry) -> Result<()>;

    async fn list_timeline(&self, order_id: &str) -> Result<Vec<OrderTimelineEntry>>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_conversation(
        &self,
        product_id: &str,
        buyer_id: &str,
        seller_id: &str,
    ) -> Result<Option<Conversation>>;

    async fn find_conversation_by_id(&self, id: &str) -> Result<Option<Conversation>>;

    async fn create_conversation(&self, conversation: &Conversation) -> Result<Conversation>;

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>>;

    /// Inserts the message and bumps the conversation's `last_message_at`.
    async fn insert_message(&self, message: &Message) -> Result<Message>;

    /// Oldest first.
    async fn list_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>>;

    /// Marks every message not sent by `reader_id` as read.
    async fn mark_messages_read(&self, conversation_id: &str, reader_id: &str) -> Result<()>;
}

#[async_trait]
pub trait TranslationCacheRepository: Send + Sync {
    async fn get_translation(
        &self,
        product_id: &str,
        language: Language,
    ) -> Result<Option<TranslationEntry>>;

    async fn upsert_translation(&self, entry: &TranslationEntry) -> Result<()>;

    /// Drops every cached language of a listing (its content changed).
    async fn invalidate_translations(&self, product_id: &str) -> Result<()>;
}

/// Everything the service layer needs from one backing store.
pub trait MarketStore:
    ProductRepository + OrderRepository + ConversationRepository + TranslationCacheRepository
{
}

impl<T> MarketStore for T where
    T: ProductRepository + OrderRepository + ConversationRepository + TranslationCacheRepository
{
}
