use crate::category::SystemCategory;
use crate::i18n::Language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::{IntoParams, ToSchema};

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    PendingReview,
    Active,
    Inactive,
    Deleted,
}

impl ProductStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductStatus::PendingReview => "pending_review",
            ProductStatus::Active => "active",
            ProductStatus::Inactive => "inactive",
            ProductStatus::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryType {
    Meetup,
    Shipping,
    Both,
}

#[derive(Debug, Serialize, Deserialize, Clone, ToSchema)]
pub struct Product {
    pub id: String,
    pub seller_id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub title_zh: Option<String>,
    #[serde(default)]
    pub title_en: Option<String>,
    #[serde(default)]
    pub title_es: Option<String>,
    #[serde(default)]
    pub description_zh: Option<String>,
    #[serde(default)]
    pub description_en: Option<String>,
    #[serde(default)]
    pub description_es: Option<String>,
    pub price: f64,
    pub currency: String,
    pub category: SystemCategory,
    #[serde(default)]
    pub subcategory: Option<String>,
    pub status: ProductStatus,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub delivery_type: Option<DeliveryType>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub view_count: i64,
    #[serde(default)]
    pub report_count: i64,
    #[serde(default)]
    pub is_promoted: bool,
    #[serde(default)]
    pub review_note: Option<String>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn is_listed(&self) -> bool {
        self.status == ProductStatus::Active && self.deleted_at.is_none()
    }

    pub fn translated_title(&self, lang: Language) -> Option<&str> {
        match lang {
            Language::Zh => self.title_zh.as_deref(),
            Language::En => self.title_en.as_deref(),
            Language::Es => self.title_es.as_deref(),
        }
    }

    pub fn translated_description(&self, lang: Language) -> Option<&str> {
        match lang {
            Language::Zh => self.description_zh.as_deref(),
            Language::En => self.description_en.as_deref(),
            Language::Es => self.description_es.as_deref(),
        }
    }

    /**
     * localized
     * 用对应语言的翻译字段覆盖 title/description（没有翻译时保持原文）。
     */
    pub fn localized(mut self, lang: Language) -> Self {
        if let Some(title) = self.translated_title(lang).filter(|v| !v.trim().is_empty()) {
            self.title = title.to_string();
        }
        if let Some(description) = self
            .translated_description(lang)
            .filter(|v| !v.trim().is_empty())
        {
            self.description = description.to_string();
        }
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, ToSchema)]
pub struct CreateListingRequest {
    pub title: String,
    pub description: String,
    pub price: f64,
    pub currency: Option<String>,
    pub category: String,
    pub subcategory: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub delivery_type: Option<DeliveryType>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, ToSchema)]
pub struct UpdateListingRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub images: Option<Vec<String>>,
    pub delivery_type: Option<DeliveryType>,
    pub location_name: Option<String>,
    pub status: Option<ProductStatus>,
}

#[derive(Debug, Deserialize, Default, IntoParams, ToSchema)]
pub struct ListingQuery {
    pub category: Option<String>,
    pub search: Option<String>,
    pub seller_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReviewListingRequest {
    pub action: ReviewAction,
    pub note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PromoteListingRequest {
    pub promoted: bool,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Meetup,
    Shipping,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Online,
    Cash,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    MeetupArranged,
    Shipped,
    Disputed,
    Cancelled,
    Completed,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::MeetupArranged => "meetup_arranged",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Disputed => "disputed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PartyRole {
    Buyer,
    Seller,
}

#[derive(Debug, Serialize, Deserialize, Clone, ToSchema)]
pub struct Order {
    pub id: String,
    pub product_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub order_type: OrderType,
    pub payment_method: PaymentMethod,
    pub product_amount: f64,
    pub shipping_fee: f64,
    pub platform_fee: f64,
    pub total_amount: f64,
    pub currency: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub buyer_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub seller_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub shipped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub meetup_location: Option<String>,
    #[serde(default)]
    pub meetup_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub shipping_address: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub payment_reference: Option<String>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub dispute_reason: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn role_of(&self, user_id: &str) -> Option<PartyRole> {
        if self.buyer_id == user_id {
            Some(PartyRole::Buyer)
        } else if self.seller_id == user_id {
            Some(PartyRole::Seller)
        } else {
            None
        }
    }

    pub fn confirmed_at(&self, role: PartyRole) -> Option<DateTime<Utc>> {
        match role {
            PartyRole::Buyer => self.buyer_confirmed_at,
            PartyRole::Seller => self.seller_confirmed_at,
        }
    }

    pub fn both_confirmed(&self) -> bool {
        self.buyer_confirmed_at.is_some() && self.seller_confirmed_at.is_some()
    }

    pub fn any_confirmed(&self) -> bool {
        self.buyer_confirmed_at.is_some() || self.seller_confirmed_at.is_some()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, ToSchema)]
pub struct CreateOrderRequest {
    pub product_id: String,
    pub order_type: OrderType,
    pub payment_method: PaymentMethod,
    /// Price agreed in chat; defaults to the listing price.
    pub agreed_price: Option<f64>,
    pub shipping_address: Option<String>,
    pub meetup_location: Option<String>,
    pub meetup_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ArrangeMeetupRequest {
    pub location: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ShipOrderRequest {
    pub tracking_number: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReasonRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Default, IntoParams)]
pub struct OrderListQuery {
    pub role: Option<PartyRole>,
}

#[derive(Debug, Serialize, Deserialize, Clone, ToSchema)]
pub struct OrderTimelineEntry {
    pub id: String,
    pub order_id: String,
    pub event_type: String,
    pub description: String,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, ToSchema)]
pub struct Conversation {
    pub id: String,
    pub product_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    OrderStatus,
    PriceNegotiation,
    ImageShare,
    LocationShare,
}

#[derive(Debug, Serialize, Deserialize, Clone, ToSchema)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    /// `None` for system-generated messages.
    #[serde(default)]
    pub sender_id: Option<String>,
    pub message_type: MessageType,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub content: Option<serde_json::Value>,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartConversationRequest {
    pub product_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub message_type: Option<MessageType>,
    pub text: Option<String>,
    #[schema(value_type = Object)]
    pub content: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationEvent {
    Proposed,
    Accepted,
    Rejected,
    Countered,
}

impl NegotiationEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            NegotiationEvent::Proposed => "proposed",
            NegotiationEvent::Accepted => "accepted",
            NegotiationEvent::Rejected => "rejected",
            NegotiationEvent::Countered => "countered",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NegotiationRequest {
    pub event: NegotiationEvent,
    pub price: Option<f64>,
    pub note: Option<String>,
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
pub struct TranslatableItem {
    pub id: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, ToSchema)]
pub struct TranslationEntry {
    pub product_id: String,
    pub language: Language,
    pub title: String,
    pub description: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TranslateRequest {
    pub items: Vec<TranslatableItem>,
    pub target_language: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListingDraftRequest {
    /// Base64 encoded image, optionally as a `data:` URL.
    pub image: String,
    pub mime_type: Option<String>,
    pub language: Option<Language>,
}

// ---------------------------------------------------------------------------
// Moderation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Default, ToSchema)]
pub struct AutoReviewRequest {
    pub limit: Option<usize>,
    pub hours_ago: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq, ToSchema)]
pub struct AutoReviewReport {
    pub approved: u32,
    pub category_corrected: u32,
    pub flagged: u32,
    pub errors: u32,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductApiResponse {
    pub success: bool,
    pub data: Option<Product>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductsApiResponse {
    pub success: bool,
    pub data: Option<Vec<Product>>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderApiResponse {
    pub success: bool,
    pub data: Option<Order>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AutoReviewApiResponse {
    pub success: bool,
    pub data: Option<AutoReviewReport>,
    pub message: Option<String>,
}
