//! Shared fixtures and a scripted AI client for unit tests.

use crate::ai::{AiClient, AiError, GenerationRequest};
use crate::category::SystemCategory;
use crate::models::{
    DeliveryType, Order, OrderStatus, OrderType, PaymentMethod, Product, ProductStatus,
    TranslatableItem,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Handler = dyn Fn(&GenerationRequest) -> Result<String, AiError> + Send + Sync;

/// AI client whose answers come from a closure; counts calls and keeps prompts.
pub struct FnAiClient {
    handler: Box<Handler>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FnAiClient {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Result<String, AiError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiClient for FnAiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        (self.handler)(&request)
    }
}

/// `n` items with ids `item-0 .. item-{n-1}`.
pub fn items(n: usize) -> Vec<TranslatableItem> {
    (0..n)
        .map(|i| TranslatableItem {
            id: format!("item-{}", i),
            title: format!("Título {}", i),
            description: format!("Descripción {}", i),
        })
        .collect()
}

pub fn product_fixture(id: &str, seller_id: &str, status: ProductStatus) -> Product {
    let now = Utc::now();
    Product {
        id: id.to_string(),
        seller_id: seller_id.to_string(),
        title: "Sofá de tres plazas".to_string(),
        description: "Tela gris, poco uso.".to_string(),
        title_zh: None,
        title_en: None,
        title_es: None,
        description_zh: None,
        description_en: None,
        description_es: None,
        price: 1000.0,
        currency: "MXN".to_string(),
        category: SystemCategory::Furniture,
        subcategory: None,
        status,
        images: vec![],
        delivery_type: Some(DeliveryType::Both),
        latitude: None,
        longitude: None,
        location_name: Some("Guadalajara".to_string()),
        deleted_at: None,
        view_count: 0,
        report_count: 0,
        is_promoted: false,
        review_note: None,
        reviewed_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Meetup/online order between `buyer-1` and `seller-1` for product `p1`.
pub fn order_fixture(id: &str, status: OrderStatus) -> Order {
    let now = Utc::now();
    Order {
        id: id.to_string(),
        product_id: "p1".to_string(),
        buyer_id: "buyer-1".to_string(),
        seller_id: "seller-1".to_string(),
        order_type: OrderType::Meetup,
        payment_method: PaymentMethod::Online,
        product_amount: 1000.0,
        shipping_fee: 0.0,
        platform_fee: 30.0,
        total_amount: 1030.0,
        currency: "MXN".to_string(),
        status,
        buyer_confirmed_at: None,
        seller_confirmed_at: None,
        paid_at: None,
        shipped_at: None,
        completed_at: None,
        cancelled_at: None,
        meetup_location: None,
        meetup_time: None,
        shipping_address: None,
        tracking_number: None,
        payment_reference: None,
        cancel_reason: None,
        dispute_reason: None,
        expires_at: None,
        created_at: now,
        updated_at: now,
    }
}
