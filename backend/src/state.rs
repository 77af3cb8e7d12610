use crate::ai::{AiClient, AiContentService};
use crate::auth::IdentityProvider;
use crate::config::AppConfig;
use crate::repository::{MarketStore, ProductRepository};
use crate::services::{
    AutoReviewPipeline, ChatService, ListingService, NotificationWriter, OrderService,
    PaymentWebhook, TranslationService,
};
use std::sync::Arc;

/// Everything the HTTP layer needs, built once in `main` and shared by all workers.
pub struct AppState {
    pub identity: Arc<dyn IdentityProvider>,
    pub products: Arc<dyn ProductRepository>,
    pub ai: Arc<AiContentService>,
    pub translations: Arc<TranslationService>,
    pub listings: Arc<ListingService>,
    pub orders: Arc<OrderService>,
    pub chat: Arc<ChatService>,
    pub review: Arc<AutoReviewPipeline>,
    pub payments: Arc<PaymentWebhook>,
    pub cron_secret: Option<String>,
    pub site_url: String,
}

impl AppState {
    pub fn new<S>(
        store: Arc<S>,
        ai_client: Arc<dyn AiClient>,
        identity: Arc<dyn IdentityProvider>,
        config: &AppConfig,
    ) -> Self
    where
        S: MarketStore + 'static,
    {
        let ai = Arc::new(
            AiContentService::new(ai_client).with_retry_backoff(config.translation_retry_backoff),
        );
        let translations = Arc::new(TranslationService::new(store.clone(), ai.clone()));
        let notifications = Arc::new(NotificationWriter::new(
            store.clone(),
            store.clone(),
            store.clone(),
        ));
        let orders = Arc::new(
            OrderService::new(store.clone(), store.clone(), notifications.clone())
                .with_payment_window(config.order_payment_window),
        );
        let review = Arc::new(
            AutoReviewPipeline::new(store.clone(), ai.clone(), translations.clone())
                .with_item_delay(config.auto_review_delay),
        );

        Self {
            identity,
            listings: Arc::new(ListingService::new(store.clone(), store.clone())),
            chat: Arc::new(ChatService::new(store.clone(), store.clone(), notifications)),
            payments: Arc::new(PaymentWebhook::new(
                orders.clone(),
                config.payment_webhook_secret.clone(),
            )),
            products: store,
            ai,
            translations,
            orders,
            review,
            cron_secret: config.cron_secret.clone(),
            site_url: config.public_site_url.clone(),
        }
    }
}
