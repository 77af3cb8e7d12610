use super::{
    ConversationRepository, ListingFilter, OrderPatch, OrderRepository, ProductPatch,
    ProductRepository, TranslationCacheRepository,
};
use crate::i18n::Language;
use crate::models::{
    Conversation, Message, Order, OrderStatus, OrderTimelineEntry, PartyRole, Product,
    ProductStatus, TranslationEntry,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Supabase PostgREST backed store (`{SUPABASE_URL}/rest/v1/{table}`).
pub struct SupabaseStore {
    client: Client,
    supabase_url: String,
    supabase_key: String,
}

fn status_list(statuses: &[OrderStatus]) -> String {
    let joined = statuses
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({})", joined)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/**
 * sanitize_search_term
 * PostgREST 的 or=(...) 语法里逗号和括号是分隔符，搜索词里直接去掉。
 */
fn sanitize_search_term(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, ',' | '(' | ')' | '*' | '"'))
        .collect::<String>()
        .trim()
        .to_string()
}

impl SupabaseStore {
    pub fn new(supabase_url: impl Into<String>, supabase_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            supabase_url: supabase_url.into().trim_end_matches('/').to_string(),
            supabase_key: supabase_key.into(),
        }
    }

    fn table_url(&self, table: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.supabase_url, table))?;
        if !query.is_empty() {
            let mut qp = url.query_pairs_mut();
            for (k, v) in query {
                qp.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.supabase_key)
            .header("Authorization", &format!("Bearer {}", self.supabase_key))
            .header("Accept", "application/json")
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<Vec<T>> {
        let url = self.table_url(table, query)?;
        let response = self.request(Method::GET, url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Failed to fetch {}: {}. Body: {}",
                what,
                status,
                body
            ));
        }

        Ok(response.json().await?)
    }

    async fn insert<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        table: &str,
        body: &B,
        what: &str,
    ) -> Result<T> {
        let url = self.table_url(table, &[])?;
        let response = self
            .request(Method::POST, url)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Failed to create {}: {}. Body: {}",
                what,
                status,
                body
            ));
        }

        let mut rows: Vec<T> = response.json().await?;
        if rows.is_empty() {
            return Err(anyhow::anyhow!("Invalid response from database"));
        }
        Ok(rows.remove(0))
    }

    /// Conditional PATCH; the filters in `query` act as the compare half of a
    /// compare-and-swap. An empty representation means nothing matched.
    async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        table: &str,
        query: &[(&str, String)],
        body: &B,
        what: &str,
    ) -> Result<Option<T>> {
        let url = self.table_url(table, query)?;
        let response = self
            .request(Method::PATCH, url)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;

        if response.status() == 404 {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Failed to update {}: {}. Body: {}",
                what,
                status,
                body
            ));
        }

        let mut rows: Vec<T> = response.json().await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }
}

#[async_trait]
impl ProductRepository for SupabaseStore {
    async fn insert_product(&self, product: &Product) -> Result<Product> {
        self.insert("products", product, "product").await
    }

    async fn find_product(&self, id: &str) -> Result<Option<Product>> {
        let rows: Vec<Product> = self
            .select(
                "products",
                &[("id", format!("eq.{}", id)), ("limit", "1".to_string())],
                "product",
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_active_products(&self, filter: &ListingFilter) -> Result<Vec<Product>> {
        let mut query: Vec<(&str, String)> = vec![
            ("select", "*".to_string()),
            ("status", "eq.active".to_string()),
            ("deleted_at", "is.null".to_string()),
            ("order", "is_promoted.desc,created_at.desc".to_string()),
            ("limit", filter.limit.to_string()),
            ("offset", filter.offset.to_string()),
        ];
        if let Some(category) = filter.category {
            query.push(("category", format!("eq.{}", category.as_str())));
        }
        if let Some(seller_id) = &filter.seller_id {
            query.push(("seller_id", format!("eq.{}", seller_id)));
        }
        if let Some(search) = filter.search.as_deref().map(sanitize_search_term) {
            if !search.is_empty() {
                query.push((
                    "or",
                    format!(
                        "(title.ilike.*{0}*,description.ilike.*{0}*)",
                        search
                    ),
                ));
            }
        }

        self.select("products", &query, "products").await
    }

    async fn find_pending_review(
        &self,
        limit: usize,
        created_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Product>> {
        let mut query: Vec<(&str, String)> = vec![
            ("select", "*".to_string()),
            ("status", "eq.pending_review".to_string()),
            ("deleted_at", "is.null".to_string()),
            ("order", "created_at.asc".to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(after) = created_after {
            query.push(("created_at", format!("gte.{}", timestamp(after))));
        }

        self.select("products", &query, "pending products").await
    }

    async fn update_product(&self, id: &str, patch: &ProductPatch) -> Result<Option<Product>> {
        self.patch(
            "products",
            &[("id", format!("eq.{}", id))],
            patch,
            "product",
        )
        .await
    }

    async fn update_product_in_status(
        &self,
        id: &str,
        expected: ProductStatus,
        patch: &ProductPatch,
    ) -> Result<Option<Product>> {
        self.patch(
            "products",
            &[
                ("id", format!("eq.{}", id)),
                ("status", format!("eq.{}", expected.as_str())),
            ],
            patch,
            "product",
        )
        .await
    }
}

#[async_trait]
impl OrderRepository for SupabaseStore {
    async fn insert_order(&self, order: &Order) -> Result<Order> {
        self.insert("orders", order, "order").await
    }

    async fn find_order(&self, id: &str) -> Result<Option<Order>> {
        let rows: Vec<Order> = self
            .select(
                "orders",
                &[("id", format!("eq.{}", id)), ("limit", "1".to_string())],
                "order",
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_orders_for_user(
        &self,
        user_id: &str,
        role: Option<PartyRole>,
    ) -> Result<Vec<Order>> {
        let mut query: Vec<(&str, String)> = vec![
            ("select", "*".to_string()),
            ("order", "created_at.desc".to_string()),
        ];
        match role {
            Some(PartyRole::Buyer) => query.push(("buyer_id", format!("eq.{}", user_id))),
            Some(PartyRole::Seller) => query.push(("seller_id", format!("eq.{}", user_id))),
            None => query.push((
                "or",
                format!("(buyer_id.eq.{0},seller_id.eq.{0})", user_id),
            )),
        }
        self.select("orders", &query, "orders").await
    }

    async fn transition_order(
        &self,
        id: &str,
        from: &[OrderStatus],
        patch: &OrderPatch,
    ) -> Result<Option<Order>> {
        self.patch(
            "orders",
            &[("id", format!("eq.{}", id)), ("status", status_list(from))],
            patch,
            "order",
        )
        .await
    }

    async fn transition_unconfirmed(
        &self,
        id: &str,
        from: &[OrderStatus],
        patch: &OrderPatch,
    ) -> Result<Option<Order>> {
        self.patch(
            "orders",
            &[
                ("id", format!("eq.{}", id)),
                ("status", status_list(from)),
                ("buyer_confirmed_at", "is.null".to_string()),
                ("seller_confirmed_at", "is.null".to_string()),
            ],
            patch,
            "order",
        )
        .await
    }

    async fn confirm_party(
        &self,
        id: &str,
        role: PartyRole,
        at: DateTime<Utc>,
        allowed: &[OrderStatus],
    ) -> Result<Option<Order>> {
        let column = match role {
            PartyRole::Buyer => "buyer_confirmed_at",
            PartyRole::Seller => "seller_confirmed_at",
        };
        let body = serde_json::json!({ column: at, "updated_at": at });
        self.patch(
            "orders",
            &[
                ("id", format!("eq.{}", id)),
                ("status", status_list(allowed)),
                (column, "is.null".to_string()),
            ],
            &body,
            "order confirmation",
        )
        .await
    }

    async fn complete_if_confirmed(
        &self,
        id: &str,
        from: &[OrderStatus],
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let patch = OrderPatch {
            completed_at: Some(at),
            ..OrderPatch::status(OrderStatus::Completed, at)
        };
        self.patch(
            "orders",
            &[
                ("id", format!("eq.{}", id)),
                ("status", status_list(from)),
                ("buyer_confirmed_at", "not.is.null".to_string()),
                ("seller_confirmed_at", "not.is.null".to_string()),
            ],
            &patch,
            "order completion",
        )
        .await
    }

    async fn find_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Order>> {
        self.select(
            "orders",
            &[
                ("select", "*".to_string()),
                ("status", "eq.pending_payment".to_string()),
                ("expires_at", format!("lt.{}", timestamp(now))),
                ("order", "expires_at.asc".to_string()),
            ],
            "expired orders",
        )
        .await
    }

    async fn append_timeline(&self, entry: &OrderTimelineEntry) -> Result<()> {
        let _: OrderTimelineEntry = self.insert("order_timeline", entry, "timeline entry").await?;
        Ok(())
    }

    async fn list_timeline(&self, order_id: &str) -> Result<Vec<OrderTimelineEntry>> {
        self.select(
            "order_timeline",
            &[
                ("select", "*".to_string()),
                ("order_id", format!("eq.{}", order_id)),
                ("order", "created_at.asc".to_string()),
            ],
            "order timeline",
        )
        .await
    }
}

#[async_trait]
impl ConversationRepository for SupabaseStore {
    async fn find_conversation(
        &self,
        product_id: &str,
        buyer_id: &str,
        seller_id: &str,
    ) -> Result<Option<Conversation>> {
        let rows: Vec<Conversation> = self
            .select(
                "conversations",
                &[
                    ("product_id", format!("eq.{}", product_id)),
                    ("buyer_id", format!("eq.{}", buyer_id)),
                    ("seller_id", format!("eq.{}", seller_id)),
                    ("limit", "1".to_string()),
                ],
                "conversation",
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_conversation_by_id(&self, id: &str) -> Result<Option<Conversation>> {
        let rows: Vec<Conversation> = self
            .select(
                "conversations",
                &[("id", format!("eq.{}", id)), ("limit", "1".to_string())],
                "conversation",
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<Conversation> {
        self.insert("conversations", conversation, "conversation").await
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        self.select(
            "conversations",
            &[
                ("select", "*".to_string()),
                ("or", format!("(buyer_id.eq.{0},seller_id.eq.{0})", user_id)),
                ("order", "last_message_at.desc.nullslast".to_string()),
            ],
            "conversations",
        )
        .await
    }

    async fn insert_message(&self, message: &Message) -> Result<Message> {
        let saved: Message = self.insert("messages", message, "message").await?;

        let touched: Result<Option<Conversation>> = self
            .patch(
                "conversations",
                &[("id", format!("eq.{}", message.conversation_id))],
                &serde_json::json!({ "last_message_at": saved.created_at }),
                "conversation",
            )
            .await;
        if let Err(e) = touched {
            log::warn!(
                "Failed to bump last_message_at for conversation {}: {:?}",
                message.conversation_id,
                e
            );
        }

        Ok(saved)
    }

    async fn list_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        self.select(
            "messages",
            &[
                ("select", "*".to_string()),
                ("conversation_id", format!("eq.{}", conversation_id)),
                ("order", "created_at.asc".to_string()),
                ("limit", limit.to_string()),
            ],
            "messages",
        )
        .await
    }

    async fn mark_messages_read(&self, conversation_id: &str, reader_id: &str) -> Result<()> {
        let _: Option<Message> = self
            .patch(
                "messages",
                &[
                    ("conversation_id", format!("eq.{}", conversation_id)),
                    ("is_read", "eq.false".to_string()),
                    ("or", format!("(sender_id.is.null,sender_id.neq.{})", reader_id)),
                ],
                &serde_json::json!({ "is_read": true }),
                "messages",
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TranslationCacheRepository for SupabaseStore {
    async fn get_translation(
        &self,
        product_id: &str,
        language: Language,
    ) -> Result<Option<TranslationEntry>> {
        let rows: Vec<TranslationEntry> = self
            .select(
                "product_translations",
                &[
                    ("product_id", format!("eq.{}", product_id)),
                    ("language", format!("eq.{}", language.code())),
                    ("limit", "1".to_string()),
                ],
                "translation",
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_translation(&self, entry: &TranslationEntry) -> Result<()> {
        let url = self.table_url(
            "product_translations",
            &[("on_conflict", "product_id,language".to_string())],
        )?;

        let response = self
            .request(Method::POST, url)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(entry)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Failed to upsert translation: {}. Body: {}",
                status,
                body
            ));
        }
        Ok(())
    }

    async fn invalidate_translations(&self, product_id: &str) -> Result<()> {
        let url = self.table_url(
            "product_translations",
            &[("product_id", format!("eq.{}", product_id))],
        )?;
        let response = self.request(Method::DELETE, url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Failed to delete translations: {}. Body: {}",
                status,
                body
            ));
        }
        Ok(())
    }
}
