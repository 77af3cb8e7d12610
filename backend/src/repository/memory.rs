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
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Process-local store used when Supabase is not configured (and in tests).
/// Conditional writes evaluate their predicate under the same lock as the write.
#[derive(Default)]
pub struct MemoryStore {
    products: Mutex<Vec<Product>>,
    orders: Mutex<Vec<Order>>,
    timeline: Mutex<Vec<OrderTimelineEntry>>,
    conversations: Mutex<Vec<Conversation>>,
    messages: Mutex<Vec<Message>>,
    translations: Mutex<HashMap<(String, Language), TranslationEntry>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| anyhow::anyhow!("In-memory store lock poisoned"))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn patch_order_where<F>(
        &self,
        id: &str,
        patch: &OrderPatch,
        predicate: F,
    ) -> Result<Option<Order>>
    where
        F: Fn(&Order) -> bool,
    {
        let mut orders = lock(&self.orders)?;
        Ok(orders
            .iter_mut()
            .find(|o| o.id == id && predicate(o))
            .map(|order| {
                patch.apply(order);
                order.clone()
            }))
    }
}

#[async_trait]
impl ProductRepository for MemoryStore {
    async fn insert_product(&self, product: &Product) -> Result<Product> {
        lock(&self.products)?.push(product.clone());
        Ok(product.clone())
    }

    async fn find_product(&self, id: &str) -> Result<Option<Product>> {
        Ok(lock(&self.products)?.iter().find(|p| p.id == id).cloned())
    }

    async fn list_active_products(&self, filter: &ListingFilter) -> Result<Vec<Product>> {
        let search = filter
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut rows: Vec<Product> = lock(&self.products)?
            .iter()
            .filter(|p| p.is_listed())
            .filter(|p| filter.category.map_or(true, |c| p.category == c))
            .filter(|p| {
                filter
                    .seller_id
                    .as_deref()
                    .map_or(true, |s| p.seller_id == s)
            })
            .filter(|p| {
                search.as_deref().map_or(true, |term| {
                    p.title.to_lowercase().contains(term)
                        || p.description.to_lowercase().contains(term)
                })
            })
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            b.is_promoted
                .cmp(&a.is_promoted)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(rows
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }

    async fn find_pending_review(
        &self,
        limit: usize,
        created_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Product>> {
        let mut rows: Vec<Product> = lock(&self.products)?
            .iter()
            .filter(|p| p.status == ProductStatus::PendingReview && p.deleted_at.is_none())
            .filter(|p| created_after.map_or(true, |after| p.created_at >= after))
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.created_at);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn update_product(&self, id: &str, patch: &ProductPatch) -> Result<Option<Product>> {
        let mut products = lock(&self.products)?;
        Ok(products.iter_mut().find(|p| p.id == id).map(|product| {
            patch.apply(product);
            product.clone()
        }))
    }

    async fn update_product_in_status(
        &self,
        id: &str,
        expected: ProductStatus,
        patch: &ProductPatch,
    ) -> Result<Option<Product>> {
        let mut products = lock(&self.products)?;
        Ok(products
            .iter_mut()
            .find(|p| p.id == id && p.status == expected)
            .map(|product| {
                patch.apply(product);
                product.clone()
            }))
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<Order> {
        lock(&self.orders)?.push(order.clone());
        Ok(order.clone())
    }

    async fn find_order(&self, id: &str) -> Result<Option<Order>> {
        Ok(lock(&self.orders)?.iter().find(|o| o.id == id).cloned())
    }

    async fn list_orders_for_user(
        &self,
        user_id: &str,
        role: Option<PartyRole>,
    ) -> Result<Vec<Order>> {
        let mut rows: Vec<Order> = lock(&self.orders)?
            .iter()
            .filter(|o| match role {
                Some(PartyRole::Buyer) => o.buyer_id == user_id,
                Some(PartyRole::Seller) => o.seller_id == user_id,
                None => o.role_of(user_id).is_some(),
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn transition_order(
        &self,
        id: &str,
        from: &[OrderStatus],
        patch: &OrderPatch,
    ) -> Result<Option<Order>> {
        self.patch_order_where(id, patch, |o| from.contains(&o.status))
    }

    async fn transition_unconfirmed(
        &self,
        id: &str,
        from: &[OrderStatus],
        patch: &OrderPatch,
    ) -> Result<Option<Order>> {
        self.patch_order_where(id, patch, |o| from.contains(&o.status) && !o.any_confirmed())
    }

    async fn confirm_party(
        &self,
        id: &str,
        role: PartyRole,
        at: DateTime<Utc>,
        allowed: &[OrderStatus],
    ) -> Result<Option<Order>> {
        let mut patch = OrderPatch {
            updated_at: Some(at),
            ..OrderPatch::default()
        };
        match role {
            PartyRole::Buyer => patch.buyer_confirmed_at = Some(Some(at)),
            PartyRole::Seller => patch.seller_confirmed_at = Some(Some(at)),
        }
        self.patch_order_where(id, &patch, |o| {
            allowed.contains(&o.status) && o.confirmed_at(role).is_none()
        })
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
        self.patch_order_where(id, &patch, |o| from.contains(&o.status) && o.both_confirmed())
    }

    async fn find_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Order>> {
        Ok(lock(&self.orders)?
            .iter()
            .filter(|o| o.status == OrderStatus::PendingPayment)
            .filter(|o| o.expires_at.map_or(false, |at| at < now))
            .cloned()
            .collect())
    }

    async fn append_timeline(&self, entry: &OrderTimelineEntry) -> Result<()> {
        lock(&self.timeline)?.push(entry.clone());
        Ok(())
    }

    async fn list_timeline(&self, order_id: &str) -> Result<Vec<OrderTimelineEntry>> {
        Ok(lock(&self.timeline)?
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn find_conversation(
        &self,
        product_id: &str,
        buyer_id: &str,
        seller_id: &str,
    ) -> Result<Option<Conversation>> {
        Ok(lock(&self.conversations)?
            .iter()
            .find(|c| c.product_id == product_id && c.buyer_id == buyer_id && c.seller_id == seller_id)
            .cloned())
    }

    async fn find_conversation_by_id(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(lock(&self.conversations)?
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<Conversation> {
        let mut conversations = lock(&self.conversations)?;
        if let Some(existing) = conversations.iter().find(|c| {
            c.product_id == conversation.product_id
                && c.buyer_id == conversation.buyer_id
                && c.seller_id == conversation.seller_id
        }) {
            return Err(anyhow::anyhow!(
                "Failed to create conversation: duplicate of {}",
                existing.id
            ));
        }
        conversations.push(conversation.clone());
        Ok(conversation.clone())
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let mut rows: Vec<Conversation> = lock(&self.conversations)?
            .iter()
            .filter(|c| c.has_participant(user_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(rows)
    }

    async fn insert_message(&self, message: &Message) -> Result<Message> {
        lock(&self.messages)?.push(message.clone());
        if let Some(conversation) = lock(&self.conversations)?
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        {
            conversation.last_message_at = Some(message.created_at);
        }
        Ok(message.clone())
    }

    async fn list_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        Ok(lock(&self.messages)?
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_messages_read(&self, conversation_id: &str, reader_id: &str) -> Result<()> {
        for message in lock(&self.messages)?
            .iter_mut()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| m.sender_id.as_deref() != Some(reader_id))
        {
            message.is_read = true;
        }
        Ok(())
    }
}

#[async_trait]
impl TranslationCacheRepository for MemoryStore {
    async fn get_translation(
        &self,
        product_id: &str,
        language: Language,
    ) -> Result<Option<TranslationEntry>> {
        Ok(lock(&self.translations)?
            .get(&(product_id.to_string(), language))
            .cloned())
    }

    async fn upsert_translation(&self, entry: &TranslationEntry) -> Result<()> {
        lock(&self.translations)?.insert(
            (entry.product_id.clone(), entry.language),
            entry.clone(),
        );
        Ok(())
    }

    async fn invalidate_translations(&self, product_id: &str) -> Result<()> {
        lock(&self.translations)?.retain(|(id, _), _| id != product_id);
        Ok(())
    }
}
