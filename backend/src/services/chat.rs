use crate::error::MarketError;
use crate::models::{
    Conversation, Message, MessageType, NegotiationEvent, NegotiationRequest, SendMessageRequest,
};
use crate::repository::{ConversationRepository, ProductRepository};
use crate::services::notifications::NotificationWriter;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

const MAX_MESSAGE_CHARS: usize = 2000;
const MESSAGE_PAGE: usize = 200;

/**
 * find_or_create_conversation
 * (商品, 买家, 卖家) 最多一个会话：先查再建；建失败（并发重复）时再查一次。
 */
pub async fn find_or_create_conversation(
    repo: &dyn ConversationRepository,
    product_id: &str,
    buyer_id: &str,
    seller_id: &str,
) -> Result<Conversation, MarketError> {
    if let Some(existing) = repo.find_conversation(product_id, buyer_id, seller_id).await? {
        return Ok(existing);
    }

    let conversation = Conversation {
        id: Uuid::new_v4().to_string(),
        product_id: product_id.to_string(),
        buyer_id: buyer_id.to_string(),
        seller_id: seller_id.to_string(),
        last_message_at: None,
        created_at: Utc::now(),
    };

    match repo.create_conversation(&conversation).await {
        Ok(created) => Ok(created),
        Err(create_err) => match repo.find_conversation(product_id, buyer_id, seller_id).await? {
            Some(existing) => Ok(existing),
            None => Err(MarketError::Persistence(create_err)),
        },
    }
}

pub struct ChatService {
    conversations: Arc<dyn ConversationRepository>,
    products: Arc<dyn ProductRepository>,
    notifications: Arc<NotificationWriter>,
}

impl ChatService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        products: Arc<dyn ProductRepository>,
        notifications: Arc<NotificationWriter>,
    ) -> Self {
        Self {
            conversations,
            products,
            notifications,
        }
    }

    pub async fn start(&self, buyer_id: &str, product_id: &str) -> Result<Conversation, MarketError> {
        let product = self
            .products
            .find_product(product_id)
            .await?
            .filter(|p| p.deleted_at.is_none())
            .ok_or(MarketError::NotFound("product_not_found"))?;
        if product.seller_id == buyer_id {
            return Err(MarketError::Validation("cannot_message_yourself"));
        }

        find_or_create_conversation(
            self.conversations.as_ref(),
            &product.id,
            buyer_id,
            &product.seller_id,
        )
        .await
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Conversation>, MarketError> {
        Ok(self.conversations.list_conversations(user_id).await?)
    }

    async fn participant_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Conversation, MarketError> {
        let conversation = self
            .conversations
            .find_conversation_by_id(conversation_id)
            .await?
            .ok_or(MarketError::NotFound("conversation_not_found"))?;
        if !conversation.has_participant(user_id) {
            return Err(MarketError::Forbidden);
        }
        Ok(conversation)
    }

    /// Lists the conversation and marks the other side's messages as read.
    pub async fn messages(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Vec<Message>, MarketError> {
        self.participant_conversation(conversation_id, user_id).await?;

        if let Err(e) = self
            .conversations
            .mark_messages_read(conversation_id, user_id)
            .await
        {
            log::warn!(
                "Failed to mark messages read in {}: {:?}",
                conversation_id,
                e
            );
        }
        Ok(self
            .conversations
            .list_messages(conversation_id, MESSAGE_PAGE)
            .await?)
    }

    pub async fn send(
        &self,
        conversation_id: &str,
        sender_id: &str,
        request: SendMessageRequest,
    ) -> Result<Message, MarketError> {
        self.participant_conversation(conversation_id, sender_id).await?;

        let message_type = request.message_type.unwrap_or(MessageType::Text);
        if matches!(
            message_type,
            MessageType::OrderStatus | MessageType::PriceNegotiation
        ) {
            return Err(MarketError::Validation("invalid_message"));
        }

        let text = request
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        if text.as_ref().map_or(false, |t| t.chars().count() > MAX_MESSAGE_CHARS) {
            return Err(MarketError::Validation("invalid_message"));
        }
        let valid = match message_type {
            MessageType::Text => text.is_some(),
            _ => request.content.is_some(),
        };
        if !valid {
            return Err(MarketError::Validation("invalid_message"));
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: Some(sender_id.to_string()),
            message_type,
            text,
            content: request.content,
            is_read: false,
            created_at: Utc::now(),
        };
        Ok(self.conversations.insert_message(&message).await?)
    }

    pub async fn negotiate(
        &self,
        conversation_id: &str,
        sender_id: &str,
        request: NegotiationRequest,
    ) -> Result<Message, MarketError> {
        self.participant_conversation(conversation_id, sender_id).await?;

        let needs_price = matches!(
            request.event,
            NegotiationEvent::Proposed | NegotiationEvent::Countered
        );
        let price_ok = request.price.map_or(false, |p| p.is_finite() && p > 0.0);
        if needs_price && !price_ok {
            return Err(MarketError::Validation("invalid_price"));
        }

        self.notifications
            .notify_negotiation(
                conversation_id,
                sender_id,
                request.event,
                request.price,
                request.note,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductStatus;
    use crate::repository::MemoryStore;
    use crate::test_utils::product_fixture;

    fn service(store: Arc<MemoryStore>) -> ChatService {
        let notifications = Arc::new(NotificationWriter::new(
            store.clone(),
            store.clone(),
            store.clone(),
        ));
        ChatService::new(store.clone(), store, notifications)
    }

    async fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_product(&product_fixture("p1", "seller-1", ProductStatus::Active))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_start_reuses_existing_conversation() {
        let store = seeded().await;
        let chat = service(store);
        let first = chat.start("buyer-1", "p1").await.unwrap();
        let second = chat.start("buyer-1", "p1").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(chat.list("seller-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_seller_cannot_message_own_listing() {
        let chat = service(seeded().await);
        let err = chat.start("seller-1", "p1").await.unwrap_err();
        assert!(matches!(err, MarketError::Validation("cannot_message_yourself")));
    }

    #[tokio::test]
    async fn test_outsider_cannot_read_or_send() {
        let chat = service(seeded().await);
        let conversation = chat.start("buyer-1", "p1").await.unwrap();
        let err = chat.messages(&conversation.id, "mallory").await.unwrap_err();
        assert!(matches!(err, MarketError::Forbidden));
        let err = chat
            .send(
                &conversation.id,
                "mallory",
                SendMessageRequest {
                    message_type: None,
                    text: Some("hi".to_string()),
                    content: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Forbidden));
    }

    #[tokio::test]
    async fn test_send_and_read_marks_other_side() {
        let chat = service(seeded().await);
        let conversation = chat.start("buyer-1", "p1").await.unwrap();
        chat.send(
            &conversation.id,
            "buyer-1",
            SendMessageRequest {
                message_type: None,
                text: Some("  ¿Sigue disponible?  ".to_string()),
                content: None,
            },
        )
        .await
        .unwrap();

        let seen_by_buyer = chat.messages(&conversation.id, "buyer-1").await.unwrap();
        assert!(!seen_by_buyer[0].is_read);
        let seen_by_seller = chat.messages(&conversation.id, "seller-1").await.unwrap();
        assert!(seen_by_seller[0].is_read);
        assert_eq!(seen_by_seller[0].text.as_deref(), Some("¿Sigue disponible?"));
    }

    #[tokio::test]
    async fn test_users_cannot_forge_system_cards() {
        let chat = service(seeded().await);
        let conversation = chat.start("buyer-1", "p1").await.unwrap();
        let err = chat
            .send(
                &conversation.id,
                "buyer-1",
                SendMessageRequest {
                    message_type: Some(MessageType::OrderStatus),
                    text: None,
                    content: Some(serde_json::json!({"status": "completed"})),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation("invalid_message")));
    }

    #[tokio::test]
    async fn test_counter_offer_requires_price() {
        let chat = service(seeded().await);
        let conversation = chat.start("buyer-1", "p1").await.unwrap();
        let err = chat
            .negotiate(
                &conversation.id,
                "seller-1",
                NegotiationRequest {
                    event: NegotiationEvent::Countered,
                    price: None,
                    note: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation("invalid_price")));

        let message = chat
            .negotiate(
                &conversation.id,
                "seller-1",
                NegotiationRequest {
                    event: NegotiationEvent::Countered,
                    price: Some(900.0),
                    note: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(message.message_type, MessageType::PriceNegotiation);
        assert_eq!(message.sender_id.as_deref(), Some("seller-1"));
    }
}
