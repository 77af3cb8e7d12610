//! System messages written into buyer/seller conversations when an order or a
//! price negotiation changes.

use crate::error::MarketError;
use crate::models::{Message, MessageType, NegotiationEvent, Order};
use crate::repository::{ConversationRepository, OrderRepository, ProductRepository};
use crate::services::chat::find_or_create_conversation;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

struct Bilingual {
    zh: &'static str,
    en: &'static str,
}

struct OrderTemplate {
    buyer: Bilingual,
    seller: Bilingual,
}

const fn b(zh: &'static str, en: &'static str) -> Bilingual {
    Bilingual { zh, en }
}

fn order_template(status: &str) -> Option<OrderTemplate> {
    let template = match status {
        "created" => OrderTemplate {
            buyer: b("订单已创建，请尽快完成付款", "Order created. Please complete the payment."),
            seller: b("你有一个新订单", "You have a new order."),
        },
        "paid" => OrderTemplate {
            buyer: b("付款成功，等待卖家处理", "Payment received. Waiting for the seller."),
            seller: b("买家已付款，请安排交付", "The buyer has paid. Please arrange delivery."),
        },
        "shipped" => OrderTemplate {
            buyer: b("卖家已发货", "The seller has shipped your order."),
            seller: b("已标记为发货", "Order marked as shipped."),
        },
        "buyer_confirmed" => OrderTemplate {
            buyer: b("你已确认收货", "You confirmed receipt."),
            seller: b("买家已确认收货", "The buyer confirmed receipt."),
        },
        "seller_confirmed" => OrderTemplate {
            buyer: b("卖家已确认交付", "The seller confirmed delivery."),
            seller: b("你已确认交付", "You confirmed delivery."),
        },
        "completed" => OrderTemplate {
            buyer: b("交易完成，感谢你的购买", "Order completed. Thanks for your purchase!"),
            seller: b("交易完成，款项将结算给你", "Order completed. The payment will be released to you."),
        },
        "cancelled" => OrderTemplate {
            buyer: b("订单已取消", "The order was cancelled."),
            seller: b("订单已取消", "The order was cancelled."),
        },
        "disputed" => OrderTemplate {
            buyer: b("订单进入争议处理，平台会尽快介入", "The order is in dispute. Our team will review it."),
            seller: b("买家或你对订单提出了争议，平台会尽快介入", "A dispute was opened on this order. Our team will review it."),
        },
        _ => return None,
    };
    Some(template)
}

fn negotiation_template(event: NegotiationEvent) -> Bilingual {
    match event {
        NegotiationEvent::Proposed => b("发起了出价", "made an offer"),
        NegotiationEvent::Accepted => b("接受了出价", "accepted the offer"),
        NegotiationEvent::Rejected => b("拒绝了出价", "declined the offer"),
        NegotiationEvent::Countered => b("提出了还价", "made a counter-offer"),
    }
}

fn meetup_template() -> Bilingual {
    b(
        "见面交易地点已更新，请双方重新确认",
        "The meetup plan changed. Both parties need to confirm again.",
    )
}

pub struct NotificationWriter {
    conversations: Arc<dyn ConversationRepository>,
    orders: Arc<dyn OrderRepository>,
    products: Arc<dyn ProductRepository>,
}

impl NotificationWriter {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        orders: Arc<dyn OrderRepository>,
        products: Arc<dyn ProductRepository>,
    ) -> Self {
        Self {
            conversations,
            orders,
            products,
        }
    }

    pub async fn notify_order_status(
        &self,
        order_id: &str,
        status: &str,
        extra: Option<Value>,
    ) -> Result<Option<Message>, MarketError> {
        let order = self
            .orders
            .find_order(order_id)
            .await?
            .ok_or(MarketError::NotFound("order_not_found"))?;
        self.notify_order(&order, status, extra).await
    }

    /**
     * notify_order
     * 写入一条订单状态卡片：包含订单号、状态、商品快照、金额、买卖双方两套中英文文案。
     * 没有模板的状态只记 warning，不算错误。
     */
    pub async fn notify_order(
        &self,
        order: &Order,
        status: &str,
        extra: Option<Value>,
    ) -> Result<Option<Message>, MarketError> {
        let Some(template) = order_template(status) else {
            log::warn!(
                "No notification template for order status '{}' (order {})",
                status,
                order.id
            );
            return Ok(None);
        };

        let conversation = find_or_create_conversation(
            self.conversations.as_ref(),
            &order.product_id,
            &order.buyer_id,
            &order.seller_id,
        )
        .await?;

        let product = match self.products.find_product(&order.product_id).await {
            Ok(Some(p)) => json!({
                "id": p.id,
                "title": p.title,
                "price": p.price,
                "image": p.images.first(),
            }),
            Ok(None) => json!({ "id": order.product_id }),
            Err(e) => {
                log::warn!("Product snapshot for order {} unavailable: {:?}", order.id, e);
                json!({ "id": order.product_id })
            }
        };

        let now = Utc::now();
        let mut content = Map::new();
        content.insert("order_id".to_string(), json!(order.id));
        content.insert("status".to_string(), json!(status));
        content.insert("product".to_string(), product);
        content.insert(
            "amounts".to_string(),
            json!({
                "product_amount": order.product_amount,
                "shipping_fee": order.shipping_fee,
                "platform_fee": order.platform_fee,
                "total_amount": order.total_amount,
                "currency": order.currency,
            }),
        );
        content.insert(
            "buyer_message".to_string(),
            json!({ "zh": template.buyer.zh, "en": template.buyer.en }),
        );
        content.insert(
            "seller_message".to_string(),
            json!({ "zh": template.seller.zh, "en": template.seller.en }),
        );
        content.insert("timestamp".to_string(), json!(now));
        if let Some(Value::Object(extra)) = extra {
            for (k, v) in extra {
                content.entry(k).or_insert(v);
            }
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation.id,
            sender_id: None,
            message_type: MessageType::OrderStatus,
            text: Some(format!("{} / {}", template.buyer.zh, template.buyer.en)),
            content: Some(Value::Object(content)),
            is_read: false,
            created_at: now,
        };
        Ok(Some(self.conversations.insert_message(&message).await?))
    }

    pub async fn notify_negotiation(
        &self,
        conversation_id: &str,
        sender_id: &str,
        event: NegotiationEvent,
        price: Option<f64>,
        note: Option<String>,
    ) -> Result<Message, MarketError> {
        let template = negotiation_template(event);
        let now = Utc::now();
        let price_text = price.map(|p| format!(" ${:.2}", p)).unwrap_or_default();

        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: Some(sender_id.to_string()),
            message_type: MessageType::PriceNegotiation,
            text: Some(format!(
                "{}{} / {}{}",
                template.zh, price_text, template.en, price_text
            )),
            content: Some(json!({
                "event": event.as_str(),
                "price": price,
                "note": note,
                "message": { "zh": template.zh, "en": template.en },
                "timestamp": now,
            })),
            is_read: false,
            created_at: now,
        };
        Ok(self.conversations.insert_message(&message).await?)
    }

    /// Location card for a (re)arranged meetup.
    pub async fn notify_meetup(&self, order: &Order) -> Result<Message, MarketError> {
        let conversation = find_or_create_conversation(
            self.conversations.as_ref(),
            &order.product_id,
            &order.buyer_id,
            &order.seller_id,
        )
        .await?;

        let template = meetup_template();
        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation.id,
            sender_id: None,
            message_type: MessageType::LocationShare,
            text: order.meetup_location.clone(),
            content: Some(json!({
                "order_id": order.id,
                "location": order.meetup_location,
                "time": order.meetup_time,
                "message": { "zh": template.zh, "en": template.en },
                "timestamp": now,
            })),
            is_read: false,
            created_at: now,
        };
        Ok(self.conversations.insert_message(&message).await?)
    }
}
