//! Escrow-style order lifecycle.
//!
//! ```text
//! pending_payment ──pay──▶ paid ──meetup──▶ meetup_arranged ─┐
//!        │                  │ ╲──ship──▶ shipped             │
//!        ▼                  ▼                 │               │
//!    cancelled ◀──────── (unconfirmed)        ▼               ▼
//!                        buyer + seller confirmed ──▶ completed
//! ```
//! `disputed` is reachable from `paid`, `meetup_arranged` and `shipped`.

use crate::error::MarketError;
use crate::models::{
    CreateOrderRequest, DeliveryType, Order, OrderStatus, OrderTimelineEntry, OrderType,
    PartyRole, PaymentMethod, ProductStatus,
};
use crate::repository::{OrderPatch, OrderRepository, ProductPatch, ProductRepository};
use crate::services::notifications::NotificationWriter;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub const SHIPPING_FLAT_FEE: f64 = 50.0;
pub const PLATFORM_FEE_RATE: f64 = 0.03;

const CONFIRMABLE: [OrderStatus; 3] = [
    OrderStatus::Paid,
    OrderStatus::MeetupArranged,
    OrderStatus::Shipped,
];
const MEETUP_ARRANGEABLE: [OrderStatus; 2] = [OrderStatus::Paid, OrderStatus::MeetupArranged];
const CANCELLABLE_UNCONFIRMED: [OrderStatus; 2] = [OrderStatus::Paid, OrderStatus::MeetupArranged];

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderFees {
    pub product_amount: f64,
    pub shipping_fee: f64,
    pub platform_fee: f64,
    pub total_amount: f64,
}

impl OrderFees {
    /**
     * compute
     * 运费：shipping 订单固定 50；平台费：线上支付收 3%；总额 = 三者之和（四舍五入到分，下单时冻结）。
     */
    pub fn compute(product_amount: f64, order_type: OrderType, payment_method: PaymentMethod) -> Self {
        let product_amount = round_cents(product_amount);
        let shipping_fee = match order_type {
            OrderType::Shipping => SHIPPING_FLAT_FEE,
            OrderType::Meetup => 0.0,
        };
        let platform_fee = match payment_method {
            PaymentMethod::Online => round_cents(product_amount * PLATFORM_FEE_RATE),
            PaymentMethod::Cash => 0.0,
        };
        Self {
            product_amount,
            shipping_fee,
            platform_fee,
            total_amount: round_cents(product_amount + shipping_fee + platform_fee),
        }
    }
}

pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    products: Arc<dyn ProductRepository>,
    notifications: Arc<NotificationWriter>,
    payment_window: Duration,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        products: Arc<dyn ProductRepository>,
        notifications: Arc<NotificationWriter>,
    ) -> Self {
        Self {
            orders,
            products,
            notifications,
            payment_window: Duration::hours(24),
        }
    }

    pub fn with_payment_window(mut self, window: Duration) -> Self {
        self.payment_window = window;
        self
    }

    async fn load(&self, order_id: &str) -> Result<Order, MarketError> {
        self.orders
            .find_order(order_id)
            .await?
            .ok_or(MarketError::NotFound("order_not_found"))
    }

    async fn load_for_party(
        &self,
        order_id: &str,
        actor_id: &str,
    ) -> Result<(Order, PartyRole), MarketError> {
        let order = self.load(order_id).await?;
        let role = order.role_of(actor_id).ok_or(MarketError::Forbidden)?;
        Ok((order, role))
    }

    /// Lost a compare-and-swap: re-read and report the status we actually hit.
    async fn conflict(&self, order_id: &str, action: &'static str) -> MarketError {
        match self.load(order_id).await {
            Ok(current) => MarketError::InvalidTransition {
                from: current.status,
                action,
            },
            Err(e) => e,
        }
    }

    async fn record(
        &self,
        order: &Order,
        event_type: &str,
        description: String,
        actor: Option<&str>,
        metadata: Value,
    ) {
        let entry = OrderTimelineEntry {
            id: Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            event_type: event_type.to_string(),
            description,
            created_by: actor.map(str::to_string),
            metadata,
            created_at: Utc::now(),
        };
        if let Err(e) = self.orders.append_timeline(&entry).await {
            log::error!(
                "Failed to append timeline '{}' for order {}: {:?}",
                event_type,
                order.id,
                e
            );
        }
    }

    async fn notify(&self, order: &Order, status: &str, extra: Option<Value>) {
        if let Err(e) = self.notifications.notify_order(order, status, extra).await {
            log::warn!(
                "Failed to write '{}' notification for order {}: {}",
                status,
                order.id,
                e
            );
        }
    }

    pub async fn create_order(
        &self,
        buyer_id: &str,
        request: CreateOrderRequest,
    ) -> Result<Order, MarketError> {
        let product = self
            .products
            .find_product(&request.product_id)
            .await?
            .ok_or(MarketError::NotFound("product_not_found"))?;
        if !product.is_listed() {
            return Err(MarketError::Validation("product_not_available"));
        }
        if product.seller_id == buyer_id {
            return Err(MarketError::Validation("cannot_buy_own_product"));
        }
        match (product.delivery_type, request.order_type) {
            (Some(DeliveryType::Meetup), OrderType::Shipping) => {
                return Err(MarketError::Validation("meetup_only"))
            }
            (Some(DeliveryType::Shipping), OrderType::Meetup) => {
                return Err(MarketError::Validation("shipping_only"))
            }
            _ => {}
        }

        let amount = request.agreed_price.unwrap_or(product.price);
        if !amount.is_finite() || amount <= 0.0 {
            return Err(MarketError::Validation("invalid_price"));
        }
        let shipping_address = request
            .shipping_address
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());
        if request.order_type == OrderType::Shipping && shipping_address.is_none() {
            return Err(MarketError::Validation("shipping_address_required"));
        }

        let fees = OrderFees::compute(amount, request.order_type, request.payment_method);
        let now = Utc::now();
        let (status, paid_at, expires_at) = match request.payment_method {
            PaymentMethod::Cash => (OrderStatus::Paid, Some(now), None),
            PaymentMethod::Online => (
                OrderStatus::PendingPayment,
                None,
                Some(now + self.payment_window),
            ),
        };
        let is_meetup = request.order_type == OrderType::Meetup;

        let order = Order {
            id: Uuid::new_v4().to_string(),
            product_id: product.id.clone(),
            buyer_id: buyer_id.to_string(),
            seller_id: product.seller_id.clone(),
            order_type: request.order_type,
            payment_method: request.payment_method,
            product_amount: fees.product_amount,
            shipping_fee: fees.shipping_fee,
            platform_fee: fees.platform_fee,
            total_amount: fees.total_amount,
            currency: product.currency.clone(),
            status,
            buyer_confirmed_at: None,
            seller_confirmed_at: None,
            paid_at,
            shipped_at: None,
            completed_at: None,
            cancelled_at: None,
            meetup_location: request
                .meetup_location
                .filter(|_| is_meetup)
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
            meetup_time: request.meetup_time.filter(|_| is_meetup),
            shipping_address: shipping_address.filter(|_| !is_meetup),
            tracking_number: None,
            payment_reference: None,
            cancel_reason: None,
            dispute_reason: None,
            expires_at,
            created_at: now,
            updated_at: now,
        };

        let order = self.orders.insert_order(&order).await?;
        log::info!(
            "Order {} created: product={}, total={} {}, status={}",
            order.id,
            order.product_id,
            order.total_amount,
            order.currency,
            order.status
        );

        self.record(
            &order,
            "created",
            format!("Order created ({} / {})", order.total_amount, order.currency),
            Some(buyer_id),
            json!({
                "product_amount": order.product_amount,
                "shipping_fee": order.shipping_fee,
                "platform_fee": order.platform_fee,
                "total_amount": order.total_amount,
                "payment_method": order.payment_method,
                "order_type": order.order_type,
            }),
        )
        .await;
        self.notify(&order, "created", None).await;
        Ok(order)
    }

    /// Payment webhook. Orders that are already paid are returned unchanged.
    pub async fn confirm_payment(
        &self,
        order_id: &str,
        reference: Option<String>,
    ) -> Result<Order, MarketError> {
        let order = self.load(order_id).await?;
        if order.status != OrderStatus::PendingPayment {
            if order.paid_at.is_some() && order.status != OrderStatus::Cancelled {
                log::info!("Order {} already paid, webhook ignored", order.id);
                return Ok(order);
            }
            return Err(MarketError::InvalidTransition {
                from: order.status,
                action: "confirm_payment",
            });
        }

        let now = Utc::now();
        let patch = OrderPatch {
            paid_at: Some(now),
            payment_reference: reference.clone(),
            ..OrderPatch::status(OrderStatus::Paid, now)
        };
        let Some(paid) = self
            .orders
            .transition_order(order_id, &[OrderStatus::PendingPayment], &patch)
            .await?
        else {
            let current = self.load(order_id).await?;
            if current.status == OrderStatus::Paid {
                return Ok(current);
            }
            return Err(MarketError::InvalidTransition {
                from: current.status,
                action: "confirm_payment",
            });
        };

        self.record(
            &paid,
            "paid",
            "Payment confirmed".to_string(),
            None,
            json!({ "payment_reference": reference }),
        )
        .await;
        self.notify(&paid, "paid", None).await;
        Ok(paid)
    }

    /**
     * confirm
     * 买家或卖家确认。每方只记录一次（CAS：*_confirmed_at 为空时才写入）；
     * 双方都确认后再用一次 CAS 把订单置为 completed，只有一个调用方会赢得这次写入。
     */
    pub async fn confirm(&self, order_id: &str, actor_id: &str) -> Result<Order, MarketError> {
        let (order, role) = self.load_for_party(order_id, actor_id).await?;
        if order.status == OrderStatus::Completed {
            return Ok(order);
        }

        let order = if order.confirmed_at(role).is_some() {
            order
        } else {
            if !CONFIRMABLE.contains(&order.status) {
                return Err(MarketError::InvalidTransition {
                    from: order.status,
                    action: "confirm",
                });
            }
            match self
                .orders
                .confirm_party(order_id, role, Utc::now(), &CONFIRMABLE)
                .await?
            {
                Some(updated) => {
                    let event = match role {
                        PartyRole::Buyer => "buyer_confirmed",
                        PartyRole::Seller => "seller_confirmed",
                    };
                    self.record(
                        &updated,
                        event,
                        format!("{:?} confirmed the order", role),
                        Some(actor_id),
                        Value::Null,
                    )
                    .await;
                    self.notify(&updated, event, None).await;
                    updated
                }
                None => {
                    let current = self.load(order_id).await?;
                    if current.confirmed_at(role).is_none()
                        && current.status != OrderStatus::Completed
                    {
                        return Err(MarketError::InvalidTransition {
                            from: current.status,
                            action: "confirm",
                        });
                    }
                    current
                }
            }
        };

        if !order.both_confirmed() || order.status == OrderStatus::Completed {
            return Ok(order);
        }

        let Some(completed) = self
            .orders
            .complete_if_confirmed(order_id, &CONFIRMABLE, Utc::now())
            .await?
        else {
            return self.load(order_id).await;
        };

        log::info!("Order {} completed", completed.id);
        self.record(
            &completed,
            "completed",
            "Both parties confirmed, order completed".to_string(),
            Some(actor_id),
            Value::Null,
        )
        .await;
        self.notify(&completed, "completed", None).await;

        let sold = ProductPatch {
            status: Some(ProductStatus::Inactive),
            updated_at: Some(Utc::now()),
            ..ProductPatch::default()
        };
        if let Err(e) = self
            .products
            .update_product(&completed.product_id, &sold)
            .await
        {
            log::warn!(
                "Failed to mark product {} as sold: {:?}",
                completed.product_id,
                e
            );
        }

        Ok(completed)
    }

    /// Overwrites the meetup plan and clears both confirmations.
    pub async fn arrange_meetup(
        &self,
        order_id: &str,
        actor_id: &str,
        location: &str,
        time: DateTime<Utc>,
    ) -> Result<Order, MarketError> {
        let (order, _) = self.load_for_party(order_id, actor_id).await?;
        if order.order_type != OrderType::Meetup {
            return Err(MarketError::Validation("meetup_only"));
        }
        let location = location.trim();
        if location.is_empty() {
            return Err(MarketError::Validation("validation_error"));
        }
        if !MEETUP_ARRANGEABLE.contains(&order.status) {
            return Err(MarketError::InvalidTransition {
                from: order.status,
                action: "arrange_meetup",
            });
        }

        let now = Utc::now();
        let patch = OrderPatch {
            meetup_location: Some(location.to_string()),
            meetup_time: Some(time),
            buyer_confirmed_at: Some(None),
            seller_confirmed_at: Some(None),
            ..OrderPatch::status(OrderStatus::MeetupArranged, now)
        };
        let Some(updated) = self
            .orders
            .transition_order(order_id, &MEETUP_ARRANGEABLE, &patch)
            .await?
        else {
            return Err(self.conflict(order_id, "arrange_meetup").await);
        };

        self.record(
            &updated,
            "meetup_arranged",
            format!("Meetup arranged at {}", location),
            Some(actor_id),
            json!({ "location": location, "time": time }),
        )
        .await;
        if let Err(e) = self.notifications.notify_meetup(&updated).await {
            log::warn!("Failed to write meetup card for order {}: {}", updated.id, e);
        }
        Ok(updated)
    }

    pub async fn ship(
        &self,
        order_id: &str,
        actor_id: &str,
        tracking_number: Option<String>,
    ) -> Result<Order, MarketError> {
        let (order, role) = self.load_for_party(order_id, actor_id).await?;
        if role != PartyRole::Seller {
            return Err(MarketError::Forbidden);
        }
        if order.order_type != OrderType::Shipping {
            return Err(MarketError::Validation("shipping_only"));
        }
        if order.status != OrderStatus::Paid {
            return Err(MarketError::InvalidTransition {
                from: order.status,
                action: "ship",
            });
        }

        let now = Utc::now();
        let tracking_number = tracking_number
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let patch = OrderPatch {
            shipped_at: Some(now),
            tracking_number: tracking_number.clone(),
            ..OrderPatch::status(OrderStatus::Shipped, now)
        };
        let Some(shipped) = self
            .orders
            .transition_order(order_id, &[OrderStatus::Paid], &patch)
            .await?
        else {
            return Err(self.conflict(order_id, "ship").await);
        };

        self.record(
            &shipped,
            "shipped",
            "Seller shipped the order".to_string(),
            Some(actor_id),
            json!({ "tracking_number": tracking_number }),
        )
        .await;
        self.notify(&shipped, "shipped", Some(json!({ "tracking_number": tracking_number })))
            .await;
        Ok(shipped)
    }

    pub async fn dispute(
        &self,
        order_id: &str,
        actor_id: &str,
        reason: Option<String>,
    ) -> Result<Order, MarketError> {
        let (order, _) = self.load_for_party(order_id, actor_id).await?;
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .ok_or(MarketError::Validation("reason_required"))?;
        if !CONFIRMABLE.contains(&order.status) {
            return Err(MarketError::InvalidTransition {
                from: order.status,
                action: "dispute",
            });
        }

        let now = Utc::now();
        let patch = OrderPatch {
            dispute_reason: Some(reason.clone()),
            ..OrderPatch::status(OrderStatus::Disputed, now)
        };
        let Some(disputed) = self
            .orders
            .transition_order(order_id, &CONFIRMABLE, &patch)
            .await?
        else {
            return Err(self.conflict(order_id, "dispute").await);
        };

        log::warn!("Order {} disputed by {}", disputed.id, actor_id);
        self.record(
            &disputed,
            "disputed",
            format!("Dispute opened: {}", reason),
            Some(actor_id),
            json!({ "reason": reason }),
        )
        .await;
        self.notify(&disputed, "disputed", Some(json!({ "reason": reason })))
            .await;
        Ok(disputed)
    }

    /// Either party may cancel before payment, or after payment while nobody has
    /// confirmed yet.
    pub async fn cancel(
        &self,
        order_id: &str,
        actor_id: &str,
        reason: Option<String>,
    ) -> Result<Order, MarketError> {
        let (order, _) = self.load_for_party(order_id, actor_id).await?;
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        let now = Utc::now();
        let patch = OrderPatch {
            cancelled_at: Some(now),
            cancel_reason: reason.clone(),
            ..OrderPatch::status(OrderStatus::Cancelled, now)
        };

        let cancelled = if order.status == OrderStatus::PendingPayment {
            self.orders
                .transition_order(order_id, &[OrderStatus::PendingPayment], &patch)
                .await?
        } else if CANCELLABLE_UNCONFIRMED.contains(&order.status) && !order.any_confirmed() {
            self.orders
                .transition_unconfirmed(order_id, &CANCELLABLE_UNCONFIRMED, &patch)
                .await?
        } else {
            return Err(MarketError::InvalidTransition {
                from: order.status,
                action: "cancel",
            });
        };
        let Some(cancelled) = cancelled else {
            return Err(self.conflict(order_id, "cancel").await);
        };

        self.record(
            &cancelled,
            "cancelled",
            "Order cancelled".to_string(),
            Some(actor_id),
            json!({ "reason": reason }),
        )
        .await;
        self.notify(&cancelled, "cancelled", Some(json!({ "reason": reason })))
            .await;
        Ok(cancelled)
    }

    /// Cancels online orders whose payment window elapsed. Returns how many moved.
    pub async fn expire_stale_orders(&self, now: DateTime<Utc>) -> Result<usize, MarketError> {
        let stale = self.orders.find_expired_pending(now).await?;
        let mut expired = 0;

        for order in stale {
            let patch = OrderPatch {
                cancelled_at: Some(now),
                cancel_reason: Some("payment window expired".to_string()),
                ..OrderPatch::status(OrderStatus::Cancelled, now)
            };
            match self
                .orders
                .transition_order(&order.id, &[OrderStatus::PendingPayment], &patch)
                .await
            {
                Ok(Some(cancelled)) => {
                    expired += 1;
                    self.record(
                        &cancelled,
                        "cancelled",
                        "Payment window expired".to_string(),
                        None,
                        json!({ "reason": "expired" }),
                    )
                    .await;
                    self.notify(&cancelled, "cancelled", Some(json!({ "reason": "expired" })))
                        .await;
                }
                Ok(None) => {}
                Err(e) => log::error!("Failed to expire order {}: {:?}", order.id, e),
            }
        }

        if expired > 0 {
            log::info!("Expired {} unpaid orders", expired);
        }
        Ok(expired)
    }

    pub async fn get_order(&self, order_id: &str, actor_id: &str) -> Result<Order, MarketError> {
        Ok(self.load_for_party(order_id, actor_id).await?.0)
    }

    pub async fn list_orders(
        &self,
        actor_id: &str,
        role: Option<PartyRole>,
    ) -> Result<Vec<Order>, MarketError> {
        Ok(self.orders.list_orders_for_user(actor_id, role).await?)
    }

    pub async fn timeline(
        &self,
        order_id: &str,
        actor_id: &str,
    ) -> Result<Vec<OrderTimelineEntry>, MarketError> {
        self.load_for_party(order_id, actor_id).await?;
        Ok(self.orders.list_timeline(order_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;
    use crate::repository::{ConversationRepository, MemoryStore};
    use crate::test_utils::{order_fixture, product_fixture};

    fn service(store: Arc<MemoryStore>) -> OrderService {
        let notifications = Arc::new(NotificationWriter::new(
            store.clone(),
            store.clone(),
            store.clone(),
        ));
        OrderService::new(store.clone(), store, notifications)
    }

    async fn store_with_listing() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_product(&product_fixture("p1", "seller-1", ProductStatus::Active))
            .await
            .unwrap();
        store
    }

    fn request(order_type: OrderType, payment_method: PaymentMethod) -> CreateOrderRequest {
        CreateOrderRequest {
            product_id: "p1".to_string(),
            order_type,
            payment_method,
            agreed_price: None,
            shipping_address: Some("Av. Juárez 10, CDMX".to_string()),
            meetup_location: None,
            meetup_time: None,
        }
    }

    #[test]
    fn test_fee_computation() {
        let fees = OrderFees::compute(1000.0, OrderType::Shipping, PaymentMethod::Online);
        assert_eq!(fees.shipping_fee, 50.0);
        assert_eq!(fees.platform_fee, 30.0);
        assert_eq!(fees.total_amount, 1080.0);

        let cash = OrderFees::compute(999.99, OrderType::Meetup, PaymentMethod::Cash);
        assert_eq!(cash.shipping_fee, 0.0);
        assert_eq!(cash.platform_fee, 0.0);
        assert_eq!(cash.total_amount, 999.99);

        let odd = OrderFees::compute(333.33, OrderType::Meetup, PaymentMethod::Online);
        assert_eq!(odd.platform_fee, 10.0);
        assert_eq!(odd.total_amount, 343.33);
    }

    #[tokio::test]
    async fn test_online_shipping_order_is_pending_payment() {
        let store = store_with_listing().await;
        let orders = service(store.clone());
        let order = orders
            .create_order("buyer-1", request(OrderType::Shipping, PaymentMethod::Online))
            .await
            .unwrap();

        assert_eq!(order.product_amount, 1000.0);
        assert_eq!(order.shipping_fee, 50.0);
        assert_eq!(order.platform_fee, 30.0);
        assert_eq!(order.total_amount, 1080.0);
        assert_eq!(order.status, OrderStatus::PendingPayment);
        assert!(order.expires_at.is_some());
        assert!(order.paid_at.is_none());

        let timeline = orders.timeline(&order.id, "seller-1").await.unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].event_type, "created");
    }

    #[tokio::test]
    async fn test_cash_order_starts_paid() {
        let orders = service(store_with_listing().await);
        let order = orders
            .create_order("buyer-1", request(OrderType::Meetup, PaymentMethod::Cash))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert!(order.paid_at.is_some());
        assert_eq!(order.total_amount, 1000.0);
        assert!(order.shipping_address.is_none());
    }

    #[tokio::test]
    async fn test_create_order_rejections() {
        let orders = service(store_with_listing().await);

        let err = orders
            .create_order("seller-1", request(OrderType::Meetup, PaymentMethod::Cash))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation("cannot_buy_own_product")));

        let mut no_address = request(OrderType::Shipping, PaymentMethod::Online);
        no_address.shipping_address = Some("   ".to_string());
        let err = orders.create_order("buyer-1", no_address).await.unwrap_err();
        assert!(matches!(err, MarketError::Validation("shipping_address_required")));

        let mut bad_price = request(OrderType::Meetup, PaymentMethod::Cash);
        bad_price.agreed_price = Some(-5.0);
        let err = orders.create_order("buyer-1", bad_price).await.unwrap_err();
        assert!(matches!(err, MarketError::Validation("invalid_price")));

        let mut missing = request(OrderType::Meetup, PaymentMethod::Cash);
        missing.product_id = "nope".to_string();
        let err = orders.create_order("buyer-1", missing).await.unwrap_err();
        assert!(matches!(err, MarketError::NotFound("product_not_found")));
    }

    #[tokio::test]
    async fn test_agreed_price_drives_fees() {
        let orders = service(store_with_listing().await);
        let mut req = request(OrderType::Meetup, PaymentMethod::Online);
        req.agreed_price = Some(800.0);
        let order = orders.create_order("buyer-1", req).await.unwrap();
        assert_eq!(order.product_amount, 800.0);
        assert_eq!(order.platform_fee, 24.0);
        assert_eq!(order.total_amount, 824.0);
    }

    #[tokio::test]
    async fn test_payment_webhook_is_idempotent() {
        let store = store_with_listing().await;
        let orders = service(store.clone());
        let order = orders
            .create_order("buyer-1", request(OrderType::Shipping, PaymentMethod::Online))
            .await
            .unwrap();

        let paid = orders
            .confirm_payment(&order.id, Some("pay_123".to_string()))
            .await
            .unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(paid.payment_reference.as_deref(), Some("pay_123"));

        let again = orders
            .confirm_payment(&order.id, Some("pay_456".to_string()))
            .await
            .unwrap();
        assert_eq!(again.paid_at, paid.paid_at);
        assert_eq!(again.payment_reference.as_deref(), Some("pay_123"));
    }

    #[tokio::test]
    async fn test_double_confirmation_completes_once() {
        let store = store_with_listing().await;
        store
            .insert_order(&order_fixture("o1", OrderStatus::Paid))
            .await
            .unwrap();
        let orders = service(store.clone());

        let after_buyer = orders.confirm("o1", "buyer-1").await.unwrap();
        assert_eq!(after_buyer.status, OrderStatus::Paid);
        let first_at = after_buyer.buyer_confirmed_at.unwrap();

        let again = orders.confirm("o1", "buyer-1").await.unwrap();
        assert_eq!(again.buyer_confirmed_at, Some(first_at));

        let done = orders.confirm("o1", "seller-1").await.unwrap();
        assert_eq!(done.status, OrderStatus::Completed);
        assert!(done.completed_at.is_some());

        let still = orders.confirm("o1", "buyer-1").await.unwrap();
        assert_eq!(still.status, OrderStatus::Completed);
        assert_eq!(still.buyer_confirmed_at, Some(first_at));

        let timeline = store.list_timeline("o1").await.unwrap();
        let completed = timeline
            .iter()
            .filter(|e| e.event_type == "completed")
            .count();
        assert_eq!(completed, 1);

        let product = store.find_product("p1").await.unwrap().unwrap();
        assert_eq!(product.status, ProductStatus::Inactive);
    }

    #[tokio::test]
    async fn test_outsiders_are_forbidden() {
        let store = store_with_listing().await;
        store
            .insert_order(&order_fixture("o1", OrderStatus::Paid))
            .await
            .unwrap();
        let orders = service(store);

        for result in [
            orders.confirm("o1", "mallory").await,
            orders.cancel("o1", "mallory", None).await,
            orders.get_order("o1", "mallory").await,
            orders
                .arrange_meetup("o1", "mallory", "Plaza", Utc::now())
                .await,
        ] {
            assert!(matches!(result, Err(MarketError::Forbidden)));
        }
    }

    #[tokio::test]
    async fn test_arrange_meetup_resets_confirmations() {
        let store = store_with_listing().await;
        let mut order = order_fixture("o1", OrderStatus::Paid);
        order.buyer_confirmed_at = Some(Utc::now());
        order.seller_confirmed_at = Some(Utc::now());
        store.insert_order(&order).await.unwrap();
        let orders = service(store.clone());

        let when = Utc::now() + Duration::days(1);
        let updated = orders
            .arrange_meetup("o1", "seller-1", "Metro Insurgentes", when)
            .await
            .unwrap();

        assert_eq!(updated.status, OrderStatus::MeetupArranged);
        assert!(updated.buyer_confirmed_at.is_none());
        assert!(updated.seller_confirmed_at.is_none());
        assert_eq!(updated.meetup_location.as_deref(), Some("Metro Insurgentes"));
        assert_eq!(updated.meetup_time, Some(when));

        let conversation = store
            .find_conversation("p1", "buyer-1", "seller-1")
            .await
            .unwrap()
            .unwrap();
        let messages = store.list_messages(&conversation.id, 10).await.unwrap();
        assert!(messages
            .iter()
            .any(|m| m.message_type == MessageType::LocationShare));
    }

    #[tokio::test]
    async fn test_meetup_rejected_for_shipping_orders() {
        let store = store_with_listing().await;
        let mut order = order_fixture("o1", OrderStatus::Paid);
        order.order_type = OrderType::Shipping;
        store.insert_order(&order).await.unwrap();
        let err = service(store)
            .arrange_meetup("o1", "buyer-1", "Plaza", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation("meetup_only")));
    }

    #[tokio::test]
    async fn test_only_seller_ships_paid_shipping_orders() {
        let store = store_with_listing().await;
        let mut order = order_fixture("o1", OrderStatus::Paid);
        order.order_type = OrderType::Shipping;
        store.insert_order(&order).await.unwrap();
        let orders = service(store);

        let err = orders.ship("o1", "buyer-1", None).await.unwrap_err();
        assert!(matches!(err, MarketError::Forbidden));

        let shipped = orders
            .ship("o1", "seller-1", Some("DHL-42".to_string()))
            .await
            .unwrap();
        assert_eq!(shipped.status, OrderStatus::Shipped);
        assert_eq!(shipped.tracking_number.as_deref(), Some("DHL-42"));

        let err = orders.ship("o1", "seller-1", None).await.unwrap_err();
        assert!(matches!(
            err,
            MarketError::InvalidTransition {
                from: OrderStatus::Shipped,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let store = store_with_listing().await;
        let mut confirmed = order_fixture("confirmed", OrderStatus::Paid);
        confirmed.buyer_confirmed_at = Some(Utc::now());
        store.insert_order(&confirmed).await.unwrap();
        store
            .insert_order(&order_fixture("fresh", OrderStatus::Paid))
            .await
            .unwrap();
        let orders = service(store);

        let err = orders.cancel("confirmed", "buyer-1", None).await.unwrap_err();
        assert!(matches!(err, MarketError::InvalidTransition { .. }));

        let cancelled = orders
            .cancel("fresh", "seller-1", Some("sold elsewhere".to_string()))
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.cancel_reason.as_deref(), Some("sold elsewhere"));
    }

    #[tokio::test]
    async fn test_dispute_requires_reason() {
        let store = store_with_listing().await;
        store
            .insert_order(&order_fixture("o1", OrderStatus::Paid))
            .await
            .unwrap();
        let orders = service(store);

        let err = orders.dispute("o1", "buyer-1", Some(" ".to_string())).await.unwrap_err();
        assert!(matches!(err, MarketError::Validation("reason_required")));

        let disputed = orders
            .dispute("o1", "buyer-1", Some("item damaged".to_string()))
            .await
            .unwrap();
        assert_eq!(disputed.status, OrderStatus::Disputed);

        let err = orders.confirm("o1", "seller-1").await.unwrap_err();
        assert!(matches!(err, MarketError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_expire_stale_orders() {
        let store = store_with_listing().await;
        let mut stale = order_fixture("stale", OrderStatus::PendingPayment);
        stale.expires_at = Some(Utc::now() - Duration::hours(1));
        let mut fresh = order_fixture("fresh", OrderStatus::PendingPayment);
        fresh.expires_at = Some(Utc::now() + Duration::hours(1));
        store.insert_order(&stale).await.unwrap();
        store.insert_order(&fresh).await.unwrap();
        let orders = service(store.clone());

        assert_eq!(orders.expire_stale_orders(Utc::now()).await.unwrap(), 1);
        let stale = store.find_order("stale").await.unwrap().unwrap();
        assert_eq!(stale.status, OrderStatus::Cancelled);
        let fresh = store.find_order("fresh").await.unwrap().unwrap();
        assert_eq!(fresh.status, OrderStatus::PendingPayment);
    }
}
