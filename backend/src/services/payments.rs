//! Signed payment-processor webhooks.

use crate::error::MarketError;
use crate::models::Order;
use crate::services::orders::OrderService;
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use utoipa::ToSchema;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Payment-Signature";

#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentEvent {
    pub order_id: String,
    pub status: String,
    pub reference: Option<String>,
}

/**
 * sign
 * 计算 webhook 签名（HMAC-SHA256 + URL-safe base64，无 padding）。
 */
pub fn sign(body: &[u8], secret: &str) -> Result<String, MarketError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| MarketError::Configuration("invalid PAYMENT_WEBHOOK_SECRET".to_string()))?;
    mac.update(body);
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a URL-safe base64 signature over the raw body.
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    let Ok(expected) = general_purpose::URL_SAFE_NO_PAD.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub struct PaymentWebhook {
    orders: Arc<OrderService>,
    secret: Option<String>,
}

impl PaymentWebhook {
    pub fn new(orders: Arc<OrderService>, secret: Option<String>) -> Self {
        Self {
            orders,
            secret: secret.filter(|s| !s.trim().is_empty()),
        }
    }

    /// Verifies and applies one webhook delivery. Non-success events are
    /// acknowledged without touching the order.
    pub async fn handle(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<Option<Order>, MarketError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| MarketError::Configuration("PAYMENT_WEBHOOK_SECRET not set".to_string()))?;
        let signature = signature.ok_or(MarketError::Unauthorized)?;
        if !verify_signature(body, signature, secret) {
            log::warn!("Rejected payment webhook with a bad signature");
            return Err(MarketError::Unauthorized);
        }

        let event: PaymentEvent =
            serde_json::from_slice(body).map_err(|_| MarketError::Validation("validation_error"))?;
        match event.status.as_str() {
            "succeeded" => {
                let order = self
                    .orders
                    .confirm_payment(&event.order_id, event.reference)
                    .await?;
                Ok(Some(order))
            }
            other => {
                log::info!(
                    "Payment event '{}' for order {} acknowledged",
                    other,
                    event.order_id
                );
                Ok(None)
            }
        }
    }
}
