use chrono::Utc;
use mercadito_backend::models::{OrderStatus, PartyRole, ProductStatus};
use mercadito_backend::repository::{
    OrderPatch, OrderRepository, ProductPatch, ProductRepository, SupabaseStore,
};
use serde_json::{json, Value};
use wiremock::{
    matchers::{body_partial_json, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn order_row(status: &str) -> Value {
    json!({
        "id": "o1",
        "product_id": "p1",
        "buyer_id": "buyer-1",
        "seller_id": "seller-1",
        "order_type": "meetup",
        "payment_method": "online",
        "product_amount": 1000.0,
        "shipping_fee": 0.0,
        "platform_fee": 30.0,
        "total_amount": 1030.0,
        "currency": "MXN",
        "status": status,
        "created_at": "2026-01-10T12:00:00Z",
        "updated_at": "2026-01-10T12:00:00Z"
    })
}

fn product_row(status: &str) -> Value {
    json!({
        "id": "p1",
        "seller_id": "seller-1",
        "title": "Guitarra acústica",
        "description": "Con funda",
        "price": 2200.0,
        "currency": "MXN",
        "category": "other",
        "status": status,
        "created_at": "2026-01-10T12:00:00Z",
        "updated_at": "2026-01-10T12:00:00Z"
    })
}

#[tokio::test]
async fn test_find_product_sends_service_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/products"))
        .and(query_param("id", "eq.p1"))
        .and(header("apikey", "service-key"))
        .and(header("Authorization", "Bearer service-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([product_row("active")])))
        .expect(1)
        .mount(&server)
        .await;

    let store = SupabaseStore::new(server.uri(), "service-key");
    let product = store.find_product("p1").await.unwrap().unwrap();
    assert_eq!(product.title, "Guitarra acústica");
    assert_eq!(product.status, ProductStatus::Active);
    assert!(product.images.is_empty());
}

#[tokio::test]
async fn test_transition_is_a_conditional_patch() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/orders"))
        .and(query_param("id", "eq.o1"))
        .and(query_param("status", "in.(pending_payment)"))
        .and(header("Prefer", "return=representation"))
        .and(body_partial_json(json!({ "status": "paid" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([order_row("paid")])))
        .mount(&server)
        .await;

    let store = SupabaseStore::new(server.uri(), "k");
    let patch = OrderPatch {
        paid_at: Some(Utc::now()),
        ..OrderPatch::status(OrderStatus::Paid, Utc::now())
    };
    let order = store
        .transition_order("o1", &[OrderStatus::PendingPayment], &patch)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
}

#[tokio::test]
async fn test_lost_compare_and_swap_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/orders"))
        .and(query_param("buyer_confirmed_at", "not.is.null"))
        .and(query_param("seller_confirmed_at", "not.is.null"))
        .and(query_param("status", "in.(paid,meetup_arranged,shipped)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let store = SupabaseStore::new(server.uri(), "k");
    let result = store
        .complete_if_confirmed(
            "o1",
            &[
                OrderStatus::Paid,
                OrderStatus::MeetupArranged,
                OrderStatus::Shipped,
            ],
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_confirm_party_guards_the_column() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/orders"))
        .and(query_param("seller_confirmed_at", "is.null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([order_row("paid")])))
        .expect(1)
        .mount(&server)
        .await;

    let store = SupabaseStore::new(server.uri(), "k");
    let order = store
        .confirm_party("o1", PartyRole::Seller, Utc::now(), &[OrderStatus::Paid])
        .await
        .unwrap();
    assert!(order.is_some());
}

#[tokio::test]
async fn test_update_in_status_and_errors() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/products"))
        .and(query_param("status", "eq.pending_review"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let store = SupabaseStore::new(server.uri(), "k");
    let patch = ProductPatch {
        status: Some(ProductStatus::Active),
        ..ProductPatch::default()
    };
    let err = store
        .update_product_in_status("p1", ProductStatus::PendingReview, &patch)
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Failed to update product"));
    assert!(message.contains("boom"));
}
