use crate::ai::ListingDraft;
use crate::auth::{authenticate, optional_user, require_admin, AuthUser};
use crate::error::{ApiFailure, ErrorBody, Localize, MarketError};
use crate::i18n::{resolve_language, t, Language};
use crate::models::{
    ApiResponse, ArrangeMeetupRequest, AutoReviewReport, AutoReviewRequest,
    CreateListingRequest, CreateOrderRequest, ListingDraftRequest, ListingQuery,
    NegotiationRequest, OrderListQuery, PromoteListingRequest, ReasonRequest,
    ReviewListingRequest, SendMessageRequest, ShipOrderRequest, StartConversationRequest,
    TranslateRequest, UpdateListingRequest,
};
use crate::repository::ListingFilter;
use crate::seo;
use crate::services::payments::SIGNATURE_HEADER;
use crate::state::AppState;
use actix_web::error::{JsonPayloadError, QueryPayloadError};
use actix_web::{get, http::StatusCode, web, HttpRequest, HttpResponse, Responder};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

const CRON_SECRET_HEADER: &str = "x-cron-secret";
const FEED_LIMIT: usize = 5000;
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
// Base64 inflates by 4/3; the rest of the draft body is a few small fields.
const AI_JSON_LIMIT: usize = MAX_IMAGE_BYTES / 3 * 4 + 64 * 1024;

type HandlerResult = Result<HttpResponse, ApiFailure>;

async fn current_user(
    req: &HttpRequest,
    state: &AppState,
    lang: Language,
) -> Result<AuthUser, ApiFailure> {
    authenticate(req, state.identity.as_ref()).await.localized(lang)
}

async fn current_admin(
    req: &HttpRequest,
    state: &AppState,
    lang: Language,
) -> Result<AuthUser, ApiFailure> {
    let user = current_user(req, state, lang).await?;
    require_admin(&user).localized(lang)?;
    Ok(user)
}

/**
 * authorize_cron
 * 定时任务接口：带正确的 x-cron-secret 头直接放行，否则要求管理员登录。
 */
async fn authorize_cron(
    req: &HttpRequest,
    state: &AppState,
    lang: Language,
) -> Result<(), ApiFailure> {
    let provided = req
        .headers()
        .get(CRON_SECRET_HEADER)
        .and_then(|h| h.to_str().ok());
    if let (Some(expected), Some(provided)) = (state.cron_secret.as_deref(), provided) {
        if provided == expected {
            return Ok(());
        }
        log::warn!("Rejected cron call with a wrong secret");
    }
    current_admin(req, state, lang).await.map(|_| ())
}

fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(data))
}

fn ok_with<T: Serialize>(data: T, lang: Language, key: &str) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::with_message(data, t(lang, key)))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthCheckResponse {
    pub status: String,
    pub timestamp: String,
}

#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Service is up", body = HealthCheckResponse))
)]
#[get("/health")]
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthCheckResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/listings",
    params(ListingQuery),
    responses(
        (status = 200, description = "Active listings", body = crate::models::ProductsApiResponse),
        (status = 400, description = "Unknown category", body = ErrorBody)
    )
)]
pub async fn list_listings(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<ListingQuery>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let products = state.listings.list(query.into_inner(), lang).await.localized(lang)?;
    Ok(ok(products))
}

#[utoipa::path(
    post,
    path = "/api/listings",
    request_body = CreateListingRequest,
    responses(
        (status = 201, description = "Listing submitted for review", body = crate::models::ProductApiResponse),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 401, description = "Not signed in", body = ErrorBody)
    )
)]
pub async fn create_listing(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateListingRequest>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let product = state
        .listings
        .create(&user, body.into_inner())
        .await
        .localized(lang)?;
    Ok(HttpResponse::Created().json(ApiResponse::with_message(
        product,
        t(lang, "product_created"),
    )))
}

#[utoipa::path(
    get,
    path = "/api/listings/{id}",
    params(("id" = String, Path, description = "Listing id")),
    responses(
        (status = 200, description = "Listing", body = crate::models::ProductApiResponse),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn get_listing(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let viewer = optional_user(&req, state.identity.as_ref())
        .await
        .localized(lang)?;
    let product = state
        .listings
        .get(&path.into_inner(), viewer.as_ref(), lang)
        .await
        .localized(lang)?;
    Ok(ok(product))
}

pub async fn update_listing(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<UpdateListingRequest>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let product = state
        .listings
        .update(&path.into_inner(), &user, body.into_inner())
        .await
        .localized(lang)?;
    Ok(ok_with(product, lang, "product_updated"))
}

pub async fn delete_listing(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let id = path.into_inner();
    state.listings.delete(&id, &user).await.localized(lang)?;
    Ok(ok_with(serde_json::json!({ "id": id }), lang, "product_deleted"))
}

// ---------------------------------------------------------------------------
// AI assistance
// ---------------------------------------------------------------------------

/// Accepts raw base64 or a `data:<mime>;base64,<payload>` URL.
fn decode_image(raw: &str, mime_type: Option<&str>) -> Result<(Vec<u8>, String), MarketError> {
    let raw = raw.trim();
    let (data_url_mime, payload) = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (meta, payload) = rest
                .split_once(',')
                .ok_or(MarketError::Validation("invalid_image"))?;
            (meta.strip_suffix(";base64").map(str::to_string), payload)
        }
        None => (None, raw),
    };

    let bytes = general_purpose::STANDARD
        .decode(payload)
        .map_err(|_| MarketError::Validation("invalid_image"))?;
    if bytes.is_empty() || bytes.len() > MAX_IMAGE_BYTES {
        return Err(MarketError::Validation("invalid_image"));
    }

    let mime = mime_type
        .map(str::to_string)
        .or(data_url_mime)
        .filter(|m| m.starts_with("image/"))
        .unwrap_or_else(|| "image/jpeg".to_string());
    Ok((bytes, mime))
}

#[utoipa::path(
    post,
    path = "/api/ai/listing-draft",
    request_body = ListingDraftRequest,
    responses(
        (status = 200, description = "Draft generated from the photo", body = ListingDraft),
        (status = 400, description = "Unreadable image", body = ErrorBody),
        (status = 500, description = "AI unavailable or not configured", body = ErrorBody)
    )
)]
pub async fn listing_draft(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<ListingDraftRequest>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    current_user(&req, &state, lang).await?;
    let body = body.into_inner();
    let (image, mime) = decode_image(&body.image, body.mime_type.as_deref()).localized(lang)?;

    let draft = state
        .ai
        .extract_listing_draft(image, &mime, body.language.or(Some(lang)))
        .await
        .map_err(MarketError::from)
        .localized(lang)?;
    Ok(ok(draft))
}

pub async fn translate(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<TranslateRequest>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    current_user(&req, &state, lang).await?;
    let body = body.into_inner();
    let items = state
        .translations
        .translate(body.items, &body.target_language)
        .await;
    Ok(ok(items))
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created with frozen fees", body = crate::models::OrderApiResponse),
        (status = 400, description = "Invalid order", body = ErrorBody),
        (status = 404, description = "Listing not found", body = ErrorBody)
    )
)]
pub async fn create_order(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateOrderRequest>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let order = state
        .orders
        .create_order(&user.id, body.into_inner())
        .await
        .localized(lang)?;
    Ok(HttpResponse::Created().json(ApiResponse::with_message(order, t(lang, "order_created"))))
}

pub async fn list_orders(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<OrderListQuery>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let orders = state
        .orders
        .list_orders(&user.id, query.into_inner().role)
        .await
        .localized(lang)?;
    Ok(ok(orders))
}

pub async fn get_order(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let order = state
        .orders
        .get_order(&path.into_inner(), &user.id)
        .await
        .localized(lang)?;
    Ok(ok(order))
}

pub async fn order_timeline(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let entries = state
        .orders
        .timeline(&path.into_inner(), &user.id)
        .await
        .localized(lang)?;
    Ok(ok(entries))
}

pub async fn confirm_order(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let order = state
        .orders
        .confirm(&path.into_inner(), &user.id)
        .await
        .localized(lang)?;
    Ok(ok_with(order, lang, "order_updated"))
}

pub async fn arrange_meetup(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ArrangeMeetupRequest>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let body = body.into_inner();
    let order = state
        .orders
        .arrange_meetup(&path.into_inner(), &user.id, &body.location, body.time)
        .await
        .localized(lang)?;
    Ok(ok_with(order, lang, "order_updated"))
}

pub async fn ship_order(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<ShipOrderRequest>>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let tracking_number = body.and_then(|b| b.into_inner().tracking_number);
    let order = state
        .orders
        .ship(&path.into_inner(), &user.id, tracking_number)
        .await
        .localized(lang)?;
    Ok(ok_with(order, lang, "order_updated"))
}

pub async fn dispute_order(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<ReasonRequest>>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let reason = body.and_then(|b| b.into_inner().reason);
    let order = state
        .orders
        .dispute(&path.into_inner(), &user.id, reason)
        .await
        .localized(lang)?;
    Ok(ok_with(order, lang, "order_updated"))
}

pub async fn cancel_order(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<ReasonRequest>>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let reason = body.and_then(|b| b.into_inner().reason);
    let order = state
        .orders
        .cancel(&path.into_inner(), &user.id, reason)
        .await
        .localized(lang)?;
    Ok(ok_with(order, lang, "order_updated"))
}

pub async fn payment_webhook(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());
    let order = state
        .payments
        .handle(&body, signature)
        .await
        .map_err(|e| match e {
            MarketError::Unauthorized => {
                ApiFailure::new(StatusCode::UNAUTHORIZED, lang, "invalid_signature")
            }
            other => ApiFailure::from_error(&other, lang),
        })?;
    Ok(ok(serde_json::json!({
        "received": true,
        "order_id": order.as_ref().map(|o| o.id.clone()),
        "status": order.as_ref().map(|o| o.status),
    })))
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

pub async fn list_conversations(req: HttpRequest, state: web::Data<AppState>) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let conversations = state.chat.list(&user.id).await.localized(lang)?;
    Ok(ok(conversations))
}

pub async fn start_conversation(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<StartConversationRequest>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let conversation = state
        .chat
        .start(&user.id, &body.product_id)
        .await
        .localized(lang)?;
    Ok(ok(conversation))
}

pub async fn list_messages(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let messages = state
        .chat
        .messages(&path.into_inner(), &user.id)
        .await
        .localized(lang)?;
    Ok(ok(messages))
}

pub async fn send_message(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SendMessageRequest>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let message = state
        .chat
        .send(&path.into_inner(), &user.id, body.into_inner())
        .await
        .localized(lang)?;
    Ok(HttpResponse::Created().json(ApiResponse::success(message)))
}

pub async fn negotiate(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<NegotiationRequest>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let user = current_user(&req, &state, lang).await?;
    let message = state
        .chat
        .negotiate(&path.into_inner(), &user.id, body.into_inner())
        .await
        .localized(lang)?;
    Ok(HttpResponse::Created().json(ApiResponse::success(message)))
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
pub struct PendingQuery {
    pub limit: Option<i64>,
}

pub async fn pending_listings(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<PendingQuery>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    current_admin(&req, &state, lang).await?;
    let products = state.listings.pending(query.limit).await.localized(lang)?;
    Ok(ok(products))
}

pub async fn review_listing(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ReviewListingRequest>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    let admin = current_admin(&req, &state, lang).await?;
    let product = state
        .listings
        .review(&path.into_inner(), &admin, body.into_inner())
        .await
        .localized(lang)?;
    Ok(ok_with(product, lang, "product_reviewed"))
}

pub async fn promote_listing(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<PromoteListingRequest>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    current_admin(&req, &state, lang).await?;
    let product = state
        .listings
        .promote(&path.into_inner(), body.promoted)
        .await
        .localized(lang)?;
    Ok(ok_with(product, lang, "product_updated"))
}

#[utoipa::path(
    post,
    path = "/api/admin/auto-review",
    request_body = AutoReviewRequest,
    responses(
        (status = 200, description = "Counters of the run", body = crate::models::AutoReviewApiResponse),
        (status = 403, description = "Neither admin nor cron secret", body = ErrorBody)
    )
)]
pub async fn run_auto_review(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: Option<web::Json<AutoReviewRequest>>,
) -> HandlerResult {
    let lang = resolve_language(&req);
    authorize_cron(&req, &state, lang).await?;
    let body = body.map(|b| b.into_inner()).unwrap_or_default();
    let report: AutoReviewReport = state
        .review
        .run(body.limit, body.hours_ago)
        .await
        .localized(lang)?;
    Ok(ok(report))
}

pub async fn expire_orders(req: HttpRequest, state: web::Data<AppState>) -> HandlerResult {
    let lang = resolve_language(&req);
    authorize_cron(&req, &state, lang).await?;
    let expired = state
        .orders
        .expire_stale_orders(Utc::now())
        .await
        .localized(lang)?;
    Ok(ok(serde_json::json!({ "expired": expired })))
}

// ---------------------------------------------------------------------------
// Feeds
// ---------------------------------------------------------------------------

async fn feed_products(
    state: &AppState,
    lang: Language,
) -> Result<Vec<crate::models::Product>, ApiFailure> {
    let filter = ListingFilter {
        limit: FEED_LIMIT,
        ..ListingFilter::default()
    };
    state
        .products
        .list_active_products(&filter)
        .await
        .map_err(MarketError::from)
        .localized(lang)
}

pub async fn sitemap(req: HttpRequest, state: web::Data<AppState>) -> HandlerResult {
    let lang = resolve_language(&req);
    let products = feed_products(&state, lang).await?;
    Ok(HttpResponse::Ok()
        .content_type("application/xml; charset=utf-8")
        .body(seo::build_sitemap(&state.site_url, &products)))
}

pub async fn rss(req: HttpRequest, state: web::Data<AppState>) -> HandlerResult {
    let lang = resolve_language(&req);
    let products = feed_products(&state, lang).await?;
    Ok(HttpResponse::Ok()
        .content_type("application/rss+xml; charset=utf-8")
        .body(seo::build_rss(&state.site_url, lang, &products)))
}

/**
 * json_error
 * 请求体解析失败时也返回本地化的 {error}：超限 → 413，其余 → 400。
 */
fn json_error(err: JsonPayloadError, req: &HttpRequest) -> actix_web::Error {
    let lang = resolve_language(req);
    log::debug!("Rejected JSON body on {}: {}", req.path(), err);
    match err {
        JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
            ApiFailure::new(StatusCode::PAYLOAD_TOO_LARGE, lang, "payload_too_large").into()
        }
        _ => ApiFailure::new(StatusCode::BAD_REQUEST, lang, "validation_error").into(),
    }
}

fn query_error(err: QueryPayloadError, req: &HttpRequest) -> actix_web::Error {
    log::debug!("Rejected query on {}: {}", req.path(), err);
    ApiFailure::new(StatusCode::BAD_REQUEST, resolve_language(req), "validation_error").into()
}

/// Route table shared by `main` and the HTTP tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .app_data(web::QueryConfig::default().error_handler(query_error))
        .route("/sitemap.xml", web::get().to(sitemap))
        .route("/rss.xml", web::get().to(rss))
        .service(
            web::scope("/api")
                .service(health_check)
                .service(
                    web::scope("/listings")
                        .route("", web::get().to(list_listings))
                        .route("", web::post().to(create_listing))
                        .route("/{id}", web::get().to(get_listing))
                        .route("/{id}", web::put().to(update_listing))
                        .route("/{id}", web::delete().to(delete_listing)),
                )
                .service(
                    web::scope("/ai")
                        .app_data(
                            web::JsonConfig::default()
                                .limit(AI_JSON_LIMIT)
                                .error_handler(json_error),
                        )
                        .route("/listing-draft", web::post().to(listing_draft))
                        .route("/translate", web::post().to(translate)),
                )
                .service(
                    web::scope("/orders")
                        .route("", web::post().to(create_order))
                        .route("", web::get().to(list_orders))
                        .route("/{id}", web::get().to(get_order))
                        .route("/{id}/timeline", web::get().to(order_timeline))
                        .route("/{id}/confirm", web::post().to(confirm_order))
                        .route("/{id}/meetup", web::post().to(arrange_meetup))
                        .route("/{id}/ship", web::post().to(ship_order))
                        .route("/{id}/dispute", web::post().to(dispute_order))
                        .route("/{id}/cancel", web::post().to(cancel_order)),
                )
                .route("/payments/webhook", web::post().to(payment_webhook))
                .service(
                    web::scope("/conversations")
                        .route("", web::get().to(list_conversations))
                        .route("", web::post().to(start_conversation))
                        .route("/{id}/messages", web::get().to(list_messages))
                        .route("/{id}/messages", web::post().to(send_message))
                        .route("/{id}/negotiation", web::post().to(negotiate)),
                )
                .service(
                    web::scope("/admin")
                        .route("/listings/pending", web::get().to(pending_listings))
                        .route("/listings/{id}/review", web::post().to(review_listing))
                        .route("/listings/{id}/promote", web::post().to(promote_listing))
                        .route("/auto-review", web::post().to(run_auto_review))
                        .route("/orders/expire", web::post().to(expire_orders)),
                ),
        );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_image_accepts_data_url() {
        let (bytes, mime) = decode_image("data:image/png;base64,aGVsbG8=", None).unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(mime, "image/png");

        let (_, mime) = decode_image("aGVsbG8=", Some("image/webp")).unwrap();
        assert_eq!(mime, "image/webp");

        let (_, mime) = decode_image("aGVsbG8=", Some("text/plain")).unwrap();
        assert_eq!(mime, "image/jpeg");
    }

    #[test]
    fn test_decode_image_rejects_garbage() {
        assert!(matches!(
            decode_image("%%%", None),
            Err(MarketError::Validation("invalid_image"))
        ));
        assert!(matches!(
            decode_image("data:image/png;base64", None),
            Err(MarketError::Validation("invalid_image"))
        ));
        assert!(decode_image("", None).is_err());
    }
}
