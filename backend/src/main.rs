use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use mercadito_backend::ai::{AiClient, DisabledAiClient, GeminiClient, ListingDraft};
use mercadito_backend::auth::{IdentityProvider, StaticIdentity, SupabaseIdentity};
use mercadito_backend::category::SystemCategory;
use mercadito_backend::config::AppConfig;
use mercadito_backend::error::ErrorBody;
use mercadito_backend::repository::{MemoryStore, SupabaseStore};
use mercadito_backend::state::AppState;
use mercadito_backend::{handlers, models};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health_check,
        handlers::list_listings,
        handlers::create_listing,
        handlers::get_listing,
        handlers::listing_draft,
        handlers::create_order,
        handlers::run_auto_review
    ),
    components(schemas(
        ErrorBody,
        ListingDraft,
        SystemCategory,
        models::Product,
        models::ProductStatus,
        models::DeliveryType,
        models::ProductApiResponse,
        models::ProductsApiResponse,
        models::CreateListingRequest,
        models::ListingDraftRequest,
        models::Order,
        models::OrderStatus,
        models::OrderType,
        models::PaymentMethod,
        models::OrderApiResponse,
        models::CreateOrderRequest,
        models::AutoReviewRequest,
        models::AutoReviewReport,
        models::AutoReviewApiResponse,
        handlers::HealthCheckResponse
    ))
)]
struct ApiDoc;

fn build_ai_client(config: &AppConfig) -> Arc<dyn AiClient> {
    match &config.gemini_api_key {
        Some(key) => {
            let mut client = GeminiClient::new(key.clone());
            if let Some(model) = &config.gemini_model {
                client = client.with_model(model.clone());
            }
            if let Some(url) = &config.gemini_base_url {
                client = client.with_base_url(url.clone());
            }
            Arc::new(client)
        }
        None => {
            log::warn!("GEMINI_API_KEY not set; AI features will answer 'not configured'");
            Arc::new(DisabledAiClient)
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    dotenv::from_filename(format!("{}/.env.local", manifest_dir)).ok();
    dotenv::from_filename(format!("{}/.env", manifest_dir)).ok();
    dotenv::from_filename(".env.local").ok();
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::from_env();
    let bind_address = config.bind_address();
    let ai_client = build_ai_client(&config);

    let state = match &config.supabase {
        Some(supabase) => {
            let store = Arc::new(SupabaseStore::new(&supabase.url, &supabase.key));
            let identity: Arc<dyn IdentityProvider> =
                Arc::new(SupabaseIdentity::new(&supabase.url, &supabase.key));
            AppState::new(store, ai_client, identity, &config)
        }
        None => {
            let identity = StaticIdentity::parse(&config.dev_auth_tokens);
            log::warn!(
                "SUPABASE_URL/SUPABASE_KEY not set; using the in-memory store with {} dev tokens",
                identity.len()
            );
            AppState::new(
                Arc::new(MemoryStore::new()),
                ai_client,
                Arc::new(identity),
                &config,
            )
        }
    };
    let state = web::Data::new(state);

    log::info!("Starting Mercadito API server at http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .wrap(cors)
            .service(SwaggerUi::new("/api/docs/{_:.*}").url("/api/openapi.json", ApiDoc::openapi()))
            .configure(handlers::configure)
    })
    .bind(&bind_address)?
    .run()
    .await
}
