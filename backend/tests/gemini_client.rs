use mercadito_backend::ai::{AiClient, AiContentService, AiError, GeminiClient, GenerationRequest};
use mercadito_backend::category::SystemCategory;
use mercadito_backend::i18n::Language;
use serde_json::json;
use std::sync::Arc;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const GENERATE_PATH: &str = "/models/gemini-2.0-flash:generateContent";

fn answer(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "candidates": [{ "content": { "parts": [{ "text": text }] } }]
    }))
}

fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest {
        prompt: prompt.to_string(),
        image: None,
        response_schema: json!({ "type": "OBJECT" }),
        temperature: 0.1,
    }
}

#[tokio::test]
async fn test_generate_sends_key_and_schema() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "generationConfig": { "responseMimeType": "application/json" }
        })))
        .respond_with(answer("{\"ok\":true}"))
        .expect(1)
        .mount(&server)
        .await;

    let client = GeminiClient::new("test-key").with_base_url(server.uri());
    let text = client.generate(request("hola")).await.unwrap();
    assert_eq!(text, "{\"ok\":true}");

    let received = server.received_requests().await.unwrap();
    assert!(received[0].url.query().is_none());
}

#[tokio::test]
async fn test_connection_error_does_not_leak_key() {
    // Nothing listens on port 1.
    let err = GeminiClient::new("SECRET_API_KEY_123")
        .with_base_url("http://127.0.0.1:1")
        .generate(request("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, AiError::Http(_)));
    assert!(!err.to_string().contains("SECRET_API_KEY_123"));
    assert!(!format!("{:?}", err).contains("SECRET_API_KEY_123"));
}

#[tokio::test]
async fn test_generate_maps_http_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", "bad-key"))
        .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", "busy-key"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", "empty-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
        .mount(&server)
        .await;

    let err = GeminiClient::new("bad-key")
        .with_base_url(server.uri())
        .generate(request("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, AiError::Auth(_)));

    let err = GeminiClient::new("busy-key")
        .with_base_url(server.uri())
        .generate(request("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, AiError::Api { status: 503, .. }));

    let err = GeminiClient::new("empty-key")
        .with_base_url(server.uri())
        .generate(request("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, AiError::UpstreamEmptyResponse));
}

#[tokio::test]
async fn test_listing_draft_through_http() {
    let server = MockServer::start().await;
    let draft = json!({
        "title": "Bicicleta de montaña",
        "description": "Rodada 29, frenos de disco",
        "category": "Bicycles and cycling",
        "suggestedPrice": 3500.0,
        "suggestedDeliveryType": "meetup"
    });
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(answer(&format!("```json\n{}\n```", draft)))
        .mount(&server)
        .await;

    let client = Arc::new(GeminiClient::new("k").with_base_url(server.uri()));
    let service = AiContentService::new(client);
    let draft = service
        .extract_listing_draft(vec![0xFF, 0xD8, 0xFF], "image/jpeg", Some(Language::Es))
        .await
        .unwrap();

    assert_eq!(draft.title, "Bicicleta de montaña");
    assert_eq!(draft.category, SystemCategory::Sports);
    assert_eq!(draft.suggested_price, 3500.0);
}
