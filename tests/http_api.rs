use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use product_rag::config::Config;
use product_rag::models::ProductField;
use product_rag::server::{serve, AppState};
use serde_json::{json, Value};
use tempfile::TempDir;

const PRODUCTS_CSV: &str = "PRODUCT_NAME,tid,PRICE_RETAIL,url
Blue Widget,1023,19.99,https://shop.example.com/p/1023
Steel Hammer,2047,12.50,https://shop.example.com/p/2047
Garden Hose,3001,24.50,https://shop.example.com/p/3001
";

/// Stand-in for the Gemini `generateContent` endpoint that echoes the prompt.
async fn spawn_generator_stub() -> SocketAddr {
    async fn generate(Json(body): Json<Value>) -> Json<Value> {
        let prompt = body["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        Json(json!({
            "candidates": [
                { "content": { "parts": [ { "text": format!("Generated: {}", prompt) } ] } }
            ]
        }))
    }

    spawn(Router::new().route("/models/{*rest}", post(generate))).await
}

async fn spawn_failing_generator_stub() -> SocketAddr {
    async fn generate() -> (StatusCode, &'static str) {
        (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded")
    }

    spawn(Router::new().route("/models/{*rest}", post(generate))).await
}

const OPENAI_KEY: &str = "test-openai-key";

fn gemini_section(addr: SocketAddr) -> String {
    format!(
        "\n[generative]\nprovider = \"gemini\"\nurl = \"http://{}\"\ntimeout_secs = 5\n",
        addr
    )
}

fn openai_chat_section(addr: SocketAddr) -> String {
    format!(
        "\n[generative]\nprovider = \"openai\"\nurl = \"http://{}\"\ntimeout_secs = 5\n",
        addr
    )
}

fn embedding_section(addr: SocketAddr, dims: usize) -> String {
    format!(
        "\n[embedding]\nprovider = \"openai\"\nurl = \"http://{}\"\ndims = {}\ntimeout_secs = 5\n",
        addr, dims
    )
}

/// Stand-in for OpenAI `chat/completions` that echoes the user message.
async fn spawn_chat_stub() -> SocketAddr {
    async fn complete(Json(body): Json<Value>) -> Json<Value> {
        let content = body["messages"][0]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        Json(json!({
            "choices": [
                { "message": { "role": "assistant", "content": format!("Chat: {}", content) } }
            ]
        }))
    }

    spawn(Router::new().route("/chat/completions", post(complete))).await
}

async fn spawn_failing_chat_stub() -> SocketAddr {
    async fn complete() -> (StatusCode, &'static str) {
        (StatusCode::TOO_MANY_REQUESTS, "rate limited")
    }

    spawn(Router::new().route("/chat/completions", post(complete))).await
}

/// Stand-in for OpenAI `/embeddings`.
///
/// Answers the first `succeed_for` requests with a `dims`-long vector derived
/// from the input length, then fails with 503. Requests without the bearer
/// key or without `model` and `input` are rejected with 400.
async fn spawn_embedding_stub(dims: usize, succeed_for: usize) -> SocketAddr {
    #[derive(Clone)]
    struct Stub {
        dims: usize,
        succeed_for: usize,
        calls: Arc<AtomicUsize>,
    }

    async fn embed(
        State(stub): State<Stub>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let expected = format!("Bearer {}", OPENAI_KEY);
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some(expected.as_str());
        let input = body["input"][0].as_str();
        if !authorized || body["model"].as_str().is_none() || input.is_none() {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": "bad request" })));
        }

        if stub.calls.fetch_add(1, Ordering::SeqCst) >= stub.succeed_for {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "embedding backend down" })),
            );
        }

        let seed = input.unwrap_or_default().len() as f32;
        let vector: Vec<f32> = (0..stub.dims).map(|i| seed + i as f32).collect();
        (
            StatusCode::OK,
            Json(json!({ "data": [ { "embedding": vector } ] })),
        )
    }

    let stub = Stub {
        dims,
        succeed_for,
        calls: Arc::new(AtomicUsize::new(0)),
    };
    spawn(
        Router::new()
            .route("/embeddings", post(embed))
            .with_state(stub),
    )
    .await
}

async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

struct TestApp {
    base: String,
    state: AppState,
    client: reqwest::Client,
    _tmp: TempDir,
}

impl TestApp {
    /// App whose generative fallback is the Gemini stub at `generator`.
    async fn start(generator: SocketAddr, extra: &str) -> Self {
        Self::start_with(&format!("{}{}", gemini_section(generator), extra)).await
    }

    async fn start_with(sections: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let toml_src = format!(
            r#"[db]
path = "{}/catalog.sqlite"

[server]
bind = "127.0.0.1:0"
cors_origins = ["*"]
{}
"#,
            tmp.path().display(),
            sections
        );
        let mut cfg: Config = toml::from_str(&toml_src).unwrap();
        cfg.validate().unwrap();
        cfg.credentials.gemini_api_key = Some("test-key".to_string());
        cfg.credentials.openai_api_key = Some(OPENAI_KEY.to_string());

        let state = AppState::from_config(&cfg).await.unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app_state = state.clone();
        tokio::spawn(async move {
            serve(listener, app_state).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            state,
            client: reqwest::Client::new(),
            _tmp: tmp,
        }
    }

    async fn upload(&self, file_name: &str, contents: &str) -> (StatusCode, Value) {
        let part = reqwest::multipart::Part::bytes(contents.as_bytes().to_vec())
            .file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = self
            .client
            .post(format!("{}/upload_csv", self.base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        (status, resp.json().await.unwrap())
    }

    async fn ask(&self, body: Value) -> (StatusCode, Value) {
        let resp = self
            .client
            .post(format!("{}/ask_query", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        (status, resp.json().await.unwrap())
    }

    async fn answer(&self, query: &str) -> String {
        let (status, body) = self.ask(json!({ "query": query })).await;
        assert_eq!(status, StatusCode::OK, "unexpected body: {}", body);
        body["response"].as_str().unwrap().to_string()
    }

    async fn count(&self) -> u64 {
        self.state.store.count().await.unwrap()
    }
}

#[tokio::test]
async fn test_upload_indexes_every_row() {
    let app = TestApp::start(spawn_generator_stub().await, "").await;

    let (status, body) = app.upload("products.csv", PRODUCTS_CSV).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "CSV data indexed successfully.");
    assert_eq!(body["documents"], 3);
    assert_eq!(app.count().await, 3);
}

#[tokio::test]
async fn test_reupload_replaces_catalog() {
    let app = TestApp::start(spawn_generator_stub().await, "").await;

    app.upload("products.csv", PRODUCTS_CSV).await;
    let (status, _) = app.upload("products.csv", PRODUCTS_CSV).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(app.count().await, 3);

    let smaller = "PRODUCT_NAME,tid,PRICE_RETAIL\nDesk Lamp,5005,31.00\n";
    app.upload("lamps.csv", smaller).await;
    assert_eq!(app.count().await, 1);
    assert!(app
        .state
        .store
        .exact_match(ProductField::Tid, "1023")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_upload_rejects_non_csv_without_touching_catalog() {
    let app = TestApp::start(spawn_generator_stub().await, "").await;
    app.upload("products.csv", PRODUCTS_CSV).await;

    let (status, body) = app.upload("data.txt", PRODUCTS_CSV).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "File type not supported. Please upload a CSV file."
    );
    assert_eq!(app.count().await, 3);
}

#[tokio::test]
async fn test_upload_rejects_missing_column_without_touching_catalog() {
    let app = TestApp::start(spawn_generator_stub().await, "").await;
    app.upload("products.csv", PRODUCTS_CSV).await;

    let (status, body) = app
        .upload("broken.csv", "PRODUCT_NAME,PRICE_RETAIL\nWidget,1.00\n")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "CSV is missing required column: tid");
    assert_eq!(app.count().await, 3);
}

#[tokio::test]
async fn test_upload_without_file_field() {
    let app = TestApp::start(spawn_generator_stub().await, "").await;

    let form = reqwest::multipart::Form::new().text("note", "no file here");
    let resp = app
        .client
        .post(format!("{}/upload_csv", app.base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "No file part");
}

#[tokio::test]
async fn test_upload_with_empty_file_name() {
    let app = TestApp::start(spawn_generator_stub().await, "").await;

    let (status, body) = app.upload("", PRODUCTS_CSV).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No selected file");
}

#[tokio::test]
async fn test_tid_price_query() {
    let app = TestApp::start(spawn_generator_stub().await, "").await;
    app.upload("products.csv", PRODUCTS_CSV).await;

    let text = app.answer("What is the price of TID 1023?").await;
    assert_eq!(text, "The price of TID 1023 is $19.99.");
}

#[tokio::test]
async fn test_tid_query_shapes_by_keyword() {
    let app = TestApp::start(spawn_generator_stub().await, "").await;
    app.upload("products.csv", PRODUCTS_CSV).await;

    assert_eq!(
        app.answer("product name for tid 2047").await,
        "The product name of TID 2047 is Steel Hammer."
    );
    assert_eq!(
        app.answer("url of tid 3001").await,
        "The URL for the product with TID 3001 is https://shop.example.com/p/3001."
    );
    assert_eq!(
        app.answer("tell me about tid 3001").await,
        "The product Garden Hose (TID 3001) is priced at $24.50. You can find more details here: https://shop.example.com/p/3001."
    );
}

#[tokio::test]
async fn test_unknown_tid_falls_back_to_generator() {
    let app = TestApp::start(spawn_generator_stub().await, "").await;
    app.upload("products.csv", PRODUCTS_CSV).await;

    let text = app.answer("tid 9999999").await;
    assert_eq!(text, "Generated: Reply in a professional manner: tid 9999999");
}

#[tokio::test]
async fn test_fuzzy_match_tolerates_typos() {
    let app = TestApp::start(spawn_generator_stub().await, "").await;
    app.upload("products.csv", PRODUCTS_CSV).await;

    let text = app.answer("garden hoze").await;
    assert!(text.contains("Garden Hose"), "got: {}", text);
    assert!(text.contains("3001"));
}

#[tokio::test]
async fn test_query_before_any_upload_uses_generator() {
    let app = TestApp::start(spawn_generator_stub().await, "").await;

    let text = app.answer("hello").await;
    assert_eq!(text, "Generated: Reply in a professional manner: hello");
}

#[tokio::test]
async fn test_generator_failure_is_returned_as_text() {
    let app = TestApp::start(spawn_failing_generator_stub().await, "").await;

    let (status, body) = app.ask(json!({ "query": "hello" })).await;
    assert_eq!(status, StatusCode::OK);
    let text = body["response"].as_str().unwrap();
    assert!(text.starts_with("Error calling generative API"), "got: {}", text);
}

#[tokio::test]
async fn test_ask_rejects_bad_bodies() {
    let app = TestApp::start(spawn_generator_stub().await, "").await;

    let (status, body) = app.ask(json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Request body must include a string 'query' field"
    );

    let (status, _) = app.ask(json!({ "query": 42 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_strict_mode_reports_missing_products() {
    let app = TestApp::start(
        spawn_generator_stub().await,
        "\n[responder]\nmode = \"strict\"\n",
    )
    .await;
    app.upload("products.csv", PRODUCTS_CSV).await;

    assert_eq!(
        app.answer("tid 1023").await,
        "The price of Blue Widget with TID 1023 is $19.99."
    );
    assert_eq!(
        app.answer("tid 4242").await,
        "No product found with TID 4242."
    );
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::start(spawn_generator_stub().await, "").await;

    let resp = app
        .client
        .get(format!("{}/health", app.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_file_field_without_filename_is_not_an_upload() {
    let app = TestApp::start(spawn_generator_stub().await, "").await;

    let form = reqwest::multipart::Form::new().text("file", PRODUCTS_CSV);
    let resp = app
        .client
        .post(format!("{}/upload_csv", app.base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "No file part");
}

#[tokio::test]
async fn test_upload_stores_embeddings() {
    let sections = format!(
        "{}{}",
        gemini_section(spawn_generator_stub().await),
        embedding_section(spawn_embedding_stub(8, usize::MAX).await, 8)
    );
    let app = TestApp::start_with(&sections).await;

    let (status, body) = app.upload("products.csv", PRODUCTS_CSV).await;
    assert_eq!(status, StatusCode::CREATED, "unexpected body: {}", body);
    assert_eq!(body["documents"], 3);

    let hits = app
        .state
        .store
        .exact_match(ProductField::Tid, "1023")
        .await
        .unwrap();
    let embedding = hits[0].record.embedding.as_ref().unwrap();
    assert_eq!(embedding.len(), 8);
    // The stub seeds each vector with the length of the embedded description.
    let description = "Product: Blue Widget, Price: 19.99, TID: 1023";
    assert_eq!(embedding[0], description.len() as f32);

    // Answers still come from the text index.
    assert_eq!(
        app.answer("price of tid 1023").await,
        "The price of TID 1023 is $19.99."
    );
}

#[tokio::test]
async fn test_embedding_failure_mid_upload_is_bad_gateway() {
    let sections = format!(
        "{}{}",
        gemini_section(spawn_generator_stub().await),
        embedding_section(spawn_embedding_stub(4, 2).await, 4)
    );
    let app = TestApp::start_with(&sections).await;

    let (status, body) = app.upload("products.csv", PRODUCTS_CSV).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let message = body["error"].as_str().unwrap();
    assert!(message.starts_with("Failed to index CSV data"), "got: {}", message);
    assert!(message.contains("embedding backend down"), "got: {}", message);
    assert_eq!(body.as_object().unwrap().len(), 1);

    // Rows written before the failure stay; there is no rollback.
    assert_eq!(app.count().await, 2);
}

#[tokio::test]
async fn test_embedding_dimension_mismatch_is_bad_gateway() {
    let sections = format!(
        "{}{}",
        gemini_section(spawn_generator_stub().await),
        embedding_section(spawn_embedding_stub(2, usize::MAX).await, 3)
    );
    let app = TestApp::start_with(&sections).await;

    let (status, body) = app.upload("products.csv", PRODUCTS_CSV).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("embedding has 2 dims, expected 3"));
    assert_eq!(app.count().await, 0);
}

#[tokio::test]
async fn test_openai_chat_generator_answers_fallback() {
    let app = TestApp::start_with(&openai_chat_section(spawn_chat_stub().await)).await;

    assert_eq!(
        app.answer("hello").await,
        "Chat: Reply in a professional manner: hello"
    );
}

#[tokio::test]
async fn test_openai_chat_generator_failure_is_returned_as_text() {
    let app = TestApp::start_with(&openai_chat_section(spawn_failing_chat_stub().await)).await;

    assert_eq!(
        app.answer("hello").await,
        "Error calling generative API: rate limited"
    );
}
