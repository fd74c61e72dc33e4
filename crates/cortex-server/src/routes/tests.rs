use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use cortex_core::{
    provider::{HubAccount, HubDataset, HubModel, HubQuery, TextGenerationOptions},
    secret, CoreError, MemoryStore, ModelHub, PlanTier, Session, SessionStore, UsageStore, User,
    UserId, UserProfile, UserStore,
};
use cortex_db::SqliteStore;
use cortex_payments::{
    signature_header, CheckoutRequest, CheckoutSession, CreditsCheckoutRequest, PaymentGateway,
    RecordingEmailSender, SubscriptionStatus,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::router;
use crate::config::AppConfig;
use crate::state::AppState;

const USER_ID: UserId = 1;
const ISSUER_SECRET: &str = "issuer-test-secret";
const WEBHOOK_SECRET: &str = "whsec_router_test";

#[derive(Default)]
struct FakeHub {
    calls: AtomicUsize,
    fail: AtomicBool,
    last_limit: Mutex<Option<u32>>,
}

impl FakeHub {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn outcome(&self, output: Value) -> cortex_core::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(CoreError::Upstream("model overloaded".into()))
        } else {
            Ok(output)
        }
    }
}

#[async_trait]
impl ModelHub for FakeHub {
    async fn whoami(&self) -> cortex_core::Result<HubAccount> {
        Ok(serde_json::from_value(json!({ "id": "org1", "name": "omnicortex" }))?)
    }

    async fn list_models(&self, query: &HubQuery) -> cortex_core::Result<Vec<HubModel>> {
        *self.last_limit.lock().unwrap() = query.limit;
        Ok(serde_json::from_value(json!([
            { "id": "omnicortex/omni-7b", "downloads": 900 },
            { "id": "omnicortex/omni-1b", "downloads": 300 }
        ]))?)
    }

    async fn list_datasets(&self, _query: &HubQuery) -> cortex_core::Result<Vec<HubDataset>> {
        Ok(Vec::new())
    }

    async fn inference(&self, _model_id: &str, _inputs: &Value) -> cortex_core::Result<Value> {
        self.outcome(json!([{ "label": "POSITIVE", "score": 0.99 }]))
    }

    async fn generate_text(
        &self,
        _model_id: &str,
        prompt: &str,
        _options: &TextGenerationOptions,
    ) -> cortex_core::Result<Value> {
        self.outcome(json!([{ "generated_text": format!("{prompt} and more") }]))
    }
}

#[derive(Default)]
struct FakeGateway {
    success_urls: Mutex<Vec<String>>,
    emails: Mutex<Vec<Option<String>>>,
    canceled: Mutex<Vec<String>>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> cortex_payments::Result<CheckoutSession> {
        self.success_urls.lock().unwrap().push(request.success_url.clone());
        self.emails.lock().unwrap().push(request.user_email.clone());
        Ok(CheckoutSession {
            session_id: "cs_test_1".into(),
            url: format!("https://checkout.stripe.test/{}", request.plan_id),
        })
    }

    async fn create_credits_checkout(
        &self,
        request: &CreditsCheckoutRequest,
    ) -> cortex_payments::Result<CheckoutSession> {
        self.success_urls.lock().unwrap().push(request.success_url.clone());
        self.emails.lock().unwrap().push(request.user_email.clone());
        Ok(CheckoutSession {
            session_id: "cs_test_2".into(),
            url: format!("https://checkout.stripe.test/{}", request.credit_pack_id),
        })
    }

    async fn subscription_status(
        &self,
        _customer_id: &str,
    ) -> cortex_payments::Result<Option<SubscriptionStatus>> {
        Ok(None)
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> cortex_payments::Result<()> {
        self.canceled.lock().unwrap().push(subscription_id.to_string());
        Ok(())
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        _return_url: &str,
    ) -> cortex_payments::Result<String> {
        Ok(format!("https://billing.stripe.test/{customer_id}"))
    }
}

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
    hub: Arc<FakeHub>,
    mailer: Arc<RecordingEmailSender>,
    gateway: Arc<FakeGateway>,
    session: String,
}

impl Harness {
    async fn new(balance: i64) -> Self {
        Self::build(balance, true).await
    }

    async fn without_payments(balance: i64) -> Self {
        Self::build(balance, false).await
    }

    async fn build(balance: i64, payments: bool) -> Self {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let profile = UserProfile {
            open_id: "user-1".into(),
            name: Some("Ada".into()),
            email: Some("ada@example.com".into()),
            login_method: Some("email".into()),
        };
        let mut user = User::new(USER_ID, &profile, now);
        user.token_balance = balance;
        store.insert_user(user).await;

        let token = secret::generate_session_token();
        store
            .create_session(&Session {
                token_hash: token.hash,
                user_id: USER_ID,
                created_at: now,
                expires_at: now + Duration::hours(1),
            })
            .await
            .unwrap();

        let hub = Arc::new(FakeHub::default());
        let mailer = Arc::new(RecordingEmailSender::new());
        let gateway = Arc::new(FakeGateway::default());
        let config = AppConfig {
            auth_issuer_secret: Some(ISSUER_SECRET.into()),
            ..Default::default()
        };

        let mut state = AppState::new(store.clone(), hub.clone(), mailer.clone(), config)
            .with_webhook_secret(WEBHOOK_SECRET);
        if payments {
            state = state.with_gateway(gateway.clone());
        }

        Self {
            app: router(state),
            store,
            hub,
            mailer,
            gateway,
            session: token.secret,
        }
    }

    async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        send(&self.app, builder.body(body).unwrap()).await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.call(Method::GET, uri, token, None).await
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, token, Some(body)).await
    }

    async fn user(&self) -> User {
        self.store.get_user(USER_ID).await.unwrap().unwrap()
    }

    async fn create_key(&self, permissions: Value) -> String {
        let (status, body) = self
            .post(
                "/api/trpc/apiKeys.create",
                Some(&self.session),
                json!({ "name": "ci", "permissions": permissions }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["data"]["key"].as_str().unwrap().to_string()
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, value)
}

#[tokio::test]
async fn test_plans_are_public() {
    let h = Harness::new(10_000).await;

    let (status, body) = h.get("/api/trpc/pricing.getPlans", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["data"].as_array().unwrap().len(), 4);
    assert_eq!(body["data"][1]["id"], "pro");

    let (_, body) = h.get("/api/trpc/pricing.getPlanById?planId=business", None).await;
    assert_eq!(body["data"]["name"], "Business");

    let (status, body) = h
        .get("/api/trpc/pricing.getPlanById?input=%7B%22planId%22%3A%22nonexistent%22%7D", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn test_protected_procedures_require_credentials() {
    let h = Harness::new(10_000).await;

    let (status, body) = h.get("/api/trpc/dashboard.getStats", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = h.get("/api/trpc/dashboard.getStats", Some("sess_not_a_session")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // auth.me is public and answers null instead
    let (status, body) = h.get("/api/trpc/auth.me", Some("sess_not_a_session")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn test_session_cookie_authenticates() {
    let h = Harness::new(10_000).await;
    let request = Request::builder()
        .uri("/api/trpc/auth.me")
        .header(header::COOKIE, format!("oc_session={}", h.session))
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["openId"], "user-1");
    assert!(body["data"].get("huggingFaceToken").is_none());
}

#[tokio::test]
async fn test_api_key_list_never_exposes_secret() {
    let h = Harness::new(10_000).await;
    let key = h.create_key(json!(["read", "inference"])).await;
    assert!(key.starts_with("oc_"));

    let (status, body) = h.get("/api/trpc/apiKeys.list", Some(&h.session)).await;
    assert_eq!(status, StatusCode::OK);

    let listed = &body["data"][0];
    assert_eq!(listed["keyPrefix"], &key[..10]);
    assert!(listed.get("keyHash").is_none());
    assert!(!body.to_string().contains(&key));
}

#[tokio::test]
async fn test_api_key_validation() {
    let h = Harness::new(10_000).await;
    let session = Some(h.session.as_str());

    let (status, _) = h.post("/api/trpc/apiKeys.create", session, json!({ "name": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let long_name = "x".repeat(101);
    let (status, _) = h.post("/api/trpc/apiKeys.create", session, json!({ "name": long_name })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h
        .post("/api/trpc/apiKeys.create", session, json!({ "name": "k", "permissions": ["admin"] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h
        .post("/api/trpc/apiKeys.create", session, json!({ "name": "k", "expiresInDays": 0 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = h.post("/api/trpc/apiKeys.create", session, json!({ "name": "k" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["permissions"], json!(["read"]));
}

#[tokio::test]
async fn test_api_key_permissions_and_revocation() {
    let h = Harness::new(10_000).await;
    let key = h.create_key(json!(["read"])).await;

    let (status, _) = h.get("/api/trpc/dashboard.getStats", Some(&key)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h
        .post("/api/trpc/huggingface.inference", Some(&key), json!({ "modelId": "gpt2", "inputs": "hi" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");

    // Key management is session-only
    let (status, _) = h.get("/api/trpc/apiKeys.list", Some(&key)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = h.get("/api/trpc/apiKeys.list", Some(&h.session)).await;
    let key_id = body["data"][0]["id"].as_str().unwrap().to_string();
    assert!(!body["data"][0]["lastUsedAt"].is_null());

    let (status, _) = h
        .post("/api/trpc/apiKeys.revoke", Some(&h.session), json!({ "keyId": key_id }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h.get("/api/trpc/dashboard.getStats", Some(&key)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, body) = h.get("/api/trpc/apiKeys.list", Some(&h.session)).await;
    assert_eq!(body["data"][0]["isActive"], false);
}

#[tokio::test]
async fn test_unknown_key_id_is_not_found() {
    let h = Harness::new(10_000).await;

    let (status, body) = h
        .post("/api/trpc/apiKeys.delete", Some(&h.session), json!({ "keyId": "missing" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_insufficient_balance_rejects_before_calling_hub() {
    let h = Harness::new(50).await;

    let (status, body) = h
        .post(
            "/api/trpc/huggingface.inference",
            Some(&h.session),
            json!({ "modelId": "gpt2", "inputs": "hello" }),
        )
        .await;

    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["error"]["code"], "precondition_failed");
    assert!(body["error"]["message"].as_str().unwrap().contains("50 available"));
    assert_eq!(h.hub.calls(), 0);
    assert_eq!(h.user().await.token_balance, 50);
}

#[tokio::test]
async fn test_failed_inference_refunds_reservation() {
    let h = Harness::new(5_000).await;
    h.hub.fail.store(true, Ordering::SeqCst);

    let (status, body) = h
        .post(
            "/api/trpc/huggingface.inference",
            Some(&h.session),
            json!({ "modelId": "gpt2", "inputs": "hello" }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "bad_gateway");
    assert_eq!(h.hub.calls(), 1);

    let user = h.user().await;
    assert_eq!(user.token_balance, 5_000);
    assert_eq!(user.tokens_used_this_month, 0);

    let calls = h.store.count_usage_since(USER_ID, Utc::now() - Duration::days(1)).await.unwrap();
    assert_eq!(calls, 0);
}

#[tokio::test]
async fn test_generate_text_debits_and_logs_usage() {
    let h = Harness::new(5_000).await;

    let (status, body) = h
        .post(
            "/api/trpc/huggingface.generateText",
            Some(&h.session),
            json!({ "modelId": "gpt2", "prompt": "Hello world!", "maxNewTokens": 64 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"][0]["generated_text"], "Hello world! and more");

    let user = h.user().await;
    assert_eq!(user.token_balance, 5_000 - 67);
    assert_eq!(user.tokens_used_this_month, 67);

    let (_, stats) = h.get("/api/trpc/dashboard.getStats", Some(&h.session)).await;
    assert_eq!(stats["data"]["apiCallsThisMonth"], 1);
    assert_eq!(stats["data"]["planName"], "Starter");
    assert_eq!(stats["data"]["tokenLimit"], 10_000);
}

#[tokio::test]
async fn test_crossing_low_balance_threshold_sends_one_alert() {
    let h = Harness::new(1_150).await;
    let body = json!({ "modelId": "gpt2", "inputs": "hello" });

    // 1150 -> 1050, still above the threshold
    let (status, _) = h.post("/api/trpc/huggingface.inference", Some(&h.session), body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.mailer.sent().await.is_empty());

    // 1050 -> 950 crosses it, 950 -> 850 does not again
    h.post("/api/trpc/huggingface.inference", Some(&h.session), body.clone()).await;
    h.post("/api/trpc/huggingface.inference", Some(&h.session), body).await;

    let sent = h.mailer.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to.email, "ada@example.com");
    assert!(sent[0].template.text.contains("950"));
    assert_eq!(h.user().await.token_balance, 850);
}

#[tokio::test]
async fn test_list_models_passes_limit() {
    let h = Harness::new(10_000).await;

    let (status, body) = h.get("/api/trpc/huggingface.listModels?limit=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(*h.hub.last_limit.lock().unwrap(), Some(5));

    let (status, _) = h.get("/api/trpc/huggingface.listModels", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(*h.hub.last_limit.lock().unwrap(), Some(20));

    let (status, _) = h.get("/api/trpc/huggingface.listModels?limit=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_session_issue_and_logout() {
    let h = Harness::new(10_000).await;
    let input = json!({ "openId": "new-user", "name": "Grace", "email": "grace@example.com" });

    let request = |secret: &str| {
        Request::builder()
            .method(Method::POST)
            .uri("/api/trpc/auth.createSession")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-issuer-secret", secret)
            .body(Body::from(input.to_string()))
            .unwrap()
    };

    let (status, _) = send(&h.app, request("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&h.app, request(ISSUER_SECRET)).await;
    assert_eq!(status, StatusCode::OK);
    let token = body["data"]["token"].as_str().unwrap().to_string();
    assert!(token.starts_with("sess_"));
    assert_eq!(body["data"]["user"]["tokenBalance"], 10_000);

    let (_, me) = h.get("/api/trpc/auth.me", Some(&token)).await;
    assert_eq!(me["data"]["name"], "Grace");

    let (status, _) = h.call(Method::POST, "/api/trpc/auth.logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, me) = h.get("/api/trpc/auth.me", Some(&token)).await;
    assert!(me["data"].is_null());
}

#[tokio::test]
async fn test_checkout_needs_payments_configured() {
    let h = Harness::without_payments(10_000).await;

    let (status, body) = h
        .post("/api/trpc/subscription.createCheckout", Some(&h.session), json!({ "planId": "pro" }))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "service_unavailable");
}

#[tokio::test]
async fn test_checkout_uses_request_origin() {
    let h = Harness::new(10_000).await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/trpc/subscription.createCheckout")
        .header(header::AUTHORIZATION, format!("Bearer {}", h.session))
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ORIGIN, "https://app.omnicortex.test")
        .body(Body::from(json!({ "planId": "pro", "isYearly": true }).to_string()))
        .unwrap();

    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["url"], "https://checkout.stripe.test/pro");
    assert_eq!(
        h.gateway.success_urls.lock().unwrap().as_slice(),
        ["https://app.omnicortex.test/dashboard/billing?success=true".to_string()]
    );
}

#[tokio::test]
async fn test_checkout_omits_missing_email() {
    let h = Harness::new(10_000).await;
    let mut user = h.user().await;
    user.email = None;
    h.store.insert_user(user).await;

    let (status, _) = h
        .post("/api/trpc/subscription.buyCredits", Some(&h.session), json!({ "creditPackId": "credits-small" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.gateway.emails.lock().unwrap().as_slice(), [None]);
}

#[tokio::test]
async fn test_cancel_and_portal_need_processor_ids() {
    let h = Harness::new(10_000).await;

    let (status, body) = h.call(Method::POST, "/api/trpc/subscription.cancel", Some(&h.session), None).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["error"]["message"], "No active subscription found");

    let (status, _) = h
        .call(Method::POST, "/api/trpc/subscription.getPortalUrl", Some(&h.session), None)
        .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert!(h.gateway.canceled.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let h = Harness::new(10_000).await;
    let payload = json!({
        "id": "evt_1",
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_1",
            "mode": "subscription",
            "customer": "cus_1",
            "subscription": "sub_1",
            "metadata": { "user_id": "1", "plan_id": "pro" }
        }}
    })
    .to_string();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/stripe/webhook")
        .header("stripe-signature", format!("t={},v1=deadbeef", Utc::now().timestamp()))
        .body(Body::from(payload.clone()))
        .unwrap();
    let (status, _) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.user().await.subscription_plan, PlanTier::Free);

    let signature = signature_header(&payload, WEBHOOK_SECRET, Utc::now().timestamp()).unwrap();
    let signed = || {
        Request::builder()
            .method(Method::POST)
            .uri("/api/stripe/webhook")
            .header("stripe-signature", signature.clone())
            .body(Body::from(payload.clone()))
            .unwrap()
    };

    let (status, body) = send(&h.app, signed()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));

    let user = h.user().await;
    assert_eq!(user.subscription_plan, PlanTier::Pro);
    assert_eq!(user.subscription_status, "active");

    let (_, body) = send(&h.app, signed()).await;
    assert_eq!(body, json!({ "received": true, "duplicate": true }));
}

fn signed_webhook(payload: &str) -> Request<Body> {
    let signature = signature_header(payload, WEBHOOK_SECRET, Utc::now().timestamp()).unwrap();
    Request::builder()
        .method(Method::POST)
        .uri("/api/stripe/webhook")
        .header("stripe-signature", signature)
        .body(Body::from(payload.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_failed_webhook_is_redelivered() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let buyer = store
        .upsert_user(&UserProfile {
            open_id: "buyer".into(),
            email: Some("buyer@example.com".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    let state = AppState::new(
        store.clone(),
        Arc::new(FakeHub::default()),
        Arc::new(RecordingEmailSender::new()),
        AppConfig::default(),
    )
    .with_webhook_secret(WEBHOOK_SECRET);
    let app = router(state);

    let payload = json!({
        "id": "evt_pi_retry",
        "type": "payment_intent.succeeded",
        "data": { "object": {
            "id": "pi_retry",
            "metadata": { "user_id": buyer.id.to_string(), "credit_pack_id": "credits-small" }
        }}
    })
    .to_string();

    // Users table unavailable: the handler fails before crediting
    sqlx::query("ALTER TABLE users RENAME TO users_offline")
        .execute(store.pool())
        .await
        .unwrap();
    let (status, body) = send(&app, signed_webhook(&payload)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Webhook processing failed");

    sqlx::query("ALTER TABLE users_offline RENAME TO users")
        .execute(store.pool())
        .await
        .unwrap();
    let (status, body) = send(&app, signed_webhook(&payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));

    let (_, body) = send(&app, signed_webhook(&payload)).await;
    assert_eq!(body, json!({ "received": true, "duplicate": true }));

    let balance = store.get_user(buyer.id).await.unwrap().unwrap().token_balance;
    assert_eq!(balance, buyer.token_balance + 500_000);
}

#[tokio::test]
async fn test_health() {
    let h = Harness::without_payments(10_000).await;

    let (status, body) = h.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["databaseReachable"], true);
    assert_eq!(body["stripeConfigured"], false);
    assert_eq!(body["webhooksConfigured"], true);
}
