//! Session injection, company scoping and the relogin flow.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use erp_admin_client::store::{KEY_COMPANY_NAME, KEY_ENTITY_VERSIONS};
use erp_admin_client::{
    ApiClient, ApiError, ClientEvent, LoginCredentials, MemoryStore, PersistentStore,
    SessionState,
};
use serde_json::{json, Value};
use zeroize::Zeroizing;

fn expired_body() -> Value {
    json!({"status": "error", "message": "Session expired, please login again"})
}

#[tokio::test]
async fn get_carries_identity_and_cache_buster() {
    let backend = start_json_backend(Duration::ZERO, json!({"status": "success", "data": []})).await;
    let t = logged_in_client(&backend);

    t.client.get("clients/get_all.php?page=2").await.unwrap();

    let req = backend.last_request();
    assert_eq!(req.method, "GET");
    assert_eq!(req.path, "/acme/clients/get_all.php");
    assert_eq!(req.query_param("page"), Some("2"));
    assert_eq!(req.query_param("users_uuid"), Some(USERS_UUID));
    assert!(req
        .query_param("_t")
        .and_then(|t| t.parse::<i64>().ok())
        .is_some());
    assert_eq!(req.header("x-users-uuid"), Some(USERS_UUID));
}

#[tokio::test]
async fn post_json_body_gets_identity_merged() {
    let backend = start_json_backend(Duration::ZERO, json!({"status": "success", "data": null})).await;
    let t = logged_in_client(&backend);

    t.client
        .post("products/update.php", json!({"products_id": 9, "products_name": "Tea"}))
        .await
        .unwrap();

    let req = backend.last_request();
    assert_eq!(req.method, "POST");
    assert_eq!(req.query_param("users_uuid"), None);
    assert_eq!(
        req.json(),
        json!({"products_id": 9, "products_name": "Tea", "users_uuid": USERS_UUID})
    );
}

#[tokio::test]
async fn post_without_body_sends_identity_only() {
    let backend = start_json_backend(Duration::ZERO, json!({"status": "success", "data": null})).await;
    let t = logged_in_client(&backend);

    t.client
        .post("visit_plans/close.php", erp_admin_client::RequestBody::Empty)
        .await
        .unwrap();

    assert_eq!(backend.last_request().json(), json!({"users_uuid": USERS_UUID}));
}

#[tokio::test]
async fn multipart_upload_carries_identity_field() {
    let backend = start_json_backend(Duration::ZERO, json!({"status": "success", "data": null})).await;
    let t = logged_in_client(&backend);

    let form = erp_admin_client::FormBody::new()
        .text("products_id", "9")
        .file("image", "tea.png", "image/png", vec![0x89, 0x50, 0x4e, 0x47]);
    t.client.post("products/upload_image.php", form).await.unwrap();

    let req = backend.last_request();
    assert!(req
        .header("content-type")
        .is_some_and(|ct| ct.starts_with("multipart/form-data")));
    assert!(req.body.contains(r#"name="users_uuid""#));
    assert!(req.body.contains(USERS_UUID));
    assert!(req.body.contains(r#"name="products_id""#));
    assert!(req.body.contains(r#"filename="tea.png""#));
}

#[tokio::test]
async fn raw_text_body_is_sent_as_form_data_field() {
    let backend = start_json_backend(Duration::ZERO, json!({"status": "success", "data": null})).await;
    let t = logged_in_client(&backend);

    t.client
        .post(
            "stock/adjust.php",
            erp_admin_client::RequestBody::Text("id=5&qty=2".into()),
        )
        .await
        .unwrap();

    let req = backend.last_request();
    assert!(req
        .header("content-type")
        .is_some_and(|ct| ct.starts_with("multipart/form-data")));
    assert!(req.body.contains(r#"name="data""#));
    assert!(req.body.contains("id=5&qty=2"));
    assert!(req.body.contains(r#"name="users_uuid""#));
    assert!(req.body.contains(USERS_UUID));
}

#[tokio::test]
async fn truncated_response_body_is_a_transport_error() {
    let backend =
        start_truncating_backend(json!({"status": "success", "data": [{"id": 1}]})).await;
    let t = logged_in_client(&backend);

    let err = t.client.get("clients/get_all.php").await.unwrap_err();

    assert!(matches!(err, ApiError::Transport(_)), "got {err:?}");
    assert_eq!(backend.hits(), 1);
    assert_eq!(t.sink.count(), 0);
}

#[tokio::test]
async fn missing_company_fails_without_touching_the_network() {
    let backend = start_json_backend(Duration::ZERO, json!({"status": "success"})).await;
    let t = logged_out_client(&backend);

    let err = t.client.get("clients/get_all.php").await.unwrap_err();

    assert!(matches!(err, ApiError::Config(_)), "got {err:?}");
    assert_eq!(backend.hits(), 0);
    assert_eq!(t.sink.count(), 0);
}

#[tokio::test]
async fn in_band_auth_failure_clears_state_and_prompts_relogin_once() {
    let backend = start_json_backend(Duration::ZERO, expired_body()).await;
    let t = logged_in_client(&backend);
    t.store.set(KEY_ENTITY_VERSIONS, "{}").unwrap();

    let err = t.client.get("clients/get_all.php").await.unwrap_err();

    assert!(err.is_session_expired(), "got {err:?}");
    assert_eq!(t.sink.count(), 1);
    assert!(t.store.is_empty());
    assert_eq!(t.client.session().state(), SessionState::Cleared);
    assert!(t.client.session().identity().is_none());

    // With the company gone the next call fails fast; no second prompt.
    let err = t.client.get("clients/get_all.php").await.unwrap_err();
    assert!(matches!(err, ApiError::Config(_)));
    assert_eq!(t.sink.count(), 1);
    assert_eq!(backend.hits(), 1);
}

#[tokio::test]
async fn concurrent_auth_failures_prompt_relogin_once() {
    let backend = start_json_backend(Duration::from_millis(100), expired_body()).await;
    let t = logged_in_client(&backend);

    let (a, b, c) = tokio::join!(
        t.client.get("clients/get_all.php"),
        t.client.get("products/get_all.php"),
        t.client.post("safes/add.php", json!({"safes_name": "Main"})),
    );

    assert!(a.unwrap_err().is_session_expired());
    assert!(b.unwrap_err().is_session_expired());
    assert!(c.unwrap_err().is_session_expired());
    assert_eq!(backend.hits(), 3);
    assert_eq!(t.sink.count(), 1);
}

#[tokio::test]
async fn machine_readable_code_triggers_relogin() {
    let backend = start_backend(Duration::ZERO, |_| {
        (401, json!({"status": "error", "code": "SESSION_EXPIRED"}).to_string())
    })
    .await;
    let t = logged_in_client(&backend);

    let err = t.client.get("users/get_all.php").await.unwrap_err();

    assert!(err.is_session_expired());
    assert_eq!(t.sink.count(), 1);
}

#[tokio::test]
async fn phrase_detection_can_be_disabled() {
    let backend = start_json_backend(Duration::ZERO, expired_body()).await;
    let mut config = config_for(&backend);
    config.phrase_auth_detection = false;
    let t = client_with_config(config, true);

    let err = t
        .client
        .get_data::<Value>("clients/get_all.php")
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Business(_)), "got {err:?}");
    assert_eq!(t.sink.count(), 0);
    assert_eq!(t.client.session().state(), SessionState::Active);
}

#[tokio::test]
async fn sentinel_is_recognised_even_without_phrase_detection() {
    let backend = start_json_backend(
        Duration::ZERO,
        json!({"status": "error", "message": "AUTH_REQUIRED"}),
    )
    .await;
    let mut config = config_for(&backend);
    config.phrase_auth_detection = false;
    let t = client_with_config(config, true);

    let err = t.client.get("clients/get_all.php").await.unwrap_err();

    assert!(err.is_session_expired());
    assert_eq!(t.sink.count(), 1);
}

#[tokio::test]
async fn business_failure_is_not_a_session_failure() {
    let backend = start_json_backend(
        Duration::ZERO,
        json!({"status": "error", "message": "Duplicate entry 'INV-7' for key 'code'"}),
    )
    .await;
    let t = logged_in_client(&backend);

    let err = t
        .client
        .post_data::<Value>("invoices/add.php", json!({"code": "INV-7"}))
        .await
        .unwrap_err();

    assert_eq!(err, ApiError::Business("This record already exists.".into()));
    assert_eq!(t.sink.count(), 0);
}

#[tokio::test]
async fn http_error_carries_status() {
    let backend = start_backend(Duration::ZERO, |_| (404, String::new())).await;
    let t = logged_in_client(&backend);

    let err = t.client.get("missing/get_all.php").await.unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert_eq!(t.sink.count(), 0);
}

#[tokio::test]
async fn login_persists_identity_and_company() {
    let backend = start_backend(Duration::ZERO, |req| {
        assert_eq!(req.path, "/auth/login.php");
        let body = req.json();
        assert_eq!(body["username"], "mona");
        assert_eq!(body.get("users_uuid"), None);
        (
            200,
            json!({
                "status": "success",
                "data": {"users_uuid": "new-uuid", "users_id": 12, "name": "Mona", "company_name": "acme"}
            })
            .to_string(),
        )
    })
    .await;
    let t = logged_out_client(&backend);
    assert_eq!(t.client.session().state(), SessionState::Cleared);

    let identity = t
        .client
        .login(LoginCredentials {
            username: " mona ".into(),
            password: Zeroizing::new("s3cret".into()),
            company: None,
        })
        .await
        .unwrap();

    assert_eq!(identity.users_uuid, "new-uuid");
    assert_eq!(identity.user_id.as_deref(), Some("12"));
    assert_eq!(t.client.session().state(), SessionState::Active);
    assert_eq!(t.client.session().company().as_deref(), Some("acme"));
    assert_eq!(
        t.client.session().identity().map(|i| i.users_uuid),
        Some("new-uuid".to_string())
    );
}

#[tokio::test]
async fn rejected_login_is_a_business_error() {
    let backend = start_json_backend(
        Duration::ZERO,
        json!({"status": "error", "message": "Unauthorized: wrong password"}),
    )
    .await;
    let t = logged_out_client(&backend);

    let err = t
        .client
        .login(LoginCredentials {
            username: "mona".into(),
            password: Zeroizing::new("nope".into()),
            company: Some("acme".into()),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Business(_)), "got {err:?}");
    assert_eq!(t.sink.count(), 0);
}

#[tokio::test]
async fn relogin_after_expiry_reactivates_session() {
    let backend = start_backend(Duration::ZERO, |req| {
        if req.path == "/auth/login.php" {
            (
                200,
                json!({"status": "success", "data": {"users_uuid": "fresh", "company_name": "acme"}})
                    .to_string(),
            )
        } else {
            (200, expired_body().to_string())
        }
    })
    .await;
    let t = logged_in_client(&backend);

    assert!(t.client.get("clients/get_all.php").await.is_err());
    assert_eq!(t.sink.count(), 1);

    t.client
        .login(LoginCredentials {
            username: "mona".into(),
            password: Zeroizing::new("s3cret".into()),
            company: None,
        })
        .await
        .unwrap();
    assert!(t.client.get("clients/get_all.php").await.is_err());
    assert_eq!(t.sink.count(), 2);
}

#[tokio::test]
async fn redirect_event_is_emitted_without_a_sink() {
    let backend = start_json_backend(Duration::ZERO, expired_body()).await;
    let store = Arc::new(MemoryStore::new());
    store.set(KEY_COMPANY_NAME, COMPANY).unwrap();
    let client = ApiClient::builder(config_for(&backend))
        .store(store as Arc<dyn PersistentStore>)
        .build()
        .unwrap();
    let mut events = client.subscribe();

    assert!(client.get("clients/get_all.php").await.is_err());

    assert!(matches!(
        events.try_recv().unwrap(),
        ClientEvent::SessionExpired { .. }
    ));
    assert_eq!(
        events.try_recv().unwrap(),
        ClientEvent::RedirectToLogin {
            route: "/login".into()
        }
    );
}

#[tokio::test]
async fn logout_clears_state_without_prompt() {
    let backend = start_json_backend(Duration::ZERO, json!({"status": "success"})).await;
    let t = logged_in_client(&backend);

    t.client.logout().unwrap();

    assert!(t.store.is_empty());
    assert_eq!(t.client.session().state(), SessionState::Cleared);
    assert_eq!(t.sink.count(), 0);
}
