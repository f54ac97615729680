//! Credential-channel entry CRUD: the autosave upsert contract as seen over
//! HTTP, plus the enumeration-hardening and status-gate properties.

use axum::Router;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use uuid::Uuid;
use zielhub::api;
use zielhub_core::auth::{Hs256Verifier, SessionVerifier};
use zielhub_core::events::EventBus;
use zielhub_core::store::FormStore;

async fn spawn_app() -> (String, tempfile::TempDir) {
    let tempdir = tempfile::tempdir().unwrap();
    let store = Arc::new(RwLock::new(FormStore::new(tempdir.path()).unwrap()));
    let verifier: Arc<dyn SessionVerifier> = Arc::new(Hs256Verifier::new("test-secret".into()));
    let app = Router::new().merge(api::router(store, EventBus::new(), verifier));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app.into_make_service()).into_future());
    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("http://{addr}"), tempdir)
}

async fn create_form(base: &str) -> (Uuid, String) {
    let resp = reqwest::Client::new()
        .post(format!("{base}/forms"))
        .header("X-User-Id", Uuid::new_v4().to_string())
        .json(&serde_json::json!({ "school_name": "GS Birkenhain" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    (
        Uuid::parse_str(body["id"].as_str().unwrap()).unwrap(),
        body["access_code"].as_str().unwrap().to_string(),
    )
}

async fn create_entry(base: &str, code: &str, title: &str) -> Uuid {
    let resp = reqwest::Client::new()
        .post(format!("{base}/entries"))
        .header("X-Access-Code", code)
        .json(&serde_json::json!({ "title": title }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    Uuid::parse_str(body["id"].as_str().unwrap()).unwrap()
}

async fn school_entries(base: &str, code: &str) -> serde_json::Value {
    let resp = reqwest::Client::new()
        .get(format!("{base}/school/form"))
        .header("X-Access-Code", code)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["entries"].clone()
}

#[tokio::test]
async fn create_then_patch_keeps_one_entry_with_latest_content() {
    let (base, _tempdir) = spawn_app().await;
    let (_form_id, code) = create_form(&base).await;
    let client = reqwest::Client::new();

    let entry_id = create_entry(&base, &code, "Leseförderung").await;

    let resp = client
        .patch(format!("{base}/entries/{entry_id}"))
        .header("X-Access-Code", &code)
        .json(&serde_json::json!({ "massnahmen": "Lesepatenschaften mit Klasse 4" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let entries = school_entries(&base, &code).await;
    assert_eq!(entries.as_array().unwrap().len(), 1);
    assert_eq!(entries[0]["title"], "Leseförderung");
    assert_eq!(entries[0]["massnahmen"], "Lesepatenschaften mit Klasse 4");
}

#[tokio::test]
async fn patch_accepts_scheduling_range() {
    let (base, _tempdir) = spawn_app().await;
    let (_form_id, code) = create_form(&base).await;
    let entry_id = create_entry(&base, &code, "Leseförderung").await;

    let resp = reqwest::Client::new()
        .patch(format!("{base}/entries/{entry_id}"))
        .header("X-Access-Code", &code)
        .json(&serde_json::json!({
            "start_year": 2026, "start_half": "1",
            "end_year": 2027, "end_half": "2"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["start_half"], "1");
    assert_eq!(body["end_year"], 2027);
    // absent keys untouched
    assert_eq!(body["title"], "Leseförderung");
}

#[tokio::test]
async fn missing_code_is_401() {
    let (base, _tempdir) = spawn_app().await;
    let (_form_id, code) = create_form(&base).await;
    let entry_id = create_entry(&base, &code, "Leseförderung").await;
    let client = reqwest::Client::new();

    let resp = client
        .patch(format!("{base}/entries/{entry_id}"))
        .json(&serde_json::json!({ "title": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Access code required");

    let resp = client
        .post(format!("{base}/entries"))
        .json(&serde_json::json!({ "title": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
}

#[tokio::test]
async fn wrong_code_is_403_and_content_is_unchanged() {
    let (base, _tempdir) = spawn_app().await;
    let (_form_id, code) = create_form(&base).await;
    let entry_id = create_entry(&base, &code, "Leseförderung").await;

    let resp = reqwest::Client::new()
        .patch(format!("{base}/entries/{entry_id}"))
        .header("X-Access-Code", "WRONG234")
        .json(&serde_json::json!({ "title": "hijacked" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Invalid access code");

    let entries = school_entries(&base, &code).await;
    assert_eq!(entries[0]["title"], "Leseförderung");
}

#[tokio::test]
async fn unknown_entry_id_is_404_regardless_of_credential() {
    let (base, _tempdir) = spawn_app().await;
    let (_form_id, code) = create_form(&base).await;
    let client = reqwest::Client::new();
    let ghost = Uuid::new_v4();

    let mut bodies = Vec::new();
    for presented in [code.as_str(), "WRONG234"] {
        let resp = client
            .patch(format!("{base}/entries/{ghost}"))
            .header("X-Access-Code", presented)
            .json(&serde_json::json!({ "title": "x" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 404);
        bodies.push(resp.text().await.unwrap());

        let resp = client
            .delete(format!("{base}/entries/{ghost}"))
            .header("X-Access-Code", presented)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 404);
        bodies.push(resp.text().await.unwrap());
    }
    // identical body in every combination
    assert!(bodies.windows(2).all(|w| w[0] == w[1]));
    assert!(bodies[0].contains("Entry not found"));
}

#[tokio::test]
async fn entry_of_another_form_is_invisible() {
    let (base, _tempdir) = spawn_app().await;
    let (_form_a, code_a) = create_form(&base).await;
    let (_form_b, code_b) = create_form(&base).await;
    let entry_id = create_entry(&base, &code_a, "Leseförderung").await;
    let client = reqwest::Client::new();

    let resp = client
        .patch(format!("{base}/entries/{entry_id}"))
        .header("X-Access-Code", &code_b)
        .json(&serde_json::json!({ "title": "hijacked" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Entry not found");

    let resp = client
        .delete(format!("{base}/entries/{entry_id}"))
        .header("X-Access-Code", &code_b)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    let entries = school_entries(&base, &code_a).await;
    assert_eq!(entries.as_array().unwrap().len(), 1);
    assert_eq!(entries[0]["title"], "Leseförderung");
}

#[tokio::test]
async fn submitted_forms_reject_every_entry_mutation() {
    let (base, _tempdir) = spawn_app().await;
    let (form_id, code) = create_form(&base).await;
    let entry_id = create_entry(&base, &code, "Leseförderung").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/forms/{form_id}/submit"))
        .header("X-Access-Code", &code)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    // the form's own valid code does not help once submitted
    let resp = client
        .patch(format!("{base}/entries/{entry_id}"))
        .header("X-Access-Code", &code)
        .json(&serde_json::json!({ "title": "too late" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(
        body["error"],
        "Cannot modify entries in submitted or approved forms"
    );

    let resp = client
        .post(format!("{base}/entries"))
        .header("X-Access-Code", &code)
        .json(&serde_json::json!({ "title": "new" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);

    let resp = client
        .delete(format!("{base}/entries/{entry_id}"))
        .header("X-Access-Code", &code)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);

    let entries = school_entries(&base, &code).await;
    assert_eq!(entries[0]["title"], "Leseförderung");
}

#[tokio::test]
async fn create_rejects_mismatched_parent_form() {
    let (base, _tempdir) = spawn_app().await;
    let (_form_a, code_a) = create_form(&base).await;
    let (form_b, _code_b) = create_form(&base).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/entries"))
        .header("X-Access-Code", &code_a)
        .json(&serde_json::json!({ "form_id": form_b, "title": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);
}

#[tokio::test]
async fn delete_entry_in_draft() {
    let (base, _tempdir) = spawn_app().await;
    let (_form_id, code) = create_form(&base).await;
    let entry_id = create_entry(&base, &code, "Leseförderung").await;

    let resp = reqwest::Client::new()
        .delete(format!("{base}/entries/{entry_id}"))
        .header("X-Access-Code", &code)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 204);

    let entries = school_entries(&base, &code).await;
    assert_eq!(entries.as_array().unwrap().len(), 0);
}
