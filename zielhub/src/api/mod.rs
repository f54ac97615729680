//! HTTP API layer for the target-agreement workflow.
//!
//! Two authorization channels feed the same store: authority sessions
//! (bearer token or the `X-User-Id` fallback) and per-form access codes in
//! the `X-Access-Code` header. Authorization is evaluated fresh on every
//! request; the lifecycle status gate runs inside the store, after the
//! channel check and before any mutation.

pub mod error;

use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use error::ApiError;
use zielhub_core::auth::{authorize_owner, AuthDecision, SessionVerifier};
use zielhub_core::events::{Event, EventBus};
use zielhub_core::lifecycle::FormStatus;
use zielhub_core::store::{
    Entry, EntryPatch, FormStore, Notification, NotificationTarget, Role, StoreError,
};

/// Authority principal extracted from request headers.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthContext {
    fn claims(&self) -> zielhub_core::auth::Claims {
        zielhub_core::auth::Claims {
            sub: self.user_id,
            role: self.role,
        }
    }
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        if let Some(auth) = headers.get("Authorization").and_then(|v| v.to_str().ok()) {
            if let Some(token) = auth.strip_prefix("Bearer ") {
                if let Some(claims) = state.verifier.verify(token).await {
                    return Ok(Self {
                        user_id: claims.sub,
                        role: claims.role,
                    });
                }
                return Err(ApiError::Authorization("Invalid session".into()));
            }
        }
        let user_id = headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok());
        if let Some(user_id) = user_id {
            let role = match headers.get("X-User-Role").and_then(|v| v.to_str().ok()) {
                Some("superadmin") => Role::Superadmin,
                _ => Role::Admin,
            };
            Ok(Self { user_id, role })
        } else {
            Err(ApiError::Authentication("Authentication required".into()))
        }
    }
}

/// Raw access code from the `X-Access-Code` header. Resolution against the
/// store happens in the handler; a missing header is the only failure here.
#[derive(Clone, Debug)]
pub struct AccessCode(pub String);

impl FromRequestParts<AppState> for AccessCode {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("X-Access-Code")
            .and_then(|v| v.to_str().ok())
            .map(|s| Self(s.to_string()))
            .ok_or_else(ApiError::access_code_required)
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RwLock<FormStore>>,
    pub events: EventBus,
    pub verifier: Arc<dyn SessionVerifier>,
}

#[derive(Deserialize)]
struct CreateFormRequest {
    school_name: String,
}

#[derive(Deserialize)]
struct ReturnRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct CreateEntryRequest {
    form_id: Option<Uuid>,
    #[serde(flatten)]
    fields: EntryPatch,
}

#[derive(Serialize)]
struct FormResponse {
    id: Uuid,
    school_name: String,
    status: FormStatus,
    submitted_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    review_comment: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<&zielhub_core::store::Form> for FormResponse {
    fn from(form: &zielhub_core::store::Form) -> Self {
        Self {
            id: form.id,
            school_name: form.school_name.clone(),
            status: form.status,
            submitted_at: form.submitted_at,
            approved_at: form.approved_at,
            review_comment: form.review_comment.clone(),
            created_at: form.created_at,
        }
    }
}

#[derive(Serialize)]
struct FormCreatedResponse {
    #[serde(flatten)]
    form: FormResponse,
    /// Plaintext access code, shown exactly once.
    access_code: String,
}

#[derive(Serialize)]
struct FormDetailResponse {
    #[serde(flatten)]
    form: FormResponse,
    entries: Vec<Entry>,
}

pub fn router(
    store: Arc<RwLock<FormStore>>,
    events: EventBus,
    verifier: Arc<dyn SessionVerifier>,
) -> Router {
    let state = AppState {
        store,
        events,
        verifier,
    };
    Router::new()
        .route("/forms", post(create_form).get(list_forms))
        .route("/forms/{id}", get(get_form).delete(delete_form))
        .route("/forms/{id}/submit", post(submit_form))
        .route("/forms/{id}/approve", post(approve_form))
        .route("/forms/{id}/return", post(return_form))
        .route("/entries", post(create_entry))
        .route("/entries/{id}", patch(update_entry).delete(delete_entry))
        .route("/school/form", get(school_form))
        .route("/school/notifications", get(school_notifications))
        .route(
            "/school/notifications/{id}/read",
            post(school_mark_notification_read),
        )
        .route("/notifications", get(list_notifications))
        .route("/notifications/{id}/read", post(mark_notification_read))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Owner gate for id-scoped form endpoints. Any denial collapses to the
/// same 404 so a different authority's staff cannot probe which ids exist.
fn require_owner(
    store: &FormStore,
    auth: &AuthContext,
    form_id: Uuid,
) -> Result<(), ApiError> {
    let form = store.form(form_id).ok_or_else(ApiError::form_not_found)?;
    match authorize_owner(&auth.claims(), form.owner) {
        AuthDecision::Allowed => Ok(()),
        AuthDecision::Denied(_) => Err(ApiError::form_not_found()),
    }
}

/// Role gate for the collection endpoints, where there is no resource whose
/// existence needs hiding.
fn require_admin(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role == Role::Admin {
        Ok(())
    } else {
        Err(ApiError::Authorization(
            "Forms are not available for this role".into(),
        ))
    }
}

async fn create_form(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateFormRequest>,
) -> Result<Json<FormCreatedResponse>, ApiError> {
    require_admin(&auth)?;
    let mut store = state.store.write().await;
    let (form, access_code) = store.create_form(req.school_name, auth.user_id)?;
    tracing::info!(form_id = %form.id, "form created");
    Ok(Json(FormCreatedResponse {
        form: FormResponse::from(&form),
        access_code,
    }))
}

async fn list_forms(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<Vec<FormResponse>>, ApiError> {
    require_admin(&auth)?;
    let store = state.store.read().await;
    let forms = store
        .forms_owned_by(auth.user_id)
        .iter()
        .map(FormResponse::from)
        .collect();
    Ok(Json(forms))
}

async fn get_form(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<FormDetailResponse>, ApiError> {
    let store = state.store.read().await;
    require_owner(&store, &auth, id)?;
    let form = store.form(id).ok_or_else(ApiError::form_not_found)?;
    Ok(Json(FormDetailResponse {
        form: FormResponse::from(form),
        entries: store.entries_for(id),
    }))
}

async fn delete_form(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut store = state.store.write().await;
    require_owner(&store, &auth, id)?;
    store.delete_form(id)?;
    tracing::info!(form_id = %id, "form archived");
    Ok(StatusCode::NO_CONTENT)
}

async fn approve_form(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<FormResponse>, ApiError> {
    let mut store = state.store.write().await;
    require_owner(&store, &auth, id)?;
    let (form, _) = store.approve_form(id)?;
    drop(store);
    state.events.send(Event::Approved { form_id: id });
    Ok(Json(FormResponse::from(&form)))
}

async fn return_form(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ReturnRequest>,
) -> Result<Json<FormResponse>, ApiError> {
    let mut store = state.store.write().await;
    require_owner(&store, &auth, id)?;
    let (form, _) = store.return_form(id, req.message)?;
    drop(store);
    state.events.send(Event::Returned { form_id: id });
    Ok(Json(FormResponse::from(&form)))
}

/// Resolve the presented code to its bound form id. Wrong and malformed
/// codes fail identically.
fn resolve_code(store: &FormStore, code: &AccessCode) -> Result<Uuid, ApiError> {
    store
        .form_by_code(&code.0)
        .map(|f| f.id)
        .ok_or_else(ApiError::invalid_access_code)
}

async fn submit_form(
    State(state): State<AppState>,
    code: AccessCode,
    Path(id): Path<Uuid>,
) -> Result<Json<FormResponse>, ApiError> {
    let mut store = state.store.write().await;
    let bound = resolve_code(&store, &code)?;
    if bound != id {
        return Err(ApiError::form_not_found());
    }
    let (form, _) = store.submit_form(id)?;
    drop(store);
    state.events.send(Event::Submitted { form_id: id });
    Ok(Json(FormResponse::from(&form)))
}

async fn school_form(
    State(state): State<AppState>,
    code: AccessCode,
) -> Result<Json<FormDetailResponse>, ApiError> {
    let store = state.store.read().await;
    let bound = resolve_code(&store, &code)?;
    let form = store.form(bound).ok_or_else(ApiError::form_not_found)?;
    Ok(Json(FormDetailResponse {
        form: FormResponse::from(form),
        entries: store.entries_for(bound),
    }))
}

async fn create_entry(
    State(state): State<AppState>,
    code: AccessCode,
    Json(req): Json<CreateEntryRequest>,
) -> Result<Json<Entry>, ApiError> {
    let mut store = state.store.write().await;
    let bound = resolve_code(&store, &code)?;
    if let Some(form_id) = req.form_id {
        if form_id != bound {
            return Err(ApiError::Authorization(
                "Access code is not valid for this form".into(),
            ));
        }
    }
    let entry = store.create_entry(bound, req.fields)?;
    Ok(Json(entry))
}

async fn update_entry(
    State(state): State<AppState>,
    code: AccessCode,
    Path(id): Path<Uuid>,
    Json(patch): Json<EntryPatch>,
) -> Result<Json<Entry>, ApiError> {
    let mut store = state.store.write().await;
    // Unknown ids 404 before the code is checked, so the response for a
    // nonexistent entry is identical for valid and invalid credentials.
    if store.entry(id).is_none() {
        return Err(StoreError::EntryNotFound.into());
    }
    let bound = resolve_code(&store, &code)?;
    let entry = store.update_entry(id, bound, patch)?;
    Ok(Json(entry))
}

async fn delete_entry(
    State(state): State<AppState>,
    code: AccessCode,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut store = state.store.write().await;
    if store.entry(id).is_none() {
        return Err(StoreError::EntryNotFound.into());
    }
    let bound = resolve_code(&store, &code)?;
    store.delete_entry(id, bound)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<Vec<Notification>>, ApiError> {
    require_admin(&auth)?;
    let store = state.store.read().await;
    Ok(Json(store.notifications_for_owner(auth.user_id)))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, ApiError> {
    let mut store = state.store.write().await;
    // Each channel may only touch its own side of the inbox; a school-bound
    // notification is invisible here, same as a nonexistent one.
    let form_id = match store.notification(id) {
        Some(n) if n.target == NotificationTarget::Authority => n.form_id,
        _ => return Err(StoreError::NotificationNotFound.into()),
    };
    require_owner(&store, &auth, form_id)
        .map_err(|_| ApiError::NotFound("Notification not found".into()))?;
    Ok(Json(store.mark_notification_read(id)?))
}

async fn school_notifications(
    State(state): State<AppState>,
    code: AccessCode,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let store = state.store.read().await;
    let bound = resolve_code(&store, &code)?;
    Ok(Json(store.notifications_for_form(bound)))
}

async fn school_mark_notification_read(
    State(state): State<AppState>,
    code: AccessCode,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, ApiError> {
    let mut store = state.store.write().await;
    let bound = resolve_code(&store, &code)?;
    match store.notification(id) {
        Some(n) if n.form_id == bound && n.target == NotificationTarget::School => {}
        _ => return Err(ApiError::NotFound("Notification not found".into())),
    }
    Ok(Json(store.mark_notification_read(id)?))
}
