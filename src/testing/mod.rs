//! In-process stand-in for the management API and the REST data API.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, delete, get},
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use crate::config::Config;
use crate::management::CreateProjectRequest;

/// The access token the fake platform accepts
pub const ACCESS_TOKEN: &str = "token";

/// Canned platform contents
#[derive(Clone)]
pub struct FakePlatform {
    pub projects: Vec<Value>,
    pub organizations: Vec<Value>,
    pub rows: Vec<Value>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self {
            projects: vec![
                json!({
                    "id": "abc123",
                    "name": "shop",
                    "status": "ACTIVE_HEALTHY",
                    "region": "us-east-1",
                    "organization_id": "org-first"
                }),
                json!({
                    "id": "xyz789",
                    "name": "fresh",
                    "status": "COMING_UP",
                    "region": "ap-south-1",
                    "organization_id": "org-first"
                }),
            ],
            organizations: vec![
                json!({"id": "org-first", "name": "Personal"}),
                json!({"id": "org-second", "name": "Team"}),
            ],
            rows: vec![
                json!({"id": 1, "mensaje": "hola"}),
                json!({"id": 2, "mensaje": "adios"}),
            ],
        }
    }
}

/// A REST request as seen by the fake platform
#[derive(Clone, Debug)]
pub struct RecordedRest {
    pub method: Method,
    pub table: String,
    pub query: Option<String>,
    pub apikey: Option<String>,
    pub authorization: Option<String>,
    pub prefer: Option<String>,
    pub body: Value,
}

struct PlatformState {
    platform: FakePlatform,
    create_requests: Mutex<Vec<CreateProjectRequest>>,
    rest_requests: Mutex<Vec<RecordedRest>>,
    management_hits: AtomicUsize,
}

/// A fake platform listening on a local port
pub struct RunningPlatform {
    base_url: String,
    state: Arc<PlatformState>,
}

impl FakePlatform {
    /// Serve the fake platform on an ephemeral local port
    pub async fn spawn(self) -> RunningPlatform {
        let state = Arc::new(PlatformState {
            platform: self,
            create_requests: Mutex::new(Vec::new()),
            rest_requests: Mutex::new(Vec::new()),
            management_hits: AtomicUsize::new(0),
        });
        let router = Router::new()
            .route("/v1/projects", get(list_projects).post(create_project))
            .route("/v1/projects/{project_ref}", delete(delete_project))
            .route("/v1/projects/{project_ref}/api-keys", get(api_keys))
            .route("/v1/organizations", get(organizations))
            .route("/rest/v1/{table}", any(rest))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        RunningPlatform {
            base_url: format!("http://{addr}"),
            state,
        }
    }
}

impl RunningPlatform {
    pub fn api_url(&self) -> String {
        format!("{}/v1", self.base_url)
    }

    /// A configuration pointing every endpoint at this fake platform
    pub fn config(&self) -> Config {
        Config {
            access_token: Some(ACCESS_TOKEN.to_string()),
            api_url: self.api_url(),
            project_url_template: self.base_url.clone(),
            ..Config::default()
        }
    }

    pub fn last_create_request(&self) -> Option<CreateProjectRequest> {
        self.state.create_requests.lock().unwrap().last().cloned()
    }

    pub fn rest_requests(&self) -> Vec<RecordedRest> {
        self.state.rest_requests.lock().unwrap().clone()
    }

    pub fn management_hits(&self) -> usize {
        self.state.management_hits.load(Ordering::SeqCst)
    }
}

fn authorized(state: &PlatformState, headers: &HeaderMap) -> Result<(), Response> {
    state.management_hits.fetch_add(1, Ordering::SeqCst);
    let expected = format!("Bearer {ACCESS_TOKEN}");
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "Unauthorized"})),
        )
            .into_response()),
    }
}

async fn list_projects(State(state): State<Arc<PlatformState>>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorized(&state, &headers) {
        return rejection;
    }
    Json(state.platform.projects.clone()).into_response()
}

async fn create_project(
    State(state): State<Arc<PlatformState>>,
    headers: HeaderMap,
    Json(request): Json<CreateProjectRequest>,
) -> Response {
    if let Err(rejection) = authorized(&state, &headers) {
        return rejection;
    }
    let body = json!({
        "id": "new123",
        "name": request.name,
        "status": "COMING_UP",
        "region": request.region,
        "organization_id": request.organization_id,
    });
    state.create_requests.lock().unwrap().push(request);
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn delete_project(
    State(state): State<Arc<PlatformState>>,
    headers: HeaderMap,
    Path(project_ref): Path<String>,
) -> Response {
    if let Err(rejection) = authorized(&state, &headers) {
        return rejection;
    }
    match project_ref.as_str() {
        "accepted" => StatusCode::ACCEPTED.into_response(),
        "provisioning" => (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "Project not ready for deletion"})),
        )
            .into_response(),
        _ => Json(json!({"id": project_ref, "ref": project_ref})).into_response(),
    }
}

async fn api_keys(
    State(state): State<Arc<PlatformState>>,
    headers: HeaderMap,
    Path(project_ref): Path<String>,
) -> Response {
    if let Err(rejection) = authorized(&state, &headers) {
        return rejection;
    }
    if project_ref == "nokeys" {
        return Json(json!([{"name": "anon", "api_key": "anon-nokeys"}])).into_response();
    }
    Json(json!([
        {"name": "anon", "api_key": format!("anon-{project_ref}")},
        {"name": "service_role", "api_key": format!("service-{project_ref}")},
    ]))
    .into_response()
}

async fn organizations(State(state): State<Arc<PlatformState>>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorized(&state, &headers) {
        return rejection;
    }
    Json(state.platform.organizations.clone()).into_response()
}

async fn rest(
    State(state): State<Arc<PlatformState>>,
    method: Method,
    Path(table): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state.rest_requests.lock().unwrap().push(RecordedRest {
        method: method.clone(),
        table: table.clone(),
        query,
        apikey: header("apikey"),
        authorization: header("authorization"),
        prefer: header("prefer"),
        body: body.clone(),
    });
    if table == "plain" {
        return "not json".into_response();
    }
    if table == "missing" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "code": "42P01",
                "message": "relation \"public.missing\" does not exist"
            })),
        )
            .into_response();
    }
    let rows = &state.platform.rows;
    match method {
        Method::GET => Json(rows.clone()).into_response(),
        Method::POST => {
            let inserted = match body {
                Value::Array(items) => items,
                other => vec![other],
            };
            (StatusCode::CREATED, Json(inserted)).into_response()
        }
        Method::PATCH => {
            let mut row = rows.first().cloned().unwrap_or_else(|| json!({}));
            if let (Some(target), Value::Object(patch)) = (row.as_object_mut(), body) {
                target.extend(patch);
            }
            Json(vec![row]).into_response()
        }
        Method::DELETE => Json(rows.first().cloned().into_iter().collect::<Vec<_>>()).into_response(),
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}
