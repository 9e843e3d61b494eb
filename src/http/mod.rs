//! Axum router and HTTP request handlers.
//!
//! One pair of routes is registered per configured provider:
//!
//! - `GET {provider-path}/{branch}/blob/{*path}` - raw file contents
//! - `GET {provider-path}/{branch}/list/{*path}` - JSON directory listing
//!
//! Every request passes the access check before the git cache is touched:
//! a hit in the token-access cache short-circuits, otherwise the token is
//! validated upstream and a success is cached.  Unauthorized requests never
//! create cache records.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::cache::GitCache;
use crate::error::CacheError;
use crate::provider::{Provider, ProviderRepo, RepoRequest};

/// Header carrying the caller's provider token.
const TOKEN_HEADER: &str = "X-Token";

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub cache: Arc<GitCache>,
    pub http_client: reqwest::Client,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the router, registering blob and list routes for every provider.
pub fn create_router(state: Arc<AppState>, providers: Vec<Arc<dyn Provider>>) -> Router {
    let mut router = Router::new();

    for provider in providers {
        let blob_path = format!("{}/{{branch}}/blob/{{*path}}", provider.url_path());
        let list_path = format!("{}/{{branch}}/list/{{*path}}", provider.url_path());

        router = router.route(&blob_path, {
            let provider = Arc::clone(&provider);
            get(
                move |state: State<Arc<AppState>>, params: Path<RouteParams>, headers: HeaderMap| {
                    handle_blob(Arc::clone(&provider), state, params, headers)
                },
            )
        });

        router = router.route(&list_path, {
            let provider = Arc::clone(&provider);
            get(
                move |state: State<Arc<AppState>>, params: Path<RouteParams>, headers: HeaderMap| {
                    handle_list(Arc::clone(&provider), state, params, headers)
                },
            )
        });
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

#[derive(Debug, Deserialize)]
struct RouteParams {
    owner: String,
    repo: String,
    branch: String,
    path: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn handle_blob(
    provider: Arc<dyn Provider>,
    State(state): State<Arc<AppState>>,
    Path(params): Path<RouteParams>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (repo, token) = resolve_repo(&provider, &params, &headers)?;
    authorize(&state, repo.as_ref(), &token).await?;

    // The file path is rooted at the branch working tree.
    let file_path = format!("/{}", params.path);
    let content = state
        .cache
        .get_file_content(&repo.hash(), &repo.git_url(), &params.branch, &file_path)
        .await?;

    debug!(repo = %repo.repo_url(), branch = %params.branch, path = %file_path, "served blob");
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        content,
    )
        .into_response())
}

async fn handle_list(
    provider: Arc<dyn Provider>,
    State(state): State<Arc<AppState>>,
    Path(params): Path<RouteParams>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (repo, token) = resolve_repo(&provider, &params, &headers)?;
    authorize(&state, repo.as_ref(), &token).await?;

    let entries = state
        .cache
        .get_tree_listing(&repo.hash(), &repo.git_url(), &params.branch, &params.path)
        .await?;

    debug!(repo = %repo.repo_url(), branch = %params.branch, path = %params.path, "served listing");
    Ok(Json(entries).into_response())
}

// ---------------------------------------------------------------------------
// Access check
// ---------------------------------------------------------------------------

fn resolve_repo(
    provider: &Arc<dyn Provider>,
    params: &RouteParams,
    headers: &HeaderMap,
) -> Result<(Box<dyn ProviderRepo>, String), AppError> {
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let request = RepoRequest {
        owner: params.owner.clone(),
        repo: params.repo.clone(),
        token: (!token.is_empty()).then(|| token.clone()),
    };
    let repo = provider
        .get_repo(request)
        .map_err(|e| AppError::Internal(e.into()))?;

    Ok((repo, token))
}

/// Consult the token-access cache first; on a miss, validate upstream and
/// cache a success.
async fn authorize(
    state: &AppState,
    repo: &dyn ProviderRepo,
    token: &str,
) -> Result<(), AppError> {
    let hash = repo.hash();
    if state.cache.has_access(token, &hash).await {
        return Ok(());
    }

    match repo.validate_token(&state.http_client, token).await {
        Ok(true) => {
            state.cache.set_access(token, &hash).await;
            Ok(())
        }
        Ok(false) => {
            warn!(repo = %repo.repo_url(), "token rejected by upstream");
            state.cache.remove_access(token, &hash).await;
            Err(AppError::Unauthorized)
        }
        Err(e) => Err(AppError::Internal(e.into())),
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

pub enum AppError {
    Unauthorized,
    NotFound,
    Internal(anyhow::Error),
}

impl From<CacheError> for AppError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::FileNotFound => AppError::NotFound,
            other => AppError::Internal(other.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
            AppError::NotFound => (StatusCode::NOT_FOUND, "File not found").into_response(),
            AppError::Internal(err) => {
                error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error: {err:#}"),
                )
                    .into_response()
            }
        }
    }
}
