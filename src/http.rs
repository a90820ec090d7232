//! Listing endpoints over the catalog indices. Thin transport layer:
//! parameter translation in, `{data, meta}` envelope out.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use thiserror::Error;

use crate::domain::{CastMember, Category, Genre, Video};
use crate::listing::{
    CastMemberSortField, CategorySortField, GenreSortField, ListMeta, ListParams, ListResponse,
    VideoSortField,
};
use crate::services::elasticsearch::SearchStoreError;
use crate::services::ElasticsearchCatalog;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("search backend error: {0}")]
    Search(#[from] SearchStoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.to_string() });
        (StatusCode::BAD_GATEWAY, Json(body)).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<ElasticsearchCatalog>,
}

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/categories", get(list_categories))
        .route("/cast_members", get(list_cast_members))
        .route("/genres", get(list_genres))
        .route("/videos", get(list_videos))
}

async fn healthcheck(State(state): State<AppState>) -> Response {
    match state.catalog.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn list_categories(
    State(state): State<AppState>,
    Query(params): Query<ListParams<CategorySortField>>,
) -> Result<Json<ListResponse<Category>>, ApiError> {
    let params = params.clamped();
    let sort = params.sort.unwrap_or(CategorySortField::Name);

    let data = state
        .catalog
        .search_categories(
            params.page,
            params.per_page,
            params.search.as_deref(),
            Some(sort),
            params.direction,
        )
        .await?;

    Ok(Json(ListResponse {
        data,
        meta: ListMeta {
            page: params.page,
            per_page: params.per_page,
            sort: Some(sort.as_str()),
            direction: params.direction,
        },
    }))
}

async fn list_cast_members(
    State(state): State<AppState>,
    Query(params): Query<ListParams<CastMemberSortField>>,
) -> Result<Json<ListResponse<CastMember>>, ApiError> {
    let params = params.clamped();
    let sort = params.sort.unwrap_or(CastMemberSortField::Name);

    let data = state
        .catalog
        .search_cast_members(
            params.page,
            params.per_page,
            params.search.as_deref(),
            Some(sort),
            params.direction,
        )
        .await?;

    Ok(Json(ListResponse {
        data,
        meta: ListMeta {
            page: params.page,
            per_page: params.per_page,
            sort: Some(sort.as_str()),
            direction: params.direction,
        },
    }))
}

async fn list_genres(
    State(state): State<AppState>,
    Query(params): Query<ListParams<GenreSortField>>,
) -> Result<Json<ListResponse<Genre>>, ApiError> {
    let params = params.clamped();
    let sort = params.sort.unwrap_or(GenreSortField::Name);

    let data = state
        .catalog
        .search_genres(
            params.page,
            params.per_page,
            params.search.as_deref(),
            Some(sort),
            params.direction,
        )
        .await?;

    Ok(Json(ListResponse {
        data,
        meta: ListMeta {
            page: params.page,
            per_page: params.per_page,
            sort: Some(sort.as_str()),
            direction: params.direction,
        },
    }))
}

async fn list_videos(
    State(state): State<AppState>,
    Query(params): Query<ListParams<VideoSortField>>,
) -> Result<Json<ListResponse<Video>>, ApiError> {
    let params = params.clamped();
    let sort = params.sort.unwrap_or(VideoSortField::Title);

    let data = state
        .catalog
        .search_videos(
            params.page,
            params.per_page,
            params.search.as_deref(),
            Some(sort),
            params.direction,
        )
        .await?;

    Ok(Json(ListResponse {
        data,
        meta: ListMeta {
            page: params.page,
            per_page: params.per_page,
            sort: Some(sort.as_str()),
            direction: params.direction,
        },
    }))
}
