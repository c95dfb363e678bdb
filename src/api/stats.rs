//! Dashboard statistics endpoint

use axum::{extract::State, Json};

use crate::{error::AppResult, models::book::CatalogCounts, AppState};

/// Total books in the catalog and registered users
#[utoipa::path(
    get,
    path = "/statistics",
    tag = "stats",
    responses(
        (status = 200, description = "Catalog and user totals", body = CatalogCounts)
    )
)]
pub async fn get_stats(State(state): State<AppState>) -> AppResult<Json<CatalogCounts>> {
    let counts = state.services.catalog.counts().await?;
    Ok(Json(counts))
}
