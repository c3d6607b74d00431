use actix_web::{get, web, HttpResponse};
use uuid::Uuid;

use super::AppState;
use crate::error::{AppError, Result};

/// Operator view of a tweet's fan-out job
#[get("/api/v1/fanout/{tweet_id}")]
pub async fn get_fanout_status(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let tweet_id = path.into_inner();
    let job = state
        .jobs
        .status(tweet_id)
        .ok_or_else(|| AppError::NotFound(format!("fan-out job for tweet {}", tweet_id)))?;
    Ok(HttpResponse::Ok().json(job))
}
