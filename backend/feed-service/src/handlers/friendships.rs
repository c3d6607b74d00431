use actix_web::{delete, post, web, HttpRequest, HttpResponse};
use uuid::Uuid;

use super::{requester, AppState};
use crate::error::Result;

#[post("/api/v1/friendships/{user_id}")]
pub async fn follow(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let followee_id = path.into_inner();
    let created = state
        .friendships
        .follow(requester(&req)?, followee_id)
        .await?;

    let body = serde_json::json!({ "followee_id": followee_id, "created": created });
    if created {
        Ok(HttpResponse::Created().json(body))
    } else {
        Ok(HttpResponse::Ok().json(body))
    }
}

#[delete("/api/v1/friendships/{user_id}")]
pub async fn unfollow(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let followee_id = path.into_inner();
    let removed = state
        .friendships
        .unfollow(requester(&req)?, followee_id)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "followee_id": followee_id,
        "removed": removed,
    })))
}
