use actix_web::{delete, get, post, web, HttpRequest, HttpResponse};
use uuid::Uuid;

use super::{requester, AppState};
use crate::error::Result;

#[post("/api/v1/tweets/{tweet_id}/likes")]
pub async fn like_tweet(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let (summary, created) = state
        .likes
        .like_tweet(requester(&req)?, path.into_inner())
        .await?;
    if created {
        Ok(HttpResponse::Created().json(summary))
    } else {
        Ok(HttpResponse::Ok().json(summary))
    }
}

#[delete("/api/v1/tweets/{tweet_id}/likes")]
pub async fn unlike_tweet(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let summary = state
        .likes
        .unlike_tweet(requester(&req)?, path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[get("/api/v1/tweets/{tweet_id}/likes")]
pub async fn get_likes(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let summary = state
        .likes
        .like_summary(requester(&req)?, path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}
