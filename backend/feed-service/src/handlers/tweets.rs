use actix_web::{delete, get, post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use super::{requester, AppState};
use crate::error::{AppError, Result};

#[derive(Debug, Deserialize)]
pub struct CreateTweetRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ListTweetsQuery {
    pub user_id: Option<Uuid>,
    pub limit: Option<usize>,
}

#[post("/api/v1/tweets")]
pub async fn create_tweet(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateTweetRequest>,
) -> Result<HttpResponse> {
    let tweet = state
        .tweets
        .create_tweet(requester(&req)?, &body.content)
        .await?;
    Ok(HttpResponse::Created().json(tweet))
}

#[get("/api/v1/tweets")]
pub async fn list_tweets(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<ListTweetsQuery>,
) -> Result<HttpResponse> {
    let user_id = query
        .user_id
        .ok_or_else(|| AppError::BadRequest("user_id is required".to_string()))?;
    let tweets = state
        .tweets
        .list_user_tweets(requester(&req)?, user_id, query.limit)
        .await?;
    Ok(HttpResponse::Ok().json(tweets))
}

#[get("/api/v1/tweets/{tweet_id}")]
pub async fn get_tweet(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let tweet = state
        .tweets
        .get_tweet(requester(&req)?, path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(tweet))
}

#[delete("/api/v1/tweets/{tweet_id}")]
pub async fn delete_tweet(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    state
        .tweets
        .delete_tweet(requester(&req)?, path.into_inner())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}
