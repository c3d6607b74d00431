use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use super::{requester, AppState};
use crate::error::{AppError, Result};

#[derive(Debug, Deserialize)]
pub struct ListCommentsQuery {
    pub tweet_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub tweet_id: Uuid,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCommentRequest {
    pub content: String,
}

#[get("/api/v1/comments")]
pub async fn list_comments(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<ListCommentsQuery>,
) -> Result<HttpResponse> {
    let tweet_id = query
        .tweet_id
        .ok_or_else(|| AppError::BadRequest("tweet_id is required".to_string()))?;
    let comments = state
        .comments
        .list_comments(requester(&req)?, tweet_id)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "comments": comments })))
}

#[post("/api/v1/comments")]
pub async fn create_comment(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateCommentRequest>,
) -> Result<HttpResponse> {
    let comment = state
        .comments
        .create_comment(requester(&req)?, body.tweet_id, &body.content)
        .await?;
    Ok(HttpResponse::Created().json(comment))
}

#[put("/api/v1/comments/{comment_id}")]
pub async fn update_comment(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateCommentRequest>,
) -> Result<HttpResponse> {
    let comment = state
        .comments
        .update_comment(requester(&req)?, path.into_inner(), &body.content)
        .await?;
    Ok(HttpResponse::Ok().json(comment))
}

#[delete("/api/v1/comments/{comment_id}")]
pub async fn delete_comment(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    state
        .comments
        .delete_comment(requester(&req)?, path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}
