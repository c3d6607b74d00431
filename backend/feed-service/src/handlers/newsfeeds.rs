use actix_web::{get, web, HttpRequest, HttpResponse};
use serde::Deserialize;

use super::{requester, AppState};
use crate::error::{AppError, Result};
use crate::services::policy::{Action, NEWSFEEDS};

#[derive(Debug, Deserialize)]
pub struct FeedQueryParams {
    pub limit: Option<usize>,
    /// `next_cursor` from the previous page
    pub cursor: Option<String>,
}

/// The requester's own feed, newest first
#[get("/api/v1/newsfeeds")]
pub async fn list_newsfeed(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<FeedQueryParams>,
) -> Result<HttpResponse> {
    let requester = requester(&req)?;
    NEWSFEEDS.check(Action::List, requester, None)?;
    let user_id = requester.ok_or_else(|| AppError::Unauthorized("missing requester".into()))?;

    let page = state
        .newsfeeds
        .list_feed(user_id, query.limit, query.cursor.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(page))
}
