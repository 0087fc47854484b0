use std::net::SocketAddr;

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::{
    comments::{AddOutcome, Comment, CommentService, RateOutcome},
    config::Settings,
    ratings::{apply_toggle, RatingKind, RatingService},
    store::KvStore,
    utils::{comment_id, iso_now, now_ts},
};

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub store: KvStore,
    pub ratings: RatingService,
    pub comments: CommentService,
}

pub async fn serve(state: AppState) -> Result<()> {
    let settings = state.settings.clone();

    let mut app = Router::new()
        .route("/", get(index))
        .route("/api/health", get(api_health))
        .route("/api/ratings", get(api_get_ratings).post(api_post_rating))
        .route(
            "/api/comments",
            get(api_get_comments)
                .post(api_post_comment)
                .put(api_put_comment_rating),
        )
        .route("/api/admin/reset", post(api_admin_reset))
        .with_state(state);

    if settings.cors_enabled {
        app = app.layer(CorsLayer::permissive());
    }

    let addr: SocketAddr = format!("{}:{}", settings.http_host, settings.http_port)
        .parse()
        .expect("server addr parse");

    log::info!("server.start url=http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("server.shutdown signal=ctrl_c");
}

fn bad_request(error: &str) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"success": false, "error": error})),
    )
        .into_response()
}

fn not_found(error: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"success": false, "error": error})),
    )
        .into_response()
}

fn store_error(e: anyhow::Error) -> axum::response::Response {
    log::error!("server.store_error {e:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"success": false, "error": "internal server error"})),
    )
        .into_response()
}

/// Treats empty and whitespace-only values the same as absent ones.
fn required<'a>(field: &'a Option<String>) -> Option<&'a str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Verb set of the comment-rating endpoint. `unlike`/`undislike` clear the
/// caller's current rating, whatever it is.
fn parse_comment_action(action: &str) -> Option<Option<RatingKind>> {
    match action {
        "like" => Some(Some(RatingKind::Like)),
        "dislike" => Some(Some(RatingKind::Dislike)),
        "unlike" | "undislike" => Some(None),
        _ => None,
    }
}

async fn index(State(st): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "gcatalog-engage",
        "version": env!("CARGO_PKG_VERSION"),
        "sqlite": st.store.path(),
        "endpoints": [
            "GET /api/health",
            "GET /api/ratings?contentId=..&userId=..",
            "POST /api/ratings",
            "GET /api/comments?contentId=..",
            "POST /api/comments",
            "PUT /api/comments",
        ],
    }))
}

async fn api_health(State(st): State<AppState>) -> impl IntoResponse {
    match st.store.ping() {
        Ok(()) => Json(serde_json::json!({"ok": true, "ts": now_ts()})).into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
struct RatingsQ {
    #[serde(rename = "contentId")]
    content_id: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

async fn api_get_ratings(
    State(st): State<AppState>,
    Query(q): Query<RatingsQ>,
) -> impl IntoResponse {
    let Some(content_id) = required(&q.content_id) else {
        return bad_request("contentId is required");
    };

    let counts = st.ratings.counts(content_id);
    let user_rating = required(&q.user_id).and_then(|uid| st.ratings.user_rating(content_id, uid));
    Json(serde_json::json!({
        "likes": counts.likes,
        "dislikes": counts.dislikes,
        "userRating": user_rating,
    }))
    .into_response()
}

#[derive(Deserialize)]
struct PostRatingBody {
    #[serde(rename = "contentId")]
    content_id: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
    action: Option<String>,
}

async fn api_post_rating(
    State(st): State<AppState>,
    Json(body): Json<PostRatingBody>,
) -> impl IntoResponse {
    let Some(content_id) = required(&body.content_id) else {
        return bad_request("contentId is required");
    };
    let Some(user_id) = required(&body.user_id) else {
        return bad_request("userId is required");
    };
    let Some(requested) = required(&body.action).and_then(RatingKind::parse) else {
        return bad_request("action must be like|dislike");
    };

    let current = match st.ratings.user_rating_checked(content_id, user_id) {
        Ok(r) => r,
        Err(e) => return store_error(e),
    };
    let new_rating = apply_toggle(current, requested);
    match st.ratings.set_rating(content_id, user_id, new_rating) {
        Ok(counts) => Json(serde_json::json!({
            "success": true,
            "likes": counts.likes,
            "dislikes": counts.dislikes,
            "userRating": new_rating,
        }))
        .into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
struct CommentsQ {
    #[serde(rename = "contentId")]
    content_id: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

async fn api_get_comments(
    State(st): State<AppState>,
    Query(q): Query<CommentsQ>,
) -> impl IntoResponse {
    let Some(content_id) = required(&q.content_id) else {
        return bad_request("contentId is required");
    };

    let tree = st.comments.list(content_id);
    let mut body = serde_json::json!({"comments": tree});
    if let Some(user_id) = required(&q.user_id) {
        let mine = st.comments.user_comment_ratings(&tree, user_id);
        body["userRatings"] =
            serde_json::to_value(mine).unwrap_or_else(|_| serde_json::json!({}));
    }
    Json(body).into_response()
}

#[derive(Deserialize)]
struct PostCommentBody {
    #[serde(rename = "contentId")]
    content_id: Option<String>,
    user: Option<String>,
    text: Option<String>,
    #[serde(rename = "parentId")]
    parent_id: Option<String>,
}

async fn api_post_comment(
    State(st): State<AppState>,
    Json(body): Json<PostCommentBody>,
) -> impl IntoResponse {
    let Some(content_id) = required(&body.content_id) else {
        return bad_request("contentId is required");
    };
    let Some(user) = required(&body.user) else {
        return bad_request("user is required");
    };
    let Some(text) = required(&body.text) else {
        return bad_request("text is required");
    };
    if user.chars().count() > st.settings.max_name_chars {
        return bad_request("user is too long");
    }
    if text.chars().count() > st.settings.max_comment_chars {
        return bad_request("text is too long");
    }
    let parent_id = required(&body.parent_id).map(|s| s.to_string());

    let comment = Comment::new(
        comment_id(),
        user.to_string(),
        text.to_string(),
        iso_now(),
        parent_id,
    );
    match st.comments.add_comment(content_id, comment) {
        Ok(AddOutcome::Saved(tree)) => {
            Json(serde_json::json!({"success": true, "comments": tree})).into_response()
        }
        Ok(AddOutcome::ParentNotFound) => not_found("parent_not_found"),
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
struct PutCommentRatingBody {
    #[serde(rename = "contentId")]
    content_id: Option<String>,
    #[serde(rename = "commentId")]
    comment_id: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
    action: Option<String>,
}

async fn api_put_comment_rating(
    State(st): State<AppState>,
    Json(body): Json<PutCommentRatingBody>,
) -> impl IntoResponse {
    let Some(content_id) = required(&body.content_id) else {
        return bad_request("contentId is required");
    };
    let Some(comment_id) = required(&body.comment_id) else {
        return bad_request("commentId is required");
    };
    let Some(user_id) = required(&body.user_id) else {
        return bad_request("userId is required");
    };
    let Some(new_rating) = required(&body.action).and_then(parse_comment_action) else {
        return bad_request("action must be like|dislike|unlike|undislike");
    };

    match st
        .comments
        .update_comment_rating(content_id, comment_id, user_id, new_rating)
    {
        Ok(RateOutcome::Saved(tree)) => {
            Json(serde_json::json!({"success": true, "comments": tree})).into_response()
        }
        Ok(RateOutcome::CommentNotFound) => not_found("comment_not_found"),
        Err(e) => store_error(e),
    }
}

async fn api_admin_reset(State(st): State<AppState>) -> impl IntoResponse {
    if !st.settings.admin_enable_reset {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"success": false, "error": "reset_disabled"})),
        )
            .into_response();
    }
    if let Err(e) = st.store.clear_engagement_state() {
        return store_error(e);
    }
    log::info!("server.admin_reset");
    Json(serde_json::json!({"success": true, "ts": now_ts()})).into_response()
}
