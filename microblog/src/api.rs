use crate::{
    auth::Viewer,
    config::Config,
    db::{self, DbPool},
    error::ApiError,
    favorites,
    model::{Likes, NewTweet, NewUser, Tweet, TweetText, User, UserUpdate},
    tweets, users,
};
use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Config,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let pool = db::open_pool(config.database_path())?;
        Ok(Self { pool, config })
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/tweets", get(list_tweets).post(post_tweet))
        .route("/tweets/hashtag/:tag", get(search_hashtag))
        .route(
            "/tweets/:id",
            get(get_tweet).put(update_tweet).delete(delete_tweet),
        )
        .route("/tweets/:id/comments", get(list_comments))
        .route("/tweets/:id/like", put(update_likes))
        .route("/users", get(list_users).post(register))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route(
            "/users/:user_id/favorites/:tweet_id",
            put(add_favorite).delete(remove_favorite),
        )
        .layer(middleware::from_fn_with_state(state.clone(), identify))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Attach the request's `Viewer`. No header means anonymous; a bad token is rejected.
async fn identify<B>(
    State(state): State<AppState>,
    mut req: Request<B>,
    next: Next<B>,
) -> Result<Response, ApiError> {
    let viewer = match req.headers().get(header::AUTHORIZATION) {
        None => Viewer::anonymous(),
        Some(value) => {
            let token = value
                .to_str()
                .ok()
                .and_then(|v| v.strip_prefix("Bearer "))
                .ok_or_else(|| {
                    tracing::debug!("malformed authorization header");
                    ApiError::Unauthorized
                })?;
            Viewer::from_token(&state.config.jwt_secret, token).map_err(|e| {
                tracing::debug!(error = %e, "rejected bearer token");
                ApiError::Unauthorized
            })?
        }
    };
    req.extensions_mut().insert(viewer);
    Ok(next.run(req).await)
}

fn parse_id(raw: &str, what: &'static str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(what))
}

async fn list_tweets(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
) -> Result<Json<Vec<Tweet>>, ApiError> {
    let list = db::run(&state.pool, move |conn| tweets::list_top_level(conn, &viewer)).await?;
    Ok(Json(list))
}

async fn get_tweet(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<String>,
) -> Result<Json<Tweet>, ApiError> {
    let id = parse_id(&id, "tweet")?;
    let tweet = db::run(&state.pool, move |conn| tweets::get_tweet(conn, &id, &viewer)).await?;
    Ok(Json(tweet))
}

async fn list_comments(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Tweet>>, ApiError> {
    // an id that names no tweet has no comments
    let Ok(parent) = Uuid::parse_str(&id) else {
        return Ok(Json(Vec::new()));
    };
    let list = db::run(&state.pool, move |conn| {
        tweets::list_comments(conn, &parent, &viewer)
    })
    .await?;
    Ok(Json(list))
}

async fn search_hashtag(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(tag): Path<String>,
) -> Result<Json<Vec<Tweet>>, ApiError> {
    let list = db::run(&state.pool, move |conn| {
        tweets::search_hashtag(conn, &tag, &viewer)
    })
    .await?;
    Ok(Json(list))
}

async fn post_tweet(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    payload: Result<Json<NewTweet>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let author = viewer.require()?;
    let Json(req) = payload?;
    let tweet = db::run(&state.pool, move |conn| {
        tweets::create_tweet(conn, &author, &req)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(tweet)))
}

async fn update_tweet(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<String>,
    payload: Result<Json<TweetText>, JsonRejection>,
) -> Result<Json<Tweet>, ApiError> {
    let requester = viewer.require()?;
    let Json(req) = payload?;
    let id = parse_id(&id, "tweet")?;
    let tweet = db::run(&state.pool, move |conn| {
        tweets::update_text(conn, &id, &requester, &req.tweet)
    })
    .await?;
    Ok(Json(tweet))
}

async fn update_likes(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<String>,
    payload: Result<Json<Likes>, JsonRejection>,
) -> Result<Json<Tweet>, ApiError> {
    viewer.require()?;
    let Json(req) = payload?;
    let id = parse_id(&id, "tweet")?;
    let tweet = db::run(&state.pool, move |conn| {
        tweets::set_likes(conn, &id, &req.like, &viewer)
    })
    .await?;
    Ok(Json(tweet))
}

async fn delete_tweet(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let requester = viewer.require()?;
    let id = parse_id(&id, "tweet")?;
    let comments = db::run(&state.pool, move |conn| {
        tweets::delete_tweet(conn, &id, &requester)
    })
    .await?;
    Ok(Json(json!({
        "message": "Tweet successfully deleted",
        "comments_deleted": comments,
    })))
}

async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    let list = db::run(&state.pool, |conn| users::list_users(conn)).await?;
    Ok(Json(list))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    let id = parse_id(&id, "user")?;
    let user = db::run(&state.pool, move |conn| users::get_user(conn, &id)).await?;
    Ok(Json(user))
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let user = db::run(&state.pool, move |conn| users::register(conn, &req)).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn update_user(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<String>,
    payload: Result<Json<UserUpdate>, JsonRejection>,
) -> Result<Json<User>, ApiError> {
    let requester = viewer.require()?;
    let Json(upd) = payload?;
    let id = parse_id(&id, "user")?;
    let user = db::run(&state.pool, move |conn| {
        users::update_user(conn, &id, &requester, &upd)
    })
    .await?;
    Ok(Json(user))
}

async fn delete_user(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let requester = viewer.require()?;
    let id = parse_id(&id, "user")?;
    db::run(&state.pool, move |conn| users::delete_user(conn, &id, &requester)).await?;
    Ok(Json(json!({ "message": "User successfully deleted" })))
}

async fn add_favorite(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path((user_id, tweet_id)): Path<(String, String)>,
) -> Result<Json<User>, ApiError> {
    let requester = viewer.require()?;
    let user_id = parse_id(&user_id, "user")?;
    let tweet_id = parse_id(&tweet_id, "tweet")?;
    let user = db::run(&state.pool, move |conn| {
        favorites::add_favorite(conn, &user_id, &requester, &tweet_id)
    })
    .await?;
    Ok(Json(user))
}

async fn remove_favorite(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path((user_id, tweet_id)): Path<(String, String)>,
) -> Result<Json<User>, ApiError> {
    let requester = viewer.require()?;
    let user_id = parse_id(&user_id, "user")?;
    let tweet_id = parse_id(&tweet_id, "favorite")?;
    let user = db::run(&state.pool, move |conn| {
        favorites::remove_favorite(conn, &user_id, &requester, &tweet_id)
    })
    .await?;
    Ok(Json(user))
}

/// Run the HTTP server until Ctrl+C.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::new(config).await?;
    tracing::info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
