use crate::{
    auth::Viewer,
    db,
    error::ApiError,
    model::{Tweet, User},
    users,
};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashSet;
use uuid::Uuid;

/// Favorites of the viewer. Empty for anonymous viewers and unknown accounts.
pub fn favorites_of(conn: &Connection, viewer: &Viewer) -> Result<HashSet<Uuid>, ApiError> {
    let Some(id) = viewer.id() else {
        return Ok(HashSet::new());
    };
    let favorites = conn
        .query_row(
            "SELECT favorites FROM users WHERE id = ?1",
            [id.to_string()],
            |row| db::ids_col(row, 0),
        )
        .optional()?;
    Ok(favorites.unwrap_or_default().into_iter().collect())
}

/// Set `is_favorite` on every tweet relative to the viewer.
pub fn annotate(conn: &Connection, viewer: &Viewer, tweets: &mut [Tweet]) -> Result<(), ApiError> {
    let favorites = favorites_of(conn, viewer)?;
    for tweet in tweets.iter_mut() {
        tweet.is_favorite = favorites.contains(&tweet.id);
    }
    Ok(())
}

fn write_favorites(conn: &Connection, user_id: &Uuid, favorites: &[Uuid]) -> Result<(), ApiError> {
    conn.execute(
        "UPDATE users SET favorites = ?2 WHERE id = ?1",
        params![user_id.to_string(), db::ids_json(favorites)?],
    )?;
    Ok(())
}

/// Append a tweet to the user's favorites unless it is already there.
pub fn add_favorite(
    conn: &mut Connection,
    user_id: &Uuid,
    requester: &Uuid,
    tweet_id: &Uuid,
) -> Result<User, ApiError> {
    if user_id != requester {
        return Err(ApiError::Forbidden);
    }
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut user = users::find_user(&tx, user_id)?.ok_or(ApiError::NotFound("user"))?;
    let tweet_exists = tx
        .query_row(
            "SELECT 1 FROM tweets WHERE id = ?1",
            [tweet_id.to_string()],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !tweet_exists {
        return Err(ApiError::NotFound("tweet"));
    }
    if !user.favorites.contains(tweet_id) {
        user.favorites.push(*tweet_id);
        write_favorites(&tx, user_id, &user.favorites)?;
        tracing::info!(user_id = %user_id, tweet_id = %tweet_id, "favorite added");
    }
    tx.commit()?;
    Ok(user)
}

/// Remove a tweet from the user's favorites. Removing a non-member is an error.
pub fn remove_favorite(
    conn: &mut Connection,
    user_id: &Uuid,
    requester: &Uuid,
    tweet_id: &Uuid,
) -> Result<User, ApiError> {
    if user_id != requester {
        return Err(ApiError::Forbidden);
    }
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut user = users::find_user(&tx, user_id)?.ok_or(ApiError::NotFound("user"))?;
    let before = user.favorites.len();
    user.favorites.retain(|fav| fav != tweet_id);
    if user.favorites.len() == before {
        return Err(ApiError::NotFound("favorite"));
    }
    write_favorites(&tx, user_id, &user.favorites)?;
    tx.commit()?;
    tracing::info!(user_id = %user_id, tweet_id = %tweet_id, "favorite removed");
    Ok(user)
}
