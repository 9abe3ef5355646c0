use crate::{
    auth::Viewer,
    db, favorites,
    error::ApiError,
    model::{NewTweet, Tweet, User},
    users,
};
use rusqlite::{params, Connection, OptionalExtension, Params, TransactionBehavior};
use time::OffsetDateTime;
use uuid::Uuid;

pub const MAX_TWEET_CHARS: usize = 280;

const TWEET_SELECT: &str = "SELECT t.id, t.author_id, t.text, t.created_at, t.parent_id, t.likes, \
     u.id, u.name, u.surname, u.email, u.favorites \
     FROM tweets t LEFT JOIN users u ON u.id = t.author_id";

fn row_to_tweet(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tweet> {
    let author = match row.get::<_, Option<String>>(6)? {
        Some(_) => Some(User {
            id: db::uuid_col(row, 6)?,
            name: row.get(7)?,
            surname: row.get(8)?,
            email: row.get(9)?,
            favorites: db::ids_col(row, 10)?,
        }),
        None => None,
    };
    Ok(Tweet {
        id: db::uuid_col(row, 0)?,
        author_id: db::uuid_col(row, 1)?,
        author,
        text: row.get(2)?,
        created_at: row.get(3)?,
        parent: db::opt_uuid_col(row, 4)?,
        is_favorite: false,
        likes: db::ids_col(row, 5)?,
    })
}

fn query_tweets<P: Params>(
    conn: &Connection,
    filter: &str,
    params: P,
    viewer: &Viewer,
) -> Result<Vec<Tweet>, ApiError> {
    let sql = format!("{TWEET_SELECT} WHERE {filter} ORDER BY t.created_at, t.rowid");
    let mut stmt = conn.prepare(&sql)?;
    let mut tweets = stmt
        .query_map(params, row_to_tweet)?
        .collect::<Result<Vec<_>, _>>()?;
    favorites::annotate(conn, viewer, &mut tweets)?;
    Ok(tweets)
}

fn find_tweet(conn: &Connection, id: &Uuid) -> Result<Option<Tweet>, ApiError> {
    let mut stmt = conn.prepare(&format!("{TWEET_SELECT} WHERE t.id = ?1"))?;
    let tweet = stmt
        .query_row([id.to_string()], row_to_tweet)
        .optional()?;
    Ok(tweet)
}

fn validate_text(text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::Validation("tweet must not be empty".into()));
    }
    if text.chars().count() > MAX_TWEET_CHARS {
        return Err(ApiError::Validation(format!(
            "tweet must be at most {MAX_TWEET_CHARS} characters"
        )));
    }
    Ok(())
}

/// All top-level tweets, oldest first.
pub fn list_top_level(conn: &Connection, viewer: &Viewer) -> Result<Vec<Tweet>, ApiError> {
    query_tweets(conn, "t.parent_id IS NULL", [], viewer)
}

pub fn get_tweet(conn: &Connection, id: &Uuid, viewer: &Viewer) -> Result<Tweet, ApiError> {
    let mut tweet = find_tweet(conn, id)?.ok_or(ApiError::NotFound("tweet"))?;
    favorites::annotate(conn, viewer, std::slice::from_mut(&mut tweet))?;
    Ok(tweet)
}

/// Comments of a tweet. An unknown parent simply has none.
pub fn list_comments(
    conn: &Connection,
    parent: &Uuid,
    viewer: &Viewer,
) -> Result<Vec<Tweet>, ApiError> {
    query_tweets(conn, "t.parent_id = ?1", [parent.to_string()], viewer)
}

/// Tweets whose text contains `#tag`, matched case-sensitively.
pub fn search_hashtag(
    conn: &Connection,
    tag: &str,
    viewer: &Viewer,
) -> Result<Vec<Tweet>, ApiError> {
    if tag.trim().is_empty() {
        return Err(ApiError::Validation("hashtag must not be empty".into()));
    }
    query_tweets(
        conn,
        "instr(t.text, ?1) > 0",
        [format!("#{tag}")],
        viewer,
    )
}

/// Create a tweet authored by `author`, who must still exist. A parent must be
/// an existing top-level tweet.
pub fn create_tweet(
    conn: &mut Connection,
    author: &Uuid,
    req: &NewTweet,
) -> Result<Tweet, ApiError> {
    validate_text(&req.tweet)?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    if users::find_user(&tx, author)?.is_none() {
        tracing::debug!(author_id = %author, "token names a deleted user");
        return Err(ApiError::Unauthorized);
    }
    if let Some(parent_id) = &req.parent {
        let parent = find_tweet(&tx, parent_id)?
            .ok_or_else(|| ApiError::Validation("parent tweet does not exist".into()))?;
        if parent.is_comment() {
            return Err(ApiError::Validation(
                "comments cannot be commented on".into(),
            ));
        }
    }
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    tx.execute(
        "INSERT INTO tweets (id, author_id, text, created_at, parent_id, likes) \
         VALUES (?1, ?2, ?3, ?4, ?5, '[]')",
        params![
            id.to_string(),
            author.to_string(),
            req.tweet,
            now,
            req.parent.map(|p| p.to_string())
        ],
    )?;
    let tweet = find_tweet(&tx, &id)?.ok_or(ApiError::NotFound("tweet"))?;
    tx.commit()?;
    tracing::info!(
        tweet_id = %id,
        author_id = %author,
        comment = tweet.is_comment(),
        "tweet created"
    );
    Ok(tweet)
}

/// Replace the text of a tweet owned by `requester`.
pub fn update_text(
    conn: &mut Connection,
    id: &Uuid,
    requester: &Uuid,
    text: &str,
) -> Result<Tweet, ApiError> {
    validate_text(text)?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let tweet = find_tweet(&tx, id)?.ok_or(ApiError::NotFound("tweet"))?;
    if tweet.author_id != *requester {
        return Err(ApiError::Forbidden);
    }
    tx.execute(
        "UPDATE tweets SET text = ?2 WHERE id = ?1",
        params![id.to_string(), text],
    )?;
    tx.commit()?;
    tracing::info!(tweet_id = %id, "tweet updated");
    get_tweet(conn, id, &Viewer::user(*requester))
}

/// Replace the whole like list of a tweet.
pub fn set_likes(
    conn: &Connection,
    id: &Uuid,
    likes: &[Uuid],
    viewer: &Viewer,
) -> Result<Tweet, ApiError> {
    let changed = conn.execute(
        "UPDATE tweets SET likes = ?2 WHERE id = ?1",
        params![id.to_string(), db::ids_json(likes)?],
    )?;
    if changed == 0 {
        return Err(ApiError::NotFound("tweet"));
    }
    tracing::info!(tweet_id = %id, likes = likes.len(), "likes replaced");
    get_tweet(conn, id, viewer)
}

/// Delete a tweet owned by `requester`; a top-level tweet takes its comments
/// with it in the same transaction. Returns the number of comments removed.
pub fn delete_tweet(
    conn: &mut Connection,
    id: &Uuid,
    requester: &Uuid,
) -> Result<usize, ApiError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let tweet = find_tweet(&tx, id)?.ok_or(ApiError::NotFound("tweet"))?;
    if tweet.author_id != *requester {
        return Err(ApiError::Forbidden);
    }
    let comments = if tweet.is_comment() {
        0
    } else {
        tx.execute("DELETE FROM tweets WHERE parent_id = ?1", [id.to_string()])?
    };
    tx.execute("DELETE FROM tweets WHERE id = ?1", [id.to_string()])?;
    tx.commit()?;
    tracing::info!(tweet_id = %id, comments, "tweet deleted");
    Ok(comments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::tests::new_user;

    fn post(conn: &mut Connection, author: &Uuid, text: &str, parent: Option<Uuid>) -> Tweet {
        create_tweet(
            conn,
            author,
            &NewTweet {
                tweet: text.into(),
                parent,
            },
        )
        .unwrap()
    }

    fn setup() -> (Connection, User, User) {
        let conn = db::init_db(":memory:").unwrap();
        let ada = users::register(&conn, &new_user("ada@example.com")).unwrap();
        let bob = users::register(&conn, &new_user("bob@example.com")).unwrap();
        (conn, ada, bob)
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM tweets", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn create_attaches_author_and_validates_text() {
        let (mut conn, ada, _) = setup();
        let tweet = post(&mut conn, &ada.id, "hello", None);
        assert_eq!(tweet.author_id, ada.id);
        assert_eq!(tweet.author.as_ref().unwrap().email, "ada@example.com");
        assert!(tweet.likes.is_empty());
        assert!(!tweet.is_comment());

        let too_long = "x".repeat(MAX_TWEET_CHARS + 1);
        for text in ["", "   ", too_long.as_str()] {
            let res = create_tweet(
                &mut conn,
                &ada.id,
                &NewTweet {
                    tweet: text.to_string(),
                    parent: None,
                },
            );
            assert!(matches!(res, Err(ApiError::Validation(_))));
        }
        let exact = "é".repeat(MAX_TWEET_CHARS);
        post(&mut conn, &ada.id, &exact, None);
        assert_eq!(count(&conn), 2);
    }

    #[test]
    fn comments_are_single_level() {
        let (mut conn, ada, bob) = setup();
        let root = post(&mut conn, &ada.id, "root", None);
        let comment = post(&mut conn, &bob.id, "reply", Some(root.id));
        assert_eq!(comment.parent, Some(root.id));

        let nested = create_tweet(
            &mut conn,
            &ada.id,
            &NewTweet {
                tweet: "nested".into(),
                parent: Some(comment.id),
            },
        );
        assert!(matches!(nested, Err(ApiError::Validation(_))));
        let orphan = create_tweet(
            &mut conn,
            &ada.id,
            &NewTweet {
                tweet: "orphan".into(),
                parent: Some(Uuid::new_v4()),
            },
        );
        assert!(matches!(orphan, Err(ApiError::Validation(_))));
        assert_eq!(count(&conn), 2);

        let top = list_top_level(&conn, &Viewer::anonymous()).unwrap();
        assert_eq!(top, vec![root.clone()]);
        let comments = list_comments(&conn, &root.id, &Viewer::anonymous()).unwrap();
        assert_eq!(comments, vec![comment]);
        assert!(list_comments(&conn, &Uuid::new_v4(), &Viewer::anonymous())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn cascade_delete_removes_comments() {
        let (mut conn, ada, bob) = setup();
        let root = post(&mut conn, &ada.id, "root", None);
        post(&mut conn, &bob.id, "c1", Some(root.id));
        post(&mut conn, &ada.id, "c2", Some(root.id));
        let other = post(&mut conn, &bob.id, "unrelated", None);

        assert!(matches!(
            delete_tweet(&mut conn, &root.id, &bob.id),
            Err(ApiError::Forbidden)
        ));
        assert_eq!(count(&conn), 4);

        assert_eq!(delete_tweet(&mut conn, &root.id, &ada.id).unwrap(), 2);
        assert_eq!(count(&conn), 1);
        assert!(get_tweet(&conn, &other.id, &Viewer::anonymous()).is_ok());
        assert!(matches!(
            delete_tweet(&mut conn, &root.id, &ada.id),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn deleting_comment_keeps_parent_and_siblings() {
        let (mut conn, ada, bob) = setup();
        let root = post(&mut conn, &ada.id, "root", None);
        let c1 = post(&mut conn, &bob.id, "c1", Some(root.id));
        let c2 = post(&mut conn, &ada.id, "c2", Some(root.id));
        assert_eq!(delete_tweet(&mut conn, &c1.id, &bob.id).unwrap(), 0);
        let left = list_comments(&conn, &root.id, &Viewer::anonymous()).unwrap();
        assert_eq!(left, vec![c2]);
        assert!(get_tweet(&conn, &root.id, &Viewer::anonymous()).is_ok());
    }

    #[test]
    fn update_text_is_author_only() {
        let (mut conn, ada, bob) = setup();
        let tweet = post(&mut conn, &ada.id, "original", None);
        assert!(matches!(
            update_text(&mut conn, &tweet.id, &bob.id, "hijacked"),
            Err(ApiError::Forbidden)
        ));
        assert_eq!(
            get_tweet(&conn, &tweet.id, &Viewer::anonymous()).unwrap().text,
            "original"
        );
        let updated = update_text(&mut conn, &tweet.id, &ada.id, "edited").unwrap();
        assert_eq!(updated.text, "edited");
        assert_eq!(updated.created_at, tweet.created_at);
        assert_eq!(updated.author_id, ada.id);
        assert!(matches!(
            update_text(&mut conn, &Uuid::new_v4(), &ada.id, "x"),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn likes_are_replaced_wholesale() {
        let (mut conn, ada, bob) = setup();
        let tweet = post(&mut conn, &ada.id, "like me", None);
        let viewer = Viewer::user(bob.id);
        let first = set_likes(&conn, &tweet.id, &[ada.id, bob.id], &viewer).unwrap();
        assert_eq!(first.likes, vec![ada.id, bob.id]);
        let second = set_likes(&conn, &tweet.id, &[bob.id], &viewer).unwrap();
        assert_eq!(second.likes, vec![bob.id]);
        assert_eq!(second.text, "like me");
        assert!(matches!(
            set_likes(&conn, &Uuid::new_v4(), &[], &viewer),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn hashtag_search_is_substring_and_case_sensitive() {
        let (mut conn, ada, _) = setup();
        let tagged = post(&mut conn, &ada.id, "hello #news today", None);
        post(&mut conn, &ada.id, "no tag here", None);
        post(&mut conn, &ada.id, "shouting #NEWS", None);
        let found = search_hashtag(&conn, "news", &Viewer::anonymous()).unwrap();
        assert_eq!(found, vec![tagged]);
        assert!(search_hashtag(&conn, "sports", &Viewer::anonymous())
            .unwrap()
            .is_empty());
        assert!(matches!(
            search_hashtag(&conn, "", &Viewer::anonymous()),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn deleted_author_reads_as_null() {
        let (mut conn, ada, _) = setup();
        let tweet = post(&mut conn, &ada.id, "ghost", None);
        users::delete_user(&conn, &ada.id, &ada.id).unwrap();
        let read = get_tweet(&conn, &tweet.id, &Viewer::anonymous()).unwrap();
        assert_eq!(read.author_id, ada.id);
        assert!(read.author.is_none());
    }

    #[test]
    fn deleted_user_cannot_post() {
        let (mut conn, ada, bob) = setup();
        let root = post(&mut conn, &bob.id, "root", None);
        users::delete_user(&conn, &ada.id, &ada.id).unwrap();
        for parent in [None, Some(root.id)] {
            let res = create_tweet(
                &mut conn,
                &ada.id,
                &NewTweet {
                    tweet: "ghost".into(),
                    parent,
                },
            );
            assert!(matches!(res, Err(ApiError::Unauthorized)));
        }
        assert_eq!(count(&conn), 1);
        assert!(list_comments(&conn, &root.id, &Viewer::anonymous())
            .unwrap()
            .is_empty());
    }
}
