use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public view of a user. The password hash never leaves the store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub email: String,
    pub favorites: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Tweet {
    pub id: Uuid,
    pub author_id: Uuid,
    /// Author profile, `None` once the author account is gone.
    pub author: Option<User>,
    #[serde(rename = "tweet")]
    pub text: String,
    pub created_at: i64,
    pub parent: Option<Uuid>,
    /// Computed per viewer on every read.
    pub is_favorite: bool,
    pub likes: Vec<Uuid>,
}

impl Tweet {
    pub fn is_comment(&self) -> bool {
        self.parent.is_some()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NewTweet {
    pub tweet: String,
    #[serde(default)]
    pub parent: Option<Uuid>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TweetText {
    pub tweet: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Likes {
    pub like: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NewUser {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    pub email: String,
    pub password: String,
}

/// Fields a user may change on their own record.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct UserUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}
