use crate::{
    auth,
    db,
    error::{is_constraint_violation, ApiError},
    model::{NewUser, User, UserUpdate},
};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

pub const MIN_PASSWORD_CHARS: usize = 5;

const USER_COLUMNS: &str = "id, name, surname, email, favorites";

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: db::uuid_col(row, 0)?,
        name: row.get(1)?,
        surname: row.get(2)?,
        email: row.get(3)?,
        favorites: db::ids_col(row, 4)?,
    })
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    if EMAIL_RE.is_match(email) {
        Ok(())
    } else {
        Err(ApiError::Validation("email must be a valid address".into()))
    }
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(ApiError::Validation(format!(
            "password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    Ok(())
}

fn email_taken(err: rusqlite::Error) -> ApiError {
    if is_constraint_violation(&err) {
        ApiError::Conflict("This email is already taken".into())
    } else {
        err.into()
    }
}

/// Register a new user. The password is stored as an argon2 hash.
pub fn register(conn: &Connection, req: &NewUser) -> Result<User, ApiError> {
    let email = req.email.trim();
    validate_email(email)?;
    validate_password(&req.password)?;
    let hash = auth::hash_password(&req.password)?;
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO users (id, name, surname, email, password_hash, favorites) \
         VALUES (?1, ?2, ?3, ?4, ?5, '[]')",
        params![id.to_string(), req.name, req.surname, email, hash],
    )
    .map_err(email_taken)?;
    tracing::info!(user_id = %id, "user registered");
    Ok(User {
        id,
        name: req.name.clone(),
        surname: req.surname.clone(),
        email: email.to_string(),
        favorites: Vec::new(),
    })
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>, ApiError> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY rowid"))?;
    let users = stmt
        .query_map([], row_to_user)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

pub fn find_user(conn: &Connection, id: &Uuid) -> Result<Option<User>, ApiError> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?;
    let user = stmt
        .query_row([id.to_string()], row_to_user)
        .optional()?;
    Ok(user)
}

pub fn get_user(conn: &Connection, id: &Uuid) -> Result<User, ApiError> {
    find_user(conn, id)?.ok_or(ApiError::NotFound("user"))
}

/// Overwrite the fields present in `upd` on the requester's own record.
pub fn update_user(
    conn: &Connection,
    id: &Uuid,
    requester: &Uuid,
    upd: &UserUpdate,
) -> Result<User, ApiError> {
    if id != requester {
        return Err(ApiError::Forbidden);
    }
    let email = upd.email.as_deref().map(str::trim);
    if let Some(email) = email {
        validate_email(email)?;
    }
    let hash = match &upd.password {
        Some(password) => {
            validate_password(password)?;
            Some(auth::hash_password(password)?)
        }
        None => None,
    };
    let changed = conn
        .execute(
            "UPDATE users SET name = COALESCE(?2, name), surname = COALESCE(?3, surname), \
             email = COALESCE(?4, email), password_hash = COALESCE(?5, password_hash) \
             WHERE id = ?1",
            params![id.to_string(), upd.name, upd.surname, email, hash],
        )
        .map_err(email_taken)?;
    if changed == 0 {
        return Err(ApiError::NotFound("user"));
    }
    tracing::info!(user_id = %id, "user updated");
    get_user(conn, id)
}

pub fn delete_user(conn: &Connection, id: &Uuid, requester: &Uuid) -> Result<(), ApiError> {
    if id != requester {
        return Err(ApiError::Forbidden);
    }
    let changed = conn.execute("DELETE FROM users WHERE id = ?1", [id.to_string()])?;
    if changed == 0 {
        return Err(ApiError::NotFound("user"));
    }
    tracing::info!(user_id = %id, "user deleted");
    Ok(())
}
