//! User, theme and icon queries.

use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgTransaction;
use tracing::instrument;

use livepipe_storage::{IconRecord, NewUser, StorageResult, ThemeRecord, UserRecord};

use crate::error::query_error;

type UserRow = (i64, String, String, String, String);

fn user_from_row((id, name, display_name, description, credential): UserRow) -> UserRecord {
    UserRecord {
        id,
        name,
        display_name,
        description,
        credential,
    }
}

#[instrument(skip(tx))]
pub async fn user_by_id(tx: &mut PgTransaction<'_>, id: i64) -> StorageResult<Option<UserRecord>> {
    let row: Option<UserRow> = query_as(
        "SELECT id, name, display_name, description, credential FROM users WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| query_error("user", id, e))?;

    Ok(row.map(user_from_row))
}

#[instrument(skip(tx))]
pub async fn user_by_name(
    tx: &mut PgTransaction<'_>,
    name: &str,
) -> StorageResult<Option<UserRecord>> {
    let row: Option<UserRow> = query_as(
        "SELECT id, name, display_name, description, credential FROM users WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| query_error("user", name, e))?;

    Ok(row.map(user_from_row))
}

#[instrument(skip(tx, user), fields(name = %user.name))]
pub async fn insert_user(tx: &mut PgTransaction<'_>, user: &NewUser) -> StorageResult<UserRecord> {
    let id: i64 = query_scalar(
        "INSERT INTO users (name, display_name, description, credential) \
         VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(&user.name)
    .bind(&user.display_name)
    .bind(&user.description)
    .bind(&user.credential)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| query_error("user", &user.name, e))?;

    Ok(UserRecord {
        id,
        name: user.name.clone(),
        display_name: user.display_name.clone(),
        description: user.description.clone(),
        credential: user.credential.clone(),
    })
}

#[instrument(skip(tx, user), fields(id = user.id))]
pub async fn update_user(tx: &mut PgTransaction<'_>, user: &UserRecord) -> StorageResult<()> {
    let result = query(
        "UPDATE users SET name = $2, display_name = $3, description = $4, credential = $5 \
         WHERE id = $1",
    )
    .bind(user.id)
    .bind(&user.name)
    .bind(&user.display_name)
    .bind(&user.description)
    .bind(&user.credential)
    .execute(&mut **tx)
    .await
    .map_err(|e| query_error("user", &user.name, e))?;

    if result.rows_affected() == 0 {
        return Err(livepipe_storage::StorageError::not_found("user", user.id));
    }
    Ok(())
}

#[instrument(skip(tx))]
pub async fn theme_by_user_id(
    tx: &mut PgTransaction<'_>,
    user_id: i64,
) -> StorageResult<Option<ThemeRecord>> {
    let row: Option<(i64, i64, bool)> =
        query_as("SELECT id, user_id, dark_mode FROM themes WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| query_error("theme", user_id, e))?;

    Ok(row.map(|(id, user_id, dark_mode)| ThemeRecord {
        id,
        user_id,
        dark_mode,
    }))
}

#[instrument(skip(tx))]
pub async fn insert_theme(
    tx: &mut PgTransaction<'_>,
    user_id: i64,
    dark_mode: bool,
) -> StorageResult<ThemeRecord> {
    let id: i64 =
        query_scalar("INSERT INTO themes (user_id, dark_mode) VALUES ($1, $2) RETURNING id")
            .bind(user_id)
            .bind(dark_mode)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| query_error("theme", user_id, e))?;

    Ok(ThemeRecord {
        id,
        user_id,
        dark_mode,
    })
}

#[instrument(skip(tx))]
pub async fn update_theme(
    tx: &mut PgTransaction<'_>,
    user_id: i64,
    dark_mode: bool,
) -> StorageResult<ThemeRecord> {
    let id: Option<i64> =
        query_scalar("UPDATE themes SET dark_mode = $2 WHERE user_id = $1 RETURNING id")
            .bind(user_id)
            .bind(dark_mode)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| query_error("theme", user_id, e))?;

    let id = id.ok_or_else(|| livepipe_storage::StorageError::not_found("theme", user_id))?;
    Ok(ThemeRecord {
        id,
        user_id,
        dark_mode,
    })
}

#[instrument(skip(tx))]
pub async fn icon_digest_by_user_id(
    tx: &mut PgTransaction<'_>,
    user_id: i64,
) -> StorageResult<Option<String>> {
    query_scalar("SELECT image_digest FROM icons WHERE user_id = $1 ORDER BY id DESC LIMIT 1")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| query_error("icon", user_id, e))
}

#[instrument(skip(tx))]
pub async fn replace_icon(
    tx: &mut PgTransaction<'_>,
    user_id: i64,
    image_digest: &str,
) -> StorageResult<IconRecord> {
    query("DELETE FROM icons WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| query_error("icon", user_id, e))?;

    let id: i64 =
        query_scalar("INSERT INTO icons (user_id, image_digest) VALUES ($1, $2) RETURNING id")
            .bind(user_id)
            .bind(image_digest)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| query_error("icon", user_id, e))?;

    Ok(IconRecord {
        id,
        user_id,
        image_digest: image_digest.to_string(),
    })
}
