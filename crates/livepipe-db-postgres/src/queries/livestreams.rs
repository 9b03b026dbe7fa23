//! Livestream and tag queries.

use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgTransaction;
use tracing::instrument;

use livepipe_storage::{LivestreamRecord, NewLivestream, StorageResult, TagRecord};

use crate::error::query_error;

const LIVESTREAM_COLUMNS: &str = "id, user_id, title, description, playlist_url, thumbnail_url, \
                                  start_at, end_at, reservation_id";

type LivestreamRow = (
    i64,
    i64,
    String,
    String,
    String,
    String,
    i64,
    i64,
    Option<i64>,
);

fn livestream_from_row(row: LivestreamRow) -> LivestreamRecord {
    let (id, user_id, title, description, playlist_url, thumbnail_url, start_at, end_at, reservation_id) =
        row;
    LivestreamRecord {
        id,
        user_id,
        title,
        description,
        playlist_url,
        thumbnail_url,
        start_at,
        end_at,
        reservation_id,
    }
}

#[instrument(skip(tx))]
pub async fn livestream_by_id(
    tx: &mut PgTransaction<'_>,
    id: i64,
) -> StorageResult<Option<LivestreamRecord>> {
    let sql = format!("SELECT {LIVESTREAM_COLUMNS} FROM livestreams WHERE id = $1");
    let row: Option<LivestreamRow> = query_as(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| query_error("livestream", id, e))?;

    Ok(row.map(livestream_from_row))
}

#[instrument(skip(tx))]
pub async fn livestream_ids_by_user_id(
    tx: &mut PgTransaction<'_>,
    user_id: i64,
) -> StorageResult<Vec<i64>> {
    query_scalar("SELECT id FROM livestreams WHERE user_id = $1 ORDER BY id")
        .bind(user_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| query_error("livestream", user_id, e))
}

#[instrument(skip(tx))]
pub async fn list_livestreams(
    tx: &mut PgTransaction<'_>,
    limit: Option<u32>,
) -> StorageResult<Vec<LivestreamRecord>> {
    // LIMIT NULL returns every row.
    let sql = format!("SELECT {LIVESTREAM_COLUMNS} FROM livestreams ORDER BY id DESC LIMIT $1");
    let rows: Vec<LivestreamRow> = query_as(&sql)
        .bind(limit.map(i64::from))
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| query_error("livestream", "*", e))?;

    Ok(rows.into_iter().map(livestream_from_row).collect())
}

#[instrument(skip(tx, livestream), fields(user_id = livestream.user_id, window = %livestream.window))]
pub async fn insert_livestream(
    tx: &mut PgTransaction<'_>,
    livestream: &NewLivestream,
) -> StorageResult<LivestreamRecord> {
    let id: i64 = query_scalar(
        "INSERT INTO livestreams \
         (user_id, title, description, playlist_url, thumbnail_url, start_at, end_at, reservation_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
    )
    .bind(livestream.user_id)
    .bind(&livestream.title)
    .bind(&livestream.description)
    .bind(&livestream.playlist_url)
    .bind(&livestream.thumbnail_url)
    .bind(livestream.window.start_at)
    .bind(livestream.window.end_at)
    .bind(livestream.reservation_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| query_error("livestream", &livestream.title, e))?;

    Ok(LivestreamRecord {
        id,
        user_id: livestream.user_id,
        title: livestream.title.clone(),
        description: livestream.description.clone(),
        playlist_url: livestream.playlist_url.clone(),
        thumbnail_url: livestream.thumbnail_url.clone(),
        start_at: livestream.window.start_at,
        end_at: livestream.window.end_at,
        reservation_id: livestream.reservation_id,
    })
}

#[instrument(skip(tx))]
pub async fn all_tags(tx: &mut PgTransaction<'_>) -> StorageResult<Vec<TagRecord>> {
    let rows: Vec<(i64, String)> = query_as("SELECT id, name FROM tags ORDER BY id")
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| query_error("tag", "*", e))?;

    Ok(rows
        .into_iter()
        .map(|(id, name)| TagRecord { id, name })
        .collect())
}

#[instrument(skip(tx))]
pub async fn insert_tag(tx: &mut PgTransaction<'_>, name: &str) -> StorageResult<TagRecord> {
    let id: i64 = query_scalar("INSERT INTO tags (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| query_error("tag", name, e))?;

    Ok(TagRecord {
        id,
        name: name.to_string(),
    })
}

#[instrument(skip(tx))]
pub async fn tag_ids_by_livestream_id(
    tx: &mut PgTransaction<'_>,
    livestream_id: i64,
) -> StorageResult<Vec<i64>> {
    query_scalar("SELECT tag_id FROM livestream_tags WHERE livestream_id = $1 ORDER BY id")
        .bind(livestream_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| query_error("livestream_tag", livestream_id, e))
}

#[instrument(skip(tx))]
pub async fn livestream_ids_by_tag_id(
    tx: &mut PgTransaction<'_>,
    tag_id: i64,
) -> StorageResult<Vec<i64>> {
    query_scalar(
        "SELECT DISTINCT livestream_id FROM livestream_tags WHERE tag_id = $1 \
         ORDER BY livestream_id DESC",
    )
    .bind(tag_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| query_error("livestream_tag", tag_id, e))
}

#[instrument(skip(tx))]
pub async fn attach_tag(
    tx: &mut PgTransaction<'_>,
    livestream_id: i64,
    tag_id: i64,
) -> StorageResult<i64> {
    query_scalar("INSERT INTO livestream_tags (livestream_id, tag_id) VALUES ($1, $2) RETURNING id")
        .bind(livestream_id)
        .bind(tag_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| query_error("livestream_tag", format!("{livestream_id}:{tag_id}"), e))
}
