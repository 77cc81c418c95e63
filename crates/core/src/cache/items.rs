//! Cache item rows.
//!
//! An item is one persisted resource identified by `(key, variant)`. Rows are
//! fetch-or-created, so a given pair never appears twice, and they are only
//! deleted once no group references them.

use super::connection::CacheDb;
use crate::Error;
use crate::keys::ItemKeyAndVariant;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

pub(crate) const ITEM_COLUMNS: &str = "i.id, i.key, i.variant, i.url, i.is_downloaded, i.updated_at";

/// A cache item row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheItem {
    pub id: i64,
    pub key: String,
    pub variant: Option<String>,
    /// Origin URL. Absent for migrated items.
    pub url: Option<String>,
    pub is_downloaded: bool,
    /// RFC3339 timestamp of the last write to this row.
    pub updated_at: String,
}

impl CacheItem {
    pub fn key_and_variant(&self) -> ItemKeyAndVariant {
        ItemKeyAndVariant::new(self.key.clone(), self.variant.clone())
    }
}

/// An item to record under a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub key: ItemKeyAndVariant,
    pub url: Option<String>,
    /// Failing to record a must-have item fails the whole batch.
    pub must_have: bool,
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheItem> {
    Ok(CacheItem {
        id: row.get(0)?,
        key: row.get(1)?,
        variant: row.get(2)?,
        url: row.get(3)?,
        is_downloaded: row.get::<_, i32>(4)? == 1,
        updated_at: row.get(5)?,
    })
}

pub(crate) fn find_item(
    conn: &rusqlite::Connection, key: &str, variant: Option<&str>,
) -> Result<Option<CacheItem>, Error> {
    let result = conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM cache_items i WHERE i.key = ?1 AND i.variant IS ?2"),
        params![key, variant],
        item_from_row,
    );

    match result {
        Ok(item) => Ok(Some(item)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Load the row for `key`, creating it if missing.
pub(crate) fn fetch_or_create_item(
    conn: &rusqlite::Connection, key: &ItemKeyAndVariant, url: Option<&str>,
) -> Result<CacheItem, Error> {
    let failure = |e: Error| Error::FailureFetchOrCreateCacheItem(format!("{key}: {e}"));

    if let Some(item) = find_item(conn, &key.key, key.variant.as_deref()).map_err(failure)? {
        if item.url.is_none()
            && let Some(url) = url
        {
            conn.execute("UPDATE cache_items SET url = ?1 WHERE id = ?2", params![url, item.id])
                .map_err(|e| failure(e.into()))?;
            return Ok(CacheItem { url: Some(url.to_string()), ..item });
        }
        return Ok(item);
    }

    conn.execute(
        "INSERT INTO cache_items (key, variant, url, is_downloaded, updated_at) VALUES (?1, ?2, ?3, 0, ?4)",
        params![key.key, key.variant, url, now()],
    )
    .map_err(|e| failure(e.into()))?;

    find_item(conn, &key.key, key.variant.as_deref())
        .map_err(failure)?
        .ok_or_else(|| Error::FailureFetchOrCreateCacheItem(key.to_string()))
}

impl CacheDb {
    /// Get the item row for a key and variant.
    pub async fn cache_item(&self, key: &ItemKeyAndVariant) -> Result<Option<CacheItem>, Error> {
        let key = key.clone();
        self.conn
            .call(move |conn| -> Result<Option<CacheItem>, Error> {
                find_item(conn, &key.key, key.variant.as_deref())
            })
            .await
            .map_err(Error::from)
    }

    /// Every known variant of an item key, downloaded or not.
    pub async fn all_variant_items(&self, item_key: &str) -> Result<Vec<ItemKeyAndVariant>, Error> {
        let item_key = item_key.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<ItemKeyAndVariant>, Error> {
                let mut stmt = conn.prepare("SELECT key, variant FROM cache_items WHERE key = ?1 ORDER BY id")?;
                let rows = stmt.query_map(params![item_key], |row| {
                    Ok(ItemKeyAndVariant { key: row.get(0)?, variant: row.get(1)? })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    /// Downloaded variants of an item key, most recently updated first.
    pub async fn downloaded_variant_items(&self, item_key: &str) -> Result<Vec<CacheItem>, Error> {
        let item_key = item_key.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<CacheItem>, Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM cache_items i
                     WHERE i.key = ?1 AND i.is_downloaded = 1
                     ORDER BY i.updated_at DESC, i.id DESC"
                ))?;
                let rows = stmt.query_map(params![item_key], item_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    /// Flip `is_downloaded` for an item.
    ///
    /// With `resolve_variant`, a row recorded without a variant is claimed by
    /// the variant that was actually served, unless that variant already has
    /// its own row.
    pub async fn mark_downloaded(&self, key: &ItemKeyAndVariant, resolve_variant: bool) -> Result<(), Error> {
        let key = key.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                if let Some(item) = find_item(conn, &key.key, key.variant.as_deref())? {
                    conn.execute(
                        "UPDATE cache_items SET is_downloaded = 1, updated_at = ?1 WHERE id = ?2",
                        params![now(), item.id],
                    )?;
                    return Ok(());
                }

                if resolve_variant
                    && key.variant.is_some()
                    && let Some(item) = find_item(conn, &key.key, None)?
                {
                    conn.execute(
                        "UPDATE cache_items SET variant = ?1, is_downloaded = 1, updated_at = ?2 WHERE id = ?3",
                        params![key.variant, now(), item.id],
                    )?;
                    return Ok(());
                }

                Err(Error::CannotFindCacheItem(key.to_string()))
            })
            .await
            .map_err(Error::from)
    }
}
