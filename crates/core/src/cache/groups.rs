//! Cache group rows and group membership.

use super::connection::CacheDb;
use super::items::{CacheItem, ITEM_COLUMNS, NewItem, fetch_or_create_item, find_item, item_from_row, now};
use crate::Error;
use crate::keys::ItemKeyAndVariant;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// A cache group row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheGroup {
    pub id: i64,
    pub key: String,
    pub created_at: String,
}

/// An item as seen from one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub item: CacheItem,
    pub must_have: bool,
    /// Number of groups referencing the item, this one included.
    pub group_count: i64,
}

fn find_group(conn: &rusqlite::Connection, key: &str) -> Result<Option<CacheGroup>, Error> {
    let result = conn.query_row(
        "SELECT id, key, created_at FROM cache_groups WHERE key = ?1",
        params![key],
        |row| Ok(CacheGroup { id: row.get(0)?, key: row.get(1)?, created_at: row.get(2)? }),
    );

    match result {
        Ok(group) => Ok(Some(group)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn fetch_or_create_group(conn: &rusqlite::Connection, key: &str) -> Result<CacheGroup, Error> {
    let failure = |e: Error| Error::FailureFetchOrCreateCacheGroup(format!("{key}: {e}"));

    if let Some(group) = find_group(conn, key).map_err(failure)? {
        return Ok(group);
    }

    conn.execute("INSERT INTO cache_groups (key, created_at) VALUES (?1, ?2)", params![key, now()])
        .map_err(|e| failure(e.into()))?;

    find_group(conn, key)
        .map_err(failure)?
        .ok_or_else(|| Error::FailureFetchOrCreateCacheGroup(key.to_string()))
}

fn require_group(conn: &rusqlite::Connection, key: &str) -> Result<CacheGroup, Error> {
    find_group(conn, key)?.ok_or_else(|| Error::CannotFindCacheGroup(key.to_string()))
}

fn link(conn: &rusqlite::Connection, group_id: i64, item_id: i64, must_have: bool) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO cache_group_items (group_id, item_id, must_have) VALUES (?1, ?2, ?3)
         ON CONFLICT(group_id, item_id) DO UPDATE SET must_have = MAX(must_have, excluded.must_have)",
        params![group_id, item_id, must_have as i32],
    )?;
    Ok(())
}

/// Unlink an item from a group and delete it once no group references it.
fn release_item(conn: &rusqlite::Connection, group_id: i64, item_id: i64) -> Result<bool, Error> {
    conn.execute(
        "DELETE FROM cache_group_items WHERE group_id = ?1 AND item_id = ?2",
        params![group_id, item_id],
    )?;

    let remaining: i64 = conn.query_row(
        "SELECT COUNT(*) FROM cache_group_items WHERE item_id = ?1",
        params![item_id],
        |row| row.get(0),
    )?;

    if remaining == 0 {
        conn.execute("DELETE FROM cache_items WHERE id = ?1", params![item_id])?;
        return Ok(true);
    }
    Ok(false)
}

fn members(conn: &rusqlite::Connection, group_id: i64) -> Result<Vec<GroupMember>, Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS}, gi.must_have,
                (SELECT COUNT(*) FROM cache_group_items c WHERE c.item_id = i.id)
         FROM cache_group_items gi
         JOIN cache_items i ON i.id = gi.item_id
         WHERE gi.group_id = ?1
         ORDER BY i.id"
    ))?;

    let rows = stmt.query_map(params![group_id], |row| {
        Ok(GroupMember {
            item: item_from_row(row)?,
            must_have: row.get::<_, i32>(6)? == 1,
            group_count: row.get(7)?,
        })
    })?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

impl CacheDb {
    /// Get a group row by key.
    pub async fn cache_group(&self, key: &str) -> Result<Option<CacheGroup>, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CacheGroup>, Error> { find_group(conn, &key) })
            .await
            .map_err(Error::from)
    }

    /// Fetch-or-create a group and its items in one transaction.
    ///
    /// Returns the recorded row per input item, in input order. A must-have
    /// item that cannot be recorded rolls back the whole batch; a
    /// nice-to-have one is skipped and reported as `None`.
    pub async fn record_group_items(
        &self, group_key: &str, items: Vec<NewItem>,
    ) -> Result<Vec<Option<CacheItem>>, Error> {
        let group_key = group_key.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<Option<CacheItem>>, Error> {
                let tx = conn.transaction()?;
                let group = fetch_or_create_group(&tx, &group_key)?;

                let mut recorded = Vec::with_capacity(items.len());
                for new in &items {
                    let item = fetch_or_create_item(&tx, &new.key, new.url.as_deref())
                        .and_then(|item| link(&tx, group.id, item.id, new.must_have).map(|()| item));

                    match item {
                        Ok(item) => recorded.push(Some(item)),
                        Err(e) if new.must_have => return Err(e),
                        Err(e) => {
                            tracing::warn!(item = %new.key, error = %e, "skipping nice-to-have item");
                            recorded.push(None);
                        }
                    }
                }

                tx.commit()?;
                Ok(recorded)
            })
            .await
            .map_err(Error::from)
    }

    /// Items of a group with their reference counts.
    pub async fn group_members(&self, group_key: &str) -> Result<Vec<GroupMember>, Error> {
        let group_key = group_key.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<GroupMember>, Error> {
                let group = require_group(conn, &group_key)?;
                members(conn, group.id)
            })
            .await
            .map_err(Error::from)
    }

    /// Keys of every item the group holds.
    ///
    /// Whether an item still belongs to another group is only decided when
    /// it is released through [`CacheDb::remove_item`].
    pub async fn keys_to_remove(&self, group_key: &str) -> Result<Vec<ItemKeyAndVariant>, Error> {
        let members = self.group_members(group_key).await?;
        Ok(members.into_iter().map(|m| m.item.key_and_variant()).collect())
    }

    /// Drop an item from a group, deleting its row when no other group holds it.
    ///
    /// Returns whether the row was deleted. Unknown items are a no-op.
    pub async fn remove_item(&self, group_key: &str, key: &ItemKeyAndVariant) -> Result<bool, Error> {
        let group_key = group_key.to_string();
        let key = key.clone();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                let Some(item) = find_item(&tx, &key.key, key.variant.as_deref())? else {
                    return Ok(false);
                };
                let deleted = match find_group(&tx, &group_key)? {
                    Some(group) => release_item(&tx, group.id, item.id)?,
                    None => false,
                };
                tx.commit()?;
                Ok(deleted)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a group row. Remaining memberships cascade.
    pub async fn remove_group(&self, group_key: &str) -> Result<(), Error> {
        let group_key = group_key.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let deleted = conn.execute("DELETE FROM cache_groups WHERE key = ?1", params![group_key])?;
                if deleted == 0 {
                    return Err(Error::CannotFindCacheGroup(group_key));
                }
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}
