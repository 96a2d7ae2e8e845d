//! SQLite persistence for namespace metadata.
//!
//! Entries form a parent-pointer tree; there is no closure table, so tree
//! questions are answered by repeated point lookups. File contents never
//! live here, only the id of the disk holding them.

use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::error::Error as StdError;
use std::panic::AssertUnwindSafe;
use std::path::Path;

use crate::vfs::{AccessMode, DiskId, EntryId, UserId};

/// Name of the SQL function the cleanup trigger calls.
pub const CLEANUP_FUNCTION: &str = "vfs_remove_physical";

/// Error type a delete hook may return; it aborts the delete.
pub type HookError = Box<dyn StdError + Send + Sync + 'static>;

/// Database handle for namespace metadata.
pub struct EntryDb {
    conn: Connection,
}

impl std::fmt::Debug for EntryDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryDb")
            .field("path", &self.conn.path())
            .finish()
    }
}

/// One row of the entries table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRow {
    pub id: EntryId,
    pub parent_id: Option<EntryId>,
    pub name: String,
    pub owner_id: UserId,
    pub disk_id: Option<DiskId>,
}

impl EntryRow {
    /// Directories have no disk.
    pub fn is_directory(&self) -> bool {
        self.disk_id.is_none()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Durable companion of an in-memory disk registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    pub disk_id: DiskId,
    pub mountpoint: String,
}

const SCHEMA: &str = r#"
-- Namespace tree (parent_id NULL = personal root, disk_id NULL = directory)
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY,
    parent_id INTEGER REFERENCES entries(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    owner_id INTEGER NOT NULL,
    disk_id INTEGER,
    UNIQUE (parent_id, name)
);
CREATE INDEX IF NOT EXISTS idx_entries_owner_root ON entries(owner_id) WHERE parent_id IS NULL;

-- Explicit grants (exact entry only, never inherited)
CREATE TABLE IF NOT EXISTS permission_grants (
    user_id INTEGER NOT NULL,
    entry_id INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    mode TEXT NOT NULL,
    PRIMARY KEY (user_id, entry_id, mode)
);

-- Mounted disks
CREATE TABLE IF NOT EXISTS disk_mounts (
    id INTEGER PRIMARY KEY,
    mountpoint TEXT NOT NULL
);

-- Physical cleanup for every deletion path, including FK cascades
CREATE TRIGGER IF NOT EXISTS entries_physical_cleanup
BEFORE DELETE ON entries
WHEN OLD.disk_id IS NOT NULL
BEGIN
    SELECT vfs_remove_physical(OLD.disk_id, OLD.id);
END;
"#;

fn map_entry(row: &rusqlite::Row<'_>) -> SqliteResult<EntryRow> {
    Ok(EntryRow {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        name: row.get(2)?,
        owner_id: row.get(3)?,
        disk_id: row.get(4)?,
    })
}

impl EntryDb {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqliteResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> SqliteResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqliteResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Raw connection, for statements this type does not wrap.
    ///
    /// Deletes issued here still run the cleanup hook.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Install the physical-cleanup hook.
    ///
    /// `hook(disk_id, entry_id)` runs immediately before any file row is
    /// deleted, whichever statement caused the delete. Returning an error
    /// aborts that statement. Until a hook is installed, deletes on the
    /// entries table fail because the trigger cannot resolve its function.
    pub fn on_file_delete<F>(&self, hook: F) -> SqliteResult<()>
    where
        F: Fn(DiskId, EntryId) -> Result<(), HookError> + Send + 'static,
    {
        // Hooks must not re-enter the connection.
        let hook = AssertUnwindSafe(hook);
        self.conn.create_scalar_function(
            CLEANUP_FUNCTION,
            2,
            FunctionFlags::SQLITE_UTF8,
            move |ctx| {
                let hook = &hook;
                let disk_id: DiskId = ctx.get(0)?;
                let entry_id: EntryId = ctx.get(1)?;
                (hook.0)(disk_id, entry_id).map_err(rusqlite::Error::UserFunctionError)?;
                Ok(1i64)
            },
        )
    }

    // =========================================================================
    // Entries
    // =========================================================================

    /// Get an entry by id.
    pub fn entry(&self, id: EntryId) -> SqliteResult<Option<EntryRow>> {
        self.conn
            .query_row(
                "SELECT id, parent_id, name, owner_id, disk_id FROM entries WHERE id = ?1",
                params![id],
                map_entry,
            )
            .optional()
    }

    /// The personal root of an owner.
    pub fn root_of(&self, owner_id: UserId) -> SqliteResult<Option<EntryId>> {
        self.conn
            .query_row(
                "SELECT id FROM entries WHERE parent_id IS NULL AND owner_id = ?1",
                params![owner_id],
                |row| row.get(0),
            )
            .optional()
    }

    /// Insert an entry and return its generated id.
    pub fn insert_entry(
        &self,
        parent_id: Option<EntryId>,
        name: &str,
        owner_id: UserId,
        disk_id: Option<DiskId>,
    ) -> SqliteResult<EntryId> {
        self.conn.query_row(
            "INSERT INTO entries (parent_id, name, owner_id, disk_id)
             VALUES (?1, ?2, ?3, ?4)
             RETURNING id",
            params![parent_id, name, owner_id, disk_id],
            |row| row.get(0),
        )
    }

    /// Delete an entry row. Returns the number of rows deleted directly
    /// (cascaded descendants are not counted).
    pub fn delete_entry(&self, id: EntryId) -> SqliteResult<usize> {
        self.conn
            .execute("DELETE FROM entries WHERE id = ?1", params![id])
    }

    /// Rename an entry in place.
    pub fn rename_entry(&self, id: EntryId, name: &str) -> SqliteResult<usize> {
        self.conn.execute(
            "UPDATE entries SET name = ?1 WHERE id = ?2",
            params![name, id],
        )
    }

    /// Returns true if another entry under `parent_id` already uses `name`.
    ///
    /// Personal roots have no parent and are never siblings of each other.
    pub fn sibling_exists(
        &self,
        parent_id: Option<EntryId>,
        name: &str,
        except: EntryId,
    ) -> SqliteResult<bool> {
        self.conn.query_row(
            "SELECT EXISTS (
                 SELECT 1 FROM entries WHERE parent_id = ?1 AND name = ?2 AND id != ?3
             )",
            params![parent_id, name, except],
            |row| row.get(0),
        )
    }

    /// Direct children of an entry, ordered by name.
    pub fn children(&self, parent_id: EntryId) -> SqliteResult<Vec<EntryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, parent_id, name, owner_id, disk_id
             FROM entries WHERE parent_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![parent_id], map_entry)?;
        rows.collect()
    }

    /// Every file in the subtree rooted at `id` (including `id` itself), as
    /// `(entry id, disk id)` pairs ordered by entry id.
    pub fn subtree_files(&self, id: EntryId) -> SqliteResult<Vec<(EntryId, DiskId)>> {
        let mut stmt = self.conn.prepare(
            "WITH RECURSIVE subtree(id) AS (
                 SELECT ?1
                 UNION ALL
                 SELECT e.id FROM entries e JOIN subtree s ON e.parent_id = s.id
             )
             SELECT e.id, e.disk_id FROM entries e JOIN subtree s ON e.id = s.id
             WHERE e.disk_id IS NOT NULL
             ORDER BY e.id",
        )?;
        let rows = stmt.query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    }

    /// Count all entries (for diagnostics and tests).
    pub fn count_entries(&self) -> SqliteResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
    }

    // =========================================================================
    // Grants
    // =========================================================================

    /// Returns true if `user_id` holds `mode` on exactly `entry_id`.
    pub fn has_grant(
        &self,
        user_id: UserId,
        entry_id: EntryId,
        mode: AccessMode,
    ) -> SqliteResult<bool> {
        self.conn.query_row(
            "SELECT EXISTS (
                 SELECT 1 FROM permission_grants
                 WHERE user_id = ?1 AND entry_id = ?2 AND mode = ?3
             )",
            params![user_id, entry_id, mode.as_str()],
            |row| row.get(0),
        )
    }

    /// Record a grant. Granting twice is a no-op.
    pub fn insert_grant(
        &self,
        user_id: UserId,
        entry_id: EntryId,
        mode: AccessMode,
    ) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO permission_grants (user_id, entry_id, mode)
             VALUES (?1, ?2, ?3)",
            params![user_id, entry_id, mode.as_str()],
        )?;
        Ok(())
    }

    /// Drop a grant. Returns true if one existed.
    pub fn delete_grant(
        &self,
        user_id: UserId,
        entry_id: EntryId,
        mode: AccessMode,
    ) -> SqliteResult<bool> {
        let n = self.conn.execute(
            "DELETE FROM permission_grants WHERE user_id = ?1 AND entry_id = ?2 AND mode = ?3",
            params![user_id, entry_id, mode.as_str()],
        )?;
        Ok(n > 0)
    }

    // =========================================================================
    // Disk mounts
    // =========================================================================

    /// Record a mount, replacing the mountpoint of an earlier record.
    pub fn upsert_mount(&self, disk_id: DiskId, mountpoint: &str) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO disk_mounts (id, mountpoint) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET mountpoint = excluded.mountpoint",
            params![disk_id, mountpoint],
        )?;
        Ok(())
    }

    /// All recorded mounts, by disk id.
    pub fn mount_records(&self) -> SqliteResult<Vec<MountRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, mountpoint FROM disk_mounts ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(MountRecord {
                disk_id: row.get(0)?,
                mountpoint: row.get(1)?,
            })
        })?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn db_with_recorder() -> (EntryDb, Arc<Mutex<Vec<(DiskId, EntryId)>>>) {
        let db = EntryDb::in_memory().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        db.on_file_delete(move |disk_id, entry_id| {
            sink.lock().unwrap().push((disk_id, entry_id));
            Ok(())
        })
        .unwrap();
        (db, seen)
    }

    #[test]
    fn test_entry_crud() {
        let (db, _) = db_with_recorder();

        let root = db.insert_entry(None, "/", 1, None).unwrap();
        let file = db.insert_entry(Some(root), "a.txt", 1, Some(3)).unwrap();

        let row = db.entry(file).unwrap().unwrap();
        assert_eq!(row.parent_id, Some(root));
        assert_eq!(row.disk_id, Some(3));
        assert!(!row.is_directory());
        assert!(db.entry(root).unwrap().unwrap().is_root());

        db.rename_entry(file, "b.txt").unwrap();
        assert_eq!(db.entry(file).unwrap().unwrap().name, "b.txt");

        assert_eq!(db.delete_entry(file).unwrap(), 1);
        assert!(db.entry(file).unwrap().is_none());
    }

    #[test]
    fn test_sibling_names_unique() {
        let (db, _) = db_with_recorder();
        let root = db.insert_entry(None, "/", 1, None).unwrap();
        db.insert_entry(Some(root), "docs", 1, None).unwrap();

        assert!(db.insert_entry(Some(root), "docs", 1, None).is_err());
        assert!(db.sibling_exists(Some(root), "docs", -1).unwrap());
        assert!(!db.sibling_exists(Some(root), "music", -1).unwrap());
    }

    #[test]
    fn test_root_lookup() {
        let (db, _) = db_with_recorder();
        assert_eq!(db.root_of(1).unwrap(), None);
        let root = db.insert_entry(None, "/", 1, None).unwrap();
        db.insert_entry(None, "/", 2, None).unwrap();
        assert_eq!(db.root_of(1).unwrap(), Some(root));
    }

    #[test]
    fn test_hook_sees_old_values_for_files_only() {
        let (db, seen) = db_with_recorder();
        let root = db.insert_entry(None, "/", 1, None).unwrap();
        let dir = db.insert_entry(Some(root), "dir", 1, None).unwrap();
        let file = db.insert_entry(Some(root), "f", 1, Some(7)).unwrap();

        db.delete_entry(dir).unwrap();
        assert!(seen.lock().unwrap().is_empty());

        db.rename_entry(file, "g").unwrap();
        assert!(seen.lock().unwrap().is_empty());

        db.delete_entry(file).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(7, file)]);
    }

    #[test]
    fn test_hook_fires_on_cascade_and_raw_delete() {
        let (db, seen) = db_with_recorder();
        let root = db.insert_entry(None, "/", 1, None).unwrap();
        let dir = db.insert_entry(Some(root), "dir", 1, None).unwrap();
        let nested = db.insert_entry(Some(dir), "n", 1, Some(2)).unwrap();
        let loose = db.insert_entry(Some(root), "l", 1, Some(4)).unwrap();

        db.delete_entry(dir).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(2, nested)]);
        assert!(db.entry(nested).unwrap().is_none());

        db.connection()
            .execute("DELETE FROM entries WHERE name = 'l'", [])
            .unwrap();
        assert_eq!(seen.lock().unwrap().last(), Some(&(4, loose)));
    }

    #[test]
    fn test_subtree_files() {
        let (db, _) = db_with_recorder();
        let root = db.insert_entry(None, "/", 1, None).unwrap();
        let dir = db.insert_entry(Some(root), "dir", 1, None).unwrap();
        let deep = db.insert_entry(Some(dir), "deep", 1, None).unwrap();
        let a = db.insert_entry(Some(dir), "a", 1, Some(1)).unwrap();
        let b = db.insert_entry(Some(deep), "b", 1, Some(2)).unwrap();
        let outside = db.insert_entry(Some(root), "c", 1, Some(1)).unwrap();

        assert_eq!(db.subtree_files(dir).unwrap(), vec![(a, 1), (b, 2)]);
        assert_eq!(db.subtree_files(a).unwrap(), vec![(a, 1)]);
        assert_eq!(db.subtree_files(deep).unwrap(), vec![(b, 2)]);
        assert_eq!(db.subtree_files(root).unwrap().len(), 3);
        assert!(db.subtree_files(root).unwrap().contains(&(outside, 1)));
        assert!(db.subtree_files(999).unwrap().is_empty());
    }

    #[test]
    fn test_sibling_check_ignores_other_roots() {
        let (db, _) = db_with_recorder();
        let alice = db.insert_entry(None, "/", 1, None).unwrap();
        db.insert_entry(None, "/", 2, None).unwrap();

        assert!(!db.sibling_exists(None, "/", alice).unwrap());
    }

    #[test]
    fn test_hook_error_aborts_delete() {
        let db = EntryDb::in_memory().unwrap();
        db.on_file_delete(|_, _| Err("disk offline".into())).unwrap();

        let root = db.insert_entry(None, "/", 1, None).unwrap();
        let file = db.insert_entry(Some(root), "f", 1, Some(1)).unwrap();

        assert!(db.delete_entry(file).is_err());
        assert!(db.entry(file).unwrap().is_some());
    }

    #[test]
    fn test_grants() {
        let (db, _) = db_with_recorder();
        let root = db.insert_entry(None, "/", 1, None).unwrap();

        assert!(!db.has_grant(2, root, AccessMode::Read).unwrap());
        db.insert_grant(2, root, AccessMode::Read).unwrap();
        db.insert_grant(2, root, AccessMode::Read).unwrap();
        assert!(db.has_grant(2, root, AccessMode::Read).unwrap());
        assert!(!db.has_grant(2, root, AccessMode::Write).unwrap());

        assert!(db.delete_grant(2, root, AccessMode::Read).unwrap());
        assert!(!db.delete_grant(2, root, AccessMode::Read).unwrap());
    }

    #[test]
    fn test_grants_follow_entry_deletion() {
        let (db, _) = db_with_recorder();
        let root = db.insert_entry(None, "/", 1, None).unwrap();
        let dir = db.insert_entry(Some(root), "shared", 1, None).unwrap();
        db.insert_grant(2, dir, AccessMode::Write).unwrap();

        db.delete_entry(dir).unwrap();
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM permission_grants", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_mount_records_upsert() {
        let (db, _) = db_with_recorder();
        db.upsert_mount(2, "/mnt/b").unwrap();
        db.upsert_mount(1, "/mnt/a").unwrap();
        db.upsert_mount(2, "/mnt/b2").unwrap();

        let records = db.mount_records().unwrap();
        assert_eq!(
            records,
            vec![
                MountRecord {
                    disk_id: 1,
                    mountpoint: "/mnt/a".into()
                },
                MountRecord {
                    disk_id: 2,
                    mountpoint: "/mnt/b2".into()
                },
            ]
        );
    }
}
