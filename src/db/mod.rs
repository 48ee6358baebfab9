// src/db/mod.rs

//! Installed-package database
//!
//! Headers live in a single sqlite table as JSON blobs keyed by their
//! offset (the rowid, which becomes the header's instance number). Two
//! side indexes drive the lookups the state machine needs: the package
//! name and the names the package's triggers watch.

use crate::error::Result;
use crate::header::Header;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Handle to the installed-package database
pub struct PackageDb {
    conn: Connection,
}

impl PackageDb {
    /// Open (creating if needed) a database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS packages (
                 offset  INTEGER PRIMARY KEY AUTOINCREMENT,
                 name    TEXT NOT NULL,
                 header  TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_packages_name ON packages(name);
             CREATE TABLE IF NOT EXISTS trigger_names (
                 package INTEGER NOT NULL,
                 name    TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_trigger_names_name ON trigger_names(name);",
        )?;
        Ok(())
    }

    /// Number of installed instances of `name`
    pub fn count_packages(&self, name: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM packages WHERE name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Add a header; assigns and returns its offset
    ///
    /// The header's instance number is set to the new offset before the
    /// blob is stored, and the package's trigger names are indexed.
    pub fn add(&self, header: &mut Header) -> Result<u32> {
        self.conn.execute(
            "INSERT INTO packages (name, header) VALUES (?1, '')",
            [header.name()],
        )?;
        let offset = self.conn.last_insert_rowid() as u32;
        header.set_instance(offset);

        let blob = serde_json::to_string(header)
            .map_err(|e| crate::Error::Header(format!("serializing {}: {}", header.nevr(), e)))?;
        self.conn.execute(
            "UPDATE packages SET header = ?1 WHERE offset = ?2",
            params![blob, offset],
        )?;

        let watched: BTreeSet<String> = crate::deps::trigger_entries(header)
            .into_iter()
            .map(|d| d.name)
            .collect();
        for name in &watched {
            self.conn.execute(
                "INSERT INTO trigger_names (package, name) VALUES (?1, ?2)",
                params![offset, name],
            )?;
        }

        debug!("added {} at offset {}", header.nevr(), offset);
        Ok(offset)
    }

    /// Remove the package at `offset`
    pub fn remove(&self, offset: u32) -> Result<()> {
        self.conn
            .execute("DELETE FROM trigger_names WHERE package = ?1", [offset])?;
        let removed = self
            .conn
            .execute("DELETE FROM packages WHERE offset = ?1", [offset])?;
        if removed == 0 {
            return Err(crate::Error::NotFound(format!(
                "no package at offset {}",
                offset
            )));
        }
        debug!("removed package at offset {}", offset);
        Ok(())
    }

    /// Fetch one header by offset
    pub fn get(&self, offset: u32) -> Result<Option<Header>> {
        let blob: Option<String> = self
            .conn
            .query_row(
                "SELECT header FROM packages WHERE offset = ?1",
                [offset],
                |row| row.get(0),
            )
            .optional()?;
        match blob {
            Some(blob) => Ok(Some(decode(&blob)?)),
            None => Ok(None),
        }
    }

    /// All packages named `name`, in offset order
    pub fn find_by_name(&self, name: &str) -> Result<Vec<(u32, Header)>> {
        self.query_pairs(
            "SELECT offset, header FROM packages WHERE name = ?1 ORDER BY offset",
            name,
        )
    }

    /// All packages with a trigger watching `name`, in offset order
    pub fn find_by_trigger_name(&self, name: &str) -> Result<Vec<(u32, Header)>> {
        self.query_pairs(
            "SELECT DISTINCT p.offset, p.header FROM packages p
             JOIN trigger_names t ON t.package = p.offset
             WHERE t.name = ?1 ORDER BY p.offset",
            name,
        )
    }

    /// Headers at the given offsets, in the order given; missing offsets
    /// are skipped
    pub fn headers_by_offsets(&self, offsets: &[u32]) -> Result<Vec<(u32, Header)>> {
        let mut out = Vec::with_capacity(offsets.len());
        for &offset in offsets {
            if let Some(header) = self.get(offset)? {
                out.push((offset, header));
            }
        }
        Ok(out)
    }

    /// Rewrite the stored header at `offset`
    pub fn replace_header(&self, offset: u32, header: &Header) -> Result<()> {
        let blob = serde_json::to_string(header)
            .map_err(|e| crate::Error::Header(format!("serializing {}: {}", header.nevr(), e)))?;
        let updated = self.conn.execute(
            "UPDATE packages SET header = ?1 WHERE offset = ?2",
            params![blob, offset],
        )?;
        if updated == 0 {
            return Err(crate::Error::NotFound(format!(
                "no package at offset {}",
                offset
            )));
        }
        Ok(())
    }

    fn query_pairs(&self, sql: &str, param: &str) -> Result<Vec<(u32, Header)>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([param], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (offset, blob) = row?;
            out.push((offset, decode(&blob)?));
        }
        Ok(out)
    }
}

fn decode(blob: &str) -> Result<Header> {
    serde_json::from_str(blob)
        .map_err(|e| crate::Error::Header(format!("corrupt stored header: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::SenseFlags;
    use crate::header::Tag;

    fn header(name: &str, version: &str) -> Header {
        let mut h = Header::new();
        h.put_str(Tag::Name, name);
        h.put_str(Tag::Version, version);
        h.put_str(Tag::Release, "1");
        h
    }

    #[test]
    fn test_add_assigns_instance() {
        let db = PackageDb::open_in_memory().unwrap();
        let mut h = header("a", "1.0");
        let offset = db.add(&mut h).unwrap();
        assert!(offset > 0);
        assert_eq!(h.instance(), offset);

        let stored = db.get(offset).unwrap().unwrap();
        assert_eq!(stored.instance(), offset);
        assert_eq!(stored.nevr(), "a-1.0-1");
    }

    #[test]
    fn test_count_and_remove() {
        let db = PackageDb::open_in_memory().unwrap();
        let off1 = db.add(&mut header("a", "1.0")).unwrap();
        db.add(&mut header("a", "2.0")).unwrap();
        db.add(&mut header("b", "1.0")).unwrap();

        assert_eq!(db.count_packages("a").unwrap(), 2);
        assert_eq!(db.count_packages("none").unwrap(), 0);

        db.remove(off1).unwrap();
        assert_eq!(db.count_packages("a").unwrap(), 1);
        assert!(matches!(db.remove(off1), Err(crate::Error::NotFound(_))));
    }

    #[test]
    fn test_trigger_name_index() {
        let db = PackageDb::open_in_memory().unwrap();
        let mut h = header("watcher", "1.0");
        h.put_str_vec(Tag::TriggerNames, vec!["target".into(), "target".into()]);
        h.put_u32_vec(
            Tag::TriggerFlags,
            vec![
                SenseFlags::TRIGGER_IN.bits(),
                SenseFlags::TRIGGER_UN.bits(),
            ],
        );
        let offset = db.add(&mut h).unwrap();

        let matches = db.find_by_trigger_name("target").unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0, offset);
        assert!(db.find_by_trigger_name("other").unwrap().is_empty());

        db.remove(offset).unwrap();
        assert!(db.find_by_trigger_name("target").unwrap().is_empty());
    }

    #[test]
    fn test_headers_by_offsets_preserves_order() {
        let db = PackageDb::open_in_memory().unwrap();
        let o1 = db.add(&mut header("a", "1.0")).unwrap();
        let o2 = db.add(&mut header("b", "1.0")).unwrap();

        let pairs = db.headers_by_offsets(&[o2, o1, 999]).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, o2);
        assert_eq!(pairs[1].0, o1);
    }

    #[test]
    fn test_replace_header() {
        let db = PackageDb::open_in_memory().unwrap();
        let mut h = header("a", "1.0");
        let offset = db.add(&mut h).unwrap();

        h.put_bin(Tag::FileStates, vec![1]);
        db.replace_header(offset, &h).unwrap();

        let stored = db.get(offset).unwrap().unwrap();
        assert_eq!(stored.get_bin(Tag::FileStates), Some(&[1u8][..]));
    }
}
