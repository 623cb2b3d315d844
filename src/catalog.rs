//! Embedded relational catalog: local persistent map from file path to
//! `(mtime, size, file_hash, last_indexed_at, last_error)` and from
//! `(file, start_line, end_line)` to `(chunk_hash, point_id, chunk_idx)`.
//!
//! Single-writer: the connection is guarded by a `Mutex`, matching the
//! "single owner, snapshot reads" model used elsewhere in this engine for
//! state mutated by exactly one task (see `watcher::WatcherState`).

use std::path::Path;
use std::sync::Mutex;

use parking_lot::Mutex as PLMutex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::types::{ChunkKind, FileRecord, IndexedChunk};

pub struct Catalog {
    conn: Mutex<Connection>,
    // Serializes writers at a slightly coarser grain than the sqlite mutex
    // alone would, so a caller composing several catalog calls for one file
    // (erase-then-insert) can hold a single critical section if it wants to.
    writer_lock: PLMutex<()>,
}

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl Catalog {
    pub fn open(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Self::ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            writer_lock: PLMutex::new(()),
        })
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Self::ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            writer_lock: PLMutex::new(()),
        })
    }

    fn ensure_schema(conn: &Connection) -> EngineResult<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS files (
                file_path TEXT PRIMARY KEY,
                mtime REAL NOT NULL,
                size INTEGER NOT NULL,
                file_hash TEXT NOT NULL,
                last_indexed_at REAL NOT NULL,
                last_error TEXT
            );
            CREATE TABLE IF NOT EXISTS chunks (
                file_path TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                chunk_hash TEXT NOT NULL,
                point_id TEXT NOT NULL,
                chunk_idx INTEGER NOT NULL,
                language TEXT,
                kind TEXT NOT NULL,
                symbol TEXT,
                PRIMARY KEY (file_path, start_line, end_line),
                FOREIGN KEY (file_path) REFERENCES files(file_path) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS workspace_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_path);
            CREATE INDEX IF NOT EXISTS idx_chunks_point ON chunks(point_id);
            ",
        )?;
        Ok(())
    }

    pub fn get_file(&self, path: &str) -> EngineResult<Option<FileRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT file_path, mtime, size, file_hash, last_indexed_at, last_error
                 FROM files WHERE file_path = ?1",
                params![path],
                |row| {
                    Ok(FileRecord {
                        file_path: row.get(0)?,
                        mtime: row.get(1)?,
                        size: row.get(2)?,
                        file_hash: row.get(3)?,
                        last_indexed_at: row.get(4)?,
                        last_error: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn upsert_file(
        &self,
        path: &str,
        mtime: f64,
        size: u64,
        file_hash: &str,
        last_error: Option<&str>,
    ) -> EngineResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO files (file_path, mtime, size, file_hash, last_indexed_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(file_path) DO UPDATE SET
                mtime = excluded.mtime,
                size = excluded.size,
                file_hash = excluded.file_hash,
                last_indexed_at = excluded.last_indexed_at,
                last_error = excluded.last_error",
            params![path, mtime, size as i64, file_hash, now_unix(), last_error],
        )?;
        Ok(())
    }

    /// Cascades to `chunks` via the foreign key.
    pub fn delete_file(&self, path: &str) -> EngineResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM files WHERE file_path = ?1", params![path])?;
        Ok(())
    }

    /// Leaves the `FileRecord` in place; only removes its chunks.
    pub fn delete_file_chunks(&self, path: &str) -> EngineResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM chunks WHERE file_path = ?1", params![path])?;
        Ok(())
    }

    pub fn upsert_chunks(&self, chunks: &[IndexedChunk]) -> EngineResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks
                    (file_path, start_line, end_line, chunk_hash, point_id, chunk_idx, language, kind, symbol)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(file_path, start_line, end_line) DO UPDATE SET
                    chunk_hash = excluded.chunk_hash,
                    point_id = excluded.point_id,
                    chunk_idx = excluded.chunk_idx,
                    language = excluded.language,
                    kind = excluded.kind,
                    symbol = excluded.symbol",
            )?;
            for c in chunks {
                stmt.execute(params![
                    c.file_path,
                    c.start_line,
                    c.end_line,
                    c.chunk_hash,
                    c.point_id.to_string(),
                    c.chunk_idx,
                    c.language,
                    kind_to_str(c.kind),
                    c.symbol,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_chunk_by_position(
        &self,
        path: &str,
        start_line: u32,
        end_line: u32,
    ) -> EngineResult<Option<IndexedChunk>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT file_path, start_line, end_line, chunk_hash, point_id, chunk_idx, language, kind, symbol
                 FROM chunks WHERE file_path = ?1 AND start_line = ?2 AND end_line = ?3",
                params![path, start_line, end_line],
                row_to_indexed_chunk,
            )
            .optional()?;
        Ok(row)
    }

    /// Rows with `chunk_idx ∈ {idx-1, idx+1}` for `path`, ordered by `chunk_idx`.
    pub fn get_neighbor_chunks(&self, path: &str, idx: i64) -> EngineResult<Vec<IndexedChunk>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT file_path, start_line, end_line, chunk_hash, point_id, chunk_idx, language, kind, symbol
             FROM chunks WHERE file_path = ?1 AND chunk_idx IN (?2, ?3)
             ORDER BY chunk_idx",
        )?;
        let rows = stmt
            .query_map(params![path, idx - 1, idx + 1], row_to_indexed_chunk)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_stats(&self) -> EngineResult<(u64, u64)> {
        let conn = self.conn.lock().unwrap();
        let files: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        let chunks: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        Ok((files as u64, chunks as u64))
    }

    pub fn set_workspace_meta(&self, key: &str, value: &str) -> EngineResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO workspace_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_workspace_meta(&self, key: &str) -> EngineResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM workspace_meta WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// All file paths currently tracked, used by `run_scan` to prune records
    /// for files no longer present on disk.
    pub fn list_file_paths(&self) -> EngineResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT file_path FROM files")?;
        let rows = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Held across a file's erase-then-insert sequence so no other writer
    /// interleaves a mutation for the same file between the two phases.
    pub fn lock_writer(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.writer_lock.lock()
    }
}

fn kind_to_str(kind: ChunkKind) -> &'static str {
    match kind {
        ChunkKind::Code => "code",
        ChunkKind::Doc => "doc",
        ChunkKind::Config => "config",
    }
}

fn kind_from_str(s: &str) -> ChunkKind {
    match s {
        "doc" => ChunkKind::Doc,
        "config" => ChunkKind::Config,
        _ => ChunkKind::Code,
    }
}

fn row_to_indexed_chunk(row: &rusqlite::Row) -> rusqlite::Result<IndexedChunk> {
    let point_id: String = row.get(4)?;
    let kind: String = row.get(7)?;
    Ok(IndexedChunk {
        file_path: row.get(0)?,
        start_line: row.get(1)?,
        end_line: row.get(2)?,
        chunk_hash: row.get(3)?,
        point_id: Uuid::parse_str(&point_id).unwrap_or_default(),
        chunk_idx: row.get(5)?,
        language: row.get(6)?,
        kind: kind_from_str(&kind),
        symbol: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::compute_point_id;

    fn sample_chunk(path: &str, idx: u32) -> IndexedChunk {
        IndexedChunk {
            file_path: path.to_string(),
            start_line: idx * 10 + 1,
            end_line: idx * 10 + 5,
            chunk_hash: "abc0123456789def".to_string(),
            point_id: compute_point_id(Uuid::nil(), path, idx * 10 + 1, idx * 10 + 5),
            chunk_idx: idx,
            language: Some("python".to_string()),
            kind: ChunkKind::Code,
            symbol: None,
        }
    }

    #[test]
    fn upsert_file_then_get_file_round_trips() {
        let cat = Catalog::open_in_memory().unwrap();
        cat.upsert_file("main.py", 100.0, 3, "hash123", None).unwrap();
        let record = cat.get_file("main.py").unwrap().unwrap();
        assert_eq!(record.mtime, 100.0);
        assert_eq!(record.size, 3);
        assert_eq!(record.file_hash, "hash123");
    }

    #[test]
    fn delete_file_cascades_to_chunks() {
        let cat = Catalog::open_in_memory().unwrap();
        cat.upsert_file("main.py", 100.0, 3, "hash123", None).unwrap();
        cat.upsert_chunks(&[sample_chunk("main.py", 0)]).unwrap();
        cat.delete_file("main.py").unwrap();
        assert!(cat
            .get_chunk_by_position("main.py", 1, 5)
            .unwrap()
            .is_none());
    }

    #[test]
    fn delete_file_chunks_keeps_file_record() {
        let cat = Catalog::open_in_memory().unwrap();
        cat.upsert_file("main.py", 100.0, 3, "hash123", None).unwrap();
        cat.upsert_chunks(&[sample_chunk("main.py", 0)]).unwrap();
        cat.delete_file_chunks("main.py").unwrap();
        assert!(cat.get_file("main.py").unwrap().is_some());
        assert!(cat
            .get_chunk_by_position("main.py", 1, 5)
            .unwrap()
            .is_none());
    }

    #[test]
    fn wholesale_replace_shrinks_chunk_count() {
        let cat = Catalog::open_in_memory().unwrap();
        cat.upsert_file("main.py", 100.0, 3, "hash123", None).unwrap();
        cat.upsert_chunks(&[
            sample_chunk("main.py", 0),
            sample_chunk("main.py", 1),
            sample_chunk("main.py", 2),
        ])
        .unwrap();
        cat.delete_file_chunks("main.py").unwrap();
        cat.upsert_chunks(&[sample_chunk("main.py", 0)]).unwrap();
        let (_, chunks) = cat.get_stats().unwrap();
        assert_eq!(chunks, 1);
    }

    #[test]
    fn neighbor_chunks_are_ordered() {
        let cat = Catalog::open_in_memory().unwrap();
        cat.upsert_file("main.py", 100.0, 3, "hash123", None).unwrap();
        cat.upsert_chunks(&[
            sample_chunk("main.py", 0),
            sample_chunk("main.py", 1),
            sample_chunk("main.py", 2),
        ])
        .unwrap();
        let neighbors = cat.get_neighbor_chunks("main.py", 1).unwrap();
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].chunk_idx, 0);
        assert_eq!(neighbors[1].chunk_idx, 2);
    }

    #[test]
    fn workspace_meta_round_trips() {
        let cat = Catalog::open_in_memory().unwrap();
        cat.set_workspace_meta("last_scan_generation", "3").unwrap();
        assert_eq!(
            cat.get_workspace_meta("last_scan_generation").unwrap(),
            Some("3".to_string())
        );
    }
}
