#![allow(dead_code)]

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

pub const DIR_MIME: &str = "application/x.wd.dir";

/// Appliance-shaped workspace: a `Files` database, a sharded content store
/// and an empty destination, all under one temp directory.
pub struct Fixture {
    _dir: TempDir,
    pub db: PathBuf,
    pub source: PathBuf,
    pub dest: PathBuf,
    pub root: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let db = root.join("index.db");
        let source = root.join("source");
        let dest = root.join("destination");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&dest).unwrap();
        create_files_table(&Connection::open(&db).unwrap());
        Self {
            _dir: dir,
            db,
            source,
            dest,
            root,
        }
    }

    /// `auth0|deadbeef (dir) -> folder1 (dir) -> photo.jpg (abc123)`
    pub fn photo_tree() -> Self {
        let fx = Self::new();
        fx.add_dir("1", "auth0|deadbeef", None);
        fx.add_dir("2", "folder1", Some("1"));
        fx.add_file("3", "photo.jpg", Some("2"), "abc123");
        fx
    }

    pub fn conn(&self) -> Connection {
        Connection::open(&self.db).unwrap()
    }

    pub fn add_dir(&self, id: &str, name: &str, parent: Option<&str>) {
        self.conn()
            .execute(
                "INSERT INTO Files (id, name, parentID, contentID, mimeType) \
                 VALUES (?1, ?2, ?3, NULL, ?4)",
                params![id, name, parent, DIR_MIME],
            )
            .unwrap();
    }

    pub fn add_file(&self, id: &str, name: &str, parent: Option<&str>, content_id: &str) {
        self.conn()
            .execute(
                "INSERT INTO Files (id, name, parentID, contentID, mimeType) \
                 VALUES (?1, ?2, ?3, ?4, 'image/jpeg')",
                params![id, name, parent, content_id],
            )
            .unwrap();
    }

    pub fn add_file_with_time(
        &self,
        id: &str,
        name: &str,
        parent: Option<&str>,
        content_id: &str,
        image_date: i64,
    ) {
        self.conn()
            .execute(
                "INSERT INTO Files (id, name, parentID, contentID, imageDate, mimeType) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 'image/jpeg')",
                params![id, name, parent, content_id, image_date],
            )
            .unwrap();
    }

    /// Blob in the sharded layout: `source/<first char>/<content id>`.
    pub fn add_blob(&self, content_id: &str, bytes: &[u8]) -> PathBuf {
        let shard = self.source.join(&content_id[..1]);
        fs::create_dir_all(&shard).unwrap();
        let path = shard.join(content_id);
        fs::write(&path, bytes).unwrap();
        path
    }

    pub fn add_flat_blob(&self, content_id: &str, bytes: &[u8]) -> PathBuf {
        let path = self.source.join(content_id);
        fs::write(&path, bytes).unwrap();
        path
    }

    pub fn write_dest(&self, rel: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dest.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, bytes).unwrap();
        path
    }
}

pub fn create_files_table(conn: &Connection) {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS Files (
            id TEXT PRIMARY KEY,
            name TEXT,
            parentID TEXT,
            contentID TEXT,
            imageDate INTEGER,
            videoDate INTEGER,
            cTime INTEGER,
            birthTime INTEGER,
            mimeType TEXT
        );",
    )
    .unwrap();
}

pub fn count_files(dir: &Path) -> usize {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .count()
}
