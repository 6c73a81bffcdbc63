//! Incremental I/O on one row's `file_contents` cell.
//!
//! sqlx exposes no wrapper for SQLite's `sqlite3_blob_*` interface, so these
//! calls go through the raw connection handle while the connection's worker
//! thread is parked by [`lock_handle`](sqlx::SqliteConnection::lock_handle).
//! Every FFI call is made under that lock, and no raw pointer or lock guard
//! is held across an `.await`.
//!
//! A blob handle reads or writes a fixed-size cell in place: each call costs
//! only the bytes it moves, however large the cell is. Writers size the cell
//! up front with `zeroblob(n)`.

use crate::table::TableRef;
use derive_more::{Display, Error};
use libsqlite3_sys as ffi;
use sqlx::{Sqlite, Transaction};
use std::ffi::{CStr, CString, c_int, c_void};
use std::ptr::NonNull;

const CONTENT_COLUMN: &CStr = c"file_contents";
const MAIN_SCHEMA: &str = "main";

#[derive(Debug, Display, Error)]
pub(crate) enum CellError {
    #[display("{_0}")]
    Database(sqlx::Error),
    #[display("sqlite error {code}: {message}")]
    Sqlite { code: c_int, message: String },
    #[display("table or schema name contains NUL")]
    InvalidName,
    #[display("cell access out of range")]
    OutOfRange,
    #[display("cell already closed")]
    Closed,
}

#[derive(Clone, Copy)]
struct BlobPtr(NonNull<ffi::sqlite3_blob>);

// SAFETY: SQLite only requires that a blob handle is not used concurrently
// with its connection; every use happens while that connection is locked.
unsafe impl Send for BlobPtr {}

/// An open blob handle on one cell, together with the transaction it lives
/// in.
///
/// Call [`finish`](Self::finish) to close the handle and get the transaction
/// back. Dropping the cell instead closes the handle and rolls the
/// transaction back.
pub(crate) struct BlobCell {
    tx: Option<Transaction<'static, Sqlite>>,
    blob: Option<BlobPtr>,
    size: u64,
}

impl BlobCell {
    /// Open the content cell of the row with id `rowid`.
    pub(crate) async fn open(
        mut tx: Transaction<'static, Sqlite>,
        table: &TableRef,
        rowid: i64,
        writable: bool,
    ) -> Result<Self, CellError> {
        let schema = CString::new(table.schema().unwrap_or(MAIN_SCHEMA)).map_err(|_| CellError::InvalidName)?;
        let name = CString::new(table.table()).map_err(|_| CellError::InvalidName)?;

        let (blob, size) = {
            let mut handle = tx.lock_handle().await.map_err(CellError::Database)?;
            let db = handle.as_raw_handle().as_ptr();
            let mut raw: *mut ffi::sqlite3_blob = std::ptr::null_mut();
            // SAFETY: `db` is exclusively ours while `handle` is held, and the
            // name strings outlive the call.
            let rc = unsafe {
                ffi::sqlite3_blob_open(
                    db,
                    schema.as_ptr(),
                    name.as_ptr(),
                    CONTENT_COLUMN.as_ptr(),
                    rowid,
                    c_int::from(writable),
                    &mut raw,
                )
            };
            check(db, rc)?;
            let blob = NonNull::new(raw).ok_or(CellError::Sqlite {
                code: ffi::SQLITE_MISUSE,
                message: "no blob handle returned".to_string(),
            })?;
            // SAFETY: `blob` was just opened on the locked connection.
            let bytes = unsafe { ffi::sqlite3_blob_bytes(blob.as_ptr()) };
            (BlobPtr(blob), u64::try_from(bytes).unwrap_or(0))
        };
        Ok(Self {
            tx: Some(tx),
            blob: Some(blob),
            size,
        })
    }

    /// Length of the cell in bytes. Fixed for the lifetime of the handle.
    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    /// Read `len` bytes starting at `offset`.
    pub(crate) async fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, CellError> {
        let (offset, count) = self.range(offset, len)?;
        let blob = self.blob.ok_or(CellError::Closed)?;
        let tx = self.tx.as_mut().ok_or(CellError::Closed)?;
        let mut buffer = vec![0u8; len];

        let mut handle = tx.lock_handle().await.map_err(CellError::Database)?;
        let db = handle.as_raw_handle().as_ptr();
        // SAFETY: the connection is locked, the range was checked against the
        // cell size, and `buffer` holds exactly `count` bytes.
        let rc = unsafe { ffi::sqlite3_blob_read(blob.0.as_ptr(), buffer.as_mut_ptr().cast::<c_void>(), count, offset) };
        check(db, rc)?;
        Ok(buffer)
    }

    /// Overwrite the bytes starting at `offset` with `data`.
    pub(crate) async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), CellError> {
        let (offset, count) = self.range(offset, data.len())?;
        let blob = self.blob.ok_or(CellError::Closed)?;
        let tx = self.tx.as_mut().ok_or(CellError::Closed)?;

        let mut handle = tx.lock_handle().await.map_err(CellError::Database)?;
        let db = handle.as_raw_handle().as_ptr();
        // SAFETY: as in `read_at`; SQLite only reads from `data`.
        let rc = unsafe { ffi::sqlite3_blob_write(blob.0.as_ptr(), data.as_ptr().cast::<c_void>(), count, offset) };
        check(db, rc)
    }

    /// Close the blob handle and hand back the transaction, ready to commit.
    pub(crate) async fn finish(mut self) -> Result<Transaction<'static, Sqlite>, CellError> {
        if let Some(tx) = self.tx.as_mut() {
            let mut handle = tx.lock_handle().await.map_err(CellError::Database)?;
            let db = handle.as_raw_handle().as_ptr();
            if let Some(blob) = self.blob.take() {
                // SAFETY: the connection is locked and the handle is not used again.
                let rc = unsafe { ffi::sqlite3_blob_close(blob.0.as_ptr()) };
                check(db, rc)?;
            }
        }
        self.tx.take().ok_or(CellError::Closed)
    }

    /// Validate a byte range and convert it to SQLite's argument types.
    fn range(&self, offset: u64, len: usize) -> Result<(c_int, c_int), CellError> {
        let end = offset.checked_add(len as u64).ok_or(CellError::OutOfRange)?;
        if end > self.size {
            return Err(CellError::OutOfRange);
        }
        let offset = c_int::try_from(offset).map_err(|_| CellError::OutOfRange)?;
        let count = c_int::try_from(len).map_err(|_| CellError::OutOfRange)?;
        Ok((offset, count))
    }
}

impl Drop for BlobCell {
    fn drop(&mut self) {
        let (Some(blob), Some(tx)) = (self.blob.take(), self.tx.as_mut()) else {
            return;
        };
        // The worker answers the lock request from its own thread, so this
        // doesn't need the async runtime to make progress.
        match futures::executor::block_on(tx.lock_handle()) {
            Ok(_handle) => {
                // SAFETY: the connection is locked and the handle is not used again.
                unsafe { ffi::sqlite3_blob_close(blob.0.as_ptr()) };
            },
            Err(err) => tracing::warn!(error = %err, "could not lock connection to close blob handle"),
        }
    }
}

fn check(db: *mut ffi::sqlite3, rc: c_int) -> Result<(), CellError> {
    if rc == ffi::SQLITE_OK {
        return Ok(());
    }
    // SAFETY: `db` is a live, locked connection; the message is copied out
    // before the lock is released.
    let message = unsafe { CStr::from_ptr(ffi::sqlite3_errmsg(db)) }
        .to_string_lossy()
        .into_owned();
    Err(CellError::Sqlite { code: rc, message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use sqlx::SqlitePool;

    async fn row(pool: &SqlitePool, table: &TableRef, size: i64) -> i64 {
        sqlx::query(&table.queries().create_table).execute(pool).await.unwrap();
        sqlx::query(&format!(
            "INSERT INTO {table} (filename, content_length, file_contents, last_modified, compressed) \
             VALUES ('cell', 0, zeroblob(?1), 0, 0)"
        ))
        .bind(size)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    async fn contents(pool: &SqlitePool, table: &TableRef) -> Vec<u8> {
        sqlx::query_scalar(&format!("SELECT file_contents FROM {table} WHERE filename = 'cell'"))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_write_then_read_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(dir.path().join("cell.db"), None).await.unwrap();
        let table = TableRef::new("cells").unwrap();
        let rowid = row(db.pool(), &table, 10).await;

        let tx = db.pool().begin().await.unwrap();
        let mut cell = BlobCell::open(tx, &table, rowid, true).await.unwrap();
        assert_eq!(cell.size(), 10);
        cell.write_at(0, b"hello").await.unwrap();
        cell.write_at(5, b"world").await.unwrap();
        assert_eq!(cell.read_at(3, 4).await.unwrap(), b"lowo");
        cell.finish().await.unwrap().commit().await.unwrap();
        assert_eq!(contents(db.pool(), &table).await, b"helloworld");

        let tx = db.pool().begin().await.unwrap();
        let mut cell = BlobCell::open(tx, &table, rowid, false).await.unwrap();
        assert!(matches!(cell.read_at(8, 3).await.unwrap_err(), CellError::OutOfRange));
        assert!(matches!(cell.write_at(0, b"x").await.unwrap_err(), CellError::Sqlite { .. }));
        assert_eq!(cell.read_at(0, 10).await.unwrap(), b"helloworld");
        cell.finish().await.unwrap().commit().await.unwrap();
        db.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dropping_an_open_cell_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(dir.path().join("cell.db"), None).await.unwrap();
        let table = TableRef::new("cells").unwrap();
        let rowid = row(db.pool(), &table, 4).await;

        let tx = db.pool().begin().await.unwrap();
        let mut cell = BlobCell::open(tx, &table, rowid, true).await.unwrap();
        cell.write_at(0, b"lost").await.unwrap();
        drop(cell);
        assert_eq!(contents(db.pool(), &table).await, [0u8; 4]);
        db.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_row() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(dir.path().join("cell.db"), None).await.unwrap();
        let table = TableRef::new("cells").unwrap();
        let rowid = row(db.pool(), &table, 1).await;

        let tx = db.pool().begin().await.unwrap();
        let err = BlobCell::open(tx, &table, rowid + 1, false).await.err().unwrap();
        assert!(matches!(err, CellError::Sqlite { .. }));
        db.close().await;
    }
}
