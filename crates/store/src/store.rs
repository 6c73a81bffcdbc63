use crate::blob::RawBlob;
use crate::error::{ErrorKind, Result};
use crate::extract::ExtractorHandle;
use crate::models::{FileMeta, FileRow};
use crate::pattern::Filter;
use crate::resource::Resource;
use crate::source::ContentSource;
use crate::stream::ContentStream;
use crate::table::TableRef;
use crate::writer;
use blobdir_codec::{Algorithm, Compression, Decoder, Encoder, Secret};
use exn::ResultExt;
use sqlx::SqlitePool;
use tracing::instrument;

/// How a [`FileStore`] names its table and encodes new content.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    table: TableRef,
    compression: Compression,
    algorithm: Algorithm,
    secret: Option<Secret>,
    extractor: ExtractorHandle,
}

impl StoreConfig {
    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn is_encrypted(&self) -> bool {
        self.secret.is_some()
    }

    pub fn extractor(&self) -> &ExtractorHandle {
        &self.extractor
    }

    fn encoder(&self) -> Encoder {
        Encoder::new(self.compression, self.algorithm, self.secret.clone())
    }

    fn decoder(&self) -> Decoder {
        Decoder::new(self.secret.clone())
    }
}

/// A directory of files kept as rows of one database table.
///
/// Configuration is immutable: the `with_*` methods return a new store and
/// leave this one untouched. Stores are cheap to clone and share the pool.
///
/// Compression and encryption settings only affect files stored from now on.
/// Each row records how it was encoded, so files written under earlier
/// settings stay readable (given the right secret).
#[derive(Clone, Debug)]
pub struct FileStore {
    pool: SqlitePool,
    config: StoreConfig,
}

impl FileStore {
    pub fn new(pool: SqlitePool, table: &str, extractor: ExtractorHandle) -> Result<Self> {
        Ok(Self {
            pool,
            config: StoreConfig {
                table: TableRef::new(table)?,
                compression: Compression::default(),
                algorithm: Algorithm::default(),
                secret: None,
                extractor,
            },
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn with_config(&self, config: StoreConfig) -> Self {
        Self {
            pool: self.pool.clone(),
            config,
        }
    }

    pub fn with_compression(&self, compression: Compression) -> Self {
        self.with_config(StoreConfig {
            compression,
            ..self.config.clone()
        })
    }

    pub fn with_algorithm(&self, algorithm: Algorithm) -> Self {
        self.with_config(StoreConfig {
            algorithm,
            ..self.config.clone()
        })
    }

    /// Encrypt new content with `secret` (default key derivation cost), and
    /// use it to read encrypted content.
    pub fn with_encryption(&self, secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = Secret::new(secret).map_err(ErrorKind::codec)?;
        Ok(self.with_secret(secret))
    }

    pub fn with_secret(&self, secret: Secret) -> Self {
        self.with_config(StoreConfig {
            secret: Some(secret),
            ..self.config.clone()
        })
    }

    /// Qualify the table with `schema` (an attached database in SQLite).
    pub fn with_schema(&self, schema: &str) -> Result<Self> {
        Ok(self.with_config(StoreConfig {
            table: self.config.table.with_schema(schema)?,
            ..self.config.clone()
        }))
    }

    pub fn with_extractor(&self, extractor: ExtractorHandle) -> Self {
        self.with_config(StoreConfig {
            extractor,
            ..self.config.clone()
        })
    }

    /// Create the table if it doesn't exist yet.
    #[instrument(skip(self), fields(table = %self.config.table))]
    pub async fn ensure_table(&self) -> Result<()> {
        sqlx::query(&self.config.table.queries().create_table)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Storage)?;
        Ok(())
    }

    /// Store content from `source` under a new `filename`.
    ///
    /// Fails with [`AlreadyExists`](ErrorKind::AlreadyExists) without reading
    /// the source if the name is taken.
    pub async fn store(&self, source: &dyn ContentSource, filename: &str) -> Result<Resource> {
        check_filename(filename)?;
        let meta = writer::write(&self.pool, &self.config.table, &self.config.encoder(), source, filename).await?;
        Ok(Resource::new(self.clone(), meta))
    }

    /// Files matching any of `globs`, ordered by filename. No globs lists
    /// everything.
    #[instrument(skip_all, fields(table = %self.config.table, globs = globs.len(), found))]
    pub async fn list<S: AsRef<str>>(&self, globs: &[S]) -> Result<Vec<Resource>> {
        let filter = Filter::new(globs);
        let sql = format!(
            "{}{} ORDER BY filename",
            self.config.table.queries().list_files,
            filter.where_clause()
        );
        let mut query = sqlx::query_as::<_, FileRow>(&sql);
        for pattern in filter.patterns() {
            query = query.bind(pattern);
        }
        let rows = query.fetch_all(&self.pool).await.or_raise(|| ErrorKind::Storage)?;
        tracing::Span::current().record("found", rows.len());
        rows.into_iter()
            .map(|row| FileMeta::try_from(row).map(|meta| Resource::new(self.clone(), meta)))
            .collect()
    }

    #[instrument(skip(self), fields(table = %self.config.table))]
    pub async fn get(&self, filename: &str) -> Result<Resource> {
        check_filename(filename)?;
        let row: Option<FileRow> = sqlx::query_as(&self.config.table.queries().select_file)
            .bind(filename)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Storage)?;
        match row {
            Some(row) => Ok(Resource::new(self.clone(), FileMeta::try_from(row)?)),
            None => exn::bail!(ErrorKind::NotFound(filename.to_string())),
        }
    }

    pub async fn exists(&self, filename: &str) -> Result<bool> {
        check_filename(filename)?;
        sqlx::query_scalar(&self.config.table.queries().exists_file)
            .bind(filename)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Storage)
    }

    /// Rename `from` to `to` in a single statement.
    #[instrument(skip(self), fields(table = %self.config.table))]
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        check_filename(from)?;
        check_filename(to)?;
        let result = sqlx::query(&self.config.table.queries().rename_file)
            .bind(from)
            .bind(to)
            .execute(&self.pool)
            .await
            .map_err(|err| ErrorKind::database(err, to))?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::NotFound(from.to_string()));
        }
        tracing::info!("renamed file");
        Ok(())
    }

    #[instrument(skip(self), fields(table = %self.config.table))]
    pub async fn delete(&self, filename: &str) -> Result<()> {
        check_filename(filename)?;
        let result = sqlx::query(&self.config.table.queries().delete_file)
            .bind(filename)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Storage)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::NotFound(filename.to_string()));
        }
        tracing::info!("deleted file");
        Ok(())
    }

    /// Open `filename` through the configured extractor.
    #[instrument(skip(self), fields(table = %self.config.table, extractor = self.config.extractor.name()))]
    pub(crate) async fn open_stream(&self, filename: &str) -> Result<ContentStream> {
        let blob = RawBlob::open(&self.pool, &self.config.table, filename).await?;
        self.config.extractor.extract(blob, self.config.decoder()).await
    }
}

fn check_filename(filename: &str) -> Result<()> {
    if filename.is_empty() {
        exn::bail!(ErrorKind::InvalidArgument("filename must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
