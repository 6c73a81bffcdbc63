use crate::error::{ErrorKind, Result};
use blobdir_codec::{Algorithm, Compression, DEFAULT_ITERATIONS, Secret};
use blobdir_store::{Database, ExtractorHandle, ExtractorKind, FileExtractor, FileStore, MAX_CONNECTIONS};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

/// Prefix of environment variables overriding file settings.
pub const ENV_PREFIX: &str = "BLOBDIR_";
/// Name of the config file looked up in the platform config directory.
pub const FILE_NAME: &str = "blobdir.toml";

/// Everything needed to open a [`FileStore`].
///
/// Missing fields take their defaults, so an empty file (or no file at all)
/// is a valid configuration.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database file, created if missing.
    pub database: PathBuf,
    pub table: String,
    /// Attached database the table lives in.
    pub schema: Option<String>,
    pub compression: Compression,
    pub algorithm: Algorithm,
    pub extractor: ExtractorKind,
    /// Where the file extractor spools content; the system temp directory
    /// when unset.
    pub spool_dir: Option<PathBuf>,
    /// Encrypt new content and read encrypted content with this secret.
    pub encryption_secret: Option<String>,
    pub kdf_iterations: u32,
    pub max_connections: u32,
    /// Create the table on open if it doesn't exist.
    pub create_table: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("blobdir.db"),
            table: "files".to_string(),
            schema: None,
            compression: Compression::default(),
            algorithm: Algorithm::default(),
            extractor: ExtractorKind::default(),
            spool_dir: None,
            encryption_secret: None,
            kdf_iterations: DEFAULT_ITERATIONS,
            max_connections: MAX_CONNECTIONS,
            create_table: true,
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("database", &self.database)
            .field("table", &self.table)
            .field("schema", &self.schema)
            .field("compression", &self.compression)
            .field("algorithm", &self.algorithm)
            .field("extractor", &self.extractor)
            .field("spool_dir", &self.spool_dir)
            .field("encryption_secret", &self.encryption_secret.as_ref().map(|_| "<redacted>"))
            .field("kdf_iterations", &self.kdf_iterations)
            .field("max_connections", &self.max_connections)
            .field("create_table", &self.create_table)
            .finish()
    }
}

impl Settings {
    /// Default config file location, if the platform has a config directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "blobdir").map(|dirs| dirs.config_dir().join(FILE_NAME))
    }

    /// Layer defaults, a config file and the environment.
    ///
    /// An explicit `path` must exist; the default location is skipped when
    /// there's nothing there.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let file = match path {
            Some(path) if !path.is_file() => {
                exn::bail!(ErrorKind::Invalid(format!("config file {} does not exist", path.display())))
            },
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|path| path.is_file()),
        };
        let mut figment = Figment::new();
        if let Some(file) = file {
            tracing::debug!(path = %file.display(), "loading configuration file");
            figment = match file.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file(&file)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(&file)),
                Some("json") => figment.merge(Json::file(&file)),
                _ => exn::bail!(ErrorKind::Invalid(format!(
                    "config file {} must end in .toml, .yaml, .yml or .json",
                    file.display()
                ))),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings: Self = Self::figment(path)?.extract().or_raise(|| ErrorKind::Load)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check what can be checked without touching the database.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            exn::bail!(ErrorKind::Invalid("max_connections must be at least 1".to_string()));
        }
        blobdir_store::TableRef::new(&self.table).or_raise(|| ErrorKind::Invalid(format!("table {:?}", self.table)))?;
        if let Some(schema) = &self.schema {
            blobdir_store::quote_identifier(schema).or_raise(|| ErrorKind::Invalid(format!("schema {schema:?}")))?;
        }
        self.secret()?;
        Ok(())
    }

    fn secret(&self) -> Result<Option<Secret>> {
        let Some(secret) = &self.encryption_secret else {
            return Ok(None);
        };
        let secret = Secret::new(secret)
            .and_then(|secret| secret.with_iterations(self.kdf_iterations))
            .or_raise(|| ErrorKind::Invalid("encryption_secret or kdf_iterations".to_string()))?;
        Ok(Some(secret))
    }

    fn extractor_handle(&self) -> ExtractorHandle {
        match (self.extractor, &self.spool_dir) {
            (ExtractorKind::File, Some(dir)) => Arc::new(FileExtractor::in_dir(dir)),
            (kind, _) => kind.handle(),
        }
    }

    /// Connect the database and build the configured store.
    #[instrument(skip(self), fields(database = %self.database.display(), table = %self.table))]
    pub async fn open(&self) -> Result<FileStore> {
        self.validate()?;
        let db = Database::connect(&self.database, Some(self.max_connections))
            .await
            .or_raise(|| ErrorKind::Store)?;
        let mut store = FileStore::new(db.pool().clone(), &self.table, self.extractor_handle())
            .or_raise(|| ErrorKind::Store)?
            .with_compression(self.compression)
            .with_algorithm(self.algorithm);
        if let Some(schema) = &self.schema {
            store = store.with_schema(schema).or_raise(|| ErrorKind::Store)?;
        }
        if let Some(secret) = self.secret()? {
            store = store.with_secret(secret);
        }
        if self.create_table {
            store.ensure_table().await.or_raise(|| ErrorKind::Store)?;
        }
        tracing::info!(extractor = %self.extractor, encrypted = store.config().is_encrypted(), "opened file store");
        Ok(store)
    }
}
