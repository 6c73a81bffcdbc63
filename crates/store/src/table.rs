//! Table naming and the SQL rendered against it.

use crate::error::{ErrorKind, Result};
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::sync::Arc;

const TABLE_PLACEHOLDER: &str = "{table}";

/// Quote a name as an SQL identifier, doubling any embedded quote.
pub fn quote_identifier(name: &str) -> Result<String> {
    if name.is_empty() {
        exn::bail!(ErrorKind::InvalidArgument("identifier must not be empty".to_string()));
    }
    if name.contains('\0') {
        exn::bail!(ErrorKind::InvalidArgument("identifier must not contain NUL".to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Every statement the store runs, rendered once per table.
pub(crate) struct Queries {
    pub create_table: String,
    pub insert_file: String,
    pub select_file: String,
    pub list_files: String,
    pub exists_file: String,
    pub open_blob: String,
    pub rename_file: String,
    pub delete_file: String,
}

impl Queries {
    fn render(qualified: &str) -> Self {
        let render = |sql: &str| sql.trim().replace(TABLE_PLACEHOLDER, qualified);
        Self {
            create_table: render(include_str!("../queries/create_table.sql")),
            insert_file: render(include_str!("../queries/insert_file.sql")),
            select_file: render(include_str!("../queries/select_file.sql")),
            list_files: render(include_str!("../queries/list_files.sql")),
            exists_file: render(include_str!("../queries/exists_file.sql")),
            open_blob: render(include_str!("../queries/open_blob.sql")),
            rename_file: render(include_str!("../queries/rename_file.sql")),
            delete_file: render(include_str!("../queries/delete_file.sql")),
        }
    }
}

/// A table, optionally qualified by a schema (an attached database in SQLite).
#[derive(Clone)]
pub struct TableRef {
    table: String,
    schema: Option<String>,
    qualified: String,
    queries: Arc<Queries>,
}

impl TableRef {
    pub fn new(table: &str) -> Result<Self> {
        Self::build(table.to_string(), None)
    }

    /// Same table, qualified by `schema`.
    pub fn with_schema(&self, schema: &str) -> Result<Self> {
        Self::build(self.table.clone(), Some(schema.to_string()))
    }

    fn build(table: String, schema: Option<String>) -> Result<Self> {
        let quoted = quote_identifier(&table)?;
        let qualified = match &schema {
            Some(schema) => format!("{}.{quoted}", quote_identifier(schema)?),
            None => quoted,
        };
        let queries = Arc::new(Queries::render(&qualified));
        Ok(Self {
            table,
            schema,
            qualified,
            queries,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Quoted, schema-qualified name as it appears in SQL.
    pub fn qualified(&self) -> &str {
        &self.qualified
    }

    pub(crate) fn queries(&self) -> &Queries {
        &self.queries
    }
}

impl Display for TableRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.qualified)
    }
}

impl Debug for TableRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_tuple("TableRef").field(&self.qualified).finish()
    }
}
