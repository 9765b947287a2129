use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::driver::{Driver, Row};
use crate::error::DbError;
use crate::sql;
use crate::validation::InputRule;

/// Schemas that structural commands refuse to drop or rename.
pub const SYSTEM_SCHEMAS: [&str; 4] = ["information_schema", "mysql", "performance_schema", "sys"];

#[must_use]
pub fn is_system_schema(name: &str) -> bool {
    SYSTEM_SCHEMAS
        .iter()
        .any(|schema| schema.eq_ignore_ascii_case(name))
}

/// Registered connections live behind an async mutex. Holding the lock for
/// a whole command keeps statement sequences on one session from
/// interleaving.
pub type SharedConnection<D> = Arc<Mutex<Connection<D>>>;

/// Connected flag readable without taking the session lock.
#[derive(Debug, Clone, Default)]
pub struct SessionStatus {
    connected: Arc<AtomicBool>,
}

impl SessionStatus {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    /// Columns are taken from the first row; an empty result has none.
    #[must_use]
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = rows
            .first()
            .map(|row| row.column_names().map(str::to_string).collect())
            .unwrap_or_default();
        Self { columns, rows }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: String,
    pub collation: Option<String>,
    pub nullable: bool,
    pub key: String,
    pub default_value: Option<String>,
    pub extra: String,
    pub comment: String,
}

impl ColumnInfo {
    fn from_row(row: &Row) -> Self {
        Self {
            name: text(row, "Field"),
            column_type: text(row, "Type"),
            collation: row.get("Collation").map(str::to_string),
            nullable: row
                .get("Null")
                .is_some_and(|value| value.eq_ignore_ascii_case("YES")),
            key: text(row, "Key"),
            default_value: row.get("Default").map(str::to_string),
            extra: text(row, "Extra"),
            comment: text(row, "Comment"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub column: String,
    pub unique: bool,
    pub sequence: u32,
    pub index_type: String,
}

impl IndexInfo {
    fn from_row(row: &Row) -> Self {
        Self {
            name: text(row, "Key_name"),
            column: text(row, "Column_name"),
            unique: row.get("Non_unique") == Some("0"),
            sequence: number(row, "Seq_in_index").unwrap_or_default(),
            index_type: text(row, "Index_type"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub engine: Option<String>,
    pub row_format: Option<String>,
    pub rows: Option<u64>,
    pub data_length: Option<u64>,
    pub index_length: Option<u64>,
    pub auto_increment: Option<u64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub collation: Option<String>,
    pub comment: String,
}

impl TableInfo {
    fn from_row(row: &Row) -> Self {
        Self {
            name: text(row, "TABLE_NAME"),
            engine: row.get("ENGINE").map(str::to_string),
            row_format: row.get("ROW_FORMAT").map(str::to_string),
            rows: number(row, "TABLE_ROWS"),
            data_length: number(row, "DATA_LENGTH"),
            index_length: number(row, "INDEX_LENGTH"),
            auto_increment: number(row, "AUTO_INCREMENT"),
            created_at: row.get("CREATE_TIME").map(str::to_string),
            updated_at: row.get("UPDATE_TIME").map(str::to_string),
            collation: row.get("TABLE_COLLATION").map(str::to_string),
            comment: text(row, "TABLE_COMMENT"),
        }
    }
}

fn text(row: &Row, column: &str) -> String {
    row.get(column).unwrap_or_default().to_string()
}

fn number<T: std::str::FromStr>(row: &Row, column: &str) -> Option<T> {
    row.get(column).and_then(|value| value.trim().parse().ok())
}

fn first_column(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.value_at(0).map(str::to_string))
        .collect()
}

struct Session<H> {
    handle: Option<H>,
    selected_database: Option<String>,
    status: SessionStatus,
}

/// One server credential set and at most one live session for it.
pub struct Connection<D: Driver> {
    driver: Arc<D>,
    config: ConnectionConfig,
    session: Session<D::Handle>,
}

impl<D: Driver> fmt::Debug for Connection<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .field("selected_database", &self.session.selected_database)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Connection<D> {
    #[must_use]
    pub fn new(driver: Arc<D>, config: ConnectionConfig) -> Self {
        Self {
            driver,
            config,
            session: Session {
                handle: None,
                selected_database: None,
                status: SessionStatus::default(),
            },
        }
    }

    #[must_use]
    pub fn into_shared(self) -> SharedConnection<D> {
        Arc::new(Mutex::new(self))
    }

    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.config.id
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.handle.is_some()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.session.status.clone()
    }

    #[must_use]
    pub fn selected_database(&self) -> Option<&str> {
        self.session.selected_database.as_deref()
    }

    /// Opens the session and proves it with a probe query. A failure leaves
    /// no handle behind. Already connected sessions are left untouched.
    pub async fn connect(&mut self) -> Result<(), DbError> {
        if self.is_connected() {
            debug!(connection = %self.config.name, "connect skipped, session already open");
            return Ok(());
        }

        info!(
            connection = %self.config.name,
            host = %self.config.host,
            port = self.config.port,
            "opening session"
        );
        let mut handle = self.driver.connect(&self.config).await.map_err(|error| {
            warn!(connection = %self.config.name, %error, "connect failed");
            DbError::connection(&error)
        })?;

        if let Err(error) = self.driver.query(&mut handle, sql::PROBE).await {
            warn!(connection = %self.config.name, %error, "liveness probe failed");
            if let Err(close_error) = self.driver.close(handle).await {
                warn!(connection = %self.config.name, error = %close_error, "close after failed probe");
            }
            return Err(DbError::connection(&error));
        }

        self.session.handle = Some(handle);
        self.session.selected_database = None;
        self.session.status.set(true);
        info!(connection = %self.config.name, "session open");
        Ok(())
    }

    /// Best-effort close; the session always ends disconnected.
    pub async fn disconnect(&mut self) {
        self.session.selected_database = None;
        self.session.status.set(false);
        let Some(handle) = self.session.handle.take() else {
            return;
        };

        match self.driver.close(handle).await {
            Ok(()) => info!(connection = %self.config.name, "session closed"),
            Err(error) => {
                warn!(connection = %self.config.name, %error, "session close failed, dropping handle");
            }
        }
    }

    pub async fn reconnect(&mut self) -> Result<(), DbError> {
        self.disconnect().await;
        self.connect().await
    }

    async fn run(&mut self, statement: &str) -> Result<Vec<Row>, DbError> {
        let handle = self
            .session
            .handle
            .as_mut()
            .ok_or(DbError::NotConnected)?;
        debug!(connection = %self.config.name, sql = statement, "executing");
        Ok(self.driver.query(handle, statement).await?)
    }

    fn require_connected(&self) -> Result<(), DbError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(DbError::NotConnected)
        }
    }

    pub async fn list_databases(&mut self) -> Result<Vec<String>, DbError> {
        let rows = self.run(sql::SHOW_DATABASES).await?;
        Ok(first_column(&rows))
    }

    /// Selects `name` server-side after checking it exists.
    pub async fn use_database(&mut self, name: &str) -> Result<(), DbError> {
        self.require_connected()?;
        let databases = self.list_databases().await?;
        if !databases.iter().any(|database| database == name) {
            return Err(DbError::NotFound(format!("Unknown database '{name}'")));
        }

        self.run(&sql::use_database(name)).await?;
        self.session.selected_database = Some(name.to_string());
        Ok(())
    }

    async fn ensure_database(&mut self, name: &str) -> Result<(), DbError> {
        self.require_connected()?;
        if self.session.selected_database.as_deref() == Some(name) {
            return Ok(());
        }
        self.use_database(name).await
    }

    async fn ensure_table(&mut self, database: &str, table: &str) -> Result<(), DbError> {
        let tables = self.list_tables(database).await?;
        if tables.iter().any(|candidate| candidate == table) {
            Ok(())
        } else {
            Err(DbError::NotFound(format!(
                "Table '{database}.{table}' doesn't exist"
            )))
        }
    }

    pub async fn list_tables(&mut self, database: &str) -> Result<Vec<String>, DbError> {
        self.ensure_database(database).await?;
        let rows = self.run(&sql::show_tables(database)).await?;
        Ok(first_column(&rows))
    }

    pub async fn execute_query(&mut self, statement: &str) -> Result<QueryResult, DbError> {
        let rows = self.run(statement).await?;
        // Arbitrary text may switch the server-side database.
        self.session.selected_database = None;
        Ok(QueryResult::from_rows(rows))
    }

    pub async fn execute_query_in(
        &mut self,
        database: &str,
        statement: &str,
    ) -> Result<QueryResult, DbError> {
        self.ensure_database(database).await?;
        self.execute_query(statement).await
    }

    pub async fn table_structure(
        &mut self,
        database: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, DbError> {
        self.ensure_table(database, table).await?;
        let rows = self.run(&sql::show_full_columns(database, table)).await?;
        Ok(rows.iter().map(ColumnInfo::from_row).collect())
    }

    pub async fn table_indexes(
        &mut self,
        database: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>, DbError> {
        self.ensure_table(database, table).await?;
        let rows = self.run(&sql::show_index(database, table)).await?;
        Ok(rows.iter().map(IndexInfo::from_row).collect())
    }

    pub async fn table_info(&mut self, database: &str, table: &str) -> Result<TableInfo, DbError> {
        self.ensure_table(database, table).await?;
        let rows = self.run(&sql::table_info(database, table)).await?;
        rows.first().map(TableInfo::from_row).ok_or_else(|| {
            DbError::NotFound(format!("Table '{database}.{table}' doesn't exist"))
        })
    }

    pub async fn create_table_syntax(
        &mut self,
        database: &str,
        table: &str,
    ) -> Result<String, DbError> {
        self.ensure_table(database, table).await?;
        let rows = self.run(&sql::show_create_table(database, table)).await?;
        rows.first()
            .and_then(|row| row.get("Create Table").or_else(|| row.value_at(1)))
            .map(str::to_string)
            .ok_or_else(|| DbError::Driver("create table syntax not found in response".to_string()))
    }

    pub async fn create_database(&mut self, name: &str) -> Result<(), DbError> {
        self.run(&sql::create_database(name)).await?;
        info!(connection = %self.config.name, database = name, "database created");
        Ok(())
    }

    pub async fn drop_database(&mut self, name: &str) -> Result<(), DbError> {
        self.require_connected()?;
        if is_system_schema(name) {
            return Err(DbError::Validation(format!(
                "`{name}` is a protected system schema"
            )));
        }

        self.run(&sql::drop_database(name)).await?;
        if self.session.selected_database.as_deref() == Some(name) {
            self.session.selected_database = None;
        }
        info!(connection = %self.config.name, database = name, "database dropped");
        Ok(())
    }

    /// Creates `new_name`, moves each table across one statement at a time,
    /// then drops `old_name`. There is no rollback: a failed move leaves both
    /// databases in place with the tables split between them.
    pub async fn rename_database(&mut self, old_name: &str, new_name: &str) -> Result<(), DbError> {
        self.require_connected()?;
        if is_system_schema(old_name) {
            return Err(DbError::Validation(format!(
                "`{old_name}` is a protected system schema"
            )));
        }
        if old_name == new_name {
            return Err(DbError::Validation(format!(
                "new value must differ from `{old_name}`"
            )));
        }

        let tables = self.list_tables(old_name).await?;
        self.run(&sql::create_database(new_name)).await?;
        for table in &tables {
            self.run(&sql::rename_table(old_name, table, new_name, table))
                .await?;
        }
        self.run(&sql::drop_database(old_name)).await?;
        self.session.selected_database = None;

        info!(
            connection = %self.config.name,
            from = old_name,
            to = new_name,
            tables = tables.len(),
            "database renamed"
        );
        Ok(())
    }

    pub async fn create_table(&mut self, database: &str, table: &str) -> Result<(), DbError> {
        self.ensure_database(database).await?;
        self.run(&sql::create_table(database, table)).await?;
        Ok(())
    }

    pub async fn rename_table(
        &mut self,
        database: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), DbError> {
        self.ensure_database(database).await?;
        self.run(&sql::rename_table(database, old_name, database, new_name))
            .await?;
        Ok(())
    }

    pub async fn duplicate_table(
        &mut self,
        database: &str,
        source: &str,
        new_name: &str,
    ) -> Result<(), DbError> {
        self.ensure_database(database).await?;
        self.run(&sql::create_table_like(database, new_name, source))
            .await?;
        self.run(&sql::copy_rows(database, new_name, source)).await?;
        Ok(())
    }

    pub async fn truncate_table(&mut self, database: &str, table: &str) -> Result<(), DbError> {
        self.ensure_database(database).await?;
        self.run(&sql::truncate_table(database, table)).await?;
        Ok(())
    }

    pub async fn delete_table(&mut self, database: &str, table: &str) -> Result<(), DbError> {
        self.ensure_database(database).await?;
        self.run(&sql::drop_table(database, table)).await?;
        Ok(())
    }

    pub async fn modify_table_encoding(
        &mut self,
        database: &str,
        table: &str,
        charset: &str,
    ) -> Result<(), DbError> {
        self.require_connected()?;
        let charset = charset.trim();
        InputRule::Identifier
            .check(charset)
            .map_err(DbError::Validation)?;
        self.ensure_database(database).await?;
        self.run(&sql::convert_table_charset(database, table, charset))
            .await?;
        Ok(())
    }

    pub async fn modify_table_comment(
        &mut self,
        database: &str,
        table: &str,
        comment: &str,
    ) -> Result<(), DbError> {
        self.ensure_database(database).await?;
        self.run(&sql::set_table_comment(database, table, comment))
            .await?;
        Ok(())
    }

    pub async fn reset_auto_increment(
        &mut self,
        database: &str,
        table: &str,
        value: u64,
    ) -> Result<(), DbError> {
        self.ensure_database(database).await?;
        self.run(&sql::set_auto_increment(database, table, value))
            .await?;
        Ok(())
    }

    pub async fn server_variables(&mut self) -> Result<QueryResult, DbError> {
        let rows = self.run(sql::SHOW_VARIABLES).await?;
        Ok(QueryResult::from_rows(rows))
    }

    pub async fn process_list(&mut self) -> Result<QueryResult, DbError> {
        let rows = self.run(sql::SHOW_PROCESSLIST).await?;
        Ok(QueryResult::from_rows(rows))
    }
}
