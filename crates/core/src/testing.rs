use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard,
};

use async_trait::async_trait;

use crate::config::{
    load_connections, ConnectionConfig, MemoryStateStore, StateStore, StoreError,
};
use crate::driver::{Driver, DriverError, Row};
use crate::sql;

pub(crate) fn row(fields: &[(&str, Option<&str>)]) -> Row {
    Row::new(
        fields
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.map(str::to_string)))
            .collect(),
    )
}

/// In-memory stand-in for a MySQL server: knows databases and table names,
/// records every statement and can be told to fail specific ones.
#[derive(Debug, Default)]
pub(crate) struct FakeServer {
    pub databases: Vec<(String, Vec<String>)>,
    pub selected: Option<String>,
    pub statements: Vec<String>,
    pub failing: Vec<(String, String)>,
    pub canned: Vec<(String, Vec<Row>)>,
    pub fail_connect: Option<String>,
    pub fail_probe: bool,
    pub fail_close: bool,
    pub connect_calls: usize,
    pub close_calls: usize,
}

impl FakeServer {
    fn tables_mut(&mut self, database: &str) -> Result<&mut Vec<String>, DriverError> {
        self.databases
            .iter_mut()
            .find(|(name, _)| name == database)
            .map(|(_, tables)| tables)
            .ok_or_else(|| DriverError::new(format!("Unknown database '{database}'")))
    }

    fn execute(&mut self, statement: &str) -> Result<Vec<Row>, DriverError> {
        if let Some((_, message)) = self.failing.iter().find(|(sql, _)| sql == statement) {
            return Err(DriverError::new(message.clone()));
        }
        if let Some((_, rows)) = self.canned.iter().find(|(sql, _)| sql == statement) {
            return Ok(rows.clone());
        }

        let names = backticked(statement);
        let name = |index: usize| names.get(index).cloned().unwrap_or_default();

        if statement == sql::PROBE {
            if self.fail_probe {
                return Err(DriverError::new("Lost connection to MySQL server"));
            }
            return Ok(vec![row(&[("1", Some("1"))])]);
        }
        if statement == sql::SHOW_DATABASES {
            return Ok(self
                .databases
                .iter()
                .map(|(database, _)| row(&[("Database", Some(database.as_str()))]))
                .collect());
        }
        if statement == "SELECT DATABASE()" {
            return Ok(vec![row(&[("DATABASE()", self.selected.as_deref())])]);
        }
        if statement.starts_with("USE ") {
            let database = name(0);
            self.tables_mut(&database)?;
            self.selected = Some(database);
        } else if statement.starts_with("SHOW TABLES FROM ") {
            let database = name(0);
            let column = format!("Tables_in_{database}");
            let tables = self.tables_mut(&database)?.clone();
            return Ok(tables
                .iter()
                .map(|table| row(&[(column.as_str(), Some(table.as_str()))]))
                .collect());
        } else if statement.starts_with("CREATE DATABASE ") {
            let database = name(0);
            if self.databases.iter().any(|(existing, _)| *existing == database) {
                return Err(DriverError::new(format!(
                    "Can't create database '{database}'; database exists"
                )));
            }
            self.databases.push((database, Vec::new()));
        } else if statement.starts_with("DROP DATABASE ") {
            let database = name(0);
            self.tables_mut(&database)?;
            self.databases.retain(|(existing, _)| *existing != database);
            if self.selected.as_deref() == Some(database.as_str()) {
                self.selected = None;
            }
        } else if statement.starts_with("RENAME TABLE ") {
            let (from_db, from, to_db, to) = (name(0), name(1), name(2), name(3));
            let source = self.tables_mut(&from_db)?;
            let position = source
                .iter()
                .position(|table| *table == from)
                .ok_or_else(|| DriverError::new(format!("Table '{from_db}.{from}' doesn't exist")))?;
            source.remove(position);
            self.tables_mut(&to_db)?.push(to);
        } else if statement.starts_with("CREATE TABLE ") {
            let (database, table) = (name(0), name(1));
            self.tables_mut(&database)?.push(table);
        } else if statement.starts_with("DROP TABLE ") {
            let (database, table) = (name(0), name(1));
            self.tables_mut(&database)?.retain(|existing| *existing != table);
        }
        Ok(Vec::new())
    }
}

fn backticked(statement: &str) -> Vec<String> {
    statement
        .split('`')
        .skip(1)
        .step_by(2)
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeDriver {
    server: Arc<Mutex<FakeServer>>,
}

impl FakeDriver {
    pub(crate) fn with_databases(databases: &[(&str, &[&str])]) -> Self {
        let driver = Self::default();
        driver.server().databases = databases
            .iter()
            .map(|(name, tables)| {
                (
                    (*name).to_string(),
                    tables.iter().map(|table| (*table).to_string()).collect(),
                )
            })
            .collect();
        driver
    }

    pub(crate) fn server(&self) -> MutexGuard<'_, FakeServer> {
        self.server.lock().expect("fake server lock poisoned")
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.server().statements.clone()
    }

    pub(crate) fn connect_calls(&self) -> usize {
        self.server().connect_calls
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.server().close_calls
    }

    pub(crate) fn tables(&self, database: &str) -> Option<Vec<String>> {
        self.server()
            .databases
            .iter()
            .find(|(name, _)| name == database)
            .map(|(_, tables)| tables.clone())
    }

    pub(crate) fn fail_statement(&self, statement: &str, message: &str) {
        self.server()
            .failing
            .push((statement.to_string(), message.to_string()));
    }

    pub(crate) fn respond(&self, statement: &str, rows: Vec<Row>) {
        self.server().canned.push((statement.to_string(), rows));
    }
}

#[derive(Debug)]
pub(crate) struct FakeHandle;

#[async_trait]
impl Driver for FakeDriver {
    type Handle = FakeHandle;

    async fn connect(&self, _config: &ConnectionConfig) -> Result<FakeHandle, DriverError> {
        let mut server = self.server();
        server.connect_calls += 1;
        match server.fail_connect.clone() {
            Some(message) => Err(DriverError::new(message)),
            None => Ok(FakeHandle),
        }
    }

    async fn query(&self, _handle: &mut FakeHandle, sql: &str) -> Result<Vec<Row>, DriverError> {
        let mut server = self.server();
        server.statements.push(sql.to_string());
        server.execute(sql)
    }

    async fn close(&self, _handle: FakeHandle) -> Result<(), DriverError> {
        let mut server = self.server();
        server.close_calls += 1;
        if server.fail_close {
            Err(DriverError::new("connection reset by peer"))
        } else {
            Ok(())
        }
    }
}

/// State store that counts writes and can be switched to reject them.
#[derive(Debug, Default)]
pub(crate) struct RecordingStore {
    inner: MemoryStateStore,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl RecordingStore {
    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn persisted(&self) -> Vec<ConnectionConfig> {
        load_connections(&self.inner).expect("persisted list should decode")
    }
}

impl StateStore for RecordingStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write {
                path: "memory".into(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.set(key, value)
    }
}
