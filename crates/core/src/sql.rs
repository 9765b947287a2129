//! Statement text for every metadata and structural operation.
//!
//! Identifiers are always backtick-quoted and qualified with their database so
//! no statement depends on the session's selected database.

pub const PROBE: &str = "SELECT 1";
pub const SHOW_DATABASES: &str = "SHOW DATABASES";
pub const SHOW_VARIABLES: &str = "SHOW VARIABLES";
pub const SHOW_PROCESSLIST: &str = "SHOW PROCESSLIST";

#[must_use]
pub fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

#[must_use]
pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

#[must_use]
pub fn qualified_table(database: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(database), quote_identifier(table))
}

#[must_use]
pub fn use_database(database: &str) -> String {
    format!("USE {}", quote_identifier(database))
}

#[must_use]
pub fn show_tables(database: &str) -> String {
    format!("SHOW TABLES FROM {}", quote_identifier(database))
}

#[must_use]
pub fn show_full_columns(database: &str, table: &str) -> String {
    format!("SHOW FULL COLUMNS FROM {}", qualified_table(database, table))
}

#[must_use]
pub fn show_index(database: &str, table: &str) -> String {
    format!("SHOW INDEX FROM {}", qualified_table(database, table))
}

#[must_use]
pub fn show_create_table(database: &str, table: &str) -> String {
    format!("SHOW CREATE TABLE {}", qualified_table(database, table))
}

#[must_use]
pub fn table_info(database: &str, table: &str) -> String {
    format!(
        "SELECT TABLE_NAME, ENGINE, ROW_FORMAT, TABLE_ROWS, DATA_LENGTH, INDEX_LENGTH, \
         AUTO_INCREMENT, CREATE_TIME, UPDATE_TIME, TABLE_COLLATION, TABLE_COMMENT \
         FROM information_schema.TABLES \
         WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {}",
        quote_string(database),
        quote_string(table)
    )
}

#[must_use]
pub fn create_database(database: &str) -> String {
    format!("CREATE DATABASE {}", quote_identifier(database))
}

#[must_use]
pub fn drop_database(database: &str) -> String {
    format!("DROP DATABASE {}", quote_identifier(database))
}

#[must_use]
pub fn rename_table(from_database: &str, from: &str, to_database: &str, to: &str) -> String {
    format!(
        "RENAME TABLE {} TO {}",
        qualified_table(from_database, from),
        qualified_table(to_database, to)
    )
}

#[must_use]
pub fn create_table_like(database: &str, table: &str, source: &str) -> String {
    format!(
        "CREATE TABLE {} LIKE {}",
        qualified_table(database, table),
        qualified_table(database, source)
    )
}

#[must_use]
pub fn copy_rows(database: &str, table: &str, source: &str) -> String {
    format!(
        "INSERT INTO {} SELECT * FROM {}",
        qualified_table(database, table),
        qualified_table(database, source)
    )
}

#[must_use]
pub fn truncate_table(database: &str, table: &str) -> String {
    format!("TRUNCATE TABLE {}", qualified_table(database, table))
}

#[must_use]
pub fn drop_table(database: &str, table: &str) -> String {
    format!("DROP TABLE {}", qualified_table(database, table))
}

#[must_use]
pub fn create_table(database: &str, table: &str) -> String {
    format!(
        "CREATE TABLE {} (`id` INT NOT NULL AUTO_INCREMENT PRIMARY KEY)",
        qualified_table(database, table)
    )
}

/// `charset` must already be validated as an identifier.
#[must_use]
pub fn convert_table_charset(database: &str, table: &str, charset: &str) -> String {
    format!(
        "ALTER TABLE {} CONVERT TO CHARACTER SET {charset}",
        qualified_table(database, table)
    )
}

#[must_use]
pub fn set_table_comment(database: &str, table: &str, comment: &str) -> String {
    format!(
        "ALTER TABLE {} COMMENT = {}",
        qualified_table(database, table),
        quote_string(comment)
    )
}

#[must_use]
pub fn set_auto_increment(database: &str, table: &str, value: u64) -> String {
    format!(
        "ALTER TABLE {} AUTO_INCREMENT = {value}",
        qualified_table(database, table)
    )
}

#[must_use]
pub fn preview_select(table: &str, limit: usize) -> String {
    format!("SELECT * FROM {} LIMIT {limit}", quote_identifier(table))
}
