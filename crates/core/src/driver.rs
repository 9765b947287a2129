use async_trait::async_trait;
use thiserror::Error;

use crate::config::ConnectionConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    message: String,
}

impl DriverError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One result row as ordered `(column, value)` pairs. `None` is SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    fields: Vec<(String, Option<String>)>,
}

impl Row {
    #[must_use]
    pub fn new(fields: Vec<(String, Option<String>)>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn fields(&self) -> &[(String, Option<String>)] {
        &self.fields
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Value of `column`; `None` both for NULL and for a missing column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, value)| value.as_deref())
    }

    #[must_use]
    pub fn value_at(&self, index: usize) -> Option<&str> {
        self.fields
            .get(index)
            .and_then(|(_, value)| value.as_deref())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// The SQL client seam. Implementations own the wire protocol; everything
/// above it only sends statement text and reads rows back.
#[async_trait]
pub trait Driver: Send + Sync {
    type Handle: Send;

    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Handle, DriverError>;
    async fn query(&self, handle: &mut Self::Handle, sql: &str) -> Result<Vec<Row>, DriverError>;
    async fn close(&self, handle: Self::Handle) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::Row;

    fn sample_row() -> Row {
        Row::new(vec![
            ("Field".to_string(), Some("id".to_string())),
            ("Default".to_string(), None),
        ])
    }

    #[test]
    fn lookup_by_name_treats_null_as_absent() {
        let row = sample_row();
        assert_eq!(row.get("Field"), Some("id"));
        assert_eq!(row.get("Default"), None);
        assert_eq!(row.get("Missing"), None);
    }

    #[test]
    fn column_names_keep_driver_order() {
        let row = sample_row();
        assert_eq!(row.column_names().collect::<Vec<_>>(), ["Field", "Default"]);
        assert_eq!(row.value_at(0), Some("id"));
        assert_eq!(row.len(), 2);
    }
}
