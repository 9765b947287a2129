use async_trait::async_trait;
use sqlnav_core::config::ConnectionConfig;
use sqlnav_core::driver::{Driver, DriverError, Row};

/// Server with a fixed catalog: `app_db` holding `users` and `orders`, and
/// an empty `logs`.
#[derive(Debug, Default)]
pub(crate) struct StaticDriver;

fn single_column(column: &str, values: &[&str]) -> Vec<Row> {
    values
        .iter()
        .map(|value| Row::new(vec![(column.to_string(), Some((*value).to_string()))]))
        .collect()
}

#[async_trait]
impl Driver for StaticDriver {
    type Handle = ();

    async fn connect(&self, _config: &ConnectionConfig) -> Result<Self::Handle, DriverError> {
        Ok(())
    }

    async fn query(&self, _handle: &mut Self::Handle, sql: &str) -> Result<Vec<Row>, DriverError> {
        Ok(match sql {
            "SHOW DATABASES" => single_column("Database", &["app_db", "logs"]),
            "SHOW TABLES FROM `app_db`" => single_column("Tables_in_app_db", &["users", "orders"]),
            _ => Vec::new(),
        })
    }

    async fn close(&self, _handle: Self::Handle) -> Result<(), DriverError> {
        Ok(())
    }
}
