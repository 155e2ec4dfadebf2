use sea_orm::{ConnectOptions, Database as SeaDatabase, DatabaseConnection};
use std::time::Duration;

use crate::config::Config;

/// Initialize the database connection from config.
///
/// In-memory SQLite lives only as long as its single connection, so such URLs
/// get a one-connection pool that is never recycled.
pub async fn connect(config: &Config) -> Result<DatabaseConnection, sea_orm::DbErr> {
    let mut opts = ConnectOptions::new(&config.database_url);

    if is_memory_sqlite(&config.database_url) {
        opts.max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);
    } else {
        opts.max_connections(50)
            .min_connections(2)
            .connect_timeout(Duration::from_secs(8))
            .acquire_timeout(Duration::from_secs(8))
            .idle_timeout(Duration::from_secs(300))
            .sqlx_logging(config.is_dev());
    }

    SeaDatabase::connect(opts).await
}

fn is_memory_sqlite(url: &str) -> bool {
    url.starts_with("sqlite") && url.contains(":memory:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sqlite_detection() {
        assert!(is_memory_sqlite("sqlite::memory:"));
        assert!(!is_memory_sqlite("sqlite://bastion.db?mode=rwc"));
        assert!(!is_memory_sqlite("postgres://localhost/:memory:"));
    }
}
