//! Per-handler log files. Runs in its own binary because it installs the
//! process-wide subscriber.

#[cfg(test)]
mod tests {
    use dbhandler::{ConnectionProvider, DbHandler, DbhConfig, DriverManager, LogLevel, LogSettings};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn settings(dir: &TempDir, id: &str) -> LogSettings {
        LogSettings {
            id: id.to_string(),
            filename: dir.path().join(format!("{}.log", id)).to_string_lossy().into_owned(),
            level: LogLevel::Debug,
        }
    }

    #[test]
    fn test_handlers_log_to_their_own_files() {
        let dir = TempDir::new().unwrap();
        let provider: Arc<dyn ConnectionProvider> = Arc::new(DriverManager::new());

        let orders = DbhConfig::sqlite(":memory:")
            .with_connection_name("orders-db")
            .with_log(settings(&dir, "orders"));
        let billing = DbhConfig::sqlite(":memory:")
            .with_connection_name("billing-db")
            .with_log(settings(&dir, "billing"));

        let mut orders = DbHandler::with_file_logging(orders, provider.clone()).unwrap();
        let mut billing = DbHandler::with_file_logging(billing, provider.clone()).unwrap();
        assert!(orders.open_db_conn());
        assert!(billing.open_db_conn());
        orders.close_db_conn();
        billing.close_db_conn();

        let orders_log = fs::read_to_string(dir.path().join("orders.log")).unwrap();
        let billing_log = fs::read_to_string(dir.path().join("billing.log")).unwrap();
        assert!(orders_log.contains("connection=orders-db"));
        assert!(orders_log.contains("database connection opened"));
        assert!(!orders_log.contains("billing-db"));
        assert!(billing_log.contains("connection=billing-db"));
        assert!(!billing_log.contains("orders-db"));
    }

    #[test]
    fn test_logging_setup_failure_does_not_block_handler() {
        let provider: Arc<dyn ConnectionProvider> = Arc::new(DriverManager::new());
        let config = DbhConfig::sqlite(":memory:")
            .with_unique_connection_name("unlogged")
            .with_log(LogSettings {
                filename: "   ".to_string(),
                ..LogSettings::default()
            });

        let mut handler = DbHandler::with_file_logging(config, provider).unwrap();
        assert!(handler.test_connection());
    }
}
