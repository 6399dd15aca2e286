//! Lifecycle, transaction and error-state behaviour of `DbHandler`,
//! driven through the in-memory provider.

#[cfg(test)]
mod tests {
    use dbhandler::{
        ConnectionProvider, DbHandler, DbhConfig, ErrorKind, MemoryControl, MemoryProvider,
        QueryOutput, SqlValue,
    };
    use std::sync::Arc;

    fn postgres_handler(name: &str) -> (DbHandler, MemoryControl, Arc<MemoryProvider>) {
        let provider = Arc::new(MemoryProvider::new());
        let control = provider.control(name);
        let config = DbhConfig::postgres("db.local", "app")
            .with_credentials("app", "secret")
            .with_timezone("Europe/Rome")
            .with_connection_name(name);
        let handler = DbHandler::new(config, provider.clone()).unwrap();
        (handler, control, provider)
    }

    #[test]
    fn test_open_applies_timezone() {
        let (mut handler, control, _provider) = postgres_handler("tz");

        assert!(handler.open_db_conn());
        assert!(handler.is_open());
        assert_eq!(control.statements(), vec!["SET TIME ZONE 'Europe/Rome'"]);
        assert!(!handler.has_error());
    }

    #[test]
    fn test_timezone_failure_does_not_fail_open() {
        let (mut handler, control, _provider) = postgres_handler("tz-fail");
        control.fail_execution("SET TIME ZONE", "invalid value for parameter \"TimeZone\"");

        assert!(handler.open_db_conn());
        assert!(handler.is_open());
        assert!(!handler.has_error());
    }

    #[test]
    fn test_open_failure_records_error() {
        let (mut handler, control, _provider) = postgres_handler("refused");
        control.fail_open("connection refused");

        assert!(!handler.open_db_conn());
        assert!(!handler.is_open());
        assert!(handler.has_error());
        assert_eq!(handler.error_kind(), ErrorKind::OpenFailure);
        assert_eq!(handler.error_message(), "connection refused");

        control.allow_open();
        assert!(handler.open_db_conn());
        assert_eq!(handler.error_kind(), ErrorKind::None);
    }

    #[test]
    fn test_open_after_invalid_open_forces_close_then_reopen() {
        let (mut handler, control, _provider) = postgres_handler("stale");

        assert!(handler.open_db_conn());
        control.break_session();

        assert!(handler.open_db_conn());
        assert_eq!(control.close_calls(), 1);
        assert_eq!(control.open_calls(), 2);
        assert!(handler.is_open());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut handler, control, _provider) = postgres_handler("idem");

        handler.close_db_conn();
        handler.close_db_conn();
        assert!(!handler.is_open());

        assert!(handler.open_db_conn());
        handler.close_db_conn();
        handler.close_db_conn();
        assert!(!handler.is_open());
        assert_eq!(control.close_calls(), 4);
    }

    #[test]
    fn test_missing_sqlite_file_is_not_opened() {
        let provider = Arc::new(MemoryProvider::new());
        let control = provider.control("default");
        let config = DbhConfig::sqlite("/definitely/not/here/app.db");
        let mut handler = DbHandler::new(config, provider.clone()).unwrap();

        assert!(!handler.test_connection());
        assert_eq!(control.open_calls(), 0);
    }

    #[test]
    fn test_connection_probe_leaves_session_closed() {
        let (mut handler, control, _provider) = postgres_handler("probe");

        assert!(handler.test_connection());
        assert!(!handler.is_open());
        assert_eq!(control.open_calls(), 1);

        control.fail_open("password authentication failed");
        assert!(!handler.test_connection());
        assert_eq!(handler.error_kind(), ErrorKind::OpenFailure);
    }

    #[test]
    fn test_prepare_and_execute() {
        let (mut handler, control, _provider) = postgres_handler("queries");
        let sql = "SELECT id, name FROM users WHERE id = $1";
        control.set_result(
            sql,
            QueryOutput::with_rows(
                vec!["id".into(), "name".into()],
                vec![vec![SqlValue::Integer(7), SqlValue::Text("alice".into())]],
            ),
        );

        assert!(handler.open_db_conn());
        let mut query = handler.create_new_query();
        assert!(handler.prepare_query(&mut query, sql));
        query.bind(7i64);
        assert!(handler.execute_query(&mut query));

        assert_eq!(query.rows().len(), 1);
        assert_eq!(query.value(0, "name"), Some(&SqlValue::Text("alice".into())));
        assert_eq!(control.last_params(), vec![SqlValue::Integer(7)]);
    }

    #[test]
    fn test_prepare_failure_then_successful_execute_resets_error() {
        let (mut handler, control, _provider) = postgres_handler("reset");
        control.reject_sql("SELEC ", "syntax error at or near \"SELEC\"");
        assert!(handler.open_db_conn());

        let mut broken = handler.create_new_query();
        assert!(!handler.prepare_query(&mut broken, "SELEC 1"));
        assert_eq!(handler.error_kind(), ErrorKind::PrepareFailure);
        assert!(handler.error_message().contains("syntax error"));
        assert!(handler.error_message().contains("SELEC 1"));
        assert!(broken.last_error().is_some());

        let mut good = handler.create_new_query();
        assert!(handler.prepare_query(&mut good, "SELECT 1"));
        assert!(handler.execute_query(&mut good));
        assert!(!handler.has_error());
    }

    #[test]
    fn test_execute_failures() {
        let (mut handler, control, _provider) = postgres_handler("exec");
        control.fail_execution("INSERT", "duplicate key value violates unique constraint");
        assert!(handler.open_db_conn());

        let mut unprepared = handler.create_new_query();
        assert!(!handler.execute_query(&mut unprepared));
        assert_eq!(handler.error_kind(), ErrorKind::ExecutionFailure);
        assert!(handler.error_message().contains("not prepared"));

        let mut insert = handler.create_new_query();
        let sql = "INSERT INTO users (name) VALUES ($1)";
        assert!(handler.prepare_query(&mut insert, sql));
        insert.bind("alice");
        assert!(!handler.execute_query(&mut insert));
        assert_eq!(handler.error_kind(), ErrorKind::ExecutionFailure);
        assert!(handler.error_message().contains("duplicate key"));
        assert!(handler.error_message().contains(sql));
        assert!(!insert.is_active());
    }

    #[test]
    fn test_commit_and_close_always_closes() {
        let (mut handler, control, _provider) = postgres_handler("commit");

        assert!(handler.open_db_conn());
        assert!(handler.begin_transaction());
        assert!(handler.commit_and_close("ok"));
        assert!(!handler.is_open());
        assert!(!handler.has_error());

        control.fail_commit("could not serialize access");
        assert!(handler.open_db_conn());
        assert!(handler.begin_transaction());
        assert!(!handler.commit_and_close("failing"));
        assert!(!handler.is_open());
        assert_eq!(handler.error_kind(), ErrorKind::CommitFailure);
        assert_eq!(handler.error_message(), "could not serialize access");
        assert_eq!(control.commit_calls(), 2);
    }

    #[test]
    fn test_rollback_and_close_always_closes_and_keeps_error() {
        let (mut handler, control, _provider) = postgres_handler("rollback");
        control.fail_execution("UPDATE", "deadlock detected");
        control.fail_rollback("no transaction in progress");

        assert!(handler.open_db_conn());
        assert!(handler.begin_transaction());
        let mut update = handler.create_new_query();
        assert!(handler.prepare_query(&mut update, "UPDATE accounts SET balance = 0"));
        assert!(!handler.execute_query(&mut update));

        handler.rollback_and_close("reset balances");
        assert!(!handler.is_open());
        assert_eq!(control.rollback_calls(), 1);
        assert_eq!(handler.error_kind(), ErrorKind::ExecutionFailure);
        assert!(handler.error_message().contains("deadlock"));
    }

    #[test]
    fn test_begin_failure_is_recorded() {
        let (mut handler, control, _provider) = postgres_handler("begin");
        control.fail_begin("read-only transaction");
        assert!(handler.open_db_conn());

        assert!(!handler.begin_transaction());
        assert_eq!(handler.error_kind(), ErrorKind::ExecutionFailure);

        handler.clear_error();
        assert!(!handler.has_error());
    }

    #[test]
    fn test_drop_deregisters_connection() {
        let (mut handler, control, provider) = postgres_handler("scoped");
        assert!(provider.contains("scoped"));
        assert!(handler.open_db_conn());

        drop(handler);
        assert!(!provider.contains("scoped"));
        assert!(!control.is_open());
    }

    #[test]
    fn test_handles_with_distinct_names_coexist() {
        let provider = Arc::new(MemoryProvider::new());
        let first = DbhConfig::sqlite(":memory:").with_unique_connection_name("worker");
        let second = DbhConfig::sqlite(":memory:").with_unique_connection_name("worker");

        let a = DbHandler::new(first, provider.clone()).unwrap();
        let b = DbHandler::new(second, provider.clone()).unwrap();
        assert!(provider.contains(a.connection_name()));
        assert!(provider.contains(b.connection_name()));

        let name_a = a.connection_name().to_string();
        drop(a);
        assert!(!provider.contains(&name_a));
        assert!(provider.contains(b.connection_name()));
        assert_eq!(provider.control_count(), 1);

        drop(b);
        assert_eq!(provider.control_count(), 0);
    }

    #[test]
    fn test_dropping_replaced_handler_keeps_name_registered() {
        let provider = Arc::new(MemoryProvider::new());
        let stale = DbHandler::new(DbhConfig::sqlite(":memory:"), provider.clone()).unwrap();
        let live = DbHandler::new(DbhConfig::sqlite(":memory:"), provider.clone()).unwrap();

        drop(stale);
        assert!(provider.contains("default"));
        assert_eq!(provider.control_count(), 1);

        drop(live);
        assert!(!provider.contains("default"));
        assert_eq!(provider.control_count(), 0);
    }
}
