//! Bulk-load engine behavior against a scripted server.

mod support;

use mssql_bulk::{
    BulkConnection, BulkLoad, BulkLoadOptions, BulkLoadPhase, ColumnOptions, Config,
    ConnectionState, DataType, Error, SqlValue, rows, try_rows,
};
use support::{MockServer, Response};

fn test_config() -> Config {
    Config::default().cancel_timeout(std::time::Duration::from_secs(1))
}

fn int_name_bulk(table: &str) -> BulkLoad {
    let mut bulk = BulkLoad::new(table, BulkLoadOptions::default()).expect("valid options");
    bulk.add_column("id", DataType::Int, ColumnOptions::default().nullable(false))
        .expect("configuring");
    bulk.add_column("name", DataType::NVarChar, ColumnOptions::default().length(50))
        .expect("configuring");
    bulk
}

fn sample_rows(count: i32) -> Vec<Vec<SqlValue>> {
    (1..=count)
        .map(|i| vec![SqlValue::Int(i), SqlValue::from(format!("row-{i}"))])
        .collect()
}

#[tokio::test]
async fn successful_load_reports_server_row_count() {
    let (client, server) = tokio::io::duplex(1 << 20);
    let received = MockServer::default()
        .with_bulk_response(Response::Done { row_count: 6 })
        .spawn(server);

    let mut conn = BulkConnection::new(client, test_config());
    let mut bulk = int_name_bulk("dbo.items");

    let row_count = bulk
        .execute(&mut conn, rows(sample_rows(6)))
        .await
        .expect("bulk load succeeds");

    assert_eq!(row_count, 6);
    assert_eq!(bulk.phase(), BulkLoadPhase::Completed);
    assert_eq!(conn.state(), ConnectionState::LoggedIn);

    // The prelude named the table and columns; the data stream carried
    // COLMETADATA first.
    let log = received.lock().expect("mock log");
    assert_eq!(log[0].packet_type, 0x01);
    assert!(log[0].batch_sql().starts_with("insert bulk dbo.items"));
    assert_eq!(log[1].packet_type, 0x07);
    assert_eq!(log[1].payload[0], 0x81); // COLMETADATA tag
}

#[tokio::test]
async fn add_column_after_execution_fails_with_exact_message() {
    let (client, server) = tokio::io::duplex(1 << 20);
    MockServer::default()
        .with_bulk_response(Response::Done { row_count: 1 })
        .spawn(server);

    let mut conn = BulkConnection::new(client, test_config());
    let mut bulk = int_name_bulk("dbo.items");

    bulk.execute(&mut conn, rows(sample_rows(1)))
        .await
        .expect("bulk load succeeds");

    let err = bulk
        .add_column("extra", DataType::Int, ColumnOptions::default())
        .expect_err("columns are sealed");
    assert_eq!(
        err.to_string(),
        "Columns cannot be added to bulk insert after execution has started."
    );
}

#[tokio::test]
async fn add_column_after_async_execution_fails_with_exact_message() {
    let (client, server) = tokio::io::duplex(1 << 20);
    MockServer::default()
        .with_bulk_response(Response::Done { row_count: 2 })
        .spawn(server);

    let mut conn = BulkConnection::new(client, test_config());
    let mut bulk = int_name_bulk("dbo.items");

    let items: Vec<Result<Vec<SqlValue>, mssql_bulk::BoxError>> =
        sample_rows(2).into_iter().map(Ok).collect();
    let source = mssql_bulk::stream_rows(futures_util::stream::iter(items));

    bulk.execute(&mut conn, source).await.expect("bulk load succeeds");

    let err = bulk
        .add_column("extra", DataType::Int, ColumnOptions::default())
        .expect_err("columns are sealed");
    assert!(matches!(err, Error::ColumnsSealed));
}

#[tokio::test]
async fn server_error_before_final_done_fails_with_server_message() {
    let sort_error = "Cannot bulk load. The bulk data stream was incorrectly specified as sorted \
                      or the data violates a uniqueness constraint imposed by the target table. \
                      Sort order incorrect for the following two rows: primary key of first row: \
                      (6), primary key of second row: (5).";

    let (client, server) = tokio::io::duplex(1 << 20);
    MockServer::default()
        .with_bulk_response(Response::ErrorThenDone {
            number: 4819,
            message: sort_error.to_string(),
        })
        .spawn(server);

    let mut conn = BulkConnection::new(client, test_config());
    let mut bulk = BulkLoad::new(
        "dbo.ordered",
        BulkLoadOptions {
            order: vec![("id".into(), "ASC".into())],
            ..Default::default()
        },
    )
    .expect("valid options");
    bulk.add_column("id", DataType::Int, ColumnOptions::default().nullable(false))
        .expect("configuring");

    let out_of_order: Vec<Vec<SqlValue>> = [1, 2, 3, 6, 5, 4]
        .iter()
        .map(|i| vec![SqlValue::Int(*i)])
        .collect();

    let err = bulk
        .execute(&mut conn, rows(out_of_order))
        .await
        .expect_err("server rejects the stream");

    assert_eq!(err.to_string(), sort_error);
    assert!(matches!(err, Error::Server { number: 4819, .. }));
    assert_eq!(bulk.phase(), BulkLoadPhase::Errored);
    // Request completed normally at the protocol level.
    assert_eq!(conn.state(), ConnectionState::LoggedIn);
}

#[tokio::test]
async fn order_ignored_when_server_accepts() {
    let (client, server) = tokio::io::duplex(1 << 20);
    MockServer::default()
        .with_bulk_response(Response::Done { row_count: 6 })
        .spawn(server);

    let mut conn = BulkConnection::new(client, test_config());
    let mut bulk = int_name_bulk("dbo.unordered");

    let row_count = bulk
        .execute(&mut conn, rows(sample_rows(6)))
        .await
        .expect("server accepted");
    assert_eq!(row_count, 6);
}

#[tokio::test]
async fn keep_nulls_reaches_the_wire() {
    let (client, server) = tokio::io::duplex(1 << 20);
    let received = MockServer::default()
        .with_bulk_response(Response::Done { row_count: 1 })
        .spawn(server);

    let mut conn = BulkConnection::new(client, test_config());
    let mut bulk = BulkLoad::new(
        "dbo.defaulted",
        BulkLoadOptions {
            keep_nulls: true,
            ..Default::default()
        },
    )
    .expect("valid options");
    bulk.add_column("id", DataType::Int, ColumnOptions::default())
        .expect("configuring");

    let row: Vec<(String, SqlValue)> = vec![("id".into(), SqlValue::Null)];
    let row_count = bulk
        .execute(&mut conn, rows(vec![row]))
        .await
        .expect("null loads");
    assert_eq!(row_count, 1);

    let log = received.lock().expect("mock log");
    assert!(log[0].batch_sql().contains("with (KEEP_NULLS)"));
    // The data stream ends with our DONE; the ROW token carries the
    // IntN NULL as a zero length byte.
    let bulk_payload = &log[1].payload;
    let row_pos = bulk_payload
        .iter()
        .position(|&b| b == 0xD1)
        .expect("ROW token present");
    assert_eq!(bulk_payload[row_pos + 1], 0);
}

#[tokio::test]
async fn validation_failure_aborts_and_leaves_connection_reusable() {
    let (client, server) = tokio::io::duplex(1 << 20);
    let received = MockServer::default()
        .with_batch_responses(vec![
            Response::Done { row_count: 0 }, // insert bulk prelude
            Response::Done { row_count: 1 }, // follow-up SELECT
        ])
        .spawn(server);

    let mut conn = BulkConnection::new(client, test_config());
    let mut bulk = BulkLoad::new("dbo.dated", BulkLoadOptions::default()).expect("valid options");
    bulk.add_column("when", DataType::Date, ColumnOptions::default())
        .expect("configuring");

    let err = bulk
        .execute(
            &mut conn,
            rows(vec![vec![SqlValue::from("invalid date")]]),
        )
        .await
        .expect_err("validation fails");

    assert_eq!(err.to_string(), "Invalid date.");
    assert!(matches!(err, Error::Type(_)));
    assert_eq!(bulk.phase(), BulkLoadPhase::Errored);

    // The connection came back to LoggedIn and can run another request.
    assert_eq!(conn.state(), ConnectionState::LoggedIn);
    conn.send_sql_batch("SELECT 1").await.expect("reusable");
    loop {
        match conn.next_token().await.expect("response") {
            tds_protocol::token::Token::Done(done) if !done.status.more => break,
            _ => continue,
        }
    }
    conn.settle();

    let log = received.lock().expect("mock log");
    assert!(log.iter().any(|m| m.batch_sql() == "SELECT 1"));
}

#[tokio::test]
async fn row_source_error_preserves_identity_and_connection() {
    #[derive(Debug, thiserror::Error, PartialEq)]
    #[error("disk read failed at row {0}")]
    struct DiskError(usize);

    let (client, server) = tokio::io::duplex(1 << 20);
    MockServer::default()
        .with_batch_responses(vec![
            Response::Done { row_count: 0 },
            Response::Done { row_count: 0 },
        ])
        .spawn(server);

    let mut conn = BulkConnection::new(client, test_config());
    let mut bulk = int_name_bulk("dbo.items");

    let items: Vec<Result<Vec<SqlValue>, mssql_bulk::BoxError>> = vec![
        Ok(vec![SqlValue::Int(1), SqlValue::from("ok")]),
        Err(Box::new(DiskError(2))),
    ];

    let err = bulk
        .execute(&mut conn, try_rows(items))
        .await
        .expect_err("source failed");

    match &err {
        Error::RowSource(inner) => {
            assert_eq!(inner.downcast_ref::<DiskError>(), Some(&DiskError(2)));
        }
        other => panic!("expected RowSource error, got {other:?}"),
    }
    assert_eq!(err.to_string(), "disk read failed at row 2");

    // An unrelated request on the same connection still works.
    assert_eq!(conn.state(), ConnectionState::LoggedIn);
    conn.send_sql_batch("SELECT 1").await.expect("reusable");
}

#[tokio::test]
async fn malformed_order_option_fails_synchronously() {
    let options = BulkLoadOptions {
        order: vec![("id".into(), "UP".into())],
        ..Default::default()
    };
    let err = BulkLoad::new("dbo.t", options).expect_err("invalid direction");
    assert_eq!(
        err.to_string(),
        "The value of the \"id\" key in the \"options.order\" object must be either \"ASC\" or \"DESC\"."
    );
}
