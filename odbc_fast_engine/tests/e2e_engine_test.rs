//! End-to-end suite against a real ODBC data source. Configure with
//! `ENABLE_E2E_TESTS=1` and `ODBC_FAST_TEST_DSN=<connection string>`
//! (a `.env` file works too); every test skips cleanly otherwise.

mod helpers;

use odbc_fast_engine::{
    Engine, EngineConfig, EngineError, ExecOptions, ParamValue, ResultDecoder,
};

fn engine() -> Engine {
    Engine::new(EngineConfig::default())
}

fn cell_as_i32(cell: &[u8]) -> Option<i32> {
    if cell.len() == 4 {
        return Some(i32::from_le_bytes(cell.try_into().ok()?));
    }
    std::str::from_utf8(cell).ok()?.trim().parse().ok()
}

#[test]
fn test_select_one_result_buffer() {
    let dsn = crate::require_dsn!();
    let engine = engine();
    let conn = engine.connect(&dsn).expect("connect");

    let buf = engine
        .execute(conn, "SELECT 1", &[], &ExecOptions::default())
        .expect("execute SELECT 1");

    // The decoder enforces the magic and version for us.
    let rows = ResultDecoder::decode(&buf).expect("decode");
    assert_eq!(rows.column_count(), 1);
    assert_eq!(rows.row_count(), 1);
    let cell = rows.rows[0][0].as_ref().expect("non-null cell");
    assert_eq!(cell_as_i32(cell), Some(1));

    engine.disconnect(conn).expect("disconnect");
}

#[test]
fn test_string_param_roundtrips_utf8() {
    let dsn = crate::require_dsn!();
    let engine = engine();
    let conn = engine.connect(&dsn).expect("connect");

    let params = [ParamValue::String("héllo".to_string())];
    let buf = engine
        .execute(conn, "SELECT ? AS v", &params, &ExecOptions::default())
        .expect("execute with param");

    let rows = ResultDecoder::decode(&buf).expect("decode");
    assert_eq!(rows.row_count(), 1);
    let cell = rows.rows[0][0].as_ref().expect("non-null cell");
    assert_eq!(cell.as_slice(), "héllo".as_bytes());

    engine.disconnect(conn).expect("disconnect");
}

#[test]
fn test_stream_chunks_then_end_of_stream() {
    let dsn = crate::require_dsn!();
    let engine = engine();
    let conn = engine.connect(&dsn).expect("connect");

    let stream = engine
        .stream_open(
            conn,
            "SELECT 1 UNION ALL SELECT 2 UNION ALL SELECT 3",
            &[],
            2,
            &ExecOptions::default(),
        )
        .expect("stream open");

    let first = engine.stream_next(stream).expect("chunk 1").expect("some");
    assert_eq!(ResultDecoder::decode(&first).unwrap().row_count(), 2);

    let second = engine.stream_next(stream).expect("chunk 2").expect("some");
    assert_eq!(ResultDecoder::decode(&second).unwrap().row_count(), 1);

    assert!(engine.stream_next(stream).expect("end").is_none());
    engine.stream_close(stream).expect("close stream");
    engine.disconnect(conn).expect("disconnect");
}

#[test]
fn test_stream_holds_connection_busy() {
    let dsn = crate::require_dsn!();
    let engine = engine();
    let conn = engine.connect(&dsn).expect("connect");

    let stream = engine
        .stream_open(conn, "SELECT 1", &[], 10, &ExecOptions::default())
        .expect("stream open");

    let err = engine
        .execute(conn, "SELECT 2", &[], &ExecOptions::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::ConnectionBusy(_)));

    engine.stream_close(stream).expect("close");
    // With the stream closed the connection accepts work again.
    engine
        .execute(conn, "SELECT 2", &[], &ExecOptions::default())
        .expect("execute after close");
    engine.disconnect(conn).expect("disconnect");
}

#[test]
fn test_pool_shared_across_connections_with_same_identity() {
    let dsn = crate::require_dsn!();
    let engine = engine();

    let a = engine.connect(&dsn).expect("connect a");
    let b = engine.connect(&dsn).expect("connect b");
    assert_ne!(a, b);

    let identity = odbc_fast_engine::pool::PoolIdentity::parse(&dsn).unwrap();
    assert!(engine.pool_live_count(&identity) <= 2);

    engine.disconnect(a).expect("disconnect a");
    engine.disconnect(b).expect("disconnect b");

    // Both driver connections went back to the idle stack; a reconnect
    // reuses one instead of growing the pool.
    let c = engine.connect(&dsn).expect("connect c");
    assert!(engine.pool_live_count(&identity) <= 2);
    engine.disconnect(c).expect("disconnect c");
}

#[test]
fn test_closed_connection_fails_with_invalid_handle() {
    let dsn = crate::require_dsn!();
    let engine = engine();
    let conn = engine.connect(&dsn).expect("connect");
    engine.disconnect(conn).expect("disconnect");

    let err = engine
        .execute(conn, "SELECT 1", &[], &ExecOptions::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidHandle(_)));

    let last = engine.last_error(Some(conn)).expect("error recorded");
    assert_eq!(&last.sqlstate, b"08003");
}

#[test]
fn test_prepared_cache_hits_and_misses() {
    let dsn = crate::require_dsn!();
    let engine = engine();
    let conn = engine.connect(&dsn).expect("connect");

    let stmt = engine.prepare(conn, "SELECT ?").expect("prepare");
    // Same fingerprint, same statement id.
    assert_eq!(engine.prepare(conn, "SELECT  ?").expect("re-prepare"), stmt);

    for n in [1, 2, 3] {
        let buf = engine
            .execute_prepared(stmt, &[ParamValue::Integer(n)], &ExecOptions::default())
            .expect("execute prepared");
        let rows = ResultDecoder::decode(&buf).unwrap();
        let cell = rows.rows[0][0].as_ref().expect("non-null");
        assert_eq!(cell_as_i32(cell), Some(n));
    }

    let snapshot = engine.metrics().snapshot();
    assert_eq!(snapshot.cache_misses, 1);
    assert_eq!(snapshot.cache_hits, 2);

    engine.disconnect(conn).expect("disconnect");
}

#[test]
fn test_prepared_statement_dies_with_its_connection() {
    let dsn = crate::require_dsn!();
    let engine = engine();
    let conn = engine.connect(&dsn).expect("connect");
    let stmt = engine.prepare(conn, "SELECT ?").expect("prepare");
    engine.disconnect(conn).expect("disconnect");

    let err = engine
        .execute_prepared(stmt, &[ParamValue::Integer(1)], &ExecOptions::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidHandle(_)));
}

#[test]
fn test_prepared_schema_mismatch_is_validation() {
    let dsn = crate::require_dsn!();
    let engine = engine();
    let conn = engine.connect(&dsn).expect("connect");
    let stmt = engine.prepare(conn, "SELECT ?").expect("prepare");

    engine
        .execute_prepared(stmt, &[ParamValue::Integer(1)], &ExecOptions::default())
        .expect("first execute learns the schema");

    let err = engine
        .execute_prepared(
            stmt,
            &[ParamValue::Integer(1), ParamValue::Integer(2)],
            &ExecOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    engine.disconnect(conn).expect("disconnect");
}

#[test]
fn test_cancel_is_observed_by_next_execute() {
    let dsn = crate::require_dsn!();
    let engine = engine();
    let conn = engine.connect(&dsn).expect("connect");

    match engine.cancel(conn) {
        Ok(()) => {
            let err = engine
                .execute(conn, "SELECT 1", &[], &ExecOptions::default())
                .unwrap_err();
            assert!(matches!(err, EngineError::Cancelled));
            // The flag is edge-triggered: the following execute runs.
            engine
                .execute(conn, "SELECT 1", &[], &ExecOptions::default())
                .expect("execute after cancel consumed");
        }
        Err(EngineError::Unsupported(_)) => {
            eprintln!("driver reports no cancel support; surfaced as Unsupported");
        }
        Err(other) => panic!("unexpected cancel result: {:?}", other),
    }

    engine.disconnect(conn).expect("disconnect");
}

#[test]
fn test_execute_rejects_stream_option() {
    let dsn = crate::require_dsn!();
    let engine = engine();
    let conn = engine.connect(&dsn).expect("connect");

    let opts = ExecOptions {
        stream: true,
        ..ExecOptions::default()
    };
    let err = engine.execute(conn, "SELECT 1", &[], &opts).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    engine.disconnect(conn).expect("disconnect");
}

#[test]
fn test_max_buffer_bytes_enforced_on_execute() {
    let dsn = crate::require_dsn!();
    let engine = engine();
    let conn = engine.connect(&dsn).expect("connect");

    let opts = ExecOptions {
        max_buffer_bytes: 8,
        ..ExecOptions::default()
    };
    let err = engine.execute(conn, "SELECT 1", &[], &opts).unwrap_err();
    assert!(matches!(err, EngineError::BufferTooSmall { .. }));

    engine.disconnect(conn).expect("disconnect");
}
