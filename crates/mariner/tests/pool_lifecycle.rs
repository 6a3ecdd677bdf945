//! End-to-end scenarios over the mock session connector: pooled
//! acquisition cycles, cursor execution through both protocols, bulk
//! equivalence and TPC round trips.

use std::sync::Arc;

use mariner::testing::{MockConnector, result_set};
use mariner::{
    ConnectConfig, CursorOptions, Error, Params, PoolOptions, PoolRegistry, ScrollMode,
    SessionConnector, TpcState, Value,
};

fn pool_setup(
    name: &str,
    size: usize,
) -> (
    Arc<PoolRegistry>,
    Arc<mariner::ConnectionPool>,
    Arc<MockConnector>,
) {
    let registry = PoolRegistry::new();
    let connector = Arc::new(MockConnector::new());
    let pool = registry
        .create_pool(
            &PoolOptions::new(name).size(size),
            Some(ConnectConfig::default().user("app").database("test")),
            Arc::clone(&connector) as Arc<dyn SessionConnector>,
        )
        .expect("pool creation");
    (registry, pool, connector)
}

#[test]
fn pooled_connection_runs_statements_and_returns_to_pool() {
    let (_registry, pool, connector) = pool_setup("workload", 1);

    let conn = pool.get_connection().unwrap();
    let session = &connector.sessions()[0];
    session.push_result(result_set(
        &["id", "name"],
        vec![
            vec![Value::Int(1), Value::Text("bolt".to_string())],
            vec![Value::Int(2), Value::Text("nut".to_string())],
        ],
    ));

    let mut cursor = conn.cursor();
    cursor.execute("SELECT id, name FROM parts", Params::None).unwrap();
    let rows = cursor.fetchall().unwrap();
    assert_eq!(rows.len(), 2);
    drop(cursor);

    conn.close().unwrap();
    assert!(!conn.is_closed());
    assert_eq!(pool.connection_count(), 1);

    // the released connection is idle again and can be re-acquired
    let again = pool.get_connection().unwrap();
    assert!(Arc::ptr_eq(&conn, &again));
    again.close().unwrap();
}

#[test]
fn capacity_exhaustion_is_an_immediate_error() {
    let (_registry, pool, _connector) = pool_setup("bounded", 1);

    let held = pool.get_connection().unwrap();
    assert!(matches!(pool.get_connection(), Err(Error::Pool(_))));
    held.close().unwrap();
    assert!(pool.get_connection().is_ok());
}

#[test]
fn bulk_and_fallback_produce_identical_effects() {
    let rows = vec![
        vec![Value::Int(1), Value::Text("ada".to_string())],
        vec![Value::Int(2), Value::Text("grace".to_string())],
        vec![Value::Int(3), Value::Text("edsger".to_string())],
    ];

    // with bulk capability
    let bulk_connector = Arc::new(MockConnector::new());
    let conn = mariner::connect(
        ConnectConfig::default(),
        None,
        Arc::clone(&bulk_connector) as Arc<dyn SessionConnector>,
    )
    .unwrap();
    bulk_connector.sessions()[0].set_bulk_support(true);
    let mut cursor = conn.cursor();
    cursor
        .executemany("INSERT INTO people VALUES (?, ?)", rows.clone())
        .unwrap();
    let bulk_inserted = bulk_connector.sessions()[0].inserted_rows();
    let bulk_count = cursor.rowcount();
    drop(cursor);
    conn.close().unwrap();

    // without bulk capability: per-row fallback
    let loop_connector = Arc::new(MockConnector::new());
    let conn = mariner::connect(
        ConnectConfig::default(),
        None,
        Arc::clone(&loop_connector) as Arc<dyn SessionConnector>,
    )
    .unwrap();
    loop_connector.sessions()[0].set_bulk_support(false);
    let mut cursor = conn.cursor();
    cursor
        .executemany("INSERT INTO people VALUES (?, ?)", rows.clone())
        .unwrap();
    let loop_inserted = loop_connector.sessions()[0].inserted_rows();
    let loop_count = cursor.rowcount();
    drop(cursor);
    conn.close().unwrap();

    assert_eq!(bulk_inserted, rows);
    assert_eq!(loop_inserted, rows);
    assert_eq!(bulk_count, loop_count);
    assert_eq!(bulk_connector.sessions()[0].bulk_count(), 1);
    assert_eq!(loop_connector.sessions()[0].bulk_count(), 0);
}

#[test]
fn tpc_round_trip_over_pooled_connection() {
    let (_registry, pool, connector) = pool_setup("xa", 1);

    let conn = pool.get_connection().unwrap();
    let xid = conn.xid(0, "order-77", "branch-1").unwrap();

    conn.tpc_begin(xid.clone()).unwrap();
    assert_eq!(conn.tpc_state(), TpcState::Xid);

    let mut cursor = conn.cursor();
    cursor
        .execute(
            "INSERT INTO orders VALUES (?)",
            [Value::Int(77)],
        )
        .unwrap();
    drop(cursor);

    // commit with no explicit xid uses the stored one, single-phase
    conn.tpc_commit(None).unwrap();
    assert_eq!(conn.tpc_state(), TpcState::None);

    let log = connector.sessions()[0].executed();
    assert!(log.contains(&"XA BEGIN 'order-77','branch-1',1".to_string()));
    assert!(log.contains(&"XA COMMIT 'order-77','branch-1',1 ONE PHASE".to_string()));

    // begin/rollback leaves state clean too
    let xid = conn.xid(1, "order-78", "branch-1").unwrap();
    conn.tpc_begin(xid).unwrap();
    conn.tpc_rollback(None).unwrap();
    assert_eq!(conn.tpc_state(), TpcState::None);
    let log = connector.sessions()[0].executed();
    assert!(log.contains(&"XA ROLLBACK 'order-78','branch-1',1".to_string()));

    conn.close().unwrap();
}

#[test]
fn tpc_recover_lists_pending_transactions() {
    let (_registry, pool, connector) = pool_setup("recovery", 1);
    let conn = pool.get_connection().unwrap();

    connector.sessions()[0].push_result(result_set(
        &["formatID", "gtrid_length", "bqual_length", "data"],
        vec![vec![
            Value::Int(1),
            Value::Int(8),
            Value::Int(8),
            Value::Text("order-77branch-1".to_string()),
        ]],
    ));

    let pending = conn.tpc_recover().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0][0], Value::Int(1));
    assert_eq!(conn.tpc_state(), TpcState::None);
    conn.close().unwrap();
}

#[test]
fn buffered_cursor_scrolls_within_bounds() {
    let (_registry, pool, connector) = pool_setup("scrolling", 1);
    let conn = pool.get_connection().unwrap();

    connector.sessions()[0].push_result(result_set(
        &["n"],
        (0..4).map(|n| vec![Value::Int(n)]).collect(),
    ));

    let mut cursor = conn.cursor_with(CursorOptions::new().buffered(true));
    cursor.execute("SELECT n FROM seq", Params::None).unwrap();
    assert_eq!(cursor.rowcount(), 4);

    cursor.scroll(2, ScrollMode::Absolute).unwrap();
    let row = cursor.fetchone().unwrap().unwrap();
    assert_eq!(row.get(0), Some(&Value::Int(2)));

    assert!(cursor.scroll(1, ScrollMode::Relative).is_err());
    cursor.scroll(-3, ScrollMode::Relative).unwrap();
    let row = cursor.fetchone().unwrap().unwrap();
    assert_eq!(row.get(0), Some(&Value::Int(0)));

    drop(cursor);
    conn.close().unwrap();
}

#[test]
fn registry_name_is_unique_until_close() {
    let registry = PoolRegistry::new();
    let connector: Arc<dyn SessionConnector> = Arc::new(MockConnector::new());

    let pool = registry
        .create_pool(&PoolOptions::new("unique"), None, Arc::clone(&connector))
        .unwrap();
    assert!(matches!(
        registry.create_pool(&PoolOptions::new("unique"), None, Arc::clone(&connector)),
        Err(Error::Programming(_))
    ));

    pool.close();
    assert!(
        registry
            .create_pool(&PoolOptions::new("unique"), None, connector)
            .is_ok()
    );
}
