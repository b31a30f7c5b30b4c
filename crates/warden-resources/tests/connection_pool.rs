mod common;

use common::{FakeDbError, FakeManager};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use warden_core::Error;
use warden_resources::{ConnectionPool, PoolConfig};

fn pool_config(min_size: usize, max_size: usize) -> PoolConfig {
    PoolConfig {
        min_size,
        max_size,
        connection_timeout: Duration::from_millis(200),
        max_inactive_lifetime: Duration::from_secs(300),
    }
}

#[tokio::test]
async fn initialize_opens_min_size_once() {
    let manager = FakeManager::default();
    let pool = ConnectionPool::new(manager.clone(), pool_config(2, 4));

    pool.initialize().await.unwrap();
    pool.initialize().await.unwrap();

    let stats = pool.get_stats();
    assert_eq!(stats.size, 2);
    assert_eq!(stats.idle, 2);
    assert_eq!(stats.active, 0);
    assert_eq!(manager.opened(), 2);
}

#[tokio::test]
async fn initialize_reports_connect_failure() {
    let manager = FakeManager::default();
    manager.fail_connect.store(true, Ordering::SeqCst);
    let pool = ConnectionPool::new(manager, pool_config(1, 2));

    match pool.initialize().await {
        Err(Error::Connection(msg)) => assert!(msg.contains("indisponível")),
        other => panic!("esperava erro de conexão, veio {:?}", other.err()),
    }
}

#[tokio::test]
async fn connection_goes_back_on_drop() {
    let manager = FakeManager::default();
    let pool = ConnectionPool::new(manager.clone(), pool_config(1, 2));

    {
        let mut conn = pool.get_connection().await.unwrap();
        let rows = conn.query("SELECT 1", &[json!(1)]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(conn.stats().queries, 1);
        assert_eq!(pool.get_stats().active, 1);
    }

    let stats = pool.get_stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.acquisitions, 1);

    let conn = pool.get_connection().await.unwrap();
    assert_eq!(conn.id, 1);
    assert_eq!(manager.opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn acquisition_beyond_max_blocks_then_times_out() {
    let pool = Arc::new(ConnectionPool::new(FakeManager::default(), pool_config(0, 2)));

    let first = pool.get_connection().await.unwrap();
    let _second = pool.get_connection().await.unwrap();

    match pool.get_connection().await {
        Err(Error::PoolTimeout(timeout)) => assert_eq!(timeout, Duration::from_millis(200)),
        other => panic!("esperava timeout, veio {:?}", other.err()),
    }
    assert_eq!(pool.get_stats().timeouts, 1);
    assert!(Error::PoolTimeout(Duration::ZERO).is_retryable());

    // a terceira retirada espera até uma conexão voltar
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get_connection().await.map(|conn| conn.id) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    drop(first);
    assert_eq!(waiter.await.unwrap().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn hanging_connect_is_bounded_by_timeout() {
    let manager = FakeManager::default();
    manager.hang_connect.store(true, Ordering::SeqCst);
    let pool = ConnectionPool::new(manager.clone(), pool_config(0, 1));

    match pool.get_connection().await {
        Err(Error::PoolTimeout(timeout)) => assert_eq!(timeout, Duration::from_millis(200)),
        other => panic!("esperava timeout, veio {:?}", other.err()),
    }
    let stats = pool.get_stats();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.size, 0);
    assert_eq!(stats.active, 0);

    // a vaga reservada pela tentativa cancelada voltou
    manager.hang_connect.store(false, Ordering::SeqCst);
    let conn = pool.get_connection().await.unwrap();
    assert_eq!(conn.id, 1);
}

#[tokio::test(start_paused = true)]
async fn hanging_initialize_is_bounded_by_timeout() {
    let manager = FakeManager::default();
    manager.hang_connect.store(true, Ordering::SeqCst);
    let pool = ConnectionPool::new(manager.clone(), pool_config(1, 2));

    assert!(matches!(pool.get_connection().await, Err(Error::PoolTimeout(_))));
    assert_eq!(pool.get_stats().timeouts, 1);

    manager.hang_connect.store(false, Ordering::SeqCst);
    let conn = pool.get_connection().await.unwrap();
    assert_eq!(conn.id, 1);
    assert_eq!(pool.get_stats().size, 1);
}

#[tokio::test]
async fn blocked_acquisition_wakes_when_connection_returns() {
    let pool = ConnectionPool::new(
        FakeManager::default(),
        PoolConfig {
            connection_timeout: Duration::from_secs(30),
            ..pool_config(0, 1)
        },
    );
    let held = pool.get_connection().await.unwrap();

    let mut waiting = tokio_test::task::spawn(pool.get_connection());
    tokio_test::assert_pending!(waiting.poll());

    drop(held);
    assert!(waiting.is_woken());
    let conn = tokio_test::assert_ready_ok!(waiting.poll());
    assert_eq!(conn.id, 1);
}

#[tokio::test]
async fn closed_pool_rejects_acquisitions() {
    let manager = FakeManager::default();
    let pool = ConnectionPool::new(manager.clone(), pool_config(2, 2));
    pool.initialize().await.unwrap();

    pool.close().await;
    pool.close().await;

    assert!(matches!(pool.get_connection().await, Err(Error::PoolClosed)));
    assert_eq!(manager.closed(), 2);
    assert!(pool.get_stats().closed);
}

#[tokio::test]
async fn connection_in_use_is_closed_when_returned_after_close() {
    let manager = FakeManager::default();
    let pool = ConnectionPool::new(manager.clone(), pool_config(0, 2));

    let conn = pool.get_connection().await.unwrap();
    pool.close().await;
    assert_eq!(manager.closed(), 0);

    drop(conn);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.closed(), 1);
    assert_eq!(pool.get_stats().size, 0);
}

#[tokio::test]
async fn query_errors_propagate_unchanged() {
    let pool = ConnectionPool::new(FakeManager::default(), pool_config(1, 1));
    let mut conn = pool.get_connection().await.unwrap();

    match conn.query("FAIL select", &[]).await {
        Err(FakeDbError::BadQuery(sql)) => assert_eq!(sql, "FAIL select"),
        other => panic!("esperava BadQuery, veio {:?}", other.map(|rows| rows.len())),
    }
    assert_eq!(conn.execute("UPDATE t SET x = ?", &[json!(1)]).await.unwrap(), 1);

    let stats = conn.stats();
    assert_eq!(stats.queries, 2);
    assert_eq!(stats.errors, 1);
    assert!(stats.last_used.is_some());
}

#[tokio::test]
async fn connection_returns_when_caller_fails() {
    async fn failing_work(pool: &ConnectionPool<FakeManager>) -> anyhow::Result<()> {
        let mut conn = pool.get_connection().await?;
        conn.execute("FAIL insert", &[]).await?;
        Ok(())
    }

    let pool = ConnectionPool::new(FakeManager::default(), pool_config(1, 1));
    assert!(failing_work(&pool).await.is_err());

    let stats = pool.get_stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.idle, 1);
    // a única vaga voltou
    assert!(pool.get_connection().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn stale_idle_connections_are_recycled() {
    let manager = FakeManager::default();
    let pool = ConnectionPool::new(
        manager.clone(),
        PoolConfig {
            max_inactive_lifetime: Duration::from_secs(10),
            ..pool_config(1, 2)
        },
    );
    pool.initialize().await.unwrap();

    tokio::time::advance(Duration::from_secs(11)).await;
    let conn = pool.get_connection().await.unwrap();

    assert_eq!(conn.id, 2);
    assert_eq!(manager.closed(), 1);
    let stats = pool.get_stats();
    assert_eq!(stats.recycled, 1);
    assert_eq!(stats.size, 1);
}
