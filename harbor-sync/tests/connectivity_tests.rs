use harbor_sync::ConnectivityMonitor;
use harbor_sync::connectivity::mock::ManualProbe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

const DELAY: Duration = Duration::from_secs(1);

fn monitor(online: bool) -> Arc<ConnectivityMonitor> {
    Arc::new(ConnectivityMonitor::new(online, DELAY))
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn online_edge_after_reconnect_delay() {
    let monitor = monitor(false);
    let mut edges = monitor.subscribe_online();

    monitor.set_reachable(true);
    assert!(monitor.is_online());
    settle().await;
    assert!(matches!(edges.try_recv(), Err(broadcast::error::TryRecvError::Empty)));

    tokio::time::sleep(DELAY + Duration::from_millis(10)).await;
    assert!(edges.try_recv().is_ok());
}

#[tokio::test(start_paused = true)]
async fn going_offline_is_silent() {
    let monitor = monitor(true);
    let mut edges = monitor.subscribe_online();

    monitor.set_reachable(false);
    assert!(!monitor.is_online());
    tokio::time::sleep(DELAY * 2).await;
    assert!(edges.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn repeated_online_signal_is_not_an_edge() {
    let monitor = monitor(true);
    let mut edges = monitor.subscribe_online();

    monitor.set_reachable(true);
    tokio::time::sleep(DELAY * 2).await;
    assert!(edges.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn flapping_link_suppresses_edge() {
    let monitor = monitor(false);
    let mut edges = monitor.subscribe_online();

    monitor.set_reachable(true);
    tokio::time::sleep(DELAY / 4).await;
    monitor.set_reachable(false);
    tokio::time::sleep(DELAY / 4).await;
    monitor.set_reachable(true);

    tokio::time::sleep(DELAY + Duration::from_millis(10)).await;
    assert!(edges.try_recv().is_ok());
    // Only the last transition is announced
    assert!(edges.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn link_lost_during_delay_announces_nothing() {
    let monitor = monitor(false);
    let mut edges = monitor.subscribe_online();

    monitor.set_reachable(true);
    tokio::time::sleep(DELAY / 2).await;
    monitor.set_reachable(false);

    tokio::time::sleep(DELAY * 2).await;
    assert!(edges.try_recv().is_err());
    assert!(!monitor.is_online());
}

#[tokio::test(start_paused = true)]
async fn refresh_polls_probe() {
    let probe = Arc::new(ManualProbe::new(false));
    let monitor = Arc::new(ConnectivityMonitor::new(true, DELAY).with_probe(probe.clone()));
    let mut edges = monitor.subscribe_online();

    assert!(!monitor.refresh().await);
    probe.set(true);
    assert!(monitor.refresh().await);

    tokio::time::sleep(DELAY * 2).await;
    assert!(edges.try_recv().is_ok());
}

#[tokio::test]
async fn refresh_without_probe_reports_state() {
    let monitor = monitor(true);
    assert!(monitor.refresh().await);
    monitor.set_reachable(false);
    assert!(!monitor.refresh().await);
}

#[tokio::test(start_paused = true)]
async fn platform_signal_drives_state() {
    let monitor = monitor(true);
    let mut edges = monitor.subscribe_online();
    let (tx, rx) = mpsc::channel(4);
    let handle = monitor.watch_signal(rx);

    tx.send(false).await.unwrap();
    settle().await;
    assert!(!monitor.is_online());

    tx.send(true).await.unwrap();
    settle().await;
    assert!(monitor.is_online());

    tokio::time::sleep(DELAY * 2).await;
    assert!(edges.try_recv().is_ok());

    drop(tx);
    handle.await.unwrap();
}
