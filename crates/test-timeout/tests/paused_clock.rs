use std::time::Duration;

#[test_timeout::tokio_timeout_test(1, paused)]
async fn paused_clock_can_outrun_the_limit() {
    let before = tokio::time::Instant::now();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(before.elapsed() >= Duration::from_secs(120));
}

#[test_timeout::tokio_timeout_test(5)]
async fn real_clock_test_finishes_inside_the_limit() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[test_timeout::timeout(5)]
fn sync_test_finishes_inside_the_limit() {
    assert_eq!(2 + 2, 4);
}
