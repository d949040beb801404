pub mod mocks;

/// Routes `tracing` output through the test harness so it shows up for failing tests only.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
