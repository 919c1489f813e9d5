//! Logging in tests is important for troubleshooting, but works very differently than in
//! production: events go to the test harness's captured stdout, and initialization must be
//! idempotent because every `#[tokio::test]` body races to be first.
use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber for the current test process, once.
///
/// The filter comes from `RUST_LOG`, defaulting to `debug` for workspace crates with the
/// usual noisy HTTP internals quieted down.
pub fn init() {
    static INIT: OnceCell<()> = OnceCell::new();

    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("h2=warn,hyper=info,rustls=info,aws=info,debug"));

        // a prior subscriber (another crate's init) is not an error
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
