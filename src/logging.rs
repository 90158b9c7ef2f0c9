use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install the global structured-logging subscriber. Safe to call more
/// than once (later calls are ignored), which keeps tests simple.
pub fn init() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
