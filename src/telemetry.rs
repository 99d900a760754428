use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();

/// Console logging, once per process. Without `RUST_LOG` the gateway logs at
/// debug for its own targets and info for everything else.
pub fn init_tracing() {
    let _ = INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tabq=debug"));
        fmt().with_env_filter(filter).init();
    });
}
