//! `tracing` setup.
//!
//! The binary calls [`init_subscriber`] once, before settings are loaded, so
//! loader warnings reach stderr. Once the configured level is known it is
//! applied through the returned [`LogFilterHandle`]. Tests install a
//! thread-local capturing subscriber with [`capture_logs`] and assert on what
//! was logged.

pub mod capture;

pub use capture::{CapturedEvent, CapturedLogs, capture_logs};

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

/// Level used before settings have been read.
pub const BOOTSTRAP_LEVEL: &str = "info";

/// Swaps the filter of an installed subscriber.
#[derive(Clone, Debug)]
pub struct LogFilterHandle {
    inner: reload::Handle<EnvFilter, Registry>,
}

impl LogFilterHandle {
    /// Filter at `level`. `RUST_LOG` still wins when set.
    pub fn set_level(&self, level: &str) {
        self.set_filter(filter_for(level));
    }

    fn set_filter(&self, filter: EnvFilter) {
        if let Err(e) = self.inner.reload(filter) {
            tracing::warn!(error = %e, "could not change log level");
        }
    }
}

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Compact, human-readable output to `writer`, behind a reloadable filter.
fn layered<W>(
    filter: EnvFilter,
    writer: W,
) -> (impl Subscriber + Send + Sync + 'static, LogFilterHandle)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let (filter, inner) = reload::Layer::new(filter);
    let subscriber = tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(writer)
            .compact(),
    );
    (subscriber, LogFilterHandle { inner })
}

/// Install the global subscriber on stderr at `level`.
///
/// `RUST_LOG` wins over `level` when set. Returns `None` if a global
/// subscriber was already installed.
pub fn init_subscriber(level: &str) -> Option<LogFilterHandle> {
    let (subscriber, handle) = layered(filter_for(level), std::io::stderr);
    subscriber.try_init().ok().map(|()| handle)
}
