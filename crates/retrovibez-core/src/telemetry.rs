//! Tracing initialisation for the retrovibez binary.
//!
//! Logs go to stderr; stdout carries the run report printed by the CLI.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the requested level; everything else
/// (plotting, runtime) is held at `warn`.
const OWN_TARGETS: [&str; 3] = ["retrovibez", "retrovibez_core", "retrovibez_pipeline"];

/// Filter directives used when `RUST_LOG` is not set.
fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    OWN_TARGETS
        .iter()
        .fold(String::from("warn"), |acc, target| format!("{acc},{target}={level}"))
}

/// Initialise the global tracing subscriber.
///
/// `level` applies to the retrovibez crates unless `RUST_LOG` overrides it.
/// Event targets are shown only at `debug` and below. Only the first call
/// in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let with_target = level >= Level::DEBUG;

    let human = (!json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(with_target)
    });
    let machine = json.then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(with_target)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(human)
        .with(machine)
        .try_init()
        .ok();
}
