use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::Environment;

/// Install the global subscriber. `RUST_LOG` overrides the default `info`
/// filter; production logs are JSON lines.
pub fn init_logging(environment: Environment) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match environment {
        Environment::Production => registry
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .init(),
        Environment::Development | Environment::Test => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init(),
    }
}
