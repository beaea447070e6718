//! Process-wide `tracing` subscriber for the binary.
//!
//! Events go to stderr so command output on stdout (status JSON, authorization URLs) stays
//! machine-readable. `RUST_LOG` overrides the default `info` filter.

// crates.io
use tracing_subscriber::{
	EnvFilter, Layer, filter::ParseError, layer::SubscriberExt, util::SubscriberInitExt,
};
// self
use crate::{_prelude::*, config::LogFormat};

const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn,h2=warn";

/// Failures while installing the subscriber.
#[derive(Debug, ThisError)]
pub enum LoggingError {
	/// `RUST_LOG` could not be parsed.
	#[error("RUST_LOG is not a valid filter.")]
	Filter(#[from] ParseError),
	/// Another global subscriber is already installed.
	#[error("A global tracing subscriber is already installed.")]
	AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs the global subscriber with the requested output format.
pub fn init(format: LogFormat) -> Result<(), LoggingError> {
	let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
		Ok(raw) if !raw.trim().is_empty() => EnvFilter::try_new(raw)?,
		_ => EnvFilter::try_new(DEFAULT_FILTER)?,
	};
	let fmt_layer = match format {
		LogFormat::Pretty =>
			tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr).boxed(),
		LogFormat::Json => tracing_subscriber::fmt::layer()
			.json()
			.with_current_span(true)
			.with_writer(std::io::stderr)
			.boxed(),
	};

	tracing_subscriber::registry().with(filter).with(fmt_layer).try_init()?;

	Ok(())
}
