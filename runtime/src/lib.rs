use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod logger;
pub mod time;

pub use logger::Logger;

/// Process-wide shutdown flag, flipped by the `Ctrl+C` handler installed in [`install`].
///
/// Every long-lived loop in the server (listener accept loops, connection workers) polls this
/// between blocking operations so that a single signal can unwind the whole process in an orderly
/// fashion instead of each thread needing its own signal plumbing.
#[derive(Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
	pub fn new() -> Self {
		Self(Arc::new(AtomicBool::new(false)))
	}

	#[inline]
	pub fn requested(&self) -> bool {
		self.0.load(Ordering::Relaxed)
	}

	#[inline]
	pub fn request(&self) {
		self.0.store(true, Ordering::Relaxed);
	}
}

/// Install the process-wide logger and return a [`Shutdown`] flag wired to `Ctrl+C`.
pub fn install(level: log::LevelFilter) -> Result<Shutdown, log::SetLoggerError> {
	log::set_logger(&Logger).map(|()| log::set_max_level(level))?;

	let shutdown = Shutdown::new();
	let handler = shutdown.clone();

	// A second Ctrl+C while shutdown is already in progress forces an immediate exit; this
	// mirrors an operator's expectation that mashing Ctrl+C eventually works even if a worker
	// thread is stuck in a blocking read that hasn't noticed the flag yet.
	if let Err(err) = ctrlc::set_handler(move || {
		if handler.requested() {
			log::warn!(target: "runtime", "received a second interrupt, exiting immediately");
			std::process::exit(130);
		}

		log::info!(target: "runtime", "shutting down");
		handler.request();
	}) {
		log::error!(target: "runtime", "failed to install Ctrl+C handler: {err}");
	}

	Ok(shutdown)
}
