//! Command-line flags layered on top of the TOML configuration file.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "nabud", about = "NABU Network Adaptor emulator")]
pub struct Cli {
	/// Path to the TOML configuration file.
	#[arg(long, default_value = "/etc/nabud/nabud.conf")]
	pub conf: PathBuf,

	/// Additional TCP port to listen on (repeatable), on top of any configured in the TOML file.
	#[arg(long = "listen")]
	pub listen: Vec<u16>,

	/// Increase log verbosity (repeatable).
	#[arg(short = 'v', action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Decrease log verbosity (repeatable).
	#[arg(short = 'q', action = clap::ArgAction::Count)]
	pub quiet: u8,

	/// Disable ANSI color in log output.
	#[arg(long)]
	pub no_color: bool,
}

impl Cli {
	pub fn log_level(&self) -> log::LevelFilter {
		let base = log::LevelFilter::Info as i8;
		let adjusted = base + i8::try_from(self.verbose).unwrap_or(i8::MAX) - i8::try_from(self.quiet).unwrap_or(i8::MAX);

		match adjusted.clamp(log::LevelFilter::Off as i8, log::LevelFilter::Trace as i8) {
			l if l == log::LevelFilter::Off as i8 => log::LevelFilter::Off,
			l if l == log::LevelFilter::Error as i8 => log::LevelFilter::Error,
			l if l == log::LevelFilter::Warn as i8 => log::LevelFilter::Warn,
			l if l == log::LevelFilter::Info as i8 => log::LevelFilter::Info,
			l if l == log::LevelFilter::Debug as i8 => log::LevelFilter::Debug,
			_ => log::LevelFilter::Trace,
		}
	}
}
