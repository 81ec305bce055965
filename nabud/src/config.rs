//! TOML configuration: listen addresses, serial port profiles, and the channel catalogue.
//!
//! Parsing lives outside the hot protocol loop, so unlike the rest of the crate it favors a rich
//! `thiserror` error enum over `utils::error::Result<T, ()>`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::catalog::{Catalog, ChannelEntry, ChannelKind};
use crate::io::serial::StopBits;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Read { path: PathBuf, #[source] source: std::io::Error },

	#[error("failed to parse {path}: {source}")]
	Parse { path: PathBuf, #[source] source: toml::de::Error },

	#[error("channel {id} has unknown type {kind:?}")]
	UnknownChannelKind { id: i16, kind: String },
}

#[derive(Debug, Deserialize)]
pub struct Config {
	#[serde(default)]
	pub listen: Listen,
	#[serde(default)]
	pub serial: Vec<SerialDevice>,
	#[serde(default)]
	pub channel: Vec<ChannelConfig>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Listen {
	/// TCP ports the server should accept classic-protocol connections on.
	#[serde(default)]
	pub tcp: Vec<u16>,
}

#[derive(Debug, Deserialize)]
pub struct SerialDevice {
	pub path: String,
	pub baud: Option<u32>,
	#[serde(default)]
	pub two_stop_bits: Option<bool>,
	#[serde(default)]
	pub rtscts: bool,
}

impl SerialDevice {
	pub fn stop_bits(&self) -> StopBits {
		match self.two_stop_bits {
			Some(false) => StopBits::One,
			_ => StopBits::Two,
		}
	}
}

#[derive(Debug, Deserialize)]
pub struct ChannelConfig {
	pub id: i16,
	pub kind: String,
	pub default_file: String,
	#[serde(default)]
	pub retronet_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct Root {
	#[serde(flatten)]
	pub config: Config,
	/// Directory local-file channels resolve their files under; see `nabud::provider::LocalProvider`.
	pub storage_root: PathBuf,
}

impl Root {
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;

		toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_owned(), source })
	}

	pub fn catalog(&self) -> Result<Catalog, ConfigError> {
		let mut entries = Vec::with_capacity(self.config.channel.len());

		for c in &self.config.channel {
			let kind = match c.kind.as_str() {
				"pak" => ChannelKind::Pak,
				"nabu" => ChannelKind::Nabu,
				other => {
					return Err(ConfigError::UnknownChannelKind { id: c.id, kind: other.to_owned() });
				}
			};

			entries.push(ChannelEntry { id: c.id, kind, default_file: c.default_file.clone(), retronet_enabled: c.retronet_enabled });
		}

		Ok(Catalog::new(entries))
	}
}
