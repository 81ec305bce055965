//! The channel catalogue: the configured set of selectable channels, keyed by a signed 16-bit
//! number.

use std::collections::HashMap;
use std::sync::Arc;

pub type ChannelId = i16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
	/// Segments are pre-wrapped; bytes on disk already contain header+payload+CRC framing.
	Pak,
	/// Raw image bytes; the adaptor slices and frames segments itself.
	Nabu,
}

#[derive(Clone, Debug)]
pub struct ChannelEntry {
	pub id: ChannelId,
	pub kind: ChannelKind,
	pub default_file: String,
	pub retronet_enabled: bool,
}

/// The process-wide channel catalogue, built once at startup from configuration.
#[derive(Default)]
pub struct Catalog {
	channels: HashMap<ChannelId, Arc<ChannelEntry>>,
}

impl Catalog {
	pub fn new(channels: impl IntoIterator<Item = ChannelEntry>) -> Self {
		Self { channels: channels.into_iter().map(|c| (c.id, Arc::new(c))).collect() }
	}

	pub fn get(&self, id: ChannelId) -> Option<Arc<ChannelEntry>> {
		self.channels.get(&id).cloned()
	}
}
