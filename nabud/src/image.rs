//! A resolvable artifact served over the classic protocol: a boot ROM, a program cycle, or (for
//! PAK channels) a pre-segmented archive.

use std::sync::Arc;

use crate::catalog::{ChannelId, ChannelKind};

#[derive(Clone)]
pub struct Image {
	pub name: String,
	pub bytes: Arc<[u8]>,
	pub id: u32,
	/// Absent for synthetic images, such as the real-time clock packet.
	pub channel: Option<ChannelId>,
	pub kind: ChannelKind,
}

impl Image {
	pub fn len(&self) -> usize {
		self.bytes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.bytes.is_empty()
	}

	pub fn is_pak(&self) -> bool {
		matches!(self.kind, ChannelKind::Pak)
	}
}
