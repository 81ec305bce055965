//! The image provider interface: the only way the adaptor state machine resolves a requested
//! segment into bytes. Real deployments back this with local files, HTTP-fetched remote archives,
//! and encrypted PAK bundles; this crate implements only the local-file case (see DESIGN.md),
//! since the others' fetch/decrypt bodies are named in the specification as external
//! collaborators.

use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::{Catalog, ChannelId};
use crate::connection::Connection;
use crate::image::Image;

/// Resolves `(channel, image id)` into image bytes, and owns image lifetime.
pub trait ImageProvider: Send + Sync {
	/// Look up an image for `conn`'s currently-selected channel and file.
	fn load(&self, conn: &Connection, image_id: u32) -> Option<Arc<Image>>;

	/// Release a previously-loaded image. `was_last_segment` tells the provider whether the
	/// consumer just sent the final segment of `image`, which a caching provider can use as an
	/// eviction signal.
	fn unload(&self, conn: &Connection, image: Arc<Image>, was_last_segment: bool);

	/// Validate and resolve a channel selection, or `None` if `channel` is not in the catalogue.
	fn channel_select(&self, conn: &Connection, channel: ChannelId) -> Option<Arc<crate::catalog::ChannelEntry>>;
}

/// Serves images as files under a configured root directory, one subdirectory per channel.
pub struct LocalProvider {
	root: PathBuf,
	catalog: Catalog,
}

impl LocalProvider {
	pub fn new(root: impl Into<PathBuf>, catalog: Catalog) -> Self {
		Self { root: root.into(), catalog }
	}

	fn path_for(&self, channel: ChannelId, file: &str) -> PathBuf {
		self.root.join(channel.to_string()).join(file)
	}
}

impl ImageProvider for LocalProvider {
	fn load(&self, conn: &Connection, image_id: u32) -> Option<Arc<Image>> {
		let channel_id = conn.selected_channel()?;
		let entry = self.catalog.get(channel_id)?;
		let file = conn.selected_file().unwrap_or_else(|| entry.default_file.clone());

		let path = self.path_for(channel_id, &file);

		let bytes = match std::fs::read(&path) {
			Ok(bytes) => bytes,
			Err(err) => {
				log::warn!(target: "nabud::provider", "failed to read {}: {err}", path.display());
				return None;
			}
		};

		Some(Arc::new(Image { name: file, bytes: bytes.into(), id: image_id, channel: Some(channel_id), kind: entry.kind }))
	}

	fn unload(&self, _conn: &Connection, image: Arc<Image>, was_last_segment: bool) {
		log::trace!(target: "nabud::provider", "releasing image {} (last segment: {was_last_segment})", image.name);
	}

	fn channel_select(&self, _conn: &Connection, channel: ChannelId) -> Option<Arc<crate::catalog::ChannelEntry>> {
		self.catalog.get(channel)
	}
}
