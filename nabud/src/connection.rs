//! Per-connection state: the selected channel/file, the last-served image, and sub-protocol
//! session bags, all guarded by one mutex as required by §5 (mutations must not allocate while
//! holding it).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::catalog::ChannelId;
use crate::image::Image;
use crate::io::Channel;
use crate::subproto::{NhacpSessions, RetronetSession};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
	Serial,
	TcpAccepted,
	TcpListener,
}

struct Selected {
	channel: Option<ChannelId>,
	file: Option<String>,
	last_image: Option<Arc<Image>>,
	retronet_enabled: bool,
}

/// A connection-wide lifecycle flag, set by RESET handling or by an external abort request and
/// observed by the adaptor loop between reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
	Running,
	Aborted,
}

pub struct Connection {
	pub id: u64,
	pub transport: Transport,
	pub name: String,
	pub file_root: Option<String>,

	channel: Mutex<Channel>,
	selected: Mutex<Selected>,
	state: Mutex<State>,

	nhacp: Mutex<NhacpSessions>,
	retronet: Mutex<Option<RetronetSession>>,

	enumerators: AtomicUsize,
	on_registry: AtomicBool,

	/// UNIX time this connection was created.
	pub created_at: u64,
	/// UNIX time of the last opcode successfully read off this connection's channel.
	last_activity: AtomicU64,
}

impl Connection {
	pub fn new(transport: Transport, name: String, channel: Channel, file_root: Option<String>) -> Arc<Self> {
		let now = runtime::time::unix() as u64;

		Arc::new(Self {
			id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
			transport,
			name,
			file_root,
			channel: Mutex::new(channel),
			selected: Mutex::new(Selected { channel: None, file: None, last_image: None, retronet_enabled: false }),
			state: Mutex::new(State::Running),
			nhacp: Mutex::new(NhacpSessions::default()),
			retronet: Mutex::new(None),
			enumerators: AtomicUsize::new(0),
			on_registry: AtomicBool::new(false),
			created_at: now,
			last_activity: AtomicU64::new(now),
		})
	}

	/// Record that this connection has just been active; called once per successfully dispatched
	/// opcode. Used for registry enumeration output and stale-connection diagnostics.
	pub fn touch(&self) {
		self.last_activity.store(runtime::time::unix() as u64, Ordering::Relaxed);
	}

	pub fn last_activity(&self) -> u64 {
		self.last_activity.load(Ordering::Relaxed)
	}

	pub fn channel_mut(&self) -> std::sync::MutexGuard<'_, Channel> {
		self.channel.lock().expect("connection channel mutex poisoned")
	}

	// --- state / abort -------------------------------------------------

	pub fn state(&self) -> State {
		*self.state.lock().expect("connection state mutex poisoned")
	}

	pub fn abort(&self) {
		*self.state.lock().expect("connection state mutex poisoned") = State::Aborted;
		self.channel_mut().shutdown();
	}

	// --- registry bookkeeping (see crate::registry) ---------------------

	pub(crate) fn mark_on_registry(&self, on: bool) {
		self.on_registry.store(on, Ordering::Release);
	}

	pub(crate) fn is_on_registry(&self) -> bool {
		self.on_registry.load(Ordering::Acquire)
	}

	pub(crate) fn enter_enumerator(&self) {
		self.enumerators.fetch_add(1, Ordering::AcqRel);
	}

	pub(crate) fn leave_enumerator(&self) -> usize {
		self.enumerators.fetch_sub(1, Ordering::AcqRel) - 1
	}

	pub(crate) fn enumerator_count(&self) -> usize {
		self.enumerators.load(Ordering::Acquire)
	}

	// --- selected channel/file/image -------------------------------------

	pub fn selected_channel(&self) -> Option<ChannelId> {
		self.selected.lock().expect("connection selected-state mutex poisoned").channel
	}

	pub fn retronet_enabled(&self) -> bool {
		self.selected.lock().expect("connection selected-state mutex poisoned").retronet_enabled
	}

	/// Select a new channel. Per spec.md §3, this always clears the selected file and refreshes
	/// `retronet_enabled` atomically with the channel change.
	pub fn set_channel(&self, channel: Option<ChannelId>, retronet_enabled: bool) {
		let mut s = self.selected.lock().expect("connection selected-state mutex poisoned");
		s.channel = channel;
		s.file = None;
		s.retronet_enabled = retronet_enabled;
	}

	/// Read the selected file name, copying it out under the lock. Retries if the string grows
	/// between measuring its length and copying it, per §4.6's documented pattern; allocation
	/// itself happens outside the lock.
	pub fn selected_file(&self) -> Option<String> {
		loop {
			let len = {
				let s = self.selected.lock().expect("connection selected-state mutex poisoned");
				match &s.file {
					Some(f) => f.len(),
					None => return None,
				}
			};

			let mut buf = String::with_capacity(len);

			let s = self.selected.lock().expect("connection selected-state mutex poisoned");
			match &s.file {
				Some(f) if f.len() == len => {
					buf.push_str(f);
					return Some(buf);
				}
				Some(_) => continue, // grew since we measured it; retry
				None => return None,
			}
		}
	}

	pub fn set_selected_file(&self, file: Option<String>) {
		self.selected.lock().expect("connection selected-state mutex poisoned").file = file;
	}

	pub fn last_image(&self) -> Option<Arc<Image>> {
		self.selected.lock().expect("connection selected-state mutex poisoned").last_image.clone()
	}

	pub fn set_last_image(&self, image: Option<Arc<Image>>) {
		self.selected.lock().expect("connection selected-state mutex poisoned").last_image = image;
	}

	/// Clear the last-served image only if it is still `expect` (by pointer identity): used by a
	/// segment finisher that wants to release its image without clobbering one that raced in
	/// ahead of it (e.g. a RESET on another thread, or a new channel selection).
	pub fn clear_last_image_if(&self, expect: &Arc<Image>) -> bool {
		let mut s = self.selected.lock().expect("connection selected-state mutex poisoned");

		match &s.last_image {
			Some(cur) if Arc::ptr_eq(cur, expect) => {
				s.last_image = None;
				true
			}
			_ => false,
		}
	}

	// --- sub-protocol session state --------------------------------------

	pub fn nhacp(&self) -> std::sync::MutexGuard<'_, NhacpSessions> {
		self.nhacp.lock().expect("connection nhacp mutex poisoned")
	}

	pub fn retronet(&self) -> std::sync::MutexGuard<'_, Option<RetronetSession>> {
		self.retronet.lock().expect("connection retronet mutex poisoned")
	}

	/// RESET handling and teardown: clear NHACP sessions and any stored RetroNet blobs.
	pub fn reboot(&self) {
		self.nhacp().clear();
		*self.retronet() = None;
	}

	/// Release the last-served image and run `reboot`'s teardown. The registry removal itself
	/// (which blocks on outstanding enumerators) is driven by [`crate::registry::Registry::remove`].
	pub fn destroy(self: &Arc<Self>) {
		self.set_last_image(None);
		self.reboot();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::image::Image;

	fn conn() -> Arc<Connection> {
		let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
		let addr = listener.local_addr().expect("local addr");
		let client = std::net::TcpStream::connect(addr).expect("connect loopback");
		let (server, _) = listener.accept().expect("accept loopback");
		drop(client);
		Connection::new(Transport::TcpAccepted, "test".into(), Channel::Tcp(server), None)
	}

	#[test]
	fn set_channel_clears_selected_file() {
		let c = conn();
		c.set_channel(Some(1), false);
		c.set_selected_file(Some("custom.bin".into()));
		assert_eq!(c.selected_file(), Some("custom.bin".into()));

		c.set_channel(Some(2), true);
		assert_eq!(c.selected_file(), None);
		assert_eq!(c.selected_channel(), Some(2));
		assert!(c.retronet_enabled());
	}

	#[test]
	fn clear_last_image_if_only_matches_current_image() {
		let c = conn();
		let a = Arc::new(Image { name: "a".into(), bytes: Arc::from(&b""[..]), id: 1, channel: None, kind: crate::catalog::ChannelKind::Nabu });
		let b = Arc::new(Image { name: "b".into(), bytes: Arc::from(&b""[..]), id: 2, channel: None, kind: crate::catalog::ChannelKind::Nabu });

		c.set_last_image(Some(a.clone()));
		assert!(!c.clear_last_image_if(&b));
		assert!(c.clear_last_image_if(&a));
		assert!(c.last_image().is_none());
	}

	#[test]
	fn reboot_clears_subprotocol_state() {
		let c = conn();
		c.nhacp().mark_started();
		*c.retronet() = Some(RetronetSession { handle: 1 });

		c.reboot();

		assert!(!c.nhacp().is_started());
		assert!(c.retronet().is_none());
	}
}
