//! The process-wide connection registry: one mutex, one condvar, used mainly for operator-facing
//! enumeration (status reporting) without holding the global lock during visitor callbacks.

use std::sync::{Arc, Condvar, Mutex};

use crate::connection::Connection;

#[derive(Default)]
pub struct Registry {
	inner: Mutex<Vec<Arc<Connection>>>,
	retired: Condvar,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, conn: Arc<Connection>) {
		conn.mark_on_registry(true);
		self.inner.lock().expect("registry mutex poisoned").push(conn);
	}

	/// Unlink `conn`, waiting until no enumerator holds a reference to it. Returns whether `conn`
	/// was found on the registry.
	pub fn remove(&self, conn: &Arc<Connection>) -> bool {
		let mut list = self.inner.lock().expect("registry mutex poisoned");

		while conn.enumerator_count() > 0 {
			list = self.retired.wait(list).expect("registry mutex poisoned");
		}

		let Some(pos) = list.iter().position(|c| Arc::ptr_eq(c, conn)) else {
			return false;
		};

		list.remove(pos);
		conn.mark_on_registry(false);
		true
	}

	/// Visit each live connection, stopping early as soon as `visitor` returns `false`. The
	/// registry mutex is not held while `visitor` runs: instead each visited node's enumerator
	/// count is bumped so a concurrent `remove` waits for the visit to finish rather than racing
	/// ahead of it.
	pub fn enumerate(&self, mut visitor: impl FnMut(&Arc<Connection>) -> bool) -> bool {
		let snapshot = {
			let list = self.inner.lock().expect("registry mutex poisoned");
			list.clone()
		};

		for conn in &snapshot {
			if !conn.is_on_registry() {
				continue;
			}

			conn.enter_enumerator();
			let keep_going = visitor(conn);
			conn.leave_enumerator();
			self.retired.notify_all();

			if !keep_going {
				return false;
			}
		}

		true
	}

	pub fn len(&self) -> usize {
		self.inner.lock().expect("registry mutex poisoned").len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
