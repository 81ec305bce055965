//! Sub-protocol dispatch. `RetroNet` and `NHACP` are named by the specification as external
//! collaborators whose payload semantics are out of scope; what's implemented here is just enough
//! opcode recognition and session-teardown plumbing for the classic-protocol loop to dispatch
//! through them correctly.

use crate::connection::Connection;

/// An opcode handler that sits alongside the classic protocol on the same byte stream. Per-
/// connection teardown of whatever state a sub-protocol accumulates is handled directly by
/// [`Connection::reboot`](crate::connection::Connection::reboot), not through this trait, since
/// `Connection` owns the session storage these handlers mutate.
pub trait SubProtocol: Send + Sync {
	/// Recognise and handle `opcode`, returning `true` if it claimed it. Returning `false` lets
	/// the classic dispatcher (or the next sub-protocol) try it instead.
	fn request(&self, conn: &Connection, opcode: u8) -> bool;
}

/// Per-connection NHACP session table. A real implementation keys this by session id and stores
/// open file handles/credit state; this crate tracks only whether NHACP has been started.
#[derive(Default)]
pub struct NhacpSessions {
	started: bool,
}

impl NhacpSessions {
	pub fn clear(&mut self) {
		self.started = false;
	}

	pub fn is_started(&self) -> bool {
		self.started
	}

	pub fn mark_started(&mut self) {
		self.started = true;
	}
}

pub struct Nhacp;

const NHACP_START: u8 = 0x8F;

impl SubProtocol for Nhacp {
	fn request(&self, conn: &Connection, opcode: u8) -> bool {
		if opcode != NHACP_START {
			return false;
		}

		conn.nhacp().mark_started();
		log::debug!(target: "nabud::subproto", "nhacp session started on {}", conn.name);
		true
	}
}

/// Per-connection RetroNet session state: a single open remote-file handle, at most.
pub struct RetronetSession {
	pub handle: u8,
}

pub struct RetroNet;

const RETRONET_FH_OPEN: u8 = 0xA1;

impl SubProtocol for RetroNet {
	fn request(&self, conn: &Connection, opcode: u8) -> bool {
		if opcode != RETRONET_FH_OPEN {
			return false;
		}

		if !conn.retronet_enabled() {
			log::debug!(target: "nabud::subproto", "retronet opcode on {} without selected retronet channel", conn.name);
			return true;
		}

		*conn.retronet() = Some(RetronetSession { handle: 0 });
		true
	}
}
