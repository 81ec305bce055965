//! Transport abstraction shared by serial and accepted-TCP connections, plus the watchdog timeout
//! convention the adaptor loop relies on.

pub mod serial;
pub mod tcp;

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use serial::SerialPort;

/// The default duration the watchdog is armed for while servicing a single request.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll quantum used while the watchdog is disarmed: the read is re-issued with this bound
/// repeatedly instead of blocking forever, so an external abort request is noticed promptly
/// without needing platform-specific cancellation of an in-flight read.
const IDLE_POLL: Duration = Duration::from_secs(2);

/// A byte channel to one NABU client, either a serial port or an accepted TCP connection. The
/// `Listener` variant carries no bytes; it exists only so a passive listener can be given a
/// [`crate::connection::Connection`] of its own for registry bookkeeping and teardown.
pub enum Channel {
	Serial(SerialPort),
	Tcp(TcpStream),
	Listener,
}

impl Channel {
	pub fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
		match self {
			Channel::Serial(s) => s.set_read_timeout(timeout),
			Channel::Tcp(s) => s.set_read_timeout(timeout),
			Channel::Listener => Ok(()),
		}
	}

	pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
		match self {
			Channel::Serial(s) => s.write_all(buf),
			Channel::Tcp(s) => s.write_all(buf),
			Channel::Listener => Err(io::Error::new(io::ErrorKind::Unsupported, "listener channel carries no bytes")),
		}
	}

	pub fn write_one(&mut self, byte: u8) -> io::Result<()> {
		self.write_all(&[byte])
	}

	/// Shut down the underlying transport, causing any in-progress or future read/write on it to
	/// fail. Used by an external abort to unwedge a worker blocked in [`Channel::read_exact`].
	pub fn shutdown(&self) {
		if let Channel::Tcp(s) = self {
			let _ = s.shutdown(std::net::Shutdown::Both);
		}
	}

	fn read_once(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		match self {
			Channel::Serial(s) => s.read(buf),
			Channel::Tcp(s) => s.read(buf),
			Channel::Listener => Err(io::Error::new(io::ErrorKind::Unsupported, "listener channel carries no bytes")),
		}
	}

	/// Read exactly `buf.len()` bytes within one poll slice: `deadline` if armed, or
	/// [`IDLE_POLL`] if disarmed (`None`).
	///
	/// A slice elapsing without filling `buf` is reported as `TimedOut` in both cases; the two
	/// differ only in what the caller does with that: an armed caller treats it as a genuine
	/// watchdog expiry, while a disarmed caller (see [`Adaptor::run`](crate::adaptor::Adaptor::run))
	/// re-issues the read after checking for an external abort, which is how "wait forever for the
	/// next request" stays interruptible without a platform-specific cancellation primitive.
	pub fn read_exact(&mut self, buf: &mut [u8], deadline: Option<Duration>) -> io::Result<()> {
		let mut filled = 0;

		self.set_timeout(Some(deadline.unwrap_or(IDLE_POLL)))?;

		while filled < buf.len() {
			match self.read_once(&mut buf[filled..]) {
				Ok(0) => {
					// A serial read can return zero bytes when its `VTIME` elapses without data;
					// a TCP read returning zero means the peer closed the connection.
					if matches!(self, Channel::Serial(_)) {
						return Err(io::Error::new(io::ErrorKind::TimedOut, "poll slice elapsed"));
					}

					return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"));
				}
				Ok(n) => filled += n,
				Err(err) if matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
					return Err(io::Error::new(io::ErrorKind::TimedOut, "poll slice elapsed"));
				}
				Err(err) => return Err(err),
			}
		}

		Ok(())
	}

	pub fn read_byte(&mut self, deadline: Option<Duration>) -> io::Result<u8> {
		let mut buf = [0u8; 1];
		self.read_exact(&mut buf, deadline)?;
		Ok(buf[0])
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::{TcpListener, TcpStream};

	fn loopback() -> (Channel, TcpStream) {
		let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
		let addr = listener.local_addr().expect("local addr");
		let client = TcpStream::connect(addr).expect("connect loopback");
		let (server, _) = listener.accept().expect("accept loopback");
		(Channel::Tcp(server), client)
	}

	#[test]
	fn read_exact_returns_timed_out_when_armed_and_data_never_arrives() {
		let (mut server, _client) = loopback();

		let mut buf = [0u8; 4];
		let err = server.read_exact(&mut buf, Some(Duration::from_millis(50))).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::TimedOut);
	}

	#[test]
	fn read_exact_succeeds_once_data_is_available() {
		let (mut server, mut client) = loopback();

		client.write_all(b"ping").unwrap();

		let mut buf = [0u8; 4];
		server.read_exact(&mut buf, Some(Duration::from_secs(2))).unwrap();
		assert_eq!(&buf, b"ping");
	}

	#[test]
	fn read_exact_reports_eof_on_tcp_close() {
		let (mut server, client) = loopback();
		drop(client);

		let mut buf = [0u8; 1];
		let err = server.read_exact(&mut buf, Some(Duration::from_secs(2))).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
	}
}
