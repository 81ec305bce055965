//! TCP listener setup.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener};

/// Bind IPv4 and IPv6 passive sockets on `port`. At least one of the two must succeed; the NABU
/// client population on any one adaptor is small, so the OS's default backlog is ample.
pub fn listen(port: u16) -> std::io::Result<Vec<TcpListener>> {
	let mut listeners = Vec::with_capacity(2);
	let mut last_err = None;

	for addr in [SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))] {
		match TcpListener::bind(addr) {
			Ok(l) => listeners.push(l),
			Err(err) => {
				log::warn!(target: "nabud::io", "failed to bind {addr}: {err}");
				last_err = Some(err);
			}
		}
	}

	if listeners.is_empty() {
		return Err(last_err.expect("at least one bind attempt recorded an error"));
	}

	Ok(listeners)
}
