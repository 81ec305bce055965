use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use clap::Parser;

use nabud::adaptor::Adaptor;
use nabud::cli::Cli;
use nabud::config::Root;
use nabud::connection::{Connection, State, Transport};
use nabud::io::serial::{SerialConfig, SerialPort};
use nabud::io::{tcp, Channel};
use nabud::provider::{ImageProvider, LocalProvider};
use nabud::registry::Registry;
use nabud::subproto::{Nhacp, RetroNet};

fn main() {
	let cli = Cli::parse();

	runtime::logger::set_color(!cli.no_color);
	let shutdown = match runtime::install(cli.log_level()) {
		Ok(s) => s,
		Err(err) => {
			eprintln!("failed to install logger: {err}");
			std::process::exit(1);
		}
	};

	let root = match Root::load(&cli.conf) {
		Ok(root) => root,
		Err(err) => {
			log::error!(target: "nabud", "{err}");
			std::process::exit(1);
		}
	};

	let catalog = match root.catalog() {
		Ok(c) => c,
		Err(err) => {
			log::error!(target: "nabud", "{err}");
			std::process::exit(1);
		}
	};

	let provider: Arc<dyn ImageProvider> = Arc::new(LocalProvider::new(root.storage_root.clone(), catalog));
	let adaptor = Arc::new(Adaptor::new(provider, Arc::new(RetroNet), Arc::new(Nhacp)));
	let registry = Arc::new(Registry::new());

	let mut workers = Vec::new();

	for device in &root.config.serial {
		let cfg = SerialConfig { baud: device.baud, stop_bits: device.stop_bits(), rtscts: device.rtscts };

		match SerialPort::open(&device.path, cfg) {
			Ok(port) => {
				let conn = Connection::new(Transport::Serial, device.path.clone(), Channel::Serial(port), Some(root.storage_root.display().to_string()));
				registry.insert(conn.clone());
				workers.push(spawn_worker(adaptor.clone(), registry.clone(), conn));
			}
			Err(err) => log::error!(target: "nabud", "failed to open serial device {}: {err}", device.path),
		}
	}

	let mut tcp_ports = root.config.listen.tcp.clone();
	for &port in &cli.listen {
		if !tcp_ports.contains(&port) {
			tcp_ports.push(port);
		}
	}

	for &port in &tcp_ports {
		match tcp::listen(port) {
			Ok(listeners) => {
				for listener in listeners {
					workers.push(spawn_acceptor(adaptor.clone(), registry.clone(), listener, shutdown.clone()));
				}
			}
			Err(err) => log::error!(target: "nabud", "failed to bind TCP port {port}: {err}"),
		}
	}

	if workers.is_empty() {
		log::error!(target: "nabud", "no listeners or serial devices configured, exiting");
		std::process::exit(1);
	}

	while !shutdown.requested() {
		thread::sleep(std::time::Duration::from_millis(200));
	}

	log::info!(target: "nabud", "shutdown requested, aborting {} connection(s)", registry.len());

	let now = runtime::time::unix() as u64;
	registry.enumerate(|conn| {
		log::info!(
			target: "nabud",
			"[{}] {} ({:?}), idle {}s, up {}s",
			conn.id,
			conn.name,
			conn.transport,
			now.saturating_sub(conn.last_activity()),
			now.saturating_sub(conn.created_at),
		);
		conn.abort();
		true
	});

	for worker in workers {
		let _ = worker.join();
	}
}

fn spawn_acceptor(
	adaptor: Arc<Adaptor>,
	registry: Arc<Registry>,
	listener: TcpListener,
	shutdown: runtime::Shutdown,
) -> thread::JoinHandle<()> {
	// Non-blocking so this loop can recheck `shutdown` between connections instead of sitting
	// inside `accept()` indefinitely, which would leave nothing to wake it at shutdown time.
	if let Err(err) = listener.set_nonblocking(true) {
		log::warn!(target: "nabud", "failed to set listener non-blocking, shutdown may stall: {err}");
	}

	let name = listener.local_addr().map(|a| a.to_string()).unwrap_or_else(|_| "tcp listener".into());
	// A passive listener gets its own connection so the registry can enumerate it and an operator
	// abort can stop it the same way it stops a client connection.
	let listener_conn = Connection::new(Transport::TcpListener, name, Channel::Listener, None);
	registry.insert(listener_conn.clone());

	thread::spawn(move || {
		loop {
			if shutdown.requested() || listener_conn.state() == State::Aborted {
				break;
			}

			match listener.accept() {
				Ok((stream, addr)) => {
					if let Err(err) = stream.set_nodelay(true) {
						log::warn!(target: "nabud", "failed to set TCP_NODELAY for {addr}: {err}");
					}

					let conn = Connection::new(Transport::TcpAccepted, addr.to_string(), Channel::Tcp(stream), None);
					registry.insert(conn.clone());

					let adaptor = adaptor.clone();
					let registry = registry.clone();
					thread::spawn(move || run_connection(adaptor, registry, conn));
				}
				Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
					thread::sleep(std::time::Duration::from_millis(200));
				}
				Err(err) => {
					log::error!(target: "nabud", "{}: listener error, shutting down this listener: {err}", listener_conn.name);
					break;
				}
			}
		}

		listener_conn.destroy();
		registry.remove(&listener_conn);
	})
}

fn spawn_worker(adaptor: Arc<Adaptor>, registry: Arc<Registry>, conn: Arc<Connection>) -> thread::JoinHandle<()> {
	thread::spawn(move || run_connection(adaptor, registry, conn))
}

fn run_connection(adaptor: Arc<Adaptor>, registry: Arc<Registry>, conn: Arc<Connection>) {
	adaptor.run(&conn);
	conn.destroy();
	registry.remove(&conn);
}
