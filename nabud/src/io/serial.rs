//! Serial-port opening and raw-mode configuration.
//!
//! Follows the runtime crate's existing convention of dropping to `libc` directly for
//! platform-specific syscalls rather than pulling in a higher-level OS-abstraction crate.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

/// The NABU's native baud rate: `(3_579_540 / 2) / 16`.
pub const NATIVE_BAUD: u32 = 111_860;
/// Fallback rate when the native rate can't be configured on this platform.
pub const FALLBACK_BAUD: u32 = 115_200;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopBits {
	One,
	Two,
}

impl Default for StopBits {
	// The NABU's UART can lose sync at one stop bit under sustained bursts.
	fn default() -> Self {
		StopBits::Two
	}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SerialConfig {
	pub baud: Option<u32>,
	pub stop_bits: StopBits,
	pub rtscts: bool,
}

pub struct SerialPort {
	file: File,
}

impl SerialPort {
	pub fn open(path: &str, cfg: SerialConfig) -> io::Result<Self> {
		let file = OpenOptions::new().read(true).write(true).open(path)?;
		let fd = file.as_raw_fd();

		configure_raw(fd, cfg.stop_bits, cfg.rtscts)?;

		match cfg.baud {
			Some(baud) => set_baud(fd, baud)?,
			None => set_baud(fd, NATIVE_BAUD).or_else(|_| set_baud(fd, FALLBACK_BAUD))?,
		}

		Ok(Self { file })
	}

	pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> io::Result<()> {
		set_vtime(self.file.as_raw_fd(), timeout)
	}
}

impl io::Read for SerialPort {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		io::Read::read(&mut self.file, buf)
	}
}

impl io::Write for SerialPort {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		io::Write::write(&mut self.file, buf)
	}

	fn flush(&mut self) -> io::Result<()> {
		io::Write::flush(&mut self.file)
	}
}

fn configure_raw(fd: RawFd, stop_bits: StopBits, rtscts: bool) -> io::Result<()> {
	unsafe {
		let mut tio: libc::termios = std::mem::zeroed();

		if libc::tcgetattr(fd, &mut tio) != 0 {
			return Err(io::Error::last_os_error());
		}

		libc::cfmakeraw(&mut tio);

		// 8 data bits, no parity, advisory CLOCAL, receiver enabled.
		tio.c_cflag &= !(libc::CSIZE | libc::PARENB | libc::CSTOPB);
		tio.c_cflag |= libc::CS8 | libc::CLOCAL | libc::CREAD;

		if stop_bits == StopBits::Two {
			tio.c_cflag |= libc::CSTOPB;
		}

		if rtscts {
			tio.c_cflag |= libc::CRTSCTS;
		} else {
			tio.c_cflag &= !libc::CRTSCTS;
		}

		if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
			return Err(io::Error::last_os_error());
		}
	}

	Ok(())
}

#[cfg(target_os = "linux")]
fn set_baud(fd: RawFd, baud: u32) -> io::Result<()> {
	// Standard termios speeds can't represent 111_860 bps; any rate not matching a `B*` constant
	// goes through the `BOTHER`/`termios2` ioctl path instead.
	if let Some(std_speed) = standard_speed(baud) {
		return set_standard_speed(fd, std_speed);
	}

	unsafe {
		let mut tio: libc::termios2 = std::mem::zeroed();

		if libc::ioctl(fd, libc::TCGETS2, &mut tio) != 0 {
			return Err(io::Error::last_os_error());
		}

		tio.c_cflag &= !libc::CBAUD;
		tio.c_cflag |= libc::BOTHER;
		tio.c_ispeed = baud;
		tio.c_ospeed = baud;

		if libc::ioctl(fd, libc::TCSETS2, &tio) != 0 {
			return Err(io::Error::last_os_error());
		}
	}

	Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_baud(fd: RawFd, baud: u32) -> io::Result<()> {
	let std_speed = standard_speed(baud).ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "non-standard baud rate requested on this platform"))?;
	set_standard_speed(fd, std_speed)
}

fn set_standard_speed(fd: RawFd, speed: libc::speed_t) -> io::Result<()> {
	unsafe {
		let mut tio: libc::termios = std::mem::zeroed();

		if libc::tcgetattr(fd, &mut tio) != 0 {
			return Err(io::Error::last_os_error());
		}

		if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
			return Err(io::Error::last_os_error());
		}

		if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
			return Err(io::Error::last_os_error());
		}
	}

	Ok(())
}

fn standard_speed(baud: u32) -> Option<libc::speed_t> {
	Some(match baud {
		9_600 => libc::B9600,
		19_200 => libc::B19200,
		38_400 => libc::B38400,
		57_600 => libc::B57600,
		115_200 => libc::B115200,
		230_400 => libc::B230400,
		_ => return None,
	})
}

/// Set `VTIME`/`VMIN` to emulate a blocking read with a timeout. `None` blocks indefinitely.
fn set_vtime(fd: RawFd, timeout: Option<std::time::Duration>) -> io::Result<()> {
	unsafe {
		let mut tio: libc::termios = std::mem::zeroed();

		if libc::tcgetattr(fd, &mut tio) != 0 {
			return Err(io::Error::last_os_error());
		}

		match timeout {
			Some(d) => {
				tio.c_cc[libc::VMIN] = 0;
				// VTIME is measured in deciseconds; clamp to termios's `u8` field.
				tio.c_cc[libc::VTIME] = d.as_secs().saturating_mul(10).min(u8::MAX as u64) as u8;
			}
			None => {
				tio.c_cc[libc::VMIN] = 1;
				tio.c_cc[libc::VTIME] = 0;
			}
		}

		if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
			return Err(io::Error::last_os_error());
		}
	}

	Ok(())
}
