//! The classic-protocol per-connection event loop: read an opcode, dispatch it, serve segments.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{Connection, State};
use crate::framing::{self, ACK, CONFIRMED, FINISHED, HEADER_SIZE, MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE};
use crate::image::Image;
use crate::provider::ImageProvider;
use crate::subproto::SubProtocol;

pub struct Adaptor {
	pub provider: Arc<dyn ImageProvider>,
	pub retronet: Arc<dyn SubProtocol>,
	pub nhacp: Arc<dyn SubProtocol>,
}

impl Adaptor {
	pub fn new(provider: Arc<dyn ImageProvider>, retronet: Arc<dyn SubProtocol>, nhacp: Arc<dyn SubProtocol>) -> Self {
		Self { provider, retronet, nhacp }
	}

	/// Run the request loop for `conn` until it is aborted or its transport closes.
	pub fn run(&self, conn: &Arc<Connection>) {
		loop {
			if conn.state() == State::Aborted {
				return;
			}

			// Disarmed: wait forever for the next request, polling in short slices so an external
			// abort (see `Connection::abort`) is noticed without a platform cancellation primitive.
			let opcode = match conn.channel_mut().read_byte(None) {
				Ok(b) => b,
				Err(err) => {
					if conn.state() == State::Aborted {
						return;
					}

					if err.kind() == io::ErrorKind::TimedOut {
						continue;
					}

					if err.kind() == io::ErrorKind::UnexpectedEof {
						log::info!(target: "nabud::adaptor", "[{}] {} disconnected", conn.id, conn.name);
						return;
					}

					log::debug!(target: "nabud::adaptor", "[{}] {}: read error: {err}", conn.id, conn.name);
					continue;
				}
			};

			conn.touch();

			// Armed for the duration of servicing this one request.
			if let Err(err) = self.dispatch(conn, opcode) {
				if err.kind() == io::ErrorKind::TimedOut {
					log::warn!(target: "nabud::adaptor", "[{}] {}: watchdog timeout mid-request (opcode {opcode:#04x})", conn.id, conn.name);
					conn.abort();
					return;
				}

				log::debug!(target: "nabud::adaptor", "[{}] {}: request for opcode {opcode:#04x} failed: {err}", conn.id, conn.name);
			}
		}
	}

	fn dispatch(&self, conn: &Arc<Connection>, opcode: u8) -> io::Result<()> {
		if (framing::CLASSIC_FIRST..=framing::CLASSIC_LAST).contains(&opcode) {
			return self.dispatch_classic(conn, opcode);
		}

		if self.retronet.request(conn, opcode) {
			return Ok(());
		}

		if self.nhacp.request(conn, opcode) {
			return Ok(());
		}

		log::warn!(target: "nabud::adaptor", "{}: unexpected message {opcode:#04x}", conn.name);
		// preserved: the classic loop does not drain any follow-up bytes an unrecognised opcode's
		// sender might still be writing; kept as-is per the upstream behaviour.
		Ok(())
	}

	fn dispatch_classic(&self, conn: &Arc<Connection>, opcode: u8) -> io::Result<()> {
		match opcode {
			framing::RESET => self.handle_reset(conn),
			framing::MYSTERY => self.handle_mystery(conn),
			framing::GET_STATUS => self.handle_get_status(conn),
			framing::START_UP => self.handle_start_up(conn),
			framing::PACKET_REQUEST => self.handle_packet_request(conn),
			framing::CHANGE_CHANNEL => self.handle_change_channel(conn),
			_ => unreachable!("opcode {opcode:#04x} is outside the classic range"),
		}
	}

	fn await_ack(&self, conn: &Arc<Connection>) -> io::Result<()> {
		let mut buf = [0u8; 2];
		conn.channel_mut().read_exact(&mut buf, Some(watchdog()))?;

		if buf != ACK {
			return Err(io::Error::new(io::ErrorKind::InvalidData, "expected ACK"));
		}

		Ok(())
	}

	fn handle_reset(&self, conn: &Arc<Connection>) -> io::Result<()> {
		conn.reboot();
		conn.channel_mut().write_all(&ACK)?;
		conn.channel_mut().write_one(CONFIRMED)?;
		Ok(())
	}

	fn handle_mystery(&self, conn: &Arc<Connection>) -> io::Result<()> {
		conn.channel_mut().write_all(&ACK)?;

		let mut discard = [0u8; 2];
		conn.channel_mut().read_exact(&mut discard, Some(watchdog()))?;

		conn.channel_mut().write_one(CONFIRMED)?;
		Ok(())
	}

	fn handle_get_status(&self, conn: &Arc<Connection>) -> io::Result<()> {
		conn.channel_mut().write_all(&ACK)?;

		let sub = conn.channel_mut().read_byte(Some(watchdog()))?;

		let answer = match sub {
			framing::STATUS_SIGNAL => {
				if conn.selected_channel().is_some() {
					framing::SIGNAL_STATUS_YES
				} else {
					framing::SIGNAL_STATUS_NO
				}
			}
			framing::STATUS_TRANSMIT => framing::SIGNAL_STATUS_YES,
			_ => {
				log::warn!(target: "nabud::adaptor", "{}: unknown status sub-opcode {sub:#04x}", conn.name);
				framing::SIGNAL_STATUS_NO
			}
		};

		conn.channel_mut().write_one(answer)?;
		conn.channel_mut().write_all(&FINISHED)?;
		Ok(())
	}

	fn handle_start_up(&self, conn: &Arc<Connection>) -> io::Result<()> {
		conn.channel_mut().write_all(&ACK)?;
		conn.channel_mut().write_one(CONFIRMED)?;
		Ok(())
	}

	fn handle_change_channel(&self, conn: &Arc<Connection>) -> io::Result<()> {
		conn.channel_mut().write_all(&ACK)?;

		let mut buf = [0u8; 2];
		conn.channel_mut().read_exact(&mut buf, Some(watchdog()))?;
		let channel = i16::from_le_bytes(buf);

		let entry = self.provider.channel_select(conn, channel);
		conn.set_channel(Some(channel), entry.as_ref().map_or(false, |e| e.retronet_enabled));

		conn.channel_mut().write_one(CONFIRMED)?;
		Ok(())
	}

	fn handle_packet_request(&self, conn: &Arc<Connection>) -> io::Result<()> {
		conn.channel_mut().write_all(&ACK)?;

		let mut buf = [0u8; 4];
		conn.channel_mut().read_exact(&mut buf, Some(watchdog()))?;
		let segment = buf[0];
		let image_id = u32::from_le_bytes([buf[1], buf[2], buf[3], 0]);

		conn.channel_mut().write_one(CONFIRMED)?;

		if image_id == framing::IMAGE_TIME {
			if segment != 0 {
				return self.send_unauthorized(conn);
			}
			return self.serve_time_packet(conn);
		}

		let Some(image) = self.provider.load(conn, image_id) else {
			return self.send_unauthorized(conn);
		};

		let result = if image.is_pak() {
			self.serve_pak_segment(conn, &image, segment)
		} else {
			self.serve_raw_segment(conn, &image, segment)
		};

		match result {
			Ok(was_last) => {
				conn.set_last_image(Some(image.clone()));
				// Release our own reference once the segment is finished, but only if nothing
				// else (an external abort tearing the connection down, a racing request) already
				// replaced it.
				conn.clear_last_image_if(&image);
				self.provider.unload(conn, image, was_last);
				Ok(())
			}
			Err(Unservable) => self.send_unauthorized(conn),
		}
	}

	fn serve_time_packet(&self, conn: &Arc<Connection>) -> io::Result<()> {
		let now = runtime::time::unix();
		let payload = time_payload(now);
		let packet = framing::build_segment(framing::IMAGE_TIME, 0, 0, &payload, true);
		self.send_packet(conn, &packet)
	}

	/// Serve one segment of a PAK channel, whose bytes are already a concatenation of
	/// fully-framed segments.
	fn serve_pak_segment(&self, conn: &Arc<Connection>, image: &Arc<Image>, segment: u8) -> Result<bool, Unservable> {
		let total = HEADER_SIZE + MAX_PAYLOAD_SIZE + framing::FOOTER_SIZE;
		let offset = segment as usize * total + 2 * segment as usize + 2;

		if offset >= image.len() {
			return Err(Unservable);
		}

		let remaining = image.len() - offset;
		if remaining < HEADER_SIZE + framing::FOOTER_SIZE {
			// preserved: on this bounds failure the caller still reports whatever `last` the
			// previous branch computed rather than a fresh value; kept as-is per the upstream
			// behaviour.
			return Err(Unservable);
		}

		let length = total.min(remaining);
		let mut buf = image.bytes[offset..offset + length].to_vec();
		framing::refresh_crc(&mut buf);

		let last = offset + length >= image.len();
		self.send_packet(conn, &buf)?;
		Ok(last)
	}

	fn serve_raw_segment(&self, conn: &Arc<Connection>, image: &Arc<Image>, segment: u8) -> Result<bool, Unservable> {
		let offset = segment as usize * MAX_PAYLOAD_SIZE;

		// preserved: `>=` here means a request for the segment exactly at the image boundary (an
		// empty final slice) is rejected as unauthorized rather than served as a zero-length
		// segment; kept as-is per the upstream behaviour.
		if offset >= image.len() {
			return Err(Unservable);
		}

		let remaining = image.len() - offset;
		let length = MAX_PAYLOAD_SIZE.min(remaining);
		let last = offset + length >= image.len();

		let packet = framing::build_segment(image.id, segment, offset, &image.bytes[offset..offset + length], last);
		self.send_packet(conn, &packet)?;
		Ok(last)
	}

	fn send_packet(&self, conn: &Arc<Connection>, buf: &[u8]) -> Result<(), Unservable> {
		// Only the payload-and-footer region is escaped; the header is sent as-is. A segment's
		// header packs the segment number into plain bytes, so doubling `ESCAPE` occurrences in it
		// would corrupt the frame for any image of more than 16 segments.
		let (header, rest) = buf.split_at(HEADER_SIZE);
		let escaped_rest = framing::escape(rest);
		debug_assert!(header.len() + escaped_rest.len() <= MAX_PACKET_SIZE * 2);

		conn.channel_mut().write_one(framing::AUTHORIZED).map_err(|_| Unservable)?;

		if self.await_ack(conn).is_err() {
			log::error!(target: "nabud::adaptor", "{}: no ACK for segment, giving up on this packet", conn.name);
			return Ok(());
		}

		conn.channel_mut().write_all(header).map_err(|_| Unservable)?;
		conn.channel_mut().write_all(&escaped_rest).map_err(|_| Unservable)?;
		conn.channel_mut().write_all(&FINISHED).map_err(|_| Unservable)?;
		Ok(())
	}

	fn send_unauthorized(&self, conn: &Arc<Connection>) -> io::Result<()> {
		conn.channel_mut().write_one(framing::UNAUTHORIZED)?;

		if self.await_ack(conn).is_err() {
			log::warn!(target: "nabud::adaptor", "{}: no ACK for UNAUTHORIZED, giving up", conn.name);
		}

		Ok(())
	}
}

/// Sentinel for "this request cannot be fulfilled"; converted to an UNAUTHORIZED response at the
/// call site rather than threaded through as an `io::Error`.
struct Unservable;

fn watchdog() -> Duration {
	crate::io::WATCHDOG_TIMEOUT
}

/// Build the 9-byte synthetic real-time clock payload: mystery `02 02`, weekday, year-since-1900
/// offset byte, month, day, hour, minute, second.
fn time_payload(unix: u32) -> [u8; 9] {
	let (weekday, year, month, day, hour, minute, second) = civil_from_unix(unix);

	[0x02, 0x02, weekday, year, month, day, hour, minute, second]
}

/// Decompose a UNIX timestamp into the fields the NABU clock packet wants. `year` is encoded as
/// an offset from 1900 matching the adaptor's documented `84` for 1984. `weekday` is 1 (Monday)
/// through 7 (Sunday), matching ISO 8601 numbering referenced by the protocol's terminology.
fn civil_from_unix(unix: u32) -> (u8, u8, u8, u8, u8, u8, u8) {
	const SECS_PER_DAY: i64 = 86_400;

	let secs = unix as i64;
	let days = secs.div_euclid(SECS_PER_DAY);
	let tod = secs.rem_euclid(SECS_PER_DAY);

	let hour = (tod / 3600) as u8;
	let minute = ((tod % 3600) / 60) as u8;
	let second = (tod % 60) as u8;

	// 1970-01-01 was a Thursday (ISO weekday 4).
	let weekday = (((days % 7) + 4 - 1).rem_euclid(7) + 1) as u8;

	// Howard Hinnant's days_from_civil algorithm, inverted.
	let z = days + 719_468;
	let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
	let doe = z - era * 146_097;
	let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
	let y = yoe + era * 400;
	let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
	let mp = (5 * doy + 2) / 153;
	let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
	let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
	let year_full = if month <= 2 { y + 1 } else { y };

	let year_byte = (year_full - 1900) as u8;

	(weekday, year_byte, month, day, hour, minute, second)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn time_payload_has_fixed_mystery_prefix() {
		let payload = time_payload(0);
		assert_eq!(&payload[..2], &[0x02, 0x02]);
	}

	#[test]
	fn civil_from_unix_decodes_epoch_as_1970_01_01_thursday() {
		let (weekday, year, month, day, _, _, _) = civil_from_unix(0);
		assert_eq!(weekday, 4);
		assert_eq!(year, 70);
		assert_eq!(month, 1);
		assert_eq!(day, 1);
	}

	#[test]
	fn civil_from_unix_decodes_1984_reference_point() {
		// 1984-01-01T00:00:00Z
		let (_, year, month, day, _, _, _) = civil_from_unix(441_763_200);
		assert_eq!(year, 84);
		assert_eq!(month, 1);
		assert_eq!(day, 1);
	}
}
