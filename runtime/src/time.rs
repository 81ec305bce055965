use std::time::SystemTime;

/// Get the current UNIX time in seconds.
pub fn unix() -> u32 {
	SystemTime::now()
		.duration_since(SystemTime::UNIX_EPOCH)
		.expect("the current time should be after the UNIX epoch")
		.as_secs()
		.try_into()
		.expect("32-bit UNIX time should not overflow")
}
