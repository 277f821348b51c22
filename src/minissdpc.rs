use crate::options::Options;
use crate::upnpurns::{DEVICE_TYPE_IGD, SSDP_MCAST_ADDR, SSDP_PORT};
use arrayvec::{ArrayString, CapacityError};
use std::fmt::Write;

/// M-SEARCH datagrams never need more than this.
pub const SSDP_MSG_MAX: usize = 256;
pub type SsdpMsg = ArrayString<SSDP_MSG_MAX>;

#[cfg(feature = "strict")]
const LOCATION_HDR: &[u8] = b"\r\nLOCATION:";
#[cfg(not(feature = "strict"))]
const LOCATION_HDR: &str = "\r\nlocation:";

/// Builds the discovery request, without a terminating empty line.
pub fn build_msearch(st: &str, mx: u8) -> Result<SsdpMsg, CapacityError> {
	let mut msg = SsdpMsg::new();
	msg.write_fmt(format_args!(
		"M-SEARCH * HTTP/1.1\r\n\
		HOST: {SSDP_MCAST_ADDR}:{SSDP_PORT}\r\n\
		ST: {st}\r\n\
		MAN: \"ssdp:discover\"\r\n\
		MX: {mx}\r\n"
	))
	.map_err(|_| CapacityError::new(()))?;
	Ok(msg)
}

#[cfg(feature = "strict")]
fn find_header(datagram: &[u8]) -> Option<usize> {
	datagram.windows(LOCATION_HDR.len()).position(|w| w == LOCATION_HDR)
}

#[cfg(not(feature = "strict"))]
fn find_header(datagram: &[u8]) -> Option<usize> {
	datagram.windows(LOCATION_HDR.len()).position(|w| w.eq_ignore_ascii_case(LOCATION_HDR.as_bytes()))
}

/// Returns the LOCATION value of an SSDP reply, if it carries one.
///
/// The header must start a line (it is preceded by CRLF), the value runs up
/// to the next line terminator.
pub fn find_location(datagram: &[u8]) -> Option<&str> {
	let off = find_header(datagram)? + LOCATION_HDR.len();
	let rest = &datagram[off..];
	let end = rest.iter().position(|&c| c == b'\r' || c == b'\n').unwrap_or(rest.len());
	let value = std::str::from_utf8(&rest[..end]).ok()?.trim();
	if value.is_empty() { None } else { Some(value) }
}

/// Bounded M-SEARCH retransmission.
pub struct Discovery {
	msg: SsdpMsg,
	sends: u8,
	max_sends: u8,
}

impl Discovery {
	pub fn new(op: &Options) -> Self {
		let msg = match build_msearch(&op.search_target, op.ssdp_mx) {
			Ok(msg) => msg,
			Err(_) => {
				warn!("search target {} too long, using {}", op.search_target, DEVICE_TYPE_IGD);
				// fits by construction
				build_msearch(DEVICE_TYPE_IGD, op.ssdp_mx).unwrap_or_default()
			}
		};
		Self { msg, sends: 0, max_sends: op.ssdp_max_sends.max(1) }
	}

	/// First transmission of a scan.
	pub fn start(&mut self) -> &[u8] {
		self.sends = 1;
		self.msg.as_bytes()
	}

	/// Called for every send-completion while discovering. Returns the
	/// datagram to send again, or `None` once the budget is spent.
	pub fn on_send_completed(&mut self) -> Option<&[u8]> {
		if self.sends == 0 || self.sends >= self.max_sends {
			return None;
		}
		self.sends += 1;
		Some(self.msg.as_bytes())
	}

	pub fn sends(&self) -> u8 {
		self.sends
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const REPLY: &[u8] = b"HTTP/1.1 200 OK\r\n\
		CACHE-CONTROL: max-age=1800\r\n\
		EXT:\r\n\
		LOCATION: http://192.168.1.1:8000/o8ee3npj36j/IGD/upnp/IGD.xml\r\n\
		SERVER: MediaAccess TG 789Ovn Xtream UPnP/1.0\r\n\
		ST: urn:schemas-upnp-org:device:InternetGatewayDevice:1\r\n\r\n";

	#[test]
	fn test_msearch_literal() {
		let msg = build_msearch(DEVICE_TYPE_IGD, 2).unwrap();
		assert_eq!(
			msg.as_str(),
			"M-SEARCH * HTTP/1.1\r\n\
			HOST: 239.255.255.250:1900\r\n\
			ST: urn:schemas-upnp-org:device:InternetGatewayDevice:1\r\n\
			MAN: \"ssdp:discover\"\r\n\
			MX: 2\r\n"
		);
	}

	#[test]
	fn test_msearch_too_long() {
		let st = "x".repeat(SSDP_MSG_MAX);
		assert!(build_msearch(&st, 2).is_err());
		let op = Options { search_target: st, ..Default::default() };
		let d = Discovery::new(&op);
		assert!(d.msg.contains(DEVICE_TYPE_IGD));
	}

	#[test]
	fn test_find_location() {
		assert_eq!(
			find_location(REPLY),
			Some("http://192.168.1.1:8000/o8ee3npj36j/IGD/upnp/IGD.xml")
		);
		// last header without CRLF
		assert_eq!(find_location(b"HTTP/1.1 200 OK\r\nLOCATION:http://gw/d.xml"), Some("http://gw/d.xml"));
		assert_eq!(find_location(b"HTTP/1.1 200 OK\r\nSERVER: x\r\n\r\n"), None);
		assert_eq!(find_location(b"HTTP/1.1 200 OK\r\nLOCATION: \r\n"), None);
		// not at the start of a line
		assert_eq!(find_location(b"HTTP/1.1 200 OK\r\nX-LOCATION: http://gw/\r\n"), None);
	}

	#[cfg(feature = "strict")]
	#[test]
	fn test_find_location_strict_case() {
		assert_eq!(find_location(b"HTTP/1.1 200 OK\r\nLocation: http://gw/d.xml\r\n"), None);
	}

	#[cfg(not(feature = "strict"))]
	#[test]
	fn test_find_location_any_case() {
		assert_eq!(find_location(b"HTTP/1.1 200 OK\r\nLocation: http://gw/d.xml\r\n"), Some("http://gw/d.xml"));
		assert_eq!(find_location(b"HTTP/1.1 200 OK\r\nlocation:http://gw:5000/\r\n\r\n"), Some("http://gw:5000/"));
		assert_eq!(find_location(b"HTTP/1.1 200 OK\r\nX-Location: http://gw/\r\n"), None);
	}

	#[test]
	fn test_retransmit_budget() {
		let mut d = Discovery::new(&Options::default());
		assert!(d.on_send_completed().is_none());
		assert!(!d.start().is_empty());
		let mut resent = 0;
		for _ in 0..10 {
			if d.on_send_completed().is_some() {
				resent += 1;
			}
		}
		assert_eq!(resent, 3);
		assert_eq!(d.sends(), 4);
	}
}
