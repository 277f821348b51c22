//! Control URL extraction from a device description.
//!
//! This is a substring scan over the raw reply, not an XML parser. Only three
//! markers matter: `<service>` and `</service>` move a nesting counter, and
//! the wanted service identifier pins the depth at which the following
//! `<controlURL>` is accepted. Input may arrive in arbitrary pieces, a marker
//! cut at a segment boundary is completed by the next call to [`ControlUrlScanner::feed`].

const SERVICE_OPEN: &[u8] = b"<service>";
const SERVICE_CLOSE: &[u8] = b"</service>";
const CONTROL_URL_OPEN: &[u8] = b"<controlURL>";

#[derive(Debug, PartialEq, Eq)]
enum Marker {
	Full,
	Partial,
	NoMatch,
}

/// Compares the start of `buf` with `pat`, ASCII case-insensitively.
/// `Partial` means `buf` ended while still agreeing with `pat`.
fn match_at(buf: &[u8], pat: &[u8]) -> Marker {
	let n = buf.len().min(pat.len());
	if !buf[..n].eq_ignore_ascii_case(&pat[..n]) {
		Marker::NoMatch
	} else if n < pat.len() {
		Marker::Partial
	} else {
		Marker::Full
	}
}

pub struct ControlUrlScanner {
	service_id: Vec<u8>,
	/// unconsumed tail of the previous segment
	pending: Vec<u8>,
	depth: i32,
	/// depth of the `<service>` block naming `service_id`
	wanted: Option<i32>,
	control_url: Option<String>,
}

impl ControlUrlScanner {
	pub fn new(service_id: &str) -> Self {
		Self { service_id: service_id.as_bytes().to_vec(), pending: Vec::new(), depth: 0, wanted: None, control_url: None }
	}

	/// Scans one more segment of the reply. Returns the control URL once
	/// found; later segments are ignored.
	pub fn feed(&mut self, data: &[u8]) -> Option<&str> {
		if self.control_url.is_some() {
			return self.control_url.as_deref();
		}
		let mut buf = std::mem::take(&mut self.pending);
		buf.extend_from_slice(data);

		let mut i = 0;
		while i < buf.len() {
			let rest = &buf[i..];
			match match_at(rest, SERVICE_OPEN) {
				Marker::Full => {
					self.depth += 1;
					i += SERVICE_OPEN.len();
					continue;
				}
				Marker::Partial => break,
				Marker::NoMatch => {}
			}
			match match_at(rest, SERVICE_CLOSE) {
				Marker::Full => {
					if self.wanted == Some(self.depth) {
						self.wanted = None;
					}
					self.depth -= 1;
					i += SERVICE_CLOSE.len();
					continue;
				}
				Marker::Partial => break,
				Marker::NoMatch => {}
			}
			if self.wanted.is_none() {
				match match_at(rest, &self.service_id) {
					Marker::Full => {
						trace!("service {} at depth {}", String::from_utf8_lossy(&self.service_id), self.depth);
						self.wanted = Some(self.depth);
						i += self.service_id.len();
						continue;
					}
					Marker::Partial => break,
					Marker::NoMatch => {}
				}
			} else if self.wanted == Some(self.depth) {
				match match_at(rest, CONTROL_URL_OPEN) {
					Marker::Full => {
						let value = &rest[CONTROL_URL_OPEN.len()..];
						let Some(end) = value.iter().position(|&c| c == b'<') else {
							// value not complete yet
							break;
						};
						let url = String::from_utf8_lossy(&value[..end]).trim().to_string();
						i += CONTROL_URL_OPEN.len() + end;
						if !url.is_empty() {
							self.control_url = Some(url);
							return self.control_url.as_deref();
						}
						continue;
					}
					Marker::Partial => break,
					Marker::NoMatch => {}
				}
			}
			i += 1;
		}
		buf.drain(..i);
		self.pending = buf;
		None
	}

	pub fn control_url(&self) -> Option<&str> {
		self.control_url.as_deref()
	}

	pub fn into_control_url(self) -> Option<String> {
		self.control_url
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::upnpurns::SERVICE_ID_WANPPPC;

	const TWO_SERVICES: &str = "<?xml version=\"1.0\"?>\
		<root xmlns=\"urn:schemas-upnp-org:device-1-0\">\
		<device><deviceType>urn:schemas-upnp-org:device:WANConnectionDevice:1</deviceType>\
		<serviceList>\
		<service>\
		<serviceType>urn:schemas-upnp-org:service:WANIPConnection:1</serviceType>\
		<serviceId>urn:upnp-org:serviceId:WANIPConn1</serviceId>\
		<controlURL>/upnp/control/wanipc</controlURL>\
		</service>\
		<service>\
		<serviceType>urn:schemas-upnp-org:service:WANPPPConnection:1</serviceType>\
		<serviceId>urn:upnp-org:serviceId:WANPPPConn1</serviceId>\
		<SCPDURL>/wanpppc.xml</SCPDURL>\
		<controlURL>/o8ee3npj36j/IGD/upnp/control/igd/wanpppc_1_1_1</controlURL>\
		<eventSubURL>/upnp/event/wanpppc</eventSubURL>\
		</service>\
		</serviceList>\
		</device></root>";

	#[test]
	fn test_match_at() {
		assert_eq!(match_at(b"<SERVICE>x", SERVICE_OPEN), Marker::Full);
		assert_eq!(match_at(b"<serv", SERVICE_OPEN), Marker::Partial);
		assert_eq!(match_at(b"<serviceList>", SERVICE_OPEN), Marker::NoMatch);
	}

	#[test]
	fn test_second_service_block() {
		let mut s = ControlUrlScanner::new(SERVICE_ID_WANPPPC);
		assert_eq!(s.feed(TWO_SERVICES.as_bytes()), Some("/o8ee3npj36j/IGD/upnp/control/igd/wanpppc_1_1_1"));
		assert_eq!(s.into_control_url().as_deref(), Some("/o8ee3npj36j/IGD/upnp/control/igd/wanpppc_1_1_1"));
	}

	#[test]
	fn test_split_segments() {
		// every possible cut, and byte by byte
		let doc = TWO_SERVICES.as_bytes();
		for cut in 1..doc.len() {
			let mut s = ControlUrlScanner::new(SERVICE_ID_WANPPPC);
			s.feed(&doc[..cut]);
			s.feed(&doc[cut..]);
			assert_eq!(s.control_url(), Some("/o8ee3npj36j/IGD/upnp/control/igd/wanpppc_1_1_1"), "cut at {cut}");
		}
		let mut s = ControlUrlScanner::new(SERVICE_ID_WANPPPC);
		for b in doc {
			s.feed(std::slice::from_ref(b));
		}
		assert_eq!(s.control_url(), Some("/o8ee3npj36j/IGD/upnp/control/igd/wanpppc_1_1_1"));
	}

	#[test]
	fn test_sibling_block_not_accepted() {
		// identifier in a block without controlURL, controlURL in the next one
		let doc = "<service><serviceId>urn:upnp-org:serviceId:WANPPPConn1</serviceId></service>\
			<service><serviceId>other</serviceId><controlURL>/wrong</controlURL></service>";
		let mut s = ControlUrlScanner::new(SERVICE_ID_WANPPPC);
		assert_eq!(s.feed(doc.as_bytes()), None);
	}

	#[test]
	fn test_nested_device_not_accepted() {
		// a deeper service block while the wanted one is still open
		let doc = "<service><serviceId>urn:upnp-org:serviceId:WANPPPConn1</serviceId>\
			<service><controlURL>/deeper</controlURL></service>\
			<controlURL>/ctl</controlURL></service>";
		let mut s = ControlUrlScanner::new(SERVICE_ID_WANPPPC);
		assert_eq!(s.feed(doc.as_bytes()), Some("/ctl"));
	}

	#[test]
	fn test_not_found() {
		let mut s = ControlUrlScanner::new(SERVICE_ID_WANPPPC);
		assert_eq!(s.feed(b"HTTP/1.0 404 Not Found\r\n\r\n"), None);
		assert_eq!(s.into_control_url(), None);
	}
}
