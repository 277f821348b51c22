use std::net::Ipv4Addr;
use std::str::FromStr;

pub const EXTERNAL_IP_TAG: &str = "NewExternalIPAddress";
pub const ERROR_CODE_TAG: &str = "errorCode";

/// Picks the text following `<tag>` out of a reply that arrives in pieces.
///
/// Only the first occurrence counts. The value ends at the next `<`.
pub struct TagValueScanner {
	open: Vec<u8>,
	pending: Vec<u8>,
	value: Option<String>,
}

impl TagValueScanner {
	pub fn new(tag: &str) -> Self {
		Self { open: format!("<{tag}>").into_bytes(), pending: Vec::new(), value: None }
	}

	pub fn feed(&mut self, data: &[u8]) -> Option<&str> {
		if self.value.is_some() {
			return self.value.as_deref();
		}
		self.pending.extend_from_slice(data);

		match self.pending.windows(self.open.len()).position(|w| w == self.open.as_slice()) {
			Some(pos) => {
				let start = pos + self.open.len();
				if let Some(end) = self.pending[start..].iter().position(|&c| c == b'<') {
					let value = String::from_utf8_lossy(&self.pending[start..start + end]).trim().to_string();
					self.pending = Vec::new();
					self.value = Some(value);
				} else {
					// keep the tag, the value is still coming
					self.pending.drain(..pos);
				}
			}
			None => {
				// only a tag prefix can still be useful
				let keep = self.open.len() - 1;
				if self.pending.len() > keep {
					let cut = self.pending.len() - keep;
					self.pending.drain(..cut);
				}
			}
		}
		self.value.as_deref()
	}

	pub fn value(&self) -> Option<&str> {
		self.value.as_deref()
	}
}

/// Dotted-decimal IPv4 as sent in `<NewExternalIPAddress>`. An empty or
/// malformed value means the gateway has no external address.
pub fn parse_external_address(value: &str) -> Option<Ipv4Addr> {
	Ipv4Addr::from_str(value.trim()).ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	const EXTIP_REPLY: &str = "HTTP/1.0 200 OK\r\n\
		Connection: close\r\n\
		Content-Type: text/xml; charset=\"utf-8\"\r\n\r\n\
		<?xml version=\"1.0\"?>\r\n\
		<s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
		s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">\r\n\
		<s:Body>\r\n\
		<m:GetExternalIPAddressResponse xmlns:m=\"urn:schemas-upnp-org:service:WANPPPConnection:1\">\r\n\
		<NewExternalIPAddress>213.49.166.224</NewExternalIPAddress>\r\n\
		</m:GetExternalIPAddressResponse>\r\n\
		</s:Body>\r\n\
		</s:Envelope>\r\n";

	const FAULT_REPLY: &str = "HTTP/1.0 500 Internal Server Error\r\n\r\n\
		<s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\">\
		<s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring>\
		<detail><UPnPError xmlns=\"urn:schemas-upnp-org:control-1-0\">\
		<errorCode>718</errorCode><errorDescription>ConflictInMappingEntry</errorDescription>\
		</UPnPError></detail></s:Fault></s:Body></s:Envelope>";

	#[test]
	fn test_external_address() {
		let mut s = TagValueScanner::new(EXTERNAL_IP_TAG);
		let v = s.feed(EXTIP_REPLY.as_bytes()).unwrap();
		assert_eq!(parse_external_address(v), Some(Ipv4Addr::new(213, 49, 166, 224)));
	}

	#[test]
	fn test_split_segments() {
		let doc = EXTIP_REPLY.as_bytes();
		for cut in 1..doc.len() {
			let mut s = TagValueScanner::new(EXTERNAL_IP_TAG);
			s.feed(&doc[..cut]);
			s.feed(&doc[cut..]);
			assert_eq!(s.value(), Some("213.49.166.224"), "cut at {cut}");
		}
	}

	#[test]
	fn test_empty_and_missing() {
		let mut s = TagValueScanner::new(EXTERNAL_IP_TAG);
		assert_eq!(s.feed(b"<NewExternalIPAddress></NewExternalIPAddress>"), Some(""));
		assert_eq!(parse_external_address(""), None);

		let mut s = TagValueScanner::new(EXTERNAL_IP_TAG);
		assert_eq!(s.feed(FAULT_REPLY.as_bytes()), None);
		assert_eq!(s.value(), None);
	}

	#[test]
	fn test_error_code() {
		let mut s = TagValueScanner::new(ERROR_CODE_TAG);
		assert_eq!(s.feed(FAULT_REPLY.as_bytes()), Some("718"));
	}
}
