use crate::upnputils::IgdLocation;
use std::fmt::Write;

/// HTTP/1.0 GET for the device description. HTTP/1.0 plus `Connection: close`
/// keeps the gateway from answering chunked, and makes it close the
/// connection at the end of the body.
pub fn build_description_request(loc: &IgdLocation, user_agent: &str) -> Vec<u8> {
	let path = if loc.path.is_empty() { "/" } else { loc.path.as_str() };
	format!(
		"GET {path} HTTP/1.0\r\n\
		Host: {}\r\n\
		Connection: close\r\n\
		User-Agent: {user_agent}\r\n\r\n",
		loc.authority()
	)
	.into_bytes()
}

/// Request line and headers of a SOAP POST, without the terminating blank
/// line. `body_len` must be the length of the finished body.
pub fn build_post_header(
	buf: &mut String,
	control_url: &str,
	authority: &str,
	user_agent: &str,
	soap_action: &str,
	body_len: usize,
) {
	let _ = buf.write_fmt(format_args!(
		"POST {control_url} HTTP/1.0\r\n\
		Host: {authority}\r\n\
		User-Agent: {user_agent}\r\n\
		Content-Length: {body_len}\r\n\
		Content-Type: text/xml\r\n\
		SOAPAction: \"{soap_action}\"\r\n\
		Connection: Close\r\n\
		Cache-Control: no-cache\r\n\
		Pragma: no-cache\r\n"
	));
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_description_request() {
		let loc = IgdLocation::parse("http://192.168.1.1:8000/o8ee3npj36j/IGD/upnp/IGD.xml");
		let req = build_description_request(&loc, "esp-link");
		assert_eq!(
			String::from_utf8(req).unwrap(),
			"GET /o8ee3npj36j/IGD/upnp/IGD.xml HTTP/1.0\r\n\
			Host: 192.168.1.1:8000\r\n\
			Connection: close\r\n\
			User-Agent: esp-link\r\n\r\n"
		);

		let loc = IgdLocation::parse("http://10.0.0.1");
		let req = build_description_request(&loc, "x");
		assert!(req.starts_with(b"GET / HTTP/1.0\r\n"));
	}

	#[test]
	fn test_post_header() {
		let mut buf = String::new();
		build_post_header(&mut buf, "/ctl", "192.168.1.1:8000", "igdpunch", "urn:x#Act", 286);
		assert!(buf.starts_with("POST /ctl HTTP/1.0\r\nHost: 192.168.1.1:8000\r\n"));
		assert!(buf.contains("\r\nContent-Length: 286\r\n"));
		assert!(buf.contains("\r\nSOAPAction: \"urn:x#Act\"\r\n"));
		assert!(buf.ends_with("Pragma: no-cache\r\n"));
	}
}
