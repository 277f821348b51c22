use crate::upnphttp::build_post_header;
use crate::upnpurns::{SOAP_ENCODING_NS, SOAP_ENVELOPE_NS};
use std::fmt::Write;
use std::net::Ipv4Addr;

/// The gateway operations the control point invokes. Mappings are always
/// TCP, permanent, for any remote host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SoapAction {
	AddPortMapping { remote_port: u16, local_port: u16, local_ip: Ipv4Addr },
	DeletePortMapping { remote_port: u16 },
	GetExternalIPAddress,
}

impl SoapAction {
	pub fn name(&self) -> &'static str {
		match self {
			SoapAction::AddPortMapping { .. } => "AddPortMapping",
			SoapAction::DeletePortMapping { .. } => "DeletePortMapping",
			SoapAction::GetExternalIPAddress => "GetExternalIPAddress",
		}
	}

	/// Envelope with the action's arguments substituted.
	pub fn body_xml(&self, service_type: &str, description: &str) -> String {
		let action = self.name();
		let mut body = String::with_capacity(640);
		let _ = body.write_fmt(format_args!(
			"<?xml version=\"1.0\"?>\r\n\
			<s:Envelope xmlns:s=\"{SOAP_ENVELOPE_NS}\" s:encodingStyle=\"{SOAP_ENCODING_NS}\">\r\n\
			<s:Body>\r\n\
			<u:{action} xmlns:u=\"{service_type}\">\r\n"
		));
		match *self {
			SoapAction::AddPortMapping { remote_port, local_port, local_ip } => {
				let _ = body.write_fmt(format_args!(
					"<NewRemoteHost></NewRemoteHost>\r\n\
					<NewExternalPort>{remote_port}</NewExternalPort>\r\n\
					<NewProtocol>TCP</NewProtocol>\r\n\
					<NewInternalPort>{local_port}</NewInternalPort>\r\n\
					<NewInternalClient>{local_ip}</NewInternalClient>\r\n\
					<NewEnabled>1</NewEnabled>\r\n\
					<NewPortMappingDescription>{description}</NewPortMappingDescription>\r\n\
					<NewLeaseDuration>0</NewLeaseDuration>\r\n"
				));
			}
			SoapAction::DeletePortMapping { remote_port } => {
				let _ = body.write_fmt(format_args!(
					"<NewRemoteHost></NewRemoteHost>\r\n\
					<NewExternalPort>{remote_port}</NewExternalPort>\r\n\
					<NewProtocol>TCP</NewProtocol>\r\n"
				));
			}
			SoapAction::GetExternalIPAddress => {}
		}
		let _ = body.write_fmt(format_args!(
			"</u:{action}>\r\n\
			</s:Body>\r\n\
			</s:Envelope>\r\n"
		));
		body
	}
}

/// Parameters shared by every request to one gateway.
pub struct SoapTarget<'a> {
	pub control_url: &'a str,
	pub authority: &'a str,
	pub user_agent: &'a str,
	pub service_type: &'a str,
	pub description: &'a str,
}

/// Complete POST, header and body. The body is rendered first so
/// Content-Length is taken from its final size.
pub fn build_soap_request(target: &SoapTarget, action: &SoapAction) -> Vec<u8> {
	let body = action.body_xml(target.service_type, target.description);
	let soap_action = format!("{}#{}", target.service_type, action.name());

	let mut req = String::with_capacity(body.len() + 320);
	build_post_header(&mut req, target.control_url, target.authority, target.user_agent, &soap_action, body.len());
	req.push_str("\r\n");
	req.push_str(&body);
	req.into_bytes()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::upnpurns::SERVICE_TYPE_WANPPPC;

	/// Offset of the body, past the blank line ending the header.
	fn find_body(req: &[u8]) -> Option<usize> {
		req.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
	}

	fn target() -> SoapTarget<'static> {
		SoapTarget {
			control_url: "/o8ee3npj36j/IGD/upnp/control/igd/wanpppc_1_1_1",
			authority: "192.168.1.1:8000",
			user_agent: "igdpunch",
			service_type: SERVICE_TYPE_WANPPPC,
			description: "libminiupnpc",
		}
	}

	fn content_length(req: &str) -> usize {
		let line = req.lines().find(|l| l.starts_with("Content-Length: ")).unwrap();
		line["Content-Length: ".len()..].parse().unwrap()
	}

	#[test]
	fn test_content_length_matches_body() {
		let actions = [
			SoapAction::AddPortMapping { remote_port: 9876, local_port: 80, local_ip: Ipv4Addr::new(192, 168, 1, 176) },
			SoapAction::AddPortMapping { remote_port: 1, local_port: 65535, local_ip: Ipv4Addr::new(10, 0, 0, 2) },
			SoapAction::DeletePortMapping { remote_port: 9876 },
			SoapAction::GetExternalIPAddress,
		];
		for action in actions {
			let req = build_soap_request(&target(), &action);
			let off = find_body(&req).unwrap();
			let req = String::from_utf8(req).unwrap();
			assert_eq!(content_length(&req), req.len() - off, "{}", action.name());
		}
	}

	#[test]
	fn test_add_port_mapping() {
		let action =
			SoapAction::AddPortMapping { remote_port: 9876, local_port: 80, local_ip: Ipv4Addr::new(192, 168, 1, 176) };
		let req = String::from_utf8(build_soap_request(&target(), &action)).unwrap();
		assert!(req.starts_with("POST /o8ee3npj36j/IGD/upnp/control/igd/wanpppc_1_1_1 HTTP/1.0\r\n"));
		assert!(req.contains(
			"SOAPAction: \"urn:schemas-upnp-org:service:WANPPPConnection:1#AddPortMapping\"\r\n"
		));
		assert!(req.contains("<NewExternalPort>9876</NewExternalPort>"));
		assert!(req.contains("<NewInternalPort>80</NewInternalPort>"));
		assert!(req.contains("<NewInternalClient>192.168.1.176</NewInternalClient>"));
		assert!(req.contains("<NewPortMappingDescription>libminiupnpc</NewPortMappingDescription>"));
		assert!(req.contains("<NewLeaseDuration>0</NewLeaseDuration>"));
	}

	#[test]
	fn test_delete_and_query_bodies() {
		let body = SoapAction::DeletePortMapping { remote_port: 9876 }.body_xml(SERVICE_TYPE_WANPPPC, "");
		assert!(body.contains("<u:DeletePortMapping xmlns:u=\"urn:schemas-upnp-org:service:WANPPPConnection:1\">"));
		assert!(body.contains("<NewExternalPort>9876</NewExternalPort>\r\n<NewProtocol>TCP</NewProtocol>"));
		assert!(!body.contains("NewInternalPort"));

		let body = SoapAction::GetExternalIPAddress.body_xml(SERVICE_TYPE_WANPPPC, "");
		assert!(body.ends_with(
			"<u:GetExternalIPAddress xmlns:u=\"urn:schemas-upnp-org:service:WANPPPConnection:1\">\r\n\
			</u:GetExternalIPAddress>\r\n</s:Body>\r\n</s:Envelope>\r\n"
		));
	}
}
