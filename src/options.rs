use crate::error::UpnpError;
use crate::upnpurns::*;
use ipnet::Ipv4Net;
use std::fs::File;
use std::io;
use std::io::{BufRead, BufReader};
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

pub const DEF_CONF_FILE: &str = "/etc/igdpunch.conf";

#[derive(Clone, Debug)]
pub struct Options {
	/// LAN side address, used as multicast interface and default internal client
	pub listening_ip: Option<Ipv4Net>,
	pub user_agent: String,
	pub search_target: String,
	pub ssdp_mx: u8,
	pub ssdp_max_sends: u8,
	pub service_id: String,
	pub service_type: String,
	pub mapping_description: String,
	pub send_chunk: usize,
	pub packet_log: bool,
}

impl Default for Options {
	fn default() -> Self {
		Self {
			listening_ip: None,
			user_agent: DEFAULT_USER_AGENT.to_string(),
			search_target: DEVICE_TYPE_IGD.to_string(),
			ssdp_mx: DEFAULT_SSDP_MX,
			ssdp_max_sends: DEFAULT_SSDP_MAX_SENDS,
			service_id: SERVICE_ID_WANPPPC.to_string(),
			service_type: SERVICE_TYPE_WANPPPC.to_string(),
			mapping_description: DEFAULT_MAPPING_DESC.to_string(),
			send_chunk: DEFAULT_SEND_CHUNK,
			packet_log: false,
		}
	}
}

impl Options {
	pub fn lan_addr(&self) -> Option<Ipv4Addr> {
		self.listening_ip.map(|n| n.addr())
	}
}

pub fn parselanaddr(lan: &str) -> Option<Ipv4Net> {
	if let Ok(net) = Ipv4Net::from_str(lan) {
		return Some(net);
	}
	match Ipv4Addr::from_str(lan) {
		Ok(ip) => Ipv4Net::new(ip, 24).ok(),
		Err(_) => None,
	}
}

fn invalid(key: &str, value: &str) -> UpnpError {
	UpnpError::InvalidOption { key: key.to_string(), value: value.to_string() }
}

fn parse_option_line(op: &mut Options, key: &str, value: &str) -> Result<(), UpnpError> {
	let key = key.trim();
	let value = value.trim();
	if value.is_empty() {
		return Err(invalid(key, value));
	};

	match key {
		"listening_ip" => {
			op.listening_ip = Some(parselanaddr(value).ok_or_else(|| invalid(key, value))?);
		}
		"user_agent" => op.user_agent = value.to_string(),
		"search_target" => op.search_target = value.to_string(),
		"ssdp_mx" => match u8::from_str(value) {
			Ok(v) if v > 0 => op.ssdp_mx = v,
			_ => return Err(invalid(key, value)),
		},
		"ssdp_max_sends" => match u8::from_str(value) {
			Ok(v) if v > 0 => op.ssdp_max_sends = v,
			_ => return Err(invalid(key, value)),
		},
		"service_id" => op.service_id = value.to_string(),
		"service_type" => op.service_type = value.to_string(),
		"mapping_description" => op.mapping_description = value.to_string(),
		"send_chunk" => match usize::from_str(value) {
			Ok(v) if v > 0 => op.send_chunk = v,
			_ => return Err(invalid(key, value)),
		},
		"packet_log" => match parse_bool(value) {
			Some(v) => op.packet_log = v,
			None => return Err(invalid(key, value)),
		},
		// ignore unknown option
		_ => {
			debug!("ignoring unknown option {}", key);
		}
	}
	Ok(())
}

pub fn parse_options<R: BufRead>(reader: R) -> io::Result<Options> {
	let mut option = Options::default();

	for line in reader.lines() {
		let line = line?;
		let line_ = line.trim_start();
		if line_.is_empty() || line_.starts_with('#') {
			continue;
		}
		if let Some((key, value)) = line_.split_once('=') {
			if let Err(e) = parse_option_line(&mut option, key, value) {
				error!("cannot parse option {}: {}", line_, e);
			}
		} else {
			error!("cannot parse option {}", line_);
		}
	}
	Ok(option)
}

pub fn readoptionsfile(fname: &Path) -> io::Result<Options> {
	trace!("Reading configuration from file {:?}", fname);
	let file = File::open(fname)?;
	parse_options(BufReader::with_capacity(1024, file))
}

fn parse_bool(s: &str) -> Option<bool> {
	match s {
		"true" | "yes" | "True" | "1" => Some(true),
		"false" | "no" | "False" | "0" => Some(false),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let op = Options::default();
		assert_eq!(op.ssdp_max_sends, 4);
		assert_eq!(op.ssdp_mx, 2);
		assert_eq!(op.send_chunk, 1400);
		assert_eq!(op.service_id, "urn:upnp-org:serviceId:WANPPPConn1");
		assert_eq!(op.service_type, "urn:schemas-upnp-org:service:WANPPPConnection:1");
		assert!(op.lan_addr().is_none());
	}

	#[test]
	fn test_parse_options() {
		let conf = "\
			# control point settings\n\
			listening_ip=192.168.1.176/24\n\
			\n\
			user_agent = esp-link\n\
			ssdp_max_sends=2\n\
			send_chunk=0\n\
			packet_log=yes\n\
			no_such_key=1\n\
			garbage line\n";
		let op = parse_options(conf.as_bytes()).unwrap();
		assert_eq!(op.lan_addr(), Some(Ipv4Addr::new(192, 168, 1, 176)));
		assert_eq!(op.user_agent, "esp-link");
		assert_eq!(op.ssdp_max_sends, 2);
		// rejected value keeps the default
		assert_eq!(op.send_chunk, 1400);
		assert!(op.packet_log);
	}

	#[test]
	fn test_parse_lan() {
		assert_eq!(parselanaddr("10.0.0.2").map(|n| n.addr()), Some(Ipv4Addr::new(10, 0, 0, 2)));
		assert_eq!(parselanaddr("10.0.0.2/8").map(|n| n.prefix_len()), Some(8));
		assert!(parselanaddr("eth0").is_none());
	}

	#[test]
	fn test_missing_file() {
		assert!(readoptionsfile(Path::new("/nonexistent/igdpunch.conf")).is_err());
	}
}
