//! Control channel: the five requests a host can make, in text form for the
//! command line and in packed form for a binary RPC link.

use crate::error::UpnpError;
use crate::upnpclient::{GatewaySession, QueryStatus};
use crate::upnpconn::Transport;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Reply value for "nothing yet" and for accepted requests.
pub const CMD_RESP_OK: u32 = 0;
/// Reply value for a refused request, -1 on the wire.
pub const CMD_RESP_FAIL: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
	Scan,
	/// `local_ip` defaults to the configured LAN address
	AddPort { local_ip: Option<Ipv4Addr>, local_port: u16, remote_port: u16 },
	RemovePort { remote_port: u16 },
	QueryExternalAddress,
	Reset,
	Quit,
}

fn invalid(line: &str) -> UpnpError {
	UpnpError::InvalidCommand(line.to_string())
}

impl FromStr for Command {
	type Err = UpnpError;

	/// `scan`, `add [ip] <local-port> <remote-port>`, `remove <remote-port>`,
	/// `extip`, `reset`, `quit`. Arguments are packed and decoded like an
	/// RPC request.
	fn from_str(line: &str) -> Result<Self, Self::Err> {
		let args: Vec<&str> = line.split_ascii_whitespace().collect();
		let Some((cmd, args)) = args.split_first() else {
			return Err(invalid(line));
		};
		let name = match cmd.to_ascii_lowercase().as_str() {
			"scan" => "scan",
			"add" => "add",
			"remove" | "del" => "remove",
			"extip" | "query" => "extip",
			"reset" | "begin" => "reset",
			"quit" | "exit" if args.is_empty() => return Ok(Command::Quit),
			_ => return Err(invalid(line)),
		};
		let mut packed = Vec::with_capacity(args.len());
		for (i, arg) in args.iter().enumerate() {
			let arg = if name == "add" && args.len() == 3 && i == 0 {
				Ipv4Addr::from_str(arg).map_err(|_| invalid(line))?.octets().to_vec()
			} else {
				u16::from_str(arg).map_err(|_| invalid(line))?.to_le_bytes().to_vec()
			};
			packed.push(arg);
		}
		let packed: Vec<&[u8]> = packed.iter().map(Vec::as_slice).collect();
		Command::from_packed(name, &packed).map_err(|_| invalid(line))
	}
}

fn packed_ip(arg: &[u8]) -> Option<Ipv4Addr> {
	<[u8; 4]>::try_from(arg).ok().map(Ipv4Addr::from)
}

fn packed_port(arg: &[u8]) -> Option<u16> {
	<[u8; 2]>::try_from(arg).ok().map(u16::from_le_bytes)
}

impl Command {
	/// Decodes an RPC request: addresses are 4 bytes in network order,
	/// ports 2 bytes little endian. `add` without an address uses the
	/// configured LAN address.
	pub fn from_packed(name: &str, args: &[&[u8]]) -> Result<Self, UpnpError> {
		let bad = || UpnpError::InvalidCommand(format!("{} with {} args", name, args.len()));
		match (name, args) {
			("scan", []) => Ok(Command::Scan),
			("add", [ip, local, remote]) => Ok(Command::AddPort {
				local_ip: Some(packed_ip(ip).ok_or_else(bad)?),
				local_port: packed_port(local).ok_or_else(bad)?,
				remote_port: packed_port(remote).ok_or_else(bad)?,
			}),
			("add", [local, remote]) => Ok(Command::AddPort {
				local_ip: None,
				local_port: packed_port(local).ok_or_else(bad)?,
				remote_port: packed_port(remote).ok_or_else(bad)?,
			}),
			("remove", [remote]) => Ok(Command::RemovePort { remote_port: packed_port(remote).ok_or_else(bad)? }),
			("extip", []) => Ok(Command::QueryExternalAddress),
			("reset", []) => Ok(Command::Reset),
			_ => Err(bad()),
		}
	}
}

/// An address as a reply value: its network order bytes read little endian,
/// so the value travels with the octets in order.
pub fn addr_value(addr: Ipv4Addr) -> u32 {
	u32::from_le_bytes(addr.octets())
}

pub fn value_addr(value: u32) -> Ipv4Addr {
	Ipv4Addr::from(value.to_le_bytes())
}

/// Runs one request against the session and returns the reply value.
pub fn dispatch<T: Transport + ?Sized>(s: &mut GatewaySession, t: &mut T, cmd: Command) -> u32 {
	match cmd {
		Command::Scan => match s.scan(t) {
			Ok(Some(gw)) => addr_value(gw),
			Ok(None) => CMD_RESP_OK,
			Err(e) if e.is_busy() => {
				info!("scan: {}", e);
				CMD_RESP_OK
			}
			Err(e) => {
				// no gateway yet, the caller scans again later
				warn!("scan: {}", e);
				CMD_RESP_OK
			}
		},
		Command::AddPort { local_ip, local_port, remote_port } => {
			let Some(local_ip) = local_ip.or_else(|| s.options().lan_addr()) else {
				warn!("add: no local address given and listening_ip not set");
				return CMD_RESP_FAIL;
			};
			match s.add_port(t, local_ip, local_port, remote_port) {
				Ok(()) => CMD_RESP_OK,
				Err(e) => {
					warn!("add {}:{} -> {}: {}", local_ip, local_port, remote_port, e);
					CMD_RESP_FAIL
				}
			}
		}
		Command::RemovePort { remote_port } => match s.remove_port(t, remote_port) {
			Ok(()) => CMD_RESP_OK,
			Err(e) => {
				warn!("remove {}: {}", remote_port, e);
				CMD_RESP_FAIL
			}
		},
		Command::QueryExternalAddress => match s.query_external_address(t) {
			Ok(QueryStatus::Done(addr)) => addr_value(addr),
			Ok(QueryStatus::Started | QueryStatus::Pending) => CMD_RESP_OK,
			Err(e) => {
				warn!("external address: {}", e);
				CMD_RESP_FAIL
			}
		},
		Command::Reset => {
			s.reset(t);
			CMD_RESP_OK
		}
		Command::Quit => CMD_RESP_OK,
	}
}

/// Human readable form of a reply value.
pub fn format_reply(cmd: &Command, value: u32) -> String {
	match (cmd, value) {
		(_, CMD_RESP_FAIL) => "-1".to_string(),
		(Command::Scan | Command::QueryExternalAddress, v) if v != CMD_RESP_OK => value_addr(v).to_string(),
		(_, v) => v.to_string(),
	}
}
