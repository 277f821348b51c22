//! Gateway session: the state machine tying discovery, the description
//! fetch and the three SOAP operations together.
//!
//! Requests come in through [`GatewaySession::scan`], [`GatewaySession::add_port`],
//! [`GatewaySession::remove_port`], [`GatewaySession::query_external_address`]
//! and [`GatewaySession::reset`]. They only start work; progress is made by
//! feeding transport events to [`GatewaySession::process_event`].

use crate::error::UpnpError;
use crate::minissdpc::{Discovery, find_location};
use crate::options::Options;
use crate::upnpconn::{Connection, Event, Transport};
use crate::upnpdescparse::ControlUrlScanner;
use crate::upnphttp::build_description_request;
use crate::upnpreplyparse::{ERROR_CODE_TAG, EXTERNAL_IP_TAG, TagValueScanner, parse_external_address};
use crate::upnpsoap::{SoapAction, SoapTarget, build_soap_request};
use crate::upnpurns::SSDP_MCAST_DEST;
use crate::upnputils::IgdLocation;
use std::net::Ipv4Addr;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpnpState {
	Idle,
	Discovering,
	DeviceFound,
	Ready,
	Adding,
	Removing,
	QueryingExternalAddress,
}

/// Answer to an external address request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryStatus {
	/// Request sent, poll again
	Started,
	/// Still waiting for the gateway
	Pending,
	Done(Ipv4Addr),
}

pub struct GatewaySession {
	opts: Options,
	state: UpnpState,
	location: Option<String>,
	igd: Option<IgdLocation>,
	control_url: Option<String>,
	external_address: Option<Ipv4Addr>,
	local_ip: Ipv4Addr,
	local_port: u16,
	remote_port: u16,
	remote_ip: Option<Ipv4Addr>,
	conn: Option<Connection>,
	discovery: Option<Discovery>,
	desc: Option<ControlUrlScanner>,
	reply: Option<TagValueScanner>,
	/// the external address query connection has closed
	query_closed: bool,
	last_error: Option<UpnpError>,
}

impl GatewaySession {
	pub fn new(opts: Options) -> Self {
		Self {
			opts,
			state: UpnpState::Idle,
			location: None,
			igd: None,
			control_url: None,
			external_address: None,
			local_ip: Ipv4Addr::UNSPECIFIED,
			local_port: 0,
			remote_port: 0,
			remote_ip: None,
			conn: None,
			discovery: None,
			desc: None,
			reply: None,
			query_closed: false,
			last_error: None,
		}
	}

	pub fn state(&self) -> UpnpState {
		self.state
	}

	pub fn options(&self) -> &Options {
		&self.opts
	}

	pub fn location(&self) -> Option<&str> {
		self.location.as_deref()
	}

	pub fn host(&self) -> Option<&str> {
		self.igd.as_ref().map(|l| l.host.as_str())
	}

	pub fn control_port(&self) -> Option<u16> {
		self.igd.as_ref().map(|l| l.port)
	}

	pub fn description_path(&self) -> Option<&str> {
		self.igd.as_ref().map(|l| l.path.as_str())
	}

	pub fn control_url(&self) -> Option<&str> {
		self.control_url.as_deref()
	}

	pub fn external_address(&self) -> Option<Ipv4Addr> {
		self.external_address
	}

	pub fn remote_ip(&self) -> Option<Ipv4Addr> {
		self.remote_ip
	}

	/// Parameters of the last add or remove request.
	pub fn mapping(&self) -> (Ipv4Addr, u16, u16) {
		(self.local_ip, self.local_port, self.remote_port)
	}

	pub fn has_connection(&self) -> bool {
		self.conn.is_some()
	}

	pub fn is_ready(&self) -> bool {
		self.state == UpnpState::Ready && self.remote_ip.is_some()
	}

	pub fn last_error(&self) -> Option<&UpnpError> {
		self.last_error.as_ref()
	}

	/// Failure reported by an event since the last call, if any.
	pub fn take_last_error(&mut self) -> Option<UpnpError> {
		self.last_error.take()
	}

	fn set_state(&mut self, state: UpnpState) {
		if self.state != state {
			debug!("upnp state {:?} -> {:?}", self.state, state);
			self.state = state;
		}
	}

	fn release<T: Transport + ?Sized>(&mut self, t: &mut T) {
		if let Some(conn) = self.conn.take() {
			conn.close(t);
		}
	}

	/// Forgets everything learnt about the gateway.
	fn clear(&mut self) {
		self.location = None;
		self.igd = None;
		self.control_url = None;
		self.external_address = None;
		self.remote_ip = None;
		self.discovery = None;
		self.desc = None;
		self.reply = None;
		self.query_closed = false;
	}

	/// Starts discovery. Returns the gateway address right away when one is
	/// already known.
	pub fn scan<T: Transport + ?Sized>(&mut self, t: &mut T) -> Result<Option<Ipv4Addr>, UpnpError> {
		match self.state {
			UpnpState::Ready if self.remote_ip.is_some() => return Ok(self.remote_ip),
			UpnpState::Idle | UpnpState::Ready => {}
			state => return Err(UpnpError::Busy(state)),
		}
		self.release(t);
		self.clear();

		let mut discovery = Discovery::new(&self.opts);
		let mut conn =
			Connection::open_udp(t, SSDP_MCAST_DEST, self.opts.send_chunk).map_err(UpnpError::ResourceExhausted)?;
		let msg = discovery.start().to_vec();
		if let Err(e) = conn.send(t, msg) {
			conn.close(t);
			return Err(e.into());
		}
		info!("searching for {} on {}", self.opts.search_target, SSDP_MCAST_DEST);
		self.conn = Some(conn);
		self.discovery = Some(discovery);
		self.set_state(UpnpState::Discovering);
		Ok(None)
	}

	fn check_ready(&self) -> Result<(), UpnpError> {
		if !self.is_ready() {
			return Err(UpnpError::Busy(self.state));
		}
		if self.control_url.is_none() {
			return Err(UpnpError::FieldNotFound("controlURL"));
		}
		Ok(())
	}

	fn start_operation<T: Transport + ?Sized>(
		&mut self,
		t: &mut T,
		action: SoapAction,
		next: UpnpState,
	) -> Result<(), UpnpError> {
		let (Some(igd), Some(gateway), Some(control_url)) = (self.igd.as_ref(), self.remote_ip, self.control_url.as_deref())
		else {
			return Err(UpnpError::Busy(self.state));
		};
		let authority = igd.authority();
		let target = SoapTarget {
			control_url,
			authority: &authority,
			user_agent: &self.opts.user_agent,
			service_type: &self.opts.service_type,
			description: &self.opts.mapping_description,
		};
		let req = build_soap_request(&target, &action);
		info!("{} to {}{}", action.name(), authority, control_url);
		if self.opts.packet_log {
			debug!("{}", String::from_utf8_lossy(&req));
		}
		let conn = Connection::open_tcp(t, &gateway.to_string(), igd.port, req, self.opts.send_chunk)
			.map_err(UpnpError::ResourceExhausted)?;

		self.conn = Some(conn);
		self.reply = Some(TagValueScanner::new(match action {
			SoapAction::GetExternalIPAddress => EXTERNAL_IP_TAG,
			_ => ERROR_CODE_TAG,
		}));
		self.set_state(next);
		Ok(())
	}

	/// Asks the gateway to forward `remote_port` to `local_ip:local_port`.
	pub fn add_port<T: Transport + ?Sized>(
		&mut self,
		t: &mut T,
		local_ip: Ipv4Addr,
		local_port: u16,
		remote_port: u16,
	) -> Result<(), UpnpError> {
		self.check_ready()?;
		self.local_ip = local_ip;
		self.local_port = local_port;
		self.remote_port = remote_port;
		self.start_operation(t, SoapAction::AddPortMapping { remote_port, local_port, local_ip }, UpnpState::Adding)
	}

	pub fn remove_port<T: Transport + ?Sized>(&mut self, t: &mut T, remote_port: u16) -> Result<(), UpnpError> {
		self.check_ready()?;
		self.remote_port = remote_port;
		self.start_operation(t, SoapAction::DeletePortMapping { remote_port }, UpnpState::Removing)
	}

	/// First call sends the query, later calls poll for its answer.
	pub fn query_external_address<T: Transport + ?Sized>(&mut self, t: &mut T) -> Result<QueryStatus, UpnpError> {
		if self.state == UpnpState::QueryingExternalAddress {
			if let Some(addr) = self.external_address {
				self.release(t);
				self.reply = None;
				self.set_state(UpnpState::Ready);
				return Ok(QueryStatus::Done(addr));
			}
			if self.query_closed {
				self.query_closed = false;
				self.set_state(UpnpState::Ready);
				return Err(UpnpError::FieldNotFound(EXTERNAL_IP_TAG));
			}
			return Ok(QueryStatus::Pending);
		}
		self.check_ready()?;
		self.external_address = None;
		self.query_closed = false;
		self.start_operation(t, SoapAction::GetExternalIPAddress, UpnpState::QueryingExternalAddress)?;
		Ok(QueryStatus::Started)
	}

	/// Drops the session, whatever it is doing.
	pub fn reset<T: Transport + ?Sized>(&mut self, t: &mut T) {
		self.release(t);
		self.clear();
		self.last_error = None;
		self.set_state(UpnpState::Idle);
	}

	/// Advances the session with one transport event.
	pub fn process_event<T: Transport + ?Sized>(&mut self, t: &mut T, ev: Event) {
		let name = ev.name();
		if let Event::Resolved { host, addr } = ev {
			self.on_resolved(t, &host, addr);
			return;
		}
		let owned = match (ev.conn(), self.conn.as_ref()) {
			(Some(id), Some(conn)) => conn.owns(id),
			_ => false,
		};
		if !owned {
			self.mismatch(name);
			return;
		}
		match ev {
			Event::Connected(_) => {
				let res = self.conn.as_mut().map_or(Ok(()), |c| c.on_connected(t));
				if let Err(e) = res {
					self.fail(t, e.into());
				}
			}
			Event::SendCompleted(_) => self.on_send_completed(t),
			Event::DataReceived(_, data) => self.on_data(t, &data),
			Event::Closed(_) => self.on_closed(t),
			Event::Failed(_, kind) => self.fail(t, UpnpError::TransportFailed(kind)),
			Event::Resolved { .. } => {}
		}
	}

	fn mismatch(&self, event: &'static str) {
		let current = self.conn.as_ref().and_then(Connection::id);
		notice!("{} (current conn {:?})", UpnpError::ProtocolMismatch { state: self.state, event }, current);
	}

	/// Tears the exchange down and falls back to the last stable state.
	fn fail<T: Transport + ?Sized>(&mut self, t: &mut T, err: UpnpError) {
		error!("{:?}: {}", self.state, err);
		self.release(t);
		match self.state {
			UpnpState::Discovering | UpnpState::DeviceFound => {
				self.clear();
				self.set_state(UpnpState::Idle);
			}
			UpnpState::Adding | UpnpState::Removing | UpnpState::QueryingExternalAddress => {
				self.reply = None;
				self.query_closed = false;
				self.set_state(UpnpState::Ready);
			}
			_ => {}
		}
		self.last_error = Some(err);
	}

	fn on_resolved<T: Transport + ?Sized>(&mut self, t: &mut T, host: &str, addr: Option<Ipv4Addr>) {
		if !self.conn.as_ref().is_some_and(|c| c.awaits_resolution(host)) {
			self.mismatch("Resolved");
			return;
		}
		let addr = match addr {
			Some(addr) if !addr.is_unspecified() => addr,
			_ => {
				// state and what was learnt about the gateway stay, reset starts over
				let err = UpnpError::ResolutionFailed(host.to_string());
				error!("{:?}: {}", self.state, err);
				self.release(t);
				self.last_error = Some(err);
				return;
			}
		};
		if self.state == UpnpState::DeviceFound {
			self.remote_ip = Some(addr);
		}
		let res = self.conn.as_mut().map_or(Ok(()), |c| c.on_resolved(t, addr));
		if let Err(e) = res {
			self.fail(t, UpnpError::ResourceExhausted(e));
		}
	}

	fn on_send_completed<T: Transport + ?Sized>(&mut self, t: &mut T) {
		let res = match (self.state, self.discovery.as_mut(), self.conn.as_mut()) {
			(UpnpState::Discovering, Some(discovery), Some(conn)) => match discovery.on_send_completed() {
				Some(msg) => {
					let msg = msg.to_vec();
					debug!("M-SEARCH {} of {}", discovery.sends(), self.opts.ssdp_max_sends);
					conn.send(t, msg)
				}
				None => Ok(()),
			},
			(_, _, Some(conn)) => conn.on_sent(t).map(|_| ()),
			_ => Ok(()),
		};
		if let Err(e) = res {
			self.fail(t, e.into());
		}
	}

	fn on_data<T: Transport + ?Sized>(&mut self, t: &mut T, data: &[u8]) {
		match self.state {
			UpnpState::Discovering => match find_location(data) {
				Some(location) => {
					let location = location.to_string();
					self.on_location(t, location);
				}
				None => {
					trace!("SSDP reply without LOCATION ({} bytes)", data.len());
				}
			},
			UpnpState::DeviceFound => {
				if let Some(desc) = self.desc.as_mut() {
					let known = desc.control_url().is_some();
					if let Some(url) = desc.feed(data) {
						if !known {
							info!("control URL {}", url);
						}
					}
				}
			}
			UpnpState::Adding | UpnpState::Removing | UpnpState::QueryingExternalAddress => {
				let Some(reply) = self.reply.as_mut() else {
					return;
				};
				if reply.value().is_some() {
					return;
				}
				let Some(value) = reply.feed(data).map(str::to_string) else {
					return;
				};
				if self.state == UpnpState::QueryingExternalAddress {
					match parse_external_address(&value) {
						Some(addr) => {
							info!("external address {}", addr);
							self.external_address = Some(addr);
						}
						None => warn!("gateway reports no usable external address ({:?})", value),
					}
				} else {
					let err = UpnpError::SoapFault(value);
					warn!("{:?}: {}", self.state, err);
					self.last_error = Some(err);
				}
			}
			_ => self.mismatch("DataReceived"),
		}
	}

	/// First SSDP answer: switch from the multicast socket to the
	/// description fetch.
	fn on_location<T: Transport + ?Sized>(&mut self, t: &mut T, location: String) {
		self.release(t);
		self.discovery = None;

		let igd = IgdLocation::parse(&location);
		info!("gateway at {} (host {} port {} path {:?})", location, igd.host, igd.port, igd.path);
		self.location = Some(location);
		self.set_state(UpnpState::DeviceFound);

		if let Ok(ip) = Ipv4Addr::from_str(&igd.host) {
			self.remote_ip = Some(ip);
		}
		let req = build_description_request(&igd, &self.opts.user_agent);
		self.desc = Some(ControlUrlScanner::new(&self.opts.service_id));
		match Connection::open_tcp(t, &igd.host, igd.port, req, self.opts.send_chunk) {
			Ok(conn) => {
				self.conn = Some(conn);
				self.igd = Some(igd);
			}
			Err(e) => self.fail(t, UpnpError::ResourceExhausted(e)),
		}
	}

	fn on_closed<T: Transport + ?Sized>(&mut self, t: &mut T) {
		self.release(t);
		match self.state {
			UpnpState::DeviceFound => {
				self.control_url = self.desc.take().and_then(ControlUrlScanner::into_control_url);
				if self.control_url.is_none() {
					warn!("{} not found in description of {}", self.opts.service_id, self.location.as_deref().unwrap_or(""));
				}
				self.set_state(UpnpState::Ready);
			}
			UpnpState::Adding | UpnpState::Removing => {
				self.reply = None;
				self.set_state(UpnpState::Ready);
			}
			UpnpState::QueryingExternalAddress => {
				self.reply = None;
				self.query_closed = true;
				if self.external_address.is_none() {
					debug!("external address query closed without an answer");
				}
			}
			UpnpState::Discovering => {
				self.fail(t, UpnpError::TransportFailed(std::io::ErrorKind::ConnectionAborted));
			}
			_ => {}
		}
	}
}
