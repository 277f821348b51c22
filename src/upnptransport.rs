use crate::upnpconn::{ConnId, Event, Transport};
use crate::warp::FdSet;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::str::FromStr;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread;

const RECV_BUF_SIZE: usize = 1536;
const MULTICAST_TTL: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SockState {
	Connecting,
	Open,
}

struct Sock {
	id: ConnId,
	s: Socket,
	/// datagram destination, `None` for streams
	dest: Option<SockAddr>,
	state: SockState,
	/// a send is waiting for writability to be reported as completed
	send_pending: bool,
}

/// [`Transport`] over non-blocking sockets, driven by `select(2)`.
///
/// Call [`SocketTransport::select_fds`] before and
/// [`SocketTransport::process_fds`] after `select`, then drain
/// [`SocketTransport::next_event`]. Name lookups run on worker threads and
/// their answers are picked up by `next_event`.
pub struct SocketTransport {
	socks: Vec<Sock>,
	events: VecDeque<Event>,
	lookups_tx: Sender<Event>,
	lookups_rx: Receiver<Event>,
	/// lookups started and not yet handed out
	resolving: usize,
	next_id: ConnId,
	lan_addr: Option<Ipv4Addr>,
	packet_log: bool,
}

impl SocketTransport {
	pub fn new(lan_addr: Option<Ipv4Addr>, packet_log: bool) -> Self {
		let (lookups_tx, lookups_rx) = channel();
		Self {
			socks: Vec::new(),
			events: VecDeque::new(),
			lookups_tx,
			lookups_rx,
			resolving: 0,
			next_id: 1,
			lan_addr,
			packet_log,
		}
	}

	fn alloc_id(&mut self) -> ConnId {
		let id = self.next_id;
		self.next_id = self.next_id.wrapping_add(1).max(1);
		id
	}

	fn find(&mut self, conn: ConnId) -> io::Result<&mut Sock> {
		self.socks.iter_mut().find(|s| s.id == conn).ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
	}

	pub fn next_event(&mut self) -> Option<Event> {
		while let Ok(ev) = self.lookups_rx.try_recv() {
			self.resolving = self.resolving.saturating_sub(1);
			self.events.push_back(ev);
		}
		self.events.pop_front()
	}

	/// No socket open and no lookup outstanding.
	pub fn is_idle(&self) -> bool {
		self.socks.is_empty() && self.resolving == 0
	}

	pub fn select_fds(&self, readset: &mut FdSet, writeset: &mut FdSet, max_fd: &mut i32) {
		for sock in &self.socks {
			let fd = sock.s.as_raw_fd();
			match sock.state {
				SockState::Connecting => writeset.watch(fd, max_fd),
				SockState::Open => {
					readset.watch(fd, max_fd);
					if sock.send_pending {
						writeset.watch(fd, max_fd);
					}
				}
			}
		}
	}

	pub fn process_fds(&mut self, readset: &FdSet, writeset: &FdSet) {
		let mut dead = Vec::new();
		for sock in self.socks.iter_mut() {
			let fd = sock.s.as_raw_fd();
			if sock.state == SockState::Connecting {
				if !writeset.is_set(fd) {
					continue;
				}
				match sock.s.take_error() {
					Ok(None) => {
						sock.state = SockState::Open;
						self.events.push_back(Event::Connected(sock.id));
					}
					Ok(Some(e)) | Err(e) => {
						warn!("connect on conn {}: {}", sock.id, e);
						self.events.push_back(Event::Failed(sock.id, e.kind()));
						dead.push(sock.id);
					}
				}
				continue;
			}
			if sock.send_pending && writeset.is_set(fd) {
				sock.send_pending = false;
				self.events.push_back(Event::SendCompleted(sock.id));
			}
			if readset.is_set(fd) {
				let mut buf = [0u8; RECV_BUF_SIZE];
				match (&sock.s).read(&mut buf) {
					Ok(0) if sock.dest.is_none() => {
						debug!("conn {} closed by peer", sock.id);
						self.events.push_back(Event::Closed(sock.id));
						dead.push(sock.id);
					}
					Ok(0) => {}
					Ok(n) => {
						if self.packet_log {
							debug!("conn {} received {} bytes: {}", sock.id, n, String::from_utf8_lossy(&buf[..n]));
						}
						self.events.push_back(Event::DataReceived(sock.id, buf[..n].to_vec()));
					}
					Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => {}
					Err(e) => {
						error!("recv on conn {}: {}", sock.id, e);
						self.events.push_back(Event::Failed(sock.id, e.kind()));
						dead.push(sock.id);
					}
				}
			}
		}
		if !dead.is_empty() {
			self.socks.retain(|s| !dead.contains(&s.id));
		}
	}
}

/// First usable IPv4 address of `host`.
fn lookup(host: &str) -> Option<Ipv4Addr> {
	match (host, 0).to_socket_addrs() {
		Ok(mut addrs) => addrs.find_map(|a| match a {
			SocketAddr::V4(v4) if !v4.ip().is_unspecified() => Some(*v4.ip()),
			_ => None,
		}),
		Err(e) => {
			warn!("resolve {}: {}", host, e);
			None
		}
	}
}

impl Transport for SocketTransport {
	fn open_udp(&mut self, dest: SocketAddrV4) -> io::Result<ConnId> {
		let s = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
		s.set_nonblocking(true)?;
		if dest.ip().is_multicast() {
			s.set_multicast_ttl_v4(MULTICAST_TTL)?;
			if let Some(lan) = self.lan_addr {
				s.set_multicast_if_v4(&lan)?;
			}
		}
		let local = SocketAddrV4::new(self.lan_addr.unwrap_or(Ipv4Addr::UNSPECIFIED), 0);
		s.bind(&SockAddr::from(local))?;

		let id = self.alloc_id();
		self.socks.push(Sock { id, s, dest: Some(SockAddr::from(dest)), state: SockState::Open, send_pending: false });
		Ok(id)
	}

	fn open_tcp(&mut self, dest: SocketAddrV4) -> io::Result<ConnId> {
		let s = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
		s.set_nonblocking(true)?;
		let id = self.alloc_id();
		match s.connect(&SockAddr::from(dest)) {
			Ok(()) => {
				self.socks.push(Sock { id, s, dest: None, state: SockState::Open, send_pending: false });
				self.events.push_back(Event::Connected(id));
			}
			Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == Some(libc::EINPROGRESS) => {
				self.socks.push(Sock { id, s, dest: None, state: SockState::Connecting, send_pending: false });
			}
			Err(e) => {
				warn!("connect({}): {}", dest, e);
				self.events.push_back(Event::Failed(id, e.kind()));
			}
		}
		Ok(id)
	}

	/// Literals are answered at once, names by a worker thread since
	/// `getaddrinfo` blocks.
	fn resolve(&mut self, host: &str) -> io::Result<()> {
		if let Ok(addr) = Ipv4Addr::from_str(host) {
			self.events.push_back(Event::Resolved { host: host.to_string(), addr: Some(addr) });
			return Ok(());
		}
		let tx = self.lookups_tx.clone();
		let host = host.to_string();
		thread::Builder::new().name("resolve".to_string()).spawn(move || {
			let addr = lookup(&host);
			// receiver gone means the transport was dropped
			let _ = tx.send(Event::Resolved { host, addr });
		})?;
		self.resolving += 1;
		Ok(())
	}

	fn send(&mut self, conn: ConnId, buf: &[u8]) -> io::Result<usize> {
		let packet_log = self.packet_log;
		let sock = self.find(conn)?;
		if packet_log {
			debug!("conn {} send {} bytes: {}", conn, buf.len(), String::from_utf8_lossy(buf));
		}
		let res = match &sock.dest {
			Some(dest) => sock.s.send_to(buf, dest),
			None => sock.s.send(buf),
		};
		match res {
			Ok(n) => {
				sock.send_pending = true;
				Ok(n)
			}
			Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => {
				// retried from the next SendCompleted
				sock.send_pending = true;
				Ok(0)
			}
			Err(e) => Err(e),
		}
	}

	fn close(&mut self, conn: ConnId) {
		self.socks.retain(|s| s.id != conn);
	}
}
