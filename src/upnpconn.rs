//! Single-connection lifecycle on top of a non-blocking [`Transport`].
//!
//! The transport reports progress as [`Event`]s. A [`Connection`] owns one
//! transport handle and the outbound request, and moves through
//! resolve, connect, send (in chunks of at most `chunk` bytes) and receive.
//! Dropping the request buffer and closing the handle both happen in
//! [`Connection::close`], which consumes the connection.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

pub type ConnId = u32;

/// Completion notifications from the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
	/// Result of [`Transport::resolve`]; `None` when the lookup gave nothing usable
	Resolved { host: String, addr: Option<Ipv4Addr> },
	Connected(ConnId),
	DataReceived(ConnId, Vec<u8>),
	/// The last send on this connection has been handed to the network
	SendCompleted(ConnId),
	/// Peer closed the connection
	Closed(ConnId),
	Failed(ConnId, io::ErrorKind),
}

impl Event {
	pub fn conn(&self) -> Option<ConnId> {
		match *self {
			Event::Resolved { .. } => None,
			Event::Connected(id)
			| Event::DataReceived(id, _)
			| Event::SendCompleted(id)
			| Event::Closed(id)
			| Event::Failed(id, _) => Some(id),
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			Event::Resolved { .. } => "Resolved",
			Event::Connected(_) => "Connected",
			Event::DataReceived(..) => "DataReceived",
			Event::SendCompleted(_) => "SendCompleted",
			Event::Closed(_) => "Closed",
			Event::Failed(..) => "Failed",
		}
	}
}

/// Non-blocking socket service. Every call returns at once; outcomes are
/// delivered later as [`Event`]s.
pub trait Transport {
	/// UDP socket able to send to `dest` (multicast included).
	fn open_udp(&mut self, dest: SocketAddrV4) -> io::Result<ConnId>;
	/// Starts a TCP connect, completion is `Connected` or `Failed`.
	fn open_tcp(&mut self, dest: SocketAddrV4) -> io::Result<ConnId>;
	/// Starts a name lookup, completion is `Resolved`.
	fn resolve(&mut self, host: &str) -> io::Result<()>;
	/// Queues at most `buf.len()` bytes and returns how many were taken.
	/// `SendCompleted` follows once they are out.
	fn send(&mut self, conn: ConnId, buf: &[u8]) -> io::Result<usize>;
	fn close(&mut self, conn: ConnId);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnPhase {
	Resolving,
	Connecting,
	Sending,
	Receiving,
}

pub struct Connection {
	id: Option<ConnId>,
	host: String,
	port: u16,
	phase: ConnPhase,
	pending: Option<Vec<u8>>,
	sent: usize,
	chunk: usize,
}

impl Connection {
	/// Datagram socket, ready to send.
	pub fn open_udp<T: Transport + ?Sized>(t: &mut T, dest: SocketAddrV4, chunk: usize) -> io::Result<Self> {
		let id = t.open_udp(dest)?;
		debug!("udp conn {} to {}", id, dest);
		Ok(Self {
			id: Some(id),
			host: dest.ip().to_string(),
			port: dest.port(),
			phase: ConnPhase::Receiving,
			pending: None,
			sent: 0,
			chunk: chunk.max(1),
		})
	}

	/// Stream connection carrying `request`, sent as soon as it is connected.
	/// A host that is not a dotted IPv4 address is resolved first.
	pub fn open_tcp<T: Transport + ?Sized>(
		t: &mut T,
		host: &str,
		port: u16,
		request: Vec<u8>,
		chunk: usize,
	) -> io::Result<Self> {
		let mut conn = Self {
			id: None,
			host: host.to_string(),
			port,
			phase: ConnPhase::Resolving,
			pending: Some(request),
			sent: 0,
			chunk: chunk.max(1),
		};
		match Ipv4Addr::from_str(host) {
			Ok(addr) => conn.connect(t, addr)?,
			Err(_) => {
				debug!("resolving {}", host);
				t.resolve(host)?;
			}
		}
		Ok(conn)
	}

	fn connect<T: Transport + ?Sized>(&mut self, t: &mut T, addr: Ipv4Addr) -> io::Result<()> {
		let dest = SocketAddrV4::new(addr, self.port);
		let id = t.open_tcp(dest)?;
		debug!("tcp conn {} connecting to {}", id, dest);
		self.id = Some(id);
		self.phase = ConnPhase::Connecting;
		Ok(())
	}

	/// Name lookup finished for this connection's host.
	pub fn on_resolved<T: Transport + ?Sized>(&mut self, t: &mut T, addr: Ipv4Addr) -> io::Result<()> {
		debug!("{} is {}", self.host, addr);
		self.connect(t, addr)
	}

	pub fn on_connected<T: Transport + ?Sized>(&mut self, t: &mut T) -> io::Result<()> {
		self.phase = ConnPhase::Sending;
		self.send_chunk(t)
	}

	/// Replaces the outbound buffer and starts sending it.
	pub fn send<T: Transport + ?Sized>(&mut self, t: &mut T, buf: Vec<u8>) -> io::Result<()> {
		self.pending = Some(buf);
		self.sent = 0;
		self.phase = ConnPhase::Sending;
		self.send_chunk(t)
	}

	/// Previous chunk is out. Sends the next one, or releases the buffer
	/// and returns `true` when everything has been sent.
	pub fn on_sent<T: Transport + ?Sized>(&mut self, t: &mut T) -> io::Result<bool> {
		let done = match &self.pending {
			Some(buf) => self.sent >= buf.len(),
			None => true,
		};
		if done {
			if self.pending.take().is_some() {
				trace!("conn {:?}: {} bytes sent", self.id, self.sent);
			}
			self.phase = ConnPhase::Receiving;
			return Ok(true);
		}
		self.send_chunk(t)?;
		Ok(false)
	}

	fn send_chunk<T: Transport + ?Sized>(&mut self, t: &mut T) -> io::Result<()> {
		let (Some(id), Some(buf)) = (self.id, self.pending.as_ref()) else {
			return Ok(());
		};
		let end = buf.len().min(self.sent + self.chunk);
		let n = t.send(id, &buf[self.sent..end])?;
		if n < end - self.sent {
			debug!("conn {}: {} bytes taken out of {}", id, n, end - self.sent);
		}
		self.sent += n;
		Ok(())
	}

	/// Releases the transport handle and the request buffer.
	pub fn close<T: Transport + ?Sized>(self, t: &mut T) {
		if let Some(id) = self.id {
			debug!("closing conn {} to {}:{}", id, self.host, self.port);
			t.close(id);
		}
	}

	pub fn id(&self) -> Option<ConnId> {
		self.id
	}

	pub fn owns(&self, conn: ConnId) -> bool {
		self.id == Some(conn)
	}

	/// Waiting on a lookup of `host`.
	pub fn awaits_resolution(&self, host: &str) -> bool {
		self.phase == ConnPhase::Resolving && self.host == host
	}

}

#[cfg(test)]
pub(crate) mod mock {
	use super::*;

	#[derive(Clone, Copy, Debug, PartialEq, Eq)]
	pub enum Proto {
		Udp,
		Tcp,
	}

	/// Records every call; events are produced by the test itself.
	pub struct MockTransport {
		next_id: ConnId,
		pub opened: Vec<(ConnId, Proto, SocketAddrV4)>,
		pub sends: Vec<(ConnId, Vec<u8>)>,
		pub closed: Vec<ConnId>,
		pub resolves: Vec<String>,
		pub fail_alloc: bool,
		/// bytes accepted per send call
		pub accept: usize,
	}

	impl Default for MockTransport {
		fn default() -> Self {
			Self {
				next_id: 1,
				opened: Vec::new(),
				sends: Vec::new(),
				closed: Vec::new(),
				resolves: Vec::new(),
				fail_alloc: false,
				accept: usize::MAX,
			}
		}
	}

	impl MockTransport {
		/// Every open fails as if out of sockets.
		pub fn failing() -> Self {
			Self { fail_alloc: true, ..Default::default() }
		}

		/// Takes at most `n` bytes per send call.
		pub fn accepting(n: usize) -> Self {
			Self { accept: n, ..Default::default() }
		}

		fn alloc(&mut self, proto: Proto, dest: SocketAddrV4) -> io::Result<ConnId> {
			if self.fail_alloc {
				return Err(io::Error::from(io::ErrorKind::OutOfMemory));
			}
			let id = self.next_id;
			self.next_id += 1;
			self.opened.push((id, proto, dest));
			Ok(id)
		}

		pub fn last_id(&self) -> Option<ConnId> {
			self.opened.last().map(|o| o.0)
		}

		/// Everything sent on `conn`, concatenated.
		pub fn sent_on(&self, conn: ConnId) -> Vec<u8> {
			self.sends.iter().filter(|s| s.0 == conn).flat_map(|s| s.1.iter().copied()).collect()
		}

		pub fn send_count(&self, conn: ConnId) -> usize {
			self.sends.iter().filter(|s| s.0 == conn).count()
		}

		pub fn is_open(&self, conn: ConnId) -> bool {
			self.opened.iter().any(|o| o.0 == conn) && !self.closed.contains(&conn)
		}
	}

	impl Transport for MockTransport {
		fn open_udp(&mut self, dest: SocketAddrV4) -> io::Result<ConnId> {
			self.alloc(Proto::Udp, dest)
		}

		fn open_tcp(&mut self, dest: SocketAddrV4) -> io::Result<ConnId> {
			self.alloc(Proto::Tcp, dest)
		}

		fn resolve(&mut self, host: &str) -> io::Result<()> {
			self.resolves.push(host.to_string());
			Ok(())
		}

		fn send(&mut self, conn: ConnId, buf: &[u8]) -> io::Result<usize> {
			let n = buf.len().min(self.accept);
			self.sends.push((conn, buf[..n].to_vec()));
			Ok(n)
		}

		fn close(&mut self, conn: ConnId) {
			self.closed.push(conn);
		}
	}
}
