use std::fmt;

pub const HTTP_DEFAULT_PORT: u16 = 80;

/// Device description URL split into the parts the requests need.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IgdLocation {
	pub host: String,
	pub port: u16,
	/// Empty when the URL has no path
	pub path: String,
}

impl IgdLocation {
	/// Splits `http://host[:port][/path]`.
	///
	/// Never fails: a missing port gives 80, a missing path gives "".
	pub fn parse(location: &str) -> Self {
		let rest = match location.get(..7) {
			Some(scheme) if scheme.eq_ignore_ascii_case("http://") => &location[7..],
			_ => location,
		};
		let host_end = rest.find([':', '/']).unwrap_or(rest.len());
		let host = &rest[..host_end];
		let rest = &rest[host_end..];

		let (port, path) = match rest.strip_prefix(':') {
			Some(p) => {
				let port_end = p.find('/').unwrap_or(p.len());
				let port = match p[..port_end].parse::<u16>() {
					Ok(port) => port,
					Err(_) => {
						warn!("bad port in location {}, using {}", location, HTTP_DEFAULT_PORT);
						HTTP_DEFAULT_PORT
					}
				};
				(port, &p[port_end..])
			}
			None => (HTTP_DEFAULT_PORT, rest),
		};
		Self { host: host.to_string(), port, path: path.to_string() }
	}

	/// Value for the `Host:` request header.
	pub fn authority(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}
}

impl fmt::Display for IgdLocation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "http://{}:{}{}", self.host, self.port, self.path)
	}
}
