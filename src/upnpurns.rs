use std::net::{Ipv4Addr, SocketAddrV4};

pub const SSDP_PORT: u16 = 1900;
pub const SSDP_MCAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_MCAST_DEST: SocketAddrV4 = SocketAddrV4::new(SSDP_MCAST_ADDR, SSDP_PORT);

/* IGD v1, the only generation the control point speaks */
pub const DEVICE_TYPE_IGD: &str = "urn:schemas-upnp-org:device:InternetGatewayDevice:1";
pub const SERVICE_TYPE_WANPPPC: &str = "urn:schemas-upnp-org:service:WANPPPConnection:1";
pub const SERVICE_ID_WANPPPC: &str = "urn:upnp-org:serviceId:WANPPPConn1";

pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_ENCODING_NS: &str = "http://schemas.xmlsoap.org/soap/encoding/";

pub const DEFAULT_USER_AGENT: &str = "igdpunch";
pub const DEFAULT_MAPPING_DESC: &str = "libminiupnpc";

/// Upper bound on bytes handed to the transport in one send call.
pub const DEFAULT_SEND_CHUNK: usize = 1400;
/// Total M-SEARCH transmissions for one scan, the first one included.
pub const DEFAULT_SSDP_MAX_SENDS: u8 = 4;
pub const DEFAULT_SSDP_MX: u8 = 2;
