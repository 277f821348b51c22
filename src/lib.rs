#[macro_use]
pub mod log;

pub mod error;
pub mod options;
pub mod upnpurns;
pub mod warp;

pub mod minissdpc;
pub mod upnpdescparse;
pub mod upnphttp;
pub mod upnpreplyparse;
pub mod upnpsoap;
pub mod upnputils;

pub mod upnpclient;
pub mod upnpcommands;
pub mod upnpconn;
pub mod upnptransport;

pub use error::UpnpError;
pub use upnpclient::{GatewaySession, QueryStatus, UpnpState};
pub use upnpconn::{ConnId, Event, Transport};
pub use upnptransport::SocketTransport;
