use crate::upnpclient::UpnpState;
use std::io;
use thiserror::Error;

/// Failures surfaced by the control point.
///
/// None of these abort the process. Synchronous ones come back from the
/// request that caused them; ones that arrive through transport events are
/// kept by the session until the caller takes them.
#[derive(Debug, Error)]
pub enum UpnpError {
	/// Request arrived while the session could not accept it
	#[error("session busy in state {0:?}")]
	Busy(UpnpState),

	/// Socket or buffer allocation failed
	#[error("resource exhausted: {0}")]
	ResourceExhausted(#[source] io::Error),

	/// Name lookup returned no usable address
	#[error("cannot resolve gateway host {0}")]
	ResolutionFailed(String),

	/// Connect, send or receive error reported by the transport
	#[error("transport failure: {0}")]
	TransportFailed(io::ErrorKind),

	/// Event that the current state does not expect
	#[error("unexpected {event} in state {state:?}")]
	ProtocolMismatch { state: UpnpState, event: &'static str },

	/// Marker absent from a gateway response
	#[error("{0} not found in gateway response")]
	FieldNotFound(&'static str),

	/// `<errorCode>` from a gateway SOAP fault
	#[error("gateway returned UPnP error {0}")]
	SoapFault(String),

	#[error("invalid value \"{value}\" for option {key}")]
	InvalidOption { key: String, value: String },

	#[error("invalid command: {0}")]
	InvalidCommand(String),
}

impl UpnpError {
	pub fn is_busy(&self) -> bool {
		matches!(self, UpnpError::Busy(_))
	}
}

impl From<io::Error> for UpnpError {
	fn from(e: io::Error) -> Self {
		UpnpError::TransportFailed(e.kind())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_display() {
		let e = UpnpError::Busy(UpnpState::Discovering);
		assert_eq!(e.to_string(), "session busy in state Discovering");
		let e = UpnpError::FieldNotFound("NewExternalIPAddress");
		assert_eq!(e.to_string(), "NewExternalIPAddress not found in gateway response");
		assert!(UpnpError::Busy(UpnpState::Adding).is_busy());
		assert!(!UpnpError::ResolutionFailed("gw".into()).is_busy());
	}

	#[test]
	fn test_from_io() {
		let e: UpnpError = io::Error::from(io::ErrorKind::ConnectionRefused).into();
		assert!(matches!(e, UpnpError::TransportFailed(io::ErrorKind::ConnectionRefused)));
	}
}
