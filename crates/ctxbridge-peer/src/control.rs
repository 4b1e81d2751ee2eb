use ctxbridge_envelope::{Envelope, Request, READY_MESSAGE};
use serde::{Deserialize, Serialize};

use crate::error::{PeerError, Result};

/// Protocol name carried in every ready signal.
pub const PROTOCOL_NAME: &str = "ctxbridge";

const MAX_INSTANCE_LEN: usize = 128;
const MAX_VERSION_LEN: usize = 16;

/// Payload of the `channel-ready` sentinel.
///
/// Sent with `ack = false` by an endpoint whose receive path just came up,
/// and answered with `ack = true`. A new `instance` on an already-ready
/// channel means the remote endpoint was restarted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadySignal {
    pub instance: String,
    pub ack: bool,
    pub protocol: String,
    pub version: String,
}

impl ReadySignal {
    pub fn hello(instance: &str, version: &str) -> Self {
        Self {
            instance: instance.to_string(),
            ack: false,
            protocol: PROTOCOL_NAME.to_string(),
            version: version.to_string(),
        }
    }

    pub fn ack(instance: &str, version: &str) -> Self {
        Self {
            ack: true,
            ..Self::hello(instance, version)
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope> {
        Ok(Envelope::request(
            None,
            READY_MESSAGE,
            vec![serde_json::to_value(self)?],
        ))
    }

    pub fn from_request(request: &Request) -> Result<Self> {
        let payload = request.payload.first().cloned().ok_or_else(|| {
            PeerError::HandshakeFailed("ready signal without payload".to_string())
        })?;
        let signal: Self = serde_json::from_value(payload)?;
        if signal.instance.is_empty() || signal.instance.len() > MAX_INSTANCE_LEN {
            return Err(PeerError::HandshakeFailed(format!(
                "invalid instance length: {}",
                signal.instance.len()
            )));
        }
        Ok(signal)
    }

    /// Check the remote signal against the local protocol version.
    pub fn check_compatible(&self, local_version: &str) -> Result<()> {
        if self.protocol != PROTOCOL_NAME {
            return Err(PeerError::HandshakeFailed(format!(
                "unknown protocol '{}' (expected '{}')",
                self.protocol, PROTOCOL_NAME
            )));
        }
        if !is_version_compatible(local_version, &self.version)? {
            return Err(PeerError::HandshakeFailed(format!(
                "incompatible version '{}' (local '{}')",
                self.version, local_version
            )));
        }
        Ok(())
    }
}

/// Random identity for one endpoint incarnation.
pub fn new_instance_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

pub(crate) fn is_version_compatible(local: &str, remote: &str) -> Result<bool> {
    let (local_major, _) = parse_version(local)?;
    let (remote_major, _) = parse_version(remote)?;
    Ok(local_major == remote_major)
}

pub(crate) fn parse_version(version: &str) -> Result<(u16, u16)> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }

    let mut parts = version.split('.');
    let major = parts.next().ok_or_else(|| {
        PeerError::HandshakeFailed(format!("invalid version '{version}': missing major"))
    })?;
    let minor = parts.next().ok_or_else(|| {
        PeerError::HandshakeFailed(format!("invalid version '{version}': missing minor"))
    })?;
    if parts.next().is_some() {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid version '{version}': expected '<major>.<minor>'"
        )));
    }

    let major = major.parse::<u16>().map_err(|_| {
        PeerError::HandshakeFailed(format!("invalid version '{version}': non-numeric major"))
    })?;
    let minor = minor.parse::<u16>().map_err(|_| {
        PeerError::HandshakeFailed(format!("invalid version '{version}': non-numeric minor"))
    })?;
    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn ready_signal_envelope_roundtrip() {
        let signal = ReadySignal::hello("abc123", "1.0");
        let Envelope::Request(request) = signal.to_envelope().unwrap() else {
            panic!("ready signal must be a request");
        };
        assert_eq!(request.name, READY_MESSAGE);
        assert_eq!(request.id, None);
        assert_eq!(
            request.payload,
            vec![json!({"instance": "abc123", "ack": false, "protocol": "ctxbridge", "version": "1.0"})]
        );
        assert_eq!(ReadySignal::from_request(&request).unwrap(), signal);
    }

    #[test]
    fn ack_flips_only_the_flag() {
        let ack = ReadySignal::ack("x", "1.2");
        assert!(ack.ack);
        assert_eq!(ack.instance, "x");
        assert_eq!(ack.version, "1.2");
    }

    #[test]
    fn version_compatibility_follows_major() {
        assert!(is_version_compatible("1.0", "1.7").unwrap());
        assert!(!is_version_compatible("1.0", "2.0").unwrap());
        assert!(ReadySignal::hello("x", "1.3").check_compatible("1.0").is_ok());
        assert!(ReadySignal::hello("x", "2.0").check_compatible("1.0").is_err());
    }

    #[test]
    fn malformed_versions_are_rejected() {
        let long = "9".repeat(20);
        for bad in ["", "1", "1.2.3", "a.b", "1.x", long.as_str()] {
            assert!(parse_version(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn foreign_protocol_is_rejected() {
        let mut signal = ReadySignal::hello("x", "1.0");
        signal.protocol = "other-proto".into();
        assert!(matches!(
            signal.check_compatible("1.0"),
            Err(PeerError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn instance_ids_are_hex_and_distinct() {
        let a = new_instance_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, new_instance_id());
    }

    #[test]
    fn empty_instance_is_rejected() {
        let request = ctxbridge_envelope::Request {
            id: None,
            name: READY_MESSAGE.into(),
            payload: vec![json!({"instance": "", "ack": false, "protocol": "ctxbridge", "version": "1.0"})],
        };
        assert!(ReadySignal::from_request(&request).is_err());
    }
}
