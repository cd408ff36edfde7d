use crate::codec::{Result, ZmtpError};

/// ZMTP Greeting is always exactly 64 bytes
pub const GREETING_SIZE: usize = 64;

const SIGNATURE_HEAD: u8 = 0xFF;
const SIGNATURE_TAIL: u8 = 0x7F;
const VERSION_MAJOR: u8 = 3;
const VERSION_MINOR: u8 = 0;

/// Security mechanisms named in a greeting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mechanism {
    Null,
    Plain,
    Curve,
    Unknown(String),
}

impl Mechanism {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Null => "NULL",
            Self::Plain => "PLAIN",
            Self::Curve => "CURVE",
            Self::Unknown(name) => name,
        }
    }
}

/// Parsed greeting information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZmtpGreeting {
    pub major: u8,
    pub minor: u8,
    pub mechanism: Mechanism,
    pub as_server: bool,
}

impl ZmtpGreeting {
    /// Parse a 64-byte ZMTP greeting
    ///
    /// Layout (ZMTP 3.x):
    /// ```text
    /// [0]      0xFF
    /// [1..9]   Padding
    /// [9]      0x7F
    /// [10]     Major version
    /// [11]     Minor version
    /// [12..32] Mechanism (ASCII, null-padded)
    /// [32]     As-Server flag
    /// [33..64] Padding
    /// ```
    ///
    /// Any 3.x minor version is accepted.
    pub fn parse(src: &[u8]) -> Result<Self> {
        if src.len() < GREETING_SIZE {
            return Err(ZmtpError::Incomplete);
        }

        if src[0] != SIGNATURE_HEAD || src[9] != SIGNATURE_TAIL {
            return Err(ZmtpError::Protocol("bad greeting signature"));
        }

        let major = src[10];
        if major < VERSION_MAJOR {
            return Err(ZmtpError::Protocol("peer speaks ZMTP < 3.0"));
        }

        let mechanism = std::str::from_utf8(&src[12..32])
            .map_err(|_| ZmtpError::Protocol("mechanism is not ASCII"))?
            .trim_end_matches(char::from(0));
        let mechanism = match mechanism {
            "NULL" => Mechanism::Null,
            "PLAIN" => Mechanism::Plain,
            "CURVE" => Mechanism::Curve,
            other => Mechanism::Unknown(other.to_string()),
        };

        Ok(Self {
            major,
            minor: src[11],
            mechanism,
            as_server: (src[32] & 0x01) != 0,
        })
    }

    /// Fail unless the peer offered the NULL mechanism.
    pub fn require_null(&self) -> Result<()> {
        match self.mechanism {
            Mechanism::Null => Ok(()),
            ref other => Err(ZmtpError::UnsupportedMechanism(other.as_str().to_string())),
        }
    }
}

/// Build a ZMTP 3.0 NULL-mechanism greeting.
///
/// With NULL the as-server flag carries no meaning and is always 0.
pub fn build_greeting() -> [u8; GREETING_SIZE] {
    let mut g = [0u8; GREETING_SIZE];
    g[0] = SIGNATURE_HEAD;
    g[9] = SIGNATURE_TAIL;
    g[10] = VERSION_MAJOR;
    g[11] = VERSION_MINOR;
    g[12..16].copy_from_slice(b"NULL");
    g
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_mechanism(name: &[u8]) -> [u8; GREETING_SIZE] {
        let mut g = build_greeting();
        g[12..32].fill(0);
        g[12..12 + name.len()].copy_from_slice(name);
        g
    }

    #[test]
    fn own_greeting_parses_as_null_3_0() {
        let g = ZmtpGreeting::parse(&build_greeting()).unwrap();
        assert_eq!((g.major, g.minor), (3, 0));
        assert_eq!(g.mechanism, Mechanism::Null);
        assert!(!g.as_server);
        g.require_null().unwrap();
    }

    #[test]
    fn accepts_newer_minor_version() {
        let mut raw = build_greeting();
        raw[11] = 1;
        assert_eq!(ZmtpGreeting::parse(&raw).unwrap().minor, 1);
    }

    #[test]
    fn rejects_zmtp_2() {
        let mut raw = build_greeting();
        raw[10] = 2;
        assert!(matches!(
            ZmtpGreeting::parse(&raw),
            Err(ZmtpError::Protocol(_))
        ));
    }

    #[test]
    fn rejects_bad_signature_and_short_input() {
        let mut raw = build_greeting();
        raw[9] = 0;
        assert!(ZmtpGreeting::parse(&raw).is_err());
        assert!(matches!(
            ZmtpGreeting::parse(&raw[..10]),
            Err(ZmtpError::Incomplete)
        ));
    }

    #[test]
    fn curve_is_unsupported() {
        let g = ZmtpGreeting::parse(&with_mechanism(b"CURVE")).unwrap();
        assert_eq!(g.mechanism, Mechanism::Curve);
        assert!(matches!(
            g.require_null(),
            Err(ZmtpError::UnsupportedMechanism(name)) if name == "CURVE"
        ));
    }
}
