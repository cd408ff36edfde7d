/// ZeroMQ socket types as announced in the READY `Socket-Type` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
    Pair,
    Dealer,
    Router,
    Pub,
    Sub,
    Req,
    Rep,
    Push,
    Pull,
}

impl SocketType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pair => "PAIR",
            Self::Dealer => "DEALER",
            Self::Router => "ROUTER",
            Self::Pub => "PUB",
            Self::Sub => "SUB",
            Self::Req => "REQ",
            Self::Rep => "REP",
            Self::Push => "PUSH",
            Self::Pull => "PULL",
        }
    }

    /// Parse the wire name. Names are case sensitive.
    pub fn from_bytes(name: &[u8]) -> Option<Self> {
        Some(match name {
            b"PAIR" => Self::Pair,
            b"DEALER" => Self::Dealer,
            b"ROUTER" => Self::Router,
            b"PUB" => Self::Pub,
            b"SUB" => Self::Sub,
            b"REQ" => Self::Req,
            b"REP" => Self::Rep,
            b"PUSH" => Self::Push,
            b"PULL" => Self::Pull,
            _ => return None,
        })
    }

    /// Valid socket combinations (ZMTP 3.0, section "Socket Semantics").
    #[must_use]
    pub const fn is_compatible(&self, peer: Self) -> bool {
        matches!(
            (*self, peer),
            (Self::Pair, Self::Pair)
                | (Self::Dealer, Self::Dealer | Self::Rep | Self::Router)
                | (Self::Router, Self::Dealer | Self::Req | Self::Router)
                | (Self::Req, Self::Rep | Self::Router)
                | (Self::Rep, Self::Req | Self::Dealer)
                | (Self::Pub, Self::Sub)
                | (Self::Sub, Self::Pub)
                | (Self::Push, Self::Pull)
                | (Self::Pull, Self::Push)
        )
    }
}

impl std::fmt::Display for SocketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for ty in [SocketType::Dealer, SocketType::Router, SocketType::Req] {
            assert_eq!(SocketType::from_bytes(ty.as_str().as_bytes()), Some(ty));
        }
        assert_eq!(SocketType::from_bytes(b"dealer"), None);
    }

    #[test]
    fn router_accepts_request_side_peers_only() {
        let router = SocketType::Router;
        assert!(router.is_compatible(SocketType::Dealer));
        assert!(router.is_compatible(SocketType::Req));
        assert!(router.is_compatible(SocketType::Router));
        assert!(!router.is_compatible(SocketType::Rep));
        assert!(!router.is_compatible(SocketType::Pub));
    }
}
