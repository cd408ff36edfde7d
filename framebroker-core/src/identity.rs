//! Human-readable rendering of routing identities.

/// Render a routing identity for logs.
///
/// Printable ASCII identities (what most clients choose) are shown as text.
/// Anything else, including the 5-byte identities generated by a ROUTER,
/// is shown as `0x`-prefixed hex.
pub fn fmt_identity(id: &[u8]) -> String {
    let printable = !id.is_empty() && id.iter().all(|b| b.is_ascii_graphic() || *b == b' ');
    if printable {
        String::from_utf8_lossy(id).into_owned()
    } else {
        format!("0x{}", hex::encode(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_identity_is_shown_verbatim() {
        assert_eq!(fmt_identity(b"CLIENT_A"), "CLIENT_A");
    }

    #[test]
    fn binary_identity_is_hex() {
        assert_eq!(fmt_identity(&[0x00, 0x00, 0x00, 0x00, 0x2a]), "0x000000002a");
        assert_eq!(fmt_identity(&[]), "0x");
    }
}
