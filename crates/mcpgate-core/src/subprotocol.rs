//! Subprotocol selection for inbound upgrades.
//!
//! Clients list the subprotocols they speak in one or more
//! `Sec-WebSocket-Protocol` header values, each a comma-separated list.
//! The gateway picks one per connection and asks the upstream for the same.
//!
//! Policy:
//! 1. an offered value equal to `"mcp"` (ignoring ASCII case) wins;
//! 2. otherwise the first non-empty offered value;
//! 3. otherwise [`DEFAULT_SUBPROTOCOL`].
//!
//! The returned value is the token exactly as the client offered it, so it
//! can be echoed back in the handshake response.

use crate::constants::DEFAULT_SUBPROTOCOL;

/// Split raw header values into the trimmed, non-empty offered tokens,
/// preserving order.
pub fn offered_subprotocols<'a, I>(header_values: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    header_values
        .into_iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .collect()
}

/// Choose the subprotocol for one connection from the client's offers.
pub fn select_subprotocol<'a, I>(header_values: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let offered = offered_subprotocols(header_values);
    offered
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(DEFAULT_SUBPROTOCOL))
        .or_else(|| offered.first())
        .map_or_else(|| DEFAULT_SUBPROTOCOL.to_owned(), |s| (*s).to_owned())
}

/// Fall back to [`DEFAULT_SUBPROTOCOL`] when `negotiated` is blank.
pub fn or_default(negotiated: &str) -> &str {
    let trimmed = negotiated.trim();
    if trimmed.is_empty() {
        DEFAULT_SUBPROTOCOL
    } else {
        trimmed
    }
}
