//! Human-readable explanations of WebSocket close codes

/// Known close codes. 1010 is only ever sent by clients.
const EXPLANATIONS: &[(u16, &str)] = &[
    (
        1000,
        "Normal closure, meaning that the purpose for which the connection was established has been fulfilled.",
    ),
    (
        1001,
        "An endpoint is \"going away\", such as a server going down or a browser having navigated away from a page.",
    ),
    (1002, "An endpoint is terminating the connection due to a protocol error."),
    (
        1003,
        "An endpoint is terminating the connection because it has received a type of data it cannot accept.",
    ),
    (1004, "Reserved. The specific meaning might be defined in the future."),
    (1005, "No status code was actually present."),
    (
        1006,
        "The connection was closed abnormally, e.g., without sending or receiving a Close control frame.",
    ),
    (
        1007,
        "An endpoint is terminating the connection because it has received data within a message that was not consistent with the type of the message.",
    ),
    (
        1008,
        "An endpoint is terminating the connection because it has received a message that \"violates its policy\".",
    ),
    (
        1009,
        "An endpoint is terminating the connection because it has received a message that is too big for it to process.",
    ),
    (
        1010,
        "The client is terminating the connection because it expected the server to negotiate one or more extensions, but the server didn't.",
    ),
    (
        1011,
        "A server is terminating the connection because it encountered an unexpected condition that prevented it from fulfilling the request.",
    ),
    (
        1015,
        "The connection was closed due to a failure to perform a TLS handshake (e.g., the server certificate can't be verified).",
    ),
];

pub const UNKNOWN: &str = "Unknown reason";

/// Explanation for `code`, or [`UNKNOWN`]
pub fn explain(code: u16) -> &'static str {
    EXPLANATIONS
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, text)| *text)
        .unwrap_or(UNKNOWN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::events::close_code;

    #[test]
    fn test_codes_used_by_the_relay_are_explained() {
        for code in [close_code::NORMAL, close_code::POLICY, close_code::ERROR] {
            assert_ne!(explain(code), UNKNOWN, "code {}", code);
        }
        assert!(explain(1008).contains("violates its policy"));
    }

    #[test]
    fn test_unknown_codes() {
        assert_eq!(explain(1012), UNKNOWN);
        assert_eq!(explain(4000), UNKNOWN);
        assert_eq!(explain(0), UNKNOWN);
    }
}
