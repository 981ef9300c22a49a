//! Wire framing shared by every transport.

use std::sync::OnceLock;

/// Content type for channel-establishment responses.
pub const CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

/// Leading guard: if the response is ever consumed as a script tag the
/// browser spins instead of executing injected code.
pub const FRAME_PREFIX: &str = "for(;;);[{";
pub const FRAME_SUFFIX: &str = "}]";

/// Length of the padding block written before the first frame on
/// streaming transports. Browsers and proxies withhold small initial
/// payloads; a few kilobytes defeats those heuristics.
pub const PADDING_LEN: usize = 4096;

/// Wrap a raw message body in the push frame. The message is the body
/// of a JSON object; the wrapper supplies the braces.
pub fn wrap(message: &str) -> String {
    let mut out = String::with_capacity(FRAME_PREFIX.len() + message.len() + FRAME_SUFFIX.len());
    out.push_str(FRAME_PREFIX);
    out.push_str(message);
    out.push_str(FRAME_SUFFIX);
    out
}

/// The fixed padding block for streaming transports.
pub fn streaming_padding() -> &'static str {
    static PADDING: OnceLock<String> = OnceLock::new();
    PADDING.get_or_init(|| "-".repeat(PADDING_LEN))
}

/// Strip the outer braces from a serialized JSON object so it can ride
/// inside [`wrap`].
pub fn object_body(json: &str) -> &str {
    json.strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(json)
}
