//! SSE wire-frame encoding
//!
//! The subscriber contract is line-based: an `id:` line, one or more `data:`
//! lines, then a blank line. Readers reassemble multi-line payloads by joining
//! consecutive `data:` lines with `\n`.

use crate::event::Event;

/// Encode an event as a complete SSE frame.
///
/// The payload is split on `\n` (a trailing `\r` per line is tolerated for
/// CRLF input) and each line becomes its own `data:` line, so the frame
/// round-trips exactly through the reference parser. Publish validation
/// guarantees the payload is non-empty; the frame therefore always carries at
/// least one non-empty `data:` line before the terminating blank line.
pub fn encode_frame(event: &Event) -> String {
    let mut frame = String::with_capacity(event.id.len() + event.payload.len() + 16);
    frame.push_str("id: ");
    frame.push_str(&event.id);
    frame.push('\n');

    for line in event.payload.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }

    frame.push('\n');
    frame
}

/// Encode an SSE comment frame (`: <text>`).
///
/// Comments are ignored by SSE parsers; the gateway uses them for the initial
/// connection acknowledgement, keep-alive heartbeats, and lag notices.
pub fn comment_frame(text: &str) -> String {
    format!(": {text}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_frame() {
        let event = Event::new("alerts", "evt-1", "hello");
        assert_eq!(encode_frame(&event), "id: evt-1\ndata: hello\n\n");
    }

    #[test]
    fn multi_line_payload_splits_into_data_lines() {
        let event = Event::new("alerts", "evt-1", "line1\nline2");
        assert_eq!(
            encode_frame(&event),
            "id: evt-1\ndata: line1\ndata: line2\n\n"
        );
    }

    #[test]
    fn crlf_payload_is_normalized() {
        let event = Event::new("alerts", "evt-1", "line1\r\nline2");
        assert_eq!(
            encode_frame(&event),
            "id: evt-1\ndata: line1\ndata: line2\n\n"
        );
    }

    #[test]
    fn comment_frame_format() {
        assert_eq!(comment_frame("connected abc"), ": connected abc\n\n");
    }
}
