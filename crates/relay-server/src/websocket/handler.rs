//! Inbound frame decoding.

use metrics::counter;
use relay_core::InboundEvent;
use relay_core::protocol::decode_frame;
use tracing::{debug, warn};

use crate::metrics::RELAY_MALFORMED_FRAMES_TOTAL;

/// Decode one inbound text frame.
///
/// Malformed frames are logged, counted and dropped; the caller keeps the
/// connection open and sends nothing back.
pub fn handle_frame(text: &str) -> Option<InboundEvent> {
    match decode_frame(text) {
        Ok(event) => {
            debug!(event = event.name(), "frame decoded");
            Some(event)
        }
        Err(e) => {
            warn!(error = %e, len = text.len(), "malformed frame discarded");
            counter!(RELAY_MALFORMED_FRAMES_TOTAL).increment(1);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use relay_core::logging::capture_logs;
    use tracing::Level;

    #[test]
    fn valid_register_frame() {
        let event = handle_frame(r#"{"event":"register","data":"alice"}"#);
        assert_matches!(event, Some(InboundEvent::Register(ref u)) if u.as_str() == "alice");
    }

    #[test]
    fn valid_send_message_frame() {
        let event = handle_frame(
            r#"{"event":"send_message","data":{"from":"bob","to":"alice","message":"hi"}}"#,
        );
        assert_matches!(event, Some(InboundEvent::SendMessage(ref m)) if m.message == "hi");
    }

    #[test]
    fn invalid_json_is_dropped_with_warning() {
        let (logs, _guard) = capture_logs();
        assert!(handle_frame("{not json").is_none());
        assert!(logs.has_event(Level::WARN, "malformed frame discarded"));
    }

    #[test]
    fn unknown_event_is_dropped() {
        let (logs, _guard) = capture_logs();
        assert!(handle_frame(r#"{"event":"typing","data":{}}"#).is_none());
        assert_eq!(logs.count_at_level(Level::WARN), 1);
    }

    #[test]
    fn missing_fields_are_dropped() {
        assert!(handle_frame(r#"{"event":"send_message","data":{"from":"bob"}}"#).is_none());
        assert!(handle_frame(r#"{"event":"register","data":""}"#).is_none());
    }
}
