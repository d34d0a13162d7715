//! Command and response matching
//!
//! Vendor sentences that are not measurement output are command responses:
//! the device echoes the command header and first argument, or answers with
//! an `NLERR` sentence carrying an error code. The processor keeps the
//! pending commands in send order and resolves each response against the
//! oldest matching entry, delivering it over a bounded channel so the
//! sending thread can block with a timeout while the receive thread never
//! does.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

use crate::core::protocol::ascii::VENDOR_PREFIX;

/// Header of device error sentences.
pub const ERROR_HEADER: &str = "NLERR";

/// A matched command response.
#[derive(Debug, Clone)]
pub struct CommandResponse {
    /// The response sentence body, framing stripped (e.g. `NLWRG,06,...`)
    pub sentence: String,
    /// Whether the device answered with an error sentence
    pub is_error: bool,
    /// Device error code, present when `is_error`
    pub error_code: Option<u8>,
}

struct Pending {
    /// Echo prefix a response must start with (header plus first argument)
    matcher: String,
    sent_at: Instant,
    tx: Sender<CommandResponse>,
}

/// Registry of in-flight commands awaiting responses.
pub struct CommandProcessor {
    pending: Mutex<VecDeque<Pending>>,
    stale_after: Duration,
}

impl CommandProcessor {
    /// Create a processor that forgets commands unanswered for
    /// `stale_after`.
    pub fn new(stale_after: Duration) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            stale_after,
        }
    }

    /// Register a command about to be sent.
    ///
    /// `body` is the sentence body after the vendor prefix, e.g.
    /// `WRG,06,115200`. Returns the channel the matched response will
    /// arrive on.
    pub fn register(&self, body: &str) -> Receiver<CommandResponse> {
        let matcher = format!("{VENDOR_PREFIX}{}", echo_prefix(body));
        let (tx, rx) = bounded(1);

        let mut pending = self.pending.lock();
        Self::prune_stale(&mut pending, self.stale_after);
        pending.push_back(Pending {
            matcher,
            sent_at: Instant::now(),
            tx,
        });
        rx
    }

    /// Match a response sentence against the pending commands.
    ///
    /// `sentence` is a complete wire sentence; framing and checksum are
    /// stripped here. Unmatched responses are dropped with a debug log.
    pub fn match_response(&self, sentence: &str) {
        let body = strip_framing(sentence);
        let header = body.split(',').next().unwrap_or("");

        let mut pending = self.pending.lock();
        Self::prune_stale(&mut pending, self.stale_after);

        if header == ERROR_HEADER {
            // An error sentence answers the oldest in-flight command
            let code = body.split(',').nth(1).and_then(|f| f.parse().ok());
            if let Some(entry) = pending.pop_front() {
                let _ = entry.tx.send(CommandResponse {
                    sentence: body.to_string(),
                    is_error: true,
                    error_code: code,
                });
            } else {
                debug!(sentence = body, "Unsolicited error sentence");
            }
            return;
        }

        let position = pending.iter().position(|p| body.starts_with(&p.matcher));
        match position {
            Some(index) => {
                let entry = pending.remove(index).expect("position is in range");
                let _ = entry.tx.send(CommandResponse {
                    sentence: body.to_string(),
                    is_error: false,
                    error_code: None,
                });
            }
            None => debug!(sentence = body, "Response matched no pending command"),
        }
    }

    /// Number of commands still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn prune_stale(pending: &mut VecDeque<Pending>, stale_after: Duration) {
        pending.retain(|p| p.sent_at.elapsed() < stale_after);
    }
}

/// The echo prefix of a command body: header plus first argument.
fn echo_prefix(body: &str) -> String {
    body.split(',').take(2).collect::<Vec<_>>().join(",")
}

/// Strip `$`, checksum, and line terminator from a wire sentence.
fn strip_framing(sentence: &str) -> &str {
    let body = sentence.strip_prefix('$').unwrap_or(sentence);
    match body.rfind('*') {
        Some(star) => &body[..star],
        None => body.trim_end_matches(['\r', '\n']),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_resolves_command() {
        let processor = CommandProcessor::new(Duration::from_secs(5));
        let rx = processor.register("WRG,06,115200");

        processor.match_response("$NLWRG,06,115200*1A2B\r\n");

        let response = rx.try_recv().unwrap();
        assert!(!response.is_error);
        assert_eq!(response.sentence, "NLWRG,06,115200");
        assert_eq!(processor.pending_count(), 0);
    }

    #[test]
    fn test_error_sentence_resolves_oldest() {
        let processor = CommandProcessor::new(Duration::from_secs(5));
        let rx = processor.register("WRG,06,9600");

        processor.match_response("$NLERR,12*33\r\n");

        let response = rx.try_recv().unwrap();
        assert!(response.is_error);
        assert_eq!(response.error_code, Some(12));
    }

    #[test]
    fn test_unmatched_response_is_dropped() {
        let processor = CommandProcessor::new(Duration::from_secs(5));
        let rx = processor.register("WRG,06,9600");

        processor.match_response("$NLRRG,05*00\r\n");

        assert!(rx.try_recv().is_err());
        assert_eq!(processor.pending_count(), 1);
    }

    #[test]
    fn test_matching_is_order_preserving() {
        let processor = CommandProcessor::new(Duration::from_secs(5));
        let first = processor.register("RRG,05");
        let second = processor.register("RRG,06");

        processor.match_response("$NLRRG,06,42*00\r\n");
        assert!(first.try_recv().is_err());
        assert_eq!(second.try_recv().unwrap().sentence, "NLRRG,06,42");
    }

    #[test]
    fn test_stale_commands_are_pruned() {
        let processor = CommandProcessor::new(Duration::from_millis(0));
        let rx = processor.register("RRG,05");

        processor.match_response("$NLRRG,05,1*00\r\n");
        assert!(rx.try_recv().is_err());
    }
}
