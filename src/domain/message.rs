use std::fmt;

/// One fetched mailbox message, decoded and ready for correlation.
/// Built per run and discarded after processing; never persisted as-is.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// IMAP UID within the selected folder; only used to flag \Seen.
    pub uid: u32,
    /// Message-ID header value; the dedup key. Empty when the sender's
    /// mail system attached none.
    pub message_id: String,
    pub sender_email: String,
    pub sender_name: String,
    pub subject: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub body_plain: String,
    pub body_html: String,
}

/// Mutually exclusive outcomes of handling one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Reply persisted and fan-out attempted.
    Stored,
    /// A reply with this message id is already on record.
    Duplicate,
    /// Sender is our own outbound address (delivery echo).
    SelfEcho,
    /// Neither a plain nor an html body could be extracted.
    EmptyBody,
    /// No Message-ID header, so idempotence cannot be guaranteed.
    MissingId,
    /// No notification matched the sender, even ignoring the subject.
    Unmatched,
    /// The insert (or an earlier fetch/store round-trip) failed.
    StoreFailed,
}

impl Outcome {
    /// A failed message stays unseen so the next run naturally retries it.
    pub fn flag_seen(self) -> bool {
        !matches!(self, Outcome::StoreFailed)
    }
}

/// Run-level counters; the final summary line is the only external
/// success signal of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Stored => self.processed += 1,
            Outcome::StoreFailed => self.errors += 1,
            _ => self.skipped += 1,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} skipped={} errors={}",
            self.processed, self.skipped, self.errors
        )
    }
}
