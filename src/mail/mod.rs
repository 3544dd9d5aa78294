pub mod body;
pub mod headers;
pub mod imap_session;

use anyhow::Result;

/// Seam over the mailbox session so the run driver can be exercised
/// without a live IMAP server.
pub trait Mailbox {
    /// Unseen UIDs, newest first, truncated to `limit`.
    fn list_unseen(&mut self, limit: usize) -> Result<Vec<u32>>;

    /// Full raw RFC 822 bytes of one message. Must not set \Seen;
    /// only an explicit `mark_seen` records progress.
    fn fetch(&mut self, uid: u32) -> Result<Vec<u8>>;

    /// Flag the message \Seen so future unseen listings exclude it.
    fn mark_seen(&mut self, uid: u32) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Parse raw message bytes into mailparse's part tree.
pub fn parse(raw: &[u8]) -> Result<mailparse::ParsedMail<'_>> {
    Ok(mailparse::parse_mail(raw)?)
}
