use anyhow::{Context, Result, anyhow};
use native_tls::TlsConnector;

use crate::mail::Mailbox;

const IMAPS_PORT: u16 = 993;

/// Authenticated IMAP session over implicit TLS, held for one run.
pub struct ImapMailbox {
    session: imap::Session<native_tls::TlsStream<std::net::TcpStream>>,
}

impl ImapMailbox {
    /// Connect, authenticate, and select `folder`.
    ///
    /// Plain LOGIN only: the deployment has no interactive SASL support,
    /// so no AUTHENTICATE mechanism (XOAUTH2, GSSAPI) is ever attempted.
    pub fn open(host: &str, user: &str, password: &str, folder: &str) -> Result<Self> {
        let tls = TlsConnector::builder().build()?;
        let client = imap::connect((host, IMAPS_PORT), host, &tls)
            .with_context(|| format!("connecting to {host}:{IMAPS_PORT}"))?;

        let mut session = client
            .login(user, password)
            .map_err(|(e, _client)| anyhow!("IMAP login failed for {user}: {e}"))?;

        session
            .select(folder)
            .with_context(|| format!("selecting folder {folder}"))?;

        Ok(Self { session })
    }
}

impl Mailbox for ImapMailbox {
    fn list_unseen(&mut self, limit: usize) -> Result<Vec<u32>> {
        let mut uids: Vec<u32> = self
            .session
            .uid_search("UNSEEN")
            .context("searching unseen messages")?
            .into_iter()
            .collect();

        // Newest first; the batch ceiling bounds a single run's work.
        uids.sort_unstable_by(|a, b| b.cmp(a));
        uids.truncate(limit);
        Ok(uids)
    }

    fn fetch(&mut self, uid: u32) -> Result<Vec<u8>> {
        // BODY.PEEK so fetching alone never flags the message seen.
        let fetches = self
            .session
            .uid_fetch(uid.to_string(), "(UID BODY.PEEK[])")?;

        let raw = fetches
            .iter()
            .next()
            .and_then(|f| f.body())
            .ok_or_else(|| anyhow!("UID {uid}: server returned no body"))?;

        Ok(raw.to_vec())
    }

    fn mark_seen(&mut self, uid: u32) -> Result<()> {
        self.session
            .uid_store(uid.to_string(), "+FLAGS (\\Seen)")?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.session.logout()?;
        Ok(())
    }
}
