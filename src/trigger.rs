use anyhow::{Result, anyhow};
use log::{error, info, warn};
use tiny_http::{Response, Server};

use crate::config::Config;
use crate::mail::imap_session::ImapMailbox;
use crate::pipeline::run_once;
use crate::store::sqlite::SqliteStore;

/// On-demand trigger: one pipeline run per authorized HTTP request.
/// Requests must carry the shared secret as `?key=...`; anything else
/// gets a 403 and no processing happens.
pub fn serve(cfg: &Config, store: &SqliteStore) -> Result<()> {
    let server = Server::http(cfg.trigger_addr.as_str())
        .map_err(|e| anyhow!("Failed to bind trigger listener on {}: {e:?}", cfg.trigger_addr))?;
    info!("trigger listening on http://{}", cfg.trigger_addr);

    for request in server.incoming_requests() {
        if !key_matches(request.url(), &cfg.trigger_secret) {
            warn!("rejected trigger request for {}", request.url());
            let _ = request.respond(Response::from_string("Forbidden").with_status_code(403));
            continue;
        }

        let result = ImapMailbox::open(
            &cfg.imap_host,
            &cfg.imap_user,
            &cfg.imap_password,
            &cfg.folder,
        )
        .and_then(|mut mailbox| run_once(cfg, store, &mut mailbox));

        match result {
            Ok(summary) => {
                info!("triggered run complete: {summary}");
                let _ = request.respond(Response::from_string(format!("{summary}\n")));
            }
            Err(e) => {
                error!("triggered run failed: {e:#}");
                let _ = request.respond(
                    Response::from_string("run failed; see logs\n").with_status_code(500),
                );
            }
        }
    }
    Ok(())
}

/// An empty configured secret rejects every request rather than
/// accepting them all.
fn key_matches(url: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some((_path, query)) = url.split_once('?') else {
        return false;
    };
    query
        .split('&')
        .any(|pair| pair.split_once('=') == Some(("key", secret)))
}
