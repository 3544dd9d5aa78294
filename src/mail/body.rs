use mailparse::ParsedMail;

/// Best-available bodies of a message. Either slot may be empty; both
/// empty means the message has no human-readable content at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyContent {
    pub plain: String,
    pub html: String,
}

impl BodyContent {
    pub fn is_empty(&self) -> bool {
        self.plain.is_empty() && self.html.is_empty()
    }

    fn is_full(&self) -> bool {
        !self.plain.is_empty() && !self.html.is_empty()
    }
}

/// Walk the MIME part tree and pick the plain and html bodies.
///
/// A message without multipart structure is its own single body part and
/// becomes the plain body. For multipart messages the first `plain`
/// subtype wins the plain slot and the first `html` subtype wins the
/// html slot, direct children before nested ones, so a top-level part
/// always beats one found deeper (multipart/alternative inside
/// multipart/mixed, say). Transfer decoding (Base64, quoted-printable)
/// and charset conversion happen per part via mailparse.
pub fn extract_bodies(msg: &ParsedMail) -> BodyContent {
    let mut out = BodyContent::default();
    if msg.subparts.is_empty() {
        out.plain = msg.get_body().unwrap_or_default();
        return out;
    }
    fill_from_parts(&msg.subparts, &mut out);
    out
}

fn fill_from_parts(parts: &[ParsedMail], out: &mut BodyContent) {
    for part in parts {
        if !part.subparts.is_empty() {
            continue;
        }
        match subtype(part) {
            "plain" if out.plain.is_empty() => {
                out.plain = part.get_body().unwrap_or_default();
            }
            "html" if out.html.is_empty() => {
                out.html = part.get_body().unwrap_or_default();
            }
            _ => {}
        }
    }

    // Only descend for slots the current level left empty.
    for part in parts {
        if out.is_full() {
            break;
        }
        if !part.subparts.is_empty() {
            fill_from_parts(&part.subparts, out);
        }
    }
}

fn subtype<'a>(part: &'a ParsedMail<'a>) -> &'a str {
    part.ctype
        .mimetype
        .rsplit_once('/')
        .map(|(_, sub)| sub)
        .unwrap_or(part.ctype.mimetype.as_str())
}

/// Single-line excerpt of `s`, capped at `max_chars`, for the admin
/// fan-out summary.
pub fn excerpt(s: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for line in s.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(line);
        if out.chars().count() >= max_chars {
            break;
        }
    }
    out.chars().take(max_chars).collect()
}
