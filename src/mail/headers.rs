use mailparse::{MailHeaderMap, ParsedMail};

/// Decoded header fields the pipeline works with. The From address is
/// taken verbatim; display name and subject are RFC 2047 decoded.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub message_id: String,
    pub sender_email: String,
    pub sender_name: String,
    pub subject: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
}

pub fn envelope(parsed: &ParsedMail, raw: &[u8]) -> Envelope {
    let (sender_name, sender_email) = sender(parsed);
    Envelope {
        message_id: message_id(raw).unwrap_or_default(),
        sender_email,
        sender_name,
        subject: raw_header(raw, "Subject")
            .map(|v| decode_header_field(v.as_bytes()))
            .unwrap_or_default(),
        in_reply_to: in_reply_to(raw),
        references: references(raw),
    }
}

/// Decode a raw header value that may contain RFC 2047 encoded-words,
/// each segment with its own charset and Base64/quoted-printable
/// encoding. mailparse expects a complete `Key: value` line, so one is
/// synthesized around the value.
pub fn decode_header_field(raw: &[u8]) -> String {
    let mut line = b"X: ".to_vec();
    line.extend_from_slice(raw);
    line.extend_from_slice(b"\r\n");

    match mailparse::parse_header(&line) {
        Ok((h, _idx)) => h.get_value().trim().to_string(),
        Err(_) => String::from_utf8_lossy(raw).trim().to_string(),
    }
}

/// Unfolded value of `name` from the raw header block, or None.
///
/// Deliberate fallback over raw text: some servers omit Message-ID,
/// In-Reply-To and References from the structured header set, so the
/// wire bytes stay the source of truth for those fields.
pub fn raw_header(raw: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let head = text
        .split("\r\n\r\n")
        .next()
        .and_then(|h| h.split("\n\n").next())
        .unwrap_or(&text);

    let mut value: Option<String> = None;
    for line in head.lines() {
        if let Some(v) = &mut value {
            // Continuation lines fold into the value.
            if line.starts_with(' ') || line.starts_with('\t') {
                v.push(' ');
                v.push_str(line.trim());
                continue;
            }
            break;
        }
        if line.len() > name.len()
            && line.as_bytes()[name.len()] == b':'
            && line[..name.len()].eq_ignore_ascii_case(name)
        {
            value = Some(line[name.len() + 1..].trim().to_string());
        }
    }
    value.filter(|v| !v.is_empty())
}

/// Unique message identifier as attached by the originating mail
/// system, angle brackets included. Used purely as the dedup key.
pub fn message_id(raw: &[u8]) -> Option<String> {
    let v = raw_header(raw, "Message-ID")?;
    Some(first_angle_token(&v).unwrap_or(v))
}

pub fn in_reply_to(raw: &[u8]) -> Option<String> {
    let v = raw_header(raw, "In-Reply-To")?;
    Some(first_angle_token(&v).unwrap_or(v))
}

pub fn references(raw: &[u8]) -> Vec<String> {
    match raw_header(raw, "References") {
        Some(v) => {
            let tokens = angle_tokens(&v);
            if tokens.is_empty() {
                v.split_whitespace().map(str::to_string).collect()
            } else {
                tokens
            }
        }
        None => Vec::new(),
    }
}

fn angle_tokens(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = value;
    while let Some(start) = rest.find('<') {
        let Some(len) = rest[start..].find('>') else {
            break;
        };
        out.push(rest[start..start + len + 1].to_string());
        rest = &rest[start + len + 1..];
    }
    out
}

fn first_angle_token(value: &str) -> Option<String> {
    angle_tokens(value).into_iter().next()
}

/// (display name, address) of the first From mailbox. The address part
/// is never MIME-decoded; the name is.
fn sender(parsed: &ParsedMail) -> (String, String) {
    if let Some(h) = parsed.headers.get_first_header("From")
        && let Ok(list) = mailparse::addrparse_header(h)
    {
        for addr in list.iter() {
            if let mailparse::MailAddr::Single(info) = addr {
                return (
                    info.display_name.clone().unwrap_or_default(),
                    info.addr.clone(),
                );
            }
        }
    }

    // Angle-bracket fallback for producers addrparse rejects.
    let value = parsed.headers.get_first_value("From").unwrap_or_default();
    split_from(&value)
}

fn split_from(value: &str) -> (String, String) {
    if let Some(start) = value.find('<')
        && let Some(end) = value.find('>')
        && end > start
    {
        let name = value[..start].trim().trim_matches('"').to_string();
        let addr = value[start + 1..end].trim().to_string();
        return (name, addr);
    }
    (String::new(), value.trim().to_string())
}
