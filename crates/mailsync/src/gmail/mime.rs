//! MIME decoding of full Gmail messages
//!
//! The provider's loosely shaped `parts` tree is converted once into
//! [`Part`] and body selection works on that. Decoding never fails: missing
//! headers become empty strings, a body that is not base64 becomes an empty
//! body plus a [`DecodeWarning`], and non-UTF-8 text is kept lossily with a
//! warning.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use super::api::{GmailMessage, Header, MessagePart};
use crate::models::{EmailAddress, MessageId, ThreadId};

/// Body tree of a message
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    /// Leaf with a lower-cased MIME type (parameters stripped) and its
    /// URL-safe base64 data
    Single {
        mime_type: String,
        data: Option<String>,
    },
    /// Container such as `multipart/alternative`; `subtype` is the part
    /// after the slash
    Multipart { subtype: String, children: Vec<Part> },
}

impl Part {
    pub fn from_api(part: &MessagePart) -> Self {
        let mime_type = part
            .mime_type
            .as_deref()
            .map(normalize_mime)
            .unwrap_or_default();
        let children = part.parts.as_deref().unwrap_or_default();

        if let Some(subtype) = mime_type.strip_prefix("multipart/") {
            return Part::Multipart {
                subtype: subtype.to_string(),
                children: children.iter().map(Part::from_api).collect(),
            };
        }
        if !children.is_empty() {
            return Part::Multipart {
                subtype: "mixed".to_string(),
                children: children.iter().map(Part::from_api).collect(),
            };
        }

        Part::Single {
            mime_type,
            data: part.body.as_ref().and_then(|b| b.data.clone()),
        }
    }

    /// Depth-first search for the first `multipart/alternative` below `self`
    fn find_alternative(&self) -> Option<&[Part]> {
        let Part::Multipart { children, .. } = self else {
            return None;
        };
        for child in children {
            if let Part::Multipart { subtype, children: grand } = child {
                if subtype == "alternative" {
                    return Some(grand);
                }
                if let Some(found) = child.find_alternative() {
                    return Some(found);
                }
            }
        }
        None
    }
}

/// Problem found while decoding a message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecodeWarning {
    /// Body data was not valid base64
    MalformedBase64 { mime_type: String },
    /// Body bytes were not valid UTF-8; the text was kept with replacement characters
    InvalidUtf8 { mime_type: String },
}

/// Fields extracted from a full message
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub remote_id: MessageId,
    pub thread_id: ThreadId,
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub subject: String,
    pub body: String,
    pub label_ids: Vec<String>,
    pub received_at: DateTime<Utc>,
    pub warnings: Vec<DecodeWarning>,
}

/// Normalize a full provider message
pub fn decode_message(msg: &GmailMessage) -> DecodedMessage {
    let headers = msg
        .payload
        .as_ref()
        .and_then(|p| p.headers.as_deref())
        .unwrap_or_default();

    let mut warnings = Vec::new();
    let body = match msg.payload.as_ref() {
        Some(payload) => select_body(&Part::from_api(payload), &mut warnings),
        None => String::new(),
    };

    DecodedMessage {
        remote_id: MessageId::new(&msg.id),
        thread_id: ThreadId::new(&msg.thread_id),
        from: EmailAddress::parse(header(headers, "From")),
        to: EmailAddress::parse_list(header(headers, "To")),
        subject: header(headers, "Subject").to_string(),
        body,
        label_ids: msg.label_ids.clone().unwrap_or_default(),
        received_at: received_at(msg, header(headers, "Date")),
        warnings,
    }
}

/// Case-insensitive header lookup; missing headers are empty
pub fn header<'a>(headers: &'a [Header], name: &str) -> &'a str {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
        .unwrap_or("")
}

/// Pick the body text
///
/// Order: a non-multipart body; html then plain inside a nested
/// `multipart/alternative`; html then plain among the top-level children;
/// otherwise empty.
pub fn select_body(root: &Part, warnings: &mut Vec<DecodeWarning>) -> String {
    let chosen = match root {
        Part::Single { mime_type, data } => data.as_deref().map(|d| (mime_type.as_str(), d)),
        Part::Multipart { children, .. } => root
            .find_alternative()
            .and_then(preferred_text)
            .or_else(|| preferred_text(children)),
    };

    let Some((mime_type, data)) = chosen else {
        return String::new();
    };

    match decode_body_data(data) {
        Ok(body) => {
            if body.lossy {
                let warning = DecodeWarning::InvalidUtf8 {
                    mime_type: mime_type.to_string(),
                };
                log::debug!("Body decoded lossily: {:?}", warning);
                warnings.push(warning);
            }
            body.text
        }
        Err(MalformedBase64) => {
            let warning = DecodeWarning::MalformedBase64 {
                mime_type: mime_type.to_string(),
            };
            log::debug!("Body decode failed: {:?}", warning);
            warnings.push(warning);
            String::new()
        }
    }
}

/// First `text/html` leaf with data, else first `text/plain` leaf with data
fn preferred_text(parts: &[Part]) -> Option<(&str, &str)> {
    find_leaf(parts, "text/html").or_else(|| find_leaf(parts, "text/plain"))
}

fn find_leaf<'a>(parts: &'a [Part], wanted: &str) -> Option<(&'a str, &'a str)> {
    parts.iter().find_map(|p| match p {
        Part::Single {
            mime_type,
            data: Some(data),
        } if mime_type.as_str() == wanted => Some((mime_type.as_str(), data.as_str())),
        _ => None,
    })
}

/// Body data that is not valid base64
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedBase64;

/// Decoded body text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyText {
    pub text: String,
    /// Invalid UTF-8 sequences were replaced with U+FFFD
    pub lossy: bool,
}

/// Decode URL-safe base64 body data to text
///
/// The alphabet is translated back to standard base64 first; padding is
/// optional since the provider omits it on some payloads. Bytes that are
/// not UTF-8 (legacy charsets) keep their readable parts.
pub fn decode_body_data(data: &str) -> Result<BodyText, MalformedBase64> {
    let standard: String = data
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && *c != '=')
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    let bytes = STANDARD_NO_PAD
        .decode(standard.as_bytes())
        .map_err(|_| MalformedBase64)?;

    Ok(match String::from_utf8(bytes) {
        Ok(text) => BodyText { text, lossy: false },
        Err(e) => BodyText {
            text: String::from_utf8_lossy(e.as_bytes()).into_owned(),
            lossy: true,
        },
    })
}

/// `text/HTML; charset=UTF-8` -> `text/html`
fn normalize_mime(raw: &str) -> String {
    raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

/// Provider internal date, then the Date header, then now
fn received_at(msg: &GmailMessage, date_header: &str) -> DateTime<Utc> {
    if let Some(millis) = msg.internal_date.as_deref().and_then(|d| d.parse::<i64>().ok())
        && let Some(ts) = Utc.timestamp_millis_opt(millis).single()
    {
        return ts;
    }
    DateTime::parse_from_rfc2822(date_header.trim())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::api::MessageBody;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn encode(text: &str) -> String {
        URL_SAFE_NO_PAD.encode(text)
    }

    fn leaf(mime: &str, text: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime.to_string()),
            body: Some(MessageBody {
                data: Some(encode(text)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn multipart(mime: &str, parts: Vec<MessagePart>) -> MessagePart {
        MessagePart {
            mime_type: Some(mime.to_string()),
            parts: Some(parts),
            ..Default::default()
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> Vec<Header> {
        pairs
            .iter()
            .map(|(n, v)| Header {
                name: n.to_string(),
                value: v.to_string(),
            })
            .collect()
    }

    fn body_of(payload: &MessagePart) -> (String, Vec<DecodeWarning>) {
        let mut warnings = Vec::new();
        let body = select_body(&Part::from_api(payload), &mut warnings);
        (body, warnings)
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let hs = headers(&[("FROM", "a@example.com"), ("subject", "Hi")]);
        assert_eq!(header(&hs, "From"), "a@example.com");
        assert_eq!(header(&hs, "Subject"), "Hi");
        assert_eq!(header(&hs, "Cc"), "");
    }

    #[test]
    fn test_single_body_any_mime() {
        let (body, warnings) = body_of(&leaf("text/plain", "plain body"));
        assert_eq!(body, "plain body");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_nested_alternative_prefers_html() {
        let payload = multipart(
            "multipart/mixed",
            vec![
                multipart(
                    "multipart/alternative",
                    vec![leaf("text/plain", "plain"), leaf("text/html", "<p>html</p>")],
                ),
                leaf("application/pdf", "%PDF"),
            ],
        );
        assert_eq!(body_of(&payload).0, "<p>html</p>");
    }

    #[test]
    fn test_alternative_falls_back_to_plain() {
        let payload = multipart(
            "multipart/mixed",
            vec![multipart("multipart/alternative", vec![leaf("text/plain", "only plain")])],
        );
        assert_eq!(body_of(&payload).0, "only plain");
    }

    #[test]
    fn test_top_level_alternative_with_plain_only() {
        let payload = multipart("multipart/alternative", vec![leaf("text/plain", "hello")]);
        assert_eq!(body_of(&payload).0, "hello");
    }

    #[test]
    fn test_top_level_preference_without_nested_alternative() {
        let payload = multipart(
            "multipart/mixed",
            vec![leaf("text/plain", "plain"), leaf("text/html; charset=UTF-8", "<b>html</b>")],
        );
        assert_eq!(body_of(&payload).0, "<b>html</b>");
    }

    #[test]
    fn test_no_text_part_gives_empty_body() {
        let payload = multipart("multipart/mixed", vec![leaf("image/png", "png")]);
        let (body, warnings) = body_of(&payload);
        assert_eq!(body, "");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_malformed_base64_is_a_warning() {
        let payload = MessagePart {
            mime_type: Some("text/plain".to_string()),
            body: Some(MessageBody {
                data: Some("!!!not base64!!!".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let (body, warnings) = body_of(&payload);
        assert_eq!(body, "");
        assert_eq!(
            warnings,
            vec![DecodeWarning::MalformedBase64 {
                mime_type: "text/plain".to_string()
            }]
        );
    }

    #[test]
    fn test_invalid_utf8_is_a_warning() {
        // Latin-1 "Café order ready"
        let payload = MessagePart {
            mime_type: Some("text/plain".to_string()),
            body: Some(MessageBody {
                data: Some(URL_SAFE_NO_PAD.encode(b"Caf\xe9 order ready")),
                ..Default::default()
            }),
            ..Default::default()
        };
        let (body, warnings) = body_of(&payload);
        assert_eq!(body, "Caf\u{fffd} order ready");
        assert_eq!(
            warnings,
            vec![DecodeWarning::InvalidUtf8 {
                mime_type: "text/plain".to_string()
            }]
        );
    }

    #[test]
    fn test_decode_url_safe_alphabet() {
        // "subjects?>" encodes to "c3ViamVjdHM_Pg" in the URL-safe alphabet
        let encoded = URL_SAFE_NO_PAD.encode("subjects?>");
        assert!(encoded.contains('_'));
        assert_eq!(decode_body_data(&encoded).unwrap().text, "subjects?>");
        let padded = decode_body_data("SGVsbG8sIFdvcmxkIQ==").unwrap();
        assert_eq!(padded.text, "Hello, World!");
        assert!(!padded.lossy);
        assert_eq!(decode_body_data("@@@"), Err(MalformedBase64));
    }

    #[test]
    fn test_decode_message_fields() {
        let mut payload = multipart("multipart/alternative", vec![leaf("text/plain", "hi there")]);
        payload.headers = Some(headers(&[
            ("From", "Customer Person <Customer@Example.com>"),
            ("to", "Me <me@example.com>"),
            ("Subject", "Quote request"),
        ]));
        let msg = GmailMessage {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            label_ids: Some(vec!["INBOX".to_string()]),
            internal_date: Some("1700000000000".to_string()),
            payload: Some(payload),
            ..Default::default()
        };

        let decoded = decode_message(&msg);
        assert_eq!(decoded.remote_id, MessageId::new("m1"));
        assert_eq!(decoded.from.email, "customer@example.com");
        assert_eq!(decoded.from.name.as_deref(), Some("Customer Person"));
        assert_eq!(decoded.to[0].email, "me@example.com");
        assert_eq!(decoded.subject, "Quote request");
        assert_eq!(decoded.body, "hi there");
        assert_eq!(decoded.label_ids, vec!["INBOX"]);
        assert_eq!(decoded.received_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_decode_message_without_payload() {
        let msg = GmailMessage {
            id: "m2".to_string(),
            ..Default::default()
        };
        let decoded = decode_message(&msg);
        assert_eq!(decoded.subject, "");
        assert_eq!(decoded.body, "");
        assert!(decoded.from.is_empty());
        assert!(decoded.to.is_empty());
    }

    #[test]
    fn test_date_header_fallback() {
        let mut payload = leaf("text/plain", "x");
        payload.headers = Some(headers(&[("Date", "Tue, 14 Nov 2023 22:13:20 +0000")]));
        let msg = GmailMessage {
            id: "m3".to_string(),
            payload: Some(payload),
            ..Default::default()
        };
        assert_eq!(decode_message(&msg).received_at.timestamp(), 1_700_000_000);
    }
}
