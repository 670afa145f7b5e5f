//! Text frames: `["event",args,"id"]`
//!
//! Decoding never parses the payload. The event name ends at the first comma
//! following its closing quote, and a correlation id is only recognised as a
//! final quoted field, cut at the comma just before its opening quote. Commas
//! and quotes nested in the payload are never split on.

use std::str;

use crate::error::{Result, RoomcastError};
use crate::protocol::Message;

pub fn encode(event: &str, args: &str, id: &str) -> Vec<u8> {
    let mut frame = String::with_capacity(event.len() + args.len() + id.len() + 8);
    frame.push_str("[\"");
    frame.push_str(event);
    frame.push('"');
    if !args.is_empty() {
        frame.push(',');
        frame.push_str(args);
    } else if !id.is_empty() {
        // Without a payload slot a lone id would read back as a string payload
        frame.push_str(",null");
    }
    if !id.is_empty() {
        frame.push_str(",\"");
        frame.push_str(id);
        frame.push('"');
    }
    frame.push(']');
    frame.into_bytes()
}

pub fn decode(data: &[u8]) -> Result<Message> {
    let text = str::from_utf8(data).map_err(|e| malformed(format!("invalid utf-8: {}", e)))?;

    let (event, mut args) = cut_from_left(text.as_bytes())?;
    if event.is_empty() {
        return Err(malformed("empty event name"));
    }

    // A trailing quoted field may be the correlation id
    let mut id = String::new();
    if args.ends_with('"') {
        if let Ok((payload, tail)) = cut_from_right(args.as_bytes()) {
            if args.len() != tail.len() + 2 {
                args = payload;
                id = tail;
            }
        }
    }

    if args == "null" {
        args.clear();
    }

    Ok(Message { event, args, id })
}

fn malformed(reason: impl Into<String>) -> RoomcastError {
    RoomcastError::MalformedFrame(reason.into())
}

fn utf8(bytes: &[u8]) -> Result<String> {
    str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| malformed(format!("field is not valid utf-8: {}", e)))
}

/// Tracks the first two quotes seen and the delimiter that follows them
#[derive(Debug, Default)]
struct QuoteCounter {
    start: usize,
    end: usize,
    rest: usize,
    quotes: u8,
}

impl QuoteCounter {
    /// Returns `true` once the comma after the second quote is reached
    fn count(&mut self, i: usize, byte: u8) -> Result<bool> {
        match byte {
            b'"' => {
                match self.quotes {
                    0 => self.start = i + 1,
                    1 => {
                        self.end = i;
                        self.rest = i + 1;
                    }
                    _ => return Err(malformed("unexpected quote")),
                }
                self.quotes += 1;
            }
            b',' if self.quotes == 2 => {
                self.rest = i + 1;
                return Ok(true);
            }
            _ => {}
        }
        Ok(false)
    }
}

/// Splits `["event",rest]` into the event name and the remainder without the closing bracket
fn cut_from_left(text: &[u8]) -> Result<(String, String)> {
    let mut counter = QuoteCounter::default();
    for (i, &byte) in text.iter().enumerate() {
        if counter.count(i, byte)? {
            break;
        }
    }

    if counter.end < counter.start || counter.rest >= text.len() {
        return Err(malformed("event field not found"));
    }

    let event = utf8(&text[counter.start..counter.end])?;
    let rest = utf8(&text[counter.rest..text.len() - 1])?;
    Ok((event, rest))
}

/// Splits `payload,"id"` scanning from the right; yields the payload and the id
fn cut_from_right(text: &[u8]) -> Result<(String, String)> {
    let mut counter = QuoteCounter::default();
    for i in (0..text.len()).rev() {
        if counter.count(i, text[i])? {
            break;
        }
    }

    // Scanning backwards, `start` sits after the closing quote and `end` on the opening one
    if counter.end + 1 > counter.start.saturating_sub(1) || counter.rest < 1 {
        return Err(malformed("trailing id not found"));
    }

    let payload = utf8(&text[..counter.rest - 1])?;
    let id = utf8(&text[counter.end + 1..counter.start - 1])?;
    Ok((payload, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_str(s: &str) -> Result<Message> {
        decode(s.as_bytes())
    }

    #[test]
    fn test_encode_layout() {
        assert_eq!(encode("a", "", ""), b"[\"a\"]");
        assert_eq!(encode("a", "1", ""), b"[\"a\",1]");
        assert_eq!(encode("a", "", "x"), b"[\"a\",null,\"x\"]");
        assert_eq!(encode("a", "{\"k\":2}", "x"), b"[\"a\",{\"k\":2},\"x\"]");
    }

    #[test]
    fn test_decode_full_frame() {
        let msg = decode_str(r#"["chat",{"text":"hi, there","to":"bob"},"req-1"]"#).unwrap();
        assert_eq!(msg.event, "chat");
        assert_eq!(msg.args, r#"{"text":"hi, there","to":"bob"}"#);
        assert_eq!(msg.id, "req-1");
    }

    #[test]
    fn test_decode_event_only() {
        let msg = decode_str(r#"["tick"]"#).unwrap();
        assert_eq!(msg, Message::new("tick", "", ""));
    }

    #[test]
    fn test_decode_string_payload_is_not_an_id() {
        let msg = decode_str(r#"["say","hello, world"]"#).unwrap();
        assert_eq!(msg.args, r#""hello, world""#);
        assert!(msg.id.is_empty());

        let msg = decode_str(r#"["say",""]"#).unwrap();
        assert_eq!(msg.args, r#""""#);
        assert!(msg.id.is_empty());
    }

    #[test]
    fn test_decode_string_payload_with_id() {
        let msg = decode_str(r#"["say","hello","id-9"]"#).unwrap();
        assert_eq!(msg.args, r#""hello""#);
        assert_eq!(msg.id, "id-9");
    }

    #[test]
    fn test_decode_array_payload() {
        let msg = decode_str(r#"["nums",[1,"two",3],"abc"]"#).unwrap();
        assert_eq!(msg.args, r#"[1,"two",3]"#);
        assert_eq!(msg.id, "abc");

        let msg = decode_str(r#"["nums",["a","b"]]"#).unwrap();
        assert_eq!(msg.args, r#"["a","b"]"#);
        assert!(msg.id.is_empty());
    }

    #[test]
    fn test_decode_number_payload_with_id() {
        let msg = decode_str(r#"["ping",1700000000000,"x"]"#).unwrap();
        assert_eq!(msg.args, "1700000000000");
        assert_eq!(msg.id, "x");
    }

    #[test]
    fn test_decode_id_without_payload() {
        let msg = decode_str(r#"["who","abc"]"#).unwrap();
        // A lone string is a payload, never an id
        assert_eq!(msg.args, r#""abc""#);
        assert!(msg.id.is_empty());
    }

    #[test]
    fn test_decode_null_placeholder() {
        let msg = decode_str(r#"["who",null,"abc"]"#).unwrap();
        assert_eq!(msg, Message::new("who", "", "abc"));
    }

    #[test]
    fn test_decode_unicode() {
        let msg = decode_str(r#"["héllo",{"t":"日本, 語"},"ïd"]"#).unwrap();
        assert_eq!(msg.event, "héllo");
        assert_eq!(msg.args, r#"{"t":"日本, 語"}"#);
        assert_eq!(msg.id, "ïd");
    }

    #[test]
    fn test_decode_malformed() {
        for bad in ["", "[]", "[", "[\"", "[\"\"]", "[\"abc", "abc", "[\"a\"\"b\"]"] {
            assert!(
                matches!(decode_str(bad), Err(RoomcastError::MalformedFrame(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        assert!(matches!(
            decode(&[b'[', b'"', 0xff, b'"', b']']),
            Err(RoomcastError::MalformedFrame(_))
        ));
    }
}
