//! Credential encoder.
//!
//! A record payload has one fixed layout:
//!
//! ```text
//! {"username": "<escaped>", "password": "<escaped>", "attempt": <n>}
//! ```
//!
//! Only `\` and `"` are escaped (`\\` and `\"`); every other byte, control
//! and non-UTF-8 bytes included, is copied verbatim. A payload built from
//! valid UTF-8 credentials without control characters is therefore also a
//! valid JSON object.

use crate::error_handling::types::CaptureError;
use bytes::{BufMut, Bytes, BytesMut};

use super::types::CaptureRecord;

const USERNAME_FIELD: &[u8] = b"{\"username\": \"";
const PASSWORD_FIELD: &[u8] = b"\", \"password\": \"";
const ATTEMPT_FIELD: &[u8] = b"\", \"attempt\": ";
const RECORD_END: &[u8] = b"}";

/// Decimal digits of `u32::MAX`.
const MAX_ATTEMPT_DIGITS: usize = 10;

/// Bytes a payload carries on top of the escaped credentials.
pub const RECORD_OVERHEAD: usize = USERNAME_FIELD.len()
    + PASSWORD_FIELD.len()
    + ATTEMPT_FIELD.len()
    + MAX_ATTEMPT_DIGITS
    + RECORD_END.len();

/// Upper bound of the payload size for credentials of the given lengths,
/// assuming every byte needs escaping. `None` on overflow.
pub fn worst_case_len(username_len: usize, password_len: usize) -> Option<usize> {
    username_len
        .checked_add(password_len)?
        .checked_mul(2)?
        .checked_add(RECORD_OVERHEAD)
}

pub fn escape_into(dst: &mut BytesMut, src: &[u8]) {
    for &b in src {
        if b == b'\\' || b == b'"' {
            dst.put_u8(b'\\');
        }
        dst.put_u8(b);
    }
}

pub fn escape(src: &[u8]) -> Vec<u8> {
    let mut dst = BytesMut::with_capacity(src.len().saturating_mul(2));
    escape_into(&mut dst, src);
    dst.to_vec()
}

/// Builds the payload of `record`.
///
/// The buffer is sized once from [`worst_case_len`], which must not exceed
/// `max_record_len`; otherwise nothing is built.
///
/// # Errors
/// - [`CaptureError::RecordTooLarge`] when the worst case exceeds the limit
pub fn encode_record(record: &CaptureRecord, max_record_len: usize) -> Result<Bytes, CaptureError> {
    let worst_case = worst_case_len(record.username.len(), record.password.len()).ok_or(
        CaptureError::RecordTooLarge {
            worst_case: usize::MAX,
            limit: max_record_len,
        },
    )?;
    if worst_case > max_record_len {
        return Err(CaptureError::RecordTooLarge {
            worst_case,
            limit: max_record_len,
        });
    }

    let mut buf = BytesMut::with_capacity(worst_case);
    buf.put_slice(USERNAME_FIELD);
    escape_into(&mut buf, &record.username);
    buf.put_slice(PASSWORD_FIELD);
    escape_into(&mut buf, &record.password);
    buf.put_slice(ATTEMPT_FIELD);
    buf.put_slice(record.attempt.to_string().as_bytes());
    buf.put_slice(RECORD_END);

    Ok(buf.freeze())
}

/// Parses a payload produced by [`encode_record`]. Anything that deviates
/// from the layout is rejected.
pub fn decode_record(payload: &[u8]) -> Result<CaptureRecord, CaptureError> {
    let rest = expect(payload, USERNAME_FIELD, "username field")?;
    let (username, rest) = unescape_until_quote(rest)?;
    let rest = expect(rest, PASSWORD_FIELD, "password field")?;
    let (password, rest) = unescape_until_quote(rest)?;
    let rest = expect(rest, ATTEMPT_FIELD, "attempt field")?;

    let digits = rest
        .strip_suffix(RECORD_END)
        .ok_or_else(|| malformed("missing closing brace"))?;
    let attempt = parse_attempt(digits)?;

    Ok(CaptureRecord {
        username,
        password,
        attempt,
    })
}

fn malformed(what: &str) -> CaptureError {
    CaptureError::MalformedRecord(what.to_string())
}

fn expect<'a>(input: &'a [u8], token: &[u8], what: &str) -> Result<&'a [u8], CaptureError> {
    input
        .strip_prefix(token)
        .ok_or_else(|| malformed(&format!("expected {}", what)))
}

/// Unescapes up to the first unescaped `"`, which is left in the returned tail.
fn unescape_until_quote(input: &[u8]) -> Result<(Vec<u8>, &[u8]), CaptureError> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'"' => return Ok((out, &input[i..])),
            b'\\' => match input.get(i + 1) {
                Some(&c @ (b'\\' | b'"')) => {
                    out.push(c);
                    i += 2;
                }
                Some(_) => return Err(malformed("invalid escape sequence")),
                None => return Err(malformed("dangling escape")),
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Err(malformed("unterminated string"))
}

fn parse_attempt(digits: &[u8]) -> Result<u32, CaptureError> {
    if digits.is_empty()
        || digits.len() > MAX_ATTEMPT_DIGITS
        || !digits.iter().all(u8::is_ascii_digit)
        || digits[0] == b'0'
    {
        return Err(malformed("attempt is not a positive integer"));
    }
    // ASCII digits only at this point
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| malformed("attempt out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 64 * 1024;

    #[test]
    fn test_escape_only_quote_and_backslash() {
        assert_eq!(escape(br#"p"\w"#), br#"p\"\\w"#.to_vec());
        assert_eq!(escape(b"a\0b\n\xff"), b"a\0b\n\xff".to_vec());
        assert_eq!(escape(b""), Vec::<u8>::new());
    }

    #[test]
    fn test_encode_admin_scenario() {
        let record = CaptureRecord::new("admin", br#"p"\w"#.to_vec(), 1);
        let payload = encode_record(&record, LIMIT).unwrap();

        assert_eq!(
            &payload[..],
            br#"{"username": "admin", "password": "p\"\\w", "attempt": 1}"#
        );
    }

    #[test]
    fn test_plain_payload_is_json() {
        let record = CaptureRecord::new(r#"ro"ot"#, r#"C:\Users\"x""#, 42);
        let payload = encode_record(&record, LIMIT).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["username"], r#"ro"ot"#);
        assert_eq!(value["password"], r#"C:\Users\"x""#);
        assert_eq!(value["attempt"], 42);
    }

    #[test]
    fn test_decode_inverts_encode_for_hostile_bytes() {
        let cases: [(&[u8], &[u8], u32); 5] = [
            (b"", b"", 1),
            (b"root\0", b"\0\0", 2),
            (br#"\""#, br#"\\""\"#, 3),
            (b"\xfe\xff", b"\", \"password\": \"", u32::MAX),
            (b"\\", b"}", 7),
        ];

        for (username, password, attempt) in cases {
            let record = CaptureRecord::new(username, password, attempt);
            let payload = encode_record(&record, LIMIT).unwrap();
            assert_eq!(decode_record(&payload).unwrap(), record);
        }
    }

    #[test]
    fn test_payload_never_exceeds_worst_case() {
        let username = vec![b'"'; 300];
        let password = vec![b'\\'; 200];
        let record = CaptureRecord::new(username, password, u32::MAX);
        let payload = encode_record(&record, LIMIT).unwrap();

        assert_eq!(payload.len(), worst_case_len(300, 200).unwrap());
    }

    #[test]
    fn test_record_too_large() {
        let limit = RECORD_OVERHEAD + 10;
        let fits = CaptureRecord::new("ab", "cde", 1);
        assert!(encode_record(&fits, limit).is_ok());

        let too_big = CaptureRecord::new("abc", "def", 1);
        match encode_record(&too_big, limit) {
            Err(CaptureError::RecordTooLarge { worst_case, limit: l }) => {
                assert_eq!(worst_case, RECORD_OVERHEAD + 12);
                assert_eq!(l, limit);
            }
            other => panic!("expected RecordTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_worst_case_overflow() {
        assert_eq!(worst_case_len(usize::MAX, 1), None);
        assert_eq!(worst_case_len(usize::MAX / 2, 1), None);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let bad: [&[u8]; 11] = [
            b"",
            b"{}",
            br#"{"username": "a", "password": "b", "attempt": 0}"#,
            br#"{"username": "a", "password": "b", "attempt": 01}"#,
            br#"{"username": "a", "password": "b", "attempt": 4294967296}"#,
            br#"{"username": "a", "password": "b", "attempt": -1}"#,
            br#"{"username": "a", "password": "b", "attempt": 1"#,
            br#"{"username": "a", "password": "b", "attempt": 1} "#,
            br#"{"username": "a\n", "password": "b", "attempt": 1}"#,
            br#"{"username": "a\"#,
            br#"{"username": "a", "attempt": 1}"#,
        ];

        for payload in bad {
            assert!(
                matches!(decode_record(payload), Err(CaptureError::MalformedRecord(_))),
                "accepted {:?}",
                String::from_utf8_lossy(payload)
            );
        }
    }
}
