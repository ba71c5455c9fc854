//! Line codec for the interpreter wire protocol.
//!
//! Every successful line starts with [`SENTINEL`] followed by percent-escaped
//! fields joined with [`DELIMITER`]:
//!
//! ```text
//! !8A3F00112233AABB,Blue%20Train,John%20Coltrane,Moment%27s%20Notice
//! ```
//!
//! A non-empty line without the sentinel is an error message written by the
//! host, and an empty line means "no data".

use crate::error::{BridgeError, BridgeResult};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Leading byte of every successful line.
pub const SENTINEL: char = '!';
/// Separator between fields on a line.
pub const DELIMITER: char = ',';

/// Bytes left as-is when escaping; everything else becomes `%XX`.
const FIELD: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// One decoded protocol line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<String>,
}

impl Record {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// The "no data" record produced by an empty line.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Field at `index`, or `""` when the host sent fewer fields.
    pub fn field(&self, index: usize) -> &str {
        self.fields.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<String> {
        self.fields
    }
}

/// Percent-escape a single field so it is safe both on the wire and inside a
/// quoted script literal.
pub fn encode_field(value: &str) -> String {
    utf8_percent_encode(value, FIELD).to_string()
}

/// Encode `fields` as one protocol line. An empty slice encodes to the empty
/// ("no data") line.
pub fn encode<S: AsRef<str>>(fields: &[S]) -> String {
    if fields.is_empty() {
        return String::new();
    }
    let mut line = String::from(SENTINEL);
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(DELIMITER);
        }
        line.push_str(&encode_field(field.as_ref()));
    }
    line
}

/// Decode one protocol line.
pub fn decode(line: &str) -> BridgeResult<Record> {
    let Some(rest) = line.strip_prefix(SENTINEL) else {
        if line.is_empty() {
            return Ok(Record::empty());
        }
        return Err(BridgeError::host(line));
    };

    let fields = rest
        .split(DELIMITER)
        .map(decode_field)
        .collect::<BridgeResult<Vec<_>>>()?;
    Ok(Record::new(fields))
}

fn decode_field(raw: &str) -> BridgeResult<String> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(BridgeError::decode(format!(
                    "malformed escape at byte {i} in field {raw:?}"
                )));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|value| value.into_owned())
        .map_err(|err| BridgeError::decode(format!("field {raw:?} is not UTF-8: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_keeps_delimiters_and_escapes() {
        let fields = vec![
            "a,b".to_string(),
            "100% pure".to_string(),
            "!bang".to_string(),
            "plus+sign".to_string(),
            "quote\"and'apostrophe".to_string(),
            String::new(),
            "日本語".to_string(),
        ];
        let line = encode(&fields);
        assert!(line.starts_with(SENTINEL));
        assert_eq!(line.matches(DELIMITER).count(), fields.len() - 1);
        assert_eq!(decode(&line).unwrap().into_fields(), fields);
    }

    #[test]
    fn encoded_field_has_no_script_metacharacters() {
        let encoded = encode_field("\"); doSomething(); (\"\\ $x `y`");
        assert!(encoded
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_.~%".contains(&b)));
    }

    #[test]
    fn empty_line_is_absent_not_error() {
        let record = decode("").unwrap();
        assert!(record.is_empty());
        assert_eq!(record.field(0), "");
    }

    #[test]
    fn empty_field_list_encodes_to_empty_line() {
        let none: [&str; 0] = [];
        assert_eq!(encode(&none), "");
    }

    #[test]
    fn sentinel_alone_is_one_empty_field() {
        let record = decode("!").unwrap();
        assert_eq!(record.len(), 1);
        assert_eq!(record.field(0), "");
    }

    #[test]
    fn non_sentinel_line_is_host_error_with_original_text() {
        let line = "31:40: execution error: Can't get track 7. (-1728)";
        assert_eq!(decode(line), Err(BridgeError::host(line)));
    }

    #[test]
    fn short_record_reads_missing_fields_as_empty() {
        let record = decode("!id9,Album").unwrap();
        assert_eq!(record.field(0), "id9");
        assert_eq!(record.field(1), "Album");
        assert_eq!(record.field(2), "");
        assert_eq!(record.field(3), "");
    }

    #[test]
    fn plus_decodes_as_space() {
        assert_eq!(decode("!a+b").unwrap().field(0), "a b");
    }

    #[test]
    fn malformed_escape_is_decode_error() {
        assert!(matches!(decode("!abc%4"), Err(BridgeError::Decode { .. })));
        assert!(matches!(decode("!abc%zz"), Err(BridgeError::Decode { .. })));
    }

    #[test]
    fn invalid_utf8_is_decode_error() {
        assert!(matches!(decode("!%FF%FE"), Err(BridgeError::Decode { .. })));
    }
}
