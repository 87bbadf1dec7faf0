//! Links-notation codec for execution records
//!
//! Each field of a record is one link doublet on its own line:
//!
//! ```text
//! (3f1c….status: status "executed")
//! (3f1c….exitCode: exitCode "0")
//! ```
//!
//! Records are separated by a blank line. Values are always quoted; `\`, `"` and
//! control characters inside them are backslash-escaped so every link stays on
//! one line.

use nom::{
    IResult, Parser,
    bytes::complete::take_while1,
    character::complete::{char, space0, space1},
    error::{Error as NomError, ErrorKind},
};

use crate::error::{Error, Result};
use crate::record::ExecutionRecord;

/// One decoded link: `(<id>.<key>: <key> "<value>")`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Record identity
    pub id: String,
    /// Field name
    pub key: String,
    /// Unescaped value
    pub value: String,
}

/// Encode one record
pub fn encode_record(record: &ExecutionRecord) -> String {
    record
        .fields()
        .into_iter()
        .map(|(key, value)| format!("({}.{}: {} \"{}\")", record.uuid, key, key, escape(&value)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Encode a whole store
pub fn encode(records: &[ExecutionRecord]) -> String {
    let mut out = records
        .iter()
        .map(encode_record)
        .collect::<Vec<_>>()
        .join("\n\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Decode a whole store, keeping record order
pub fn decode(text: &str) -> Result<Vec<ExecutionRecord>> {
    // (id, first line, fields)
    let mut groups: Vec<(String, usize, Vec<(String, String)>)> = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let number = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let (rest, link) =
            parse_link(line).map_err(|e| Error::parse(number, format!("{}: {}", e, line)))?;
        if !rest.trim().is_empty() {
            return Err(Error::parse(number, format!("trailing input: {}", rest)));
        }

        match groups.iter_mut().find(|(id, _, _)| *id == link.id) {
            Some((_, _, fields)) => fields.push((link.key, link.value)),
            None => groups.push((link.id, number, vec![(link.key, link.value)])),
        }
    }

    groups
        .into_iter()
        .map(|(id, line, fields)| {
            let record = ExecutionRecord::from_fields(
                fields.iter().map(|(k, v)| (k.as_str(), v.as_str())),
                line,
            )?;
            if record.uuid != id {
                return Err(Error::parse(
                    line,
                    format!("links for {} carry uuid {}", id, record.uuid),
                ));
            }
            Ok(record)
        })
        .collect()
}

/// Parse a single link
pub fn parse_link(input: &str) -> IResult<&str, Link> {
    let (input, _) = (char('('), space0).parse(input)?;
    let (input, id) = take_while1(|c: char| c != '.' && c != ':' && c != ')' && !c.is_whitespace())
        .parse(input)?;
    let (input, _) = char('.').parse(input)?;
    let (input, key) = take_while1(is_key_char).parse(input)?;
    let (input, _) = (char(':'), space1).parse(input)?;
    let (input, role) = take_while1(is_key_char).parse(input)?;
    if role != key {
        return Err(nom::Err::Failure(NomError::new(input, ErrorKind::Verify)));
    }
    let (input, _) = space1.parse(input)?;
    let (input, value) = quoted(input)?;
    let (input, _) = (space0, char(')')).parse(input)?;

    Ok((
        input,
        Link {
            id: id.to_string(),
            key: key.to_string(),
            value,
        },
    ))
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// A double-quoted string with backslash escapes
fn quoted(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"').parse(input)?;
    let mut value = String::new();
    let mut chars = input.char_indices();

    while let Some((offset, c)) = chars.next() {
        match c {
            '"' => return Ok((&input[offset + 1..], value)),
            '\\' => {
                let escaped = match chars.next() {
                    Some((_, 'n')) => '\n',
                    Some((_, 'r')) => '\r',
                    Some((_, 't')) => '\t',
                    Some((_, '0')) => '\0',
                    Some((_, '"')) => '"',
                    Some((_, '\\')) => '\\',
                    Some((at, _)) => {
                        return Err(nom::Err::Failure(NomError::new(
                            &input[at..],
                            ErrorKind::Escaped,
                        )));
                    }
                    None => break,
                };
                value.push(escaped);
            }
            c => value.push(c),
        }
    }

    Err(nom::Err::Error(NomError::new(input, ErrorKind::Char)))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Outcome;

    #[test]
    fn test_parse_link() {
        let (rest, link) = parse_link(r#"(abc-1.exitCode: exitCode "130")"#).unwrap();
        assert!(rest.is_empty());
        assert_eq!(
            link,
            Link {
                id: "abc-1".into(),
                key: "exitCode".into(),
                value: "130".into()
            }
        );
    }

    #[test]
    fn test_mismatched_role_is_rejected() {
        assert!(parse_link(r#"(abc.pid: status "1")"#).is_err());
        assert!(parse_link(r#"(abc.pid: pid "1"#).is_err());
        assert!(parse_link(r#"(abc.pid: pid "\q")"#).is_err());
    }

    #[test]
    fn test_awkward_commands_survive_the_store() {
        let mut first = ExecutionRecord::new("echo \"hi\" | tr a-z A-Z\nprintf '\\t%s' \\\"x\\\"");
        first.finalize(Outcome::Exited(0));
        let second = ExecutionRecord::new("(echo a.b: c \"d\")").with_option("image", "alpine");

        let text = encode(&[first.clone(), second.clone()]);
        assert_eq!(text.lines().filter(|l| l.is_empty()).count(), 1);
        assert!(text.contains(&format!("({}.status: status \"executed\")", first.uuid)));

        let decoded = decode(&text).unwrap();
        assert_eq!(decoded, vec![first, second]);
    }

    #[test]
    fn test_empty_store() {
        assert!(decode("").unwrap().is_empty());
        assert!(decode("\n\n").unwrap().is_empty());
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn test_garbage_reports_line() {
        let err = decode("\n(a.uuid: uuid \"a\")\nnot a link\n").unwrap_err();
        assert!(matches!(err, Error::Parse { line: 3, .. }));
    }
}
