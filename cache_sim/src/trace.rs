use nom::{
    bytes::complete::tag_no_case,
    character::complete::{alpha1, hex_digit1, space0, space1},
    combinator::{all_consuming, opt},
    sequence::{preceded, terminated, tuple},
    IResult,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("line {line}: `{token}` is not a hexadecimal address")]
    BadAddress { line: usize, token: String },
    #[error("line {line}: `{token}` is not a valid access count")]
    BadCount { line: usize, token: String },
    #[error("trace ended with {missing} of {expected} {section} address(es) missing")]
    UnexpectedEof {
        section: &'static str,
        expected: usize,
        missing: usize,
    },
    #[error("line {line}: unknown access `{op}` (expected `r` or `w`)")]
    UnknownOp { line: usize, op: String },
    #[error("line {line}: malformed access `{text}`")]
    Malformed { line: usize, text: String },
    #[error("line {line}: unexpected `{token}` after the update section")]
    Trailing { line: usize, token: String },
}

pub type Result<T> = std::result::Result<T, TraceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessOp {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Access {
    pub op: AccessOp,
    pub address: u64,
}

impl Access {
    pub fn read(address: u64) -> Self {
        Self {
            op: AccessOp::Read,
            address,
        }
    }
    pub fn write(address: u64) -> Self {
        Self {
            op: AccessOp::Write,
            address,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TraceFormat {
    /// `n`, `n` read addresses, then optionally `m` and `m` write addresses.
    Counted,
    /// one `[r|w] <hex>` per line; a bare address is a read.
    #[default]
    Tagged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace {
    accesses: Vec<Access>,
}

impl Trace {
    pub fn parse(input: &str, format: TraceFormat) -> Result<Self> {
        match format {
            TraceFormat::Counted => Self::parse_counted(input),
            TraceFormat::Tagged => Self::parse_tagged(input),
        }
    }
    pub fn len(&self) -> usize {
        self.accesses.len()
    }
    pub fn is_empty(&self) -> bool {
        self.accesses.is_empty()
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Access> {
        self.accesses.iter()
    }
    pub fn push(&mut self, access: Access) {
        self.accesses.push(access)
    }

    fn parse_tagged(input: &str) -> Result<Self> {
        let mut trace = Self::default();
        for (line, text) in numbered_lines(input) {
            if text.is_empty() {
                continue;
            }
            let (op, digits) = match tagged_line(text) {
                Ok((_, parsed)) => parsed,
                Err(_) => {
                    return Err(TraceError::Malformed {
                        line,
                        text: text.to_string(),
                    })
                }
            };
            let op = match op.map(str::to_ascii_lowercase).as_deref() {
                None | Some("r") | Some("read") => AccessOp::Read,
                Some("w") | Some("write") => AccessOp::Write,
                Some(_) => {
                    return Err(TraceError::UnknownOp {
                        line,
                        op: op.unwrap_or_default().to_string(),
                    })
                }
            };
            let address = parse_hex(digits).ok_or_else(|| TraceError::BadAddress {
                line,
                token: text.to_string(),
            })?;
            trace.push(Access { op, address });
        }
        Ok(trace)
    }

    fn parse_counted(input: &str) -> Result<Self> {
        let mut tokens = numbered_lines(input)
            .flat_map(|(line, text)| text.split_whitespace().map(move |t| (line, t)));
        let mut trace = Self::default();
        let sections = [("read", AccessOp::Read), ("update", AccessOp::Write)];
        for (i, (section, op)) in sections.into_iter().enumerate() {
            let expected = match tokens.next() {
                Some((line, token)) => token.parse::<usize>().map_err(|_| TraceError::BadCount {
                    line,
                    token: token.to_string(),
                })?,
                // the update section may be left out entirely
                None if i > 0 => break,
                None => 0,
            };
            for n in 0..expected {
                let (line, token) = tokens.next().ok_or(TraceError::UnexpectedEof {
                    section,
                    expected,
                    missing: expected - n,
                })?;
                let address = all_consuming(hex_address)(token)
                    .ok()
                    .and_then(|(_, digits)| parse_hex(digits))
                    .ok_or_else(|| TraceError::BadAddress {
                        line,
                        token: token.to_string(),
                    })?;
                trace.push(Access { op, address });
            }
        }
        match tokens.next() {
            Some((line, token)) => Err(TraceError::Trailing {
                line,
                token: token.to_string(),
            }),
            None => Ok(trace),
        }
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a Access;

    type IntoIter = std::slice::Iter<'a, Access>;

    fn into_iter(self) -> Self::IntoIter {
        self.accesses.iter()
    }
}

/// 1-based line numbers, `#` comments stripped, trimmed.
fn numbered_lines(input: &str) -> impl Iterator<Item = (usize, &str)> {
    input.lines().enumerate().map(|(n, text)| {
        let text = text.split_once('#').map_or(text, |(code, _)| code);
        (n + 1, text.trim())
    })
}

fn parse_hex(digits: &str) -> Option<u64> {
    u64::from_str_radix(digits, 16).ok()
}

fn hex_address(input: &str) -> IResult<&str, &str> {
    preceded(opt(tag_no_case("0x")), hex_digit1)(input)
}

fn tagged_line(input: &str) -> IResult<&str, (Option<&str>, &str)> {
    all_consuming(tuple((
        opt(terminated(alpha1, space1)),
        terminated(hex_address, space0),
    )))(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_counted() {
        let t = Trace::parse("2 1A3 0x1a3\n1 1A3\n", TraceFormat::Counted).unwrap();
        assert_eq!(
            t.iter().copied().collect::<Vec<_>>(),
            vec![Access::read(0x1A3), Access::read(0x1A3), Access::write(0x1A3)]
        );
        let t = Trace::parse("3\nff\n100\n0\n", TraceFormat::Counted).unwrap();
        assert_eq!(t.len(), 3);
        assert!(t.iter().all(|a| a.op == AccessOp::Read));
        assert!(Trace::parse("", TraceFormat::Counted).unwrap().is_empty());
    }

    #[test]
    fn test_counted_errors() {
        assert_eq!(
            Trace::parse("3 1 2", TraceFormat::Counted),
            Err(TraceError::UnexpectedEof {
                section: "read",
                expected: 3,
                missing: 1
            })
        );
        assert_eq!(
            Trace::parse("1 10\nx", TraceFormat::Counted),
            Err(TraceError::BadCount {
                line: 2,
                token: "x".to_string()
            })
        );
        assert_eq!(
            Trace::parse("1\nzz", TraceFormat::Counted),
            Err(TraceError::BadAddress {
                line: 2,
                token: "zz".to_string()
            })
        );
        assert_eq!(
            Trace::parse("1 10 0 5", TraceFormat::Counted),
            Err(TraceError::Trailing {
                line: 1,
                token: "5".to_string()
            })
        );
        assert!(matches!(
            Trace::parse("1 10000000000000000", TraceFormat::Counted),
            Err(TraceError::BadAddress { .. })
        ));
    }

    #[test]
    fn test_parse_tagged() {
        let input = "# warm up\n\
                     r 0x1a3\n\
                     \n\
                     1A3   # bare address is a read\n\
                     W 1ff\n\
                     write 0X400\n";
        let t = Trace::parse(input, TraceFormat::Tagged).unwrap();
        assert_eq!(
            t.iter().copied().collect::<Vec<_>>(),
            vec![
                Access::read(0x1A3),
                Access::read(0x1A3),
                Access::write(0x1FF),
                Access::write(0x400)
            ]
        );
    }

    #[test]
    fn test_tagged_errors() {
        assert_eq!(
            Trace::parse("r 10\nx 10\n", TraceFormat::Tagged),
            Err(TraceError::UnknownOp {
                line: 2,
                op: "x".to_string()
            })
        );
        assert_eq!(
            Trace::parse("r 10\n\nr 10 20\n", TraceFormat::Tagged),
            Err(TraceError::Malformed {
                line: 3,
                text: "r 10 20".to_string()
            })
        );
        assert_eq!(
            Trace::parse("r zz", TraceFormat::Tagged),
            Err(TraceError::Malformed {
                line: 1,
                text: "r zz".to_string()
            })
        );
    }
}
