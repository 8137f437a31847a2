//! Output file naming.
//!
//! A template is a string with `%`-escapes that expand to properties of a flow:
//!
//! | Escape | Expands to                                           |
//! |--------|------------------------------------------------------|
//! | `%A`   | source address                                       |
//! | `%a`   | source port                                          |
//! | `%B`   | destination address                                  |
//! | `%b`   | destination port                                     |
//! | `%V`   | `--` if the flow was captured with a VLAN tag        |
//! | `%v`   | the VLAN id, if any                                  |
//! | `%C`   | `c` if the connection count is non-zero              |
//! | `%c`   | the connection count, if non-zero                    |
//! | `%#`   | the connection count                                 |
//! | `%T`   | flow start as `YYYY-MM-DDTHH:MM:SSZ`                 |
//! | `%t`   | flow start as unix seconds                           |
//! | `%%`   | a literal `%`                                        |
//!
//! IPv4 addresses are rendered with zero-padded octets and ports with five digits so that names sort naturally.

use crate::flow::FlowRecord;
use ip_datagram::FlowKey;
use std::fmt::Write as _;
use std::net::IpAddr;
use std::str::FromStr;

pub const DEFAULT_TEMPLATE: &str = "%A.%a-%B.%b%V%v%C%c";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template `{template}` ends with an unterminated `%`")]
    Unterminated { template: String },
    #[error("Template `{template}` contains unknown escape `%{escape}`")]
    UnknownEscape { template: String, escape: char },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    SrcAddr,
    SrcPort,
    DstAddr,
    DstPort,
    VlanSeparator,
    Vlan,
    ConnectionMarker,
    ConnectionCount,
    ConnectionCountAlways,
    IsoTime,
    UnixTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Escape(Escape),
}

/// A parsed filename template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTemplate {
    tokens: Vec<Token>,
}

impl Default for FilenameTemplate {
    fn default() -> Self {
        Self::parse(DEFAULT_TEMPLATE).unwrap_or_else(|_| unreachable!("default template is valid"))
    }
}

impl FromStr for FilenameTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl FilenameTemplate {
    fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }

            let Some(escape) = chars.next() else {
                return Err(TemplateError::Unterminated {
                    template: template.to_owned(),
                });
            };

            let escape = match escape {
                '%' => {
                    literal.push('%');
                    continue;
                }
                'A' => Escape::SrcAddr,
                'a' => Escape::SrcPort,
                'B' => Escape::DstAddr,
                'b' => Escape::DstPort,
                'V' => Escape::VlanSeparator,
                'v' => Escape::Vlan,
                'C' => Escape::ConnectionMarker,
                'c' => Escape::ConnectionCount,
                '#' => Escape::ConnectionCountAlways,
                'T' => Escape::IsoTime,
                't' => Escape::UnixTime,
                other => {
                    return Err(TemplateError::UnknownEscape {
                        template: template.to_owned(),
                        escape: other,
                    });
                }
            };

            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(Token::Escape(escape));
        }

        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Ok(Self { tokens })
    }

    /// Renders the connection count even for the first instance of a flow.
    pub fn with_connection_count_always(mut self) -> Self {
        for token in &mut self.tokens {
            if *token == Token::Escape(Escape::ConnectionCount) {
                *token = Token::Escape(Escape::ConnectionCountAlways);
            }
        }

        self
    }

    /// Prepends another template.
    pub fn with_prefix(self, prefix: &str) -> Result<Self, TemplateError> {
        let mut tokens = Self::parse(prefix)?.tokens;
        tokens.extend(self.tokens);

        Ok(Self { tokens })
    }

    pub fn render(&self, key: &FlowKey, record: &FlowRecord) -> String {
        let mut out = String::new();

        for token in &self.tokens {
            let escape = match token {
                Token::Literal(s) => {
                    out.push_str(s);
                    continue;
                }
                Token::Escape(e) => *e,
            };

            // Writing into a `String` cannot fail.
            let _ = match escape {
                Escape::SrcAddr => write_addr(&mut out, key.src()),
                Escape::SrcPort => write!(out, "{:05}", key.src_port()),
                Escape::DstAddr => write_addr(&mut out, key.dst()),
                Escape::DstPort => write!(out, "{:05}", key.dst_port()),
                Escape::VlanSeparator if record.vlan.is_some() => write!(out, "--"),
                Escape::Vlan => match record.vlan {
                    Some(vlan) => write!(out, "{vlan}"),
                    None => Ok(()),
                },
                Escape::ConnectionMarker if record.connection_count > 0 => write!(out, "c"),
                Escape::ConnectionCount if record.connection_count > 0 => {
                    write!(out, "{}", record.connection_count)
                }
                Escape::ConnectionCountAlways => write!(out, "{}", record.connection_count),
                Escape::IsoTime => write!(out, "{}", record.start.format("%Y-%m-%dT%H:%M:%SZ")),
                Escape::UnixTime => write!(out, "{}", record.start.timestamp()),
                Escape::VlanSeparator | Escape::ConnectionMarker | Escape::ConnectionCount => {
                    Ok(())
                }
            };
        }

        out
    }
}

fn write_addr(out: &mut String, addr: IpAddr) -> std::fmt::Result {
    match addr {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();

            write!(out, "{a:03}.{b:03}.{c:03}.{d:03}")
        }
        IpAddr::V6(v6) => write!(out, "{v6}"),
    }
}
