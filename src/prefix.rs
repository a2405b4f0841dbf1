//! IPv4 address/CIDR extraction and validation for feed text and operator input.
//!
//! A [`NetworkPrefix`] is either a plain address (`a.b.c.d`) or a CIDR block
//! (`a.b.c.d/n`). Validation is strict: every octet must be in `0..=255`, the
//! prefix length in `0..=32`, and any violation rejects the whole token.
//! Host bits are never masked in the value itself, so `10.0.0.1/8` stays
//! `10.0.0.1/8`. Set membership uses [`NetworkPrefix::set_element`], the
//! form the packet filter stores and prints.

use ipnet::Ipv4Net;
use serde::{Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

/// Why a token was not accepted as a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefixError {
    #[error("empty input")]
    Empty,

    #[error("'{0}' is not an IPv4 address or CIDR")]
    Shape(String),

    #[error("octet {0} is out of range (0-255)")]
    Octet(String),

    #[error("prefix length /{0} is out of range (0-32)")]
    PrefixLength(String),

    #[error("no address found in line")]
    NoToken,
}

/// IPv4 address or CIDR block in canonical textual form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkPrefix {
    addr: Ipv4Addr,
    len: Option<u8>,
}

impl NetworkPrefix {
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    /// Explicit prefix length, `None` for a plain address.
    pub fn prefix_len(&self) -> Option<u8> {
        self.len
    }

    /// True for CIDR notation, including `/32`.
    pub fn is_range(&self) -> bool {
        self.len.is_some()
    }

    /// Network covered by this prefix (a plain address covers a /32).
    pub fn to_ipnet(&self) -> Ipv4Net {
        // len is validated to 0..=32 on construction
        Ipv4Net::new(self.addr, self.len.unwrap_or(32))
            .unwrap_or_else(|_| Ipv4Net::from(self.addr))
    }

    /// Element as the packet filter stores and lists it.
    ///
    /// An interval set prints a `/32` as the bare address and keeps only the
    /// network part of a CIDR, so `1.2.3.4/32` becomes `1.2.3.4` and
    /// `10.0.0.1/8` becomes `10.0.0.0/8`. Membership checks compare this form.
    pub fn set_element(&self) -> String {
        match self.len {
            None | Some(32) => self.addr.to_string(),
            Some(_) => self.to_ipnet().trunc().to_string(),
        }
    }

    /// Check whether an address falls inside this prefix.
    pub fn contains_addr(&self, addr: Ipv4Addr) -> bool {
        self.to_ipnet().contains(&addr)
    }
}

impl fmt::Display for NetworkPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.len {
            Some(len) => write!(f, "{}/{}", self.addr, len),
            None => write!(f, "{}", self.addr),
        }
    }
}

impl Serialize for NetworkPrefix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for NetworkPrefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        if token.is_empty() {
            return Err(PrefixError::Empty);
        }

        let (addr_part, len_part) = match token.split_once('/') {
            Some((addr, len)) => (addr, Some(len)),
            None => (token, None),
        };

        let parts: Vec<&str> = addr_part.split('.').collect();
        if parts.len() != 4 || !parts.iter().all(|p| is_digits(p, 3)) {
            return Err(PrefixError::Shape(token.to_string()));
        }

        let mut octets = [0u8; 4];
        for (slot, part) in octets.iter_mut().zip(&parts) {
            *slot = part
                .parse::<u8>()
                .map_err(|_| PrefixError::Octet(part.to_string()))?;
        }

        let len = match len_part {
            None => None,
            Some(len) if !is_digits(len, 2) => return Err(PrefixError::Shape(token.to_string())),
            Some(len) => match len.parse::<u8>() {
                Ok(n) if n <= 32 => Some(n),
                _ => return Err(PrefixError::PrefixLength(len.to_string())),
            },
        };

        Ok(Self {
            addr: Ipv4Addr::from(octets),
            len,
        })
    }
}

/// 1..=max ASCII digits
fn is_digits(s: &str, max: usize) -> bool {
    !s.is_empty() && s.len() <= max && s.bytes().all(|b| b.is_ascii_digit())
}

/// Classification of a single line of feed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Prefix(NetworkPrefix),
    /// Blank or comment line
    Skipped,
    Rejected(PrefixError),
}

/// Extract at most one prefix from a line.
///
/// Lines starting (after leading whitespace) with any character of
/// `comment_markers` are skipped. Otherwise the line is split on every
/// character that cannot be part of a prefix and the first candidate that
/// validates wins. Trailing annotations such as `; SBL123` are ignored.
pub fn classify_line(line: &str, comment_markers: &str) -> LineKind {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with(|c: char| comment_markers.contains(c)) {
        return LineKind::Skipped;
    }

    let mut last_error = PrefixError::NoToken;
    for candidate in trimmed
        .split(|c: char| !(c.is_ascii_digit() || c == '.' || c == '/'))
        .filter(|t| t.contains('.'))
    {
        match candidate.parse::<NetworkPrefix>() {
            Ok(prefix) => return LineKind::Prefix(prefix),
            Err(e) => last_error = e,
        }
    }
    LineKind::Rejected(last_error)
}

/// Parse feed content lazily into prefixes.
///
/// Each call starts a fresh pass over `content`.
pub fn parse_feed<'a>(content: &'a str, comment_markers: &'a str) -> FeedPrefixes<'a> {
    FeedPrefixes {
        lines: content.lines(),
        comment_markers,
        rejected: 0,
        skipped: 0,
    }
}

/// Lazy iterator over the valid prefixes of a feed body.
pub struct FeedPrefixes<'a> {
    lines: std::str::Lines<'a>,
    comment_markers: &'a str,
    rejected: usize,
    skipped: usize,
}

impl FeedPrefixes<'_> {
    /// Data lines dropped so far because no valid prefix was found.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Blank and comment lines seen so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Iterator for FeedPrefixes<'_> {
    type Item = NetworkPrefix;

    fn next(&mut self) -> Option<Self::Item> {
        for line in self.lines.by_ref() {
            match classify_line(line, self.comment_markers) {
                LineKind::Prefix(prefix) => return Some(prefix),
                LineKind::Skipped => self.skipped += 1,
                LineKind::Rejected(_) => self.rejected += 1,
            }
        }
        None
    }
}
