//! Parser for the Prometheus text exposition format (version 0.0.4).
//!
//! ```text
//! # HELP http_requests_total The total number of HTTP requests.
//! # TYPE http_requests_total counter
//! http_requests_total{method="post",code="200"} 1027 1395066363000
//! ```
//!
//! The parser is strict: one malformed line rejects the whole payload, so a
//! scrape is either fully understood or produces nothing.

use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::CharIndices;
use thiserror::Error;

/// Payload rejected, with the 1-based line that broke it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("line {line}: {reason}")]
pub struct ParseError {
    pub line: usize,
    pub reason: String,
}

impl ParseError {
    fn new(line: usize, reason: impl Into<String>) -> Self {
        Self { line, reason: reason.into() }
    }
}

/// Declared family type from a `# TYPE` line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    #[default]
    Untyped,
}

impl MetricType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "counter" => Some(Self::Counter),
            "gauge" => Some(Self::Gauge),
            "histogram" => Some(Self::Histogram),
            "summary" => Some(Self::Summary),
            "untyped" => Some(Self::Untyped),
            _ => None,
        }
    }
}

/// A single sample line
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    /// Optional timestamp from the payload, milliseconds
    pub timestamp: Option<i64>,
}

/// A named group of samples sharing HELP/TYPE metadata
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricFamily {
    pub name: String,
    pub help: Option<String>,
    pub metric_type: MetricType,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    fn named(name: &str) -> Self {
        Self { name: name.to_string(), ..Default::default() }
    }

    /// Whether a sample name belongs to this family (`foo`, `foo_bucket`, ...)
    fn owns(&self, sample_name: &str) -> bool {
        match sample_name.strip_prefix(self.name.as_str()) {
            Some("") => true,
            Some(suffix) => match self.metric_type {
                MetricType::Histogram => {
                    matches!(suffix, "_bucket" | "_sum" | "_count" | "_created")
                }
                MetricType::Summary => matches!(suffix, "_sum" | "_count" | "_created"),
                MetricType::Counter => matches!(suffix, "_total" | "_created"),
                _ => false,
            },
            None => false,
        }
    }
}

/// Parse a full exposition payload into metric families.
pub fn parse(text: &str) -> Result<Vec<MetricFamily>, ParseError> {
    let mut families: Vec<MetricFamily> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(comment) = line.strip_prefix('#') {
            parse_comment(comment, line_no, &mut families)?;
            continue;
        }

        let sample = parse_sample(line, line_no)?;
        match families.last_mut() {
            Some(family) if family.owns(&sample.name) => family.samples.push(sample),
            _ => {
                let mut family = MetricFamily::named(&sample.name);
                family.samples.push(sample);
                families.push(family);
            }
        }
    }

    Ok(families)
}

/// Total number of samples across families
pub fn sample_count(families: &[MetricFamily]) -> usize {
    families.iter().map(|f| f.samples.len()).sum()
}

fn parse_comment(
    comment: &str,
    line_no: usize,
    families: &mut Vec<MetricFamily>,
) -> Result<(), ParseError> {
    let mut parts = comment.trim_start().splitn(3, char::is_whitespace);
    let keyword = parts.next().unwrap_or("");
    if keyword != "HELP" && keyword != "TYPE" {
        // Free-form comment
        return Ok(());
    }

    let name = parts
        .next()
        .filter(|n| is_metric_name(n))
        .ok_or_else(|| ParseError::new(line_no, format!("{} without a valid metric name", keyword)))?;
    let rest = parts.next().unwrap_or("").trim();

    let reuse_last = matches!(families.last(), Some(f) if f.name == name && f.samples.is_empty());
    if !reuse_last {
        families.push(MetricFamily::named(name));
    }
    let last = families.len() - 1;
    let family = &mut families[last];

    if keyword == "HELP" {
        family.help = Some(unescape_help(rest));
    } else {
        family.metric_type = MetricType::parse(rest)
            .ok_or_else(|| ParseError::new(line_no, format!("unknown metric type '{}'", rest)))?;
    }
    Ok(())
}

fn parse_sample(line: &str, line_no: usize) -> Result<Sample, ParseError> {
    let mut cursor = Cursor { chars: line.char_indices().peekable(), src: line, line_no };

    let name = cursor.take_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':');
    if !is_metric_name(name) {
        return Err(ParseError::new(line_no, "expected a metric name"));
    }

    cursor.skip_whitespace();
    let labels = if cursor.peek() == Some('{') {
        cursor.next();
        cursor.parse_labels()?
    } else {
        BTreeMap::new()
    };

    let rest = cursor.remainder();
    let mut fields = rest.split_whitespace();
    let value_str = fields
        .next()
        .ok_or_else(|| ParseError::new(line_no, format!("missing value for '{}'", name)))?;
    let value = parse_value(value_str)
        .ok_or_else(|| ParseError::new(line_no, format!("invalid value '{}'", value_str)))?;

    let timestamp = match fields.next() {
        Some(ts) => parse_timestamp(ts)
            .ok_or_else(|| ParseError::new(line_no, format!("invalid timestamp '{}'", ts)))?,
        None => None,
    };

    if let Some(extra) = fields.next() {
        return Err(ParseError::new(line_no, format!("unexpected trailing token '{}'", extra)));
    }

    Ok(Sample { name: name.to_string(), labels, value, timestamp })
}

fn parse_value(s: &str) -> Option<f64> {
    match s {
        "NaN" => Some(f64::NAN),
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        _ => s.parse().ok(),
    }
}

/// Integer milliseconds, or any float literal truncated to one.
/// Non-finite timestamps carry no instant and are dropped.
fn parse_timestamp(s: &str) -> Option<Option<i64>> {
    if let Ok(ms) = s.parse::<i64>() {
        return Some(Some(ms));
    }
    let ms = parse_value(s)?;
    Some(ms.is_finite().then(|| ms as i64))
}

fn is_metric_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn is_label_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unescape_help(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

struct Cursor<'a> {
    chars: Peekable<CharIndices<'a>>,
    src: &'a str,
    line_no: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn next(&mut self) -> Option<char> {
        self.chars.next().map(|(_, c)| c)
    }

    fn offset(&mut self) -> usize {
        self.chars.peek().map(|&(i, _)| i).unwrap_or(self.src.len())
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.offset();
        while matches!(self.peek(), Some(c) if pred(c)) {
            self.next();
        }
        let end = self.offset();
        &self.src[start..end]
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.next();
        }
    }

    fn remainder(&mut self) -> &'a str {
        let start = self.offset();
        &self.src[start..]
    }

    fn error(&self, reason: impl Into<String>) -> ParseError {
        ParseError::new(self.line_no, reason)
    }

    /// Parse `name="value",...}` after the opening brace
    fn parse_labels(&mut self) -> Result<BTreeMap<String, String>, ParseError> {
        let mut labels = BTreeMap::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some('}') {
                self.next();
                return Ok(labels);
            }

            let name = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
            if !is_label_name(name) {
                return Err(self.error("expected a label name"));
            }
            self.skip_whitespace();
            if self.next() != Some('=') {
                return Err(self.error(format!("expected '=' after label '{}'", name)));
            }
            self.skip_whitespace();
            if self.next() != Some('"') {
                return Err(self.error(format!("expected quoted value for label '{}'", name)));
            }
            let value = self.parse_label_value()?;
            if labels.insert(name.to_string(), value).is_some() {
                return Err(self.error(format!("duplicate label '{}'", name)));
            }

            self.skip_whitespace();
            match self.next() {
                Some(',') => continue,
                Some('}') => return Ok(labels),
                _ => return Err(self.error("expected ',' or '}' in label set")),
            }
        }
    }

    fn parse_label_value(&mut self) -> Result<String, ParseError> {
        let mut value = String::new();
        loop {
            match self.next() {
                Some('"') => return Ok(value),
                Some('\\') => match self.next() {
                    Some('n') => value.push('\n'),
                    Some('"') => value.push('"'),
                    Some('\\') => value.push('\\'),
                    // Unknown escapes are kept verbatim
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return Err(self.error("unterminated label value")),
                },
                Some(c) => value.push(c),
                None => return Err(self.error("unterminated label value")),
            }
        }
    }
}
