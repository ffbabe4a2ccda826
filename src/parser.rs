//! Turns decoded telemetry lines into header updates or raw data fields.
//!
//! A line is treated as a header when it contains the header marker anywhere,
//! not only when it exactly matches a header pattern.
//! A data value containing the marker would be mistaken for a header.
//! The collector firmware never emits such values, and the check stays cheap.

/// The column name the collector firmware puts first in its header row.
pub const HEADER_MARKER: &str = "ts_ms";

/// The outcome of parsing one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// The device announced new column names (trimmed, in order).
    Header(Vec<String>),

    /// A row of raw, trimmed values.
    /// Not yet reconciled against any schema.
    Data(Vec<String>),

    /// Nothing but whitespace.
    Empty,
}

/// Classifies and splits lines.
#[derive(Debug, Clone)]
pub struct LineParser {
    marker: String,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new(HEADER_MARKER)
    }
}

impl LineParser {
    /// A parser which treats lines containing `marker` as headers.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Parse a single line.
    pub fn parse(&self, line: &str) -> ParsedLine {
        let line = line.trim();

        if line.is_empty() {
            return ParsedLine::Empty;
        }

        let fields = line
            .split(',')
            .map(|field| field.trim().to_owned())
            .collect();

        if line.contains(self.marker.as_str()) {
            ParsedLine::Header(fields)
        } else {
            ParsedLine::Data(fields)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn blank_lines_are_empty() {
        let parser = LineParser::default();

        assert_eq!(parser.parse(""), ParsedLine::Empty);
        assert_eq!(parser.parse("   \r"), ParsedLine::Empty);
    }

    #[test]
    fn header_line() {
        let parser = LineParser::default();

        assert_eq!(
            parser.parse("ts_ms, rpm ,status\r"),
            ParsedLine::Header(vec!["ts_ms".into(), "rpm".into(), "status".into()])
        );
    }

    #[test]
    fn marker_anywhere_means_header() {
        let parser = LineParser::default();

        assert!(matches!(
            parser.parse("device,ts_ms"),
            ParsedLine::Header(_)
        ));
    }

    #[test]
    fn data_line_fields_are_trimmed() {
        let parser = LineParser::default();

        assert_eq!(
            parser.parse(" 200, 9000 ,OK"),
            ParsedLine::Data(vec!["200".into(), "9000".into(), "OK".into()])
        );
    }

    #[test]
    fn data_keeps_empty_fields() {
        let parser = LineParser::default();

        assert_eq!(
            parser.parse("1,,3,"),
            ParsedLine::Data(vec!["1".into(), "".into(), "3".into(), "".into()])
        );
    }

    #[test]
    fn custom_marker() {
        let parser = LineParser::new("time");

        assert!(matches!(parser.parse("time,rpm"), ParsedLine::Header(_)));
        assert!(matches!(parser.parse("ts_ms,rpm"), ParsedLine::Data(_)));
    }

    #[test]
    fn replacement_characters_are_plain_data() {
        match LineParser::default().parse("1,\u{FFFD}(,3") {
            ParsedLine::Data(fields) => {
                assert_eq!(fields.len(), 3);
                assert_eq!(fields[1], "\u{FFFD}(");
                assert_eq!(fields[2], "3");
            }
            other => panic!("Expected data, got {other:?}"),
        }
    }
}
