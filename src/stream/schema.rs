use std::fmt::{Display, Formatter};

use crate::error::{Error, Result};

/// First token of every header line.
pub const HEADER_MARKER: &str = "#rowpipe";

/// How "null" is rendered on the wire unless a filter overrides it.
pub const DEFAULT_EMPTY: &str = "-";

/// The field separator of a stream, selected by the single-letter code in
/// the header.
///
/// `Default` (no code in the header) splits on runs of whitespace when
/// reading and writes a single tab. The distinction between the
/// collapsing codes and the single-character ones matters for both
/// splitting and field-safing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// No code in the header: whitespace runs on read, one tab on write.
    Default,
    /// `D`: a single tab.
    Tab,
    /// `S`: a single space.
    Space,
    /// `s`: one or more spaces on read, a single space on write.
    Spaces,
    /// `t`: a literal tab.
    TabLiteral,
    /// `C`: a comma; line-based, no quoting.
    Comma,
    /// `W`: any whitespace run; read only, writes fall back to a tab.
    Whitespace,
}

impl Separator {
    pub fn from_code(code: &str) -> Result<Separator> {
        match code {
            "D" => Ok(Separator::Tab),
            "S" => Ok(Separator::Space),
            "s" => Ok(Separator::Spaces),
            "t" => Ok(Separator::TabLiteral),
            "C" => Ok(Separator::Comma),
            "W" => Ok(Separator::Whitespace),
            _ => Err(Error::Schema(format!("unknown separator code {:?}", code))),
        }
    }

    /// The code written back into a header, `None` for the default.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Separator::Default => None,
            Separator::Tab => Some("D"),
            Separator::Space => Some("S"),
            Separator::Spaces => Some("s"),
            Separator::TabLiteral => Some("t"),
            Separator::Comma => Some("C"),
            Separator::Whitespace => Some("W"),
        }
    }

    /// Split one body line into fields.
    pub fn split(&self, line: &str) -> Vec<String> {
        match self {
            Separator::Default | Separator::Whitespace => {
                line.split_whitespace().map(str::to_string).collect()
            }
            Separator::Spaces => line
                .split(' ')
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect(),
            Separator::Tab | Separator::TabLiteral => {
                line.split('\t').map(str::to_string).collect()
            }
            Separator::Space => line.split(' ').map(str::to_string).collect(),
            Separator::Comma => line.split(',').map(str::to_string).collect(),
        }
    }

    /// The character placed between fields on write.
    pub fn write_char(&self) -> char {
        match self {
            Separator::Default | Separator::Whitespace => '\t',
            Separator::Tab | Separator::TabLiteral => '\t',
            Separator::Space | Separator::Spaces => ' ',
            Separator::Comma => ',',
        }
    }

    /// Whether a character would break the framing of a written field.
    fn breaks_field(&self, c: char) -> bool {
        // newlines always break the line framing
        if c == '\n' || c == '\r' {
            return true;
        }
        match self {
            Separator::Default | Separator::Whitespace | Separator::Spaces => c.is_whitespace(),
            Separator::Tab | Separator::TabLiteral => c == '\t',
            Separator::Space => c == ' ',
            Separator::Comma => c == ',',
        }
    }

    /// Rewrite a field so it cannot collide with the separator: inner runs
    /// of separator characters become the empty token, and a field with no
    /// content at all is rendered as the empty token.
    pub fn safe_field(&self, field: &str, empty: &str) -> String {
        if field.is_empty() {
            return empty.to_string();
        }
        if !field.chars().any(|c| self.breaks_field(c)) {
            return field.to_string();
        }
        let mut out = String::with_capacity(field.len());
        let mut in_run = false;
        for c in field.chars() {
            if self.breaks_field(c) {
                if !in_run {
                    out.push_str(empty);
                    in_run = true;
                }
            } else {
                out.push(c);
                in_run = false;
            }
        }
        if out.is_empty() {
            empty.to_string()
        } else {
            out
        }
    }
}

impl Display for Separator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{}", code),
            None => write!(f, "default"),
        }
    }
}

/// The fixed shape of a stream: separator, ordered column names and the
/// empty-value token. Committed once and immutable afterwards; filters
/// share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Schema {
    separator: Separator,
    columns: Vec<String>,
    empty: String,
}

impl Schema {
    pub fn new<S: Into<String>>(separator: Separator, columns: Vec<S>) -> Result<Schema> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err(Error::Schema("header declares no columns".into()));
        }
        for (i, col) in columns.iter().enumerate() {
            if col.is_empty() || col.starts_with('#') {
                return Err(Error::Schema(format!("invalid column name {:?}", col)));
            }
            if columns[..i].contains(col) {
                return Err(Error::Schema(format!("duplicate column {:?}", col)));
            }
        }
        Ok(Schema {
            separator,
            columns,
            empty: DEFAULT_EMPTY.to_string(),
        })
    }

    /// Replace the empty-value token (what a null looks like on the wire).
    pub fn with_empty<S: Into<String>>(mut self, empty: S) -> Schema {
        self.empty = empty.into();
        self
    }

    /// Same columns and empty token, different separator.
    pub fn with_separator(mut self, separator: Separator) -> Schema {
        self.separator = separator;
        self
    }

    /// Parse a header line. Malformed headers are fatal.
    pub fn parse_header(line: &str) -> Result<Schema> {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some(HEADER_MARKER) => {}
            _ => {
                return Err(Error::Schema(format!(
                    "not a stream header (expected {:?}): {:?}",
                    HEADER_MARKER, line
                )))
            }
        }
        let mut tokens = tokens.peekable();
        let separator = if tokens.peek() == Some(&"-F") {
            tokens.next();
            let code = tokens
                .next()
                .ok_or_else(|| Error::Schema("-F with no separator code".into()))?;
            Separator::from_code(code)?
        } else {
            Separator::Default
        };
        Schema::new(separator, tokens.collect::<Vec<_>>())
    }

    /// Render the header line, without the trailing newline.
    pub fn header_line(&self) -> String {
        let mut line = String::from(HEADER_MARKER);
        if let Some(code) = self.separator.code() {
            line.push_str(" -F ");
            line.push_str(code);
        }
        for col in &self.columns {
            line.push(' ');
            line.push_str(col);
        }
        line
    }

    pub fn separator(&self) -> Separator {
        self.separator
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn empty(&self) -> &str {
        &self.empty
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Name → index, failing loudly on an unknown column.
    pub fn resolve(&self, name: &str) -> Result<usize> {
        self.index_of(name).ok_or_else(|| {
            Error::Schema(format!(
                "no column {:?} in stream ({})",
                name,
                self.columns.join(", ")
            ))
        })
    }

    /// Two streams may be merged or concatenated only when this holds:
    /// same separator code, same column names in the same order.
    pub fn compatible(&self, other: &Schema) -> bool {
        self.separator == other.separator && self.columns == other.columns
    }
}

impl Display for Schema {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.header_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_header() {
        let schema = Schema::parse_header("#rowpipe cid cname").unwrap();
        assert_eq!(schema.separator(), Separator::Default);
        assert_eq!(schema.columns(), ["cid", "cname"]);
    }

    #[test]
    fn test_parse_coded_header() {
        let schema = Schema::parse_header("#rowpipe -F t cid cname").unwrap();
        assert_eq!(schema.separator(), Separator::TabLiteral);
        assert_eq!(schema.header_line(), "#rowpipe -F t cid cname");
    }

    #[test]
    fn test_reject_malformed_headers() {
        assert!(Schema::parse_header("#fsdb cid").is_err());
        assert!(Schema::parse_header("cid cname").is_err());
        assert!(Schema::parse_header("#rowpipe").is_err());
        assert!(Schema::parse_header("#rowpipe -F").is_err());
        assert!(Schema::parse_header("#rowpipe -F X a").is_err());
        assert!(Schema::parse_header("#rowpipe a a").is_err());
    }

    #[test]
    fn test_split_collapsing() {
        let sep = Separator::Default;
        assert_eq!(sep.split("a  b\tc"), ["a", "b", "c"]);
    }

    #[test]
    fn test_split_single_char_keeps_empty_fields() {
        assert_eq!(Separator::Comma.split("a,,c"), ["a", "", "c"]);
        assert_eq!(Separator::Tab.split("a\t\tc"), ["a", "", "c"]);
    }

    #[test]
    fn test_safe_field() {
        assert_eq!(Separator::Default.safe_field("a b", "-"), "a-b");
        assert_eq!(Separator::Default.safe_field("a   b", "-"), "a-b");
        assert_eq!(Separator::Comma.safe_field("a,b", "-"), "a-b");
        assert_eq!(Separator::Comma.safe_field("a b", "-"), "a b");
        assert_eq!(Separator::Tab.safe_field("", "-"), "-");
        assert_eq!(Separator::Space.safe_field("a\nb", "-"), "a-b");
    }

    #[test]
    fn test_compatible() {
        let a = Schema::parse_header("#rowpipe -F t x y").unwrap();
        let b = Schema::parse_header("#rowpipe -F t x y").unwrap();
        let c = Schema::parse_header("#rowpipe x y").unwrap();
        let d = Schema::parse_header("#rowpipe -F t y x").unwrap();
        assert!(a.compatible(&b));
        assert!(!a.compatible(&c));
        assert!(!a.compatible(&d));
    }
}
