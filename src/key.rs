//! Key specifications: which columns order a stream, and how.
//!
//! A key spec is an ordered list of (column, comparator, direction). It
//! is written with column names and resolved to column indices once, at
//! filter setup; per-row comparisons then touch only integers.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use crate::error::{Error, Result};
use crate::stream::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lexical,
    Numeric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct KeyColumn {
    pub name: String,
    pub comparator: Comparator,
    pub direction: Direction,
}

/// An ordered list of key columns. Ties on the first column fall through
/// to the next, and full ties are left to the caller (sort and merge are
/// stable, so full ties keep input order).
#[derive(Debug, Clone, Default)]
pub struct KeySpec {
    columns: Vec<KeyColumn>,
}

impl KeySpec {
    pub fn new() -> KeySpec {
        KeySpec::default()
    }

    /// Append a column with explicit comparator and direction.
    pub fn column<S: Into<String>>(
        mut self,
        name: S,
        comparator: Comparator,
        direction: Direction,
    ) -> KeySpec {
        self.columns.push(KeyColumn {
            name: name.into(),
            comparator,
            direction,
        });
        self
    }

    /// Append a lexical ascending column.
    pub fn lexical<S: Into<String>>(self, name: S) -> KeySpec {
        self.column(name, Comparator::Lexical, Direction::Ascending)
    }

    /// Append a numeric ascending column.
    pub fn numeric<S: Into<String>>(self, name: S) -> KeySpec {
        self.column(name, Comparator::Numeric, Direction::Ascending)
    }

    /// Parse the command-line form: flags intersperse with column names
    /// and set the state applied to the columns that follow them.
    ///
    /// `-n` numeric, `-N` lexical, `-r` descending, `-R` ascending;
    /// flag letters may be clustered (`-nr cid` equals `-n -r cid`).
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<KeySpec> {
        let mut spec = KeySpec::new();
        let mut comparator = Comparator::Lexical;
        let mut direction = Direction::Ascending;
        for arg in args {
            let arg = arg.as_ref();
            if let Some(flags) = arg.strip_prefix('-') {
                if flags.is_empty() {
                    return Err(Error::Config("bare '-' in key specification".into()));
                }
                for flag in flags.chars() {
                    match flag {
                        'n' => comparator = Comparator::Numeric,
                        'N' => comparator = Comparator::Lexical,
                        'r' => direction = Direction::Descending,
                        'R' => direction = Direction::Ascending,
                        _ => {
                            return Err(Error::Config(format!(
                                "unknown key flag -{} in {:?}",
                                flag, arg
                            )))
                        }
                    }
                }
            } else {
                spec.columns.push(KeyColumn {
                    name: arg.to_string(),
                    comparator,
                    direction,
                });
            }
        }
        Ok(spec)
    }

    pub fn columns(&self) -> &[KeyColumn] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column names in key order.
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Resolve the column names against a schema.
    pub fn resolve(&self, schema: &Schema) -> Result<ResolvedKey> {
        if self.columns.is_empty() {
            return Err(Error::Config("empty key specification".into()));
        }
        let mut parts = Vec::with_capacity(self.columns.len());
        for col in &self.columns {
            parts.push(KeyPart {
                index: schema.resolve(&col.name)?,
                comparator: col.comparator,
                direction: col.direction,
            });
        }
        Ok(ResolvedKey { parts })
    }
}

impl Display for KeySpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            let cmp = match col.comparator {
                Comparator::Lexical => "",
                Comparator::Numeric => "-n ",
            };
            let dir = match col.direction {
                Direction::Ascending => "",
                Direction::Descending => "-r ",
            };
            write!(f, "{}{}{}", cmp, dir, col.name)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct KeyPart {
    index: usize,
    comparator: Comparator,
    direction: Direction,
}

/// A key spec bound to a schema: all per-row work is index-based.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    parts: Vec<KeyPart>,
}

impl ResolvedKey {
    /// Compare two rows under the key spec. Ties on a column fall
    /// through to the next; equality means every key column tied.
    pub fn compare(&self, a: &[String], b: &[String]) -> Ordering {
        for part in &self.parts {
            let fa = a[part.index].as_str();
            let fb = b[part.index].as_str();
            let ord = match part.comparator {
                Comparator::Lexical => fa.cmp(fb),
                Comparator::Numeric => numeric_cmp(fa, fb),
            };
            let ord = match part.direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// The key fields of a row, in key order.
    pub fn project<'r>(&self, row: &'r [String]) -> Vec<&'r str> {
        self.parts.iter().map(|p| row[p.index].as_str()).collect()
    }

    /// Compare two already-projected key tuples. Used when the two rows
    /// come from different schemas and carry the key at different
    /// positions (the join).
    pub fn compare_projected(&self, a: &[&str], b: &[&str]) -> Ordering {
        for (i, part) in self.parts.iter().enumerate() {
            let ord = match part.comparator {
                Comparator::Lexical => a[i].cmp(b[i]),
                Comparator::Numeric => numeric_cmp(a[i], b[i]),
            };
            let ord = match part.direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Column indices in key order.
    pub fn indices(&self) -> Vec<usize> {
        self.parts.iter().map(|p| p.index).collect()
    }
}

/// Numeric field comparison. Values that do not parse as numbers
/// (including the empty token) order before every number and compare
/// lexically among themselves; parsed numbers use total ordering.
fn numeric_cmp(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Separator;

    fn schema(cols: &[&str]) -> Schema {
        Schema::new(Separator::Default, cols.to_vec()).unwrap()
    }

    fn row(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_parse_interspersed_flags() {
        let spec = KeySpec::parse(&["-n", "cid", "-N", "-r", "cname"]).unwrap();
        assert_eq!(spec.columns()[0].comparator, Comparator::Numeric);
        assert_eq!(spec.columns()[0].direction, Direction::Ascending);
        assert_eq!(spec.columns()[1].comparator, Comparator::Lexical);
        assert_eq!(spec.columns()[1].direction, Direction::Descending);
    }

    #[test]
    fn test_parse_clustered_flags() {
        let spec = KeySpec::parse(&["-nr", "cid"]).unwrap();
        assert_eq!(spec.columns()[0].comparator, Comparator::Numeric);
        assert_eq!(spec.columns()[0].direction, Direction::Descending);
    }

    #[test]
    fn test_parse_rejects_unknown_flag() {
        assert!(KeySpec::parse(&["-x", "cid"]).is_err());
    }

    #[test]
    fn test_numeric_vs_lexical() {
        let s = schema(&["v"]);
        let lex = KeySpec::new().lexical("v").resolve(&s).unwrap();
        let num = KeySpec::new().numeric("v").resolve(&s).unwrap();
        assert_eq!(lex.compare(&row(&["10"]), &row(&["9"])), Ordering::Less);
        assert_eq!(num.compare(&row(&["10"]), &row(&["9"])), Ordering::Greater);
    }

    #[test]
    fn test_non_numbers_sort_before_numbers() {
        let s = schema(&["v"]);
        let num = KeySpec::new().numeric("v").resolve(&s).unwrap();
        assert_eq!(num.compare(&row(&["-"]), &row(&["-5"])), Ordering::Less);
        assert_eq!(num.compare(&row(&["a"]), &row(&["b"])), Ordering::Less);
    }

    #[test]
    fn test_descending_and_tie_breaking() {
        let s = schema(&["a", "b"]);
        let key = KeySpec::parse(&["a", "-r", "b"]).unwrap().resolve(&s).unwrap();
        assert_eq!(
            key.compare(&row(&["x", "1"]), &row(&["x", "2"])),
            Ordering::Greater
        );
        assert_eq!(
            key.compare(&row(&["x", "2"]), &row(&["y", "1"])),
            Ordering::Less
        );
        assert_eq!(
            key.compare(&row(&["x", "2"]), &row(&["x", "2"])),
            Ordering::Equal
        );
    }

    #[test]
    fn test_resolve_unknown_column() {
        let s = schema(&["a"]);
        assert!(KeySpec::new().lexical("zz").resolve(&s).is_err());
    }
}
