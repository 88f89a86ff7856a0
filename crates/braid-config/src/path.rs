//! Nested field/index paths into a step's output.
//!
//! A path is written as dot-separated keys with bracketed list indices:
//!
//! ```text
//! fetch.items[0].owner.email
//! ^^^^^ ^^^^^ ^^^ ^^^^^ ^^^^^
//! step  key   idx key   key
//! ```
//!
//! When a path names a step output, the first segment is the source step id.

use serde::{Deserialize, Serialize};

/// A single segment of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
  /// Index into a JSON array.
  Index(usize),
  /// Key into a JSON object.
  Key(String),
}

impl std::fmt::Display for PathSegment {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      PathSegment::Index(i) => write!(f, "[{}]", i),
      PathSegment::Key(k) => write!(f, "{}", k),
    }
  }
}

/// Errors produced when parsing a path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
  #[error("path '{path}' contains an empty segment")]
  EmptySegment { path: String },

  #[error("path '{path}' has an unclosed '['")]
  UnclosedBracket { path: String },

  #[error("path '{path}' has an invalid index '{index}'")]
  InvalidIndex { path: String, index: String },

  #[error("path '{path}' has an unexpected '{character}' at position {position}")]
  UnexpectedCharacter {
    path: String,
    position: usize,
    character: char,
  },

  #[error("path '{path}' must start with a step id")]
  MissingSource { path: String },
}

/// Parse a path relative to some value (no leading step id).
///
/// An empty string is the empty path, which refers to the whole value.
pub fn parse_segments(input: &str) -> Result<Vec<PathSegment>, PathError> {
  let mut segments = Vec::new();
  let mut key = String::new();
  let mut after_index = false;
  let mut chars = input.char_indices().peekable();

  while let Some((position, c)) = chars.next() {
    match c {
      '.' => {
        if key.is_empty() && !after_index {
          return Err(PathError::EmptySegment {
            path: input.to_string(),
          });
        }
        if !key.is_empty() {
          segments.push(PathSegment::Key(std::mem::take(&mut key)));
        }
        after_index = false;
        if chars.peek().is_none() {
          return Err(PathError::EmptySegment {
            path: input.to_string(),
          });
        }
      }
      '[' => {
        if !key.is_empty() {
          segments.push(PathSegment::Key(std::mem::take(&mut key)));
        }
        let mut digits = String::new();
        loop {
          match chars.next() {
            Some((_, ']')) => break,
            Some((_, d)) => digits.push(d),
            None => {
              return Err(PathError::UnclosedBracket {
                path: input.to_string(),
              });
            }
          }
        }
        let index = digits
          .trim()
          .parse::<usize>()
          .map_err(|_| PathError::InvalidIndex {
            path: input.to_string(),
            index: digits.clone(),
          })?;
        segments.push(PathSegment::Index(index));
        after_index = true;
      }
      ']' => {
        return Err(PathError::UnexpectedCharacter {
          path: input.to_string(),
          position,
          character: c,
        });
      }
      _ => {
        if after_index {
          return Err(PathError::UnexpectedCharacter {
            path: input.to_string(),
            position,
            character: c,
          });
        }
        key.push(c);
      }
    }
  }

  if !key.is_empty() {
    segments.push(PathSegment::Key(key));
  }

  Ok(segments)
}

/// Parse a full path whose first segment is the source step id.
pub fn parse_path(input: &str) -> Result<(String, Vec<PathSegment>), PathError> {
  let mut segments = parse_segments(input)?;
  if segments.is_empty() {
    return Err(PathError::MissingSource {
      path: input.to_string(),
    });
  }
  match segments.remove(0) {
    PathSegment::Key(source) => Ok((source, segments)),
    PathSegment::Index(_) => Err(PathError::MissingSource {
      path: input.to_string(),
    }),
  }
}

/// Format a source step id and segments back into path syntax.
pub fn format_path(source: &str, segments: &[PathSegment]) -> String {
  let mut out = source.to_string();
  for segment in segments {
    match segment {
      PathSegment::Key(k) => {
        out.push('.');
        out.push_str(k);
      }
      PathSegment::Index(i) => out.push_str(&format!("[{}]", i)),
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_nested_path() {
    let (source, segments) = parse_path("fetch.items[0].owner.email").unwrap();
    assert_eq!(source, "fetch");
    assert_eq!(
      segments,
      vec![
        PathSegment::Key("items".to_string()),
        PathSegment::Index(0),
        PathSegment::Key("owner".to_string()),
        PathSegment::Key("email".to_string()),
      ]
    );
  }

  #[test]
  fn test_parse_source_only() {
    let (source, segments) = parse_path("fetch").unwrap();
    assert_eq!(source, "fetch");
    assert!(segments.is_empty());
  }

  #[test]
  fn test_parse_consecutive_indices() {
    let segments = parse_segments("matrix[1][2]").unwrap();
    assert_eq!(
      segments,
      vec![
        PathSegment::Key("matrix".to_string()),
        PathSegment::Index(1),
        PathSegment::Index(2),
      ]
    );
  }

  #[test]
  fn test_relative_path_may_start_with_index() {
    let segments = parse_segments("[3].name").unwrap();
    assert_eq!(
      segments,
      vec![PathSegment::Index(3), PathSegment::Key("name".to_string())]
    );
    assert!(parse_segments("").unwrap().is_empty());
  }

  #[test]
  fn test_empty_segments_rejected() {
    assert!(matches!(
      parse_path("a..b"),
      Err(PathError::EmptySegment { .. })
    ));
    assert!(matches!(
      parse_path(".a"),
      Err(PathError::EmptySegment { .. })
    ));
    assert!(matches!(
      parse_path("a."),
      Err(PathError::EmptySegment { .. })
    ));
  }

  #[test]
  fn test_bad_indices_rejected() {
    assert!(matches!(
      parse_path("a[x]"),
      Err(PathError::InvalidIndex { .. })
    ));
    assert!(matches!(
      parse_path("a[-1]"),
      Err(PathError::InvalidIndex { .. })
    ));
    assert!(matches!(
      parse_path("a[0"),
      Err(PathError::UnclosedBracket { .. })
    ));
    assert!(matches!(
      parse_path("a]"),
      Err(PathError::UnexpectedCharacter { .. })
    ));
    assert!(matches!(
      parse_path("a[0]b"),
      Err(PathError::UnexpectedCharacter { .. })
    ));
  }

  #[test]
  fn test_full_path_requires_source() {
    assert!(matches!(
      parse_path(""),
      Err(PathError::MissingSource { .. })
    ));
    assert!(matches!(
      parse_path("[0].a"),
      Err(PathError::MissingSource { .. })
    ));
  }

  #[test]
  fn test_format_path() {
    let (source, segments) = parse_path("fetch.items[0].name").unwrap();
    assert_eq!(format_path(&source, &segments), "fetch.items[0].name");
  }
}
