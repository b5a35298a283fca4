// ---------------------------------------------------------------------------
// Tag: namespaced tag keys ("<Type>:<Value>")
// ---------------------------------------------------------------------------

use std::fmt;

/// Default separator between a tag type and its value.
pub const DEFAULT_TAG_SEPARATOR: char = ':';

/// A matrix row key. When typed, only the first separator splits, so the
/// value may itself contain the separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
	tag_type: Option<String>,
	value: String,
	sep: Separator,
}

/// Wrapper so the separator participates in `Display` but never in ordering
/// or equality.
#[derive(Debug, Clone, Copy)]
struct Separator(char);

impl Default for Separator {
	fn default() -> Self {
		Self(DEFAULT_TAG_SEPARATOR)
	}
}

impl PartialEq for Separator {
	fn eq(&self, _: &Self) -> bool {
		true
	}
}

impl Eq for Separator {}

impl std::hash::Hash for Separator {
	fn hash<H: std::hash::Hasher>(&self, _: &mut H) {}
}

impl PartialOrd for Separator {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Separator {
	fn cmp(&self, _: &Self) -> std::cmp::Ordering {
		std::cmp::Ordering::Equal
	}
}

/// How raw tag strings are turned into [`Tag`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagParser {
	pub types_from_prefixes: bool,
	pub separator: char,
}

impl Default for TagParser {
	fn default() -> Self {
		Self {
			types_from_prefixes: true,
			separator: DEFAULT_TAG_SEPARATOR,
		}
	}
}

impl TagParser {
	pub fn new(types_from_prefixes: bool, separator: char) -> Self {
		Self {
			types_from_prefixes,
			separator,
		}
	}

	pub fn parse(&self, raw: &str) -> Tag {
		if self.types_from_prefixes {
			if let Some((tag_type, value)) = raw.split_once(self.separator) {
				if !tag_type.is_empty() {
					return Tag::typed_with(tag_type, value, self.separator);
				}
			}
		}
		Tag::untyped(raw)
	}
}

impl Tag {
	pub fn typed(tag_type: impl Into<String>, value: impl Into<String>) -> Self {
		Self::typed_with(tag_type, value, DEFAULT_TAG_SEPARATOR)
	}

	pub fn typed_with(tag_type: impl Into<String>, value: impl Into<String>, sep: char) -> Self {
		Self {
			tag_type: Some(tag_type.into()),
			value: value.into(),
			sep: Separator(sep),
		}
	}

	pub fn untyped(value: impl Into<String>) -> Self {
		Self {
			tag_type: None,
			value: value.into(),
			sep: Separator::default(),
		}
	}

	pub fn tag_type(&self) -> Option<&str> {
		self.tag_type.as_deref()
	}

	pub fn value(&self) -> &str {
		&self.value
	}
}

impl fmt::Display for Tag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.tag_type {
			Some(t) => write!(f, "{}{}{}", t, self.sep.0, self.value),
			None => f.write_str(&self.value),
		}
	}
}
