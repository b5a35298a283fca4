// ---------------------------------------------------------------------------
// Query text: parse free text into a tag or item query
// ---------------------------------------------------------------------------
//
// Rules, first match wins:
//   "a; b; Type:c"    - contains ';'      → tags, split on ';'
//   "apple fruit"     - no ':'            → tags, split on whitespace, each
//                                           prefixed with the default type
//   "Item:ItemA"      - leading "Item:"   → items
//   "Type:value"      - otherwise         → the whole text is one tag
//
// Keys are trimmed, empty keys dropped, duplicates collapsed.
// ---------------------------------------------------------------------------

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Tag type given to bare words.
pub const DEFAULT_TAG_TYPE: &str = "Word";

/// Prefix that turns a query into an item query.
pub const ITEM_PREFIX: &str = "Item:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
	Tags,
	Items,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedQuery {
	pub kind: QueryKind,
	pub keys: BTreeSet<String>,
}

impl ParsedQuery {
	pub fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}
}

/// Parse free text with the default `Word` tag type for bare words.
pub fn parse_query(text: &str) -> ParsedQuery {
	parse_query_with(text, DEFAULT_TAG_TYPE)
}

pub fn parse_query_with(text: &str, default_tag_type: &str) -> ParsedQuery {
	let (kind, parts): (QueryKind, Vec<&str>) = if text.contains(';') {
		(QueryKind::Tags, text.split(';').collect())
	} else if !text.contains(':') {
		let keys = text
			.split_whitespace()
			.map(|word| format!("{}:{}", default_tag_type, word))
			.collect();
		return ParsedQuery {
			kind: QueryKind::Tags,
			keys,
		};
	} else if let Some(item) = text.trim_start().strip_prefix(ITEM_PREFIX) {
		(QueryKind::Items, vec![item])
	} else {
		(QueryKind::Tags, vec![text])
	};

	let keys = parts
		.into_iter()
		.map(str::trim)
		.filter(|k| !k.is_empty())
		.map(str::to_string)
		.collect();
	ParsedQuery { kind, keys }
}

/// Display format for a ranked key: score to two decimals, then the key.
pub fn format_scored(key: &str, score: f64) -> String {
	format!("{:.2} : {}", score, key)
}
