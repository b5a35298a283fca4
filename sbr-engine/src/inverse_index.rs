// ---------------------------------------------------------------------------
// Inverse Index: tag -> items, item -> tags, tag type -> tags
// ---------------------------------------------------------------------------
//
// Built in one pass over the non-zero entries of a MatrixStore. Ordered sets
// keep every traversal deterministic.
// ---------------------------------------------------------------------------

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::matrix::MatrixStore;
use crate::tag::Tag;

/// Adjacency sets derived from a [`MatrixStore`]. Never mutated after build.
#[derive(Debug, Default)]
pub struct InverseIndex {
	/// tag -> items with a non-zero weight
	tag_items: HashMap<Tag, BTreeSet<String>>,
	/// item -> tags with a non-zero weight
	item_tags: HashMap<String, BTreeSet<Tag>>,
	/// tag type -> tags of that type
	type_tags: BTreeMap<String, BTreeSet<Tag>>,
}

impl InverseIndex {
	pub fn build(matrix: &MatrixStore) -> Self {
		let mut index = Self::default();
		for (tag, item, _) in matrix.entries() {
			index
				.tag_items
				.entry(tag.clone())
				.or_default()
				.insert(item.to_string());
			index
				.item_tags
				.entry(item.to_string())
				.or_default()
				.insert(tag.clone());
			if let Some(tag_type) = tag.tag_type() {
				index
					.type_tags
					.entry(tag_type.to_string())
					.or_default()
					.insert(tag.clone());
			}
		}
		tracing::debug!(
			tags = index.tag_items.len(),
			items = index.item_tags.len(),
			tag_types = index.type_tags.len(),
			"Inverse index built"
		);
		index
	}

	/// Items associated with `tag`, if the tag is known.
	pub fn items_for(&self, tag: &Tag) -> Option<&BTreeSet<String>> {
		self.tag_items.get(tag)
	}

	/// Tags associated with `item`, if the item is known.
	pub fn tags_for(&self, item: &str) -> Option<&BTreeSet<Tag>> {
		self.item_tags.get(item)
	}

	pub fn tags_of_type(&self, tag_type: &str) -> Option<&BTreeSet<Tag>> {
		self.type_tags.get(tag_type)
	}

	pub fn tag_types(&self) -> impl Iterator<Item = &str> {
		self.type_tags.keys().map(String::as_str)
	}

	pub fn contains_item(&self, item: &str) -> bool {
		self.item_tags.contains_key(item)
	}

	pub fn tag_count(&self) -> usize {
		self.tag_items.len()
	}

	pub fn item_count(&self) -> usize {
		self.item_tags.len()
	}
}
