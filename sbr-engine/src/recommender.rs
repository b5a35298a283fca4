// ---------------------------------------------------------------------------
// Recommender: streams blending over a MatrixStore + InverseIndex
// ---------------------------------------------------------------------------
//
// Blend function (additive weighted sum):
//
//   score(item) = sum over query tags t of  q(t) * w_type(t) * M[t, item]
//
// where q(t) is the query weight of t (1.0 for plain tag sets), w_type is the
// configured weight of t's tag type (default 1.0) and M is the matrix.
// Item-based queries first sum the queried items' own tag profiles and feed
// that profile through the same blend.
//
// Results are ordered by descending score, ties broken by ascending key.
// ---------------------------------------------------------------------------

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LoadError, SbrError};
use crate::inverse_index::InverseIndex;
use crate::matrix::{LoadOptions, MatrixStore, SourceFormat};
use crate::tag::Tag;

/// Default cap on the number of query keys blended per call.
pub const DEFAULT_MAX_QUERY_KEYS: usize = 1000;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A ranked key (item or tag) and its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scored {
	pub key: String,
	pub score: f64,
}

impl Scored {
	/// Display label, e.g. `"1.50 : ItemA"`.
	pub fn label(&self) -> String {
		crate::query::format_scored(&self.key, self.score)
	}
}

/// Post-processing applied to recommendation scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
	/// Raw blended sums.
	#[default]
	None,
	/// Divide every score by the top score.
	Max,
}

impl FromStr for Normalization {
	type Err = SbrError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"none" => Ok(Self::None),
			"max" => Ok(Self::Max),
			other => Err(SbrError::InvalidParams(format!(
				"unknown normalization '{}'",
				other
			))),
		}
	}
}

#[derive(Debug, Clone)]
pub struct BlendOptions {
	/// Per tag-type multipliers; types not listed use `default_type_weight`.
	pub tag_type_weights: HashMap<String, f64>,
	pub default_type_weight: f64,
	pub normalization: Normalization,
	pub max_query_keys: usize,
}

impl Default for BlendOptions {
	fn default() -> Self {
		Self {
			tag_type_weights: HashMap::new(),
			default_type_weight: 1.0,
			normalization: Normalization::None,
			max_query_keys: DEFAULT_MAX_QUERY_KEYS,
		}
	}
}

impl BlendOptions {
	fn type_weight(&self, tag: &Tag) -> f64 {
		tag.tag_type()
			.and_then(|t| self.tag_type_weights.get(t))
			.copied()
			.unwrap_or(self.default_type_weight)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommenderStats {
	pub tags: usize,
	pub items: usize,
	pub entries: usize,
	pub tag_types: Vec<String>,
}

// ---------------------------------------------------------------------------
// Recommender
// ---------------------------------------------------------------------------

/// Immutable query engine; share it behind an `Arc` across threads.
#[derive(Debug)]
pub struct Recommender {
	matrix: MatrixStore,
	index: InverseIndex,
	blend: BlendOptions,
}

impl Recommender {
	pub fn new(matrix: MatrixStore, blend: BlendOptions) -> Self {
		let index = InverseIndex::build(&matrix);
		Self {
			matrix,
			index,
			blend,
		}
	}

	/// Load a matrix file and build its indexes.
	pub fn load(
		path: &Path,
		format: Option<SourceFormat>,
		options: &LoadOptions,
		blend: BlendOptions,
	) -> Result<Self, LoadError> {
		let matrix = MatrixStore::load(path, format, options)?;
		Ok(Self::new(matrix, blend))
	}

	pub fn index(&self) -> &InverseIndex {
		&self.index
	}

	pub fn is_known_tag(&self, tag: &str) -> bool {
		self.matrix.resolve(tag).is_some()
	}

	pub fn is_known_item(&self, item: &str) -> bool {
		self.index.contains_item(item)
	}

	pub fn stats(&self) -> RecommenderStats {
		RecommenderStats {
			tags: self.index.tag_count(),
			items: self.index.item_count(),
			entries: self.matrix.entry_count(),
			tag_types: self.index.tag_types().map(str::to_string).collect(),
		}
	}

	// -- Queries ---------------------------------------------------------------

	/// Top `n` items for a set of tags, each weighted 1.0.
	pub fn recommend_by_profile<I, S>(&self, tags: I, n: usize) -> Vec<Scored>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let profile: BTreeMap<String, f64> = tags
			.into_iter()
			.map(|t| (t.as_ref().to_string(), 1.0))
			.collect();
		self.recommend_by_weighted_profile(&profile, n)
	}

	/// Top `n` items for a `tag -> weight` profile.
	pub fn recommend_by_weighted_profile(
		&self,
		profile: &BTreeMap<String, f64>,
		n: usize,
	) -> Vec<Scored> {
		if n == 0 || profile.is_empty() {
			return Vec::new();
		}
		let resolved: BTreeMap<&Tag, f64> = self
			.cap(profile.iter(), "tags")
			.filter(|(_, w)| w.is_finite())
			.filter_map(|(raw, w)| self.matrix.resolve(raw).map(|tag| (tag, *w)))
			.collect();

		let scores = self.blend(&resolved);
		tracing::debug!(
			query_tags = profile.len(),
			known_tags = resolved.len(),
			scored = scores.len(),
			n,
			"recommend_by_profile"
		);
		rank(scores, n, self.blend.normalization)
	}

	/// Top `n` items for a set of items, excluding the queried items.
	pub fn recommend<I, S>(&self, items: I, n: usize) -> Vec<Scored>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		self.recommend_with(items, n, true)
	}

	/// Like [`recommend`](Self::recommend); `remove_history = false` keeps the
	/// queried items in the result.
	pub fn recommend_with<I, S>(&self, items: I, n: usize, remove_history: bool) -> Vec<Scored>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let items: BTreeSet<String> = items.into_iter().map(|i| i.as_ref().to_string()).collect();
		if n == 0 || items.is_empty() {
			return Vec::new();
		}
		let profile = self.item_profile(&items);
		let mut scores = self.blend(&profile);
		if remove_history {
			for item in &items {
				scores.remove(item);
			}
		}
		tracing::debug!(
			query_items = items.len(),
			profile_tags = profile.len(),
			scored = scores.len(),
			n,
			remove_history,
			"recommend"
		);
		rank(scores, n, self.blend.normalization)
	}

	/// Summed tag weights of `items`, heaviest first.
	pub fn profile<I, S>(&self, items: I) -> Vec<Scored>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		self.profile_top(items, usize::MAX)
	}

	/// The `n` heaviest tags of the summed profile of `items`.
	pub fn profile_top<I, S>(&self, items: I, n: usize) -> Vec<Scored>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let items: BTreeSet<String> = items.into_iter().map(|i| i.as_ref().to_string()).collect();
		if n == 0 || items.is_empty() {
			return Vec::new();
		}
		let scores: HashMap<String, f64> = self
			.item_profile(&items)
			.into_iter()
			.map(|(tag, w)| (tag.to_string(), w))
			.collect();
		rank(scores, n, Normalization::None)
	}

	// -- Internals -------------------------------------------------------------

	/// Keep at most `max_query_keys` entries, in iteration order.
	fn cap<I: ExactSizeIterator>(&self, keys: I, what: &'static str) -> std::iter::Take<I> {
		let limit = self.blend.max_query_keys;
		if keys.len() > limit {
			tracing::warn!(requested = keys.len(), limit, what, "Query truncated");
		}
		keys.take(limit)
	}

	fn item_profile(&self, items: &BTreeSet<String>) -> BTreeMap<&Tag, f64> {
		let mut profile: BTreeMap<&Tag, f64> = BTreeMap::new();
		for item in self.cap(items.iter(), "items") {
			let Some(tags) = self.index.tags_for(item) else {
				continue;
			};
			for tag in tags {
				*profile.entry(tag).or_insert(0.0) += self.matrix.weight(tag, item);
			}
		}
		profile
	}

	fn blend(&self, profile: &BTreeMap<&Tag, f64>) -> HashMap<String, f64> {
		let mut scores: HashMap<String, f64> = HashMap::new();
		for (tag, query_weight) in profile {
			let factor = query_weight * self.blend.type_weight(tag);
			if factor == 0.0 {
				continue;
			}
			let Some(row) = self.matrix.row(tag) else {
				continue;
			};
			for (item, weight) in row {
				*scores.entry(item.clone()).or_insert(0.0) += factor * weight;
			}
		}
		scores
	}
}

/// Drop non-positive scores, order by score desc then key asc, keep `n`.
fn rank(scores: HashMap<String, f64>, n: usize, normalization: Normalization) -> Vec<Scored> {
	let mut ranked: Vec<Scored> = scores
		.into_iter()
		.filter(|(_, score)| *score > 0.0)
		.map(|(key, score)| Scored { key, score })
		.collect();
	ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
	ranked.truncate(n);

	if normalization == Normalization::Max {
		if let Some(top) = ranked.first().map(|s| s.score) {
			for s in &mut ranked {
				s.score /= top;
			}
		}
	}
	ranked
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
