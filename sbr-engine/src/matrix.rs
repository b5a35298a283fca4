// ---------------------------------------------------------------------------
// Matrix Store: sparse tag x item association weights
// ---------------------------------------------------------------------------
//
// Sources:
//   JSON column dictionaries   { "<tag>": { "<item>": weight, ... }, ... }
//   CSV triples                tag,item,weight
//   CSV typed rows             Item,TagType,Value,Weight   (header required)
//
// Either may be gzip-compressed; compression is detected from the magic
// bytes rather than the file name.
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::tag::{Tag, TagParser};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
	Json,
	Csv,
}

impl SourceFormat {
	/// Infer the format from a file name, ignoring a trailing `.gz`.
	pub fn from_path(path: &Path) -> Result<Self, LoadError> {
		let name = path
			.file_name()
			.and_then(|n| n.to_str())
			.unwrap_or_default()
			.to_ascii_lowercase();
		let name = name.strip_suffix(".gz").unwrap_or(&name);
		match name.rsplit_once('.') {
			Some((_, ext)) => ext.parse(),
			None => Err(LoadError::UnsupportedFormat(path.display().to_string())),
		}
	}
}

impl FromStr for SourceFormat {
	type Err = LoadError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"json" => Ok(Self::Json),
			"csv" => Ok(Self::Csv),
			other => Err(LoadError::UnsupportedFormat(other.to_string())),
		}
	}
}

/// Parsing knobs shared by every source format.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
	pub tag_parser: TagParser,
	/// CSV field delimiter.
	pub csv_delimiter: u8,
}

impl Default for LoadOptions {
	fn default() -> Self {
		Self {
			tag_parser: TagParser::default(),
			csv_delimiter: b',',
		}
	}
}

// ---------------------------------------------------------------------------
// MatrixStore
// ---------------------------------------------------------------------------

/// Read-only sparse matrix. Rows are tags, columns are items; only non-zero
/// weights are stored.
#[derive(Debug, Default)]
pub struct MatrixStore {
	rows: HashMap<Tag, HashMap<String, f64>>,
	/// display string -> tag, so lookups do not depend on how tags were typed
	by_name: HashMap<String, Tag>,
	entry_count: usize,
}

impl MatrixStore {
	/// Build a store from `(tag, item, weight)` entries.
	///
	/// Later entries for the same pair overwrite earlier ones, a zero weight
	/// removes the pair, and negative or non-finite weights are rejected.
	pub fn from_entries<I>(entries: I) -> Result<Self, LoadError>
	where
		I: IntoIterator<Item = (Tag, String, f64)>,
	{
		let mut rows: HashMap<Tag, HashMap<String, f64>> = HashMap::new();
		for (tag, item, weight) in entries {
			if !weight.is_finite() || weight < 0.0 {
				return Err(LoadError::InvalidWeight {
					tag: tag.to_string(),
					item,
					weight,
				});
			}
			let row = rows.entry(tag).or_default();
			if weight == 0.0 {
				row.remove(&item);
			} else if let Some(previous) = row.insert(item, weight) {
				tracing::warn!(previous, weight, "Overwrote repeated matrix entry");
			}
		}
		rows.retain(|_, row| !row.is_empty());

		let entry_count: usize = rows.values().map(HashMap::len).sum();
		if entry_count == 0 {
			return Err(LoadError::Empty);
		}
		// Display strings must stay unique, or lookups would depend on map order.
		let mut by_name: HashMap<String, Tag> = HashMap::with_capacity(rows.len());
		for tag in rows.keys() {
			let name = tag.to_string();
			if by_name.insert(name.clone(), tag.clone()).is_some() {
				return Err(LoadError::InvalidFormat(format!(
					"tag '{}' is defined more than once with different types",
					name
				)));
			}
		}

		Ok(Self {
			rows,
			by_name,
			entry_count,
		})
	}

	/// Load a matrix file. The format is inferred from the extension unless
	/// given.
	pub fn load(
		path: &Path,
		format: Option<SourceFormat>,
		options: &LoadOptions,
	) -> Result<Self, LoadError> {
		let format = match format {
			Some(f) => f,
			None => SourceFormat::from_path(path)?,
		};
		let bytes = std::fs::read(path)?;
		let store = Self::from_bytes(&bytes, format, options)?;
		tracing::info!(
			path = %path.display(),
			?format,
			tags = store.tag_count(),
			entries = store.entry_count(),
			"Matrix loaded"
		);
		Ok(store)
	}

	/// Parse an in-memory source, gunzipping it first when needed.
	pub fn from_bytes(
		bytes: &[u8],
		format: SourceFormat,
		options: &LoadOptions,
	) -> Result<Self, LoadError> {
		if is_gzipped(bytes) {
			let mut decoded = Vec::new();
			GzDecoder::new(bytes).read_to_end(&mut decoded)?;
			return Self::from_bytes(&decoded, format, options);
		}
		match format {
			SourceFormat::Json => Self::from_json_slice(bytes, options),
			SourceFormat::Csv => Self::from_csv_reader(bytes, options),
		}
	}

	pub fn from_json_slice(bytes: &[u8], options: &LoadOptions) -> Result<Self, LoadError> {
		let columns: HashMap<String, HashMap<String, f64>> = serde_json::from_slice(bytes)?;
		let parser = options.tag_parser;
		Self::from_entries(columns.into_iter().flat_map(|(raw_tag, column)| {
			let tag = parser.parse(&raw_tag);
			column
				.into_iter()
				.map(move |(item, weight)| (tag.clone(), item, weight))
		}))
	}

	pub fn from_csv_reader<R: Read>(reader: R, options: &LoadOptions) -> Result<Self, LoadError> {
		let mut csv_reader = csv::ReaderBuilder::new()
			.has_headers(false)
			.delimiter(options.csv_delimiter)
			.trim(csv::Trim::All)
			.from_reader(reader);

		let mut records = csv_reader.records();
		let first = match records.next() {
			Some(r) => r?,
			None => return Err(LoadError::Empty),
		};
		let (layout, first_is_data) = CsvLayout::detect(&first)?;

		let mut entries = Vec::new();
		if first_is_data {
			entries.push(layout.entry(&first, options)?);
		}
		for record in records {
			entries.push(layout.entry(&record?, options)?);
		}
		Self::from_entries(entries)
	}

	// -- Lookups ---------------------------------------------------------------

	/// Resolve a tag by its display string.
	pub fn resolve(&self, raw: &str) -> Option<&Tag> {
		self.by_name.get(raw)
	}

	/// The item vector of a tag.
	pub fn row(&self, tag: &Tag) -> Option<&HashMap<String, f64>> {
		self.rows.get(tag)
	}

	/// Weight of a (tag, item) pair; zero when absent.
	pub fn weight(&self, tag: &Tag, item: &str) -> f64 {
		self.rows
			.get(tag)
			.and_then(|row| row.get(item))
			.copied()
			.unwrap_or(0.0)
	}

	pub fn entries(&self) -> impl Iterator<Item = (&Tag, &str, f64)> {
		self.rows.iter().flat_map(|(tag, row)| {
			row.iter().map(move |(item, w)| (tag, item.as_str(), *w))
		})
	}

	pub fn tag_count(&self) -> usize {
		self.rows.len()
	}

	pub fn entry_count(&self) -> usize {
		self.entry_count
	}
}

/// Check if data starts with gzip magic bytes (0x1f, 0x8b).
pub fn is_gzipped(data: &[u8]) -> bool {
	data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

// ---------------------------------------------------------------------------
// CSV layouts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsvLayout {
	Triples {
		tag: usize,
		item: usize,
		weight: usize,
	},
	Typed {
		item: usize,
		tag_type: usize,
		value: usize,
		weight: usize,
	},
}

impl CsvLayout {
	/// Work out the column layout from the first record. Returns whether that
	/// record is data (no header) as well.
	fn detect(first: &csv::StringRecord) -> Result<(Self, bool), LoadError> {
		let last = first.len().saturating_sub(1);
		let is_data = first.get(last).is_some_and(|w| w.parse::<f64>().is_ok());

		if is_data {
			return match first.len() {
				3 => Ok((
					Self::Triples {
						tag: 0,
						item: 1,
						weight: 2,
					},
					true,
				)),
				4 => Ok((
					Self::Typed {
						item: 0,
						tag_type: 1,
						value: 2,
						weight: 3,
					},
					true,
				)),
				n => Err(LoadError::InvalidFormat(format!(
					"expected 3 or 4 CSV columns, found {}",
					n
				))),
			};
		}

		let column = |name: &str| first.iter().position(|h| h.eq_ignore_ascii_case(name));
		let required = |name: &str| {
			column(name).ok_or_else(|| LoadError::MissingField {
				field: name.to_string(),
				line: 1,
			})
		};

		let layout = if column("tagtype").is_some() && column("value").is_some() {
			Self::Typed {
				item: required("item")?,
				tag_type: required("tagtype")?,
				value: required("value")?,
				weight: required("weight")?,
			}
		} else {
			Self::Triples {
				tag: required("tag")?,
				item: required("item")?,
				weight: required("weight")?,
			}
		};
		Ok((layout, false))
	}

	fn entry(
		&self,
		record: &csv::StringRecord,
		options: &LoadOptions,
	) -> Result<(Tag, String, f64), LoadError> {
		let line = record.position().map_or(0, |p| p.line());
		let field = |idx: usize, name: &'static str| required_field(record, idx, name, line);

		let (tag, item, raw_weight) = match *self {
			Self::Triples { tag, item, weight } => (
				options.tag_parser.parse(field(tag, "tag")?),
				field(item, "item")?,
				field(weight, "weight")?,
			),
			Self::Typed {
				item,
				tag_type,
				value,
				weight,
			} => {
				let value = field(value, "value")?;
				let tag = match record.get(tag_type) {
					Some(t) if !t.is_empty() => {
						Tag::typed_with(t, value, options.tag_parser.separator)
					}
					_ => Tag::untyped(value),
				};
				(tag, field(item, "item")?, field(weight, "weight")?)
			}
		};

		let weight = raw_weight.parse::<f64>().map_err(|_| {
			LoadError::InvalidFormat(format!("line {}: invalid weight '{}'", line, raw_weight))
		})?;
		Ok((tag, item.to_string(), weight))
	}
}

fn required_field<'r>(
	record: &'r csv::StringRecord,
	idx: usize,
	name: &str,
	line: u64,
) -> Result<&'r str, LoadError> {
	match record.get(idx) {
		Some(v) if !v.is_empty() => Ok(v),
		_ => Err(LoadError::MissingField {
			field: name.to_string(),
			line,
		}),
	}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
