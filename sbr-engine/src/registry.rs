// ---------------------------------------------------------------------------
// RecommenderRegistry: one lazily loaded Recommender per data source
// ---------------------------------------------------------------------------
//
// The map lock is only held long enough to fetch a per-source slot; the
// blocking load happens under that slot's own lock, so a source loads at most
// once and loading one source never stalls queries against another.
// Failed loads are not cached.
// ---------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::error::{LoadError, SbrError};
use crate::matrix::{LoadOptions, SourceFormat};
use crate::recommender::{BlendOptions, Recommender};

/// Bundle file suffixes, in lookup order.
const JSON_SUFFIX: &str = "-SMRMatrixColumnDictionaries.json";
const CSV_SUFFIX: &str = "-dfSMRMatrix.csv";

// ---------------------------------------------------------------------------
// SourceSpec
// ---------------------------------------------------------------------------

/// Where a named data source lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSpec {
	pub name: String,
	pub path: PathBuf,
	pub format: SourceFormat,
}

impl SourceSpec {
	pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self, LoadError> {
		let path = path.into();
		let format = SourceFormat::from_path(&path)?;
		Ok(Self {
			name: name.into(),
			path,
			format,
		})
	}

	/// Find `<name>-SMRMatrixColumnDictionaries.json` or `<name>-dfSMRMatrix.csv`
	/// (optionally gzipped) under `dir`.
	pub fn resolve(dir: &Path, name: &str) -> Result<Self, SbrError> {
		for suffix in [JSON_SUFFIX, CSV_SUFFIX] {
			for ext in ["", ".gz"] {
				let path = dir.join(format!("{}{}{}", name, suffix, ext));
				if path.is_file() {
					return Ok(Self::new(name, path)?);
				}
			}
		}
		Err(SbrError::UnknownSource(name.to_string()))
	}

	/// Parse `name=path`, or a bare name resolved under `dir`.
	pub fn parse(spec: &str, dir: &Path) -> Result<Self, SbrError> {
		match spec.split_once('=') {
			Some((name, path)) => Ok(Self::new(name.trim(), dir.join(path.trim()))?),
			None => Self::resolve(dir, spec.trim()),
		}
	}
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type Slot = Arc<Mutex<Option<Arc<Recommender>>>>;

struct Entry {
	spec: Option<SourceSpec>,
	slot: Slot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub path: Option<PathBuf>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub format: Option<SourceFormat>,
	pub loaded: bool,
}

pub struct RecommenderRegistry {
	entries: Mutex<BTreeMap<String, Entry>>,
	load_options: LoadOptions,
	blend: BlendOptions,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
	m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecommenderRegistry {
	pub fn new(load_options: LoadOptions, blend: BlendOptions) -> Self {
		Self {
			entries: Mutex::new(BTreeMap::new()),
			load_options,
			blend,
		}
	}

	/// Register a source to be loaded on first use. Replaces any previous
	/// registration (and its loaded recommender) under the same name.
	pub fn register(&self, spec: SourceSpec) {
		let name = spec.name.clone();
		lock(&self.entries).insert(
			name,
			Entry {
				spec: Some(spec),
				slot: Slot::default(),
			},
		);
	}

	/// Register an already built recommender.
	pub fn insert(&self, name: impl Into<String>, recommender: Recommender) -> Arc<Recommender> {
		let recommender = Arc::new(recommender);
		lock(&self.entries).insert(
			name.into(),
			Entry {
				spec: None,
				slot: Arc::new(Mutex::new(Some(Arc::clone(&recommender)))),
			},
		);
		recommender
	}

	/// The recommender for `name`, loading it on first access.
	pub fn get_or_load(&self, name: &str) -> Result<Arc<Recommender>, SbrError> {
		let (spec, slot) = {
			let entries = lock(&self.entries);
			let entry = entries
				.get(name)
				.ok_or_else(|| SbrError::UnknownSource(name.to_string()))?;
			(entry.spec.clone(), Arc::clone(&entry.slot))
		};

		let mut loaded = lock(&slot);
		if let Some(rec) = loaded.as_ref() {
			return Ok(Arc::clone(rec));
		}
		let spec = spec.ok_or_else(|| SbrError::UnknownSource(name.to_string()))?;
		let rec = Arc::new(self.load(&spec)?);
		*loaded = Some(Arc::clone(&rec));
		Ok(rec)
	}

	/// Build a fresh recommender for `name` and swap it in. Queries holding
	/// the previous instance keep using it.
	pub fn reload(&self, name: &str) -> Result<Arc<Recommender>, SbrError> {
		let (spec, slot) = {
			let entries = lock(&self.entries);
			let entry = entries
				.get(name)
				.ok_or_else(|| SbrError::UnknownSource(name.to_string()))?;
			(entry.spec.clone(), Arc::clone(&entry.slot))
		};
		let spec = spec.ok_or_else(|| SbrError::UnknownSource(name.to_string()))?;
		let rec = Arc::new(self.load(&spec)?);
		*lock(&slot) = Some(Arc::clone(&rec));
		Ok(rec)
	}

	/// The recommender for `name` if it has been loaded already.
	pub fn get(&self, name: &str) -> Option<Arc<Recommender>> {
		let slot = {
			let entries = lock(&self.entries);
			Arc::clone(&entries.get(name)?.slot)
		};
		let loaded = lock(&slot);
		loaded.as_ref().map(Arc::clone)
	}

	pub fn is_loaded(&self, name: &str) -> bool {
		self.get(name).is_some()
	}

	pub fn names(&self) -> Vec<String> {
		lock(&self.entries).keys().cloned().collect()
	}

	pub fn sources(&self) -> Vec<SourceStatus> {
		let snapshot: Vec<(String, Option<SourceSpec>, Slot)> = lock(&self.entries)
			.iter()
			.map(|(name, e)| (name.clone(), e.spec.clone(), Arc::clone(&e.slot)))
			.collect();
		snapshot
			.into_iter()
			.map(|(name, spec, slot)| SourceStatus {
				name,
				path: spec.as_ref().map(|s| s.path.clone()),
				format: spec.as_ref().map(|s| s.format),
				// A slot busy loading is reported as not loaded.
				loaded: slot.try_lock().map(|s| s.is_some()).unwrap_or(false),
			})
			.collect()
	}

	fn load(&self, spec: &SourceSpec) -> Result<Recommender, SbrError> {
		tracing::info!(source = %spec.name, path = %spec.path.display(), "Loading recommender");
		let rec = Recommender::load(
			&spec.path,
			Some(spec.format),
			&self.load_options,
			self.blend.clone(),
		)
		.inspect_err(|e| tracing::error!(source = %spec.name, error = %e, "Load failed"))?;
		let stats = rec.stats();
		tracing::info!(
			source = %spec.name,
			tags = stats.tags,
			items = stats.items,
			entries = stats.entries,
			"Recommender ready"
		);
		Ok(rec)
	}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::matrix::MatrixStore;

	const FRUIT_JSON: &str =
		r#"{"Word:apple": {"ItemA": 1.0, "ItemB": 0.5}, "Word:fruit": {"ItemA": 0.5, "ItemC": 1.0}}"#;

	fn registry() -> RecommenderRegistry {
		RecommenderRegistry::new(LoadOptions::default(), BlendOptions::default())
	}

	fn write_bundle(dir: &Path, name: &str) -> PathBuf {
		let path = dir.join(format!("{}{}", name, JSON_SUFFIX));
		std::fs::write(&path, FRUIT_JSON).unwrap();
		path
	}

	#[test]
	fn resolves_bundle_names() {
		let dir = tempfile::tempdir().unwrap();
		write_bundle(dir.path(), "Fruit");
		std::fs::write(dir.path().join("Veg-dfSMRMatrix.csv"), "t,i,1\n").unwrap();

		let fruit = SourceSpec::resolve(dir.path(), "Fruit").unwrap();
		assert_eq!(fruit.format, SourceFormat::Json);
		let veg = SourceSpec::resolve(dir.path(), "Veg").unwrap();
		assert_eq!(veg.format, SourceFormat::Csv);
		assert!(matches!(
			SourceSpec::resolve(dir.path(), "Meat"),
			Err(SbrError::UnknownSource(_))
		));
	}

	#[test]
	fn parses_explicit_mapping() {
		let dir = tempfile::tempdir().unwrap();
		let spec = SourceSpec::parse("Zef = zef.csv", dir.path()).unwrap();
		assert_eq!(spec.name, "Zef");
		assert_eq!(spec.path, dir.path().join("zef.csv"));
		assert_eq!(spec.format, SourceFormat::Csv);
	}

	#[test]
	fn loads_lazily_and_once() {
		let dir = tempfile::tempdir().unwrap();
		let reg = registry();
		reg.register(SourceSpec::new("Fruit", write_bundle(dir.path(), "Fruit")).unwrap());
		assert!(!reg.is_loaded("Fruit"));

		let a = reg.get_or_load("Fruit").unwrap();
		assert!(reg.is_loaded("Fruit"));
		let b = reg.get_or_load("Fruit").unwrap();
		assert!(Arc::ptr_eq(&a, &b));
	}

	#[test]
	fn concurrent_first_access_shares_one_instance() {
		let dir = tempfile::tempdir().unwrap();
		let reg = registry();
		reg.register(SourceSpec::new("Fruit", write_bundle(dir.path(), "Fruit")).unwrap());

		let loaded: Vec<Arc<Recommender>> = std::thread::scope(|s| {
			let handles: Vec<_> = (0..8).map(|_| s.spawn(|| reg.get_or_load("Fruit").unwrap())).collect();
			handles.into_iter().map(|h| h.join().unwrap()).collect()
		});
		assert!(loaded.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
	}

	#[test]
	fn unknown_source_is_an_error() {
		let err = registry().get_or_load("Nope").unwrap_err();
		assert!(matches!(err, SbrError::UnknownSource(_)));
	}

	#[test]
	fn failed_load_is_retried() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("Broken-SMRMatrixColumnDictionaries.json");
		std::fs::write(&path, "{ not json").unwrap();

		let reg = registry();
		reg.register(SourceSpec::new("Broken", &path).unwrap());
		let err = reg.get_or_load("Broken").unwrap_err();
		assert!(matches!(err, SbrError::Load(LoadError::Json(_))));
		assert!(!reg.is_loaded("Broken"));

		std::fs::write(&path, FRUIT_JSON).unwrap();
		assert!(reg.get_or_load("Broken").is_ok());
	}

	#[test]
	fn reload_replaces_instance() {
		let dir = tempfile::tempdir().unwrap();
		let path = write_bundle(dir.path(), "Fruit");
		let reg = registry();
		reg.register(SourceSpec::new("Fruit", &path).unwrap());

		let before = reg.get_or_load("Fruit").unwrap();
		std::fs::write(&path, r#"{"Word:pear": {"ItemP": 1.0}}"#).unwrap();
		let after = reg.reload("Fruit").unwrap();

		assert!(!Arc::ptr_eq(&before, &after));
		assert!(before.is_known_tag("Word:apple"));
		assert!(after.is_known_tag("Word:pear"));
		assert!(Arc::ptr_eq(&after, &reg.get_or_load("Fruit").unwrap()));
	}

	#[test]
	fn prebuilt_recommenders_are_served() {
		let reg = registry();
		let m = MatrixStore::from_json_slice(FRUIT_JSON.as_bytes(), &LoadOptions::default()).unwrap();
		let inserted = reg.insert("Mem", Recommender::new(m, BlendOptions::default()));
		assert!(Arc::ptr_eq(&inserted, &reg.get_or_load("Mem").unwrap()));
		assert!(matches!(reg.reload("Mem"), Err(SbrError::UnknownSource(_))));
	}

	#[test]
	fn sources_report_status() {
		let dir = tempfile::tempdir().unwrap();
		let reg = registry();
		reg.register(SourceSpec::new("B", write_bundle(dir.path(), "B")).unwrap());
		reg.register(SourceSpec::new("A", write_bundle(dir.path(), "A")).unwrap());
		reg.get_or_load("B").unwrap();

		let sources = reg.sources();
		assert_eq!(reg.names(), vec!["A", "B"]);
		assert!(!sources[0].loaded);
		assert!(sources[1].loaded);
		assert_eq!(sources[1].format, Some(SourceFormat::Json));
	}
}
