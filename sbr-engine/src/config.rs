use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;

use crate::error::SbrError;
use crate::matrix::LoadOptions;
use crate::query::DEFAULT_TAG_TYPE;
use crate::recommender::{BlendOptions, Normalization, DEFAULT_MAX_QUERY_KEYS};
use crate::registry::{RecommenderRegistry, SourceSpec};
use crate::tag::TagParser;

#[derive(Parser, Debug)]
#[command(name = "sbr-engine", about = "Streams blending recommender over JSON-RPC 2.0 / NDJSON stdio")]
pub struct CliArgs {
	/// Directory holding `<name>-SMRMatrixColumnDictionaries.json` / `<name>-dfSMRMatrix.csv` bundles
	#[arg(long, default_value = ".", env = "SBR_DATA_DIR")]
	pub data_dir: PathBuf,

	/// Data sources: a bundle name, or `name=path` relative to the data dir (repeatable, comma separated)
	#[arg(long = "source", value_delimiter = ',', env = "SBR_SOURCES")]
	pub sources: Vec<String>,

	/// Load every source at startup instead of on first query
	#[arg(long)]
	pub preload: bool,

	/// Derive tag types from the prefix before the tag separator
	#[arg(long, default_value = "true", action = clap::ArgAction::Set)]
	pub tag_types_from_prefixes: bool,

	/// Separator between tag type and value
	#[arg(long, default_value = ":")]
	pub tag_separator: char,

	/// CSV field delimiter
	#[arg(long, default_value = ",")]
	pub csv_delimiter: char,

	/// Tag type given to bare words in free-text queries
	#[arg(long, default_value = DEFAULT_TAG_TYPE)]
	pub default_tag_type: String,

	/// Per tag-type weights, e.g. `Word=1,Nutrient=2.5`
	#[arg(long, value_delimiter = ',')]
	pub tag_type_weight: Vec<String>,

	/// Score normalization: none, max
	#[arg(long, default_value = "none")]
	pub normalization: String,

	/// Default number of recommendations
	#[arg(long, default_value = "10")]
	pub max_results: usize,

	/// Default number of profile tags
	#[arg(long, default_value = "40")]
	pub profile_limit: usize,

	/// Maximum number of tags or items blended per query
	#[arg(long, default_value_t = DEFAULT_MAX_QUERY_KEYS)]
	pub max_query_keys: usize,

	/// Log level (trace, debug, info, warn, error)
	#[arg(long, default_value = "info", env = "SBR_LOG_LEVEL")]
	pub log_level: String,
}

/// Runtime settings derived from [`CliArgs`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
	pub data_dir: PathBuf,
	pub sources: Vec<String>,
	pub preload: bool,
	pub load: LoadOptions,
	pub blend: BlendOptions,
	pub default_tag_type: String,
	pub max_results: usize,
	pub profile_limit: usize,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			data_dir: PathBuf::from("."),
			sources: Vec::new(),
			preload: false,
			load: LoadOptions::default(),
			blend: BlendOptions::default(),
			default_tag_type: DEFAULT_TAG_TYPE.to_string(),
			max_results: 10,
			profile_limit: 40,
		}
	}
}

impl TryFrom<CliArgs> for EngineConfig {
	type Error = SbrError;

	fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
		let csv_delimiter = u8::try_from(args.csv_delimiter).map_err(|_| {
			SbrError::InvalidParams(format!("CSV delimiter must be ASCII: '{}'", args.csv_delimiter))
		})?;
		Ok(Self {
			data_dir: args.data_dir,
			sources: args.sources,
			preload: args.preload,
			load: LoadOptions {
				tag_parser: TagParser::new(args.tag_types_from_prefixes, args.tag_separator),
				csv_delimiter,
			},
			blend: BlendOptions {
				tag_type_weights: parse_type_weights(&args.tag_type_weight)?,
				default_type_weight: 1.0,
				normalization: args.normalization.parse::<Normalization>()?,
				max_query_keys: args.max_query_keys,
			},
			default_tag_type: args.default_tag_type,
			max_results: args.max_results,
			profile_limit: args.profile_limit,
		})
	}
}

impl EngineConfig {
	/// Build a registry with every configured source registered (and loaded,
	/// when `preload` is set).
	pub fn build_registry(&self) -> Result<RecommenderRegistry, SbrError> {
		let registry = RecommenderRegistry::new(self.load, self.blend.clone());
		for raw in &self.sources {
			let spec = SourceSpec::parse(raw, &self.data_dir)?;
			tracing::info!(source = %spec.name, path = %spec.path.display(), "Registered source");
			registry.register(spec);
		}
		if self.preload {
			for name in registry.names() {
				registry.get_or_load(&name)?;
			}
		}
		Ok(registry)
	}
}

fn parse_type_weights(raw: &[String]) -> Result<HashMap<String, f64>, SbrError> {
	raw.iter()
		.map(|pair| {
			let (tag_type, weight) = pair.split_once('=').ok_or_else(|| {
				SbrError::InvalidParams(format!("expected TYPE=WEIGHT, got '{}'", pair))
			})?;
			let weight: f64 = weight.trim().parse().map_err(|_| {
				SbrError::InvalidParams(format!("invalid weight for tag type '{}'", tag_type))
			})?;
			Ok((tag_type.trim().to_string(), weight))
		})
		.collect()
}
