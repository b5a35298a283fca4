// ---------------------------------------------------------------------------
// SbrServer: JSON-RPC dispatcher
// ---------------------------------------------------------------------------
//
// Routes incoming JSON-RPC 2.0 requests (NDJSON over stdin) to recommenders
// held in a RecommenderRegistry. A main `run()` loop, a `dispatch()` match,
// and free-standing handler functions for each method.
// ---------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::io::{self, BufRead};
use std::sync::Arc;

use serde::Deserialize;

use crate::config::EngineConfig;
use crate::error::SbrError;
use crate::protocol::*;
use crate::query::{parse_query_with, QueryKind};
use crate::recommender::Scored;
use crate::registry::RecommenderRegistry;
use crate::transport::NdjsonTransport;

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Defaults applied when a request leaves them out.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub default_tag_type: String,
	pub max_results: usize,
	pub profile_limit: usize,
}

impl From<&EngineConfig> for ServerConfig {
	fn from(config: &EngineConfig) -> Self {
		Self {
			default_tag_type: config.default_tag_type.clone(),
			max_results: config.max_results,
			profile_limit: config.profile_limit,
		}
	}
}

/// JSON-RPC server that dispatches requests to a [`RecommenderRegistry`].
pub struct SbrServer {
	transport: NdjsonTransport,
	registry: Arc<RecommenderRegistry>,
	config: ServerConfig,
}

impl SbrServer {
	pub fn new(
		transport: NdjsonTransport,
		registry: Arc<RecommenderRegistry>,
		config: ServerConfig,
	) -> Self {
		Self {
			transport,
			registry,
			config,
		}
	}

	/// Main loop: read JSON-RPC messages from stdin, dispatch to handlers.
	pub fn run(&mut self) -> Result<(), SbrError> {
		let stdin = io::stdin();
		let mut reader = stdin.lock();
		let mut buf = Vec::new();

		loop {
			buf.clear();
			if reader.read_until(b'\n', &mut buf)? == 0 {
				break;
			}
			self.handle_line(&buf);
		}

		Ok(())
	}

	/// Handle one raw NDJSON line. Lines that are not JSON are logged and
	/// skipped; JSON with a usable `id` but a bad shape gets an error reply.
	pub fn handle_line(&self, line: &[u8]) {
		let line = match std::str::from_utf8(line) {
			Ok(l) => l.trim(),
			Err(e) => {
				tracing::error!("Skipping non UTF-8 request line: {}", e);
				return;
			}
		};
		if line.is_empty() {
			return;
		}

		let value: serde_json::Value = match serde_json::from_str(line) {
			Ok(v) => v,
			Err(e) => {
				tracing::error!("Failed to parse request: {}", e);
				return;
			}
		};
		let id = value.get("id").and_then(serde_json::Value::as_u64);
		match serde_json::from_value::<JsonRpcRequest>(value) {
			Ok(request) => self.dispatch(request),
			Err(e) => match id {
				Some(id) => self.transport.write_error(
					id,
					INVALID_REQUEST,
					format!("Invalid request: {}", e),
					None,
				),
				None => tracing::error!("Dropping request without a numeric id: {}", e),
			},
		}
	}

	// ── Dispatch ──────────────────────────────────────────────────────────

	fn dispatch(&self, req: JsonRpcRequest) {
		let id = req.id;
		let Some(result) = self.handle(&req.method, req.params) else {
			self.transport.write_error(
				id,
				METHOD_NOT_FOUND,
				format!("Unknown method: {}", req.method),
				None,
			);
			return;
		};

		match result {
			Ok(value) => self.transport.write_response(id, value),
			Err(e) => {
				let code = match &e {
					SbrError::InvalidParams(_) => INVALID_PARAMS,
					_ => SBR_ERROR,
				};
				self.transport
					.write_error(id, code, e.to_string(), Some(e.to_json_rpc_error()))
			}
		}
	}

	/// Run one method. `None` means the method does not exist.
	pub fn handle(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Option<Result<serde_json::Value, SbrError>> {
		let registry = self.registry.as_ref();
		let config = &self.config;
		let result = match method {
			// -- Sources -------------------------------------------------
			"sbr/sources" => Ok(serde_json::json!({ "sources": registry.sources() })),
			"sbr/load" => handle_load(registry, params),

			// -- Queries -------------------------------------------------
			"sbr/recommendByProfile" => handle_recommend_by_profile(registry, config, params),
			"sbr/recommend" => handle_recommend(registry, config, params),
			"sbr/profile" => handle_profile(registry, config, params),
			"sbr/query" => handle_query(registry, config, params),
			"sbr/knownTags" => handle_known_tags(registry, params),

			// -- Query text ----------------------------------------------
			"query/parse" => handle_query_parse(config, params),

			_ => return None,
		};
		Some(result)
	}
}

// ---------------------------------------------------------------------------
// Param types
// ---------------------------------------------------------------------------

fn parse_params<T: serde::de::DeserializeOwned>(params: serde_json::Value) -> Result<T, SbrError> {
	serde_json::from_value(params).map_err(|e| SbrError::InvalidParams(e.to_string()))
}

/// Negative counts mean "nothing", absent counts use the default.
fn result_count(requested: Option<i64>, default: usize) -> usize {
	match requested {
		Some(n) if n <= 0 => 0,
		Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
		None => default,
	}
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceParams {
	source: String,
}

/// Either a plain tag list or a `tag -> weight` profile.
#[derive(Deserialize)]
#[serde(untagged)]
enum TagsParam {
	List(Vec<String>),
	Weighted(BTreeMap<String, f64>),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendByProfileParams {
	source: String,
	tags: TagsParam,
	max_results: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendParams {
	source: String,
	items: Vec<String>,
	max_results: Option<i64>,
	remove_history: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileParams {
	source: String,
	items: Vec<String>,
	max_results: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryParams {
	source: String,
	text: String,
	max_results: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KnownTagsParams {
	source: String,
	tags: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryParseParams {
	text: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_load(
	registry: &RecommenderRegistry,
	params: serde_json::Value,
) -> Result<serde_json::Value, SbrError> {
	let p: SourceParams = parse_params(params)?;
	let rec = registry.get_or_load(&p.source)?;
	Ok(serde_json::json!({ "stats": rec.stats() }))
}

fn handle_recommend_by_profile(
	registry: &RecommenderRegistry,
	config: &ServerConfig,
	params: serde_json::Value,
) -> Result<serde_json::Value, SbrError> {
	let p: RecommendByProfileParams = parse_params(params)?;
	let n = result_count(p.max_results, config.max_results);
	let rec = registry.get_or_load(&p.source)?;
	let recs = match p.tags {
		TagsParam::List(tags) => rec.recommend_by_profile(tags, n),
		TagsParam::Weighted(profile) => rec.recommend_by_weighted_profile(&profile, n),
	};
	Ok(serde_json::json!({ "recommendations": recs }))
}

fn handle_recommend(
	registry: &RecommenderRegistry,
	config: &ServerConfig,
	params: serde_json::Value,
) -> Result<serde_json::Value, SbrError> {
	let p: RecommendParams = parse_params(params)?;
	let n = result_count(p.max_results, config.max_results);
	let rec = registry.get_or_load(&p.source)?;
	let recs = rec.recommend_with(p.items, n, p.remove_history.unwrap_or(true));
	Ok(serde_json::json!({ "recommendations": recs }))
}

fn handle_profile(
	registry: &RecommenderRegistry,
	config: &ServerConfig,
	params: serde_json::Value,
) -> Result<serde_json::Value, SbrError> {
	let p: ProfileParams = parse_params(params)?;
	let n = result_count(p.max_results, config.profile_limit);
	let rec = registry.get_or_load(&p.source)?;
	let profile = rec.profile_top(p.items, n);
	Ok(serde_json::json!({ "profile": profile }))
}

fn handle_query(
	registry: &RecommenderRegistry,
	config: &ServerConfig,
	params: serde_json::Value,
) -> Result<serde_json::Value, SbrError> {
	let p: QueryParams = parse_params(params)?;
	let n = result_count(p.max_results, config.max_results);
	let rec = registry.get_or_load(&p.source)?;

	let query = parse_query_with(&p.text, &config.default_tag_type);
	let recs = match query.kind {
		QueryKind::Tags => rec.recommend_by_profile(&query.keys, n),
		QueryKind::Items => rec.recommend(&query.keys, n),
	};
	let labels: Vec<String> = recs.iter().map(Scored::label).collect();
	Ok(serde_json::json!({
		"query": query,
		"recommendations": recs,
		"labels": labels,
	}))
}

fn handle_known_tags(
	registry: &RecommenderRegistry,
	params: serde_json::Value,
) -> Result<serde_json::Value, SbrError> {
	let p: KnownTagsParams = parse_params(params)?;
	let rec = registry.get_or_load(&p.source)?;
	let (known, unknown): (Vec<String>, Vec<String>) =
		p.tags.into_iter().partition(|t| rec.is_known_tag(t));
	Ok(serde_json::json!({ "known": known, "unknown": unknown }))
}

fn handle_query_parse(
	config: &ServerConfig,
	params: serde_json::Value,
) -> Result<serde_json::Value, SbrError> {
	let p: QueryParseParams = parse_params(params)?;
	let query = parse_query_with(&p.text, &config.default_tag_type);
	Ok(serde_json::json!(query))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
