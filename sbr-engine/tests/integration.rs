// ---------------------------------------------------------------------------
// Integration tests for sbr-engine JSON-RPC 2.0 / NDJSON protocol
// ---------------------------------------------------------------------------
//
// Each test writes matrix bundles into a temp dir, spawns a fresh sbr-engine
// binary pointed at it, and talks over stdin/stdout.
// ---------------------------------------------------------------------------

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};

const FRUIT_JSON: &str =
	r#"{"Word:apple": {"ItemA": 1.0, "ItemB": 0.5}, "Word:fruit": {"ItemA": 0.5, "ItemC": 1.0}}"#;

const VEG_CSV: &str = "Item,TagType,Value,Weight\n\
	Carrot,Color,orange,1\n\
	Carrot,Word,root,0.8\n\
	Beet,Color,red,1\n\
	Beet,Word,root,0.6\n\
	Pepper,Color,red,0.9\n";

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

struct SbrProcess {
	child: Child,
	reader: BufReader<std::process::ChildStdout>,
	next_id: AtomicU64,
}

impl SbrProcess {
	fn spawn(data_dir: &Path, sources: &str) -> Self {
		let bin = env!("CARGO_BIN_EXE_sbr-engine");
		let mut child = Command::new(bin)
			.arg("--data-dir")
			.arg(data_dir)
			.arg("--source")
			.arg(sources)
			.env_remove("SBR_SOURCES")
			.env_remove("SBR_DATA_DIR")
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.spawn()
			.expect("failed to spawn sbr-engine");

		let stdout = child.stdout.take().expect("no stdout");
		let reader = BufReader::new(stdout);

		Self {
			child,
			reader,
			next_id: AtomicU64::new(1),
		}
	}

	fn send_raw(&mut self, line: &str) {
		self.send_bytes(line.as_bytes());
	}

	fn send_bytes(&mut self, line: &[u8]) {
		let stdin = self.child.stdin.as_mut().expect("no stdin");
		stdin.write_all(line).unwrap();
		stdin.write_all(b"\n").unwrap();
		stdin.flush().unwrap();
	}

	fn send(&mut self, method: &str, params: Value) -> RpcResponse {
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		let request = json!({
			"jsonrpc": "2.0",
			"id": id,
			"method": method,
			"params": params,
		});
		self.send_raw(&serde_json::to_string(&request).unwrap());

		loop {
			let mut buf = String::new();
			let bytes_read = self
				.reader
				.read_line(&mut buf)
				.expect("failed to read from stdout");
			if bytes_read == 0 {
				panic!("unexpected EOF while waiting for response to id={}", id);
			}
			let buf = buf.trim();
			if buf.is_empty() {
				continue;
			}
			let parsed: Value = serde_json::from_str(buf)
				.unwrap_or_else(|e| panic!("invalid JSON from engine: {e}\nline: {buf}"));
			if parsed.get("id").is_none() {
				continue;
			}
			let resp_id = parsed["id"].as_u64().expect("response id is not u64");
			assert_eq!(resp_id, id, "response id mismatch");
			if let Some(error) = parsed.get("error") {
				return RpcResponse::Error(error.clone());
			}
			return RpcResponse::Ok(parsed.get("result").cloned().unwrap_or(Value::Null));
		}
	}

	fn call(&mut self, method: &str, params: Value) -> Value {
		match self.send(method, params) {
			RpcResponse::Ok(v) => v,
			RpcResponse::Error(e) => panic!("expected success, got error: {e}"),
		}
	}

	fn call_err(&mut self, method: &str, params: Value) -> Value {
		match self.send(method, params) {
			RpcResponse::Error(e) => e,
			RpcResponse::Ok(v) => panic!("expected error, got success: {v}"),
		}
	}
}

impl Drop for SbrProcess {
	fn drop(&mut self) {
		drop(self.child.stdin.take());
		let _ = self.child.wait();
	}
}

#[derive(Debug)]
enum RpcResponse {
	Ok(Value),
	Error(Value),
}

fn bundle_dir() -> tempfile::TempDir {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(
		dir.path().join("Fruit-SMRMatrixColumnDictionaries.json"),
		FRUIT_JSON,
	)
	.unwrap();
	std::fs::write(dir.path().join("Veg-dfSMRMatrix.csv"), VEG_CSV).unwrap();
	std::fs::write(dir.path().join("broken.json"), "{\"t\": [1, 2]}").unwrap();
	dir
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn sources_load_lazily() {
	let dir = bundle_dir();
	let mut proc = SbrProcess::spawn(dir.path(), "Fruit,Veg");

	let result = proc.call("sbr/sources", json!({}));
	let sources = result["sources"].as_array().unwrap();
	assert_eq!(sources.len(), 2);
	assert!(sources.iter().all(|s| s["loaded"] == false));

	let stats = proc.call("sbr/load", json!({ "source": "Veg" }))["stats"].clone();
	assert_eq!(stats["items"], 3);
	assert_eq!(stats["tagTypes"], json!(["Color", "Word"]));

	let result = proc.call("sbr/sources", json!({}));
	assert_eq!(result["sources"][0]["loaded"], false);
	assert_eq!(result["sources"][1]["loaded"], true);
}

#[test]
fn recommend_by_profile_top_n() {
	let dir = bundle_dir();
	let mut proc = SbrProcess::spawn(dir.path(), "Fruit");

	let result = proc.call(
		"sbr/recommendByProfile",
		json!({ "source": "Fruit", "tags": ["Word:apple", "Word:fruit"], "maxResults": 2 }),
	);
	assert_eq!(
		result["recommendations"],
		json!([{ "key": "ItemA", "score": 1.5 }, { "key": "ItemC", "score": 1.0 }])
	);
}

#[test]
fn item_recommendations_exclude_history() {
	let dir = bundle_dir();
	let mut proc = SbrProcess::spawn(dir.path(), "Veg");

	let result = proc.call(
		"sbr/recommend",
		json!({ "source": "Veg", "items": ["Beet"], "maxResults": 5 }),
	);
	let keys: Vec<&str> = result["recommendations"]
		.as_array()
		.unwrap()
		.iter()
		.map(|r| r["key"].as_str().unwrap())
		.collect();
	// Beet = {Color:red 1, Word:root 0.6}
	// Pepper = 1*0.9 = 0.9; Carrot = 0.6*0.8 = 0.48
	assert_eq!(keys, vec!["Pepper", "Carrot"]);
}

#[test]
fn free_text_query_end_to_end() {
	let dir = bundle_dir();
	let mut proc = SbrProcess::spawn(dir.path(), "Fruit");

	let result = proc.call("sbr/query", json!({ "source": "Fruit", "text": "apple fruit" }));
	assert_eq!(result["query"]["keys"], json!(["Word:apple", "Word:fruit"]));
	assert_eq!(
		result["labels"],
		json!(["1.50 : ItemA", "1.00 : ItemC", "0.50 : ItemB"])
	);

	let result = proc.call("sbr/query", json!({ "source": "Fruit", "text": "Item:ItemA" }));
	assert_eq!(result["query"]["kind"], "items");
	assert!(result["labels"]
		.as_array()
		.unwrap()
		.iter()
		.all(|l| !l.as_str().unwrap().ends_with(": ItemA")));
}

#[test]
fn profile_defaults_and_limits() {
	let dir = bundle_dir();
	let mut proc = SbrProcess::spawn(dir.path(), "Veg");

	let result = proc.call("sbr/profile", json!({ "source": "Veg", "items": ["Carrot"] }));
	assert_eq!(
		result["profile"],
		json!([{ "key": "Color:orange", "score": 1.0 }, { "key": "Word:root", "score": 0.8 }])
	);

	let result = proc.call(
		"sbr/profile",
		json!({ "source": "Veg", "items": ["Carrot"], "maxResults": 0 }),
	);
	assert_eq!(result["profile"], json!([]));
}

#[test]
fn malformed_source_is_a_load_error() {
	let dir = bundle_dir();
	let mut proc = SbrProcess::spawn(dir.path(), "Broken=broken.json");

	let err = proc.call_err("sbr/load", json!({ "source": "Broken" }));
	assert_eq!(err["code"], -32000);
	assert_eq!(err["data"]["sbrCode"], "SBR_LOAD_JSON");
}

#[test]
fn unknown_source_and_method() {
	let dir = bundle_dir();
	let mut proc = SbrProcess::spawn(dir.path(), "Fruit");

	let err = proc.call_err("sbr/recommend", json!({ "source": "Meat", "items": ["x"] }));
	assert_eq!(err["data"]["sbrCode"], "SBR_UNKNOWN_SOURCE");

	let err = proc.call_err("sbr/teleport", json!({}));
	assert_eq!(err["code"], -32601);

	let err = proc.call_err("sbr/recommend", json!({ "source": "Fruit" }));
	assert_eq!(err["code"], -32602);
}

#[test]
fn garbage_lines_are_skipped() {
	let dir = bundle_dir();
	let mut proc = SbrProcess::spawn(dir.path(), "Fruit");

	proc.send_raw("this is not json");
	let result = proc.call("query/parse", json!({ "text": "a;b" }));
	assert_eq!(result, json!({ "kind": "tags", "keys": ["a", "b"] }));
}

#[test]
fn invalid_utf8_lines_are_skipped() {
	let dir = bundle_dir();
	let mut proc = SbrProcess::spawn(dir.path(), "Fruit");

	proc.send_bytes(b"\xff\xfe garbage");
	let result = proc.call("query/parse", json!({ "text": "kiwi" }));
	assert_eq!(result, json!({ "kind": "tags", "keys": ["Word:kiwi"] }));

	// Lazily loaded state survives the bad line.
	proc.call("sbr/load", json!({ "source": "Fruit" }));
	proc.send_bytes(b"\xc3\x28");
	let result = proc.call("sbr/sources", json!({}));
	assert_eq!(result["sources"][0]["loaded"], true);
}
