use std::io::{self, Write};
use std::sync::Mutex;

use serde::Serialize;

#[derive(Serialize)]
struct JsonRpcResponse<'a> {
	jsonrpc: &'a str,
	id: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	result: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<JsonRpcErrorBody>,
}

#[derive(Serialize)]
struct JsonRpcErrorBody {
	code: i32,
	message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	data: Option<serde_json::Value>,
}

/// NDJSON transport: one JSON-RPC message per line, stdout by default.
pub struct NdjsonTransport {
	out: Mutex<Box<dyn Write + Send>>,
}

impl Default for NdjsonTransport {
	fn default() -> Self {
		Self::new()
	}
}

impl NdjsonTransport {
	pub fn new() -> Self {
		Self::with_writer(io::stdout())
	}

	pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
		Self {
			out: Mutex::new(Box::new(writer)),
		}
	}

	pub fn write_response(&self, id: u64, result: serde_json::Value) {
		self.write_line(&JsonRpcResponse {
			jsonrpc: "2.0",
			id,
			result: Some(result),
			error: None,
		});
	}

	pub fn write_error(
		&self,
		id: u64,
		code: i32,
		message: impl Into<String>,
		data: Option<serde_json::Value>,
	) {
		self.write_line(&JsonRpcResponse {
			jsonrpc: "2.0",
			id,
			result: None,
			error: Some(JsonRpcErrorBody {
				code,
				message: message.into(),
				data,
			}),
		});
	}

	fn write_line(&self, value: &impl Serialize) {
		let line = match serde_json::to_vec(value) {
			Ok(mut bytes) => {
				bytes.push(b'\n');
				bytes
			}
			Err(e) => {
				tracing::error!("Failed to serialize: {}", e);
				return;
			}
		};
		let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
		if let Err(e) = out.write_all(&line).and_then(|_| out.flush()) {
			tracing::error!("Failed to write message: {}", e);
		}
	}
}

/// Shared in-memory writer for capturing transport output in tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct Sink(std::sync::Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Sink {
	/// Every line written so far, parsed as JSON.
	pub(crate) fn lines(&self) -> Vec<serde_json::Value> {
		let bytes = self.0.lock().unwrap().clone();
		String::from_utf8(bytes)
			.unwrap()
			.lines()
			.map(|l| serde_json::from_str(l).unwrap())
			.collect()
	}
}

#[cfg(test)]
impl Write for Sink {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.lock().unwrap().write(buf)
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}
