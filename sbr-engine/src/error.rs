use thiserror::Error;

/// Failure to turn a serialized matrix into a [`MatrixStore`](crate::matrix::MatrixStore).
#[derive(Debug, Error)]
pub enum LoadError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
	#[error("CSV error: {0}")]
	Csv(#[from] csv::Error),
	#[error("Invalid matrix format: {0}")]
	InvalidFormat(String),
	#[error("Missing required field '{field}' at line {line}")]
	MissingField { field: String, line: u64 },
	#[error("Invalid weight {weight} for tag '{tag}' and item '{item}'")]
	InvalidWeight {
		tag: String,
		item: String,
		weight: f64,
	},
	#[error("Unsupported source format: {0}")]
	UnsupportedFormat(String),
	#[error("Matrix source contains no non-zero entries")]
	Empty,
}

#[derive(Debug, Error)]
pub enum SbrError {
	#[error("Load error: {0}")]
	Load(#[from] LoadError),
	#[error("Unknown data source: {0}")]
	UnknownSource(String),
	#[error("Invalid params: {0}")]
	InvalidParams(String),
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

impl LoadError {
	pub fn code(&self) -> &str {
		match self {
			Self::Io(_) => "SBR_LOAD_IO",
			Self::Json(_) => "SBR_LOAD_JSON",
			Self::Csv(_) => "SBR_LOAD_CSV",
			Self::InvalidFormat(_) => "SBR_LOAD_INVALID_FORMAT",
			Self::MissingField { .. } => "SBR_LOAD_MISSING_FIELD",
			Self::InvalidWeight { .. } => "SBR_LOAD_INVALID_WEIGHT",
			Self::UnsupportedFormat(_) => "SBR_LOAD_UNSUPPORTED_FORMAT",
			Self::Empty => "SBR_LOAD_EMPTY",
		}
	}
}

impl SbrError {
	pub fn code(&self) -> &str {
		match self {
			Self::Load(e) => e.code(),
			Self::UnknownSource(_) => "SBR_UNKNOWN_SOURCE",
			Self::InvalidParams(_) => "SBR_INVALID_PARAMS",
			Self::Io(_) => "SBR_IO",
		}
	}

	pub fn to_json_rpc_error(&self) -> serde_json::Value {
		serde_json::json!({
			"sbrCode": self.code(),
			"message": self.to_string(),
		})
	}
}
