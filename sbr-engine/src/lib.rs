pub mod config;
pub mod error;
pub mod inverse_index;
pub mod matrix;
pub mod protocol;
pub mod query;
pub mod recommender;
pub mod registry;
pub mod server;
pub mod tag;
pub mod transport;

pub use error::{LoadError, SbrError};
pub use matrix::{LoadOptions, MatrixStore, SourceFormat};
pub use query::{format_scored, parse_query, ParsedQuery, QueryKind};
pub use recommender::{BlendOptions, Normalization, Recommender, Scored};
pub use registry::{RecommenderRegistry, SourceSpec};
pub use tag::{Tag, TagParser};
