use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sbr_engine::config::{CliArgs, EngineConfig};
use sbr_engine::server::{SbrServer, ServerConfig};
use sbr_engine::transport::NdjsonTransport;

fn main() -> Result<()> {
	let args = CliArgs::parse();

	// Logs go to stderr; stdout carries the protocol
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
		)
		.init();

	let config = EngineConfig::try_from(args)?;
	let registry = Arc::new(config.build_registry()?);
	tracing::info!(sources = ?registry.names(), preload = config.preload, "Registry ready");

	let transport = NdjsonTransport::new();
	let mut server = SbrServer::new(transport, registry, ServerConfig::from(&config));

	tracing::info!("sbr-engine ready");
	server.run()?;
	Ok(())
}
