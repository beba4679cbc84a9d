//! StoneScriptDB ModelSync Library
//!
//! Converges declaratively defined data models onto the live schemas of one
//! or more PostgreSQL, MySQL-family and SQLite connections.

pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod pool;
pub mod schema;

use crate::config::Config;
use crate::context::SyncContext;
use crate::error::Result;
use crate::pool::{tracing_query_logger, ConnectionRegistry};
use crate::schema::{ConvergeOutcome, SchemaSynchronizer};
use std::sync::Arc;

/// Load connections and models as configured and run one convergence.
pub async fn converge_from_config(config: &Config) -> Result<ConvergeOutcome> {
    let configs = config.load_connection_configs()?;
    let connections = ConnectionRegistry::build(
        &configs,
        &config.default_connection,
        &tracing_query_logger(),
        config.max_connections_per_pool,
    )?;

    let sources = config.load_models()?;
    let ctx = SyncContext::bind(Arc::new(connections), sources, &config.registry_options())?;

    SchemaSynchronizer::new(config.sync_settings())
        .converge(&ctx)
        .await
}
