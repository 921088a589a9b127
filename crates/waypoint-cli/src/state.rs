//! Application state wiring the engine together.
//!
//! The engine components are generic over the checkpoint store; `AppState`
//! pins them to the SQLite implementation in the data directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use waypoint_core::gateway::box_gateway::BoxModelGateway;
use waypoint_core::gateway::echo::EchoGateway;
use waypoint_core::workflow::checkpoint::CheckpointManager;
use waypoint_core::workflow::handler::HandlerRegistry;
use waypoint_core::workflow::handlers::{PassthroughHandler, PromptHandler};
use waypoint_core::workflow::node_executor::NodeExecutor;
use waypoint_core::workflow::registry::DefinitionRegistry;
use waypoint_core::workflow::tracker::ExecutionTracker;
use waypoint_infra::config::{load_engine_config, resolve_data_dir};
use waypoint_infra::sqlite::checkpoint::SqliteCheckpointStore;
use waypoint_infra::sqlite::pool::DatabasePool;

pub type ConcreteTracker = ExecutionTracker<SqliteCheckpointStore>;

/// Model used by `prompt` nodes that do not name one.
const DEFAULT_MODEL: &str = "echo";

#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub tracker: Arc<ConcreteTracker>,
}

impl AppState {
    /// Load config, open the database and build the tracker.
    pub async fn init(data_dir: Option<&Path>) -> anyhow::Result<Self> {
        let data_dir = data_dir.map_or_else(resolve_data_dir, Path::to_path_buf);
        let config = load_engine_config(&data_dir).await;
        let pool = DatabasePool::open(&data_dir).await?;

        let definitions = Arc::new(DefinitionRegistry::new(config.max_node_visits));
        let executor = NodeExecutor::new(Arc::new(builtin_handlers()))
            .with_pricing(config.pricing.clone())
            .with_default_timeout(config.node.default_timeout());
        let checkpoints = Arc::new(CheckpointManager::new(
            SqliteCheckpointStore::new(pool),
            config.checkpoint.clone(),
        ));
        let tracker = Arc::new(ExecutionTracker::new(
            definitions,
            Arc::new(executor),
            checkpoints,
            config,
        ));

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");
        Ok(Self { data_dir, tracker })
    }
}

/// Handlers available to every definition run from the CLI. `prompt` nodes
/// are served by the offline echo gateway.
pub fn builtin_handlers() -> HandlerRegistry {
    HandlerRegistry::new()
        .with(PassthroughHandler)
        .with(PromptHandler::new(BoxModelGateway::new(EchoGateway), DEFAULT_MODEL))
}
