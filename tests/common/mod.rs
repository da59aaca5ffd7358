#![allow(dead_code, unused_imports)]

pub use dagrun_test_utils::builders;
pub use dagrun_test_utils::doubles;
pub use dagrun_test_utils::workers;
pub use dagrun_test_utils::{init_tracing, with_timeout};

use std::path::Path;

use dagrun::config::AppConfig;
use dagrun::context::{ContextHandle, ContextMap};
use dagrun::dag::Register;
use dagrun::engine::Engine;
use dagrun::exec::WorkerRegistry;

/// Engine over `register` with an empty, non-interactive context.
pub fn new_engine(config: AppConfig, register: Register, workers: WorkerRegistry) -> Engine {
    let context = ContextHandle::spawn(ContextMap::new(), config.launch.interactive);
    Engine::new(config, register, context, workers)
}

pub fn read_log(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}
