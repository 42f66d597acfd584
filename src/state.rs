use crate::config::Config;
use crate::runtime::{BindingRenderer, TypeScriptDeclarations};
use crate::search::HybridSearch;
use crate::upstream::ToolAggregator;
use std::sync::Arc;

/// Application state shared across all request handlers.
pub struct AppState {
    pub aggregator: Arc<ToolAggregator>,
    pub search: Arc<HybridSearch>,
    pub renderer: Arc<dyn BindingRenderer>,
    #[allow(dead_code)]
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, aggregator: Arc<ToolAggregator>, search: Arc<HybridSearch>) -> Self {
        Self {
            aggregator,
            search,
            renderer: Arc::new(TypeScriptDeclarations),
            config: Arc::new(config),
        }
    }

    /// Swap in an external binding generator for `/runtime/tools.ts`.
    pub fn with_renderer(mut self, renderer: Arc<dyn BindingRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Ready once the search coordinator has finished initializing.
    pub fn is_ready(&self) -> bool {
        self.search.is_ready()
    }
}
