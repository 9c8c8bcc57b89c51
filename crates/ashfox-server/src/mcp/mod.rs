// crates/ashfox-server/src/mcp/mod.rs
// Gateway state shared by the HTTP layer: session store, tool backend,
// proxy router, pipeline store, metrics.

pub mod jsonrpc;
pub mod router;
pub mod sessions;
pub mod sse;

use crate::adapter::{BackendPort, EditorAdapter, UpstreamGateway};
use crate::config::GatewayConfig;
use crate::merge::MergeOptions;
use crate::metrics::MetricsRegistry;
use crate::proxy::ProxyRouter;
use crate::store::PipelineStore;
use crate::store::repo::{MemoryRepository, ProjectRepository, SqliteRepository};
use crate::tools::{ToolService, ToolServiceOptions};
use crate::trace::TraceRecorder;
use sessions::SessionStore;
use std::sync::Arc;

/// Everything a request handler needs, built once at startup and passed
/// explicitly (no globals).
pub struct Gateway {
    pub config: GatewayConfig,
    pub sessions: Arc<SessionStore>,
    /// The tool invocation capability the router dispatches through.
    pub backend: Arc<dyn BackendPort>,
    /// The local tool service, when this process hosts one. `None` means
    /// every tools/call is forwarded upstream.
    pub service: Option<Arc<ToolService>>,
    pub proxy: Option<Arc<ProxyRouter>>,
    pub store: Arc<PipelineStore>,
    pub metrics: Arc<MetricsRegistry>,
}

impl Gateway {
    /// Assemble a gateway from config. With `ASHFOX_GATEWAY_URL` set the
    /// backend forwards upstream; otherwise a local tool service over the
    /// given editor adapter serves the calls.
    pub async fn assemble(
        config: GatewayConfig,
        adapter: Arc<dyn EditorAdapter>,
    ) -> anyhow::Result<Self> {
        let metrics = Arc::new(MetricsRegistry::new());
        let sessions = Arc::new(SessionStore::new(config.session_ttl, metrics.clone()));

        let repo: Arc<dyn ProjectRepository> = match (config.pipeline_backend, config.db_provider) {
            (crate::config::PipelineBackend::Persistence, crate::config::DbProvider::Sqlite) => {
                Arc::new(SqliteRepository::open(&config.db_path).await?)
            }
            _ => Arc::new(MemoryRepository::new()),
        };
        let store = Arc::new(PipelineStore::new(repo, metrics.clone()));

        // Worker-completed jobs fan out to subscribed SSE streams.
        {
            let sessions = sessions.clone();
            store.set_notifier(Box::new(move |event| {
                sessions.broadcast_project_event(event);
            }));
        }

        let trace = match &config.trace_file {
            Some(path) => Some(Arc::new(TraceRecorder::create(
                path,
                Some(env!("CARGO_PKG_VERSION").to_string()),
            )?)),
            None => None,
        };

        let (backend, service, proxy): (
            Arc<dyn BackendPort>,
            Option<Arc<ToolService>>,
            Option<Arc<ProxyRouter>>,
        ) = match &config.gateway_url {
            Some(url) => {
                tracing::info!(upstream = %url, "forwarding tool calls upstream");
                (Arc::new(UpstreamGateway::new(url.clone())), None, None)
            }
            None => {
                let service = Arc::new(ToolService::new(
                    adapter,
                    ToolServiceOptions {
                        require_revision: config.require_revision,
                        auto_attach: config.auto_attach,
                        merge: MergeOptions::default(),
                    },
                ));
                let proxy = Arc::new(ProxyRouter::new(service.clone(), trace));
                (service.clone(), Some(service), Some(proxy))
            }
        };

        Ok(Self {
            config,
            sessions,
            backend,
            service,
            proxy,
            store,
            metrics,
        })
    }
}
