//! Tracing initialisation for the odometry node.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `ODOMAP_LOG_FORMAT=json` | Newline-delimited JSON logs instead of the compact format. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | When set, spans are also exported over OTLP/HTTP. |
//!
//! ```rust,no_run
//! let _guard = odomap_node::telemetry::init_tracing("odomap");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.  Call once, before the runtime starts,
/// and keep the returned guard alive until exit.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let use_json = json_requested();
    let provider = build_provider(service_name);

    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("odomap")));
    let registry = tracing_subscriber::registry().with(env_filter).with(otel_layer);

    let result = if use_json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer().compact()).try_init()
    };
    if let Err(e) = result {
        eprintln!("[odomap] tracing subscriber already installed: {e}");
    }

    TracerProviderGuard(provider)
}

fn json_requested() -> bool {
    std::env::var("ODOMAP_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"))
}

/// Shuts the OTel provider down on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// True when spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[odomap] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

/// `None` when no endpoint is configured or the exporter fails to build.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[odomap] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple exporter: no runtime exists yet when this runs.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}
