use anyhow::{Context, Result, anyhow};
use opentelemetry::trace::{Span, TraceContextExt, Tracer, TracerProvider as OtelTracerProvider};
use opentelemetry::{Context as OtelContext, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider, SpanExporter,
};
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::ConversionError;

/// Telemetry handle for OpenTelemetry tracing.
pub struct Telemetry {
    tracer: opentelemetry_sdk::trace::SdkTracer,
    provider: SdkTracerProvider,
}

impl Telemetry {
    /// Initialize telemetry with an OTLP HTTP exporter.
    pub fn new(endpoint: String) -> Result<Self> {
        let endpoint = normalize_otlp_http_trace_endpoint(&endpoint)?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .context("build OTLP span exporter")?;
        Self::from_exporter(exporter)
    }

    /// Runs `f` inside a span for `unit`, under `parent` or else the current context.
    ///
    /// Rayon workers do not inherit the caller's active span, so batch work passes its parent.
    fn in_unit_span<T, F>(&self, unit: &Unit<'_>, parent: Option<&OtelContext>, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let parent = parent.cloned().unwrap_or_else(OtelContext::current);
        let mut span = self.tracer.start_with_context(unit.span_name(), &parent);
        span.set_attribute(unit.attribute());
        let cx = parent.with_span(span);
        let _guard = cx.attach();
        f()
    }

    /// Flush spans and shut down the tracer provider.
    pub fn shutdown(&self) -> Result<()> {
        if let Err(err) = self.provider.shutdown() {
            return Err(anyhow!("failed to shutdown tracer provider: {err}"));
        }
        Ok(())
    }

    fn from_exporter<E: SpanExporter + 'static>(exporter: E) -> Result<Self> {
        let resource = Resource::builder().with_service_name("dex2class").build();
        // The batch processor exports from its own thread; ending a span is a channel send,
        // so spans may end on rayon workers.
        let batch_config = BatchConfigBuilder::default()
            .with_max_queue_size(65_536)
            .with_max_export_batch_size(4096)
            .with_scheduled_delay(Duration::from_millis(200))
            .build();
        let processor = BatchSpanProcessor::builder(exporter)
            .with_batch_config(batch_config)
            .build();
        let provider = SdkTracerProvider::builder()
            .with_resource(resource)
            .with_span_processor(processor)
            .build();
        let tracer = provider.tracer("dex2class");
        opentelemetry::global::set_tracer_provider(provider.clone());
        Ok(Self { tracer, provider })
    }
}

fn normalize_otlp_http_trace_endpoint(endpoint: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint).context("parse OTLP endpoint")?;
    let path = url.path().to_string();
    if path == "/" {
        url.set_path("/v1/traces");
    } else if let Some(prefix) = path.strip_suffix("/v1/logs") {
        url.set_path(&format!("{prefix}/v1/traces"));
    }
    Ok(url.to_string())
}

/// Initialize logging facade with stderr output.
pub fn init_logging(quiet: bool) {
    let default_filter = if quiet { "error" } else { "dex2class=info,warn" };
    let init_result = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
    let _ = init_result;
}

/// A unit of conversion work traced as one span.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Unit<'a> {
    /// One decoded input document.
    File(&'a Path),
    /// One class, by its dex type name.
    Class(&'a str),
}

impl Unit<'_> {
    fn span_name(&self) -> &'static str {
        match self {
            Unit::File(_) => "file.convert",
            Unit::Class(_) => "class.convert",
        }
    }

    fn attribute(&self) -> KeyValue {
        match self {
            Unit::File(path) => KeyValue::new("dex2class.input", path.display().to_string()),
            Unit::Class(name) => KeyValue::new("dex2class.class", name.to_string()),
        }
    }
}

/// Traces `f` as `unit` when telemetry is enabled; `parent` carries the span across threads.
pub(crate) fn traced<T, F>(
    telemetry: Option<&Telemetry>,
    unit: Unit<'_>,
    parent: Option<&OtelContext>,
    f: F,
) -> T
where
    F: FnOnce() -> T,
{
    match telemetry {
        Some(telemetry) => telemetry.in_unit_span(&unit, parent, f),
        None => f(),
    }
}

/// Records a failed method as an event on the active class span.
pub(crate) fn record_method_failure(method: &str, error: &ConversionError) {
    let cx = OtelContext::current();
    let span = cx.span();
    if !span.span_context().is_valid() {
        return;
    }
    span.add_event(
        "method.failed",
        vec![
            KeyValue::new("dex2class.method", method.to_string()),
            KeyValue::new("dex2class.error", error.code()),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::error::OTelSdkResult;
    use opentelemetry_sdk::trace::{SpanData, SpanExporter};

    #[derive(Debug)]
    struct NoopExporter;

    impl SpanExporter for NoopExporter {
        async fn export(&self, _batch: Vec<SpanData>) -> OTelSdkResult {
            Ok(())
        }
    }

    fn trace_id() -> Option<String> {
        let cx = OtelContext::current();
        let span = cx.span();
        let span_context = span.span_context();
        span_context
            .is_valid()
            .then(|| span_context.trace_id().to_string())
    }

    #[test]
    fn failure_events_attach_to_the_class_span() {
        let telemetry = Telemetry::from_exporter(NoopExporter).expect("telemetry");
        let recording = traced(Some(&telemetry), Unit::Class("La/B;"), None, || {
            record_method_failure("run", &ConversionError::MethodTooLarge { size: 70_000 });
            OtelContext::current().span().is_recording()
        });
        assert!(recording);
        telemetry.shutdown().expect("shutdown");
    }

    #[test]
    fn normalize_root_endpoint_to_trace_path() {
        let endpoint =
            normalize_otlp_http_trace_endpoint("http://localhost:4318/").expect("endpoint");
        assert_eq!(endpoint, "http://localhost:4318/v1/traces");
    }

    #[test]
    fn normalize_log_endpoint_to_trace_path() {
        let endpoint =
            normalize_otlp_http_trace_endpoint("http://localhost:4318/v1/logs").expect("endpoint");
        assert_eq!(endpoint, "http://localhost:4318/v1/traces");
    }

    #[test]
    fn class_span_on_a_worker_joins_the_file_trace() {
        let telemetry = Telemetry::from_exporter(NoopExporter).expect("telemetry");
        let input = Path::new("classes.json");
        let (file, class) = traced(Some(&telemetry), Unit::File(input), None, || {
            let parent = OtelContext::current();
            let file = trace_id();
            let class = std::thread::scope(|scope| {
                scope
                    .spawn(|| {
                        traced(Some(&telemetry), Unit::Class("La/B;"), Some(&parent), trace_id)
                    })
                    .join()
                    .expect("join")
            });
            (file, class)
        });
        assert!(file.is_some());
        assert_eq!(file, class);
        telemetry.shutdown().expect("shutdown");
    }

    #[test]
    fn disabled_telemetry_runs_closure_directly() {
        assert_eq!(traced(None, Unit::Class("La/B;"), None, || 7), 7);
        record_method_failure("run", &ConversionError::ConstantPoolOverflow);
    }
}
