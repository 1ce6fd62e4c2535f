//! Fixtures and a scripted renderer for tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use diagex_render::{ExportFormat, RenderError, RenderOptions, Renderer};
use diagex_scan::{Diagram, DiagramSource, SourceKind};

use crate::config::RetryPolicy;
use crate::job::ExportJob;

/// A source at `relative` (under `/docs`) holding one diagram per body.
pub(crate) fn source(relative: &str, bodies: &[&str]) -> DiagramSource {
    let relative_path = PathBuf::from(relative);
    let kind = SourceKind::from_path(&relative_path).unwrap_or(SourceKind::MultiDiagram);
    DiagramSource {
        path: Path::new("/docs").join(&relative_path),
        relative_path,
        kind,
        size: 0,
        modified: SystemTime::UNIX_EPOCH,
        diagrams: bodies
            .iter()
            .enumerate()
            .map(|(index, body)| Diagram::new(index, (*body).to_owned(), 1, 1))
            .collect(),
    }
}

/// A standalone job with a simple flowchart.
pub(crate) fn job(id: &str, format: ExportFormat) -> ExportJob {
    ExportJob {
        id: id.to_owned(),
        source_path: PathBuf::from("/docs/flow.mmd"),
        source_relative_path: PathBuf::from("flow.mmd"),
        diagram: Diagram::new(0, "graph TD\n  A --> B".to_owned(), 1, 2),
        format,
        output_path: PathBuf::from(format!("out/{id}.{}", format.extension())),
        priority: 100,
        dependencies: Vec::new(),
        retry: RetryPolicy::none(),
    }
}

/// What the scripted renderer does on a call.
#[derive(Clone)]
pub(crate) enum Step {
    Succeed,
    Fail,
    /// Sleep before succeeding.
    Delay(Duration),
    /// Never finish.
    Hang,
}

/// Renderer driven by a script of steps; falls back to `Succeed`.
///
/// Sources containing `FAIL` always fail.
#[derive(Clone, Default)]
pub(crate) struct ScriptedRenderer {
    steps: Arc<Mutex<VecDeque<Step>>>,
    unavailable: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    rendered: Arc<Mutex<Vec<String>>>,
    default_delay: Option<Duration>,
}

impl ScriptedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        let renderer = Self::new();
        renderer.steps.lock().unwrap().extend(steps);
        renderer
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    pub fn unavailable() -> Self {
        let renderer = Self::new();
        renderer.unavailable.store(true, Ordering::SeqCst);
        renderer
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Diagram sources in call order.
    pub fn rendered(&self) -> Vec<String> {
        self.rendered.lock().unwrap().clone()
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Renderer for ScriptedRenderer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    async fn export(&self, source: &str, options: &RenderOptions) -> Result<Vec<u8>, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.rendered.lock().unwrap().push(source.to_owned());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(Arc::clone(&self.in_flight));

        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Succeed);
        if let Some(delay) = self.default_delay {
            tokio::time::sleep(delay).await;
        }
        if source.contains("FAIL") {
            return Err(RenderError::Http("HTTP 400: syntax error".to_owned()));
        }
        match step {
            Step::Succeed => {}
            Step::Fail => return Err(RenderError::Http("HTTP 503: busy".to_owned())),
            Step::Delay(delay) => tokio::time::sleep(delay).await,
            Step::Hang => std::future::pending::<()>().await,
        }
        Ok(format!("<svg><!-- {} --></svg>", options.format).into_bytes())
    }

    fn required_dependencies(&self) -> Vec<String> {
        vec!["scripted backend".to_owned()]
    }
}
