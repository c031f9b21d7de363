use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use trellis::container::{BuildRequest, ContainerBuilder, ContainerHandle};
use trellis::context::current_context;
use trellis::handlers::HandlerRegistry;
use trellis::module::ModuleId;

/// How a module's container should misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    BuildError,
    BuildPanic,
    ScheduleError,
    DestroyError,
    DestroyPanic,
}

/// One call to [`RecordingBuilder::build`].
#[derive(Clone)]
pub struct BuildRecord {
    pub module: ModuleId,
    pub paths: Vec<String>,
    /// Name of the resolution context in effect while building
    pub context: Option<String>,
    pub handlers: Arc<HandlerRegistry>,
}

/// Counters for one container handed out by the builder.
#[derive(Debug)]
pub struct HandleStats {
    pub module: ModuleId,
    scheduled: AtomicUsize,
    destroyed: AtomicUsize,
}

impl HandleStats {
    pub fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

pub struct RecordingHandle {
    stats: Arc<HandleStats>,
    fail: Option<FailMode>,
}

impl ContainerHandle for RecordingHandle {
    fn schedule(&self) -> anyhow::Result<()> {
        self.stats.scheduled.fetch_add(1, Ordering::SeqCst);
        if self.fail == Some(FailMode::ScheduleError) {
            anyhow::bail!("schedule refused for {}", self.stats.module);
        }
        Ok(())
    }

    fn destroy(&self) -> anyhow::Result<()> {
        self.stats.destroyed.fetch_add(1, Ordering::SeqCst);
        match self.fail {
            Some(FailMode::DestroyError) => anyhow::bail!("destroy refused for {}", self.stats.module),
            Some(FailMode::DestroyPanic) => panic!("destroy exploded for {}", self.stats.module),
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
struct Inner {
    builds: Mutex<Vec<BuildRecord>>,
    handles: Mutex<Vec<Arc<HandleStats>>>,
    failures: DashMap<ModuleId, FailMode>,
    delay: Mutex<Option<Duration>>,
}

/// [`ContainerBuilder`] that hands out [`RecordingHandle`]s and remembers
/// every build it was asked for. Clones share their records.
#[derive(Clone, Default)]
pub struct RecordingBuilder {
    inner: Arc<Inner>,
}

impl RecordingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, module: ModuleId, mode: FailMode) -> &Self {
        self.inner.failures.insert(module, mode);
        self
    }

    /// Sleep this long inside every build.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.inner.delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
        self
    }

    pub fn builds(&self) -> Vec<BuildRecord> {
        self.inner
            .builds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn build_count(&self) -> usize {
        self.inner
            .builds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn builds_for(&self, module: ModuleId) -> usize {
        self.builds().iter().filter(|b| b.module == module).count()
    }

    /// Every handle built so far, in build order.
    pub fn handles(&self) -> Vec<Arc<HandleStats>> {
        self.inner
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn handles_for(&self, module: ModuleId) -> Vec<Arc<HandleStats>> {
        self.handles()
            .into_iter()
            .filter(|h| h.module == module)
            .collect()
    }

    pub fn total_destroyed(&self) -> usize {
        self.handles().iter().map(|h| h.destroyed()).sum()
    }
}

impl ContainerBuilder for RecordingBuilder {
    fn build(&self, request: BuildRequest<'_>) -> anyhow::Result<Box<dyn ContainerHandle>> {
        let module = request.module.id();
        self.inner
            .builds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(BuildRecord {
                module,
                paths: request.paths.to_vec(),
                context: current_context().map(|c| c.name().to_string()),
                handlers: Arc::clone(request.handlers),
            });

        let delay = *self.inner.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let fail = self.inner.failures.get(&module).map(|f| *f);
        match fail {
            Some(FailMode::BuildError) => anyhow::bail!("build refused for {}", module),
            Some(FailMode::BuildPanic) => panic!("build exploded for {}", module),
            _ => {}
        }

        let stats = Arc::new(HandleStats {
            module,
            scheduled: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
        });
        self.inner
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&stats));

        Ok(Box::new(RecordingHandle { stats, fail }))
    }
}
