//! Effect execution and periodic polling.
//!
//! Workers never touch `App`; every result goes back as a `Message` on the
//! one channel the event loop drains.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::notification::NotificationSink;
use crate::remote::HostPool;
use crate::settings::Settings;
use crate::types::{DirKey, Origin, SessionKey};

use super::messages::{Effect, FetchResult, Message, Poller, ProjectTasks};
use super::reconcile::StatusBaseline;
use super::runtime::SessionRuntime;
use super::{PREVIEW_LINES, SCROLLBACK_LINES};

/// Poll intervals, one per periodic ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub local: Duration,
    pub remote: Duration,
    pub vcs: Duration,
    pub resources: Duration,
    pub tasks: Duration,
    pub pr_checks: Duration,
    pub housekeeping: Duration,
    pub preview_debounce: Duration,
}

impl PollIntervals {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            local: Duration::from_millis(settings.local_poll_interval_ms),
            remote: Duration::from_millis(settings.remote_poll_interval_ms),
            vcs: Duration::from_millis(settings.vcs_poll_interval_ms),
            resources: Duration::from_millis(settings.resource_poll_interval_ms),
            tasks: Duration::from_millis(settings.task_poll_interval_ms),
            pr_checks: Duration::from_millis(settings.pr_checks_interval_ms),
            housekeeping: Duration::from_secs(1),
            preview_debounce: Duration::from_millis(settings.preview_debounce_ms),
        }
    }
}

struct Ticker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Ticker {
    fn cancel(self) {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.abort();
    }
}

pub struct Dispatcher {
    runtime: Arc<dyn SessionRuntime>,
    tx: UnboundedSender<Message>,
    hosts: HostPool,
    notifier: Arc<dyn NotificationSink>,
    intervals: PollIntervals,
    stop: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    tickers: Vec<JoinHandle<()>>,
    pr_ticker: Option<Ticker>,
    preview_generation: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn new(
        runtime: Arc<dyn SessionRuntime>,
        tx: UnboundedSender<Message>,
        hosts: HostPool,
        notifier: Arc<dyn NotificationSink>,
        intervals: PollIntervals,
    ) -> Self {
        Self {
            runtime,
            tx,
            hosts,
            notifier,
            intervals,
            stop: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            tickers: Vec::new(),
            pr_ticker: None,
            preview_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Starts every periodic ticker. Each fires once immediately.
    pub fn spawn_tickers(&mut self, with_remote: bool) {
        let mut schedule = vec![
            (Poller::Local, self.intervals.local),
            (Poller::Vcs, self.intervals.vcs),
            (Poller::Resources, self.intervals.resources),
            (Poller::Tasks, self.intervals.tasks),
            (Poller::Housekeeping, self.intervals.housekeeping),
        ];
        if with_remote {
            schedule.push((Poller::Remote, self.intervals.remote));
        }
        for (poller, interval) in schedule {
            let handle = spawn_ticker(
                poller,
                interval,
                self.tx.clone(),
                Arc::clone(&self.stop),
                Some(Arc::clone(&self.paused)),
            );
            self.tickers.push(handle);
        }
    }

    /// Ticks are dropped while paused, e.g. while the terminal is handed to
    /// an attached session.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.tickers.drain(..) {
            handle.abort();
        }
        if let Some(ticker) = self.pr_ticker.take() {
            ticker.cancel();
        }
    }

    /// Runs `effect` in the background. `Attach` and `Quit` need the terminal,
    /// so they are handed back to the caller.
    pub fn execute(&mut self, effect: Effect) -> Option<Effect> {
        match effect {
            Effect::RefreshLocal { epoch } => {
                let runtime = Arc::clone(&self.runtime);
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = blocking(move || runtime.list_local()).await;
                    let _ = tx.send(Message::LocalSessions { epoch, result });
                });
            }
            Effect::RefreshRemote { host, epoch } => {
                let runtime = Arc::clone(&self.runtime);
                let tx = self.tx.clone();
                let origin = Origin::Remote(host.clone());
                let pool = self.hosts.clone();
                tokio::spawn(async move {
                    let job_host = host.clone();
                    let result =
                        on_origin(&pool, &origin, move || runtime.list_remote(&job_host)).await;
                    let _ = tx.send(Message::RemoteSessions {
                        host,
                        epoch,
                        result,
                    });
                });
            }
            Effect::FetchVcs(dirs) => self.fetch_vcs(dirs),
            Effect::FetchResources(keys) => {
                let runtime = Arc::clone(&self.runtime);
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let batch = fan_out(keys, move |key: &SessionKey| {
                        let runtime = Arc::clone(&runtime);
                        let key = key.clone();
                        move || runtime.fetch_resources(&key)
                    })
                    .await;
                    let _ = tx.send(Message::ResourceBatch(batch));
                });
            }
            Effect::RunTaskProviders(projects) => self.run_task_providers(projects),
            Effect::FetchPrChecks { dir, requested } => {
                let runtime = Arc::clone(&self.runtime);
                let tx = self.tx.clone();
                let pool = self.hosts.clone();
                tokio::spawn(async move {
                    let job_dir = dir.clone();
                    let result =
                        on_origin(&pool, &dir.origin, move || runtime.fetch_pr_checks(&job_dir))
                            .await;
                    let _ = tx.send(Message::PrChecks {
                        dir,
                        requested,
                        result,
                    });
                });
            }
            Effect::StartPrChecksTicker => {
                if self.pr_ticker.is_none() {
                    let stop = Arc::new(AtomicBool::new(false));
                    let handle = tokio::spawn(delayed_ticker(
                        Poller::PrChecks,
                        self.intervals.pr_checks,
                        self.tx.clone(),
                        Arc::clone(&stop),
                    ));
                    self.pr_ticker = Some(Ticker { stop, handle });
                    debug!("pr checks ticker started");
                }
            }
            Effect::StopPrChecksTicker => {
                if let Some(ticker) = self.pr_ticker.take() {
                    ticker.cancel();
                    debug!("pr checks ticker stopped");
                }
            }
            Effect::CapturePreview(key) => self.capture_preview(key),
            Effect::LoadScrollback(key) => {
                let runtime = Arc::clone(&self.runtime);
                let tx = self.tx.clone();
                let pool = self.hosts.clone();
                tokio::spawn(async move {
                    let job_key = key.clone();
                    let result = on_origin(&pool, &key.origin, move || {
                        runtime.capture(&job_key, SCROLLBACK_LINES)
                    })
                    .await;
                    let _ = tx.send(Message::ScrollbackLoaded { key, result });
                });
            }
            Effect::Mutate { key, action } => {
                let runtime = Arc::clone(&self.runtime);
                let tx = self.tx.clone();
                let pool = self.hosts.clone();
                tokio::spawn(async move {
                    let (job_key, job_action) = (key.clone(), action.clone());
                    let result = on_origin(&pool, &key.origin, move || {
                        runtime.mutate(&job_key, &job_action)
                    })
                    .await;
                    if let Err(error) = &result {
                        warn!(session = %key, action = action.verb(), error = %error, "mutation failed");
                    }
                    let _ = tx.send(Message::MutationFinished {
                        key,
                        action,
                        result,
                    });
                });
            }
            Effect::Create(request) => {
                let runtime = Arc::clone(&self.runtime);
                let tx = self.tx.clone();
                let pool = self.hosts.clone();
                tokio::spawn(async move {
                    let key = request.key();
                    let origin = request.origin.clone();
                    let result = on_origin(&pool, &origin, move || runtime.create(&request)).await;
                    let _ = tx.send(Message::SessionCreated { key, result });
                });
            }
            Effect::Notify { key, status } => {
                let notifier = Arc::clone(&self.notifier);
                tokio::task::spawn_blocking(move || notifier.notify(&key, status));
            }
            Effect::OpenLink(url) => {
                tokio::task::spawn_blocking(move || {
                    if let Err(err) = open::that(&url) {
                        warn!(url = %url, error = %err, "failed to open link");
                    }
                });
            }
            effect @ (Effect::Attach(_) | Effect::Quit) => return Some(effect),
        }
        None
    }

    /// Local directories fan out one worker each; each remote host's
    /// directories run under that host's serial lock with bounded connections.
    fn fetch_vcs(&self, dirs: Vec<DirKey>) {
        let mut by_origin: BTreeMap<Origin, Vec<DirKey>> = BTreeMap::new();
        for dir in dirs {
            by_origin.entry(dir.origin.clone()).or_default().push(dir);
        }
        for (origin, dirs) in by_origin {
            let runtime = Arc::clone(&self.runtime);
            let tx = self.tx.clone();
            match origin {
                Origin::Local => {
                    tokio::spawn(async move {
                        let batch = fan_out(dirs, move |dir: &DirKey| {
                            let runtime = Arc::clone(&runtime);
                            let dir = dir.clone();
                            move || runtime.fetch_vcs(&dir)
                        })
                        .await;
                        let _ = tx.send(Message::VcsBatch(batch));
                    });
                }
                Origin::Remote(host) => {
                    let pool = self.hosts.clone();
                    tokio::spawn(async move {
                        let batch = remote_vcs_batch(runtime, pool, host, dirs).await;
                        let _ = tx.send(Message::VcsBatch(batch));
                    });
                }
            }
        }
    }

    fn run_task_providers(&self, projects: Vec<PathBuf>) {
        let runtime = Arc::clone(&self.runtime);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut set = JoinSet::new();
            for project in projects {
                let runtime = Arc::clone(&runtime);
                set.spawn(async move {
                    let job_project = project.clone();
                    let outcome = blocking(move || runtime.run_task_provider(&job_project)).await;
                    ProjectTasks { project, outcome }
                });
            }
            let mut batch = Vec::new();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(tasks) => batch.push(tasks),
                    Err(err) => warn!(error = %err, "task provider worker failed"),
                }
            }
            let _ = tx.send(Message::TaskBatch(batch));
        });
    }

    /// Only the newest request inside the debounce window runs.
    fn capture_preview(&self, key: SessionKey) {
        let generation = self.preview_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let latest = Arc::clone(&self.preview_generation);
        let debounce = self.intervals.preview_debounce;
        let runtime = Arc::clone(&self.runtime);
        let tx = self.tx.clone();
        let pool = self.hosts.clone();
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if latest.load(Ordering::SeqCst) != generation {
                return;
            }
            let job_key = key.clone();
            let result =
                on_origin(&pool, &key.origin, move || runtime.capture(&job_key, PREVIEW_LINES))
                    .await;
            let _ = tx.send(Message::PreviewCaptured { key, result });
        });
    }

    pub fn start_attach_monitor(&self, baseline: StatusBaseline) -> AttachMonitor {
        AttachMonitor::start(
            Arc::clone(&self.runtime),
            Arc::clone(&self.notifier),
            baseline,
            self.intervals.local,
        )
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn flatten(err: anyhow::Error) -> String {
    format!("{err:#}")
}

/// Runs a blocking job on the blocking pool, flattening its error.
async fn blocking<T, F>(job: F) -> FetchResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(job).await {
        Ok(result) => result.map_err(flatten),
        Err(err) => Err(format!("worker failed: {err}")),
    }
}

/// Runs a job against `origin`, holding the host's serial lock and one
/// connection permit for remote origins.
async fn on_origin<T, F>(pool: &HostPool, origin: &Origin, job: F) -> FetchResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    match origin {
        Origin::Local => blocking(job).await,
        Origin::Remote(host) => {
            let _serial = pool.serialize(host).await.map_err(flatten)?;
            let _permit = pool.connection(host).await.map_err(flatten)?;
            blocking(job).await
        }
    }
}

/// One blocking worker per key; results come back over a channel and are
/// returned as a single batch once every worker has reported.
async fn fan_out<K, T, J, F>(keys: Vec<K>, make_job: F) -> Vec<(K, FetchResult<T>)>
where
    K: Clone + Send + 'static,
    T: Send + 'static,
    J: FnOnce() -> anyhow::Result<T> + Send + 'static,
    F: Fn(&K) -> J,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    for key in keys {
        let job = make_job(&key);
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = blocking(job).await;
            let _ = tx.send((key, result));
        });
    }
    drop(tx);

    let mut batch = Vec::new();
    while let Some(entry) = rx.recv().await {
        batch.push(entry);
    }
    batch
}

async fn remote_vcs_batch(
    runtime: Arc<dyn SessionRuntime>,
    pool: HostPool,
    host: String,
    dirs: Vec<DirKey>,
) -> Vec<(DirKey, FetchResult<crate::types::VcsInfo>)> {
    let _serial = match pool.serialize(&host).await {
        Ok(guard) => guard,
        Err(err) => {
            let error = flatten(err);
            return dirs.into_iter().map(|dir| (dir, Err(error.clone()))).collect();
        }
    };

    let mut set = JoinSet::new();
    for dir in dirs {
        let runtime = Arc::clone(&runtime);
        let pool = pool.clone();
        let host = host.clone();
        set.spawn(async move {
            let result = match pool.connection(&host).await {
                Ok(_permit) => {
                    let job_dir = dir.clone();
                    blocking(move || runtime.fetch_vcs(&job_dir)).await
                }
                Err(err) => Err(flatten(err)),
            };
            (dir, result)
        });
    }

    let mut batch = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(entry) => batch.push(entry),
            Err(err) => warn!(host = %host, error = %err, "vcs worker failed"),
        }
    }
    debug!(host = %host, count = batch.len(), "remote vcs batch finished");
    batch
}

fn spawn_ticker(
    poller: Poller,
    interval: Duration,
    tx: UnboundedSender<Message>,
    stop: Arc<AtomicBool>,
    paused: Option<Arc<AtomicBool>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while !stop.load(Ordering::Relaxed) {
            let is_paused = paused
                .as_ref()
                .is_some_and(|paused| paused.load(Ordering::Relaxed));
            if !is_paused && tx.send(Message::Tick(poller)).is_err() {
                return;
            }
            interruptible_sleep(interval, &stop).await;
        }
    })
}

/// Like `spawn_ticker` but waits one interval before the first tick.
async fn delayed_ticker(
    poller: Poller,
    interval: Duration,
    tx: UnboundedSender<Message>,
    stop: Arc<AtomicBool>,
) {
    loop {
        interruptible_sleep(interval, &stop).await;
        if stop.load(Ordering::Relaxed) || tx.send(Message::Tick(poller)).is_err() {
            return;
        }
    }
}

async fn interruptible_sleep(duration: Duration, stop: &AtomicBool) {
    let chunk = Duration::from_millis(100);
    let mut remaining = duration;
    while remaining > Duration::ZERO && !stop.load(Ordering::Relaxed) {
        let sleep_duration = remaining.min(chunk);
        tokio::time::sleep(sleep_duration).await;
        remaining = remaining.saturating_sub(sleep_duration);
    }
}

/// Keeps watching local sessions while the terminal belongs to an attached
/// session. Cancelling it hands back the baseline it last observed, so the
/// reconciler neither repeats nor misses a notification.
pub struct AttachMonitor {
    stop: Arc<AtomicBool>,
    baseline: Arc<Mutex<StatusBaseline>>,
    handle: JoinHandle<()>,
}

impl AttachMonitor {
    fn start(
        runtime: Arc<dyn SessionRuntime>,
        notifier: Arc<dyn NotificationSink>,
        baseline: StatusBaseline,
        interval: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let baseline = Arc::new(Mutex::new(baseline));
        let handle = {
            let stop = Arc::clone(&stop);
            let baseline = Arc::clone(&baseline);
            tokio::spawn(async move {
                loop {
                    interruptible_sleep(interval, &stop).await;
                    if stop.load(Ordering::Relaxed) {
                        return;
                    }
                    let runtime = Arc::clone(&runtime);
                    let notifier = Arc::clone(&notifier);
                    let baseline = Arc::clone(&baseline);
                    let stop = Arc::clone(&stop);
                    // Observe and notify under the lock so `cancel` sees a
                    // baseline whose transitions were all delivered.
                    let cycle = tokio::task::spawn_blocking(move || {
                        let sessions = runtime.list_local()?;
                        let Ok(mut baseline) = baseline.lock() else {
                            return Ok(());
                        };
                        if stop.load(Ordering::Relaxed) {
                            return Ok(());
                        }
                        for (key, status) in baseline.observe(&Origin::Local, &sessions) {
                            notifier.notify(&key, status);
                        }
                        anyhow::Ok(())
                    })
                    .await;
                    match cycle {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => debug!(error = %err, "attach monitor poll failed"),
                        Err(err) => warn!(error = %err, "attach monitor worker failed"),
                    }
                }
            })
        };
        debug!("attach monitor started");
        Self {
            stop,
            baseline,
            handle,
        }
    }

    pub fn cancel(self) -> StatusBaseline {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.abort();
        let baseline = match self.baseline.lock() {
            Ok(baseline) => baseline.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        debug!("attach monitor cancelled");
        baseline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::messages::{CreateRequest, MutateAction};
    use crate::provider::ProviderOutcome;
    use crate::settings::RemoteHostConfig;
    use crate::types::{PrCheck, ResourceUsage, Session, SessionStatus, VcsInfo};
    use std::path::Path;
    use std::process::Command;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct FakeRuntime {
        statuses: Mutex<Vec<SessionStatus>>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeRuntime {
        fn track<T>(&self, value: T) -> anyhow::Result<T> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(value)
        }
    }

    impl SessionRuntime for FakeRuntime {
        fn list_local(&self) -> anyhow::Result<Vec<Session>> {
            let statuses = self.statuses.lock().unwrap();
            Ok(statuses
                .iter()
                .enumerate()
                .map(|(index, status)| {
                    let mut session = Session::new(Origin::Local, format!("s{index}"), "/w");
                    session.status = *status;
                    session
                })
                .collect())
        }
        fn list_remote(&self, _host: &str) -> anyhow::Result<Vec<Session>> {
            self.track(Vec::new())
        }
        fn fetch_vcs(&self, _dir: &DirKey) -> anyhow::Result<VcsInfo> {
            self.track(VcsInfo::default())
        }
        fn fetch_resources(&self, _key: &SessionKey) -> anyhow::Result<ResourceUsage> {
            anyhow::bail!("not sampled")
        }
        fn fetch_pr_checks(&self, _dir: &DirKey) -> anyhow::Result<Vec<PrCheck>> {
            Ok(Vec::new())
        }
        fn run_task_provider(&self, _project: &Path) -> anyhow::Result<ProviderOutcome> {
            Ok(ProviderOutcome::NotConfigured)
        }
        fn capture(&self, key: &SessionKey, _lines: usize) -> anyhow::Result<String> {
            Ok(format!("pane of {key}"))
        }
        fn mutate(&self, _key: &SessionKey, _action: &MutateAction) -> anyhow::Result<()> {
            Ok(())
        }
        fn create(&self, _request: &CreateRequest) -> anyhow::Result<()> {
            Ok(())
        }
        fn attach_command(&self, _key: &SessionKey) -> anyhow::Result<Command> {
            Ok(Command::new("true"))
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<(SessionKey, SessionStatus)>>);

    impl NotificationSink for RecordingSink {
        fn notify(&self, key: &SessionKey, status: SessionStatus) {
            self.0.lock().unwrap().push((key.clone(), status));
        }
    }

    fn intervals() -> PollIntervals {
        PollIntervals {
            local: Duration::from_millis(20),
            remote: Duration::from_secs(60),
            vcs: Duration::from_secs(60),
            resources: Duration::from_secs(60),
            tasks: Duration::from_secs(60),
            pr_checks: Duration::from_secs(60),
            housekeeping: Duration::from_secs(60),
            preview_debounce: Duration::from_millis(20),
        }
    }

    fn dispatcher(
        runtime: Arc<FakeRuntime>,
        sink: Arc<RecordingSink>,
        hosts: &[RemoteHostConfig],
    ) -> (Dispatcher, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(runtime, tx, HostPool::new(hosts), sink, intervals());
        (dispatcher, rx)
    }

    #[tokio::test]
    async fn test_local_vcs_fan_out_returns_one_batch() {
        let runtime = Arc::new(FakeRuntime::default());
        let (mut dispatcher, mut rx) =
            dispatcher(Arc::clone(&runtime), Arc::default(), &[]);
        let dirs: Vec<DirKey> = (0..4)
            .map(|i| DirKey::new(Origin::Local, format!("/w/{i}")))
            .collect();
        assert_eq!(dispatcher.execute(Effect::FetchVcs(dirs)), None);

        let Some(Message::VcsBatch(batch)) = rx.recv().await else {
            panic!("expected a vcs batch");
        };
        assert_eq!(batch.len(), 4);
        assert!(runtime.peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_remote_fan_out_respects_connection_limit() {
        let runtime = Arc::new(FakeRuntime::default());
        let hosts = [RemoteHostConfig {
            name: "build".to_string(),
            ssh_target: None,
            max_connections: 2,
        }];
        let (mut dispatcher, mut rx) =
            dispatcher(Arc::clone(&runtime), Arc::default(), &hosts);
        let dirs: Vec<DirKey> = (0..6)
            .map(|i| DirKey::new(Origin::Remote("build".to_string()), format!("/w/{i}")))
            .collect();
        dispatcher.execute(Effect::FetchVcs(dirs));

        let Some(Message::VcsBatch(batch)) = rx.recv().await else {
            panic!("expected a vcs batch");
        };
        assert_eq!(batch.len(), 6);
        assert!(runtime.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_preview_requests_are_debounced() {
        let runtime = Arc::new(FakeRuntime::default());
        let (mut dispatcher, mut rx) = dispatcher(runtime, Arc::default(), &[]);
        dispatcher.execute(Effect::CapturePreview(SessionKey::local("a")));
        dispatcher.execute(Effect::CapturePreview(SessionKey::local("b")));

        let Some(Message::PreviewCaptured { key, result }) = rx.recv().await else {
            panic!("expected a preview");
        };
        assert_eq!(key, SessionKey::local("b"));
        assert_eq!(result, Ok("pane of b".to_string()));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_attach_and_quit_are_handed_back() {
        let (mut dispatcher, _rx) = dispatcher(Arc::default(), Arc::default(), &[]);
        let attach = Effect::Attach(SessionKey::local("a"));
        assert_eq!(dispatcher.execute(attach.clone()), Some(attach));
        assert_eq!(dispatcher.execute(Effect::Quit), Some(Effect::Quit));
    }

    #[tokio::test]
    async fn test_attach_monitor_notifies_and_hands_back_baseline() {
        let runtime = Arc::new(FakeRuntime::default());
        *runtime.statuses.lock().unwrap() = vec![SessionStatus::Working];
        let sink = Arc::new(RecordingSink::default());
        let (dispatcher, _rx) = dispatcher(Arc::clone(&runtime), Arc::clone(&sink), &[]);

        let mut baseline = StatusBaseline::default();
        let seed = runtime.list_local().unwrap();
        baseline.observe(&Origin::Local, &seed);

        let monitor = dispatcher.start_attach_monitor(baseline);
        *runtime.statuses.lock().unwrap() = vec![SessionStatus::Waiting];
        tokio::time::sleep(Duration::from_millis(150)).await;
        let baseline = monitor.cancel();

        assert_eq!(
            *sink.0.lock().unwrap(),
            vec![(SessionKey::local("s0"), SessionStatus::Waiting)]
        );
        assert_eq!(
            baseline.status_of(&SessionKey::local("s0")),
            Some(SessionStatus::Waiting)
        );
    }
}
