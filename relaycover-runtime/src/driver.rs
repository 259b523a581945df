//! Aggregation Driver
//!
//! Orchestrates one run: user data, contact list, background profiles, then
//! the batched relay-list analysis. All run state is owned by a single actor
//! task; network work happens in spawned tasks that report back through the
//! actor's mailbox. Loading a new user cancels the previous run as a unit and
//! starts a fresh actor with fresh channels, so stale results have nowhere to
//! land.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relaycover_core::{
    analyze_coverage, decode_identity, dedup_relay_urls, kind, normalize_relay_url,
    parse_contact_list, parse_profile, parse_relay_list, read_relays, sort_by_coverage,
    CoverageConfig, Event, FolloweeAnalysis, Identity, LatestEventTracker, Profile,
    RelayDescriptor, RelayHealth, RelaySource, RelayState, RelayStatusEntry, SourceFlags,
};
use relaycover_pool::RelayPool;

use crate::error::DriverError;
use crate::fetch::Fetcher;
use crate::messages::StatusMessage;
use crate::profile_cache::ProfileCache;
use crate::scheduler::{BatchReport, BatchScheduler};
use crate::session::{SessionEvent, SessionRequest, SubscriptionSession};

/// Where a run stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    LoadingUserData,
    LoadingFollowees,
    Ready,
    Analyzing,
    Complete,
}

/// Snapshot emitted while the user and their followees load
#[derive(Debug, Clone, Serialize)]
pub struct LoadUpdate {
    pub phase: Phase,
    pub user_profile: Option<Profile>,
    pub user_relays: Vec<RelayDescriptor>,
    pub followees: Vec<Identity>,
    pub followee_analyses: Vec<FolloweeAnalysis>,
    pub status: StatusMessage,
}

/// Snapshot emitted while followees are analyzed
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisUpdate {
    pub followee_analyses: Vec<FolloweeAnalysis>,
    pub relay_statuses: Vec<RelayStatusEntry>,
    pub status: StatusMessage,
    pub is_analyzing: bool,
}

struct Context {
    pool: Arc<dyn RelayPool>,
    cache: Arc<dyn ProfileCache>,
    health: Arc<RelayHealth>,
    config: CoverageConfig,
}

type AnalysisReply = oneshot::Sender<Result<mpsc::UnboundedReceiver<AnalysisUpdate>, DriverError>>;

enum Command {
    Analyze { flags: SourceFlags, reply: AnalysisReply },
}

enum Internal {
    Profile(Event),
    RelayEvent(Event),
    RelayState { relay: String, state: RelayState },
    ProfilesDone(BatchReport),
    AnalysisDone(BatchReport),
}

struct RunControl {
    id: String,
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
}

/// Entry point for callers. Cheap to share behind an `Arc`.
pub struct Aggregator {
    ctx: Arc<Context>,
    current: Mutex<Option<RunControl>>,
}

impl Aggregator {
    pub fn new(pool: Arc<dyn RelayPool>, cache: Arc<dyn ProfileCache>, config: CoverageConfig) -> Self {
        let health = Arc::new(RelayHealth::new(config.failure_threshold));
        Self {
            ctx: Arc::new(Context {
                pool,
                cache,
                health,
                config,
            }),
            current: Mutex::new(None),
        }
    }

    pub fn health(&self) -> &RelayHealth {
        &self.ctx.health
    }

    pub fn config(&self) -> &CoverageConfig {
        &self.ctx.config
    }

    /// Start loading `input` (npub or hex).
    ///
    /// Invalid input yields a single `InvalidPubkey` update and leaves any
    /// running analysis alone. Valid input cancels the previous run first.
    pub fn load_user(&self, input: &str) -> mpsc::UnboundedReceiver<LoadUpdate> {
        let (load_tx, load_rx) = mpsc::unbounded_channel();

        let Some(user) = decode_identity(input) else {
            warn!("Rejected pubkey input {:?}", input);
            let _ = load_tx.send(LoadUpdate {
                phase: Phase::Idle,
                user_profile: None,
                user_relays: Vec::new(),
                followees: Vec::new(),
                followee_analyses: Vec::new(),
                status: StatusMessage::InvalidPubkey,
            });
            return load_rx;
        };

        let cancel = CancellationToken::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();

        let previous = self.current.lock().replace(RunControl {
            id: id.clone(),
            cancel: cancel.clone(),
            commands: commands_tx,
        });
        if let Some(previous) = previous {
            debug!("[{}] Cancelled by new run {}", previous.id, id);
            previous.cancel.cancel();
        }

        info!("[{}] Loading {}", id, user.short());
        let run = Run::new(id, self.ctx.clone(), cancel, user, load_tx, internal_tx);
        tokio::spawn(run.drive(commands_rx, internal_rx));
        load_rx
    }

    /// Start analyzing the loaded followees.
    pub async fn start_analysis(
        &self,
        flags: SourceFlags,
    ) -> Result<mpsc::UnboundedReceiver<AnalysisUpdate>, DriverError> {
        let (reply, response) = oneshot::channel();
        {
            let current = self.current.lock();
            let control = current.as_ref().ok_or(DriverError::NotReady)?;
            control
                .commands
                .send(Command::Analyze { flags, reply })
                .map_err(|_| DriverError::NotReady)?;
        }
        response.await.map_err(|_| DriverError::NotReady)?
    }

    /// Cancel the current run, if any
    pub fn cancel(&self) {
        if let Some(control) = self.current.lock().take() {
            debug!("[{}] Cancelled", control.id);
            control.cancel.cancel();
        }
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Default)]
struct SourceEvents {
    directory: Option<Event>,
    legacy: Option<Event>,
}

struct Run {
    id: String,
    ctx: Arc<Context>,
    cancel: CancellationToken,
    /// Background work; cancelled with the run or once analysis completes
    tasks: CancellationToken,
    phase: Phase,
    status: StatusMessage,
    user: Identity,
    user_profile: Option<Profile>,
    user_relays: Vec<RelayDescriptor>,
    user_read_relays: Vec<String>,
    followees: Vec<Identity>,
    analyses: Vec<FolloweeAnalysis>,
    flags: SourceFlags,
    sources: HashMap<Identity, SourceEvents>,
    analyzed: HashSet<Identity>,
    backfilled: HashSet<Identity>,
    relay_statuses: Vec<RelayStatusEntry>,
    load_tx: mpsc::UnboundedSender<LoadUpdate>,
    analysis_tx: Option<mpsc::UnboundedSender<AnalysisUpdate>>,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

impl Run {
    fn new(
        id: String,
        ctx: Arc<Context>,
        cancel: CancellationToken,
        user: Identity,
        load_tx: mpsc::UnboundedSender<LoadUpdate>,
        internal_tx: mpsc::UnboundedSender<Internal>,
    ) -> Self {
        let tasks = cancel.child_token();
        Self {
            id,
            ctx,
            cancel,
            tasks,
            phase: Phase::Idle,
            status: StatusMessage::Idle,
            user,
            user_profile: None,
            user_relays: Vec::new(),
            user_read_relays: Vec::new(),
            followees: Vec::new(),
            analyses: Vec::new(),
            flags: SourceFlags::default(),
            sources: HashMap::new(),
            analyzed: HashSet::new(),
            backfilled: HashSet::new(),
            relay_statuses: Vec::new(),
            load_tx,
            analysis_tx: None,
            internal_tx,
        }
    }

    fn fetcher(&self) -> Fetcher {
        Fetcher::new(self.ctx.pool.clone(), self.ctx.health.clone(), &self.ctx.config)
    }

    fn bootstrap(&self) -> Vec<String> {
        self.ctx.config.bootstrap_relays.clone()
    }

    /// Every relay the user lists plus the bootstrap set
    fn discovery_relays(&self) -> Vec<String> {
        dedup_relay_urls(
            self.user_relays
                .iter()
                .map(|r| r.url.clone())
                .chain(self.bootstrap()),
        )
    }

    /// Relays the analysis queries: the user's read relays plus bootstrap
    fn analysis_relays(&self) -> Vec<String> {
        dedup_relay_urls(self.user_read_relays.iter().cloned().chain(self.bootstrap()))
    }

    async fn drive(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        if !self.load().await {
            return;
        }

        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("[{}] Run cancelled", self.id);
                    return;
                }
                Some(message) = internal.recv() => {
                    if self.handle(message) {
                        return;
                    }
                }
                command = commands.recv() => match command {
                    Some(Command::Analyze { flags, reply }) => {
                        let _ = reply.send(self.start_analysis(flags));
                    }
                    None => return,
                },
            }
        }
    }

    /// User data and followees. Returns false when the run ends here.
    async fn load(&mut self) -> bool {
        self.phase = Phase::LoadingUserData;
        self.emit_load(StatusMessage::LoadingRelays);

        let fetcher = self.fetcher();
        let bootstrap = self.bootstrap();
        let (relay_list, metadata) = tokio::join!(
            fetcher.latest(&self.user, kind::RELAY_LIST, &bootstrap, &self.cancel),
            fetcher.latest(&self.user, kind::METADATA, &bootstrap, &self.cancel),
        );
        if self.cancel.is_cancelled() {
            return false;
        }

        self.user_relays = relay_list.as_ref().map(parse_relay_list).unwrap_or_default();
        self.user_read_relays = read_relays(&self.user_relays);
        self.user_profile = Some(match metadata {
            Some(event) => {
                let profile = parse_profile(&event);
                self.ctx.cache.put(profile.clone());
                profile
            }
            None => self
                .ctx
                .cache
                .get(&self.user)
                .unwrap_or_else(|| Profile::empty(self.user.clone())),
        });
        debug!(
            "[{}] User lists {} relays ({} read)",
            self.id,
            self.user_relays.len(),
            self.user_read_relays.len()
        );

        self.phase = Phase::LoadingFollowees;
        self.emit_load(StatusMessage::LoadingFollowees);

        let contacts = fetcher
            .latest(&self.user, kind::CONTACT_LIST, &self.discovery_relays(), &self.cancel)
            .await;
        if self.cancel.is_cancelled() {
            return false;
        }

        self.followees = contacts.as_ref().map(parse_contact_list).unwrap_or_default();
        if self.followees.is_empty() {
            info!("[{}] No followees found", self.id);
            self.phase = Phase::Idle;
            self.emit_load(StatusMessage::NoFollowees);
            return false;
        }

        self.analyses = self
            .followees
            .iter()
            .map(|id| {
                let profile = self.ctx.cache.get(id).unwrap_or_else(|| Profile::empty(id.clone()));
                FolloweeAnalysis::pending(profile)
            })
            .collect();

        info!("[{}] Found {} followees", self.id, self.followees.len());
        self.phase = Phase::Ready;
        self.emit_load(StatusMessage::FoundFollowees {
            count: self.followees.len(),
        });

        self.spawn_profile_fetch();
        true
    }

    fn start_analysis(
        &mut self,
        flags: SourceFlags,
    ) -> Result<mpsc::UnboundedReceiver<AnalysisUpdate>, DriverError> {
        match self.phase {
            Phase::Ready => {}
            Phase::Analyzing => return Err(DriverError::AlreadyAnalyzing),
            _ => return Err(DriverError::NotReady),
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.analysis_tx = Some(tx);
        self.flags = flags;
        self.phase = Phase::Analyzing;

        let endpoints = self.analysis_relays();
        self.relay_statuses = endpoints.iter().map(RelayStatusEntry::waiting).collect();
        info!(
            "[{}] Analyzing {} followees over {} relays (kinds {:?})",
            self.id,
            self.followees.len(),
            endpoints.len(),
            flags.kinds()
        );

        self.emit_analysis(StatusMessage::Analyzing {
            current: 0,
            total: self.followees.len(),
        });
        self.spawn_analysis(endpoints);
        Ok(rx)
    }

    /// Apply one mailbox message. Returns true when the run is over.
    fn handle(&mut self, message: Internal) -> bool {
        if self.phase == Phase::Complete {
            return true;
        }
        match message {
            Internal::Profile(event) => self.apply_profile(event),
            Internal::RelayEvent(event) => self.apply_relay_event(event),
            Internal::RelayState { relay, state } => self.apply_relay_state(&relay, state),
            Internal::ProfilesDone(report) => {
                debug!(
                    "[{}] Profile fetch finished {}/{} batches",
                    self.id, report.finished, report.batches
                );
            }
            Internal::AnalysisDone(report) => {
                self.finish_analysis(report);
                return true;
            }
        }
        false
    }

    fn apply_profile(&mut self, event: Event) {
        let profile = parse_profile(&event);
        self.ctx.cache.put(profile.clone());

        let Some(record) = self.analyses.iter_mut().find(|a| a.identity() == &event.author) else {
            return;
        };
        record.profile = record.profile.clone().superseded_by(profile);
        self.emit_current();
    }

    fn apply_relay_event(&mut self, event: Event) {
        let author = event.author.clone();
        if !self.analyses.iter().any(|a| a.identity() == &author) {
            return;
        }

        let sources = self.sources.entry(author.clone()).or_default();
        match event.kind {
            kind::RELAY_LIST => sources.directory = Some(event),
            kind::CONTACT_LIST => sources.legacy = Some(event),
            _ => return,
        }

        let source = RelaySource::select(sources.directory.as_ref(), sources.legacy.as_ref(), self.flags);
        let Some(write) = source.write_relays() else {
            return;
        };
        let report = analyze_coverage(&write, &self.user_read_relays);
        debug!(
            "[{}] {} via {}: {}/{} write relays readable",
            self.id,
            author.short(),
            source.label(),
            report.coverage,
            write.len()
        );

        let mut missing_profile = false;
        if let Some(record) = self.analyses.iter_mut().find(|a| a.identity() == &author) {
            missing_profile = record.profile.is_missing();
            *record = FolloweeAnalysis::analyzed(record.profile.clone(), write.clone(), report);
        }
        self.analyzed.insert(author.clone());
        sort_by_coverage(&mut self.analyses);

        if missing_profile && !write.is_empty() && self.backfilled.insert(author.clone()) {
            self.spawn_profile_backfill(author, write);
        }

        self.emit_analysis(StatusMessage::Analyzing {
            current: self.analyzed.len(),
            total: self.followees.len(),
        });
    }

    fn apply_relay_state(&mut self, relay: &str, state: RelayState) {
        let key = normalize_relay_url(relay);
        let Some(entry) = self
            .relay_statuses
            .iter_mut()
            .find(|e| normalize_relay_url(&e.url) == key)
        else {
            return;
        };
        let next = entry.state.transition(state);
        if next == entry.state {
            return;
        }
        entry.state = next;
        self.emit_current();
    }

    fn finish_analysis(&mut self, report: BatchReport) {
        self.tasks.cancel();
        self.phase = Phase::Complete;
        info!(
            "[{}] Analysis complete: {}/{} followees, {}/{} batches",
            self.id,
            self.analyzed.len(),
            self.followees.len(),
            report.finished,
            report.batches
        );
        self.emit_analysis(StatusMessage::AnalysisComplete {
            count: self.analyzed.len(),
            total: self.followees.len(),
        });
    }

    fn spawn_profile_fetch(&self) {
        let scheduler = BatchScheduler::from_config(&self.ctx.config);
        let session = SubscriptionSession::new(
            self.ctx.pool.clone(),
            self.ctx.health.clone(),
            Arc::new(Mutex::new(LatestEventTracker::new())),
        );
        let endpoints = self.discovery_relays();
        let followees = self.followees.clone();
        let timeout = self.ctx.config.timeout();
        let cancel = self.tasks.clone();
        let tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let report = scheduler
                .run(&followees, &cancel, |_, batch| {
                    let session = session.clone();
                    let request = SessionRequest {
                        authors: batch,
                        kinds: vec![kind::METADATA],
                        endpoints: endpoints.clone(),
                        limit: None,
                        timeout,
                    };
                    let cancel = cancel.clone();
                    let tx = tx.clone();
                    async move {
                        session
                            .run(request, &cancel, |event| {
                                if let SessionEvent::NewBest { event, .. } = event {
                                    let _ = tx.send(Internal::Profile(event));
                                }
                            })
                            .await;
                    }
                })
                .await;
            if !cancel.is_cancelled() {
                let _ = tx.send(Internal::ProfilesDone(report));
            }
        });
    }

    fn spawn_profile_backfill(&self, author: Identity, write_relays: Vec<String>) {
        let fetcher = self.fetcher();
        let cancel = self.tasks.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let found = fetcher
                .latest(&author, kind::METADATA, &write_relays, &cancel)
                .await;
            if let Some(event) = found {
                if !cancel.is_cancelled() {
                    let _ = tx.send(Internal::Profile(event));
                }
            }
        });
    }

    fn spawn_analysis(&self, endpoints: Vec<String>) {
        let kinds = self.flags.kinds();
        let tx = self.internal_tx.clone();
        if kinds.is_empty() {
            let _ = tx.send(Internal::AnalysisDone(BatchReport::default()));
            return;
        }

        let scheduler = BatchScheduler::from_config(&self.ctx.config);
        let session = SubscriptionSession::new(
            self.ctx.pool.clone(),
            self.ctx.health.clone(),
            Arc::new(Mutex::new(LatestEventTracker::new())),
        );
        let followees = self.followees.clone();
        let timeout = self.ctx.config.timeout();
        let cancel = self.tasks.clone();

        tokio::spawn(async move {
            let report = scheduler
                .run(&followees, &cancel, |_, batch| {
                    let session = session.clone();
                    let request = SessionRequest {
                        authors: batch,
                        kinds: kinds.clone(),
                        endpoints: endpoints.clone(),
                        limit: None,
                        timeout,
                    };
                    let cancel = cancel.clone();
                    let tx = tx.clone();
                    async move {
                        session
                            .run(request, &cancel, |event| {
                                let message = match event {
                                    SessionEvent::NewBest { event, .. } => Internal::RelayEvent(event),
                                    SessionEvent::RelayState { relay, state } => {
                                        Internal::RelayState { relay, state }
                                    }
                                };
                                let _ = tx.send(message);
                            })
                            .await;
                    }
                })
                .await;
            if !cancel.is_cancelled() {
                let _ = tx.send(Internal::AnalysisDone(report));
            }
        });
    }

    fn emit_load(&mut self, status: StatusMessage) {
        self.status = status;
        let _ = self.load_tx.send(LoadUpdate {
            phase: self.phase,
            user_profile: self.user_profile.clone(),
            user_relays: self.user_relays.clone(),
            followees: self.followees.clone(),
            followee_analyses: self.analyses.clone(),
            status,
        });
    }

    fn emit_analysis(&mut self, status: StatusMessage) {
        self.status = status;
        if let Some(tx) = &self.analysis_tx {
            let _ = tx.send(AnalysisUpdate {
                followee_analyses: self.analyses.clone(),
                relay_statuses: self.relay_statuses.clone(),
                status,
                is_analyzing: self.phase == Phase::Analyzing,
            });
        }
    }

    /// Re-emit the latest status on whichever stream is live
    fn emit_current(&mut self) {
        let status = self.status;
        if self.analysis_tx.is_some() {
            self.emit_analysis(status);
        } else {
            self.emit_load(status);
        }
    }
}
