//! The acquisition run: identity, followings, then common followings
//!
//! One run at a time. Each run resets the acquisition record, clears the
//! graph and then only ever appends to it through node and link deltas.

use super::control::{checkpoint, sleep_cancellable, until_cancelled, Control, PipelineHandle};
use super::options::{PipelineOptions, RelationMode};
use super::state::{AcquisitionState, LoadingState, LoadingStatus};
use crate::api::{with_retry, CommonFollowings, RelationClient};
use crate::graph::{GraphNode, LinkDelta, SharedGraph, Uid};
use crate::{metrics, FollowGraphError, Result};
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Result of one common-followings lookup inside a run
struct Lookup {
    uid: Uid,
    commons: Vec<Uid>,
    from_cache: bool,
}

/// Builds the follow graph incrementally from the remote API
pub struct AcquisitionPipeline {
    client: RelationClient,
    graph: SharedGraph,
    options: PipelineOptions,
    status: watch::Sender<LoadingState>,
    control: Arc<watch::Sender<Control>>,
    acquisition: Mutex<AcquisitionState>,
}

impl AcquisitionPipeline {
    pub fn new(client: RelationClient, graph: SharedGraph, options: PipelineOptions) -> Self {
        let (status, _) = watch::channel(LoadingState::default());
        let (control, _) = watch::channel(Control::Running);
        Self {
            client,
            graph,
            options,
            status,
            control: Arc::new(control),
            acquisition: Mutex::new(AcquisitionState::default()),
        }
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Control handle for consumers
    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle::new(Arc::clone(&self.control), self.status.subscribe())
    }

    /// Latest published progress
    pub fn state(&self) -> LoadingState {
        self.status.borrow().clone()
    }

    /// Copy of the current run's acquisition record
    pub fn acquisition(&self) -> AcquisitionState {
        self.lock_acquisition().clone()
    }

    /// Start a run in the background
    ///
    /// Returns `None` without side effects when a run is already active.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let prior = self.begin()?;
        let this = Arc::clone(self);
        Some(tokio::spawn(async move { this.execute(prior).await }))
    }

    /// Run to completion on the current task
    ///
    /// Returns the final state, or `None` when a run is already active.
    pub async fn run(&self) -> Option<LoadingState> {
        let prior = self.begin()?;
        self.execute(prior).await;
        Some(self.state())
    }

    /// Atomically claim the pipeline for a new run
    fn begin(&self) -> Option<LoadingState> {
        let mut prior = None;
        self.status.send_if_modified(|state| {
            if !state.status.can_start() {
                return false;
            }
            prior = Some(std::mem::replace(state, LoadingState::starting()));
            true
        });
        if prior.is_none() {
            tracing::debug!("Run already active, ignoring start");
        } else {
            self.control.send_replace(Control::Running);
        }
        prior
    }

    async fn execute(&self, prior: LoadingState) {
        *self.lock_acquisition() = AcquisitionState::default();
        self.graph.write().await.clear();

        let mut rx = self.control.subscribe();
        let outcome = self.acquire(&mut rx).await;
        metrics::set_paused(false);

        match outcome {
            Ok(()) => {
                let stats = self.graph.read().await.stats();
                self.status.send_modify(|s| {
                    s.status = LoadingStatus::Done;
                    s.current = s.total;
                    s.current_user = None;
                });
                metrics::record_run("done");
                tracing::info!(
                    nodes = stats.node_count,
                    links = stats.link_count,
                    "Acquisition finished"
                );
            }
            Err(FollowGraphError::Cancelled) => {
                self.status.send_replace(prior);
                metrics::record_run("cancelled");
                tracing::info!("Acquisition cancelled");
            }
            Err(e) => {
                let message = failure_message(&e);
                tracing::error!(error = %e, "Acquisition failed");
                self.status.send_modify(|s| {
                    s.status = LoadingStatus::Error;
                    s.current_user = None;
                    s.error = Some(message);
                });
                metrics::record_run("error");
            }
        }
    }

    async fn acquire(&self, rx: &mut watch::Receiver<Control>) -> Result<()> {
        let my_uid = self.resolve_identity(rx).await?;
        self.lock_acquisition().my_uid = Some(my_uid);
        tracing::info!(uid = %my_uid, "Acquiring follow graph");

        self.load_followings(my_uid, rx).await?;

        let pending = self.lock_acquisition().pending().to_vec();
        self.status.send_modify(|s| {
            s.status = LoadingStatus::LoadingRelations;
            s.current = 0;
            s.total = pending.len();
        });

        match self.options.relation_mode {
            RelationMode::Sequential => self.load_relations_sequential(&pending, rx).await,
            RelationMode::Batched {
                concurrency,
                batch_delay,
            } => {
                self.load_relations_batched(&pending, concurrency, batch_delay, rx)
                    .await
            }
        }
    }

    async fn resolve_identity(&self, rx: &mut watch::Receiver<Control>) -> Result<Uid> {
        if let Some(uid) = self.options.identity_hint {
            tracing::debug!(%uid, "Using local identity");
            return Ok(uid);
        }
        match until_cancelled(rx, self.client.current_uid_remote()).await {
            Ok(uid) => Ok(uid),
            Err(FollowGraphError::Cancelled) => Err(FollowGraphError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "Could not resolve identity");
                Err(FollowGraphError::AuthenticationRequired(
                    "not authenticated".to_string(),
                ))
            }
        }
    }

    async fn load_followings(&self, uid: Uid, rx: &mut watch::Receiver<Control>) -> Result<()> {
        let page_size = self.options.page_size;
        let client = &self.client;
        let sleeper = rx.clone();
        let mut page = 1u32;
        let mut received = 0u64;
        let mut total_count;

        loop {
            if page > 1 {
                checkpoint(rx, self.options.pause_poll).await?;
            }

            let fetch = with_retry(
                &self.options.page_retry,
                "followings_page",
                move || client.fetch_followings_page(uid, page_size, page),
                |delay| sleep_cancellable(sleeper.clone(), delay),
            );
            let result = until_cancelled(rx, fetch).await?;
            checkpoint(rx, self.options.pause_poll).await?;

            total_count = result.total_count;
            received += result.items.len() as u64;
            let (added, known) = {
                let mut acq = self.lock_acquisition();
                let added = acq.record_followings(result.items.iter().map(|i| i.mid));
                if result.offset_token.is_some() {
                    acq.offset_token = result.offset_token.clone();
                }
                (added, acq.following_uids.len())
            };
            self.graph
                .write()
                .await
                .apply_node_delta(result.items.iter().map(GraphNode::from));

            self.status.send_modify(|s| {
                s.current = known;
                s.total = usize::try_from(total_count).unwrap_or(usize::MAX);
            });
            tracing::debug!(page, added, known, total = total_count, "Loaded followings page");

            let total_pages = total_count.div_ceil(u64::from(page_size));
            if result.items.is_empty() || u64::from(page) >= total_pages {
                break;
            }

            page += 1;
            sleep_cancellable(rx.clone(), self.options.page_delay).await?;
        }

        if received != total_count {
            tracing::debug!(
                received,
                total = total_count,
                "Following count differs from reported total"
            );
        }
        Ok(())
    }

    async fn load_relations_sequential(
        &self,
        pending: &[Uid],
        rx: &mut watch::Receiver<Control>,
    ) -> Result<()> {
        for &uid in pending {
            checkpoint(rx, self.options.pause_poll).await?;
            self.status.send_modify(|s| s.current_user = Some(uid));

            let lookup = until_cancelled(rx, async { Ok(self.lookup(uid).await) }).await?;
            checkpoint(rx, self.options.pause_poll).await?;

            let delay = if lookup.from_cache {
                self.options.cache_delay
            } else {
                self.options.network_delay
            };
            self.fold(lookup).await;

            sleep_cancellable(rx.clone(), delay).await?;
        }
        Ok(())
    }

    async fn load_relations_batched(
        &self,
        pending: &[Uid],
        concurrency: usize,
        batch_delay: Duration,
        rx: &mut watch::Receiver<Control>,
    ) -> Result<()> {
        let batches: Vec<&[Uid]> = pending.chunks(concurrency.max(1)).collect();
        let count = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            checkpoint(rx, self.options.pause_poll).await?;
            self.status.send_modify(|s| s.current_user = batch.first().copied());

            let lookups = join_all(batch.iter().map(|&uid| self.lookup(uid)));
            let results = until_cancelled(rx, async { Ok(lookups.await) }).await?;
            checkpoint(rx, self.options.pause_poll).await?;

            for lookup in results {
                self.fold(lookup).await;
            }
            tracing::debug!(batch = index + 1, of = count, "Processed lookup batch");

            if index + 1 < count {
                sleep_cancellable(rx.clone(), batch_delay).await?;
            }
        }
        Ok(())
    }

    /// Fetch one user's common followings; a failure yields an empty set
    async fn lookup(&self, uid: Uid) -> Lookup {
        match self
            .client
            .fetch_common_followings(uid, self.options.use_cache)
            .await
        {
            Ok(CommonFollowings { items, from_cache }) => {
                metrics::record_lookup(if from_cache { "cache" } else { "network" });
                Lookup {
                    uid,
                    commons: items.iter().map(|i| i.mid).collect(),
                    from_cache,
                }
            }
            Err(e) => {
                metrics::record_lookup("failed");
                tracing::warn!(%uid, error = %e, "Common followings lookup failed");
                Lookup {
                    uid,
                    commons: Vec::new(),
                    from_cache: false,
                }
            }
        }
    }

    /// Record a lookup and emit `uid -> other` links for graph-relevant commons
    async fn fold(&self, lookup: Lookup) {
        let (relevant, processed) = {
            let mut acq = self.lock_acquisition();
            let relevant = acq.record_relations(lookup.uid, lookup.commons);
            (relevant, acq.cursor)
        };

        let added = self
            .graph
            .write()
            .await
            .apply_link_delta(relevant.iter().map(|&other| LinkDelta::new(lookup.uid, other)));

        self.status.send_modify(|s| s.current = processed);
        tracing::debug!(
            uid = %lookup.uid,
            relevant = relevant.len(),
            added,
            from_cache = lookup.from_cache,
            "Folded common followings"
        );
    }

    fn lock_acquisition(&self) -> std::sync::MutexGuard<'_, AcquisitionState> {
        self.acquisition
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn failure_message(error: &FollowGraphError) -> String {
    match error {
        FollowGraphError::AuthenticationRequired(message) => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ListData, NavData, RelationApi, RelationItem, RetryPolicy};
    use crate::cache::{KeyValueStore, LocalStore, DEFAULT_LOCAL_QUOTA_BYTES};
    use crate::graph;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Nav,
        Followings(u32),
        Common(Uid),
    }

    #[derive(Default)]
    struct FakeApi {
        logged_in: bool,
        followings: Vec<Uid>,
        commons: HashMap<Uid, Vec<Uid>>,
        failing: HashSet<Uid>,
        /// Page fetches that fail with a transport error before succeeding
        flaky_pages: Mutex<u32>,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeApi {
        fn with_followings(ids: impl IntoIterator<Item = u64>) -> Self {
            Self {
                logged_in: true,
                followings: ids.into_iter().map(Uid::new).collect(),
                ..Default::default()
            }
        }

        fn common(mut self, uid: u64, commons: &[u64]) -> Self {
            self.commons
                .insert(Uid::new(uid), commons.iter().copied().map(Uid::new).collect());
            self
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn common_calls(&self) -> Vec<Uid> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Common(uid) => Some(uid),
                    _ => None,
                })
                .collect()
        }
    }

    fn item(uid: Uid) -> RelationItem {
        RelationItem {
            mid: uid,
            uname: format!("user{}", uid),
            face: String::new(),
            sign: String::new(),
            mtime: 0,
            attribute: 2,
        }
    }

    #[async_trait]
    impl RelationApi for FakeApi {
        async fn nav(&self) -> Result<NavData> {
            self.calls.lock().unwrap().push(Call::Nav);
            Ok(NavData {
                is_login: self.logged_in,
                mid: Uid::new(if self.logged_in { 1000 } else { 0 }),
                uname: "me".to_string(),
            })
        }

        async fn followings(&self, _uid: Uid, page_size: u32, page: u32) -> Result<ListData> {
            self.calls.lock().unwrap().push(Call::Followings(page));
            {
                let mut flaky = self.flaky_pages.lock().unwrap();
                if *flaky > 0 {
                    *flaky -= 1;
                    return Err(FollowGraphError::transport("connection reset"));
                }
            }
            let start = ((page - 1) * page_size) as usize;
            let list = self
                .followings
                .iter()
                .skip(start)
                .take(page_size as usize)
                .map(|&uid| item(uid))
                .collect();
            Ok(ListData {
                list,
                total: self.followings.len() as u64,
                offset: None,
            })
        }

        async fn fans(
            &self,
            _uid: Uid,
            _page_size: u32,
            _page: u32,
            _offset: Option<&str>,
        ) -> Result<ListData> {
            Ok(ListData {
                list: Vec::new(),
                total: 0,
                offset: None,
            })
        }

        async fn common_followings(&self, uid: Uid) -> Result<ListData> {
            self.calls.lock().unwrap().push(Call::Common(uid));
            if self.failing.contains(&uid) {
                return Err(FollowGraphError::remote(-352, "risk control"));
            }
            let list = self
                .commons
                .get(&uid)
                .map(|ids| ids.iter().map(|&u| item(u)).collect())
                .unwrap_or_default();
            Ok(ListData {
                list,
                total: 0,
                offset: None,
            })
        }
    }

    struct Harness {
        api: Arc<FakeApi>,
        cache: Arc<LocalStore>,
        pipeline: Arc<AcquisitionPipeline>,
    }

    fn harness(api: FakeApi, options: PipelineOptions) -> Harness {
        let api = Arc::new(api);
        let cache = Arc::new(LocalStore::in_memory(
            Duration::from_secs(3600),
            DEFAULT_LOCAL_QUOTA_BYTES,
        ));
        let client = RelationClient::new(api.clone(), cache.clone());
        let pipeline = Arc::new(AcquisitionPipeline::new(client, graph::shared(), options));
        Harness {
            api,
            cache,
            pipeline,
        }
    }

    fn options() -> PipelineOptions {
        PipelineOptions::default().with_identity(Uid::new(1000))
    }

    #[tokio::test(start_paused = true)]
    async fn test_pagination_requests_each_page_once() {
        let h = harness(FakeApi::with_followings(1..=123), options());

        let state = h.pipeline.run().await.unwrap();
        assert_eq!(state.status, LoadingStatus::Done);

        let pages: Vec<Call> = h
            .api
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Followings(_)))
            .collect();
        assert_eq!(
            pages,
            vec![Call::Followings(1), Call::Followings(2), Call::Followings(3)]
        );

        let acq = h.pipeline.acquisition();
        assert_eq!(acq.following_uids, (1..=123).map(Uid::new).collect::<Vec<_>>());
        assert_eq!(h.pipeline.graph().read().await.stats().node_count, 123);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_user_scenario() {
        let api = FakeApi::with_followings([1, 2]).common(1, &[2]);
        let h = harness(api, options());

        h.pipeline.run().await.unwrap();

        let graph = h.pipeline.graph().read().await;
        assert_eq!(graph.stats().node_count, 2);
        assert_eq!(graph.stats().link_count, 1);
        assert!(graph.contains_link(Uid::new(1), Uid::new(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_commons_outside_follow_set_are_ignored() {
        let api = FakeApi::with_followings([1, 2, 3])
            .common(1, &[2, 3, 77])
            .common(3, &[1]);
        let h = harness(api, options());

        h.pipeline.run().await.unwrap();

        let graph = h.pipeline.graph().read().await;
        assert_eq!(graph.stats().link_count, 3);
        assert!(!graph.contains_node(Uid::new(77)));
        assert!(graph.contains_link(Uid::new(3), Uid::new(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_lookup_failure_does_not_abort() {
        let mut api = FakeApi::with_followings([1, 2, 3]).common(3, &[1]);
        api.failing.insert(Uid::new(2));
        let h = harness(api, options());

        let state = h.pipeline.run().await.unwrap();

        assert_eq!(state.status, LoadingStatus::Done);
        assert_eq!(state.error, None);
        assert_eq!(h.api.common_calls(), [1, 2, 3].map(Uid::new));
        assert_eq!(h.pipeline.acquisition().common_followings[&Uid::new(2)], Vec::<Uid>::new());
        assert_eq!(h.pipeline.graph().read().await.stats().link_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_identity_and_auth_failure() {
        let h = harness(FakeApi::with_followings([5]), PipelineOptions::default());
        h.pipeline.run().await.unwrap();
        assert_eq!(h.api.calls()[0], Call::Nav);
        assert_eq!(h.pipeline.acquisition().my_uid, Some(Uid::new(1000)));

        let anonymous = FakeApi {
            logged_in: false,
            ..FakeApi::with_followings([5])
        };
        let h = harness(anonymous, PipelineOptions::default());
        let state = h.pipeline.run().await.unwrap();

        assert_eq!(state.status, LoadingStatus::Error);
        assert_eq!(state.error.as_deref(), Some("not authenticated"));
        assert_eq!(h.api.calls(), vec![Call::Nav]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_fetch_is_retried() {
        let api = FakeApi::with_followings([1, 2]);
        *api.flaky_pages.lock().unwrap() = 1;
        let policy = RetryPolicy {
            max_retries: 2,
            jitter: false,
            ..Default::default()
        };
        let h = harness(api, options().with_page_retry(policy));

        let state = h.pipeline.run().await.unwrap();

        assert_eq!(state.status, LoadingStatus::Done);
        assert_eq!(
            h.api.calls()[..2],
            [Call::Followings(1), Call::Followings(1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_page_retries_fail_the_run() {
        let api = FakeApi::with_followings([1, 2]);
        *api.flaky_pages.lock().unwrap() = 10;
        let h = harness(api, options().with_page_retry(RetryPolicy::none()));

        let state = h.pipeline.run().await.unwrap();

        assert_eq!(state.status, LoadingStatus::Error);
        assert!(state.error.unwrap().contains("connection reset"));
        assert!(h.api.common_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_continue_from_next_user() {
        let h = harness(FakeApi::with_followings(1..=5), options());
        let handle = h.pipeline.handle();

        let task = h.pipeline.start().unwrap();

        // Lookups run at t=0 and t=300ms; the third waits for t=600ms
        tokio::time::sleep(Duration::from_millis(450)).await;
        handle.pause();
        let seen = h.api.common_calls();
        assert_eq!(seen, [1, 2].map(Uid::new));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.api.common_calls(), seen);
        assert_eq!(h.pipeline.acquisition().cursor, 2);
        assert_eq!(handle.state().status, LoadingStatus::LoadingRelations);

        handle.resume();
        let state = handle.wait_finished().await;
        task.await.unwrap();

        assert_eq!(state.status, LoadingStatus::Done);
        assert_eq!(h.api.common_calls(), (1..=5).map(Uid::new).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_silent() {
        let h = harness(FakeApi::with_followings(1..=5), options());
        let handle = h.pipeline.handle();

        let task = h.pipeline.start().unwrap();
        tokio::time::sleep(Duration::from_millis(450)).await;
        handle.cancel();
        task.await.unwrap();

        let state = handle.state();
        assert_eq!(state.status, LoadingStatus::Idle);
        assert_eq!(state.error, None);
        assert_eq!(h.api.common_calls().len(), 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.api.common_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_ignored_while_active() {
        let h = harness(FakeApi::with_followings(1..=3), options());

        let task = h.pipeline.start().unwrap();
        assert!(h.pipeline.start().is_none());
        assert!(h.pipeline.run().await.is_none());
        task.await.unwrap();

        // Legal again once done
        let state = h.pipeline.run().await.unwrap();
        assert_eq!(state.status, LoadingStatus::Done);
        assert_eq!(h.pipeline.graph().read().await.stats().node_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_uses_cache() {
        let api = FakeApi::with_followings([1, 2]).common(1, &[2]);
        let h = harness(api, options());

        h.pipeline.run().await.unwrap();
        assert_eq!(h.api.common_calls().len(), 2);
        assert_eq!(h.cache.len().await.unwrap(), 2);

        let started = tokio::time::Instant::now();
        h.pipeline.run().await.unwrap();
        assert_eq!(h.api.common_calls().len(), 2);
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(h.pipeline.graph().read().await.stats().link_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batched_mode() {
        let api = FakeApi::with_followings(1..=7).common(1, &[2]).common(7, &[1]);
        let mode = RelationMode::Batched {
            concurrency: 3,
            batch_delay: Duration::from_secs(1),
        };
        let h = harness(api, options().with_relation_mode(mode));

        let started = tokio::time::Instant::now();
        let state = h.pipeline.run().await.unwrap();

        assert_eq!(state.status, LoadingStatus::Done);
        assert_eq!(state.current, 7);
        let mut seen = h.api.common_calls();
        seen.sort();
        assert_eq!(seen, (1..=7).map(Uid::new).collect::<Vec<_>>());
        // Three batches, two delays between them
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(h.pipeline.graph().read().await.stats().link_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_published() {
        let h = harness(FakeApi::with_followings(1..=3), options());
        let mut rx = h.pipeline.handle().subscribe();

        let task = h.pipeline.start().unwrap();
        let relations = rx
            .wait_for(|s| s.status == LoadingStatus::LoadingRelations)
            .await
            .unwrap()
            .clone();
        assert_eq!(relations.total, 3);
        task.await.unwrap();

        let done = h.pipeline.state();
        assert_eq!(done.current, 3);
        assert_eq!(done.total, 3);
        assert_eq!(done.progress(), 1.0);
    }
}
