//! Owns the set of active searches; enforces the global concurrency cap;
//! exposes `start` and `inspect`.
//!
//! Active searches live in a handle-indexed slab rather than an intrusive
//! linked list, so freeing one is an O(1) index operation with no pointer
//! surgery.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::address::{Address, Target};
use crate::collaborators::Environment;
use crate::config::RunnerConfig;
use crate::error::{AdmissionRefusedReason, SearchError};
use crate::search::{Search, SearchEvent, SearchSnapshot, StepOutcome};
use crate::wire::FindNodeReply;

/// The caller's view of a started search: a stream of [`SearchEvent`]s
/// terminated by exactly one [`SearchEvent::Terminal`].
pub struct SearchHandle {
    pub events: mpsc::UnboundedReceiver<SearchEvent>,
}

struct SearchSlot<E: Environment> {
    search: Search<E>,
    sender: mpsc::UnboundedSender<SearchEvent>,
    /// The progress-timer loop and every outstanding reply-waiting task,
    /// aborted together when the search is freed.
    tasks: Vec<JoinHandle<()>>,
}

struct RunnerInner<E: Environment> {
    my_address: Target,
    env: E,
    config: RunnerConfig,
    slab: Vec<Option<Rc<RefCell<SearchSlot<E>>>>>,
    free_list: Vec<usize>,
    /// Cardinality of the live (`Some`) slab entries — kept as an explicit
    /// counter, mirroring `SearchRunner_pvt.searches`, rather than derived
    /// by scanning, so the fatal bookkeeping assertion below is cheap and
    /// exact.
    count: usize,
}

impl<E: Environment> RunnerInner<E> {
    fn insert(&mut self, slot: Rc<RefCell<SearchSlot<E>>>) -> usize {
        let index = match self.free_list.pop() {
            Some(i) => {
                self.slab[i] = Some(slot);
                i
            }
            None => {
                self.slab.push(Some(slot));
                self.slab.len() - 1
            }
        };
        self.count += 1;
        index
    }

    fn remove(&mut self, index: usize) -> Option<Rc<RefCell<SearchSlot<E>>>> {
        let slot = self.slab.get_mut(index)?.take()?;
        // Fatal, not soft: the on-free hook observing a non-positive live
        // count means the slab's own bookkeeping is broken.
        debug_assert!(self.count > 0, "active_count underflow on search free");
        self.count -= 1;
        self.free_list.push(index);
        Some(slot)
    }
}

/// Drives the set of active searches for one DHT instance. Single-threaded
/// cooperative: every `Runner` method and every task it spawns runs on the
/// same `tokio::task::LocalSet`.
pub struct Runner<E: Environment> {
    inner: Rc<RefCell<RunnerInner<E>>>,
}

impl<E: Environment> Clone for Runner<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: Environment> Runner<E> {
    pub fn new(my_address: Target, env: E, config: RunnerConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(RunnerInner {
                my_address,
                env,
                config,
                slab: Vec::new(),
                free_list: Vec::new(),
                count: 0,
            })),
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.borrow().count
    }

    /// Admits and starts a new search for `target`.
    ///
    /// Soft failure: refuses when the concurrency cap is already exceeded
    /// (admission tests `active_count > max_concurrent`, so up to
    /// `max_concurrent + 1` searches can be active) or when the local
    /// routing table has no seed nodes for this target.
    #[instrument(skip(self), fields(target = %hex::encode(&target[..4])))]
    pub fn start(&self, target: Target) -> Result<SearchHandle, SearchError> {
        let (env, max_concurrent, k, min_version, my_address) = {
            let inner = self.inner.borrow();
            (
                inner.env.clone(),
                inner.config.max_concurrent_searches,
                inner.config.k,
                inner.config.current_protocol_version,
                inner.my_address,
            )
        };

        let active = self.active_count();
        if active > max_concurrent {
            debug!(active, max_concurrent, "skipping search: already at capacity");
            return Err(SearchError::AdmissionRefused(
                AdmissionRefusedReason::ConcurrencyCapReached {
                    active,
                    max: max_concurrent,
                },
            ));
        }

        let seed = env.closest(&target, k, min_version);
        if seed.is_empty() {
            debug!("no nodes available for beginning search");
            return Err(SearchError::AdmissionRefused(
                AdmissionRefusedReason::EmptySeed,
            ));
        }
        debug!(seed_len = seed.len(), "beginning search");

        let search = Search::new(env, my_address, target, seed);
        let (tx, rx) = mpsc::unbounded_channel();
        let slot = Rc::new(RefCell::new(SearchSlot {
            search,
            sender: tx,
            tasks: Vec::new(),
        }));
        let index = self.inner.borrow_mut().insert(slot.clone());

        // Trigger the first step immediately but asynchronously: control
        // returns to the caller before any RPC is dispatched.
        let weak = Rc::downgrade(&self.inner);
        let timer = tokio::task::spawn_local(Self::timer_loop(weak, index, Duration::ZERO));
        slot.borrow_mut().tasks.push(timer);

        Ok(SearchHandle { events: rx })
    }

    /// Snapshot of the search at slab position `index`, or an empty record
    /// if out of range. The traversal order across calls is stable for a
    /// fixed set of searches but is not part of the public contract.
    pub fn inspect(&self, index: usize) -> SearchSnapshot {
        let inner = self.inner.borrow();
        let mut snapshot = inner
            .slab
            .get(index)
            .and_then(|slot| slot.as_ref())
            .map(|slot| slot.borrow().search.snapshot())
            .unwrap_or_default();
        snapshot.active_searches = inner.count;
        snapshot
    }

    /// The one-shot progress timer: fires immediately (delay 0) the first
    /// time, then keeps re-arming itself to `router.search_timeout()` for
    /// as long as the search lives. Replies never touch this loop — only
    /// the timer rearms itself.
    async fn timer_loop(weak: Weak<RefCell<RunnerInner<E>>>, index: usize, first_delay: Duration) {
        let mut delay = first_delay;
        loop {
            tokio::time::sleep(delay).await;

            let (slot, next_delay) = {
                let inner_rc = match weak.upgrade() {
                    Some(rc) => rc,
                    None => return,
                };
                let inner = inner_rc.borrow();
                let slot = match inner.slab.get(index).and_then(|s| s.clone()) {
                    Some(slot) => slot,
                    None => return, // freed
                };
                (slot, inner.env.search_timeout())
            };

            if slot.borrow().search.is_terminal() {
                return;
            }
            let outcome = slot.borrow_mut().search.step();
            Self::handle_step_outcome(&weak, index, &slot, outcome);
            delay = next_delay;
        }
    }

    fn handle_step_outcome(
        weak: &Weak<RefCell<RunnerInner<E>>>,
        index: usize,
        slot: &Rc<RefCell<SearchSlot<E>>>,
        outcome: StepOutcome,
    ) {
        match outcome {
            StepOutcome::Terminal => {
                let _ = slot.borrow().sender.send(SearchEvent::Terminal);
                Self::free(weak, index);
            }
            StepOutcome::Dispatched { to, query } => {
                let env = slot.borrow().search.env().clone();
                let fut = env.find_node(&to, query);
                let weak2 = weak.clone();
                let handle = tokio::task::spawn_local(Self::run_request(weak2, index, to, fut));
                slot.borrow_mut().tasks.push(handle);
            }
        }
    }

    async fn run_request(
        weak: Weak<RefCell<RunnerInner<E>>>,
        index: usize,
        to: Address,
        fut: E::FindNodeFut,
    ) {
        match fut.await {
            Ok((latency, reply)) => Self::deliver_reply(&weak, index, to, latency, reply),
            Err(err) => {
                debug!(?err, "request errored; the search's own timer will move on");
            }
        }
    }

    fn deliver_reply(
        weak: &Weak<RefCell<RunnerInner<E>>>,
        index: usize,
        from: Address,
        latency: Duration,
        reply: FindNodeReply,
    ) {
        let inner_rc = match weak.upgrade() {
            Some(rc) => rc,
            None => return,
        };
        let slot = {
            let inner = inner_rc.borrow();
            match inner.slab.get(index).and_then(|s| s.clone()) {
                Some(slot) => slot,
                None => return, // freed while the request was in flight
            }
        };
        if slot.borrow().search.is_terminal() {
            return;
        }

        let report = slot.borrow_mut().search.on_reply(from, reply);
        if !report.dropped.is_empty() {
            warn!(dropped = report.dropped.len(), "reply dropped some records");
        }
        let _ = slot
            .borrow()
            .sender
            .send(SearchEvent::Reply { from, latency });

        let outcome = slot.borrow_mut().search.step();
        Self::handle_step_outcome(weak, index, &slot, outcome);
    }

    fn free(weak: &Weak<RefCell<RunnerInner<E>>>, index: usize) {
        let inner_rc = match weak.upgrade() {
            Some(rc) => rc,
            None => return,
        };
        let slot = inner_rc.borrow_mut().remove(index);
        if let Some(slot) = slot {
            for task in slot.borrow().tasks.iter() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Key, Path};
    use crate::collaborators::RouterError;
    use crate::consts::KEY_LEN;
    use std::cell::RefCell as StdRefCell;
    use std::collections::HashMap;
    use std::future::Ready;

    #[derive(Clone, Default)]
    struct FakeEnv {
        nodes: Rc<StdRefCell<HashMap<Path, Address>>>,
        seeds: Rc<StdRefCell<Vec<Address>>>,
    }

    fn key_of(byte: u8) -> Key {
        [byte; KEY_LEN]
    }

    fn addr(path: u64, key_byte: u8) -> Address {
        Address {
            ip6: [0u8; 16],
            key: key_of(key_byte),
            path,
            version: 2,
        }
    }

    impl Environment for FakeEnv {
        type FindNodeFut = Ready<Result<(Duration, FindNodeReply), RouterError>>;

        fn closest(&self, _target: &Target, k: usize, _min_version: u32) -> Vec<Address> {
            self.seeds.borrow().iter().take(k).copied().collect()
        }

        fn best_for_path(&self, candidate: &Address) -> Option<Address> {
            self.nodes.borrow().get(&candidate.path).copied()
        }

        fn broken_path(&self, _path: Path) {}

        fn find_node(&self, _to: &Address, _query: crate::wire::FindNodeQuery) -> Self::FindNodeFut {
            std::future::ready(Ok((Duration::from_millis(1), FindNodeReply::default())))
        }

        fn search_timeout(&self) -> Duration {
            Duration::from_secs(3600)
        }

        fn add_rumor(&self, _addr: Address) {}

        fn splice(&self, inner: Path, outer: Path) -> Option<Path> {
            Some(inner ^ outer)
        }

        fn derive_prefix(&self, key: &Key) -> [u8; 16] {
            let mut out = [0u8; 16];
            out[..4].copy_from_slice(&key[..4]);
            out
        }

        fn is_valid_prefix(&self, _ip6: &[u8; 16]) -> bool {
            true
        }

        fn parse_record(&self, _bytes: &[u8]) -> Option<(Path, Key)> {
            None
        }
    }

    #[tokio::test]
    async fn empty_seed_refuses_admission_and_leaves_count_unchanged() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let env = FakeEnv::default();
                let runner = Runner::new([0u8; 16], env, RunnerConfig::default());
                assert_eq!(runner.active_count(), 0);
                let result = runner.start([1u8; 16]);
                assert!(matches!(
                    result,
                    Err(SearchError::AdmissionRefused(AdmissionRefusedReason::EmptySeed))
                ));
                assert_eq!(runner.active_count(), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn saturated_admission_refuses_the_nth_plus_one_search() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let env = FakeEnv::default();
                for i in 0..10 {
                    let a = addr(i + 1, i as u8 + 1);
                    env.nodes.borrow_mut().insert(a.path, a);
                    env.seeds.borrow_mut().push(a);
                }
                let config = RunnerConfig {
                    max_concurrent_searches: 3,
                    ..RunnerConfig::default()
                };
                let runner = Runner::new([0u8; 16], env, config);

                // Admission is strict `>`, so a fourth search is still
                // admitted against a cap of three (active == 3, 3 > 3 is
                // false) before a fifth is refused (active == 4, 4 > 3).
                let mut handles = Vec::new();
                for _ in 0..4 {
                    handles.push(runner.start([2u8; 16]).expect("should admit"));
                }
                assert_eq!(runner.active_count(), 4);

                let refused = runner.start([3u8; 16]);
                assert!(matches!(
                    refused,
                    Err(SearchError::AdmissionRefused(
                        AdmissionRefusedReason::ConcurrencyCapReached { active: 4, max: 3 }
                    ))
                ));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn a_started_search_eventually_reports_terminal() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let env = FakeEnv::default();
                let seed = addr(1, 1);
                env.nodes.borrow_mut().insert(seed.path, seed);
                env.seeds.borrow_mut().push(seed);

                let runner = Runner::new([0u8; 16], env, RunnerConfig::default());
                let mut handle = runner.start([9u8; 16]).expect("should admit");

                // Budget exhausts after MAX_REQUESTS_PER_SEARCH replies to
                // the same always-resolvable node (it never offers closer
                // candidates, so the frontier never grows).
                let mut saw_terminal = false;
                for _ in 0..32 {
                    tokio::time::advance(Duration::from_millis(1)).await;
                    tokio::task::yield_now().await;
                    if let Ok(event) = handle.events.try_recv() {
                        if matches!(event, SearchEvent::Terminal) {
                            saw_terminal = true;
                            break;
                        }
                    }
                }
                assert!(saw_terminal, "expected a terminal event eventually");
                assert_eq!(runner.active_count(), 0);
            })
            .await;
    }
}
