//! One in-flight lookup and its state machine.
//!
//! `Search` itself is purely synchronous — it holds no timer and spawns no
//! tasks. [`crate::runner::Runner`] drives it: it owns the one-shot,
//! self-rescheduling timer and the outstanding-RPC tasks, and calls
//! `step`/`on_reply` in response to their completion. This split keeps the
//! state machine trivially unit-testable without needing a runtime in this
//! module's own tests.

use crate::address::{Address, Target};
use crate::collaborators::Environment;
use crate::consts::MAX_REQUESTS_PER_SEARCH;
use crate::frontier::Frontier;
use crate::pipeline::{self, PipelineReport};
use crate::wire::FindNodeQuery;

/// What a `Search` wants to happen next.
#[derive(Debug)]
pub enum StepOutcome {
    /// Budget exhausted or the frontier is empty: the search is over.
    Terminal,
    /// Send `query` to `to` and count it against the request budget.
    Dispatched { to: Address, query: FindNodeQuery },
}

/// An event delivered to a search's caller-supplied observer.
#[derive(Debug, Clone)]
pub enum SearchEvent {
    /// A reply arrived, in-order or late.
    Reply { from: Address, latency: std::time::Duration },
    /// The search is finished; delivered exactly once, always last.
    Terminal,
}

/// A point-in-time snapshot of a search, for [`crate::runner::Runner::inspect`].
#[derive(Debug, Clone, Default)]
pub struct SearchSnapshot {
    pub target: Option<Target>,
    pub last_asked: Option<Address>,
    pub total_requests: u32,
    pub active_searches: usize,
}

pub struct Search<E: Environment> {
    env: E,
    my_address: Target,
    target: Target,
    frontier: Frontier,
    total_requests: u32,
    last_asked: Option<Address>,
    terminal: bool,
}

impl<E: Environment> Search<E> {
    pub fn new(env: E, my_address: Target, target: Target, seed: Vec<Address>) -> Self {
        let mut frontier = Frontier::new(target);
        for addr in seed {
            frontier.add(addr);
        }
        Self {
            env,
            my_address,
            target,
            frontier,
            total_requests: 0,
            last_asked: None,
            terminal: false,
        }
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        SearchSnapshot {
            target: Some(self.target),
            last_asked: self.last_asked,
            total_requests: self.total_requests,
            active_searches: 0,
        }
    }

    /// Picks the next candidate and dispatches, or terminates.
    ///
    /// Called whenever a reply arrives (in-order or late) and on every
    /// progress-timer firing. Idempotent once terminal: calling `step` again
    /// after termination just returns `Terminal` again without touching
    /// anything (budget exhaustion and frontier exhaustion are both sticky).
    pub fn step(&mut self) -> StepOutcome {
        if self.terminal {
            return StepOutcome::Terminal;
        }
        loop {
            if self.total_requests >= MAX_REQUESTS_PER_SEARCH {
                self.terminal = true;
                return StepOutcome::Terminal;
            }
            let candidate = match self.frontier.next_unqueried() {
                Some(c) => c,
                None => {
                    self.terminal = true;
                    return StepOutcome::Terminal;
                }
            };

            let best = match self.env.best_for_path(&candidate) {
                Some(n) if n.same_key(&candidate) => n,
                // StaleRoute: the resolved best no longer matches the
                // candidate's key (or there is no node at all for this
                // path anymore) — discard and try the next candidate
                // without spending a request.
                _ => continue,
            };

            self.last_asked = Some(best);
            self.total_requests += 1;
            return StepOutcome::Dispatched {
                to: best,
                query: FindNodeQuery::new(self.target),
            };
        }
    }

    /// Feeds a reply through the response pipeline. Does not itself call
    /// `step` — the caller (`Runner`) invokes `step` after.
    pub fn on_reply(
        &mut self,
        from: Address,
        reply: crate::wire::FindNodeReply,
    ) -> PipelineReport {
        let last_asked = match self.last_asked {
            Some(a) => a,
            None => return PipelineReport::default(),
        };
        pipeline::ingest(
            &self.env,
            &self.my_address,
            &self.target,
            &from,
            &last_asked,
            &reply,
            &mut self.frontier,
        )
    }
}
