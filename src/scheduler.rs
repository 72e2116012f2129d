//! Worker contexts and the scheduling protocol.
//!
//! A partition runs one OS thread per worker. Worker 0 is the master: the
//! thread that called [`run`] becomes it, executes the caller's closure, and
//! afterwards works like any other member of the partition until it detects
//! that no work remains anywhere.
//!
//! Workers trade tasks exclusively through messages. An idle worker sends a
//! [`StealRequest`] naming one of its task inboxes; whoever holds the
//! request either answers it with tasks through that inbox or forwards it to
//! another candidate. A request that runs out of candidates returns to its
//! origin, climbs the worker tree as a failed lifeline, and rests at the
//! parent until the parent has work to push down. The root declares global
//! termination once both of its subtrees have gone quiet and it holds no
//! work of its own.

use alloc::boxed::Box;
use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use crossbeam_utils::{Backoff, CachePadded};
use std::sync::{Barrier, Mutex};
use std::thread::Builder as ThreadBuilder;
use tracing::{debug, trace, trace_span, warn};

use crate::bits::VictimSet;
use crate::channel::{ChannelStack, LifelineQueue, RequestInbox, TaskSlot};
use crate::config::{Config, ConfigError, StealStrategy};
use crate::deque::TaskDeque;
use crate::job::{Delivery, HeapJob, JobRef, Jobs};
use crate::request::{ChannelId, RequestState, StealRequest};
use crate::tree::WorkerTree;
use crate::unwind;
use crate::util::XorShift64Star;
use crate::victim::{mark_as_idle, random_victim};

/// The root of the worker tree.
const MASTER_ID: usize = 0;

/// How many consecutive failed sends a worker tolerates before concluding
/// that a request inbox was sized wrong and halting.
const SEND_RETRY_LIMIT: usize = 1 << 22;

// -----------------------------------------------------------------------------
// Shared partition state

/// The channel endpoints and runtime flags shared by every worker in the
/// partition. This is the only cross-thread state in the scheduler; all of
/// it is either a lock-free queue, an atomic flag, or the cold teardown
/// mutex used to gather statistics.
struct Shared {
    config: Config,
    /// One steal-request inbox per worker.
    request_inboxes: Box<[RequestInbox]>,
    /// `max_steal` task inboxes per worker, indexed flat by [`ChannelId`].
    task_slots: Box<[TaskSlot]>,
    /// Advisory per-worker "deque is non-empty" flags, padded so neighbors
    /// do not share a cache line.
    has_tasks: Box<[CachePadded<AtomicBool>]>,
    /// Raised exactly once, by the master, when the partition is done.
    tasking_done: AtomicBool,
    stats: Mutex<Vec<Option<WorkerStats>>>,
}

impl Shared {
    fn new(config: Config) -> Shared {
        let num_workers = config.num_workers;
        let max_steal = config.max_steal;

        // Sized so that a send can only fail transiently: every outstanding
        // request in the partition could land in the same inbox at once.
        // The root takes extra traffic from returning requests and failed
        // lifelines, so it gets twice the room.
        let inbox_capacity = max_steal * num_workers;
        let request_inboxes = (0..num_workers)
            .map(|id| {
                let capacity = if id == MASTER_ID {
                    2 * inbox_capacity
                } else {
                    inbox_capacity
                };
                RequestInbox::with_capacity(capacity)
            })
            .collect();

        let task_slots = (0..num_workers * max_steal)
            .map(|_| TaskSlot::new())
            .collect();

        let has_tasks = (0..num_workers)
            .map(|_| CachePadded::new(AtomicBool::new(false)))
            .collect();

        let stats = Mutex::new((0..num_workers).map(|_| None).collect());

        Shared {
            config,
            request_inboxes,
            task_slots,
            has_tasks,
            tasking_done: AtomicBool::new(false),
            stats,
        }
    }

    fn collect_stats(&self) -> Stats {
        let mut slots = self.stats.lock().unwrap();
        Stats {
            workers: slots
                .iter_mut()
                .map(|slot| slot.take().unwrap_or_default())
                .collect(),
        }
    }
}

// -----------------------------------------------------------------------------
// Statistics

/// Per-worker counters, collected when the partition shuts down.
#[derive(Clone, Debug, Default)]
pub struct WorkerStats {
    pub tasks_executed: u64,
    /// Tasks surrendered to thieves, including lifeline feeds.
    pub tasks_sent: u64,
    pub tasks_received: u64,
    pub requests_sent: u64,
    /// Requests this worker forwarded because it had nothing to give.
    pub requests_declined: u64,
    pub requests_steal_one: u64,
    pub requests_steal_half: u64,
    /// Failed child requests answered with tasks.
    pub lifelines_served: u64,
    /// Adaptive policy flips from steal-one to steal-half.
    pub upshifts: u64,
    /// Adaptive policy flips from steal-half to steal-one.
    pub downshifts: u64,
    /// The steal-amount policy bit when the worker exited.
    pub stealhalf: bool,
}

/// Counters for a whole run, indexed by worker.
#[derive(Clone, Debug)]
pub struct Stats {
    pub workers: Vec<WorkerStats>,
}

impl Stats {
    /// Total tasks executed across the partition.
    pub fn tasks_executed(&self) -> u64 {
        self.workers.iter().map(|w| w.tasks_executed).sum()
    }

    /// Total steal requests sent across the partition.
    pub fn requests_sent(&self) -> u64 {
        self.workers.iter().map(|w| w.requests_sent).sum()
    }
}

#[derive(Default)]
struct Counters {
    tasks_executed: Cell<u64>,
    tasks_sent: Cell<u64>,
    tasks_received: Cell<u64>,
    requests_sent: Cell<u64>,
    requests_declined: Cell<u64>,
    requests_steal_one: Cell<u64>,
    requests_steal_half: Cell<u64>,
    lifelines_served: Cell<u64>,
    upshifts: Cell<u64>,
    downshifts: Cell<u64>,
}

impl Counters {
    fn snapshot(&self, stealhalf: bool) -> WorkerStats {
        WorkerStats {
            tasks_executed: self.tasks_executed.get(),
            tasks_sent: self.tasks_sent.get(),
            tasks_received: self.tasks_received.get(),
            requests_sent: self.requests_sent.get(),
            requests_declined: self.requests_declined.get(),
            requests_steal_one: self.requests_steal_one.get(),
            requests_steal_half: self.requests_steal_half.get(),
            lifelines_served: self.lifelines_served.get(),
            upshifts: self.upshifts.get(),
            downshifts: self.downshifts.get(),
            stealhalf,
        }
    }
}

fn bump(counter: &Cell<u64>) {
    counter.set(counter.get() + 1);
}

fn add(counter: &Cell<u64>, amount: u64) {
    counter.set(counter.get() + amount);
}

// -----------------------------------------------------------------------------
// Worker context

/// The local context of one partition member.
///
/// A worker lives on exactly one thread for the whole run and is handed to
/// every task it executes, which is how tasks spawn further tasks. All of
/// its mutable state is single-threaded; the only things other workers can
/// reach are its channel endpoints, which live in the shared partition
/// state.
pub struct Worker {
    id: usize,
    shared: Arc<Shared>,
    tree: WorkerTree,
    deque: TaskDeque,
    channel_stack: ChannelStack,
    lifelines: LifelineQueue,
    left_subtree_is_idle: Cell<bool>,
    right_subtree_is_idle: Cell<bool>,
    /// Set once this worker's last steal request has climbed to its parent
    /// as a lifeline. A waiting worker is silent until the parent feeds it.
    waiting_for_tasks: Cell<bool>,
    /// Outstanding steal requests whose task inboxes are lent out. The
    /// books balance as `requested + channel_stack.top() == max_steal +
    /// dropped_steal_requests`; the dropped gap is settled on the next
    /// receive.
    requested: Cell<usize>,
    dropped_steal_requests: Cell<usize>,
    /// Current steal-amount policy bit (adaptive strategy only).
    stealhalf: Cell<bool>,
    steals_in_window: Cell<u32>,
    tasks_in_window: Cell<u32>,
    last_victim: Cell<Option<usize>>,
    last_thief: Cell<Option<usize>>,
    rng: XorShift64Star,
    counters: Counters,
}

impl Worker {
    fn new(id: usize, shared: Arc<Shared>) -> Worker {
        let tree = WorkerTree::new(id, shared.config.num_workers);
        let channel_stack = ChannelStack::new(id, shared.config.max_steal);
        let stealhalf = matches!(shared.config.strategy, StealStrategy::Half);
        Worker {
            id,
            tree,
            deque: TaskDeque::new(),
            channel_stack,
            lifelines: LifelineQueue::new(),
            // An absent child is an idle subtree from the start.
            left_subtree_is_idle: Cell::new(tree.left_child.is_none()),
            right_subtree_is_idle: Cell::new(tree.right_child.is_none()),
            waiting_for_tasks: Cell::new(false),
            requested: Cell::new(0),
            dropped_steal_requests: Cell::new(0),
            stealhalf: Cell::new(stealhalf),
            steals_in_window: Cell::new(0),
            tasks_in_window: Cell::new(0),
            last_victim: Cell::new(None),
            last_thief: Cell::new(None),
            rng: XorShift64Star::new(id as u64 + 1000),
            counters: Counters::default(),
            shared,
        }
    }

    /// The worker's index within the partition.
    #[inline(always)]
    pub fn id(&self) -> usize {
        self.id
    }

    /// The number of workers in the partition.
    #[inline(always)]
    pub fn num_workers(&self) -> usize {
        self.shared.config.num_workers
    }

    /// Spawns a task onto this worker's deque.
    ///
    /// The closure receives the worker that eventually executes it, which
    /// may be a different worker on a different thread if the task is
    /// stolen. Tasks cannot hold references into the enclosing stack frame,
    /// so this almost always wants a `move` closure.
    #[inline]
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce(&Worker) + Send + 'static,
    {
        let job = HeapJob::new(f);

        // SAFETY: Every job spawned onto a deque is executed before the
        // partition shuts down; the termination protocol only lets the root
        // declare completion once every deque is empty and every delivery
        // consumed. The closure is `'static`, so it cannot outlive anything
        // it closes over.
        let job_ref = unsafe { job.into_job_ref() };

        self.deque.push(job_ref);
        self.update_has_tasks();
    }

    /// Executes one task, counting it towards the adaptive window.
    fn execute(&self, job: JobRef) {
        // A panic escaping a task would leave this worker's subtree marked
        // live at its parent forever; the guard turns it into an abort.
        let guard = unwind::AbortGuard::arm();
        job.execute(self);
        guard.disarm();

        bump(&self.counters.tasks_executed);
        self.tasks_in_window.set(self.tasks_in_window.get() + 1);
    }

    /// Refreshes the advisory victim-check flag for this worker.
    #[inline(always)]
    fn update_has_tasks(&self) {
        if self.shared.config.victim_check {
            self.shared.has_tasks[self.id].store(!self.deque.is_empty(), Ordering::Relaxed);
        }
    }

    /// Whether `worker` is believed to have tasks. Advisory only: stale
    /// answers cost a wasted hop, nothing more.
    fn likely_has_tasks(&self, worker: usize) -> bool {
        !self.shared.config.victim_check
            || self.shared.has_tasks[worker].load(Ordering::Relaxed)
    }
}

// -----------------------------------------------------------------------------
// Victim selection

impl Worker {
    /// Chooses the next worker for a steal request this worker holds, or
    /// returns the requester's own index to bounce the request home.
    fn next_victim(&self, req: &mut StealRequest) -> usize {
        let num_workers = self.shared.config.num_workers;

        // Never forward to the worker currently holding the request.
        req.victims.clear(self.id);

        // First dispatch by the originator: any other worker, uniformly.
        if req.id as usize == self.id && req.retry == 0 {
            return random_victim(req.victims, self.id, num_workers, &self.rng)
                .unwrap_or(self.id);
        }

        // Out of forwarding budget: deliver the request back to the thief.
        if req.retry as usize >= self.shared.config.attempts() {
            return req.id as usize;
        }

        // Skip subtrees this worker knows to be idle. When everything below
        // here is quiet, the request has no business anywhere beneath us.
        if self.left_subtree_is_idle.get() && self.right_subtree_is_idle.get() {
            mark_as_idle(&mut req.victims, Some(self.id), num_workers);
        } else {
            if self.left_subtree_is_idle.get() {
                mark_as_idle(&mut req.victims, self.tree.left_child, num_workers);
            }
            if self.right_subtree_is_idle.get() {
                mark_as_idle(&mut req.victims, self.tree.right_child, num_workers);
            }
        }

        random_victim(req.victims, self.id, num_workers, &self.rng).unwrap_or(req.id as usize)
    }

    /// Victim selection with a bias hint, used under the last-victim and
    /// last-thief policies. The hint is only taken when it is a usable
    /// candidate; otherwise selection falls through to [`Self::next_victim`].
    fn steal_from(&self, req: &mut StealRequest, hint: Option<usize>) -> usize {
        if let Some(hint) = hint {
            if hint != self.id
                && hint != req.id as usize
                && (req.retry as usize) < self.shared.config.attempts()
                && req.victims.contains(hint)
                && self.likely_has_tasks(hint)
            {
                req.victims.clear(self.id);
                return hint;
            }
        }
        self.next_victim(req)
    }

    /// Chooses a target for a request this worker is sending or forwarding,
    /// honoring whichever bias policy is configured.
    fn choose_victim(&self, req: &mut StealRequest) -> usize {
        let config = &self.shared.config;
        if config.steal_last_victim {
            self.steal_from(req, self.last_victim.get())
        } else if config.steal_last_thief {
            self.steal_from(req, self.last_thief.get())
        } else {
            self.next_victim(req)
        }
    }
}

// -----------------------------------------------------------------------------
// Request transport

impl Worker {
    /// Delivers a request to `target`'s inbox, retrying on contention.
    /// Correctly sized inboxes make failure transient; a persistently full
    /// inbox is a configuration bug and fatal. Exits silently if the
    /// partition finishes mid-retry.
    fn send_req(&self, target: usize, req: StealRequest) {
        let inbox = &self.shared.request_inboxes[target];
        let mut pending = req;
        let mut failures = 0usize;
        while let Err(returned) = inbox.send(pending) {
            pending = returned;
            failures += 1;
            if failures % 3 == 0 {
                warn!(
                    worker = self.id,
                    to = target,
                    failures,
                    "request inbox is full, still retrying"
                );
            }
            if self.shared.tasking_done.load(Ordering::Relaxed) {
                return;
            }
            assert!(
                failures < SEND_RETRY_LIMIT,
                "worker {} is blocked: the request inbox of worker {target} stayed full",
                self.id,
            );
            core::hint::spin_loop();
        }
    }

    /// Takes one live request from this worker's inbox.
    ///
    /// Failed requests never surface here: they are lifeline traffic from a
    /// direct child, recorded on the spot. Anything returned is `Working`
    /// or `Idle`.
    fn recv_req(&self) -> Option<StealRequest> {
        let inbox = &self.shared.request_inboxes[self.id];
        loop {
            let req = inbox.receive()?;
            debug_assert_eq!(req.partition, self.shared.config.partition);
            if req.state != RequestState::Failed {
                return Some(req);
            }

            let child = req.id as usize;
            if self.tree.left_child == Some(child) {
                assert!(
                    !self.left_subtree_is_idle.get(),
                    "left subtree of worker {} went idle twice",
                    self.id
                );
                self.left_subtree_is_idle.set(true);
            } else if self.tree.right_child == Some(child) {
                assert!(
                    !self.right_subtree_is_idle.get(),
                    "right subtree of worker {} went idle twice",
                    self.id
                );
                self.right_subtree_is_idle.set(true);
            } else {
                panic!(
                    "worker {} received a failed steal request from non-child worker {child}",
                    self.id
                );
            }
            self.lifelines.enqueue(req);
            debug!(worker = self.id, child, "subtree went idle");
        }
    }

    /// Handles every request currently pending in the inbox.
    fn poll_requests(&self) {
        while let Some(req) = self.recv_req() {
            self.handle_steal_request(req);
        }
    }

    /// Reacts to one live steal request: answer it with tasks, forward it,
    /// or, for a request of our own that has come home, settle it.
    fn handle_steal_request(&self, req: StealRequest) {
        if req.id as usize == self.id {
            self.settle_own_request(req);
        } else if !self.deque.is_empty() {
            self.dispatch_tasks(&req);
        } else {
            self.decline(req);
        }
    }

    /// Settles one of this worker's own requests that has made it back
    /// around without finding work.
    fn settle_own_request(&self, req: StealRequest) {
        debug_assert!(req.state != RequestState::Failed);
        debug_assert!(!self.waiting_for_tasks.get());

        let subtrees_idle =
            self.left_subtree_is_idle.get() && self.right_subtree_is_idle.get();

        match self.tree.parent {
            Some(parent) if self.deque.is_empty() && subtrees_idle => {
                // Nothing here and nothing below: give up stealing. All
                // requests but the last are dropped; the last climbs to the
                // parent as a lifeline.
                let outstanding = self.requested.get() - self.dropped_steal_requests.get();
                debug_assert!(outstanding >= 1);
                if outstanding > 1 {
                    self.channel_stack.push(req.chan);
                    self.dropped_steal_requests
                        .set(self.dropped_steal_requests.get() + 1);
                    trace!(worker = self.id, "dropped a returned steal request");
                } else {
                    let mut req = req;
                    req.state = RequestState::Failed;
                    self.waiting_for_tasks.set(true);
                    debug!(worker = self.id, parent, "quiescent, sending lifeline");
                    self.send_req(parent, req);
                }
            }
            _ => {
                // We found work in the meantime, a subtree below is still
                // live, or we are the root: take the request back. The pump
                // re-issues one as long as this worker stays hungry.
                self.channel_stack.push(req.chan);
                self.requested.set(self.requested.get() - 1);
            }
        }
    }

    /// Forwards a request this worker cannot answer.
    fn decline(&self, mut req: StealRequest) {
        bump(&self.counters.requests_declined);
        req.retry += 1;
        let target = self.choose_victim(&mut req);
        trace!(worker = self.id, thief = req.id, to = target, retry = req.retry, "declined");
        self.send_req(target, req);
    }

    /// Answers a steal request from this worker's own deque.
    fn dispatch_tasks(&self, req: &StealRequest) {
        let steal_half = match self.shared.config.strategy {
            StealStrategy::One => false,
            StealStrategy::Half => true,
            StealStrategy::Adaptive => req.stealhalf,
        };

        let jobs = if steal_half {
            Jobs::Batch(self.deque.steal_half())
        } else {
            let Some(job) = self.deque.steal_one() else {
                panic!("worker {} dispatched from an empty deque", self.id)
            };
            Jobs::Single(job)
        };

        let delivery = Delivery {
            from: self.id as u32,
            jobs,
        };
        let count = delivery.len() as u64;

        // The handle lifecycle guarantees the slot is ours alone and empty.
        let slot = &self.shared.task_slots[req.chan.index()];
        if slot.send(delivery).is_err() {
            panic!(
                "task inbox {} of worker {} was already occupied",
                req.chan.index(),
                req.id
            );
        }

        self.update_has_tasks();
        self.last_thief.set(Some(req.id as usize));
        add(&self.counters.tasks_sent, count);
        trace!(worker = self.id, thief = req.id, count, "delivered tasks");
    }
}

// -----------------------------------------------------------------------------
// Task transport

impl Worker {
    /// Polls this worker's task inboxes. On a hit the freed inbox handle
    /// returns to the channel stack and the request books are settled; on a
    /// full miss the steal pump runs instead.
    fn recv_task(&self, idle: bool) -> bool {
        let max_steal = self.shared.config.max_steal;
        for slot in 0..max_steal {
            let chan = ChannelId::new(self.id, slot, max_steal);
            let Some(delivery) = self.shared.task_slots[chan.index()].receive() else {
                continue;
            };

            self.channel_stack.push(chan);

            if self.waiting_for_tasks.get() {
                // Our parent answered the lifeline. Every other request was
                // dropped on the way down, so the only lent-out inbox was
                // this one.
                assert_eq!(self.channel_stack.top(), max_steal);
                self.waiting_for_tasks.set(false);
                self.dropped_steal_requests.set(0);
                self.requested.set(1);
            } else if self.dropped_steal_requests.get() > 0 {
                // Partial drops from an interrupted quiescence: settle the
                // gap so the pump can spend the budget again.
                debug_assert!(self.requested.get() > self.dropped_steal_requests.get());
                self.requested
                    .set(self.requested.get() - self.dropped_steal_requests.get());
                self.dropped_steal_requests.set(0);
            }
            self.requested.set(self.requested.get() - 1);

            let count = delivery.len() as u64;
            self.last_victim.set(Some(delivery.from as usize));
            self.steals_in_window.set(self.steals_in_window.get() + 1);
            add(&self.counters.tasks_received, count);
            trace!(worker = self.id, victim = delivery.from, count, "received tasks");

            match delivery.jobs {
                Jobs::Single(job) => self.deque.push(job),
                Jobs::Batch(batch) => {
                    for job in batch.into_vec() {
                        self.deque.push(job);
                    }
                }
            }
            self.update_has_tasks();
            return true;
        }

        self.try_send_steal_request(idle);
        false
    }

    /// The steal pump: sends a new steal request if the budget allows,
    /// retuning the adaptive policy at window boundaries.
    fn try_send_steal_request(&self, idle: bool) {
        let config = &self.shared.config;
        if self.requested.get() == config.max_steal {
            return;
        }

        if config.strategy == StealStrategy::Adaptive
            && self.steals_in_window.get() >= config.adaptive_interval
        {
            let ratio = self.tasks_in_window.get() / config.adaptive_interval;
            if self.stealhalf.get() && ratio < 2 {
                // Halves are not paying for themselves.
                self.stealhalf.set(false);
                bump(&self.counters.downshifts);
                debug!(worker = self.id, ratio, "adaptive policy now steal-one");
            } else if !self.stealhalf.get() && ratio == 1 {
                // One task per steal is the degenerate case.
                self.stealhalf.set(true);
                bump(&self.counters.upshifts);
                debug!(worker = self.id, ratio, "adaptive policy now steal-half");
            }
            self.steals_in_window.set(0);
            self.tasks_in_window.set(0);
        }

        let Some(chan) = self.channel_stack.pop() else {
            panic!(
                "worker {} has steal budget available but no free task inbox",
                self.id
            )
        };

        let stealhalf = match config.strategy {
            StealStrategy::One => false,
            StealStrategy::Half => true,
            StealStrategy::Adaptive => self.stealhalf.get(),
        };

        let mut req = StealRequest::new(
            chan,
            self.id as u32,
            config.partition,
            self.id as u32,
            VictimSet::first_n(config.num_workers),
            if idle {
                RequestState::Idle
            } else {
                RequestState::Working
            },
            stealhalf,
        );

        let target = self.choose_victim(&mut req);
        self.requested.set(self.requested.get() + 1);
        bump(&self.counters.requests_sent);
        if stealhalf {
            bump(&self.counters.requests_steal_half);
        } else {
            bump(&self.counters.requests_steal_one);
        }
        trace!(worker = self.id, to = target, idle, "sent a steal request");
        self.send_req(target, req);
    }
}

// -----------------------------------------------------------------------------
// Work sharing

impl Worker {
    /// Feeds retained lifelines from the local deque. Runs whenever this
    /// worker has tasks, and always before it issues steal requests of its
    /// own: children gave up stealing on our word, so they eat first.
    fn share_lifelines(&self) {
        while !self.deque.is_empty() {
            let Some(req) = self.lifelines.dequeue() else { return };
            debug_assert_eq!(req.state, RequestState::Failed);

            self.dispatch_tasks(&req);

            let child = req.id as usize;
            if self.tree.left_child == Some(child) {
                self.left_subtree_is_idle.set(false);
            } else {
                debug_assert_eq!(self.tree.right_child, Some(child));
                self.right_subtree_is_idle.set(false);
            }
            bump(&self.counters.lifelines_served);
            debug!(worker = self.id, child, "fed a lifeline");
        }
    }
}

// -----------------------------------------------------------------------------
// Worker loops

impl Worker {
    /// Runs local tasks until the deque is empty, serving thieves and
    /// lifelines between tasks.
    fn work(&self) {
        loop {
            self.poll_requests();
            self.share_lifelines();
            let Some(job) = self.deque.pop() else { return };
            self.update_has_tasks();
            // With a budget above one, keep a request in flight while still
            // working so replacement tasks overlap with execution.
            if self.shared.config.max_steal > 1 {
                self.try_send_steal_request(false);
            }
            self.execute(job);
        }
    }

    /// The main loop of a non-root worker.
    fn worker_loop(&self) {
        let span = trace_span!("worker", id = self.id);
        let _enter = span.enter();
        trace!("starting worker");

        let backoff = Backoff::new();
        loop {
            self.work();

            // Out of local work: hunt for tasks until one arrives or the
            // partition finishes.
            loop {
                self.poll_requests();
                if self.shared.tasking_done.load(Ordering::Relaxed) {
                    debug_assert!(self.deque.is_empty());
                    trace!("exiting worker");
                    return;
                }
                if self.recv_task(true) {
                    backoff.reset();
                    break;
                }
                backoff.snooze();
            }
        }
    }

    /// The main loop of the root. Identical to a worker's loop except that
    /// on idle it watches for global quiescence instead of a lifeline.
    fn master_loop(&self) {
        let span = trace_span!("worker", id = self.id);
        let _enter = span.enter();

        let backoff = Backoff::new();
        loop {
            self.work();

            self.poll_requests();
            if self.left_subtree_is_idle.get()
                && self.right_subtree_is_idle.get()
                && self.deque.is_empty()
                && self.requested.get() == 0
            {
                // Both subtrees have climbed their lifelines, nothing is in
                // flight towards us, and we are empty: the partition is done.
                debug!("root is quiescent, raising the termination flag");
                self.shared.tasking_done.store(true, Ordering::Relaxed);
                return;
            }

            if self.recv_task(true) {
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
    }

    fn publish_stats(&self) {
        let stats = self.counters.snapshot(self.stealhalf.get());
        self.shared.stats.lock().unwrap()[self.id] = Some(stats);
    }
}

// -----------------------------------------------------------------------------
// Partition entry point

/// Runs a scheduler partition to completion.
///
/// The calling thread becomes worker 0, the master. It first executes `f`,
/// then joins the partition as an ordinary worker until every spawned task
/// has executed and the termination protocol confirms that nothing is left
/// anywhere. Returns the closure's value along with the run's statistics.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// use filch::Config;
///
/// let done = Arc::new(AtomicU64::new(0));
/// let tally = Arc::clone(&done);
/// let (_, stats) = filch::run(Config::new(4), move |worker| {
///     for _ in 0..1000 {
///         let tally = Arc::clone(&tally);
///         worker.spawn(move |_| {
///             tally.fetch_add(1, Ordering::Relaxed);
///         });
///     }
/// })
/// .unwrap();
///
/// assert_eq!(done.load(Ordering::Relaxed), 1000);
/// assert_eq!(stats.tasks_executed(), 1000);
/// ```
pub fn run<F, R>(config: Config, f: F) -> Result<(R, Stats), ConfigError>
where
    F: FnOnce(&Worker) -> R,
{
    config.validate()?;
    let num_workers = config.num_workers;
    debug!(num_workers, "starting scheduler partition");

    let shared = Arc::new(Shared::new(config));
    let barrier = Arc::new(Barrier::new(num_workers));

    let mut handles = Vec::with_capacity(num_workers - 1);
    for id in 1..num_workers {
        let shared = Arc::clone(&shared);
        let barrier = Arc::clone(&barrier);
        let handle = ThreadBuilder::new()
            .name(format!("filch-worker-{id}"))
            .spawn(move || {
                let worker = Worker::new(id, shared);
                barrier.wait();
                worker.worker_loop();
                worker.publish_stats();
            })
            .unwrap();
        handles.push(handle);
    }

    let master = Worker::new(MASTER_ID, Arc::clone(&shared));
    barrier.wait();

    // Run the caller's closure, deferring any panic until the partition has
    // wound down; unwinding past live workers would strand them.
    let result = unwind::capture(|| f(&master));

    master.master_loop();
    master.publish_stats();

    for handle in handles {
        let _ = handle.join();
    }

    let stats = shared.collect_stats();
    debug!("scheduler partition shut down");

    match result {
        Ok(output) => Ok((output, stats)),
        Err(payload) => unwind::rethrow(payload),
    }
}

// -----------------------------------------------------------------------------
// Tests
