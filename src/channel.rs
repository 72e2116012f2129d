//! Channel endpoints and the per-worker bookkeeping containers.
//!
//! All inter-worker traffic moves through bounded, non-blocking queues:
//! each worker owns one MPSC [`RequestInbox`] for incoming steal requests
//! and `max_steal` single-element [`TaskSlot`]s for incoming tasks. The
//! [`ChannelStack`] and [`LifelineQueue`] are owner-local containers with no
//! concurrency in them at all; they use interior mutability only so that the
//! worker can reach them through a shared reference while a task runs.

use core::cell::UnsafeCell;

use arraydeque::ArrayDeque;
use crossbeam_queue::ArrayQueue;

use crate::config::MAX_STEAL_LIMIT;
use crate::job::Delivery;
use crate::request::{ChannelId, RequestState, StealRequest};

// -----------------------------------------------------------------------------
// Request inbox

/// The MPSC steal-request endpoint owned by one worker. Senders never block;
/// a full inbox reports failure and the sender retries.
pub struct RequestInbox {
    queue: ArrayQueue<StealRequest>,
}

impl RequestInbox {
    /// Allocates an inbox with room for `capacity` requests.
    pub fn with_capacity(capacity: usize) -> RequestInbox {
        RequestInbox {
            queue: ArrayQueue::new(capacity),
        }
    }

    /// Attempts to deliver a request. Returns the request on a full inbox.
    #[inline(always)]
    pub fn send(&self, req: StealRequest) -> Result<(), StealRequest> {
        self.queue.push(req)
    }

    /// Attempts to take the oldest pending request.
    #[inline(always)]
    pub fn receive(&self) -> Option<StealRequest> {
        self.queue.pop()
    }

    /// The number of requests currently pending.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

// -----------------------------------------------------------------------------
// Task slot

/// A single-element SPSC task endpoint.
///
/// The handle lifecycle guarantees one (thief, victim) pair per slot at a
/// time: the thief embeds the handle in a steal request, exactly one victim
/// answers it, and the handle returns to the thief's channel stack once the
/// delivery is consumed. The slot is therefore always empty when a victim
/// sends into it.
pub struct TaskSlot {
    slot: ArrayQueue<Delivery>,
}

impl TaskSlot {
    pub fn new() -> TaskSlot {
        TaskSlot {
            slot: ArrayQueue::new(1),
        }
    }

    /// Attempts to deliver tasks. Returns the delivery if the slot is
    /// occupied, which the handle lifecycle rules out.
    #[inline(always)]
    pub fn send(&self, delivery: Delivery) -> Result<(), Delivery> {
        self.slot.push(delivery)
    }

    /// Attempts to take a pending delivery.
    #[inline(always)]
    pub fn receive(&self) -> Option<Delivery> {
        self.slot.pop()
    }
}

// -----------------------------------------------------------------------------
// Channel stack

/// Records which of a worker's task inboxes are currently unused.
///
/// A handle is popped when a steal request goes out and pushed back when the
/// matching delivery is consumed, so a full stack means the worker has no
/// outstanding steal requests.
pub struct ChannelStack {
    handles: UnsafeCell<ArrayDeque<ChannelId, MAX_STEAL_LIMIT>>,
}

impl ChannelStack {
    /// Creates a stack holding handles to all `max_steal` inboxes of
    /// `worker`.
    pub fn new(worker: usize, max_steal: usize) -> ChannelStack {
        let mut handles: ArrayDeque<ChannelId, MAX_STEAL_LIMIT> = ArrayDeque::new();
        for slot in 0..max_steal {
            assert!(
                handles
                    .push_back(ChannelId::new(worker, slot, max_steal))
                    .is_ok()
            );
        }
        ChannelStack {
            handles: UnsafeCell::new(handles),
        }
    }

    #[inline(always)]
    pub fn push(&self, chan: ChannelId) {
        // SAFETY: The stack is only touched by the owning worker thread, and
        // `push`, `pop` and `top` never call each other, so this access is
        // exclusive.
        let handles = unsafe { &mut *self.handles.get() };
        assert!(
            handles.push_back(chan).is_ok(),
            "returned more task inbox handles than the worker owns"
        );
    }

    #[inline(always)]
    pub fn pop(&self) -> Option<ChannelId> {
        // SAFETY: The stack is only touched by the owning worker thread, and
        // `push`, `pop` and `top` never call each other, so this access is
        // exclusive.
        let handles = unsafe { &mut *self.handles.get() };
        handles.pop_back()
    }

    /// The number of unused inbox handles.
    #[inline(always)]
    pub fn top(&self) -> usize {
        // SAFETY: The stack is only touched by the owning worker thread, and
        // `push`, `pop` and `top` never call each other, so this access is
        // exclusive.
        let handles = unsafe { &*self.handles.get() };
        handles.len()
    }
}

// -----------------------------------------------------------------------------
// Lifeline queue

/// The failed steal requests a worker has retained from its children, to be
/// answered when it next has tasks to share. Holds at most one request per
/// child.
pub struct LifelineQueue {
    queue: UnsafeCell<ArrayDeque<StealRequest, 2>>,
}

impl LifelineQueue {
    pub fn new() -> LifelineQueue {
        LifelineQueue {
            queue: UnsafeCell::new(ArrayDeque::new()),
        }
    }

    /// Retains a failed request from a child.
    pub fn enqueue(&self, req: StealRequest) {
        assert_eq!(req.state, RequestState::Failed);
        // SAFETY: The queue is only touched by the owning worker thread, and
        // its methods never call each other, so this access is exclusive.
        let queue = unsafe { &mut *self.queue.get() };
        debug_assert!(queue.iter().all(|held| held.id != req.id));
        assert!(
            queue.push_back(req).is_ok(),
            "worker retained more lifelines than it has children"
        );
    }

    /// Takes the oldest retained request.
    pub fn dequeue(&self) -> Option<StealRequest> {
        // SAFETY: The queue is only touched by the owning worker thread, and
        // its methods never call each other, so this access is exclusive.
        let queue = unsafe { &mut *self.queue.get() };
        queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        // SAFETY: The queue is only touched by the owning worker thread, and
        // its methods never call each other, so this access is exclusive.
        let queue = unsafe { &*self.queue.get() };
        queue.is_empty()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use core::ptr::NonNull;

    use crate::bits::VictimSet;
    use crate::job::{Delivery, JobRef, Jobs};
    use crate::scheduler::Worker;

    use super::*;

    fn nop_job() -> JobRef {
        fn nop(_: NonNull<()>, _: &Worker) {}
        // SAFETY: The execute function ignores the pointer entirely.
        unsafe { JobRef::new_raw(NonNull::dangling(), nop) }
    }

    fn request(id: u32, state: RequestState) -> StealRequest {
        StealRequest::new(
            ChannelId::new(id as usize, 0, 1),
            id,
            0,
            id,
            VictimSet::first_n(4),
            state,
            false,
        )
    }

    #[test]
    fn inbox_is_fifo_and_bounded() {
        let inbox = RequestInbox::with_capacity(2);
        assert!(inbox.send(request(1, RequestState::Working)).is_ok());
        assert!(inbox.send(request(2, RequestState::Idle)).is_ok());
        assert!(inbox.send(request(3, RequestState::Idle)).is_err());
        assert_eq!(inbox.pending(), 2);

        assert_eq!(inbox.receive().unwrap().id, 1);
        assert_eq!(inbox.receive().unwrap().id, 2);
        assert!(inbox.receive().is_none());
    }

    #[test]
    fn task_slot_holds_one_delivery() {
        let slot = TaskSlot::new();
        assert!(slot.receive().is_none());

        let delivery = Delivery {
            from: 1,
            jobs: Jobs::Single(nop_job()),
        };
        assert!(slot.send(delivery).is_ok());

        let second = Delivery {
            from: 1,
            jobs: Jobs::Single(nop_job()),
        };
        assert!(slot.send(second).is_err());

        let received = slot.receive().unwrap();
        assert_eq!(received.from, 1);
        assert_eq!(received.len(), 1);
        assert!(slot.receive().is_none());
    }

    #[test]
    fn channel_stack_recycles_handles() {
        let stack = ChannelStack::new(2, 3);
        assert_eq!(stack.top(), 3);

        let first = stack.pop().unwrap();
        let second = stack.pop().unwrap();
        assert_ne!(first, second);
        assert_eq!(first.owner(3), 2);
        assert_eq!(stack.top(), 1);

        stack.push(first);
        stack.push(second);
        assert_eq!(stack.top(), 3);
    }

    #[test]
    fn lifelines_hold_failed_requests() {
        let lifelines = LifelineQueue::new();
        assert!(lifelines.is_empty());

        lifelines.enqueue(request(3, RequestState::Failed));
        lifelines.enqueue(request(4, RequestState::Failed));
        assert!(!lifelines.is_empty());

        assert_eq!(lifelines.dequeue().unwrap().id, 3);
        assert_eq!(lifelines.dequeue().unwrap().id, 4);
        assert!(lifelines.dequeue().is_none());
    }

    #[test]
    #[should_panic]
    fn lifelines_reject_live_requests() {
        let lifelines = LifelineQueue::new();
        lifelines.enqueue(request(3, RequestState::Idle));
    }
}
