//! The private task deque.
//!
//! Every worker owns exactly one deque, and no other thread ever touches
//! it: thieves receive tasks through channels, with the victim popping from
//! its own deque on their behalf. The owner pushes and pops at the back
//! (LIFO, newest first, for locality), while tasks surrendered to thieves
//! leave from the front (FIFO, oldest first, where the largest remaining
//! work tends to sit).

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::cell::UnsafeCell;

use crate::job::JobRef;

pub struct TaskDeque {
    jobs: UnsafeCell<VecDeque<JobRef>>,
}

impl TaskDeque {
    pub fn new() -> TaskDeque {
        TaskDeque {
            jobs: UnsafeCell::new(VecDeque::new()),
        }
    }

    /// Adds a task at the owner's end.
    #[inline(always)]
    pub fn push(&self, job: JobRef) {
        // SAFETY: The deque is only accessed mutably within `push`, `pop`,
        // `steal_one` and `steal_half`, all called by the owning worker
        // thread, and these functions never call each other. So we must have
        // exclusive access to the queue.
        let jobs = unsafe { &mut *self.jobs.get() };
        jobs.push_back(job);
    }

    /// Takes the most recently pushed task.
    #[inline(always)]
    pub fn pop(&self) -> Option<JobRef> {
        // SAFETY: As in `push`.
        let jobs = unsafe { &mut *self.jobs.get() };
        jobs.pop_back()
    }

    /// Takes the oldest task, on behalf of a thief.
    #[inline(always)]
    pub fn steal_one(&self) -> Option<JobRef> {
        // SAFETY: As in `push`.
        let jobs = unsafe { &mut *self.jobs.get() };
        jobs.pop_front()
    }

    /// Takes the older half of the deque (rounded up), on behalf of a
    /// thief.
    pub fn steal_half(&self) -> Box<[JobRef]> {
        // SAFETY: As in `push`.
        let jobs = unsafe { &mut *self.jobs.get() };
        let count = jobs.len().div_ceil(2);
        jobs.drain(..count).collect::<Vec<_>>().into_boxed_slice()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        // SAFETY: Shared access, and no mutable access can be live at the
        // same time since all access happens on the owning worker thread.
        let jobs = unsafe { &*self.jobs.get() };
        jobs.is_empty()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        // SAFETY: As in `is_empty`.
        let jobs = unsafe { &*self.jobs.get() };
        jobs.len()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use core::ptr::NonNull;

    use crate::scheduler::Worker;

    use super::*;

    // Jobs that carry their identity in the (never dereferenced) data
    // pointer, so tests can tell them apart without executing them.
    fn tagged_job(tag: usize) -> JobRef {
        fn nop(_: NonNull<()>, _: &Worker) {}
        let pointer = NonNull::new((tag + 1) as *mut ()).unwrap();
        // SAFETY: The execute function ignores the pointer entirely.
        unsafe { JobRef::new_raw(pointer, nop) }
    }

    macro_rules! fill {
        ($deque:expr, $count:expr) => {
            (0..$count)
                .map(|tag| {
                    let job = tagged_job(tag);
                    let id = job.id();
                    $deque.push(job);
                    id
                })
                .collect::<Vec<_>>()
        };
    }

    #[test]
    fn owner_end_is_lifo() {
        let deque = TaskDeque::new();
        let ids = fill!(deque, 3);
        assert_eq!(deque.len(), 3);
        for expected in ids.iter().rev() {
            assert!(deque.pop().unwrap().id() == *expected);
        }
        assert!(deque.pop().is_none());
    }

    #[test]
    fn steal_end_is_fifo() {
        let deque = TaskDeque::new();
        let ids = fill!(deque, 3);
        assert!(deque.steal_one().unwrap().id() == ids[0]);
        assert!(deque.steal_one().unwrap().id() == ids[1]);
        assert!(deque.pop().unwrap().id() == ids[2]);
    }

    #[test]
    fn steal_half_takes_the_older_half() {
        let deque = TaskDeque::new();
        let ids = fill!(deque, 5);

        let batch = deque.steal_half();
        assert_eq!(batch.len(), 3);
        assert!(batch[0].id() == ids[0]);
        assert!(batch[2].id() == ids[2]);
        assert_eq!(deque.len(), 2);

        // A single remaining task is still surrendered whole.
        let _ = deque.steal_one();
        assert_eq!(deque.steal_half().len(), 1);
        assert!(deque.is_empty());
    }
}
