//! Type-erased tasks.
//!
//! A task enters the scheduler as a closure handed to [`Worker::spawn`],
//! which boxes it as a [`HeapJob`]. From then on it travels as a
//! [`JobRef`]: two words naming the allocation and the code that knows how
//! to run and free it. Job refs are what the deque stores and what a
//! delivery carries through a task channel, so they must be small, `Send`,
//! and free of any type parameter.
//!
//! A `JobRef` is an owning reference with no destructor: whoever holds it
//! must execute it exactly once, or the allocation behind it leaks. The
//! scheduler guarantees this by construction. A job ref is always in
//! exactly one place: a deque, an in-flight delivery, or the hands of the
//! worker about to run it, and the root refuses to declare termination
//! while any of those places is non-empty.

use alloc::boxed::Box;
use core::ptr::NonNull;

use crate::scheduler::Worker;

// -----------------------------------------------------------------------------
// Job references

/// A pointer to a spawned task, erased down to the two words the deque and
/// the task channels need.
pub struct JobRef {
    /// The task allocation. Only `run` knows its real type.
    data: NonNull<()>,
    /// Runs and releases the task behind `data`.
    run: unsafe fn(NonNull<()>, &Worker),
}

impl JobRef {
    /// Builds a job ref from a task pointer and its runner.
    ///
    /// # Safety
    ///
    /// `data` must remain valid to pass to `run` until the job ref is
    /// executed, through any number of deque moves and channel hops in
    /// between. The pair must be executed exactly once: `run` both runs
    /// and releases the task.
    #[inline(always)]
    pub unsafe fn new_raw(data: NonNull<()>, run: unsafe fn(NonNull<()>, &Worker)) -> JobRef {
        JobRef { data, run }
    }

    /// An opaque identity, for telling job refs apart without executing
    /// them.
    #[inline(always)]
    pub fn id(&self) -> impl Eq {
        (self.data, self.run)
    }

    /// Runs the task on `worker`, consuming the reference.
    #[inline(always)]
    pub fn execute(self, worker: &Worker) {
        // SAFETY: `new_raw` requires the pointer to stay valid until this
        // call, and taking `self` by value keeps the call unique.
        unsafe { (self.run)(self.data, worker) }
    }
}

// SAFETY: A job ref changes threads only when a victim ships it through a
// task channel, and the closure behind it was required to be `Send` at
// spawn time. The raw pointer is only how the closure's type was erased.
unsafe impl Send for JobRef {}

// -----------------------------------------------------------------------------
// Spawned closures

/// The owned form of a spawned closure, boxed by [`Worker::spawn`].
pub struct HeapJob<F> {
    f: F,
}

impl<F> HeapJob<F>
where
    F: FnOnce(&Worker) + Send,
{
    pub fn new(f: F) -> Box<HeapJob<F>> {
        Box::new(HeapJob { f })
    }

    /// Leaks the box into a [`JobRef`] that will run and free it.
    ///
    /// # Safety
    ///
    /// The job ref takes over the allocation: if it is never executed the
    /// closure leaks, and whatever the closure borrows must stay alive
    /// until it runs. [`Worker::spawn`] satisfies both by requiring
    /// `'static` closures and by pushing the job ref somewhere the
    /// termination protocol watches, so it cannot be abandoned while the
    /// partition is running.
    #[inline(always)]
    pub unsafe fn into_job_ref(self: Box<Self>) -> JobRef {
        // SAFETY: `Box::into_raw` never returns null, and `Self::execute`
        // is the sole consumer of the pointer, reached exactly once because
        // executing a job ref consumes it.
        unsafe {
            let data = NonNull::new_unchecked(Box::into_raw(self)).cast();
            JobRef::new_raw(data, Self::execute)
        }
    }

    /// Reclaims the box and runs the closure.
    ///
    /// # Safety
    ///
    /// `this` must be a pointer produced by `into_job_ref`, passed here
    /// exactly once and treated as dangling afterwards.
    #[inline(always)]
    unsafe fn execute(this: NonNull<()>, worker: &Worker) {
        // SAFETY: Per the contract above, we are the unique owner.
        let this = unsafe { Box::from_raw(this.cast::<Self>().as_ptr()) };
        (this.f)(worker);
    }
}

// -----------------------------------------------------------------------------
// Task deliveries

/// What a victim sends through a thief's task inbox.
pub struct Delivery {
    /// The victim that answered the steal request.
    pub from: u32,
    pub jobs: Jobs,
}

/// The payload of a delivery. The single-task case carries the `JobRef`
/// inline; only a steal-half batch touches the heap.
pub enum Jobs {
    Single(JobRef),
    Batch(Box<[JobRef]>),
}

impl Delivery {
    /// The number of tasks delivered.
    pub fn len(&self) -> usize {
        match &self.jobs {
            Jobs::Single(_) => 1,
            Jobs::Batch(batch) => batch.len(),
        }
    }
}
