//! Steal-request messages.
//!
//! A [`StealRequest`] is the only message workers exchange to negotiate
//! work. It is a fixed 32-byte plain-data value so that it can flow through
//! the bounded request channels by copy, without touching the heap.

use core::mem;

use crate::bits::VictimSet;

// -----------------------------------------------------------------------------
// Request state

/// The lifecycle state of a steal request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    /// The requester still had local tasks when it sent the request.
    Working,
    /// The requester had run out of local tasks.
    Idle,
    /// The requester has exhausted its forwarding budget and given up
    /// stealing. A failed request travels once, to the requester's tree
    /// parent, and then rests on that parent's lifeline queue.
    Failed,
}

// -----------------------------------------------------------------------------
// Task inbox handles

/// A handle naming one of a worker's task inboxes.
///
/// Handles are flat indices into the partition-wide task slot array: worker
/// `w`'s inboxes occupy `w * max_steal .. (w + 1) * max_steal`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct ChannelId(u32);

impl ChannelId {
    pub fn new(worker: usize, slot: usize, max_steal: usize) -> ChannelId {
        debug_assert!(slot < max_steal);
        ChannelId((worker * max_steal + slot) as u32)
    }

    /// The flat index of the task slot this handle names.
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The worker that owns the task slot.
    #[inline(always)]
    pub fn owner(self, max_steal: usize) -> usize {
        self.0 as usize / max_steal
    }
}

// -----------------------------------------------------------------------------
// Steal request

/// A steal request, circulated among workers seeking tasks.
///
/// The layout is load-bearing: request inboxes are sized in 32-byte
/// elements, so the struct is `repr(C)` with explicit tail padding and its
/// size is checked at compile time.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct StealRequest {
    /// The task inbox the eventual victim should deliver into.
    pub chan: ChannelId,
    /// The requester's global worker ID.
    pub id: u32,
    /// How many times the request has been forwarded.
    pub retry: u32,
    /// The requester's partition.
    pub partition: u32,
    /// The requester's intra-partition index.
    pub p_id: u32,
    /// Workers the request may still be forwarded to.
    pub victims: VictimSet,
    pub state: RequestState,
    /// Whether the victim should surrender half its deque rather than a
    /// single task.
    pub stealhalf: bool,
    _pad: [u8; 6],
}

const _: () = assert!(mem::size_of::<StealRequest>() == 32);

impl StealRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chan: ChannelId,
        id: u32,
        partition: u32,
        p_id: u32,
        victims: VictimSet,
        state: RequestState,
        stealhalf: bool,
    ) -> StealRequest {
        StealRequest {
            chan,
            id,
            retry: 0,
            partition,
            p_id,
            victims,
            state,
            stealhalf,
            _pad: [0; 6],
        }
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_32_bytes() {
        assert_eq!(mem::size_of::<StealRequest>(), 32);
    }

    #[test]
    fn channel_handles_round_trip() {
        let max_steal = 4;
        for worker in 0..8 {
            for slot in 0..max_steal {
                let chan = ChannelId::new(worker, slot, max_steal);
                assert_eq!(chan.owner(max_steal), worker);
                assert_eq!(chan.index(), worker * max_steal + slot);
            }
        }
    }

    #[test]
    fn new_request_starts_unforwarded() {
        let req = StealRequest::new(
            ChannelId::new(3, 0, 1),
            3,
            0,
            3,
            VictimSet::first_n(4),
            RequestState::Idle,
            false,
        );
        assert_eq!(req.retry, 0);
        assert_eq!(req.state, RequestState::Idle);
        assert_eq!(req.victims.len(), 4);
    }
}
