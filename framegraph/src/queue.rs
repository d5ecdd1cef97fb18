//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Queue identity, GPU completion events, and the reusable command-context
//! vault each queue draws recording targets from.
//!
//! The native command allocator/list/queue objects themselves are supplied
//! by the host engine (through the generic `R` parameter below) rather than
//! implemented here — this crate owns the orchestration around them, not a
//! graphics-API binding.
use framegraph_base::sync::Fence;
use framegraph_base::Result;
use parking_lot::Mutex;
use smallvec::SmallVec;

/// The three queue kinds a frame graph can schedule work onto, in
/// submission priority order: a single [`GPUCommandManager::submit_job_group`]
/// call submits direct work before compute work before copy work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueType {
    Direct = 0,
    Compute = 1,
    Copy = 2,
}

impl QueueType {
    pub const ALL: [QueueType; 3] = [QueueType::Direct, QueueType::Compute, QueueType::Copy];
}

/// A set of `(fence, target value)` pairs representing the completion of
/// everything submitted as part of one [`GPUCommandManager::submit_job_group`]
/// call.
///
/// Becomes complete once every bundled fence has reached its target value,
/// and — because fence values only increase — never reverts to incomplete
/// again afterwards.
#[derive(Debug, Clone, Default)]
pub struct GPUEventHandle {
    fences: SmallVec<[(Fence, u64); 4]>,
}

impl GPUEventHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fence(&mut self, fence: Fence, target_value: u64) {
        self.fences.push((fence, target_value));
    }

    pub fn is_complete(&self) -> bool {
        self.fences
            .iter()
            .all(|(fence, value)| fence.current_value() >= *value)
    }

    pub fn wait(&self) {
        for (fence, value) in &self.fences {
            fence.wait(*value);
        }
    }
}

/// A command allocator/list/fence triple acquired from a [`CommandContextVault`].
///
/// `recorder` is the native, engine-supplied recording target; this crate
/// never constructs one directly.
#[derive(Debug)]
pub struct CommandContext<R> {
    pub fence: Fence,
    pub required_value: u64,
    pub recorder: R,
}

/// A stack of reusable `(allocator, list, fence)` triples for a single
/// queue. A context may not be dequeued again until its fence has reached
/// the value required by its most recent use.
pub struct CommandContextVault<R> {
    make: Box<dyn Fn() -> Result<(Fence, R)> + Send + Sync>,
    free: Mutex<Vec<CommandContext<R>>>,
}

impl<R> CommandContextVault<R> {
    pub fn new(make: impl Fn() -> Result<(Fence, R)> + Send + Sync + 'static) -> Self {
        Self {
            make: Box::new(make),
            free: Mutex::new(Vec::new()),
        }
    }

    /// Acquire a context whose fence has already reached its previously
    /// assigned target value, or allocate a fresh one if none is free.
    pub fn acquire(&self) -> Result<CommandContext<R>> {
        let mut free = self.free.lock();
        if let Some(pos) = free
            .iter()
            .position(|ctx| ctx.fence.current_value() >= ctx.required_value)
        {
            let mut ctx = free.remove(pos);
            ctx.required_value += 1;
            log::debug!("reusing a command context, next target value {}", ctx.required_value);
            return Ok(ctx);
        }
        drop(free);

        log::debug!("no reusable command context available, allocating a fresh one");
        let (fence, recorder) = (self.make)()?;
        Ok(CommandContext {
            fence,
            required_value: 1,
            recorder,
        })
    }

    /// Return `ctx` to the vault. It cannot be re-acquired until its fence
    /// reaches `ctx.required_value`.
    pub fn release(&self, ctx: CommandContext<R>) {
        log::debug!("returning a command context to the vault");
        self.free.lock().push(ctx);
    }
}

/// The process-wide "who submits next" baton used by the ordered submission
/// exchange protocol (see [`crate::command::GPUCommandManager`]).
///
/// A caller wishing to submit waits on whatever handle it currently observes
/// here, *then* attempts to install its own handle with a compare-and-swap
/// gated on that observation still being current. If another thread won the
/// race and installed a newer handle in between, the CAS is rejected, the
/// caller re-reads the (now newer) handle, waits on it, and retries. Waiting
/// strictly before each swap attempt, and re-validating the observation at
/// swap time, is what gives the protocol its FIFO ordering guarantee: a
/// thread can only succeed in installing its handle immediately after
/// waiting on the handle that was actually current at that moment.
pub struct SubmissionBaton {
    inner: Mutex<(u64, GPUEventHandle)>,
}

impl Default for SubmissionBaton {
    fn default() -> Self {
        Self {
            inner: Mutex::new((0, GPUEventHandle::new())),
        }
    }
}

impl SubmissionBaton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for all work published by the previous holder of the baton,
    /// then install `next` as the new baton value. Returns the generation
    /// number assigned to `next`, strictly increasing in the order callers
    /// complete this call.
    pub fn take_turn(&self, next: GPUEventHandle) -> u64 {
        let (mut seen_gen, mut previous) = {
            let slot = self.inner.lock();
            slot.clone()
        };
        loop {
            previous.wait();

            let mut slot = self.inner.lock();
            if slot.0 == seen_gen {
                let new_gen = seen_gen + 1;
                *slot = (new_gen, next);
                return new_gen;
            }
            // Someone else installed a newer handle between our read and
            // our swap attempt; observe it and wait again before retrying.
            seen_gen = slot.0;
            previous = slot.1.clone();
        }
    }
}
