//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! GPU resources, pending state-transition events, aliasing-memory
//! bookkeeping, and deferred-reclamation lifetime tracking.
//!
//! Concrete resource *states* (render target, shader resource, copy source,
//! ...) are graphics-API specific and out of scope here; this module only
//! needs to know enough about them to decide whether a transition can be
//! recorded on a given queue, which is expressed as a plain bitmask so any
//! backend can supply its own state constants.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use framegraph_base::define_handle;
use parking_lot::Mutex;

use crate::alloc::TlsfAlloc;
use crate::descriptors::BindlessSrvAllocation;
use crate::queue::QueueType;

/// Opaque identity of a GPU resource, stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub u64);

/// Hands out [`ResourceId`]s for transient resources created by a
/// [`crate::builder::FrameGraphBuilder`]. Process-wide, like
/// [`crate::graph::ModuleIdAllocator`]: builders constructed in parallel and
/// later merged must not collide on the ids they assign their transients.
#[derive(Debug, Default)]
pub struct ResourceIdAllocator(AtomicU64);

impl ResourceIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> ResourceId {
        ResourceId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

pub type ResourceState = u32;

pub const STATE_COMMON: ResourceState = 0;
pub const STATE_RENDER_TARGET: ResourceState = 1 << 0;
pub const STATE_PIXEL_SHADER_RESOURCE: ResourceState = 1 << 1;
pub const STATE_COPY_SOURCE: ResourceState = 1 << 2;
pub const STATE_COPY_DEST: ResourceState = 1 << 3;
pub const STATE_UNORDERED_ACCESS: ResourceState = 1 << 4;

/// Whether `queue` is capable of transitioning a resource into/out of
/// `state` at all (a copy queue cannot touch a render target, a compute
/// queue cannot touch a render target either).
pub(crate) fn queue_supports_state(queue: QueueType, state: ResourceState) -> bool {
    match queue {
        QueueType::Direct => true,
        QueueType::Compute => state & STATE_RENDER_TARGET == 0,
        QueueType::Copy => {
            state & (STATE_RENDER_TARGET | STATE_PIXEL_SHADER_RESOURCE | STATE_UNORDERED_ACCESS) == 0
        }
    }
}

define_handle! {
    /// A backend-owned, persistent GPU resource (texture or buffer) bound to
    /// a [`GPUResource`]. Opaque to this crate; carried only so the
    /// execution core can hand it back to the host engine at recording
    /// time.
    NativeResourceHandle
}

/// A GPU-side resource tracked by the frame graph: its current state, the
/// last frame it was touched by a compiled execution module, and — for
/// resources actually bound to backing storage — the aliased allocation,
/// native handle, and bindless descriptor (if any) it holds.
#[derive(Debug)]
pub struct GPUResource {
    id: ResourceId,
    state: Mutex<ResourceState>,
    last_use_frame: AtomicU64,
    heap_offset: Mutex<Option<u64>>,
    native_handle: Mutex<Option<NativeResourceHandle>>,
    bindless_srv: Mutex<Option<BindlessSrvAllocation>>,
}

impl GPUResource {
    pub fn new(id: ResourceId, initial_state: ResourceState) -> Self {
        Self {
            id,
            state: Mutex::new(initial_state),
            last_use_frame: AtomicU64::new(0),
            heap_offset: Mutex::new(None),
            native_handle: Mutex::new(None),
            bindless_srv: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn state(&self) -> ResourceState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: ResourceState) {
        *self.state.lock() = state;
    }

    pub fn touch(&self, frame: u64) {
        self.last_use_frame.fetch_max(frame, Ordering::SeqCst);
    }

    pub fn last_use_frame(&self) -> u64 {
        self.last_use_frame.load(Ordering::SeqCst)
    }

    /// The heap offset backing this resource, if it has been bound to an
    /// aliased allocation. A resource with no offset opts out of aliasing
    /// tracking entirely (e.g. a persistent, non-aliased resource).
    pub fn heap_offset(&self) -> Option<u64> {
        *self.heap_offset.lock()
    }

    pub fn set_heap_offset(&self, offset: Option<u64>) {
        *self.heap_offset.lock() = offset;
    }

    /// Record the offset of a [`TlsfAlloc`] this resource now occupies.
    pub fn bind_transient_allocation(&self, alloc: &TlsfAlloc) {
        *self.heap_offset.lock() = Some(alloc.offset());
    }

    /// The persistent, backend-owned resource object this `GPUResource`
    /// stands in for, once bound.
    pub fn native_handle(&self) -> Option<NativeResourceHandle> {
        self.native_handle.lock().clone()
    }

    pub fn set_native_handle(&self, handle: Option<NativeResourceHandle>) {
        *self.native_handle.lock() = handle;
    }

    pub fn bindless_srv_index(&self) -> Option<u32> {
        self.bindless_srv.lock().as_ref().map(BindlessSrvAllocation::index)
    }

    pub fn set_bindless_srv(&self, alloc: Option<BindlessSrvAllocation>) {
        *self.bindless_srv.lock() = alloc;
    }
}

/// A pending transition of one resource's subresource from `before` to
/// `after`, queued by a render pass's declared dependency.
#[derive(Debug, Clone)]
pub struct ResourceEvent {
    pub resource: ResourceId,
    pub subresource: u32,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// Splits a batch of pending resource events into the ones a given queue can
/// dispatch directly and the ones it cannot (because the queue type lacks
/// the capability to hold `before` or `after` as a resource state).
///
/// Impossible events are the frame graph compiler's cue to synthesize a
/// direct-queue prologue recorder ahead of the module's main submissions.
#[derive(Debug, Default)]
pub struct GPUResourceEventManager;

impl GPUResourceEventManager {
    pub fn reconcile(
        queue: QueueType,
        events: Vec<ResourceEvent>,
    ) -> (Vec<ResourceEvent>, Vec<ResourceEvent>) {
        events.into_iter().partition(|ev| {
            queue_supports_state(queue, ev.before) && queue_supports_state(queue, ev.after)
        })
    }
}

/// Tracks, for each heap memory offset, which resource currently occupies
/// it, so the frame-graph compiler can detect when a region is about to be
/// reused by a different resource and must emit an aliasing barrier first.
///
/// Runs single-threaded during frame-graph compilation (see the design note
/// on the aliasing pass), so no internal locking is needed.
#[derive(Debug, Default)]
pub struct AliasedGPUMemoryManager {
    occupants: HashMap<u64, ResourceId>,
}

impl AliasedGPUMemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `resource` is about to use whatever heap region it's
    /// bound to. A resource with no bound offset ([`GPUResource::heap_offset`]
    /// is `None`) isn't aliased and is skipped entirely.
    ///
    /// Returns the previous occupant if the region was aliased by a
    /// *different* resource, which the caller must barrier against before
    /// recording the pass.
    pub fn transition(&mut self, resource: &GPUResource) -> Option<ResourceId> {
        let offset = resource.heap_offset()?;
        let previous = self.occupants.insert(offset, resource.id());
        previous.filter(|&prev| prev != resource.id())
    }
}

/// Defers destruction/reclamation of per-resource bookkeeping until the GPU
/// has actually finished with the frame that last touched a resource.
#[derive(Debug, Default)]
pub struct ResourceLifetimeTracker {
    last_use: Mutex<HashMap<ResourceId, u64>>,
}

impl ResourceLifetimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self, resource: ResourceId, frame: u64) {
        let mut map = self.last_use.lock();
        let entry = map.entry(resource).or_insert(frame);
        if frame > *entry {
            *entry = frame;
        }
    }

    pub fn last_use(&self, resource: ResourceId) -> Option<u64> {
        self.last_use.lock().get(&resource).copied()
    }

    pub fn is_retireable(&self, resource: ResourceId, current_frame: u64, max_frames_in_flight: u64) -> bool {
        match self.last_use(resource) {
            Some(last) => current_frame.saturating_sub(last) >= max_frames_in_flight,
            None => true,
        }
    }
}
