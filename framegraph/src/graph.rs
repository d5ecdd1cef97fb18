//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Frame graph compilation: turning a stream of render-pass bundles into
//! execution modules, chunking them into command-list recorders, resolving
//! memory aliasing and impossible resource-state events, recording
//! everything in parallel, and handing the result off in a shape a
//! [`crate::command::GPUCommandContextSubmissionPoint`] can drain in order.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as PLMutex;

use crate::command::{GPUCommandContextGroup, RecordingClosure};
use crate::config::FrameGraphConfig;
use crate::job::JobGroup;
use crate::pass::{RenderPass, RenderPassBundle};
use crate::queue::QueueType;
use crate::resource::{
    AliasedGPUMemoryManager, GPUResource, GPUResourceEventManager, ResourceEvent, ResourceId,
    ResourceLifetimeTracker,
};

/// A monotonic execution-module id, process-wide (see the design note on
/// global state: this and the bindless index queue are the only two
/// singletons the execution core needs).
#[derive(Debug, Default)]
pub struct ModuleIdAllocator(AtomicU32);

impl ModuleIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// A chunk of up to `max_render_passes_per_command_list` passes on one
/// queue, recorded into a single native command list.
struct CommandListRecorder<R> {
    queue: QueueType,
    passes: Vec<RenderPass<R>>,
    barrier_count: usize,
}

impl<R: 'static> CommandListRecorder<R> {
    fn new(queue: QueueType, passes: Vec<RenderPass<R>>) -> Self {
        Self {
            queue,
            passes,
            barrier_count: 0,
        }
    }

    fn record(mut self) -> RecordedCommandList<R> {
        let pass_count = self.passes.len();
        let pass_jobs: Vec<Box<dyn FnOnce(&R) + Send>> = self
            .passes
            .iter_mut()
            .filter_map(RenderPass::take_record_commands)
            .collect();
        let record: RecordingClosure<R> = Box::new(move |recorder: &R| {
            for job in pass_jobs {
                job(recorder);
            }
        });
        RecordedCommandList {
            queue: self.queue,
            pass_count,
            barrier_count: self.barrier_count,
            record,
        }
    }
}

/// Output of recording one [`CommandListRecorder`]: the native recording
/// closure plus the bookkeeping the compiler accumulated for it. Stands in
/// for a native command list (out of scope: the actual graphics-API
/// binding).
pub struct RecordedCommandList<R> {
    pub queue: QueueType,
    pub pass_count: usize,
    pub barrier_count: usize,
    record: RecordingClosure<R>,
}

impl<R> RecordedCommandList<R> {
    /// Take the recording closure out, for handing off to a
    /// [`GPUCommandContextGroup`].
    pub fn into_recording(self) -> RecordingClosure<R> {
        self.record
    }
}

impl<R> std::fmt::Debug for RecordedCommandList<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordedCommandList")
            .field("queue", &self.queue)
            .field("pass_count", &self.pass_count)
            .field("barrier_count", &self.barrier_count)
            .finish()
    }
}

/// A set of passes sharing one scheduling unit: at most one submission per
/// used queue.
pub struct ExecutionModule<R> {
    id: u32,
    passes_by_queue: Vec<Vec<RenderPass<R>>>,
}

impl<R> ExecutionModule<R> {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            passes_by_queue: vec![Vec::new(), Vec::new(), Vec::new()],
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn add_pass_bundle(&mut self, bundle: RenderPassBundle<R>) {
        for pass in bundle.into_passes() {
            self.passes_by_queue[pass.queue_type() as usize].push(pass);
        }
    }

    /// Fold `other`'s passes into this module, preserving each queue's
    /// existing passes ahead of `other`'s. `other`'s own id is discarded;
    /// the merged module keeps `self`'s id.
    ///
    /// This is what lets a [`crate::builder::FrameGraphBuilder`] be built up
    /// in parallel on multiple threads and merged back into one module
    /// before compilation.
    pub fn merge(&mut self, other: ExecutionModule<R>) {
        for (queue_passes, other_passes) in self.passes_by_queue.iter_mut().zip(other.passes_by_queue) {
            queue_passes.extend(other_passes);
        }
    }

    pub fn render_pass_count(&self) -> usize {
        self.passes_by_queue.iter().map(Vec::len).sum()
    }

    pub fn used_queues(&self) -> Vec<QueueType> {
        QueueType::ALL
            .iter()
            .copied()
            .filter(|&q| !self.passes_by_queue[q as usize].is_empty())
            .collect()
    }

    pub fn resource_dependencies(&self) -> Vec<ResourceId> {
        let mut deps: Vec<ResourceId> = self
            .passes_by_queue
            .iter()
            .flatten()
            .flat_map(|pass| pass.dependencies().iter().map(|dep| dep.resource))
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }
}

impl<R> std::fmt::Debug for ExecutionModule<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionModule")
            .field("id", &self.id)
            .field("render_pass_count", &self.render_pass_count())
            .finish()
    }
}

fn chunk_passes<R>(passes: Vec<RenderPass<R>>, max: usize) -> Vec<Vec<RenderPass<R>>> {
    let mut out = Vec::new();
    let mut iter = passes.into_iter().peekable();
    while iter.peek().is_some() {
        out.push(iter.by_ref().take(max.max(1)).collect());
    }
    out
}

/// The result of compiling one [`ExecutionModule`]: one or two groups of
/// recorded command lists, in submission order. A second (prologue) group
/// appears before the principal one only when impossible resource events
/// forced a synthesized direct-queue recorder.
pub struct CompiledModule<R> {
    pub groups: Vec<Vec<RecordedCommandList<R>>>,
}

impl<R> CompiledModule<R> {
    pub fn has_prologue(&self) -> bool {
        self.groups.len() > 1
    }

    pub fn principal_group(&self) -> &[RecordedCommandList<R>] {
        self.groups.last().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Bucket every recorded command list by queue into the
    /// [`GPUCommandContextGroup`]s a [`crate::command::GPUCommandContextSubmissionPoint`]
    /// drains, tagging every one with `module_id` so they drain in order
    /// relative to other modules. A prologue group (if present) becomes its
    /// own [`GPUCommandContextGroup`], ahead of the principal one, so it is
    /// fully submitted before the principal group is even considered.
    pub fn into_context_groups(self, module_id: u32) -> Vec<GPUCommandContextGroup<R>> {
        self.groups
            .into_iter()
            .map(|lists| {
                let mut group = GPUCommandContextGroup::new(module_id);
                for list in lists {
                    let queue = list.queue;
                    group.push(queue, list.into_recording());
                }
                group
            })
            .collect()
    }
}

impl<R> std::fmt::Debug for CompiledModule<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("groups", &self.groups.iter().map(Vec::len).collect::<Vec<_>>())
            .finish()
    }
}

/// Compiles [`ExecutionModule`]s into recorded command lists: chunking,
/// serialized aliasing-barrier resolution, resource-event reconciliation,
/// and parallel recording.
pub struct FrameGraphCompiler {
    config: FrameGraphConfig,
    lifetime: ResourceLifetimeTracker,
}

impl FrameGraphCompiler {
    pub fn new(config: FrameGraphConfig) -> Self {
        Self {
            config,
            lifetime: ResourceLifetimeTracker::new(),
        }
    }

    /// Whether `resource` hasn't been touched by a compiled module in the
    /// last `max_frames_in_flight` frames, and so can be reclaimed.
    pub fn is_resource_retireable(&self, resource: ResourceId, current_frame: u64) -> bool {
        self.lifetime
            .is_retireable(resource, current_frame, self.config.max_frames_in_flight)
    }

    /// `resources` maps every dependency target to its tracked state and
    /// backing allocation (if any — see [`GPUResource::heap_offset`]); a
    /// resource with no bound heap offset is opted out of aliasing checks
    /// entirely (e.g. a persistent, non-aliased resource).
    pub fn compile<R: 'static>(
        &self,
        mut module: ExecutionModule<R>,
        resources: &HashMap<ResourceId, Arc<GPUResource>>,
        frame: u64,
    ) -> CompiledModule<R> {
        log::debug!(
            "compiling execution module {} ({} passes)",
            module.id(),
            module.render_pass_count()
        );

        // Step 1: chunk each queue's passes into recorders of bounded size.
        let mut recorders: Vec<CommandListRecorder<R>> = Vec::new();
        for &queue in &QueueType::ALL {
            let passes = std::mem::take(&mut module.passes_by_queue[queue as usize]);
            for chunk in chunk_passes(passes, self.config.max_render_passes_per_command_list) {
                recorders.push(CommandListRecorder::new(queue, chunk));
            }
        }
        log::debug!("module {} chunked into {} recorders", module.id(), recorders.len());

        // Step 2: serialized aliasing-barrier resolution, in queue order.
        let mut alias_mgr = AliasedGPUMemoryManager::new();
        for recorder in &mut recorders {
            for pass in &recorder.passes {
                for dep in pass.dependencies() {
                    if let Some(res) = resources.get(&dep.resource) {
                        if alias_mgr.transition(res).is_some() {
                            recorder.barrier_count += 1;
                        }
                        res.touch(frame);
                    }
                    self.lifetime.touch(dep.resource, frame);
                }
            }
        }

        // Step 3: resource event reconciliation; aggregate impossible
        // events into a synthesized direct-queue prologue.
        let mut impossible_all: Vec<ResourceEvent> = Vec::new();
        for recorder in &mut recorders {
            let mut events = Vec::new();
            for pass in &recorder.passes {
                for dep in pass.dependencies() {
                    if let Some(res) = resources.get(&dep.resource) {
                        let before = res.state();
                        if before != dep.required_state {
                            events.push(ResourceEvent {
                                resource: dep.resource,
                                subresource: dep.subresource,
                                before,
                                after: dep.required_state,
                            });
                        }
                    }
                }
            }
            let (dispatchable, impossible) = GPUResourceEventManager::reconcile(recorder.queue, events);
            recorder.barrier_count += dispatchable.len();
            for ev in &dispatchable {
                if let Some(res) = resources.get(&ev.resource) {
                    res.set_state(ev.after);
                }
            }
            impossible_all.extend(impossible);
        }

        let prologue = if !impossible_all.is_empty() {
            log::warn!(
                "{} resource event(s) could not be dispatched on their owning queue; synthesizing a direct-queue prologue",
                impossible_all.len()
            );
            for ev in &impossible_all {
                if let Some(res) = resources.get(&ev.resource) {
                    res.set_state(ev.after);
                }
            }
            Some(CommandListRecorder {
                queue: QueueType::Direct,
                passes: Vec::new(),
                barrier_count: impossible_all.len(),
            })
        } else {
            None
        };

        // Step 4: parallel recording.
        let has_prologue = prologue.is_some();
        let mut all_recorders = recorders;
        if let Some(p) = prologue {
            all_recorders.insert(0, p);
        }

        let slots: Arc<Vec<PLMutex<Option<RecordedCommandList<R>>>>> =
            Arc::new((0..all_recorders.len()).map(|_| PLMutex::new(None)).collect());

        let mut jobs = JobGroup::new();
        jobs.reserve(all_recorders.len());
        for (i, recorder) in all_recorders.into_iter().enumerate() {
            let slots = Arc::clone(&slots);
            jobs.add_job(move || {
                let recorded = recorder.record();
                *slots[i].lock() = Some(recorded);
            });
        }
        jobs.execute_jobs();

        let recorded: Vec<RecordedCommandList<R>> = Arc::try_unwrap(slots)
            .unwrap_or_else(|_| panic!("all job closures have completed by now"))
            .into_iter()
            .map(|slot| slot.into_inner().expect("every recorder was recorded"))
            .collect();

        // Step 5: group into [prologue?, principal].
        let mut groups = Vec::new();
        let mut iter = recorded.into_iter();
        if has_prologue {
            groups.push(vec![iter.next().unwrap()]);
        }
        groups.push(iter.collect());

        CompiledModule { groups }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::ResourceDependency;
    use crate::resource::{STATE_COMMON, STATE_COPY_SOURCE, STATE_PIXEL_SHADER_RESOURCE, STATE_RENDER_TARGET};

    fn resource_map(ids: &[(u64, u32)]) -> HashMap<ResourceId, Arc<GPUResource>> {
        ids.iter()
            .map(|&(id, state)| (ResourceId(id), Arc::new(GPUResource::new(ResourceId(id), state))))
            .collect()
    }

    fn pass_with_dep(queue: QueueType, resource: u64, state: u32) -> RenderPass<()> {
        let mut pass = RenderPass::new(queue);
        pass.add_resource_dependency(ResourceDependency {
            resource: ResourceId(resource),
            subresource: 0,
            required_state: state,
        });
        pass.set_record_commands(|_ctx: &()| {});
        pass
    }

    #[test]
    fn s1_single_pass_direct_draw() {
        let resources = resource_map(&[(1, STATE_COMMON)]);
        let mut module = ExecutionModule::new(0);
        let mut bundle = RenderPassBundle::new();
        bundle.add_pass(pass_with_dep(QueueType::Direct, 1, STATE_RENDER_TARGET));
        module.add_pass_bundle(bundle);

        let compiler = FrameGraphCompiler::new(FrameGraphConfig::default());
        let compiled = compiler.compile(module, &resources, 0);

        assert!(!compiled.has_prologue());
        assert_eq!(compiled.principal_group().len(), 1);
        assert_eq!(compiled.principal_group()[0].queue, QueueType::Direct);
        assert_eq!(resources[&ResourceId(1)].state(), STATE_RENDER_TARGET);
    }

    #[test]
    fn s2_three_queue_fan_out() {
        let resources = resource_map(&[(1, STATE_COMMON), (2, STATE_COMMON), (3, STATE_COMMON)]);
        let mut module = ExecutionModule::new(1);
        let mut bundle = RenderPassBundle::new();
        for _ in 0..3 {
            bundle.add_pass(pass_with_dep(QueueType::Direct, 1, STATE_COMMON));
        }
        for _ in 0..2 {
            bundle.add_pass(pass_with_dep(QueueType::Compute, 2, STATE_COMMON));
        }
        bundle.add_pass(pass_with_dep(QueueType::Copy, 3, STATE_COMMON));
        module.add_pass_bundle(bundle);

        let compiler = FrameGraphCompiler::new(FrameGraphConfig::default());
        let compiled = compiler.compile(module, &resources, 0);

        assert!(!compiled.has_prologue());
        let group = compiled.principal_group();
        assert_eq!(group.len(), 3);
        let queues: Vec<QueueType> = group.iter().map(|r| r.queue).collect();
        assert_eq!(queues, vec![QueueType::Direct, QueueType::Compute, QueueType::Copy]);
    }

    #[test]
    fn s3_recorder_chunking_at_cap() {
        let resources = resource_map(&[(1, STATE_COMMON)]);
        let mut module = ExecutionModule::new(2);
        let mut bundle = RenderPassBundle::new();
        for _ in 0..125 {
            bundle.add_pass(pass_with_dep(QueueType::Direct, 1, STATE_COMMON));
        }
        module.add_pass_bundle(bundle);

        let compiler = FrameGraphCompiler::new(FrameGraphConfig::default());
        let compiled = compiler.compile(module, &resources, 0);

        let group = compiled.principal_group();
        assert_eq!(group.len(), 3);
        let counts: Vec<usize> = group.iter().map(|r| r.pass_count).collect();
        assert_eq!(counts, vec![50, 50, 25]);
    }

    #[test]
    fn s4_impossible_event_synthesizes_direct_prologue() {
        let _ = env_logger::try_init();
        let resources = resource_map(&[(1, STATE_PIXEL_SHADER_RESOURCE)]);
        let mut module = ExecutionModule::new(3);
        let mut bundle = RenderPassBundle::new();
        bundle.add_pass(pass_with_dep(QueueType::Copy, 1, STATE_COPY_SOURCE));
        module.add_pass_bundle(bundle);

        let compiler = FrameGraphCompiler::new(FrameGraphConfig::default());
        let compiled = compiler.compile(module, &resources, 0);

        assert!(compiled.has_prologue());
        assert_eq!(compiled.groups.len(), 2);
        assert_eq!(compiled.groups[0].len(), 1);
        assert_eq!(compiled.groups[0][0].queue, QueueType::Direct);
        assert_eq!(compiled.principal_group().len(), 1);
        assert_eq!(compiled.principal_group()[0].queue, QueueType::Copy);
        assert_eq!(resources[&ResourceId(1)].state(), STATE_COPY_SOURCE);
    }

    #[test]
    fn resource_dependencies_are_sorted_and_deduplicated() {
        let mut module = ExecutionModule::new(4);
        let mut bundle = RenderPassBundle::new();
        bundle.add_pass(pass_with_dep(QueueType::Direct, 5, STATE_COMMON));
        bundle.add_pass(pass_with_dep(QueueType::Direct, 2, STATE_COMMON));
        bundle.add_pass(pass_with_dep(QueueType::Compute, 5, STATE_COMMON));
        module.add_pass_bundle(bundle);

        assert_eq!(module.render_pass_count(), 3);
        assert_eq!(module.resource_dependencies(), vec![ResourceId(2), ResourceId(5)]);
        assert_eq!(module.used_queues(), vec![QueueType::Direct, QueueType::Compute]);
    }

    #[test]
    fn module_merge_preserves_per_queue_order() {
        let mut a = ExecutionModule::new(0);
        let mut bundle_a = RenderPassBundle::new();
        bundle_a.add_pass(pass_with_dep(QueueType::Direct, 1, STATE_COMMON));
        a.add_pass_bundle(bundle_a);

        let mut b = ExecutionModule::new(1);
        let mut bundle_b = RenderPassBundle::new();
        bundle_b.add_pass(pass_with_dep(QueueType::Direct, 2, STATE_COMMON));
        b.add_pass_bundle(bundle_b);

        a.merge(b);
        assert_eq!(a.id(), 0);
        assert_eq!(a.resource_dependencies(), vec![ResourceId(1), ResourceId(2)]);
        assert_eq!(a.render_pass_count(), 2);
    }

    #[test]
    fn into_context_groups_buckets_by_queue_and_tags_module_id() {
        let resources = resource_map(&[(1, STATE_COMMON), (2, STATE_COMMON)]);
        let mut module = ExecutionModule::new(7);
        let mut bundle = RenderPassBundle::new();
        bundle.add_pass(pass_with_dep(QueueType::Direct, 1, STATE_COMMON));
        bundle.add_pass(pass_with_dep(QueueType::Compute, 2, STATE_COMMON));
        module.add_pass_bundle(bundle);

        let compiler = FrameGraphCompiler::new(FrameGraphConfig::default());
        let compiled = compiler.compile(module, &resources, 0);
        let groups = compiled.into_context_groups(7);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].module_id, 7);
        assert_eq!(groups[0].direct.len(), 1);
        assert_eq!(groups[0].compute.len(), 1);
        assert_eq!(groups[0].copy.len(), 0);
    }

    #[test]
    fn module_id_allocator_is_monotonic() {
        let alloc = ModuleIdAllocator::new();
        let a = alloc.next();
        let b = alloc.next();
        assert!(b > a);
    }
}
