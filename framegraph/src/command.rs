//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Ordered, fence-synchronized submission of recorded command lists across
//! the direct, compute, and copy queues, and the dedicated thread that
//! drains compiled execution modules onto the GPU in module-id order.
//!
//! Recording itself (turning a chunk of render passes into calls against a
//! native `R`) is the frame graph compiler's job (see `crate::graph`); this
//! module owns acquiring/releasing command contexts, running the recording
//! closures, and getting the resulting native command lists onto the GPU in
//! the right order.
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use framegraph_base::Result;

use crate::job::JobGroup;
use crate::queue::{CommandContext, CommandContextVault, GPUEventHandle, QueueType, SubmissionBaton};

/// A unit of deferred recording work against a native recording target `R`,
/// run once a command context has been acquired for it.
pub type RecordingClosure<R> = Box<dyn FnOnce(&R) + Send>;

/// Acquires/releases reusable `(allocator, list, fence)` triples for the
/// three queues and serializes their submission to the GPU.
pub struct GPUCommandManager<R> {
    vaults: Vec<CommandContextVault<R>>,
    baton: SubmissionBaton,
}

impl<R: Clone + Send + 'static> GPUCommandManager<R> {
    /// `make` is called once per queue type whenever its vault needs to
    /// allocate a fresh context (no free one is reusable yet). It must
    /// return a freshly created, zero-valued fence and a native recording
    /// target.
    pub fn new(
        make: impl Fn(QueueType) -> Result<(framegraph_base::sync::Fence, R)> + Send + Sync + Clone + 'static,
    ) -> Self {
        let vaults = QueueType::ALL
            .iter()
            .map(|&q| {
                let make = make.clone();
                CommandContextVault::new(move || make(q))
            })
            .collect();
        Self {
            vaults,
            baton: SubmissionBaton::new(),
        }
    }

    fn vault(&self, queue: QueueType) -> &CommandContextVault<R> {
        &self.vaults[queue as usize]
    }

    /// Acquire a context for `queue`, ready to have passes recorded into
    /// its `recorder`.
    pub fn acquire_context(&self, queue: QueueType) -> Result<CommandContext<R>> {
        self.vault(queue).acquire()
    }

    /// Record and submit a batch of work, one array of recording closures
    /// per queue.
    ///
    /// For every closure: acquires a context (bumping its fence's required
    /// value), schedules the closure to run against that context's recorder
    /// on a worker thread, and returns the context to its vault immediately
    /// — safe because the vault won't hand the same context out again until
    /// its fence reaches the value just assigned, which doesn't happen until
    /// this very call signals it below. Once every closure has been
    /// scheduled, joins the job group (so every recording has actually run),
    /// takes this call's turn on the submission baton (serializing against
    /// concurrent callers in arrival order), then performs one native
    /// multi-submit per non-empty queue, in `(Direct, Compute, Copy)` order,
    /// signaling that queue's fences immediately after its submit call
    /// returns.
    ///
    /// `native_submit` is called at most three times, only after this call
    /// has won its turn on the baton.
    ///
    /// Returns a [`GPUEventHandle`] bundling one `(fence, value)` pair per
    /// recorded closure.
    pub fn submit_job_group(
        &self,
        direct: Vec<RecordingClosure<R>>,
        compute: Vec<RecordingClosure<R>>,
        copy: Vec<RecordingClosure<R>>,
        mut native_submit: impl FnMut(QueueType, &[&R]) -> Result<()>,
    ) -> Result<GPUEventHandle> {
        let mut handle = GPUEventHandle::new();
        let mut jobs = JobGroup::new();
        // One (fence, target value, recorder) snapshot per acquired context,
        // kept around for the native multi-submit call below, after every
        // context has already been returned to its vault.
        let mut per_queue: Vec<(QueueType, Vec<(framegraph_base::sync::Fence, u64, R)>)> = Vec::new();

        for (queue, recordings) in vec![
            (QueueType::Direct, direct),
            (QueueType::Compute, compute),
            (QueueType::Copy, copy),
        ] {
            let mut snapshots = Vec::with_capacity(recordings.len());
            for recording in recordings {
                let ctx = self.acquire_context(queue)?;
                handle.add_fence(ctx.fence.clone(), ctx.required_value);
                snapshots.push((ctx.fence.clone(), ctx.required_value, ctx.recorder.clone()));

                let recorder = ctx.recorder.clone();
                jobs.add_job(move || recording(&recorder));

                self.vault(queue).release(ctx);
            }
            per_queue.push((queue, snapshots));
        }

        jobs.execute_jobs();

        self.baton.take_turn(handle.clone());

        for (queue, snapshots) in &per_queue {
            if snapshots.is_empty() {
                continue;
            }
            let recorders: Vec<&R> = snapshots.iter().map(|(_, _, r)| r).collect();
            native_submit(*queue, &recorders)?;
            for (fence, value, _) in snapshots {
                fence.signal(*value);
            }
        }

        Ok(handle)
    }
}

/// The recording closures produced by compiling one execution module,
/// bucketed by queue. Produced by [`crate::graph::CompiledModule::into_context_groups`]
/// and consumed by a [`GPUCommandContextSubmissionPoint`].
pub struct GPUCommandContextGroup<R> {
    pub module_id: u32,
    pub direct: Vec<RecordingClosure<R>>,
    pub compute: Vec<RecordingClosure<R>>,
    pub copy: Vec<RecordingClosure<R>>,
}

impl<R> GPUCommandContextGroup<R> {
    pub fn new(module_id: u32) -> Self {
        Self {
            module_id,
            direct: Vec::new(),
            compute: Vec::new(),
            copy: Vec::new(),
        }
    }

    pub fn push(&mut self, queue: QueueType, job: RecordingClosure<R>) {
        match queue {
            QueueType::Direct => self.direct.push(job),
            QueueType::Compute => self.compute.push(job),
            QueueType::Copy => self.copy.push(job),
        }
    }
}

impl<R> std::fmt::Debug for GPUCommandContextGroup<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GPUCommandContextGroup")
            .field("module_id", &self.module_id)
            .field("direct", &self.direct.len())
            .field("compute", &self.compute.len())
            .field("copy", &self.copy.len())
            .finish()
    }
}

enum SubmissionMsg<R> {
    Groups(Vec<GPUCommandContextGroup<R>>),
    Stop,
}

/// A dedicated thread that drains compiled execution modules' command
/// contexts strictly in increasing module-id order.
///
/// Parallel compilation means modules can be handed to [`Self::submit`] in
/// any order; this buffers out-of-order arrivals until their predecessor has
/// drained, so what reaches the GPU still reflects the order the modules
/// were defined in.
pub struct GPUCommandContextSubmissionPoint<R> {
    tx: Sender<SubmissionMsg<R>>,
    thread: Option<JoinHandle<()>>,
}

impl<R: Clone + Send + 'static> GPUCommandContextSubmissionPoint<R> {
    pub fn new(
        manager: Arc<GPUCommandManager<R>>,
        mut native_submit: impl FnMut(QueueType, &[&R]) -> Result<()> + Send + 'static,
    ) -> Self {
        let (tx, rx) = unbounded::<SubmissionMsg<R>>();
        let thread = std::thread::spawn(move || {
            // A module may compile to more than one group (an optional
            // direct-queue prologue ahead of its principal group), which
            // must drain together and in order before the next module id is
            // considered.
            let mut pending: HashMap<u32, Vec<GPUCommandContextGroup<R>>> = HashMap::new();
            let mut next_id: u32 = 0;
            for msg in rx {
                let groups = match msg {
                    SubmissionMsg::Stop => break,
                    SubmissionMsg::Groups(groups) => groups,
                };
                if let Some(module_id) = groups.first().map(|g| g.module_id) {
                    pending.insert(module_id, groups);
                }
                while let Some(groups) = pending.remove(&next_id) {
                    log::debug!("submission point draining module {}", next_id);
                    for group in groups {
                        match manager.submit_job_group(group.direct, group.compute, group.copy, &mut native_submit) {
                            Ok(handle) => handle.wait(),
                            Err(err) => log::error!("module {} failed to submit: {:?}", next_id, err),
                        }
                    }
                    next_id = next_id.wrapping_add(1);
                }
            }
        });
        Self {
            tx,
            thread: Some(thread),
        }
    }

    /// Hand off one module's groups (its optional prologue group followed by
    /// its principal group, all sharing the same `module_id`) to be drained
    /// once that module id comes up. Separate calls to `submit` need not
    /// arrive in module-id order.
    pub fn submit(&self, groups: Vec<GPUCommandContextGroup<R>>) {
        // The only send error is a disconnected receiver, which only happens
        // after the draining thread has already panicked.
        let _ = self.tx.send(SubmissionMsg::Groups(groups));
    }
}

impl<R> Drop for GPUCommandContextSubmissionPoint<R> {
    fn drop(&mut self) {
        let _ = self.tx.send(SubmissionMsg::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framegraph_base::sync::{Fence, FenceImpl};
    use parking_lot::Mutex as PLMutex;
    use std::sync::{Arc, Condvar, Mutex};

    #[derive(Debug)]
    struct MockFence {
        value: Mutex<u64>,
        cv: Condvar,
    }

    impl MockFence {
        fn new() -> Fence {
            Fence::new(Self {
                value: Mutex::new(0),
                cv: Condvar::new(),
            })
        }
    }

    impl FenceImpl for MockFence {
        fn current_value(&self) -> u64 {
            *self.value.lock().unwrap()
        }
        fn wait(&self, value: u64) {
            let mut v = self.value.lock().unwrap();
            while *v < value {
                v = self.cv.wait(v).unwrap();
            }
        }
        fn signal(&self, value: u64) {
            let mut v = self.value.lock().unwrap();
            *v = value;
            self.cv.notify_all();
        }
    }

    fn noop_job() -> RecordingClosure<u32> {
        Box::new(|_: &u32| {})
    }

    #[test]
    fn submits_queues_in_direct_compute_copy_order() {
        let manager: GPUCommandManager<u32> = GPUCommandManager::new(|_q| Ok((MockFence::new(), 0u32)));

        let order = Arc::new(PLMutex::new(Vec::<QueueType>::new()));
        let order2 = Arc::clone(&order);

        let handle = manager
            .submit_job_group(vec![noop_job()], vec![noop_job()], vec![noop_job()], move |queue, _recorders| {
                order2.lock().push(queue);
                Ok(())
            })
            .unwrap();

        assert_eq!(*order.lock(), vec![QueueType::Direct, QueueType::Compute, QueueType::Copy]);
        assert!(handle.is_complete());
    }

    #[test]
    fn empty_queues_are_skipped_without_a_native_submit_call() {
        let manager: GPUCommandManager<u32> = GPUCommandManager::new(|_q| Ok((MockFence::new(), 0u32)));
        let calls = Arc::new(PLMutex::new(Vec::<QueueType>::new()));
        let calls2 = Arc::clone(&calls);

        manager
            .submit_job_group(vec![noop_job()], Vec::new(), Vec::new(), move |queue, _recorders| {
                calls2.lock().push(queue);
                Ok(())
            })
            .unwrap();

        assert_eq!(*calls.lock(), vec![QueueType::Direct]);
    }

    #[test]
    fn contexts_are_reused_once_fence_catches_up() {
        let manager: GPUCommandManager<u32> = GPUCommandManager::new(|_q| Ok((MockFence::new(), 0u32)));

        let ctx1 = manager.acquire_context(QueueType::Direct).unwrap();
        let fence = ctx1.fence.clone();
        manager.vault(QueueType::Direct).release(ctx1);

        manager
            .submit_job_group(vec![noop_job()], Vec::new(), Vec::new(), |_, _| Ok(()))
            .unwrap();

        let ctx2 = manager.acquire_context(QueueType::Direct).unwrap();
        // Reused the same fence rather than allocating a new one.
        assert_eq!(ctx2.fence.current_value(), fence.current_value());
    }

    #[test]
    fn submission_point_drains_modules_in_id_order_even_when_reported_out_of_order() {
        let manager = Arc::new(GPUCommandManager::<u32>::new(|_q| Ok((MockFence::new(), 0u32))));
        let order = Arc::new(PLMutex::new(Vec::<u32>::new()));

        let point = GPUCommandContextSubmissionPoint::new(Arc::clone(&manager), |_queue, _recorders| Ok(()));

        let order_for_1 = Arc::clone(&order);
        let mut group1 = GPUCommandContextGroup::<u32>::new(1);
        group1.push(
            QueueType::Direct,
            Box::new(move |_: &u32| order_for_1.lock().push(1)),
        );

        let order_for_0 = Arc::clone(&order);
        let mut group0 = GPUCommandContextGroup::<u32>::new(0);
        group0.push(
            QueueType::Direct,
            Box::new(move |_: &u32| order_for_0.lock().push(0)),
        );

        point.submit(vec![group1]);
        point.submit(vec![group0]);

        drop(point); // flushes pending work and joins the draining thread

        assert_eq!(*order.lock(), vec![0, 1]);
    }
}
