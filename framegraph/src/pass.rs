//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Render passes and the bundles they're submitted to the frame graph in.
use crate::queue::QueueType;
use crate::resource::{queue_supports_state, ResourceId, ResourceState};

/// A single `(resource, required state, subresource)` dependency declared by
/// a render pass.
#[derive(Debug, Clone)]
pub struct ResourceDependency {
    pub resource: ResourceId,
    pub subresource: u32,
    pub required_state: ResourceState,
}

/// A unit of GPU work on a specific queue, recorded against a native
/// recording target `R` supplied by the host engine.
///
/// Carries an opaque recording closure supplied by the caller; the frame
/// graph never inspects it, only runs it (on a worker thread, against the
/// native recorder it was assigned) once the pass has been chunked into a
/// command-list recorder.
pub struct RenderPass<R> {
    queue: QueueType,
    dependencies: Vec<ResourceDependency>,
    record: Option<Box<dyn FnOnce(&R) + Send>>,
}

impl<R> RenderPass<R> {
    pub fn new(queue: QueueType) -> Self {
        Self {
            queue,
            dependencies: Vec::new(),
            record: None,
        }
    }

    /// Declare that this pass needs `dependency.resource` to be in
    /// `dependency.required_state` before it runs.
    ///
    /// A queue that can never hold the required state at all (for example a
    /// copy queue depending on a render-target state) is always a caller
    /// bug, not a reachable runtime condition: such a dependency can never
    /// be dispatched on its own queue and always gets folded into the
    /// compiler's synthesized direct-queue prologue instead, silently, every
    /// single time this pass compiles. That's a correctness trap worth
    /// catching at the call site rather than at every future compile.
    pub fn add_resource_dependency(&mut self, dependency: ResourceDependency) -> &mut Self {
        debug_assert!(
            queue_supports_state(self.queue, dependency.required_state),
            "pass on {:?} queue declared a dependency on state {:#x}, which that queue can never hold",
            self.queue,
            dependency.required_state
        );
        self.dependencies.push(dependency);
        self
    }

    pub fn set_record_commands<F>(&mut self, f: F) -> &mut Self
    where
        F: FnOnce(&R) + Send + 'static,
    {
        self.record = Some(Box::new(f));
        self
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue
    }

    pub fn dependencies(&self) -> &[ResourceDependency] {
        &self.dependencies
    }

    /// Take ownership of the recording closure, leaving the pass's own slot
    /// empty. Used once by the recorder that ends up owning this pass.
    pub fn take_record_commands(&mut self) -> Option<Box<dyn FnOnce(&R) + Send>> {
        self.record.take()
    }
}

impl<R> std::fmt::Debug for RenderPass<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("queue", &self.queue)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// An ordered set of related passes submitted to the frame graph builder
/// atomically; pass order within a bundle is preserved in the eventual
/// per-queue recorder.
#[derive(Debug)]
pub struct RenderPassBundle<R> {
    passes: Vec<RenderPass<R>>,
}

impl<R> Default for RenderPassBundle<R> {
    fn default() -> Self {
        Self { passes: Vec::new() }
    }
}

impl<R> RenderPassBundle<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pass(&mut self, pass: RenderPass<R>) -> &mut Self {
        self.passes.push(pass);
        self
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn into_passes(self) -> Vec<RenderPass<R>> {
        self.passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::STATE_RENDER_TARGET;

    #[test]
    fn bundle_preserves_pass_order() {
        let mut bundle = RenderPassBundle::<()>::new();
        for i in 0..3 {
            let mut pass = RenderPass::<()>::new(QueueType::Direct);
            pass.add_resource_dependency(ResourceDependency {
                resource: ResourceId(i),
                subresource: 0,
                required_state: STATE_RENDER_TARGET,
            });
            bundle.add_pass(pass);
        }
        let passes = bundle.into_passes();
        assert_eq!(passes.len(), 3);
        for (i, pass) in passes.iter().enumerate() {
            assert_eq!(pass.dependencies()[0].resource, ResourceId(i as u64));
        }
    }

    #[test]
    #[should_panic(expected = "can never hold")]
    fn dependency_on_an_unsupported_state_panics() {
        let mut pass = RenderPass::<()>::new(QueueType::Copy);
        pass.add_resource_dependency(ResourceDependency {
            resource: ResourceId(0),
            subresource: 0,
            required_state: STATE_RENDER_TARGET,
        });
    }
}
