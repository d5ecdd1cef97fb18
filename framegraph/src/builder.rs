//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The external entry point a host engine's per-frame recording code
//! actually calls: accumulates transient resources and render pass bundles
//! into an [`ExecutionModule`], supporting independent, parallel
//! construction that is later merged back into a single builder.
use std::any::Any;
use std::sync::Arc;

use crate::graph::ExecutionModule;
use crate::pass::RenderPassBundle;
use crate::resource::{GPUResource, ResourceIdAllocator, ResourceState};

/// Describes the resource a [`FrameGraphBuilder::create_transient_resource`]
/// call is about to create. Implemented by the host engine's own
/// texture/buffer description types; this crate only needs to know the
/// state the resource starts its life in.
pub trait TransientResourceInfo {
    fn initial_state(&self) -> ResourceState;
}

/// Accumulates one execution module's transient resources and render pass
/// bundles ahead of compilation.
///
/// Multiple builders may be filled independently — on separate threads, one
/// per frame-graph "pass group" — and then folded together with
/// [`Self::merge_frame_graph_builder`] before the result is compiled.
pub struct FrameGraphBuilder<R> {
    module: ExecutionModule<R>,
    resource_ids: Arc<ResourceIdAllocator>,
    transients: Vec<Arc<GPUResource>>,
    descriptions: Vec<Box<dyn Any + Send + Sync>>,
}

impl<R> FrameGraphBuilder<R> {
    pub fn new(module_id: u32, resource_ids: Arc<ResourceIdAllocator>) -> Self {
        Self {
            module: ExecutionModule::new(module_id),
            resource_ids,
            transients: Vec::new(),
            descriptions: Vec::new(),
        }
    }

    /// Allocate a new transient [`GPUResource`] described by `init_info`,
    /// and return a reference to the description as stored by the builder.
    ///
    /// The returned reference borrows `self`, so it cannot outlive a later
    /// call that consumes the builder (`build`/`merge_frame_graph_builder`);
    /// read anything you need from it before calling either.
    pub fn create_transient_resource<T>(&mut self, init_info: T) -> &T
    where
        T: TransientResourceInfo + Send + Sync + 'static,
    {
        let id = self.resource_ids.next();
        self.transients.push(Arc::new(GPUResource::new(id, init_info.initial_state())));
        self.descriptions.push(Box::new(init_info));
        self.descriptions
            .last()
            .expect("just pushed")
            .downcast_ref::<T>()
            .expect("just boxed as T")
    }

    /// Add a bundle of render passes to this builder's module.
    pub fn add_render_pass_bundle(&mut self, bundle: RenderPassBundle<R>) -> &mut Self {
        self.module.add_pass_bundle(bundle);
        self
    }

    /// Fold `other`'s passes and transient resources into this builder.
    /// Used to combine builders that were filled in parallel.
    pub fn merge_frame_graph_builder(&mut self, other: FrameGraphBuilder<R>) -> &mut Self {
        self.module.merge(other.module);
        self.transients.extend(other.transients);
        self.descriptions.extend(other.descriptions);
        self
    }

    /// Consume the builder, yielding the execution module ready for
    /// compilation and the transient resources it created.
    pub fn build(self) -> (ExecutionModule<R>, Vec<Arc<GPUResource>>) {
        (self.module, self.transients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::{RenderPass, ResourceDependency};
    use crate::queue::QueueType;
    use crate::resource::STATE_COMMON;

    struct Texture {
        width: u32,
        height: u32,
    }

    impl TransientResourceInfo for Texture {
        fn initial_state(&self) -> ResourceState {
            STATE_COMMON
        }
    }

    #[test]
    fn create_transient_resource_returns_a_live_reference() {
        let mut builder = FrameGraphBuilder::<()>::new(0, Arc::new(ResourceIdAllocator::new()));
        {
            let tex = builder.create_transient_resource(Texture { width: 1920, height: 1080 });
            assert_eq!(tex.width, 1920);
            assert_eq!(tex.height, 1080);
        }
        let (_module, transients) = builder.build();
        assert_eq!(transients.len(), 1);
    }

    #[test]
    fn merge_combines_passes_and_transients() {
        let ids = Arc::new(ResourceIdAllocator::new());

        let mut a = FrameGraphBuilder::<()>::new(0, Arc::clone(&ids));
        let res_a = a.create_transient_resource(Texture { width: 256, height: 256 }).initial_state();
        let mut bundle_a = RenderPassBundle::new();
        let mut pass_a = RenderPass::new(QueueType::Direct);
        pass_a.add_resource_dependency(ResourceDependency {
            resource: crate::resource::ResourceId(0),
            subresource: 0,
            required_state: res_a,
        });
        bundle_a.add_pass(pass_a);
        a.add_render_pass_bundle(bundle_a);

        let mut b = FrameGraphBuilder::<()>::new(1, Arc::clone(&ids));
        b.create_transient_resource(Texture { width: 64, height: 64 });
        let mut bundle_b = RenderPassBundle::new();
        bundle_b.add_pass(RenderPass::new(QueueType::Compute));
        b.add_render_pass_bundle(bundle_b);

        a.merge_frame_graph_builder(b);

        let (module, transients) = a.build();
        assert_eq!(transients.len(), 2);
        assert_eq!(module.render_pass_count(), 2);
        assert_eq!(module.used_queues(), vec![QueueType::Direct, QueueType::Compute]);
    }
}
