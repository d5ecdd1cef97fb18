//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The FrameGraph execution core: compiles render passes into execution
//! modules, records their command lists in parallel, and submits them to
//! the GPU's direct/compute/copy queues in a correct, ordered fashion,
//! while managing a transient sub-allocator and a bindless descriptor heap.
#![warn(rust_2018_idioms)]

extern crate framegraph_base as base;

pub mod alloc;
pub mod builder;
pub mod command;
pub mod config;
pub mod descriptors;
pub mod graph;
pub mod job;
pub mod pass;
pub mod queue;
pub mod resource;

pub use crate::builder::{FrameGraphBuilder, TransientResourceInfo};
pub use crate::command::{GPUCommandContextGroup, GPUCommandContextSubmissionPoint, RecordingClosure};
pub use crate::config::FrameGraphConfig;
pub use crate::graph::{CompiledModule, ExecutionModule, FrameGraphCompiler, ModuleIdAllocator, RecordedCommandList};
pub use crate::pass::{RenderPass, RenderPassBundle, ResourceDependency};
pub use crate::queue::{CommandContext, CommandContextVault, GPUEventHandle, QueueType};

pub use base::{Error, ErrorKind, Result};

/// Re-exports commonly needed together by a host engine wiring this crate
/// into its frame loop.
pub mod prelude {
    pub use crate::alloc::{TlsfAlloc, TlsfHeap};
    pub use crate::builder::{FrameGraphBuilder, TransientResourceInfo};
    pub use crate::command::{GPUCommandContextGroup, GPUCommandContextSubmissionPoint, GPUCommandManager, RecordingClosure};
    pub use crate::config::FrameGraphConfig;
    pub use crate::descriptors::{BindlessSrvAllocation, GPUResourceDescriptorHeap, PerFrameDescriptorTable};
    pub use crate::graph::{CompiledModule, ExecutionModule, FrameGraphCompiler};
    pub use crate::job::{JobGroup, JobGroupHandle};
    pub use crate::pass::{RenderPass, RenderPassBundle, ResourceDependency};
    pub use crate::queue::{GPUEventHandle, QueueType};
    pub use crate::resource::{GPUResource, ResourceId, ResourceIdAllocator, ResourceLifetimeTracker};
    pub use base::{Error, ErrorKind, Result};
}
