//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Synchronization primitives.

/// Operations a fence implementation must provide.
///
/// A fence is a monotonically increasing counter. A consumer waits for it to
/// reach a target value rather than for a specific submission to finish,
/// which is what lets one fence back an arbitrarily long chain of
/// submissions.
pub trait FenceImpl: crate::handles::HandleImpl {
    /// The highest value this fence has signaled so far.
    fn current_value(&self) -> u64;

    /// Block the calling thread until the fence reaches at least `value`.
    fn wait(&self, value: u64);

    /// Signal the fence to `value`. `value` must not be lower than the
    /// fence's current value.
    fn signal(&self, value: u64);
}

define_handle! {
    /// Fence handle.
    ///
    /// See [the module-level documentation of `handles`](../handles/index.html)
    /// for the generic usage of handles.
    Fence : FenceImpl
}
