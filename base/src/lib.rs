//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! This crate is a part of FrameGraph and provides the base interface types
//! shared by the execution core: opaque handles, the fence synchronization
//! primitive, and the crate-wide `Error`/`Result` types.

// `handles` defines a macro
#[macro_use]
pub mod handles;
mod error;
pub mod sync;

pub use self::error::*;
pub use self::handles::*;
pub use self::sync::*;

/// The `framegraph_base` prelude.
pub mod prelude {
    #[doc(no_inline)]
    pub use crate::handles::HandleImpl;
}
