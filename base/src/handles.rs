//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! (Light-weight) handle types.
//!
//! Handles represent references to backend-owned objects such as fences and
//! heap allocations. A handle is a cheap, `Clone`-able reference to a
//! reference-counted trait object. Only the reference, not the object
//! itself, is cloned.
//!
//! # Examples
//!
//! This example uses the [`define_handle`] macro to define a handle type
//! wrapping a given trait.
//!
//!     use framegraph_base::define_handle;
//!
//!     trait MyFenceImpl: std::fmt::Debug + Send + Sync + 'static {
//!         fn value(&self) -> u64;
//!     }
//!
//!     define_handle! { MyFence: MyFenceImpl }
//!
//!     #[derive(Debug)]
//!     struct Impl(u64);
//!     impl MyFenceImpl for Impl {
//!         fn value(&self) -> u64 { self.0 }
//!     }
//!
//!     let handle = MyFence::new(Impl(1));
//!     assert_eq!(handle.value(), 1);
//!
use std::fmt;

/// Default bound satisfied by any handle implementation when no narrower
/// trait is supplied to [`define_handle`].
pub trait HandleImpl: fmt::Debug + Send + Sync + 'static {}

impl<T: fmt::Debug + Send + Sync + 'static> HandleImpl for T {}

/// Defines a reference-counted handle type wrapping `Arc<dyn $trait>`.
#[macro_export]
macro_rules! define_handle {
    ($(#[$smeta:meta])* $name:ident) => {
        $crate::define_handle! { $(#[$smeta])* $name : $crate::handles::HandleImpl }
    };
    ($(#[$smeta:meta])* $name:ident : $trait:path) => {
        $(#[$smeta])*
        #[derive(Debug, Clone)]
        pub struct $name(std::sync::Arc<dyn $trait>);

        impl $name {
            pub fn new<T: $trait>(x: T) -> Self {
                Self(std::sync::Arc::new(x))
            }
        }

        impl<T: $trait> From<T> for $name {
            fn from(x: T) -> Self {
                Self::new(x)
            }
        }

        impl ::std::ops::Deref for $name {
            type Target = dyn $trait;

            fn deref(&self) -> &Self::Target {
                &*self.0
            }
        }
    };
}
