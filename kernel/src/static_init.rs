// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Support for statically initializing objects in memory.

/// Allocates a statically-sized global region of memory and initializes the
/// memory for a particular data structure, returning a `&'static mut`
/// reference.
///
/// This is used by boards to wire up drivers whose clients hold `&'static`
/// references to each other. It must only be used in a single-threaded
/// context, and each textual instance must run at most once.
#[macro_export]
macro_rules! static_init {
    ($T:ty, $e:expr) => {{
        static mut BUF: core::mem::MaybeUninit<$T> = core::mem::MaybeUninit::uninit();
        #[allow(static_mut_refs)]
        let buf = unsafe { &mut BUF };
        buf.write($e)
    }};
}
