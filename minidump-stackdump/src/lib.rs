// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! A library for printing a thread's raw stack memory, annotated with the
//! frames a minidump processor found in it.
//!
//! A [`ProcessState`] is a snapshot that has already been unwound and
//! symbolized elsewhere. It can be built in memory or loaded from JSON with
//! [`snapshot::read_path`]. [`ProcessState::print_thread_stack`] then writes
//! one line per stack word, marking the stack pointers, frame pointers and
//! return addresses of the thread's frames.

mod memory;
mod process_state;
pub mod snapshot;
mod stack_dump;
mod system_info;

pub use memory::*;
pub use process_state::*;
pub use stack_dump::*;
pub use system_info::*;

#[cfg(test)]
mod stack_dump_unittest;
