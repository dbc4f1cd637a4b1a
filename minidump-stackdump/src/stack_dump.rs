// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Print a thread's raw stack memory, annotated with the frames that were
//! found in it.
//!
//! Every word of the thread's stack memory gets one line. A word is
//! annotated when its address is the stack or frame pointer of a frame, or
//! when its value is the return address of a frame (in which case the
//! return address is symbolized).

use std::io;
use std::io::prelude::*;

use serde_json::json;
use tracing::{debug, trace, warn};

use crate::memory::MemoryRegion;
use crate::process_state::{CallStack, ProcessState};
use crate::system_info::Architecture;

/// An error encountered while dumping a thread's stack.
#[derive(Debug, thiserror::Error)]
pub enum StackDumpError {
    #[error("Thread {index} out of range: the snapshot has {count} threads")]
    ThreadOutOfRange { index: usize, count: usize },
    #[error("No stack memory for thread {index}: the snapshot has {count} memory regions")]
    MissingStackMemory { index: usize, count: usize },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StackDumpError {
    /// Returns just the name of the error, as a more human-friendly version of
    /// an error-code for error logging.
    pub fn name(&self) -> &'static str {
        match self {
            StackDumpError::ThreadOutOfRange { .. } => "ThreadOutOfRange",
            StackDumpError::MissingStackMemory { .. } => "MissingStackMemory",
            StackDumpError::Io(_) => "Io",
        }
    }
}

/// Why a stack word is interesting.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Annotation {
    /// The word's address is the stack pointer of `frame`.
    StackPointer { frame: usize },
    /// The word's address is the frame (base) pointer of `frame`.
    FramePointer { frame: usize },
    /// The word's value is the return address of `frame`.
    ReturnAddress { frame: usize },
}

/// One word of stack memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackWord {
    pub address: u64,
    /// The value stored at `address`, or zero if it wasn't captured.
    pub value: u64,
    pub annotations: Vec<Annotation>,
}

/// A thread's stack memory paired with its call stack.
pub struct StackDump<'a> {
    thread_index: usize,
    arch: Architecture,
    stack: &'a CallStack,
    memory: &'a MemoryRegion,
    /// Per frame, its (stack pointer, frame pointer) if its context is for `arch`.
    pointers: Vec<Option<(Option<u64>, Option<u64>)>>,
}

impl<'a> StackDump<'a> {
    pub fn new(
        thread_index: usize,
        arch: Architecture,
        stack: &'a CallStack,
        memory: &'a MemoryRegion,
    ) -> StackDump<'a> {
        let pointers = stack
            .frames
            .iter()
            .enumerate()
            .map(|(frame_index, frame)| {
                let pointers = frame.context.pointers_for(arch);
                if pointers.is_none() {
                    warn!(
                        "thread {} frame {} has a {} context, not {}; ignoring its stack pointers",
                        thread_index,
                        frame_index,
                        frame.context.architecture(),
                        arch
                    );
                }
                pointers
            })
            .collect();

        StackDump {
            thread_index,
            arch,
            stack,
            memory,
            pointers,
        }
    }

    pub fn thread_index(&self) -> usize {
        self.thread_index
    }

    pub fn architecture(&self) -> Architecture {
        self.arch
    }

    /// The number of words covering the memory region, counting a trailing
    /// partial word.
    pub fn word_count(&self) -> u64 {
        let word_size = self.arch.word_size();
        self.memory.size / word_size + u64::from(self.memory.size % word_size != 0)
    }

    /// Iterate over every word of the thread's stack memory, lowest address first.
    pub fn words(&self) -> impl Iterator<Item = StackWord> + '_ {
        let word_size = self.arch.word_size();
        (0..self.word_count()).map(move |i| {
            let address = self.memory.base_address.wrapping_add(i * word_size);
            let value = self
                .memory
                .get_word_at_address(address, self.arch)
                .unwrap_or(0);
            StackWord {
                address,
                value,
                annotations: self.annotate(address, value),
            }
        })
    }

    /// Find the annotations for the word `value` stored at `address`.
    ///
    /// Frames are checked in order. Stack and frame pointer matches don't
    /// stop the search, but the first frame whose return address is `value`
    /// does.
    fn annotate(&self, address: u64, value: u64) -> Vec<Annotation> {
        let mut annotations = vec![];
        for (frame_index, frame) in self.stack.frames.iter().enumerate() {
            if let Some((sp, fp)) = self.pointers[frame_index] {
                if sp == Some(address) {
                    annotations.push(Annotation::StackPointer { frame: frame_index });
                }
                if fp == Some(address) {
                    annotations.push(Annotation::FramePointer { frame: frame_index });
                }
            }

            let return_address = frame.return_address();
            if return_address != 0 && value == return_address {
                trace!(
                    "stack word at {:#x} is the return address of frame {}",
                    address,
                    frame_index
                );
                annotations.push(Annotation::ReturnAddress { frame: frame_index });
                break;
            }
        }
        annotations
    }

    fn write_annotation<T: Write>(&self, f: &mut T, annotation: &Annotation) -> io::Result<()> {
        match *annotation {
            Annotation::StackPointer { frame } => write!(
                f,
                "\t<- stack pointer of frame {} ({})",
                frame,
                self.arch.stack_pointer_register()
            ),
            Annotation::FramePointer { frame } => write!(
                f,
                "\t<- base pointer of frame {} ({})",
                frame,
                self.arch.frame_pointer_register()
            ),
            Annotation::ReturnAddress { frame } => {
                write!(f, "\t")?;
                self.stack.frames[frame].print_symbol(f)
            }
        }
    }

    /// Write one line per stack word to `f`.
    ///
    /// Each line is the word's address and value as zero-padded hex, followed
    /// by tab-separated annotations.
    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        for word in self.words() {
            write!(
                f,
                "{} {}",
                self.arch.format_word(word.address),
                self.arch.format_word(word.value)
            )?;
            for annotation in &word.annotations {
                self.write_annotation(f, annotation)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }

    /// Write the annotated stack to `f` as JSON.
    pub fn print_json<T: Write>(&self, f: &mut T, pretty: bool) -> io::Result<()> {
        let words: Vec<_> = self
            .words()
            .map(|word| {
                let annotations: Vec<_> = word
                    .annotations
                    .iter()
                    .map(|annotation| match *annotation {
                        Annotation::StackPointer { frame } => json!({
                            "kind": "stack_pointer",
                            "frame": frame,
                            "register": self.arch.stack_pointer_register(),
                        }),
                        Annotation::FramePointer { frame } => json!({
                            "kind": "frame_pointer",
                            "frame": frame,
                            "register": self.arch.frame_pointer_register(),
                        }),
                        Annotation::ReturnAddress { frame } => json!({
                            "kind": "return_address",
                            "frame": frame,
                            "symbol": self.stack.frames[frame].symbol().to_string(),
                        }),
                    })
                    .collect();
                json!({
                    "address": format!("{:#x}", word.address),
                    "value": format!("{:#x}", word.value),
                    "annotations": annotations,
                })
            })
            .collect();

        let output = json!({
            "thread": self.thread_index,
            "arch": self.arch.to_string(),
            "base_address": format!("{:#x}", self.memory.base_address),
            "size": self.memory.size,
            "words": words,
        });

        let result = if pretty {
            serde_json::to_writer_pretty(&mut *f, &output)
        } else {
            serde_json::to_writer(&mut *f, &output)
        };
        result.map_err(io::Error::from)?;
        writeln!(f)
    }
}

impl ProcessState {
    /// Pair thread `thread_index`'s call stack with its stack memory.
    pub fn stack_dump(
        &self,
        thread_index: usize,
        arch: Architecture,
    ) -> Result<StackDump<'_>, StackDumpError> {
        let stack = self
            .threads
            .get(thread_index)
            .ok_or(StackDumpError::ThreadOutOfRange {
                index: thread_index,
                count: self.threads.len(),
            })?;
        let memory = self.thread_memory_regions.get(thread_index).ok_or(
            StackDumpError::MissingStackMemory {
                index: thread_index,
                count: self.thread_memory_regions.len(),
            },
        )?;
        debug!(
            "dumping thread {} stack: {} bytes at {:#x} as {}",
            thread_index, memory.size, memory.base_address, arch
        );
        Ok(StackDump::new(thread_index, arch, stack, memory))
    }

    /// Write thread `thread_index`'s stack memory to `f`, one word per line,
    /// annotated with the frames found in it.
    ///
    /// # Examples
    ///
    /// ```
    /// use minidump_stackdump::*;
    ///
    /// let frame = StackFrame::from_context(
    ///     FrameContext::new(Architecture::X86, None, None),
    ///     0xdeadbeef,
    ///     FrameTrust::Scan,
    /// );
    /// let state = ProcessState::new(
    ///     SystemInfo::new(Architecture::X86),
    ///     vec![CallStack::new(vec![frame])],
    ///     vec![MemoryRegion::new(0x1000, vec![0, 0, 0, 0, 0xef, 0xbe, 0xad, 0xde])],
    /// );
    ///
    /// let mut out = Vec::new();
    /// state.print_thread_stack(&mut out, 0, Architecture::X86).unwrap();
    /// assert_eq!(
    ///     String::from_utf8(out).unwrap(),
    ///     "00001000 00000000\n00001004 deadbeef\t0xdeadbeef\n"
    /// );
    /// ```
    pub fn print_thread_stack<T: Write>(
        &self,
        f: &mut T,
        thread_index: usize,
        arch: Architecture,
    ) -> Result<(), StackDumpError> {
        self.stack_dump(thread_index, arch)?.print(f)?;
        Ok(())
    }
}
