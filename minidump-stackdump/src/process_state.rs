// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! The state of a process.

use std::fmt;
use std::io;
use std::io::prelude::*;

use serde::{Deserialize, Serialize};

use crate::memory::MemoryRegion;
use crate::system_info::{Architecture, PointerWidth, SystemInfo};

/// Indicates how well the instruction pointer derived during
/// stack walking is trusted. Since the stack walker can resort to
/// stack scanning, it can wind up with dubious frames.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameTrust {
    /// Unknown
    #[default]
    #[serde(rename = "none")]
    None,
    /// Scanned the stack, found this.
    #[serde(rename = "scan")]
    Scan,
    /// Found while scanning stack using call frame info.
    #[serde(rename = "cfi_scan")]
    CfiScan,
    /// Derived from frame pointer.
    #[serde(rename = "frame_pointer")]
    FramePointer,
    /// Derived from call frame info.
    #[serde(rename = "cfi")]
    CallFrameInfo,
    /// Explicitly provided by some external stack walker.
    #[serde(rename = "prewalked")]
    PreWalked,
    /// Given as instruction pointer in a context.
    #[serde(rename = "context")]
    Context,
}

impl FrameTrust {
    /// Return a string describing how a stack frame was found
    /// by the stackwalker.
    pub fn description(&self) -> &'static str {
        match *self {
            FrameTrust::Context => "given as instruction pointer in context",
            FrameTrust::PreWalked => "recovered by external stack walker",
            FrameTrust::CallFrameInfo => "call frame info",
            FrameTrust::CfiScan => "call frame info with scanning",
            FrameTrust::FramePointer => "previous frame's frame pointer",
            FrameTrust::Scan => "stack scanning",
            FrameTrust::None => "unknown",
        }
    }
}

/// The stack and frame pointers recovered for a frame.
///
/// Each variant only carries the registers of its own architecture, so
/// reading them requires matching on the architecture first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "arch", rename_all = "lowercase")]
pub enum FrameContext {
    X86 {
        esp: Option<u64>,
        ebp: Option<u64>,
    },
    Amd64 {
        rsp: Option<u64>,
        rbp: Option<u64>,
    },
    Arm {
        sp: Option<u64>,
        fp: Option<u64>,
    },
    Arm64 {
        sp: Option<u64>,
        fp: Option<u64>,
    },
}

impl FrameContext {
    /// A context for `arch` with the given stack and frame pointers.
    pub fn new(arch: Architecture, sp: Option<u64>, fp: Option<u64>) -> FrameContext {
        match arch {
            Architecture::X86 => FrameContext::X86 { esp: sp, ebp: fp },
            Architecture::Amd64 => FrameContext::Amd64 { rsp: sp, rbp: fp },
            Architecture::Arm => FrameContext::Arm { sp, fp },
            Architecture::Arm64 => FrameContext::Arm64 { sp, fp },
        }
    }

    pub fn architecture(&self) -> Architecture {
        match *self {
            FrameContext::X86 { .. } => Architecture::X86,
            FrameContext::Amd64 { .. } => Architecture::Amd64,
            FrameContext::Arm { .. } => Architecture::Arm,
            FrameContext::Arm64 { .. } => Architecture::Arm64,
        }
    }

    /// The stack pointer, if known and non-zero.
    pub fn stack_pointer(&self) -> Option<u64> {
        let sp = match *self {
            FrameContext::X86 { esp, .. } => esp,
            FrameContext::Amd64 { rsp, .. } => rsp,
            FrameContext::Arm { sp, .. } | FrameContext::Arm64 { sp, .. } => sp,
        };
        sp.filter(|&sp| sp != 0)
    }

    /// The frame (base) pointer, if known and non-zero.
    pub fn frame_pointer(&self) -> Option<u64> {
        let fp = match *self {
            FrameContext::X86 { ebp, .. } => ebp,
            FrameContext::Amd64 { rbp, .. } => rbp,
            FrameContext::Arm { fp, .. } | FrameContext::Arm64 { fp, .. } => fp,
        };
        fp.filter(|&fp| fp != 0)
    }

    /// The stack and frame pointers, but only if this context belongs to `arch`.
    pub fn pointers_for(&self, arch: Architecture) -> Option<(Option<u64>, Option<u64>)> {
        if self.architecture() == arch {
            Some((self.stack_pointer(), self.frame_pointer()))
        } else {
            None
        }
    }
}

/// An executable or shared library loaded in a process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeModule {
    /// The base address of this code module as it was loaded by the process.
    pub base_address: u64,
    /// The size of the code module.
    pub size: u64,
    /// The path or file name that the code module was loaded from.
    pub code_file: String,
    /// A human-readable representation of the code module's version.
    #[serde(default)]
    pub version: Option<String>,
}

impl CodeModule {
    pub fn new(base_address: u64, size: u64, code_file: &str) -> CodeModule {
        CodeModule {
            base_address,
            size,
            code_file: String::from(code_file),
            version: None,
        }
    }
}

/// A single stack frame produced from unwinding a thread's stack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    /// The program counter location as an absolute virtual address.
    ///
    /// For the innermost frame this is the exact instruction pointer. For
    /// every other frame it is the return address saved by the machine.
    pub instruction: u64,

    /// The module in which the instruction resides.
    #[serde(default)]
    pub module: Option<CodeModule>,

    /// The function name, may be omitted if debug symbols are not available.
    #[serde(default)]
    pub function_name: Option<String>,

    /// The start address of the function, may be omitted if debug symbols
    /// are not available.
    #[serde(default)]
    pub function_base: Option<u64>,

    /// The source file name, may be omitted if debug symbols are not available.
    #[serde(default)]
    pub source_file_name: Option<String>,

    /// The (1-based) source line number, may be omitted if debug symbols are
    /// not available.
    #[serde(default)]
    pub source_line: Option<u32>,

    /// The start address of the source line, may be omitted if debug symbols
    /// are not available.
    #[serde(default)]
    pub source_line_base: Option<u64>,

    /// Amount of trust the stack walker has in the instruction pointer
    /// of this frame.
    #[serde(default)]
    pub trust: FrameTrust,

    /// The registers recovered for this frame.
    pub context: FrameContext,
}

impl StackFrame {
    /// Create an unsymbolized `StackFrame` from a `FrameContext`.
    pub fn from_context(context: FrameContext, instruction: u64, trust: FrameTrust) -> StackFrame {
        StackFrame {
            instruction,
            module: None,
            function_name: None,
            function_base: None,
            source_file_name: None,
            source_line: None,
            source_line_base: None,
            trust,
            context,
        }
    }

    /// Return the actual return address, as saved on the stack or in a
    /// register. See the comments for `StackFrame::instruction` for details.
    pub fn return_address(&self) -> u64 {
        self.instruction
    }

    /// The symbolized location of this frame's return address, for use with
    /// `format!` and friends.
    pub fn symbol(&self) -> Symbol<'_> {
        Symbol { frame: self }
    }

    /// Write the symbolized location of this frame's return address.
    pub fn print_symbol<T: Write>(&self, f: &mut T) -> io::Result<()> {
        write!(f, "{}", self.symbol())
    }
}

/// Displays a frame's return address as `module!function [file : line + off]`,
/// falling back to `module!function + off`, `module + off` and finally the raw
/// address, depending on how much symbol information is available.
///
/// Empty names count as missing. A missing function or line base is taken
/// to be zero.
pub struct Symbol<'a> {
    frame: &'a StackFrame,
}

impl fmt::Display for Symbol<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frame = self.frame;
        let addr = frame.return_address();
        let module = match frame.module {
            Some(ref module) => module,
            None => return write!(f, "{:#x}", addr),
        };
        write!(f, "{}", basename(&module.code_file))?;

        let function = match non_empty(&frame.function_name) {
            Some(function) => function,
            None => return write!(f, " + {:#x}", addr.wrapping_sub(module.base_address)),
        };
        write!(f, "!{}", function)?;

        match (non_empty(&frame.source_file_name), frame.source_line) {
            (Some(source_file), Some(source_line)) => write!(
                f,
                " [{} : {} + {:#x}]",
                basename(source_file),
                source_line,
                addr.wrapping_sub(frame.source_line_base.unwrap_or(0))
            ),
            _ => write!(
                f,
                " + {:#x}",
                addr.wrapping_sub(frame.function_base.unwrap_or(0))
            ),
        }
    }
}

fn non_empty(name: &Option<String>) -> Option<&str> {
    name.as_deref().filter(|name| !name.is_empty())
}

/// Strip everything up to the last `/` or `\` from a path.
pub fn basename(f: &str) -> &str {
    match f.rfind(|c| c == '/' || c == '\\') {
        None => f,
        Some(index) => &f[(index + 1)..],
    }
}

fn format_pointer(width: PointerWidth, value: u64) -> String {
    match width {
        PointerWidth::Bits32 => format!("{:#010x}", value),
        PointerWidth::Bits64 => format!("{:#018x}", value),
    }
}

/// A stack of `StackFrame`s produced as a result of unwinding a thread.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CallStack {
    /// The stack frames.
    /// By convention, the stack frame at index 0 is the innermost callee frame,
    /// and the frame at the highest index in a call stack is the outermost
    /// caller.
    pub frames: Vec<StackFrame>,
    /// The name of the thread, if known.
    #[serde(default)]
    pub thread_name: Option<String>,
}

impl CallStack {
    pub fn new(frames: Vec<StackFrame>) -> CallStack {
        CallStack {
            frames,
            thread_name: None,
        }
    }

    /// Write a human-readable description of the call stack to `f`.
    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        if self.frames.is_empty() {
            writeln!(f, "<no frames>")?;
        }
        for (i, frame) in self.frames.iter().enumerate() {
            write!(f, "{:2}  ", i)?;
            frame.print_symbol(f)?;
            writeln!(f)?;

            let arch = frame.context.architecture();
            let width = arch.pointer_width();
            let mut registers = String::new();
            if let Some(sp) = frame.context.stack_pointer() {
                registers.push_str(&format!(
                    "   {} = {}",
                    arch.stack_pointer_register(),
                    format_pointer(width, sp)
                ));
            }
            if let Some(fp) = frame.context.frame_pointer() {
                registers.push_str(&format!(
                    "   {} = {}",
                    arch.frame_pointer_register(),
                    format_pointer(width, fp)
                ));
            }
            if !registers.is_empty() {
                writeln!(f, " {}", registers)?;
            }
            writeln!(f, "    Found by: {}", frame.trust.description())?;
        }
        Ok(())
    }
}

/// The state of a process as recorded by a crash snapshot.
///
/// Snapshots are produced by an external minidump processor and are only
/// ever read here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessState {
    /// Information about the system on which the snapshot was written.
    pub system_info: SystemInfo,
    /// If the process crashed, a string describing the crash reason.
    #[serde(default)]
    pub crash_reason: Option<String>,
    /// The memory address implicated in the crash.
    #[serde(default)]
    pub crash_address: Option<u64>,
    /// The index of the thread that requested a dump be written.
    #[serde(default)]
    pub requesting_thread: Option<usize>,
    /// Stacks for each thread at the time of the crash.
    pub threads: Vec<CallStack>,
    /// The raw stack memory of each thread, in the same order as `threads`.
    pub thread_memory_regions: Vec<MemoryRegion>,
    /// The modules that were loaded into the process.
    #[serde(default)]
    pub modules: Vec<CodeModule>,
}

impl ProcessState {
    pub fn new(
        system_info: SystemInfo,
        threads: Vec<CallStack>,
        thread_memory_regions: Vec<MemoryRegion>,
    ) -> ProcessState {
        ProcessState {
            system_info,
            crash_reason: None,
            crash_address: None,
            requesting_thread: None,
            threads,
            thread_memory_regions,
            modules: vec![],
        }
    }

    /// `true` if the snapshot was written in response to a process crash.
    pub fn crashed(&self) -> bool {
        self.crash_reason.is_some() && self.crash_address.is_some()
    }

    /// The thread to look at when none was asked for: the requesting
    /// thread if there is one, otherwise the first.
    pub fn default_thread(&self) -> usize {
        self.requesting_thread.unwrap_or(0)
    }

    /// Write a short human-readable summary of the process state to `f`.
    pub fn print_summary<T: Write>(&self, f: &mut T) -> io::Result<()> {
        writeln!(f, "CPU: {}", self.system_info.cpu)?;
        if let Some(ref ver) = self.system_info.os_version {
            writeln!(f, "     {}", ver)?;
        }
        writeln!(f)?;

        if let (Some(reason), Some(address)) = (&self.crash_reason, self.crash_address) {
            writeln!(f, "Crash reason:  {}", reason)?;
            writeln!(
                f,
                "Crash address: {}",
                format_pointer(self.system_info.cpu.pointer_width(), address)
            )?;
        } else {
            writeln!(f, "No crash")?;
        }
        if let Some(requesting_thread) = self.requesting_thread {
            writeln!(
                f,
                "Thread {} ({})",
                requesting_thread,
                if self.crashed() {
                    "crashed"
                } else {
                    "requested dump, did not crash"
                }
            )?;
        }
        writeln!(f)?;
        Ok(())
    }
}
