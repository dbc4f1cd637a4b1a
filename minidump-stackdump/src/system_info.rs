// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Information about the system that produced a snapshot.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An error parsing an architecture label.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ArchitectureError {
    #[error("Unknown architecture: {0}")]
    UnknownArchitecture(String),
}

impl ArchitectureError {
    /// Returns just the name of the error, as a more human-friendly version of
    /// an error-code for error logging.
    pub fn name(&self) -> &'static str {
        match self {
            ArchitectureError::UnknownArchitecture(_) => "UnknownArchitecture",
        }
    }
}

/// The width of a pointer on an `Architecture`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PointerWidth {
    Bits32,
    Bits64,
}

/// CPU architectures whose stacks can be dumped.
///
/// Everything that depends on the machine (word size, which registers hold
/// the stack and frame pointers) is looked up here rather than assumed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Architecture {
    X86,
    Amd64,
    Arm,
    Arm64,
}

impl Architecture {
    /// The size in bytes of a stack slot.
    pub fn word_size(&self) -> u64 {
        match self.pointer_width() {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }

    pub fn pointer_width(&self) -> PointerWidth {
        match *self {
            Architecture::X86 | Architecture::Arm => PointerWidth::Bits32,
            Architecture::Amd64 | Architecture::Arm64 => PointerWidth::Bits64,
        }
    }

    /// Name of the register holding the stack pointer.
    pub fn stack_pointer_register(&self) -> &'static str {
        match *self {
            Architecture::X86 => "esp",
            Architecture::Amd64 => "rsp",
            Architecture::Arm | Architecture::Arm64 => "sp",
        }
    }

    /// Name of the register conventionally holding the frame pointer.
    pub fn frame_pointer_register(&self) -> &'static str {
        match *self {
            Architecture::X86 => "ebp",
            Architecture::Amd64 => "rbp",
            Architecture::Arm => "r11",
            Architecture::Arm64 => "fp",
        }
    }

    /// Format `value` as a zero-padded word, without a `0x` prefix.
    pub fn format_word(&self, value: u64) -> String {
        match self.pointer_width() {
            PointerWidth::Bits32 => format!("{:08x}", value),
            PointerWidth::Bits64 => format!("{:016x}", value),
        }
    }
}

impl FromStr for Architecture {
    type Err = ArchitectureError;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label.to_ascii_lowercase().as_str() {
            "x86" | "i386" | "i686" => Ok(Architecture::X86),
            "amd64" | "x86_64" | "x86-64" => Ok(Architecture::Amd64),
            "arm" | "armv7" | "armeabi" | "armeabi-v7a" => Ok(Architecture::Arm),
            "arm64" | "aarch64" | "arm64-v8a" => Ok(Architecture::Arm64),
            _ => Err(ArchitectureError::UnknownArchitecture(label.to_owned())),
        }
    }
}

impl TryFrom<String> for Architecture {
    type Error = ArchitectureError;

    fn try_from(label: String) -> Result<Self, Self::Error> {
        label.parse()
    }
}

impl From<Architecture> for String {
    fn from(arch: Architecture) -> Self {
        arch.to_string()
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match *self {
                Architecture::X86 => "x86",
                Architecture::Amd64 => "amd64",
                Architecture::Arm => "arm",
                Architecture::Arm64 => "arm64",
            }
        )
    }
}

/// Information about the system that produced a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// The CPU on which the snapshot was produced.
    pub cpu: Architecture,
    /// A string identifying the version of the operating system, such as
    /// "Android 13", if present.
    #[serde(default)]
    pub os_version: Option<String>,
}

impl SystemInfo {
    pub fn new(cpu: Architecture) -> SystemInfo {
        SystemInfo {
            cpu,
            os_version: None,
        }
    }
}
