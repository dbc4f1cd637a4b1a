// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use crate::*;
use test_assembler::*;

struct TestFixture {
    pub arch: Architecture,
    pub frames: Vec<StackFrame>,
    pub module: CodeModule,
}

impl TestFixture {
    pub fn new(arch: Architecture) -> TestFixture {
        TestFixture {
            arch,
            frames: vec![],
            module: CodeModule::new(0x40000000, 0x10000, "/system/lib/libnative.so"),
        }
    }

    pub fn add_frame(
        &mut self,
        instruction: u64,
        sp: Option<u64>,
        fp: Option<u64>,
    ) -> &mut StackFrame {
        let trust = if self.frames.is_empty() {
            FrameTrust::Context
        } else {
            FrameTrust::FramePointer
        };
        self.frames.push(StackFrame::from_context(
            FrameContext::new(self.arch, sp, fp),
            instruction,
            trust,
        ));
        self.frames.last_mut().unwrap()
    }

    pub fn state(&self, stack: Section) -> ProcessState {
        let base = stack.start().value().unwrap();
        let bytes = stack.get_contents().unwrap();
        ProcessState::new(
            SystemInfo::new(self.arch),
            vec![CallStack::new(self.frames.clone())],
            vec![MemoryRegion::new(base, bytes)],
        )
    }

    pub fn dump(&self, stack: Section) -> String {
        let state = self.state(stack);
        let mut out = Vec::new();
        state.print_thread_stack(&mut out, 0, self.arch).unwrap();
        String::from_utf8(out).unwrap()
    }
}

fn section_at(base: u64) -> Section {
    let stack = Section::with_endian(Endian::Little);
    stack.start().set_const(base);
    stack
}

#[test]
fn test_unresolved_return_address() {
    let mut f = TestFixture::new(Architecture::X86);
    f.add_frame(0xdeadbeef, None, None);
    let stack = section_at(0x1000).D32(0).D32(0xdeadbeef);
    assert_eq!(
        f.dump(stack),
        "00001000 00000000\n00001004 deadbeef\t0xdeadbeef\n"
    );
}

#[test]
fn test_line_per_word() {
    let f = TestFixture::new(Architecture::X86);
    let stack = section_at(0x80000000).append_repeated(0, 16);
    let out = f.dump(stack);
    assert_eq!(out.lines().count(), 4);
    assert!(out.lines().all(|line| line.ends_with(" 00000000")));
}

#[test]
fn test_trailing_partial_word() {
    let f = TestFixture::new(Architecture::X86);
    // 10 bytes: two full words and half of a third.
    let stack = section_at(0x1000).D32(0x11111111).D32(0x22222222).D16(0x3333);
    assert_eq!(
        f.dump(stack),
        "00001000 11111111\n00001004 22222222\n00001008 00000000\n"
    );
}

#[test]
fn test_truncated_capture() {
    let f = TestFixture::new(Architecture::X86);
    let mut state = f.state(section_at(0x1000).D32(0x11111111));
    // The region claims more memory than was captured.
    state.thread_memory_regions[0].size = 12;
    let mut out = Vec::new();
    state
        .print_thread_stack(&mut out, 0, Architecture::X86)
        .unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "00001000 11111111\n00001004 00000000\n00001008 00000000\n"
    );
}

// A traditional x86 frame: %ebp points at the saved %ebp of the caller,
// with the return address just above it.
#[test]
fn test_traditional_frames() {
    let mut f = TestFixture::new(Architecture::X86);
    let frame0_esp = Label::new();
    let frame0_ebp = Label::new();
    let frame1_ebp = Label::new();
    let stack = section_at(0x80000000)
        .mark(&frame0_esp)
        .D32(0xf065dc76) // frame 0: locals
        .mark(&frame0_ebp)
        .D32(&frame1_ebp) // frame 0: saved %ebp
        .D32(0x40008679) // frame 0: return address
        .D32(0) // frame 1: space
        .mark(&frame1_ebp)
        .D32(0) // frame 1: saved %ebp (stack end)
        .D32(0); // frame 1: return address (stack end)
    let esp = frame0_esp.value().unwrap();
    let ebp = frame0_ebp.value().unwrap();
    let caller_ebp = frame1_ebp.value().unwrap();
    let module = f.module.clone();
    f.add_frame(0x4000c7a5, Some(esp), Some(ebp));
    f.add_frame(0x40008679, Some(ebp + 8), Some(caller_ebp)).module = Some(module);

    let expected = "\
80000000 f065dc76\t<- stack pointer of frame 0 (esp)
80000004 80000010\t<- base pointer of frame 0 (ebp)
80000008 40008679\tlibnative.so + 0x8679
8000000c 00000000\t<- stack pointer of frame 1 (esp)
80000010 00000000\t<- base pointer of frame 1 (ebp)
80000014 00000000
";
    assert_eq!(f.dump(stack), expected);
}

#[test]
fn test_stack_and_base_pointer_on_one_line() {
    let mut f = TestFixture::new(Architecture::X86);
    f.add_frame(0x40001000, Some(0x2000), Some(0x2004));
    f.add_frame(0x40002000, Some(0x2004), Some(0x2004));
    let stack = section_at(0x2000).D32(0).D32(0);
    assert_eq!(
        f.dump(stack),
        "00002000 00000000\t<- stack pointer of frame 0 (esp)\n\
         00002004 00000000\t<- base pointer of frame 0 (ebp)\t<- stack pointer of frame 1 (esp)\t<- base pointer of frame 1 (ebp)\n"
    );
}

#[test]
fn test_first_return_address_wins() {
    let mut f = TestFixture::new(Architecture::X86);
    let module = f.module.clone();
    // Recursion: two frames returning to the same place.
    f.add_frame(0x40001010, None, None).module = Some(module.clone());
    {
        let frame = f.add_frame(0x40001010, None, None);
        frame.module = Some(module);
        frame.function_name = Some(String::from("recurse"));
        frame.function_base = Some(0x40001000);
    }
    let state = f.state(section_at(0x3000).D32(0x40001010));
    let dump = state.stack_dump(0, Architecture::X86).unwrap();
    let words: Vec<_> = dump.words().collect();
    assert_eq!(words.len(), 1);
    assert_eq!(
        words[0].annotations,
        vec![Annotation::ReturnAddress { frame: 0 }]
    );

    let mut out = Vec::new();
    dump.print(&mut out).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "00003000 40001010\tlibnative.so + 0x1010\n"
    );
}

#[test]
fn test_return_address_stops_frame_scan() {
    let mut f = TestFixture::new(Architecture::X86);
    f.add_frame(0x4000beef, None, None);
    // Frame 1's stack pointer is this word, but frame 0 already claimed it.
    f.add_frame(0x40001234, Some(0x1000), None);
    let stack = section_at(0x1000).D32(0x4000beef);
    assert_eq!(f.dump(stack), "00001000 4000beef\t0x4000beef\n");
}

#[test]
fn test_symbol_precedence() {
    let mut f = TestFixture::new(Architecture::X86);
    let module = f.module.clone();
    f.add_frame(0x11111111, None, None);
    f.add_frame(0x40000100, None, None).module = Some(module.clone());
    {
        let frame = f.add_frame(0x40000200, None, None);
        frame.module = Some(module.clone());
        frame.function_name = Some(String::from("trigger_abort"));
        frame.function_base = Some(0x400001f0);
    }
    {
        let frame = f.add_frame(0x40000300, None, None);
        frame.module = Some(module);
        frame.function_name = Some(String::from("Java_crash_nullDereference"));
        frame.function_base = Some(0x400002c0);
        frame.source_file_name = Some(String::from("/src/main/cpp/native-lib.cpp"));
        frame.source_line = Some(17);
        frame.source_line_base = Some(0x400002f8);
    }
    let stack = section_at(0x1000)
        .D32(0x11111111)
        .D32(0x40000100)
        .D32(0x40000200)
        .D32(0x40000300);
    let expected = "\
00001000 11111111\t0x11111111
00001004 40000100\tlibnative.so + 0x100
00001008 40000200\tlibnative.so!trigger_abort + 0x10
0000100c 40000300\tlibnative.so!Java_crash_nullDereference [native-lib.cpp : 17 + 0x8]
";
    assert_eq!(f.dump(stack), expected);
}

#[test]
fn test_symbol_fallback_with_partial_info() {
    let mut f = TestFixture::new(Architecture::X86);
    let module = f.module.clone();
    {
        // No function base: the offset is from zero.
        let frame = f.add_frame(0x40000200, None, None);
        frame.module = Some(module.clone());
        frame.function_name = Some(String::from("crash_null"));
    }
    {
        // Empty names are as good as none.
        let frame = f.add_frame(0x40000300, None, None);
        frame.module = Some(module.clone());
        frame.function_name = Some(String::new());
        frame.source_file_name = Some(String::new());
        frame.source_line = Some(3);
    }
    {
        // No line base: the source offset is from zero.
        let frame = f.add_frame(0x40000400, None, None);
        frame.module = Some(module);
        frame.function_name = Some(String::from("crash_abort"));
        frame.function_base = Some(0x400003f0);
        frame.source_file_name = Some(String::from("crashes.cpp"));
        frame.source_line = Some(9);
    }
    let stack = section_at(0x1000)
        .D32(0x40000200)
        .D32(0x40000300)
        .D32(0x40000400);
    let expected = "\
00001000 40000200\tlibnative.so!crash_null + 0x40000200
00001004 40000300\tlibnative.so + 0x300
00001008 40000400\tlibnative.so!crash_abort [crashes.cpp : 9 + 0x40000400]
";
    assert_eq!(f.dump(stack), expected);
}

#[test]
fn test_zero_return_address_never_matches() {
    let mut f = TestFixture::new(Architecture::X86);
    f.add_frame(0, None, None);
    let stack = section_at(0x1000).D32(0).D32(0);
    assert_eq!(f.dump(stack), "00001000 00000000\n00001004 00000000\n");
}

#[test]
fn test_amd64_words() {
    let mut f = TestFixture::new(Architecture::Amd64);
    let frame0_rsp = Label::new();
    let stack = section_at(0x7fff00001000)
        .mark(&frame0_rsp)
        .D64(0)
        .D64(0x00007f0012345678);
    f.add_frame(0x00007f0011111111, Some(frame0_rsp.value().unwrap()), None);
    f.add_frame(0x00007f0012345678, None, None);
    assert_eq!(
        f.dump(stack),
        "00007fff00001000 0000000000000000\t<- stack pointer of frame 0 (rsp)\n\
         00007fff00001008 00007f0012345678\t0x7f0012345678\n"
    );
}

#[test]
fn test_arm64_register_names() {
    let mut f = TestFixture::new(Architecture::Arm64);
    f.add_frame(0x1, Some(0x5000), Some(0x5008));
    let stack = section_at(0x5000).D64(0).D64(0);
    assert_eq!(
        f.dump(stack),
        "0000000000005000 0000000000000000\t<- stack pointer of frame 0 (sp)\n\
         0000000000005008 0000000000000000\t<- base pointer of frame 0 (fp)\n"
    );
}

#[test]
fn test_mismatched_context_architecture() {
    let mut f = TestFixture::new(Architecture::X86);
    f.add_frame(0x40001234, None, None);
    // An arm frame in an x86 dump: its pointers can't be trusted.
    f.frames[0].context = FrameContext::new(Architecture::Arm, Some(0x1000), Some(0x1004));
    let stack = section_at(0x1000).D32(0).D32(0x40001234);
    assert_eq!(
        f.dump(stack),
        "00001000 00000000\n00001004 40001234\t0x40001234\n"
    );
}

#[test]
fn test_arch_selects_word_size() {
    let mut f = TestFixture::new(Architecture::X86);
    f.add_frame(0x40001234, None, None);
    let state = f.state(section_at(0x1000).D32(0x40001234).D32(0));
    let mut out = Vec::new();
    // Read as amd64, the two 32-bit slots become a single word.
    state
        .print_thread_stack(&mut out, 0, Architecture::Amd64)
        .unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "0000000000001000 0000000040001234\t0x40001234\n"
    );
}

#[test]
fn test_empty_frames() {
    let f = TestFixture::new(Architecture::Arm);
    let stack = section_at(0x1000).D32(0x1234);
    assert_eq!(f.dump(stack), "00001000 00001234\n");
}

#[test]
fn test_output_is_repeatable() {
    let mut f = TestFixture::new(Architecture::X86);
    let module = f.module.clone();
    f.add_frame(0x40001234, Some(0x1000), Some(0x1004)).module = Some(module);
    let state = f.state(section_at(0x1000).D32(0).D32(0x40001234).D32(7));
    let mut first = Vec::new();
    let mut second = Vec::new();
    state
        .print_thread_stack(&mut first, 0, Architecture::X86)
        .unwrap();
    state
        .print_thread_stack(&mut second, 0, Architecture::X86)
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_thread_out_of_range() {
    let f = TestFixture::new(Architecture::X86);
    let state = f.state(section_at(0x1000).D32(0));
    let mut out = Vec::new();
    match state.print_thread_stack(&mut out, 3, Architecture::X86) {
        Err(StackDumpError::ThreadOutOfRange { index: 3, count: 1 }) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(out.is_empty());
}

#[test]
fn test_missing_stack_memory() {
    let f = TestFixture::new(Architecture::X86);
    let mut state = f.state(section_at(0x1000).D32(0));
    state.thread_memory_regions.clear();
    let err = state.stack_dump(0, Architecture::X86).err().unwrap();
    assert_eq!(err.name(), "MissingStackMemory");
    assert_eq!(
        err.to_string(),
        "No stack memory for thread 0: the snapshot has 0 memory regions"
    );
}

#[test]
fn test_print_json() {
    let mut f = TestFixture::new(Architecture::X86);
    f.add_frame(0xdeadbeef, Some(0x1000), None);
    let state = f.state(section_at(0x1000).D32(0).D32(0xdeadbeef));
    let dump = state.stack_dump(0, Architecture::X86).unwrap();
    let mut out = Vec::new();
    dump.print_json(&mut out, false).unwrap();

    let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(json["thread"], 0);
    assert_eq!(json["arch"], "x86");
    assert_eq!(json["base_address"], "0x1000");
    assert_eq!(json["size"], 8);
    let words = json["words"].as_array().unwrap();
    assert_eq!(words.len(), 2);
    assert_eq!(words[0]["address"], "0x1000");
    assert_eq!(words[0]["annotations"][0]["kind"], "stack_pointer");
    assert_eq!(words[0]["annotations"][0]["register"], "esp");
    assert_eq!(words[1]["value"], "0xdeadbeef");
    assert_eq!(words[1]["annotations"][0]["kind"], "return_address");
    assert_eq!(words[1]["annotations"][0]["symbol"], "0xdeadbeef");
}
