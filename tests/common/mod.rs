//! A small builder for synthetic minidumps.
//!
//! The layout is always: the header, room for `MAX_STREAMS` directory entries,
//! then every blob in the order it was added. Blobs added last end up at the
//! very end of the file.
#![allow(dead_code)]

use byteorder::{LittleEndian as LE, WriteBytesExt};

pub const SIGNATURE: u32 = 0x504d_444d;
pub const MAX_STREAMS: usize = 16;
pub const HEADER_SIZE: usize = 0x20;
pub const DIRECTORY_ENTRY_SIZE: usize = 0xc;
pub const BODY_START: usize = HEADER_SIZE + MAX_STREAMS * DIRECTORY_ENTRY_SIZE;

pub const UNUSED: u32 = 0;
pub const THREAD_LIST: u32 = 3;
pub const MODULE_LIST: u32 = 4;
pub const EXCEPTION: u32 = 6;
pub const SYSTEM_INFO: u32 = 7;
pub const MEMORY64_LIST: u32 = 9;
pub const MEMORY_INFO_LIST: u32 = 16;

pub const ARCH_X86: u16 = 0;
pub const ARCH_ARM: u16 = 5;
pub const ARCH_X64: u16 = 9;

pub const X86_CONTEXT_SIZE: usize = 0x2cc;
pub const X64_CONTEXT_SIZE: usize = 0x4d0;

pub const MEM_COMMIT: u32 = 0x1000;
pub const MEM_RESERVE: u32 = 0x2000;
pub const MEM_FREE: u32 = 0x1_0000;
pub const MEM_PRIVATE: u32 = 0x2_0000;
pub const MEM_IMAGE: u32 = 0x100_0000;

pub const PAGE_NOACCESS: u32 = 1;
pub const PAGE_READWRITE: u32 = 4;
pub const PAGE_EXECUTE_READ: u32 = 0x20;

/// One `MINIDUMP_MEMORY_INFO` entry.
#[derive(Debug, Clone, Copy)]
pub struct RegionSpec {
    pub base: u64,
    pub size: u64,
    pub state: u32,
    pub protect: u32,
    pub type_: u32,
}

impl RegionSpec {
    pub fn committed(base: u64, size: u64) -> Self {
        Self {
            base,
            size,
            state: MEM_COMMIT,
            protect: PAGE_READWRITE,
            type_: MEM_PRIVATE,
        }
    }
}

/// One `MINIDUMP_MODULE` entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleSpec {
    pub base: u64,
    pub size: u32,
    pub name_rva: u32,
    pub cv: (u32, u32),
    pub misc: (u32, u32),
}

/// One `MINIDUMP_THREAD` entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSpec {
    pub tid: u32,
    pub teb: u64,
    pub context: (u32, u32),
}

pub struct DumpBuilder {
    pub signature: u32,
    pub flags: u32,
    /// Overrides the number of streams written in the header.
    pub number_of_streams: Option<u32>,
    directory: Vec<(u32, u32, u32)>,
    body: Vec<u8>,
}

impl Default for DumpBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DumpBuilder {
    pub fn new() -> Self {
        Self {
            signature: SIGNATURE,
            flags: 0,
            number_of_streams: None,
            directory: Vec::new(),
            body: vec![0; BODY_START],
        }
    }

    /// The RVA the next blob will be stored at.
    pub fn next_rva(&self) -> u32 {
        self.body.len() as u32
    }

    /// Append a blob and get its RVA back.
    pub fn blob(&mut self, bytes: &[u8]) -> u32 {
        let rva = self.next_rva();
        self.body.extend_from_slice(bytes);
        rva
    }

    /// Add a directory entry without any data.
    pub fn directory_entry(&mut self, type_: u32, data_size: u32, rva: u32) -> &mut Self {
        assert!(self.directory.len() < MAX_STREAMS);
        self.directory.push((type_, data_size, rva));
        self
    }

    /// Append `bytes` and add a directory entry pointing at them.
    pub fn stream(&mut self, type_: u32, bytes: &[u8]) -> &mut Self {
        let rva = self.blob(bytes);
        self.directory_entry(type_, bytes.len() as u32, rva)
    }

    /// Add a memory64 list stream immediately followed by the data of its
    /// ranges.
    pub fn memory64(&mut self, ranges: &[(u64, &[u8])]) -> &mut Self {
        let descriptors = ranges
            .iter()
            .map(|(start, data)| (*start, data.len() as u64))
            .collect::<Vec<_>>();
        let stream_size = 0x10 + descriptors.len() * 0x10;
        let base_rva = u64::from(self.next_rva()) + stream_size as u64;
        self.stream(MEMORY64_LIST, &memory64_list(base_rva, &descriptors));
        for (_, data) in ranges {
            self.blob(data);
        }

        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = self.body.clone();
        let number_of_streams = self
            .number_of_streams
            .unwrap_or(self.directory.len() as u32);

        let mut header = Vec::new();
        header.write_u32::<LE>(self.signature).unwrap();
        header.write_u16::<LE>(0xa793).unwrap();
        header.write_u16::<LE>(0).unwrap();
        header.write_u32::<LE>(number_of_streams).unwrap();
        header.write_u32::<LE>(HEADER_SIZE as u32).unwrap();
        header.write_u32::<LE>(0).unwrap();
        header.write_u32::<LE>(0).unwrap();
        header.write_u32::<LE>(0x6500_0000).unwrap();
        header.write_u32::<LE>(self.flags).unwrap();
        out[..HEADER_SIZE].copy_from_slice(&header);

        for (idx, (type_, data_size, rva)) in self.directory.iter().enumerate() {
            let mut entry = Vec::new();
            entry.write_u32::<LE>(*type_).unwrap();
            entry.write_u32::<LE>(*data_size).unwrap();
            entry.write_u32::<LE>(*rva).unwrap();
            let offset = HEADER_SIZE + idx * DIRECTORY_ENTRY_SIZE;
            out[offset..offset + DIRECTORY_ENTRY_SIZE].copy_from_slice(&entry);
        }

        out
    }
}

pub fn system_info(arch: u16) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u16::<LE>(arch).unwrap();
    out.write_u16::<LE>(6).unwrap();
    out.write_u16::<LE>(0x9e0a).unwrap();
    out.write_u8(8).unwrap();
    out.write_u8(1).unwrap();
    out.write_u32::<LE>(10).unwrap();
    out.write_u32::<LE>(0).unwrap();
    out.write_u32::<LE>(19045).unwrap();
    out.write_u32::<LE>(2).unwrap();
    out.write_u32::<LE>(0).unwrap();
    out.write_u16::<LE>(0x100).unwrap();
    out.write_u16::<LE>(0).unwrap();
    assert_eq!(out.len(), 0x20);
    out
}

pub fn exception(tid: u32, code: u32, address: u64) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u32::<LE>(tid).unwrap();
    out.write_u32::<LE>(0).unwrap();
    out.write_u32::<LE>(code).unwrap();
    out.write_u32::<LE>(0).unwrap();
    out.write_u64::<LE>(0).unwrap();
    out.write_u64::<LE>(address).unwrap();
    out.resize(0xa8, 0);
    out
}

/// A memory info list stream with the canonical header / entry sizes.
pub fn memory_info_list(regions: &[RegionSpec]) -> Vec<u8> {
    memory_info_list_with(0x10, 0x30, regions.len() as u64, regions)
}

/// A memory info list stream with arbitrary sizes. Entries are padded to
/// `size_of_entry`.
pub fn memory_info_list_with(
    size_of_header: u32,
    size_of_entry: u32,
    number_of_entries: u64,
    regions: &[RegionSpec],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u32::<LE>(size_of_header).unwrap();
    out.write_u32::<LE>(size_of_entry).unwrap();
    out.write_u64::<LE>(number_of_entries).unwrap();
    out.resize(size_of_header as usize, 0);
    for region in regions {
        let start = out.len();
        out.write_u64::<LE>(region.base).unwrap();
        out.write_u64::<LE>(region.base).unwrap();
        out.write_u32::<LE>(region.protect).unwrap();
        out.write_u32::<LE>(0).unwrap();
        out.write_u64::<LE>(region.size).unwrap();
        out.write_u32::<LE>(region.state).unwrap();
        out.write_u32::<LE>(region.protect).unwrap();
        out.write_u32::<LE>(region.type_).unwrap();
        out.write_u32::<LE>(0).unwrap();
        out.resize(start + size_of_entry as usize, 0);
    }

    out
}

pub fn memory64_list(base_rva: u64, ranges: &[(u64, u64)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u64::<LE>(ranges.len() as u64).unwrap();
    out.write_u64::<LE>(base_rva).unwrap();
    for (start, size) in ranges {
        out.write_u64::<LE>(*start).unwrap();
        out.write_u64::<LE>(*size).unwrap();
    }

    out
}

/// A `MINIDUMP_STRING`: a byte length followed by UTF-16 code units.
pub fn minidump_string(s: &str) -> Vec<u8> {
    let units = s
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect::<Vec<_>>();
    minidump_string_raw(&units)
}

pub fn minidump_string_raw(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u32::<LE>(bytes.len() as u32).unwrap();
    out.extend_from_slice(bytes);
    out
}

pub fn module_list(modules: &[ModuleSpec]) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u32::<LE>(modules.len() as u32).unwrap();
    for module in modules {
        let start = out.len();
        out.write_u64::<LE>(module.base).unwrap();
        out.write_u32::<LE>(module.size).unwrap();
        out.write_u32::<LE>(0xcafe).unwrap();
        out.write_u32::<LE>(0x5f5f_5f5f).unwrap();
        out.write_u32::<LE>(module.name_rva).unwrap();
        // VS_FIXEDFILEINFO.
        out.write_u32::<LE>(0xfeef_04bd).unwrap();
        out.resize(start + 0x18 + 0x34, 0);
        out.write_u32::<LE>(module.cv.0).unwrap();
        out.write_u32::<LE>(module.cv.1).unwrap();
        out.write_u32::<LE>(module.misc.0).unwrap();
        out.write_u32::<LE>(module.misc.1).unwrap();
        out.resize(start + 0x6c, 0);
    }

    out
}

pub fn thread_list(threads: &[ThreadSpec]) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u32::<LE>(threads.len() as u32).unwrap();
    for thread in threads {
        out.write_u32::<LE>(thread.tid).unwrap();
        out.write_u32::<LE>(0).unwrap();
        out.write_u32::<LE>(0x20).unwrap();
        out.write_u32::<LE>(0).unwrap();
        out.write_u64::<LE>(thread.teb).unwrap();
        // The stack descriptor isn't used by the parser.
        out.extend_from_slice(&[0; 0x10]);
        out.write_u32::<LE>(thread.context.0).unwrap();
        out.write_u32::<LE>(thread.context.1).unwrap();
    }

    out
}

/// An x64 context with `rip` set.
pub fn x64_context(rip: u64) -> Vec<u8> {
    let mut out = vec![0; X64_CONTEXT_SIZE];
    out[0xf8..0x100].copy_from_slice(&rip.to_le_bytes());
    out
}

/// An x86 context with `eip` set.
pub fn x86_context(eip: u32) -> Vec<u8> {
    let mut out = vec![0; X86_CONTEXT_SIZE];
    out[0xb8..0xbc].copy_from_slice(&eip.to_le_bytes());
    out
}

/// Add a thread list where each thread gets its own context blob.
pub fn add_threads(builder: &mut DumpBuilder, threads: &[(u32, Vec<u8>)]) {
    let specs = threads
        .iter()
        .map(|(tid, context)| ThreadSpec {
            tid: *tid,
            teb: 0x7ffd_e000 + u64::from(*tid) * 0x1000,
            context: (context.len() as u32, builder.blob(context)),
        })
        .collect::<Vec<_>>();
    builder.stream(THREAD_LIST, &thread_list(&specs));
}

/// The dump from the concrete scenario: a 64-bit system info stream, one
/// committed 0x1000 byte region at 0x10000 and its data.
pub fn scenario() -> (DumpBuilder, Vec<u8>) {
    let data = (0..0x1000).map(|i| (i % 251) as u8).collect::<Vec<_>>();
    let mut builder = DumpBuilder::new();
    builder
        .stream(SYSTEM_INFO, &system_info(ARCH_X64))
        .stream(
            MEMORY_INFO_LIST,
            &memory_info_list(&[RegionSpec::committed(0x10000, 0x1000)]),
        )
        .memory64(&[(0x10000, &data[..])]);

    (builder, data)
}
