// Axel '0vercl0k' Souchet - July 29 2023
//! This is where all the raw Windows user-dump structures are stored in. None
//! of them are reinterpreted from raw bytes: every one is decoded field by
//! field, in little-endian, from a [`Cursor`] the [`crate::view::BoundedView`]
//! handed out.
use std::fmt;
use std::io::{self, Read};

use byteorder::{LittleEndian as LE, ReadBytesExt};

use crate::view::{Cursor, Record};

pub const STREAM_TYPE_UNUSED: u32 = 0;
pub const STREAM_TYPE_THREAD_LIST: u32 = 3;
pub const STREAM_TYPE_MODULE_LIST: u32 = 4;
pub const STREAM_TYPE_EXCEPTION: u32 = 6;
pub const STREAM_TYPE_SYSTEM_INFO: u32 = 7;
pub const STREAM_TYPE_MEMORY64_LIST: u32 = 9;
pub const STREAM_TYPE_MEMORY_INFO_LIST: u32 = 16;

pub const EXCEPTION_MAXIMUM_PARAMETERS: usize = 15;

pub const EXPECTED_DUMP_SIGNATURE: u32 = 0x504d_444d;

pub const VALID_DUMP_FLAGS: u32 = 0x001f_ffff;

pub const WOW64_MAXIMUM_SUPPORTED_EXTENSION: usize = 512;

pub const WOW64_SIZE_OF_80387_REGISTERS: usize = 80;

pub const ARCH_X86: u16 = 0;
pub const ARCH_ARM: u16 = 5;
pub const ARCH_IA64: u16 = 6;
pub const ARCH_X64: u16 = 9;

/// Read a fixed-size byte array off the cursor.
fn read_array<const N: usize>(cursor: &mut Cursor) -> io::Result<[u8; N]> {
    let mut array = [0; N];
    cursor.read_exact(&mut array)?;

    Ok(array)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Header {
    pub signature: u32,
    pub version: u16,
    pub implementation_version: u16,
    pub number_of_streams: u32,
    pub stream_directory_rva: u32,
    pub checksum: u32,
    pub reserved: u32,
    pub timedatestamp: u32,
    pub flags: u32,
}

impl Record for Header {
    const SIZE: usize = 0x20;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            signature: cursor.read_u32::<LE>()?,
            version: cursor.read_u16::<LE>()?,
            implementation_version: cursor.read_u16::<LE>()?,
            number_of_streams: cursor.read_u32::<LE>()?,
            stream_directory_rva: cursor.read_u32::<LE>()?,
            checksum: cursor.read_u32::<LE>()?,
            reserved: cursor.read_u32::<LE>()?,
            timedatestamp: cursor.read_u32::<LE>()?,
            flags: cursor.read_u32::<LE>()?,
        })
    }
}

/// Where a blob of data lives in the file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LocationDescriptor32 {
    pub data_size: u32,
    pub rva: u32,
}

impl Record for LocationDescriptor32 {
    const SIZE: usize = 0x8;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            data_size: cursor.read_u32::<LE>()?,
            rva: cursor.read_u32::<LE>()?,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Directory {
    pub stream_type: u32,
    pub location: LocationDescriptor32,
}

impl Record for Directory {
    const SIZE: usize = 0xc;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            stream_type: cursor.read_u32::<LE>()?,
            location: LocationDescriptor32::decode(cursor)?,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SystemInfoStream {
    pub processor_arch: u16,
    pub processor_level: u16,
    pub processor_revision: u16,
    pub number_of_processors: u8,
    pub product_type: u8,
    pub major_version: u32,
    pub minor_version: u32,
    pub build_number: u32,
    pub platform_id: u32,
    pub csd_version_rva: u32,
    pub suite_mask: u16,
    pub reserved2: u16,
}

impl Record for SystemInfoStream {
    const SIZE: usize = 0x20;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            processor_arch: cursor.read_u16::<LE>()?,
            processor_level: cursor.read_u16::<LE>()?,
            processor_revision: cursor.read_u16::<LE>()?,
            number_of_processors: cursor.read_u8()?,
            product_type: cursor.read_u8()?,
            major_version: cursor.read_u32::<LE>()?,
            minor_version: cursor.read_u32::<LE>()?,
            build_number: cursor.read_u32::<LE>()?,
            platform_id: cursor.read_u32::<LE>()?,
            csd_version_rva: cursor.read_u32::<LE>()?,
            suite_mask: cursor.read_u16::<LE>()?,
            reserved2: cursor.read_u16::<LE>()?,
        })
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRecord {
    pub exception_code: u32,
    pub exception_flags: u32,
    pub exception_record: u64,
    pub exception_address: u64,
    pub number_parameters: u32,
    pub unused_alignment: u32,
    pub exception_information: [u64; EXCEPTION_MAXIMUM_PARAMETERS],
}

impl Record for ExceptionRecord {
    const SIZE: usize = 0x98;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        let exception_code = cursor.read_u32::<LE>()?;
        let exception_flags = cursor.read_u32::<LE>()?;
        let exception_record = cursor.read_u64::<LE>()?;
        let exception_address = cursor.read_u64::<LE>()?;
        let number_parameters = cursor.read_u32::<LE>()?;
        let unused_alignment = cursor.read_u32::<LE>()?;
        let mut exception_information = [0; EXCEPTION_MAXIMUM_PARAMETERS];
        cursor.read_u64_into::<LE>(&mut exception_information)?;

        Ok(Self {
            exception_code,
            exception_flags,
            exception_record,
            exception_address,
            number_parameters,
            unused_alignment,
            exception_information,
        })
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ExceptionStream {
    pub thread_id: u32,
    pub alignment: u32,
    pub exception_record: ExceptionRecord,
    pub thread_context: LocationDescriptor32,
}

impl Record for ExceptionStream {
    const SIZE: usize = 0xa8;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            thread_id: cursor.read_u32::<LE>()?,
            alignment: cursor.read_u32::<LE>()?,
            exception_record: ExceptionRecord::decode(cursor)?,
            thread_context: LocationDescriptor32::decode(cursor)?,
        })
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct MemoryInfo {
    pub base_address: u64,
    pub allocation_base: u64,
    pub allocation_protect: u32,
    pub alignment1: u32,
    pub region_size: u64,
    pub state: u32,
    pub protect: u32,
    pub type_: u32,
    pub alignment2: u32,
}

impl Record for MemoryInfo {
    const SIZE: usize = 0x30;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            base_address: cursor.read_u64::<LE>()?,
            allocation_base: cursor.read_u64::<LE>()?,
            allocation_protect: cursor.read_u32::<LE>()?,
            alignment1: cursor.read_u32::<LE>()?,
            region_size: cursor.read_u64::<LE>()?,
            state: cursor.read_u32::<LE>()?,
            protect: cursor.read_u32::<LE>()?,
            type_: cursor.read_u32::<LE>()?,
            alignment2: cursor.read_u32::<LE>()?,
        })
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct MemoryInfoListStream {
    pub size_of_header: u32,
    pub size_of_entry: u32,
    pub number_of_entries: u64,
}

impl Record for MemoryInfoListStream {
    const SIZE: usize = 0x10;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            size_of_header: cursor.read_u32::<LE>()?,
            size_of_entry: cursor.read_u32::<LE>()?,
            number_of_entries: cursor.read_u64::<LE>()?,
        })
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Memory64ListStream {
    pub number_of_memory_ranges: u64,
    pub base_rva: u64,
}

impl Record for Memory64ListStream {
    const SIZE: usize = 0x10;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            number_of_memory_ranges: cursor.read_u64::<LE>()?,
            base_rva: cursor.read_u64::<LE>()?,
        })
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct MemoryDescriptor64 {
    pub start_of_memory_range: u64,
    pub data_size: u64,
}

impl Record for MemoryDescriptor64 {
    const SIZE: usize = 0x10;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            start_of_memory_range: cursor.read_u64::<LE>()?,
            data_size: cursor.read_u64::<LE>()?,
        })
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct MemoryDescriptor {
    pub start_of_memory_range: u64,
    pub memory: LocationDescriptor32,
}

impl Record for MemoryDescriptor {
    const SIZE: usize = 0x10;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            start_of_memory_range: cursor.read_u64::<LE>()?,
            memory: LocationDescriptor32::decode(cursor)?,
        })
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ThreadEntry {
    pub thread_id: u32,
    pub suspend_count: u32,
    pub priority_class: u32,
    pub priority: u32,
    pub teb: u64,
    pub stack: MemoryDescriptor,
    pub thread_context: LocationDescriptor32,
}

impl Record for ThreadEntry {
    const SIZE: usize = 0x30;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            thread_id: cursor.read_u32::<LE>()?,
            suspend_count: cursor.read_u32::<LE>()?,
            priority_class: cursor.read_u32::<LE>()?,
            priority: cursor.read_u32::<LE>()?,
            teb: cursor.read_u64::<LE>()?,
            stack: MemoryDescriptor::decode(cursor)?,
            thread_context: LocationDescriptor32::decode(cursor)?,
        })
    }
}

/// The header of the thread list stream.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadList {
    pub number_of_threads: u32,
}

impl Record for ThreadList {
    const SIZE: usize = 0x4;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            number_of_threads: cursor.read_u32::<LE>()?,
        })
    }
}

/// The header of the module list stream.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleList {
    pub number_of_modules: u32,
}

impl Record for ModuleList {
    const SIZE: usize = 0x4;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            number_of_modules: cursor.read_u32::<LE>()?,
        })
    }
}

/// The length prefix of a `MINIDUMP_STRING`; the UTF-16 code units follow it.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringHeader {
    pub length: u32,
}

impl Record for StringHeader {
    const SIZE: usize = 0x4;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            length: cursor.read_u32::<LE>()?,
        })
    }
}

/// The `VS_FIXEDFILEINFO` embedded in every module entry.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedFileInfo {
    pub signature: u32,
    pub struc_version: u32,
    pub file_version_ms: u32,
    pub file_version_ls: u32,
    pub product_version_ms: u32,
    pub product_version_ls: u32,
    pub file_flags_mask: u32,
    pub file_flags: u32,
    pub file_os: u32,
    pub file_type: u32,
    pub file_subtype: u32,
    pub file_date_ms: u32,
    pub file_date_ls: u32,
}

impl FixedFileInfo {
    /// The file version as `(major, minor, build, revision)`.
    pub fn file_version(&self) -> (u16, u16, u16, u16) {
        (
            (self.file_version_ms >> 16) as u16,
            self.file_version_ms as u16,
            (self.file_version_ls >> 16) as u16,
            self.file_version_ls as u16,
        )
    }
}

impl Record for FixedFileInfo {
    const SIZE: usize = 0x34;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            signature: cursor.read_u32::<LE>()?,
            struc_version: cursor.read_u32::<LE>()?,
            file_version_ms: cursor.read_u32::<LE>()?,
            file_version_ls: cursor.read_u32::<LE>()?,
            product_version_ms: cursor.read_u32::<LE>()?,
            product_version_ls: cursor.read_u32::<LE>()?,
            file_flags_mask: cursor.read_u32::<LE>()?,
            file_flags: cursor.read_u32::<LE>()?,
            file_os: cursor.read_u32::<LE>()?,
            file_type: cursor.read_u32::<LE>()?,
            file_subtype: cursor.read_u32::<LE>()?,
            file_date_ms: cursor.read_u32::<LE>()?,
            file_date_ls: cursor.read_u32::<LE>()?,
        })
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry {
    pub base_of_image: u64,
    pub size_of_image: u32,
    pub checksum: u32,
    pub time_date_stamp: u32,
    pub module_name_rva: u32,
    pub version_info: FixedFileInfo,
    pub cv_record: LocationDescriptor32,
    pub misc_record: LocationDescriptor32,
    pub reserved0: u64,
    pub reserved1: u64,
}

impl Record for ModuleEntry {
    const SIZE: usize = 0x6c;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            base_of_image: cursor.read_u64::<LE>()?,
            size_of_image: cursor.read_u32::<LE>()?,
            checksum: cursor.read_u32::<LE>()?,
            time_date_stamp: cursor.read_u32::<LE>()?,
            module_name_rva: cursor.read_u32::<LE>()?,
            version_info: FixedFileInfo::decode(cursor)?,
            cv_record: LocationDescriptor32::decode(cursor)?,
            misc_record: LocationDescriptor32::decode(cursor)?,
            reserved0: cursor.read_u64::<LE>()?,
            reserved1: cursor.read_u64::<LE>()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatingSaveArea32 {
    pub control_word: u32,
    pub status_word: u32,
    pub tag_word: u32,
    pub error_offset: u32,
    pub error_selector: u32,
    pub data_offset: u32,
    pub data_selector: u32,
    pub register_area: [u8; WOW64_SIZE_OF_80387_REGISTERS],
    pub cr0_npx_state: u32,
}

impl Record for FloatingSaveArea32 {
    const SIZE: usize = 0x70;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            control_word: cursor.read_u32::<LE>()?,
            status_word: cursor.read_u32::<LE>()?,
            tag_word: cursor.read_u32::<LE>()?,
            error_offset: cursor.read_u32::<LE>()?,
            error_selector: cursor.read_u32::<LE>()?,
            data_offset: cursor.read_u32::<LE>()?,
            data_selector: cursor.read_u32::<LE>()?,
            register_area: read_array(cursor)?,
            cr0_npx_state: cursor.read_u32::<LE>()?,
        })
    }
}

/// The context of an Intel X86 thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadContextX86 {
    pub context_flags: u32,
    pub dr0: u32,
    pub dr1: u32,
    pub dr2: u32,
    pub dr3: u32,
    pub dr6: u32,
    pub dr7: u32,
    pub float_save: FloatingSaveArea32,
    pub seg_gs: u32,
    pub seg_fs: u32,
    pub seg_es: u32,
    pub seg_ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub ebp: u32,
    pub eip: u32,
    pub seg_cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub seg_ss: u32,
    pub extended_registers: [u8; WOW64_MAXIMUM_SUPPORTED_EXTENSION],
}

impl Record for ThreadContextX86 {
    const SIZE: usize = 0x2cc;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        Ok(Self {
            context_flags: cursor.read_u32::<LE>()?,
            dr0: cursor.read_u32::<LE>()?,
            dr1: cursor.read_u32::<LE>()?,
            dr2: cursor.read_u32::<LE>()?,
            dr3: cursor.read_u32::<LE>()?,
            dr6: cursor.read_u32::<LE>()?,
            dr7: cursor.read_u32::<LE>()?,
            float_save: FloatingSaveArea32::decode(cursor)?,
            seg_gs: cursor.read_u32::<LE>()?,
            seg_fs: cursor.read_u32::<LE>()?,
            seg_es: cursor.read_u32::<LE>()?,
            seg_ds: cursor.read_u32::<LE>()?,
            edi: cursor.read_u32::<LE>()?,
            esi: cursor.read_u32::<LE>()?,
            ebx: cursor.read_u32::<LE>()?,
            edx: cursor.read_u32::<LE>()?,
            ecx: cursor.read_u32::<LE>()?,
            eax: cursor.read_u32::<LE>()?,
            ebp: cursor.read_u32::<LE>()?,
            eip: cursor.read_u32::<LE>()?,
            seg_cs: cursor.read_u32::<LE>()?,
            eflags: cursor.read_u32::<LE>()?,
            esp: cursor.read_u32::<LE>()?,
            seg_ss: cursor.read_u32::<LE>()?,
            extended_registers: read_array(cursor)?,
        })
    }
}

impl fmt::Display for ThreadContextX86 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "eax={:08x} ebx={:08x} ecx={:08x} edx={:08x} esi={:08x} edi={:08x}",
            self.eax, self.ebx, self.ecx, self.edx, self.esi, self.edi
        )?;
        writeln!(
            f,
            "eip={:08x} esp={:08x} ebp={:08x}",
            self.eip, self.esp, self.ebp
        )?;
        write!(
            f,
            "cs={:04x}  ss={:04x}  ds={:04x}  es={:04x}  fs={:04x} gs={:04x}              efl={:08x}",
            self.seg_cs,
            self.seg_ss,
            self.seg_ds,
            self.seg_es,
            self.seg_fs,
            self.seg_gs,
            self.eflags
        )
    }
}

/// The context of an Intel X64 thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadContextX64 {
    pub p1_home: u64,
    pub p2_home: u64,
    pub p3_home: u64,
    pub p4_home: u64,
    pub p5_home: u64,
    pub p6_home: u64,
    pub context_flags: u32,
    pub mxcsr: u32,
    pub seg_cs: u16,
    pub seg_ds: u16,
    pub seg_es: u16,
    pub seg_fs: u16,
    pub seg_gs: u16,
    pub seg_ss: u16,
    pub eflags: u32,
    pub dr0: u64,
    pub dr1: u64,
    pub dr2: u64,
    pub dr3: u64,
    pub dr6: u64,
    pub dr7: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rbx: u64,
    pub rsp: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub control_word: u16,
    pub status_word: u16,
    pub tag_word: u8,
    pub reserved1: u8,
    pub error_opcode: u16,
    pub error_offset: u32,
    pub error_selector: u16,
    pub reserved2: u16,
    pub data_offset: u32,
    pub data_selector: u16,
    pub reserved3: u16,
    pub mxcsr2: u32,
    pub mxcsr_mask: u32,
    pub float_registers: [u128; 8],
    /// `xmm0` through `xmm15`.
    pub xmm: [u128; 16],
    pub padding: [u8; 0x60],
    pub vector_registers: [u128; 26],
    pub vector_control: u64,
    pub debug_control: u64,
    pub last_branch_to_rip: u64,
    pub last_branch_from_rip: u64,
    pub last_exception_to_rip: u64,
    pub last_exception_from_rip: u64,
}

impl Record for ThreadContextX64 {
    const SIZE: usize = 0x4d0;

    fn decode(cursor: &mut Cursor) -> io::Result<Self> {
        let p1_home = cursor.read_u64::<LE>()?;
        let p2_home = cursor.read_u64::<LE>()?;
        let p3_home = cursor.read_u64::<LE>()?;
        let p4_home = cursor.read_u64::<LE>()?;
        let p5_home = cursor.read_u64::<LE>()?;
        let p6_home = cursor.read_u64::<LE>()?;
        let context_flags = cursor.read_u32::<LE>()?;
        let mxcsr = cursor.read_u32::<LE>()?;
        let seg_cs = cursor.read_u16::<LE>()?;
        let seg_ds = cursor.read_u16::<LE>()?;
        let seg_es = cursor.read_u16::<LE>()?;
        let seg_fs = cursor.read_u16::<LE>()?;
        let seg_gs = cursor.read_u16::<LE>()?;
        let seg_ss = cursor.read_u16::<LE>()?;
        let eflags = cursor.read_u32::<LE>()?;
        let dr0 = cursor.read_u64::<LE>()?;
        let dr1 = cursor.read_u64::<LE>()?;
        let dr2 = cursor.read_u64::<LE>()?;
        let dr3 = cursor.read_u64::<LE>()?;
        let dr6 = cursor.read_u64::<LE>()?;
        let dr7 = cursor.read_u64::<LE>()?;

        // The GPRs are laid out in the order of their encoding.
        let mut gprs = [0u64; 17];
        cursor.read_u64_into::<LE>(&mut gprs)?;
        let [rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi, r8, r9, r10, r11, r12, r13, r14, r15, rip] =
            gprs;

        // Legacy FXSAVE area.
        let control_word = cursor.read_u16::<LE>()?;
        let status_word = cursor.read_u16::<LE>()?;
        let tag_word = cursor.read_u8()?;
        let reserved1 = cursor.read_u8()?;
        let error_opcode = cursor.read_u16::<LE>()?;
        let error_offset = cursor.read_u32::<LE>()?;
        let error_selector = cursor.read_u16::<LE>()?;
        let reserved2 = cursor.read_u16::<LE>()?;
        let data_offset = cursor.read_u32::<LE>()?;
        let data_selector = cursor.read_u16::<LE>()?;
        let reserved3 = cursor.read_u16::<LE>()?;
        let mxcsr2 = cursor.read_u32::<LE>()?;
        let mxcsr_mask = cursor.read_u32::<LE>()?;
        let mut float_registers = [0; 8];
        cursor.read_u128_into::<LE>(&mut float_registers)?;
        let mut xmm = [0; 16];
        cursor.read_u128_into::<LE>(&mut xmm)?;
        let padding = read_array(cursor)?;

        let mut vector_registers = [0; 26];
        cursor.read_u128_into::<LE>(&mut vector_registers)?;

        Ok(Self {
            p1_home,
            p2_home,
            p3_home,
            p4_home,
            p5_home,
            p6_home,
            context_flags,
            mxcsr,
            seg_cs,
            seg_ds,
            seg_es,
            seg_fs,
            seg_gs,
            seg_ss,
            eflags,
            dr0,
            dr1,
            dr2,
            dr3,
            dr6,
            dr7,
            rax,
            rcx,
            rdx,
            rbx,
            rsp,
            rbp,
            rsi,
            rdi,
            r8,
            r9,
            r10,
            r11,
            r12,
            r13,
            r14,
            r15,
            rip,
            control_word,
            status_word,
            tag_word,
            reserved1,
            error_opcode,
            error_offset,
            error_selector,
            reserved2,
            data_offset,
            data_selector,
            reserved3,
            mxcsr2,
            mxcsr_mask,
            float_registers,
            xmm,
            padding,
            vector_registers,
            vector_control: cursor.read_u64::<LE>()?,
            debug_control: cursor.read_u64::<LE>()?,
            last_branch_to_rip: cursor.read_u64::<LE>()?,
            last_branch_from_rip: cursor.read_u64::<LE>()?,
            last_exception_to_rip: cursor.read_u64::<LE>()?,
            last_exception_from_rip: cursor.read_u64::<LE>()?,
        })
    }
}

impl fmt::Display for ThreadContextX64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "rax={:016x} rbx={:016x} rcx={:016x}",
            self.rax, self.rbx, self.rcx
        )?;
        writeln!(
            f,
            "rdx={:016x} rsi={:016x} rdi={:016x}",
            self.rdx, self.rsi, self.rdi
        )?;
        writeln!(
            f,
            "rip={:016x} rsp={:016x} rbp={:016x}",
            self.rip, self.rsp, self.rbp
        )?;
        writeln!(
            f,
            " r8={:016x}  r9={:016x} r10={:016x}",
            self.r8, self.r9, self.r10
        )?;
        writeln!(
            f,
            "r11={:016x} r12={:016x} r13={:016x}",
            self.r11, self.r12, self.r13
        )?;
        writeln!(f, "r14={:016x} r15={:016x}", self.r14, self.r15)?;
        writeln!(f, "cs={:04x}  ss={:04x}  ds={:04x}  es={:04x}  fs={:04x} gs={:04x}              efl={:08x}",
        self.seg_cs, self.seg_ss, self.seg_ds, self.seg_es, self.seg_fs, self.seg_gs,
        self.eflags)?;
        writeln!(
            f,
            "fpcw={:04x}    fpsw={:04x}    fptw={:04x}",
            self.control_word, self.status_word, self.tag_word
        )?;

        for (idx, pair) in self.float_registers.chunks(2).enumerate() {
            writeln!(
                f,
                "  st{}={:032x}       st{}={:032x}",
                idx * 2,
                pair[0],
                idx * 2 + 1,
                pair[1]
            )?;
        }

        for (idx, pair) in self.xmm.chunks(2).enumerate() {
            let (lo, hi) = (idx * 2, idx * 2 + 1);
            if idx > 0 {
                writeln!(f)?;
            }

            // Line up the columns like WinDbg: single digit registers get an
            // extra space.
            write!(
                f,
                "{:>5}={:032x} {:>9}={:032x}",
                format!("xmm{lo}"),
                pair[0],
                format!("xmm{hi}"),
                pair[1]
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decode a `T` off a zeroed buffer of exactly `T::SIZE` bytes, and make
    /// sure the decoder consumed all of it.
    fn consumes_exactly<T: Record>() -> bool {
        let buffer = vec![0; T::SIZE];
        let mut cursor = Cursor::new(buffer.as_slice());
        T::decode(&mut cursor).is_ok() && cursor.position() == T::SIZE as u64
    }

    /// Ensure that the sizes of key structures are right.
    #[test]
    fn sizeofs() {
        assert_eq!(FloatingSaveArea32::SIZE, 0x70);
        assert_eq!(ThreadContextX86::SIZE, 0x2cc);
        assert_eq!(ThreadContextX64::SIZE, 0x4d0);
        assert_eq!(Header::SIZE, 0x20);
        assert_eq!(LocationDescriptor32::SIZE, 0x8);
        assert_eq!(Directory::SIZE, 0xC);
        assert_eq!(Memory64ListStream::SIZE, 0x10);
        assert_eq!(MemoryDescriptor64::SIZE, 0x10);
        assert_eq!(FixedFileInfo::SIZE, 0x34);
        assert_eq!(ModuleEntry::SIZE, 0x6c);
        assert_eq!(MemoryInfoListStream::SIZE, 0x10);
        assert_eq!(MemoryInfo::SIZE, 0x30);
        assert_eq!(MemoryDescriptor::SIZE, 0x10);
        assert_eq!(ThreadEntry::SIZE, 0x30);
        assert_eq!(SystemInfoStream::SIZE, 32);
        assert_eq!(ExceptionRecord::SIZE, 0x98);
        assert_eq!(ExceptionStream::SIZE, 0xa8);
    }

    /// Ensure that the decoders agree with the sizes.
    #[test]
    fn decoders_consume_their_size() {
        assert!(consumes_exactly::<FloatingSaveArea32>());
        assert!(consumes_exactly::<ThreadContextX86>());
        assert!(consumes_exactly::<ThreadContextX64>());
        assert!(consumes_exactly::<Header>());
        assert!(consumes_exactly::<LocationDescriptor32>());
        assert!(consumes_exactly::<Directory>());
        assert!(consumes_exactly::<Memory64ListStream>());
        assert!(consumes_exactly::<MemoryDescriptor64>());
        assert!(consumes_exactly::<FixedFileInfo>());
        assert!(consumes_exactly::<ModuleEntry>());
        assert!(consumes_exactly::<MemoryInfoListStream>());
        assert!(consumes_exactly::<MemoryInfo>());
        assert!(consumes_exactly::<MemoryDescriptor>());
        assert!(consumes_exactly::<ThreadEntry>());
        assert!(consumes_exactly::<SystemInfoStream>());
        assert!(consumes_exactly::<ExceptionRecord>());
        assert!(consumes_exactly::<ExceptionStream>());
        assert!(consumes_exactly::<ThreadList>());
        assert!(consumes_exactly::<ModuleList>());
        assert!(consumes_exactly::<StringHeader>());
    }

    #[test]
    fn x64_register_offsets() {
        // Put a marker at the offset of rip, xmm0 and the first vector register.
        let mut buffer = vec![0; ThreadContextX64::SIZE];
        buffer[0xf8] = 0x41;
        buffer[0x1a0] = 0x42;
        buffer[0x300] = 0x43;
        let mut cursor = Cursor::new(buffer.as_slice());
        let ctx = ThreadContextX64::decode(&mut cursor).unwrap();
        assert_eq!(ctx.rip, 0x41);
        assert_eq!(ctx.xmm[0], 0x42);
        assert_eq!(ctx.vector_registers[0], 0x43);
    }

    #[test]
    fn x86_register_offsets() {
        let mut buffer = vec![0; ThreadContextX86::SIZE];
        buffer[0xb8..0xbc].copy_from_slice(&0xdead_beef_u32.to_le_bytes());
        buffer[0xc4] = 0x41;
        let mut cursor = Cursor::new(buffer.as_slice());
        let ctx = ThreadContextX86::decode(&mut cursor).unwrap();
        assert_eq!(ctx.eip, 0xdead_beef);
        assert_eq!(ctx.esp, 0x41);
    }

    #[test]
    fn display_x64() {
        let buffer = vec![0; ThreadContextX64::SIZE];
        let mut cursor = Cursor::new(buffer.as_slice());
        let mut ctx = ThreadContextX64::decode(&mut cursor).unwrap();
        ctx.rip = 0x1337;
        let s = ctx.to_string();
        assert!(s.contains("rip=0000000000001337"));
        assert!(s.contains(" xmm0="));
        assert!(s.contains("xmm15="));
        assert!(!s.ends_with('\n'));
    }

    #[test]
    fn file_version() {
        let info = FixedFileInfo {
            file_version_ms: 0x000a_0002,
            file_version_ls: 0x4a61_0001,
            ..Default::default()
        };
        assert_eq!(info.file_version(), (10, 2, 0x4a61, 1));
    }
}
