// Axel '0vercl0k' Souchet - July 29 2023
//! This module is where the parsing logic is implemented. [`ParsedDump::parse`]
//! takes a slice the user got from somewhere (a memory mapping, a [`Vec<u8>`],
//! ..) and turns it into a read-only model of the memory regions, modules and
//! threads the dump describes. Every offset and size read off the file goes
//! through [`BoundedView`] so a corrupted dump yields an error, never a bad
//! read.
use std::{collections, fmt, ops};

use tracing::{debug, trace};

use crate::error::{ParseError, Result};
use crate::structs::*;
use crate::view::{BoundedView, Record};

/// Disables all access to the committed region of pages. An attempt to read
/// from, write to, or execute the committed region results in an access
/// violation.
pub const PAGE_NOACCESS: u32 = 1;
/// Enables read-only access to the committed region of pages. An attempt to
/// write to the committed region results in an access violation. If Data
/// Execution Prevention is enabled, an attempt to execute code in the committed
/// region results in an access violation.
pub const PAGE_READONLY: u32 = 2;
/// Enables read-only or read/write access to the committed region of pages. If
/// Data Execution Prevention is enabled, attempting to execute code in the
/// committed region results in an access violation.
pub const PAGE_READWRITE: u32 = 4;
/// Enables read-only or copy-on-write access to a mapped view of a file mapping
/// object. An attempt to write to a committed copy-on-write page results in a
/// private copy of the page being made for the process.
pub const PAGE_WRITECOPY: u32 = 8;
/// Enables execute access to the committed region of pages. An attempt to write
/// to the committed region results in an access violation.
pub const PAGE_EXECUTE: u32 = 16;
/// Enables execute or read-only access to the committed region of pages. An
/// attempt to write to the committed region results in an access violation.
pub const PAGE_EXECUTE_READ: u32 = 32;
/// Enables execute, read-only, or read/write access to the committed region of
/// pages.
pub const PAGE_EXECUTE_READWRITE: u32 = 64;
/// Enables execute, read-only, or copy-on-write access to a mapped view of a
/// file mapping object.
pub const PAGE_EXECUTE_WRITECOPY: u32 = 128;
/// Pages in the region become guard pages. Any attempt to access a guard page
/// causes the system to raise a STATUS_GUARD_PAGE_VIOLATION exception and turn
/// off the guard page status.
pub const PAGE_GUARD: u32 = 0x1_00;
/// Sets all pages to be non-cachable.
pub const PAGE_NOCACHE: u32 = 0x2_00;
/// Sets all pages to be write-combined.
pub const PAGE_WRITECOMBINE: u32 = 0x4_00;

/// The pages of the region are backed by memory or the paging file.
pub const MEM_COMMIT: u32 = 0x10_00;
/// The pages of the region are reserved but not backed.
pub const MEM_RESERVE: u32 = 0x20_00;
/// The region isn't allocated.
pub const MEM_FREE: u32 = 0x1_00_00;

/// The region is private memory.
pub const MEM_PRIVATE: u32 = 0x2_00_00;
/// The region is mapped into the view of a section.
pub const MEM_MAPPED: u32 = 0x4_00_00;
/// The region is mapped into the view of an image section.
pub const MEM_IMAGE: u32 = 0x1_00_00_00;

/// The memory rights constants on Windows make it annoying to know if the page
/// is readable / writable / executable, so we have to create our own masks.
/// A page is readable if it is protected with any of the below rights.
const READABLE: u32 = PAGE_READONLY
    | PAGE_READWRITE
    | PAGE_EXECUTE_READ
    | PAGE_EXECUTE_READWRITE
    | PAGE_EXECUTE_WRITECOPY
    | PAGE_WRITECOPY;

/// A page is writable if it is protected with any of the below rights.
const WRITABLE: u32 = PAGE_READWRITE | PAGE_EXECUTE_READWRITE | PAGE_WRITECOPY;
/// A page is executable if it is protected with any of the below rights.
const EXECUTABLE: u32 =
    PAGE_EXECUTE | PAGE_EXECUTE_READ | PAGE_EXECUTE_READWRITE | PAGE_EXECUTE_WRITECOPY;

/// The kind of a stream, as found in the stream directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// A directory slot that isn't used; there can be any number of them.
    Unused,
    ThreadList,
    ModuleList,
    Exception,
    SystemInfo,
    Memory64List,
    MemoryInfoList,
    /// A stream the parser validates but doesn't decode.
    Other(u32),
}

impl From<u32> for StreamKind {
    fn from(value: u32) -> Self {
        match value {
            STREAM_TYPE_UNUSED => Self::Unused,
            STREAM_TYPE_THREAD_LIST => Self::ThreadList,
            STREAM_TYPE_MODULE_LIST => Self::ModuleList,
            STREAM_TYPE_EXCEPTION => Self::Exception,
            STREAM_TYPE_SYSTEM_INFO => Self::SystemInfo,
            STREAM_TYPE_MEMORY64_LIST => Self::Memory64List,
            STREAM_TYPE_MEMORY_INFO_LIST => Self::MemoryInfoList,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unused => write!(f, "Unused"),
            Self::ThreadList => write!(f, "ThreadList"),
            Self::ModuleList => write!(f, "ModuleList"),
            Self::Exception => write!(f, "Exception"),
            Self::SystemInfo => write!(f, "SystemInfo"),
            Self::Memory64List => write!(f, "Memory64List"),
            Self::MemoryInfoList => write!(f, "MemoryInfoList"),
            Self::Other(type_) => write!(f, "type {type_}"),
        }
    }
}

/// Map a stream kind to where its data lives in the file.
pub type Directories = collections::HashMap<StreamKind, LocationDescriptor32>;

/// The processor architecture recorded in the system info stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorArch {
    /// Intel x86.
    X86,
    /// ARM.
    Arm,
    /// Intel Itanium.
    Ia64,
    /// Intel x64.
    X64,
    /// Anything else, including `PROCESSOR_ARCHITECTURE_UNKNOWN`.
    Unknown(u16),
}

impl From<u16> for ProcessorArch {
    fn from(value: u16) -> Self {
        match value {
            ARCH_X86 => Self::X86,
            ARCH_ARM => Self::Arm,
            ARCH_IA64 => Self::Ia64,
            ARCH_X64 => Self::X64,
            other => Self::Unknown(other),
        }
    }
}

/// A DLL loaded in the virtual address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module<'a> {
    /// Where the image is loaded.
    pub base_of_image: u64,
    /// Size of the image in memory.
    pub size_of_image: u32,
    /// PE checksum of the module.
    pub checksum: u32,
    /// Timestamp.
    pub time_date_stamp: u32,
    /// The module path as it was on the target.
    pub name: String,
    pub version_info: FixedFileInfo,
    /// The CodeView record; empty when the dump doesn't have one.
    pub cv_record: &'a [u8],
    /// The misc record; empty when the dump doesn't have one.
    pub misc_record: &'a [u8],
}

impl<'a> Module<'a> {
    fn new(entry: ModuleEntry, name: String, cv_record: &'a [u8], misc_record: &'a [u8]) -> Self {
        Self {
            base_of_image: entry.base_of_image,
            size_of_image: entry.size_of_image,
            checksum: entry.checksum,
            time_date_stamp: entry.time_date_stamp,
            name,
            version_info: entry.version_info,
            cv_record,
            misc_record,
        }
    }

    /// Get the file name of the module, which is whatever follows the last
    /// backslash in its path.
    pub fn file_name(&self) -> &str {
        match self.name.rfind('\\') {
            Some(idx) => &self.name[idx + 1..],
            None => &self.name,
        }
    }

    /// Does the image cover `address`?
    pub fn contains(&self, address: u64) -> bool {
        address
            .checked_sub(self.base_of_image)
            .map_or(false, |offset| offset < self.size_of_image.into())
    }

    /// Get the address of where the module was loaded at.
    pub fn start_addr(&self) -> u64 {
        self.base_of_image
    }

    /// Get the address right after the module's last byte. It saturates if
    /// the image pretends to go past the end of the address space.
    pub fn end_addr(&self) -> u64 {
        self.base_of_image
            .saturating_add(self.size_of_image.into())
    }

    /// Get the CodeView record if there is one.
    pub fn cv_record(&self) -> Option<&'a [u8]> {
        Some(self.cv_record).filter(|record| !record.is_empty())
    }

    /// Get the misc record if there is one.
    pub fn misc_record(&self) -> Option<&'a [u8]> {
        Some(self.misc_record).filter(|record| !record.is_empty())
    }
}

/// A [`ThreadContext`] stores the thread context of a thread. Its variant is
/// decided once per dump by the architecture in the system info stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadContext {
    /// The architecture is unknown (no system info stream) or isn't one the
    /// library can decode.
    Unknown,
    /// The Intel x86 thread context.
    X86(Box<ThreadContextX86>),
    /// The Intel x64 thread context.
    X64(Box<ThreadContextX64>),
}

impl ThreadContext {
    /// Get the instruction pointer, if the context was decoded.
    pub fn program_counter(&self) -> Option<u64> {
        match self {
            Self::Unknown => None,
            Self::X86(ctx) => Some(ctx.eip.into()),
            Self::X64(ctx) => Some(ctx.rip),
        }
    }
}

/// Display the [`ThreadContext`] like WinDbg would.
impl fmt::Display for ThreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown type of context!"),
            Self::X86(ctx) => ctx.fmt(f),
            Self::X64(ctx) => ctx.fmt(f),
        }
    }
}

/// A thread that was running when the dump was generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    /// The thread ID.
    pub id: u32,
    /// The suspend count counter cf [Freezing and Suspending Threads](https://learn.microsoft.com/en-us/windows-hardware/drivers/debugger/controlling-processes-and-threads).
    pub suspend_count: u32,
    /// The priority class cf [Priority Class](https://learn.microsoft.com/en-us/windows/win32/procthread/scheduling-priorities).
    pub priority_class: u32,
    /// Thread priority cf [Priority level](https://learn.microsoft.com/en-us/windows/win32/procthread/scheduling-priorities).
    pub priority: u32,
    /// The thread environment block address.
    pub teb: u64,
    context: ThreadContext,
}

impl Thread {
    fn new(entry: ThreadEntry, context: ThreadContext) -> Self {
        Self {
            id: entry.thread_id,
            suspend_count: entry.suspend_count,
            priority_class: entry.priority_class,
            priority: entry.priority,
            teb: entry.teb,
            context,
        }
    }

    /// Get a reference to the [`ThreadContext`].
    pub fn context(&self) -> &ThreadContext {
        &self.context
    }
}

/// A region of the address space, as described by the memory info list
/// stream. A [`MemoryRegion`] can have `data` associated with it but it isn't
/// a guarantee (think about a region mapped as `PAGE_NOACCESS`, or pages that
/// didn't make it into the dump).
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion<'a> {
    /// Start address of the region.
    pub base_address: u64,
    /// The base of the allocation that gave life to this memory region.
    pub allocation_base: u64,
    /// The page protection used at allocation time.
    pub allocation_protect: u32,
    /// Size of the region in the address space.
    pub region_size: u64,
    /// The state of the memory region. See [State](https://learn.microsoft.com/en-us/windows/win32/api/winnt/ns-winnt-memory_basic_information).
    pub state: u32,
    /// The page protection currently applied to the memory region.
    pub protect: u32,
    /// The type of memory region. See [Type](https://learn.microsoft.com/en-us/windows/win32/api/winnt/ns-winnt-memory_basic_information).
    pub type_: u32,
    /// The bytes the memory64 list stream attached to the region.
    pub data: Option<&'a [u8]>,
}

impl<'a> MemoryRegion<'a> {
    /// Is the memory region readable?
    pub fn is_readable(&self) -> bool {
        (self.protect & READABLE) != 0
    }

    /// Is the memory region writable?
    pub fn is_writable(&self) -> bool {
        (self.protect & WRITABLE) != 0
    }

    /// Is the memory region executable?
    pub fn is_executable(&self) -> bool {
        (self.protect & EXECUTABLE) != 0
    }

    /// Is the region free?
    pub fn is_free(&self) -> bool {
        self.state == MEM_FREE
    }

    /// Stringify the memory region state.
    pub fn state_as_str(&self) -> &'static str {
        match self.state {
            MEM_COMMIT => "MEM_COMMIT",
            MEM_RESERVE => "MEM_RESERVE",
            MEM_FREE => "MEM_FREE",
            _ => "UNKNOWN",
        }
    }

    /// Stringify the memory region type.
    pub fn type_as_str(&self) -> &'static str {
        if self.is_free() {
            return "";
        }

        match self.type_ {
            MEM_PRIVATE => "MEM_PRIVATE",
            MEM_MAPPED => "MEM_MAPPED",
            MEM_IMAGE => "MEM_IMAGE",
            _ => "UNKNOWN",
        }
    }

    /// Stringify the memory region protection.
    pub fn protect_as_str(&self) -> String {
        if self.protect == 0 {
            return "".into();
        }

        // Those bits are the only ones that can be combined with the page
        // protections from below. So strip those first off `protect`.
        let modifiers = [
            (PAGE_GUARD, "PAGE_GUARD"),
            (PAGE_NOCACHE, "PAGE_NOCACHE"),
            (PAGE_WRITECOMBINE, "PAGE_WRITECOMBINE"),
        ];

        let mut protect = self.protect;
        let mut parts = modifiers
            .iter()
            .filter(|(mask, _)| (protect & mask) != 0)
            .map(|(_, name)| *name)
            .collect::<Vec<_>>();

        for (mask, _) in modifiers {
            protect &= !mask;
        }

        parts.push(match protect {
            PAGE_NOACCESS => "PAGE_NOACCESS",
            PAGE_READONLY => "PAGE_READONLY",
            PAGE_READWRITE => "PAGE_READWRITE",
            PAGE_WRITECOPY => "PAGE_WRITECOPY",
            PAGE_EXECUTE => "PAGE_EXECUTE",
            PAGE_EXECUTE_READ => "PAGE_EXECUTE_READ",
            PAGE_EXECUTE_READWRITE => "PAGE_EXECUTE_READWRITE",
            PAGE_EXECUTE_WRITECOPY => "PAGE_EXECUTE_WRITECOPY",
            _ => "UNKNOWN",
        });

        parts.join(" | ")
    }

    /// Does the region cover `address`?
    pub fn contains(&self, address: u64) -> bool {
        address
            .checked_sub(self.base_address)
            .map_or(false, |offset| offset < self.region_size)
    }

    /// Get a slice over the region's data from its absolute address.
    ///
    /// If the dump had a region of size 4 bytes starting at address 0xdead
    /// then calling `data_from(0xdead+1)` returns a slice over the last 3
    /// bytes of the region. This returns [`None`] if the region has no data,
    /// doesn't contain `addr`, or if its data stops before `addr`. The slice
    /// never goes past the end of the region, even if the dump attached more
    /// bytes than the region is large.
    pub fn data_from(&self, addr: u64) -> Option<&'a [u8]> {
        if !self.contains(addr) {
            return None;
        }

        let data = self.data?;
        let offset = usize::try_from(addr - self.base_address).ok()?;
        let end = usize::try_from(self.region_size).map_or(data.len(), |size| size.min(data.len()));

        data.get(offset..end).filter(|tail| !tail.is_empty())
    }

    /// Get the address of where this region was at in memory.
    pub fn start_addr(&self) -> u64 {
        self.base_address
    }

    /// Get the address right after the region's last byte. It saturates if
    /// the region pretends to go past the end of the address space.
    pub fn end_addr(&self) -> u64 {
        self.base_address.saturating_add(self.region_size)
    }

    /// Get the range of addresses the region covers.
    pub fn range(&self) -> ops::Range<u64> {
        self.start_addr()..self.end_addr()
    }

    /// Number of bytes of backing data; 0 when there isn't any.
    pub fn data_size(&self) -> u64 {
        self.data.map_or(0, |data| data.len() as u64)
    }
}

/// Convert a [`MemoryInfo`] into a [`MemoryRegion`] without data.
impl<'a> From<MemoryInfo> for MemoryRegion<'a> {
    fn from(value: MemoryInfo) -> Self {
        Self {
            base_address: value.base_address,
            allocation_base: value.allocation_base,
            allocation_protect: value.allocation_protect,
            region_size: value.region_size,
            state: value.state,
            protect: value.protect,
            type_: value.type_,
            data: None,
        }
    }
}

/// Map a base address to a [`MemoryRegion`].
pub type MemoryRegions<'a> = collections::BTreeMap<u64, MemoryRegion<'a>>;

/// Map a thread id to a [`Thread`].
pub type Threads = collections::BTreeMap<u32, Thread>;

/// Map a base address to a [`Module`].
pub type Modules<'a> = collections::BTreeMap<u64, Module<'a>>;

/// This stores useful information fished out of a Windows minidump file:
/// memory regions, modules and thread contexts. It borrows the buffer it was
/// parsed from and never changes once built.
#[derive(Debug)]
pub struct ParsedDump<'a> {
    arch: Option<ProcessorArch>,
    system_info: Option<SystemInfoStream>,
    exception: Option<ExceptionStream>,
    memory_regions: MemoryRegions<'a>,
    modules: Modules<'a>,
    threads: Threads,
}

/// Parse the dump in `buffer`. See [`ParsedDump::parse`].
pub fn parse(buffer: &[u8]) -> Result<ParsedDump<'_>> {
    ParsedDump::parse(buffer)
}

impl<'a> ParsedDump<'a> {
    /// Parse a dump held in `buffer`. The result borrows the buffer, so it
    /// needs to outlive the [`ParsedDump`].
    pub fn parse(buffer: &'a [u8]) -> Result<ParsedDump<'a>> {
        let result = Self::parse_view(BoundedView::new(buffer));
        if let Err(e) = &result {
            debug!(error = %e, len = buffer.len(), "failed to parse the dump");
        }

        result
    }

    /// Get the processor architecture, if the dump had a system info stream.
    pub fn architecture(&self) -> Option<ProcessorArch> {
        self.arch
    }

    /// Is the architecture X64?
    pub fn architecture_is_64bit(&self) -> bool {
        matches!(self.arch, Some(ProcessorArch::X64))
    }

    /// Is the architecture X86?
    pub fn is_arch_x86(&self) -> bool {
        matches!(self.arch, Some(ProcessorArch::X86))
    }

    /// Is the architecture X64?
    pub fn is_arch_x64(&self) -> bool {
        self.architecture_is_64bit()
    }

    /// Get the system info stream, if there was one.
    pub fn system_info(&self) -> Option<&SystemInfoStream> {
        self.system_info.as_ref()
    }

    /// Get the exception stream, if there was one.
    pub fn exception(&self) -> Option<&ExceptionStream> {
        self.exception.as_ref()
    }

    /// The thread id of the foreground thread, which is the thread the
    /// exception stream designates.
    pub fn foreground_thread_id(&self) -> Option<u32> {
        self.exception.as_ref().map(|exception| exception.thread_id)
    }

    /// Get a reference to the base address -> [`Module`] map.
    pub fn modules(&self) -> &Modules<'a> {
        &self.modules
    }

    /// Find a [`Module`] that includes `address` in its range.
    ///
    /// Only the module with the greatest base address at or below `address`
    /// is considered: if modules overlap, an address covered only by an
    /// earlier, larger module isn't found.
    pub fn module_containing(&self, address: u64) -> Option<&Module<'a>> {
        self.modules
            .range(..=address)
            .next_back()
            .map(|(_, module)| module)
            .filter(|module| module.contains(address))
    }

    /// Get a reference to the TID -> [`Thread`] map.
    pub fn threads(&self) -> &Threads {
        &self.threads
    }

    /// Find a [`Thread`] with a specific TID.
    pub fn thread(&self, id: u32) -> Option<&Thread> {
        self.threads.get(&id)
    }

    /// Get the foreground thread if there is one, otherwise the thread with
    /// the lowest TID.
    pub fn primary_thread(&self) -> Option<&Thread> {
        self.foreground_thread_id()
            .and_then(|id| self.thread(id))
            .or_else(|| self.threads.values().next())
    }

    /// Get a reference to the base address -> [`MemoryRegion`] map.
    pub fn memory_regions(&self) -> &MemoryRegions<'a> {
        &self.memory_regions
    }

    /// Find a [`MemoryRegion`] that includes `address` in its range.
    ///
    /// Only the region with the greatest base address at or below `address`
    /// is considered: if regions overlap, an address covered only by an
    /// earlier, larger region isn't found.
    pub fn memory_region_containing(&self, address: u64) -> Option<&MemoryRegion<'a>> {
        self.memory_regions
            .range(..=address)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.contains(address))
    }

    /// Read `len` bytes of the dumped process' memory at `address`. This only
    /// succeeds if a single non-free region has all the bytes backed by the
    /// dump.
    pub fn read_memory(&self, address: u64, len: usize) -> Option<&'a [u8]> {
        let region = self
            .memory_region_containing(address)
            .filter(|region| !region.is_free())?;

        region.data_from(address)?.get(..len)
    }

    /// Is `address` inside a region that isn't free?
    pub fn is_valid_ptr(&self, address: u64) -> bool {
        self.memory_region_containing(address)
            .map_or(false, |region| !region.is_free())
    }

    /// Is `address` inside an executable region that isn't free?
    pub fn is_code_ptr(&self, address: u64) -> bool {
        self.memory_region_containing(address)
            .filter(|region| !region.is_free())
            .map_or(false, |region| {
                matches!(
                    region.protect & 0xff,
                    PAGE_EXECUTE | PAGE_EXECUTE_READ | PAGE_EXECUTE_READWRITE | PAGE_EXECUTE_WRITECOPY
                )
            })
    }

    /// Walk every stream in a fixed order and build the model. Nothing gets
    /// returned to the caller if any stream is bogus.
    fn parse_view(view: BoundedView<'a>) -> Result<ParsedDump<'a>> {
        let hdr = validate_header(&view)?;
        let directories = resolve_directory(&view, &hdr)?;

        // The architecture is needed to decode thread contexts.
        let system_info = directories
            .get(&StreamKind::SystemInfo)
            .map(|location| parse_system_info(&view, *location))
            .transpose()?;
        let arch = system_info
            .as_ref()
            .map(|system_info| ProcessorArch::from(system_info.processor_arch));

        // The foreground TID can only be checked once the threads are known.
        let exception = directories
            .get(&StreamKind::Exception)
            .map(|location| parse_exception(&view, *location))
            .transpose()?;

        // Regions are declared without data first..
        let mut memory_regions = match directories.get(&StreamKind::MemoryInfoList) {
            Some(location) => parse_mem_info_list(&view, *location)?,
            None => MemoryRegions::new(),
        };

        // ..and backfilled with their data after.
        if let Some(location) = directories.get(&StreamKind::Memory64List) {
            parse_mem64_list(&view, *location, &mut memory_regions)?;
        }

        let modules = match directories.get(&StreamKind::ModuleList) {
            Some(location) => parse_module_list(&view, *location)?,
            None => Modules::new(),
        };

        let threads = match directories.get(&StreamKind::ThreadList) {
            Some(location) => parse_thread_list(&view, *location, arch)?,
            None => Threads::new(),
        };

        if let Some(exception) = &exception {
            if !threads.contains_key(&exception.thread_id) {
                return Err(ParseError::DanglingThread(exception.thread_id));
            }
        }

        debug!(
            ?arch,
            regions = memory_regions.len(),
            modules = modules.len(),
            threads = threads.len(),
            "parsed the dump"
        );

        Ok(ParsedDump {
            arch,
            system_info,
            exception,
            memory_regions,
            modules,
            threads,
        })
    }
}

/// Read the header and make sure it looks sane before trusting anything else.
fn validate_header(view: &BoundedView) -> Result<Header> {
    let hdr = view.record::<Header>(0, "header")?;

    if hdr.signature != EXPECTED_DUMP_SIGNATURE {
        return Err(ParseError::BadSignature(hdr.signature));
    }

    if (hdr.flags & !VALID_DUMP_FLAGS) != 0 {
        return Err(ParseError::UnknownFlags(hdr.flags));
    }

    if hdr.number_of_streams == 0 {
        return Err(ParseError::NoStreams);
    }

    Ok(hdr)
}

/// Walk the stream directory, make sure every stream is in bounds, and keep
/// track of where each kind of stream lives.
fn resolve_directory(view: &BoundedView, hdr: &Header) -> Result<Directories> {
    let mut directories = Directories::new();
    let directory_rva = u64::from(hdr.stream_directory_rva);

    for idx in 0..hdr.number_of_streams {
        let slot = directory_rva + u64::from(idx) * Directory::SIZE as u64;
        let directory = view.record::<Directory>(slot, "stream directory entry")?;
        let location = directory.location;

        // Unused streams are checked too, even though they are skipped right
        // after.
        if !view.in_bounds(location.rva.into(), location.data_size.into()) {
            return Err(ParseError::OutOfBounds {
                what: "stream",
                offset: location.rva.into(),
                len: location.data_size.into(),
            });
        }

        let kind = StreamKind::from(directory.stream_type);
        trace!(%kind, rva = location.rva, size = location.data_size, "stream");
        if kind == StreamKind::Unused {
            continue;
        }

        if directories.insert(kind, location).is_some() {
            return Err(ParseError::DuplicateStream(kind));
        }
    }

    Ok(directories)
}

/// Make sure a stream declares at least `minimum` bytes.
fn ensure_stream_size(location: LocationDescriptor32, minimum: u64, what: &'static str) -> Result<()> {
    let found = u64::from(location.data_size);
    if found < minimum {
        return Err(ParseError::SizeMismatch {
            what,
            expected: minimum,
            found,
        });
    }

    Ok(())
}

/// Parse the system info stream to know which architecture is used.
fn parse_system_info(view: &BoundedView, location: LocationDescriptor32) -> Result<SystemInfoStream> {
    ensure_stream_size(location, SystemInfoStream::SIZE as u64, "system info stream")?;
    let system_info = view.record::<SystemInfoStream>(location.rva.into(), "system info stream")?;

    debug!(
        arch = system_info.processor_arch,
        build = system_info.build_number,
        "system info stream"
    );

    Ok(system_info)
}

/// Parse the exception stream to figure out the foreground TID.
fn parse_exception(view: &BoundedView, location: LocationDescriptor32) -> Result<ExceptionStream> {
    ensure_stream_size(location, ExceptionStream::SIZE as u64, "exception stream")?;
    let exception = view.record::<ExceptionStream>(location.rva.into(), "exception stream")?;

    debug!(
        tid = exception.thread_id,
        code = exception.exception_record.exception_code,
        "exception stream"
    );

    Ok(exception)
}

/// Parse the memory info list stream to build the [`MemoryRegions`] map. The
/// regions don't have any data yet.
fn parse_mem_info_list<'a>(
    view: &BoundedView<'a>,
    location: LocationDescriptor32,
) -> Result<MemoryRegions<'a>> {
    ensure_stream_size(location, MemoryInfoListStream::SIZE as u64, "memory info list stream")?;
    let rva = u64::from(location.rva);
    let list = view.record::<MemoryInfoListStream>(rva, "memory info list stream")?;

    // The header and the entries can be bigger than what we know about, but
    // not smaller.
    let size_of_header = u64::from(list.size_of_header);
    if size_of_header < MemoryInfoListStream::SIZE as u64 {
        return Err(ParseError::SizeMismatch {
            what: "memory info list header",
            expected: MemoryInfoListStream::SIZE as u64,
            found: size_of_header,
        });
    }

    let size_of_entry = u64::from(list.size_of_entry);
    if size_of_entry < MemoryInfo::SIZE as u64 {
        return Err(ParseError::SizeMismatch {
            what: "memory info entry",
            expected: MemoryInfo::SIZE as u64,
            found: size_of_entry,
        });
    }

    // The stream has to be exactly the header followed by the entries.
    let declared = u64::from(location.data_size);
    let expected = size_of_entry
        .checked_mul(list.number_of_entries)
        .and_then(|entries| entries.checked_add(size_of_header));
    if expected != Some(declared) {
        return Err(ParseError::SizeMismatch {
            what: "memory info list stream",
            expected: expected.unwrap_or(u64::MAX),
            found: declared,
        });
    }

    let mut memory_regions = MemoryRegions::new();
    let entries = rva + size_of_header;
    for idx in 0..list.number_of_entries {
        let mem_info = view.record::<MemoryInfo>(entries + idx * size_of_entry, "memory info entry")?;
        let key = mem_info.base_address;
        trace!(base = key, size = mem_info.region_size, state = mem_info.state, "region");

        if memory_regions.insert(key, mem_info.into()).is_some() {
            return Err(ParseError::DuplicateRegion(key));
        }
    }

    debug!(regions = memory_regions.len(), "memory info list stream");

    Ok(memory_regions)
}

/// Parse the memory64 list stream to attach data to the regions parsed from
/// the memory info list stream. The data of every range is packed right after
/// the previous one, starting at `base_rva`.
fn parse_mem64_list<'a>(
    view: &BoundedView<'a>,
    location: LocationDescriptor32,
    memory_regions: &mut MemoryRegions<'a>,
) -> Result<()> {
    ensure_stream_size(location, Memory64ListStream::SIZE as u64, "memory64 list stream")?;
    let rva = u64::from(location.rva);
    let list = view.record::<Memory64ListStream>(rva, "memory64 list stream")?;

    // The descriptors have to fit in the stream.
    let declared = u64::from(location.data_size);
    let needed = list
        .number_of_memory_ranges
        .checked_mul(MemoryDescriptor64::SIZE as u64)
        .and_then(|descriptors| descriptors.checked_add(Memory64ListStream::SIZE as u64));
    match needed {
        Some(needed) if needed <= declared => {}
        _ => {
            return Err(ParseError::SizeMismatch {
                what: "memory64 list stream",
                expected: needed.unwrap_or(u64::MAX),
                found: declared,
            })
        }
    }

    let descriptors = rva + Memory64ListStream::SIZE as u64;
    let mut data_offset = list.base_rva;
    for idx in 0..list.number_of_memory_ranges {
        let descriptor = view.record::<MemoryDescriptor64>(
            descriptors + idx * MemoryDescriptor64::SIZE as u64,
            "memory64 descriptor",
        )?;

        let start = descriptor.start_of_memory_range;
        let data = view.slice(data_offset, descriptor.data_size, "memory range data")?;

        let region = memory_regions
            .get_mut(&start)
            .ok_or(ParseError::DanglingRegion(start))?;

        if region.is_free() {
            return Err(ParseError::DataForFreeRegion(start));
        }

        if region.data.is_some() {
            return Err(ParseError::DuplicateRegionData(start));
        }

        trace!(base = start, offset = data_offset, size = descriptor.data_size, "range");
        region.data = Some(data);

        // The slice above is in bounds, so this can't overflow.
        data_offset += descriptor.data_size;
    }

    debug!(ranges = list.number_of_memory_ranges, "memory64 list stream");

    Ok(())
}

/// Parse the module list.
fn parse_module_list<'a>(view: &BoundedView<'a>, location: LocationDescriptor32) -> Result<Modules<'a>> {
    ensure_stream_size(location, ModuleList::SIZE as u64, "module list stream")?;
    let rva = u64::from(location.rva);
    let module_list = view.record::<ModuleList>(rva, "module list stream")?;

    // The stream has to be exactly the count followed by the entries.
    let declared = u64::from(location.data_size);
    let expected = ModuleList::SIZE as u64
        + u64::from(module_list.number_of_modules) * ModuleEntry::SIZE as u64;
    if expected != declared {
        return Err(ParseError::SizeMismatch {
            what: "module list stream",
            expected,
            found: declared,
        });
    }

    let mut modules = Modules::new();
    let entries = rva + ModuleList::SIZE as u64;
    for idx in 0..module_list.number_of_modules {
        let entry = view.record::<ModuleEntry>(
            entries + u64::from(idx) * ModuleEntry::SIZE as u64,
            "module entry",
        )?;

        let name = read_module_name(view, idx, entry.module_name_rva)?;

        // Zero sized records are how a dump says a record is absent.
        let cv = entry.cv_record;
        let cv_record = view.slice(cv.rva.into(), cv.data_size.into(), "module cv record")?;
        let misc = entry.misc_record;
        let misc_record = view.slice(misc.rva.into(), misc.data_size.into(), "module misc record")?;

        let module = Module::new(entry, name, cv_record, misc_record);
        let key = module.base_of_image;
        trace!(base = key, name = %module.name, "module");

        if modules.insert(key, module).is_some() {
            return Err(ParseError::DuplicateModule(key));
        }
    }

    debug!(modules = modules.len(), "module list stream");

    Ok(modules)
}

/// Read the `MINIDUMP_STRING` at `rva`, which is the name of the module
/// `index`.
fn read_module_name(view: &BoundedView, index: u32, rva: u32) -> Result<String> {
    let rva = u64::from(rva);
    let string = view.record::<StringHeader>(rva, "module name length")?;
    let slice = view.slice(
        rva + StringHeader::SIZE as u64,
        string.length.into(),
        "module name",
    )?;

    module_name_from_slice(index, slice)
}

/// Convert a slice of UTF-16 code units into a Rust string. Only printable
/// ASCII characters are accepted.
fn module_name_from_slice(index: u32, slice: &[u8]) -> Result<String> {
    // Every code unit is 2 bytes, so we expect the length to be a multiple of
    // 2.
    if (slice.len() % 2) != 0 {
        return Err(ParseError::OddNameLength {
            index,
            len: slice.len() as u32,
        });
    }

    slice
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .map(|unit| match unit {
            0x20..=0x7e => Ok(char::from(unit as u8)),
            _ => Err(ParseError::NonPrintableName { index, unit }),
        })
        .collect()
}

/// Parse the thread list and decode their contexts according to `arch`.
fn parse_thread_list(
    view: &BoundedView,
    location: LocationDescriptor32,
    arch: Option<ProcessorArch>,
) -> Result<Threads> {
    ensure_stream_size(location, ThreadList::SIZE as u64, "thread list stream")?;
    let rva = u64::from(location.rva);
    let thread_list = view.record::<ThreadList>(rva, "thread list stream")?;

    // The entries have to fit in the stream.
    let declared = u64::from(location.data_size);
    let needed = ThreadList::SIZE as u64
        + u64::from(thread_list.number_of_threads) * ThreadEntry::SIZE as u64;
    if needed > declared {
        return Err(ParseError::SizeMismatch {
            what: "thread list stream",
            expected: needed,
            found: declared,
        });
    }

    let mut threads = Threads::new();
    let entries = rva + ThreadList::SIZE as u64;
    for idx in 0..thread_list.number_of_threads {
        let entry = view.record::<ThreadEntry>(
            entries + u64::from(idx) * ThreadEntry::SIZE as u64,
            "thread entry",
        )?;

        let context = read_thread_context(view, &entry, arch)?;
        let key = entry.thread_id;
        trace!(tid = key, teb = entry.teb, "thread");

        if threads.insert(key, Thread::new(entry, context)).is_some() {
            return Err(ParseError::DuplicateThread(key));
        }
    }

    debug!(threads = threads.len(), "thread list stream");

    Ok(threads)
}

/// Decode the context blob of a thread. The blob is always bounds-checked,
/// but only decoded if the architecture is one we know the context of.
fn read_thread_context(
    view: &BoundedView,
    entry: &ThreadEntry,
    arch: Option<ProcessorArch>,
) -> Result<ThreadContext> {
    let location = entry.thread_context;
    let rva = u64::from(location.rva);
    let found = u64::from(location.data_size);
    view.slice(rva, found, "thread context")?;

    let ensure_fits = |what: &'static str, expected: usize| {
        if found < expected as u64 {
            return Err(ParseError::SizeMismatch {
                what,
                expected: expected as u64,
                found,
            });
        }

        Ok(())
    };

    Ok(match arch {
        Some(ProcessorArch::X86) => {
            ensure_fits("x86 thread context", ThreadContextX86::SIZE)?;
            ThreadContext::X86(Box::new(view.record(rva, "x86 thread context")?))
        }
        Some(ProcessorArch::X64) => {
            ensure_fits("x64 thread context", ThreadContextX64::SIZE)?;
            ThreadContext::X64(Box::new(view.record(rva, "x64 thread context")?))
        }
        _ => ThreadContext::Unknown,
    })
}

#[cfg(test)]
mod tests {
    use core::fmt::Debug;

    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn assert_traits() {
        fn assert_traits_<T: Send + Sync + Debug>() {}
        assert_traits_::<ParsedDump>();
    }

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    #[test]
    fn module_names() {
        let name = r"C:\Windows\System32\ntdll.dll";
        assert_eq!(module_name_from_slice(0, &utf16(name)).unwrap(), name);
        assert_eq!(module_name_from_slice(0, &[]).unwrap(), "");

        let mut odd = utf16("a.dll");
        odd.push(0);
        assert_eq!(
            module_name_from_slice(3, &odd),
            Err(ParseError::OddNameLength { index: 3, len: 11 })
        );

        assert_eq!(
            module_name_from_slice(1, &utf16("a\tb")),
            Err(ParseError::NonPrintableName {
                index: 1,
                unit: 0x9
            })
        );

        // The high byte of a code unit matters too.
        let err = module_name_from_slice(0, &[0x41, 0x01]).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::IllFormedString);
    }

    #[test]
    fn stream_kinds() {
        assert_eq!(StreamKind::from(0), StreamKind::Unused);
        assert_eq!(StreamKind::from(7), StreamKind::SystemInfo);
        assert_eq!(StreamKind::from(16), StreamKind::MemoryInfoList);
        assert_eq!(StreamKind::from(15), StreamKind::Other(15));
        assert_eq!(StreamKind::ModuleList.to_string(), "ModuleList");
    }

    #[test]
    fn region_strings() {
        let region = MemoryRegion {
            base_address: 0x1000,
            region_size: 0x1000,
            state: MEM_COMMIT,
            type_: MEM_IMAGE,
            protect: PAGE_GUARD | PAGE_NOCACHE | PAGE_EXECUTE_READ,
            ..Default::default()
        };

        assert_eq!(region.state_as_str(), "MEM_COMMIT");
        assert_eq!(region.type_as_str(), "MEM_IMAGE");
        assert_eq!(
            region.protect_as_str(),
            "PAGE_GUARD | PAGE_NOCACHE | PAGE_EXECUTE_READ"
        );
        assert!(region.is_readable());
        assert!(region.is_executable());
        assert!(!region.is_writable());

        let free = MemoryRegion {
            state: MEM_FREE,
            type_: MEM_PRIVATE,
            ..Default::default()
        };
        assert_eq!(free.type_as_str(), "");
        assert_eq!(free.protect_as_str(), "");
    }

    #[test]
    fn region_containment() {
        let data = [0xaa; 0x10];
        let region = MemoryRegion {
            base_address: u64::MAX - 0xf,
            region_size: 0x100,
            data: Some(&data),
            ..Default::default()
        };

        // The region pretends to wrap around the address space.
        assert!(region.contains(u64::MAX));
        assert!(!region.contains(0));
        assert_eq!(region.end_addr(), u64::MAX);
        assert_eq!(region.data_from(u64::MAX).unwrap(), &[0xaa]);

        let short = MemoryRegion {
            base_address: 0x1000,
            region_size: 0x1000,
            data: Some(&data),
            ..Default::default()
        };

        // The data stops before the end of the region.
        assert_eq!(short.data_from(0x1008).unwrap().len(), 8);
        assert!(short.data_from(0x1010).is_none());
        assert!(short.data_from(0x2000).is_none());
        assert_eq!(short.data_size(), 0x10);

        let oversized = MemoryRegion {
            base_address: 0x1000,
            region_size: 8,
            data: Some(&data),
            ..Default::default()
        };

        // The data goes past the end of the region.
        assert_eq!(oversized.data_from(0x1000).unwrap().len(), 8);
        assert_eq!(oversized.data_from(0x1004).unwrap().len(), 4);
        assert!(oversized.data_from(0x1008).is_none());
    }

    #[test]
    fn module_helpers() {
        let module = Module::new(
            ModuleEntry {
                base_of_image: 0x7ff0_0000,
                size_of_image: 0x1000,
                ..Default::default()
            },
            r"C:\Windows\System32\kernel32.dll".into(),
            &[],
            &[1, 2],
        );

        assert_eq!(module.file_name(), "kernel32.dll");
        assert!(module.contains(0x7ff0_0fff));
        assert!(!module.contains(0x7ff0_1000));
        assert!(module.cv_record().is_none());
        assert_eq!(module.misc_record().unwrap(), &[1, 2]);
    }
}
