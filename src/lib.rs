// Axel '0vercl0k' Souchet - July 29 2023
#![doc = include_str!("../README.md")]
mod udmp_parser;
pub use udmp_parser::{
    MEM_COMMIT, MEM_FREE, MEM_IMAGE, MEM_MAPPED, MEM_PRIVATE, MEM_RESERVE, PAGE_EXECUTE,
    PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, PAGE_EXECUTE_WRITECOPY, PAGE_GUARD, PAGE_NOACCESS,
    PAGE_NOCACHE, PAGE_READONLY, PAGE_READWRITE, PAGE_WRITECOMBINE, PAGE_WRITECOPY, *,
};

mod error;
pub use error::{ErrorCategory, ParseError, Result};

mod view;
pub use view::{BoundedView, Cursor, Record};

mod structs;
pub use structs::{
    ExceptionRecord, ExceptionStream, FixedFileInfo, FloatingSaveArea32, SystemInfoStream,
    ThreadContextX64, ThreadContextX86,
};
