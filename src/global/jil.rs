//! JIL container format constants.
//!
//! The compiler core does not emit the container file; it produces the data
//! (definitions, CFGs, allocations, literals) sufficient for a back-end to
//! emit it. The constants here define the byte-level contract shared with
//! that back-end, most importantly the type descriptor characters used for
//! method name mangling.

use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;
use strum::Display;

/// file signature "JIL\0"
pub const JIL_FILE_SIGNATURE: u32 = 0x4A49_4C00;

pub const JIL_FILE_VERSION_MAJOR: u16 = 1;
pub const JIL_FILE_VERSION_MINOR: u16 = 0;

/// Constant-pool entry tags.
#[derive(
    Debug, Eq, PartialEq, Copy, Clone, Display, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum ConstantTag {
    Metadata = 1,
    Class = 2,
    Field = 3,
    Method = 4,
    InterfaceMethod = 5,
    String = 6,
    Integer = 7,
    Float = 8,
    Long = 9,
    Double = 10,
    TypeAndName = 11,
    MethodHandle = 12,
    MethodType = 13,
    InvokeDynamic = 14,
}

pub const JIL_TYPE_BYTE: char = 'B';
pub const JIL_TYPE_BOOL: char = 'Z';
pub const JIL_TYPE_CHAR: char = 'C';
pub const JIL_TYPE_SHORT: char = 'S';
pub const JIL_TYPE_INT: char = 'I';
pub const JIL_TYPE_FLOAT: char = 'F';
pub const JIL_TYPE_LONG: char = 'J';
/// `L ClassName ;` — an instance of ClassName
pub const JIL_TYPE_OBJECT: char = 'L';
pub const JIL_TYPE_DOUBLE: char = 'D';
/// one array dimension
pub const JIL_TYPE_ARRAY_DIM: char = '[';
pub const JIL_TYPE_VOID: char = 'V';
