//! Enumerations and flag sets carried as words on the SANE wire.

use bitflags::bitflags;
use std::fmt;

/// Remote procedure opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Command {
    /// Open the session and negotiate the version
    Initialize = 0,
    /// List the devices known to the daemon
    GetDevices = 1,
    /// Open a device by name
    Open = 2,
    /// Close a device handle
    Close = 3,
    /// Fetch the option descriptors of a handle
    GetOptionDescriptors = 4,
    /// Get, set or automate an option value
    ControlOption = 5,
    /// Fetch the frame parameters of the next acquisition
    GetParameters = 6,
    /// Start a frame and obtain its data port
    Start = 7,
    /// Cancel the running acquisition
    Cancel = 8,
    /// Answer a resource challenge
    Authorize = 9,
    /// Shut the session down
    Exit = 10,
}

impl Command {
    /// Word value sent on the wire
    pub fn word(self) -> i32 {
        self as i32
    }
}

/// Status codes returned by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Operation completed normally
    Success,
    /// Operation is not supported
    Unsupported,
    /// Operation was cancelled
    Canceled,
    /// Device is busy, try again later
    DeviceBusy,
    /// Data or argument is invalid
    Invalid,
    /// No more data available
    EndOfFile,
    /// Document feeder jammed
    Jammed,
    /// Document feeder out of documents
    NoDocuments,
    /// Scanner cover is open
    CoverOpen,
    /// Error during device I/O
    IoError,
    /// Out of memory
    OutOfMemory,
    /// Access to resource has been denied
    AccessDenied,
    /// Any status word outside the documented set
    Unknown(i32),
}

impl Status {
    /// Decodes a status word
    pub fn from_word(word: i32) -> Self {
        match word {
            0 => Status::Success,
            1 => Status::Unsupported,
            2 => Status::Canceled,
            3 => Status::DeviceBusy,
            4 => Status::Invalid,
            5 => Status::EndOfFile,
            6 => Status::Jammed,
            7 => Status::NoDocuments,
            8 => Status::CoverOpen,
            9 => Status::IoError,
            10 => Status::OutOfMemory,
            11 => Status::AccessDenied,
            other => Status::Unknown(other),
        }
    }

    /// Numeric status code
    pub fn code(self) -> i32 {
        match self {
            Status::Success => 0,
            Status::Unsupported => 1,
            Status::Canceled => 2,
            Status::DeviceBusy => 3,
            Status::Invalid => 4,
            Status::EndOfFile => 5,
            Status::Jammed => 6,
            Status::NoDocuments => 7,
            Status::CoverOpen => 8,
            Status::IoError => 9,
            Status::OutOfMemory => 10,
            Status::AccessDenied => 11,
            Status::Unknown(code) => code,
        }
    }

    /// Human-readable description
    pub fn message(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Unsupported => "operation not supported",
            Status::Canceled => "operation was cancelled",
            Status::DeviceBusy => "device busy",
            Status::Invalid => "invalid argument",
            Status::EndOfFile => "no more data available",
            Status::Jammed => "document feeder jammed",
            Status::NoDocuments => "document feeder out of documents",
            Status::CoverOpen => "scanner cover is open",
            Status::IoError => "error during device I/O",
            Status::OutOfMemory => "out of memory",
            Status::AccessDenied => "access to resource has been denied",
            Status::Unknown(_) => "unknown status",
        }
    }

    /// Returns true for [`Status::Success`]
    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message(), self.code())
    }
}

/// Option value type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ValueType {
    /// Boolean word (0 or 1)
    Boolean = 0,
    /// Signed 32-bit integer
    Integer = 1,
    /// 16.16 fixed-point number
    Fixed = 2,
    /// NUL-terminated string
    String = 3,
    /// Action with no value
    Button = 4,
    /// Grouping marker, carries no value
    Group = 5,
}

impl ValueType {
    /// Word value sent on the wire
    pub fn word(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for ValueType {
    type Error = crate::Error;

    fn try_from(value: i32) -> crate::Result<Self> {
        match value {
            0 => Ok(ValueType::Boolean),
            1 => Ok(ValueType::Integer),
            2 => Ok(ValueType::Fixed),
            3 => Ok(ValueType::String),
            4 => Ok(ValueType::Button),
            5 => Ok(ValueType::Group),
            other => Err(crate::Error::UnsupportedValueType(other)),
        }
    }
}

/// Physical unit of an option value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Unit {
    /// Unit-less (e.g. page count)
    #[default]
    None,
    /// Pixels
    Pixel,
    /// Bits
    Bit,
    /// Millimetres
    Millimeter,
    /// Dots per inch
    Dpi,
    /// Percentage
    Percent,
    /// Microseconds
    Microsecond,
    /// Unit word outside the documented set
    Other(i32),
}

impl Unit {
    /// Decodes a unit word
    pub fn from_word(word: i32) -> Self {
        match word {
            0 => Unit::None,
            1 => Unit::Pixel,
            2 => Unit::Bit,
            3 => Unit::Millimeter,
            4 => Unit::Dpi,
            5 => Unit::Percent,
            6 => Unit::Microsecond,
            other => Unit::Other(other),
        }
    }

    /// Short suffix for display
    pub fn suffix(self) -> &'static str {
        match self {
            Unit::None | Unit::Other(_) => "",
            Unit::Pixel => "px",
            Unit::Bit => "bit",
            Unit::Millimeter => "mm",
            Unit::Dpi => "dpi",
            Unit::Percent => "%",
            Unit::Microsecond => "us",
        }
    }
}

bitflags! {
    /// Capability flags of an option descriptor
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: i32 {
        /// Settable through a control-option call
        const SOFT_SELECT = 1;
        /// Settable only by user intervention on the device
        const HARD_SELECT = 2;
        /// Readable by software
        const SOFT_DETECT = 4;
        /// Emulated by the backend rather than the device
        const EMULATED = 8;
        /// Backend can pick a value automatically
        const AUTOMATIC = 16;
        /// Option is currently inactive
        const INACTIVE = 32;
        /// Advanced-user option
        const ADVANCED = 64;
    }
}

bitflags! {
    /// Information bits returned by a control-option call
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OptionInfo: i32 {
        /// The applied value differs from the requested one
        const INEXACT = 1;
        /// Every option descriptor must be reloaded
        const RELOAD_OPTIONS = 2;
        /// Scan parameters may have changed
        const RELOAD_PARAMETERS = 4;
    }
}

/// Action requested from a control-option call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OptionAction {
    /// Read the current value
    Get = 0,
    /// Write a value
    Set = 1,
    /// Let the backend choose
    Automatic = 2,
}

impl OptionAction {
    /// Word value sent on the wire
    pub fn word(self) -> i32 {
        self as i32
    }
}

/// Constraint tag of an option descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ConstraintKind {
    /// Unconstrained
    None = 0,
    /// Numeric range with quantization
    Range = 1,
    /// List of permitted words
    WordList = 2,
    /// List of permitted strings
    StringList = 3,
}

impl TryFrom<i32> for ConstraintKind {
    type Error = crate::Error;

    fn try_from(value: i32) -> crate::Result<Self> {
        match value {
            0 => Ok(ConstraintKind::None),
            1 => Ok(ConstraintKind::Range),
            2 => Ok(ConstraintKind::WordList),
            3 => Ok(ConstraintKind::StringList),
            other => Err(crate::Error::UnsupportedConstraint(other)),
        }
    }
}

/// Layout of one acquired frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Single gray band
    Gray,
    /// Pixel-interleaved red/green/blue
    Rgb,
    /// Red plane of a three-pass acquisition
    Red,
    /// Green plane of a three-pass acquisition
    Green,
    /// Blue plane of a three-pass acquisition
    Blue,
    /// Format word outside the documented set
    Unknown(i32),
}

impl FrameFormat {
    /// Decodes a frame-format word
    pub fn from_word(word: i32) -> Self {
        match word {
            0 => FrameFormat::Gray,
            1 => FrameFormat::Rgb,
            2 => FrameFormat::Red,
            3 => FrameFormat::Green,
            4 => FrameFormat::Blue,
            other => FrameFormat::Unknown(other),
        }
    }

    /// Returns true when one frame holds the whole image
    pub fn is_complete_image(self) -> bool {
        matches!(self, FrameFormat::Gray | FrameFormat::Rgb)
    }

    /// Returns true for anything but gray frames
    pub fn is_color(self) -> bool {
        self != FrameFormat::Gray
    }
}

/// A SANE version code split into its parts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SaneVersion {
    /// Major version (bits 24..32)
    pub major: u8,
    /// Minor version (bits 16..24)
    pub minor: u8,
    /// Build number (bits 0..16)
    pub build: u16,
}

impl SaneVersion {
    /// Version announced by this client
    pub const CLIENT: SaneVersion = SaneVersion::new(1, 0, 3);

    /// Creates a version from its parts
    pub const fn new(major: u8, minor: u8, build: u16) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }

    /// Packs the version into a wire word
    pub fn code(self) -> i32 {
        ((self.major as i32) << 24) | ((self.minor as i32) << 16) | self.build as i32
    }

    /// Unpacks a wire word
    pub fn from_code(code: i32) -> Self {
        Self {
            major: ((code >> 24) & 0xff) as u8,
            minor: ((code >> 16) & 0xff) as u8,
            build: (code & 0xffff) as u16,
        }
    }
}

impl fmt::Display for SaneVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}
