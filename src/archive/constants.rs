//! BSD archive constants.

/// Archive signature at offset 0
pub const ARMAG: &[u8; 8] = b"!<arch>\n";

/// Length of the archive signature
pub const SARMAG: usize = 8;

/// End-of-header marker of every member header
pub const ARFMAG: &[u8; 2] = b"`\n";

/// Prefix of an extended (BSD 4.4) name; the decimal name length follows it
pub const AR_EFMT1: &[u8; 3] = b"#1/";

/// Name of the unsorted symbol directory member
pub const SYMDEF: &str = "__.SYMDEF";

/// Name of the sorted symbol directory member
pub const SYMDEF_SORTED: &str = "__.SYMDEF SORTED";

/// Members start on even offsets; odd payloads carry one pad byte
pub const MEMBER_ALIGNMENT: usize = 2;
