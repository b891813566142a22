pub const DMX_NULL_START: u8 = 0x00;
/// start code + 512 byte package
pub const DMX_MAX_PACKAGE_SIZE: usize = 513;
pub const SC_RDM: u8 = 0xCC;
pub const SC_SUB_MESSAGE: u8 = 0x01;

pub const PREAMBLE_BYTE: u8 = 0xFE;
pub const SEPARATOR_BYTE: u8 = 0xAA;
/// Maximum amount of preamble bytes in front of a discovery response.
pub const MAX_PREAMBLE_LENGTH: usize = 7;

pub const BROADCAST_UID: u64 = 0xFFFF_FFFFFFFF;
/// The highest uid a device can have.
pub const MAX_DEVICE_UID: u64 = 0xFFFF_FFFFFFFE;

pub const DMX_BAUD: u32 = 250_000;
pub const DMX_MIN_BAUD: u32 = 245_000;
pub const DMX_MAX_BAUD: u32 = 255_000;

/// Default transmitted break.
pub const BREAK_MICROS: u32 = 176;
/// Default transmitted mark after break.
pub const MAB_MICROS: u32 = 12;
/// The shortest break a transmitter may put on the wire.
pub const MIN_BREAK_MICROS: u32 = 92;
pub const MIN_MAB_MICROS: u32 = 12;
pub const MAX_MAB_MICROS: u32 = 999_999;
/// Longest allowed time between two breaks before a new break has to be forced.
pub const MAX_BREAK_TO_BREAK_MICROS: u32 = 1_250_000;

/// Time a controller waits for the first byte of a response.
pub const RDM_RESPONSE_TIMEOUT_MICROS: u32 = 2_800;
/// Time a controller waits for a pending transmission or a full transaction.
pub const RDM_TRANSACTION_TIMEOUT_MICROS: u32 = 23_000;
/// Minimum time between the end of a request and the start of its response.
pub const RDM_RESPONDER_TURNAROUND_MICROS: u32 = 176;
/// Inter-slot gap after which a received frame is considered complete.
pub const RX_IDLE_TIMEOUT_MICROS: u32 = 2_000;

pub const RDM_MIN_PACKAGE_SIZE: usize = 26;
pub const RDM_MAX_PACKAGE_SIZE: usize = 257;
/// Size of all header fields, message length excludes the checksum.
pub const RDM_HEADER_SIZE: usize = 24;
/// Excluding preamble and separator
pub const RDM_DISCOVERY_RESPONSE_SIZE: usize = 16;
/// Including 7 bytes preamble + 1 byte separator
pub const RDM_MAX_DISCOVERY_RESPONSE_SIZE: usize = RDM_DISCOVERY_RESPONSE_SIZE + 8;

pub const RDM_MAX_PARAMETER_DATA_LENGTH: usize = 231;
pub const RDM_MAX_STATUS_PACKAGES_PER_REQUEST: usize = 25;
pub const RDM_STATUS_MESSAGE_SIZE: usize = 9;
pub const RDM_DEVICE_INFO_SIZE: usize = 0x13;
pub const RDM_MAX_LABEL_LENGTH: usize = 32;

pub const RDM_MAX_SUPPORTED_PARAMETERS_PER_REQUEST: usize = 115;

pub const RDM_SUB_DEVICE_ROOT: u16 = 0x0000;
pub const RDM_SUB_DEVICE_MAX: u16 = 0x0200;
pub const RDM_SUB_DEVICE_ALL: u16 = 0xFFFF;

pub const RDM_PROTOCOL_VERSION: u16 = 0x01_00;
