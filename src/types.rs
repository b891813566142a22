use crate::consts::RDM_MAX_PARAMETER_DATA_LENGTH;

pub type DataPack = heapless::Vec<u8, RDM_MAX_PARAMETER_DATA_LENGTH>;

/// Response status of a rdm package
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ResponseType {
    /// The request was acknowledged.
    ResponseTypeAck = 0x00,
    /// The request was acknowledged but the result isn't ready yet.
    ResponseTypeAckTimer = 0x01,
    /// The request was not acknowledged.
    ResponseTypeNackReason = 0x02,
    /// The request was acknowledged but the response does not fit into a single responds.
    ResponseTypeAckOverflow = 0x03,
}

impl TryFrom<u8> for ResponseType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        Ok(match value {
            0x00 => Self::ResponseTypeAck,
            0x01 => Self::ResponseTypeAckTimer,
            0x02 => Self::ResponseTypeNackReason,
            0x03 => Self::ResponseTypeAckOverflow,
            _ => {
                return Err(());
            },
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum NackReason {
    UnknownPid = 0x0000,
    FormatError = 0x0001,
    HardwareFault = 0x0002,
    ProxyReject = 0x0003,
    WriteProtect = 0x0004,
    UnsupportedCommandClass = 0x0005,
    DataOutOfRange = 0x0006,
    BufferFull = 0x0007,
    PacketSizeUnsupported = 0x0008,
    SubDeviceOutOfRange = 0x0009,
    ProxyBufferFull = 0x000A,
}

impl NackReason {
    pub fn serialize(&self) -> DataPack {
        DataPack::from_slice(&(*self as u16).to_be_bytes()).unwrap()
    }
}

impl core::fmt::Display for NackReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let reason = match self {
            NackReason::UnknownPid => "unknown pid",
            NackReason::FormatError => "format error",
            NackReason::HardwareFault => "hardware fault",
            NackReason::ProxyReject => "proxy reject",
            NackReason::WriteProtect => "write protect",
            NackReason::UnsupportedCommandClass => "unsupported command class",
            NackReason::DataOutOfRange => "data out of range",
            NackReason::BufferFull => "buffer full",
            NackReason::PacketSizeUnsupported => "packet size unsupported",
            NackReason::SubDeviceOutOfRange => "sub device out of range",
            NackReason::ProxyBufferFull => "proxy buffer full",
        };

        write!(f, "{}", reason)
    }
}

impl TryFrom<u16> for NackReason {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, ()> {
        match value {
            0x0000 => Ok(Self::UnknownPid),
            0x0001 => Ok(Self::FormatError),
            0x0002 => Ok(Self::HardwareFault),
            0x0003 => Ok(Self::ProxyReject),
            0x0004 => Ok(Self::WriteProtect),
            0x0005 => Ok(Self::UnsupportedCommandClass),
            0x0006 => Ok(Self::DataOutOfRange),
            0x0007 => Ok(Self::BufferFull),
            0x0008 => Ok(Self::PacketSizeUnsupported),
            0x0009 => Ok(Self::SubDeviceOutOfRange),
            0x000A => Ok(Self::ProxyBufferFull),
            _ => Err(()),
        }
    }
}

/// The data type of a parameter as advertised in its description.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DataType {
    NotDefined = 0x00,
    BitField = 0x01,
    Ascii = 0x02,
    UnsignedByte = 0x03,
    SignedByte = 0x04,
    UnsignedWord = 0x05,
    SignedWord = 0x06,
    UnsignedDWord = 0x07,
    SignedDWord = 0x08,
}

impl DataType {
    /// Returns the width in bytes if the data type is a single number.
    pub fn numeric_width(&self) -> Option<usize> {
        match self {
            DataType::UnsignedByte | DataType::SignedByte => Some(1),
            DataType::UnsignedWord | DataType::SignedWord => Some(2),
            DataType::UnsignedDWord | DataType::SignedDWord => Some(4),
            _ => None,
        }
    }

    /// Reads a big endian number of this data type. Returns None if the data type isn't numeric
    /// or the buffer has the wrong size.
    pub fn read_numeric(&self, data: &[u8]) -> Option<i64> {
        if Some(data.len()) != self.numeric_width() {
            return None;
        }

        Some(match self {
            DataType::UnsignedByte => data[0] as i64,
            DataType::SignedByte => data[0] as i8 as i64,
            DataType::UnsignedWord => u16::from_be_bytes([data[0], data[1]]) as i64,
            DataType::SignedWord => i16::from_be_bytes([data[0], data[1]]) as i64,
            DataType::UnsignedDWord => u32::from_be_bytes(data.try_into().unwrap()) as i64,
            DataType::SignedDWord => i32::from_be_bytes(data.try_into().unwrap()) as i64,
            _ => return None,
        })
    }
}

/// Si unit of a parameter. Only used for describing parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Units {
    None = 0x00,
    Centigrade = 0x01,
    VoltsDc = 0x02,
    VoltsAcPeak = 0x03,
    VoltsAcRms = 0x04,
    AmpereDc = 0x05,
    Hertz = 0x08,
    Watt = 0x0B,
    Seconds = 0x15,
}

/// Si prefix of a parameter. Only used for describing parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Prefix {
    None = 0x00,
    Deci = 0x01,
    Centi = 0x02,
    Milli = 0x03,
    Micro = 0x04,
    Kilo = 0x13,
    Mega = 0x14,
}
