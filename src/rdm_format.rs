//! Parameter data is described by short format strings. Every character describes one field in
//! network byte order:
//!
//! | Code | Field |
//! |------|-------|
//! | `b` | u8 |
//! | `w` | u16 |
//! | `d` | u32 |
//! | `u` | 48 bit uid |
//! | `v` | optional uid, only valid as the last field |
//! | `a` | ascii string of at most 32 bytes, nul or end terminated, only valid as the last field |
//! | `r` | the rest of the parameter data, only valid as the last field |
//! | `#..h` | literal bytes given as hex digits, e.g. `#0100h` |
//! | `$` | the format describes exactly one record |
//!
//! A format without `$` and without a variable length field repeats until the parameter data is
//! exhausted, e.g. `w` describes a list of pids.

use crate::consts::{RDM_MAX_LABEL_LENGTH, RDM_MAX_PARAMETER_DATA_LENGTH};
use crate::types::DataPack;
use crate::unique_identifier::PackageAddress;

pub const MAX_FORMAT_FIELDS: usize = 16;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FormatError {
    /// The format string itself is malformed.
    InvalidFormat,
    /// The data is shorter than the fields of the format.
    DataTooShort,
    /// Bytes are left over after the last record.
    TrailingData,
    /// A literal field didn't match the data.
    LiteralMismatch,
    /// An ascii field is longer than 32 bytes or not valid ascii.
    InvalidAscii,
    /// A value doesn't match the type of its field.
    TypeMismatch,
    /// There are fewer values than fields.
    MissingValue,
    /// There are more values than fields.
    TooManyValues,
    /// The packed data doesn't fit into a single parameter data block.
    BufferFull,
}

impl core::fmt::Display for FormatError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let message = match self {
            FormatError::InvalidFormat => "invalid format string",
            FormatError::DataTooShort => "data is shorter than the format",
            FormatError::TrailingData => "data is longer than the format",
            FormatError::LiteralMismatch => "literal doesn't match",
            FormatError::InvalidAscii => "invalid ascii field",
            FormatError::TypeMismatch => "value doesn't match its field",
            FormatError::MissingValue => "missing value",
            FormatError::TooManyValues => "too many values",
            FormatError::BufferFull => "parameter data is full",
        };

        write!(f, "{}", message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FormatError {}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FormatField<'f> {
    U8,
    U16,
    U32,
    Uid,
    OptionalUid,
    Ascii,
    Rest,
    /// Hex digits without the surrounding `#` and `h`.
    Literal(&'f str),
}

impl FormatField<'_> {
    fn fixed_size(&self) -> usize {
        match self {
            FormatField::U8 => 1,
            FormatField::U16 => 2,
            FormatField::U32 => 4,
            FormatField::Uid => 6,
            FormatField::Literal(hex) => hex.len() / 2,
            FormatField::OptionalUid | FormatField::Ascii | FormatField::Rest => 0,
        }
    }

    fn is_variable(&self) -> bool {
        matches!(
            self,
            FormatField::OptionalUid | FormatField::Ascii | FormatField::Rest
        )
    }

    fn takes_value(&self) -> bool {
        !matches!(self, FormatField::Literal(_))
    }
}

/// A single decoded field. Strings and blobs borrow from the parameter data.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FieldValue<'d> {
    U8(u8),
    U16(u16),
    U32(u32),
    Uid(PackageAddress),
    OptionalUid(Option<PackageAddress>),
    Ascii(&'d str),
    Bytes(&'d [u8]),
}

/// A parsed format string.
#[derive(Debug, Clone)]
pub struct ParameterFormat<'f> {
    fields: heapless::Vec<FormatField<'f>, MAX_FORMAT_FIELDS>,
    singleton: bool,
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

fn literal_bytes(hex: &str) -> impl Iterator<Item = u8> + '_ {
    hex.as_bytes().chunks(2).map(|pair| {
        (hex_value(pair[0]).unwrap_or(0) << 4) | hex_value(pair[1]).unwrap_or(0)
    })
}

fn read_uid(data: &[u8]) -> PackageAddress {
    PackageAddress::from_bytes(data[..6].try_into().unwrap())
}

impl<'f> ParameterFormat<'f> {
    pub fn parse(format: &'f str) -> Result<Self, FormatError> {
        let bytes = format.as_bytes();
        let mut fields: heapless::Vec<FormatField<'f>, MAX_FORMAT_FIELDS> = heapless::Vec::new();
        let mut singleton = false;
        let mut index = 0;

        while index < bytes.len() {
            let field = match bytes[index] {
                b'b' => FormatField::U8,
                b'w' => FormatField::U16,
                b'd' => FormatField::U32,
                b'u' => FormatField::Uid,
                b'v' => FormatField::OptionalUid,
                b'a' => FormatField::Ascii,
                b'r' => FormatField::Rest,
                b'#' => {
                    let end = bytes[index + 1..]
                        .iter()
                        .position(|&byte| byte == b'h')
                        .ok_or(FormatError::InvalidFormat)?
                        + index
                        + 1;
                    let hex = &format[index + 1..end];

                    if hex.is_empty()
                        || hex.len() % 2 != 0
                        || hex.bytes().any(|digit| hex_value(digit).is_none())
                    {
                        return Err(FormatError::InvalidFormat);
                    }

                    index = end;
                    FormatField::Literal(hex)
                },
                b'$' => {
                    if index != bytes.len() - 1 {
                        return Err(FormatError::InvalidFormat);
                    }

                    singleton = true;
                    index += 1;
                    continue;
                },
                _ => return Err(FormatError::InvalidFormat),
            };

            if fields.last().is_some_and(FormatField::is_variable) {
                return Err(FormatError::InvalidFormat);
            }

            fields.push(field).map_err(|_| FormatError::InvalidFormat)?;
            index += 1;
        }

        if fields.last().is_some_and(FormatField::is_variable)
            || !fields.iter().any(FormatField::takes_value)
        {
            singleton = true;
        }

        let format = Self { fields, singleton };
        if format.fixed_size() > RDM_MAX_PARAMETER_DATA_LENGTH {
            return Err(FormatError::InvalidFormat);
        }

        Ok(format)
    }

    pub fn fields(&self) -> &[FormatField<'f>] {
        &self.fields
    }

    /// Returns true if the format describes exactly one record.
    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    /// The smallest amount of bytes of a single record.
    pub fn fixed_size(&self) -> usize {
        self.fields.iter().map(FormatField::fixed_size).sum()
    }

    /// Returns the size of a record if every record has the same size.
    pub fn exact_size(&self) -> Option<usize> {
        if self.singleton && !self.fields.iter().any(FormatField::is_variable) {
            Some(self.fixed_size())
        } else {
            None
        }
    }

    /// Consumes one field from the start of `data` and returns the amount of bytes used.
    fn field_len(field: &FormatField, data: &[u8]) -> Result<usize, FormatError> {
        match field {
            FormatField::OptionalUid => match data.len() {
                0 => Ok(0),
                6 => Ok(6),
                length if length < 6 => Err(FormatError::DataTooShort),
                _ => Err(FormatError::TrailingData),
            },
            FormatField::Ascii => {
                let label_end = data.iter().position(|&byte| byte == 0).unwrap_or(data.len());

                if label_end > RDM_MAX_LABEL_LENGTH || !data[..label_end].is_ascii() {
                    return Err(FormatError::InvalidAscii);
                }

                Ok(data.len())
            },
            FormatField::Rest => Ok(data.len()),
            FormatField::Literal(hex) => {
                let size = field.fixed_size();
                if data.len() < size {
                    return Err(FormatError::DataTooShort);
                }

                if !literal_bytes(hex).eq(data[..size].iter().copied()) {
                    return Err(FormatError::LiteralMismatch);
                }

                Ok(size)
            },
            _ => {
                let size = field.fixed_size();
                if data.len() < size {
                    return Err(FormatError::DataTooShort);
                }

                Ok(size)
            },
        }
    }

    /// Checks that `data` matches the format and returns the amount of records.
    pub fn validate(&self, data: &[u8]) -> Result<usize, FormatError> {
        if self.fields.is_empty() || (!self.singleton && data.is_empty()) {
            return if data.is_empty() {
                Ok(0)
            } else {
                Err(FormatError::TrailingData)
            };
        }

        let mut offset = 0;
        let mut records = 0;

        loop {
            for field in self.fields.iter() {
                offset += Self::field_len(field, &data[offset..])?;
            }
            records += 1;

            if self.singleton || offset == data.len() {
                break;
            }
        }

        if offset != data.len() {
            return Err(FormatError::TrailingData);
        }

        Ok(records)
    }

    /// Validates `data` and returns an iterator over the decoded values. Literal fields are
    /// checked but not yielded.
    pub fn unpack<'a, 'd>(&'a self, data: &'d [u8]) -> Result<Unpacked<'a, 'f, 'd>, FormatError> {
        let records = self.validate(data)?;

        Ok(Unpacked {
            fields: &self.fields,
            data,
            offset: 0,
            slot: 0,
            slots: records * self.fields.len(),
        })
    }

    /// Packs `values` into `out` and returns the amount of bytes written. Literal fields don't
    /// take a value. On error `out` is left unchanged.
    pub fn pack(&self, values: &[FieldValue], out: &mut DataPack) -> Result<usize, FormatError> {
        let initial_length = out.len();
        let result = self.pack_records(values, out);

        if result.is_err() {
            out.truncate(initial_length);
        }

        result.map(|_| out.len() - initial_length)
    }

    fn pack_records(&self, values: &[FieldValue], out: &mut DataPack) -> Result<(), FormatError> {
        if !self.singleton && values.is_empty() {
            return Ok(());
        }

        let mut values = values.iter();

        loop {
            for field in self.fields.iter() {
                if let FormatField::Literal(hex) = field {
                    for byte in literal_bytes(hex) {
                        out.push(byte).map_err(|_| FormatError::BufferFull)?;
                    }
                    continue;
                }

                let value = values.next().ok_or(FormatError::MissingValue)?;
                Self::pack_field(field, value, out)?;
            }

            if self.singleton || values.len() == 0 {
                break;
            }
        }

        if values.len() != 0 {
            return Err(FormatError::TooManyValues);
        }

        Ok(())
    }

    fn pack_field(
        field: &FormatField,
        value: &FieldValue,
        out: &mut DataPack,
    ) -> Result<(), FormatError> {
        let result = match (field, value) {
            (FormatField::U8, FieldValue::U8(value)) => out.push(*value).map_err(|_| ()),
            (FormatField::U16, FieldValue::U16(value)) => out.extend_from_slice(&value.to_be_bytes()),
            (FormatField::U32, FieldValue::U32(value)) => out.extend_from_slice(&value.to_be_bytes()),
            (FormatField::Uid, FieldValue::Uid(address)) => {
                out.extend_from_slice(&address.to_bytes())
            },
            (FormatField::OptionalUid, FieldValue::OptionalUid(address)) => match address {
                Some(address) => out.extend_from_slice(&address.to_bytes()),
                None => Ok(()),
            },
            (FormatField::Ascii, FieldValue::Ascii(label)) => {
                if label.len() > RDM_MAX_LABEL_LENGTH || !label.is_ascii() {
                    return Err(FormatError::InvalidAscii);
                }

                out.extend_from_slice(label.as_bytes())
            },
            (FormatField::Rest, FieldValue::Bytes(bytes)) => out.extend_from_slice(bytes),
            _ => return Err(FormatError::TypeMismatch),
        };

        result.map_err(|_| FormatError::BufferFull)
    }
}

/// Iterator returned by [ParameterFormat::unpack].
pub struct Unpacked<'a, 'f, 'd> {
    fields: &'a [FormatField<'f>],
    data: &'d [u8],
    offset: usize,
    slot: usize,
    slots: usize,
}

impl<'d> Iterator for Unpacked<'_, '_, 'd> {
    type Item = FieldValue<'d>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.slot < self.slots {
            let field = &self.fields[self.slot % self.fields.len()];
            self.slot += 1;

            let data = &self.data[self.offset..];
            let length = ParameterFormat::field_len(field, data).ok()?;
            self.offset += length;

            let value = match field {
                FormatField::U8 => FieldValue::U8(data[0]),
                FormatField::U16 => FieldValue::U16(u16::from_be_bytes([data[0], data[1]])),
                FormatField::U32 => {
                    FieldValue::U32(u32::from_be_bytes(data[..4].try_into().unwrap()))
                },
                FormatField::Uid => FieldValue::Uid(read_uid(data)),
                FormatField::OptionalUid => {
                    FieldValue::OptionalUid((length == 6).then(|| read_uid(data)))
                },
                FormatField::Ascii => {
                    let label_end = data.iter().position(|&byte| byte == 0).unwrap_or(length);
                    FieldValue::Ascii(core::str::from_utf8(&data[..label_end]).unwrap_or_default())
                },
                FormatField::Rest => FieldValue::Bytes(data),
                FormatField::Literal(_) => continue,
            };

            return Some(value);
        }

        None
    }
}
