use crate::command_class::{RequestCommandClass, ResponseCommandClass};
use crate::consts::{
    MAX_PREAMBLE_LENGTH, PREAMBLE_BYTE, RDM_DISCOVERY_RESPONSE_SIZE, RDM_HEADER_SIZE,
    RDM_MAX_PACKAGE_SIZE, RDM_MIN_PACKAGE_SIZE, SC_RDM, SC_SUB_MESSAGE, SEPARATOR_BYTE,
};
use crate::layouts::rdm_request_layout;
use crate::types::{DataPack, ResponseType};
use crate::unique_identifier::{PackageAddress, UniqueIdentifier};
use crate::utils::{calculate_checksum, decode_disc_unique};

/// Binary representation of an RDM package.
pub type BinaryRdmPackage = heapless::Vec<u8, RDM_MAX_PACKAGE_SIZE>;

/// Error that gets raised when attempting to convert an [RdmRequestData] object
/// to a [RdmResponseData] object that contains a broadcast destination address.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IsBroadcastError;

impl core::fmt::Display for IsBroadcastError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "tried to convert broadcast request to response")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for IsBroadcastError {}

/// An RDM Request package that does not have its parameter data deserialized.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RdmRequestData {
    pub destination_uid: PackageAddress,
    pub source_uid: UniqueIdentifier,
    pub transaction_number: u8,
    pub port_id: u8,
    pub message_count: u8,
    pub sub_device: u16,
    pub command_class: RequestCommandClass,
    pub parameter_id: u16,
    pub parameter_data: DataPack,
}

impl RdmRequestData {
    pub fn build_response(
        &self,
        response_type: ResponseType,
        response: DataPack,
        message_count: u8,
    ) -> Result<RdmResponseData, IsBroadcastError> {
        self.build_response_from(
            match self.destination_uid {
                PackageAddress::Device(uid) => uid,
                _ => return Err(IsBroadcastError),
            },
            response_type,
            response,
            message_count,
        )
    }

    /// Builds a response with an explicit source uid. Used for answering requests that were
    /// addressed to a broadcast but still require an answer.
    pub fn build_response_from(
        &self,
        own_uid: UniqueIdentifier,
        response_type: ResponseType,
        response: DataPack,
        message_count: u8,
    ) -> Result<RdmResponseData, IsBroadcastError> {
        Ok(RdmResponseData {
            destination_uid: PackageAddress::Device(self.source_uid),
            source_uid: own_uid,
            transaction_number: self.transaction_number,
            response_type,
            message_count,
            sub_device: self.sub_device,
            command_class: self.command_class.get_response_class(),
            parameter_id: self.parameter_id,
            parameter_data: response,
        })
    }
}

/// An RDM Response package that does not have its parameter data deserialized.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RdmResponseData {
    pub destination_uid: PackageAddress,
    pub source_uid: UniqueIdentifier,
    pub transaction_number: u8,
    pub response_type: ResponseType,
    pub message_count: u8,
    pub sub_device: u16,
    pub command_class: ResponseCommandClass,
    pub parameter_id: u16,
    pub parameter_data: DataPack,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RdmDeserializationError {
    /// Buffer must be at least 26 bytes
    BufferTooSmall,
    /// Buffer must be at most 257 bytes
    BufferTooBig,
    /// The command class was not found; contains contents of command class field
    CommandClassNotFound(u8),
    /// The response type was not found; contains contents of response type field
    ResponseTypeNotFound(u8),
    /// The message length field is incorrect; contains result of parsing
    WrongMessageLength(usize),
    /// Wrong checksum
    WrongChecksum,
    /// Received wrong start code (0xCC) or sub start code (0x01)
    WrongStartCode,
    /// The source uid is a broadcast address.
    SourceUidIsBroadcast,
    /// The parameter data length field doesn't match the message length.
    ParameterDataTooLong(u8),
}

impl core::fmt::Display for RdmDeserializationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RdmDeserializationError::BufferTooSmall => write!(f, "buffer too small"),
            RdmDeserializationError::BufferTooBig => write!(f, "buffer to big"),
            RdmDeserializationError::CommandClassNotFound(command_class) => {
                write!(f, "command class {} not found", command_class)
            },
            RdmDeserializationError::ResponseTypeNotFound(response_type) => {
                write!(f, "response type {} is unknown", response_type)
            },
            RdmDeserializationError::WrongMessageLength(message_length) => {
                write!(f, "message length {} is incorrect", message_length)
            },
            RdmDeserializationError::WrongChecksum => write!(f, "checksum is incorrect"),
            RdmDeserializationError::WrongStartCode => write!(f, "start code is incorrect"),
            RdmDeserializationError::SourceUidIsBroadcast => write!(f, "source uid is a broadcast"),
            RdmDeserializationError::ParameterDataTooLong(parameter_data_length) => write!(
                f,
                "parameter data length {} doesn't match the message",
                parameter_data_length
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RdmDeserializationError {}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RdmData {
    Request(RdmRequestData),
    Response(RdmResponseData),
}

impl RdmData {
    pub fn deserialize(buf: &[u8]) -> Result<Self, RdmDeserializationError> {
        deserialize_rdm_data(buf)
    }

    pub fn serialize(&self) -> BinaryRdmPackage {
        let mut dst = [0u8; RDM_MAX_PACKAGE_SIZE];
        let total_package_length = serialize_rdm_data_into(self, &mut dst);

        heapless::Vec::from_slice(&dst[..total_package_length]).unwrap()
    }

    /// Length of the package on the wire including the checksum.
    pub fn encoded_len(&self) -> usize {
        let parameter_data_length = match self {
            RdmData::Request(request) => request.parameter_data.len(),
            RdmData::Response(response) => response.parameter_data.len(),
        };

        RDM_HEADER_SIZE + parameter_data_length + 2
    }
}

/// Deserialize rdm data.
/// Buffer must be between 26 and 257 bytes.
pub fn deserialize_rdm_data(buffer: &[u8]) -> Result<RdmData, RdmDeserializationError> {
    let buffer_size = buffer.len();

    if buffer_size < RDM_MIN_PACKAGE_SIZE {
        return Err(RdmDeserializationError::BufferTooSmall);
    }

    if buffer_size > RDM_MAX_PACKAGE_SIZE {
        return Err(RdmDeserializationError::BufferTooBig);
    }

    let request_data_view = rdm_request_layout::View::new(buffer);

    if request_data_view.start_code().read() != SC_RDM
        || request_data_view.sub_start_code().read() != SC_SUB_MESSAGE
    {
        return Err(RdmDeserializationError::WrongStartCode);
    }

    // message length excludes the checksum
    let message_length = request_data_view.message_length().read() as usize;
    if message_length != buffer_size - 2 {
        return Err(RdmDeserializationError::WrongMessageLength(message_length));
    }

    let expected_checksum = calculate_checksum(&buffer[..message_length]);
    let actual_checksum = u16::from_be_bytes(
        buffer[message_length..message_length + 2]
            .try_into()
            .unwrap(),
    );

    if expected_checksum != actual_checksum {
        return Err(RdmDeserializationError::WrongChecksum);
    }

    let parameter_data_length = request_data_view.parameter_data_length().read();
    if parameter_data_length as usize + RDM_HEADER_SIZE != message_length {
        return Err(RdmDeserializationError::ParameterDataTooLong(
            parameter_data_length,
        ));
    }

    let parameter_data_and_checksum = request_data_view.parameter_data_and_checksum();
    let parameter_data =
        DataPack::from_slice(&parameter_data_and_checksum[..parameter_data_length as usize])
            .map_err(|_| RdmDeserializationError::BufferTooBig)?;

    let source_uid = match PackageAddress::from_bytes(request_data_view.source_uid()) {
        PackageAddress::Device(device_uid) => device_uid,
        _ => return Err(RdmDeserializationError::SourceUidIsBroadcast),
    };
    let destination_uid = PackageAddress::from_bytes(request_data_view.destination_uid());

    let command_class_field = request_data_view.command_class().read();
    let rdm_data = if let Ok(command_class) = RequestCommandClass::try_from(command_class_field) {
        RdmData::Request(RdmRequestData {
            destination_uid,
            source_uid,
            transaction_number: request_data_view.transaction_number().read(),
            port_id: request_data_view.port_id_response_type().read(),
            message_count: request_data_view.message_count().read(),
            sub_device: request_data_view.sub_device().read(),
            command_class,
            parameter_id: request_data_view.parameter_id().read(),
            parameter_data,
        })
    } else {
        let command_class = ResponseCommandClass::try_from(command_class_field)
            .map_err(|_| RdmDeserializationError::CommandClassNotFound(command_class_field))?;

        let response_type_field = request_data_view.port_id_response_type().read();
        let response_type = response_type_field
            .try_into()
            .map_err(|_| RdmDeserializationError::ResponseTypeNotFound(response_type_field))?;

        RdmData::Response(RdmResponseData {
            destination_uid,
            source_uid,
            transaction_number: request_data_view.transaction_number().read(),
            response_type,
            message_count: request_data_view.message_count().read(),
            sub_device: request_data_view.sub_device().read(),
            command_class,
            parameter_id: request_data_view.parameter_id().read(),
            parameter_data,
        })
    };

    Ok(rdm_data)
}

/// Serializes RDM data into `dst` and returns the amount of bytes written including the
/// checksum. `dst` has to hold at least [RdmData::encoded_len] bytes.
pub fn serialize_rdm_data_into(rdm_data: &RdmData, dst: &mut [u8]) -> usize {
    let total_package_length = rdm_data.encoded_len();
    let message_length = total_package_length - 2;
    let mut memory_view = rdm_request_layout::View::new(&mut dst[..total_package_length]);

    memory_view.start_code_mut().write(SC_RDM);
    memory_view.sub_start_code_mut().write(SC_SUB_MESSAGE);
    memory_view
        .message_length_mut()
        .write(message_length as u8);

    let (destination_uid, source_uid, transaction_number, port_id_response_type) = match rdm_data {
        RdmData::Request(request) => (
            request.destination_uid,
            request.source_uid,
            request.transaction_number,
            request.port_id,
        ),
        RdmData::Response(response) => (
            response.destination_uid,
            response.source_uid,
            response.transaction_number,
            response.response_type as u8,
        ),
    };
    let (message_count, sub_device, command_class, parameter_id, parameter_data) = match rdm_data
    {
        RdmData::Request(request) => (
            request.message_count,
            request.sub_device,
            request.command_class as u8,
            request.parameter_id,
            &request.parameter_data,
        ),
        RdmData::Response(response) => (
            response.message_count,
            response.sub_device,
            response.command_class as u8,
            response.parameter_id,
            &response.parameter_data,
        ),
    };

    memory_view
        .destination_uid_mut()
        .copy_from_slice(&destination_uid.to_bytes());
    memory_view
        .source_uid_mut()
        .copy_from_slice(&source_uid.to_bytes());
    memory_view
        .transaction_number_mut()
        .write(transaction_number);
    memory_view
        .port_id_response_type_mut()
        .write(port_id_response_type);
    memory_view.message_count_mut().write(message_count);
    memory_view.sub_device_mut().write(sub_device);
    memory_view.command_class_mut().write(command_class);
    memory_view.parameter_id_mut().write(parameter_id);
    memory_view
        .parameter_data_length_mut()
        .write(parameter_data.len() as u8);
    memory_view.parameter_data_and_checksum_mut()[..parameter_data.len()]
        .copy_from_slice(parameter_data);

    let checksum = calculate_checksum(&dst[..message_length]);
    dst[message_length..total_package_length].copy_from_slice(&checksum.to_be_bytes());

    total_package_length
}

/// Returns received device id if there is no collision.
pub fn deserialize_discovery_response(
    buffer: &[u8],
) -> Result<UniqueIdentifier, RdmDeserializationError> {
    let index_of_separator_byte = buffer
        .iter()
        .take(MAX_PREAMBLE_LENGTH + 1)
        .position(|&x| x == SEPARATOR_BYTE)
        .ok_or(RdmDeserializationError::WrongStartCode)?;

    if buffer[..index_of_separator_byte]
        .iter()
        .any(|&byte| byte != PREAMBLE_BYTE)
    {
        return Err(RdmDeserializationError::WrongStartCode);
    }

    let start_index = index_of_separator_byte + 1;
    let message_length = buffer.len() - start_index;
    if message_length < RDM_DISCOVERY_RESPONSE_SIZE {
        return Err(RdmDeserializationError::WrongMessageLength(message_length));
    }

    let encoded_uid = &buffer[start_index..start_index + 12];
    let calculated_checksum = calculate_checksum(encoded_uid);

    let mut device_id_buf = [0u8; 6];
    decode_disc_unique(encoded_uid, &mut device_id_buf);

    let mut checksum_buf = [0u8; 2];
    decode_disc_unique(
        &buffer[start_index + 12..start_index + 16],
        &mut checksum_buf,
    );
    let received_checksum = u16::from_be_bytes(checksum_buf);

    if calculated_checksum != received_checksum {
        return Err(RdmDeserializationError::WrongChecksum);
    }

    match PackageAddress::from_bytes(&device_id_buf) {
        PackageAddress::Device(uid) => Ok(uid),
        _ => Err(RdmDeserializationError::SourceUidIsBroadcast),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::encode_discovery_response;

    fn identify_request() -> RdmRequestData {
        RdmRequestData {
            destination_uid: PackageAddress::Device(UniqueIdentifier::new(0x7FF0, 2).unwrap()),
            source_uid: UniqueIdentifier::new(0x7FF0, 1).unwrap(),
            transaction_number: 5,
            port_id: 1,
            message_count: 0,
            sub_device: 0,
            command_class: RequestCommandClass::SetCommand,
            parameter_id: 0x1000,
            parameter_data: DataPack::from_slice(&[1]).unwrap(),
        }
    }

    #[test]
    fn test_serialized_layout() {
        let package = RdmData::Request(identify_request()).serialize();

        assert_eq!(package.len(), 27);
        assert_eq!(&package[..3], &[SC_RDM, SC_SUB_MESSAGE, 25]);
        assert_eq!(package[20], 0x30);
        assert_eq!(&package[21..23], &[0x10, 0x00]);
        assert_eq!(package[23], 1);

        let checksum = calculate_checksum(&package[..25]);
        assert_eq!(&package[25..], &checksum.to_be_bytes());
    }

    #[test]
    fn test_request_round_trip() {
        let request = RdmData::Request(identify_request());
        assert_eq!(RdmData::deserialize(&request.serialize()).unwrap(), request);
    }

    #[test]
    fn test_response_round_trip() {
        let response = identify_request()
            .build_response(
                ResponseType::ResponseTypeNackReason,
                DataPack::from_slice(&[0, 6]).unwrap(),
                3,
            )
            .unwrap();
        let response = RdmData::Response(response);

        assert_eq!(RdmData::deserialize(&response.serialize()).unwrap(), response);
    }

    #[test]
    fn test_corrupted_checksum_is_rejected() {
        let mut package = RdmData::Request(identify_request()).serialize();
        let last = package.len() - 1;
        package[last] ^= 0x01;

        assert_eq!(
            RdmData::deserialize(&package),
            Err(RdmDeserializationError::WrongChecksum)
        );
    }

    #[test]
    fn test_inconsistent_lengths_are_rejected() {
        let mut package = RdmData::Request(identify_request()).serialize();
        assert_eq!(
            RdmData::deserialize(&package[..package.len() - 1]),
            Err(RdmDeserializationError::WrongMessageLength(25))
        );

        // pdl claims two bytes while the message carries one
        package[23] = 2;
        let checksum = calculate_checksum(&package[..25]);
        package[25..].copy_from_slice(&checksum.to_be_bytes());
        assert_eq!(
            RdmData::deserialize(&package),
            Err(RdmDeserializationError::ParameterDataTooLong(2))
        );

        package[0] = 0x00;
        assert_eq!(
            RdmData::deserialize(&package),
            Err(RdmDeserializationError::WrongStartCode)
        );
    }

    #[test]
    fn test_broadcast_request_has_no_response() {
        let mut request = identify_request();
        request.destination_uid = PackageAddress::Broadcast;

        assert!(request
            .build_response(ResponseType::ResponseTypeAck, DataPack::new(), 0)
            .is_err());
    }

    #[test]
    fn test_discovery_response() {
        let uid = UniqueIdentifier::new(0x7FF0, 0x1234_5678).unwrap();
        let frame = encode_discovery_response(uid);

        assert_eq!(deserialize_discovery_response(&frame), Ok(uid));
        // shortened preamble is valid
        assert_eq!(deserialize_discovery_response(&frame[5..]), Ok(uid));
    }

    #[test]
    fn test_discovery_collision() {
        let first = encode_discovery_response(UniqueIdentifier::new(0x7FF0, 1).unwrap());
        let second = encode_discovery_response(UniqueIdentifier::new(0x0001, 7).unwrap());

        let mut collided = [0u8; 24];
        for (index, byte) in collided.iter_mut().enumerate() {
            *byte = first[index] & second[index];
        }

        assert!(deserialize_discovery_response(&collided).is_err());
        assert!(deserialize_discovery_response(&first[..20]).is_err());
    }
}
