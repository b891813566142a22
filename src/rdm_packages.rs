use crate::consts::RDM_STATUS_MESSAGE_SIZE;
use crate::pids;
use crate::rdm_types::{
    deserialize_label, DeserializationError, DeviceInfo, DmxPersonality, DmxStartAddress,
    PersonalityDescription, RdmLabel, SensorValue, StatusMessage, StatusMessages,
    SupportedParameters,
};
use crate::types::DataPack;

pub fn deserialize_identify(buffer: &[u8]) -> Result<bool, DeserializationError> {
    if buffer.len() != 1 {
        return Err(DeserializationError);
    }

    Ok(buffer[0] != 0)
}

pub fn deserialize_status_messages(buffer: &[u8]) -> Result<StatusMessages, DeserializationError> {
    if buffer.len() % RDM_STATUS_MESSAGE_SIZE != 0 {
        return Err(DeserializationError);
    }

    let mut status_messages = heapless::Vec::new();
    for package_bytes in buffer.chunks(RDM_STATUS_MESSAGE_SIZE) {
        status_messages
            .push(StatusMessage::deserialize(package_bytes)?)
            .map_err(|_| DeserializationError)?;
    }

    Ok(status_messages)
}

pub fn deserialize_supported_parameters(
    buffer: &[u8],
) -> Result<SupportedParameters, DeserializationError> {
    if buffer.len() % 2 != 0 {
        return Err(DeserializationError);
    }

    let mut supported_parameters = heapless::Vec::new();
    for package_bytes in buffer.chunks(2) {
        supported_parameters
            .push(u16::from_be_bytes(package_bytes.try_into().unwrap()))
            .map_err(|_| DeserializationError)?;
    }

    Ok(supported_parameters)
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RdmResponseInfo {
    pub parameter_id: u16,
    pub message_count: u8,
    pub data: DataPack,
}

#[derive(Debug, PartialEq)]
pub enum RdmResponsePackage {
    IdentifyDevice(bool),
    SoftwareVersionLabel(RdmLabel),
    DeviceLabel(RdmLabel),
    DeviceInfo(DeviceInfo),
    DmxStartAddress(DmxStartAddress),
    DmxPersonality(DmxPersonality),
    DmxPersonalityDescription(PersonalityDescription),
    SensorValue(SensorValue),
    StatusMessages(StatusMessages),
    SupportedParameters(SupportedParameters),
    Custom(RdmResponseInfo),
}

impl RdmResponsePackage {
    /// Deserializes the parameter data of a response by its pid. Unknown pids are returned as
    /// [RdmResponsePackage::Custom].
    pub fn from_response_info(
        response_info: RdmResponseInfo,
    ) -> Result<Self, DeserializationError> {
        let data = &response_info.data;

        Ok(match response_info.parameter_id {
            pids::IDENTIFY_DEVICE => RdmResponsePackage::IdentifyDevice(deserialize_identify(data)?),
            pids::SOFTWARE_VERSION_LABEL => {
                RdmResponsePackage::SoftwareVersionLabel(deserialize_label(data)?)
            },
            pids::DEVICE_LABEL => RdmResponsePackage::DeviceLabel(deserialize_label(data)?),
            pids::DEVICE_INFO => RdmResponsePackage::DeviceInfo(DeviceInfo::deserialize(data)?),
            pids::DMX_START_ADDRESS => {
                RdmResponsePackage::DmxStartAddress(DmxStartAddress::deserialize(data)?)
            },
            pids::DMX_PERSONALITY => {
                RdmResponsePackage::DmxPersonality(DmxPersonality::deserialize(data)?)
            },
            pids::DMX_PERSONALITY_DESCRIPTION => RdmResponsePackage::DmxPersonalityDescription(
                PersonalityDescription::deserialize(data)?,
            ),
            pids::SENSOR_VALUE => RdmResponsePackage::SensorValue(SensorValue::deserialize(data)?),
            pids::STATUS_MESSAGES => {
                RdmResponsePackage::StatusMessages(deserialize_status_messages(data)?)
            },
            pids::SUPPORTED_PARAMETERS => {
                RdmResponsePackage::SupportedParameters(deserialize_supported_parameters(data)?)
            },
            _ => Self::Custom(response_info),
        })
    }
}
