use crate::command_class::{RequestCommandClass, ResponseCommandClass};
use crate::consts::{
    RDM_MAX_LABEL_LENGTH, RDM_MAX_STATUS_PACKAGES_PER_REQUEST, RDM_SUB_DEVICE_ALL,
    RDM_SUB_DEVICE_ROOT,
};
use crate::dmx_uart_driver::KvStore;
use crate::parameter::{
    ChangeCallback, CommandFormat, InstanceValue, ParameterAccess, ParameterDefinition,
    ParameterError, ParameterKey, ParameterSize, ParameterStore, PidHandler,
};
use crate::pids;
use crate::rdm_data::{RdmRequestData, RdmResponseData};
use crate::rdm_format::ParameterFormat;
use crate::rdm_types::{
    DeviceInfo, DiscoveryMuteResponse, DmxPersonality, DmxStartAddress, PersonalityDescription,
    RdmLabel, SensorValue, StatusMessage, StatusType,
};
use crate::types::{DataPack, DataType, NackReason, ResponseType};
use crate::unique_identifier::{PackageAddress, UniqueIdentifier};

/// Maximum amount of sensors a responder can register.
pub const MAX_SENSORS: usize = 16;
/// Capacity of the status message list.
pub const MAX_STATUS_MESSAGES: usize = RDM_MAX_STATUS_PACKAGES_PER_REQUEST;

/// Pids every responder has to support. They are left out of SUPPORTED_PARAMETERS.
const REQUIRED_PIDS: [u16; 8] = [
    pids::DISC_UNIQUE_BRANCH,
    pids::DISC_MUTE,
    pids::DISC_UN_MUTE,
    pids::SUPPORTED_PARAMETERS,
    pids::DEVICE_INFO,
    pids::SOFTWARE_VERSION_LABEL,
    pids::DMX_START_ADDRESS,
    pids::IDENTIFY_DEVICE,
];

/// The result object of an RDM handler.
#[derive(Debug)]
pub enum RdmResult {
    /// The package was acknowledged. The [DataPack] contains the response data.
    Acknowledged(DataPack),
    /// The package was acknowledged, but it does not fit into one [DataPack].
    /// The [DataPack] contains part of the response.
    /// If the RDM-controller requests the same pid and the rest of the message still doesn't fit
    /// doesn't fit into one [DataPack], send the next part as an [RdmResult::AcknowledgedOverflow].
    /// If the rest finally does fit into one [DataPack] send the rest as an [RdmResult::Acknowledged].
    AcknowledgedOverflow(DataPack),
    /// The message was not acknowledged. The [u16] is the [NackReason].
    NotAcknowledged(u16),
    /// The message was acknowledged but a result can not be delivered immediately. The [u16]
    /// contains the amount of time the controller has to wait in 100ms steps.
    AcknowledgedTimer(u16),
    /// Answer a discovery request with the uid of the responder.
    DiscoveryResponse,
    /// The receiver does not respond with anything.
    NoResponse,
    /// A custom response.
    Custom(RdmResponseData),
}

pub enum RdmAnswer {
    /// Has to be sent with an uart break
    Response(RdmResponseData),
    /// Has to be sent without an uart break
    DiscoveryResponse(UniqueIdentifier),
    /// No response to send
    NoResponse,
}

/// A personality of the responder, numbered from 1 in the order they're configured.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Personality {
    /// Amount of dmx slots the device uses in this personality.
    pub footprint: u16,
    pub description: &'static str,
}

pub struct RdmReceiverMetadata {
    pub device_model_id: u16,
    pub product_category: u16,
    pub software_version_id: u32,
    pub software_version_label: &'static str,
}

impl Default for RdmReceiverMetadata {
    fn default() -> Self {
        Self {
            device_model_id: 0,
            product_category: 0,
            software_version_id: 0,
            software_version_label: "dmx-rdm-engine device",
        }
    }
}

pub struct RdmResponderConfig {
    /// The unique id that is used as a source id in the packages.
    pub uid: UniqueIdentifier,
    /// Additional metadata of the RDM-receiver.
    pub rdm_receiver_metadata: RdmReceiverMetadata,
    /// Has to contain at least one personality.
    pub personalities: &'static [Personality],
    /// The personality the responder starts in, numbered from 1.
    pub initial_personality: u8,
    pub initial_start_address: u16,
    pub initial_device_label: &'static str,
    /// Upper bound of dynamic parameter storage in bytes.
    pub dynamic_capacity: usize,
}

const DEFAULT_PERSONALITIES: &[Personality] = &[Personality {
    footprint: 1,
    description: "default",
}];

impl Default for RdmResponderConfig {
    fn default() -> Self {
        Self {
            // prototyping manufacturer id
            uid: UniqueIdentifier::new(0x7FF0, 1).unwrap(),
            rdm_receiver_metadata: RdmReceiverMetadata::default(),
            personalities: DEFAULT_PERSONALITIES,
            initial_personality: 1,
            initial_start_address: 1,
            initial_device_label: "",
            dynamic_capacity: usize::MAX,
        }
    }
}

pub type StatusMessageList = heapless::Vec<StatusMessage, MAX_STATUS_MESSAGES>;
pub type SensorList = heapless::Vec<SensorValue, MAX_SENSORS>;

/// A context object for accessing the state of a [RdmResponder] from pid handlers and from a
/// [crate::dmx_receiver::DmxResponderHandler].
pub struct ResponderContext<'a> {
    pub config: &'a RdmResponderConfig,
    pub parameters: &'a mut dyn ParameterAccess,
    /// true if the device won't respond to discovery requests.
    pub discovery_muted: &'a mut bool,
    pub status_messages: &'a mut StatusMessageList,
    pub sensors: &'a mut SensorList,
    last_queued_message: &'a mut Option<RdmResponseData>,
    last_status_messages: &'a mut DataPack,
}

impl ResponderContext<'_> {
    pub fn uid(&self) -> UniqueIdentifier {
        self.config.uid
    }

    /// The amount of messages waiting to be collected with QUEUED_MESSAGE.
    pub fn message_count(&self) -> u8 {
        self.parameters.changed_count().min(u8::MAX as usize) as u8
    }

    pub fn personality(&self) -> DmxPersonality {
        self.parameters
            .get(RDM_SUB_DEVICE_ROOT, pids::DMX_PERSONALITY)
            .ok()
            .and_then(|value| DmxPersonality::deserialize(value).ok())
            .unwrap_or(DmxPersonality {
                current: 1,
                count: self.config.personalities.len() as u8,
            })
    }

    /// Amount of slots used in the current personality.
    pub fn footprint(&self) -> u16 {
        let current = self.personality().current as usize;

        self.config
            .personalities
            .get(current.wrapping_sub(1))
            .map_or(0, |personality| personality.footprint)
    }

    pub fn dmx_start_address(&self) -> DmxStartAddress {
        if self.footprint() == 0 {
            return DmxStartAddress::NoAddress;
        }

        self.parameters
            .get(RDM_SUB_DEVICE_ROOT, pids::DMX_START_ADDRESS)
            .ok()
            .and_then(|value| DmxStartAddress::deserialize(value).ok())
            .unwrap_or(DmxStartAddress::NoAddress)
    }
}

/// A handler for rdm requests with pids that have no definition.
pub trait RdmResponderHandlerFunc {
    type Error;

    fn handle_rdm(
        &mut self,
        _request: &RdmRequestData,
        _context: &mut ResponderContext,
    ) -> Result<RdmResult, Self::Error> {
        Ok(RdmResult::NotAcknowledged(NackReason::UnknownPid as u16))
    }
}

/// Fallback that rejects every unknown pid.
pub struct NoFallback;

impl RdmResponderHandlerFunc for NoFallback {
    type Error = core::convert::Infallible;
}

fn parameter_nack(error: ParameterError) -> NackReason {
    error.nack_reason()
}

fn data_pack(value: &[u8]) -> Result<DataPack, NackReason> {
    DataPack::from_slice(value).map_err(|_| NackReason::HardwareFault)
}

/// Answers a GET with the stored value of the pid.
pub fn simple_get_handler(
    context: &mut ResponderContext,
    request: &RdmRequestData,
) -> Result<RdmResult, NackReason> {
    let value = context
        .parameters
        .get(request.sub_device, request.parameter_id)
        .map_err(parameter_nack)?;

    Ok(RdmResult::Acknowledged(data_pack(value)?))
}

/// Stores the parameter data of a SET and queues the change.
pub fn simple_set_handler(
    context: &mut ResponderContext,
    request: &RdmRequestData,
) -> Result<RdmResult, NackReason> {
    context
        .parameters
        .set(
            request.sub_device,
            request.parameter_id,
            &request.parameter_data,
        )
        .map_err(parameter_nack)?;
    context
        .parameters
        .queue_changed(ParameterKey::new(request.sub_device, request.parameter_id));

    Ok(RdmResult::Acknowledged(DataPack::new()))
}

/// Checks the parameter data of an ACK against the response format of its command.
fn response_matches(format: &CommandFormat, result: &Result<RdmResult, NackReason>) -> bool {
    let Ok(RdmResult::Acknowledged(parameter_data)) = result else {
        return true;
    };

    ParameterFormat::parse(format.response)
        .and_then(|format| format.validate(parameter_data))
        .is_ok()
}

fn handle_disc_unique_branch(
    context: &mut ResponderContext,
    request: &RdmRequestData,
) -> Result<RdmResult, NackReason> {
    if request.parameter_data.len() != 12 || *context.discovery_muted {
        return Ok(RdmResult::NoResponse);
    }

    let lower_bound: u64 =
        PackageAddress::from_bytes(&request.parameter_data[..6].try_into().unwrap()).into();
    let upper_bound: u64 =
        PackageAddress::from_bytes(&request.parameter_data[6..].try_into().unwrap()).into();
    let own_uid: u64 = context.uid().into();

    if (lower_bound..=upper_bound).contains(&own_uid) {
        return Ok(RdmResult::DiscoveryResponse);
    }

    Ok(RdmResult::NoResponse)
}

fn disc_mute_response(context: &ResponderContext) -> DataPack {
    DiscoveryMuteResponse {
        sub_device: context.parameters.sub_device_count() > 0,
        ..Default::default()
    }
    .serialize()
}

fn handle_disc_mute(
    context: &mut ResponderContext,
    request: &RdmRequestData,
) -> Result<RdmResult, NackReason> {
    if !request.parameter_data.is_empty() {
        return Ok(RdmResult::NoResponse);
    }

    *context.discovery_muted = true;
    Ok(RdmResult::Acknowledged(disc_mute_response(context)))
}

fn handle_disc_un_mute(
    context: &mut ResponderContext,
    request: &RdmRequestData,
) -> Result<RdmResult, NackReason> {
    if !request.parameter_data.is_empty() {
        return Ok(RdmResult::NoResponse);
    }

    *context.discovery_muted = false;
    Ok(RdmResult::Acknowledged(disc_mute_response(context)))
}

fn handle_supported_parameters(
    context: &mut ResponderContext,
    _request: &RdmRequestData,
) -> Result<RdmResult, NackReason> {
    let mut response = DataPack::new();

    context.parameters.for_each_pid(&mut |pid| {
        if !REQUIRED_PIDS.contains(&pid) {
            // lists longer than one response are cut
            let _ = response.extend_from_slice(&pid.to_be_bytes());
        }
    });

    Ok(RdmResult::Acknowledged(response))
}

fn handle_device_info(
    context: &mut ResponderContext,
    _request: &RdmRequestData,
) -> Result<RdmResult, NackReason> {
    let metadata = &context.config.rdm_receiver_metadata;

    Ok(RdmResult::Acknowledged(
        DeviceInfo {
            device_model_id: metadata.device_model_id,
            product_category: metadata.product_category,
            software_version: metadata.software_version_id,
            dmx_footprint: context.footprint(),
            dmx_personality: context.personality(),
            dmx_start_address: context.dmx_start_address(),
            sub_device_count: context.parameters.sub_device_count(),
            sensor_count: context.sensors.len() as u8,
        }
        .serialize(),
    ))
}

fn handle_software_version_label(
    context: &mut ResponderContext,
    _request: &RdmRequestData,
) -> Result<RdmResult, NackReason> {
    let software_version_label = context.config.rdm_receiver_metadata.software_version_label;
    let length = software_version_label.len().min(RDM_MAX_LABEL_LENGTH);

    Ok(RdmResult::Acknowledged(data_pack(
        &software_version_label.as_bytes()[..length],
    )?))
}

fn handle_get_dmx_start_address(
    context: &mut ResponderContext,
    request: &RdmRequestData,
) -> Result<RdmResult, NackReason> {
    if context.footprint() == 0 {
        return Ok(RdmResult::Acknowledged(DmxStartAddress::NoAddress.serialize()));
    }

    simple_get_handler(context, request)
}

fn personality_number(
    context: &ResponderContext,
    request: &RdmRequestData,
) -> Result<u8, NackReason> {
    let personality = request.parameter_data[0];

    if personality == 0 || personality as usize > context.config.personalities.len() {
        return Err(NackReason::DataOutOfRange);
    }

    Ok(personality)
}

fn handle_set_dmx_personality(
    context: &mut ResponderContext,
    request: &RdmRequestData,
) -> Result<RdmResult, NackReason> {
    if request.sub_device != RDM_SUB_DEVICE_ROOT {
        return Err(NackReason::SubDeviceOutOfRange);
    }

    let personality = DmxPersonality {
        current: personality_number(context, request)?,
        count: context.config.personalities.len() as u8,
    };

    context
        .parameters
        .set(
            RDM_SUB_DEVICE_ROOT,
            pids::DMX_PERSONALITY,
            &personality.serialize(),
        )
        .map_err(parameter_nack)?;
    context
        .parameters
        .queue_changed(ParameterKey::new(RDM_SUB_DEVICE_ROOT, pids::DMX_PERSONALITY));

    Ok(RdmResult::Acknowledged(DataPack::new()))
}

fn handle_get_personality_description(
    context: &mut ResponderContext,
    request: &RdmRequestData,
) -> Result<RdmResult, NackReason> {
    if request.sub_device != RDM_SUB_DEVICE_ROOT {
        return Err(NackReason::DataOutOfRange);
    }

    let number = personality_number(context, request)?;
    let personality = &context.config.personalities[number as usize - 1];

    let mut description = RdmLabel::new();
    for character in personality.description.chars() {
        if description.push(character).is_err() {
            break;
        }
    }

    Ok(RdmResult::Acknowledged(
        PersonalityDescription {
            personality: number,
            dmx_footprint: personality.footprint,
            description,
        }
        .serialize(),
    ))
}

/// Moves up to one response worth of status messages with at least the requested severity
/// into parameter data.
fn pop_filtered_statuses(
    status_messages: &mut StatusMessageList,
    status_filter: StatusType,
) -> DataPack {
    let mut parameter_data = DataPack::new();
    let mut index = 0;

    while index < status_messages.len() {
        if ((status_messages[index].status_type as u8) & 0x0F) < status_filter as u8 {
            index += 1;
            continue;
        }

        let serialized = status_messages[index].serialize();
        if parameter_data.extend_from_slice(&serialized).is_err() {
            break;
        }

        status_messages.remove(index);
    }

    parameter_data
}

fn requested_status_type(request: &RdmRequestData) -> Result<StatusType, NackReason> {
    StatusType::deserialize(&request.parameter_data).map_err(|_| NackReason::DataOutOfRange)
}

fn handle_queued_message(
    context: &mut ResponderContext,
    request: &RdmRequestData,
) -> Result<RdmResult, NackReason> {
    let status_type_requested = requested_status_type(request)?;

    if status_type_requested == StatusType::StatusGetLastMessage {
        let message_count = context.message_count();

        return Ok(match context.last_queued_message.as_mut() {
            None => RdmResult::Acknowledged(DataPack::new()),
            Some(response) => {
                response.message_count = message_count;
                response.transaction_number = request.transaction_number;
                RdmResult::Custom(response.clone())
            },
        });
    }

    match status_type_requested {
        StatusType::StatusWarning | StatusType::StatusError | StatusType::StatusAdvisory => {},
        _ => return Err(NackReason::DataOutOfRange),
    }

    let mut response = RdmResponseData {
        destination_uid: PackageAddress::Device(request.source_uid),
        source_uid: context.uid(),
        transaction_number: request.transaction_number,
        response_type: ResponseType::ResponseTypeAck,
        message_count: 0,
        sub_device: RDM_SUB_DEVICE_ROOT,
        command_class: ResponseCommandClass::GetCommandResponse,
        parameter_id: pids::STATUS_MESSAGES,
        parameter_data: DataPack::new(),
    };

    let mut changed_parameter = None;
    while let Some(key) = context.parameters.pop_changed() {
        if let Ok(value) = context.parameters.get(key.sub_device, key.pid) {
            changed_parameter = Some((key, data_pack(value)?));
            break;
        }
    }

    match changed_parameter {
        Some((key, value)) => {
            response.sub_device = key.sub_device;
            response.parameter_id = key.pid;
            response.parameter_data = value;
        },
        None => {
            response.parameter_data =
                pop_filtered_statuses(context.status_messages, status_type_requested);
            *context.last_status_messages = response.parameter_data.clone();
        },
    }

    response.message_count = context.message_count();
    *context.last_queued_message = Some(response.clone());

    Ok(RdmResult::Custom(response))
}

fn handle_status_messages(
    context: &mut ResponderContext,
    request: &RdmRequestData,
) -> Result<RdmResult, NackReason> {
    let status_type_requested = requested_status_type(request)?;

    Ok(RdmResult::Acknowledged(match status_type_requested {
        StatusType::StatusNone => DataPack::new(),
        StatusType::StatusGetLastMessage => context.last_status_messages.clone(),
        StatusType::StatusWarning | StatusType::StatusError | StatusType::StatusAdvisory => {
            let response_data =
                pop_filtered_statuses(context.status_messages, status_type_requested);
            *context.last_status_messages = response_data.clone();

            response_data
        },
        _ => return Err(NackReason::DataOutOfRange),
    }))
}

const ALL_SENSORS: u8 = 0xFF;

fn sensor_mut<'s>(sensors: &'s mut SensorList, number: u8) -> Result<&'s mut SensorValue, NackReason> {
    sensors
        .get_mut(number as usize)
        .ok_or(NackReason::DataOutOfRange)
}

fn handle_get_sensor_value(
    context: &mut ResponderContext,
    request: &RdmRequestData,
) -> Result<RdmResult, NackReason> {
    let sensor = sensor_mut(context.sensors, request.parameter_data[0])?;

    Ok(RdmResult::Acknowledged(data_pack(&sensor.serialize())?))
}

fn reset_sensor(sensor: &mut SensorValue) {
    sensor.lowest_value = sensor.present_value;
    sensor.highest_value = sensor.present_value;
    sensor.recorded_value = sensor.present_value;
}

fn handle_set_sensor_value(
    context: &mut ResponderContext,
    request: &RdmRequestData,
) -> Result<RdmResult, NackReason> {
    let number = request.parameter_data[0];

    if number == ALL_SENSORS {
        context.sensors.iter_mut().for_each(reset_sensor);

        return Ok(RdmResult::Acknowledged(data_pack(
            &SensorValue {
                sensor_number: ALL_SENSORS,
                ..Default::default()
            }
            .serialize(),
        )?));
    }

    let sensor = sensor_mut(context.sensors, number)?;
    reset_sensor(sensor);

    Ok(RdmResult::Acknowledged(data_pack(&sensor.serialize())?))
}

fn handle_record_sensors(
    context: &mut ResponderContext,
    request: &RdmRequestData,
) -> Result<RdmResult, NackReason> {
    let number = request.parameter_data[0];

    if number == ALL_SENSORS {
        context
            .sensors
            .iter_mut()
            .for_each(|sensor| sensor.recorded_value = sensor.present_value);
    } else {
        let sensor = sensor_mut(context.sensors, number)?;
        sensor.recorded_value = sensor.present_value;
    }

    Ok(RdmResult::Acknowledged(DataPack::new()))
}

const DISC_UNIQUE_BRANCH: ParameterDefinition = ParameterDefinition::new(
    pids::DISC_UNIQUE_BRANCH,
    PidHandler::Discovery(handle_disc_unique_branch),
);
const DISC_MUTE: ParameterDefinition =
    ParameterDefinition::new(pids::DISC_MUTE, PidHandler::Discovery(handle_disc_mute));
const DISC_UN_MUTE: ParameterDefinition =
    ParameterDefinition::new(pids::DISC_UN_MUTE, PidHandler::Discovery(handle_disc_un_mute));
const SUPPORTED_PARAMETERS: ParameterDefinition = ParameterDefinition::new(
    pids::SUPPORTED_PARAMETERS,
    PidHandler::Get(handle_supported_parameters),
)
.with_get_format(CommandFormat {
    request: "",
    response: "w",
});
const DEVICE_INFO: ParameterDefinition =
    ParameterDefinition::new(pids::DEVICE_INFO, PidHandler::Get(handle_device_info))
        .with_get_format(CommandFormat {
            request: "",
            response: "#0100hwwdwbbwwb$",
        });
const SOFTWARE_VERSION_LABEL: ParameterDefinition = ParameterDefinition::new(
    pids::SOFTWARE_VERSION_LABEL,
    PidHandler::Get(handle_software_version_label),
)
.with_data_type(DataType::Ascii)
.with_get_format(CommandFormat {
    request: "",
    response: "a$",
});
const IDENTIFY_DEVICE: ParameterDefinition = ParameterDefinition::new(
    pids::IDENTIFY_DEVICE,
    PidHandler::GetSet {
        get: simple_get_handler,
        set: simple_set_handler,
    },
)
.with_data_type(DataType::UnsignedByte)
.with_size(ParameterSize::Fixed(1))
.with_range(0, 1)
.with_get_format(CommandFormat {
    request: "",
    response: "b$",
})
.with_set_format(CommandFormat {
    request: "b$",
    response: "",
});
const DMX_START_ADDRESS: ParameterDefinition = ParameterDefinition::new(
    pids::DMX_START_ADDRESS,
    PidHandler::GetSet {
        get: handle_get_dmx_start_address,
        set: simple_set_handler,
    },
)
.with_data_type(DataType::UnsignedWord)
.with_size(ParameterSize::Fixed(2))
.with_range(1, 512)
.with_get_format(CommandFormat {
    request: "",
    response: "w$",
})
.with_set_format(CommandFormat {
    request: "w$",
    response: "",
});
const DMX_PERSONALITY: ParameterDefinition = ParameterDefinition::new(
    pids::DMX_PERSONALITY,
    PidHandler::GetSet {
        get: simple_get_handler,
        set: handle_set_dmx_personality,
    },
)
.with_size(ParameterSize::Fixed(2))
.with_get_format(CommandFormat {
    request: "",
    response: "bb$",
})
.with_set_format(CommandFormat {
    request: "b$",
    response: "",
});
const DMX_PERSONALITY_DESCRIPTION: ParameterDefinition = ParameterDefinition::new(
    pids::DMX_PERSONALITY_DESCRIPTION,
    PidHandler::Get(handle_get_personality_description),
)
.with_data_type(DataType::Ascii)
.with_get_format(CommandFormat {
    request: "b$",
    response: "bwa$",
});
const DEVICE_LABEL: ParameterDefinition = ParameterDefinition::new(
    pids::DEVICE_LABEL,
    PidHandler::GetSet {
        get: simple_get_handler,
        set: simple_set_handler,
    },
)
.with_data_type(DataType::Ascii)
.with_size(ParameterSize::Variable(RDM_MAX_LABEL_LENGTH))
.with_get_format(CommandFormat {
    request: "",
    response: "a$",
})
.with_set_format(CommandFormat {
    request: "a$",
    response: "",
});
const QUEUED_MESSAGE: ParameterDefinition =
    ParameterDefinition::new(pids::QUEUED_MESSAGE, PidHandler::Get(handle_queued_message))
        .with_get_format(CommandFormat {
            request: "b$",
            response: "r",
        });
const STATUS_MESSAGES: ParameterDefinition =
    ParameterDefinition::new(pids::STATUS_MESSAGES, PidHandler::Get(handle_status_messages))
        .with_get_format(CommandFormat {
            request: "b$",
            response: "wbwww",
        });
const SENSOR_VALUE: ParameterDefinition = ParameterDefinition::new(
    pids::SENSOR_VALUE,
    PidHandler::GetSet {
        get: handle_get_sensor_value,
        set: handle_set_sensor_value,
    },
)
.with_get_format(CommandFormat {
    request: "b$",
    response: "bwwww$",
})
.with_set_format(CommandFormat {
    request: "b$",
    response: "bwwww$",
});
const RECORD_SENSORS: ParameterDefinition =
    ParameterDefinition::new(pids::RECORD_SENSORS, PidHandler::Set(handle_record_sensors))
        .with_set_format(CommandFormat {
            request: "b$",
            response: "",
        });

const BUILT_IN_DEFINITIONS: [ParameterDefinition; 13] = [
    DISC_UNIQUE_BRANCH,
    DISC_MUTE,
    DISC_UN_MUTE,
    SUPPORTED_PARAMETERS,
    DEVICE_INFO,
    SOFTWARE_VERSION_LABEL,
    IDENTIFY_DEVICE,
    DMX_START_ADDRESS,
    DMX_PERSONALITY,
    DMX_PERSONALITY_DESCRIPTION,
    DEVICE_LABEL,
    QUEUED_MESSAGE,
    STATUS_MESSAGES,
];

/// Parser independent RDM responder. Owns the parameters of the root device and its
/// sub-devices and dispatches requests to the handlers of their definitions.
///
/// * `DEFS` - maximum amount of pid definitions, the responder defines 13 itself
/// * `DEVICES` - maximum amount of devices including the root device
/// * `PARAMS` - maximum amount of parameter instances, the root device uses 4
/// * `BYTES` - dynamic parameter storage in bytes
pub struct RdmResponder<
    const DEFS: usize,
    const DEVICES: usize,
    const PARAMS: usize,
    const BYTES: usize = 1024,
> {
    config: RdmResponderConfig,
    store: ParameterStore<DEFS, DEVICES, PARAMS, BYTES>,
    discovery_muted: bool,
    status_messages: StatusMessageList,
    sensors: SensorList,
    last_queued_message: Option<RdmResponseData>,
    last_status_messages: DataPack,
}

impl<const DEFS: usize, const DEVICES: usize, const PARAMS: usize, const BYTES: usize>
    RdmResponder<DEFS, DEVICES, PARAMS, BYTES>
{
    /// Creates a new [RdmResponder] and registers the built-in pids.
    pub fn new(config: RdmResponderConfig) -> Result<Self, ParameterError> {
        let personality_count = config.personalities.len();
        if personality_count == 0
            || personality_count > u8::MAX as usize
            || !(1..=personality_count).contains(&(config.initial_personality as usize))
        {
            warn!("invalid personality configuration");
            return Err(ParameterError::DataOutOfRange);
        }

        let mut store = ParameterStore::with_dynamic_capacity(config.dynamic_capacity);
        for definition in BUILT_IN_DEFINITIONS {
            store.define(definition)?;
        }

        store.add_instance(
            RDM_SUB_DEVICE_ROOT,
            pids::IDENTIFY_DEVICE,
            InstanceValue::Dynamic(&[0]),
        )?;
        store.add_instance(
            RDM_SUB_DEVICE_ROOT,
            pids::DMX_START_ADDRESS,
            InstanceValue::Persisted(&config.initial_start_address.to_be_bytes()),
        )?;
        store.add_instance(
            RDM_SUB_DEVICE_ROOT,
            pids::DMX_PERSONALITY,
            InstanceValue::Persisted(&[config.initial_personality, personality_count as u8]),
        )?;

        let label_length = config.initial_device_label.len().min(RDM_MAX_LABEL_LENGTH);
        store.add_instance(
            RDM_SUB_DEVICE_ROOT,
            pids::DEVICE_LABEL,
            InstanceValue::Persisted(&config.initial_device_label.as_bytes()[..label_length]),
        )?;

        info!("rdm responder {} ready", config.uid);

        Ok(Self {
            config,
            store,
            discovery_muted: false,
            status_messages: heapless::Vec::new(),
            sensors: heapless::Vec::new(),
            last_queued_message: None,
            last_status_messages: DataPack::new(),
        })
    }

    /// Get the uid of the rdm responder.
    pub fn get_uid(&self) -> UniqueIdentifier {
        self.config.uid
    }

    pub fn config(&self) -> &RdmResponderConfig {
        &self.config
    }

    pub fn store(&self) -> &ParameterStore<DEFS, DEVICES, PARAMS, BYTES> {
        &self.store
    }

    /// Gives access to the parameter store for defining custom pids and adding instances.
    pub fn store_mut(&mut self) -> &mut ParameterStore<DEFS, DEVICES, PARAMS, BYTES> {
        &mut self.store
    }

    pub fn add_sub_device(&mut self, sub_device: u16) -> Result<(), ParameterError> {
        self.store.add_sub_device(sub_device)
    }

    pub fn set_callback(&mut self, pid: u16, callback: ChangeCallback) -> Result<(), ParameterError> {
        self.store.set_callback(pid, callback)
    }

    pub fn is_muted(&self) -> bool {
        self.discovery_muted
    }

    /// Get the amount of queued messages.
    pub fn get_message_count(&self) -> u8 {
        self.store.changed_count().min(u8::MAX as usize) as u8
    }

    /// Get the status queue that contains the current status messages.
    pub fn get_status_vec(&self) -> &StatusMessageList {
        &self.status_messages
    }

    /// Get the status queue to add or remove status messages.
    pub fn get_status_vec_mut(&mut self) -> &mut StatusMessageList {
        &mut self.status_messages
    }

    pub fn dmx_start_address(&mut self) -> DmxStartAddress {
        self.get_context().dmx_start_address()
    }

    /// Sets the start address and queues the change. Only 1 to 512 is accepted.
    pub fn set_dmx_start_address(&mut self, dmx_start_address: u16) -> Result<(), ParameterError> {
        self.store.set_and_queue(
            RDM_SUB_DEVICE_ROOT,
            pids::DMX_START_ADDRESS,
            &dmx_start_address.to_be_bytes(),
        )
    }

    pub fn personality(&mut self) -> DmxPersonality {
        self.get_context().personality()
    }

    /// Selects a personality, numbered from 1, and queues the change.
    pub fn set_personality(&mut self, personality: u8) -> Result<(), ParameterError> {
        let count = self.config.personalities.len() as u8;
        if personality == 0 || personality > count {
            return Err(ParameterError::DataOutOfRange);
        }

        self.store.set_and_queue(
            RDM_SUB_DEVICE_ROOT,
            pids::DMX_PERSONALITY,
            &[personality, count],
        )
    }

    pub fn footprint(&mut self) -> u16 {
        self.get_context().footprint()
    }

    pub fn device_label(&self) -> &str {
        self.store
            .get(RDM_SUB_DEVICE_ROOT, pids::DEVICE_LABEL)
            .ok()
            .and_then(|label| core::str::from_utf8(label).ok())
            .unwrap_or("")
    }

    pub fn set_device_label(&mut self, label: &str) -> Result<(), ParameterError> {
        if !label.is_ascii() {
            return Err(ParameterError::DataOutOfRange);
        }

        self.store
            .set_and_queue(RDM_SUB_DEVICE_ROOT, pids::DEVICE_LABEL, label.as_bytes())
    }

    pub fn identify(&self) -> bool {
        self.store
            .get(RDM_SUB_DEVICE_ROOT, pids::IDENTIFY_DEVICE)
            .is_ok_and(|value| value == [1])
    }

    pub fn set_identify(&mut self, identify: bool) -> Result<(), ParameterError> {
        self.store
            .set_and_queue(RDM_SUB_DEVICE_ROOT, pids::IDENTIFY_DEVICE, &[identify as u8])
    }

    /// Registers `count` sensors numbered from 0 together with SENSOR_VALUE and RECORD_SENSORS.
    pub fn register_sensors(&mut self, count: u8) -> Result<(), ParameterError> {
        if count as usize > MAX_SENSORS {
            return Err(ParameterError::NoMemory);
        }

        self.store.define(SENSOR_VALUE)?;
        self.store.define(RECORD_SENSORS)?;

        self.sensors.clear();
        for sensor_number in 0..count {
            let _ = self.sensors.push(SensorValue {
                sensor_number,
                ..Default::default()
            });
        }

        Ok(())
    }

    pub fn sensor(&self, sensor_number: u8) -> Option<&SensorValue> {
        self.sensors.get(sensor_number as usize)
    }

    /// Updates the present value of a sensor and tracks its lowest and highest value.
    pub fn sensor_set(&mut self, sensor_number: u8, value: i16) -> Result<(), ParameterError> {
        let sensor = self
            .sensors
            .get_mut(sensor_number as usize)
            .ok_or(ParameterError::NotFound)?;

        sensor.present_value = value;
        sensor.lowest_value = sensor.lowest_value.min(value);
        sensor.highest_value = sensor.highest_value.max(value);

        Ok(())
    }

    pub fn sensor_record(&mut self, sensor_number: u8) -> Result<(), ParameterError> {
        let sensor = self
            .sensors
            .get_mut(sensor_number as usize)
            .ok_or(ParameterError::NotFound)?;
        sensor.recorded_value = sensor.present_value;

        Ok(())
    }

    pub fn sensor_reset(&mut self, sensor_number: u8) -> Result<(), ParameterError> {
        let sensor = self
            .sensors
            .get_mut(sensor_number as usize)
            .ok_or(ParameterError::NotFound)?;
        reset_sensor(sensor);

        Ok(())
    }

    pub fn staged_count(&self) -> usize {
        self.store.staged_count()
    }

    /// Flushes changed persisted parameters.
    pub fn commit<K: KvStore>(&mut self, kv_store: &mut K) -> Result<usize, ParameterError> {
        self.store.commit(kv_store)
    }

    /// Restores persisted parameters. The personality count always follows the configuration.
    pub fn load<K: KvStore>(&mut self, kv_store: &mut K) -> Result<usize, ParameterError> {
        let loaded = self.store.load(kv_store)?;

        let personality = self.personality();
        if personality.count as usize != self.config.personalities.len()
            || !(1..=personality.count).contains(&personality.current)
        {
            self.store.set(
                RDM_SUB_DEVICE_ROOT,
                pids::DMX_PERSONALITY,
                &[
                    self.config.initial_personality,
                    self.config.personalities.len() as u8,
                ],
            )?;
        }

        Ok(loaded)
    }

    pub fn get_context(&mut self) -> ResponderContext {
        ResponderContext {
            config: &self.config,
            parameters: &mut self.store,
            discovery_muted: &mut self.discovery_muted,
            status_messages: &mut self.status_messages,
            sensors: &mut self.sensors,
            last_queued_message: &mut self.last_queued_message,
            last_status_messages: &mut self.last_status_messages,
        }
    }

    /// Dispatches a request. Pids without a definition are passed to `fallback`.
    pub fn handle_rdm_request<HandlerError>(
        &mut self,
        request: RdmRequestData,
        fallback: &mut dyn RdmResponderHandlerFunc<Error = HandlerError>,
    ) -> Result<RdmAnswer, HandlerError> {
        if !request.destination_uid.targets(self.config.uid) {
            return Ok(RdmAnswer::NoResponse);
        }

        if request.command_class == RequestCommandClass::DiscoveryCommand
            && ![
                pids::DISC_UNIQUE_BRANCH,
                pids::DISC_MUTE,
                pids::DISC_UN_MUTE,
            ]
            .contains(&request.parameter_id)
        {
            return Ok(RdmAnswer::NoResponse);
        }

        let Some(definition) = self.store.definition(request.parameter_id).copied() else {
            let result = fallback.handle_rdm(&request, &mut self.get_context())?;
            return Ok(self.answer(&request, Ok(result)));
        };

        let result = self.dispatch(&definition, &request);
        Ok(self.answer(&request, result))
    }

    fn dispatch(
        &mut self,
        definition: &ParameterDefinition,
        request: &RdmRequestData,
    ) -> Result<RdmResult, NackReason> {
        let handler = definition
            .handler
            .for_command(request.command_class)
            .ok_or(NackReason::UnsupportedCommandClass)?;

        let Some(format) = definition.format(request.command_class) else {
            return handler(&mut self.get_context(), request);
        };

        ParameterFormat::parse(format.request)
            .map_err(|_| NackReason::HardwareFault)?
            .validate(&request.parameter_data)
            .map_err(|_| NackReason::FormatError)?;

        if request.sub_device != RDM_SUB_DEVICE_ALL {
            if !self.store.has_device(request.sub_device) {
                return Err(NackReason::SubDeviceOutOfRange);
            }

            let result = handler(&mut self.get_context(), request);
            debug_assert!(
                response_matches(format, &result),
                "response of pid {:#06x} doesn't match its format",
                request.parameter_id
            );

            return result;
        }

        if request.command_class != RequestCommandClass::SetCommand {
            return Err(NackReason::SubDeviceOutOfRange);
        }

        // devices holding the pid, pids without instances are handled by the root device
        let mut devices: heapless::Vec<u16, DEVICES> = heapless::Vec::new();
        let _ = devices.push(RDM_SUB_DEVICE_ROOT);
        devices.extend(self.store.sub_devices());
        devices.retain(|sub_device| self.store.has_instance(*sub_device, request.parameter_id));
        if devices.is_empty() {
            let _ = devices.push(RDM_SUB_DEVICE_ROOT);
        }

        // the request is applied to all devices or to none of them
        let mut previous: heapless::Vec<(u16, Option<DataPack>), DEVICES> = heapless::Vec::new();
        for &sub_device in &devices {
            let value = match self.store.get(sub_device, request.parameter_id) {
                Ok(value) => Some(data_pack(value)?),
                Err(_) => None,
            };
            let _ = previous.push((sub_device, value));
        }

        let mut device_request = request.clone();
        for (applied, (sub_device, _)) in previous.iter().enumerate() {
            device_request.sub_device = *sub_device;

            if let Err(nack_reason) = handler(&mut self.get_context(), &device_request) {
                self.roll_back(request.parameter_id, &previous[..applied]);
                return Err(nack_reason);
            }
        }

        Ok(RdmResult::Acknowledged(DataPack::new()))
    }

    fn roll_back(&mut self, pid: u16, previous: &[(u16, Option<DataPack>)]) {
        for (sub_device, value) in previous.iter().rev() {
            let Some(value) = value else {
                continue;
            };

            if self.store.set(*sub_device, pid, value).is_err() {
                error!("pid {:#06x} of sub device {} not restored", pid, sub_device);
            }
        }
    }

    fn answer(
        &self,
        request: &RdmRequestData,
        result: Result<RdmResult, NackReason>,
    ) -> RdmAnswer {
        let (response_type, response_data) = match result {
            Err(nack_reason) => (ResponseType::ResponseTypeNackReason, nack_reason.serialize()),
            Ok(RdmResult::Acknowledged(response_data)) => {
                (ResponseType::ResponseTypeAck, response_data)
            },
            Ok(RdmResult::AcknowledgedOverflow(response_data)) => {
                (ResponseType::ResponseTypeAckOverflow, response_data)
            },
            Ok(RdmResult::NotAcknowledged(nack_reason)) => (
                ResponseType::ResponseTypeNackReason,
                DataPack::from_slice(&nack_reason.to_be_bytes()).unwrap(),
            ),
            Ok(RdmResult::AcknowledgedTimer(timer)) => (
                ResponseType::ResponseTypeAckTimer,
                DataPack::from_slice(&timer.to_be_bytes()).unwrap(),
            ),
            Ok(RdmResult::DiscoveryResponse) => {
                return RdmAnswer::DiscoveryResponse(self.config.uid);
            },
            Ok(RdmResult::NoResponse) => return RdmAnswer::NoResponse,
            Ok(RdmResult::Custom(response_data)) => {
                if request.destination_uid.is_broadcast() {
                    return RdmAnswer::NoResponse;
                }

                return RdmAnswer::Response(response_data);
            },
        };

        // broadcasts are never answered
        match request.build_response(response_type, response_data, self.get_message_count()) {
            Ok(response) => RdmAnswer::Response(response),
            Err(_) => RdmAnswer::NoResponse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERSONALITIES: &[Personality] = &[
        Personality {
            footprint: 4,
            description: "4 channel",
        },
        Personality {
            footprint: 8,
            description: "8 channel",
        },
        Personality {
            footprint: 0,
            description: "standalone",
        },
    ];

    fn responder_uid() -> UniqueIdentifier {
        UniqueIdentifier::new(0x7FF0, 0x1234).unwrap()
    }

    fn controller_uid() -> UniqueIdentifier {
        UniqueIdentifier::new(0x7FF0, 1).unwrap()
    }

    fn responder() -> RdmResponder<20, 4, 16> {
        RdmResponder::new(RdmResponderConfig {
            uid: responder_uid(),
            personalities: PERSONALITIES,
            initial_device_label: "fixture",
            ..Default::default()
        })
        .unwrap()
    }

    fn request(
        command_class: RequestCommandClass,
        parameter_id: u16,
        parameter_data: &[u8],
    ) -> RdmRequestData {
        RdmRequestData {
            destination_uid: PackageAddress::Device(responder_uid()),
            source_uid: controller_uid(),
            transaction_number: 7,
            port_id: 1,
            message_count: 0,
            sub_device: 0,
            command_class,
            parameter_id,
            parameter_data: DataPack::from_slice(parameter_data).unwrap(),
        }
    }

    fn response(
        responder: &mut RdmResponder<20, 4, 16>,
        request: RdmRequestData,
    ) -> RdmResponseData {
        match responder.handle_rdm_request(request, &mut NoFallback).unwrap() {
            RdmAnswer::Response(response) => response,
            _ => panic!("expected a response"),
        }
    }

    fn assert_nack(response: &RdmResponseData, nack_reason: NackReason) {
        assert_eq!(response.response_type, ResponseType::ResponseTypeNackReason);
        assert_eq!(response.parameter_data, nack_reason.serialize());
    }

    #[test]
    fn test_personality_round_trip() {
        let mut responder = responder();

        let nack = response(
            &mut responder,
            request(RequestCommandClass::SetCommand, pids::DMX_PERSONALITY, &[4]),
        );
        assert_nack(&nack, NackReason::DataOutOfRange);

        let ack = response(
            &mut responder,
            request(RequestCommandClass::SetCommand, pids::DMX_PERSONALITY, &[2]),
        );
        assert_eq!(ack.response_type, ResponseType::ResponseTypeAck);
        assert!(ack.parameter_data.is_empty());

        let get = response(
            &mut responder,
            request(RequestCommandClass::GetCommand, pids::DMX_PERSONALITY, &[]),
        );
        assert_eq!(get.parameter_data.as_slice(), &[2, 3]);
        assert_eq!(responder.footprint(), 8);
    }

    #[test]
    fn test_start_address_bounds() {
        let mut responder = responder();

        for invalid in [0u16, 513, 0xFFFF] {
            let nack = response(
                &mut responder,
                request(
                    RequestCommandClass::SetCommand,
                    pids::DMX_START_ADDRESS,
                    &invalid.to_be_bytes(),
                ),
            );
            assert_nack(&nack, NackReason::DataOutOfRange);
        }

        let ack = response(
            &mut responder,
            request(
                RequestCommandClass::SetCommand,
                pids::DMX_START_ADDRESS,
                &512u16.to_be_bytes(),
            ),
        );
        assert_eq!(ack.response_type, ResponseType::ResponseTypeAck);
        assert_eq!(responder.dmx_start_address(), DmxStartAddress::Address(512));

        let nack = response(
            &mut responder,
            request(RequestCommandClass::SetCommand, pids::DMX_START_ADDRESS, &[1]),
        );
        assert_nack(&nack, NackReason::FormatError);

        assert_eq!(
            responder.set_dmx_start_address(0),
            Err(ParameterError::DataOutOfRange)
        );
    }

    #[test]
    fn test_start_address_without_footprint() {
        let mut responder = responder();
        responder.set_personality(3).unwrap();

        let get = response(
            &mut responder,
            request(RequestCommandClass::GetCommand, pids::DMX_START_ADDRESS, &[]),
        );
        assert_eq!(get.parameter_data.as_slice(), &[0xFF, 0xFF]);
    }

    #[test]
    fn test_dispatch_nacks() {
        let mut responder = responder();

        let nack = response(
            &mut responder,
            request(RequestCommandClass::GetCommand, 0x8123, &[]),
        );
        assert_nack(&nack, NackReason::UnknownPid);

        let nack = response(
            &mut responder,
            request(RequestCommandClass::SetCommand, pids::DEVICE_INFO, &[]),
        );
        assert_nack(&nack, NackReason::UnsupportedCommandClass);

        let mut sub_device_request =
            request(RequestCommandClass::GetCommand, pids::DEVICE_LABEL, &[]);
        sub_device_request.sub_device = 3;
        let nack = response(&mut responder, sub_device_request);
        assert_nack(&nack, NackReason::SubDeviceOutOfRange);

        let nack = response(
            &mut responder,
            request(RequestCommandClass::GetCommand, pids::DMX_PERSONALITY, &[1]),
        );
        assert_nack(&nack, NackReason::FormatError);
    }

    #[test]
    fn test_broadcast_set_is_applied_silently() {
        let mut responder = responder();

        let mut broadcast = request(RequestCommandClass::SetCommand, pids::IDENTIFY_DEVICE, &[1]);
        broadcast.destination_uid = PackageAddress::Broadcast;

        assert!(matches!(
            responder.handle_rdm_request(broadcast, &mut NoFallback),
            Ok(RdmAnswer::NoResponse)
        ));
        assert!(responder.identify());
    }

    #[test]
    fn test_other_devices_are_ignored() {
        let mut responder = responder();

        let mut other = request(RequestCommandClass::SetCommand, pids::IDENTIFY_DEVICE, &[1]);
        other.destination_uid = PackageAddress::Device(controller_uid());

        assert!(matches!(
            responder.handle_rdm_request(other, &mut NoFallback),
            Ok(RdmAnswer::NoResponse)
        ));
        assert!(!responder.identify());
    }

    #[test]
    fn test_sub_device_all_fans_out() {
        let mut responder = responder();
        responder.add_sub_device(1).unwrap();
        responder.add_sub_device(2).unwrap();
        for sub_device in [1, 2] {
            responder
                .store_mut()
                .add_instance(sub_device, pids::IDENTIFY_DEVICE, InstanceValue::Dynamic(&[0]))
                .unwrap();
        }

        let mut set_all = request(RequestCommandClass::SetCommand, pids::IDENTIFY_DEVICE, &[1]);
        set_all.sub_device = RDM_SUB_DEVICE_ALL;
        let ack = response(&mut responder, set_all);
        assert_eq!(ack.response_type, ResponseType::ResponseTypeAck);

        for sub_device in [0, 1, 2] {
            assert_eq!(
                responder.store().get(sub_device, pids::IDENTIFY_DEVICE),
                Ok(&[1u8][..])
            );
        }

        let mut get_all = request(RequestCommandClass::GetCommand, pids::IDENTIFY_DEVICE, &[]);
        get_all.sub_device = RDM_SUB_DEVICE_ALL;
        assert_nack(&response(&mut responder, get_all), NackReason::SubDeviceOutOfRange);
    }

    #[test]
    fn test_sub_device_all_is_all_or_nothing() {
        let mut responder = responder();
        responder.add_sub_device(1).unwrap();
        responder.add_sub_device(2).unwrap();
        responder
            .store_mut()
            .add_instance(1, pids::DEVICE_LABEL, InstanceValue::Dynamic(b"one"))
            .unwrap();
        responder
            .store_mut()
            .add_instance(2, pids::DEVICE_LABEL, InstanceValue::Static(b"fixed"))
            .unwrap();
        let root_label = responder.device_label().as_bytes().to_vec();

        let mut set_all = request(RequestCommandClass::SetCommand, pids::DEVICE_LABEL, b"all");
        set_all.sub_device = RDM_SUB_DEVICE_ALL;
        let nack = response(&mut responder, set_all);
        assert_eq!(nack.response_type, ResponseType::ResponseTypeNackReason);

        assert_eq!(
            responder.store().get(0, pids::DEVICE_LABEL),
            Ok(root_label.as_slice())
        );
        assert_eq!(responder.store().get(1, pids::DEVICE_LABEL), Ok(&b"one"[..]));
        assert_eq!(responder.store().get(2, pids::DEVICE_LABEL), Ok(&b"fixed"[..]));
    }

    fn branch(lower: u64, upper: u64) -> RdmRequestData {
        let mut parameter_data = [0u8; 12];
        parameter_data[..6].copy_from_slice(&PackageAddress::try_from(lower).unwrap().to_bytes());
        parameter_data[6..].copy_from_slice(&PackageAddress::try_from(upper).unwrap().to_bytes());

        let mut request = request(
            RequestCommandClass::DiscoveryCommand,
            pids::DISC_UNIQUE_BRANCH,
            &parameter_data,
        );
        request.destination_uid = PackageAddress::Broadcast;
        request
    }

    #[test]
    fn test_discovery_and_mute() {
        let mut responder = responder();
        let own_uid: u64 = responder_uid().into();

        assert!(matches!(
            responder.handle_rdm_request(branch(0, own_uid - 1), &mut NoFallback),
            Ok(RdmAnswer::NoResponse)
        ));
        assert!(matches!(
            responder.handle_rdm_request(branch(own_uid, own_uid), &mut NoFallback),
            Ok(RdmAnswer::DiscoveryResponse(uid)) if uid == responder_uid()
        ));

        let mute = response(
            &mut responder,
            request(RequestCommandClass::DiscoveryCommand, pids::DISC_MUTE, &[]),
        );
        assert_eq!(mute.response_type, ResponseType::ResponseTypeAck);
        assert_eq!(mute.parameter_data.len(), 2);
        assert!(responder.is_muted());

        assert!(matches!(
            responder.handle_rdm_request(branch(0, 0xFFFF_FFFF_FFFE), &mut NoFallback),
            Ok(RdmAnswer::NoResponse)
        ));

        // muted devices still answer unicast requests
        let get = response(
            &mut responder,
            request(RequestCommandClass::GetCommand, pids::IDENTIFY_DEVICE, &[]),
        );
        assert_eq!(get.response_type, ResponseType::ResponseTypeAck);

        let mut un_mute = request(RequestCommandClass::DiscoveryCommand, pids::DISC_UN_MUTE, &[]);
        un_mute.destination_uid = PackageAddress::Broadcast;
        assert!(matches!(
            responder.handle_rdm_request(un_mute, &mut NoFallback),
            Ok(RdmAnswer::NoResponse)
        ));
        assert!(!responder.is_muted());
    }

    #[test]
    fn test_device_info() {
        let mut responder = responder();
        responder.set_dmx_start_address(100).unwrap();

        let get = response(
            &mut responder,
            request(RequestCommandClass::GetCommand, pids::DEVICE_INFO, &[]),
        );
        let device_info = DeviceInfo::deserialize(&get.parameter_data).unwrap();

        assert_eq!(device_info.dmx_footprint, 4);
        assert_eq!(
            device_info.dmx_personality,
            DmxPersonality {
                current: 1,
                count: 3
            }
        );
        assert_eq!(device_info.dmx_start_address, DmxStartAddress::Address(100));
        assert_eq!(device_info.sensor_count, 0);
    }

    #[test]
    fn test_personality_description() {
        let mut responder = responder();

        let get = response(
            &mut responder,
            request(
                RequestCommandClass::GetCommand,
                pids::DMX_PERSONALITY_DESCRIPTION,
                &[2],
            ),
        );
        let description = PersonalityDescription::deserialize(&get.parameter_data).unwrap();
        assert_eq!(description.personality, 2);
        assert_eq!(description.dmx_footprint, 8);
        assert_eq!(description.description, "8 channel");

        let nack = response(
            &mut responder,
            request(
                RequestCommandClass::GetCommand,
                pids::DMX_PERSONALITY_DESCRIPTION,
                &[0],
            ),
        );
        assert_nack(&nack, NackReason::DataOutOfRange);
    }

    #[test]
    fn test_device_label() {
        let mut responder = responder();

        let set = response(
            &mut responder,
            request(RequestCommandClass::SetCommand, pids::DEVICE_LABEL, b"stage left"),
        );
        assert_eq!(set.response_type, ResponseType::ResponseTypeAck);
        assert_eq!(responder.device_label(), "stage left");

        let nack = response(
            &mut responder,
            request(RequestCommandClass::SetCommand, pids::DEVICE_LABEL, &[b'x'; 33]),
        );
        assert_nack(&nack, NackReason::FormatError);
        assert_eq!(responder.staged_count(), 1);
    }

    #[test]
    fn test_supported_parameters_skip_required() {
        let mut responder = responder();
        responder.register_sensors(1).unwrap();

        let get = response(
            &mut responder,
            request(RequestCommandClass::GetCommand, pids::SUPPORTED_PARAMETERS, &[]),
        );
        let supported: heapless::Vec<u16, 32> = get
            .parameter_data
            .chunks(2)
            .map(|pid| u16::from_be_bytes([pid[0], pid[1]]))
            .collect();

        assert!(supported.contains(&pids::DMX_PERSONALITY));
        assert!(supported.contains(&pids::SENSOR_VALUE));
        assert!(!supported.contains(&pids::DEVICE_INFO));
        assert!(!supported.contains(&pids::DISC_MUTE));
    }

    #[test]
    fn test_queued_message_reports_changes_first() {
        let mut responder = responder();
        responder.set_dmx_start_address(42).unwrap();
        responder
            .get_status_vec_mut()
            .push(StatusMessage {
                sub_device_id: 0,
                status_type: StatusType::StatusWarning,
                status_message_id: 1,
                data_value_1: 2,
                data_value_2: 3,
            })
            .unwrap();

        let queued = response(
            &mut responder,
            request(RequestCommandClass::GetCommand, pids::QUEUED_MESSAGE, &[0x04]),
        );
        assert_eq!(queued.parameter_id, pids::DMX_START_ADDRESS);
        assert_eq!(queued.parameter_data.as_slice(), &42u16.to_be_bytes());
        assert_eq!(queued.message_count, 0);

        // error severity filters out the warning
        let queued = response(
            &mut responder,
            request(RequestCommandClass::GetCommand, pids::QUEUED_MESSAGE, &[0x04]),
        );
        assert_eq!(queued.parameter_id, pids::STATUS_MESSAGES);
        assert!(queued.parameter_data.is_empty());

        let queued = response(
            &mut responder,
            request(RequestCommandClass::GetCommand, pids::QUEUED_MESSAGE, &[0x02]),
        );
        assert_eq!(queued.parameter_id, pids::STATUS_MESSAGES);
        assert_eq!(queued.parameter_data.len(), 9);
        assert!(responder.get_status_vec().is_empty());

        let last = response(
            &mut responder,
            request(RequestCommandClass::GetCommand, pids::QUEUED_MESSAGE, &[0x01]),
        );
        assert_eq!(last.parameter_data, queued.parameter_data);
    }

    #[test]
    fn test_sensors() {
        let mut responder = responder();
        responder.register_sensors(2).unwrap();

        responder.sensor_set(1, 20).unwrap();
        responder.sensor_set(1, -5).unwrap();
        responder.sensor_set(1, 10).unwrap();
        assert_eq!(responder.sensor_set(2, 0), Err(ParameterError::NotFound));

        let get = response(
            &mut responder,
            request(RequestCommandClass::GetCommand, pids::SENSOR_VALUE, &[1]),
        );
        let value = SensorValue::deserialize(&get.parameter_data).unwrap();
        assert_eq!(value.present_value, 10);
        assert_eq!(value.lowest_value, -5);
        assert_eq!(value.highest_value, 20);
        assert_eq!(value.recorded_value, 0);

        let record = response(
            &mut responder,
            request(RequestCommandClass::SetCommand, pids::RECORD_SENSORS, &[0xFF]),
        );
        assert_eq!(record.response_type, ResponseType::ResponseTypeAck);
        assert_eq!(responder.sensor(1).unwrap().recorded_value, 10);

        let nack = response(
            &mut responder,
            request(RequestCommandClass::SetCommand, pids::RECORD_SENSORS, &[5]),
        );
        assert_nack(&nack, NackReason::DataOutOfRange);

        responder.sensor_reset(1).unwrap();
        assert_eq!(responder.sensor(1).unwrap().lowest_value, 10);
    }

    fn handle_get_short_word(
        _context: &mut ResponderContext,
        _request: &RdmRequestData,
    ) -> Result<RdmResult, NackReason> {
        Ok(RdmResult::Acknowledged(DataPack::from_slice(&[0x01]).unwrap()))
    }

    #[test]
    fn test_built_in_responses_match_their_formats() {
        let mut responder = responder();
        responder.register_sensors(1).unwrap();

        let gets: [(u16, &[u8]); 9] = [
            (pids::DEVICE_INFO, &[]),
            (pids::SOFTWARE_VERSION_LABEL, &[]),
            (pids::IDENTIFY_DEVICE, &[]),
            (pids::DMX_START_ADDRESS, &[]),
            (pids::DMX_PERSONALITY, &[]),
            (pids::DMX_PERSONALITY_DESCRIPTION, &[2]),
            (pids::DEVICE_LABEL, &[]),
            (pids::STATUS_MESSAGES, &[0x02]),
            (pids::SENSOR_VALUE, &[0]),
        ];

        for (pid, parameter_data) in gets {
            let ack = response(
                &mut responder,
                request(RequestCommandClass::GetCommand, pid, parameter_data),
            );
            assert_eq!(ack.response_type, ResponseType::ResponseTypeAck);

            let format = responder
                .store()
                .definition(pid)
                .and_then(|definition| definition.format(RequestCommandClass::GetCommand))
                .unwrap();
            assert!(response_matches(format, &Ok(RdmResult::Acknowledged(ack.parameter_data))));
        }
    }

    #[test]
    fn test_response_format_mismatch_is_detected() {
        let format = CommandFormat {
            request: "",
            response: "w$",
        };

        assert!(response_matches(
            &format,
            &Ok(RdmResult::Acknowledged(DataPack::from_slice(&[0x01, 0x02]).unwrap()))
        ));
        assert!(!response_matches(
            &format,
            &Ok(RdmResult::Acknowledged(DataPack::from_slice(&[0x01]).unwrap()))
        ));
        // only acknowledged data is checked
        assert!(response_matches(&format, &Err(NackReason::FormatError)));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "doesn't match its format")]
    fn test_mismatching_handler_panics_in_debug_builds() {
        let mut responder = responder();
        responder
            .store_mut()
            .define(
                ParameterDefinition::new(0x8001, PidHandler::Get(handle_get_short_word))
                    .with_get_format(CommandFormat {
                        request: "",
                        response: "w$",
                    }),
            )
            .unwrap();

        let _ = responder.handle_rdm_request(
            request(RequestCommandClass::GetCommand, 0x8001, &[]),
            &mut NoFallback,
        );
    }

    #[test]
    fn test_fallback_handles_unknown_pids() {
        struct Echo;

        impl RdmResponderHandlerFunc for Echo {
            type Error = ();

            fn handle_rdm(
                &mut self,
                request: &RdmRequestData,
                _context: &mut ResponderContext,
            ) -> Result<RdmResult, ()> {
                Ok(RdmResult::Acknowledged(request.parameter_data.clone()))
            }
        }

        let mut responder = responder();
        let answer = responder
            .handle_rdm_request(
                request(RequestCommandClass::GetCommand, 0x8000, &[1, 2, 3]),
                &mut Echo,
            )
            .unwrap();

        match answer {
            RdmAnswer::Response(response) => {
                assert_eq!(response.parameter_data.as_slice(), &[1, 2, 3])
            },
            _ => panic!("expected a response"),
        }
    }
}
