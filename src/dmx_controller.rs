use crate::command_class::RequestCommandClass;
use crate::consts::{DMX_MAX_PACKAGE_SIZE, DMX_NULL_START, RDM_SUB_DEVICE_ROOT};
use crate::discovery::{DiscoveryBus, DiscoveryOption};
use crate::dmx_driver::{DmxError, DmxPort, TransactionGuard};
use crate::dmx_engine::Turnaround;
use crate::dmx_uart_driver::{Clock, DmxUartDriver};
use crate::pids;
use crate::rdm_data::{
    deserialize_discovery_response, RdmData, RdmDeserializationError, RdmRequestData,
    RdmResponseData,
};
use crate::rdm_packages::{
    deserialize_identify, deserialize_status_messages, deserialize_supported_parameters,
    RdmResponseInfo, RdmResponsePackage,
};
use crate::rdm_types::{
    self, deserialize_label, DeviceInfo, DiscoveryMuteResponse, DmxPersonality,
    DmxStartAddress, OverflowMessageResp, PersonalityDescription, RdmLabel, SensorValue,
    StatusMessages, StatusType, SupportedParameters,
};
use crate::types::{DataPack, NackReason, ResponseType};
use crate::unique_identifier::{PackageAddress, UniqueIdentifier};

#[derive(Debug)]
pub struct DmxControllerConfig {
    pub rdm_uid: UniqueIdentifier,
    /// Port id sent in requests, numbered from 1.
    pub port_id: u8,
}

impl Default for DmxControllerConfig {
    fn default() -> Self {
        Self {
            rdm_uid: UniqueIdentifier::new(0x7FF0, 0).unwrap(), // prototyping id
            port_id: 1,
        }
    }
}

#[derive(Debug)]
pub struct RdmRequest {
    /// The unique id of the recipient of the request.
    pub destination_uid: PackageAddress,
    /// The sub-device the request is addressed to. 0 is the root device.
    pub sub_device: u16,
    /// The id that specifies the type of the package.
    pub parameter_id: u16,
    /// The parameter data.
    pub data: DataPack,
}

impl RdmRequest {
    /// Creates an RdmRequest to the root device with empty parameter data.
    pub fn empty(uid: PackageAddress, pid: u16) -> Self {
        Self {
            destination_uid: uid,
            sub_device: RDM_SUB_DEVICE_ROOT,
            parameter_id: pid,
            data: heapless::Vec::new(),
        }
    }

    /// Creates an RdmRequest to the root device. Fails if `data` is longer than 231 bytes.
    pub fn with_data(uid: PackageAddress, pid: u16, data: &[u8]) -> Option<Self> {
        Some(Self {
            data: DataPack::from_slice(data).ok()?,
            ..Self::empty(uid, pid)
        })
    }

    pub fn to_sub_device(mut self, sub_device: u16) -> Self {
        self.sub_device = sub_device;
        self
    }
}

#[derive(Debug)]
pub enum RdmResponse {
    /// The message data of the response.
    Response(RdmResponseInfo),
    /// The request has been excepted but the message data is too big to fit into one response.
    /// Use the get command on the same pid to receive the rest of it until you just receive a Response.
    IncompleteResponse(RdmResponseInfo),
    /// No response was received since the request was a broadcast.
    RequestWasBroadcast,
}

#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RdmResponseError<E> {
    /// Another transaction holds the port.
    Busy,
    /// The received package doesn't match the request.
    NotMatching,
    /// The response has an unknown response type or command class.
    ResponseInvalid,
    /// The parameter data couldn't be deserialized.
    ParameterDataNotDeserializable,
    /// The response has an error status but the contents aren't deserializable.
    ErrorNotDeserializable,
    /// The response isn't ready yet. The value is the estimated time in 100ms steps,
    /// see [ack_timer_to_millis].
    NotReady(u16),
    /// The responder didn't acknowledge the request.
    NotAcknowledged(NackReason),
    /// The underlying dmx port raised an error.
    DmxError(DmxError<E>),
}

impl<E: core::fmt::Display> core::fmt::Display for RdmResponseError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Busy => write!(f, "The port is busy."),
            Self::NotMatching => write!(f, "The response doesn't match the request."),
            Self::ResponseInvalid => write!(f, "The response is invalid."),
            Self::ParameterDataNotDeserializable => {
                write!(f, "The parameter data couldn't be deserialized.")
            },
            Self::ErrorNotDeserializable => write!(f, "The error response is malformed."),
            Self::NotReady(units) => write!(f, "Response not ready, retry in {}ms.", ack_timer_to_millis(*units)),
            Self::NotAcknowledged(nack_reason) => write!(f, "Not acknowledged: {}", nack_reason),
            Self::DmxError(error) => write!(f, "{}", error),
        }
    }
}

impl<E> From<DmxError<E>> for RdmResponseError<E> {
    fn from(value: DmxError<E>) -> Self {
        match value {
            DmxError::Busy => Self::Busy,
            error => Self::DmxError(error),
        }
    }
}

#[cfg(feature = "std")]
impl<E: core::fmt::Debug + core::fmt::Display> std::error::Error for RdmResponseError<E> {}

impl<E> From<rdm_types::DeserializationError> for RdmResponseError<E> {
    fn from(_: rdm_types::DeserializationError) -> Self {
        Self::ParameterDataNotDeserializable
    }
}

/// Converts the 100ms units of an ACK_TIMER response to milliseconds.
pub const fn ack_timer_to_millis(units: u16) -> u32 {
    units as u32 * 100
}

/// An RDM controller on a [DmxPort].
///
/// Every request takes the transaction lock of the port and restores the frame buffer
/// afterward, so the dmx output survives rdm traffic.
pub struct DmxController<
    'p,
    D: DmxUartDriver,
    C: Clock,
    const N: usize = DMX_MAX_PACKAGE_SIZE,
> {
    port: &'p DmxPort<D, C, N>,
    uid: UniqueIdentifier,
    port_id: u8,
    last_message_count: u8,
    transaction: Option<TransactionGuard<'p, D, C, N>>,
}

impl<'p, D: DmxUartDriver, C: Clock, const N: usize> DmxController<'p, D, C, N> {
    /// Creates a new DmxController instance.
    pub fn new(port: &'p DmxPort<D, C, N>, config: &DmxControllerConfig) -> Self {
        Self {
            port,
            uid: config.rdm_uid,
            port_id: config.port_id,
            last_message_count: 0,
            transaction: None,
        }
    }

    pub fn port(&self) -> &'p DmxPort<D, C, N> {
        self.port
    }

    pub fn uid(&self) -> UniqueIdentifier {
        self.uid
    }

    /// Holds the port lock while `f` runs, so several requests form one transaction.
    pub fn transaction<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, RdmResponseError<D::DriverError>> {
        let guard = self.lock()?;
        let outer = self.transaction.replace(guard);

        let result = f(self);

        self.transaction = outer;
        Ok(result)
    }

    fn lock(&self) -> Result<TransactionGuard<'p, D, C, N>, RdmResponseError<D::DriverError>> {
        match &self.transaction {
            Some(guard) => Ok(guard.nested()),
            None => self
                .port
                .lock(self.port.config().transaction_timeout_us)
                .map_err(|_| RdmResponseError::Busy),
        }
    }

    /// Sends a package with a custom start code. Fails with [DmxError::BufferOverflow] if the
    /// package doesn't fit into the frame buffer.
    pub fn send_custom_package(
        &mut self,
        start_code: u8,
        package: &[u8],
    ) -> Result<(), RdmResponseError<D::DriverError>> {
        let _guard = self.lock()?;

        if package.len() + 1 > N {
            return Err(RdmResponseError::DmxError(DmxError::BufferOverflow));
        }

        self.port.write(&[start_code])?;
        self.port.write_at(1, package)?;
        self.port.send(package.len() + 1)?;
        self.port.wait_sent(self.port.config().transaction_timeout_us)?;

        Ok(())
    }

    /// Sends a dmx package. Package can't be bigger than 512 bytes.
    pub fn send_dmx_package(
        &mut self,
        package: &[u8],
    ) -> Result<(), RdmResponseError<D::DriverError>> {
        self.send_custom_package(DMX_NULL_START, package)
    }

    /// Sends a request and waits for the response.
    ///
    /// Requests to broadcast addresses return [RdmResponse::RequestWasBroadcast] once they are
    /// sent. The transaction number advances on every call, also if it fails.
    pub fn rdm_request(
        &mut self,
        command_class: RequestCommandClass,
        request: RdmRequest,
    ) -> Result<RdmResponse, RdmResponseError<D::DriverError>> {
        let transaction_number = self.port.next_transaction_number();
        let _guard = self.lock()?;

        let snapshot = self.port.snapshot();
        let result = self.exchange(command_class, &request, transaction_number);
        self.port.restore(&snapshot)?;

        let Some(response) = result? else {
            return Ok(RdmResponse::RequestWasBroadcast);
        };
        self.last_message_count = response.message_count;

        evaluate_response(response)
    }

    /// Sends the request and returns the matching response, or None for broadcasts.
    fn exchange(
        &self,
        command_class: RequestCommandClass,
        request: &RdmRequest,
        transaction_number: u8,
    ) -> Result<Option<RdmResponseData>, RdmResponseError<D::DriverError>> {
        let config = self.port.config();

        let serialized = RdmData::Request(RdmRequestData {
            destination_uid: request.destination_uid,
            source_uid: self.uid,
            transaction_number,
            port_id: self.port_id,
            message_count: 0,
            sub_device: request.sub_device,
            command_class,
            parameter_id: request.parameter_id,
            parameter_data: request.data.clone(),
        })
        .serialize();

        if self.port.write(&serialized)? != serialized.len() {
            return Err(RdmResponseError::DmxError(DmxError::BufferOverflow));
        }

        let broadcast = request.destination_uid.is_broadcast();
        let turnaround = if broadcast {
            Turnaround::None
        } else {
            Turnaround::Receive
        };

        self.port.send_frame(serialized.len(), true, turnaround)?;
        self.port.wait_sent(config.transaction_timeout_us)?;

        if broadcast {
            return Ok(None);
        }

        let start = self.port.clock().now_us();
        loop {
            if let Err(error) = self.port.receive(config.response_timeout_us) {
                debug!("no response to pid {:#06x}", request.parameter_id);
                return Err(error.into());
            }

            let rdm_data = self
                .port
                .read_frame(RdmData::deserialize)
                .map_err(|error| match error {
                    RdmDeserializationError::ResponseTypeNotFound(_)
                    | RdmDeserializationError::CommandClassNotFound(_) => {
                        RdmResponseError::ResponseInvalid
                    },
                    error => RdmResponseError::DmxError(DmxError::DeserializationError(error)),
                })?;

            let response = match rdm_data {
                RdmData::Request(_) => return Err(RdmResponseError::NotMatching),
                RdmData::Response(response) => response,
            };

            // late responses of earlier transactions are skipped
            if response.transaction_number == transaction_number {
                return self
                    .check_response(command_class, request, response)
                    .map(Some);
            }

            trace!("skipped response with transaction number {}", response.transaction_number);

            let elapsed = self.port.clock().now_us().wrapping_sub(start);
            if elapsed >= config.transaction_timeout_us as u64 {
                return Err(RdmResponseError::DmxError(DmxError::TimeoutError));
            }
        }
    }

    fn check_response(
        &self,
        command_class: RequestCommandClass,
        request: &RdmRequest,
        response: RdmResponseData,
    ) -> Result<RdmResponseData, RdmResponseError<D::DriverError>> {
        if response.destination_uid != PackageAddress::Device(self.uid) {
            return Err(RdmResponseError::NotMatching);
        }

        if let PackageAddress::Device(destination) = request.destination_uid {
            if response.source_uid != destination {
                return Err(RdmResponseError::NotMatching);
            }
        }

        if response.command_class != command_class.get_response_class() {
            return Err(RdmResponseError::ResponseInvalid);
        }

        Ok(response)
    }

    /// Sends a get request.
    pub fn rdm_get(
        &mut self,
        request: RdmRequest,
    ) -> Result<RdmResponse, RdmResponseError<D::DriverError>> {
        self.rdm_request(RequestCommandClass::GetCommand, request)
    }

    /// Sends a set request.
    pub fn rdm_set(
        &mut self,
        request: RdmRequest,
    ) -> Result<RdmResponse, RdmResponseError<D::DriverError>> {
        self.rdm_request(RequestCommandClass::SetCommand, request)
    }

    /// Sends a discovery request to a range of device ids and returns the found uid
    /// if there is no collision and the device does not have its discovery muted.
    pub fn rdm_discover(
        &mut self,
        first_uid: u64,
        last_uid: u64,
    ) -> Result<DiscoveryOption, RdmResponseError<D::DriverError>> {
        let mut parameter_data = DataPack::new();
        parameter_data
            .extend_from_slice(&first_uid.to_be_bytes()[2..8])
            .unwrap();
        parameter_data
            .extend_from_slice(&last_uid.to_be_bytes()[2..8])
            .unwrap();

        let transaction_number = self.port.next_transaction_number();
        let _guard = self.lock()?;
        let snapshot = self.port.snapshot();

        let result = self.discovery_exchange(parameter_data, transaction_number);
        self.port.restore(&snapshot)?;

        result
    }

    fn discovery_exchange(
        &self,
        parameter_data: DataPack,
        transaction_number: u8,
    ) -> Result<DiscoveryOption, RdmResponseError<D::DriverError>> {
        let config = self.port.config();

        let serialized = RdmData::Request(RdmRequestData {
            destination_uid: PackageAddress::Broadcast,
            source_uid: self.uid,
            transaction_number,
            port_id: self.port_id,
            message_count: 0,
            sub_device: RDM_SUB_DEVICE_ROOT,
            command_class: RequestCommandClass::DiscoveryCommand,
            parameter_id: pids::DISC_UNIQUE_BRANCH,
            parameter_data,
        })
        .serialize();

        if self.port.write(&serialized)? != serialized.len() {
            return Err(RdmResponseError::DmxError(DmxError::BufferOverflow));
        }

        self.port
            .send_frame(serialized.len(), true, Turnaround::ReceiveNoBreak)?;
        self.port.wait_sent(config.transaction_timeout_us)?;

        match self.port.receive(config.response_timeout_us) {
            Ok(_) => {},
            Err(DmxError::TimeoutError) => return Ok(DiscoveryOption::NoDevice),
            // colliding answers corrupt the frame
            Err(DmxError::FramingError | DmxError::BufferOverflow | DmxError::UartOverflow) => {
                return Ok(DiscoveryOption::Collision)
            },
            Err(error) => return Err(error.into()),
        }

        Ok(
            match self.port.read_frame(deserialize_discovery_response) {
                Ok(uid) => DiscoveryOption::Found(uid),
                Err(_) => DiscoveryOption::Collision,
            },
        )
    }

    /// Mute device from discovery. It will not respond to discovery requests anymore.
    /// Returns None if the request was a broadcast.
    pub fn rdm_disc_mute(
        &mut self,
        uid: PackageAddress,
    ) -> Result<Option<DiscoveryMuteResponse>, RdmResponseError<D::DriverError>> {
        let response = self.rdm_request(
            RequestCommandClass::DiscoveryCommand,
            RdmRequest::empty(uid, pids::DISC_MUTE),
        )?;

        deserialize_discovery_mute_response(&response)
    }

    /// Unmute device from discovery. It will respond to discovery requests again.
    /// Returns None if the request was a broadcast.
    pub fn rdm_disc_un_mute(
        &mut self,
        uid: PackageAddress,
    ) -> Result<Option<DiscoveryMuteResponse>, RdmResponseError<D::DriverError>> {
        let response = self.rdm_request(
            RequestCommandClass::DiscoveryCommand,
            RdmRequest::empty(uid, pids::DISC_UN_MUTE),
        )?;

        deserialize_discovery_mute_response(&response)
    }

    fn get_complete(
        &mut self,
        request: RdmRequest,
    ) -> Result<RdmResponseInfo, RdmResponseError<D::DriverError>> {
        match self.rdm_get(request)? {
            RdmResponse::Response(response_info) => Ok(response_info),
            _ => Err(RdmResponseError::ParameterDataNotDeserializable),
        }
    }

    fn set_data(
        &mut self,
        uid: PackageAddress,
        pid: u16,
        data: &[u8],
    ) -> Result<(), RdmResponseError<D::DriverError>> {
        let request = RdmRequest::with_data(uid, pid, data)
            .ok_or(RdmResponseError::ParameterDataNotDeserializable)?;
        self.rdm_set(request)?;

        Ok(())
    }

    /// Get the identify state in the rdm device (led for searching)
    pub fn rdm_get_identify(
        &mut self,
        uid: UniqueIdentifier,
    ) -> Result<bool, RdmResponseError<D::DriverError>> {
        let response_info = self.get_complete(RdmRequest::empty(
            PackageAddress::Device(uid),
            pids::IDENTIFY_DEVICE,
        ))?;

        Ok(deserialize_identify(&response_info.data)?)
    }

    /// Set the identify state in the rdm device (led for searching)
    pub fn rdm_set_identify(
        &mut self,
        uid: PackageAddress,
        enabled: bool,
    ) -> Result<(), RdmResponseError<D::DriverError>> {
        self.set_data(uid, pids::IDENTIFY_DEVICE, &[enabled as u8])
    }

    /// Get the software version label.
    pub fn rdm_get_software_version_label(
        &mut self,
        uid: UniqueIdentifier,
    ) -> Result<RdmLabel, RdmResponseError<D::DriverError>> {
        let response_info = self.get_complete(RdmRequest::empty(
            PackageAddress::Device(uid),
            pids::SOFTWARE_VERSION_LABEL,
        ))?;

        Ok(deserialize_label(&response_info.data)?)
    }

    pub fn rdm_get_device_label(
        &mut self,
        uid: UniqueIdentifier,
    ) -> Result<RdmLabel, RdmResponseError<D::DriverError>> {
        let response_info = self.get_complete(RdmRequest::empty(
            PackageAddress::Device(uid),
            pids::DEVICE_LABEL,
        ))?;

        Ok(deserialize_label(&response_info.data)?)
    }

    /// Set the device label. Labels are cut after 32 bytes.
    pub fn rdm_set_device_label(
        &mut self,
        uid: PackageAddress,
        label: &str,
    ) -> Result<(), RdmResponseError<D::DriverError>> {
        let length = label.len().min(crate::consts::RDM_MAX_LABEL_LENGTH);
        self.set_data(uid, pids::DEVICE_LABEL, &label.as_bytes()[..length])
    }

    /// Get the current start address of the dmx slave.
    pub fn rdm_get_dmx_start_address(
        &mut self,
        uid: UniqueIdentifier,
    ) -> Result<DmxStartAddress, RdmResponseError<D::DriverError>> {
        let response_info = self.get_complete(RdmRequest::empty(
            PackageAddress::Device(uid),
            pids::DMX_START_ADDRESS,
        ))?;

        Ok(DmxStartAddress::deserialize(&response_info.data)?)
    }

    /// Set the current start address of the dmx slave. Addresses outside of 1 to 512 are
    /// rejected with [NackReason::DataOutOfRange] without sending a request.
    pub fn rdm_set_dmx_start_address(
        &mut self,
        uid: PackageAddress,
        start_address: u16,
    ) -> Result<(), RdmResponseError<D::DriverError>> {
        if !(1..=512).contains(&start_address) {
            return Err(RdmResponseError::NotAcknowledged(NackReason::DataOutOfRange));
        }

        self.set_data(uid, pids::DMX_START_ADDRESS, &start_address.to_be_bytes())
    }

    pub fn rdm_get_dmx_personality(
        &mut self,
        uid: UniqueIdentifier,
    ) -> Result<DmxPersonality, RdmResponseError<D::DriverError>> {
        let response_info = self.get_complete(RdmRequest::empty(
            PackageAddress::Device(uid),
            pids::DMX_PERSONALITY,
        ))?;

        Ok(DmxPersonality::deserialize(&response_info.data)?)
    }

    /// Selects a personality, numbered from 1.
    pub fn rdm_set_dmx_personality(
        &mut self,
        uid: PackageAddress,
        personality: u8,
    ) -> Result<(), RdmResponseError<D::DriverError>> {
        self.set_data(uid, pids::DMX_PERSONALITY, &[personality])
    }

    pub fn rdm_get_personality_description(
        &mut self,
        uid: UniqueIdentifier,
        personality: u8,
    ) -> Result<PersonalityDescription, RdmResponseError<D::DriverError>> {
        let response_info = self.get_complete(RdmRequest {
            data: DataPack::from_slice(&[personality]).unwrap(),
            ..RdmRequest::empty(
                PackageAddress::Device(uid),
                pids::DMX_PERSONALITY_DESCRIPTION,
            )
        })?;

        Ok(PersonalityDescription::deserialize(&response_info.data)?)
    }

    pub fn rdm_get_sensor_value(
        &mut self,
        uid: UniqueIdentifier,
        sensor_number: u8,
    ) -> Result<SensorValue, RdmResponseError<D::DriverError>> {
        let response_info = self.get_complete(RdmRequest {
            data: DataPack::from_slice(&[sensor_number]).unwrap(),
            ..RdmRequest::empty(PackageAddress::Device(uid), pids::SENSOR_VALUE)
        })?;

        Ok(SensorValue::deserialize(&response_info.data)?)
    }

    /// Records the present value of a sensor, 0xFF records all sensors.
    pub fn rdm_record_sensors(
        &mut self,
        uid: PackageAddress,
        sensor_number: u8,
    ) -> Result<(), RdmResponseError<D::DriverError>> {
        self.set_data(uid, pids::RECORD_SENSORS, &[sensor_number])
    }

    /// Get the last queued message.
    ///
    /// Use [DmxController::rdm_get_last_message_count]
    /// to receive the message count from the last request.
    ///
    /// If no messages are queued this will return the current [StatusMessages].
    /// You can use the [StatusType] to filter these [StatusMessages].
    ///
    /// Note that you can only use [StatusType::StatusAdvisory], [StatusType::StatusWarning],
    /// [StatusType::StatusError] and [StatusType::StatusGetLastMessage].
    ///
    /// If you want to receive the previous response use [StatusType::StatusGetLastMessage].
    pub fn rdm_get_queued_message(
        &mut self,
        uid: UniqueIdentifier,
        status_requested: StatusType,
    ) -> Result<RdmResponsePackage, RdmResponseError<D::DriverError>> {
        let response_info = self.get_complete(RdmRequest {
            data: DataPack::from_slice(&[status_requested as u8]).unwrap(),
            ..RdmRequest::empty(PackageAddress::Device(uid), pids::QUEUED_MESSAGE)
        })?;

        Ok(RdmResponsePackage::from_response_info(response_info)?)
    }

    /// Get status messages. Filter severity by using the [StatusType::StatusAdvisory], [StatusType::StatusWarning]
    /// and [StatusType::StatusError].
    ///
    /// If you want to receive the previously set of status messages again use [StatusType::StatusGetLastMessage].
    /// To perform an availability test use [StatusType::StatusNone].
    pub fn rdm_get_status_messages(
        &mut self,
        uid: UniqueIdentifier,
        status_requested: StatusType,
    ) -> Result<OverflowMessageResp<StatusMessages>, RdmResponseError<D::DriverError>> {
        let response = self.rdm_get(RdmRequest {
            data: DataPack::from_slice(&[status_requested as u8]).unwrap(),
            ..RdmRequest::empty(PackageAddress::Device(uid), pids::STATUS_MESSAGES)
        })?;

        match response {
            RdmResponse::Response(response_info) => Ok(OverflowMessageResp::Complete(
                deserialize_status_messages(&response_info.data)?,
            )),
            RdmResponse::IncompleteResponse(response_info) => Ok(OverflowMessageResp::Incomplete(
                deserialize_status_messages(&response_info.data)?,
            )),
            RdmResponse::RequestWasBroadcast => {
                Err(RdmResponseError::ParameterDataNotDeserializable)
            },
        }
    }

    /// Get the parameter ids that are supported by the responder.
    ///
    /// <div class="warning">Note that this only includes optional parameter ids that are not
    /// required to be compliant with ANSI E1.20.</div>
    pub fn rdm_get_supported_parameters(
        &mut self,
        uid: UniqueIdentifier,
    ) -> Result<OverflowMessageResp<SupportedParameters>, RdmResponseError<D::DriverError>> {
        let response = self.rdm_get(RdmRequest::empty(
            PackageAddress::Device(uid),
            pids::SUPPORTED_PARAMETERS,
        ))?;

        match response {
            RdmResponse::Response(response_info) => Ok(OverflowMessageResp::Complete(
                deserialize_supported_parameters(&response_info.data)?,
            )),
            RdmResponse::IncompleteResponse(response_info) => Ok(OverflowMessageResp::Incomplete(
                deserialize_supported_parameters(&response_info.data)?,
            )),
            RdmResponse::RequestWasBroadcast => {
                Err(RdmResponseError::ParameterDataNotDeserializable)
            },
        }
    }

    /// Get the device info from the rdm device.
    pub fn rdm_get_device_info(
        &mut self,
        uid: UniqueIdentifier,
    ) -> Result<DeviceInfo, RdmResponseError<D::DriverError>> {
        let response_info = self.get_complete(RdmRequest::empty(
            PackageAddress::Device(uid),
            pids::DEVICE_INFO,
        ))?;

        Ok(DeviceInfo::deserialize(&response_info.data)?)
    }

    /// Returns the message count that was received on the last request using this instance.
    pub fn rdm_get_last_message_count(&self) -> u8 {
        self.last_message_count
    }
}

impl<D: DmxUartDriver, C: Clock, const N: usize> DiscoveryBus for DmxController<'_, D, C, N> {
    type Error = RdmResponseError<D::DriverError>;

    fn discover(
        &mut self,
        lower_bound: u64,
        upper_bound: u64,
    ) -> Result<DiscoveryOption, Self::Error> {
        self.rdm_discover(lower_bound, upper_bound)
    }

    fn mute(&mut self, uid: UniqueIdentifier) -> Result<bool, Self::Error> {
        match self.rdm_disc_mute(PackageAddress::Device(uid)) {
            Ok(_) => Ok(true),
            Err(
                RdmResponseError::DmxError(DmxError::TimeoutError | DmxError::DeserializationError(_))
                | RdmResponseError::NotMatching
                | RdmResponseError::ResponseInvalid,
            ) => Ok(false),
            Err(error) => Err(error),
        }
    }
}

fn evaluate_response<E>(response: RdmResponseData) -> Result<RdmResponse, RdmResponseError<E>> {
    let response_info = RdmResponseInfo {
        parameter_id: response.parameter_id,
        message_count: response.message_count,
        data: response.parameter_data,
    };

    match response.response_type {
        ResponseType::ResponseTypeAck => Ok(RdmResponse::Response(response_info)),
        ResponseType::ResponseTypeAckTimer => {
            if response_info.data.len() != 2 {
                return Err(RdmResponseError::ErrorNotDeserializable);
            }

            Err(RdmResponseError::NotReady(u16::from_be_bytes(
                response_info.data[..2].try_into().unwrap(),
            )))
        },
        ResponseType::ResponseTypeNackReason => {
            if response_info.data.len() != 2 {
                return Err(RdmResponseError::ErrorNotDeserializable);
            }

            let nack_reason = u16::from_be_bytes(response_info.data[..2].try_into().unwrap())
                .try_into()
                .or(Err(RdmResponseError::ErrorNotDeserializable))?;

            Err(RdmResponseError::NotAcknowledged(nack_reason))
        },
        ResponseType::ResponseTypeAckOverflow => {
            Ok(RdmResponse::IncompleteResponse(response_info))
        },
    }
}

fn deserialize_discovery_mute_response<E>(
    response: &RdmResponse,
) -> Result<Option<DiscoveryMuteResponse>, RdmResponseError<E>> {
    Ok(match response {
        RdmResponse::Response(response_info) => Some(
            DiscoveryMuteResponse::deserialize(&response_info.data)
                .map_err(|_| RdmResponseError::ParameterDataNotDeserializable)?,
        ),
        RdmResponse::RequestWasBroadcast => None,
        RdmResponse::IncompleteResponse(_) => {
            return Err(RdmResponseError::ParameterDataNotDeserializable)
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmx_driver::DmxConfig;
    use crate::dmx_uart_driver::DmxEvent;
    use crate::utils::encode_discovery_response;
    use core::cell::Cell;
    use std::collections::VecDeque;
    use std::vec::Vec;

    enum Reply {
        Silent,
        Respond(ResponseType, Vec<u8>),
        WrongTransactionNumber,
        DiscoveryAnswer(UniqueIdentifier),
        Garbage,
    }

    /// Transport that answers every request with the next scripted reply.
    #[derive(Default)]
    struct ScriptedUart {
        events: VecDeque<DmxEvent>,
        rx: VecDeque<u8>,
        tx: Vec<u8>,
        replies: VecDeque<Reply>,
        requests: Vec<RdmRequestData>,
        /// Never reports the end of a transmission.
        stalled: bool,
        tx_flushes: usize,
    }

    impl ScriptedUart {
        fn inject(&mut self, frame: &[u8], with_break: bool) {
            if with_break {
                self.events.push_back(DmxEvent::BreakDetected);
            }
            self.rx.extend(frame.iter().copied());
            self.events.push_back(DmxEvent::RxData);
            self.events.push_back(DmxEvent::RxTimeout);
        }

        fn answer(&mut self, request: RdmRequestData) {
            let responder_uid = match request.destination_uid {
                PackageAddress::Device(uid) => uid,
                _ => UniqueIdentifier::new(0x7FF0, 0x42).unwrap(),
            };

            let reply = self.replies.pop_front().unwrap_or(Reply::Silent);
            match reply {
                Reply::Silent => {},
                Reply::Respond(response_type, data) => {
                    let response = request
                        .build_response_from(
                            responder_uid,
                            response_type,
                            DataPack::from_slice(&data).unwrap(),
                            2,
                        )
                        .unwrap();
                    self.inject(&RdmData::Response(response).serialize(), true);
                },
                Reply::WrongTransactionNumber => {
                    let mut response = request
                        .build_response_from(responder_uid, ResponseType::ResponseTypeAck, DataPack::new(), 0)
                        .unwrap();
                    response.transaction_number = response.transaction_number.wrapping_sub(1);
                    self.inject(&RdmData::Response(response).serialize(), true);
                },
                Reply::DiscoveryAnswer(uid) => self.inject(&encode_discovery_response(uid), false),
                Reply::Garbage => self.inject(&[0xFE, 0xFE, 0x12, 0x34, 0x56], false),
            }

            self.requests.push(request);
        }
    }

    impl DmxUartDriver for ScriptedUart {
        type DriverError = ();

        fn write(&mut self, bytes: &[u8]) -> Result<usize, ()> {
            self.tx.extend_from_slice(bytes);
            if self.stalled {
                return Ok(bytes.len());
            }
            self.events.push_back(DmxEvent::TxDone);

            if let Ok(RdmData::Request(request)) = RdmData::deserialize(bytes) {
                self.answer(request);
            }

            Ok(bytes.len())
        }

        fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize, ()> {
            let mut read = 0;
            while read < buffer.len() {
                let Some(byte) = self.rx.pop_front() else {
                    break;
                };
                buffer[read] = byte;
                read += 1;
            }

            Ok(read)
        }

        fn assert_break(&mut self) -> Result<(), ()> {
            Ok(())
        }

        fn deassert_break(&mut self) -> Result<(), ()> {
            Ok(())
        }

        fn flush_rx(&mut self) -> Result<(), ()> {
            self.rx.clear();
            Ok(())
        }

        fn flush_tx(&mut self) -> Result<(), ()> {
            self.tx_flushes += 1;
            Ok(())
        }

        fn poll_event(&mut self) -> Option<DmxEvent> {
            self.events.pop_front()
        }
    }

    #[derive(Default)]
    struct StepClock(Cell<u64>);

    impl Clock for StepClock {
        fn now_us(&self) -> u64 {
            let now = self.0.get();
            self.0.set(now + 10);
            now
        }
    }

    type TestPort = DmxPort<ScriptedUart, StepClock>;

    fn test_port(replies: impl IntoIterator<Item = Reply>) -> TestPort {
        let uart = ScriptedUart {
            replies: replies.into_iter().collect(),
            ..Default::default()
        };

        DmxPort::new(uart, StepClock::default(), DmxConfig::default()).unwrap()
    }

    fn responder_uid() -> UniqueIdentifier {
        UniqueIdentifier::new(0x7FF0, 0x42).unwrap()
    }

    fn device() -> PackageAddress {
        PackageAddress::Device(responder_uid())
    }

    #[test]
    fn test_get_identify() {
        let port = test_port([Reply::Respond(ResponseType::ResponseTypeAck, vec![1])]);
        let mut controller = DmxController::new(&port, &DmxControllerConfig::default());

        assert_eq!(controller.rdm_get_identify(responder_uid()), Ok(true));
        assert_eq!(controller.rdm_get_last_message_count(), 2);

        port.with_driver(|uart| {
            let request = &uart.requests[0];
            assert_eq!(request.parameter_id, pids::IDENTIFY_DEVICE);
            assert_eq!(request.command_class, RequestCommandClass::GetCommand);
            assert_eq!(request.port_id, 1);
        });
    }

    #[test]
    fn test_nack_is_reported() {
        let port = test_port([Reply::Respond(
            ResponseType::ResponseTypeNackReason,
            NackReason::DataOutOfRange.serialize().to_vec(),
        )]);
        let mut controller = DmxController::new(&port, &DmxControllerConfig::default());

        assert_eq!(
            controller.rdm_set_dmx_personality(device(), 9),
            Err(RdmResponseError::NotAcknowledged(NackReason::DataOutOfRange))
        );
    }

    #[test]
    fn test_ack_timer_is_reported() {
        let port = test_port([Reply::Respond(
            ResponseType::ResponseTypeAckTimer,
            3u16.to_be_bytes().to_vec(),
        )]);
        let mut controller = DmxController::new(&port, &DmxControllerConfig::default());

        assert_eq!(
            controller.rdm_get_device_info(responder_uid()),
            Err(RdmResponseError::NotReady(3))
        );
        assert_eq!(ack_timer_to_millis(3), 300);
    }

    #[test]
    fn test_ack_overflow_is_incomplete() {
        let port = test_port([Reply::Respond(
            ResponseType::ResponseTypeAckOverflow,
            vec![0x00, 0x82, 0x00, 0xE0],
        )]);
        let mut controller = DmxController::new(&port, &DmxControllerConfig::default());

        match controller.rdm_get_supported_parameters(responder_uid()) {
            Ok(OverflowMessageResp::Incomplete(parameters)) => {
                assert_eq!(parameters.as_slice(), &[0x0082, 0x00E0])
            },
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_timeout_restores_frame_buffer() {
        let port = test_port([Reply::Silent]);
        port.write(&[0x00, 1, 2, 3]).unwrap();
        let mut controller = DmxController::new(&port, &DmxControllerConfig::default());

        assert_eq!(
            controller.rdm_get_dmx_start_address(responder_uid()),
            Err(RdmResponseError::DmxError(DmxError::TimeoutError))
        );
        assert_eq!(&port.snapshot().data()[..4], &[0x00, 1, 2, 3]);
        assert!(!port.is_locked());
    }

    #[test]
    fn test_stalled_transmission_is_aborted() {
        let port = test_port([Reply::Respond(ResponseType::ResponseTypeAck, vec![1])]);
        port.with_driver(|uart| uart.stalled = true);
        port.write(&[0x00, 7, 7]).unwrap();
        let mut controller = DmxController::new(&port, &DmxControllerConfig::default());

        assert_eq!(
            controller.rdm_get_identify(responder_uid()),
            Err(RdmResponseError::DmxError(DmxError::TimeoutError))
        );
        assert_eq!(&port.snapshot().data()[..3], &[0x00, 7, 7]);
        assert!(!port.is_locked());

        assert_eq!(
            controller.rdm_discover(0, 0xFFFF_FFFFFFFE),
            Err(RdmResponseError::DmxError(DmxError::TimeoutError))
        );
        assert_eq!(&port.snapshot().data()[..3], &[0x00, 7, 7]);
        port.with_driver(|uart| assert_eq!(uart.tx_flushes, 2));

        // the port is usable again once the transport recovers
        port.with_driver(|uart| uart.stalled = false);
        assert_eq!(controller.rdm_get_identify(responder_uid()), Ok(true));
        assert_eq!(&port.snapshot().data()[..3], &[0x00, 7, 7]);
    }

    #[test]
    fn test_response_restores_frame_buffer() {
        let port = test_port([Reply::Respond(
            ResponseType::ResponseTypeAck,
            12u16.to_be_bytes().to_vec(),
        )]);
        port.write(&[0x00, 1, 2, 3]).unwrap();
        let mut controller = DmxController::new(&port, &DmxControllerConfig::default());

        assert_eq!(
            controller.rdm_get_dmx_start_address(responder_uid()),
            Ok(DmxStartAddress::Address(12))
        );
        assert_eq!(&port.snapshot().data()[..4], &[0x00, 1, 2, 3]);
    }

    #[test]
    fn test_busy_port_leaves_buffer_untouched() {
        let port = test_port([]);
        port.write(&[0x00, 7, 7]).unwrap();
        let mut controller = DmxController::new(&port, &DmxControllerConfig::default());

        let guard = port.lock(0).unwrap();
        assert_eq!(
            controller.rdm_get_identify(responder_uid()),
            Err(RdmResponseError::Busy)
        );
        drop(guard);

        assert_eq!(&port.snapshot().data()[..3], &[0x00, 7, 7]);
        port.with_driver(|uart| assert!(uart.tx.is_empty()));
        // the transaction number was used up anyway
        assert_eq!(port.next_transaction_number(), 1);
    }

    #[test]
    fn test_transaction_numbers_advance_on_failure() {
        let port = test_port([Reply::Silent, Reply::Respond(ResponseType::ResponseTypeAck, vec![0])]);
        let mut controller = DmxController::new(&port, &DmxControllerConfig::default());

        assert!(controller.rdm_get_identify(responder_uid()).is_err());
        assert_eq!(controller.rdm_get_identify(responder_uid()), Ok(false));

        port.with_driver(|uart| {
            assert_eq!(uart.requests[0].transaction_number, 0);
            assert_eq!(uart.requests[1].transaction_number, 1);
        });
    }

    #[test]
    fn test_stale_response_is_ignored() {
        let port = test_port([Reply::WrongTransactionNumber]);
        let mut controller = DmxController::new(&port, &DmxControllerConfig::default());

        assert_eq!(
            controller.rdm_get_identify(responder_uid()),
            Err(RdmResponseError::DmxError(DmxError::TimeoutError))
        );
    }

    #[test]
    fn test_broadcast_returns_without_response() {
        let port = test_port([]);
        let mut controller = DmxController::new(&port, &DmxControllerConfig::default());

        assert_eq!(
            controller.rdm_set_identify(PackageAddress::Broadcast, true),
            Ok(())
        );
        assert!(matches!(
            controller.rdm_disc_un_mute(PackageAddress::Broadcast),
            Ok(None)
        ));
        port.with_driver(|uart| assert_eq!(uart.requests.len(), 2));
    }

    #[test]
    fn test_start_address_zero_is_rejected_locally() {
        let port = test_port([]);
        let mut controller = DmxController::new(&port, &DmxControllerConfig::default());

        assert_eq!(
            controller.rdm_set_dmx_start_address(device(), 0),
            Err(RdmResponseError::NotAcknowledged(NackReason::DataOutOfRange))
        );
        assert_eq!(
            controller.rdm_set_dmx_start_address(device(), 513),
            Err(RdmResponseError::NotAcknowledged(NackReason::DataOutOfRange))
        );
        port.with_driver(|uart| assert!(uart.tx.is_empty()));
    }

    #[test]
    fn test_discover_outcomes() {
        let port = test_port([
            Reply::Silent,
            Reply::DiscoveryAnswer(responder_uid()),
            Reply::Garbage,
        ]);
        let mut controller = DmxController::new(&port, &DmxControllerConfig::default());

        assert_eq!(
            controller.rdm_discover(0, 0xFFFF_FFFFFFFE),
            Ok(DiscoveryOption::NoDevice)
        );
        assert_eq!(
            controller.rdm_discover(0, 0xFFFF_FFFFFFFE),
            Ok(DiscoveryOption::Found(responder_uid()))
        );
        assert_eq!(
            controller.rdm_discover(0, 0xFFFF_FFFFFFFE),
            Ok(DiscoveryOption::Collision)
        );

        port.with_driver(|uart| {
            let request = &uart.requests[0];
            assert_eq!(request.parameter_id, pids::DISC_UNIQUE_BRANCH);
            assert_eq!(request.destination_uid, PackageAddress::Broadcast);
            assert_eq!(
                request.parameter_data.as_slice(),
                &[0, 0, 0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]
            );
        });
    }

    #[test]
    fn test_nested_transaction_holds_lock() {
        let port = test_port([
            Reply::Respond(ResponseType::ResponseTypeAck, vec![1]),
            Reply::Respond(ResponseType::ResponseTypeAck, vec![0]),
        ]);
        let mut controller = DmxController::new(&port, &DmxControllerConfig::default());

        let states = controller
            .transaction(|controller| {
                let first = controller.rdm_get_identify(responder_uid());
                let locked = controller.port().is_locked();
                let second = controller.rdm_get_identify(responder_uid());
                (first, locked, second)
            })
            .unwrap();

        assert_eq!(states, (Ok(true), true, Ok(false)));
        assert!(!port.is_locked());
    }
}
