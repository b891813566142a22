use crate::consts::{DMX_MAX_PACKAGE_SIZE, RDM_RESPONDER_TURNAROUND_MICROS, SC_RDM};
use crate::dmx_driver::{DmxError, DmxPort};
use crate::dmx_engine::Turnaround;
use crate::dmx_uart_driver::{Clock, DmxUartDriver};
use crate::rdm_data::{RdmData, RdmDeserializationError, RdmRequestData};
use crate::rdm_responder::{
    RdmAnswer, RdmResponder, RdmResponderHandlerFunc, RdmResult, ResponderContext,
};
use crate::types::NackReason;
use crate::utils::encode_discovery_response;

#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Errors that can happen during polling. These errors should not cause panics.
pub enum PollingError<DriverError, HandlerError> {
    /// The port is used by someone else.
    Busy,
    /// The received frame didn't fit into the frame buffer.
    BufferOverflow,
    /// The received frame was corrupted by a parity or framing error.
    FramingError,
    /// The hardware receive queue overflowed.
    UartOverflow,
    /// Sending the response timed out.
    TimeoutError,
    /// The package size is insufficient.
    WrongPackageSize,
    /// Received a response instead of a request.
    NotMatching,
    /// A driver specific error occurred.
    DriverError(DriverError),
    /// A handler specific error occurred.
    HandlerError(HandlerError),
    /// Raised when an RDM package could not be deserialized.
    DeserializationError(RdmDeserializationError),
}

impl<DriverError, HandlerError> From<DmxError<DriverError>>
    for PollingError<DriverError, HandlerError>
{
    fn from(value: DmxError<DriverError>) -> Self {
        match value {
            DmxError::Busy => Self::Busy,
            DmxError::TimeoutError => Self::TimeoutError,
            DmxError::BufferOverflow => Self::BufferOverflow,
            DmxError::FramingError => Self::FramingError,
            DmxError::UartOverflow => Self::UartOverflow,
            DmxError::DeserializationError(deserialization_error) => {
                Self::DeserializationError(deserialization_error)
            },
            DmxError::DriverError(driver_error) => Self::DriverError(driver_error),
        }
    }
}

impl<DriverError: core::fmt::Display, HandlerError: core::fmt::Display> core::fmt::Display
    for PollingError<DriverError, HandlerError>
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let error_message = match self {
            PollingError::Busy => "The port is busy.",
            PollingError::BufferOverflow => "The frame exceeds the frame buffer.",
            PollingError::FramingError => "Framing error.",
            PollingError::UartOverflow => "Uart overflow.",
            PollingError::TimeoutError => "Timeout error.",
            PollingError::DeserializationError(_) => "Deserialization error.",
            PollingError::NotMatching => "Received response and not request.",
            PollingError::WrongPackageSize => "The package size is insufficient.",
            PollingError::DriverError(error) => {
                return core::fmt::Display::fmt(error, f);
            },
            PollingError::HandlerError(error) => {
                return core::fmt::Display::fmt(error, f);
            },
        };

        write!(f, "{}", error_message)
    }
}

#[cfg(feature = "std")]
impl<
        DriverError: core::fmt::Display + core::fmt::Debug,
        HandlerError: core::fmt::Display + core::fmt::Debug,
    > std::error::Error for PollingError<DriverError, HandlerError>
{
}

/// A handler for dmx and custom rdm packages.
pub trait DmxResponderHandler {
    type Error;

    /// Handle rdm requests with pids the [RdmResponder] has no definition for.
    fn handle_rdm(
        &mut self,
        _request: &RdmRequestData,
        _context: &mut ResponderContext,
    ) -> Result<RdmResult, Self::Error> {
        Ok(RdmResult::NotAcknowledged(NackReason::UnknownPid as u16))
    }

    /// Handle all received frames that have a different start code than `0xCC` (the rdm start code).
    /// The first byte is the start code. If start code is `0x00` it's a DMX Package.
    /// The start address of the responder is available through
    /// [ResponderContext::dmx_start_address].
    fn handle_dmx(
        &mut self,
        _dmx_frame: &[u8],
        _context: &mut ResponderContext,
    ) -> Result<(), Self::Error> {
        Ok(())
    }
}

struct DmxRdmHandlerWrapper<'a, HandlerError> {
    dmx: &'a mut dyn DmxResponderHandler<Error = HandlerError>,
}

impl<HandlerError> RdmResponderHandlerFunc for DmxRdmHandlerWrapper<'_, HandlerError> {
    type Error = HandlerError;

    fn handle_rdm(
        &mut self,
        request: &RdmRequestData,
        context: &mut ResponderContext,
    ) -> Result<RdmResult, Self::Error> {
        self.dmx.handle_rdm(request, context)
    }
}

/// Receives frames from a [DmxPort] and answers rdm requests with an [RdmResponder].
pub struct DmxReceiver<
    'p,
    D: DmxUartDriver,
    C: Clock,
    const DEFS: usize,
    const DEVICES: usize,
    const PARAMS: usize,
    const BYTES: usize = 1024,
    const N: usize = DMX_MAX_PACKAGE_SIZE,
> {
    port: &'p DmxPort<D, C, N>,
    responder: RdmResponder<DEFS, DEVICES, PARAMS, BYTES>,
    poll_timeout_us: u32,
}

impl<
        'p,
        D: DmxUartDriver,
        C: Clock,
        const DEFS: usize,
        const DEVICES: usize,
        const PARAMS: usize,
        const BYTES: usize,
        const N: usize,
    > DmxReceiver<'p, D, C, DEFS, DEVICES, PARAMS, BYTES, N>
{
    /// Creates a new [DmxReceiver]. [DmxReceiver::poll] waits up to the transaction timeout of
    /// the port for a frame.
    pub fn new(
        port: &'p DmxPort<D, C, N>,
        responder: RdmResponder<DEFS, DEVICES, PARAMS, BYTES>,
    ) -> Self {
        Self {
            port,
            responder,
            poll_timeout_us: port.config().transaction_timeout_us,
        }
    }

    pub fn set_poll_timeout(&mut self, poll_timeout_us: u32) {
        self.poll_timeout_us = poll_timeout_us;
    }

    pub fn port(&self) -> &'p DmxPort<D, C, N> {
        self.port
    }

    pub fn responder(&self) -> &RdmResponder<DEFS, DEVICES, PARAMS, BYTES> {
        &self.responder
    }

    pub fn responder_mut(&mut self) -> &mut RdmResponder<DEFS, DEVICES, PARAMS, BYTES> {
        &mut self.responder
    }

    pub fn into_responder(self) -> RdmResponder<DEFS, DEVICES, PARAMS, BYTES> {
        self.responder
    }

    /// Call this function as often as you can. It will receive a package and handle it.
    ///
    /// Returns false if no package was received.
    pub fn poll<HandlerError>(
        &mut self,
        handler: &mut dyn DmxResponderHandler<Error = HandlerError>,
    ) -> Result<bool, PollingError<D::DriverError, HandlerError>> {
        match self.port.receive(self.poll_timeout_us) {
            Err(DmxError::TimeoutError) => return Ok(false),
            result => result?,
        };
        let received_at = self.port.clock().now_us();

        // the frame is copied so the handlers don't run inside the critical section
        let package: heapless::Vec<u8, N> = self
            .port
            .read_frame(|frame| heapless::Vec::from_slice(frame))
            .map_err(|_| PollingError::WrongPackageSize)?;

        let Some(&start_code) = package.first() else {
            return Err(PollingError::WrongPackageSize);
        };

        match start_code {
            SC_RDM => self.handle_rdm(&package, received_at, handler)?,
            _ => handler
                .handle_dmx(&package, &mut self.responder.get_context())
                .map_err(PollingError::HandlerError)?,
        }

        Ok(true)
    }

    fn handle_rdm<HandlerError>(
        &mut self,
        package: &[u8],
        received_at: u64,
        handler: &mut dyn DmxResponderHandler<Error = HandlerError>,
    ) -> Result<(), PollingError<D::DriverError, HandlerError>> {
        let rdm_data =
            RdmData::deserialize(package).map_err(PollingError::DeserializationError)?;

        let request = match rdm_data {
            RdmData::Request(request) => request,
            RdmData::Response(_) => return Err(PollingError::NotMatching),
        };

        trace!(
            "rdm request pid {:#06x} tn {}",
            request.parameter_id,
            request.transaction_number
        );

        let answer = self
            .responder
            .handle_rdm_request(request, &mut DmxRdmHandlerWrapper { dmx: handler })
            .map_err(PollingError::HandlerError)?;

        let send_timeout = self.port.config().transaction_timeout_us;
        match answer {
            RdmAnswer::Response(response_data) => {
                let serialized = RdmData::Response(response_data).serialize();
                if self.port.write(&serialized)? != serialized.len() {
                    return Err(PollingError::BufferOverflow);
                }

                self.wait_turnaround(received_at);
                self.port
                    .send_frame(serialized.len(), true, Turnaround::Receive)?;
                self.port.wait_sent(send_timeout)?;
            },
            RdmAnswer::DiscoveryResponse(uid) => {
                self.wait_turnaround(received_at);
                self.port.send_no_break(&encode_discovery_response(uid))?;
                self.port.wait_sent(send_timeout)?;
            },
            RdmAnswer::NoResponse => {},
        }

        Ok(())
    }

    fn wait_turnaround(&self, received_at: u64) {
        let clock = self.port.clock();
        let elapsed = clock.now_us().wrapping_sub(received_at);

        if elapsed < RDM_RESPONDER_TURNAROUND_MICROS as u64 {
            clock.delay_us(RDM_RESPONDER_TURNAROUND_MICROS - elapsed as u32);
        }
    }
}
