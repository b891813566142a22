use core::cell::RefCell;

use critical_section::Mutex;

use crate::consts::{
    BREAK_MICROS, DMX_BAUD, DMX_MAX_BAUD, DMX_MAX_PACKAGE_SIZE, DMX_MIN_BAUD, MAB_MICROS,
    MAX_BREAK_TO_BREAK_MICROS, RDM_RESPONSE_TIMEOUT_MICROS, RDM_TRANSACTION_TIMEOUT_MICROS,
    RX_IDLE_TIMEOUT_MICROS,
};
use crate::dmx_engine::{EngineTiming, FrameBuffer, FrameEngine, Turnaround, TxState};
use crate::dmx_uart_driver::{Clock, DmxEvent, DmxUartDriver};
use crate::rdm_data::RdmDeserializationError;
use crate::utils::{bits_to_micros, is_valid_break, is_valid_mab};

/// Upper bound of events drained per [DmxPort::poll].
const MAX_POLLED_EVENTS: usize = 64;

#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmxError<E> {
    /// Another transmission, receive or transaction is in progress on the port.
    Busy,
    /// The request timed time out.
    TimeoutError,
    /// A received frame didn't fit into the frame buffer.
    BufferOverflow,
    /// A parity or framing error corrupted the received frame.
    FramingError,
    /// The hardware receive queue overflowed.
    UartOverflow,
    /// Raised when an RDM package could not be deserialized.
    DeserializationError(RdmDeserializationError),
    /// An error raised by the uart driver.
    DriverError(E),
}

impl<E: core::fmt::Display> core::fmt::Display for DmxError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DmxError::Busy => write!(f, "port is busy"),
            DmxError::TimeoutError => write!(f, "request timed out"),
            DmxError::BufferOverflow => write!(f, "frame buffer overflowed"),
            DmxError::FramingError => write!(f, "framing error"),
            DmxError::UartOverflow => write!(f, "uart overflowed"),
            DmxError::DeserializationError(error) => error.fmt(f),
            DmxError::DriverError(error) => error.fmt(f),
        }
    }
}

#[cfg(feature = "std")]
impl<E: core::fmt::Display + core::fmt::Debug> std::error::Error for DmxError<E> {}

/// Direction of the half-duplex line.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmxMode {
    Receive,
    Transmit,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Baud rate outside of 245k to 255k.
    InvalidBaudRate(u32),
    /// Break shorter than 92µs.
    InvalidBreak(u32),
    /// Mark after break outside of 12µs to 1s.
    InvalidMab(u32),
    /// A timeout is zero or the transaction timeout is shorter than the response timeout.
    InvalidTimeout,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::InvalidBaudRate(baud_rate) => {
                write!(f, "baud rate {} is out of range", baud_rate)
            },
            ConfigError::InvalidBreak(break_len) => write!(f, "break of {}µs is too short", break_len),
            ConfigError::InvalidMab(mab_len) => {
                write!(f, "mark after break of {}µs is out of range", mab_len)
            },
            ConfigError::InvalidTimeout => write!(f, "invalid timeout"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

/// Line timing and timeouts of a port. All durations are in microseconds.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmxConfig {
    pub baud_rate: u32,
    pub break_len_us: u32,
    pub mab_len_us: u32,
    /// Inter slot gap after which a received frame is complete.
    pub rx_timeout_us: u32,
    /// Time to wait for the start of a response.
    pub response_timeout_us: u32,
    /// Time to wait for a pending transmission or a whole transaction.
    pub transaction_timeout_us: u32,
    pub max_break_to_break_us: u32,
}

impl Default for DmxConfig {
    fn default() -> Self {
        Self {
            baud_rate: DMX_BAUD,
            break_len_us: BREAK_MICROS,
            mab_len_us: MAB_MICROS,
            rx_timeout_us: RX_IDLE_TIMEOUT_MICROS,
            response_timeout_us: RDM_RESPONSE_TIMEOUT_MICROS,
            transaction_timeout_us: RDM_TRANSACTION_TIMEOUT_MICROS,
            max_break_to_break_us: MAX_BREAK_TO_BREAK_MICROS,
        }
    }
}

impl DmxConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(DMX_MIN_BAUD..=DMX_MAX_BAUD).contains(&self.baud_rate) {
            return Err(ConfigError::InvalidBaudRate(self.baud_rate));
        }

        if !is_valid_break(self.break_len_us) {
            return Err(ConfigError::InvalidBreak(self.break_len_us));
        }

        if !is_valid_mab(self.mab_len_us) {
            return Err(ConfigError::InvalidMab(self.mab_len_us));
        }

        if self.rx_timeout_us == 0
            || self.response_timeout_us == 0
            || self.transaction_timeout_us < self.response_timeout_us
        {
            return Err(ConfigError::InvalidTimeout);
        }

        Ok(())
    }

    /// Sets the break to `bits` bit times at `baud_rate`.
    pub fn with_break_bits(mut self, baud_rate: u32, bits: u32) -> Result<Self, ConfigError> {
        self.baud_rate = baud_rate;
        self.break_len_us = bits_to_micros(bits, baud_rate);
        self.validate()?;

        Ok(self)
    }

    /// Sets the mark after break to `bits` bit times at `baud_rate`.
    pub fn with_mab_bits(mut self, baud_rate: u32, bits: u32) -> Result<Self, ConfigError> {
        self.baud_rate = baud_rate;
        self.mab_len_us = bits_to_micros(bits, baud_rate);
        self.validate()?;

        Ok(self)
    }

    fn engine_timing(&self) -> EngineTiming {
        EngineTiming {
            break_len_us: self.break_len_us,
            mab_len_us: self.mab_len_us,
            rx_timeout_us: self.rx_timeout_us,
            max_break_to_break_us: self.max_break_to_break_us,
        }
    }
}

struct PortState<D: DmxUartDriver, const N: usize> {
    engine: FrameEngine<N>,
    driver: D,
    driver_fault: Option<D::DriverError>,
    waiting: bool,
    lock_depth: u8,
    transaction_number: u8,
}

impl<D: DmxUartDriver, const N: usize> PortState<D, N> {
    fn take_fault(&mut self) -> Option<DmxError<D::DriverError>> {
        if let Some(driver_error) = self.driver_fault.take() {
            return Some(DmxError::DriverError(driver_error));
        }

        let faults = self.engine.take_faults();
        if faults.buffer_overflow {
            Some(DmxError::BufferOverflow)
        } else if faults.uart_overflow {
            Some(DmxError::UartOverflow)
        } else if faults.framing_error {
            Some(DmxError::FramingError)
        } else {
            None
        }
    }
}

/// A DMX port. Owns the transport and the [FrameEngine] behind a critical section so the
/// interrupt handler and tasks can share it through `&self`.
///
/// Interrupt driven platforms forward every transport interrupt to [DmxPort::on_event]. Polled
/// platforms implement [DmxUartDriver::poll_event], the waiting methods drain it.
pub struct DmxPort<D: DmxUartDriver, C: Clock, const N: usize = DMX_MAX_PACKAGE_SIZE> {
    state: Mutex<RefCell<PortState<D, N>>>,
    clock: C,
    config: DmxConfig,
}

impl<D: DmxUartDriver, C: Clock, const N: usize> DmxPort<D, C, N> {
    pub fn new(driver: D, clock: C, config: DmxConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            state: Mutex::new(RefCell::new(PortState {
                engine: FrameEngine::new(config.engine_timing()),
                driver,
                driver_fault: None,
                waiting: false,
                lock_depth: 0,
                transaction_number: 0,
            })),
            clock,
            config,
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut PortState<D, N>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }

    pub fn config(&self) -> &DmxConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Gives access to the transport, e.g. for reconfiguring the uart.
    pub fn with_driver<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        self.with_state(|state| f(&mut state.driver))
    }

    /// Feeds a transport event into the engine. Call this from the uart interrupt handler.
    pub fn on_event(&self, event: DmxEvent) {
        self.with_state(|state| {
            let PortState {
                engine,
                driver,
                driver_fault,
                ..
            } = state;

            if let Err(error) = engine.on_event(event, driver, &self.clock) {
                *driver_fault = Some(error);
            }
        })
    }

    /// Drains events of polled transports and completes frames that timed out.
    pub fn poll(&self) {
        self.with_state(|state| {
            let PortState {
                engine,
                driver,
                driver_fault,
                ..
            } = state;

            for _ in 0..MAX_POLLED_EVENTS {
                let Some(event) = driver.poll_event() else {
                    break;
                };

                if let Err(error) = engine.on_event(event, driver, &self.clock) {
                    *driver_fault = Some(error);
                }
            }

            engine.check_idle(self.clock.now_us());
        })
    }

    pub fn get_mode(&self) -> DmxMode {
        self.with_state(|state| state.engine.mode())
    }

    pub fn set_mode(&self, mode: DmxMode) {
        self.with_state(|state| state.engine.set_mode(mode))
    }

    /// Returns and clears the most severe fault recorded in event context.
    pub fn take_fault(&self) -> Option<DmxError<D::DriverError>> {
        self.with_state(|state| state.take_fault())
    }

    /// Returns the transaction number for the next request and advances it.
    pub fn next_transaction_number(&self) -> u8 {
        self.with_state(|state| {
            let transaction_number = state.transaction_number;
            state.transaction_number = transaction_number.wrapping_add(1);

            transaction_number
        })
    }

    /// Copies `bytes` to the start of the frame buffer.
    pub fn write(&self, bytes: &[u8]) -> Result<usize, DmxError<D::DriverError>> {
        self.write_at(0, bytes)
    }

    pub fn write_at(&self, offset: usize, bytes: &[u8]) -> Result<usize, DmxError<D::DriverError>> {
        self.with_front_mut(|front| front.write_at(offset, bytes))
    }

    /// Gives mutable access to the frame buffer. Fails with [DmxError::Busy] while a frame is
    /// being sent from it.
    pub fn with_front_mut<R>(
        &self,
        f: impl FnOnce(&mut FrameBuffer<N>) -> R,
    ) -> Result<R, DmxError<D::DriverError>> {
        self.with_state(|state| {
            if state.engine.is_sending() {
                return Err(DmxError::Busy);
            }

            Ok(f(state.engine.front_mut()))
        })
    }

    /// Copies the last received frame into `out` and returns the amount of bytes copied.
    pub fn read(&self, out: &mut [u8]) -> usize {
        self.read_frame(|frame| {
            let length = frame.len().min(out.len());
            out[..length].copy_from_slice(&frame[..length]);

            length
        })
    }

    /// Calls `f` with the last received frame.
    pub fn read_frame<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.with_state(|state| f(state.engine.front().received()))
    }

    pub fn snapshot(&self) -> FrameBuffer<N> {
        self.with_state(|state| state.engine.front().clone())
    }

    pub fn restore(&self, snapshot: &FrameBuffer<N>) -> Result<(), DmxError<D::DriverError>> {
        self.with_front_mut(|front| front.clone_from(snapshot))
    }

    /// Sends the first `size` bytes of the frame buffer with break and mark after break.
    pub fn send(&self, size: usize) -> Result<(), DmxError<D::DriverError>> {
        self.send_frame(size, true, Turnaround::None)
    }

    /// Copies `bytes` into the frame buffer and sends them without break.
    pub fn send_no_break(&self, bytes: &[u8]) -> Result<(), DmxError<D::DriverError>> {
        self.with_state(|state| {
            if state.engine.is_sending() {
                return Err(DmxError::Busy);
            }

            let PortState { engine, driver, .. } = state;
            let size = engine.front_mut().write_at(0, bytes);
            if size != bytes.len() {
                return Err(DmxError::BufferOverflow);
            }

            engine.begin_send(driver, &self.clock, size, false, Turnaround::None)
        })
    }

    /// Sends the first `size` bytes of the frame buffer. With a [Turnaround] other than
    /// [Turnaround::None] the port switches to receiving as soon as the last byte left.
    pub fn send_frame(
        &self,
        size: usize,
        with_break: bool,
        turnaround: Turnaround,
    ) -> Result<(), DmxError<D::DriverError>> {
        self.with_state(|state| {
            let PortState { engine, driver, .. } = state;
            engine.begin_send(driver, &self.clock, size, with_break, turnaround)
        })
    }

    /// Waits until the current transmission finished. A transmission that doesn't finish within
    /// `timeout_us` is aborted with [DmxPort::abort_send].
    pub fn wait_sent(&self, timeout_us: u32) -> Result<(), DmxError<D::DriverError>> {
        let start = self.clock.now_us();

        loop {
            self.poll();

            let (sending, fault) = self.with_state(|state| {
                let sending = state.engine.is_sending();
                (sending, state.driver_fault.take())
            });

            if let Some(driver_error) = fault {
                return Err(DmxError::DriverError(driver_error));
            }

            if !sending {
                return Ok(());
            }

            if self.clock.now_us().wrapping_sub(start) >= timeout_us as u64 {
                warn!("transmission timed out");
                self.abort_send()?;
                return Err(DmxError::TimeoutError);
            }

            core::hint::spin_loop();
        }
    }

    /// Stops a transmission that is in progress. The line is released and bytes still queued
    /// in the transport are discarded. Does nothing if the port isn't sending.
    pub fn abort_send(&self) -> Result<(), DmxError<D::DriverError>> {
        self.with_state(|state| {
            let PortState { engine, driver, .. } = state;

            match engine.abort_send() {
                TxState::InBreak => driver.deassert_break().map_err(DmxError::DriverError),
                TxState::InMab | TxState::Sending => driver.flush_tx().map_err(DmxError::DriverError),
                TxState::Idle | TxState::Done => Ok(()),
            }
        })
    }

    /// Waits for the next frame and returns its size. The frame can be accessed with
    /// [DmxPort::read] or [DmxPort::read_frame].
    ///
    /// A frame that started before `timeout_us` elapsed may take until the transaction timeout
    /// to complete. If the port wasn't receiving yet, faults recorded before the call are
    /// discarded. Faults and frames received after a turnaround are kept. Only one task can wait
    /// on a port at a time, others get [DmxError::Busy].
    pub fn receive(&self, timeout_us: u32) -> Result<usize, DmxError<D::DriverError>> {
        self.with_state(|state| {
            if state.waiting {
                return Err(DmxError::Busy);
            }

            state.waiting = true;

            if state.engine.mode() != DmxMode::Receive {
                state.take_fault();
                state.engine.arm_receive(false);
            }

            Ok(())
        })?;

        let result = self.wait_for_frame(timeout_us);
        self.with_state(|state| state.waiting = false);

        result
    }

    fn wait_for_frame(&self, timeout_us: u32) -> Result<usize, DmxError<D::DriverError>> {
        let start = self.clock.now_us();
        let hard_limit = timeout_us as u64 + self.config.transaction_timeout_us as u64;

        loop {
            self.poll();

            let (frame, fault, receiving) = self.with_state(|state| {
                (
                    state.engine.take_frame(),
                    state.take_fault(),
                    state.engine.is_receiving(),
                )
            });

            if let Some(fault) = fault {
                debug!("receive failed");
                return Err(fault);
            }

            if let Some(size) = frame {
                return Ok(size);
            }

            let elapsed = self.clock.now_us().wrapping_sub(start);
            if (elapsed >= timeout_us as u64 && !receiving) || elapsed >= hard_limit {
                return Err(DmxError::TimeoutError);
            }

            core::hint::spin_loop();
        }
    }

    /// Takes the transaction lock of the port. Fails with [DmxError::Busy] if it's still held
    /// by someone else after `timeout_us`.
    pub fn lock(
        &self,
        timeout_us: u32,
    ) -> Result<TransactionGuard<'_, D, C, N>, DmxError<D::DriverError>> {
        let start = self.clock.now_us();

        loop {
            let acquired = self.with_state(|state| {
                if state.lock_depth != 0 {
                    return false;
                }

                state.lock_depth = 1;
                true
            });

            if acquired {
                return Ok(TransactionGuard { port: self });
            }

            if self.clock.now_us().wrapping_sub(start) >= timeout_us as u64 {
                return Err(DmxError::Busy);
            }

            core::hint::spin_loop();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.with_state(|state| state.lock_depth != 0)
    }
}

/// Holds the transaction lock of a [DmxPort] until dropped.
pub struct TransactionGuard<'a, D: DmxUartDriver, C: Clock, const N: usize> {
    port: &'a DmxPort<D, C, N>,
}

impl<'a, D: DmxUartDriver, C: Clock, const N: usize> TransactionGuard<'a, D, C, N> {
    /// Re-enters the lock. The port is released once every guard is dropped.
    pub fn nested(&self) -> TransactionGuard<'a, D, C, N> {
        self.port
            .with_state(|state| state.lock_depth = state.lock_depth.saturating_add(1));

        TransactionGuard { port: self.port }
    }

    pub fn port(&self) -> &'a DmxPort<D, C, N> {
        self.port
    }
}

impl<D: DmxUartDriver, C: Clock, const N: usize> Drop for TransactionGuard<'_, D, C, N> {
    fn drop(&mut self) {
        self.port
            .with_state(|state| state.lock_depth = state.lock_depth.saturating_sub(1));
    }
}
