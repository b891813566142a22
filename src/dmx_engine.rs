use crate::consts::{
    BREAK_MICROS, DMX_MAX_PACKAGE_SIZE, MAB_MICROS, MAX_BREAK_TO_BREAK_MICROS,
    MAX_PREAMBLE_LENGTH, RDM_DISCOVERY_RESPONSE_SIZE, RX_IDLE_TIMEOUT_MICROS, SC_RDM,
    SEPARATOR_BYTE,
};
use crate::dmx_driver::{DmxError, DmxMode};
use crate::dmx_uart_driver::{Clock, DmxEvent, DmxUartDriver};

/// Fixed capacity slot storage with a cursor.
///
/// `head` is the receive cursor while the buffer is being filled and the transmit cursor while
/// it is being sent. `head <= N`, `tx_size <= N` and `rx_size <= N` always hold.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FrameBuffer<const N: usize = DMX_MAX_PACKAGE_SIZE> {
    data: [u8; N],
    head: usize,
    tx_size: usize,
    rx_size: usize,
}

impl<const N: usize> FrameBuffer<N> {
    pub const fn new() -> Self {
        Self {
            data: [0u8; N],
            head: 0,
            tx_size: 0,
            rx_size: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tx_size(&self) -> usize {
        self.tx_size
    }

    pub fn rx_size(&self) -> usize {
        self.rx_size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The bytes of the last received frame.
    pub fn received(&self) -> &[u8] {
        &self.data[..self.rx_size]
    }

    /// Copies `bytes` to `offset`. Returns the amount copied, which is smaller than
    /// `bytes.len()` if the capacity is reached.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> usize {
        if offset >= N {
            return 0;
        }

        let length = bytes.len().min(N - offset);
        self.data[offset..offset + length].copy_from_slice(&bytes[..length]);

        length
    }

    /// Copies from `offset` into `out`. Returns the amount copied.
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> usize {
        if offset >= N {
            return 0;
        }

        let length = out.len().min(N - offset);
        out[..length].copy_from_slice(&self.data[offset..offset + length]);

        length
    }
}

impl<const N: usize> Default for FrameBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxState {
    Idle,
    InBreak,
    InMab,
    InData,
    FrameComplete,
    /// Entered on overflow, left on the next break.
    Error,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxState {
    Idle,
    InBreak,
    InMab,
    Sending,
    Done,
}

/// What the engine does after the last byte of a frame was sent.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Turnaround {
    /// Stay in transmit mode.
    None,
    /// Switch to receive mode and wait for a frame that starts with a break.
    Receive,
    /// Switch to receive mode and accept a discovery response without break.
    ReceiveNoBreak,
}

/// Faults recorded in event context. Drained by the port in task context.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineFaults {
    pub buffer_overflow: bool,
    pub framing_error: bool,
    pub uart_overflow: bool,
    pub driver_error: bool,
}

impl EngineFaults {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineTiming {
    pub break_len_us: u32,
    pub mab_len_us: u32,
    pub rx_timeout_us: u32,
    pub max_break_to_break_us: u32,
}

impl Default for EngineTiming {
    fn default() -> Self {
        Self {
            break_len_us: BREAK_MICROS,
            mab_len_us: MAB_MICROS,
            rx_timeout_us: RX_IDLE_TIMEOUT_MICROS,
            max_break_to_break_us: MAX_BREAK_TO_BREAK_MICROS,
        }
    }
}

/// Receive and transmit state machines of a single port.
///
/// The engine owns two buffers. One is exposed to readers and used for transmitting, the other
/// one is filled by the receiver and swapped in once a frame is complete.
pub struct FrameEngine<const N: usize = DMX_MAX_PACKAGE_SIZE> {
    buffers: [FrameBuffer<N>; 2],
    front: usize,
    mode: DmxMode,
    rx_state: RxState,
    tx_state: TxState,
    turnaround: Turnaround,
    timing: EngineTiming,
    expect_no_break: bool,
    rx_without_break: bool,
    frame_ready: bool,
    last_rx_us: u64,
    last_break_us: Option<u64>,
    faults: EngineFaults,
}

impl<const N: usize> FrameEngine<N> {
    pub const fn new(timing: EngineTiming) -> Self {
        Self {
            buffers: [FrameBuffer::new(), FrameBuffer::new()],
            front: 0,
            mode: DmxMode::Receive,
            rx_state: RxState::Idle,
            tx_state: TxState::Idle,
            turnaround: Turnaround::None,
            timing,
            expect_no_break: false,
            rx_without_break: false,
            frame_ready: false,
            last_rx_us: 0,
            last_break_us: None,
            faults: EngineFaults {
                buffer_overflow: false,
                framing_error: false,
                uart_overflow: false,
                driver_error: false,
            },
        }
    }

    /// The buffer readers see and transmissions are sent from.
    pub fn front(&self) -> &FrameBuffer<N> {
        &self.buffers[self.front]
    }

    pub fn front_mut(&mut self) -> &mut FrameBuffer<N> {
        &mut self.buffers[self.front]
    }

    /// The buffer the receiver is currently filling.
    pub fn receiving(&self) -> &FrameBuffer<N> {
        &self.buffers[1 - self.front]
    }

    fn fill_mut(&mut self) -> &mut FrameBuffer<N> {
        &mut self.buffers[1 - self.front]
    }

    pub fn rx_state(&self) -> RxState {
        self.rx_state
    }

    pub fn tx_state(&self) -> TxState {
        self.tx_state
    }

    pub fn mode(&self) -> DmxMode {
        self.mode
    }

    pub fn timing(&self) -> &EngineTiming {
        &self.timing
    }

    pub fn set_mode(&mut self, mode: DmxMode) {
        if mode == DmxMode::Transmit {
            self.abort_receive();
        }

        self.mode = mode;
    }

    pub fn is_sending(&self) -> bool {
        matches!(
            self.tx_state,
            TxState::InBreak | TxState::InMab | TxState::Sending
        )
    }

    /// Returns true while a frame is being received.
    pub fn is_receiving(&self) -> bool {
        matches!(
            self.rx_state,
            RxState::InBreak | RxState::InMab | RxState::InData
        )
    }

    pub fn take_faults(&mut self) -> EngineFaults {
        core::mem::take(&mut self.faults)
    }

    /// Returns the size of a frame completed since the last call.
    pub fn take_frame(&mut self) -> Option<usize> {
        if !self.frame_ready {
            return None;
        }

        self.frame_ready = false;
        Some(self.front().rx_size)
    }

    /// Switches to receive mode and discards frames that completed before.
    pub fn arm_receive(&mut self, no_break: bool) {
        self.mode = DmxMode::Receive;
        self.frame_ready = false;
        self.expect_no_break = no_break;

        if self.tx_state == TxState::Done {
            self.tx_state = TxState::Idle;
        }
    }

    /// Stops a transmission that is in progress without running its turnaround. Returns the
    /// state the transmission was in.
    pub fn abort_send(&mut self) -> TxState {
        let aborted = self.tx_state;

        if self.is_sending() {
            self.tx_state = TxState::Idle;
            self.turnaround = Turnaround::None;
            self.front_mut().head = 0;
        }

        aborted
    }

    fn abort_receive(&mut self) {
        self.rx_state = RxState::Idle;
        self.rx_without_break = false;
        self.fill_mut().head = 0;
    }

    /// Starts sending the first `size` bytes of the front buffer.
    pub fn begin_send<D: DmxUartDriver, C: Clock>(
        &mut self,
        driver: &mut D,
        clock: &C,
        size: usize,
        with_break: bool,
        turnaround: Turnaround,
    ) -> Result<(), DmxError<D::DriverError>> {
        if self.is_sending() {
            return Err(DmxError::Busy);
        }

        if size > N {
            return Err(DmxError::BufferOverflow);
        }

        self.set_mode(DmxMode::Transmit);
        self.turnaround = turnaround;

        let front = self.front_mut();
        front.tx_size = size;
        front.head = 0;

        if let Err(error) = self.start_frame(driver, clock, with_break) {
            self.tx_state = TxState::Idle;
            return Err(DmxError::DriverError(error));
        }

        Ok(())
    }

    fn start_frame<D: DmxUartDriver, C: Clock>(
        &mut self,
        driver: &mut D,
        clock: &C,
        with_break: bool,
    ) -> Result<(), D::DriverError> {
        let now = clock.now_us();
        let break_recent = self.last_break_us.is_some_and(|last_break| {
            now.wrapping_sub(last_break) < self.timing.max_break_to_break_us as u64
        });

        if with_break && (!D::AUTO_BREAK || !break_recent) {
            self.last_break_us = Some(now);
            self.tx_state = TxState::InBreak;
            driver.assert_break()?;

            if clock.set_alarm(self.timing.break_len_us) {
                return Ok(());
            }

            clock.delay_us(self.timing.break_len_us);
            return self.end_break(driver, clock);
        }

        if with_break {
            self.last_break_us = Some(now);
        }

        self.start_data(driver)
    }

    fn end_break<D: DmxUartDriver, C: Clock>(
        &mut self,
        driver: &mut D,
        clock: &C,
    ) -> Result<(), D::DriverError> {
        driver.deassert_break()?;
        self.tx_state = TxState::InMab;

        if clock.set_alarm(self.timing.mab_len_us) {
            return Ok(());
        }

        clock.delay_us(self.timing.mab_len_us);
        self.start_data(driver)
    }

    fn start_data<D: DmxUartDriver>(&mut self, driver: &mut D) -> Result<(), D::DriverError> {
        self.tx_state = TxState::Sending;
        self.write_chunk(driver)?;

        if self.front().tx_size == 0 {
            self.finish_send();
        }

        Ok(())
    }

    fn write_chunk<D: DmxUartDriver>(&mut self, driver: &mut D) -> Result<(), D::DriverError> {
        let front = self.front_mut();

        if front.head < front.tx_size {
            let written = driver.write(&front.data[front.head..front.tx_size])?;
            front.head = (front.head + written).min(front.tx_size);
        }

        Ok(())
    }

    fn finish_send(&mut self) {
        self.tx_state = TxState::Done;

        match self.turnaround {
            Turnaround::None => {},
            Turnaround::Receive => self.arm_receive(false),
            Turnaround::ReceiveNoBreak => self.arm_receive(true),
        }
    }

    /// Event context entry point. Never blocks except for the bounded break and mark after
    /// break wait when the clock has no alarm. Driver errors are recorded as faults and returned.
    pub fn on_event<D: DmxUartDriver, C: Clock>(
        &mut self,
        event: DmxEvent,
        driver: &mut D,
        clock: &C,
    ) -> Result<(), D::DriverError> {
        let result = self.handle_event(event, driver, clock);

        if result.is_err() {
            self.faults.driver_error = true;
            self.abort_receive();

            if self.is_sending() {
                self.tx_state = TxState::Idle;
            }
        }

        result
    }

    fn handle_event<D: DmxUartDriver, C: Clock>(
        &mut self,
        event: DmxEvent,
        driver: &mut D,
        clock: &C,
    ) -> Result<(), D::DriverError> {
        match event {
            DmxEvent::BreakDetected => self.on_break(clock.now_us()),
            DmxEvent::MabElapsed => {
                if self.rx_state == RxState::InBreak {
                    self.rx_state = RxState::InMab;
                }
            },
            DmxEvent::RxData => self.on_rx_data(driver, clock.now_us())?,
            DmxEvent::RxTimeout => self.on_rx_timeout(),
            DmxEvent::ParityError => {
                if self.is_receiving() {
                    trace!("parity error, frame discarded");
                    self.faults.framing_error = true;
                    self.abort_receive();
                }
            },
            DmxEvent::Overflow => {
                driver.flush_rx()?;
                self.faults.uart_overflow = true;
                self.abort_receive();
                self.rx_state = RxState::Error;
            },
            DmxEvent::TxEmpty => {
                if self.tx_state == TxState::Sending {
                    self.write_chunk(driver)?;
                }
            },
            DmxEvent::TxDone => {
                if self.tx_state == TxState::Sending {
                    let front = self.front();
                    if front.head < front.tx_size {
                        self.write_chunk(driver)?;
                    } else {
                        self.finish_send();
                    }
                }
            },
            DmxEvent::Alarm => match self.tx_state {
                TxState::InBreak => self.end_break(driver, clock)?,
                TxState::InMab => self.start_data(driver)?,
                _ => {},
            },
        }

        Ok(())
    }

    fn accepts_rx(&self) -> bool {
        self.mode == DmxMode::Receive && !self.is_sending()
    }

    fn on_break(&mut self, now_us: u64) {
        if !self.accepts_rx() {
            return;
        }

        if self.rx_state == RxState::InData && self.receiving().head > 0 {
            let size = self.receiving().head;
            self.complete_frame(size);
        }

        self.fill_mut().head = 0;
        self.rx_state = RxState::InBreak;
        self.rx_without_break = false;
        self.last_rx_us = now_us;
    }

    fn on_rx_data<D: DmxUartDriver>(
        &mut self,
        driver: &mut D,
        now_us: u64,
    ) -> Result<(), D::DriverError> {
        if !self.accepts_rx() {
            return driver.flush_rx();
        }

        match self.rx_state {
            RxState::Idle | RxState::FrameComplete => {
                if !self.expect_no_break {
                    return driver.flush_rx();
                }

                self.fill_mut().head = 0;
                self.rx_without_break = true;
                self.rx_state = RxState::InData;
            },
            RxState::Error => return driver.flush_rx(),
            RxState::InBreak | RxState::InMab => self.rx_state = RxState::InData,
            RxState::InData => {},
        }

        self.last_rx_us = now_us;

        let fill = &mut self.buffers[1 - self.front];
        let head = fill.head;
        let read = driver.read_available(&mut fill.data[head..])?;
        fill.head = (head + read).min(N);

        if fill.head == N {
            let mut probe = [0u8; 1];
            if driver.read_available(&mut probe)? > 0 {
                trace!("frame exceeds {} bytes", N);
                driver.flush_rx()?;
                self.abort_receive();
                self.rx_state = RxState::Error;
                self.faults.buffer_overflow = true;

                return Ok(());
            }
        }

        if let Some(expected_size) = self.expected_size() {
            if self.receiving().head >= expected_size {
                self.complete_frame(expected_size);
            }
        }

        Ok(())
    }

    /// Size of the frame being received if it can be told from the bytes received so far.
    fn expected_size(&self) -> Option<usize> {
        let fill = self.receiving();
        let data = &fill.data[..fill.head];

        if self.rx_without_break {
            let separator = data
                .iter()
                .take(MAX_PREAMBLE_LENGTH + 1)
                .position(|&byte| byte == SEPARATOR_BYTE)?;

            return Some(separator + 1 + RDM_DISCOVERY_RESPONSE_SIZE);
        }

        match data {
            [SC_RDM, _, message_length, ..] => Some(*message_length as usize + 2),
            _ => None,
        }
    }

    fn on_rx_timeout(&mut self) {
        match self.rx_state {
            RxState::InData if self.receiving().head > 0 => {
                let size = self.receiving().head;
                self.complete_frame(size);
            },
            RxState::InBreak | RxState::InMab | RxState::InData => self.abort_receive(),
            _ => {},
        }
    }

    /// Completes a frame whose inter slot gap exceeded the receive timeout. For transports
    /// that don't report [DmxEvent::RxTimeout].
    pub fn check_idle(&mut self, now_us: u64) {
        if self.rx_state == RxState::InData
            && now_us.wrapping_sub(self.last_rx_us) >= self.timing.rx_timeout_us as u64
        {
            self.on_rx_timeout();
        }
    }

    fn complete_frame(&mut self, size: usize) {
        let fill_index = 1 - self.front;
        let fill = &mut self.buffers[fill_index];
        fill.rx_size = size.min(fill.head);

        self.front = fill_index;
        self.fill_mut().head = 0;
        self.rx_state = RxState::FrameComplete;
        self.rx_without_break = false;
        self.frame_ready = true;
    }
}

impl<const N: usize> Default for FrameEngine<N> {
    fn default() -> Self {
        Self::new(EngineTiming::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::vec::Vec;

    #[derive(Default)]
    struct TestUart {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
        tx_chunk: usize,
        break_asserted: bool,
        breaks: usize,
        flushes: usize,
    }

    impl DmxUartDriver for TestUart {
        type DriverError = ();

        fn write(&mut self, bytes: &[u8]) -> Result<usize, ()> {
            let length = if self.tx_chunk == 0 {
                bytes.len()
            } else {
                bytes.len().min(self.tx_chunk)
            };
            self.tx.extend_from_slice(&bytes[..length]);
            Ok(length)
        }

        fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize, ()> {
            let mut read = 0;
            while read < buffer.len() {
                match self.rx.pop_front() {
                    Some(byte) => buffer[read] = byte,
                    None => break,
                }
                read += 1;
            }
            Ok(read)
        }

        fn assert_break(&mut self) -> Result<(), ()> {
            self.break_asserted = true;
            self.breaks += 1;
            Ok(())
        }

        fn deassert_break(&mut self) -> Result<(), ()> {
            self.break_asserted = false;
            Ok(())
        }

        fn flush_rx(&mut self) -> Result<(), ()> {
            self.flushes += 1;
            self.rx.clear();
            Ok(())
        }
    }

    struct AutoBreakUart(TestUart);

    impl DmxUartDriver for AutoBreakUart {
        type DriverError = ();
        const AUTO_BREAK: bool = true;

        fn write(&mut self, bytes: &[u8]) -> Result<usize, ()> {
            self.0.write(bytes)
        }

        fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize, ()> {
            self.0.read_available(buffer)
        }

        fn assert_break(&mut self) -> Result<(), ()> {
            self.0.assert_break()
        }

        fn deassert_break(&mut self) -> Result<(), ()> {
            self.0.deassert_break()
        }

        fn flush_rx(&mut self) -> Result<(), ()> {
            self.0.flush_rx()
        }
    }

    #[derive(Default)]
    struct TestClock {
        now: Cell<u64>,
        delays: RefCell<Vec<u32>>,
        alarms: bool,
    }

    impl Clock for TestClock {
        fn now_us(&self) -> u64 {
            self.now.get()
        }

        fn delay_us(&self, micros: u32) {
            self.delays.borrow_mut().push(micros);
            self.now.set(self.now.get() + micros as u64);
        }

        fn set_alarm(&self, delay_us: u32) -> bool {
            if self.alarms {
                self.delays.borrow_mut().push(delay_us);
            }
            self.alarms
        }
    }

    fn receive_frame<const N: usize>(
        engine: &mut FrameEngine<N>,
        uart: &mut TestUart,
        clock: &TestClock,
        frame: &[u8],
    ) {
        engine.on_event(DmxEvent::BreakDetected, uart, clock).unwrap();
        uart.rx.extend(frame.iter().copied());
        engine.on_event(DmxEvent::RxData, uart, clock).unwrap();
        engine.on_event(DmxEvent::RxTimeout, uart, clock).unwrap();
    }

    #[test]
    fn test_dmx_frame_completes_on_timeout() {
        let mut engine: FrameEngine<513> = FrameEngine::default();
        let mut uart = TestUart::default();
        let clock = TestClock::default();

        receive_frame(&mut engine, &mut uart, &clock, &[0x00, 1, 2, 3]);

        assert_eq!(engine.rx_state(), RxState::FrameComplete);
        assert_eq!(engine.take_frame(), Some(4));
        assert_eq!(engine.front().received(), &[0x00, 1, 2, 3]);
        assert_eq!(engine.take_frame(), None);
    }

    #[test]
    fn test_partial_frame_is_never_exposed() {
        let mut engine: FrameEngine<513> = FrameEngine::default();
        let mut uart = TestUart::default();
        let clock = TestClock::default();

        receive_frame(&mut engine, &mut uart, &clock, &[0x00, 9, 9]);
        engine.take_frame();

        engine.on_event(DmxEvent::BreakDetected, &mut uart, &clock).unwrap();
        uart.rx.extend([0x00, 1, 2]);
        engine.on_event(DmxEvent::RxData, &mut uart, &clock).unwrap();

        assert_eq!(engine.rx_state(), RxState::InData);
        assert_eq!(engine.front().received(), &[0x00, 9, 9]);
        assert_eq!(engine.receiving().head(), 3);
    }

    #[test]
    fn test_rdm_packet_completes_without_timeout() {
        let mut engine: FrameEngine<257> = FrameEngine::default();
        let mut uart = TestUart::default();
        let clock = TestClock::default();

        let mut packet = [0u8; 26];
        packet[0] = SC_RDM;
        packet[1] = 0x01;
        packet[2] = 24;

        engine.on_event(DmxEvent::BreakDetected, &mut uart, &clock).unwrap();
        uart.rx.extend(packet[..10].iter().copied());
        engine.on_event(DmxEvent::RxData, &mut uart, &clock).unwrap();
        assert_eq!(engine.take_frame(), None);

        uart.rx.extend(packet[10..].iter().copied());
        engine.on_event(DmxEvent::RxData, &mut uart, &clock).unwrap();
        assert_eq!(engine.take_frame(), Some(26));
    }

    #[test]
    fn test_parity_error_discards_frame() {
        let mut engine: FrameEngine<513> = FrameEngine::default();
        let mut uart = TestUart::default();
        let clock = TestClock::default();

        engine.on_event(DmxEvent::BreakDetected, &mut uart, &clock).unwrap();
        uart.rx.extend([0x00, 1, 2]);
        engine.on_event(DmxEvent::RxData, &mut uart, &clock).unwrap();
        engine.on_event(DmxEvent::ParityError, &mut uart, &clock).unwrap();

        assert_eq!(engine.rx_state(), RxState::Idle);
        assert_eq!(engine.receiving().head(), 0);
        assert!(engine.take_faults().framing_error);

        // the rest of the broken frame is dropped
        uart.rx.extend([3, 4]);
        engine.on_event(DmxEvent::RxData, &mut uart, &clock).unwrap();
        engine.on_event(DmxEvent::RxTimeout, &mut uart, &clock).unwrap();
        assert_eq!(engine.take_frame(), None);
    }

    #[test]
    fn test_overflow_flushes_and_resets() {
        let mut engine: FrameEngine<8> = FrameEngine::default();
        let mut uart = TestUart::default();
        let clock = TestClock::default();

        engine.on_event(DmxEvent::BreakDetected, &mut uart, &clock).unwrap();
        uart.rx.extend(0..12u8);
        engine.on_event(DmxEvent::RxData, &mut uart, &clock).unwrap();

        assert_eq!(engine.rx_state(), RxState::Error);
        assert_eq!(engine.receiving().head(), 0);
        assert!(uart.rx.is_empty());
        assert!(engine.take_faults().buffer_overflow);

        // data is dropped until the next break
        uart.rx.extend([1, 2]);
        engine.on_event(DmxEvent::RxData, &mut uart, &clock).unwrap();
        assert_eq!(engine.receiving().head(), 0);

        receive_frame(&mut engine, &mut uart, &clock, &[0x00, 1]);
        assert_eq!(engine.take_frame(), Some(2));
    }

    #[test]
    fn test_exactly_full_frame_is_accepted() {
        let mut engine: FrameEngine<8> = FrameEngine::default();
        let mut uart = TestUart::default();
        let clock = TestClock::default();

        receive_frame(&mut engine, &mut uart, &clock, &[0u8; 8]);

        assert_eq!(engine.take_frame(), Some(8));
        assert!(engine.take_faults().is_empty());
    }

    #[test]
    fn test_send_with_busy_wait_break() {
        let mut engine: FrameEngine<513> = FrameEngine::default();
        let mut uart = TestUart::default();
        let clock = TestClock::default();

        engine.front_mut().write_at(0, &[0x00, 10, 20, 30]);
        engine
            .begin_send(&mut uart, &clock, 4, true, Turnaround::None)
            .unwrap();

        assert_eq!(uart.breaks, 1);
        assert!(!uart.break_asserted);
        assert_eq!(*clock.delays.borrow(), [BREAK_MICROS, MAB_MICROS]);
        assert_eq!(engine.tx_state(), TxState::Sending);
        assert_eq!(engine.mode(), DmxMode::Transmit);

        engine.on_event(DmxEvent::TxDone, &mut uart, &clock).unwrap();
        assert_eq!(engine.tx_state(), TxState::Done);
        assert_eq!(uart.tx, [0x00, 10, 20, 30]);
    }

    #[test]
    fn test_send_with_alarm_break() {
        let mut engine: FrameEngine<513> = FrameEngine::default();
        let mut uart = TestUart::default();
        let clock = TestClock {
            alarms: true,
            ..Default::default()
        };

        engine.front_mut().write_at(0, &[0x00, 1]);
        engine
            .begin_send(&mut uart, &clock, 2, true, Turnaround::None)
            .unwrap();
        assert_eq!(engine.tx_state(), TxState::InBreak);
        assert!(uart.break_asserted);

        engine.on_event(DmxEvent::Alarm, &mut uart, &clock).unwrap();
        assert_eq!(engine.tx_state(), TxState::InMab);
        assert!(!uart.break_asserted);

        engine.on_event(DmxEvent::Alarm, &mut uart, &clock).unwrap();
        assert_eq!(engine.tx_state(), TxState::Sending);
        assert_eq!(uart.tx, [0x00, 1]);
    }

    #[test]
    fn test_abort_send_skips_turnaround() {
        let mut engine: FrameEngine<513> = FrameEngine::default();
        let mut uart = TestUart::default();
        let clock = TestClock {
            alarms: true,
            ..Default::default()
        };

        engine.front_mut().write_at(0, &[0xCC, 1]);
        engine
            .begin_send(&mut uart, &clock, 2, true, Turnaround::Receive)
            .unwrap();

        assert_eq!(engine.abort_send(), TxState::InBreak);
        assert!(!engine.is_sending());
        assert_eq!(engine.abort_send(), TxState::Idle);

        // events of the aborted frame arrive late
        engine.on_event(DmxEvent::Alarm, &mut uart, &clock).unwrap();
        engine.on_event(DmxEvent::TxDone, &mut uart, &clock).unwrap();
        assert_eq!(engine.tx_state(), TxState::Idle);
        assert_eq!(engine.mode(), DmxMode::Transmit);
        assert!(uart.tx.is_empty());
    }

    #[test]
    fn test_second_send_is_busy() {
        let mut engine: FrameEngine<513> = FrameEngine::default();
        let mut uart = TestUart {
            tx_chunk: 2,
            ..Default::default()
        };
        let clock = TestClock::default();

        engine
            .begin_send(&mut uart, &clock, 6, false, Turnaround::None)
            .unwrap();
        assert!(matches!(
            engine.begin_send(&mut uart, &clock, 6, false, Turnaround::None),
            Err(DmxError::Busy)
        ));

        engine.on_event(DmxEvent::TxEmpty, &mut uart, &clock).unwrap();
        engine.on_event(DmxEvent::TxEmpty, &mut uart, &clock).unwrap();
        assert_eq!(uart.tx.len(), 6);
        assert_eq!(engine.front().head(), 6);

        engine.on_event(DmxEvent::TxDone, &mut uart, &clock).unwrap();
        assert!(engine
            .begin_send(&mut uart, &clock, 6, false, Turnaround::None)
            .is_ok());
    }

    #[test]
    fn test_auto_break_only_within_break_to_break_bound() {
        let mut engine: FrameEngine<513> = FrameEngine::default();
        let mut uart = AutoBreakUart(TestUart::default());
        let clock = TestClock::default();

        engine
            .begin_send(&mut uart, &clock, 1, true, Turnaround::None)
            .unwrap();
        engine.on_event(DmxEvent::TxDone, &mut uart, &clock).unwrap();
        assert_eq!(uart.0.breaks, 1);

        // the hardware inserts the next break
        clock.now.set(clock.now.get() + 25_000);
        engine
            .begin_send(&mut uart, &clock, 1, true, Turnaround::None)
            .unwrap();
        engine.on_event(DmxEvent::TxDone, &mut uart, &clock).unwrap();
        assert_eq!(uart.0.breaks, 1);

        clock
            .now
            .set(clock.now.get() + MAX_BREAK_TO_BREAK_MICROS as u64);
        engine
            .begin_send(&mut uart, &clock, 1, true, Turnaround::None)
            .unwrap();
        assert_eq!(uart.0.breaks, 2);
    }

    #[test]
    fn test_turnaround_accepts_discovery_response_without_break() {
        let mut engine: FrameEngine<257> = FrameEngine::default();
        let mut uart = TestUart::default();
        let clock = TestClock::default();

        engine
            .begin_send(&mut uart, &clock, 1, true, Turnaround::ReceiveNoBreak)
            .unwrap();
        engine.on_event(DmxEvent::TxDone, &mut uart, &clock).unwrap();
        assert_eq!(engine.mode(), DmxMode::Receive);

        let response = crate::utils::encode_discovery_response(
            crate::unique_identifier::UniqueIdentifier::new(0x7FF0, 1).unwrap(),
        );
        uart.rx.extend(response.iter().copied());
        engine.on_event(DmxEvent::RxData, &mut uart, &clock).unwrap();

        assert_eq!(engine.take_frame(), Some(24));
        assert_eq!(engine.front().received(), &response);
    }

    #[test]
    fn test_data_without_break_is_dropped() {
        let mut engine: FrameEngine<513> = FrameEngine::default();
        let mut uart = TestUart::default();
        let clock = TestClock::default();

        uart.rx.extend([1, 2, 3]);
        engine.on_event(DmxEvent::RxData, &mut uart, &clock).unwrap();
        engine.on_event(DmxEvent::RxTimeout, &mut uart, &clock).unwrap();

        assert_eq!(engine.take_frame(), None);
        assert_eq!(uart.flushes, 1);
    }

    #[test]
    fn test_check_idle_completes_frame() {
        let mut engine: FrameEngine<513> = FrameEngine::default();
        let mut uart = TestUart::default();
        let clock = TestClock::default();

        engine.on_event(DmxEvent::BreakDetected, &mut uart, &clock).unwrap();
        uart.rx.extend([0x00, 5]);
        engine.on_event(DmxEvent::RxData, &mut uart, &clock).unwrap();

        engine.check_idle(RX_IDLE_TIMEOUT_MICROS as u64 - 1);
        assert_eq!(engine.take_frame(), None);

        engine.check_idle(RX_IDLE_TIMEOUT_MICROS as u64);
        assert_eq!(engine.take_frame(), Some(2));
    }
}
