/// Notifications a transport delivers to the [crate::dmx_engine::FrameEngine].
///
/// On interrupt driven platforms every hardware interrupt is translated into one of these and
/// passed to [crate::dmx_driver::DmxPort::on_event]. Polled platforms return them from
/// [DmxUartDriver::poll_event] instead.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmxEvent {
    /// The transmit queue has space for more bytes.
    TxEmpty,
    /// The last byte left the shift register.
    TxDone,
    /// Received bytes are available.
    RxData,
    /// The line was idle for longer than an inter slot gap.
    RxTimeout,
    /// A break was detected on the line.
    BreakDetected,
    /// The mark after break of a received frame has ended.
    MabElapsed,
    /// A parity or framing error occurred.
    ParityError,
    /// The hardware receive queue overflowed.
    Overflow,
    /// An alarm armed with [Clock::set_alarm] fired.
    Alarm,
}

/// Half-duplex byte transport of a port. All methods have to be non-blocking, they are called
/// from interrupt context.
pub trait DmxUartDriver {
    type DriverError;

    /// The transport inserts break and mark after break in hardware in front of every frame
    /// written after the line was idle.
    const AUTO_BREAK: bool = false;

    /// Queues as many bytes as fit into the transmit queue and returns the amount queued.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Self::DriverError>;

    /// Reads the received bytes that are available without waiting.
    fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize, Self::DriverError>;

    /// Drives the line low.
    fn assert_break(&mut self) -> Result<(), Self::DriverError>;

    /// Releases the line.
    fn deassert_break(&mut self) -> Result<(), Self::DriverError>;

    /// Discards everything in the hardware receive queue.
    fn flush_rx(&mut self) -> Result<(), Self::DriverError>;

    /// Discards the bytes that are queued but not yet sent.
    fn flush_tx(&mut self) -> Result<(), Self::DriverError> {
        Ok(())
    }

    /// Returns the next pending event on platforms without interrupts.
    fn poll_event(&mut self) -> Option<DmxEvent> {
        None
    }
}

/// Free running microsecond clock.
pub trait Clock {
    fn now_us(&self) -> u64;

    /// Waits for `micros` microseconds. Only used for break and mark after break, so the wait
    /// is short and bounded.
    fn delay_us(&self, micros: u32) {
        let start = self.now_us();
        while self.now_us().wrapping_sub(start) < micros as u64 {
            core::hint::spin_loop();
        }
    }

    /// Arms a one shot alarm that is delivered as [DmxEvent::Alarm]. Returns false if alarms are
    /// not supported, in which case [Clock::delay_us] is used.
    fn set_alarm(&self, _delay_us: u32) -> bool {
        false
    }
}

/// Persistent key value storage for persisted parameters.
pub trait KvStore {
    type Error;

    /// Copies the value of `key` into `buffer` and returns its length, or None if the key
    /// doesn't exist.
    fn get(&mut self, key: u32, buffer: &mut [u8]) -> Result<Option<usize>, Self::Error>;

    fn set(&mut self, key: u32, value: &[u8]) -> Result<(), Self::Error>;
}

impl<T: Clock> Clock for &T {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }

    fn delay_us(&self, micros: u32) {
        (**self).delay_us(micros)
    }

    fn set_alarm(&self, delay_us: u32) -> bool {
        (**self).set_alarm(delay_us)
    }
}
