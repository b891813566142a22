//! Simulated half-duplex bus shared by the integration tests.
#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::vec::Vec;

use dmx_rdm_engine::dmx_driver::{DmxConfig, DmxPort};
use dmx_rdm_engine::dmx_uart_driver::{Clock, DmxEvent, DmxUartDriver};
use dmx_rdm_engine::rdm_data::RdmData;
use dmx_rdm_engine::rdm_responder::{
    NoFallback, Personality, RdmAnswer, RdmResponder, RdmResponderConfig,
};
use dmx_rdm_engine::unique_identifier::UniqueIdentifier;
use dmx_rdm_engine::utils::encode_discovery_response;

pub type TestResponder = RdmResponder<24, 4, 48>;

pub const PERSONALITIES: &[Personality] = &[
    Personality {
        footprint: 3,
        description: "rgb",
    },
    Personality {
        footprint: 4,
        description: "rgbw",
    },
    Personality {
        footprint: 1,
        description: "dimmer",
    },
];

pub fn responder(uid: u64) -> TestResponder {
    RdmResponder::new(RdmResponderConfig {
        uid: UniqueIdentifier::try_from(uid).unwrap(),
        personalities: PERSONALITIES,
        initial_start_address: 1,
        ..Default::default()
    })
    .unwrap()
}

/// Transport of a controller port. Every written rdm request is handed to all attached
/// responders and their answers are played back on the line.
#[derive(Default)]
pub struct SimulatedBus {
    pub responders: Vec<TestResponder>,
    pub events: VecDeque<DmxEvent>,
    pub rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    pub frames_sent: usize,
}

impl SimulatedBus {
    pub fn with_responders(uids: &[u64]) -> Self {
        Self {
            responders: uids.iter().map(|&uid| responder(uid)).collect(),
            ..Default::default()
        }
    }

    pub fn inject(&mut self, frame: &[u8], with_break: bool) {
        if with_break {
            self.events.push_back(DmxEvent::BreakDetected);
        }
        self.rx.extend(frame.iter().copied());
        self.events.push_back(DmxEvent::RxData);
        self.events.push_back(DmxEvent::RxTimeout);
    }

    fn dispatch(&mut self, bytes: &[u8]) {
        let Ok(RdmData::Request(request)) = RdmData::deserialize(bytes) else {
            return;
        };

        let mut responses = Vec::new();
        let mut discovery_answers = Vec::new();

        for responder in &mut self.responders {
            match responder.handle_rdm_request(request.clone(), &mut NoFallback) {
                Ok(RdmAnswer::Response(response)) => responses.push(response),
                Ok(RdmAnswer::DiscoveryResponse(uid)) => discovery_answers.push(uid),
                Ok(RdmAnswer::NoResponse) => {},
                Err(never) => match never {},
            }
        }

        match discovery_answers.as_slice() {
            [] => {},
            [uid] => self.inject(&encode_discovery_response(*uid), false),
            _ => {
                // overlapping answers garble each other
                self.events.push_back(DmxEvent::RxData);
                self.rx.extend([0xFE, 0xFE, 0xFE]);
                self.events.push_back(DmxEvent::ParityError);
            },
        }

        if let [response] = responses.as_slice() {
            self.inject(&RdmData::Response(response.clone()).serialize(), true);
        }
    }
}

impl DmxUartDriver for SimulatedBus {
    type DriverError = ();

    fn write(&mut self, bytes: &[u8]) -> Result<usize, ()> {
        self.tx.extend_from_slice(bytes);
        self.frames_sent += 1;
        self.events.push_back(DmxEvent::TxDone);
        self.dispatch(bytes);

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

    fn poll_event(&mut self) -> Option<DmxEvent> {
        self.events.pop_front()
    }
}

/// Advances by 10µs every time it's read.
#[derive(Default)]
pub struct StepClock(Cell<u64>);

impl Clock for StepClock {
    fn now_us(&self) -> u64 {
        let now = self.0.get();
        self.0.set(now + 10);
        now
    }
}

pub type BusPort<const N: usize = 513> = DmxPort<SimulatedBus, StepClock, N>;

pub fn bus_port(uids: &[u64]) -> BusPort {
    DmxPort::new(
        SimulatedBus::with_responders(uids),
        StepClock::default(),
        DmxConfig::default(),
    )
    .unwrap()
}
