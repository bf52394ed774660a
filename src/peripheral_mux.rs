// Peripheral bus multiplexer: one shared I2C control bus, an addressable
// switch (0x70) in front of the accelerometer, the minibadge expansion
// ports and the audio amplifier. Exactly one channel is connected at a time.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::i2c_bus::{BusError, I2cBus};
use crate::latch::InitLatch;

/// Address of the channel switch on the shared bus.
pub const SWITCH_ADDR: u8 = 0x70;

/// Downstream channels of the switch. The discriminant is the channel
/// number; the switch mask is `1 << channel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Peripheral {
    Minibadge1 = 0,
    Minibadge2 = 1,
    Minibadge3 = 2,
    Minibadge4 = 3,
    MinibadgeExt = 4,
    Accelerometer = 5,
    Audio = 6,
}

impl Peripheral {
    pub const ALL: [Peripheral; 7] = [
        Peripheral::Minibadge1,
        Peripheral::Minibadge2,
        Peripheral::Minibadge3,
        Peripheral::Minibadge4,
        Peripheral::MinibadgeExt,
        Peripheral::Accelerometer,
        Peripheral::Audio,
    ];

    pub fn channel(self) -> u8 {
        self as u8
    }

    pub fn mask(self) -> u8 {
        1 << self.channel()
    }

    pub fn from_channel(channel: u8) -> Option<Self> {
        Self::ALL.get(channel as usize).copied()
    }
}

/// The multiplexer plus the bus it fronts. Callers that need a multi-step
/// transaction (select → register access) hold the `SharedBus` lock across
/// the steps; the multiplexer itself has no transaction scope.
pub struct PeripheralBus<B: I2cBus = Box<dyn I2cBus>> {
    bus: B,
    timeout: Duration,
    latch: InitLatch,
}

pub type SharedBus = Arc<Mutex<PeripheralBus>>;

/// Lock a shared bus, recovering from a poisoned mutex.
pub fn lock_bus(bus: &SharedBus) -> MutexGuard<'_, PeripheralBus> {
    bus.lock().unwrap_or_else(|e| e.into_inner())
}

impl<B: I2cBus> PeripheralBus<B> {
    pub fn new(bus: B, timeout: Duration) -> Self {
        Self {
            bus,
            timeout,
            latch: InitLatch::new(),
        }
    }

    /// Bring the bus up once. Returns whether the init actually ran.
    pub fn init(&mut self) -> Result<bool, BusError> {
        let ran = self.latch.run(|| self.bus.init())?;
        if ran {
            log::info!("i2c bus initialized (timeout {:?})", self.timeout);
        }
        Ok(ran)
    }

    /// Read the raw switch state (one bit per connected channel).
    pub fn switch_state(&mut self) -> Result<u8, BusError> {
        let mut state = [0u8; 1];
        self.bus
            .read(SWITCH_ADDR, &mut state, self.timeout)
            .inspect_err(|e| log::warn!("reading i2c switch state failed: {e}"))?;
        Ok(state[0])
    }

    /// Connect `peripheral` to the bus. Reads the switch first and skips
    /// the write when the channel is already selected.
    pub fn select(&mut self, peripheral: Peripheral) -> Result<(), BusError> {
        let state = self.switch_state()?;
        if state & peripheral.mask() != 0 {
            return Ok(());
        }
        log::trace!("i2c switch {state:#010b} → {:#010b}", peripheral.mask());
        self.bus
            .write(SWITCH_ADDR, &[peripheral.mask()], self.timeout)
            .inspect_err(|e| log::warn!("selecting {peripheral:?} failed: {e}"))
    }

    pub fn read_reg(&mut self, addr: u8, reg: u8, buf: &mut [u8]) -> Result<(), BusError> {
        self.bus.write_read(addr, reg, buf, self.timeout)
    }

    /// Write `data` starting at register `reg`.
    pub fn write_reg(&mut self, addr: u8, reg: u8, data: &[u8]) -> Result<(), BusError> {
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(reg);
        frame.extend_from_slice(data);
        self.bus.write(addr, &frame, self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c_bus::{SimulatedBus, TransactionKind};

    fn mux() -> (PeripheralBus<SimulatedBus>, SimulatedBus) {
        let sim = SimulatedBus::new();
        let mut bus = PeripheralBus::new(sim.clone(), Duration::from_millis(10));
        bus.init().unwrap();
        (bus, sim)
    }

    #[test]
    fn init_is_idempotent() {
        let (mut bus, sim) = mux();
        assert!(!bus.init().unwrap());
        assert!(sim.is_initialized());
        assert!(sim.transactions().is_empty());
    }

    #[test]
    fn reselecting_current_channel_issues_no_write() {
        let (mut bus, sim) = mux();
        sim.set_switch(0b0000_0100);

        bus.select(Peripheral::from_channel(2).unwrap()).unwrap();
        assert_eq!(sim.writes_to(SWITCH_ADDR), 0);

        bus.select(Peripheral::from_channel(3).unwrap()).unwrap();
        assert_eq!(sim.writes_to(SWITCH_ADDR), 1);
        let last = sim.transactions().pop().unwrap();
        assert_eq!(last.data, vec![0b1000]);
        assert_eq!(sim.switch_state(), 0b1000);
    }

    #[test]
    fn writes_equal_distinct_consecutive_changes() {
        let (mut bus, sim) = mux();
        let seq = [
            Peripheral::Audio,
            Peripheral::Audio,
            Peripheral::Accelerometer,
            Peripheral::Accelerometer,
            Peripheral::Accelerometer,
            Peripheral::Audio,
            Peripheral::Minibadge1,
            Peripheral::Minibadge1,
        ];
        for p in seq {
            bus.select(p).unwrap();
        }
        assert_eq!(sim.writes_to(SWITCH_ADDR), 4);
        for t in sim.transactions() {
            if t.addr == SWITCH_ADDR && t.kind == TransactionKind::Write {
                assert_eq!(t.data[0].count_ones(), 1);
            }
        }
    }

    #[test]
    fn select_surfaces_timeout() {
        let (mut bus, sim) = mux();
        sim.set_busy(true);
        assert_eq!(
            bus.select(Peripheral::Audio),
            Err(BusError::Timeout { addr: SWITCH_ADDR })
        );
    }

    #[test]
    fn write_reg_prefixes_register() {
        let (mut bus, sim) = mux();
        sim.attach(0x6C, Peripheral::Audio);
        bus.select(Peripheral::Audio).unwrap();
        bus.write_reg(0x6C, 0x13, &[0x10, 0x50]).unwrap();
        let mut buf = [0u8; 2];
        bus.read_reg(0x6C, 0x13, &mut buf).unwrap();
        assert_eq!(buf, [0x10, 0x50]);
    }
}
