// Platform-agnostic I2C controller trait.
//
// Device: the internal I2C port, 400kHz, reset line for the switch on a GPIO.
// Host:   SimulatedBus, an in-process register model with a transaction
//         log, used by the desktop build and by the tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::peripheral_mux::{Peripheral, SWITCH_ADDR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("i2c transaction with {addr:#04x} timed out")]
    Timeout { addr: u8 },
    #[error("i2c device {addr:#04x} did not acknowledge or returned an invalid response")]
    NackOrInvalidResponse { addr: u8 },
}

/// Common interface for I2C controller backends. Every transaction carries
/// an explicit timeout; a bus held busy past it is `BusError::Timeout`.
pub trait I2cBus: Send {
    /// Bring the controller up and release the switch reset line.
    fn init(&mut self) -> Result<(), BusError>;

    fn read(&mut self, addr: u8, buf: &mut [u8], timeout: Duration) -> Result<(), BusError>;

    fn write(&mut self, addr: u8, data: &[u8], timeout: Duration) -> Result<(), BusError>;

    /// Register read: write `reg`, repeated start, read `buf.len()` bytes.
    fn write_read(
        &mut self,
        addr: u8,
        reg: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<(), BusError>;
}

impl I2cBus for Box<dyn I2cBus> {
    fn init(&mut self) -> Result<(), BusError> {
        (**self).init()
    }

    fn read(&mut self, addr: u8, buf: &mut [u8], timeout: Duration) -> Result<(), BusError> {
        (**self).read(addr, buf, timeout)
    }

    fn write(&mut self, addr: u8, data: &[u8], timeout: Duration) -> Result<(), BusError> {
        (**self).write(addr, data, timeout)
    }

    fn write_read(
        &mut self,
        addr: u8,
        reg: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<(), BusError> {
        (**self).write_read(addr, reg, buf, timeout)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Simulated bus
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Read,
    Write,
}

/// One completed (acknowledged) bus transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub kind: TransactionKind,
    pub addr: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct SimState {
    initialized: bool,
    switch: u8,
    /// Devices behind the switch, keyed by address → channel mask.
    switched: HashMap<u8, u8>,
    registers: HashMap<(u8, u8), u8>,
    /// Register pointer per device (last register written).
    pointer: HashMap<u8, u8>,
    busy: bool,
    nack: HashSet<u8>,
    /// (device, register) pairs whose writes are refused.
    nack_registers: HashSet<(u8, u8)>,
    log: Vec<Transaction>,
}

impl SimState {
    fn acks(&self, addr: u8) -> bool {
        if self.nack.contains(&addr) {
            return false;
        }
        if addr == SWITCH_ADDR {
            return true;
        }
        match self.switched.get(&addr) {
            Some(mask) => self.switch & mask != 0,
            None => false,
        }
    }

    fn check(&self, addr: u8) -> Result<(), BusError> {
        if self.busy {
            return Err(BusError::Timeout { addr });
        }
        if !self.initialized || !self.acks(addr) {
            return Err(BusError::NackOrInvalidResponse { addr });
        }
        Ok(())
    }

    fn fill(&mut self, addr: u8, buf: &mut [u8]) {
        if addr == SWITCH_ADDR {
            buf.fill(self.switch);
            return;
        }
        let start = self.pointer.get(&addr).copied().unwrap_or(0);
        for (i, b) in buf.iter_mut().enumerate() {
            let reg = start.wrapping_add(i as u8);
            *b = self.registers.get(&(addr, reg)).copied().unwrap_or(0);
        }
    }
}

/// In-process I2C bus. Cloning yields another handle onto the same state,
/// so a test can keep one handle while the device owns the other.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a device that sits behind the switch on `peripheral`'s channel.
    pub fn attach(&self, addr: u8, peripheral: Peripheral) -> &Self {
        self.lock().switched.insert(addr, peripheral.mask());
        self
    }

    /// Hold the bus busy: every transaction times out.
    pub fn set_busy(&self, busy: bool) {
        self.lock().busy = busy;
    }

    /// Make `addr` stop acknowledging.
    pub fn set_nack(&self, addr: u8, nack: bool) {
        let mut st = self.lock();
        if nack {
            st.nack.insert(addr);
        } else {
            st.nack.remove(&addr);
        }
    }

    /// Refuse writes to one register of `addr`; the rest still ack.
    pub fn set_register_nack(&self, addr: u8, reg: u8, nack: bool) {
        let mut st = self.lock();
        if nack {
            st.nack_registers.insert((addr, reg));
        } else {
            st.nack_registers.remove(&(addr, reg));
        }
    }

    /// Force the switch state without logging a transaction.
    pub fn set_switch(&self, mask: u8) {
        self.lock().switch = mask;
    }

    pub fn switch_state(&self) -> u8 {
        self.lock().switch
    }

    pub fn register(&self, addr: u8, reg: u8) -> u8 {
        self.lock().registers.get(&(addr, reg)).copied().unwrap_or(0)
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.lock().log.clone()
    }

    /// Number of acknowledged writes addressed to `addr`.
    pub fn writes_to(&self, addr: u8) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|t| t.kind == TransactionKind::Write && t.addr == addr)
            .count()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }
}

impl I2cBus for SimulatedBus {
    fn init(&mut self) -> Result<(), BusError> {
        let mut st = self.lock();
        if !st.initialized {
            st.initialized = true;
            log::debug!("simulated i2c: switch reset released");
        }
        Ok(())
    }

    fn read(&mut self, addr: u8, buf: &mut [u8], _timeout: Duration) -> Result<(), BusError> {
        let mut st = self.lock();
        st.check(addr)?;
        st.fill(addr, buf);
        st.log.push(Transaction {
            kind: TransactionKind::Read,
            addr,
            data: buf.to_vec(),
        });
        Ok(())
    }

    fn write(&mut self, addr: u8, data: &[u8], _timeout: Duration) -> Result<(), BusError> {
        let mut st = self.lock();
        st.check(addr)?;
        if addr == SWITCH_ADDR {
            let Some(&mask) = data.last() else {
                return Err(BusError::NackOrInvalidResponse { addr });
            };
            st.switch = mask;
        } else if let Some((&reg, values)) = data.split_first() {
            if st.nack_registers.contains(&(addr, reg)) {
                return Err(BusError::NackOrInvalidResponse { addr });
            }
            st.pointer.insert(addr, reg);
            for (i, &v) in values.iter().enumerate() {
                st.registers.insert((addr, reg.wrapping_add(i as u8)), v);
            }
        }
        st.log.push(Transaction {
            kind: TransactionKind::Write,
            addr,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn write_read(
        &mut self,
        addr: u8,
        reg: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<(), BusError> {
        let mut st = self.lock();
        st.check(addr)?;
        st.pointer.insert(addr, reg);
        st.fill(addr, buf);
        st.log.push(Transaction {
            kind: TransactionKind::Read,
            addr,
            data: buf.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(10);

    #[test]
    fn switched_device_only_acks_on_its_channel() {
        let mut bus = SimulatedBus::new();
        bus.init().unwrap();
        bus.attach(0x6C, Peripheral::Audio);

        assert_eq!(
            bus.write(0x6C, &[0x00, 0x01], T),
            Err(BusError::NackOrInvalidResponse { addr: 0x6C })
        );
        bus.set_switch(Peripheral::Audio.mask());
        bus.write(0x6C, &[0x13, 0x10, 0x50], T).unwrap();
        assert_eq!(bus.register(0x6C, 0x13), 0x10);
        assert_eq!(bus.register(0x6C, 0x14), 0x50);

        let mut buf = [0u8; 2];
        bus.write_read(0x6C, 0x13, &mut buf, T).unwrap();
        assert_eq!(buf, [0x10, 0x50]);
    }

    #[test]
    fn busy_bus_times_out() {
        let mut bus = SimulatedBus::new();
        bus.init().unwrap();
        bus.set_busy(true);
        let mut b = [0u8];
        assert_eq!(bus.read(SWITCH_ADDR, &mut b, T), Err(BusError::Timeout { addr: SWITCH_ADDR }));
        assert!(bus.transactions().is_empty());
    }

    #[test]
    fn uninitialized_bus_nacks() {
        let mut bus = SimulatedBus::new();
        let mut b = [0u8];
        assert!(bus.read(SWITCH_ADDR, &mut b, T).is_err());
    }
}
