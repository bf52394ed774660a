// Audio amplifier control (TFA9879 behind the I2C switch).
//
// Only the power-up sequence and the volume / mute register are driven
// here; sample transmission over I2S belongs to the audio driver.

use crate::i2c_bus::BusError;
use crate::latch::InitLatch;
use crate::peripheral_mux::{lock_bus, Peripheral, SharedBus};
use crate::session::{clamp_volume, Session, MAX_VOLUME};

/// 7-bit address of the amplifier.
pub const AMP_ADDR: u8 = 0b0110_1100;

const REG_DEVICE_CONTROL: u8 = 0x00;
const REG_VOLUME: u8 = 0x13;
/// High byte written alongside every volume value.
const VOLUME_CTRL: u8 = 0x10;
/// Volume register value for full attenuation.
pub const MUTE_LEVEL: u8 = 0xBD;

/// Register value for a volume percentage: 0 dB at 100%, 0.5 dB steps down.
pub fn volume_register(muted: bool, volume: u8) -> u8 {
    if muted {
        MUTE_LEVEL
    } else {
        (MAX_VOLUME - volume.min(MAX_VOLUME)) * 2
    }
}

pub struct AudioAmp {
    bus: SharedBus,
    latch: InitLatch,
}

impl AudioAmp {
    pub fn new(bus: SharedBus) -> Self {
        Self {
            bus,
            latch: InitLatch::new(),
        }
    }

    /// Power the amplifier up and apply the session's current level. The
    /// latch only closes once both the power-up and the level write landed.
    pub fn init(&self, session: &Session) -> Result<bool, BusError> {
        let st = session.snapshot();
        let ran = self.latch.run(|| {
            {
                let mut bus = lock_bus(&self.bus);
                bus.select(Peripheral::Audio)?;
                // POWERUP
                bus.write_reg(AMP_ADDR, REG_DEVICE_CONTROL, &[0x00, 0x01])?;
                // OPMODE + POWERUP, then serial interface control (I2S, 16 bit).
                bus.write_reg(AMP_ADDR, REG_DEVICE_CONTROL, &[0x00, 0x09, 0x09, 0x98])?;
            }
            self.apply(st.muted, st.volume())
        })?;
        if ran {
            log::info!("audio amp powered up (volume {}%, muted={})", st.volume(), st.muted);
        }
        Ok(ran)
    }

    fn apply(&self, muted: bool, volume: u8) -> Result<(), BusError> {
        let mut bus = lock_bus(&self.bus);
        bus.select(Peripheral::Audio)?;
        bus.write_reg(AMP_ADDR, REG_VOLUME, &[VOLUME_CTRL, volume_register(muted, volume)])
            .inspect_err(|e| log::warn!("writing amp volume failed: {e}"))
    }

    /// Set the volume (clamped to `[0, 100]`). The session only changes
    /// once the amplifier accepted the write.
    pub fn set_volume(&self, session: &Session, percent: i32) -> Result<u8, BusError> {
        let mut st = session.lock();
        let volume = clamp_volume(percent);
        self.apply(st.muted, volume)?;
        st.set_volume(volume as i32);
        Ok(volume)
    }

    pub fn set_muted(&self, session: &Session, muted: bool) -> Result<(), BusError> {
        let mut st = session.lock();
        self.apply(muted, st.volume())?;
        st.muted = muted;
        Ok(())
    }

    /// Re-send the stored level. Teardown calls this so the menu hears the
    /// level it shows, whatever the cart left in the amp.
    pub fn refresh(&self, session: &Session) -> Result<(), BusError> {
        let st = session.lock();
        self.apply(st.muted, st.volume())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c_bus::{I2cBus, SimulatedBus};
    use crate::peripheral_mux::PeripheralBus;
    use crate::session::DeviceSessionState;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn amp() -> (AudioAmp, SimulatedBus, Session) {
        let sim = SimulatedBus::new();
        sim.attach(AMP_ADDR, Peripheral::Audio);
        let backend = Box::new(sim.clone()) as Box<dyn I2cBus>;
        let mut bus = PeripheralBus::new(backend, Duration::from_millis(10));
        bus.init().unwrap();
        let session = Session::new(DeviceSessionState::new(60, false));
        (AudioAmp::new(Arc::new(Mutex::new(bus))), sim, session)
    }

    #[test]
    fn volume_register_mapping() {
        assert_eq!(volume_register(false, 100), 0);
        assert_eq!(volume_register(false, 60), 80);
        assert_eq!(volume_register(false, 0), 200);
        assert_eq!(volume_register(true, 60), MUTE_LEVEL);
    }

    #[test]
    fn init_powers_up_once() {
        let (amp, sim, session) = amp();
        assert!(amp.init(&session).unwrap());
        let writes = sim.writes_to(AMP_ADDR);
        assert!(!amp.init(&session).unwrap());
        assert_eq!(sim.writes_to(AMP_ADDR), writes);
        assert_eq!(sim.register(AMP_ADDR, REG_VOLUME + 1), volume_register(false, 60));
    }

    #[test]
    fn init_retries_after_failed_level_write() {
        let (amp, sim, session) = amp();
        sim.set_register_nack(AMP_ADDR, REG_VOLUME, true);
        assert!(amp.init(&session).is_err());
        sim.set_register_nack(AMP_ADDR, REG_VOLUME, false);
        assert!(amp.init(&session).unwrap());
        assert_eq!(sim.register(AMP_ADDR, REG_VOLUME + 1), volume_register(false, 60));
        assert!(!amp.init(&session).unwrap());
    }

    #[test]
    fn refresh_resends_stored_level() {
        let (amp, sim, session) = amp();
        amp.init(&session).unwrap();
        amp.set_volume(&session, 40).unwrap();
        let mut bus = lock_bus(&amp.bus);
        bus.write_reg(AMP_ADDR, REG_VOLUME, &[VOLUME_CTRL, 0]).unwrap();
        drop(bus);
        amp.refresh(&session).unwrap();
        assert_eq!(sim.register(AMP_ADDR, REG_VOLUME + 1), volume_register(false, 40));
    }

    #[test]
    fn set_volume_clamps_and_writes() {
        let (amp, sim, session) = amp();
        assert_eq!(amp.set_volume(&session, 140).unwrap(), 100);
        assert_eq!(session.volume(), 100);
        assert_eq!(sim.register(AMP_ADDR, REG_VOLUME + 1), 0);
    }

    #[test]
    fn failed_write_keeps_previous_volume() {
        let (amp, sim, session) = amp();
        amp.set_volume(&session, 30).unwrap();
        sim.set_nack(AMP_ADDR, true);
        assert!(amp.set_volume(&session, 90).is_err());
        assert_eq!(session.volume(), 30);
        assert!(amp.set_muted(&session, true).is_err());
        assert!(!session.is_muted());
    }

    #[test]
    fn mute_writes_mute_level() {
        let (amp, sim, session) = amp();
        amp.set_muted(&session, true).unwrap();
        assert!(session.is_muted());
        assert_eq!(sim.register(AMP_ADDR, REG_VOLUME + 1), MUTE_LEVEL);
    }
}
