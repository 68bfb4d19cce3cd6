//! `Si4703` FM Receiver Driver
//!
//! The `Si4703` is a single-chip FM broadcast radio receiver with RDS
//! support, controlled over a 2-wire bus. The bus only supports bulk
//! transfers: writes always start at POWERCFG (0x02) and reads always start at
//! STATUSRSSI (0x0A), so the driver keeps a mirror of the whole register file
//! and transfers contiguous spans of it.
//!
//! Two ways of waiting on the chip are supported, picked with the driver's
//! [`WaitStrategy`]:
//!
//! * [`Polling`] reads the status registers from the waiting loop.
//! * [`InterruptDriven`] enables the chip's GPIO2 interrupt. The application
//!   calls [`RdsCapture::on_interrupt`] from the falling-edge handler, which
//!   keeps the status registers fresh and captures RDS groups for
//!   [`Si4703::take_group`].
//!
//! The chip also runs a small command processor, reached by writing the RDS
//! registers while RDS is off; [`Si4703::set_property`] and
//! [`Si4703::get_property`] use it.

#![cfg_attr(not(test), no_std)]

pub use embedded_hal as hal;

use hal::delay::DelayNs;
use hal::digital::OutputPin;
use hal::i2c::I2c;

#[macro_use]
mod fmt;

mod command;
mod rds;
mod registers;
mod state;
mod wait;

#[cfg(test)]
mod sim;

use registers::*;
pub use rds::{RdsCapture, RdsGroup};
pub use registers::{Band, DeEmphasis, Identity, Spacing, StatusRssi};
pub use state::State;
pub use wait::{Deadline, InterruptDriven, Polling, WaitStrategy};

/// 7-bit bus address of the chip.
pub const ADDRESS: u8 = 0x10;

/// Highest value accepted by [`Si4703::set_volume`].
///
/// Levels 1 to 15 use the extended (-30dB) range, 16 to 30 the normal one.
pub const MAX_VOLUME: u8 = 30;

/// Time for the crystal oscillator to settle.
const OSCILLATOR_SETTLE_MS: u32 = 500;

/// Time for the chip to power up.
const POWERUP_MS: u32 = 110;

/// Driver configuration
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Channel spacing
    pub spacing: Spacing,

    /// De-emphasis
    pub de_emphasis: DeEmphasis,

    /// A 32.768kHz crystal is fitted and must be enabled
    pub external_oscillator: bool,

    /// Minimum RSSI for a seek to stop on a channel
    pub seek_threshold: u8,

    /// Minimum SNR for a seek to stop on a channel (0 disables)
    pub seek_snr: u8,

    /// Maximum FM impulse detection count for a seek to stop on a channel
    /// (0 disables)
    pub seek_count: u8,

    /// Budget for a seek or tune to complete
    pub tune_timeout: Deadline,

    /// Budget for a command processor round trip
    pub command_timeout: Deadline,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spacing: Spacing::Khz100,
            de_emphasis: DeEmphasis::Us50,
            external_oscillator: true,
            seek_threshold: 0,
            seek_snr: 1,
            seek_count: 1,
            tune_timeout: Deadline::from_millis(15_000),
            command_timeout: Deadline::from_millis(500),
        }
    }
}

/// Si4703 driver
pub struct Si4703<'a, I2C, D, W> {
    /// Bus used by foreground operations
    i2c: I2C,

    /// Delay provider
    delay: D,

    /// How to wait for status bits
    wait: W,

    /// Register cache and RDS mailbox, shared with the interrupt handler
    state: &'a State,

    config: Config,

    /// Command processor response, copied out before RDS can overwrite it
    response: [u16; 4],
}

impl<'a, I2C, D, W> Si4703<'a, I2C, D, W>
where
    I2C: I2c,
    D: DelayNs,
    W: WaitStrategy,
{
    /// Construct a new driver without causing any side-effects.
    pub fn new(
        i2c: I2C,
        delay: D,
        wait: W,
        state: &'a State,
        config: Config,
    ) -> Self {
        Self {
            i2c,
            delay,
            wait,
            state,
            config,
            response: [0u16; 4],
        }
    }

    /// Power up the chip and configure it for reception on `band`.
    ///
    /// The chip must have been brought out of reset in 2-wire mode first, see
    /// [`reset`].
    pub fn init(&mut self, band: Band) -> Result<(), Error<I2C::Error>> {
        if self.config.external_oscillator {
            self.refresh(Span::All)?;
            self.state.modify::<Test1>(|t| t | Test1::XOSCEN);
            self.commit(WriteSpan::Test)?;
            self.delay.delay_ms(OSCILLATOR_SETTLE_MS);
        }

        // Cache the register file before powerup
        self.refresh(Span::All)?;

        self.state
            .modify::<PowerCfg>(|p| p | PowerCfg::DMUTE | PowerCfg::ENABLE);
        self.commit(WriteSpan::Config)?;
        self.delay.delay_ms(POWERUP_MS);

        // ... and after
        self.refresh(Span::All)?;

        let config = self.config;
        self.state.with(|shared| {
            let regs = &mut shared.regs;

            regs.modify::<PowerCfg>(|p| p | PowerCfg::RDSM);
            regs.modify::<SysConfig1>(|mut c| {
                c.insert(SysConfig1::RDS);
                c.set(SysConfig1::DE, config.de_emphasis == DeEmphasis::Us50);
                if W::INTERRUPT_DRIVEN {
                    c.insert(
                        SysConfig1::RDSIEN
                            | SysConfig1::STCIEN
                            | SysConfig1::GPIO2_INT,
                    );
                }
                c
            });
            regs.modify::<SysConfig2>(|c| {
                c.with_band(band)
                    .with_spacing(config.spacing)
                    .with_volume(15)
                    .with_seek_threshold(config.seek_threshold)
            });
            regs.modify::<SysConfig3>(|c| {
                c.difference(SysConfig3::VOLEXT)
                    .with_seek_snr(config.seek_snr)
                    .with_seek_count(config.seek_count)
            });
        });
        self.commit(WriteSpan::Config)?;

        debug!(
            "si4703 up, band {}, interrupts {}",
            band as u8,
            W::INTERRUPT_DRIVEN
        );

        Ok(())
    }

    /// Identification of the chip, as read during [`init`](Self::init).
    pub fn identify(&self) -> Identity {
        Identity::from_registers(&self.state.registers())
    }

    /// Get the frequency the chip is tuned to, in 10kHz units.
    pub fn frequency(&mut self) -> Result<u16, Error<I2C::Error>> {
        let regs = self.refresh(Span::Status)?;
        let cfg = regs.get::<SysConfig2>();

        Ok(cfg.band().bottom()
            + regs.get::<ReadChan>().channel() * cfg.spacing().step())
    }

    /// Seek up to the next valid channel.
    ///
    /// With `wrap` unset the seek stops at the top of the band. Failing to
    /// find a channel, or hitting the band limit, shows up as
    /// [`StatusRssi::SF_BL`] in the returned status.
    pub fn seek_up(
        &mut self,
        wrap: bool,
    ) -> Result<StatusRssi, Error<I2C::Error>> {
        self.seek(true, wrap)
    }

    /// Seek down to the next valid channel.
    ///
    /// With `wrap` unset the seek stops at the bottom of the band. Failing to
    /// find a channel, or hitting the band limit, shows up as
    /// [`StatusRssi::SF_BL`] in the returned status.
    pub fn seek_down(
        &mut self,
        wrap: bool,
    ) -> Result<StatusRssi, Error<I2C::Error>> {
        self.seek(false, wrap)
    }

    /// Tune to `frequency`, in 10kHz units.
    pub fn tune(
        &mut self,
        frequency: u16,
    ) -> Result<StatusRssi, Error<I2C::Error>> {
        let cfg = self.state.registers().get::<SysConfig2>();
        let (band, step) = (cfg.band(), cfg.spacing().step());

        if frequency < band.bottom()
            || frequency > band.top()
            || (frequency - band.bottom()) % step != 0
        {
            return Err(Error::InvalidFrequency);
        }
        let channel = (frequency - band.bottom()) / step;

        self.state.clear_group();
        self.state
            .modify::<Channel>(|c| c.with_channel(channel) | Channel::TUNE);
        debug!("tuning to {}", frequency);

        self.run_tune()
    }

    /// Read the status register.
    pub fn status(&mut self) -> Result<StatusRssi, Error<I2C::Error>> {
        Ok(self.refresh(Span::Status)?.get::<StatusRssi>())
    }

    /// Received signal strength of the current channel, in dBµV.
    pub fn signal_strength(&mut self) -> Result<u8, Error<I2C::Error>> {
        Ok(self.status()?.rssi())
    }

    /// Whether the current channel is received in stereo.
    pub fn is_stereo(&mut self) -> Result<bool, Error<I2C::Error>> {
        Ok(self.status()?.contains(StatusRssi::ST))
    }

    /// Current volume, from 0 (silent) to [`MAX_VOLUME`].
    pub fn volume(&self) -> u8 {
        volume_level(&self.state.registers())
    }

    /// Set the volume, clamped to [`MAX_VOLUME`].
    pub fn set_volume(&mut self, level: u8) -> Result<(), Error<I2C::Error>> {
        self.apply(|regs| set_volume_level(regs, level.min(MAX_VOLUME)))?;

        Ok(())
    }

    /// Increase the volume by 1. Returns false, without touching the chip,
    /// when the volume is already at its maximum.
    pub fn volume_up(&mut self) -> Result<bool, Error<I2C::Error>> {
        let level = self.volume();
        if level == MAX_VOLUME {
            return Ok(false);
        }

        self.apply(|regs| set_volume_level(regs, level + 1))
    }

    /// Decrease the volume by 1. Returns false, without touching the chip,
    /// when the volume is already at 0.
    ///
    /// With `also_mute` set, reaching 0 also mutes the output.
    pub fn volume_down(
        &mut self,
        also_mute: bool,
    ) -> Result<bool, Error<I2C::Error>> {
        let level = self.volume();
        if level == 0 {
            return Ok(false);
        }

        self.apply(|regs| set_volume_level(regs, level - 1))?;
        if level == 1 && also_mute {
            self.mute()?;
        }

        Ok(true)
    }

    /// Mute the audio output.
    pub fn mute(&mut self) -> Result<(), Error<I2C::Error>> {
        self.apply(|regs| regs.modify::<PowerCfg>(|p| p - PowerCfg::DMUTE))?;

        Ok(())
    }

    /// Unmute the audio output.
    ///
    /// With `to_minimum_first` set the volume drops to its lowest audible
    /// level first; otherwise audio resumes at the previous volume.
    pub fn unmute(
        &mut self,
        to_minimum_first: bool,
    ) -> Result<(), Error<I2C::Error>> {
        self.apply(|regs| {
            if to_minimum_first {
                set_volume_level(regs, 1);
            }
            regs.modify::<PowerCfg>(|p| p | PowerCfg::DMUTE);
        })?;

        Ok(())
    }

    /// Force mono reception.
    pub fn set_mono(&mut self, mono: bool) -> Result<(), Error<I2C::Error>> {
        self.apply(|regs| {
            regs.modify::<PowerCfg>(|mut p| {
                p.set(PowerCfg::MONO, mono);
                p
            })
        })?;

        Ok(())
    }

    /// Mute and disable the chip.
    pub fn shutdown(&mut self) -> Result<(), Error<I2C::Error>> {
        self.state.with(|shared| {
            shared.regs.modify::<PowerCfg>(|p| {
                (p - PowerCfg::DMUTE) | PowerCfg::DISABLE
            });
            shared.regs.modify::<SysConfig1>(|c| c - SysConfig1::RDS);
        });
        self.commit(WriteSpan::Config)?;
        debug!("si4703 down");

        Ok(())
    }

    /// Take the most recent error-free RDS group, if one arrived since the
    /// last call.
    ///
    /// Only interrupt-driven drivers capture groups.
    pub fn take_group(&mut self) -> Option<RdsGroup> {
        self.state.take_group()
    }

    /// Destroy the driver and return the bus and delay.
    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    //
    // private functions
    //

    fn refresh(
        &mut self,
        span: Span,
    ) -> Result<RegisterFile, Error<I2C::Error>> {
        Ok(self.state.refresh(&mut self.i2c, span)?)
    }

    fn commit(&mut self, span: WriteSpan) -> Result<(), Error<I2C::Error>> {
        self.state.commit(&mut self.i2c, span)?;

        Ok(())
    }

    /// Change the configuration registers, writing them out only if
    /// something changed. Returns whether it did.
    fn apply(
        &mut self,
        f: impl FnOnce(&mut RegisterFile),
    ) -> Result<bool, Error<I2C::Error>> {
        let changed = self.state.with(|shared| {
            let before = shared.regs;
            f(&mut shared.regs);
            shared.regs != before
        });
        if changed {
            self.commit(WriteSpan::Config)?;
        }

        Ok(changed)
    }

    fn seek(
        &mut self,
        up: bool,
        wrap: bool,
    ) -> Result<StatusRssi, Error<I2C::Error>> {
        self.state.clear_group();
        self.state.modify::<PowerCfg>(|mut p| {
            p.set(PowerCfg::SKMODE, !wrap);
            p.set(PowerCfg::SEEKUP, up);
            p | PowerCfg::SEEK
        });
        debug!("seeking, up {}, wrap {}", up, wrap);

        self.run_tune()
    }

    /// Start the seek or tune staged in the cache and see it through.
    fn run_tune(&mut self) -> Result<StatusRssi, Error<I2C::Error>> {
        if let Err(err) = self.commit(WriteSpan::Config) {
            // The chip never saw SEEK/TUNE; a later write must not start it.
            self.end_tune();
            return Err(err);
        }

        self.complete_tune()
    }

    /// Wait for a seek or tune to finish, then end it.
    fn complete_tune(&mut self) -> Result<StatusRssi, Error<I2C::Error>> {
        let outcome = self.wait_for(StatusRssi::STC, self.config.tune_timeout);

        // Ending the operation also resets STC and SF/BL on the chip.
        self.end_tune();
        self.commit(WriteSpan::Config)?;

        let status = outcome?;
        let mut deadline = self.config.tune_timeout;
        self.poll_until(&mut deadline, |regs| {
            !regs.get::<StatusRssi>().contains(StatusRssi::STC)
        })?;
        debug!("tune complete, status {:#x}", status.bits());

        Ok(status)
    }

    /// Drop SEEK and TUNE from the cache, along with any group captured
    /// for the previous channel.
    fn end_tune(&self) {
        self.state.with(|shared| {
            shared.mailbox.clear();
            shared.regs.modify::<PowerCfg>(|p| p - PowerCfg::SEEK);
            shared.regs.modify::<Channel>(|c| c - Channel::TUNE);
        });
    }

    /// Block until `flag` is set in the cached status register.
    fn wait_for(
        &mut self,
        flag: StatusRssi,
        mut deadline: Deadline,
    ) -> Result<StatusRssi, Error<I2C::Error>> {
        let state = self.state;
        let i2c = &mut self.i2c;

        loop {
            let status = state.registers().get::<StatusRssi>();
            if status.contains(flag) {
                return Ok(status);
            }
            if deadline.is_expired() {
                warn!("timed out waiting for status {:#x}", flag.bits());
                return Err(Error::Timeout);
            }

            self.wait.step(flag, &mut self.delay, &mut deadline, || {
                state.refresh(&mut *i2c, Span::Status).map(|_| ())
            })?;
        }
    }

    /// Refresh the status block until `done` holds for it, returning the
    /// register file it held for.
    fn poll_until(
        &mut self,
        deadline: &mut Deadline,
        done: impl Fn(&RegisterFile) -> bool,
    ) -> Result<RegisterFile, Error<I2C::Error>> {
        loop {
            let regs = self.refresh(Span::Status)?;
            if done(&regs) {
                return Ok(regs);
            }
            if deadline.is_expired() {
                warn!("timed out polling, RDSD {:#x}", regs.word(RDSD));
                return Err(Error::Timeout);
            }

            deadline.sleep(&mut self.delay, wait::POLL_INTERVAL_MS);
        }
    }
}

/// Volume as a single level: VOLUME with VOLEXT set gives 1 to 15, with it
/// clear 16 to 30.
fn volume_level(regs: &RegisterFile) -> u8 {
    let volume = regs.get::<SysConfig2>().volume();

    if volume == 0 {
        0
    } else if regs.get::<SysConfig3>().contains(SysConfig3::VOLEXT) {
        volume
    } else {
        volume + 15
    }
}

fn set_volume_level(regs: &mut RegisterFile, level: u8) {
    let (extended, volume) = match level {
        0..=15 => (true, level),
        _ => (false, level - 15),
    };

    regs.modify::<SysConfig3>(|mut c| {
        c.set(SysConfig3::VOLEXT, extended);
        c
    });
    regs.modify::<SysConfig2>(|c| c.with_volume(volume));
}

/// Reset the chip with SDIO held low, which selects the 2-wire bus.
///
/// SEN must be tied high. `sdio` is released before returning, so the pin can
/// then be handed to the bus peripheral.
pub fn reset<RST, SDIO, D, E>(
    rst: &mut RST,
    sdio: &mut SDIO,
    delay: &mut D,
) -> Result<(), E>
where
    RST: OutputPin<Error = E>,
    SDIO: OutputPin<Error = E>,
    D: DelayNs,
{
    sdio.set_low()?;
    rst.set_low()?;
    delay.delay_us(100);

    rst.set_high()?;
    delay.delay_ms(1);
    sdio.set_high()?;

    Ok(())
}

/// Driver error types
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error<E> {
    /// Bus error
    I2c(E),

    /// The chip did not finish an operation in time
    Timeout,

    /// Frequency outside the band or off the channel raster
    InvalidFrequency,
}

impl<E> From<E> for Error<E> {
    fn from(err: E) -> Error<E> {
        Error::I2c(err)
    }
}
