//! Command processor access through the RDS registers.
//!
//! While RDS is disabled the chip's firmware reads commands from RDSA..RDSD:
//! a verify sentinel in the low byte of RDSD wakes the command processor,
//! which acknowledges by clearing RDSD. The command byte then goes in the low
//! byte of RDSD with up to seven argument bytes packed big-endian ahead of it,
//! and the firmware clears that low byte once the response words are in place.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::registers::{SysConfig1, WriteSpan, RDSA, RDSB, RDSC, RDSD};
use crate::wait::WaitStrategy;
use crate::{Error, Si4703};

pub(crate) const CMD_SET_PROPERTY: u8 = 0x07;
pub(crate) const CMD_GET_PROPERTY: u8 = 0x08;
pub(crate) const CMD_VERIFY: u8 = 0xFF;

impl<'a, I2C, D, W> Si4703<'a, I2C, D, W>
where
    I2C: I2c,
    D: DelayNs,
    W: WaitStrategy,
{
    /// Set a property of the chip's firmware.
    pub fn set_property(
        &mut self,
        property: u16,
        value: u16,
    ) -> Result<(), Error<I2C::Error>> {
        let [value_hi, value_lo] = value.to_be_bytes();
        let [property_hi, property_lo] = property.to_be_bytes();

        self.send_command(
            CMD_SET_PROPERTY,
            [value_hi, value_lo, 0, 0, property_hi, property_lo, 0],
        )
    }

    /// Get a property of the chip's firmware.
    pub fn get_property(
        &mut self,
        property: u16,
    ) -> Result<u16, Error<I2C::Error>> {
        let [property_hi, property_lo] = property.to_be_bytes();

        self.send_command(
            CMD_GET_PROPERTY,
            [0, 0, 0, 0, property_hi, property_lo, 0],
        )?;

        Ok(self.response[0])
    }

    fn send_command(
        &mut self,
        command: u8,
        args: [u8; 7],
    ) -> Result<(), Error<I2C::Error>> {
        // RDS must be off or incoming groups overwrite the command registers.
        let rds = self.state.with(|shared| {
            let rds = shared.regs.get::<SysConfig1>().contains(SysConfig1::RDS);
            shared.regs.modify::<SysConfig1>(|c| c - SysConfig1::RDS);
            shared.regs.set_word(RDSD, CMD_VERIFY as u16);
            rds
        });
        // RDS goes back on even if the chip never saw the verify write.
        let outcome = self
            .commit(WriteSpan::Command)
            .and_then(|()| self.exchange(command, args));

        if rds {
            self.state.modify::<SysConfig1>(|c| c | SysConfig1::RDS);
            self.commit(WriteSpan::Config)?;
        }

        outcome
    }

    fn exchange(
        &mut self,
        command: u8,
        args: [u8; 7],
    ) -> Result<(), Error<I2C::Error>> {
        let mut deadline = self.config.command_timeout;

        self.poll_until(&mut deadline, |regs| regs.word(RDSD) == 0)?;

        self.state.with(|shared| {
            let regs = &mut shared.regs;
            regs.set_word(RDSA, u16::from_be_bytes([args[0], args[1]]));
            regs.set_word(RDSB, u16::from_be_bytes([args[2], args[3]]));
            regs.set_word(RDSC, u16::from_be_bytes([args[4], args[5]]));
            regs.set_word(RDSD, u16::from_be_bytes([args[6], command]));
        });
        self.commit(WriteSpan::Command)?;
        trace!("command {:#x} sent", command);

        let regs =
            self.poll_until(&mut deadline, |regs| regs.word(RDSD) & 0xFF == 0)?;
        self.response = regs.rds_words();

        Ok(())
    }
}
