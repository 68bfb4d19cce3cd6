//! RDS group capture.
//!
//! The chip signals a new RDS group (and seek/tune completion) by pulling
//! GPIO2 low. [`RdsCapture::on_interrupt`] should be called from the handler
//! for that falling edge: it refreshes the status block and, when the group
//! arrived without block errors, leaves it in a one-slot mailbox that
//! [`Si4703::take_group`](crate::Si4703::take_group) drains.
//!
//! Capture is lossy. A group that arrives before the previous one was taken
//! replaces it, and groups with any block errors are dropped.

use embedded_hal::i2c::I2c;

use crate::registers::{Span, StatusRssi};
use crate::state::State;
use crate::Error;

/// One RDS group, blocks A through D.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RdsGroup {
    pub blocks: [u16; 4],
}

impl RdsGroup {
    pub fn a(&self) -> u16 {
        self.blocks[0]
    }

    pub fn b(&self) -> u16 {
        self.blocks[1]
    }

    pub fn c(&self) -> u16 {
        self.blocks[2]
    }

    pub fn d(&self) -> u16 {
        self.blocks[3]
    }
}

/// Single-slot, overwrite-on-post, clear-on-take holder of the latest group.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Mailbox {
    group: Option<RdsGroup>,
}

impl Mailbox {
    pub(crate) const fn new() -> Self {
        Self { group: None }
    }

    pub(crate) fn post(&mut self, group: RdsGroup) {
        self.group = Some(group);
    }

    pub(crate) fn take(&mut self) -> Option<RdsGroup> {
        self.group.take()
    }

    pub(crate) fn clear(&mut self) {
        self.group = None;
    }
}

/// Interrupt-side half of an interrupt-driven driver.
///
/// Owns its own handle to the bus (for instance an
/// `embedded_hal_bus::i2c::CriticalSectionDevice` shared with the driver) and
/// borrows the driver's [`State`].
pub struct RdsCapture<'a, I2C> {
    i2c: I2C,
    state: &'a State,
}

impl<'a, I2C> RdsCapture<'a, I2C>
where
    I2C: I2c,
{
    pub fn new(i2c: I2C, state: &'a State) -> Self {
        Self { i2c, state }
    }

    /// Service a GPIO2 interrupt. Returns whether a group was captured.
    pub fn on_interrupt(&mut self) -> Result<bool, Error<I2C::Error>> {
        let i2c = &mut self.i2c;

        critical_section::with(|cs| {
            let mut shared = self.state.lock(cs);
            shared.refresh(i2c, Span::Status)?;

            if !shared.regs.get::<StatusRssi>().contains(StatusRssi::RDSR) {
                return Ok(false);
            }

            let errors = shared.regs.block_errors();
            if errors.iter().any(|&e| e != 0) {
                trace!(
                    "dropping RDS group, block errors {} {} {} {}",
                    errors[0],
                    errors[1],
                    errors[2],
                    errors[3]
                );
                return Ok(false);
            }

            let group = RdsGroup {
                blocks: shared.regs.rds_words(),
            };
            shared.mailbox.post(group);

            Ok(true)
        })
    }

    /// Destroy the capture and return the bus handle.
    pub fn release(self) -> I2C {
        self.i2c
    }
}
