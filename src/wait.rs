//! Blocking until the chip reports a status bit.

use embedded_hal::delay::DelayNs;

use crate::registers::StatusRssi;

/// Pause between looks at the status register.
pub const POLL_INTERVAL_MS: u32 = 1;

/// Pause between status reads while a seek or tune is running, so the bus is
/// not kept busy while the chip works.
pub const STC_POLL_INTERVAL_MS: u32 = 60;

/// Time budget for a blocking operation.
///
/// The budget is consumed by the delays spent between looks at the chip, so
/// it bounds the wall-clock time up to the cost of the bus transfers
/// themselves.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Deadline {
    remaining_ms: u32,
}

impl Deadline {
    pub const fn from_millis(ms: u32) -> Self {
        Self { remaining_ms: ms }
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_ms == 0
    }

    pub fn remaining_ms(&self) -> u32 {
        self.remaining_ms
    }

    /// Sleep for `ms`, or whatever is left of the budget if that is less.
    pub fn sleep<D: DelayNs>(&mut self, delay: &mut D, ms: u32) {
        let ms = ms.min(self.remaining_ms);
        delay.delay_ms(ms);
        self.remaining_ms -= ms;
    }
}

/// How a wait loop learns about new status bits.
///
/// Chosen once, by the driver's type, when it is constructed.
pub trait WaitStrategy {
    /// Whether the chip should raise STC and RDS interrupts on GPIO2.
    const INTERRUPT_DRIVEN: bool;

    /// One iteration of a wait for `flag`: let time pass and make sure the
    /// cached status block is no older than that.
    fn step<D, E>(
        &mut self,
        flag: StatusRssi,
        delay: &mut D,
        deadline: &mut Deadline,
        refresh: impl FnOnce() -> Result<(), E>,
    ) -> Result<(), E>
    where
        D: DelayNs;
}

/// Reads the status block from the wait loop itself.
#[derive(Copy, Clone, Debug, Default)]
pub struct Polling;

impl WaitStrategy for Polling {
    const INTERRUPT_DRIVEN: bool = false;

    fn step<D, E>(
        &mut self,
        flag: StatusRssi,
        delay: &mut D,
        deadline: &mut Deadline,
        refresh: impl FnOnce() -> Result<(), E>,
    ) -> Result<(), E>
    where
        D: DelayNs,
    {
        if flag.contains(StatusRssi::STC) {
            deadline.sleep(delay, STC_POLL_INTERVAL_MS);
        } else {
            deadline.sleep(delay, POLL_INTERVAL_MS);
        }
        refresh()
    }
}

/// Relies on [`RdsCapture::on_interrupt`](crate::RdsCapture::on_interrupt)
/// to keep the status block fresh; the wait loop only re-reads the cache.
#[derive(Copy, Clone, Debug, Default)]
pub struct InterruptDriven;

impl WaitStrategy for InterruptDriven {
    const INTERRUPT_DRIVEN: bool = true;

    fn step<D, E>(
        &mut self,
        _flag: StatusRssi,
        delay: &mut D,
        deadline: &mut Deadline,
        _refresh: impl FnOnce() -> Result<(), E>,
    ) -> Result<(), E>
    where
        D: DelayNs,
    {
        deadline.sleep(delay, POLL_INTERVAL_MS);
        Ok(())
    }
}
