use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};
use embedded_hal::i2c::I2c;

use crate::rds::{Mailbox, RdsGroup};
use crate::registers::{Register, RegisterFile, Span, WriteSpan, MAX_FRAME};
use crate::ADDRESS;

pub(crate) struct Shared {
    pub(crate) regs: RegisterFile,
    pub(crate) mailbox: Mailbox,
}

impl Shared {
    /// Read `span` registers from the chip into the cache.
    pub(crate) fn refresh<I: I2c>(
        &mut self,
        i2c: &mut I,
        span: Span,
    ) -> Result<(), I::Error> {
        let mut frame = [0u8; MAX_FRAME];
        let frame = &mut frame[..span as usize * 2];
        i2c.read(ADDRESS, frame)?;
        self.regs.store(span, frame);

        Ok(())
    }
}

/// Register cache and RDS mailbox of one device.
///
/// The driver and its [`RdsCapture`](crate::RdsCapture) share a `State`; every
/// access goes through a critical section so the interrupt handler never sees
/// (or leaves behind) a half-updated cache. Use one `State` per device.
pub struct State {
    inner: Mutex<RefCell<Shared>>,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Shared {
                regs: RegisterFile::new(),
                mailbox: Mailbox::new(),
            })),
        }
    }

    pub(crate) fn lock<'cs>(
        &'cs self,
        cs: CriticalSection<'cs>,
    ) -> core::cell::RefMut<'cs, Shared> {
        self.inner.borrow_ref_mut(cs)
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        critical_section::with(|cs| f(&mut self.lock(cs)))
    }

    /// Snapshot of the cached register file.
    pub(crate) fn registers(&self) -> RegisterFile {
        self.with(|shared| shared.regs)
    }

    pub(crate) fn modify<R: Register>(&self, f: impl FnOnce(R) -> R) {
        self.with(|shared| shared.regs.modify(f))
    }

    /// Refresh `span` and return the resulting cache, in one critical
    /// section.
    pub(crate) fn refresh<I: I2c>(
        &self,
        i2c: &mut I,
        span: Span,
    ) -> Result<RegisterFile, I::Error> {
        self.with(|shared| {
            shared.refresh(i2c, span)?;
            Ok(shared.regs)
        })
    }

    /// Send the cached write span as a single transaction.
    pub(crate) fn commit<I: I2c>(
        &self,
        i2c: &mut I,
        span: WriteSpan,
    ) -> Result<(), I::Error> {
        self.with(|shared| {
            let mut frame = [0u8; MAX_FRAME];
            let len = shared.regs.load(span, &mut frame);
            i2c.write(ADDRESS, &frame[..len])
        })
    }

    pub(crate) fn take_group(&self) -> Option<RdsGroup> {
        self.with(|shared| shared.mailbox.take())
    }

    pub(crate) fn clear_group(&self) {
        self.with(|shared| shared.mailbox.clear())
    }
}
