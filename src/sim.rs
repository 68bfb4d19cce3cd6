//! Simulated Si4703 for the unit tests.

use core::cell::RefCell;
use core::convert::Infallible;
use std::collections::HashMap;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, OutputPin};
use embedded_hal::i2c::{self, ErrorType, I2c, Operation};

use crate::command::{CMD_GET_PROPERTY, CMD_SET_PROPERTY, CMD_VERIFY};
use crate::registers::*;
use crate::{RdsCapture, ADDRESS};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SimError;

impl i2c::Error for SimError {
    fn kind(&self) -> i2c::ErrorKind {
        i2c::ErrorKind::Other
    }
}

/// Register file and firmware behaviour of the chip.
pub struct Chip {
    pub regs: [u16; REGISTER_COUNT],
    /// Every write frame, in order
    pub writes: Vec<Vec<u8>>,
    pub reads: usize,
    pub seeks: usize,
    /// GPIO2 pulled low
    pub irq: bool,
    /// Channel a seek lands on
    pub seek_target: u16,
    /// Seeks hit the band limit
    pub seek_fails: bool,
    /// Seeks and tunes never complete
    pub stall: bool,
    /// Command processor answers the verify sentinel
    pub acknowledge: bool,
    /// Command processor completes commands
    pub execute: bool,
    /// The next write of this many bytes fails without reaching the chip
    pub fail_write: Option<usize>,
    properties: HashMap<u16, u16>,
}

impl Chip {
    pub fn new() -> Self {
        let mut regs = [0u16; REGISTER_COUNT];
        regs[DEVICEID] = 0x1242;
        regs[CHIPID] = 0x1253;
        regs[TEST1] = 0x0100;

        Self {
            regs,
            writes: Vec::new(),
            reads: 0,
            seeks: 0,
            irq: false,
            seek_target: 0,
            seek_fails: false,
            stall: false,
            acknowledge: true,
            execute: true,
            fail_write: None,
            properties: HashMap::new(),
        }
    }

    pub fn set_channel(&mut self, channel: u16) {
        self.regs[READCHAN] = (self.regs[READCHAN] & !ReadChan::READCHAN.bits())
            | (channel & ReadChan::READCHAN.bits());
    }

    pub fn set_rssi(&mut self, rssi: u8) {
        self.regs[STATUSRSSI] =
            (self.regs[STATUSRSSI] & !StatusRssi::RSSI.bits()) | rssi as u16;
    }

    pub fn set_stereo(&mut self, stereo: bool) {
        let mut status = StatusRssi::from_bits_retain(self.regs[STATUSRSSI]);
        status.set(StatusRssi::ST, stereo);
        self.regs[STATUSRSSI] = status.bits();
    }

    /// Receive an RDS group with the given block error counts.
    pub fn deliver(&mut self, group: [u16; 4], errors: [u8; 4]) {
        let [a, b, c, d] = errors.map(|e| (e & 0b11) as u16);

        self.regs[RDSA..=RDSD].copy_from_slice(&group);
        self.regs[STATUSRSSI] = (self.regs[STATUSRSSI]
            & !StatusRssi::BLERA.bits())
            | StatusRssi::RDSR.bits()
            | (a << 9);
        self.regs[READCHAN] = (self.regs[READCHAN]
            & ReadChan::READCHAN.bits())
            | (b << 14)
            | (c << 12)
            | (d << 10);
        self.irq = true;
    }

    fn complete(&mut self, fail: bool) {
        let mut status = StatusRssi::from_bits_retain(self.regs[STATUSRSSI]);
        status.insert(StatusRssi::STC);
        status.set(StatusRssi::SF_BL, fail);
        self.regs[STATUSRSSI] = status.bits();
        self.irq = true;
    }

    fn read(&mut self, buf: &mut [u8]) {
        for (i, pair) in buf.chunks_mut(2).enumerate() {
            let word = self.regs[(FIRST_READ + i) % REGISTER_COUNT];
            pair.copy_from_slice(&word.to_be_bytes()[..pair.len()]);
        }
        self.reads += 1;
    }

    fn write(&mut self, frame: &[u8]) -> Result<(), SimError> {
        if self.fail_write == Some(frame.len()) {
            self.fail_write = None;
            return Err(SimError);
        }
        self.writes.push(frame.to_vec());

        let was_seeking = self.regs[POWERCFG] & PowerCfg::SEEK.bits() != 0;
        let was_tuning = self.regs[CHANNEL] & Channel::TUNE.bits() != 0;

        for (i, pair) in frame.chunks_exact(2).enumerate() {
            let address = FIRST_WRITE + i;
            // STATUSRSSI and READCHAN are read-only
            if address != STATUSRSSI && address != READCHAN {
                self.regs[address] = u16::from_be_bytes([pair[0], pair[1]]);
            }
        }

        let power = PowerCfg::from_bits_retain(self.regs[POWERCFG]);
        let channel = Channel::from_bits_retain(self.regs[CHANNEL]);

        if power.contains(PowerCfg::SEEK) && !was_seeking {
            self.seeks += 1;
            if !self.stall {
                self.set_channel(self.seek_target);
                self.complete(self.seek_fails);
            }
        }
        if channel.contains(Channel::TUNE) && !was_tuning && !self.stall {
            self.set_channel(channel.bits() & Channel::CHAN.bits());
            self.complete(false);
        }
        if !power.contains(PowerCfg::SEEK) && !channel.contains(Channel::TUNE) {
            self.regs[STATUSRSSI] &=
                !(StatusRssi::STC.bits() | StatusRssi::SF_BL.bits());
        }

        let rds = SysConfig1::from_bits_retain(self.regs[SYSCONFIG1])
            .contains(SysConfig1::RDS);
        if frame.len() == WriteSpan::Command as usize * 2 && !rds {
            self.run_command();
        }

        Ok(())
    }

    fn run_command(&mut self) {
        let command = (self.regs[RDSD] & 0xFF) as u8;

        match command {
            CMD_VERIFY if self.acknowledge => self.regs[RDSD] = 0,
            CMD_SET_PROPERTY if self.execute => {
                self.properties.insert(self.regs[RDSC], self.regs[RDSA]);
                self.regs[RDSD] &= 0xFF00;
            }
            CMD_GET_PROPERTY if self.execute => {
                self.regs[RDSA] =
                    self.properties.get(&self.regs[RDSC]).copied().unwrap_or(0);
                self.regs[RDSD] &= 0xFF00;
            }
            _ => {}
        }
    }
}

/// Bus handle onto a shared [`Chip`].
pub struct SimBus<'a>(pub &'a RefCell<Chip>);

impl ErrorType for SimBus<'_> {
    type Error = SimError;
}

impl I2c for SimBus<'_> {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address != ADDRESS {
            return Err(SimError);
        }

        let mut chip = self.0.borrow_mut();
        for op in operations {
            match op {
                Operation::Read(buf) => chip.read(buf),
                Operation::Write(bytes) => chip.write(bytes)?,
            }
        }

        Ok(())
    }
}

/// Delay that only advances a virtual clock.
#[derive(Default)]
pub struct Clock {
    elapsed_ns: u64,
}

impl Clock {
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_ns / 1_000
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ns / 1_000_000
    }
}

impl DelayNs for Clock {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns += u64::from(ns);
    }
}

/// Clock that services the chip's interrupt whenever time passes.
pub struct IrqClock<'a> {
    clock: Clock,
    chip: &'a RefCell<Chip>,
    capture: RdsCapture<'a, SimBus<'a>>,
}

impl<'a> IrqClock<'a> {
    pub fn new(
        chip: &'a RefCell<Chip>,
        capture: RdsCapture<'a, SimBus<'a>>,
    ) -> Self {
        Self {
            clock: Clock::default(),
            chip,
            capture,
        }
    }
}

impl DelayNs for IrqClock<'_> {
    fn delay_ns(&mut self, ns: u32) {
        self.clock.delay_ns(ns);

        let pending = core::mem::take(&mut self.chip.borrow_mut().irq);
        if pending {
            self.capture.on_interrupt().unwrap();
        }
    }
}

/// Output pin recording every level it was driven to.
#[derive(Default)]
pub struct Pin {
    pub levels: Vec<bool>,
}

impl digital::ErrorType for Pin {
    type Error = Infallible;
}

impl OutputPin for Pin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.levels.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.levels.push(true);
        Ok(())
    }
}
