use bitflags::bitflags;

// Register addresses
pub const DEVICEID: usize = 0x00;
pub const CHIPID: usize = 0x01;
pub const POWERCFG: usize = 0x02;
pub const CHANNEL: usize = 0x03;
pub const SYSCONFIG1: usize = 0x04;
pub const SYSCONFIG2: usize = 0x05;
pub const SYSCONFIG3: usize = 0x06;
pub const TEST1: usize = 0x07;
pub const STATUSRSSI: usize = 0x0A;
pub const READCHAN: usize = 0x0B;
pub const RDSA: usize = 0x0C;
pub const RDSB: usize = 0x0D;
pub const RDSC: usize = 0x0E;
pub const RDSD: usize = 0x0F;

/// Number of 16-bit registers in the register file.
pub const REGISTER_COUNT: usize = 16;

/// Every write transaction starts at POWERCFG.
pub const FIRST_WRITE: usize = POWERCFG;

/// Every read transaction starts at STATUSRSSI and wraps around.
pub const FIRST_READ: usize = STATUSRSSI;

/// Largest frame on the wire: the full register file.
pub const MAX_FRAME: usize = REGISTER_COUNT * 2;

/// A register whose contents are modelled by a typed value.
pub trait Register: Copy {
    const ADDRESS: usize;

    fn from_word(word: u16) -> Self;

    fn into_word(self) -> u16;
}

macro_rules! register {
    ($ty:ty, $address:expr) => {
        impl Register for $ty {
            const ADDRESS: usize = $address;

            fn from_word(word: u16) -> Self {
                Self::from_bits_retain(word)
            }

            fn into_word(self) -> u16 {
                self.bits()
            }
        }
    };
}

fn field(bits: u16, mask: u16) -> u16 {
    (bits & mask) >> mask.trailing_zeros()
}

fn with_field(bits: u16, mask: u16, value: u16) -> u16 {
    (bits & !mask) | ((value << mask.trailing_zeros()) & mask)
}

// POWERCFG bitflags
bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct PowerCfg: u16 {
        const DSMUTE = 1 << 15;
        const DMUTE = 1 << 14;
        const MONO = 1 << 13;
        const RDSM = 1 << 11;
        const SKMODE = 1 << 10;
        const SEEKUP = 1 << 9;
        const SEEK = 1 << 8;
        const DISABLE = 1 << 6;
        const ENABLE = 1 << 0;
    }
}
register!(PowerCfg, POWERCFG);

// CHANNEL bitflags
bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Channel: u16 {
        const TUNE = 1 << 15;
        const CHAN = 0b0000_0011_1111_1111;
    }
}
register!(Channel, CHANNEL);

impl Channel {
    pub fn with_channel(self, channel: u16) -> Self {
        let bits = with_field(self.bits(), Self::CHAN.bits(), channel);
        Self::from_bits_retain(bits)
    }
}

// SYSCONFIG1 bitflags
bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct SysConfig1: u16 {
        const RDSIEN = 1 << 15;
        const STCIEN = 1 << 14;
        const RDS = 1 << 12;
        const DE = 1 << 11;
        const AGCD = 1 << 10;
        const GPIO2 = 0b0000_0000_0000_1100;
        // GPIO2 = 01: STC/RDS interrupt, active low
        const GPIO2_INT = 0b0000_0000_0000_0100;
    }
}
register!(SysConfig1, SYSCONFIG1);

// SYSCONFIG2 bitflags
bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct SysConfig2: u16 {
        const SEEKTH = 0b1111_1111_0000_0000;
        const BAND = 0b0000_0000_1100_0000;
        const SPACE = 0b0000_0000_0011_0000;
        const VOLUME = 0b0000_0000_0000_1111;
    }
}
register!(SysConfig2, SYSCONFIG2);

impl SysConfig2 {
    pub fn volume(self) -> u8 {
        field(self.bits(), Self::VOLUME.bits()) as u8
    }

    pub fn with_volume(self, volume: u8) -> Self {
        Self::from_bits_retain(with_field(
            self.bits(),
            Self::VOLUME.bits(),
            volume as u16,
        ))
    }

    pub fn band(self) -> Band {
        Band::from(field(self.bits(), Self::BAND.bits()))
    }

    pub fn with_band(self, band: Band) -> Self {
        Self::from_bits_retain(with_field(
            self.bits(),
            Self::BAND.bits(),
            band as u16,
        ))
    }

    pub fn spacing(self) -> Spacing {
        Spacing::from(field(self.bits(), Self::SPACE.bits()))
    }

    pub fn with_spacing(self, spacing: Spacing) -> Self {
        Self::from_bits_retain(with_field(
            self.bits(),
            Self::SPACE.bits(),
            spacing as u16,
        ))
    }

    pub fn with_seek_threshold(self, rssi: u8) -> Self {
        Self::from_bits_retain(with_field(
            self.bits(),
            Self::SEEKTH.bits(),
            rssi as u16,
        ))
    }
}

// SYSCONFIG3 bitflags
bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct SysConfig3: u16 {
        const SMUTER = 0b1100_0000_0000_0000;
        const SMUTEA = 0b0011_0000_0000_0000;
        const VOLEXT = 1 << 8;
        const SKSNR = 0b0000_0000_1111_0000;
        const SKCNT = 0b0000_0000_0000_1111;
    }
}
register!(SysConfig3, SYSCONFIG3);

impl SysConfig3 {
    pub fn with_seek_snr(self, snr: u8) -> Self {
        Self::from_bits_retain(with_field(
            self.bits(),
            Self::SKSNR.bits(),
            snr as u16,
        ))
    }

    pub fn with_seek_count(self, count: u8) -> Self {
        Self::from_bits_retain(with_field(
            self.bits(),
            Self::SKCNT.bits(),
            count as u16,
        ))
    }
}

// TEST1 bitflags
bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Test1: u16 {
        const XOSCEN = 1 << 15;
        const AHIZEN = 1 << 14;
    }
}
register!(Test1, TEST1);

// STATUSRSSI bitflags
bitflags! {
    /// Raw contents of the STATUSRSSI register.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct StatusRssi: u16 {
        /// RDS group ready
        const RDSR = 1 << 15;
        /// Seek/tune complete
        const STC = 1 << 14;
        /// Seek failed or band limit reached
        const SF_BL = 1 << 13;
        /// AFC rail
        const AFCRL = 1 << 12;
        /// RDS synchronized
        const RDSS = 1 << 11;
        /// Block A errors
        const BLERA = 0b0000_0110_0000_0000;
        /// Stereo indicator
        const ST = 1 << 8;
        /// Received signal strength
        const RSSI = 0b0000_0000_1111_1111;
    }
}
register!(StatusRssi, STATUSRSSI);

impl StatusRssi {
    /// Received signal strength indicator, in dBµV.
    pub fn rssi(self) -> u8 {
        field(self.bits(), Self::RSSI.bits()) as u8
    }

    pub fn block_a_errors(self) -> u8 {
        field(self.bits(), Self::BLERA.bits()) as u8
    }
}

// READCHAN bitflags
bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ReadChan: u16 {
        const BLERB = 0b1100_0000_0000_0000;
        const BLERC = 0b0011_0000_0000_0000;
        const BLERD = 0b0000_1100_0000_0000;
        const READCHAN = 0b0000_0011_1111_1111;
    }
}
register!(ReadChan, READCHAN);

impl ReadChan {
    pub fn channel(self) -> u16 {
        field(self.bits(), Self::READCHAN.bits())
    }

    pub fn block_errors(self) -> [u8; 3] {
        [
            field(self.bits(), Self::BLERB.bits()) as u8,
            field(self.bits(), Self::BLERC.bits()) as u8,
            field(self.bits(), Self::BLERD.bits()) as u8,
        ]
    }
}

/// Span of a read transaction, counted from STATUSRSSI.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Span {
    /// STATUSRSSI through RDSD
    Status = 6,

    /// The whole register file
    All = 16,
}

/// Span of a write transaction, counted from POWERCFG.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriteSpan {
    /// POWERCFG through SYSCONFIG3
    Config = 5,

    /// Also TEST1, for the oscillator enable
    Test = 6,

    /// Through RDSD, for the command channel
    Command = 14,
}

/// Host-side mirror of the chip's register file.
///
/// A transfer only updates the registers of its span; everything else keeps
/// its last cached value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegisterFile {
    words: [u16; REGISTER_COUNT],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    pub const fn new() -> Self {
        Self {
            words: [0u16; REGISTER_COUNT],
        }
    }

    pub fn word(&self, address: usize) -> u16 {
        self.words[address % REGISTER_COUNT]
    }

    pub fn set_word(&mut self, address: usize, word: u16) {
        self.words[address % REGISTER_COUNT] = word;
    }

    pub fn get<R: Register>(&self) -> R {
        R::from_word(self.words[R::ADDRESS])
    }

    pub fn set<R: Register>(&mut self, value: R) {
        self.words[R::ADDRESS] = value.into_word();
    }

    pub fn modify<R: Register>(&mut self, f: impl FnOnce(R) -> R) {
        self.set(f(self.get::<R>()));
    }

    /// The four RDS data words, RDSA first.
    pub fn rds_words(&self) -> [u16; 4] {
        [
            self.words[RDSA],
            self.words[RDSB],
            self.words[RDSC],
            self.words[RDSD],
        ]
    }

    /// Error counts of blocks A through D of the group in RDSA..RDSD.
    pub fn block_errors(&self) -> [u8; 4] {
        let [b, c, d] = self.get::<ReadChan>().block_errors();
        [self.get::<StatusRssi>().block_a_errors(), b, c, d]
    }

    /// Store the big-endian words of a read transaction.
    pub fn store(&mut self, span: Span, frame: &[u8]) {
        for (i, pair) in frame.chunks_exact(2).take(span as usize).enumerate() {
            self.words[(FIRST_READ + i) % REGISTER_COUNT] =
                u16::from_be_bytes([pair[0], pair[1]]);
        }
    }

    /// Serialise a write transaction into `frame`, returning its length.
    pub fn load(&self, span: WriteSpan, frame: &mut [u8; MAX_FRAME]) -> usize {
        let count = span as usize;
        for i in 0..count {
            let [hi, lo] = self.words[FIRST_WRITE + i].to_be_bytes();
            frame[i * 2] = hi;
            frame[i * 2 + 1] = lo;
        }
        count * 2
    }
}

/// Band limits
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Band {
    /// USA and Europe (87.5 - 108MHz)
    UsEurope = 0b00,

    /// Japan wide band (76 - 108MHz)
    JapanWide = 0b01,

    /// Japan (76 - 90MHz)
    Japan = 0b10,
}

impl Band {
    /// Lowest frequency of the band, in 10kHz units.
    pub fn bottom(self) -> u16 {
        match self {
            Band::UsEurope => 8_750,
            Band::JapanWide | Band::Japan => 7_600,
        }
    }

    /// Highest frequency of the band, in 10kHz units.
    pub fn top(self) -> u16 {
        match self {
            Band::UsEurope | Band::JapanWide => 10_800,
            Band::Japan => 9_000,
        }
    }
}

impl From<u16> for Band {
    fn from(bits: u16) -> Self {
        use Band::*;

        match bits {
            0b00 => UsEurope,
            0b01 => JapanWide,
            // 0b11 is reserved
            _ => Japan,
        }
    }
}

/// Channel spacing values
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Spacing {
    /// USA, Australia (200kHz)
    Khz200 = 0b00,

    /// Europe, Japan (100kHz)
    Khz100 = 0b01,

    /// 50kHz
    Khz50 = 0b10,
}

impl Spacing {
    /// Distance between channels, in 10kHz units.
    pub fn step(self) -> u16 {
        match self {
            Spacing::Khz200 => 20,
            Spacing::Khz100 => 10,
            Spacing::Khz50 => 5,
        }
    }
}

impl From<u16> for Spacing {
    fn from(bits: u16) -> Self {
        use Spacing::*;

        match bits {
            0b00 => Khz200,
            0b01 => Khz100,
            // 0b11 is reserved
            _ => Khz50,
        }
    }
}

/// De-emphasis values
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeEmphasis {
    /// USA (75μs)
    Us75,

    /// Europe, Australia, Japan (50μs)
    Us50,
}

/// Identification fields read back from DEVICEID and CHIPID.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Identity {
    pub part_number: u8,
    pub manufacturer: u16,
    pub revision: u8,
    pub device: u8,
    pub firmware: u8,
}

impl Identity {
    pub fn from_registers(regs: &RegisterFile) -> Self {
        let device_id = regs.word(DEVICEID);
        let chip_id = regs.word(CHIPID);

        Self {
            part_number: field(device_id, 0xF000) as u8,
            manufacturer: field(device_id, 0x0FFF),
            revision: field(chip_id, 0xFC00) as u8,
            device: field(chip_id, 0x03C0) as u8,
            firmware: field(chip_id, 0x003F) as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_read_wraps_around_the_register_file() {
        let mut frame = [0u8; MAX_FRAME];
        for i in 0..REGISTER_COUNT {
            frame[i * 2] = 0xA0 | i as u8;
            frame[i * 2 + 1] = i as u8;
        }

        let mut regs = RegisterFile::new();
        regs.store(Span::All, &frame);

        assert_eq!(regs.word(STATUSRSSI), 0xA000);
        assert_eq!(regs.word(RDSD), 0xA505);
        assert_eq!(regs.word(DEVICEID), 0xA606);
        assert_eq!(regs.word(0x09), 0xAF0F);
    }

    #[test]
    fn status_read_leaves_other_registers_alone() {
        let mut regs = RegisterFile::new();
        regs.set_word(POWERCFG, 0x1234);
        regs.set_word(DEVICEID, 0x1242);

        let frame = [0xFFu8; 12];
        regs.store(Span::Status, &frame);

        assert_eq!(regs.word(POWERCFG), 0x1234);
        assert_eq!(regs.word(DEVICEID), 0x1242);
        for address in STATUSRSSI..=RDSD {
            assert_eq!(regs.word(address), 0xFFFF);
        }
    }

    #[test]
    fn write_frames_start_at_powercfg() {
        let mut regs = RegisterFile::new();
        regs.set_word(POWERCFG, 0x4001);
        regs.set_word(SYSCONFIG3, 0x0011);
        regs.set_word(TEST1, 0x8100);
        regs.set_word(RDSD, 0x00FF);

        let mut frame = [0u8; MAX_FRAME];
        assert_eq!(regs.load(WriteSpan::Config, &mut frame), 10);
        assert_eq!(&frame[..2], &[0x40, 0x01]);
        assert_eq!(&frame[8..10], &[0x00, 0x11]);

        assert_eq!(regs.load(WriteSpan::Test, &mut frame), 12);
        assert_eq!(&frame[10..12], &[0x81, 0x00]);

        assert_eq!(regs.load(WriteSpan::Command, &mut frame), 28);
        assert_eq!(&frame[26..28], &[0x00, 0xFF]);
    }

    #[test]
    fn field_accessors_keep_neighbouring_bits() {
        let cfg = SysConfig2::from_bits_retain(0xFFFF).with_volume(3);
        assert_eq!(cfg.bits(), 0xFFF3);
        assert_eq!(cfg.volume(), 3);

        let cfg = SysConfig2::empty()
            .with_band(Band::Japan)
            .with_spacing(Spacing::Khz50)
            .with_seek_threshold(0x19);
        assert_eq!(cfg.bits(), 0x19A0);
        assert_eq!(cfg.band(), Band::Japan);
        assert_eq!(cfg.spacing(), Spacing::Khz50);

        let cfg = SysConfig3::empty().with_seek_snr(1).with_seek_count(1);
        assert_eq!(cfg.bits(), 0x0011);
    }

    #[test]
    fn block_errors_span_two_registers() {
        let mut regs = RegisterFile::new();
        regs.set_word(STATUSRSSI, 0b0000_0100_0000_0000);
        regs.set_word(READCHAN, 0b1000_0100_0000_0000);
        assert_eq!(regs.block_errors(), [2, 2, 0, 1]);
    }

    #[test]
    fn identity_decodes_si4703() {
        let mut regs = RegisterFile::new();
        regs.set_word(DEVICEID, 0x1242);
        regs.set_word(CHIPID, 0x1253);

        let id = Identity::from_registers(&regs);
        assert_eq!(id.part_number, 0x1);
        assert_eq!(id.manufacturer, 0x242);
        assert_eq!(id.revision, 0x04);
        assert_eq!(id.device, 0x9);
        assert_eq!(id.firmware, 0x13);
    }
}
