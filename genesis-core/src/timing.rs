//! Region timing and the handful of knobs the core exposes to a frontend (spec.md §4.5).

#[cfg_attr(feature = "bincode", derive(bincode::Encode, bincode::Decode))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenesisTimingMode {
    #[default]
    Ntsc,
    Pal,
}

impl GenesisTimingMode {
    /// Master-clock cycles dispensed per frame (spec.md §4.5).
    #[must_use]
    pub fn master_cycles_per_frame(self) -> u64 {
        match self {
            Self::Ntsc => 896_040,
            Self::Pal => 1_067_040,
        }
    }

    #[must_use]
    pub fn overscan_width(self) -> u16 {
        match self {
            Self::Ntsc => 420,
            Self::Pal => 423,
        }
    }

    #[must_use]
    pub fn overscan_height(self) -> u16 {
        match self {
            Self::Ntsc => 262,
            Self::Pal => 312,
        }
    }

    #[must_use]
    pub fn status_pal_bit(self) -> bool {
        self == Self::Pal
    }
}

/// The handful of knobs the core itself exposes; display/audio/input plumbing lives in the
/// frontend, not here.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenesisEmulatorConfig {
    pub timing_mode_override: Option<GenesisTimingMode>,
    /// Forces the Z80 to always be granted the bus, bypassing BUSREQ arbitration; useful for
    /// isolating 68K-side bugs from sound-driver bugs while debugging.
    pub force_z80_always_granted: bool,
}
