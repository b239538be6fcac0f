//! Exception vectors and the `Fault` type instruction routines raise to unwind into
//! `process_exception` (spec.md §4.2, §7).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vector {
    BusError,
    AddressError,
    IllegalInstruction,
    ZeroDivide,
    Chk,
    TrapV,
    PrivilegeViolation,
    Trace,
    Trap(u8),
}

impl Vector {
    pub(crate) fn number(self) -> u32 {
        match self {
            Self::BusError => 2,
            Self::AddressError => 3,
            Self::IllegalInstruction => 4,
            Self::ZeroDivide => 5,
            Self::Chk => 6,
            Self::TrapV => 7,
            Self::PrivilegeViolation => 8,
            Self::Trace => 9,
            Self::Trap(n) => 32 + u32::from(n),
        }
    }

    /// Autovector for a given interrupt level, 1-7; level 0 (no interrupt) has no vector.
    /// Spurious interrupts (raised with no device attached) map to vector 24 as well, but
    /// this interpreter only ever reaches `autovector` from a real pending interrupt.
    pub(crate) fn autovector(level: u8) -> u32 {
        24 + u32::from(level)
    }
}

/// What an instruction routine returns instead of a tick count when it can't complete
/// normally. `Stopped` is not really a fault; it's reused as the channel by which the STOP
/// instruction tells the interpreter to transition `RunState`.
///
/// `BusFault` additionally carries the faulting bus address and access direction so
/// `process_exception` can build the extended (bus/address error) stack frame spec.md §4.2
/// requires for these two vectors specifically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    Exception(u32),
    BusFault { vector: u32, address: u32, read: bool },
    Stopped,
}

impl Fault {
    pub(crate) fn vector(self) -> u32 {
        match self {
            Self::Exception(vector) | Self::BusFault { vector, .. } => vector,
            Self::Stopped => unreachable!("Stopped is not a vectored exception"),
        }
    }
}

impl From<Vector> for Fault {
    fn from(vector: Vector) -> Self {
        Self::Exception(vector.number())
    }
}
