//! Pending-interrupt queue, ordered highest-level-first (spec.md §3).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingInterrupt {
    pub device: u8,
    pub level: u8,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct InterruptController {
    pending: Vec<PendingInterrupt>,
}

impl InterruptController {
    pub(crate) fn new() -> Self {
        Self { pending: Vec::new() }
    }

    pub(crate) fn push(&mut self, interrupt: PendingInterrupt) {
        self.pending.push(interrupt);
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }

    pub(crate) fn clear_device(&mut self, device: u8) {
        self.pending.retain(|p| p.device != device);
    }

    pub(crate) fn peek_highest(&self) -> Option<PendingInterrupt> {
        self.pending.iter().copied().max_by_key(|p| p.level)
    }

    pub(crate) fn pop_highest(&mut self) {
        if let Some((idx, _)) =
            self.pending.iter().enumerate().max_by_key(|(_, p)| p.level)
        {
            self.pending.remove(idx);
        }
    }
}
