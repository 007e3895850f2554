/// Guest signals. Delivery transforms PCB state synchronously (see
/// [`crate::kernel::Kernel::send_signal`]); there is no handler machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Terminate the target; its worker is cancelled and it becomes a zombie.
    Term,
    /// Stop the target; it leaves every queue until continued.
    Stop,
    /// Continue a stopped target.
    Cont,
    /// Child state change. Carried for completeness; waitpid observes the
    /// state directly, so delivery is a no-op.
    Chld,
}

impl Signal {
    /// Numeric encoding used by the `kill` surface: 0/1/2.
    pub fn from_number(n: i32) -> Option<Signal> {
        match n {
            0 => Some(Signal::Term),
            1 => Some(Signal::Stop),
            2 => Some(Signal::Cont),
            _ => None,
        }
    }
}

/// Status reported by waitpid for a child that changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Exited,
    Signaled,
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_signal_encoding() {
        assert_eq!(Signal::from_number(0), Some(Signal::Term));
        assert_eq!(Signal::from_number(1), Some(Signal::Stop));
        assert_eq!(Signal::from_number(2), Some(Signal::Cont));
        assert_eq!(Signal::from_number(3), None);
    }
}
