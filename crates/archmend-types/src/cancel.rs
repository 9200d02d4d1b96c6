use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation signal, checked between records/events by long
/// operations. Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Why an operation was interrupted at a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    DeadlineExpired,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Cancelled => write!(f, "operation cancelled"),
            Interrupt::DeadlineExpired => write!(f, "operation deadline expired"),
        }
    }
}

/// Cancellation token plus optional deadline, threaded through provider
/// operations. Effects committed before an interrupt remain; none in flight
/// are partially applied.
#[derive(Debug, Clone, Default)]
pub struct Control {
    pub cancel: CancelToken,
    pub deadline: Option<DateTime<Utc>>,
}

impl Control {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: DateTime<Utc>) -> Self {
        Self {
            cancel: CancelToken::new(),
            deadline: Some(deadline),
        }
    }

    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Check for cancellation or deadline expiry. Call between units of work.
    pub fn checkpoint(&self) -> Result<(), Interrupt> {
        if self.cancel.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Utc::now() > deadline
        {
            return Err(Interrupt::DeadlineExpired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cancel_token_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_control_checkpoint_deadline() {
        let control = Control::with_deadline(Utc::now() - Duration::seconds(1));
        assert_eq!(control.checkpoint(), Err(Interrupt::DeadlineExpired));

        let control = Control::with_deadline(Utc::now() + Duration::hours(1));
        assert_eq!(control.checkpoint(), Ok(()));
    }

    #[test]
    fn test_control_checkpoint_cancelled() {
        let control = Control::new();
        control.cancel.cancel();
        assert_eq!(control.checkpoint(), Err(Interrupt::Cancelled));
    }
}
