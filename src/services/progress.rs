use crate::models::{FileRole, TransferProgress, TransferState, TransferStatus};

/// Highest percentage reported while a transfer still awaits its storage response.
pub const PENDING_CEILING: f64 = 99.9;

/// Combined completion of two transfers, in percent.
///
/// 100 only once both transfers are complete; 0 while the combined total is 0.
pub fn aggregate(a: &TransferState, b: &TransferState) -> f64 {
    if a.is_complete() && b.is_complete() {
        return 100.0;
    }

    let total = a.bytes_total + b.bytes_total;
    if total == 0 {
        return 0.0;
    }

    let sent = a.bytes_sent.min(a.bytes_total) + b.bytes_sent.min(b.bytes_total);
    (sent as f64 * 100.0 / total as f64).min(PENDING_CEILING)
}

/// Folds progress events of both transfers into their states.
///
/// Events may interleave across files in any order. Byte counts never go
/// backwards and a terminal status is never left.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    primary: TransferState,
    index: TransferState,
}

impl ProgressAggregator {
    pub fn new(primary_total: u64, index_total: u64) -> Self {
        Self {
            primary: TransferState::new(primary_total),
            index: TransferState::new(index_total),
        }
    }

    /// Applies one event and returns the resulting percentage
    pub fn apply(&mut self, event: &TransferProgress) -> f64 {
        let state = self.state_mut(event.role);

        if !state.status.is_terminal() {
            state.bytes_sent = state.bytes_sent.max(event.bytes_sent.min(state.bytes_total));
            match event.status {
                TransferStatus::Pending => {}
                TransferStatus::InProgress => state.status = TransferStatus::InProgress,
                TransferStatus::Complete => {
                    state.status = TransferStatus::Complete;
                    state.bytes_sent = state.bytes_total;
                }
                TransferStatus::Failed => state.status = TransferStatus::Failed,
            }
        }

        self.percentage()
    }

    pub fn percentage(&self) -> f64 {
        aggregate(&self.primary, &self.index)
    }

    pub fn state(&self, role: FileRole) -> &TransferState {
        match role {
            FileRole::Primary => &self.primary,
            FileRole::Index => &self.index,
        }
    }

    fn state_mut(&mut self, role: FileRole) -> &mut TransferState {
        match role {
            FileRole::Primary => &mut self.primary,
            FileRole::Index => &mut self.index,
        }
    }

    pub fn both_complete(&self) -> bool {
        self.primary.is_complete() && self.index.is_complete()
    }

    pub fn any_failed(&self) -> bool {
        self.primary.status == TransferStatus::Failed || self.index.status == TransferStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(role: FileRole, bytes_sent: u64) -> TransferProgress {
        TransferProgress {
            role,
            bytes_sent,
            status: TransferStatus::InProgress,
        }
    }

    fn complete(role: FileRole) -> TransferProgress {
        TransferProgress {
            role,
            bytes_sent: 0,
            status: TransferStatus::Complete,
        }
    }

    #[test]
    fn test_aggregate_formula() {
        let mut a = TransferState::new(100);
        let mut b = TransferState::new(300);
        a.bytes_sent = 50;
        b.bytes_sent = 150;
        assert_eq!(aggregate(&a, &b), 50.0);
    }

    #[test]
    fn test_zero_total() {
        let a = TransferState::new(0);
        let b = TransferState::new(0);
        assert_eq!(aggregate(&a, &b), 0.0);

        let mut agg = ProgressAggregator::new(0, 0);
        agg.apply(&complete(FileRole::Primary));
        assert_eq!(agg.percentage(), 0.0);
        agg.apply(&complete(FileRole::Index));
        assert_eq!(agg.percentage(), 100.0);
    }

    #[test]
    fn test_hundred_only_when_both_complete() {
        let mut agg = ProgressAggregator::new(10, 10);
        agg.apply(&progress(FileRole::Primary, 10));
        agg.apply(&progress(FileRole::Index, 10));
        assert!(agg.percentage() < 100.0);

        agg.apply(&complete(FileRole::Primary));
        assert!(agg.percentage() < 100.0);

        agg.apply(&complete(FileRole::Index));
        assert_eq!(agg.percentage(), 100.0);
        assert!(agg.both_complete());
    }

    #[test]
    fn test_monotonic_under_interleaving() {
        // Per-file order is non-decreasing; cross-file order is arbitrary,
        // and stale duplicates may show up.
        let events = [
            progress(FileRole::Index, 4),
            progress(FileRole::Primary, 30),
            progress(FileRole::Primary, 10),
            progress(FileRole::Index, 8),
            progress(FileRole::Primary, 60),
            progress(FileRole::Index, 2),
            complete(FileRole::Index),
            progress(FileRole::Primary, 90),
            progress(FileRole::Primary, 100),
            complete(FileRole::Primary),
        ];

        for rotation in 0..events.len() {
            let mut agg = ProgressAggregator::new(100, 10);
            let mut last = 0.0;
            for event in events.iter().cycle().skip(rotation).take(events.len()) {
                let pct = agg.apply(event);
                assert!(pct >= last, "regressed from {last} to {pct}");
                last = pct;
            }
            assert_eq!(last, 100.0);
        }
    }

    #[test]
    fn test_terminal_status_sticks() {
        let mut agg = ProgressAggregator::new(10, 10);
        agg.apply(&TransferProgress {
            role: FileRole::Index,
            bytes_sent: 3,
            status: TransferStatus::Failed,
        });
        agg.apply(&progress(FileRole::Index, 9));
        let state = agg.state(FileRole::Index);
        assert_eq!(state.status, TransferStatus::Failed);
        assert_eq!(state.bytes_sent, 3);
        assert!(agg.any_failed());
    }

    #[test]
    fn test_oversized_report_is_clamped() {
        let mut agg = ProgressAggregator::new(10, 10);
        agg.apply(&progress(FileRole::Primary, 1_000));
        assert_eq!(agg.state(FileRole::Primary).bytes_sent, 10);
        assert_eq!(agg.percentage(), 50.0);
    }
}
