use serde::{Deserialize, Serialize};

/// Classified result of one row, without the identifier or failure details
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Inserted,
    MatchedExisting,
    SkippedDuplicate,
    SkippedError,
}

/// Telemetry events sent from the load session to the progress tracker
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// A table's dataset was read and its rows are about to be loaded
    TableStarted { table: String, rows: u64 },
    /// One row finished loading
    RowFinished { outcome: OutcomeKind },
    /// Every row of the table has been attempted
    TableCompleted { table: String, stats: TableStats },
}

/// Per-table counters accumulated while rows are loaded
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub attempted: u64,
    pub inserted: u64,
    pub matched_existing: u64,
    pub skipped_duplicate: u64,
    pub skipped_error: u64,
}

impl TableStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one finished row
    pub fn record(&mut self, outcome: OutcomeKind) {
        self.attempted += 1;
        match outcome {
            OutcomeKind::Inserted => self.inserted += 1,
            OutcomeKind::MatchedExisting => self.matched_existing += 1,
            OutcomeKind::SkippedDuplicate => self.skipped_duplicate += 1,
            OutcomeKind::SkippedError => self.skipped_error += 1,
        }
    }

    /// Rows that ended with an identifier (inserted or matched)
    pub fn resolved(&self) -> u64 {
        self.inserted + self.matched_existing
    }

    /// Rows that ended without an identifier
    pub fn skipped(&self) -> u64 {
        self.skipped_duplicate + self.skipped_error
    }

    /// Fold another table's counters into this one (used for run totals)
    pub fn absorb(&mut self, other: &TableStats) {
        self.attempted += other.attempted;
        self.inserted += other.inserted;
        self.matched_existing += other.matched_existing;
        self.skipped_duplicate += other.skipped_duplicate;
        self.skipped_error += other.skipped_error;
    }
}

/// Running totals for progress display
#[derive(Debug, Default)]
pub struct ProgressStats {
    pub tables_completed: usize,
    /// Rows finished in the table currently loading
    pub current_finished: u64,
    pub totals: TableStats,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::TableStarted { .. } => {
                self.current_finished = 0;
            }
            TelemetryEvent::RowFinished { outcome } => {
                self.current_finished += 1;
                self.totals.record(*outcome);
            }
            TelemetryEvent::TableCompleted { .. } => {
                self.tables_completed += 1;
                // Row counters already arrived through RowFinished
            }
        }
    }

    /// Rows that ended without an identifier, across all tables
    pub fn skipped(&self) -> u64 {
        self.totals.skipped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_every_outcome() {
        let mut stats = TableStats::new();
        stats.record(OutcomeKind::Inserted);
        stats.record(OutcomeKind::Inserted);
        stats.record(OutcomeKind::MatchedExisting);
        stats.record(OutcomeKind::SkippedDuplicate);
        stats.record(OutcomeKind::SkippedError);

        assert_eq!(stats.attempted, 5);
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.resolved(), 3);
        assert_eq!(stats.skipped(), 2);
        assert_eq!(stats.attempted, stats.resolved() + stats.skipped());
    }

    #[test]
    fn test_absorb_sums_counters() {
        let mut total = TableStats::new();
        let mut a = TableStats::new();
        a.record(OutcomeKind::Inserted);
        let mut b = TableStats::new();
        b.record(OutcomeKind::SkippedError);
        b.record(OutcomeKind::MatchedExisting);

        total.absorb(&a);
        total.absorb(&b);

        assert_eq!(total.attempted, 3);
        assert_eq!(total.inserted, 1);
        assert_eq!(total.matched_existing, 1);
        assert_eq!(total.skipped_error, 1);
    }

    #[test]
    fn test_progress_follows_events() {
        let mut progress = ProgressStats::new();
        progress.update(&TelemetryEvent::TableStarted {
            table: "Color".to_string(),
            rows: 2,
        });
        progress.update(&TelemetryEvent::RowFinished {
            outcome: OutcomeKind::Inserted,
        });
        progress.update(&TelemetryEvent::RowFinished {
            outcome: OutcomeKind::SkippedError,
        });

        assert_eq!(progress.current_finished, 2);
        assert_eq!(progress.skipped(), 1);

        let mut stats = TableStats::new();
        stats.record(OutcomeKind::Inserted);
        progress.update(&TelemetryEvent::TableCompleted {
            table: "Color".to_string(),
            stats,
        });
        progress.update(&TelemetryEvent::TableStarted {
            table: "Car".to_string(),
            rows: 5,
        });

        assert_eq!(progress.tables_completed, 1);
        assert_eq!(progress.current_finished, 0);
        assert_eq!(progress.totals.attempted, 2);
    }
}
