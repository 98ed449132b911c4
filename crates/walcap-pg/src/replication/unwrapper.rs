//! Collapses BEGIN/COMMIT framing around single-statement transactions.
//!
//! Postgres frames every change in BEGIN/COMMIT even when a transaction holds
//! a single DML. The unwrapper holds back BEGIN and the first DML until it
//! knows whether a second DML follows: if not, only the DML is emitted.
//! Longer transactions pass through with their framing intact.

use std::mem;

use tracing::warn;
use walcap_core::{Changeset, Operation};

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    AwaitingFirstDml {
        begin: Changeset,
    },
    AwaitingSecondDml {
        begin: Changeset,
        dml: Changeset,
    },
    Streaming {
        begin: Changeset,
    },
}

/// Per-session transaction unwrapper. Anything still buffered when it is
/// dropped is discarded.
#[derive(Debug, Default)]
pub struct Unwrapper {
    state: State,
    dml_count: u64,
}

impl Unwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// DMLs seen inside the current transaction.
    pub fn dml_count(&self) -> u64 {
        self.dml_count
    }

    /// Whether frames are being held back.
    pub fn is_buffering(&self) -> bool {
        matches!(
            self.state,
            State::AwaitingFirstDml { .. } | State::AwaitingSecondDml { .. }
        )
    }

    /// Feed one changeset; returns what should be emitted, in order.
    pub fn process(&mut self, cs: Changeset) -> Vec<Changeset> {
        let state = mem::take(&mut self.state);

        match cs.operation {
            Operation::Begin => self.begin(state, cs),
            Operation::Commit => self.commit(state, cs),
            _ => self.dml(state, cs),
        }
    }

    fn begin(&mut self, state: State, begin: Changeset) -> Vec<Changeset> {
        // A BEGIN before the previous COMMIT means the server dropped the
        // transaction; release whatever was held so nothing is lost.
        let flushed = match state {
            State::Idle | State::Streaming { .. } => Vec::new(),
            State::AwaitingFirstDml { .. } => {
                warn!("BEGIN received inside an empty transaction, discarding it");
                Vec::new()
            }
            State::AwaitingSecondDml { dml, .. } => {
                warn!("BEGIN received before COMMIT, emitting the pending change");
                vec![dml]
            }
        };

        self.dml_count = 0;
        self.state = State::AwaitingFirstDml { begin };
        flushed
    }

    fn commit(&mut self, state: State, commit: Changeset) -> Vec<Changeset> {
        self.dml_count = 0;
        match state {
            State::Idle | State::AwaitingFirstDml { .. } | State::Streaming { .. } => vec![commit],
            State::AwaitingSecondDml { dml, .. } => vec![dml],
        }
    }

    fn dml(&mut self, state: State, mut dml: Changeset) -> Vec<Changeset> {
        match state {
            State::Idle => {
                warn!(
                    operation = dml.operation.as_str(),
                    "Change received outside a transaction"
                );
                vec![dml]
            }
            State::AwaitingFirstDml { begin } => {
                dml.data.inherit_txn(&begin.data);
                self.dml_count += 1;
                self.state = State::AwaitingSecondDml { begin, dml };
                Vec::new()
            }
            State::AwaitingSecondDml { begin, dml: first } => {
                dml.data.inherit_txn(&begin.data);
                self.dml_count += 1;
                let out = vec![begin.clone(), first, dml];
                self.state = State::Streaming { begin };
                out
            }
            State::Streaming { begin } => {
                dml.data.inherit_txn(&begin.data);
                self.dml_count += 1;
                self.state = State::Streaming { begin };
                vec![dml]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use walcap_core::{ChangesetData, Lsn, TableRef, Watermark};

    fn commit_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn begin(lsn: u64) -> Changeset {
        let mut cs = Changeset::at(Watermark::new(Lsn(lsn), commit_time()));
        cs.data = ChangesetData {
            txn_lsn: Some(Lsn(lsn)),
            txn_commit_time: Some(commit_time()),
            txn_xid: Some(9),
            ..Default::default()
        };
        cs
    }

    fn change(op: Operation, lsn: u64) -> Changeset {
        let mut cs = Changeset::at(Watermark::new(Lsn(lsn), commit_time()));
        cs.operation = op;
        cs.data.table = Some(TableRef::new("public", "users"));
        cs
    }

    fn commit(lsn: u64) -> Changeset {
        let mut cs = Changeset::at(Watermark::new(Lsn(lsn), commit_time()));
        cs.operation = Operation::Commit;
        cs.data.commit_lsn = Some(Lsn(lsn));
        cs
    }

    fn run(unwrapper: &mut Unwrapper, frames: Vec<Changeset>) -> Vec<Changeset> {
        frames.into_iter().flat_map(|cs| unwrapper.process(cs)).collect()
    }

    #[test]
    fn test_single_dml_is_unwrapped() {
        for op in [
            Operation::Insert,
            Operation::Update,
            Operation::Delete,
            Operation::Truncate,
        ] {
            let mut unwrapper = Unwrapper::new();
            let out = run(&mut unwrapper, vec![begin(0x100), change(op, 0x104), commit(0x108)]);

            assert_eq!(out.len(), 1);
            assert_eq!(out[0].operation, op);
            assert_eq!(out[0].data.txn_lsn, Some(Lsn(0x100)));
            assert_eq!(out[0].data.txn_commit_time, Some(commit_time()));
            assert_eq!(out[0].data.txn_xid, Some(9));
            assert!(!unwrapper.is_buffering());
        }
    }

    #[test]
    fn test_multi_dml_keeps_framing() {
        for k in 2..6u64 {
            let mut frames = vec![begin(0x200)];
            frames.extend((0..k).map(|i| change(Operation::Update, 0x204 + i)));
            frames.push(commit(0x220));

            let mut unwrapper = Unwrapper::new();
            let out = run(&mut unwrapper, frames);

            assert_eq!(out.len() as u64, k + 2);
            assert_eq!(out[0].operation, Operation::Begin);
            assert_eq!(out.last().unwrap().operation, Operation::Commit);
            for (i, cs) in out[1..=k as usize].iter().enumerate() {
                assert_eq!(cs.operation, Operation::Update);
                assert_eq!(cs.watermark.lsn, Lsn(0x204 + i as u64));
                assert_eq!(cs.data.txn_commit_time, Some(commit_time()));
                assert_eq!(cs.data.txn_lsn, Some(Lsn(0x200)));
            }
        }
    }

    #[test]
    fn test_empty_transaction_emits_commit_only() {
        let mut unwrapper = Unwrapper::new();
        let out = run(&mut unwrapper, vec![begin(0x300), commit(0x308)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].operation, Operation::Commit);
    }

    #[test]
    fn test_outside_transaction_passes_through() {
        let mut unwrapper = Unwrapper::new();
        let out = run(
            &mut unwrapper,
            vec![change(Operation::Insert, 0x10), commit(0x18)],
        );
        assert_eq!(out.len(), 2);
        assert!(out[0].data.txn_lsn.is_none());
    }

    #[test]
    fn test_existing_txn_metadata_is_kept() {
        let mut unwrapper = Unwrapper::new();
        let mut dml = change(Operation::Insert, 0x104);
        dml.data.txn_lsn = Some(Lsn(0x999));

        let out = run(&mut unwrapper, vec![begin(0x100), dml, commit(0x108)]);
        assert_eq!(out[0].data.txn_lsn, Some(Lsn(0x999)));
        assert_eq!(out[0].data.txn_commit_time, Some(commit_time()));
    }

    #[test]
    fn test_pending_frames_are_buffered() {
        let mut unwrapper = Unwrapper::new();
        assert!(unwrapper.process(begin(0x100)).is_empty());
        assert!(unwrapper.process(change(Operation::Insert, 0x104)).is_empty());
        assert!(unwrapper.is_buffering());
        assert_eq!(unwrapper.dml_count(), 1);

        let out = unwrapper.process(change(Operation::Insert, 0x106));
        assert_eq!(out.len(), 3);
        assert!(!unwrapper.is_buffering());
        assert_eq!(unwrapper.dml_count(), 2);
    }
}
