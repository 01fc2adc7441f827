use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Instant;

/// Deadlines the engine resolves on its own thread instead of blocking:
/// liveness checks, retry delays, kill escalations and restart resumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// The `starttime` window elapsed; promote STARTING to RUNNING if the
    /// same process is still up.
    StartCheck { indexed_name: String, pid: i32 },
    /// BACKOFF delay elapsed; make the next start attempt.
    RetryStart { indexed_name: String },
    /// `stoptime` elapsed; SIGKILL the process if it is still alive.
    /// `indexed_name` is None for processes already dropped from the
    /// registry (reload removals).
    KillEscalation {
        indexed_name: Option<String>,
        pid: i32,
    },
    /// The 1 s pause between an operator restart's stop and start.
    RestartResume { indexed_name: String },
}

#[derive(Debug)]
struct Entry {
    deadline: Instant,
    seq: u64,
    kind: TimerKind,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Min-heap of pending deadlines. Insertion order breaks ties so timers armed
/// in one tick fire in the order they were armed.
#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    seq: u64,
}

impl TimerQueue {
    pub fn arm(&mut self, deadline: Instant, kind: TimerKind) {
        self.seq += 1;
        self.heap.push(Reverse(Entry {
            deadline,
            seq: self.seq,
            kind,
        }));
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(entry)| entry.deadline)
    }

    /// Removes and returns every timer due at `now`, earliest first.
    pub fn due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut fired = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let Reverse(entry) = self.heap.pop().expect("peeked entry exists");
            fired.push(entry.kind);
        }
        fired
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
