//! Loom-based concurrency tests for runlist-rs.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`
//!
//! Loom exhaustively explores all possible thread interleavings to find
//! concurrency bugs that might only occur under specific scheduling.
//! The scheduler's wait/wake handshakes are modelled in isolation, with
//! tiny capacities to keep the state space manageable.

#![cfg(feature = "loom")]

use loom::sync::atomic::{AtomicUsize, Ordering};
use loom::sync::{Arc, Condvar, Mutex};
use loom::thread;

/// Slot accounting guarded by the state lock, as `append` and `retire` see it.
struct LoomSlots {
    state: Mutex<SlotState>,
    changed: Condvar,
    /// Live flush-block guards; read under the state lock, written outside.
    blocked: AtomicUsize,
}

struct SlotState {
    free: usize,
    outstanding: usize,
}

impl LoomSlots {
    fn new(capacity: usize, outstanding: usize) -> Self {
        Self {
            state: Mutex::new(SlotState {
                free: capacity - outstanding,
                outstanding,
            }),
            changed: Condvar::new(),
            blocked: AtomicUsize::new(0),
        }
    }

    /// Wait for two free slots with no flush block, then admit one entry.
    fn append(&self) {
        let mut st = self.state.lock().unwrap();
        while st.free < 2 || self.blocked.load(Ordering::Acquire) > 0 {
            st = self.changed.wait(st).unwrap();
        }
        st.free -= 1;
        st.outstanding += 1;
    }

    /// Retire one completed entry and wake waiters.
    fn retire_one(&self) {
        let mut st = self.state.lock().unwrap();
        if st.outstanding > 0 {
            st.outstanding -= 1;
            st.free += 1;
            self.changed.notify_all();
        }
    }

    fn block(&self) {
        self.blocked.fetch_add(1, Ordering::AcqRel);
    }

    /// Mirrors `FlushBlock::drop`: decrement, then notify under the lock.
    fn unblock(&self) {
        self.blocked.fetch_sub(1, Ordering::AcqRel);
        let _st = self.state.lock().unwrap();
        self.changed.notify_all();
    }
}

/// A producer blocked on a full ring is always woken by a retire.
#[test]
fn loom_append_waits_for_retire() {
    loom::model(|| {
        // Capacity 2 with one entry outstanding: exactly one slot free.
        let slots = Arc::new(LoomSlots::new(2, 1));
        let producer_slots = Arc::clone(&slots);

        let producer = thread::spawn(move || producer_slots.append());
        slots.retire_one();
        producer.join().unwrap();

        let st = slots.state.lock().unwrap();
        assert_eq!(st.outstanding, 1);
        assert_eq!(st.free + st.outstanding, 2);
    });
}

/// Two producers racing for the last admissible slot never overcommit.
#[test]
fn loom_producers_never_overcommit() {
    loom::model(|| {
        let slots = Arc::new(LoomSlots::new(3, 0));
        let a = Arc::clone(&slots);
        let b = Arc::clone(&slots);

        let t1 = thread::spawn(move || a.append());
        let t2 = thread::spawn(move || {
            b.append();
            b.retire_one();
        });
        t1.join().unwrap();
        t2.join().unwrap();

        let st = slots.state.lock().unwrap();
        assert!(st.free >= 1, "ring overcommitted: {} free", st.free);
        assert_eq!(st.free + st.outstanding, 3);
    });
}

/// Dropping the last flush block always releases a waiting producer.
#[test]
fn loom_flush_unblock_is_not_lost() {
    loom::model(|| {
        let slots = Arc::new(LoomSlots::new(4, 0));
        slots.block();
        let producer_slots = Arc::clone(&slots);

        let producer = thread::spawn(move || producer_slots.append());
        slots.unblock();
        producer.join().unwrap();

        assert_eq!(slots.state.lock().unwrap().outstanding, 1);
    });
}

/// Channel binding: a claim from a second scheduler waits until the first
/// drains the channel, and ownership is then handed over.
#[test]
fn loom_binding_hand_over() {
    struct Binding {
        state: Mutex<(Option<u8>, usize)>,
        drained: Condvar,
    }

    impl Binding {
        fn claim(&self, sched: u8) {
            let mut st = self.state.lock().unwrap();
            while st.0.is_some_and(|o| o != sched) && st.1 > 0 {
                st = self.drained.wait(st).unwrap();
            }
            st.0 = Some(sched);
            st.1 += 1;
        }

        fn release(&self, sched: u8) {
            let mut st = self.state.lock().unwrap();
            assert_eq!(st.0, Some(sched));
            st.1 -= 1;
            if st.1 == 0 {
                st.0 = None;
                self.drained.notify_all();
            }
        }
    }

    loom::model(|| {
        let binding = Arc::new(Binding {
            state: Mutex::new((Some(1), 1)),
            drained: Condvar::new(),
        });
        let second = Arc::clone(&binding);

        let t = thread::spawn(move || second.claim(2));
        binding.release(1);
        t.join().unwrap();

        let st = binding.state.lock().unwrap();
        assert_eq!(*st, (Some(2), 1));
    });
}
