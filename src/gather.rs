use std::sync::{Condvar, Mutex, PoisonError};

/// Scatter-gather countdown: `n` slots are filled from any thread, and [`Gather::wait`] blocks
/// until every slot has reported.
///
/// Slots are indexed, so the collected results come back in submission order no matter which
/// worker finished first.
#[derive(Debug)]
pub struct Gather<T> {
    state: Mutex<GatherState<T>>,
    all_done: Condvar,
}

#[derive(Debug)]
struct GatherState<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
}

impl<T> Gather<T> {
    pub fn new(n: usize) -> Self {
        let mut slots = Vec::with_capacity(n);
        slots.resize_with(n, || None);
        Self {
            state: Mutex::new(GatherState {
                slots,
                remaining: n,
            }),
            all_done: Condvar::new(),
        }
    }

    /// Units that have not reported yet.
    pub fn remaining(&self) -> usize {
        self.lock().remaining
    }

    /// Report unit `slot` as finished.
    ///
    /// Reporting the same slot twice, or a slot past `n`, is a bug in the caller.
    pub fn complete(&self, slot: usize, value: T) {
        let mut st = self.lock();
        let cell = &mut st.slots[slot];
        assert!(cell.is_none(), "gather slot {slot} reported twice");
        *cell = Some(value);
        st.remaining -= 1;
        if st.remaining == 0 {
            self.all_done.notify_all();
        }
    }

    /// Block until every slot has reported, then hand back the results in slot order.
    pub fn wait(&self) -> Vec<T> {
        let mut st = self.lock();
        while st.remaining > 0 {
            st = self
                .all_done
                .wait(st)
                .unwrap_or_else(PoisonError::into_inner);
        }
        st.slots.drain(..).flatten().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GatherState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn empty_gather_does_not_block() {
        let g = Gather::<u8>::new(0);
        assert!(g.wait().is_empty());
    }

    #[test]
    fn results_come_back_in_slot_order() {
        let g = Arc::new(Gather::new(8));
        let handles: Vec<_> = (0..8usize)
            .rev()
            .map(|i| {
                let g = Arc::clone(&g);
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis((8 - i as u64) * 2));
                    g.complete(i, i * 10);
                })
            })
            .collect();
        let got = g.wait();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(got, (0..8).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn wait_blocks_until_last_unit() {
        let g = Arc::new(Gather::new(2));
        g.complete(0, 'a');
        assert_eq!(g.remaining(), 1);

        let (tx, rx) = crossbeam_channel::bounded(1);
        let waiter = {
            let g = Arc::clone(&g);
            std::thread::spawn(move || {
                let v = g.wait();
                tx.send(v).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        g.complete(1, 'b');
        let v = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(v, vec!['a', 'b']);
        waiter.join().unwrap();
    }

    #[test]
    #[should_panic(expected = "reported twice")]
    fn double_report_panics() {
        let g = Gather::new(2);
        g.complete(0, 1);
        g.complete(0, 2);
    }
}
