// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::sync::SpinLock;

/// A generic, thread-safe, unbounded event queue.
///
/// Any number of threads may [`publish`](Self::publish) concurrently. The
/// consumer side either polls with [`try_dequeue`](Self::try_dequeue) or
/// dispatches everything that is pending with [`drain_into`](Self::drain_into).
#[derive(Debug)]
pub struct EventQueue<T: Send + 'static> {
    sender: flume::Sender<T>,
    receiver: flume::Receiver<T>,
}

impl<T: Send + 'static> EventQueue<T> {
    /// Creates a new, empty queue.
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        log::trace!("EventQueue initialized.");
        Self { sender, receiver }
    }

    /// Pushes an event onto the queue.
    ///
    /// The queue owns both channel ends, so sending can only fail if the
    /// receiver was dropped, which cannot happen while `self` is alive.
    pub fn publish(&self, event: T) {
        if let Err(e) = self.sender.send(event) {
            log::error!("Failed to publish event: {e}. Receiver disconnected.");
        }
    }

    /// Pops the oldest pending event, if any.
    pub fn try_dequeue(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Returns a sender that producers on other threads can keep.
    pub fn sender(&self) -> flume::Sender<T> {
        self.sender.clone()
    }

    /// Number of events currently pending.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns `true` if no event is pending.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Dispatches every pending event to `handler` while holding `target`.
    ///
    /// Pending events are taken off the channel first, so the spin lock is
    /// held only for the dispatch loop itself, and not at all when nothing is
    /// pending. `handler` runs under the lock and must stay short. Events
    /// published after the drain started wait for the next one; ordering per
    /// producer is preserved.
    ///
    /// ## Returns
    /// The number of events dispatched.
    pub fn drain_into<S: ?Sized>(
        &self,
        target: &SpinLock<S>,
        mut handler: impl FnMut(&mut S, T),
    ) -> usize {
        let pending: Vec<T> = self.receiver.try_iter().collect();
        if pending.is_empty() {
            return 0;
        }
        let dispatched = pending.len();
        let mut guard = target.lock();
        for event in pending {
            handler(&mut *guard, event);
        }
        dispatched
    }
}

impl<T: Send + 'static> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Contact {
        a: u32,
        b: u32,
    }

    #[test]
    fn try_dequeue_empty() {
        let queue = EventQueue::<Contact>::new();
        assert!(queue.is_empty());
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn events_come_out_in_publish_order() {
        let queue = EventQueue::new();
        queue.publish(Contact { a: 1, b: 2 });
        queue.publish(Contact { a: 3, b: 4 });

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_dequeue(), Some(Contact { a: 1, b: 2 }));
        assert_eq!(queue.try_dequeue(), Some(Contact { a: 3, b: 4 }));
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn drain_into_dispatches_everything_under_the_lock() {
        let queue = EventQueue::new();
        for i in 0..10 {
            queue.publish(Contact { a: i, b: i + 1 });
        }

        let target = SpinLock::new(Vec::new());
        let dispatched = queue.drain_into(&target, |seen, contact| {
            seen.push(contact.a);
        });

        assert_eq!(dispatched, 10);
        assert!(queue.is_empty());
        assert_eq!(target.into_inner(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn drain_into_leaves_the_lock_alone_when_idle() {
        let queue = EventQueue::<Contact>::new();
        let target = SpinLock::new(0usize);
        let _held = target.lock();
        assert_eq!(queue.drain_into(&target, |count, _| *count += 1), 0);
    }

    #[test]
    fn publish_from_threads() {
        let queue = Arc::new(EventQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let sender = queue.sender();
                thread::spawn(move || {
                    for i in 0..25 {
                        sender
                            .send(Contact { a: t, b: i })
                            .expect("Send from thread failed");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("Thread join failed");
        }

        let target = SpinLock::new(0usize);
        let dispatched = queue.drain_into(&target, |count, _| *count += 1);
        assert_eq!(dispatched, 100);
        assert_eq!(*target.lock(), 100);
    }
}
