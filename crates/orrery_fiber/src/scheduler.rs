//! Per-frame callback scheduling
//!
//! Callbacks are ordered by ascending priority, ties broken by registration
//! order. Negative priorities run before the render pass, everything else
//! after it. A failing callback is logged and skipped; it never stops the
//! rest of the frame.

use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::error::FiberError;

new_key_type! {
    /// Identifier of a registered frame callback
    pub struct FrameCallbackId;
}

/// Timing information handed to every callback of a frame
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameState {
    /// Seconds since the previous rendered frame
    pub delta: f32,
    /// Seconds since the first rendered frame
    pub elapsed: f32,
    /// Number of frames rendered before this one
    pub frame: u64,
}

/// Result returned by fallible frame callbacks
pub type FrameResult = anyhow::Result<()>;

type FrameCallback = Rc<RefCell<dyn FnMut(&FrameState) -> FrameResult>>;

struct Entry {
    priority: i32,
    order: u64,
    callback: FrameCallback,
}

#[derive(Default)]
struct SchedulerInner {
    entries: SlotMap<FrameCallbackId, Entry>,
    /// Entry ids in execution order, valid while `sorted`
    order: Vec<FrameCallbackId>,
    sorted: bool,
    next_order: u64,
}

impl SchedulerInner {
    fn sort_if_needed(&mut self) {
        if !self.sorted {
            let entries = &self.entries;
            self.order = entries.keys().collect();
            self.order.sort_by_key(|id| {
                let entry = &entries[*id];
                (entry.priority, entry.order)
            });
            self.sorted = true;
        }
    }
}

/// Summary of one tick
#[derive(Debug, Default)]
pub struct TickReport {
    /// Callbacks that ran
    pub ran: usize,
    /// Failures of callbacks that errored or panicked
    pub failures: Vec<FiberError>,
}

/// Ordered registry of per-frame callbacks
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct FrameScheduler {
    inner: Rc<RefCell<SchedulerInner>>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an infallible callback
    pub fn register(
        &self,
        priority: i32,
        mut callback: impl FnMut(&FrameState) + 'static,
    ) -> FrameSubscription {
        self.try_register(priority, move |state| {
            callback(state);
            Ok(())
        })
    }

    /// Register a callback that may fail
    pub fn try_register(
        &self,
        priority: i32,
        callback: impl FnMut(&FrameState) -> FrameResult + 'static,
    ) -> FrameSubscription {
        let mut inner = self.inner.borrow_mut();
        let order = inner.next_order;
        inner.next_order += 1;
        let id = inner.entries.insert(Entry {
            priority,
            order,
            callback: Rc::new(RefCell::new(callback)),
        });
        inner.sorted = false;
        tracing::trace!(?id, priority, "frame callback registered");

        FrameSubscription {
            scheduler: Rc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    pub fn contains(&self, id: FrameCallbackId) -> bool {
        self.inner.borrow().entries.contains_key(id)
    }

    /// Run one frame: negative priorities, then `render`, then the rest
    ///
    /// The set of callbacks is fixed when the tick starts; callbacks
    /// registered during the tick first run on the next one, callbacks
    /// removed during the tick do not run after their removal.
    pub fn tick(&self, state: &FrameState, render: impl FnOnce()) -> TickReport {
        let snapshot: SmallVec<[(FrameCallbackId, i32, FrameCallback); 16]> = {
            let mut inner = self.inner.borrow_mut();
            inner.sort_if_needed();
            inner
                .order
                .iter()
                .map(|id| {
                    let entry = &inner.entries[*id];
                    (*id, entry.priority, Rc::clone(&entry.callback))
                })
                .collect()
        };

        let mut report = TickReport::default();
        let split = snapshot.partition_point(|(_, priority, _)| *priority < 0);
        let (before, after) = snapshot.split_at(split);

        self.run_all(before, state, &mut report);
        render();
        self.run_all(after, state, &mut report);

        report
    }

    fn run_all(
        &self,
        entries: &[(FrameCallbackId, i32, FrameCallback)],
        state: &FrameState,
        report: &mut TickReport,
    ) {
        for (id, priority, callback) in entries {
            if !self.contains(*id) {
                continue;
            }
            let Ok(mut callback) = callback.try_borrow_mut() else {
                tracing::warn!(?id, priority, "frame callback re-entered; skipping");
                continue;
            };
            report.ran += 1;

            match catch_unwind(AssertUnwindSafe(|| (&mut *callback)(state))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(?id, priority, error = %err, "frame callback failed");
                    report.failures.push(FiberError::Frame(err.to_string()));
                }
                Err(panic) => {
                    let message = panic_message(&*panic);
                    tracing::error!(?id, priority, %message, "frame callback panicked");
                    report.failures.push(FiberError::Frame(message));
                }
            }
        }
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("callbacks", &self.len())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Registration handle; unregisters on [`unsubscribe`](Self::unsubscribe) or drop
#[must_use = "dropping a FrameSubscription unregisters the callback"]
pub struct FrameSubscription {
    scheduler: Weak<RefCell<SchedulerInner>>,
    id: Option<FrameCallbackId>,
}

impl FrameSubscription {
    pub fn id(&self) -> Option<FrameCallbackId> {
        self.id
    }

    /// Whether the callback is still registered
    pub fn is_active(&self) -> bool {
        match (self.id, self.scheduler.upgrade()) {
            (Some(id), Some(inner)) => inner.borrow().entries.contains_key(id),
            _ => false,
        }
    }

    /// Remove the callback; calling again is a no-op
    pub fn unsubscribe(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let Some(inner) = self.scheduler.upgrade() else {
            return;
        };
        // Drop the callback outside the borrow: it may own other subscriptions
        let removed = {
            let mut inner = inner.borrow_mut();
            let removed = inner.entries.remove(id);
            if removed.is_some() {
                inner.sorted = false;
            }
            removed
        };
        if removed.is_some() {
            tracing::trace!(?id, "frame callback unregistered");
        }
        drop(removed);
    }
}

impl Drop for FrameSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for FrameSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSubscription")
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    fn recorder() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_priority_order_around_render() {
        let scheduler = FrameScheduler::new();
        let log = recorder();

        let mut subs = Vec::new();
        for (priority, name) in [(1, "late"), (-1, "early"), (0, "zero"), (-5, "first")] {
            let log = log.clone();
            subs.push(scheduler.register(priority, move |_| log.borrow_mut().push(name.into())));
        }

        let render_log = log.clone();
        let report = scheduler.tick(&FrameState::default(), move || {
            render_log.borrow_mut().push("render".into())
        });

        assert_eq!(report.ran, 4);
        assert_eq!(
            *log.borrow(),
            vec!["first", "early", "render", "zero", "late"]
        );
    }

    #[test]
    fn test_ties_run_in_registration_order() {
        let scheduler = FrameScheduler::new();
        let log = recorder();

        let subs: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|name| {
                let log = log.clone();
                scheduler.register(0, move |_| log.borrow_mut().push(name.into()))
            })
            .collect();

        scheduler.tick(&FrameState::default(), || {});
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
        drop(subs);
    }

    #[test]
    fn test_failures_are_isolated() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let scheduler = FrameScheduler::new();
        let rendered = Rc::new(Cell::new(false));
        let after = Rc::new(Cell::new(false));

        let _failing = scheduler.try_register(-1, |_| Err(anyhow::anyhow!("boom")));
        let _panicking = scheduler.register(-1, |_| panic!("kaboom"));
        let flag = after.clone();
        let _ok = scheduler.register(1, move |_| flag.set(true));

        let flag = rendered.clone();
        let report = scheduler.tick(&FrameState::default(), move || flag.set(true));

        assert!(rendered.get());
        assert!(after.get());
        assert_eq!(report.failures.len(), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent_and_drop_unregisters() {
        let scheduler = FrameScheduler::new();
        let mut sub = scheduler.register(0, |_| {});
        assert!(sub.is_active());

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert!(scheduler.is_empty());

        {
            let _scoped = scheduler.register(0, |_| {});
            assert_eq!(scheduler.len(), 1);
        }
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_removed_mid_tick_does_not_run() {
        let scheduler = FrameScheduler::new();
        let ran = Rc::new(Cell::new(false));

        let victim: Rc<RefCell<Option<FrameSubscription>>> = Rc::new(RefCell::new(None));
        let slot = victim.clone();
        let _killer = scheduler.register(0, move |_| {
            if let Some(mut sub) = slot.borrow_mut().take() {
                sub.unsubscribe();
            }
        });
        let flag = ran.clone();
        *victim.borrow_mut() = Some(scheduler.register(1, move |_| flag.set(true)));

        scheduler.tick(&FrameState::default(), || {});
        assert!(!ran.get());
    }

    #[test]
    fn test_registered_mid_tick_runs_next_tick() {
        let scheduler = FrameScheduler::new();
        let count = Rc::new(Cell::new(0));
        let held: Rc<RefCell<Vec<FrameSubscription>>> = Rc::new(RefCell::new(Vec::new()));

        let registrar = scheduler.clone();
        let (count_in, held_in) = (count.clone(), held.clone());
        let _spawner = scheduler.register(0, move |_| {
            if held_in.borrow().is_empty() {
                let count = count_in.clone();
                let sub = registrar.register(1, move |_| count.set(count.get() + 1));
                held_in.borrow_mut().push(sub);
            }
        });

        scheduler.tick(&FrameState::default(), || {});
        assert_eq!(count.get(), 0);
        scheduler.tick(&FrameState::default(), || {});
        assert_eq!(count.get(), 1);
    }
}
