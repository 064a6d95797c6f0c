//! The event fabric: typed notifications with RAII subscriptions.
//!
//! Subscribers receive fire-and-forget notifications after all state
//! updates and the cascade complete. Listeners get `&EngineEvent` only —
//! they cannot reach back into the engine, which is how the cooperative
//! no-re-entrancy contract is kept. Dropping a [`Subscription`]
//! unsubscribes.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use cellflow_common::{CellAddr, LiteralValue, SheetKey};

/// One cell's new computed value (`None` = cleared).
#[derive(Debug, Clone, PartialEq)]
pub struct CellUpdate {
    pub addr: CellAddr,
    pub value: Option<LiteralValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    SheetAdded {
        workbook: String,
        sheet: String,
    },
    SheetRemoved {
        workbook: String,
        sheet: String,
    },
    SheetRenamed {
        workbook: String,
        old: String,
        new: String,
    },
    GlobalNamedExpressionsUpdated,
    TablesUpdated,
    /// Batched per (workbook, sheet), fired once per cascade.
    CellsUpdated {
        workbook: String,
        sheet: String,
        cells: Vec<CellUpdate>,
    },
}

type Listener = Box<dyn FnMut(&EngineEvent)>;

struct Entry {
    id: u64,
    /// `None` = interested in every event; `Some` = only `CellsUpdated`
    /// for that sheet.
    filter: Option<SheetKey>,
    listener: Listener,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    entries: Vec<Entry>,
    /// Ids unsubscribed while an emit is in flight.
    dead: Vec<u64>,
}

/// Typed event emitter with slab-indexed listeners.
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Rc<RefCell<HubInner>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_all<F: FnMut(&EngineEvent) + 'static>(&self, f: F) -> Subscription {
        self.push(None, Box::new(f))
    }

    pub fn subscribe_cells<F: FnMut(&EngineEvent) + 'static>(
        &self,
        sheet: SheetKey,
        f: F,
    ) -> Subscription {
        self.push(Some(sheet), Box::new(f))
    }

    fn push(&self, filter: Option<SheetKey>, listener: Listener) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.entries.push(Entry {
            id,
            filter,
            listener,
        });
        Subscription {
            hub: Rc::downgrade(&self.inner),
            id,
        }
    }

    fn matches(filter: &Option<SheetKey>, event: &EngineEvent) -> bool {
        match filter {
            None => true,
            Some(key) => match event {
                EngineEvent::CellsUpdated {
                    workbook, sheet, ..
                } => {
                    workbook.eq_ignore_ascii_case(&key.workbook)
                        && sheet.eq_ignore_ascii_case(&key.sheet)
                }
                _ => false,
            },
        }
    }

    /// Deliver an event to every matching listener. Listeners run outside
    /// the inner borrow so a callback may drop its own subscription.
    pub fn emit(&self, event: &EngineEvent) {
        let mut entries = std::mem::take(&mut self.inner.borrow_mut().entries);
        for entry in &mut entries {
            if Self::matches(&entry.filter, event) {
                (entry.listener)(event);
            }
        }
        let mut inner = self.inner.borrow_mut();
        let dead = std::mem::take(&mut inner.dead);
        entries.retain(|e| !dead.contains(&e.id));
        // listeners added during emission land after the originals
        let added = std::mem::take(&mut inner.entries);
        entries.extend(added);
        inner.entries = entries;
    }
}

/// RAII handle; drop to unsubscribe.
pub struct Subscription {
    hub: Weak<RefCell<HubInner>>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            if let Ok(mut inner) = inner.try_borrow_mut() {
                inner.entries.retain(|e| e.id != self.id);
                // an in-flight emit holds its entries outside the hub;
                // the dead list catches those on the post-emit sweep
                let id = self.id;
                inner.dead.push(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn filtered_subscription_sees_only_its_sheet() {
        let hub = EventHub::new();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let _sub = hub.subscribe_cells(SheetKey::new("B", "S1"), move |_| {
            c.set(c.get() + 1);
        });

        hub.emit(&EngineEvent::CellsUpdated {
            workbook: "B".into(),
            sheet: "S1".into(),
            cells: vec![],
        });
        hub.emit(&EngineEvent::CellsUpdated {
            workbook: "B".into(),
            sheet: "S2".into(),
            cells: vec![],
        });
        hub.emit(&EngineEvent::TablesUpdated);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn drop_unsubscribes() {
        let hub = EventHub::new();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let sub = hub.subscribe_all(move |_| {
            c.set(c.get() + 1);
        });
        hub.emit(&EngineEvent::TablesUpdated);
        drop(sub);
        hub.emit(&EngineEvent::TablesUpdated);
        assert_eq!(count.get(), 1);
    }
}
