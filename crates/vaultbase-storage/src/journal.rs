//! Bounded undo/redo journal over record mutations.
//!
//! Two independent [`BoundedStack`]s. Recording a new mutation pushes onto the
//! undo stack (evicting the oldest entry when full) and clears the redo stack.
//! The store pops an entry, applies it, and moves it to the other stack.

use std::collections::VecDeque;
use std::fmt;

use crate::value::Record;

pub const DEFAULT_CAPACITY: usize = 3;

/// Fixed-capacity LIFO; pushing onto a full stack drops the oldest item.
#[derive(Debug, Clone)]
pub struct BoundedStack<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedStack<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the evicted item, if any.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_back()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.items.retain(keep);
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Insert,
    Delete,
    Update,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryKind::Insert => "insert",
            EntryKind::Delete => "delete",
            EntryKind::Update => "update",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UndoEntry {
    /// `image` is captured when the insert is undone so a redo can put the row back.
    Insert {
        table: String,
        id: i64,
        image: Option<Record>,
    },
    /// Full pre-image; its column names are the layout at deletion time.
    Delete { table: String, image: Record },
    Update {
        table: String,
        before: Record,
        after: Option<Record>,
    },
}

impl UndoEntry {
    pub fn kind(&self) -> EntryKind {
        match self {
            UndoEntry::Insert { .. } => EntryKind::Insert,
            UndoEntry::Delete { .. } => EntryKind::Delete,
            UndoEntry::Update { .. } => EntryKind::Update,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            UndoEntry::Insert { table, .. }
            | UndoEntry::Delete { table, .. }
            | UndoEntry::Update { table, .. } => table,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            UndoEntry::Insert { id, .. } => *id,
            UndoEntry::Delete { image, .. } => image.id,
            UndoEntry::Update { before, .. } => before.id,
        }
    }

    fn images_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        let (a, b) = match self {
            UndoEntry::Insert { image, .. } => (image.as_mut(), None),
            UndoEntry::Delete { image, .. } => (Some(image), None),
            UndoEntry::Update { before, after, .. } => (Some(before), after.as_mut()),
        };
        a.into_iter().chain(b)
    }

    fn outcome(&self, direction: Direction) -> JournalOutcome {
        JournalOutcome {
            direction,
            kind: self.kind(),
            table: self.table().to_string(),
            id: self.id(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Undo,
    Redo,
}

/// What an `undo`/`redo` call did, for status lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalOutcome {
    pub direction: Direction,
    pub kind: EntryKind,
    pub table: String,
    pub id: i64,
}

impl fmt::Display for JournalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.direction {
            Direction::Undo => "undone",
            Direction::Redo => "redone",
        };
        write!(f, "{verb}: {} on {} (id {})", self.kind, self.table, self.id)
    }
}

#[derive(Debug, Clone)]
pub struct Journal {
    undo: BoundedStack<UndoEntry>,
    redo: BoundedStack<UndoEntry>,
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        Self {
            undo: BoundedStack::new(capacity),
            redo: BoundedStack::new(capacity),
        }
    }

    /// A fresh mutation: push onto the undo stack and forget anything redoable.
    pub fn record(&mut self, entry: UndoEntry) {
        if let Some(evicted) = self.undo.push(entry) {
            log::debug!("journal full, dropped oldest {} entry", evicted.kind());
        }
        self.redo.clear();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub(crate) fn undo_stack(&mut self) -> &mut BoundedStack<UndoEntry> {
        &mut self.undo
    }

    pub(crate) fn redo_stack(&mut self) -> &mut BoundedStack<UndoEntry> {
        &mut self.redo
    }

    pub(crate) fn outcome(entry: &UndoEntry, direction: Direction) -> JournalOutcome {
        entry.outcome(direction)
    }

    /// Entries for a dropped table can never be applied again.
    pub fn forget_table(&mut self, table: &str) {
        let keep = |e: &UndoEntry| !e.table().eq_ignore_ascii_case(table);
        self.undo.retain(keep);
        self.redo.retain(keep);
    }

    /// Keep captured images in step with a column rename.
    pub fn rename_column(&mut self, table: &str, old: &str, new: &str) {
        for entry in self.undo.iter_mut().chain(self.redo.iter_mut()) {
            if !entry.table().eq_ignore_ascii_case(table) {
                continue;
            }
            for image in entry.images_mut() {
                for (name, _) in image.values.iter_mut() {
                    if name.eq_ignore_ascii_case(old) {
                        *name = new.to_string();
                    }
                }
            }
        }
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
