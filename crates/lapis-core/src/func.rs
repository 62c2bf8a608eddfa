//! Shared upvalue cells.
//!
//! A cell is open while it aliases a live stack slot of some thread, and
//! closed once the value has been copied into the cell. Cells are owned by
//! the closures that reference them through an explicit reference count;
//! they are not collector objects.

use crate::error::LuaError;
use crate::gc::GcIdx;
use crate::state::{GlobalState, LuaThread, ThreadObj, Vm};
use crate::value::TValue;
use std::mem::size_of;

/// Handle of an upvalue cell. Two closures share a variable exactly when
/// they hold the same id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UpvalId(pub(crate) u32);

#[derive(Clone, Copy, Debug)]
pub enum UpvalState {
    /// Aliases `slot` of `thread`'s stack.
    Open {
        thread: GcIdx<ThreadObj>,
        slot: usize,
    },
    Closed(TValue),
}

#[derive(Clone, Copy, Debug)]
pub struct UpVal {
    pub state: UpvalState,
    /// Number of closures referencing this cell.
    pub refcount: u32,
    /// An open cell reached while marking a closure. Its value is marked
    /// in the atomic phase if the owning thread turns out unmarked.
    pub touched: bool,
}

impl UpVal {
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self.state, UpvalState::Open { .. })
    }
}

/// Slab of upvalue cells.
#[derive(Debug, Default)]
pub struct UpvalSlab {
    cells: Vec<Option<UpVal>>,
    free: Vec<u32>,
}

impl UpvalSlab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uv: UpVal) -> UpvalId {
        if let Some(i) = self.free.pop() {
            self.cells[i as usize] = Some(uv);
            UpvalId(i)
        } else {
            self.cells.push(Some(uv));
            UpvalId(self.cells.len() as u32 - 1)
        }
    }

    pub fn remove(&mut self, id: UpvalId) -> UpVal {
        let uv = self.cells[id.0 as usize]
            .take()
            .expect("upvalue was already freed");
        self.free.push(id.0);
        uv
    }

    #[inline]
    pub fn get(&self, id: UpvalId) -> &UpVal {
        self.cells[id.0 as usize].as_ref().expect("upvalue was freed")
    }

    #[inline]
    pub fn get_mut(&mut self, id: UpvalId) -> &mut UpVal {
        self.cells[id.0 as usize].as_mut().expect("upvalue was freed")
    }

    pub fn contains(&self, id: UpvalId) -> bool {
        matches!(self.cells.get(id.0 as usize), Some(Some(_)))
    }

    pub fn len(&self) -> usize {
        self.cells.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every live cell.
    pub fn ids(&self) -> impl Iterator<Item = UpvalId> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_some())
            .map(|(i, _)| UpvalId(i as u32))
    }
}

/// Bytes charged for one cell.
pub const UPVAL_SIZE: usize = size_of::<UpVal>();

impl GlobalState {
    /// Current value of a cell. `running` and `th` describe the thread
    /// whose state is checked out of its object.
    pub(crate) fn upval_value(
        &self,
        id: UpvalId,
        running: GcIdx<ThreadObj>,
        th: &LuaThread,
    ) -> TValue {
        match self.upvals.get(id).state {
            UpvalState::Closed(v) => v,
            UpvalState::Open { thread, slot } if thread == running => th.stack[slot],
            UpvalState::Open { thread, slot } => self.thread_state(thread).stack[slot],
        }
    }

    /// Drop one reference to a cell; a closed cell with no references left
    /// is freed.
    pub(crate) fn upval_decref(&mut self, id: UpvalId) {
        let uv = self.upvals.get_mut(id);
        debug_assert!(uv.refcount > 0);
        uv.refcount -= 1;
        if uv.refcount == 0 && !uv.is_open() {
            self.upvals.remove(id);
            self.release(UPVAL_SIZE);
        }
    }

    /// Close every open cell of `th` at or above `level`.
    pub(crate) fn close_thread_upvals(&mut self, th: &mut LuaThread, level: usize) {
        while let Some(&id) = th.open_upvals.first() {
            let slot = match self.upvals.get(id).state {
                UpvalState::Open { slot, .. } => slot,
                UpvalState::Closed(_) => unreachable!("closed cell on the open list"),
            };
            if slot < level {
                break;
            }
            th.open_upvals.remove(0);
            if self.upvals.get(id).refcount == 0 {
                self.upvals.remove(id);
                self.release(UPVAL_SIZE);
            } else {
                let v = th.stack[slot];
                let uv = self.upvals.get_mut(id);
                uv.state = UpvalState::Closed(v);
                uv.touched = false;
                self.upval_barrier(v);
            }
        }
    }
}

impl Vm {
    /// Value of a cell.
    pub(crate) fn upval_get(&self, id: UpvalId) -> TValue {
        self.g.upval_value(id, self.running, &self.th)
    }

    /// Write through a cell. Writing a closed cell runs the upvalue barrier.
    pub(crate) fn upval_set(&mut self, id: UpvalId, v: TValue) {
        match self.g.upvals.get(id).state {
            UpvalState::Open { thread, slot } if thread == self.running => self.th.stack[slot] = v,
            UpvalState::Open { thread, slot } => self.g.thread_state_mut(thread).stack[slot] = v,
            UpvalState::Closed(_) => {
                self.g.upvals.get_mut(id).state = UpvalState::Closed(v);
                self.g.upval_barrier(v);
            }
        }
    }

    /// Find the open cell aliasing stack slot `level` of the running thread,
    /// creating one if none exists. The open list stays sorted by slot,
    /// highest first.
    pub(crate) fn find_upval(&mut self, level: usize) -> Result<UpvalId, LuaError> {
        let mut pos = 0;
        for (i, &id) in self.th.open_upvals.iter().enumerate() {
            match self.g.upvals.get(id).state {
                UpvalState::Open { slot, .. } if slot == level => return Ok(id),
                UpvalState::Open { slot, .. } if slot < level => break,
                _ => pos = i + 1,
            }
        }
        self.reserve(0, UPVAL_SIZE)?;
        let id = self.g.upvals.insert(UpVal {
            state: UpvalState::Open {
                thread: self.running,
                slot: level,
            },
            refcount: 0,
            touched: false,
        });
        self.th.open_upvals.insert(pos, id);
        Ok(id)
    }

    /// A fresh closed cell holding nil, referenced once.
    pub(crate) fn new_closed_upval(&mut self) -> Result<UpvalId, LuaError> {
        self.reserve(0, UPVAL_SIZE)?;
        Ok(self.g.upvals.insert(UpVal {
            state: UpvalState::Closed(TValue::Nil),
            refcount: 1,
            touched: false,
        }))
    }

    /// Close the running thread's open cells at or above `level`.
    pub(crate) fn close_upvals(&mut self, level: usize) {
        self.g.close_thread_upvals(&mut self.th, level);
    }
}
