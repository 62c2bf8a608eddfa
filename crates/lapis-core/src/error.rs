//! Error and status types.

use crate::value::TValue;

/// Outcome of a protected operation, and the status of a thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Ok = 0,
    /// Thread is suspended (never reported by a protected call).
    Yield = 1,
    ErrRun = 2,
    ErrSyntax = 3,
    ErrMem = 4,
    /// Error while running the message handler.
    ErrErr = 6,
}

impl Status {
    #[inline]
    pub fn is_error(self) -> bool {
        !matches!(self, Status::Ok | Status::Yield)
    }
}

/// An error unwinding towards the nearest recovery boundary.
#[derive(Clone, Debug, thiserror::Error)]
pub enum LuaError {
    /// General runtime error with message.
    #[error("{0}")]
    Runtime(String),
    /// Compile error reported by the chunk codec.
    #[error("{0}")]
    Syntax(String),
    /// The allocator refused memory even after an emergency collection.
    #[error("not enough memory")]
    Memory,
    /// The message handler itself failed.
    #[error("error in error handling")]
    ErrorInHandler,
    /// Stack overflow (too many nested calls or slots).
    #[error("stack overflow")]
    StackOverflow,
    /// Script-raised error with an arbitrary value. The value stays anchored
    /// on the raising thread's stack until the boundary takes it.
    #[error("{0:?}")]
    Value(TValue),
    /// A coroutine suspension unwinding to its resume boundary.
    #[error("attempt to yield")]
    Yield,
}

impl LuaError {
    pub fn runtime(msg: impl Into<String>) -> Self {
        LuaError::Runtime(msg.into())
    }

    /// Status a protected call reports for this error.
    pub fn status(&self) -> Status {
        match self {
            LuaError::Runtime(_) | LuaError::StackOverflow | LuaError::Value(_) => Status::ErrRun,
            LuaError::Syntax(_) => Status::ErrSyntax,
            LuaError::Memory => Status::ErrMem,
            LuaError::ErrorInHandler => Status::ErrErr,
            LuaError::Yield => Status::Yield,
        }
    }
}
