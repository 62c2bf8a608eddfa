//! Lapis core: the embeddable heart of a Lua 5.3 style engine.
//!
//! The host drives a [`Vm`] through a stack-based API: values are pushed,
//! tables are read and written, functions are called (protected or not),
//! coroutines are resumed and the incremental collector is tuned. Script
//! functions are run by an installed [`Executor`], and chunks are turned
//! into prototypes by an installed [`ChunkCodec`].

pub mod access;
pub mod api;
pub mod arith;
pub mod call;
pub mod callinfo;
pub mod coerce;
pub mod collector;
pub mod compare;
pub mod config;
pub mod coroutine;
pub mod error;
pub mod executor;
pub mod func;
pub mod gc;
pub mod heap;
pub mod load;
pub mod metamethod;
pub mod object;
pub mod stack;
pub mod state;
pub mod string;
pub mod table;
pub mod value;

pub use access::MAXTAGLOOP;
pub use arith::ArithOp;
pub use callinfo::Continuation;
pub use collector::GcOp;
pub use compare::CompareOp;
pub use config::{
    upvalue_index, EngineConfig, MULTRET, REGISTRY_INDEX, RIDX_GLOBALS, RIDX_MAINTHREAD,
};
pub use error::{LuaError, Status};
pub use executor::{ChunkCodec, ChunkReader, ChunkWriter, Constant, Executor, FunctionPrototype};
pub use gc::GcIdx;
pub use heap::{Allocator, DefaultAllocator, LimitedAllocator};
pub use object::{LuaType, Proto, UpvalDesc};
pub use state::{ThreadObj, Vm};
pub use value::{NativeFn, TValue};
