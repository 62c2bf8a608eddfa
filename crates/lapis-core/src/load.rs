//! Loading and dumping chunks through the installed codec.

use crate::error::{LuaError, Status};
use crate::executor::{ChunkReader, ChunkWriter};
use crate::func::UpvalId;
use crate::gc::GcIdx;
use crate::object::LuaClosure;
use crate::state::Vm;
use crate::value::TValue;

/// First byte of a binary chunk.
const SIGNATURE_BYTE: u8 = 0x1b;

fn check_mode(mode: Option<&str>, binary: bool) -> Result<(), LuaError> {
    let kind = if binary { "binary" } else { "text" };
    match mode {
        Some(m) if !m.contains(&kind[..1]) => Err(LuaError::Syntax(format!(
            "attempt to load a {kind} chunk (mode is '{m}')"
        ))),
        _ => Ok(()),
    }
}

impl Vm {
    /// Load a chunk without running it. On success the new function is
    /// pushed and its first upvalue is set to the globals table; on failure
    /// the error message is pushed. `mode` restricts the accepted chunk
    /// kinds (`"b"`, `"t"` or `"bt"`).
    pub fn load(
        &mut self,
        mut reader: impl ChunkReader,
        chunkname: Option<&str>,
        mode: Option<&str>,
    ) -> Status {
        let chunkname = chunkname.unwrap_or("?");
        let mut source = Vec::new();
        while let Some(block) = reader.read_block() {
            if block.is_empty() {
                break;
            }
            source.extend_from_slice(&block);
        }
        let old_top = self.th.top;
        let ef = self.th.errfunc;
        self.th.nny += 1;
        let status = self.pcall_raw(old_top, ef, |vm| vm.parse_chunk(&source, chunkname, mode));
        self.th.nny -= 1;
        if status == Status::Ok {
            if let TValue::LuaClosure(c) = self.th.stack[self.th.top - 1] {
                if let Some(&env) = self.g.lua_closures.get(c).upvals.first() {
                    let globals = self.g.globals();
                    self.upval_set(env, globals);
                }
            }
        }
        tracing::debug!(target: "lapis::api", chunkname, ?status, "chunk loaded");
        status
    }

    fn parse_chunk(&mut self, source: &[u8], chunkname: &str, mode: Option<&str>) -> Result<(), LuaError> {
        let binary = source.first() == Some(&SIGNATURE_BYTE);
        check_mode(mode, binary)?;
        let codec = self
            .g
            .codec
            .clone()
            .ok_or_else(|| LuaError::Syntax(format!("{chunkname}: no chunk codec installed")))?;
        let fp = if binary {
            codec.undump(source, chunkname)?
        } else {
            codec.parse(source, chunkname)?
        };
        // nothing anchors the new prototypes until the closure is on the stack
        let stopem = std::mem::replace(&mut self.g.gc.stopem, true);
        let r = self.materialize(&fp).and_then(|p| {
            let cells = self.fresh_upvals(fp.upvalues.len())?;
            self.new_lua_closure(p, cells.clone()).map_err(|e| {
                for id in cells {
                    self.g.upval_decref(id);
                }
                e
            })
        });
        self.g.gc.stopem = stopem;
        let cl: GcIdx<LuaClosure> = r?;
        self.ensure_stack(1)?;
        self.push_raw(TValue::LuaClosure(cl));
        Ok(())
    }

    /// `n` new closed cells holding nil, each referenced once.
    fn fresh_upvals(&mut self, n: usize) -> Result<Vec<UpvalId>, LuaError> {
        let mut cells = Vec::with_capacity(n);
        for _ in 0..n {
            match self.new_closed_upval() {
                Ok(id) => cells.push(id),
                Err(e) => {
                    for id in cells {
                        self.g.upval_decref(id);
                    }
                    return Err(e);
                }
            }
        }
        Ok(cells)
    }

    /// Serialize the script function on top of the stack. Returns the
    /// first non-zero writer status, 0 on success, or 1 if the value is not
    /// a script function or no codec is installed.
    pub fn dump(&mut self, mut writer: impl ChunkWriter, strip: bool) -> i32 {
        let c = match self.th.stack[self.th.top - 1] {
            TValue::LuaClosure(c) => c,
            _ => return 1,
        };
        let codec = match &self.g.codec {
            Some(codec) => codec.clone(),
            None => return 1,
        };
        let fp = self.export_proto(self.g.lua_closures.get(c).proto, strip);
        codec.dump(&fp, strip, &mut |block: &[u8]| writer.write_block(block))
    }
}
