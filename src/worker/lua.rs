//! Lua 5.4 interpreter for the worker
//!
//! Payloads run as Lua chunks. Errors are normalized into `Kind: message`
//! form by a small prelude that wraps each call in `xpcall`:
//!
//! - `throw(kind, message)` raises an error of an explicit kind
//! - "attempt to ..." runtime faults become `TypeError`
//! - stack overflow becomes `RangeError`
//! - allocation failure becomes `MemoryError`
//! - compile failures become `SyntaxError`
//! - anything else is a plain `Error`
//!
//! `print` and `io.write` go to stderr, stdout belongs to the protocol.

use anyhow::{anyhow, Result};
use mlua::{Function, Lua};

use super::{Interpreter, ScriptError};

const PRELUDE: &str = r##"
local getmetatable, setmetatable = getmetatable, setmetatable
local tostring, select, xpcall = tostring, select, xpcall
local stderr = io.stderr
local concat = table.concat

local Thrown = {}
Thrown.__tostring = function(e) return e.kind .. ": " .. e.message end

function throw(kind, message)
  error(setmetatable({ kind = tostring(kind), message = tostring(message or "") }, Thrown), 2)
end

print = function(...)
  local parts = {}
  for i = 1, select("#", ...) do
    parts[i] = tostring((select(i, ...)))
  end
  stderr:write(concat(parts, "\t"), "\n")
end

io.write = function(...)
  return stderr:write(...)
end

local function describe(err)
  if getmetatable(err) == Thrown then
    return err.kind, err.message
  end
  local text = tostring(err)
  if text:find("stack overflow", 1, true) then
    return "RangeError", text
  end
  if text:find("not enough memory", 1, true) then
    return "MemoryError", text
  end
  if text:find("attempt to ", 1, true) then
    return "TypeError", text
  end
  return "Error", text
end

return function(chunk)
  local kind, message
  local ok, err = xpcall(chunk, function(e)
    kind, message = describe(e)
    return e
  end)
  if ok then
    return true
  end
  -- the handler is skipped for allocation failures
  if kind == nil then
    kind, message = describe(err)
  end
  return false, kind, message
end
"##;

/// Lua interpreter with the harness prelude loaded
pub struct LuaInterpreter {
    lua: Lua,
    run: Function,
}

impl LuaInterpreter {
    /// Create an interpreter, optionally capping its heap at `memory_limit` bytes.
    pub fn new(memory_limit: Option<usize>) -> Result<Self> {
        let lua = Lua::new();
        let run: Function = lua
            .load(PRELUDE)
            .set_name("=prelude")
            .eval()
            .map_err(|e| anyhow!("Failed to load interpreter prelude: {}", e))?;

        if let Some(limit) = memory_limit {
            lua.set_memory_limit(limit)
                .map_err(|e| anyhow!("Failed to set interpreter memory limit: {}", e))?;
        }

        Ok(Self { lua, run })
    }
}

impl Interpreter for LuaInterpreter {
    fn execute(&mut self, source: &str) -> std::result::Result<(), ScriptError> {
        let chunk = self
            .lua
            .load(source)
            .set_name("=payload")
            .into_function()
            .map_err(from_lua_error)?;

        let (ok, kind, message): (bool, Option<String>, Option<String>) =
            self.run.call(chunk).map_err(from_lua_error)?;

        if ok {
            return Ok(());
        }
        Err(ScriptError::new(
            kind.unwrap_or_else(|| "Error".to_string()),
            message.unwrap_or_default(),
        ))
    }
}

/// Map errors raised outside the prelude's `xpcall` (compilation, allocation).
fn from_lua_error(err: mlua::Error) -> ScriptError {
    match err {
        mlua::Error::SyntaxError { message, .. } => ScriptError::new("SyntaxError", message),
        mlua::Error::MemoryError(message) => ScriptError::new("MemoryError", message),
        mlua::Error::RuntimeError(message) => ScriptError::new("Error", message),
        mlua::Error::CallbackError { cause, .. } => from_lua_error((*cause).clone()),
        other => ScriptError::new("InternalError", other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> std::result::Result<(), ScriptError> {
        LuaInterpreter::new(None).unwrap().execute(source)
    }

    #[test]
    fn test_clean_chunk_passes() {
        assert_eq!(run("local x = 1 + 1\nassert(x == 2)\n"), Ok(()));
    }

    #[test]
    fn test_throw_sets_kind() {
        let err = run("throw('TypeError', 'not callable')").unwrap_err();
        assert_eq!(err.kind, "TypeError");
        assert_eq!(err.message, "not callable");
    }

    #[test]
    fn test_runtime_fault_is_type_error() {
        let err = run("local t = nil\nreturn t.field").unwrap_err();
        assert_eq!(err.kind, "TypeError");
        assert!(err.message.contains("attempt to index"));
    }

    #[test]
    fn test_plain_error_and_syntax_error() {
        let err = run("error('boom', 0)").unwrap_err();
        assert_eq!(err.kind, "Error");
        assert_eq!(err.message, "boom");

        let err = run("local = 3").unwrap_err();
        assert_eq!(err.kind, "SyntaxError");
    }

    #[test]
    fn test_stack_overflow_is_range_error() {
        let err = run("local function f() return 1 + f() end\nf()").unwrap_err();
        assert_eq!(err.kind, "RangeError");
    }

    #[test]
    fn test_memory_limit_is_memory_error() {
        let mut lua = LuaInterpreter::new(Some(4 * 1024 * 1024)).unwrap();
        let err = lua
            .execute("local t = {}\nfor i = 1, 1e8 do t[i] = string.rep('x', 64) .. i end")
            .unwrap_err();
        assert_eq!(err.kind, "MemoryError");
    }

    #[test]
    fn test_print_accepts_nils_and_sentinels() {
        assert_eq!(run("print('a', nil, 3, nil)\nprint()\nprint('::pass::')"), Ok(()));
        assert_eq!(run("io.write('::fin::', '\\n')"), Ok(()));
    }

    #[test]
    fn test_state_persists_within_one_interpreter() {
        let mut lua = LuaInterpreter::new(None).unwrap();
        lua.execute("counter = 41").unwrap();
        assert_eq!(lua.execute("assert(counter == 41)"), Ok(()));
    }
}
