//! The module loader hook (§6 of `SPEC_FULL.md`): `IMPORT_NAME` calls out
//! to a host-provided [`ModuleLoader`] rather than the engine owning any
//! filesystem or search-path logic itself. Resolution, caching, and
//! recursive evaluation of the imported module's top-level code are all
//! the host's responsibility; the engine only needs back a fully-populated
//! `Value::Module`.

use crate::exception::RunResult;
use crate::value::Value;

/// Resolves and evaluates a module by name, returning it as a
/// `Value::Module`. `level` is the dotted-relative-import depth (`0` for
/// an absolute import, `1+` for each leading dot of a `from . import x`);
/// `package` is the importing module's `__package__`, needed to resolve a
/// relative import.
pub trait ModuleLoader {
    fn resolve_and_load(&mut self, name: &str, level: i64, package: Option<&str>) -> RunResult<Value>;
}

/// Default loader: no host has wired one up, so every `IMPORT_NAME` fails
/// with `ModuleNotFoundError`, the same outcome a real interpreter gives
/// for a name absent from every search path.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoModuleLoader;

impl ModuleLoader for NoModuleLoader {
    fn resolve_and_load(&mut self, name: &str, _level: i64, _package: Option<&str>) -> RunResult<Value> {
        crate::exception::simple_raise(crate::exception::ExcType::ModuleNotFoundError, format!("No module named '{name}'"))
    }
}
