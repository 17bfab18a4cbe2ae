//! Interpreter state.
//!
//! The identifier table, string pool and canonical empty blocks live in a
//! `Shared` core referenced by every thread state. A `State` is the public
//! per-thread handle: it owns the alias call stack, recursion counter, mode
//! flags and hooks, and all mutation of the shared core happens through
//! short, non-reentrant borrows.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::code::{CodeRef, MAX_ARGUMENTS, RET_FLOAT, RET_INT, RET_NULL, RET_STR};
use crate::errors::{CsError, ErrorReport};
use crate::ident::{
    valid_name, AliasData, Builtin, CommandData, CommandFn, FvarData, Ident, IdentKind, IvarData,
    SvarData, VarFn, IDF_ARG, IDF_HEX, IDF_OVERRIDDEN, IDF_OVERRIDE, IDF_PERSIST, IDF_READONLY,
    IDF_UNKNOWN,
};
use crate::pool::StrPool;
use crate::value::{float_to_str, Value};

pub type HookFn = dyn Fn(&mut State);
pub type PrintFn = dyn Fn(&str);
pub type ErrorFn = dyn Fn(&ErrorReport);

/// One alias invocation on the call stack.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallFrame {
    pub id: usize,
    /// Bit `i` set when positional slot `i` holds a value for this call.
    pub usedargs: u32,
}

pub(crate) struct Shared {
    pub idents: Vec<Ident>,
    pub names: HashMap<Rc<str>, usize>,
    pub pool: StrPool,
    pub dummy: usize,
    pub numargs_var: usize,
    pub dbgalias_var: usize,
    pub empty: [CodeRef; 4],
}

impl Shared {
    pub fn alias(&self, idx: usize) -> Option<&AliasData> {
        self.idents[idx].alias()
    }

    pub fn alias_mut(&mut self, idx: usize) -> Option<&mut AliasData> {
        self.idents[idx].alias_mut()
    }

    pub fn ivar_val(&self, idx: usize) -> i32 {
        match &self.idents[idx].kind {
            IdentKind::Ivar(v) => v.val,
            _ => 0,
        }
    }
}

/// A thread of execution over a shared interpreter core.
pub struct State {
    pub(crate) shared: Rc<RefCell<Shared>>,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) ident_flags: u32,
    pub(crate) run_depth: usize,
    pub(crate) loop_depth: usize,
    pub(crate) nodebug: u32,
    pub(crate) src_file: Option<Rc<str>>,
    pub(crate) src_str: Option<Rc<str>>,
    pub(crate) call_hook: Option<Rc<HookFn>>,
    pub(crate) var_printer: Rc<PrintFn>,
    pub(crate) error_hook: Rc<ErrorFn>,
}

impl Default for State {
    fn default() -> Self {
        State::new()
    }
}

impl State {
    /// Creates a fresh interpreter with the standard command library.
    pub fn new() -> State {
        let shared = Shared {
            idents: Vec::new(),
            names: HashMap::new(),
            pool: StrPool::new(),
            dummy: 0,
            numargs_var: 0,
            dbgalias_var: 0,
            empty: [
                CodeRef::empty(RET_NULL),
                CodeRef::empty(RET_INT),
                CodeRef::empty(RET_FLOAT),
                CodeRef::empty(RET_STR),
            ],
        };
        let mut cs = State {
            shared: Rc::new(RefCell::new(shared)),
            frames: vec![CallFrame {
                id: 0,
                usedargs: (1u32 << MAX_ARGUMENTS) - 1,
            }],
            ident_flags: 0,
            run_depth: 0,
            loop_depth: 0,
            nodebug: 0,
            src_file: None,
            src_str: None,
            call_hook: None,
            var_printer: Rc::new(|line: &str| println!("{}", line)),
            error_hook: Rc::new(|report: &ErrorReport| eprintln!("{}", report)),
        };
        for i in 0..MAX_ARGUMENTS {
            cs.add_ident(
                &format!("arg{}", i + 1),
                IDF_ARG,
                IdentKind::Alias(AliasData::new(Value::Null)),
            );
        }
        let dummy = cs.add_ident(
            "//dummy",
            IDF_UNKNOWN,
            IdentKind::Alias(AliasData::new(Value::Null)),
        );
        let numargs = cs.add_ident(
            "numargs",
            IDF_READONLY,
            IdentKind::Ivar(IvarData {
                val: 0,
                min: MAX_ARGUMENTS as i32,
                max: 0,
                override_val: 0,
                cb: None,
            }),
        );
        let dbgalias = cs.add_ident(
            "dbgalias",
            0,
            IdentKind::Ivar(IvarData {
                val: 4,
                min: 0,
                max: 1000,
                override_val: 4,
                cb: None,
            }),
        );
        {
            let mut sh = cs.shared.borrow_mut();
            sh.dummy = dummy;
            sh.numargs_var = numargs;
            sh.dbgalias_var = dbgalias;
        }
        crate::stdlib::install(&mut cs);
        cs
    }

    /// A new thread sharing this state's identifiers, pool and blocks.
    pub fn new_thread(&self) -> State {
        State {
            shared: Rc::clone(&self.shared),
            frames: vec![CallFrame {
                id: self.shared.borrow().dummy,
                usedargs: (1u32 << MAX_ARGUMENTS) - 1,
            }],
            ident_flags: 0,
            run_depth: 0,
            loop_depth: 0,
            nodebug: 0,
            src_file: None,
            src_str: None,
            call_hook: None,
            var_printer: Rc::new(|line: &str| println!("{}", line)),
            error_hook: Rc::new(|report: &ErrorReport| eprintln!("{}", report)),
        }
    }

    // ---- identifier table ----

    pub(crate) fn add_ident(&mut self, name: &str, flags: u32, kind: IdentKind) -> usize {
        let mut sh = self.shared.borrow_mut();
        let name = sh.pool.intern(name);
        let index = sh.idents.len();
        sh.idents.push(Ident {
            name: Rc::clone(&name),
            index,
            flags,
            kind,
        });
        sh.names.insert(name, index);
        index
    }

    /// Looks a name up, creating an unknown alias when it does not exist.
    /// Invalid (numeric-looking) names report and yield the dummy ident.
    pub(crate) fn new_ident(&mut self, name: &str, flags: u32) -> usize {
        if let Some(idx) = self.ident_index(name) {
            return idx;
        }
        if !valid_name(name) {
            self.debug_code(format!("number {} is not a valid identifier name", name));
            return self.shared.borrow().dummy;
        }
        self.add_ident(name, flags, IdentKind::Alias(AliasData::new(Value::Null)))
    }

    pub fn ident_index(&self, name: &str) -> Option<usize> {
        self.shared.borrow().names.get(name).copied()
    }

    pub fn have_ident(&self, name: &str) -> bool {
        self.ident_index(name).is_some()
    }

    pub fn ident_count(&self) -> usize {
        self.shared.borrow().idents.len()
    }

    pub fn ident_name(&self, idx: usize) -> Rc<str> {
        Rc::clone(&self.shared.borrow().idents[idx].name)
    }

    pub(crate) fn dummy_idx(&self) -> usize {
        self.shared.borrow().dummy
    }

    pub(crate) fn empty_code(&self, ret: u32) -> CodeRef {
        self.shared.borrow().empty[crate::code::ret_index(ret)].clone()
    }

    /// Coerces a value to an identifier handle, creating aliases for names.
    pub(crate) fn force_ident(&mut self, v: &mut Value) -> usize {
        if let Some(i) = v.get_ident() {
            return i;
        }
        let idx = if v.is_stringish() {
            let name = v.get_strr().to_string();
            self.new_ident(&name, IDF_UNKNOWN)
        } else {
            self.dummy_idx()
        };
        *v = Value::Ident(idx);
        idx
    }

    // ---- registration ----

    fn check_new_name(&self, name: &str) -> Result<(), CsError> {
        if !valid_name(name) {
            return Err(CsError::InvalidName(name.to_string()));
        }
        if self.have_ident(name) {
            return Err(CsError::Redefinition(name.to_string()));
        }
        Ok(())
    }

    /// Registers a host command. The argument specifier follows the usual
    /// grammar (`i b f F s S t T E e r $ N C V` plus repeat digits).
    pub fn new_command(
        &mut self,
        name: &str,
        argspec: &str,
        cb: impl Fn(&mut State, &mut [Value], &mut Value) -> crate::errors::CmdResult + 'static,
    ) -> Result<usize, CsError> {
        self.new_command_full(name, argspec, Builtin::None, Rc::new(cb))
    }

    pub(crate) fn new_command_full(
        &mut self,
        name: &str,
        argspec: &str,
        builtin: Builtin,
        cb: Rc<CommandFn>,
    ) -> Result<usize, CsError> {
        self.check_new_name(name)?;
        let numargs = validate_argspec(name, argspec)?;
        let spec: Rc<str> = Rc::from(argspec);
        Ok(self.add_ident(
            name,
            0,
            IdentKind::Command(CommandData {
                argspec: spec,
                numargs,
                cb,
                builtin,
            }),
        ))
    }

    pub fn new_ivar_full(
        &mut self,
        name: &str,
        min: i32,
        max: i32,
        init: i32,
        flags: u32,
        cb: Option<Rc<VarFn>>,
    ) -> Result<usize, CsError> {
        self.check_new_name(name)?;
        let flags = flags | if min > max { IDF_READONLY } else { 0 };
        Ok(self.add_ident(
            name,
            flags,
            IdentKind::Ivar(IvarData {
                val: init,
                min,
                max,
                override_val: init,
                cb,
            }),
        ))
    }

    pub fn new_ivar(&mut self, name: &str, min: i32, max: i32, init: i32) -> Result<usize, CsError> {
        self.new_ivar_full(name, min, max, init, 0, None)
    }

    pub fn new_fvar_full(
        &mut self,
        name: &str,
        min: f32,
        max: f32,
        init: f32,
        flags: u32,
        cb: Option<Rc<VarFn>>,
    ) -> Result<usize, CsError> {
        self.check_new_name(name)?;
        let flags = flags | if min > max { IDF_READONLY } else { 0 };
        Ok(self.add_ident(
            name,
            flags,
            IdentKind::Fvar(FvarData {
                val: init,
                min,
                max,
                override_val: init,
                cb,
            }),
        ))
    }

    pub fn new_fvar(&mut self, name: &str, min: f32, max: f32, init: f32) -> Result<usize, CsError> {
        self.new_fvar_full(name, min, max, init, 0, None)
    }

    pub fn new_svar_full(
        &mut self,
        name: &str,
        init: &str,
        flags: u32,
        cb: Option<Rc<VarFn>>,
    ) -> Result<usize, CsError> {
        self.check_new_name(name)?;
        let val = self.shared.borrow_mut().pool.intern(init);
        Ok(self.add_ident(
            name,
            flags,
            IdentKind::Svar(SvarData {
                val: Rc::clone(&val),
                override_val: val,
                cb,
            }),
        ))
    }

    pub fn new_svar(&mut self, name: &str, init: &str) -> Result<usize, CsError> {
        self.new_svar_full(name, init, 0, None)
    }

    pub fn new_alias(&mut self, name: &str, v: Value) {
        self.set_alias(name, v);
    }

    // ---- aliases ----

    /// Assigns by name: aliases get the value, variables go through their
    /// checked setters, commands refuse.
    pub fn set_alias(&mut self, name: &str, mut v: Value) {
        enum Target {
            Alias(usize),
            Ivar(usize),
            Fvar(usize),
            Svar(usize),
            Command,
        }
        let target = {
            let sh = self.shared.borrow();
            sh.names.get(name).map(|&idx| match sh.idents[idx].kind {
                IdentKind::Alias(_) => Target::Alias(idx),
                IdentKind::Ivar(_) => Target::Ivar(idx),
                IdentKind::Fvar(_) => Target::Fvar(idx),
                IdentKind::Svar(_) => Target::Svar(idx),
                IdentKind::Command(_) => Target::Command,
            })
        };
        match target {
            Some(Target::Alias(idx)) => {
                if idx < MAX_ARGUMENTS {
                    self.set_arg(idx, v);
                } else {
                    self.set_alias_idx(idx, v);
                }
            }
            Some(Target::Ivar(idx)) => {
                let i = v.force_int();
                self.set_ivar_checked(idx, i);
            }
            Some(Target::Fvar(idx)) => {
                let f = v.force_float();
                self.set_fvar_checked(idx, f);
            }
            Some(Target::Svar(idx)) => {
                let s = v.get_str();
                self.set_svar_checked(idx, &s);
            }
            Some(Target::Command) => {
                self.debug_code(format!("cannot redefine builtin {} with an alias", name));
            }
            None => {
                if !valid_name(name) {
                    self.debug_code(format!("cannot alias number {}", name));
                } else {
                    let flags = self.ident_flags;
                    self.add_ident(name, flags, IdentKind::Alias(AliasData::new(v)));
                }
            }
        }
    }

    pub(crate) fn set_alias_idx(&mut self, idx: usize, v: Value) {
        let flags = self.ident_flags;
        let mut sh = self.shared.borrow_mut();
        let id = &mut sh.idents[idx];
        id.flags = flags;
        if let Some(a) = id.alias_mut() {
            a.set_value(v);
        }
    }

    /// Writes a positional argument slot of the current call frame, pushing
    /// a fresh binding the first time a slot is touched.
    pub(crate) fn set_arg(&mut self, idx: usize, v: Value) {
        let bit = 1u32 << idx;
        let top = self.frames.len() - 1;
        if self.frames[top].usedargs & bit != 0 {
            let mut sh = self.shared.borrow_mut();
            if let Some(a) = sh.alias_mut(idx) {
                a.set_value(v);
            }
        } else {
            self.shared.borrow_mut().idents[idx].push_arg(v, false);
            self.frames[top].usedargs |= bit;
        }
    }

    /// Current value of an alias, unless it is an untouched argument slot.
    pub fn get_alias(&self, name: &str) -> Option<String> {
        let sh = self.shared.borrow();
        let idx = *sh.names.get(name)?;
        let id = &sh.idents[idx];
        if !id.is_alias() {
            return None;
        }
        if idx < MAX_ARGUMENTS {
            let top = self.frames.len() - 1;
            if self.frames[top].usedargs & (1 << idx) == 0 {
                return None;
            }
        }
        Some(id.get_str().to_string())
    }

    // ---- variables ----

    /// Applies the override policy ahead of a variable write. Returns false
    /// when the write must be dropped.
    fn check_override(&mut self, idx: usize) -> bool {
        let mut blocked = None;
        {
            let over_mode = self.ident_flags & IDF_OVERRIDDEN != 0;
            let mut sh = self.shared.borrow_mut();
            let id = &mut sh.idents[idx];
            if over_mode || id.flags & IDF_OVERRIDE != 0 {
                if id.flags & IDF_PERSIST != 0 {
                    blocked = Some(id.name.to_string());
                } else if id.flags & IDF_OVERRIDDEN == 0 {
                    match &mut id.kind {
                        IdentKind::Ivar(v) => v.override_val = v.val,
                        IdentKind::Fvar(v) => v.override_val = v.val,
                        IdentKind::Svar(v) => v.override_val = Rc::clone(&v.val),
                        _ => {}
                    }
                    id.flags |= IDF_OVERRIDDEN;
                }
            } else if id.flags & IDF_OVERRIDDEN != 0 {
                id.flags &= !IDF_OVERRIDDEN;
            }
        }
        if let Some(name) = blocked {
            self.debug_code(format!("cannot override persistent variable '{}'", name));
            false
        } else {
            true
        }
    }

    fn readonly_guard(&mut self, idx: usize) -> bool {
        let name = {
            let sh = self.shared.borrow();
            let id = &sh.idents[idx];
            if id.flags & IDF_READONLY != 0 {
                Some(id.name.to_string())
            } else {
                None
            }
        };
        if let Some(name) = name {
            self.debug_code(format!("variable '{}' is read only", name));
            false
        } else {
            true
        }
    }

    fn changed(&mut self, idx: usize) {
        let cb = {
            let sh = self.shared.borrow();
            match &sh.idents[idx].kind {
                IdentKind::Ivar(v) => v.cb.clone(),
                IdentKind::Fvar(v) => v.cb.clone(),
                IdentKind::Svar(v) => v.cb.clone(),
                _ => None,
            }
        };
        if let Some(cb) = cb {
            cb(self);
        }
    }

    pub fn set_ivar_checked(&mut self, idx: usize, v: i32) {
        if !self.readonly_guard(idx) || !self.check_override(idx) {
            return;
        }
        let mut warn = None;
        {
            let mut sh = self.shared.borrow_mut();
            let name = Rc::clone(&sh.idents[idx].name);
            let hex = sh.idents[idx].flags & IDF_HEX != 0;
            if let IdentKind::Ivar(var) = &mut sh.idents[idx].kind {
                let mut val = v;
                if val < var.min || val > var.max {
                    val = val.clamp(var.min, var.max);
                    warn = Some(if hex {
                        if var.min <= 255 {
                            format!("valid range for '{}' is {}..0x{:X}", name, var.min, var.max)
                        } else {
                            format!("valid range for '{}' is 0x{:X}..0x{:X}", name, var.min, var.max)
                        }
                    } else {
                        format!("valid range for '{}' is {}..{}", name, var.min, var.max)
                    });
                }
                var.val = val;
            }
        }
        if let Some(msg) = warn {
            self.debug_code(msg);
        }
        self.changed(idx);
    }

    /// Multi-argument integer write: hex variables assemble a colour triplet
    /// as `(a << 16) | (b << 8) | c`.
    pub(crate) fn set_ivar_args(&mut self, idx: usize, args: &mut [Value]) {
        if args.is_empty() {
            return;
        }
        let mut v = args[0].force_int();
        let hex = self.shared.borrow().idents[idx].flags & IDF_HEX != 0;
        if hex && args.len() > 1 {
            v = (v << 16) | (args[1].force_int() << 8);
            if args.len() > 2 {
                v |= args[2].force_int();
            }
        }
        self.set_ivar_checked(idx, v);
    }

    pub fn set_fvar_checked(&mut self, idx: usize, v: f32) {
        if !self.readonly_guard(idx) || !self.check_override(idx) {
            return;
        }
        let mut warn = None;
        {
            let mut sh = self.shared.borrow_mut();
            let name = Rc::clone(&sh.idents[idx].name);
            if let IdentKind::Fvar(var) = &mut sh.idents[idx].kind {
                let mut val = v;
                if val < var.min || val > var.max {
                    val = val.clamp(var.min, var.max);
                    warn = Some(format!(
                        "valid range for '{}' is {}..{}",
                        name,
                        float_to_str(var.min),
                        float_to_str(var.max)
                    ));
                }
                var.val = val;
            }
        }
        if let Some(msg) = warn {
            self.debug_code(msg);
        }
        self.changed(idx);
    }

    pub fn set_svar_checked(&mut self, idx: usize, v: &str) {
        if !self.readonly_guard(idx) || !self.check_override(idx) {
            return;
        }
        {
            let mut sh = self.shared.borrow_mut();
            let interned = sh.pool.intern(v);
            if let IdentKind::Svar(var) = &mut sh.idents[idx].kind {
                var.val = interned;
            }
        }
        self.changed(idx);
    }

    pub fn set_ivar(&mut self, name: &str, v: i32) {
        if let Some(idx) = self.var_idx(name, VarClass::Int) {
            self.set_ivar_checked(idx, v);
        }
    }

    pub fn set_fvar(&mut self, name: &str, v: f32) {
        if let Some(idx) = self.var_idx(name, VarClass::Float) {
            self.set_fvar_checked(idx, v);
        }
    }

    pub fn set_svar(&mut self, name: &str, v: &str) {
        if let Some(idx) = self.var_idx(name, VarClass::Str) {
            self.set_svar_checked(idx, v);
        }
    }

    fn var_idx(&self, name: &str, class: VarClass) -> Option<usize> {
        let sh = self.shared.borrow();
        let idx = *sh.names.get(name)?;
        let ok = matches!(
            (&sh.idents[idx].kind, class),
            (IdentKind::Ivar(_), VarClass::Int)
                | (IdentKind::Fvar(_), VarClass::Float)
                | (IdentKind::Svar(_), VarClass::Str)
        );
        ok.then_some(idx)
    }

    pub fn get_ivar(&self, name: &str) -> Option<i32> {
        let idx = self.var_idx(name, VarClass::Int)?;
        match &self.shared.borrow().idents[idx].kind {
            IdentKind::Ivar(v) => Some(v.val),
            _ => None,
        }
    }

    pub fn get_fvar(&self, name: &str) -> Option<f32> {
        let idx = self.var_idx(name, VarClass::Float)?;
        match &self.shared.borrow().idents[idx].kind {
            IdentKind::Fvar(v) => Some(v.val),
            _ => None,
        }
    }

    pub fn get_svar(&self, name: &str) -> Option<Rc<str>> {
        let idx = self.var_idx(name, VarClass::Str)?;
        match &self.shared.borrow().idents[idx].kind {
            IdentKind::Svar(v) => Some(Rc::clone(&v.val)),
            _ => None,
        }
    }

    pub fn get_ivar_min(&self, name: &str) -> Option<i32> {
        let idx = self.var_idx(name, VarClass::Int)?;
        match &self.shared.borrow().idents[idx].kind {
            IdentKind::Ivar(v) => Some(v.min),
            _ => None,
        }
    }

    pub fn get_ivar_max(&self, name: &str) -> Option<i32> {
        let idx = self.var_idx(name, VarClass::Int)?;
        match &self.shared.borrow().idents[idx].kind {
            IdentKind::Ivar(v) => Some(v.max),
            _ => None,
        }
    }

    pub fn get_fvar_min(&self, name: &str) -> Option<f32> {
        let idx = self.var_idx(name, VarClass::Float)?;
        match &self.shared.borrow().idents[idx].kind {
            IdentKind::Fvar(v) => Some(v.min),
            _ => None,
        }
    }

    pub fn get_fvar_max(&self, name: &str) -> Option<f32> {
        let idx = self.var_idx(name, VarClass::Float)?;
        match &self.shared.borrow().idents[idx].kind {
            IdentKind::Fvar(v) => Some(v.max),
            _ => None,
        }
    }

    // ---- overrides ----

    pub fn clear_override_idx(&mut self, idx: usize) {
        let mut notify = false;
        {
            let mut sh = self.shared.borrow_mut();
            let id = &mut sh.idents[idx];
            if id.flags & IDF_OVERRIDDEN == 0 {
                return;
            }
            match &mut id.kind {
                IdentKind::Alias(a) => {
                    a.set_value(Value::str_from(""));
                }
                IdentKind::Ivar(v) => {
                    v.val = v.override_val;
                    notify = true;
                }
                IdentKind::Fvar(v) => {
                    v.val = v.override_val;
                    notify = true;
                }
                IdentKind::Svar(v) => {
                    v.val = Rc::clone(&v.override_val);
                    notify = true;
                }
                IdentKind::Command(_) => {}
            }
            id.flags &= !IDF_OVERRIDDEN;
        }
        if notify {
            self.changed(idx);
        }
    }

    pub fn clear_override(&mut self, name: &str) {
        if let Some(idx) = self.ident_index(name) {
            self.clear_override_idx(idx);
        }
    }

    pub fn clear_overrides(&mut self) {
        let count = self.ident_count();
        for idx in 0..count {
            self.clear_override_idx(idx);
        }
    }

    pub fn reset_var(&mut self, name: &str) -> bool {
        let Some(idx) = self.ident_index(name) else {
            return false;
        };
        if !self.readonly_guard(idx) {
            return false;
        }
        self.clear_override_idx(idx);
        true
    }

    pub fn touch_var(&mut self, name: &str) {
        if let Some(idx) = self.ident_index(name) {
            let is_var = {
                let sh = self.shared.borrow();
                matches!(
                    sh.idents[idx].kind,
                    IdentKind::Ivar(_) | IdentKind::Fvar(_) | IdentKind::Svar(_)
                )
            };
            if is_var {
                self.changed(idx);
            }
        }
    }

    /// Thread-level override mode: variable writes shadow instead of replace.
    pub fn set_override_mode(&mut self, on: bool) {
        if on {
            self.ident_flags |= IDF_OVERRIDDEN;
        } else {
            self.ident_flags &= !IDF_OVERRIDDEN;
        }
    }

    /// Thread-level persist mode: aliases created now are marked persistent.
    pub fn set_persist_mode(&mut self, on: bool) {
        if on {
            self.ident_flags |= IDF_PERSIST;
        } else {
            self.ident_flags &= !IDF_PERSIST;
        }
    }

    // ---- printing and diagnostics ----

    pub(crate) fn print_var(&mut self, idx: usize) {
        let line = {
            let sh = self.shared.borrow();
            let id = &sh.idents[idx];
            match &id.kind {
                IdentKind::Ivar(v) => {
                    if v.val < 0 || id.flags & IDF_HEX == 0 {
                        format!("{} = {}", id.name, v.val)
                    } else if v.max == 0xFFFFFF {
                        format!(
                            "{} = 0x{:06X} ({}, {}, {})",
                            id.name,
                            v.val,
                            (v.val >> 16) & 0xFF,
                            (v.val >> 8) & 0xFF,
                            v.val & 0xFF
                        )
                    } else {
                        format!("{} = 0x{:X}", id.name, v.val)
                    }
                }
                IdentKind::Fvar(v) => format!("{} = {}", id.name, float_to_str(v.val)),
                IdentKind::Svar(v) => {
                    if v.val.contains('"') {
                        format!("{} = [{}]", id.name, v.val)
                    } else {
                        format!("{} = \"{}\"", id.name, v.val)
                    }
                }
                _ => return,
            }
        };
        let printer = Rc::clone(&self.var_printer);
        printer(&line);
    }

    pub(crate) fn debug_code(&mut self, message: String) {
        self.report(message, None);
    }

    pub(crate) fn debug_code_at(&mut self, offset: usize, message: String) {
        self.report(message, Some(offset));
    }

    fn report(&mut self, mut message: String, offset: Option<usize>) {
        if self.nodebug > 0 {
            return;
        }
        let line = match (&self.src_str, offset) {
            (Some(src), Some(ofs)) if ofs <= src.len() => {
                Some(1 + src.as_bytes()[..ofs].iter().filter(|&&c| c == b'\n').count())
            }
            _ => None,
        };
        self.append_alias_trace(&mut message);
        let report = ErrorReport {
            message,
            offset,
            file: self.src_file.as_ref().map(|f| f.to_string()),
            line,
        };
        let hook = Rc::clone(&self.error_hook);
        hook(&report);
    }

    /// Appends the alias call trace the way `dbgalias` asks for: up to N
    /// innermost frames, plus the outermost when the stack is deeper.
    fn append_alias_trace(&self, message: &mut String) {
        let sh = self.shared.borrow();
        let limit = sh.ivar_val(sh.dbgalias_var);
        if limit <= 0 || self.frames.len() <= 1 {
            return;
        }
        let total = self.frames.len() - 1;
        for (depth, frame) in self.frames[1..].iter().rev().enumerate() {
            let depth = depth + 1;
            let name = &sh.idents[frame.id].name;
            if depth < limit as usize {
                message.push_str(&format!("\n  {}) {}", total - depth + 1, name));
            } else if depth == total {
                if depth == limit as usize {
                    message.push_str(&format!("\n  {}) {}", total - depth + 1, name));
                } else {
                    message.push_str(&format!("\n  ..{}) {}", total - depth + 1, name));
                }
            }
        }
    }

    // ---- hooks ----

    /// Installs a hook invoked on every VM entry; returns the previous one.
    pub fn set_call_hook(&mut self, f: impl Fn(&mut State) + 'static) -> Option<Rc<HookFn>> {
        self.call_hook.replace(Rc::new(f))
    }

    pub fn clear_call_hook(&mut self) -> Option<Rc<HookFn>> {
        self.call_hook.take()
    }

    /// Replaces the sink for variable printing (`PRINT` and bare variable
    /// statements).
    pub fn set_var_printer(&mut self, f: impl Fn(&str) + 'static) {
        self.var_printer = Rc::new(f);
    }

    /// Replaces the error channel. The default prints to stderr.
    pub fn set_error_hook(&mut self, f: impl Fn(&ErrorReport) + 'static) {
        self.error_hook = Rc::new(f);
    }

    pub(crate) fn intern(&self, s: &str) -> Rc<str> {
        self.shared.borrow_mut().pool.intern(s)
    }
}

#[derive(Clone, Copy)]
enum VarClass {
    Int,
    Float,
    Str,
}

/// Validates an argument specifier, returning the declared arity.
fn validate_argspec(name: &str, spec: &str) -> Result<usize, CsError> {
    let b = spec.as_bytes();
    let mut nargs = 0usize;
    let mut limit = true;
    let mut k = 0usize;
    while k < b.len() {
        match b[k] {
            b'i' | b'b' | b'f' | b'F' | b't' | b'T' | b'E' | b'N' | b'S' | b's' | b'e' | b'r'
            | b'$' => {
                if nargs < MAX_ARGUMENTS {
                    nargs += 1;
                }
            }
            c @ b'1'..=b'4' => {
                let d = (c - b'0') as usize;
                if k < d {
                    return Err(CsError::IllegalArgType {
                        name: name.to_string(),
                        spec: c as char,
                    });
                }
                if nargs < MAX_ARGUMENTS {
                    k -= d;
                    continue;
                }
            }
            b'C' | b'V' => {
                limit = false;
            }
            c => {
                return Err(CsError::IllegalArgType {
                    name: name.to_string(),
                    spec: c as char,
                });
            }
        }
        k += 1;
    }
    if limit && nargs > crate::code::MAX_COM_ARGS {
        return Err(CsError::TooManyArgs {
            name: name.to_string(),
            count: nargs,
        });
    }
    Ok(nargs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argspec_validation() {
        assert_eq!(validate_argspec("x", "").unwrap(), 0);
        assert_eq!(validate_argspec("x", "sT").unwrap(), 2);
        assert_eq!(validate_argspec("x", "rie").unwrap(), 3);
        assert_eq!(validate_argspec("x", "i1V").unwrap(), MAX_ARGUMENTS);
        assert!(validate_argspec("x", "q").is_err());
        assert!(validate_argspec("x", "iiiiiiiiiiiii").is_err());
    }

    #[test]
    fn arg_ident_indices_are_reserved() {
        let cs = State::new();
        for i in 0..MAX_ARGUMENTS {
            assert_eq!(cs.ident_index(&format!("arg{}", i + 1)), Some(i));
        }
    }

    #[test]
    fn threads_share_identifiers() {
        let mut cs = State::new();
        cs.set_alias("shared_thing", Value::Int(9));
        let thread = cs.new_thread();
        assert_eq!(thread.get_alias("shared_thing").as_deref(), Some("9"));
    }

    #[test]
    fn override_symmetry() {
        let mut cs = State::new();
        cs.new_ivar("symvar", 0, 100, 30).unwrap();
        cs.set_override_mode(true);
        cs.set_ivar("symvar", 60);
        assert_eq!(cs.get_ivar("symvar"), Some(60));
        cs.set_ivar("symvar", 30);
        cs.set_override_mode(false);
        cs.clear_override("symvar");
        assert_eq!(cs.get_ivar("symvar"), Some(30));
        let idx = cs.ident_index("symvar").unwrap();
        assert_eq!(
            cs.shared.borrow().idents[idx].flags & IDF_OVERRIDDEN,
            0
        );
    }

    #[test]
    fn persistent_variables_refuse_override() {
        let mut cs = State::new();
        cs.new_ivar_full("keepvar", 0, 100, 5, IDF_PERSIST, None).unwrap();
        cs.set_override_mode(true);
        cs.set_ivar("keepvar", 50);
        assert_eq!(cs.get_ivar("keepvar"), Some(5));
    }
}
