//! The single-pass compiler.
//!
//! Source is scanned byte by byte and opcodes are emitted as the scan goes;
//! there is no token stream or syntax tree. The representation each argument
//! is compiled into depends on the callee's argument specifier, which is why
//! the scanner and the emitter cannot be separated. Control flow over block
//! arguments (`if`, `&&`, `||`) is rewritten into jumps at emission time by
//! patching the already-emitted words.

use crate::code::*;
use crate::ident::{Builtin, IdentKind, IDF_HEX, IDF_UNKNOWN};
use crate::state::State;
use crate::value::{parse_float, parse_int, parse_int_prefix};

/// The representation an argument should be produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WordType {
    Null,
    Int,
    Float,
    Str,
    Any,
    /// String kept borrowed (macro) when possible.
    CStr,
    /// Any value, strings kept borrowed.
    CAny,
    Word,
    Pop,
    Cond,
    Code,
    Ident,
}

/// Return-type tag for a word type, with a fallback for the loose types.
pub(crate) fn ret_code(wt: WordType, def: u32) -> u32 {
    match wt {
        WordType::Null => RET_NULL,
        WordType::Int => RET_INT,
        WordType::Float => RET_FLOAT,
        WordType::Str | WordType::CStr => RET_STR,
        _ => def,
    }
}

fn paren_inner(wt: WordType) -> WordType {
    match wt {
        WordType::Null
        | WordType::Int
        | WordType::Float
        | WordType::Str
        | WordType::Any => WordType::Any,
        _ => WordType::CAny,
    }
}

// ---- byte scanning ----

pub(crate) struct Scanner<'a> {
    pub src: &'a [u8],
    pub pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Scanner {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    pub fn cur(&self) -> u8 {
        self.src.get(self.pos).copied().unwrap_or(0)
    }

    pub fn peek(&self, ahead: usize) -> u8 {
        self.src.get(self.pos + ahead).copied().unwrap_or(0)
    }

    pub fn advance(&mut self) {
        if self.pos < self.src.len() {
            self.pos += 1;
        }
    }

    /// Advances until one of `stops` (or the end) is current.
    pub fn skip_until(&mut self, stops: &[u8]) {
        while self.pos < self.src.len() && !stops.contains(&self.src[self.pos]) {
            self.pos += 1;
        }
    }

    pub fn skip_line(&mut self) {
        self.skip_until(b"\n");
    }

    pub fn text(&self, start: usize, end: usize) -> &'a str {
        std::str::from_utf8(&self.src[start..end]).unwrap_or("")
    }
}

/// End of a quoted string body: stops before `"`, a newline or the end.
/// `^X` escapes skip the escaped byte.
pub(crate) fn string_end(src: &[u8], mut pos: usize) -> usize {
    while pos < src.len() {
        match src[pos] {
            b'\r' | b'\n' | b'"' => return pos,
            b'^' => {
                pos += 1;
                if pos >= src.len() {
                    return pos;
                }
                pos += 1;
            }
            _ => pos += 1,
        }
    }
    pos
}

/// End of a bare word: stops at whitespace, terminators and comment starts,
/// but lets balanced brackets pass through.
pub(crate) fn word_end(src: &[u8], mut pos: usize) -> usize {
    const MAX_BRAK: usize = 100;
    let mut stack = [0u8; MAX_BRAK];
    let mut depth = 0usize;
    while pos < src.len() {
        match src[pos] {
            b'"' | b';' | b' ' | b'\t' | b'\r' | b'\n' => return pos,
            b'/' => {
                if src.get(pos + 1) == Some(&b'/') {
                    return pos;
                }
            }
            c @ (b'[' | b'(') => {
                if depth >= MAX_BRAK {
                    return pos;
                }
                stack[depth] = c;
                depth += 1;
            }
            b']' => {
                if depth == 0 || stack[depth - 1] != b'[' {
                    return pos;
                }
                depth -= 1;
            }
            b')' => {
                if depth == 0 || stack[depth - 1] != b'(' {
                    return pos;
                }
                depth -= 1;
            }
            _ => {}
        }
        pos += 1;
    }
    pos
}

pub(crate) fn skip_comments(sc: &mut Scanner) {
    loop {
        while matches!(sc.cur(), b' ' | b'\t' | b'\r') {
            sc.advance();
        }
        if sc.cur() == b'/' && sc.peek(1) == b'/' {
            sc.skip_line();
        } else {
            return;
        }
    }
}

/// Expands `^` escapes and drops backslash line continuations.
pub fn unescape_string(s: &str) -> String {
    let b = s.as_bytes();
    let mut out = Vec::with_capacity(b.len());
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'^' if i + 1 < b.len() => {
                i += 1;
                out.push(match b[i] {
                    b'n' => b'\n',
                    b't' => b'\t',
                    b'f' => 0x0C,
                    c => c,
                });
                i += 1;
            }
            b'\\' if b.get(i + 1) == Some(&b'\n') => i += 2,
            b'\\' if b.get(i + 1) == Some(&b'\r') && b.get(i + 2) == Some(&b'\n') => i += 3,
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    String::from_utf8(out).unwrap_or_default()
}

/// Quotes a string, turning control characters into `^` escapes.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\n' => out.push_str("^n"),
            '\t' => out.push_str("^t"),
            '\x0C' => out.push_str("^f"),
            '"' => out.push_str("^\""),
            '^' => out.push_str("^^"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn cut_string(sc: &mut Scanner) -> String {
    sc.advance();
    let start = sc.pos;
    let end = string_end(sc.src, sc.pos);
    sc.pos = end;
    let s = unescape_string(sc.text(start, end));
    if sc.cur() == b'"' {
        sc.advance();
    }
    s
}

fn cut_word(sc: &mut Scanner) -> Option<(usize, usize)> {
    let start = sc.pos;
    sc.pos = word_end(sc.src, sc.pos);
    (sc.pos > start).then_some((start, sc.pos))
}

// ---- literal encoding shared with runtime compilation ----

pub(crate) fn push_int_op(code: &mut Vec<u32>, i: i32) {
    if (-0x80_0000..=0x7F_FFFF).contains(&i) {
        code.push(OP_VALI | RET_INT | ((i as u32) << 8));
    } else {
        code.push(OP_VAL | RET_INT);
        code.push(i as u32);
    }
}

pub(crate) fn push_float_op(code: &mut Vec<u32>, f: f32) {
    let i = f as i32;
    if i as f32 == f && (-0x80_0000..=0x7F_FFFF).contains(&i) {
        code.push(OP_VALI | RET_FLOAT | ((i as u32) << 8));
    } else {
        code.push(OP_VAL | RET_FLOAT);
        code.push(f.to_bits());
    }
}

/// A one-value block, used when plain values are forced to code at runtime.
pub(crate) fn literal_block(push: impl FnOnce(&mut Vec<u32>)) -> CodeRef {
    let mut code = vec![OP_START];
    push(&mut code);
    code.push(OP_RESULT);
    code.push(OP_EXIT);
    CodeRef::from_vec(code, 1)
}

// ---- emitter ----

pub(crate) struct GenState<'cs> {
    pub cs: &'cs mut State,
    pub code: Vec<u32>,
    /// Whether scan offsets index the state's retained source buffer.
    track: bool,
}

impl<'cs> GenState<'cs> {
    fn error_at(&mut self, ofs: usize, msg: String) {
        if self.track {
            self.cs.debug_code_at(ofs, msg);
        } else {
            self.cs.debug_code(msg);
        }
    }

    fn gen_str(&mut self, word: &str, macro_: bool) {
        if word.len() <= 3 && !macro_ {
            let mut op = OP_VALI | RET_STR;
            for (i, &b) in word.as_bytes().iter().enumerate() {
                op |= (b as u32) << ((i + 1) * 8);
            }
            self.code.push(op);
            return;
        }
        self.code.push(
            (if macro_ { OP_MACRO } else { OP_VAL | RET_STR }) | ((word.len() as u32) << 8),
        );
        push_str_payload(&mut self.code, word.as_bytes());
    }

    fn gen_str_empty(&mut self) {
        self.code.push(OP_VALI | RET_STR);
    }

    fn gen_null(&mut self) {
        self.code.push(OP_VALI | RET_NULL);
    }

    fn gen_int(&mut self, i: i32) {
        push_int_op(&mut self.code, i);
    }

    fn gen_float(&mut self, f: f32) {
        push_float_op(&mut self.code, f);
    }

    fn gen_ident(&mut self, idx: usize) {
        self.code.push(
            (if idx < MAX_ARGUMENTS {
                OP_IDENT_ARG
            } else {
                OP_IDENT
            }) | ((idx as u32) << 8),
        );
    }

    fn gen_ident_name(&mut self, name: &str) {
        let idx = self.cs.new_ident(name, IDF_UNKNOWN);
        self.gen_ident(idx);
    }

    fn gen_dummy_ident(&mut self) {
        let idx = self.cs.dummy_idx();
        self.gen_ident(idx);
    }

    fn gen_value(&mut self, wt: WordType, word: &str) {
        match wt {
            WordType::CAny => {
                if !word.is_empty() {
                    self.gen_str(word, true);
                } else {
                    self.gen_null();
                }
            }
            WordType::CStr => self.gen_str(word, true),
            WordType::Any => {
                if !word.is_empty() {
                    self.gen_str(word, false);
                } else {
                    self.gen_null();
                }
            }
            WordType::Str => self.gen_str(word, false),
            WordType::Float => self.gen_float(parse_float(word)),
            WordType::Int => self.gen_int(parse_int(word)),
            WordType::Cond => {
                if !word.is_empty() {
                    compile_block_src(self, word, RET_NULL);
                } else {
                    self.gen_null();
                }
            }
            WordType::Code => compile_block_src(self, word, RET_NULL),
            WordType::Ident => self.gen_ident_name(word),
            _ => {}
        }
    }
}

fn compile_block_empty(gs: &mut GenState) {
    gs.code.push(OP_EMPTY);
}

/// Compiles statements at the scanner position into an inline sub-block.
fn compile_block_in(gs: &mut GenState, sc: &mut Scanner, rettype: u32, brak: u8) {
    let start = gs.code.len();
    gs.code.push(OP_BLOCK);
    gs.code.push(OP_OFFSET | (((start + 2) as u32) << 8));
    compile_statements(gs, sc, WordType::Any, brak, 0);
    if gs.code.len() > start + 2 {
        gs.code.push(OP_EXIT | rettype);
        gs.code[start] |= ((gs.code.len() - (start + 1)) as u32) << 8;
    } else {
        gs.code.truncate(start);
        gs.code.push(OP_EMPTY | rettype);
    }
}

/// Compiles a detached string into an inline sub-block.
fn compile_block_src(gs: &mut GenState, src: &str, rettype: u32) {
    let mut sc = Scanner::new(src);
    compile_block_in(gs, &mut sc, rettype, 0);
}

fn compile_unescape_str(gs: &mut GenState, sc: &mut Scanner, macro_: bool) {
    sc.advance();
    let start = sc.pos;
    let end = string_end(sc.src, sc.pos);
    sc.pos = end;
    let s = unescape_string(sc.text(start, end));
    if sc.cur() == b'"' {
        sc.advance();
    }
    gs.gen_str(&s, macro_);
}

// ---- `$` lookups ----

fn compile_lookup(gs: &mut GenState, sc: &mut Scanner, ltype: WordType, prevargs: i32) {
    sc.advance();
    let mut name: Option<String> = None;
    match sc.cur() {
        b'(' | b'[' => {
            if !compile_arg(gs, sc, WordType::CStr, prevargs, None) {
                return gen_lookup_invalid(gs, ltype);
            }
        }
        b'$' => compile_lookup(gs, sc, WordType::CStr, prevargs),
        b'"' => name = Some(cut_string(sc)),
        _ => match cut_word(sc) {
            Some((a, b)) => name = Some(sc.text(a, b).to_string()),
            None => return gen_lookup_invalid(gs, ltype),
        },
    }

    if let Some(name) = name {
        let idx = gs.cs.new_ident(&name, IDF_UNKNOWN);
        enum K {
            Ivar,
            Fvar,
            Svar,
            Alias,
            Command(String),
            Special,
        }
        let kind = {
            let sh = gs.cs.shared.borrow();
            match &sh.idents[idx].kind {
                IdentKind::Ivar(_) => K::Ivar,
                IdentKind::Fvar(_) => K::Fvar,
                IdentKind::Svar(_) => K::Svar,
                IdentKind::Alias(_) => K::Alias,
                IdentKind::Command(c) => {
                    if c.builtin == Builtin::None {
                        K::Command(c.argspec.to_string())
                    } else {
                        K::Special
                    }
                }
            }
        };
        let idxw = (idx as u32) << 8;
        match kind {
            K::Ivar => {
                gs.code.push(OP_IVAR | ret_code(ltype, RET_INT) | idxw);
                match ltype {
                    WordType::Pop => {
                        gs.code.pop();
                    }
                    WordType::Code => gs.code.push(OP_COMPILE),
                    WordType::Ident => gs.code.push(OP_IDENT_U),
                    _ => {}
                }
                return;
            }
            K::Fvar => {
                gs.code.push(OP_FVAR | ret_code(ltype, RET_FLOAT) | idxw);
                match ltype {
                    WordType::Pop => {
                        gs.code.pop();
                    }
                    WordType::Code => gs.code.push(OP_COMPILE),
                    WordType::Ident => gs.code.push(OP_IDENT_U),
                    _ => {}
                }
                return;
            }
            K::Svar => {
                match ltype {
                    WordType::Pop => return,
                    WordType::CAny
                    | WordType::CStr
                    | WordType::Code
                    | WordType::Ident
                    | WordType::Cond => gs.code.push(OP_SVAR_M | idxw),
                    _ => gs.code.push(OP_SVAR | ret_code(ltype, RET_STR) | idxw),
                }
                return gen_lookup_tail(gs, ltype);
            }
            K::Alias => {
                let arg = idx < MAX_ARGUMENTS;
                match ltype {
                    WordType::Pop => return,
                    WordType::CAny | WordType::Cond => gs.code.push(
                        (if arg { OP_LOOKUP_MARG } else { OP_LOOKUP_M }) | idxw,
                    ),
                    WordType::CStr | WordType::Code | WordType::Ident => gs.code.push(
                        (if arg { OP_LOOKUP_MARG } else { OP_LOOKUP_M }) | RET_STR | idxw,
                    ),
                    _ => gs.code.push(
                        (if arg { OP_LOOKUP_ARG } else { OP_LOOKUP })
                            | ret_code(ltype, RET_STR)
                            | idxw,
                    ),
                }
                return gen_lookup_tail(gs, ltype);
            }
            K::Command(spec) => {
                let mut comtype = OP_COM;
                let mut numargs = 0u32;
                let mut variadic = false;
                if prevargs >= MAX_RESULTS as i32 {
                    gs.code.push(OP_ENTER);
                }
                for ch in spec.bytes() {
                    match ch {
                        b'S' => {
                            gs.gen_str_empty();
                            numargs += 1;
                        }
                        b's' => {
                            gs.gen_str("", true);
                            numargs += 1;
                        }
                        b'i' => {
                            gs.gen_int(0);
                            numargs += 1;
                        }
                        b'b' => {
                            gs.gen_int(i32::MIN);
                            numargs += 1;
                        }
                        b'f' => {
                            gs.gen_float(0.0);
                            numargs += 1;
                        }
                        b'F' => {
                            gs.code.push(OP_DUP | RET_FLOAT);
                            numargs += 1;
                        }
                        b'E' | b'T' | b't' => {
                            gs.gen_null();
                            numargs += 1;
                        }
                        b'e' => {
                            compile_block_empty(gs);
                            numargs += 1;
                        }
                        b'r' => {
                            gs.gen_dummy_ident();
                            numargs += 1;
                        }
                        b'$' => {
                            gs.gen_ident(idx);
                            numargs += 1;
                        }
                        b'N' => {
                            gs.gen_int(-1);
                            numargs += 1;
                        }
                        b'C' => {
                            comtype = OP_COM_C;
                            variadic = true;
                            break;
                        }
                        b'V' => {
                            comtype = OP_COM_V;
                            variadic = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if variadic {
                    gs.code
                        .push(comtype | ret_code(ltype, 0) | (numargs << 8) | ((idx as u32) << 13));
                } else {
                    gs.code.push(comtype | ret_code(ltype, 0) | idxw);
                }
                gs.code.push(
                    (if prevargs >= MAX_RESULTS as i32 {
                        OP_EXIT
                    } else {
                        OP_RESULT_ARG
                    }) | ret_code(ltype, 0),
                );
                return gen_lookup_tail(gs, ltype);
            }
            K::Special => return gen_lookup_invalid(gs, ltype),
        }
    }

    // dynamic lookup of a value computed at runtime
    match ltype {
        WordType::CAny | WordType::Cond => gs.code.push(OP_LOOKUP_MU),
        WordType::CStr | WordType::Code | WordType::Ident => {
            gs.code.push(OP_LOOKUP_MU | RET_STR)
        }
        _ => gs.code.push(OP_LOOKUP_U | ret_code(ltype, 0)),
    }
    gen_lookup_tail(gs, ltype);
}

fn gen_lookup_tail(gs: &mut GenState, ltype: WordType) {
    match ltype {
        WordType::Pop => gs.code.push(OP_POP),
        WordType::Code => gs.code.push(OP_COMPILE),
        WordType::Cond => gs.code.push(OP_COND),
        WordType::Ident => gs.code.push(OP_IDENT_U),
        _ => {}
    }
}

fn gen_lookup_invalid(gs: &mut GenState, ltype: WordType) {
    match ltype {
        WordType::Pop => {}
        WordType::Null | WordType::Any | WordType::CAny | WordType::Word | WordType::Cond => {
            gs.gen_null()
        }
        _ => gs.gen_value(ltype, ""),
    }
}

// ---- `[...]` blocks ----

/// Copies bracket-block text verbatim, minus carriage returns and line
/// comments; quoted strings pass through untouched.
fn filter_block_text(seg: &str) -> Vec<u8> {
    let b = seg.as_bytes();
    let mut out = Vec::with_capacity(b.len());
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'\r' => i += 1,
            b'"' => {
                let end = string_end(b, i + 1);
                let end = if b.get(end) == Some(&b'"') { end + 1 } else { end };
                out.extend_from_slice(&b[i..end]);
                i = end;
            }
            b'/' if b.get(i + 1) == Some(&b'/') => {
                while i < b.len() && b[i] != b'\n' {
                    i += 1;
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

fn compile_blockstr(gs: &mut GenState, seg: &str, macro_: bool) -> bool {
    let bytes = filter_block_text(seg);
    gs.code.push(
        (if macro_ { OP_MACRO } else { OP_VAL | RET_STR }) | ((bytes.len() as u32) << 8),
    );
    push_str_payload(&mut gs.code, &bytes);
    true
}

/// One `@` interpolation inside a block: a lookup of a name, a parenthesised
/// expression or a nested block.
fn compile_blocksub(gs: &mut GenState, sc: &mut Scanner, prevargs: i32) -> bool {
    let mut name: Option<String> = None;
    match sc.cur() {
        b'(' => {
            if !compile_arg(gs, sc, WordType::CAny, prevargs, None) {
                return false;
            }
        }
        b'[' => {
            if !compile_arg(gs, sc, WordType::CStr, prevargs, None) {
                return false;
            }
            gs.code.push(OP_LOOKUP_MU);
        }
        b'"' => name = Some(cut_string(sc)),
        _ => {
            let start = sc.pos;
            while sc.cur().is_ascii_alphanumeric() || sc.cur() == b'_' {
                sc.advance();
            }
            if sc.pos == start {
                return false;
            }
            name = Some(sc.text(start, sc.pos).to_string());
        }
    }
    if let Some(name) = name {
        let idx = gs.cs.new_ident(&name, IDF_UNKNOWN);
        let idxw = (idx as u32) << 8;
        enum K {
            Ivar,
            Fvar,
            Svar,
            Alias,
            Other,
        }
        let kind = {
            let sh = gs.cs.shared.borrow();
            match &sh.idents[idx].kind {
                IdentKind::Ivar(_) => K::Ivar,
                IdentKind::Fvar(_) => K::Fvar,
                IdentKind::Svar(_) => K::Svar,
                IdentKind::Alias(_) => K::Alias,
                IdentKind::Command(_) => K::Other,
            }
        };
        match kind {
            K::Ivar => gs.code.push(OP_IVAR | idxw),
            K::Fvar => gs.code.push(OP_FVAR | idxw),
            K::Svar => gs.code.push(OP_SVAR_M | idxw),
            K::Alias => gs.code.push(
                (if idx < MAX_ARGUMENTS {
                    OP_LOOKUP_MARG
                } else {
                    OP_LOOKUP_M
                }) | idxw,
            ),
            K::Other => {
                gs.gen_str(&name, true);
                gs.code.push(OP_LOOKUP_MU);
            }
        }
    }
    true
}

fn compile_blockmain(gs: &mut GenState, sc: &mut Scanner, wt: WordType, prevargs: i32) {
    let line = sc.pos;
    let mut start = sc.pos;
    let mut concs: i32 = 0;
    let mut brak = 1i32;
    let seg_end;
    loop {
        sc.skip_until(b"@\"/[]");
        let c = sc.cur();
        if c == 0 {
            gs.error_at(line, "missing \"]\"".to_string());
            seg_end = sc.pos;
            break;
        }
        sc.advance();
        match c {
            b'"' => {
                sc.pos = string_end(sc.src, sc.pos);
                if sc.cur() == b'"' {
                    sc.advance();
                }
            }
            b'/' => {
                if sc.cur() == b'/' {
                    sc.skip_line();
                }
            }
            b'[' => brak += 1,
            b']' => {
                brak -= 1;
                if brak == 0 {
                    seg_end = sc.pos - 1;
                    break;
                }
            }
            b'@' => {
                let esc = sc.pos;
                while sc.cur() == b'@' {
                    sc.advance();
                }
                let level = (sc.pos - (esc - 1)) as i32;
                if brak > level {
                    continue;
                } else if brak < level {
                    gs.error_at(line, "too many @s".to_string());
                }
                if concs == 0 && prevargs >= MAX_RESULTS as i32 {
                    gs.code.push(OP_ENTER);
                }
                if concs + 2 > MAX_ARGUMENTS as i32 {
                    gs.code
                        .push(OP_CONC_W | RET_STR | ((concs as u32) << 8));
                    concs = 1;
                }
                let seg = sc.text(start, esc - 1).to_string();
                if compile_blockstr(gs, &seg, true) {
                    concs += 1;
                }
                if compile_blocksub(gs, sc, prevargs + concs) {
                    concs += 1;
                }
                if concs > 0 {
                    start = sc.pos;
                } else if prevargs >= MAX_RESULTS as i32 {
                    gs.code.pop();
                }
            }
            _ => {}
        }
    }

    let has_text = seg_end > start;
    if has_text {
        if concs == 0 {
            match wt {
                WordType::Pop => return,
                WordType::Code | WordType::Cond => {
                    let mut sub = Scanner {
                        src: sc.src,
                        pos: start,
                    };
                    compile_block_in(gs, &mut sub, RET_NULL, b']');
                    return;
                }
                WordType::Ident => {
                    let name = sc.text(start, seg_end).to_string();
                    gs.gen_ident_name(&name);
                    return;
                }
                _ => {}
            }
        }
        let seg = sc.text(start, seg_end).to_string();
        match wt {
            WordType::CStr
            | WordType::Code
            | WordType::Ident
            | WordType::CAny
            | WordType::Cond => {
                compile_blockstr(gs, &seg, true);
            }
            _ => {
                compile_blockstr(gs, &seg, concs > 0);
            }
        }
        if concs > 1 {
            concs += 1;
        }
    }
    if concs > 0 {
        if prevargs >= MAX_RESULTS as i32 {
            gs.code
                .push(OP_CONC_M | ret_code(wt, 0) | ((concs as u32) << 8));
            gs.code.push(OP_EXIT | ret_code(wt, 0));
        } else {
            gs.code
                .push(OP_CONC_W | ret_code(wt, 0) | ((concs as u32) << 8));
        }
    }
    match wt {
        WordType::Pop => {
            if concs > 0 || has_text {
                gs.code.push(OP_POP);
            }
        }
        WordType::Cond => {
            if concs == 0 && !has_text {
                gs.gen_null();
            } else {
                gs.code.push(OP_COND);
            }
        }
        WordType::Code => {
            if concs == 0 && !has_text {
                compile_block_empty(gs);
            } else {
                gs.code.push(OP_COMPILE);
            }
        }
        WordType::Ident => {
            if concs == 0 && !has_text {
                gs.gen_dummy_ident();
            } else {
                gs.code.push(OP_IDENT_U);
            }
        }
        WordType::CStr | WordType::CAny => {
            if concs == 0 && !has_text {
                gs.gen_str("", true);
            }
        }
        WordType::Str | WordType::Null | WordType::Any | WordType::Word => {
            if concs == 0 && !has_text {
                gs.gen_str_empty();
            }
        }
        _ => {
            if concs == 0 {
                if !has_text {
                    gs.gen_value(wt, "");
                } else {
                    gs.code.push(OP_FORCE | ret_code(wt, 0));
                }
            }
        }
    }
}

// ---- arguments ----

fn compile_arg(
    gs: &mut GenState,
    sc: &mut Scanner,
    wt: WordType,
    prevargs: i32,
    word: Option<&mut Option<String>>,
) -> bool {
    skip_comments(sc);
    match sc.cur() {
        b'"' => {
            match wt {
                WordType::Pop => {
                    sc.advance();
                    sc.pos = string_end(sc.src, sc.pos);
                    if sc.cur() == b'"' {
                        sc.advance();
                    }
                }
                WordType::Cond => {
                    let s = cut_string(sc);
                    if !s.is_empty() {
                        compile_block_src(gs, &s, RET_NULL);
                    } else {
                        gs.gen_null();
                    }
                }
                WordType::Code => {
                    let s = cut_string(sc);
                    compile_block_src(gs, &s, RET_NULL);
                }
                WordType::Word => {
                    let s = cut_string(sc);
                    if let Some(w) = word {
                        *w = Some(s);
                    }
                }
                WordType::Any | WordType::Str => compile_unescape_str(gs, sc, false),
                WordType::CAny | WordType::CStr => compile_unescape_str(gs, sc, true),
                _ => {
                    let s = cut_string(sc);
                    gs.gen_value(wt, &s);
                }
            }
            true
        }
        b'$' => {
            compile_lookup(gs, sc, wt, prevargs);
            true
        }
        b'(' => {
            sc.advance();
            if prevargs >= MAX_RESULTS as i32 {
                gs.code.push(OP_ENTER);
                compile_statements(gs, sc, paren_inner(wt), b')', 0);
                gs.code.push(OP_EXIT | ret_code(wt, 0));
            } else {
                let start = gs.code.len();
                compile_statements(gs, sc, paren_inner(wt), b')', prevargs);
                if gs.code.len() > start {
                    gs.code.push(OP_RESULT_ARG | ret_code(wt, 0));
                } else {
                    gs.gen_value(wt, "");
                    return true;
                }
            }
            match wt {
                WordType::Pop => gs.code.push(OP_POP),
                WordType::Cond => gs.code.push(OP_COND),
                WordType::Code => gs.code.push(OP_COMPILE),
                WordType::Ident => gs.code.push(OP_IDENT_U),
                _ => {}
            }
            true
        }
        b'[' => {
            sc.advance();
            compile_blockmain(gs, sc, wt, prevargs);
            true
        }
        _ => match wt {
            WordType::Pop => {
                let start = sc.pos;
                sc.pos = word_end(sc.src, sc.pos);
                sc.pos != start
            }
            WordType::Cond | WordType::Code => match cut_word(sc) {
                None => false,
                Some((a, b)) => {
                    let s = sc.text(a, b).to_string();
                    compile_block_src(gs, &s, RET_NULL);
                    true
                }
            },
            WordType::Word => match cut_word(sc) {
                None => false,
                Some((a, b)) => {
                    if let Some(w) = word {
                        *w = Some(sc.text(a, b).to_string());
                    }
                    true
                }
            },
            _ => match cut_word(sc) {
                None => false,
                Some((a, b)) => {
                    let s = sc.text(a, b).to_string();
                    gs.gen_value(wt, &s);
                    true
                }
            },
        },
    }
}

// ---- statements ----

/// What a statement-position name resolved to, snapshotted so the table
/// borrow is released before emission continues.
enum StmtTarget {
    Alias(usize),
    Ivar(usize, bool),
    Fvar(usize),
    Svar(usize),
    Command(usize, String),
    Special(usize, Builtin),
}

fn stmt_target(cs: &State, name: &str) -> Option<StmtTarget> {
    let idx = cs.ident_index(name)?;
    Some(stmt_target_idx(cs, idx))
}

fn stmt_target_idx(cs: &State, idx: usize) -> StmtTarget {
    let sh = cs.shared.borrow();
    match &sh.idents[idx].kind {
        IdentKind::Alias(_) => StmtTarget::Alias(idx),
        IdentKind::Ivar(_) => StmtTarget::Ivar(idx, sh.idents[idx].flags & IDF_HEX != 0),
        IdentKind::Fvar(_) => StmtTarget::Fvar(idx),
        IdentKind::Svar(_) => StmtTarget::Svar(idx),
        IdentKind::Command(c) => {
            if c.builtin == Builtin::None {
                StmtTarget::Command(idx, c.argspec.to_string())
            } else {
                StmtTarget::Special(idx, c.builtin)
            }
        }
    }
}

pub(crate) fn compile_statements(
    gs: &mut GenState,
    sc: &mut Scanner,
    rettype: WordType,
    brak: u8,
    prevargs: i32,
) {
    loop {
        skip_comments(sc);
        let line = sc.pos;
        let mut idname: Option<String> = None;
        let mut more = compile_arg(gs, sc, WordType::Word, prevargs, Some(&mut idname));
        if more {
            skip_comments(sc);
            if sc.cur() == b'=' && assign_follows(sc) {
                sc.advance();
                more = compile_assignment(gs, sc, idname.take(), prevargs);
            } else {
                more = compile_call(gs, sc, idname.take(), rettype, prevargs, more);
            }
        }
        // statement end: drop extra arguments, then find the terminator
        loop {
            if more {
                while compile_arg(gs, sc, WordType::Pop, MAX_RESULTS as i32, None) {}
                more = false;
            }
            sc.skip_until(b")];/\n");
            let c = sc.cur();
            match c {
                0 => {
                    if brak != 0 {
                        gs.error_at(line, format!("missing \"{}\"", brak as char));
                    }
                    return;
                }
                b')' | b']' => {
                    sc.advance();
                    if c == brak {
                        return;
                    }
                    gs.error_at(line, format!("unexpected \"{}\"", c as char));
                    break;
                }
                b'/' => {
                    sc.advance();
                    if sc.cur() == b'/' {
                        sc.skip_line();
                    }
                    continue;
                }
                _ => {
                    sc.advance();
                    break;
                }
            }
        }
    }
}

/// `name = value` is an assignment when `=` is followed by whitespace, a
/// terminator or a comment.
fn assign_follows(sc: &Scanner) -> bool {
    match sc.peek(1) {
        b';' | b' ' | b'\t' | b'\r' | b'\n' | 0 => true,
        b'/' => sc.peek(2) == b'/',
        _ => false,
    }
}

fn compile_assignment(
    gs: &mut GenState,
    sc: &mut Scanner,
    idname: Option<String>,
    prevargs: i32,
) -> bool {
    let mut more;
    if let Some(name) = idname {
        let idx = gs.cs.new_ident(&name, IDF_UNKNOWN);
        match stmt_target_idx(gs.cs, idx) {
            StmtTarget::Alias(idx) => {
                more = compile_arg(gs, sc, WordType::Any, prevargs, None);
                if !more {
                    gs.gen_str_empty();
                }
                gs.code.push(
                    (if idx < MAX_ARGUMENTS {
                        OP_ALIAS_ARG
                    } else {
                        OP_ALIAS
                    }) | ((idx as u32) << 8),
                );
                return more;
            }
            StmtTarget::Ivar(idx, _) => {
                more = compile_arg(gs, sc, WordType::Int, prevargs, None);
                if !more {
                    gs.gen_int(0);
                }
                gs.code.push(OP_IVAR1 | ((idx as u32) << 8));
                return more;
            }
            StmtTarget::Fvar(idx) => {
                more = compile_arg(gs, sc, WordType::Float, prevargs, None);
                if !more {
                    gs.gen_float(0.0);
                }
                gs.code.push(OP_FVAR1 | ((idx as u32) << 8));
                return more;
            }
            StmtTarget::Svar(idx) => {
                more = compile_arg(gs, sc, WordType::CStr, prevargs, None);
                if !more {
                    gs.gen_str_empty();
                }
                gs.code.push(OP_SVAR1 | ((idx as u32) << 8));
                return more;
            }
            _ => {
                gs.gen_str(&name, true);
            }
        }
    }
    more = compile_arg(gs, sc, WordType::Any, MAX_RESULTS as i32, None);
    if !more {
        gs.gen_str_empty();
    }
    gs.code.push(OP_ALIAS_U);
    more
}

fn compile_call(
    gs: &mut GenState,
    sc: &mut Scanner,
    idname: Option<String>,
    rettype: WordType,
    prevargs: i32,
    more_in: bool,
) -> bool {
    let mut more = more_in;
    let mut numargs: i32 = 0;
    let Some(name) = idname else {
        // statement began with a non-word (string, block...): dynamic call
        while numargs < MAX_ARGUMENTS as i32 {
            more = compile_arg(gs, sc, WordType::CAny, prevargs + numargs, None);
            if !more {
                break;
            }
            numargs += 1;
        }
        gs.code.push(OP_CALL_U | ((numargs as u32) << 8));
        return more;
    };
    match stmt_target(gs.cs, &name) {
        None => {
            if crate::ident::valid_name(&name) {
                gs.gen_str(&name, true);
                while numargs < MAX_ARGUMENTS as i32 {
                    more = compile_arg(gs, sc, WordType::CAny, prevargs + numargs, None);
                    if !more {
                        break;
                    }
                    numargs += 1;
                }
                gs.code.push(OP_CALL_U | ((numargs as u32) << 8));
            } else {
                // a numeric statement is its own result
                match rettype {
                    WordType::Any | WordType::CAny => {
                        let (val, end) = parse_int_prefix(&name);
                        if end < name.len() {
                            gs.gen_str(&name, rettype == WordType::CAny);
                        } else {
                            gs.gen_int(val);
                        }
                    }
                    _ => gs.gen_value(rettype, &name),
                }
                gs.code.push(OP_RESULT);
            }
            more
        }
        Some(StmtTarget::Alias(idx)) => {
            while numargs < MAX_ARGUMENTS as i32 {
                more = compile_arg(gs, sc, WordType::Any, prevargs + numargs, None);
                if !more {
                    break;
                }
                numargs += 1;
            }
            gs.code.push(
                (if idx < MAX_ARGUMENTS {
                    OP_CALL_ARG
                } else {
                    OP_CALL
                }) | ((numargs as u32) << 8)
                    | ((idx as u32) << 13),
            );
            more
        }
        Some(StmtTarget::Command(idx, spec)) => {
            compile_command_call(gs, sc, idx, &spec, rettype, prevargs, more)
        }
        Some(StmtTarget::Special(idx, builtin)) => {
            compile_special(gs, sc, idx, builtin, rettype, prevargs, more)
        }
        Some(StmtTarget::Ivar(idx, hex)) => {
            more = compile_arg(gs, sc, WordType::Int, prevargs, None);
            if !more {
                gs.code.push(OP_PRINT | ((idx as u32) << 8));
                return more;
            }
            if hex {
                more = compile_arg(gs, sc, WordType::Int, prevargs + 1, None);
            }
            if !hex || !more {
                gs.code.push(OP_IVAR1 | ((idx as u32) << 8));
                return more;
            }
            more = compile_arg(gs, sc, WordType::Int, prevargs + 2, None);
            if !more {
                gs.code.push(OP_IVAR2 | ((idx as u32) << 8));
            } else {
                gs.code.push(OP_IVAR3 | ((idx as u32) << 8));
            }
            more
        }
        Some(StmtTarget::Fvar(idx)) => {
            more = compile_arg(gs, sc, WordType::Float, prevargs, None);
            if !more {
                gs.code.push(OP_PRINT | ((idx as u32) << 8));
            } else {
                gs.code.push(OP_FVAR1 | ((idx as u32) << 8));
            }
            more
        }
        Some(StmtTarget::Svar(idx)) => {
            more = compile_arg(gs, sc, WordType::CStr, prevargs, None);
            if !more {
                gs.code.push(OP_PRINT | ((idx as u32) << 8));
            } else {
                loop {
                    numargs += 1;
                    if numargs >= MAX_ARGUMENTS as i32 {
                        break;
                    }
                    more = compile_arg(gs, sc, WordType::CAny, prevargs + numargs, None);
                    if !more {
                        break;
                    }
                }
                if numargs > 1 {
                    gs.code
                        .push(OP_CONC | RET_STR | ((numargs as u32) << 8));
                }
                gs.code.push(OP_SVAR1 | ((idx as u32) << 8));
            }
            more
        }
    }
}

fn compile_command_call(
    gs: &mut GenState,
    sc: &mut Scanner,
    idx: usize,
    spec: &str,
    rettype: WordType,
    prevargs: i32,
    more_in: bool,
) -> bool {
    let mut more = more_in;
    let mut comtype = OP_COM;
    let mut fakeargs: i32 = 0;
    let mut numargs: i32 = 0;
    let mut rep = false;
    let mut variadic = false;
    let b = spec.as_bytes();
    let mut k = 0usize;
    while k < b.len() {
        match b[k] {
            c @ (b'S' | b's') => {
                let m = c == b's';
                if more {
                    more = compile_arg(
                        gs,
                        sc,
                        if m { WordType::CStr } else { WordType::Str },
                        prevargs + numargs,
                        None,
                    );
                }
                if !more {
                    if rep {
                        k += 1;
                        continue;
                    }
                    gs.gen_str("", m);
                    fakeargs += 1;
                } else if k + 1 == b.len() {
                    let mut numconc: i32 = 1;
                    while numargs + numconc < MAX_ARGUMENTS as i32 {
                        more =
                            compile_arg(gs, sc, WordType::CStr, prevargs + numargs + numconc, None);
                        if !more {
                            break;
                        }
                        numconc += 1;
                    }
                    if numconc > 1 {
                        gs.code
                            .push(OP_CONC | RET_STR | ((numconc as u32) << 8));
                    }
                }
                numargs += 1;
            }
            b'i' => {
                if more {
                    more = compile_arg(gs, sc, WordType::Int, prevargs + numargs, None);
                }
                if !more {
                    if rep {
                        k += 1;
                        continue;
                    }
                    gs.gen_int(0);
                    fakeargs += 1;
                }
                numargs += 1;
            }
            b'b' => {
                if more {
                    more = compile_arg(gs, sc, WordType::Int, prevargs + numargs, None);
                }
                if !more {
                    if rep {
                        k += 1;
                        continue;
                    }
                    gs.gen_int(i32::MIN);
                    fakeargs += 1;
                }
                numargs += 1;
            }
            b'f' => {
                if more {
                    more = compile_arg(gs, sc, WordType::Float, prevargs + numargs, None);
                }
                if !more {
                    if rep {
                        k += 1;
                        continue;
                    }
                    gs.gen_float(0.0);
                    fakeargs += 1;
                }
                numargs += 1;
            }
            b'F' => {
                if more {
                    more = compile_arg(gs, sc, WordType::Float, prevargs + numargs, None);
                }
                if !more {
                    if rep {
                        k += 1;
                        continue;
                    }
                    gs.code.push(OP_DUP | RET_FLOAT);
                    fakeargs += 1;
                }
                numargs += 1;
            }
            c @ (b'T' | b't') => {
                if more {
                    more = compile_arg(
                        gs,
                        sc,
                        if c == b't' {
                            WordType::CAny
                        } else {
                            WordType::Any
                        },
                        prevargs + numargs,
                        None,
                    );
                }
                if !more {
                    if rep {
                        k += 1;
                        continue;
                    }
                    gs.gen_null();
                    fakeargs += 1;
                }
                numargs += 1;
            }
            b'E' => {
                if more {
                    more = compile_arg(gs, sc, WordType::Cond, prevargs + numargs, None);
                }
                if !more {
                    if rep {
                        k += 1;
                        continue;
                    }
                    gs.gen_null();
                    fakeargs += 1;
                }
                numargs += 1;
            }
            b'e' => {
                if more {
                    more = compile_arg(gs, sc, WordType::Code, prevargs + numargs, None);
                }
                if !more {
                    if rep {
                        k += 1;
                        continue;
                    }
                    compile_block_empty(gs);
                    fakeargs += 1;
                }
                numargs += 1;
            }
            b'r' => {
                if more {
                    more = compile_arg(gs, sc, WordType::Ident, prevargs + numargs, None);
                }
                if !more {
                    if rep {
                        k += 1;
                        continue;
                    }
                    gs.gen_dummy_ident();
                    fakeargs += 1;
                }
                numargs += 1;
            }
            b'$' => {
                gs.gen_ident(idx);
                numargs += 1;
            }
            b'N' => {
                gs.gen_int(numargs - fakeargs);
                numargs += 1;
            }
            b'C' => {
                comtype = OP_COM_C;
                if more {
                    while numargs < MAX_ARGUMENTS as i32 {
                        more = compile_arg(gs, sc, WordType::CAny, prevargs + numargs, None);
                        if !more {
                            break;
                        }
                        numargs += 1;
                    }
                }
                variadic = true;
                break;
            }
            b'V' => {
                comtype = OP_COM_V;
                if more {
                    while numargs < MAX_ARGUMENTS as i32 {
                        more = compile_arg(gs, sc, WordType::CAny, prevargs + numargs, None);
                        if !more {
                            break;
                        }
                        numargs += 1;
                    }
                }
                variadic = true;
                break;
            }
            c @ b'1'..=b'4' => {
                if more && numargs < MAX_ARGUMENTS as i32 {
                    let d = (c - b'0') as usize;
                    k = k.saturating_sub(d);
                    rep = true;
                    continue;
                }
                while numargs > MAX_ARGUMENTS as i32 {
                    gs.code.push(OP_POP);
                    numargs -= 1;
                }
            }
            _ => {}
        }
        k += 1;
    }
    if variadic {
        gs.code.push(
            comtype | ret_code(rettype, 0) | ((numargs as u32) << 8) | ((idx as u32) << 13),
        );
    } else {
        gs.code
            .push(comtype | ret_code(rettype, 0) | ((idx as u32) << 8));
    }
    more
}

fn compile_special(
    gs: &mut GenState,
    sc: &mut Scanner,
    idx: usize,
    builtin: Builtin,
    rettype: WordType,
    prevargs: i32,
    more_in: bool,
) -> bool {
    let mut more = more_in;
    let mut numargs: i32 = 0;
    match builtin {
        Builtin::Local => {
            if more {
                while numargs < MAX_ARGUMENTS as i32 {
                    more = compile_arg(gs, sc, WordType::Ident, prevargs + numargs, None);
                    if !more {
                        break;
                    }
                    numargs += 1;
                }
            }
            if more {
                while compile_arg(gs, sc, WordType::Pop, MAX_RESULTS as i32, None) {}
                more = false;
            }
            gs.code.push(OP_LOCAL | ((numargs as u32) << 8));
            more
        }
        Builtin::Do => {
            if more {
                more = compile_arg(gs, sc, WordType::Code, prevargs, None);
            }
            gs.code
                .push((if more { OP_DO } else { OP_NULL }) | ret_code(rettype, 0));
            more
        }
        Builtin::DoArgs => {
            if more {
                more = compile_arg(gs, sc, WordType::Code, prevargs, None);
            }
            gs.code
                .push((if more { OP_DO_ARGS } else { OP_NULL }) | ret_code(rettype, 0));
            more
        }
        Builtin::Result => {
            if more {
                more = compile_arg(gs, sc, WordType::Any, prevargs, None);
            }
            gs.code
                .push((if more { OP_RESULT } else { OP_NULL }) | ret_code(rettype, 0));
            more
        }
        Builtin::Not => {
            if more {
                more = compile_arg(gs, sc, WordType::CAny, prevargs, None);
            }
            gs.code
                .push((if more { OP_NOT } else { OP_TRUE }) | ret_code(rettype, 0));
            more
        }
        Builtin::If => compile_if(gs, sc, idx, rettype, prevargs, more),
        Builtin::And | Builtin::Or => {
            compile_and_or(gs, sc, idx, builtin, rettype, prevargs, more)
        }
        Builtin::None => more,
    }
}

/// `if` over literal blocks becomes a jump chain instead of a command call.
fn compile_if(
    gs: &mut GenState,
    sc: &mut Scanner,
    idx: usize,
    rettype: WordType,
    prevargs: i32,
    more_in: bool,
) -> bool {
    let mut more = more_in;
    if more {
        more = compile_arg(gs, sc, WordType::CAny, prevargs, None);
    }
    if !more {
        gs.code.push(OP_NULL | ret_code(rettype, 0));
        return more;
    }
    let start1 = gs.code.len();
    more = compile_arg(gs, sc, WordType::Code, prevargs + 1, None);
    if !more {
        gs.code.push(OP_POP);
        gs.code.push(OP_NULL | ret_code(rettype, 0));
        return more;
    }
    let start2 = gs.code.len();
    more = compile_arg(gs, sc, WordType::Code, prevargs + 2, None);
    let inst1 = gs.code[start1];
    let op1 = inst1 & !RET_MASK;
    let len1 = (start2 - (start1 + 1)) as u32;
    if !more {
        if op1 == (OP_BLOCK | (len1 << 8)) {
            gs.code[start1] = (len1 << 8) | OP_JUMP_FALSE;
            gs.code[start1 + 1] = OP_ENTER_RESULT;
            let e = start1 + len1 as usize;
            gs.code[e] = (gs.code[e] & !RET_MASK) | ret_code(rettype, 0);
            return more;
        }
        compile_block_empty(gs);
    } else {
        let inst2 = gs.code[start2];
        let op2 = inst2 & !RET_MASK;
        let len2 = (gs.code.len() - (start2 + 1)) as u32;
        if op2 == (OP_BLOCK | (len2 << 8)) {
            if op1 == (OP_BLOCK | (len1 << 8)) {
                gs.code[start1] = (((start2 - start1) as u32) << 8) | OP_JUMP_FALSE;
                gs.code[start1 + 1] = OP_ENTER_RESULT;
                let e1 = start1 + len1 as usize;
                gs.code[e1] = (gs.code[e1] & !RET_MASK) | ret_code(rettype, 0);
                gs.code[start2] = (len2 << 8) | OP_JUMP;
                gs.code[start2 + 1] = OP_ENTER_RESULT;
                let e2 = start2 + len2 as usize;
                gs.code[e2] = (gs.code[e2] & !RET_MASK) | ret_code(rettype, 0);
                return more;
            } else if op1 == OP_EMPTY {
                gs.code[start1] = OP_NULL | (inst2 & RET_MASK);
                gs.code[start2] = (len2 << 8) | OP_JUMP_TRUE;
                gs.code[start2 + 1] = OP_ENTER_RESULT;
                let e2 = start2 + len2 as usize;
                gs.code[e2] = (gs.code[e2] & !RET_MASK) | ret_code(rettype, 0);
                return more;
            }
        }
    }
    gs.code
        .push(OP_COM | ret_code(rettype, 0) | ((idx as u32) << 8));
    more
}

/// `&&` / `||` over literal blocks become short-circuit jump chains that
/// evaluate each block into the result slot.
fn compile_and_or(
    gs: &mut GenState,
    sc: &mut Scanner,
    idx: usize,
    builtin: Builtin,
    rettype: WordType,
    prevargs: i32,
    more_in: bool,
) -> bool {
    let mut more = more_in;
    let mut numargs: i32 = 0;
    if more {
        more = compile_arg(gs, sc, WordType::Cond, prevargs, None);
    }
    if !more {
        gs.code.push(
            (if builtin == Builtin::And {
                OP_TRUE
            } else {
                OP_FALSE
            }) | ret_code(rettype, 0),
        );
        return more;
    }
    numargs += 1;
    let mut start = gs.code.len();
    let mut end = start;
    while numargs < MAX_ARGUMENTS as i32 {
        more = compile_arg(gs, sc, WordType::Cond, prevargs + numargs, None);
        if !more {
            break;
        }
        numargs += 1;
        if (gs.code[end] & !RET_MASK)
            != (OP_BLOCK | (((gs.code.len() - (end + 1)) as u32) << 8))
        {
            break;
        }
        end = gs.code.len();
    }
    if more {
        while numargs < MAX_ARGUMENTS as i32 {
            more = compile_arg(gs, sc, WordType::Cond, prevargs + numargs, None);
            if !more {
                break;
            }
            numargs += 1;
        }
        gs.code.push(
            OP_COM_V | ret_code(rettype, 0) | ((numargs as u32) << 8) | ((idx as u32) << 13),
        );
    } else {
        let op = if builtin == Builtin::And {
            OP_JUMP_RESULT_FALSE
        } else {
            OP_JUMP_RESULT_TRUE
        };
        gs.code.push(op);
        end = gs.code.len();
        while start + 1 < end {
            let len = (gs.code[start] >> 8) as usize;
            gs.code[start] = (((end - (start + 1)) as u32) << 8) | op;
            gs.code[start + 1] = OP_ENTER;
            gs.code[start + len] = (gs.code[start + len] & !RET_MASK) | ret_code(rettype, 0);
            start += len + 1;
        }
    }
    more
}

// ---- entry points ----

fn gen_main(gs: &mut GenState, sc: &mut Scanner, ret: u32) {
    gs.code.push(OP_START);
    compile_statements(gs, sc, WordType::Any, 0, 0);
    gs.code.push(OP_EXIT | ret);
}

impl State {
    /// Compiles a source string for deferred execution.
    pub fn compile(&mut self, src: &str) -> CodeRef {
        self.compile_tagged(src, 0, false)
    }

    pub(crate) fn compile_tagged(&mut self, src: &str, ret: u32, track: bool) -> CodeRef {
        let mut gs = GenState {
            cs: self,
            code: Vec::with_capacity(64),
            track,
        };
        let mut sc = Scanner::new(src);
        gen_main(&mut gs, &mut sc, ret);
        CodeRef::from_vec(gs.code, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_round_trip() {
        assert_eq!(unescape_string("a^nb"), "a\nb");
        assert_eq!(unescape_string("a^tb"), "a\tb");
        assert_eq!(unescape_string("say ^\"hi^\""), "say \"hi\"");
        assert_eq!(unescape_string("caret ^^"), "caret ^");
        assert_eq!(unescape_string("split\\\nline"), "splitline");
        assert_eq!(escape_string("a\nb"), "\"a^nb\"");
        assert_eq!(escape_string("say \"hi\""), "\"say ^\"hi^\"\"");
        assert_eq!(unescape_string(&escape_string("x\ty\nz")[1..8]), "x\ty\nz");
    }

    #[test]
    fn word_scanning() {
        let src = b"hello world";
        assert_eq!(word_end(src, 0), 5);
        let src = b"[a b] tail";
        assert_eq!(word_end(src, 0), 5);
        let src = b"(nested (x)) rest";
        assert_eq!(word_end(src, 0), 12);
        let src = b"semi;colon";
        assert_eq!(word_end(src, 0), 4);
    }

    #[test]
    fn string_scanning() {
        let src = b"plain\" tail";
        assert_eq!(string_end(src, 0), 5);
        let src = b"esc^\" more\" x";
        assert_eq!(string_end(src, 0), 10);
        let src = b"unterminated";
        assert_eq!(string_end(src, 0), 12);
    }

    #[test]
    fn block_text_filtering() {
        assert_eq!(filter_block_text("a b"), b"a b");
        assert_eq!(filter_block_text("a // gone\nb"), b"a \nb");
        assert_eq!(filter_block_text("keep \"// kept\" x"), b"keep \"// kept\" x");
        assert_eq!(filter_block_text("cr\r\nlf"), b"cr\nlf");
    }
}
