//! Initializer parsing and lowering.
//!
//! An initializer is first built as a tree mirroring the initialized type;
//! designators (`[k]`, `[k ... m]`, `.field`) move the cursor within it.
//! For locals the tree is lowered to a `MemZero` over the object followed
//! by a chain of ordinary assignments; for globals it is serialized into a
//! byte image plus a relocation list.

use crate::common::error::CResult;
use crate::common::session::{ObjId, Relocation};
use crate::common::types::{Member, TypeId, TypeKind};
use crate::common::long_double::f64_to_x87_bytes;
use crate::frontend::lexer::token::{Loc, Token, TokenKind};
use crate::frontend::parser::ast::{Expr, ExprKind};
use crate::frontend::parser::const_eval;
use crate::frontend::parser::parser::Parser;

/// A tree mirroring the initialized type. Each leaf holds an expression;
/// a union additionally records which member was selected.
#[derive(Debug)]
pub(super) struct Initializer {
    pub ty: TypeId,
    /// An incomplete array (or trailing flexible member) whose length is
    /// fixed by the initializer itself.
    pub is_flexible: bool,
    pub expr: Option<Expr>,
    pub children: Vec<Initializer>,
    /// Selected member index, for unions.
    pub mem: Option<usize>,
}

impl<'a> Parser<'a> {
    fn new_initializer(&mut self, ty: TypeId, is_flexible: bool) -> Initializer {
        match self.sess.types.kind(ty).clone() {
            TypeKind::Array { base, len } => {
                if is_flexible && self.sess.types.size(ty) < 0 {
                    return Initializer {
                        ty,
                        is_flexible: true,
                        expr: None,
                        children: Vec::new(),
                        mem: None,
                    };
                }
                let n = len.max(0) as usize;
                let children = (0..n).map(|_| self.new_initializer(base, false)).collect();
                Initializer {
                    ty,
                    is_flexible: false,
                    expr: None,
                    children,
                    mem: None,
                }
            }
            TypeKind::Struct { members, .. } => {
                let flexible = is_flexible && {
                    matches!(
                        self.sess.types.kind(ty),
                        TypeKind::Struct {
                            is_flexible: true,
                            ..
                        }
                    )
                };
                let n = members.len();
                let mut children = Vec::with_capacity(n);
                for (i, mem) in members.iter().enumerate() {
                    if flexible && i == n - 1 {
                        children.push(Initializer {
                            ty: mem.ty,
                            is_flexible: true,
                            expr: None,
                            children: Vec::new(),
                            mem: None,
                        });
                    } else {
                        children.push(self.new_initializer(mem.ty, false));
                    }
                }
                Initializer {
                    ty,
                    is_flexible: false,
                    expr: None,
                    children,
                    mem: None,
                }
            }
            _ => Initializer {
                ty,
                is_flexible: false,
                expr: None,
                children: Vec::new(),
                mem: None,
            },
        }
    }

    fn is_end(&self) -> bool {
        self.equal("}") || (self.equal(",") && self.peek(1).is("}"))
    }

    /// Consume a (possibly parenthesized) string literal token.
    fn take_str_tok(&mut self) -> Option<Token> {
        if self.equal("(") {
            let save = self.pos;
            self.advance();
            if let Some(t) = self.take_str_tok() {
                if self.consume(")") {
                    return Some(t);
                }
            }
            self.pos = save;
            return None;
        }
        if self.tok().kind == TokenKind::Str {
            return Some(self.advance());
        }
        None
    }

    fn skip_excess_element(&mut self) -> CResult<()> {
        if self.consume("{") {
            while !self.consume("}") {
                if self.tok().is_eof() {
                    return Err(self.err("unterminated initializer"));
                }
                self.advance();
            }
            return Ok(());
        }
        self.assign()?;
        Ok(())
    }

    /// string-initializer = string-literal
    fn string_initializer(&mut self, tok: &Token, init: &mut Initializer) -> CResult<()> {
        let str_ty = tok.str_ty.unwrap();
        let str_len = self.sess.types.array_len(str_ty);
        if init.is_flexible {
            let base = self.sess.types.base(init.ty).unwrap();
            let ty = self.sess.types.array_of(base, str_len);
            *init = self.new_initializer(ty, false);
        }

        let len = self.sess.types.array_len(init.ty).min(str_len) as usize;
        let elem = self.sess.types.base(init.ty).unwrap();
        let elem_size = self.sess.types.size(elem);
        let data = tok.str_data.as_ref().unwrap().clone();
        let loc = tok.loc();

        for i in 0..len {
            let val = match elem_size {
                1 => data[i] as i8 as i64,
                2 => u16::from_le_bytes([data[i * 2], data[i * 2 + 1]]) as i64,
                _ => u32::from_le_bytes([
                    data[i * 4],
                    data[i * 4 + 1],
                    data[i * 4 + 2],
                    data[i * 4 + 3],
                ]) as i64,
            };
            init.children[i].expr = Some(self.num(val, loc));
        }
        Ok(())
    }

    /// array-designator = "[" const-expr ("..." const-expr)? "]"
    fn array_designator(&mut self, ty: TypeId) -> CResult<(i64, i64)> {
        let loc = self.loc();
        self.advance(); // "["
        let begin = self.const_expr()?;
        let len = self.sess.types.array_len(ty);
        if len >= 0 && begin >= len {
            return Err(self.err_at(loc, "array designator index exceeds array bounds"));
        }
        let end = if self.consume("...") {
            let end = self.const_expr()?;
            if len >= 0 && end >= len {
                return Err(self.err_at(loc, "array designator index exceeds array bounds"));
            }
            if end < begin {
                return Err(self.err_at(loc, "array designator range is empty"));
            }
            end
        } else {
            begin
        };
        self.skip("]")?;
        Ok((begin, end))
    }

    /// struct-designator = ident (the "." is already consumed)
    ///
    /// If the found member is an anonymous container the identifier is not
    /// consumed: the caller recurses into the container and the same name
    /// is looked up again against the inner type.
    fn struct_designator(&mut self, ty: TypeId) -> CResult<Member> {
        let tok = self.tok().clone();
        if !tok.is_ident() {
            return Err(self.err("expected a field designator"));
        }
        let Some(mem) = self.get_struct_member(ty, &tok.text) else {
            return Err(self.sess.error_tok(&tok, "struct has no such member"));
        };
        if mem.name.is_some() {
            self.advance();
        }
        Ok(mem)
    }

    /// designation = ("[" ... "]" | "." ident)* "="? initializer
    fn designation(&mut self, init: &mut Initializer) -> CResult<()> {
        if self.equal("[") {
            if !matches!(self.sess.types.kind(init.ty), TypeKind::Array { .. }) {
                return Err(self.err("array index in non-array initializer"));
            }
            let (begin, end) = self.array_designator(init.ty)?;
            let start = self.pos;
            for i in begin..=end {
                self.pos = start;
                self.designation(&mut init.children[i as usize])?;
            }
            self.array_initializer2(init, begin + 1)?;
            return Ok(());
        }

        if self.equal(".") {
            let is_union = self.sess.types.is_union(init.ty);
            if self.sess.types.is_struct_union(init.ty) && !is_union {
                let dot = self.pos;
                self.advance();
                let mem = self.struct_designator(init.ty)?;
                if mem.name.is_none() {
                    self.pos = dot;
                }
                self.designation(&mut init.children[mem.idx])?;
                init.expr = None;
                self.struct_initializer2(init, mem.idx + 1, true)?;
                return Ok(());
            }
            if is_union {
                let dot = self.pos;
                self.advance();
                let mem = self.struct_designator(init.ty)?;
                if mem.name.is_none() {
                    self.pos = dot;
                }
                init.mem = Some(mem.idx);
                return self.designation(&mut init.children[mem.idx]);
            }
            return Err(self.err("field name not in struct or union initializer"));
        }

        self.consume("=");
        self.initializer2(init)
    }

    /// When an array length is omitted, the number of initializer elements
    /// decides it. This pre-scans without consuming.
    fn count_array_init_elements(&mut self, ty: TypeId) -> CResult<i64> {
        let save = self.pos;
        let base = self.sess.types.base(ty).unwrap();
        let mut dummy = self.new_initializer(base, true);

        let mut i: i64 = 0;
        let mut max: i64 = 0;
        while self.comma_list("}", i != 0)? {
            if self.equal("[") {
                self.advance();
                i = self.const_expr()?;
                if self.consume("...") {
                    i = self.const_expr()?;
                }
                self.skip("]")?;
                self.designation(&mut dummy)?;
            } else {
                self.initializer2(&mut dummy)?;
            }
            i += 1;
            max = max.max(i);
        }
        self.pos = save;
        Ok(max)
    }

    /// array-initializer1 = "{" initializer ("," initializer)* ","? "}"
    fn array_initializer1(&mut self, init: &mut Initializer) -> CResult<()> {
        self.skip("{")?;

        if init.is_flexible {
            let len = self.count_array_init_elements(init.ty)?;
            let base = self.sess.types.base(init.ty).unwrap();
            let ty = self.sess.types.array_of(base, len);
            *init = self.new_initializer(ty, false);
        }

        let len = self.sess.types.array_len(init.ty);
        let mut i: i64 = 0;
        let mut first = true;
        while self.comma_list("}", !first)? {
            first = false;
            if self.equal("[") {
                let (begin, end) = self.array_designator(init.ty)?;
                let start = self.pos;
                for j in begin..=end {
                    self.pos = start;
                    self.designation(&mut init.children[j as usize])?;
                }
                i = end;
            } else if i < len {
                self.initializer2(&mut init.children[i as usize])?;
            } else {
                self.skip_excess_element()?;
            }
            i += 1;
        }
        Ok(())
    }

    /// array-initializer2 = initializer ("," initializer)*   (no braces)
    fn array_initializer2(&mut self, init: &mut Initializer, start: i64) -> CResult<()> {
        if init.is_flexible {
            let len = self.count_array_init_elements(init.ty)?;
            let base = self.sess.types.base(init.ty).unwrap();
            let ty = self.sess.types.array_of(base, len);
            *init = self.new_initializer(ty, false);
        }

        let len = self.sess.types.array_len(init.ty);
        let mut i = start;
        while i < len && !self.is_end() {
            let element_start = self.pos;
            if i > 0 {
                self.skip(",")?;
            }
            if self.equal("[") || self.equal(".") {
                self.pos = element_start;
                return Ok(());
            }
            self.initializer2(&mut init.children[i as usize])?;
            i += 1;
        }
        Ok(())
    }

    /// struct-initializer1 = "{" initializer ("," initializer)* ","? "}"
    fn struct_initializer1(&mut self, init: &mut Initializer) -> CResult<()> {
        self.skip("{")?;

        let members_len = self.sess.types.members(init.ty).len();
        let mut idx: usize = 0;
        let mut first = true;
        while self.comma_list("}", !first)? {
            first = false;
            if self.equal(".") {
                let dot = self.pos;
                self.advance();
                let mem = self.struct_designator(init.ty)?;
                if mem.name.is_none() {
                    self.pos = dot;
                }
                self.designation(&mut init.children[mem.idx])?;
                idx = mem.idx + 1;
                continue;
            }

            if idx < members_len {
                self.initializer2(&mut init.children[idx])?;
                idx += 1;
            } else {
                self.skip_excess_element()?;
            }
        }
        Ok(())
    }

    /// struct-initializer2 = initializer ("," initializer)*  (no braces)
    fn struct_initializer2(
        &mut self,
        init: &mut Initializer,
        start: usize,
        post_desig: bool,
    ) -> CResult<()> {
        let members_len = self.sess.types.members(init.ty).len();
        let mut first = true;
        let mut idx = start;
        while idx < members_len && !self.is_end() {
            let element_start = self.pos;
            if !first || post_desig {
                self.skip(",")?;
            }
            first = false;
            if self.equal("[") || self.equal(".") {
                self.pos = element_start;
                return Ok(());
            }
            self.initializer2(&mut init.children[idx])?;
            idx += 1;
        }
        Ok(())
    }

    fn union_initializer(&mut self, init: &mut Initializer) -> CResult<()> {
        self.skip("{")?;

        let has_members = !self.sess.types.members(init.ty).is_empty();
        let mut first = true;
        while self.comma_list("}", !first)? {
            if self.equal(".") {
                let dot = self.pos;
                self.advance();
                let mem = self.struct_designator(init.ty)?;
                if mem.name.is_none() {
                    self.pos = dot;
                }
                init.mem = Some(mem.idx);
                self.designation(&mut init.children[mem.idx])?;
                first = false;
                continue;
            }

            if first && has_members {
                init.mem = Some(0);
                self.initializer2(&mut init.children[0])?;
            } else {
                self.skip_excess_element()?;
            }
            first = false;
        }
        Ok(())
    }

    /// initializer = string-initializer | array-initializer
    ///             | struct-initializer | union-initializer | assign
    fn initializer2(&mut self, init: &mut Initializer) -> CResult<()> {
        let is_array = matches!(self.sess.types.kind(init.ty), TypeKind::Array { .. });
        if is_array {
            let base = self.sess.types.base(init.ty).unwrap();
            if self.sess.types.is_integer(base) {
                // A string literal, optionally brace-wrapped.
                if self.equal("{") {
                    let save = self.pos;
                    self.advance();
                    if let Some(tok) = self.take_str_tok() {
                        if self.consume("}") {
                            return self.string_initializer(&tok, init);
                        }
                    }
                    self.pos = save;
                }
                if let Some(tok) = self.take_str_tok() {
                    return self.string_initializer(&tok, init);
                }
            }
            if self.equal("{") {
                return self.array_initializer1(init);
            }
            return self.array_initializer2(init, 0);
        }

        if self.sess.types.is_struct_union(init.ty) && !self.sess.types.is_union(init.ty) {
            if self.equal("{") {
                return self.struct_initializer1(init);
            }
            // A struct can be initialized with another struct value.
            let e = self.assign()?;
            if self.sess.types.is_struct_union(e.ty) {
                init.expr = Some(e);
                return Ok(());
            }
            if self.sess.types.members(init.ty).is_empty() {
                return Err(self.err("initializer for empty aggregate requires explicit braces"));
            }
            return self.struct_initializer2(init, 0, false);
        }

        if self.sess.types.is_union(init.ty) {
            if self.equal("{") {
                return self.union_initializer(init);
            }
            let e = self.assign()?;
            if self.sess.types.is_union(e.ty) {
                init.expr = Some(e);
                return Ok(());
            }
            if self.sess.types.members(init.ty).is_empty() {
                return Err(self.err("initializer for empty aggregate requires explicit braces"));
            }
            init.mem = Some(0);
            return self.initializer2(&mut init.children[0]);
        }

        // A scalar initializer can be surrounded by braces.
        if self.consume("{") {
            self.initializer2(init)?;
            self.skip("}")?;
            return Ok(());
        }

        init.expr = Some(self.assign()?);
        Ok(())
    }

    /// Parse a full initializer for `ty`, returning the tree and the
    /// (possibly completed or inflated) object type.
    fn initializer(&mut self, ty: TypeId) -> CResult<(Initializer, TypeId)> {
        let mut init = self.new_initializer(ty, true);
        self.initializer2(&mut init)?;

        let is_flexible_struct = matches!(
            self.sess.types.kind(ty),
            TypeKind::Struct {
                is_flexible: true,
                is_union: false,
                ..
            }
        );
        if is_flexible_struct {
            // Inflate a copy of the struct so the flexible member's
            // initializer has real storage.
            let copy = self.sess.types.copy_type(ty);
            let last_idx = self.sess.types.members(copy).len() - 1;
            let child_ty = init.children[last_idx].ty;
            let child_size = self.sess.types.size(child_ty);
            let t = self.sess.types.get_mut(copy);
            if let TypeKind::Struct { members, .. } = &mut t.kind {
                members[last_idx].ty = child_ty;
            }
            t.size += child_size;
            return Ok((init, copy));
        }
        let completed = init.ty;
        Ok((init, completed))
    }

    /// Build the access expression chain for one leaf and assign into it.
    fn create_lvar_init(
        &mut self,
        init: &Initializer,
        ty: TypeId,
        target: &Expr,
        loc: Loc,
    ) -> CResult<Option<Expr>> {
        if let TypeKind::Array { base, len } = self.sess.types.kind(ty).clone() {
            let mut node: Option<Expr> = None;
            for i in 0..len.max(0) {
                let idx = self.num(i, loc);
                let sum = self.new_add(target.clone(), idx, loc)?;
                let elem = self.deref_expr(sum, loc)?;
                let sub = self.create_lvar_init(&init.children[i as usize], base, &elem, loc)?;
                self.chain_expr(&mut node, sub);
            }
            return Ok(node);
        }

        if let Some(e) = &init.expr {
            let assign = self.assign_expr(target.clone(), e.clone(), loc)?;
            return Ok(Some(assign));
        }

        match self.sess.types.kind(ty).clone() {
            TypeKind::Struct {
                members,
                is_union: false,
                ..
            } => {
                let mut node: Option<Expr> = None;
                for mem in &members {
                    let t2 = Expr::new(
                        ExprKind::Member {
                            base: Box::new(target.clone()),
                            member: mem.clone(),
                        },
                        mem.ty,
                        loc,
                    );
                    let sub = self.create_lvar_init(&init.children[mem.idx], mem.ty, &t2, loc)?;
                    self.chain_expr(&mut node, sub);
                }
                Ok(node)
            }
            TypeKind::Struct { members, .. } => {
                let Some(mi) = init.mem else {
                    return Ok(None);
                };
                let mem = members[mi].clone();
                let t2 = Expr::new(
                    ExprKind::Member {
                        base: Box::new(target.clone()),
                        member: mem.clone(),
                    },
                    mem.ty,
                    loc,
                );
                self.create_lvar_init(&init.children[mi], mem.ty, &t2, loc)
            }
            _ => Ok(None),
        }
    }

    /// A definition with an initializer is shorthand for a definition
    /// followed by assignments. Unspecified elements must end up zero, so
    /// the object is cleared first and the user values assigned over it.
    pub(super) fn lvar_initializer(&mut self, var: ObjId) -> CResult<Expr> {
        let loc = self.loc();
        let ty = self.sess.obj(var).ty;
        let (init, new_ty) = self.initializer(ty)?;
        self.sess.obj_mut(var).ty = new_ty;

        let mut node = Some(Expr::new(
            ExprKind::MemZero(var),
            crate::common::types::TY_VOID,
            loc,
        ));
        let target = self.var_expr(var, loc);
        let assigns = self.create_lvar_init(&init, new_ty, &target, loc)?;
        self.chain_expr(&mut node, assigns);
        Ok(node.unwrap())
    }

    fn read_buf(buf: &[u8], offset: usize, size: i64) -> u64 {
        let mut v: u64 = 0;
        for i in 0..size as usize {
            v |= (buf[offset + i] as u64) << (8 * i);
        }
        v
    }

    fn write_buf(buf: &mut [u8], offset: usize, val: u64, size: i64) {
        for i in 0..size as usize {
            buf[offset + i] = (val >> (8 * i)) as u8;
        }
    }

    fn write_gvar_data(
        &mut self,
        init: &Initializer,
        ty: TypeId,
        buf: &mut [u8],
        offset: i64,
        rels: &mut Vec<Relocation>,
    ) -> CResult<()> {
        match self.sess.types.kind(ty).clone() {
            TypeKind::Array { base, len } => {
                let sz = self.sess.types.size(base);
                for i in 0..len.max(0) {
                    self.write_gvar_data(
                        &init.children[i as usize],
                        base,
                        buf,
                        offset + sz * i,
                        rels,
                    )?;
                }
                return Ok(());
            }
            TypeKind::Struct {
                members,
                is_union: false,
                ..
            } => {
                for mem in &members {
                    if mem.is_bitfield {
                        let Some(e) = &init.children[mem.idx].expr else {
                            continue;
                        };
                        let e = e.clone();
                        let loc = (offset + mem.offset) as usize;
                        let mem_size = self.sess.types.size(mem.ty);
                        let oldval = Self::read_buf(buf, loc, mem_size);
                        let newval = const_eval::eval(self.sess, &e)? as u64;
                        let mask = 1u64.wrapping_shl(mem.bit_width as u32).wrapping_sub(1);
                        let combined = oldval | ((newval & mask) << mem.bit_offset);
                        Self::write_buf(buf, loc, combined, mem_size);
                    } else {
                        self.write_gvar_data(
                            &init.children[mem.idx],
                            mem.ty,
                            buf,
                            offset + mem.offset,
                            rels,
                        )?;
                    }
                }
                return Ok(());
            }
            TypeKind::Struct { members, .. } => {
                let Some(mi) = init.mem else {
                    return Ok(());
                };
                return self.write_gvar_data(&init.children[mi], members[mi].ty, buf, offset, rels);
            }
            _ => {}
        }

        let Some(e) = &init.expr else {
            return Ok(());
        };
        let e = e.clone();

        match self.sess.types.kind(ty) {
            TypeKind::Float => {
                let v = const_eval::eval_double(self.sess, &e)? as f32;
                buf[offset as usize..offset as usize + 4].copy_from_slice(&v.to_le_bytes());
                return Ok(());
            }
            TypeKind::Double => {
                let v = const_eval::eval_double(self.sess, &e)?;
                buf[offset as usize..offset as usize + 8].copy_from_slice(&v.to_le_bytes());
                return Ok(());
            }
            TypeKind::LongDouble => {
                let v = const_eval::eval_double(self.sess, &e)?;
                buf[offset as usize..offset as usize + 16].copy_from_slice(&f64_to_x87_bytes(v));
                return Ok(());
            }
            _ => {}
        }

        let mut label: Option<String> = None;
        let val = const_eval::eval2(self.sess, &e, &mut label)?;
        match label {
            None => {
                Self::write_buf(buf, offset as usize, val as u64, self.sess.types.size(ty));
            }
            Some(label) => rels.push(Relocation {
                offset,
                label,
                addend: val,
            }),
        }
        Ok(())
    }

    /// Initializers for globals are evaluated at compile time and embedded
    /// in the data section; non-constant expressions are a compile error.
    pub(super) fn gvar_initializer(&mut self, var: ObjId) -> CResult<()> {
        let ty = self.sess.obj(var).ty;
        let (init, new_ty) = self.initializer(ty)?;
        self.sess.obj_mut(var).ty = new_ty;

        let size = self.sess.types.size(new_ty).max(0) as usize;
        let mut buf = vec![0u8; size];
        let mut rels = Vec::new();
        self.write_gvar_data(&init, new_ty, &mut buf, 0, &mut rels)?;

        let o = self.sess.obj_mut(var);
        o.init_data = Some(buf);
        o.rel = rels;
        Ok(())
    }
}
