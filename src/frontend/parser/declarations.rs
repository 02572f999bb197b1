//! Declaration parsing: declaration specifiers, tags, enums, struct/union
//! layout, typedefs, globals and function definitions.

use crate::common::error::CResult;
use crate::common::session::VarScope;
use crate::common::types::{
    align_down, align_to, Member, Type, TypeId, TypeKind, TY_BOOL, TY_CHAR, TY_DOUBLE, TY_FLOAT,
    TY_INT, TY_LDOUBLE, TY_LLONG, TY_LONG, TY_PCHAR, TY_SHORT, TY_UCHAR, TY_UINT, TY_ULLONG,
    TY_ULONG, TY_USHORT, TY_VOID,
};
use crate::frontend::lexer::token::Token;
use crate::frontend::parser::ast::{Expr, Stmt, StmtKind};
use crate::frontend::parser::parser::Parser;

/// Variable attributes such as typedef or extern.
#[derive(Debug, Default, Clone)]
pub(super) struct VarAttr {
    pub is_typedef: bool,
    pub is_static: bool,
    pub is_extern: bool,
    pub is_inline: bool,
    pub is_tls: bool,
}

fn is_typename_word(s: &str) -> bool {
    matches!(
        s,
        "void" | "_Bool" | "char" | "short" | "int" | "long" | "struct" | "union"
            | "typedef" | "enum" | "static" | "extern" | "signed" | "unsigned"
            | "const" | "volatile" | "auto" | "register" | "restrict" | "__restrict"
            | "__restrict__" | "_Noreturn" | "float" | "double" | "inline"
            | "_Thread_local" | "__thread" | "typeof" | "__typeof" | "__typeof__"
    )
}

impl<'a> Parser<'a> {
    /// Whether the current token starts a type.
    pub(super) fn is_typename(&self) -> bool {
        let tok = self.tok();
        (tok.kind == crate::frontend::lexer::token::TokenKind::Keyword
            && is_typename_word(&tok.text))
            || self.find_typedef(tok).is_some()
    }

    /// declspec = type-specifier+ with storage-class and qualifier keywords
    /// absorbed in the same loop.
    ///
    /// The order of typenames doesn't matter: occurrences of each are
    /// counted in a single integer, with each word contributing a distinct
    /// bit range so that legal combinations map to single values.
    pub(super) fn declspec(&mut self, attr: &mut Option<VarAttr>) -> CResult<TypeId> {
        const VOID: u32 = 1 << 0;
        const BOOL: u32 = 1 << 2;
        const CHAR: u32 = 1 << 4;
        const SHORT: u32 = 1 << 6;
        const INT: u32 = 1 << 8;
        const LONG: u32 = 1 << 10;
        const FLOAT: u32 = 1 << 12;
        const DOUBLE: u32 = 1 << 14;
        const OTHER: u32 = 1 << 16;
        const SIGNED: u32 = 1 << 17;
        const UNSIGNED: u32 = 1 << 18;

        let mut ty = TY_INT;
        let mut counter: u32 = 0;

        while self.is_typename() {
            let text = self.tok().text.clone();

            // Storage class specifiers.
            if matches!(
                text.as_str(),
                "typedef" | "static" | "extern" | "inline" | "_Thread_local" | "__thread"
            ) {
                let Some(attr) = attr.as_mut() else {
                    return Err(
                        self.err("storage class specifier is not allowed in this context")
                    );
                };
                match text.as_str() {
                    "typedef" => attr.is_typedef = true,
                    "static" => attr.is_static = true,
                    "extern" => attr.is_extern = true,
                    "inline" => attr.is_inline = true,
                    _ => attr.is_tls = true,
                }
                if attr.is_typedef
                    && (attr.is_static || attr.is_extern || attr.is_inline || attr.is_tls)
                {
                    return Err(self.err(
                        "typedef may not be used together with static, extern, inline, __thread or _Thread_local",
                    ));
                }
                self.advance();
                continue;
            }

            // Recognized but ignored.
            if matches!(
                text.as_str(),
                "const" | "volatile" | "auto" | "register" | "restrict" | "__restrict"
                    | "__restrict__" | "_Noreturn"
            ) {
                self.advance();
                continue;
            }

            // User-defined and compound types.
            let ty2 = self.find_typedef(self.tok());
            if matches!(text.as_str(), "struct" | "union" | "enum" | "typeof" | "__typeof" | "__typeof__")
                || ty2.is_some()
            {
                if counter != 0 {
                    break;
                }
                match text.as_str() {
                    "struct" => {
                        self.advance();
                        ty = self.struct_union_decl(false)?;
                    }
                    "union" => {
                        self.advance();
                        ty = self.struct_union_decl(true)?;
                    }
                    "enum" => {
                        self.advance();
                        ty = self.enum_specifier()?;
                    }
                    "typeof" | "__typeof" | "__typeof__" => {
                        self.advance();
                        ty = self.typeof_specifier()?;
                    }
                    _ => {
                        ty = ty2.unwrap();
                        self.advance();
                    }
                }
                counter += OTHER;
                continue;
            }

            // Built-in types.
            counter += match text.as_str() {
                "void" => VOID,
                "_Bool" => BOOL,
                "char" => CHAR,
                "short" => SHORT,
                "int" => INT,
                "long" => LONG,
                "float" => FLOAT,
                "double" => DOUBLE,
                "signed" => 0,
                "unsigned" => 0,
                _ => unreachable!("typename word"),
            };
            match text.as_str() {
                "signed" => counter |= SIGNED,
                "unsigned" => counter |= UNSIGNED,
                _ => {}
            }

            ty = match counter {
                c if c == VOID => TY_VOID,
                c if c == BOOL => TY_BOOL,
                c if c == CHAR => TY_PCHAR,
                c if c == SIGNED + CHAR => TY_CHAR,
                c if c == UNSIGNED + CHAR => TY_UCHAR,
                c if c == SHORT
                    || c == SHORT + INT
                    || c == SIGNED + SHORT
                    || c == SIGNED + SHORT + INT =>
                {
                    TY_SHORT
                }
                c if c == UNSIGNED + SHORT || c == UNSIGNED + SHORT + INT => TY_USHORT,
                c if c == INT || c == SIGNED || c == SIGNED + INT => TY_INT,
                c if c == UNSIGNED || c == UNSIGNED + INT => TY_UINT,
                c if c == LONG
                    || c == LONG + INT
                    || c == SIGNED + LONG
                    || c == SIGNED + LONG + INT =>
                {
                    TY_LONG
                }
                c if c == LONG + LONG
                    || c == LONG + LONG + INT
                    || c == SIGNED + LONG + LONG
                    || c == SIGNED + LONG + LONG + INT =>
                {
                    TY_LLONG
                }
                c if c == UNSIGNED + LONG || c == UNSIGNED + LONG + INT => TY_ULONG,
                c if c == UNSIGNED + LONG + LONG || c == UNSIGNED + LONG + LONG + INT => {
                    TY_ULLONG
                }
                c if c == FLOAT => TY_FLOAT,
                c if c == DOUBLE => TY_DOUBLE,
                c if c == LONG + DOUBLE => TY_LDOUBLE,
                _ => return Err(self.err("invalid type")),
            };
            self.advance();
        }
        Ok(ty)
    }

    /// typeof-specifier = "(" (expr | typename) ")"
    fn typeof_specifier(&mut self) -> CResult<TypeId> {
        self.skip("(")?;
        let ty = if self.is_typename() {
            self.typename()?
        } else {
            let e = self.expr()?;
            e.ty
        };
        self.skip(")")?;
        Ok(ty)
    }

    fn attr_packed(&self, tok: &Token) -> bool {
        tok.attrs.iter().any(|a| a == "packed")
    }

    /// struct-union-decl = attribute? ident? ("{" struct-members)?
    pub(super) fn struct_union_decl(&mut self, is_union: bool) -> CResult<TypeId> {
        let mut is_packed = self.attr_packed(self.tok());

        let mut tag: Option<Token> = None;
        if self.tok().is_ident() {
            tag = Some(self.advance());
        }

        if let Some(tag) = &tag {
            if !self.equal("{") {
                if let Some(ty2) = self.find_tag(&tag.text) {
                    return Ok(ty2);
                }
                let mut fwd = Type::new(
                    TypeKind::Struct {
                        members: Vec::new(),
                        is_flexible: false,
                        is_union,
                    },
                    -1,
                    1,
                );
                fwd.is_packed = is_packed;
                let id = self.sess.types.alloc(fwd);
                let name = tag.text.clone();
                self.push_tag_scope(&name, id);
                return Ok(id);
            }
        }
        self.skip("{")?;

        let mut members = self.struct_members()?;
        is_packed |= self.attr_packed(self.tok());

        let mut ty = Type::new(
            TypeKind::Struct {
                members: Vec::new(),
                is_flexible: false,
                is_union,
            },
            -1,
            1,
        );
        ty.is_packed = is_packed;

        // A trailing incomplete array is a flexible array member; it
        // behaves as a zero-length array.
        let mut is_flexible = false;
        if let Some(last) = members.last_mut() {
            if self.sess.types.is_array(last.ty) && self.sess.types.size(last.ty) < 0 {
                if is_union {
                    return Err(self.err("flexible array member not allowed in union"));
                }
                let base = self.sess.types.base(last.ty).unwrap();
                last.ty = self.sess.types.array_of(base, 0);
                is_flexible = true;
            }
        }

        if is_union {
            self.union_layout(&mut ty, members, is_flexible);
        } else {
            self.struct_layout(&mut ty, members, is_flexible);
        }

        if let Some(tag) = &tag {
            if let Some(existing) = self.find_tag_in_current_scope(&tag.text) {
                // Completing a forward declaration rewrites its slot so all
                // existing references observe the definition.
                self.sess.types.replace(existing, ty);
                return Ok(existing);
            }
            let id = self.sess.types.alloc(ty);
            let name = tag.text.clone();
            self.push_tag_scope(&name, id);
            return Ok(id);
        }
        Ok(self.sess.types.alloc(ty))
    }

    /// struct-members = (declspec declarator ("," declarator)* ";")*
    fn struct_members(&mut self) -> CResult<Vec<Member>> {
        let mut members: Vec<Member> = Vec::new();

        while !self.equal("}") {
            if self.equal("_Static_assert") {
                self.advance();
                self.static_assertion()?;
                continue;
            }

            let mut attr = Some(VarAttr::default());
            let basety = self.declspec(&mut attr)?;

            // Anonymous struct/union member.
            if self.sess.types.is_struct_union(basety) && self.consume(";") {
                members.push(Member {
                    name: None,
                    ty: basety,
                    offset: 0,
                    idx: 0,
                    is_bitfield: false,
                    bit_offset: 0,
                    bit_width: 0,
                });
                continue;
            }

            let mut first = true;
            while self.comma_list(";", !first)? {
                first = false;
                let (ty, name) = self.declarator(basety, true)?;

                let mut t = Some(ty);
                while let Some(cur) = t {
                    if self.sess.types.is_vla(cur) {
                        return Err(self.err("members cannot be of variably-modified type"));
                    }
                    t = self.sess.types.base(cur);
                }

                let mut mem = Member {
                    name: match &name {
                        Some(t) => Some(self.get_ident(t)?),
                        None => None,
                    },
                    ty,
                    offset: 0,
                    idx: 0,
                    is_bitfield: false,
                    bit_offset: 0,
                    bit_width: 0,
                };
                if self.consume(":") {
                    mem.is_bitfield = true;
                    let width = self.const_expr()?;
                    if width < 0 {
                        return Err(self.err("bit-field with negative width"));
                    }
                    mem.bit_width = width as i32;
                }
                members.push(mem);
            }
        }
        self.advance(); // "}"
        Ok(members)
    }

    /// Assign offsets with a bit cursor. A bitfield that would straddle a
    /// storage unit of its declared type realigns first (unless packed); a
    /// zero-width bitfield only realigns. Unnamed bitfields advance the
    /// cursor but are dropped from the member list.
    fn struct_layout(&mut self, ty: &mut Type, members: Vec<Member>, is_flexible: bool) {
        let is_packed = ty.is_packed;
        let mut bits: i64 = 0;
        let mut max_align: i64 = 0;
        let mut kept: Vec<Member> = Vec::new();

        for mut mem in members {
            let m_size = self.sess.types.size(mem.ty);
            let m_align = self.sess.types.align(mem.ty);

            let keep = !mem.is_bitfield || mem.name.is_some();
            if keep {
                max_align = max_align.max(m_align);
            }

            if mem.is_bitfield {
                if mem.bit_width == 0 {
                    bits = align_to(bits, m_size * 8);
                    continue;
                }
                if !is_packed
                    && bits / (m_size * 8) != (bits + mem.bit_width as i64 - 1) / (m_size * 8)
                {
                    bits = align_to(bits, m_size * 8);
                }
                mem.offset = align_down(bits / 8, m_size);
                mem.bit_offset = (bits % (m_size * 8)) as i32;
                bits += mem.bit_width as i64;
                if keep {
                    mem.idx = kept.len();
                    kept.push(mem);
                }
                continue;
            }

            if is_packed {
                bits = align_to(bits, 8);
            } else {
                bits = align_to(bits, m_align * 8);
            }
            mem.offset = bits / 8;
            bits += m_size * 8;
            mem.idx = kept.len();
            kept.push(mem);
        }

        if !is_packed && max_align > 0 {
            ty.align = max_align;
        }
        ty.size = if is_packed {
            align_to(bits, 8) / 8
        } else {
            align_to(bits, ty.align * 8) / 8
        };
        ty.kind = TypeKind::Struct {
            members: kept,
            is_flexible,
            is_union: false,
        };
    }

    /// Union layout: every member at offset zero; size is the maximum.
    fn union_layout(&mut self, ty: &mut Type, members: Vec<Member>, is_flexible: bool) {
        let mut max_align: i64 = 0;
        let mut size: i64 = -1;
        let mut kept: Vec<Member> = Vec::new();

        for mut mem in members {
            let keep = !mem.is_bitfield || mem.name.is_some();
            if keep {
                max_align = max_align.max(self.sess.types.align(mem.ty));
            }
            let sz = if mem.is_bitfield {
                align_to(mem.bit_width as i64, 8) / 8
            } else {
                self.sess.types.size(mem.ty)
            };
            size = size.max(sz);
            if keep {
                mem.idx = kept.len();
                kept.push(mem);
            }
        }

        if !ty.is_packed && max_align > 0 {
            ty.align = max_align;
        }
        ty.size = align_to(size, ty.align);
        ty.kind = TypeKind::Struct {
            members: kept,
            is_flexible,
            is_union: true,
        };
    }

    /// Find a struct member by name; anonymous members are searched
    /// transparently and the anonymous container itself is returned so that
    /// member chains can be built through it.
    pub(super) fn get_struct_member(&self, ty: TypeId, name: &str) -> Option<Member> {
        for mem in self.sess.types.members(ty) {
            match &mem.name {
                Some(n) if n == name => return Some(mem.clone()),
                None if self.sess.types.is_struct_union(mem.ty) => {
                    if self.get_struct_member(mem.ty, name).is_some() {
                        return Some(mem.clone());
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// enum-specifier = ident? (":" typename)? ("{" enumerator-list "}")?
    ///
    /// The underlying type of an unspecified enum is chosen from the
    /// observed values; with an explicit underlying type every value must
    /// fit it.
    fn enum_specifier(&mut self) -> CResult<TypeId> {
        let mut tag: Option<Token> = None;
        if self.tok().is_ident() {
            tag = Some(self.advance());
        }

        let mut ty: Option<TypeId> = None;
        if self.consume(":") {
            ty = Some(self.typename()?);
        }

        if let Some(tag) = &tag {
            if !self.equal("{") {
                if let Some(ty2) = self.find_tag(&tag.text) {
                    if self.sess.types.is_struct_union(ty2) {
                        return Err(self.sess.error_tok(tag, "not an enum tag"));
                    }
                    return Ok(ty2);
                }
                let id = match ty {
                    Some(t) => t,
                    None => self.sess.types.alloc(Type::new(TypeKind::Enum, -1, 1)),
                };
                let name = tag.text.clone();
                self.push_tag_scope(&name, id);
                return Ok(id);
            }
        }
        self.skip("{")?;

        let mut enum_id: Option<TypeId> = None;
        if let Some(tag) = &tag {
            if let Some(ty2) = self.find_tag_in_current_scope(&tag.text) {
                if self.sess.types.is_struct_union(ty2) {
                    return Err(self.sess.error_tok(tag, "not an enum tag"));
                }
                let t2 = self.sess.types.get(ty2);
                let incompatible = match ty {
                    None => !matches!(t2.kind, TypeKind::Enum),
                    Some(t) => {
                        let t1 = self.sess.types.get(t);
                        std::mem::discriminant(&t1.kind) != std::mem::discriminant(&t2.kind)
                            || t1.is_unsigned != t2.is_unsigned
                    }
                };
                if incompatible {
                    return Err(
                        self.sess.error_tok(tag, "enum redeclared with incompatible type")
                    );
                }
                enum_id = Some(ty2);
            }
        }

        // The working slot: the declared underlying type, a matching
        // earlier tag, or a fresh slot provisionally set to unsigned int.
        let has_type = ty.is_some()
            || enum_id.map_or(false, |id| !matches!(self.sess.types.kind(id), TypeKind::Enum));
        let slot = match (enum_id, ty) {
            (Some(id), _) => id,
            (None, Some(t)) => t,
            (None, None) => self.sess.types.alloc(Type::new(TypeKind::Enum, -1, 1)),
        };
        if !has_type {
            let mut provisional = self.sess.types.get(TY_UINT).clone();
            provisional.is_unspec_enum = true;
            self.sess.types.replace(slot, provisional);
        }

        let mut need_u32 = false;
        let mut need_u64 = false;
        let mut need_i64 = false;
        let mut been_neg = false;

        let mut val: u64 = 0;
        let mut is_neg = false;
        let mut is_ovf = false;
        let mut first = true;
        while self.comma_list("}", !first)? {
            let name_tok = self.advance();
            let name = self.get_ident(&name_tok)?;
            first = false;

            if self.consume("=") {
                let (v, val_ty) = self.const_expr_typed()?;
                val = v as u64;
                if !self.sess.types.is_unsigned(val_ty) && (val as i64) < 0 {
                    need_i64 = (val as i64) < i32::MIN as i64;
                    is_neg = true;
                    been_neg = true;
                }
            } else if is_ovf {
                return Err(self.err("enum value overflowed"));
            }

            if !is_neg && val > i32::MAX as u64 {
                need_u64 = val > u32::MAX as u64;
                need_u32 = true;
            }
            self.push_var_scope(
                &name,
                VarScope::EnumConst {
                    ty: slot,
                    val: val as i64,
                },
            );
            val = val.wrapping_add(1);
            is_ovf = !is_neg && val == 0;
            is_neg = (val as i64) < 0;
        }
        if first {
            return Err(self.err("empty enum specifier"));
        }

        if has_type {
            let t = self.sess.types.get(slot);
            let out_of_range = if t.is_unsigned {
                been_neg || (t.size < 8 && need_u64)
            } else {
                need_u64 || (t.size < 8 && (need_u32 || need_i64))
            };
            if out_of_range {
                return Err(self.err("enum value out of type range"));
            }
        } else {
            let (base, is_unspec) = if been_neg {
                if need_u64 || need_u32 || need_i64 {
                    (TY_LONG, false)
                } else {
                    (TY_INT, false)
                }
            } else if need_u64 {
                (TY_ULONG, false)
            } else if need_u32 {
                (TY_UINT, false)
            } else {
                (TY_UINT, true)
            };
            let mut resolved = self.sess.types.get(base).clone();
            resolved.is_unspec_enum = is_unspec;
            self.sess.types.replace(slot, resolved);
        }

        if let Some(tag) = &tag {
            let name = tag.text.clone();
            self.push_tag_scope(&name, slot);
        }
        Ok(slot)
    }

    /// `_Static_assert (const-expr, "msg"?)` — the keyword itself has been
    /// consumed.
    pub(super) fn static_assertion(&mut self) -> CResult<()> {
        self.skip("(")?;
        let loc = self.loc();
        let result = self.const_expr()?;
        if result == 0 {
            return Err(self.err_at(loc, "static assertion failed"));
        }
        if self.consume(",") {
            if self.tok().kind != crate::frontend::lexer::token::TokenKind::Str {
                return Err(self.err("expected string literal"));
            }
            self.advance();
        }
        self.skip(")")?;
        self.skip(";")?;
        Ok(())
    }

    pub(super) fn parse_typedef(&mut self, basety: TypeId) -> CResult<Option<Expr>> {
        let mut node = None;
        let mut first = true;
        while self.comma_list(";", !first)? {
            first = false;
            let (ty, name) = self.declarator(basety, true)?;
            let Some(name) = name else {
                return Err(self.err("typedef name omitted"));
            };
            let loc = name.loc();
            let ident = self.get_ident(&name)?;
            self.push_var_scope(&ident, VarScope::Typedef(ty));
            let calc = self.compute_vla_size(ty, loc)?;
            self.chain_expr(&mut node, calc);
        }
        Ok(node)
    }

    /// declaration = declspec (declarator ("=" init)? ("," ...)*)? ";"
    /// Returns the chained initialization/VLA-size expression, if any.
    pub(super) fn declaration(
        &mut self,
        basety: TypeId,
        attr: Option<&VarAttr>,
    ) -> CResult<Option<Expr>> {
        let mut expr: Option<Expr> = None;

        let mut first = true;
        while self.comma_list(";", !first)? {
            first = false;
            let (ty, name) = self.declarator(basety, true)?;

            if self.sess.types.is_func(ty) {
                let Some(name) = name else {
                    return Err(self.err("function name omitted"));
                };
                let default = VarAttr::default();
                self.func_prototype(ty, attr.unwrap_or(&default), &name)?;
                continue;
            }
            if self.sess.types.is_void(ty) {
                return Err(self.err("variable declared void"));
            }
            let Some(name) = name else {
                return Err(self.err("variable name omitted"));
            };
            let loc = name.loc();

            // The size computation is needed even if ty is not a VLA: it
            // may be a pointer to one (int (*foo)[n][m]).
            let calc = self.compute_vla_size(ty, loc)?;
            self.chain_expr(&mut expr, calc);

            if attr.map_or(false, |a| a.is_static) {
                if self.sess.types.is_vla(ty) {
                    return Err(self.err("variable length arrays cannot be 'static'"));
                }
                let var = self.new_static_lvar(ty);
                self.sess.obj_mut(var).is_tls = attr.unwrap().is_tls;
                let ident = self.get_ident(&name)?;
                self.push_var_scope(&ident, VarScope::Var(var));
                if self.consume("=") {
                    self.gvar_initializer(var)?;
                }
                continue;
            }

            if self.sess.types.is_vla(ty) {
                if self.equal("=") {
                    return Err(self.err("variable-sized object may not be initialized"));
                }
                // VLAs become alloca() calls: `int x[n+2]` is in effect
                // `tmp = (n+2)*4, x = alloca(tmp)`.
                let ident = self.get_ident(&name)?;
                let var = self.new_lvar(Some(ident), ty);
                let size_var = self.sess.types.vla_size_var(ty).unwrap();
                let sz = self.var_expr(size_var, loc);
                let alloca = self.new_vla(sz, var);
                self.chain_expr(&mut expr, Some(alloca));

                self.sess.obj_mut(var).vla_next = self.current_vla;
                self.current_vla = Some(var);
                self.fn_use_vla = true;
                continue;
            }

            let ident = self.get_ident(&name)?;
            let var = self.new_lvar(Some(ident), ty);
            if self.consume("=") {
                let init = self.lvar_initializer(var)?;
                self.chain_expr(&mut expr, Some(init));
            }
            let var_ty = self.sess.obj(var).ty;
            if self.sess.types.size(var_ty) < 0 {
                return Err(self.err_at(loc, "variable has incomplete type"));
            }
            if self.sess.types.is_void(var_ty) {
                return Err(self.err_at(loc, "variable declared void"));
            }
        }
        Ok(expr)
    }

    fn find_func(&self, name: &str) -> Option<crate::common::session::ObjId> {
        let file_scope = self.sess.file_scope();
        if let Some(VarScope::Var(v)) = self.sess.scope(file_scope).vars.get(name) {
            if self.sess.types.is_func(self.sess.obj(*v).ty) {
                return Some(*v);
            }
        }
        None
    }

    pub(super) fn func_prototype(
        &mut self,
        ty: TypeId,
        attr: &VarAttr,
        name: &Token,
    ) -> CResult<crate::common::session::ObjId> {
        let name_str = self.get_ident(name)?;

        let fn_id = match self.find_func(&name_str) {
            Some(f) => {
                if !self.sess.obj(f).is_static && attr.is_static {
                    return Err(self
                        .sess
                        .error_tok(name, "static declaration follows a non-static declaration"));
                }
                f
            }
            None => {
                let f = self.new_gvar(name_str, ty);
                let o = self.sess.obj_mut(f);
                o.is_function = true;
                o.is_static = attr.is_static || (attr.is_inline && !attr.is_extern);
                f
            }
        };
        self.sess.obj_mut(fn_id).is_inline |= attr.is_inline;
        Ok(fn_id)
    }

    fn func_definition(&mut self, ty: TypeId, attr: &VarAttr, name: &Token) -> CResult<()> {
        let fn_id = self.func_prototype(ty, attr, name)?;
        if self.sess.obj(fn_id).is_definition {
            let msg = format!("redefinition of {}", self.sess.obj(fn_id).name);
            return Err(self.sess.error_tok(name, &msg));
        }
        {
            let o = self.sess.obj_mut(fn_id);
            o.is_definition = true;
            o.ty = ty;
        }

        self.current_fn = Some(fn_id);
        self.current_vla = None;
        self.fn_use_vla = false;
        self.dont_dealloc_vla = false;
        self.gotos.clear();
        self.labels.clear();
        self.label_uniques.clear();
        self.goto_table.clear();

        // Reuse the parameter scope captured at declaration.
        let captured = self.sess.types.func(ty).scope;
        match captured {
            Some(sc) => self.scope = sc,
            None => {
                self.enter_scope();
                let sc = self.scope;
                self.sess.types.func_mut(ty).scope = Some(sc);
            }
        }

        let loc = self.loc();
        self.skip("{")?;
        let mut body = self.compound_stmt_body(loc)?;

        // Parameter VLA sizes (and K&R promotions) run on entry.
        if let Some(pre) = self.sess.types.func_mut(ty).pre_calc.take() {
            if let StmtKind::Block { body: stmts, .. } = &mut body.kind {
                stmts.insert(0, Stmt::new(StmtKind::ExprStmt(*pre), loc));
            }
        }

        if self.fn_use_vla && !self.dont_dealloc_vla && !self.sess.dont_reuse_stack {
            self.sess.obj_mut(fn_id).dealloc_vla = true;
        }

        self.leave_scope();
        self.resolve_goto_labels()?;

        let table = std::mem::take(&mut self.goto_table);
        let o = self.sess.obj_mut(fn_id);
        o.body = Some(body);
        o.goto_table = table;
        self.current_fn = None;
        Ok(())
    }

    pub(super) fn global_declaration(
        &mut self,
        basety: TypeId,
        attr: &VarAttr,
    ) -> CResult<()> {
        let mut first = true;
        while self.comma_list(";", !first)? {
            let (ty, name) = self.declarator(basety, true)?;

            if self.sess.types.is_func(ty) {
                let Some(name) = name else {
                    return Err(self.err("function name omitted"));
                };
                if self.equal("{") {
                    if !first || self.sess.scope(self.scope).parent.is_some() {
                        return Err(self.err("function definition is not allowed here"));
                    }
                    return self.func_definition(ty, attr, &name);
                }
                self.func_prototype(ty, attr, &name)?;
                first = false;
                continue;
            }
            first = false;

            let Some(name) = name else {
                return Err(self.err("variable name omitted"));
            };
            let ident = self.get_ident(&name)?;

            let mut is_definition = !attr.is_extern;
            if !is_definition && self.equal("=") {
                is_definition = true;
            }

            let var = match self.find_var(&ident) {
                Some(VarScope::Var(v)) => {
                    if !is_definition {
                        continue;
                    }
                    if self.sess.obj(v).is_definition && !self.sess.obj(v).is_tentative {
                        continue;
                    }
                    {
                        let o = self.sess.obj_mut(v);
                        o.is_tentative = false;
                        o.ty = ty;
                    }
                    v
                }
                _ => self.new_gvar(ident, ty),
            };
            {
                let o = self.sess.obj_mut(var);
                o.is_definition = is_definition;
                o.is_static = attr.is_static;
                o.is_tls = attr.is_tls;
            }

            if self.consume("=") {
                self.gvar_initializer(var)?;
            } else if is_definition && !attr.is_tls {
                self.sess.obj_mut(var).is_tentative = true;
            }
        }
        Ok(())
    }

    fn mark_fn_live(&mut self, fn_id: crate::common::session::ObjId) {
        if self.sess.obj(fn_id).is_live {
            return;
        }
        self.sess.obj_mut(fn_id).is_live = true;
        let refs = self.sess.obj(fn_id).refs.clone();
        for name in refs {
            if let Some(f) = self.find_func(&name) {
                self.mark_fn_live(f);
            }
        }
    }

    /// program = (typedef | function-definition | global-variable)*
    pub fn parse(mut self) -> CResult<Vec<crate::common::session::ObjId>> {
        while !self.tok().is_eof() {
            if self.equal("_Static_assert") {
                self.advance();
                self.static_assertion()?;
                continue;
            }

            let mut attr = Some(VarAttr::default());
            let basety = self.declspec(&mut attr)?;
            let attr = attr.unwrap();

            if attr.is_typedef {
                self.parse_typedef(basety)?;
                continue;
            }
            self.global_declaration(basety, &attr)?;
        }

        // "static inline" functions are only emitted when something
        // reachable references them.
        let globals = self.globals.clone();
        for &g in &globals {
            let o = self.sess.obj(g);
            if self.sess.types.is_func(o.ty)
                && (o.is_referenced || !(o.is_static && o.is_inline))
            {
                self.mark_fn_live(g);
            }
        }
        Ok(self.globals)
    }
}
