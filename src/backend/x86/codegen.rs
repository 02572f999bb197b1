//! Single-pass AST-to-assembly emitter.
//!
//! `%rax` is the accumulator, `%rcx` the scratch register, `%xmm0` carries
//! float results and x87 `st(0)` carries `long double`. Binary operators
//! always evaluate the left operand first, then the right; C leaves the
//! order unspecified, but a fixed order matches what most existing code
//! silently assumes.
//!
//! Instead of `push`/`pop`, intermediate values are spilled to per-function
//! temporary stack slots addressed from `%rbp`. Slots are reused across
//! sibling subexpressions unless a `setjmp`-family function is referenced
//! anywhere in the translation unit; a `longjmp` back into a frame must
//! find every live temporary where it was left. The deepest slot seen
//! becomes the frame size, patched into the prologue after the body is
//! emitted.

use crate::backend::x86::wln;
use crate::common::session::{GotoTarget, ObjId, ScopeId, Session};
use crate::common::types::{align_to, TypeId, TypeKind};
use crate::driver::cli::Options;
use crate::frontend::parser::ast::{BinOp, Expr, ExprKind, Stmt, StmtKind};

pub struct CodeGen<'a> {
    pub(super) sess: &'a mut Session,
    pub(super) opts: &'a Options,
    pub(super) out: String,
    pub(super) count: u32,
    pub(super) current_fn: Option<ObjId>,
    pub(super) goto_table: Vec<GotoTarget>,
    pub(super) fn_dealloc_vla: bool,

    pub(super) va_gp_start: i64,
    pub(super) va_fp_start: i64,
    pub(super) va_st_start: i64,
    pub(super) vla_base_ofs: i64,
    pub(super) rtn_ptr_ofs: i64,
    pub(super) lvar_stk_sz: i64,
    pub(super) peak_stk_usage: i64,
    pub(super) tmp_stk: Vec<i64>,
}

/// Lower the whole program to GAS text.
pub fn codegen(sess: &mut Session, opts: &Options, prog: &[ObjId]) -> String {
    let mut cg = CodeGen {
        sess,
        opts,
        out: String::new(),
        count: 0,
        current_fn: None,
        goto_table: Vec::new(),
        fn_dealloc_vla: false,
        va_gp_start: 0,
        va_fp_start: 0,
        va_st_start: 0,
        vla_base_ofs: 0,
        rtn_ptr_ofs: 0,
        lvar_stk_sz: 0,
        peak_stk_usage: 0,
        tmp_stk: Vec::new(),
    };
    cg.emit_data(prog);
    cg.emit_text(prog);
    wln!(cg, "  .section  .note.GNU-stack,\"\",@progbits");
    cg.out
}

pub(super) fn reg_ax(sz: i64) -> &'static str {
    match sz {
        1 => "%al",
        2 => "%ax",
        4 => "%eax",
        _ => "%rax",
    }
}

pub(super) fn reg_dx(sz: i64) -> &'static str {
    match sz {
        1 => "%dl",
        2 => "%dx",
        4 => "%edx",
        _ => "%rdx",
    }
}

impl<'a> CodeGen<'a> {
    fn ty_size(&self, ty: TypeId) -> i64 {
        self.sess.types.size(ty)
    }

    pub(super) fn count(&mut self) -> u32 {
        self.count += 1;
        self.count
    }

    // ----- temporary stack -----

    fn push_tmpstack(&mut self, slots: i64) -> i64 {
        let offset = if self.sess.dont_reuse_stack {
            self.peak_stk_usage += 8 * slots;
            self.peak_stk_usage
        } else {
            let stk_pos = match self.tmp_stk.last() {
                Some(&top) => top,
                None => self.lvar_stk_sz,
            };
            let pos = stk_pos + 8 * slots;
            self.peak_stk_usage = self.peak_stk_usage.max(pos);
            pos
        };
        self.tmp_stk.push(offset);
        offset
    }

    fn pop_tmpstack(&mut self) -> i64 {
        self.tmp_stk.pop().expect("temp stack underflow")
    }

    pub(super) fn push(&mut self) -> i64 {
        let offset = self.push_tmpstack(1);
        wln!(self, "  mov %rax, -{}(%rbp)", offset);
        offset
    }

    pub(super) fn pop(&mut self, arg: &str) {
        let offset = self.pop_tmpstack();
        wln!(self, "  mov -{}(%rbp), {}", offset, arg);
    }

    fn pushf(&mut self) {
        let offset = self.push_tmpstack(1);
        wln!(self, "  movsd %xmm0, -{}(%rbp)", offset);
    }

    fn popf(&mut self) {
        let offset = self.pop_tmpstack();
        wln!(self, "  movsd -{}(%rbp), %xmm1", offset);
    }

    fn push_x87(&mut self) {
        let offset = self.push_tmpstack(2);
        wln!(self, "  fstpt -{}(%rbp)", offset);
    }

    fn pop_x87(&mut self) {
        let offset = self.pop_tmpstack();
        wln!(self, "  fldt -{}(%rbp)", offset);
    }

    // ----- loads and stores -----

    /// char and short loads always extend to int width, so the low half of
    /// a register can be assumed valid.
    pub(super) fn load_extend_int(&mut self, ty: TypeId, ofs: i64, ptr: &str, reg: &str) {
        let insn = if self.sess.types.is_unsigned(ty) {
            "movz"
        } else {
            "movs"
        };
        match self.ty_size(ty) {
            1 => wln!(self, "  {}bl {}({}), {}", insn, ofs, ptr, reg),
            2 => wln!(self, "  {}wl {}({}), {}", insn, ofs, ptr, reg),
            4 => wln!(self, "  movl {}({}), {}", ofs, ptr, reg),
            _ => wln!(self, "  mov {}({}), {}", ofs, ptr, reg),
        }
    }

    pub(super) fn regop_ax(&self, ty: TypeId) -> &'static str {
        if self.ty_size(ty) <= 4 {
            "%eax"
        } else {
            "%rax"
        }
    }

    pub(super) fn gen_mem_copy(&mut self, sofs: i64, sptr: &str, dofs: i64, dptr: &str, sz: i64) {
        let mut i = 0;
        while i < sz {
            let rem = sz - i;
            if rem >= 16 {
                wln!(self, "  movups {}({}), %xmm0", i + sofs, sptr);
                wln!(self, "  movups %xmm0, {}({})", i + dofs, dptr);
                i += 16;
                continue;
            }
            let p2 = if rem >= 8 {
                8
            } else if rem >= 4 {
                4
            } else if rem >= 2 {
                2
            } else {
                1
            };
            wln!(self, "  mov {}({}), {}", i + sofs, sptr, reg_dx(p2));
            wln!(self, "  mov {}, {}({})", reg_dx(p2), i + dofs, dptr);
            i += p2;
        }
    }

    fn gen_mem_zero(&mut self, dofs: i64, dptr: &str, sz: i64) {
        wln!(self, "  xor %eax, %eax");
        let mut i = 0;
        while i < sz {
            let rem = sz - i;
            let p2 = if rem >= 8 {
                8
            } else if rem >= 4 {
                4
            } else if rem >= 2 {
                2
            } else {
                1
            };
            wln!(self, "  mov {}, {}({})", reg_ax(p2), i + dofs, dptr);
            i += p2;
        }
    }

    /// Compute the absolute address of an lvalue into %rax.
    fn gen_addr(&mut self, node: &Expr) {
        match &node.kind {
            ExprKind::Var(var) => {
                let obj = self.sess.obj(*var);
                let (is_local, is_tls, is_def, ofs, name) = (
                    obj.is_local,
                    obj.is_tls,
                    obj.is_definition,
                    obj.ofs,
                    obj.name.clone(),
                );
                let ty = obj.ty;

                // A VLA's pointer lives in its stack slot.
                if self.sess.types.is_vla(ty) {
                    wln!(self, "  mov {}(%rbp), %rax", ofs);
                    return;
                }
                if is_local {
                    wln!(self, "  lea {}(%rbp), %rax", ofs);
                    return;
                }

                if self.opts.opt_fpic {
                    if is_tls {
                        wln!(self, "  data16 lea \"{}\"@tlsgd(%rip), %rdi", name);
                        wln!(self, "  .value 0x6666");
                        wln!(self, "  rex64");
                        wln!(self, "  call __tls_get_addr@PLT");
                        return;
                    }
                    wln!(self, "  mov \"{}\"@GOTPCREL(%rip), %rax", name);
                    return;
                }

                if is_tls {
                    wln!(self, "  mov %fs:0, %rax");
                    wln!(self, "  add $\"{}\"@tpoff, %rax", name);
                    return;
                }

                // RIP-relative addressing for position independence; an
                // undefined function may live in a shared object, so it
                // goes through the GOT.
                if self.sess.types.is_func(ty) {
                    if is_def {
                        wln!(self, "  lea \"{}\"(%rip), %rax", name);
                    } else {
                        wln!(self, "  mov \"{}\"@GOTPCREL(%rip), %rax", name);
                    }
                    return;
                }
                wln!(self, "  lea \"{}\"(%rip), %rax", name);
            }
            ExprKind::Deref(inner) => {
                self.gen_expr(inner);
            }
            ExprKind::Chain { lhs, rhs } | ExprKind::Comma { lhs, rhs } => {
                self.gen_expr(lhs);
                self.gen_addr(rhs);
            }
            ExprKind::Member { base, member } => {
                // Struct rvalues (call results, assignments, conditionals,
                // statement expressions) evaluate to their buffer address.
                let through_value = match &base.kind {
                    ExprKind::FunCall { ret_buffer, .. } => ret_buffer.is_some(),
                    ExprKind::Assign { .. }
                    | ExprKind::Cond { .. }
                    | ExprKind::StmtExpr { .. } => self.sess.types.is_struct_union(base.ty),
                    _ => false,
                };
                if through_value {
                    self.gen_expr(base);
                } else {
                    self.gen_addr(base);
                }
                wln!(self, "  add ${}, %rax", member.offset);
            }
            _ => panic!("not an lvalue"),
        }
    }

    /// Load a value of the given type from where %rax points.
    pub(super) fn load(&mut self, ty: TypeId) {
        match self.sess.types.kind(ty) {
            // An array, struct or function evaluates to its address: this
            // is where array-to-pointer decay happens at runtime.
            TypeKind::Array { .. }
            | TypeKind::Vla { .. }
            | TypeKind::Struct { .. }
            | TypeKind::Func(_) => {}
            TypeKind::Float => wln!(self, "  movss (%rax), %xmm0"),
            TypeKind::Double => wln!(self, "  movsd (%rax), %xmm0"),
            TypeKind::LongDouble => wln!(self, "  fninit; fldt (%rax)"),
            _ => {
                let reg = self.regop_ax(ty);
                self.load_extend_int(ty, 0, "%rax", reg);
            }
        }
    }

    /// Store %rax (or the float accumulator) through the saved address.
    fn store(&mut self, ty: TypeId) {
        self.pop("%rcx");
        match self.sess.types.kind(ty) {
            TypeKind::Struct { .. } => {
                let sz = self.ty_size(ty);
                self.gen_mem_copy(0, "%rax", 0, "%rcx", sz);
            }
            TypeKind::Float => wln!(self, "  movss %xmm0, (%rcx)"),
            TypeKind::Double => wln!(self, "  movsd %xmm0, (%rcx)"),
            TypeKind::LongDouble => {
                wln!(self, "  fstpt (%rcx)");
                wln!(self, "  fninit; fldt (%rcx)");
            }
            _ => match self.ty_size(ty) {
                1 => wln!(self, "  mov %al, (%rcx)"),
                2 => wln!(self, "  mov %ax, (%rcx)"),
                4 => wln!(self, "  mov %eax, (%rcx)"),
                _ => wln!(self, "  mov %rax, (%rcx)"),
            },
        }
    }

    pub(super) fn cmp_zero(&mut self, ty: TypeId) {
        match self.sess.types.kind(ty) {
            TypeKind::Float => {
                wln!(self, "  xorps %xmm1, %xmm1");
                wln!(self, "  ucomiss %xmm1, %xmm0");
            }
            TypeKind::Double => {
                wln!(self, "  xorpd %xmm1, %xmm1");
                wln!(self, "  ucomisd %xmm1, %xmm0");
            }
            TypeKind::LongDouble => {
                wln!(self, "  fldz");
                wln!(self, "  fucomip");
                wln!(self, "  fstp %st(0)");
            }
            _ => {
                if self.sess.types.is_integer(ty) && self.ty_size(ty) <= 4 {
                    wln!(self, "  test %eax, %eax");
                } else {
                    wln!(self, "  test %rax, %rax");
                }
            }
        }
    }

    pub(super) fn builtin_alloca(&mut self, var: Option<ObjId>) {
        // Extend the stack by %rax and realign.
        wln!(self, "  sub %rax, %rsp");
        wln!(self, "  and $-16, %rsp");
        match var {
            Some(v) => {
                let ofs = self.sess.obj(v).ofs;
                wln!(self, "  mov %rsp, {}(%rbp)", ofs);
            }
            None => wln!(self, "  mov %rsp, %rax"),
        }
    }

    /// Restore %rsp when control leaves VLA scopes.
    fn dealloc_vla(&mut self, top_vla: Option<ObjId>, target_vla: Option<ObjId>) {
        if !self.fn_dealloc_vla || top_vla == target_vla {
            return;
        }
        match target_vla {
            Some(v) => {
                let ofs = self.sess.obj(v).ofs;
                wln!(self, "  mov {}(%rbp), %rsp", ofs);
            }
            None => wln!(self, "  mov -{}(%rbp), %rsp", self.vla_base_ofs),
        }
    }

    // ----- expressions -----

    pub(super) fn gen_expr(&mut self, node: &Expr) {
        match &node.kind {
            ExprKind::Null => {}
            ExprKind::Num(val) => {
                wln!(self, "  mov ${}, %rax", val);
            }
            ExprKind::Fnum(fval) => match self.sess.types.kind(node.ty) {
                TypeKind::Float => {
                    let bits = (*fval as f32).to_bits();
                    wln!(self, "  mov ${}, %eax  # float {}", bits, fval);
                    wln!(self, "  movq %rax, %xmm0");
                }
                TypeKind::LongDouble => {
                    let (lo, hi) = crate::common::long_double::f64_to_x87(*fval);
                    wln!(self, "  movq ${}, %rax", lo as i64);
                    wln!(self, "  movw ${}, %dx", hi);
                    wln!(self, "  push %rdx");
                    wln!(self, "  push %rax");
                    wln!(self, "  fninit; fldt (%rsp)");
                    wln!(self, "  add $16, %rsp");
                }
                _ => {
                    let bits = fval.to_bits();
                    wln!(self, "  mov ${}, %rax  # double {}", bits as i64, fval);
                    wln!(self, "  movq %rax, %xmm0");
                }
            },
            ExprKind::Pos(inner) => self.gen_expr(inner),
            ExprKind::Neg(inner) => {
                self.gen_expr(inner);
                match self.sess.types.kind(node.ty) {
                    TypeKind::Float => {
                        wln!(self, "  mov $1, %rax");
                        wln!(self, "  shl $31, %rax");
                        wln!(self, "  movq %rax, %xmm1");
                        wln!(self, "  xorps %xmm1, %xmm0");
                    }
                    TypeKind::Double => {
                        wln!(self, "  mov $1, %rax");
                        wln!(self, "  shl $63, %rax");
                        wln!(self, "  movq %rax, %xmm1");
                        wln!(self, "  xorpd %xmm1, %xmm0");
                    }
                    TypeKind::LongDouble => wln!(self, "  fchs"),
                    _ => wln!(self, "  neg %rax"),
                }
            }
            ExprKind::Var(_) => {
                self.gen_addr(node);
                self.load(node.ty);
            }
            ExprKind::Member { member, .. } => {
                self.gen_addr(node);
                self.load(node.ty);
                if member.is_bitfield {
                    wln!(
                        self,
                        "  shl ${}, %rax",
                        64 - member.bit_width - member.bit_offset
                    );
                    if self.sess.types.is_unsigned(member.ty) {
                        wln!(self, "  shr ${}, %rax", 64 - member.bit_width);
                    } else {
                        wln!(self, "  sar ${}, %rax", 64 - member.bit_width);
                    }
                }
            }
            ExprKind::Deref(inner) => {
                self.gen_expr(inner);
                self.load(node.ty);
            }
            ExprKind::Addr(inner) => self.gen_addr(inner),
            ExprKind::Assign { lhs, rhs } => {
                self.gen_addr(lhs);
                self.push();
                self.gen_expr(rhs);

                let bitfield = match &lhs.kind {
                    ExprKind::Member { member, .. } if member.is_bitfield => {
                        Some(member.clone())
                    }
                    _ => None,
                };
                if let Some(mem) = bitfield {
                    // Read the containing unit, punch out the field window,
                    // merge in the new bits and write back. The pre-shift
                    // value stays in %rax as the expression result.
                    let field = 1i64.wrapping_shl(mem.bit_width as u32).wrapping_sub(1);
                    wln!(self, "  mov ${}, %rcx", field);
                    wln!(self, "  and %rcx, %rax");
                    wln!(self, "  mov %rax, %rdx");

                    self.pop("%rax");
                    self.push();
                    self.load(mem.ty);

                    let mask = field.wrapping_shl(mem.bit_offset as u32);
                    wln!(self, "  mov ${}, %rcx", !mask);
                    wln!(self, "  and %rcx, %rax");
                    wln!(self, "  mov %rdx, %rcx");
                    wln!(self, "  shl ${}, %rcx", mem.bit_offset);
                    wln!(self, "  or %rcx, %rax");
                    self.store(node.ty);
                    wln!(self, "  mov %rdx, %rax");

                    if !self.sess.types.is_unsigned(mem.ty) {
                        wln!(self, "  shl ${}, %rax", 64 - mem.bit_width);
                        wln!(self, "  sar ${}, %rax", 64 - mem.bit_width);
                    }
                    return;
                }
                self.store(node.ty);
            }
            ExprKind::StmtExpr {
                body,
                top_vla,
                target_vla,
            } => {
                for s in body {
                    self.gen_stmt(s);
                }
                self.dealloc_vla(*top_vla, *target_vla);
            }
            ExprKind::Chain { lhs, rhs } | ExprKind::Comma { lhs, rhs } => {
                self.gen_expr(lhs);
                self.gen_expr(rhs);
            }
            ExprKind::Cast(inner) => {
                self.gen_expr(inner);
                self.cast(inner.ty, node.ty);
            }
            ExprKind::MemZero(var) => {
                let (ofs, sz) = {
                    let o = self.sess.obj(*var);
                    (o.ofs, self.sess.types.size(o.ty))
                };
                self.gen_mem_zero(ofs, "%rbp", sz);
            }
            ExprKind::Cond { cond, then, els } => {
                let c = self.count();
                self.gen_expr(cond);
                wln!(self, "  test %al, %al");
                wln!(self, "  je .L.else.{}", c);
                self.gen_expr(then);
                wln!(self, "  jmp .L.end.{}", c);
                wln!(self, ".L.else.{}:", c);
                self.gen_expr(els);
                wln!(self, ".L.end.{}:", c);
            }
            ExprKind::Not(inner) => {
                self.gen_expr(inner);
                wln!(self, "  xor $1, %al");
            }
            ExprKind::BitNot(inner) => {
                self.gen_expr(inner);
                wln!(self, "  not %rax");
            }
            ExprKind::LogAnd { lhs, rhs } => {
                let c = self.count();
                self.gen_expr(lhs);
                wln!(self, "  test %al, %al");
                wln!(self, "  je .L.false.{}", c);
                self.gen_expr(rhs);
                wln!(self, ".L.false.{}:", c);
            }
            ExprKind::LogOr { lhs, rhs } => {
                let c = self.count();
                self.gen_expr(lhs);
                wln!(self, "  test %al, %al");
                wln!(self, "  jne .L.true.{}", c);
                self.gen_expr(rhs);
                wln!(self, ".L.true.{}:", c);
            }
            ExprKind::FunCall { .. } => self.gen_funcall(node),
            ExprKind::LabelVal { unique_label } => {
                wln!(self, "  lea {}(%rip), %rax", unique_label);
            }
            ExprKind::Alloca { size, var } => {
                self.gen_expr(size);
                self.builtin_alloca(*var);
            }
            ExprKind::VaStart(ap) => {
                self.gen_expr(ap);
                wln!(self, "  movl ${}, (%rax)", self.va_gp_start);
                wln!(self, "  movl ${}, 4(%rax)", self.va_fp_start);
                wln!(self, "  lea {}(%rbp), %rdx", self.va_st_start);
                wln!(self, "  movq %rdx, 8(%rax)");
                wln!(self, "  lea -176(%rbp), %rdx");
                wln!(self, "  movq %rdx, 16(%rax)");
            }
            ExprKind::VaCopy { lhs, rhs } => {
                self.gen_expr(lhs);
                self.push();
                self.gen_expr(rhs);
                self.pop("%rcx");
                self.gen_mem_copy(0, "%rax", 0, "%rcx", 24);
            }
            ExprKind::VaArg { ap, var } => self.gen_va_arg(ap, *var),
            ExprKind::Binary { op, lhs, rhs } => self.gen_binary(node, *op, lhs, rhs),
        }
    }

    fn gen_binary(&mut self, node: &Expr, op: BinOp, lhs: &Expr, rhs: &Expr) {
        match self.sess.types.kind(lhs.ty) {
            TypeKind::Float | TypeKind::Double => {
                self.gen_expr(lhs);
                self.pushf();
                self.gen_expr(rhs);
                self.popf();
                // The left value is in %xmm1, the right in %xmm0.
                let sz = if matches!(self.sess.types.kind(lhs.ty), TypeKind::Double) {
                    "sd"
                } else {
                    "ss"
                };
                match op {
                    BinOp::Add => wln!(self, "  add{} %xmm1, %xmm0", sz),
                    BinOp::Sub => {
                        wln!(self, "  sub{} %xmm0, %xmm1", sz);
                        wln!(self, "  movaps %xmm1, %xmm0");
                    }
                    BinOp::Mul => wln!(self, "  mul{} %xmm1, %xmm0", sz),
                    BinOp::Div => {
                        wln!(self, "  div{} %xmm0, %xmm1", sz);
                        wln!(self, "  movaps %xmm1, %xmm0");
                    }
                    BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                        if matches!(op, BinOp::Gt | BinOp::Ge) {
                            wln!(self, "  ucomi{} %xmm0, %xmm1", sz);
                        } else {
                            wln!(self, "  ucomi{} %xmm1, %xmm0", sz);
                        }
                        match op {
                            BinOp::Eq => {
                                wln!(self, "  sete %al");
                                wln!(self, "  setnp %dl");
                                wln!(self, "  and %dl, %al");
                            }
                            BinOp::Ne => {
                                wln!(self, "  setne %al");
                                wln!(self, "  setp %dl");
                                wln!(self, "  or %dl, %al");
                            }
                            BinOp::Lt | BinOp::Gt => wln!(self, "  seta %al"),
                            _ => wln!(self, "  setae %al"),
                        }
                        wln!(self, "  movzbl %al, %eax");
                    }
                    _ => panic!("invalid float expression"),
                }
                return;
            }
            TypeKind::LongDouble => {
                self.gen_expr(lhs);
                self.push_x87();
                self.gen_expr(rhs);
                self.pop_x87();
                match op {
                    BinOp::Add => wln!(self, "  faddp"),
                    BinOp::Sub => wln!(self, "  fsubp"),
                    BinOp::Mul => wln!(self, "  fmulp"),
                    BinOp::Div => wln!(self, "  fdivp"),
                    BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                        if matches!(op, BinOp::Lt | BinOp::Le) {
                            wln!(self, "  fxch %st(1)");
                        }
                        wln!(self, "  fucomip");
                        wln!(self, "  fstp %st(0)");
                        match op {
                            BinOp::Eq => {
                                wln!(self, "  sete %al");
                                wln!(self, "  setnp %dl");
                                wln!(self, "  and %dl, %al");
                            }
                            BinOp::Ne => {
                                wln!(self, "  setne %al");
                                wln!(self, "  setp %dl");
                                wln!(self, "  or %dl, %al");
                            }
                            BinOp::Lt | BinOp::Gt => wln!(self, "  seta %al"),
                            _ => wln!(self, "  setae %al"),
                        }
                        wln!(self, "  movzbl %al, %eax");
                    }
                    _ => panic!("invalid long double expression"),
                }
                return;
            }
            _ => {}
        }

        self.gen_expr(lhs);
        self.push();
        self.gen_expr(rhs);
        self.pop("%rcx");
        // Left value in %rcx, right in %rax.

        let is_r64 = self.ty_size(lhs.ty) == 8 || self.sess.types.base(lhs.ty).is_some();
        let (ax, cx) = if is_r64 {
            ("%rax", "%rcx")
        } else {
            ("%eax", "%ecx")
        };

        match op {
            BinOp::Add => wln!(self, "  add {}, {}", cx, ax),
            BinOp::Sub => {
                wln!(self, "  sub {}, {}", ax, cx);
                wln!(self, "  mov {}, {}", cx, ax);
            }
            BinOp::Mul => wln!(self, "  imul {}, {}", cx, ax),
            BinOp::Div | BinOp::Mod => {
                wln!(self, "  xchg {}, {}", cx, ax);
                if self.sess.types.is_unsigned(node.ty) {
                    wln!(self, "  xor %edx, %edx");
                    wln!(self, "  div {}", cx);
                } else {
                    if self.ty_size(lhs.ty) == 8 {
                        wln!(self, "  cqo");
                    } else {
                        wln!(self, "  cdq");
                    }
                    wln!(self, "  idiv {}", cx);
                }
                if matches!(op, BinOp::Mod) {
                    wln!(self, "  mov %rdx, %rax");
                }
            }
            BinOp::BitAnd => wln!(self, "  and {}, {}", cx, ax),
            BinOp::BitOr => wln!(self, "  or {}, {}", cx, ax),
            BinOp::BitXor => wln!(self, "  xor {}, {}", cx, ax),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let unsigned = self.sess.types.is_unsigned(lhs.ty);
                let ins = match op {
                    BinOp::Eq => "sete",
                    BinOp::Ne => "setne",
                    BinOp::Lt => {
                        if unsigned {
                            "setb"
                        } else {
                            "setl"
                        }
                    }
                    BinOp::Le => {
                        if unsigned {
                            "setbe"
                        } else {
                            "setle"
                        }
                    }
                    BinOp::Gt => {
                        if unsigned {
                            "seta"
                        } else {
                            "setg"
                        }
                    }
                    _ => {
                        if unsigned {
                            "setae"
                        } else {
                            "setge"
                        }
                    }
                };
                wln!(self, "  cmp {}, {}", ax, cx);
                wln!(self, "  {} %al", ins);
                wln!(self, "  movzbl %al, %eax");
            }
            BinOp::Shl => {
                wln!(self, "  xchg {}, {}", cx, ax);
                wln!(self, "  shl %cl, {}", ax);
            }
            BinOp::Shr => {
                wln!(self, "  xchg {}, {}", cx, ax);
                wln!(self, "  shr %cl, {}", ax);
            }
            BinOp::Sar => {
                wln!(self, "  xchg {}, {}", cx, ax);
                wln!(self, "  sar %cl, {}", ax);
            }
        }
    }

    // ----- statements -----

    pub(super) fn gen_stmt(&mut self, node: &Stmt) {
        match &node.kind {
            StmtKind::If { cond, then, els } => {
                let c = self.count();
                self.gen_expr(cond);
                wln!(self, "  test %al, %al");
                wln!(self, "  je  .L.else.{}", c);
                self.gen_stmt(then);
                wln!(self, "  jmp .L.end.{}", c);
                wln!(self, ".L.else.{}:", c);
                if let Some(els) = els {
                    self.gen_stmt(els);
                }
                wln!(self, ".L.end.{}:", c);
            }
            StmtKind::For {
                init,
                cond,
                inc,
                body,
                brk_label,
                cont_label,
                top_vla,
                target_vla,
            } => {
                let c = self.count();
                if let Some(init) = init {
                    self.gen_stmt(init);
                }
                wln!(self, ".L.begin.{}:", c);
                if let Some(cond) = cond {
                    self.gen_expr(cond);
                    wln!(self, "  test %al, %al");
                    wln!(self, "  je {}", brk_label);
                }
                self.gen_stmt(body);
                wln!(self, "{}:", cont_label);
                if let Some(inc) = inc {
                    self.gen_expr(inc);
                }
                wln!(self, "  jmp .L.begin.{}", c);
                wln!(self, "{}:", brk_label);
                self.dealloc_vla(*top_vla, *target_vla);
            }
            StmtKind::Do {
                body,
                cond,
                brk_label,
                cont_label,
            } => {
                let c = self.count();
                wln!(self, ".L.begin.{}:", c);
                self.gen_stmt(body);
                wln!(self, "{}:", cont_label);
                self.gen_expr(cond);
                wln!(self, "  test %al, %al");
                wln!(self, "  jne .L.begin.{}", c);
                wln!(self, "{}:", brk_label);
            }
            StmtKind::Switch {
                cond,
                body,
                cases,
                default_label,
                brk_label,
            } => {
                self.gen_expr(cond);
                let (ax, cx, dx) = if self.ty_size(cond.ty) == 8 {
                    ("%rax", "%rcx", "%rdx")
                } else {
                    ("%eax", "%ecx", "%edx")
                };
                // Each case range compiles to an unsigned bounds check:
                // (x - begin) <= (end - begin).
                for case in cases {
                    wln!(self, "  mov {}, {}", ax, cx);
                    wln!(self, "  mov ${}, {}", case.begin, dx);
                    wln!(self, "  sub {}, {}", dx, cx);
                    wln!(self, "  mov ${}, {}", case.end.wrapping_sub(case.begin), dx);
                    wln!(self, "  cmp {}, {}", dx, cx);
                    wln!(self, "  jbe {}", case.label);
                }
                if let Some(default) = default_label {
                    wln!(self, "  jmp {}", default);
                }
                wln!(self, "  jmp {}", brk_label);
                self.gen_stmt(body);
                wln!(self, "{}:", brk_label);
            }
            StmtKind::Case { label, body } => {
                wln!(self, "{}:", label);
                if let Some(body) = body {
                    self.gen_stmt(body);
                }
            }
            StmtKind::Block {
                body,
                top_vla,
                target_vla,
            } => {
                for s in body {
                    self.gen_stmt(s);
                }
                self.dealloc_vla(*top_vla, *target_vla);
            }
            StmtKind::Goto { id } => {
                let target = self.goto_table[*id].clone();
                self.dealloc_vla(target.top_vla, target.target_vla);
                wln!(self, "  jmp {}", target.unique_label);
            }
            StmtKind::GotoExpr(e) => {
                self.gen_expr(e);
                wln!(self, "  jmp *%rax");
            }
            StmtKind::Label { unique_label, body } => {
                wln!(self, "{}:", unique_label);
                if let Some(body) = body {
                    self.gen_stmt(body);
                }
            }
            StmtKind::Return(e) => {
                if let Some(e) = e {
                    self.gen_expr(e);
                    if self.sess.types.is_struct_union(e.ty) {
                        if self.ty_size(e.ty) <= 16 {
                            self.copy_struct_reg();
                        } else {
                            self.copy_struct_mem();
                        }
                    }
                }
                wln!(self, "  jmp 9f");
            }
            StmtKind::ExprStmt(e) => self.gen_expr(e),
            StmtKind::Asm(s) => wln!(self, "  {}", s),
        }
    }

    /// Assign stack offsets scope by scope. Siblings restart from their
    /// parent's bottom, sharing slots; the returned maximum becomes the
    /// local-variable block size.
    fn assign_lvar_offsets(&mut self, sc: ScopeId, mut bottom: i64) -> i64 {
        let locals: Vec<ObjId> = self.sess.scope(sc).locals.clone();
        for var in locals {
            let (pass_by_stack, stack_offset, ty) = {
                let o = self.sess.obj(var);
                (o.pass_by_stack, o.stack_offset, o.ty)
            };
            if pass_by_stack {
                self.sess.obj_mut(var).ofs = stack_offset + 16;
                continue;
            }
            // The psABI requires arrays of 16 bytes or more to be aligned
            // to at least 16 bytes.
            let size = self.sess.types.size(ty);
            let mut align = self.sess.types.align(ty);
            if matches!(self.sess.types.kind(ty), TypeKind::Array { .. }) && size >= 16 {
                align = align.max(16);
            }
            bottom += size.max(0);
            bottom = align_to(bottom, align);
            self.sess.obj_mut(var).ofs = -bottom;
        }

        let mut max_depth = bottom;
        let children: Vec<ScopeId> = self.sess.scope(sc).children.clone();
        for sub in children {
            let sub_depth = self.assign_lvar_offsets(sub, bottom);
            if self.sess.dont_reuse_stack {
                bottom = sub_depth;
                max_depth = sub_depth;
            } else {
                max_depth = max_depth.max(sub_depth);
            }
        }
        max_depth
    }

    fn emit_text(&mut self, prog: &[ObjId]) {
        for &fn_id in prog {
            {
                let f = self.sess.obj(fn_id);
                if !f.is_function || !f.is_definition || !f.is_live {
                    continue;
                }
            }
            let name = self.sess.obj(fn_id).name.clone();
            let is_static = self.sess.obj(fn_id).is_static;
            let fn_ty = self.sess.obj(fn_id).ty;

            if is_static {
                wln!(self, "  .local \"{}\"", name);
            } else {
                wln!(self, "  .globl \"{}\"", name);
            }
            if self.opts.opt_func_sections {
                wln!(self, "  .section .text.\"{}\",\"ax\",@progbits", name);
            } else {
                wln!(self, "  .text");
            }
            wln!(self, "  .type \"{}\", @function", name);
            wln!(self, "\"{}\":", name);

            let return_ty = self.sess.types.return_ty(fn_ty);
            let rtn_by_stk = self.sess.types.size(return_ty) > 16;
            let params = self.sess.types.func(fn_ty).params.clone();
            let is_variadic = self.sess.types.func(fn_ty).is_variadic;
            let mut gp_count = rtn_by_stk as i64;
            let mut fp_count = 0i64;
            let arg_stk_size = self.calling_convention(&params, &mut gp_count, &mut fp_count);

            self.current_fn = Some(fn_id);
            self.goto_table = std::mem::take(&mut self.sess.obj_mut(fn_id).goto_table);
            self.fn_dealloc_vla = self.sess.obj(fn_id).dealloc_vla;

            // Prologue. The frame allocation is patched in afterwards,
            // once the peak temp-stack usage is known.
            wln!(self, "  push %rbp");
            wln!(self, "  mov %rsp, %rbp");
            let patch_at = self.out.len();
            wln!(self, "{:39}", "");

            self.lvar_stk_sz = 0;

            // Variadic functions spill the unused argument registers into
            // the 176-byte register save area at the frame bottom.
            if is_variadic {
                self.va_gp_start = gp_count * 8;
                self.va_fp_start = fp_count * 16 + 48;
                self.va_st_start = arg_stk_size + 16;
                self.lvar_stk_sz += 176;

                const GP64: [&str; 6] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];
                for i in gp_count..6 {
                    wln!(self, "  movq {}, -{}(%rbp)", GP64[i as usize], 176 - 8 * i);
                }
                if fp_count < 8 {
                    wln!(self, "  test %al, %al");
                    wln!(self, "  je 1f");
                    for i in fp_count..8 {
                        wln!(self, "  movaps %xmm{}, -{}(%rbp)", i, 128 - 16 * i);
                    }
                    wln!(self, "1:");
                }
            }

            if self.fn_dealloc_vla {
                self.lvar_stk_sz += 8;
                self.vla_base_ofs = self.lvar_stk_sz;
                wln!(self, "  mov %rsp, -{}(%rbp)", self.vla_base_ofs);
            }

            if rtn_by_stk {
                self.lvar_stk_sz += 8;
                self.rtn_ptr_ofs = self.lvar_stk_sz;
                wln!(self, "  mov %rdi, -{}(%rbp)", self.rtn_ptr_ofs);
            }

            let fn_scope = self
                .sess
                .types
                .func(fn_ty)
                .scope
                .expect("function without a scope");
            let base = self.lvar_stk_sz;
            self.lvar_stk_sz = self.assign_lvar_offsets(fn_scope, base);
            self.lvar_stk_sz = align_to(self.lvar_stk_sz, 8);
            self.peak_stk_usage = self.lvar_stk_sz;

            self.store_register_params(&params, rtn_by_stk);

            let body = self.sess.obj_mut(fn_id).body.take().expect("missing body");
            self.gen_stmt(&body);
            debug_assert!(self.tmp_stk.is_empty());
            self.sess.obj_mut(fn_id).body = Some(body);

            // Patch the reserved prologue line.
            let frame = align_to(self.peak_stk_usage, 16);
            let patch = format!("{:<39}", format!("  sub ${}, %rsp", frame));
            self.out.replace_range(patch_at..patch_at + 39, &patch);

            // Reaching the end of main is equivalent to returning 0.
            if name == "main" {
                wln!(self, "  mov $0, %rax");
            }

            wln!(self, "9:");
            wln!(self, "  mov %rbp, %rsp");
            wln!(self, "  pop %rbp");
            wln!(self, "  ret");

            let table = std::mem::take(&mut self.goto_table);
            self.sess.obj_mut(fn_id).goto_table = table;
            self.current_fn = None;
        }
    }
}
