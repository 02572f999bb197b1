//! System V AMD64 calling convention.
//!
//! Up to 6 integer arguments travel in RDI, RSI, RDX, RCX, R8, R9 and up
//! to 8 floating arguments in XMM0–XMM7. A struct or union of at most 16
//! bytes is split into two eight-byte chunks; a chunk whose scalars are
//! all `float`/`double` goes to an XMM register, anything else to a
//! general-purpose register, and if either register class runs out the
//! whole aggregate goes to the stack. Larger aggregates always go to the
//! stack, as does `long double` (as two eight-byte halves). A return value
//! larger than 16 bytes is written through a hidden pointer passed in RDI.

use crate::backend::x86::codegen::CodeGen;
use crate::backend::x86::wln;
use crate::common::session::ObjId;
use crate::common::types::{align_to, TypeId, TypeKind};
use crate::frontend::parser::ast::{Expr, ExprKind};

pub(super) const ARGREG8: [&str; 6] = ["%dil", "%sil", "%dl", "%cl", "%r8b", "%r9b"];
pub(super) const ARGREG16: [&str; 6] = ["%di", "%si", "%dx", "%cx", "%r8w", "%r9w"];
pub(super) const ARGREG32: [&str; 6] = ["%edi", "%esi", "%edx", "%ecx", "%r8d", "%r9d"];
pub(super) const ARGREG64: [&str; 6] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];

const GP_MAX: i64 = 6;
const FP_MAX: i64 = 8;

impl<'a> CodeGen<'a> {
    /// True if every scalar of `ty` within the byte range [lo, hi) is a
    /// `float` or `double`.
    pub(super) fn has_flonum(&self, ty: TypeId, lo: i64, hi: i64, offset: i64) -> bool {
        match self.sess.types.kind(ty) {
            TypeKind::Struct { members, .. } => members
                .iter()
                .all(|m| self.has_flonum(m.ty, lo, hi, offset + m.offset)),
            TypeKind::Array { base, len } => {
                let sz = self.sess.types.size(*base);
                (0..(*len).max(0)).all(|i| self.has_flonum(*base, lo, hi, offset + sz * i))
            }
            k => {
                offset < lo
                    || hi <= offset
                    || matches!(k, TypeKind::Float | TypeKind::Double)
            }
        }
    }

    pub(super) fn has_flonum1(&self, ty: TypeId) -> bool {
        self.has_flonum(ty, 0, 8, 0)
    }

    pub(super) fn has_flonum2(&self, ty: TypeId) -> bool {
        self.has_flonum(ty, 8, 16, 0)
    }

    /// Classify every argument, marking the stack-passed ones and laying
    /// out their area. Returns the stack area size; `gp_count`/`fp_count`
    /// come back clamped to the register file sizes.
    pub(super) fn calling_convention(
        &mut self,
        args: &[ObjId],
        gp_count: &mut i64,
        fp_count: &mut i64,
    ) -> i64 {
        let mut stack: i64 = 0;
        let mut gp = *gp_count;
        let mut fp: i64 = 0;

        for &var in args {
            let ty = self.sess.obj(var).ty;
            let size = self.sess.types.size(ty);
            let align = self.sess.types.align(ty);

            let in_regs = match self.sess.types.kind(ty) {
                TypeKind::Struct { .. } => {
                    if size <= 16 {
                        let fp_inc = self.has_flonum1(ty) as i64
                            + (size > 8 && self.has_flonum2(ty)) as i64;
                        let gp_inc = !self.has_flonum1(ty) as i64
                            + (size > 8 && !self.has_flonum2(ty)) as i64;
                        if (fp_inc == 0 || fp + fp_inc <= FP_MAX)
                            && (gp_inc == 0 || gp + gp_inc <= GP_MAX)
                        {
                            fp += fp_inc;
                            gp += gp_inc;
                            true
                        } else {
                            false
                        }
                    } else {
                        false
                    }
                }
                TypeKind::Float | TypeKind::Double => {
                    let old = fp;
                    fp += 1;
                    old < FP_MAX
                }
                TypeKind::LongDouble => false,
                _ => {
                    let old = gp;
                    gp += 1;
                    old < GP_MAX
                }
            };
            if in_regs {
                continue;
            }

            self.sess.obj_mut(var).pass_by_stack = true;
            if align > 8 {
                stack = align_to(stack, align);
            }
            self.sess.obj_mut(var).stack_offset = stack;
            stack += align_to(size, 8);
        }

        *gp_count = gp.min(GP_MAX);
        *fp_count = fp.min(FP_MAX);
        stack
    }

    /// Copy stack-passed arguments from their spill slots into the
    /// argument area below %rsp.
    fn place_stack_args(&mut self, args: &[ObjId]) {
        for &var in args {
            let (pass_by_stack, ofs, stack_offset, ty) = {
                let o = self.sess.obj(var);
                (o.pass_by_stack, o.ofs, o.stack_offset, o.ty)
            };
            if !pass_by_stack {
                continue;
            }
            let size = self.sess.types.size(ty);
            match self.sess.types.kind(ty) {
                TypeKind::Struct { .. }
                | TypeKind::Float
                | TypeKind::Double
                | TypeKind::LongDouble => {
                    self.gen_mem_copy(ofs, "%rbp", stack_offset, "%rsp", size);
                }
                _ => {
                    let reg = self.regop_ax(ty);
                    self.load_extend_int(ty, ofs, "%rbp", reg);
                    wln!(self, "  mov %rax, {}(%rsp)", stack_offset);
                }
            }
        }
    }

    /// Load register-passed arguments from their spill slots.
    fn place_reg_args(&mut self, args: &[ObjId], ret_buffer: Option<ObjId>) {
        let mut gp = 0usize;
        let mut fp = 0usize;
        // A large struct return passes the result buffer's address as a
        // hidden first argument.
        if let Some(rb) = ret_buffer {
            let ofs = self.sess.obj(rb).ofs;
            wln!(self, "  lea {}(%rbp), {}", ofs, ARGREG64[gp]);
            gp += 1;
        }

        for &var in args {
            let (pass_by_stack, ofs, ty) = {
                let o = self.sess.obj(var);
                (o.pass_by_stack, o.ofs, o.ty)
            };
            if pass_by_stack {
                continue;
            }
            let size = self.sess.types.size(ty);
            match self.sess.types.kind(ty) {
                TypeKind::Struct { .. } => {
                    if self.has_flonum1(ty) {
                        wln!(self, "  movsd {}(%rbp), %xmm{}", ofs, fp);
                        fp += 1;
                    } else {
                        wln!(self, "  mov {}(%rbp), {}", ofs, ARGREG64[gp]);
                        gp += 1;
                    }
                    if size > 8 {
                        if self.has_flonum2(ty) {
                            wln!(self, "  movsd {}(%rbp), %xmm{}", 8 + ofs, fp);
                            fp += 1;
                        } else {
                            wln!(self, "  mov {}(%rbp), {}", 8 + ofs, ARGREG64[gp]);
                            gp += 1;
                        }
                    }
                }
                TypeKind::Float => {
                    wln!(self, "  movss {}(%rbp), %xmm{}", ofs, fp);
                    fp += 1;
                }
                TypeKind::Double => {
                    wln!(self, "  movsd {}(%rbp), %xmm{}", ofs, fp);
                    fp += 1;
                }
                _ => {
                    let reg = if size <= 4 {
                        ARGREG32[gp]
                    } else {
                        ARGREG64[gp]
                    };
                    gp += 1;
                    self.load_extend_int(ty, ofs, "%rbp", reg);
                }
            }
        }
    }

    /// Unpack a small-aggregate return value from RAX/RDX/XMM0/XMM1 into
    /// the caller's buffer.
    fn copy_ret_buffer(&mut self, var: ObjId) {
        let (ofs, ty) = {
            let o = self.sess.obj(var);
            (o.ofs, o.ty)
        };
        let size = self.sess.types.size(ty);
        let mut fp = 0;
        let mut gp = 0;

        if self.has_flonum1(ty) {
            if size == 4 {
                wln!(self, "  movss %xmm0, {}(%rbp)", ofs);
            } else {
                wln!(self, "  movsd %xmm0, {}(%rbp)", ofs);
            }
            fp += 1;
        } else {
            for i in 0..size.min(8) {
                wln!(self, "  mov %al, {}(%rbp)", ofs + i);
                wln!(self, "  shr $8, %rax");
            }
            gp += 1;
        }

        if size > 8 {
            if self.has_flonum2(ty) {
                if size == 12 {
                    wln!(self, "  movss %xmm{}, {}(%rbp)", fp, ofs + 8);
                } else {
                    wln!(self, "  movsd %xmm{}, {}(%rbp)", fp, ofs + 8);
                }
            } else {
                let (reg1, reg2) = if gp == 0 {
                    ("%al", "%rax")
                } else {
                    ("%dl", "%rdx")
                };
                for i in 8..size.min(16) {
                    wln!(self, "  mov {}, {}(%rbp)", reg1, ofs + i);
                    wln!(self, "  shr $8, {}", reg2);
                }
            }
        }
    }

    /// Pack a small aggregate (whose address is in %rax) into the return
    /// registers.
    pub(super) fn copy_struct_reg(&mut self) {
        let fn_id = self.current_fn.expect("return outside function");
        let ty = self.sess.types.return_ty(self.sess.obj(fn_id).ty);
        let size = self.sess.types.size(ty);
        let mut fp = 0;
        let mut gp = 0;

        wln!(self, "  mov %rax, %rcx");

        if self.has_flonum1(ty) {
            if size == 4 {
                wln!(self, "  movss (%rcx), %xmm0");
            } else {
                wln!(self, "  movsd (%rcx), %xmm0");
            }
            fp += 1;
        } else {
            wln!(self, "  mov $0, %rax");
            for i in (0..size.min(8)).rev() {
                wln!(self, "  shl $8, %rax");
                wln!(self, "  mov {}(%rcx), %al", i);
            }
            gp += 1;
        }

        if size > 8 {
            if self.has_flonum2(ty) {
                if size == 12 {
                    wln!(self, "  movss 8(%rcx), %xmm{}", fp);
                } else {
                    wln!(self, "  movsd 8(%rcx), %xmm{}", fp);
                }
            } else {
                let (reg1, reg2) = if gp == 0 {
                    ("%al", "%rax")
                } else {
                    ("%dl", "%rdx")
                };
                wln!(self, "  mov $0, {}", reg2);
                for i in (8..size.min(16)).rev() {
                    wln!(self, "  shl $8, {}", reg2);
                    wln!(self, "  mov {}(%rcx), {}", i, reg1);
                }
            }
        }
    }

    /// Copy a large return value (address in %rax) through the hidden
    /// pointer saved at the prologue.
    pub(super) fn copy_struct_mem(&mut self) {
        let fn_id = self.current_fn.expect("return outside function");
        let ty = self.sess.types.return_ty(self.sess.obj(fn_id).ty);
        let size = self.sess.types.size(ty);
        wln!(self, "  mov -{}(%rbp), %rcx", self.rtn_ptr_ofs);
        self.gen_mem_copy(0, "%rax", 0, "%rcx", size);
        wln!(self, "  mov %rcx, %rax");
    }

    fn store_fp(&mut self, r: usize, offset: i64, sz: i64) {
        match sz {
            4 => wln!(self, "  movss %xmm{}, {}(%rbp)", r, offset),
            _ => wln!(self, "  movsd %xmm{}, {}(%rbp)", r, offset),
        }
    }

    fn store_gp(&mut self, r: usize, offset: i64, sz: i64) {
        match sz {
            1 => wln!(self, "  mov {}, {}(%rbp)", ARGREG8[r], offset),
            2 => wln!(self, "  mov {}, {}(%rbp)", ARGREG16[r], offset),
            4 => wln!(self, "  mov {}, {}(%rbp)", ARGREG32[r], offset),
            8 => wln!(self, "  mov {}, {}(%rbp)", ARGREG64[r], offset),
            _ => {
                for i in 0..sz {
                    wln!(self, "  mov {}, {}(%rbp)", ARGREG8[r], offset + i);
                    wln!(self, "  shr $8, {}", ARGREG64[r]);
                }
            }
        }
    }

    /// Spill register-passed parameters to their stack homes on entry.
    pub(super) fn store_register_params(&mut self, params: &[ObjId], rtn_by_stk: bool) {
        let mut gp = rtn_by_stk as usize;
        let mut fp = 0usize;

        for &var in params {
            let (pass_by_stack, ofs, ty) = {
                let o = self.sess.obj(var);
                (o.pass_by_stack, o.ofs, o.ty)
            };
            if pass_by_stack {
                continue;
            }
            let size = self.sess.types.size(ty);
            match self.sess.types.kind(ty) {
                TypeKind::Struct { .. } => {
                    if self.has_flonum1(ty) {
                        self.store_fp(fp, ofs, size.min(8));
                        fp += 1;
                    } else {
                        self.store_gp(gp, ofs, size.min(8));
                        gp += 1;
                    }
                    if size > 8 {
                        if self.has_flonum2(ty) {
                            self.store_fp(fp, ofs + 8, size - 8);
                            fp += 1;
                        } else {
                            self.store_gp(gp, ofs + 8, size - 8);
                            gp += 1;
                        }
                    }
                }
                TypeKind::Float | TypeKind::Double => {
                    self.store_fp(fp, ofs, size);
                    fp += 1;
                }
                _ => {
                    self.store_gp(gp, ofs, size);
                    gp += 1;
                }
            }
        }
    }

    /// A call: the callee address and all arguments are evaluated into
    /// spill slots first, then the stack area is carved and arguments
    /// placed per the classification.
    pub(super) fn gen_funcall(&mut self, node: &Expr) {
        let ExprKind::FunCall {
            func,
            args_expr,
            args,
            ret_buffer,
        } = &node.kind
        else {
            unreachable!()
        };

        // alloca is open-coded: the evaluated size is in %rax.
        if let Some(v) = callee_obj(func) {
            if self.sess.obj(v).name == "alloca" {
                if let Some(ae) = args_expr {
                    self.gen_expr(ae);
                }
                self.builtin_alloca(None);
                return;
            }
        }

        self.gen_expr(func);
        self.push();
        if let Some(ae) = args_expr {
            self.gen_expr(ae);
        }
        self.pop("%r10");

        let ret_size = self.sess.types.size(node.ty);
        let rtn_by_stk = ret_buffer.is_some() && ret_size > 16;
        let mut gp_count = rtn_by_stk as i64;
        let mut fp_count = 0i64;
        let arg_stk_size = self.calling_convention(args, &mut gp_count, &mut fp_count);

        wln!(self, "  sub ${}, %rsp", align_to(arg_stk_size, 16));
        self.place_stack_args(args);
        self.place_reg_args(args, if rtn_by_stk { *ret_buffer } else { None });

        let fn_ty = if self.sess.types.is_func(func.ty) {
            func.ty
        } else {
            self.sess.types.base(func.ty).unwrap()
        };
        if self.sess.types.func(fn_ty).is_variadic {
            wln!(self, "  movl ${}, %eax", fp_count);
        }

        wln!(self, "  call *%r10");
        wln!(self, "  add ${}, %rsp", align_to(arg_stk_size, 16));

        // The upper bits of RAX may hold garbage when the return type is
        // narrower than int; clear them.
        if self.sess.types.is_integer(node.ty) && ret_size < 4 {
            if matches!(self.sess.types.kind(node.ty), TypeKind::Bool) {
                self.cast(crate::common::types::TY_INT, crate::common::types::TY_UCHAR);
            } else {
                self.cast(crate::common::types::TY_INT, node.ty);
            }
        }

        // A small aggregate comes back in registers; unpack it.
        if let Some(rb) = ret_buffer {
            if ret_size <= 16 {
                self.copy_ret_buffer(*rb);
                let ofs = self.sess.obj(*rb).ofs;
                wln!(self, "  lea {}(%rbp), %rax", ofs);
            }
        }
    }

    /// `va_arg(ap, T)`: dispatch on T's classification to fetch from the
    /// register save area or the overflow area, copying into T's slot.
    pub(super) fn gen_va_arg(&mut self, ap: &Expr, var: ObjId) {
        self.gen_expr(ap);

        let (var_ofs, ty) = {
            let o = self.sess.obj(var);
            (o.ofs, o.ty)
        };
        let size = self.sess.types.size(ty);
        let align = self.sess.types.align(ty);

        if size <= 16 {
            let gp_inc = !self.has_flonum1(ty) as i64
                + (size > 8 && !self.has_flonum2(ty)) as i64;
            if gp_inc > 0 {
                wln!(self, "  cmpl ${}, (%rax)", 48 - gp_inc * 8);
                wln!(self, "  ja 1f");
            }
            let fp_inc = self.has_flonum1(ty) as i64
                + (size > 8 && self.has_flonum2(ty)) as i64;
            if fp_inc > 0 {
                wln!(self, "  cmpl ${}, 4(%rax)", 176 - fp_inc * 16);
                wln!(self, "  ja 1f");
            }
            let mut ofs = 0;
            while ofs < size {
                let use_fp = if ofs == 0 {
                    self.has_flonum1(ty)
                } else {
                    self.has_flonum2(ty)
                };
                if use_fp {
                    wln!(self, "  movl 4(%rax), %ecx"); // fp_offset
                    wln!(self, "  addq 16(%rax), %rcx"); // reg_save_area
                    wln!(self, "  addq $16, 4(%rax)");
                } else {
                    wln!(self, "  movl (%rax), %ecx"); // gp_offset
                    wln!(self, "  addq 16(%rax), %rcx");
                    wln!(self, "  addq $8, (%rax)");
                }
                self.gen_mem_copy(0, "%rcx", ofs + var_ofs, "%rbp", (size - ofs).min(8));
                ofs += 8;
            }
            wln!(self, "  jmp 2f");
            wln!(self, "1:");
        }

        wln!(self, "  movq 8(%rax), %rcx"); // overflow_arg_area
        if align > 8 {
            wln!(self, "  addq ${}, %rcx", align - 1);
            wln!(self, "  andq $-{}, %rcx", align);
        }
        wln!(self, "  movq %rcx, %rdx");
        wln!(self, "  addq ${}, %rdx", align_to(size, 8));
        wln!(self, "  movq %rdx, 8(%rax)");
        self.gen_mem_copy(0, "%rcx", var_ofs, "%rbp", size);
        if size <= 16 {
            wln!(self, "2:");
        }
    }
}

/// The called object, looking through the function-to-pointer decay cast.
fn callee_obj(func: &Expr) -> Option<ObjId> {
    match &func.kind {
        ExprKind::Cast(inner) => callee_obj(inner),
        ExprKind::Var(v) => Some(*v),
        _ => None,
    }
}
