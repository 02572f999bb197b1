//! Scalar conversions.
//!
//! Casts dispatch through a table indexed by (source, destination) scalar
//! class. Unsigned 64-bit to floating conversions handle the sign bit with
//! the shift/or-then-double trick; x87 conversions run with the rounding
//! control set to truncate.

use crate::backend::x86::codegen::CodeGen;
use crate::backend::x86::wln;
use crate::common::types::{TypeId, TypeKind};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Class {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    F80,
}

const I32I8: &str = "movsbl %al, %eax";
const I32U8: &str = "movzbl %al, %eax";
const I32I16: &str = "movswl %ax, %eax";
const I32U16: &str = "movzwl %ax, %eax";
const I32F32: &str = "cvtsi2ssl %eax, %xmm0";
const I32I64: &str = "movslq %eax, %rax";
const I32F64: &str = "cvtsi2sdl %eax, %xmm0";
const I32F80: &str = "push %rax; fildl (%rsp); pop %rax";

const U32F32: &str = "mov %eax, %eax; cvtsi2ssq %rax, %xmm0";
const U32I64: &str = "mov %eax, %eax";
const U32F64: &str = "mov %eax, %eax; cvtsi2sdq %rax, %xmm0";
const U32F80: &str = "mov %eax, %eax; push %rax; fildll (%rsp); pop %rax";

const I64F32: &str = "cvtsi2ssq %rax, %xmm0";
const I64F64: &str = "cvtsi2sdq %rax, %xmm0";
const I64F80: &str = "push %rax; fildll (%rsp); pop %rax";

const U64F32: &str = "test %rax,%rax; js 1f; pxor %xmm0,%xmm0; cvtsi2ss %rax,%xmm0; jmp 2f; \
1: mov %rax,%rdx; and $1,%eax; pxor %xmm0,%xmm0; shr %rdx; \
or %rax,%rdx; cvtsi2ss %rdx,%xmm0; addss %xmm0,%xmm0; 2:";
const U64F64: &str = "test %rax,%rax; js 1f; pxor %xmm0,%xmm0; cvtsi2sd %rax,%xmm0; jmp 2f; \
1: mov %rax,%rdx; and $1,%eax; pxor %xmm0,%xmm0; shr %rdx; \
or %rax,%rdx; cvtsi2sd %rdx,%xmm0; addsd %xmm0,%xmm0; 2:";
const U64F80: &str = "push %rax; fildq (%rsp); test %rax, %rax; jns 1f;\
mov $1602224128, %eax; mov %eax, 4(%rsp); fadds 4(%rsp); 1:; pop %rax";

const F32I8: &str = "cvttss2sil %xmm0, %eax; movsbl %al, %eax";
const F32U8: &str = "cvttss2sil %xmm0, %eax; movzbl %al, %eax";
const F32I16: &str = "cvttss2sil %xmm0, %eax; movswl %ax, %eax";
const F32U16: &str = "cvttss2sil %xmm0, %eax; movzwl %ax, %eax";
const F32I32: &str = "cvttss2sil %xmm0, %eax";
const F32U32: &str = "cvttss2siq %xmm0, %rax";
const F32I64: &str = "cvttss2siq %xmm0, %rax";
const F32U64: &str = "cvttss2siq %xmm0, %rcx; movq %rcx, %rdx; movl $0x5F000000, %eax; \
movd %eax, %xmm1; subss %xmm1, %xmm0; cvttss2siq %xmm0, %rax; \
sarq $63, %rdx; andq %rdx, %rax; orq %rcx, %rax;";
const F32F64: &str = "cvtss2sd %xmm0, %xmm0";
const F32F80: &str = "sub $8, %rsp; movss %xmm0, (%rsp); flds (%rsp); add $8, %rsp";

const F64I8: &str = "cvttsd2sil %xmm0, %eax; movsbl %al, %eax";
const F64U8: &str = "cvttsd2sil %xmm0, %eax; movzbl %al, %eax";
const F64I16: &str = "cvttsd2sil %xmm0, %eax; movswl %ax, %eax";
const F64U16: &str = "cvttsd2sil %xmm0, %eax; movzwl %ax, %eax";
const F64I32: &str = "cvttsd2sil %xmm0, %eax";
const F64U32: &str = "cvttsd2siq %xmm0, %rax";
const F64I64: &str = "cvttsd2siq %xmm0, %rax";
const F64U64: &str = "cvttsd2siq %xmm0, %rcx; movq %rcx, %rdx; mov $0x43e0000000000000, %rax; \
movq %rax, %xmm1; subsd %xmm1, %xmm0; cvttsd2siq %xmm0, %rax; \
sarq $63, %rdx; andq %rdx, %rax; orq %rcx, %rax";
const F64F32: &str = "cvtsd2ss %xmm0, %xmm0";
const F64F80: &str = "sub $8, %rsp; movsd %xmm0, (%rsp); fldl (%rsp); add $8, %rsp";

const FROM_F80_1: &str = "sub $24, %rsp; fnstcw 14(%rsp); movzwl 14(%rsp), %eax; or $12, %ah; \
mov %ax, 12(%rsp); fldcw 12(%rsp); ";
const FROM_F80_3: &str = "; add $24, %rsp";

fn f80_to_int(store: &str, load: &str) -> String {
    format!("{}{} (%rsp); fldcw 14(%rsp); {}{}", FROM_F80_1, store, load, FROM_F80_3)
}

const F80U64: &str = "sub $16, %rsp; movl $0x5f000000, 12(%rsp); flds 12(%rsp); fucomi %st(1), %st; setbe %al;\
fldz; fcmovbe %st(1), %st; fstp %st(1); fsubrp %st, %st(1); fnstcw 4(%rsp);\
movzwl 4(%rsp), %ecx; orl $3072, %ecx; movw %cx, 6(%rsp); fldcw 6(%rsp);\
fistpll 8(%rsp); fldcw 4(%rsp); shlq $63, %rax; xorq 8(%rsp), %rax; add $16, %rsp";

const F80F32: &str = "sub $8, %rsp; fstps (%rsp); movss (%rsp), %xmm0; add $8, %rsp";
const F80F64: &str = "sub $8, %rsp; fstpl (%rsp); movsd (%rsp), %xmm0; add $8, %rsp";

fn cast_insn(from: Class, to: Class) -> Option<String> {
    use Class::*;
    let s = |x: &str| Some(x.to_string());
    match (from, to) {
        // Widening within int is a no-op at register level except for the
        // sign/zero extension to 64 bits.
        (I8 | I16 | I32, I64) => s(I32I64),
        (I8 | I16 | I32, U64) => s(I32I64),
        (U8 | U16, I64 | U64) => s(I32I64),
        (U32, I64 | U64) => s(U32I64),

        (I16 | I32 | U16 | U32, I8) => s(I32I8),
        (U8, I8) => s(I32I8),
        (I64 | U64, I8) => s(I32I8),
        (I32 | U32 | I64 | U64, I16) => s(I32I16),
        (U16, I16) => s(I32I16),

        (I8 | I16 | I32 | I64 | U16 | U32 | U64, U8) => s(I32U8),
        (I8 | I16 | I32 | I64 | U32 | U64, U16) => s(I32U16),

        (I8 | I16 | I32 | U8 | U16, F32) => s(I32F32),
        (I8 | I16 | I32 | U8 | U16, F64) => s(I32F64),
        (I8 | I16 | I32 | U8 | U16, F80) => s(I32F80),
        (U32, F32) => s(U32F32),
        (U32, F64) => s(U32F64),
        (U32, F80) => s(U32F80),
        (I64, F32) => s(I64F32),
        (I64, F64) => s(I64F64),
        (I64, F80) => s(I64F80),
        (U64, F32) => s(U64F32),
        (U64, F64) => s(U64F64),
        (U64, F80) => s(U64F80),

        (F32, I8) => s(F32I8),
        (F32, U8) => s(F32U8),
        (F32, I16) => s(F32I16),
        (F32, U16) => s(F32U16),
        (F32, I32) => s(F32I32),
        (F32, U32) => s(F32U32),
        (F32, I64) => s(F32I64),
        (F32, U64) => s(F32U64),
        (F32, F64) => s(F32F64),
        (F32, F80) => s(F32F80),

        (F64, I8) => s(F64I8),
        (F64, U8) => s(F64U8),
        (F64, I16) => s(F64I16),
        (F64, U16) => s(F64U16),
        (F64, I32) => s(F64I32),
        (F64, U32) => s(F64U32),
        (F64, I64) => s(F64I64),
        (F64, U64) => s(F64U64),
        (F64, F32) => s(F64F32),
        (F64, F80) => s(F64F80),

        (F80, I8) => Some(f80_to_int("fistps", "movsbl (%rsp), %eax")),
        (F80, U8) => Some(f80_to_int("fistps", "movzbl (%rsp), %eax")),
        (F80, I16) => Some(f80_to_int("fistps", "movswl (%rsp), %eax")),
        (F80, U16) => Some(f80_to_int("fistpl", "movzwl (%rsp), %eax")),
        (F80, I32) | (F80, U32) => Some(f80_to_int("fistpl", "mov (%rsp), %eax")),
        (F80, I64) => Some(f80_to_int("fistpq", "mov (%rsp), %rax")),
        (F80, U64) => s(F80U64),
        (F80, F32) => s(F80F32),
        (F80, F64) => s(F80F64),

        _ => None,
    }
}

impl<'a> CodeGen<'a> {
    fn type_class(&self, ty: TypeId) -> Class {
        let unsigned = self.sess.types.is_unsigned(ty);
        match self.sess.types.kind(ty) {
            TypeKind::PChar | TypeKind::Char => {
                if unsigned {
                    Class::U8
                } else {
                    Class::I8
                }
            }
            TypeKind::Short => {
                if unsigned {
                    Class::U16
                } else {
                    Class::I16
                }
            }
            TypeKind::Int => {
                if unsigned {
                    Class::U32
                } else {
                    Class::I32
                }
            }
            TypeKind::Long | TypeKind::LongLong => {
                if unsigned {
                    Class::U64
                } else {
                    Class::I64
                }
            }
            TypeKind::Float => Class::F32,
            TypeKind::Double => Class::F64,
            TypeKind::LongDouble => Class::F80,
            _ => Class::U64,
        }
    }

    /// Emit the conversion from `from` to `to` on the accumulator.
    pub(super) fn cast(&mut self, from: TypeId, to: TypeId) {
        if self.sess.types.is_void(to) {
            return;
        }
        if matches!(self.sess.types.kind(to), TypeKind::Bool) {
            self.cmp_zero(from);
            wln!(self, "  setne %al");
            wln!(self, "  movzx %al, %eax");
            return;
        }
        let t1 = self.type_class(from);
        let t2 = self.type_class(to);
        if t1 == t2 {
            return;
        }
        if let Some(insn) = cast_insn(t1, t2) {
            wln!(self, "  {}", insn);
        }
    }
}
