//! End-to-end pipeline tests: run C snippets through tokenize, preprocess,
//! parse and code generation, then assert on the emitted assembly.
//!
//! Layout and constant-evaluation rules are exercised through
//! `_Static_assert`, which the frontend folds: a wrong size or offset
//! fails compilation, so a successful compile is the assertion.

use rycc::backend;
use rycc::common::session::Session;
use rycc::driver::cli::Options;
use rycc::frontend::lexer::lexer;
use rycc::frontend::parser::Parser;
use rycc::frontend::preprocessor::Preprocessor;

fn try_compile(src: &str) -> Result<String, String> {
    let opts = Options::default();
    let mut sess = Session::new();
    let toks = lexer::tokenize(&mut sess, "test.c", src.to_string(), true)
        .map_err(|e| e.to_string())?;
    let toks = {
        let mut pp = Preprocessor::new(&mut sess, &opts, "test.c");
        pp.run(toks).map_err(|e| e.to_string())?
    };
    let prog = Parser::new(&mut sess, toks)
        .parse()
        .map_err(|e| e.to_string())?;
    Ok(backend::x86::codegen(&mut sess, &opts, &prog))
}

fn compile(src: &str) -> String {
    match try_compile(src) {
        Ok(asm) => asm,
        Err(e) => panic!("compilation failed:\n{}", e),
    }
}

#[test]
fn return_constant() {
    let asm = compile("int main() { return 42; }\n");
    assert!(asm.contains("\"main\":"));
    assert!(asm.contains("  mov $42, %rax"));
    assert!(asm.contains("  ret"));
    assert!(asm.contains(".note.GNU-stack"));
}

#[test]
fn prologue_is_patched() {
    let asm = compile("int main() { int a = 1; int b = 2; return a + b; }\n");
    // The placeholder line must have been replaced by a 16-byte-aligned
    // frame allocation.
    assert!(asm.contains("  sub $16, %rsp"));
    assert!(asm.contains("  push %rbp"));
    assert!(asm.contains("  mov %rsp, %rbp"));
}

#[test]
fn basic_type_sizes() {
    compile(
        "_Static_assert(sizeof(char) == 1, \"\");\n\
         _Static_assert(sizeof(short) == 2, \"\");\n\
         _Static_assert(sizeof(int) == 4, \"\");\n\
         _Static_assert(sizeof(long) == 8, \"\");\n\
         _Static_assert(sizeof(long long) == 8, \"\");\n\
         _Static_assert(sizeof(float) == 4, \"\");\n\
         _Static_assert(sizeof(double) == 8, \"\");\n\
         _Static_assert(sizeof(long double) == 16, \"\");\n\
         _Static_assert(sizeof(void *) == 8, \"\");\n",
    );
}

#[test]
fn struct_layout_invariants() {
    compile(
        "_Static_assert(sizeof(struct { char a; int b; }) == 8, \"\");\n\
         _Static_assert(sizeof(struct { char a; char b; }) == 2, \"\");\n\
         _Static_assert(sizeof(struct { char a; double b; }) == 16, \"\");\n\
         _Static_assert(__builtin_offsetof(struct { char a; int b; }, b) == 4, \"\");\n\
         _Static_assert(__builtin_offsetof(struct { char a; double b; }, b) == 8, \"\");\n\
         _Static_assert(sizeof(union { char a[5]; int b; }) == 8, \"\");\n",
    );
}

#[test]
fn packed_struct_layout() {
    compile(
        "_Static_assert(sizeof(struct __attribute__((packed)) { char a; int b; }) == 5, \"\");\n\
         _Static_assert(__builtin_offsetof(struct __attribute__((packed)) { char a; int b; }, b) == 1, \"\");\n",
    );
}

#[test]
fn bitfield_layout() {
    compile(
        "_Static_assert(sizeof(struct { int a : 3; unsigned b : 5; }) == 4, \"\");\n\
         _Static_assert(sizeof(struct { char a : 7; char b : 7; }) == 2, \"\");\n\
         _Static_assert(sizeof(struct { int a : 30; int b : 30; }) == 8, \"\");\n\
         _Static_assert(sizeof(struct { int a : 3; int : 0; int b : 3; }) == 8, \"\");\n",
    );
}

#[test]
fn anonymous_members() {
    compile(
        "struct s { struct { int a; }; union { int b; long c; }; };\n\
         _Static_assert(__builtin_offsetof(struct s, a) == 0, \"\");\n\
         _Static_assert(__builtin_offsetof(struct s, b) == 8, \"\");\n\
         int use(struct s *p) { return p->a + p->b; }\n",
    );
}

#[test]
fn enum_underlying_types() {
    compile(
        "_Static_assert(sizeof(enum { A1 }) == 4, \"\");\n\
         _Static_assert(sizeof(enum { B1 = 0x100000000 }) == 8, \"\");\n\
         _Static_assert(sizeof(enum { C1 = -1 }) == 4, \"\");\n\
         _Static_assert(sizeof(enum { D1 = 0x80000000 }) == 4, \"\");\n",
    );
}

#[test]
fn usual_arithmetic_conversion() {
    // -1 converts to unsigned when compared against an unsigned operand.
    compile(
        "_Static_assert((-1 < 0u ? 1 : 2) == 2, \"\");\n\
         _Static_assert(sizeof(1 + 1L) == 8, \"\");\n\
         _Static_assert(sizeof((char)1 + (char)1) == 4, \"\");\n",
    );
}

#[test]
fn constant_evaluator_rules() {
    compile(
        "_Static_assert((7 / 2) == 3, \"\");\n\
         _Static_assert((-7 % 2) == -1, \"\");\n\
         _Static_assert((1 << 31) < 0, \"\");\n\
         _Static_assert(((unsigned)-1 >> 28) == 15, \"\");\n\
         _Static_assert((5 & 3) == 1 && (5 | 3) == 7 && (5 ^ 3) == 6, \"\");\n\
         _Static_assert((char)257 == 1, \"\");\n",
    );
}

#[test]
fn designated_initializers() {
    let asm = compile("int main() { int a[] = {1, 2, 3, [5] = 9, 10}; return a[0] + a[2] + a[5] + a[6]; }\n");
    // The omitted length is completed to 7 elements and the whole array is
    // zeroed before the element assignments run.
    assert!(asm.contains("  xor %eax, %eax"));
    compile("int g[] = {1, 2, [5] = 9, 10};\n_Static_assert(sizeof(g) == 28, \"\");\n");
}

#[test]
fn global_initializer_with_relocation() {
    let asm = compile("int x = 7;\nint *p = &x;\nint *q = &x + 2;\n");
    assert!(asm.contains("\"x\":"));
    assert!(asm.contains("  .byte 7"));
    assert!(asm.contains("  .quad \"x\"+0"));
    assert!(asm.contains("  .quad \"x\"+8"));
}

#[test]
fn tentative_definition_becomes_common() {
    let asm = compile("int t;\n");
    assert!(asm.contains("  .comm \"t\", 4, 4"));
}

#[test]
fn static_tentative_is_local_common() {
    let asm = compile("static int z;\nint main() { return z; }\n");
    assert!(asm.contains("  .local \"z\""));
    assert!(asm.contains("  .comm \"z\", 4, 4"));
}

#[test]
fn string_literal_data() {
    let asm = compile("char *s = \"ab\";\nint main() { return 0; }\n");
    assert!(asm.contains("  .byte 97"));
    assert!(asm.contains("  .byte 98"));
    assert!(asm.contains("  .byte 0"));
    assert!(asm.contains("  .quad \".L..0\"+0"));
}

#[test]
fn switch_case_ranges() {
    let asm = compile(
        "int main() { int x = 0; switch (3) { case 1 ... 4: x = 7; break; default: x = 9; } return x; }\n",
    );
    // A case range compiles to an unsigned bounds check.
    assert!(asm.contains("  jbe"));
    assert!(asm.contains("  sub %edx, %ecx"));
}

#[test]
fn vla_allocation() {
    let asm = compile(
        "int f(int n) { int a[n]; for (int i = 0; i < n; i = i + 1) a[i] = i; return a[0]; }\n\
         int main() { return f(5); }\n",
    );
    // VLAs turn into stack extension with 16-byte realignment.
    assert!(asm.contains("  sub %rax, %rsp"));
    assert!(asm.contains("  and $-16, %rsp"));
}

#[test]
fn bitfield_read_modify_write() {
    let asm = compile(
        "struct S { int a : 3; unsigned b : 5; } s;\n\
         int main() { s.a = -1; s.b = 17; return s.a + s.b; }\n",
    );
    // Store path: mask out the window, or in the shifted value.
    assert!(asm.contains("  or %rcx, %rax"));
    // Signed load path: shl then sar to sign-extend the field.
    assert!(asm.contains("  sar $61, %rax"));
}

#[test]
fn logical_operators_short_circuit() {
    let asm = compile("int main() { int a = 1; return a && a || a; }\n");
    assert!(asm.contains(".L.false."));
    assert!(asm.contains(".L.true."));
}

#[test]
fn labels_as_values() {
    let asm = compile(
        "int main() { void *p = &&out; goto *p; out: return 1; }\n",
    );
    assert!(asm.contains("(%rip), %rax"));
    assert!(asm.contains("  jmp *%rax"));
}

#[test]
fn variadic_va_arg() {
    let asm = compile(
        "typedef struct { unsigned int gp_offset; unsigned int fp_offset; void *overflow_arg_area; void *reg_save_area; } va_list[1];\n\
         int sum(int n, ...) {\n\
           va_list ap;\n\
           __builtin_va_start(ap, n);\n\
           int s = 0;\n\
           for (int i = 0; i < n; i = i + 1) s = s + __builtin_va_arg(ap, int);\n\
           __builtin_va_end(ap);\n\
           return s;\n\
         }\n\
         int main() { return sum(4, 1, 2, 3, 4); }\n",
    );
    // Register save area and va_list setup.
    assert!(asm.contains("  movq %rsi, -168(%rbp)"));
    assert!(asm.contains("  movaps %xmm0, -128(%rbp)"));
    assert!(asm.contains("  lea -176(%rbp), %rdx"));
    // The variadic call sets %al to the number of vector registers used.
    assert!(asm.contains("  movl $0, %eax"));
}

#[test]
fn struct_passed_in_sse_registers() {
    let asm = compile(
        "struct P { double x; double y; };\n\
         double get(struct P p) { return p.x; }\n\
         int main() { struct P p = {1.0, 2.0}; get(p); return 0; }\n",
    );
    // Both eight-byte chunks are float-only, so the argument travels in
    // XMM registers.
    assert!(asm.contains("  movsd %xmm0,"));
    assert!(asm.contains("  movsd %xmm1,"));
}

#[test]
fn struct_passed_in_gp_registers() {
    let asm = compile(
        "struct P { long x; long y; };\n\
         long get(struct P p) { return p.x; }\n\
         int main() { struct P p = {1, 2}; return (int)get(p); }\n",
    );
    assert!(asm.contains("  mov %rdi,"));
    assert!(asm.contains("  mov %rsi,"));
}

#[test]
fn large_struct_returned_through_pointer() {
    let asm = compile(
        "struct B { long a, b, c; };\n\
         struct B mk(void) { struct B b = {1, 2, 3}; return b; }\n\
         int main() { struct B b = mk(); return (int)b.c; }\n",
    );
    // Callee saves the hidden pointer and copies through it.
    assert!(asm.contains("  mov %rdi, -8(%rbp)"));
}

#[test]
fn macro_expansion_terminates_on_recursion() {
    // A macro that expands to itself is locked and left as an identifier.
    compile("#define A A\nint A = 1;\nint main() { return A; }\n");
    compile("#define T U\n#define U T\nint T = 2;\nint main() { return T; }\n");
}

#[test]
fn macro_paste_and_stringize() {
    let asm = compile(
        "#define S(x) #x\n\
         #define J(a, b) a##b\n\
         enum { K = J(1, 23) };\n\
         _Static_assert(K == 123, \"\");\n\
         int main() { return sizeof(S(hello)); }\n",
    );
    // sizeof("hello") folds to 6.
    assert!(asm.contains("  mov $6, %rax"));
}

#[test]
fn variadic_macros() {
    compile(
        "#define FIRST(a, ...) a\n\
         #define REST(a, ...) __VA_ARGS__\n\
         _Static_assert(FIRST(7, 8, 9) == 7, \"\");\n\
         _Static_assert(REST(7, 8) == 8, \"\");\n\
         #define OPT(...) (0 __VA_OPT__(+ 1))\n\
         _Static_assert(OPT() == 0, \"\");\n\
         _Static_assert(OPT(x) == 1, \"\");\n",
    );
}

#[test]
fn conditional_inclusion() {
    compile(
        "#define FOO 1\n\
         #if defined(FOO) && FOO\n\
         int ok;\n\
         #elif defined(BAR)\n\
         #error bar\n\
         #else\n\
         #error neither\n\
         #endif\n\
         _Static_assert(sizeof(ok) == 4, \"\");\n\
         #ifdef MISSING\n\
         #error missing\n\
         #endif\n",
    );
}

#[test]
fn preprocessor_if_arithmetic() {
    compile(
        "#if (1 + 2) * 3 != 9\n#error arith\n#endif\n\
         #if -1 < 0\nint s1;\n#else\n#error sign\n#endif\n\
         #if 0xffffffffffffffffu > 0\nint u1;\n#else\n#error unsig\n#endif\n",
    );
}

#[test]
fn comma_elision_with_empty_va_args() {
    compile(
        "#define CALL(f, ...) f(0, ##__VA_ARGS__)\n\
         int g2(int a, int b) { return a + b; }\n\
         int g1(int a) { return a; }\n\
         int main() { return CALL(g1) + CALL(g2, 1); }\n",
    );
}

#[test]
fn stringize_escapes_quotes_and_backslashes() {
    let asm = compile(
        "#define S(x) #x\n\
         char *s = S(\"a\");\n\
         int main() { return 0; }\n",
    );
    // #"a" stringizes to "\"a\"": bytes 34 97 34.
    assert!(asm.contains("  .byte 34"));
    assert!(asm.contains("  .byte 97"));
}

#[test]
fn include_guard_detection() {
    let dir = std::env::temp_dir().join(format!("rycc-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let header = dir.join("guarded.h");
    std::fs::write(
        &header,
        "#ifndef GUARDED_H\n#define GUARDED_H\nint guarded_var;\n#endif\n",
    )
    .unwrap();

    let src = format!(
        "#include \"{p}\"\n#include \"{p}\"\n#include \"{p}\"\nint main() {{ return guarded_var; }}\n",
        p = header.display()
    );
    // A redefinition would be a tentative re-declaration (fine), but the
    // guard must prevent even reopening the file.
    let asm = compile(&src);
    assert!(asm.contains("\"guarded_var\""));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn static_inline_liveness() {
    let asm = compile(
        "static inline int unused_helper(int x) { return x * 2; }\n\
         static inline int used_helper(int x) { return x + 1; }\n\
         int main() { return used_helper(1); }\n",
    );
    assert!(asm.contains("\"used_helper\":"));
    assert!(!asm.contains("\"unused_helper\":"));
}

#[test]
fn typedef_and_typeof() {
    compile(
        "typedef unsigned long size_type;\n\
         _Static_assert(sizeof(size_type) == 8, \"\");\n\
         typeof(1 + 1) x;\n\
         _Static_assert(sizeof(typeof(x)) == 4, \"\");\n",
    );
}

#[test]
fn old_style_parameters() {
    let asm = compile(
        "int add(a, b)\n\
         int a;\n\
         int b;\n\
         { return a + b; }\n\
         int main() { return add(1, 2); }\n",
    );
    assert!(asm.contains("\"add\":"));
}

#[test]
fn compound_literals_and_statement_exprs() {
    let asm = compile(
        "int main() {\n\
           int x = ({ int y = 3; y + 1; });\n\
           int *p = &(int){5};\n\
           return x + *p;\n\
         }\n",
    );
    assert!(asm.contains("\"main\":"));
}

#[test]
fn goto_and_labels() {
    let asm = compile(
        "int main() { int i = 0; again: i = i + 1; if (i < 3) goto again; return i; }\n",
    );
    assert!(asm.contains("  jmp .L.."));
}

#[test]
fn undeclared_label_is_rejected() {
    assert!(try_compile("int main() { goto nowhere; return 0; }\n").is_err());
}

#[test]
fn errors_point_at_source() {
    let err = try_compile("int main() { return x; }\n").unwrap_err();
    assert!(err.contains("test.c:1:"));
    assert!(err.contains("undefined variable"));
}

#[test]
fn stray_break_is_rejected() {
    let err = try_compile("int main() { break; }\n").unwrap_err();
    assert!(err.contains("stray break"));
}

#[test]
fn incompatible_redeclaration_is_rejected() {
    let err = try_compile(
        "int f(void);\nint f(void) { return 0; }\nint f(void) { return 1; }\n",
    )
    .unwrap_err();
    assert!(err.contains("redefinition"));
}

#[test]
fn vla_jump_is_rejected() {
    let err = try_compile(
        "int main(int argc, char **argv) {\n\
           goto in;\n\
           { int a[argc]; in: a[0] = 1; return a[0]; }\n\
         }\n",
    )
    .unwrap_err();
    assert!(err.contains("jump crosses VLA initialization"));
}

#[test]
fn typedef_with_storage_class_rejected() {
    let err = try_compile("typedef inline int ti;\n").unwrap_err();
    assert!(err.contains("typedef may not be used together"));
}

#[test]
fn float_literals_and_arithmetic() {
    let asm = compile(
        "double d = 1.5;\nfloat f = 0.25f;\nlong double ld = 2.0L;\n\
         double add(double a, double b) { return a + b; }\n\
         int main() { return (int)add(d, f); }\n",
    );
    // 1.5 as raw IEEE bytes in .data.
    assert!(asm.contains(".byte"));
    assert!(asm.contains("  addsd %xmm1, %xmm0"));
}

#[test]
fn long_double_uses_x87() {
    let asm = compile(
        "long double mul(long double a, long double b) { return a * b; }\n\
         int main() { return (int)mul(2.0L, 3.0L); }\n",
    );
    assert!(asm.contains("  fmulp"));
    assert!(asm.contains("  fldt"));
}

#[test]
fn pointer_arithmetic_scales() {
    let asm = compile(
        "int main() { int a[3][3] = {{1,2,3},{4,5,6},{7,8,9}}; int *p = &a[1][1]; return *(p+1) + *(p-3); }\n",
    );
    assert!(asm.contains("\"main\":"));
}

#[test]
fn flexible_array_member() {
    compile(
        "struct fam { int n; int data[]; };\n\
         _Static_assert(sizeof(struct fam) == 4, \"\");\n\
         struct fam f = { 2, { 10, 20 } };\n",
    );
}

#[test]
fn func_name_magic_variable() {
    let asm = compile(
        "char *who(void) { return __func__; }\nint main() { return 0; }\n",
    );
    // "who\0"
    assert!(asm.contains("  .byte 119"));
    assert!(asm.contains("  .byte 104"));
}

#[test]
fn line_and_file_macros() {
    compile(
        "_Static_assert(__LINE__ == 1, \"\");\n\
         #line 100\n\
         _Static_assert(__LINE__ == 100, \"\");\n",
    );
}

#[test]
fn counter_macro_increments() {
    compile(
        "_Static_assert(__COUNTER__ == 0, \"\");\n\
         _Static_assert(__COUNTER__ == 1, \"\");\n\
         _Static_assert(__COUNTER__ == 2, \"\");\n",
    );
}

#[test]
fn adjacent_string_literals_concatenate() {
    let asm = compile("char *s = \"ab\" \"cd\";\nint main() { return 0; }\n");
    // 4 content bytes plus NUL.
    assert!(asm.contains("  .byte 97"));
    assert!(asm.contains("  .byte 100"));
}

#[test]
fn setjmp_disables_stack_reuse() {
    let asm_plain = compile(
        "int f(int a) { return a + a; }\nint main() { return f(1); }\n",
    );
    let asm_setjmp = compile(
        "int setjmp(void *);\n\
         int f(int a) { return a + a; }\n\
         int main() { void *e; if (setjmp(e)) return 1; return f(1); }\n",
    );
    // Both compile; the setjmp variant must still balance its frame.
    assert!(asm_plain.contains("  ret"));
    assert!(asm_setjmp.contains("  ret"));
}

#[test]
fn multi_dimensional_vla_sizes() {
    let asm = compile(
        "long f(int n, int m) { int (*p)[n][m]; return sizeof(*p); }\n\
         int main() { return (int)f(2, 3); }\n",
    );
    // The size is the product of the hidden size locals, computed at entry.
    assert!(asm.contains("  imul"));
}

#[test]
fn do_while_and_continue() {
    let asm = compile(
        "int main() { int i = 0, s = 0; do { i = i + 1; if (i == 2) continue; s = s + i; } while (i < 4); return s; }\n",
    );
    assert!(asm.contains(".L.begin."));
}
