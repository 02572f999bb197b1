//! Compilation session state shared across phases.
//!
//! Variables, functions and scopes form back-referenced graphs (a scope holds
//! its locals, a function holds its captured scope, VLA types point at hidden
//! locals). Like the types, they live in arenas addressed by plain ids; the
//! whole compile is short-lived, so nothing is ever freed.

use std::collections::HashMap;

use crate::common::error::Diagnostic;
use crate::common::source::SourceManager;
use crate::common::types::{TypeArena, TypeId, TypeKind};
use crate::frontend::lexer::token::{Loc, Token};
use crate::frontend::parser::ast::Stmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

/// A pointer-to-global relocation recorded in a global's initializer image.
#[derive(Debug, Clone)]
pub struct Relocation {
    pub offset: i64,
    pub label: String,
    pub addend: i64,
}

/// A resolved `goto`/`break`/`continue` target, looked up by the code
/// generator through the per-function goto table.
#[derive(Debug, Clone)]
pub struct GotoTarget {
    pub unique_label: String,
    /// Innermost VLA live at the jump site.
    pub top_vla: Option<ObjId>,
    /// Innermost VLA live at the target; `%rsp` is restored to its frame.
    pub target_vla: Option<ObjId>,
}

/// A variable or function.
#[derive(Debug)]
pub struct Obj {
    pub name: String,
    pub ty: TypeId,
    pub is_local: bool,
    pub is_function: bool,
    pub is_static: bool,
    pub is_tls: bool,
    pub is_definition: bool,
    pub is_tentative: bool,
    pub is_inline: bool,
    pub is_live: bool,
    pub is_referenced: bool,

    /// Stack offset from %rbp, finalized before code emission.
    pub ofs: i64,
    /// For arguments that could not be classified into registers: their
    /// offset in the caller-pushed argument area.
    pub pass_by_stack: bool,
    pub stack_offset: i64,

    /// Static initializer image and its relocations.
    pub init_data: Option<Vec<u8>>,
    pub rel: Vec<Relocation>,

    // Function payload.
    pub body: Option<Stmt>,
    pub static_lvars: Vec<ObjId>,
    /// Names of functions referenced from this function, for liveness.
    pub refs: Vec<String>,
    pub dealloc_vla: bool,
    pub goto_table: Vec<GotoTarget>,

    /// Next outer live VLA, threading the VLA frame chain.
    pub vla_next: Option<ObjId>,
    /// K&R parameter promotion helper local.
    pub param_promoted: Option<ObjId>,
}

impl Obj {
    pub fn new(name: String, ty: TypeId) -> Obj {
        Obj {
            name,
            ty,
            is_local: false,
            is_function: false,
            is_static: false,
            is_tls: false,
            is_definition: false,
            is_tentative: false,
            is_inline: false,
            is_live: false,
            is_referenced: false,
            ofs: 0,
            pass_by_stack: false,
            stack_offset: 0,
            init_data: None,
            rel: Vec::new(),
            body: None,
            static_lvars: Vec::new(),
            refs: Vec::new(),
            dealloc_vla: false,
            goto_table: Vec::new(),
            vla_next: None,
            param_promoted: None,
        }
    }
}

/// What a name resolves to in a variable scope.
#[derive(Debug, Clone)]
pub enum VarScope {
    Var(ObjId),
    Typedef(TypeId),
    EnumConst { ty: TypeId, val: i64 },
}

/// One lexical scope. Variable names and tag names are independent maps.
#[derive(Debug, Default)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub vars: HashMap<String, VarScope>,
    pub tags: HashMap<String, TypeId>,
    pub locals: Vec<ObjId>,
    /// Temporary scopes (around compound literals and call arguments) are
    /// skipped when choosing where a compound literal's storage lives.
    pub is_temporary: bool,
}

/// Everything the phases share: input files, the type arena, objects and
/// scopes, plus a couple of process-wide counters.
#[derive(Debug)]
pub struct Session {
    pub files: SourceManager,
    pub types: TypeArena,
    pub objs: Vec<Obj>,
    pub scopes: Vec<Scope>,
    next_tok_id: u32,
    next_unique: u32,
    /// Set when `setjmp`-like functions are referenced; disables temp-stack
    /// slot reuse and sibling-scope offset sharing.
    pub dont_reuse_stack: bool,
}

impl Session {
    pub fn new() -> Session {
        Session {
            files: SourceManager::new(),
            types: TypeArena::new(),
            objs: Vec::new(),
            scopes: vec![Scope::default()],
            next_tok_id: 0,
            next_unique: 0,
            dont_reuse_stack: false,
        }
    }

    pub fn obj(&self, id: ObjId) -> &Obj {
        &self.objs[id.0 as usize]
    }

    pub fn obj_mut(&mut self, id: ObjId) -> &mut Obj {
        &mut self.objs[id.0 as usize]
    }

    pub fn add_obj(&mut self, obj: Obj) -> ObjId {
        let id = ObjId(self.objs.len() as u32);
        self.objs.push(obj);
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    pub fn new_scope(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent: Some(parent),
            ..Scope::default()
        });
        self.scopes[parent.0 as usize].children.push(id);
        id
    }

    pub fn file_scope(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn next_tok_id(&mut self) -> u32 {
        let id = self.next_tok_id;
        self.next_tok_id += 1;
        id
    }

    /// Anonymous labels for compiler-generated globals and jump targets.
    pub fn new_unique_name(&mut self) -> String {
        let n = self.next_unique;
        self.next_unique += 1;
        format!(".L..{}", n)
    }

    pub fn error_at(&self, loc: Loc, msg: &str) -> Diagnostic {
        Diagnostic::at(&self.files, loc, msg)
    }

    pub fn error_tok(&self, tok: &Token, msg: &str) -> Diagnostic {
        self.error_at(tok.loc(), msg)
    }

    /// Structural compatibility of two types, following typedef `origin`
    /// links and matching tagged redeclarations by identity.
    pub fn is_compatible(&self, t1: TypeId, t2: TypeId) -> bool {
        if t1 == t2 {
            return true;
        }
        if let Some(o) = self.types.get(t1).origin {
            return self.is_compatible(o, t2);
        }
        if let Some(o) = self.types.get(t2).origin {
            return self.is_compatible(t1, o);
        }

        let k1 = self.types.kind(t1);
        let k2 = self.types.kind(t2);

        // A VLA is compatible with arrays and VLAs of a compatible element.
        let vlaish = |k: &TypeKind| matches!(k, TypeKind::Vla { .. });
        if (vlaish(k1) && matches!(k2, TypeKind::Array { .. } | TypeKind::Vla { .. }))
            || (vlaish(k2) && matches!(k1, TypeKind::Array { .. }))
        {
            return self.is_compatible(
                self.types.base(t1).unwrap(),
                self.types.base(t2).unwrap(),
            );
        }

        if std::mem::discriminant(k1) != std::mem::discriminant(k2) {
            return false;
        }

        match (k1, k2) {
            (TypeKind::PChar, _)
            | (TypeKind::Char, _)
            | (TypeKind::Short, _)
            | (TypeKind::Int, _)
            | (TypeKind::Long, _)
            | (TypeKind::LongLong, _) => {
                self.types.is_unsigned(t1) == self.types.is_unsigned(t2)
            }
            (TypeKind::Float, _) | (TypeKind::Double, _) | (TypeKind::LongDouble, _) => true,
            (TypeKind::Ptr { base: b1 }, TypeKind::Ptr { base: b2 }) => {
                self.is_compatible(*b1, *b2)
            }
            (TypeKind::Func(f1), TypeKind::Func(f2)) => {
                if !self.is_compatible(f1.return_ty, f2.return_ty)
                    || f1.is_variadic != f2.is_variadic
                    || f1.params.len() != f2.params.len()
                {
                    return false;
                }
                f1.params
                    .iter()
                    .zip(&f2.params)
                    .all(|(p1, p2)| self.is_compatible(self.obj(*p1).ty, self.obj(*p2).ty))
            }
            (
                TypeKind::Array { base: b1, len: l1 },
                TypeKind::Array { base: b2, len: l2 },
            ) => {
                self.is_compatible(*b1, *b2) && (*l1 < 0 || *l2 < 0 || l1 == l2)
            }
            _ => false,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{TY_INT, TY_LONG, TY_UINT};

    #[test]
    fn compat_reflexive_and_copies() {
        let mut sess = Session::new();
        assert!(sess.is_compatible(TY_INT, TY_INT));
        assert!(!sess.is_compatible(TY_INT, TY_UINT));
        assert!(!sess.is_compatible(TY_INT, TY_LONG));
        let copy = sess.types.copy_type(TY_INT);
        assert!(sess.is_compatible(TY_INT, copy));
        assert!(sess.is_compatible(copy, TY_INT));
    }

    #[test]
    fn compat_pointers_and_arrays() {
        let mut sess = Session::new();
        let p1 = sess.types.pointer_to(TY_INT);
        let p2 = sess.types.pointer_to(TY_INT);
        let p3 = sess.types.pointer_to(TY_LONG);
        assert!(sess.is_compatible(p1, p2));
        assert!(!sess.is_compatible(p1, p3));

        let a1 = sess.types.array_of(TY_INT, 4);
        let a2 = sess.types.array_of(TY_INT, 4);
        let a3 = sess.types.array_of(TY_INT, 5);
        let a4 = sess.types.array_of(TY_INT, -1);
        assert!(sess.is_compatible(a1, a2));
        assert!(!sess.is_compatible(a1, a3));
        assert!(sess.is_compatible(a1, a4));
    }
}
