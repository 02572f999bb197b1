//! Data-section emission.
//!
//! Initialized globals go to `.data` (`.tdata` when thread-local),
//! zero-initialized ones to `.bss`/`.tbss`, and tentative definitions
//! become common symbols under `-fcommon`. Pointer-valued initializer
//! bytes are replaced by `.quad label+addend` relocations.

use crate::backend::x86::codegen::CodeGen;
use crate::backend::x86::wln;
use crate::common::session::ObjId;
use crate::common::types::TypeKind;

impl<'a> CodeGen<'a> {
    pub(super) fn emit_data(&mut self, prog: &[ObjId]) {
        // Function-local statics are emitted alongside file-scope data.
        let mut vars: Vec<ObjId> = Vec::new();
        for &g in prog {
            if self.sess.obj(g).is_function {
                vars.extend(self.sess.obj(g).static_lvars.iter().copied());
            } else {
                vars.push(g);
            }
        }

        for var in vars {
            let (is_definition, is_static, is_tls, is_tentative, ty, name) = {
                let o = self.sess.obj(var);
                (
                    o.is_definition,
                    o.is_static,
                    o.is_tls,
                    o.is_tentative,
                    o.ty,
                    o.name.clone(),
                )
            };
            if !is_definition {
                continue;
            }

            if is_static {
                wln!(self, "  .local \"{}\"", name);
            } else {
                wln!(self, "  .globl \"{}\"", name);
            }

            let size = self.sess.types.size(ty).max(0);
            let mut align = self.sess.types.align(ty);
            if matches!(self.sess.types.kind(ty), TypeKind::Array { .. }) && size >= 16 {
                align = align.max(16);
            }

            if self.opts.opt_fcommon && is_tentative {
                wln!(self, "  .comm \"{}\", {}, {}", name, size, align);
                continue;
            }

            let init_data = self.sess.obj(var).init_data.clone();
            if let Some(data) = init_data {
                match (is_tls, self.opts.opt_data_sections) {
                    (true, true) => {
                        wln!(self, "  .section .tdata.\"{}\",\"awT\",@progbits", name)
                    }
                    (true, false) => wln!(self, "  .section .tdata,\"awT\",@progbits"),
                    (false, true) => {
                        wln!(self, "  .section .data.\"{}\",\"aw\",@progbits", name)
                    }
                    (false, false) => wln!(self, "  .data"),
                }
                wln!(self, "  .type \"{}\", @object", name);
                wln!(self, "  .size \"{}\", {}", name, size);
                wln!(self, "  .align {}", align);
                wln!(self, "\"{}\":", name);

                let rels = self.sess.obj(var).rel.clone();
                let mut rel_iter = rels.iter().peekable();
                let mut pos: i64 = 0;
                while pos < size {
                    match rel_iter.peek() {
                        Some(rel) if rel.offset == pos => {
                            wln!(self, "  .quad \"{}\"{:+}", rel.label, rel.addend);
                            rel_iter.next();
                            pos += 8;
                        }
                        _ => {
                            wln!(self, "  .byte {}", data[pos as usize]);
                            pos += 1;
                        }
                    }
                }
                continue;
            }

            match (is_tls, self.opts.opt_data_sections) {
                (true, true) => wln!(self, "  .section .tbss.\"{}\",\"awT\",@nobits", name),
                (true, false) => wln!(self, "  .section .tbss,\"awT\",@nobits"),
                (false, true) => wln!(self, "  .section .bss.\"{}\",\"aw\",@nobits", name),
                (false, false) => wln!(self, "  .bss"),
            }
            wln!(self, "  .align {}", align);
            wln!(self, "\"{}\":", name);
            wln!(self, "  .zero {}", size);
        }
    }
}
