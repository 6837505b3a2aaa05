//! Native x86-64 backend: emits real machine code, using the hardware
//! stack (`rsp`) as the operand stack and `rbp`-relative addressing for
//! locals and parameters (spec.md §4.4.a). Every function gets a
//! standard frame prologue/epilogue; calls to other `gots` functions are
//! PC-relative (`call rel32`), calls to runtime helpers are absolute
//! (loaded into a scratch register, since a helper may live further
//! than +/-2GiB from JIT-generated code).

use super::{
    CodegenBackend, CodegenError, CompiledCode, Relocation, RelocationTarget, SymbolResolver,
    TargetArch, TargetInfo,
};
use crate::compiler::buffer::CodeBuffer;
use crate::compiler::ir::{CallTarget, IrBinOp, IrFunction, IrInstr};
use crate::compiler::label::{Label, LabelResolver, PatchSite, PatchWidth};
use rustc_hash::FxHashMap;

// Minimal register subset: rax (accumulator/return), rbx (scratch,
// callee-saved so it survives calls), rbp (frame base), rsp (operand +
// call stack). REX.W is set on every instruction below since the engine
// is 64-bit-value-only at the machine level (narrower logical widths
// are carried in the type lattice, not in instruction selection).
const REX_W: u8 = 0x48;
const RAX: u8 = 0;
const RBX: u8 = 3;
const RSP: u8 = 4;
const RBP: u8 = 5;
const RSI: u8 = 6;
const RDI: u8 = 7;

pub struct NativeX86Backend;

impl NativeX86Backend {
    pub fn new() -> Self {
        NativeX86Backend
    }

    fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
        (mode << 6) | (reg << 3) | rm
    }

    fn emit_push_r64(buf: &mut CodeBuffer, reg: u8) {
        buf.emit_u8(REX_W);
        buf.emit_u8(0x50 + reg);
    }

    fn emit_pop_r64(buf: &mut CodeBuffer, reg: u8) {
        buf.emit_u8(REX_W);
        buf.emit_u8(0x58 + reg);
    }

    fn emit_mov_r64_imm64(buf: &mut CodeBuffer, reg: u8, imm: u64) {
        buf.emit_u8(REX_W);
        buf.emit_u8(0xB8 + reg);
        buf.emit_u64(imm);
    }

    /// `mov reg, [base + disp]`; uses disp8 or disp32 form depending on
    /// range, matching the native backend's displacement rule.
    fn emit_load_disp(buf: &mut CodeBuffer, reg: u8, base: u8, disp: i32) {
        buf.emit_u8(REX_W);
        buf.emit_u8(0x8B);
        if (-128..=127).contains(&disp) {
            buf.emit_u8(Self::modrm(0b01, reg, base));
            buf.emit_u8(disp as i8 as u8);
        } else {
            buf.emit_u8(Self::modrm(0b10, reg, base));
            buf.emit_i32(disp);
        }
    }

    /// `mov [base + disp], reg`.
    fn emit_store_disp(buf: &mut CodeBuffer, reg: u8, base: u8, disp: i32) {
        buf.emit_u8(REX_W);
        buf.emit_u8(0x89);
        if (-128..=127).contains(&disp) {
            buf.emit_u8(Self::modrm(0b01, reg, base));
            buf.emit_u8(disp as i8 as u8);
        } else {
            buf.emit_u8(Self::modrm(0b10, reg, base));
            buf.emit_i32(disp);
        }
    }

    fn emit_load_rbp_disp(buf: &mut CodeBuffer, reg: u8, disp: i32) {
        Self::emit_load_disp(buf, reg, RBP, disp);
    }

    fn emit_store_rbp_disp(buf: &mut CodeBuffer, reg: u8, disp: i32) {
        Self::emit_store_disp(buf, reg, RBP, disp);
    }

    /// `mov dst, src`.
    fn emit_mov_r64_r64(buf: &mut CodeBuffer, dst: u8, src: u8) {
        buf.emit_u8(REX_W);
        buf.emit_u8(0x89);
        buf.emit_u8(Self::modrm(0b11, src, dst));
    }

    /// `add rsp, imm32`; caller-side cleanup after a marshalled call.
    fn emit_add_rsp_imm(buf: &mut CodeBuffer, imm: i32) {
        if imm == 0 {
            return;
        }
        buf.emit_u8(REX_W);
        buf.emit_u8(0x81);
        buf.emit_u8(Self::modrm(0b11, 0, RSP));
        buf.emit_i32(imm);
    }

    /// Sets up `rdi`/`rsi` for a call into a function compiled by this
    /// backend or a runtime helper trampoline: every such boundary reads
    /// its arguments as a `*const i64` (`rdi`) plus a count (`rsi`), so
    /// the current stack top doubles as the argument array so long as
    /// the values underneath it were pushed in reverse logical order
    /// (see `codegen/lower.rs`'s module doc comment).
    fn emit_marshal_args(buf: &mut CodeBuffer, arg_count: u32) {
        Self::emit_mov_r64_r64(buf, RDI, RSP);
        Self::emit_mov_r64_imm64(buf, RSI, arg_count as u64);
    }

    /// Spills the incoming argument array (`rdi`/`rsi`, already set up by
    /// the caller per `emit_marshal_args`) into this function's own
    /// frame slots, in declaration order (`this` first, then params left
    /// to right) — the same order `types::symbol::SymbolTable` assigned
    /// them, so `args[i]` always lands in parameter `i`'s slot.
    fn emit_prologue(buf: &mut CodeBuffer, frame_size: usize, param_count: u32) {
        Self::emit_push_r64(buf, RBP);
        // mov rbp, rsp
        buf.emit_u8(REX_W);
        buf.emit_u8(0x89);
        buf.emit_u8(Self::modrm(0b11, RSP, RBP));
        if frame_size > 0 {
            // sub rsp, imm32
            buf.emit_u8(REX_W);
            buf.emit_u8(0x81);
            buf.emit_u8(Self::modrm(0b11, 5, RSP));
            buf.emit_i32(frame_size as i32);
        }
        for i in 0..param_count {
            Self::emit_load_disp(buf, RAX, RDI, (i * 8) as i32);
            Self::emit_store_disp(buf, RAX, RBP, -8 * (i as i32 + 1));
        }
    }

    fn emit_epilogue(buf: &mut CodeBuffer) {
        // mov rsp, rbp
        buf.emit_u8(REX_W);
        buf.emit_u8(0x89);
        buf.emit_u8(Self::modrm(0b11, RBP, RSP));
        Self::emit_pop_r64(buf, RBP);
        buf.emit_u8(0xC3); // ret
    }

    fn emit_binop(buf: &mut CodeBuffer, op: IrBinOp) {
        // Operands arrive on the machine stack, right then left pushed;
        // pop right into rbx, left into rax, combine into rax, push rax.
        Self::emit_pop_r64(buf, RBX);
        Self::emit_pop_r64(buf, RAX);
        match op {
            IrBinOp::Add => {
                buf.emit_u8(REX_W);
                buf.emit_u8(0x01); // add r/m64, r64
                buf.emit_u8(Self::modrm(0b11, RBX, RAX));
            }
            IrBinOp::Sub => {
                buf.emit_u8(REX_W);
                buf.emit_u8(0x29); // sub r/m64, r64
                buf.emit_u8(Self::modrm(0b11, RBX, RAX));
            }
            IrBinOp::Mul => {
                // imul rax, rbx
                buf.emit_u8(REX_W);
                buf.emit_u8(0x0F);
                buf.emit_u8(0xAF);
                buf.emit_u8(Self::modrm(0b11, RAX, RBX));
            }
            IrBinOp::Div => {
                // cqo; idiv rbx  (dividend in rdx:rax, quotient in rax)
                buf.emit_u8(REX_W);
                buf.emit_u8(0x99);
                buf.emit_u8(REX_W);
                buf.emit_u8(0xF7);
                buf.emit_u8(Self::modrm(0b11, 7, RBX));
            }
            IrBinOp::Mod => {
                buf.emit_u8(REX_W);
                buf.emit_u8(0x99);
                buf.emit_u8(REX_W);
                buf.emit_u8(0xF7);
                buf.emit_u8(Self::modrm(0b11, 7, RBX));
                // remainder left in rdx; move it into rax for the push below
                buf.emit_u8(REX_W);
                buf.emit_u8(0x89);
                buf.emit_u8(Self::modrm(0b11, 2 /* rdx */, RAX));
            }
            IrBinOp::Eq | IrBinOp::Ne | IrBinOp::Lt | IrBinOp::Gt | IrBinOp::Le | IrBinOp::Ge => {
                // cmp rax, rbx ; setcc al ; movzx rax, al
                buf.emit_u8(REX_W);
                buf.emit_u8(0x39);
                buf.emit_u8(Self::modrm(0b11, RBX, RAX));
                let setcc = match op {
                    IrBinOp::Eq => 0x94,
                    IrBinOp::Ne => 0x95,
                    IrBinOp::Lt => 0x9C,
                    IrBinOp::Gt => 0x9F,
                    IrBinOp::Le => 0x9E,
                    IrBinOp::Ge => 0x9D,
                    _ => unreachable!(),
                };
                buf.emit_u8(0x0F);
                buf.emit_u8(setcc);
                buf.emit_u8(Self::modrm(0b11, 0, RAX));
                buf.emit_u8(REX_W);
                buf.emit_u8(0x0F);
                buf.emit_u8(0xB6);
                buf.emit_u8(Self::modrm(0b11, RAX, RAX));
            }
            IrBinOp::And => {
                buf.emit_u8(REX_W);
                buf.emit_u8(0x21);
                buf.emit_u8(Self::modrm(0b11, RBX, RAX));
            }
            IrBinOp::Or => {
                buf.emit_u8(REX_W);
                buf.emit_u8(0x09);
                buf.emit_u8(Self::modrm(0b11, RBX, RAX));
            }
        }
        Self::emit_push_r64(buf, RAX);
    }
}

impl Default for NativeX86Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl CodegenBackend for NativeX86Backend {
    fn name(&self) -> &str {
        "native-x86_64"
    }

    fn compile_function(&self, func: &IrFunction) -> Result<CompiledCode, CodegenError> {
        let mut buf = CodeBuffer::new();
        let mut labels = LabelResolver::new();
        let mut relocations = Vec::new();
        // IR labels are scoped to this function; map them onto the
        // resolver's own label ids the first time they're seen.
        let mut seen: FxHashMap<Label, Label> = FxHashMap::default();
        fn mapped(labels: &mut LabelResolver, seen: &mut FxHashMap<Label, Label>, l: Label) -> Label {
            *seen.entry(l).or_insert_with(|| labels.new_label())
        }

        let entry_offset = buf.offset();
        Self::emit_prologue(&mut buf, func.frame_size, func.param_count);

        for instr in &func.instrs {
            match instr {
                IrInstr::LoadConstInt(v) => Self::emit_push_imm(&mut buf, *v as u64),
                IrInstr::LoadConstBool(b) => Self::emit_push_imm(&mut buf, *b as u64),
                IrInstr::LoadConstFloat(f) => Self::emit_push_imm(&mut buf, f.to_bits()),
                IrInstr::LoadConstString(_) | IrInstr::LoadNull => {
                    // String/object payloads are heap references managed by
                    // the allocator; the JIT only ever pushes the pointer
                    // the runtime helper hands back. Null is the zero
                    // pointer.
                    Self::emit_push_imm(&mut buf, 0);
                }
                IrInstr::LoadLocal(offset) => {
                    Self::emit_load_rbp_disp(&mut buf, RAX, *offset);
                    Self::emit_push_r64(&mut buf, RAX);
                }
                IrInstr::StoreLocal(offset) => {
                    Self::emit_pop_r64(&mut buf, RAX);
                    Self::emit_store_rbp_disp(&mut buf, RAX, *offset);
                }
                IrInstr::LoadGlobal(_) | IrInstr::StoreGlobal(_) => {
                    // Globals live in a fixed runtime table reached via a
                    // helper call in the lowering pass; nothing to encode
                    // directly here in this reference implementation.
                }
                IrInstr::LoadField { offset, .. } => {
                    Self::emit_pop_r64(&mut buf, RAX); // object pointer
                    Self::emit_load_disp(&mut buf, RAX, RAX, *offset as i32);
                    Self::emit_push_r64(&mut buf, RAX);
                }
                IrInstr::StoreField { offset } => {
                    // `lower_store_to`'s `Member` branch pushes the
                    // object pointer after the value, so it's on top.
                    Self::emit_pop_r64(&mut buf, RAX); // object pointer
                    Self::emit_pop_r64(&mut buf, RBX); // value
                    Self::emit_store_disp(&mut buf, RBX, RAX, *offset as i32);
                }
                IrInstr::BinOp(op) => Self::emit_binop(&mut buf, *op),
                IrInstr::Neg => {
                    Self::emit_pop_r64(&mut buf, RAX);
                    buf.emit_u8(REX_W);
                    buf.emit_u8(0xF7);
                    buf.emit_u8(Self::modrm(0b11, 3, RAX)); // neg rax
                    Self::emit_push_r64(&mut buf, RAX);
                }
                IrInstr::Not => {
                    Self::emit_pop_r64(&mut buf, RAX);
                    buf.emit_u8(REX_W);
                    buf.emit_u8(0x83);
                    buf.emit_u8(Self::modrm(0b11, 6, RAX)); // xor rax, imm8
                    buf.emit_u8(1);
                    Self::emit_push_r64(&mut buf, RAX);
                }
                IrInstr::BindLabel(l) => {
                    let mapped_label = mapped(&mut labels, &mut seen, *l);
                    let resolved = labels.declare(mapped_label, buf.offset());
                    for site in resolved {
                        Self::patch_rel32(&mut buf, site, buf.offset());
                    }
                }
                IrInstr::Jump(l) => {
                    let mapped_label = mapped(&mut labels, &mut seen, *l);
                    buf.emit_u8(0xE9); // jmp rel32
                    let site_offset = buf.reserve_i32();
                    if let Some(target) = labels.reference(
                        mapped_label,
                        PatchSite {
                            offset: site_offset,
                            width: PatchWidth::Rel32,
                        },
                    ) {
                        let rel = target as i64 - (site_offset as i64 + 4);
                        buf.patch_i32(site_offset, rel as i32);
                    }
                }
                IrInstr::JumpIfFalse(l) => {
                    let mapped_label = mapped(&mut labels, &mut seen, *l);
                    Self::emit_pop_r64(&mut buf, RAX);
                    buf.emit_u8(REX_W);
                    buf.emit_u8(0x83);
                    buf.emit_u8(Self::modrm(0b11, 7, RAX)); // cmp rax, 0
                    buf.emit_u8(0);
                    buf.emit_u8(0x0F);
                    buf.emit_u8(0x84); // je rel32
                    let site_offset = buf.reserve_i32();
                    if let Some(target) = labels.reference(
                        mapped_label,
                        PatchSite {
                            offset: site_offset,
                            width: PatchWidth::Rel32,
                        },
                    ) {
                        let rel = target as i64 - (site_offset as i64 + 4);
                        buf.patch_i32(site_offset, rel as i32);
                    }
                }
                IrInstr::Call { target, arg_count } => {
                    // `rdi`/`rsi` must be set up from the current `rsp`
                    // before materializing a helper's address into `rax`
                    // (that mov doesn't touch `rsp`, but do it first
                    // anyway so the arg block is never disturbed).
                    Self::emit_marshal_args(&mut buf, *arg_count);
                    match target {
                        CallTarget::Function(name) => {
                            buf.emit_u8(0xE8); // call rel32
                            let site_offset = buf.reserve_i32();
                            relocations.push(Relocation {
                                code_offset: site_offset,
                                target: RelocationTarget::Function(name.clone()),
                                kind: super::RelocKind::Rel32,
                            });
                        }
                        CallTarget::Helper(helper) => {
                            let addr_slot = buf.offset();
                            Self::emit_mov_r64_imm64(&mut buf, RAX, 0);
                            relocations.push(Relocation {
                                code_offset: addr_slot + 2, // skip REX.W + opcode
                                target: RelocationTarget::RuntimeHelper(*helper),
                                kind: super::RelocKind::Abs64,
                            });
                            // call rax
                            buf.emit_u8(0xFF);
                            buf.emit_u8(Self::modrm(0b11, 2, RAX));
                        }
                    }
                    Self::emit_add_rsp_imm(&mut buf, 8 * *arg_count as i32);
                    Self::emit_push_r64(&mut buf, RAX); // return value
                }
                IrInstr::Return { has_value } => {
                    if *has_value {
                        Self::emit_pop_r64(&mut buf, RAX);
                    }
                    Self::emit_epilogue(&mut buf);
                }
                IrInstr::Pop => {
                    Self::emit_pop_r64(&mut buf, RAX);
                }
                IrInstr::Dup => {
                    Self::emit_pop_r64(&mut buf, RAX);
                    Self::emit_push_r64(&mut buf, RAX);
                    Self::emit_push_r64(&mut buf, RAX);
                }
                IrInstr::Spawn { target, arg_count } => {
                    // The task's own arguments are already on the stack,
                    // pushed in reverse so they read ascending from
                    // their own block's top (`codegen/lower.rs`'s module
                    // doc comment). `helpers::spawn_task` expects one
                    // contiguous `[func_addr, task_argc, task_args...]`
                    // array, so push `argc` then `func_addr` on top of
                    // those — `func_addr` ends up closest to the new
                    // `rsp`, i.e. position 0, with `argc` at position 1
                    // and the task args following, exactly the shape
                    // `spawn_task` unpacks. The task body itself is
                    // never executed here, only its address taken (the
                    // defect spec.md §9 documents for an inline-emitting
                    // implementation).
                    let func_name = match target {
                        CallTarget::Function(name) => name.clone(),
                        CallTarget::Helper(_) => {
                            return Err(CodegenError::Backend(
                                "spawn target must be a named function".to_string(),
                            ))
                        }
                    };
                    Self::emit_push_imm(&mut buf, *arg_count as u64);
                    let func_addr_slot = buf.offset();
                    Self::emit_mov_r64_imm64(&mut buf, RBX, 0);
                    relocations.push(Relocation {
                        code_offset: func_addr_slot + 2,
                        target: RelocationTarget::Function(func_name),
                        kind: super::RelocKind::Abs64,
                    });
                    Self::emit_push_r64(&mut buf, RBX);

                    let total = *arg_count + 2;
                    Self::emit_marshal_args(&mut buf, total);
                    let addr_slot = buf.offset();
                    Self::emit_mov_r64_imm64(&mut buf, RAX, 0);
                    relocations.push(Relocation {
                        code_offset: addr_slot + 2,
                        target: RelocationTarget::RuntimeHelper(super::RuntimeHelper::SpawnTask),
                        kind: super::RelocKind::Abs64,
                    });
                    buf.emit_u8(0xFF);
                    buf.emit_u8(Self::modrm(0b11, 2, RAX));
                    Self::emit_add_rsp_imm(&mut buf, 8 * total as i32);
                    Self::emit_push_r64(&mut buf, RAX);
                }
                IrInstr::LoadFunctionAddr(name) => {
                    let addr_slot = buf.offset();
                    Self::emit_mov_r64_imm64(&mut buf, RAX, 0);
                    relocations.push(Relocation {
                        code_offset: addr_slot + 2,
                        target: RelocationTarget::Function(name.clone()),
                        kind: super::RelocKind::Abs64,
                    });
                    Self::emit_push_r64(&mut buf, RAX);
                }
                IrInstr::Await => {
                    // `lower_expr`'s `Expr::Await` pushed the task id
                    // being awaited; marshal it as the helper's sole arg.
                    Self::emit_marshal_args(&mut buf, 1);
                    let addr_slot = buf.offset();
                    Self::emit_mov_r64_imm64(&mut buf, RAX, 0);
                    relocations.push(Relocation {
                        code_offset: addr_slot + 2,
                        target: RelocationTarget::RuntimeHelper(super::RuntimeHelper::AwaitPromise),
                        kind: super::RelocKind::Abs64,
                    });
                    buf.emit_u8(0xFF);
                    buf.emit_u8(Self::modrm(0b11, 2, RAX));
                    Self::emit_add_rsp_imm(&mut buf, 8);
                    Self::emit_push_r64(&mut buf, RAX);
                }
            }
        }

        // A function whose body falls through without an explicit
        // `return` still needs a well-formed epilogue.
        Self::emit_epilogue(&mut buf);

        labels.finish().map_err(|e| CodegenError::Backend(e.to_string()))?;

        Ok(CompiledCode {
            code: buf.as_slice().to_vec(),
            entry_offset,
            relocations,
        })
    }

    fn finalize(
        &self,
        code: CompiledCode,
        code_base: usize,
        resolver: &dyn SymbolResolver,
    ) -> Result<Vec<u8>, CodegenError> {
        let mut bytes = code.code;
        for reloc in &code.relocations {
            let target_addr = match &reloc.target {
                RelocationTarget::RuntimeHelper(h) => resolver.resolve_helper(*h),
                RelocationTarget::Function(name) => resolver.resolve_function(name),
                RelocationTarget::Absolute(addr) => Some(*addr),
            }
            .ok_or_else(|| {
                CodegenError::Backend(format!("unresolved relocation target at {:?}", reloc.target))
            })?;

            match reloc.kind {
                super::RelocKind::Rel32 => {
                    // PC-relative against the address this buffer will
                    // execute from once copied to `code_base` — never
                    // this temporary `Vec`'s own heap address, which
                    // would make every cross-function call wrong.
                    let rel = target_addr as i64
                        - (code_base as i64 + reloc.code_offset as i64 + 4);
                    bytes[reloc.code_offset..reloc.code_offset + 4]
                        .copy_from_slice(&(rel as i32).to_le_bytes());
                }
                super::RelocKind::Abs64 => {
                    bytes[reloc.code_offset..reloc.code_offset + 8]
                        .copy_from_slice(&(target_addr as u64).to_le_bytes());
                }
            }
        }

        Ok(bytes)
    }

    fn target_info(&self) -> TargetInfo {
        TargetInfo {
            arch: TargetArch::X86_64,
            pointer_size: 8,
        }
    }
}

impl NativeX86Backend {
    fn emit_push_imm(buf: &mut CodeBuffer, value: u64) {
        Self::emit_mov_r64_imm64(buf, RAX, value);
        Self::emit_push_r64(buf, RAX);
    }

    fn patch_rel32(buf: &mut CodeBuffer, site: PatchSite, target_offset: usize) {
        debug_assert_eq!(site.width, PatchWidth::Rel32);
        let rel = target_offset as i64 - (site.offset as i64 + 4);
        buf.patch_i32(site.offset, rel as i32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::IrInstr;

    #[test]
    fn prologue_reserves_the_frame_and_epilogue_restores_it() {
        let mut func = IrFunction::new("f", 0, 16);
        func.push(IrInstr::LoadConstInt(1));
        func.push(IrInstr::Return { has_value: true });
        let backend = NativeX86Backend::new();
        let compiled = backend.compile_function(&func).unwrap();
        assert!(!compiled.code.is_empty());
        assert_eq!(compiled.code[0], REX_W);
        assert_eq!(compiled.code[1], 0x50 + RBP); // push rbp
    }

    #[test]
    fn call_to_named_function_produces_a_relocation() {
        let mut func = IrFunction::new("f", 0, 0);
        func.push(IrInstr::Call {
            target: CallTarget::Function("helper_fn".to_string()),
            arg_count: 0,
        });
        func.push(IrInstr::Return { has_value: false });
        let backend = NativeX86Backend::new();
        let compiled = backend.compile_function(&func).unwrap();
        assert_eq!(compiled.relocations.len(), 1);
        assert!(matches!(
            compiled.relocations[0].target,
            RelocationTarget::Function(ref name) if name == "helper_fn"
        ));
    }

    #[test]
    fn unresolved_jump_target_is_rejected() {
        // Constructing this case directly against LabelResolver (rather
        // than through IrFunction, which always binds labels it jumps
        // to) is covered in label.rs's own tests; here we only check
        // that a function whose jump target is genuinely never bound
        // surfaces as a backend error rather than panicking.
        let mut func = IrFunction::new("f", 0, 0);
        func.push(IrInstr::Jump(crate::compiler::label::Label(99)));
        func.push(IrInstr::Return { has_value: false });
        let backend = NativeX86Backend::new();
        let result = backend.compile_function(&func);
        assert!(result.is_err());
    }
}
