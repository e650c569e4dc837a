//! Program construction.
//!
//! [`ProgramBuilder`] assembles modules, functions, globals, constants, and
//! instructions, then computes use lists in [`ProgramBuilder::finish`]. There
//! is no IR parser in this crate; drivers and tests build programs directly.

use std::collections::HashMap;

use crate::error::Error;
use crate::function::{function_guid, Function, FunctionId, Intrinsic};
use crate::layout::DataLayout;
use crate::module::{GlobalId, GlobalVariable, Module, ModuleId, Program};
use crate::types::{FunctionType, Type};
use crate::value::{CastKind, UnaryOp, ValueData, ValueId, ValueKind};

/// Builder for a whole [`Program`].
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
    function_refs: HashMap<FunctionId, ValueId>,
    global_refs: HashMap<GlobalId, ValueId>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module with the given data layout.
    pub fn add_module(&mut self, name: impl Into<String>, layout: DataLayout) -> ModuleId {
        let id = ModuleId(self.program.modules.len() as u32);
        self.program.modules.push(Module {
            name: name.into(),
            layout,
            functions: Vec::new(),
            globals: Vec::new(),
        });
        id
    }

    /// Add a function definition. Argument values are created for every
    /// parameter type.
    pub fn add_function(
        &mut self,
        module: ModuleId,
        name: impl Into<String>,
        ty: FunctionType,
    ) -> FunctionId {
        self.add_function_inner(module, name.into(), ty, true)
    }

    /// Add a function declaration (no body; resolved to a definition in
    /// another module through its guid).
    pub fn declare_function(
        &mut self,
        module: ModuleId,
        name: impl Into<String>,
        ty: FunctionType,
    ) -> FunctionId {
        self.add_function_inner(module, name.into(), ty, false)
    }

    fn add_function_inner(
        &mut self,
        module: ModuleId,
        name: String,
        ty: FunctionType,
        is_definition: bool,
    ) -> FunctionId {
        let id = FunctionId(self.program.functions.len() as u32);
        let guid = function_guid(&name);
        let params = ty
            .params
            .iter()
            .enumerate()
            .map(|(index, pty)| {
                self.push_value(ValueData {
                    ty: pty.clone(),
                    kind: ValueKind::Argument {
                        index: index as u32,
                    },
                    parent: Some(id),
                })
            })
            .collect();
        self.program.functions.push(Function {
            name,
            module,
            ty,
            is_address_taken: false,
            intrinsic: None,
            is_definition,
            guid,
            params,
            instructions: Vec::new(),
        });
        self.program.modules[module.0 as usize].functions.push(id);
        id
    }

    /// The formal parameter value of a function.
    pub fn param(&self, f: FunctionId, index: usize) -> ValueId {
        self.program.function(f).params[index]
    }

    /// Mark a function address-taken.
    pub fn set_address_taken(&mut self, f: FunctionId) {
        self.program.functions[f.0 as usize].is_address_taken = true;
    }

    /// Mark a function as a compiler intrinsic.
    pub fn set_intrinsic(&mut self, f: FunctionId, intrinsic: Intrinsic) {
        self.program.functions[f.0 as usize].intrinsic = Some(intrinsic);
    }

    /// Add a global variable of value type `ty`.
    pub fn add_global(&mut self, module: ModuleId, name: impl Into<String>, ty: Type) -> GlobalId {
        let id = GlobalId(self.program.globals.len() as u32);
        self.program.globals.push(GlobalVariable {
            name: name.into(),
            module,
            ty,
            initializer: None,
        });
        self.program.modules[module.0 as usize].globals.push(id);
        id
    }

    /// Attach an initializer constant to a global.
    pub fn set_initializer(&mut self, g: GlobalId, init: ValueId) -> Result<(), Error> {
        let global = &self.program.globals[g.0 as usize];
        if global.initializer.is_some() {
            return Err(Error::AlreadyInitialized(g));
        }
        if self.program.value(init).ty != global.ty {
            return Err(Error::InitializerTypeMismatch(g));
        }
        self.program.globals[g.0 as usize].initializer = Some(init);
        Ok(())
    }

    // ---- constants -------------------------------------------------------

    /// Constant integer of the given bit width.
    pub fn const_int(&mut self, bits: u32, value: i64) -> ValueId {
        self.push_value(ValueData {
            ty: Type::int(bits),
            kind: ValueKind::ConstInt { value },
            parent: None,
        })
    }

    /// Null constant of the given pointer type.
    pub fn const_null(&mut self, ty: Type) -> ValueId {
        self.push_value(ValueData {
            ty,
            kind: ValueKind::ConstNull,
            parent: None,
        })
    }

    /// Opaque constant data of the given type (zero initializers, strings).
    pub fn const_data(&mut self, ty: Type) -> ValueId {
        self.push_value(ValueData {
            ty,
            kind: ValueKind::ConstData,
            parent: None,
        })
    }

    /// Constant aggregate. Structure constants must supply exactly one
    /// operand per declared field.
    pub fn const_aggregate(&mut self, ty: Type, operands: Vec<ValueId>) -> Result<ValueId, Error> {
        if let Some(expected) = ty.composite_len() {
            if matches!(ty, Type::Struct(_)) && expected != operands.len() {
                return Err(Error::MalformedAggregate {
                    expected,
                    got: operands.len(),
                });
            }
        }
        Ok(self.push_value(ValueData {
            ty,
            kind: ValueKind::ConstAggregate { operands },
            parent: None,
        }))
    }

    /// The address of a function. One value per function; repeated calls
    /// return the same id.
    pub fn function_ref(&mut self, f: FunctionId) -> ValueId {
        if let Some(&v) = self.function_refs.get(&f) {
            return v;
        }
        let ty = Type::ptr(Type::Function(self.program.function(f).ty.clone()));
        let v = self.push_value(ValueData {
            ty,
            kind: ValueKind::FunctionRef(f),
            parent: None,
        });
        self.function_refs.insert(f, v);
        v
    }

    /// The address of a global. One value per global; repeated calls return
    /// the same id.
    pub fn global_ref(&mut self, g: GlobalId) -> ValueId {
        if let Some(&v) = self.global_refs.get(&g) {
            return v;
        }
        let ty = Type::ptr(self.program.global(g).ty.clone());
        let v = self.push_value(ValueData {
            ty,
            kind: ValueKind::GlobalRef(g),
            parent: None,
        });
        self.global_refs.insert(g, v);
        v
    }

    /// Constant-expression reinterpret cast.
    pub fn const_bitcast(&mut self, to_ty: Type, operand: ValueId) -> ValueId {
        self.push_value(ValueData {
            ty: to_ty,
            kind: ValueKind::Cast {
                kind: CastKind::BitCast,
                operand,
            },
            parent: None,
        })
    }

    /// Constant-expression pointer-to-integer cast.
    pub fn const_ptr_to_int(&mut self, bits: u32, operand: ValueId) -> ValueId {
        self.push_value(ValueData {
            ty: Type::int(bits),
            kind: ValueKind::Cast {
                kind: CastKind::PtrToInt,
                operand,
            },
            parent: None,
        })
    }

    /// Constant-expression field access with constant indices.
    pub fn const_gep(&mut self, base: ValueId, indices: &[i64]) -> ValueId {
        let (source_ty, result_ty, index_values) = self.prepare_gep(base, indices);
        self.push_value(ValueData {
            ty: result_ty,
            kind: ValueKind::Gep {
                base,
                source_ty,
                indices: index_values,
            },
            parent: None,
        })
    }

    // ---- instructions ----------------------------------------------------

    /// Stack allocation of `ty`; yields a pointer to it.
    pub fn inst_alloca(&mut self, f: FunctionId, ty: Type) -> ValueId {
        self.push_instruction(
            f,
            ValueData {
                ty: Type::ptr(ty),
                kind: ValueKind::Alloca,
                parent: Some(f),
            },
        )
    }

    /// Load through a pointer; the result type is the pointee.
    pub fn inst_load(&mut self, f: FunctionId, ptr: ValueId) -> ValueId {
        let ty = self
            .program
            .ty(ptr)
            .pointee()
            .cloned()
            .unwrap_or(Type::Void);
        self.push_instruction(
            f,
            ValueData {
                ty,
                kind: ValueKind::Load { ptr },
                parent: Some(f),
            },
        )
    }

    /// Store `value` through `ptr`.
    pub fn inst_store(&mut self, f: FunctionId, value: ValueId, ptr: ValueId) -> ValueId {
        self.push_instruction(
            f,
            ValueData {
                ty: Type::Void,
                kind: ValueKind::Store { ptr, value },
                parent: Some(f),
            },
        )
    }

    /// Field access with constant indices.
    pub fn inst_gep(&mut self, f: FunctionId, base: ValueId, indices: &[i64]) -> ValueId {
        let (source_ty, result_ty, index_values) = self.prepare_gep(base, indices);
        self.push_instruction(
            f,
            ValueData {
                ty: result_ty,
                kind: ValueKind::Gep {
                    base,
                    source_ty,
                    indices: index_values,
                },
                parent: Some(f),
            },
        )
    }

    /// Field access with arbitrary index values (dynamic indices allowed on
    /// arrays and vectors). `result_ty` must be supplied because dynamic
    /// struct descent is not computable.
    pub fn inst_gep_values(
        &mut self,
        f: FunctionId,
        base: ValueId,
        indices: Vec<ValueId>,
        result_ty: Type,
    ) -> ValueId {
        let source_ty = self
            .program
            .ty(base)
            .pointee()
            .cloned()
            .unwrap_or(Type::Void);
        self.push_instruction(
            f,
            ValueData {
                ty: result_ty,
                kind: ValueKind::Gep {
                    base,
                    source_ty,
                    indices,
                },
                parent: Some(f),
            },
        )
    }

    /// Reinterpret cast instruction.
    pub fn inst_bitcast(&mut self, f: FunctionId, to_ty: Type, operand: ValueId) -> ValueId {
        self.inst_cast(f, CastKind::BitCast, to_ty, operand)
    }

    /// Cast instruction of an arbitrary kind.
    pub fn inst_cast(
        &mut self,
        f: FunctionId,
        kind: CastKind,
        to_ty: Type,
        operand: ValueId,
    ) -> ValueId {
        self.push_instruction(
            f,
            ValueData {
                ty: to_ty,
                kind: ValueKind::Cast { kind, operand },
                parent: Some(f),
            },
        )
    }

    /// Call through `callee`; the result type is taken from the callee's
    /// function-pointer type.
    pub fn inst_call(&mut self, f: FunctionId, callee: ValueId, args: Vec<ValueId>) -> ValueId {
        let ty = self
            .program
            .func_ptr_type(callee)
            .map(|ft| (*ft.return_type).clone())
            .unwrap_or(Type::Void);
        self.push_instruction(
            f,
            ValueData {
                ty,
                kind: ValueKind::Call {
                    callee,
                    args,
                    inline_asm: false,
                },
                parent: Some(f),
            },
        )
    }

    /// Inline-assembly call.
    pub fn inst_inline_asm(&mut self, f: FunctionId, callee: ValueId, args: Vec<ValueId>) -> ValueId {
        let call = self.inst_call(f, callee, args);
        if let ValueKind::Call { inline_asm, .. } =
            &mut self.program.values[call.0 as usize].kind
        {
            *inline_asm = true;
        }
        call
    }

    /// Append an incoming value to an existing phi. SSA construction wires
    /// loop back-edges this way, after the phi itself exists.
    pub fn add_phi_incoming(&mut self, phi: ValueId, value: ValueId) {
        match &mut self.program.values[phi.0 as usize].kind {
            ValueKind::Phi { incoming } => incoming.push(value),
            other => panic!("add_phi_incoming on non-phi value: {other:?}"),
        }
    }

    /// Phi over `incoming` values.
    pub fn inst_phi(&mut self, f: FunctionId, ty: Type, incoming: Vec<ValueId>) -> ValueId {
        self.push_instruction(
            f,
            ValueData {
                ty,
                kind: ValueKind::Phi { incoming },
                parent: Some(f),
            },
        )
    }

    /// Select between two values; the result type is the true arm's.
    pub fn inst_select(
        &mut self,
        f: FunctionId,
        cond: ValueId,
        if_true: ValueId,
        if_false: ValueId,
    ) -> ValueId {
        let ty = self.program.ty(if_true).clone();
        self.push_instruction(
            f,
            ValueData {
                ty,
                kind: ValueKind::Select {
                    cond,
                    if_true,
                    if_false,
                },
                parent: Some(f),
            },
        )
    }

    /// Unary operator.
    pub fn inst_unary(&mut self, f: FunctionId, op: UnaryOp, operand: ValueId) -> ValueId {
        let ty = self.program.ty(operand).clone();
        self.push_instruction(
            f,
            ValueData {
                ty,
                kind: ValueKind::Unary { op, operand },
                parent: Some(f),
            },
        )
    }

    /// Finish construction: computes use lists and returns the read-only
    /// program.
    pub fn finish(mut self) -> Program {
        self.program.compute_uses();
        self.program
    }

    // ---- internals -------------------------------------------------------

    fn push_value(&mut self, data: ValueData) -> ValueId {
        let id = ValueId(self.program.values.len() as u32);
        self.program.values.push(data);
        id
    }

    fn push_instruction(&mut self, f: FunctionId, data: ValueData) -> ValueId {
        assert!(
            self.program.function(f).is_definition,
            "cannot add instructions to a declaration"
        );
        let id = self.push_value(data);
        self.program.functions[f.0 as usize].instructions.push(id);
        id
    }

    /// Compute a GEP's source element type, result type, and index constants.
    fn prepare_gep(&mut self, base: ValueId, indices: &[i64]) -> (Type, Type, Vec<ValueId>) {
        let source_ty = self
            .program
            .ty(base)
            .pointee()
            .cloned()
            .unwrap_or(Type::Void);
        let mut cur = source_ty.clone();
        for &idx in indices.iter().skip(1) {
            cur = cur
                .field_type(idx)
                .unwrap_or_else(|| panic!("field index {idx} out of range in {cur:?}"))
                .clone();
        }
        let index_values = indices.iter().map(|&i| self.const_int(64, i)).collect();
        (source_ty, Type::ptr(cur), index_values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp_ty() -> Type {
        Type::ptr(Type::func(Type::void(), vec![]))
    }

    #[test]
    fn test_build_module_with_global() {
        let mut b = ProgramBuilder::new();
        let m = b.add_module("m.bc", DataLayout::default());
        let handler_ty = Type::strukt("handler", vec![fp_ty()]);

        let f = b.add_function(m, "on_event", FunctionType::new(Type::void(), vec![]));
        b.set_address_taken(f);

        let g = b.add_global(m, "dispatch", handler_ty.clone());
        let fref = b.function_ref(f);
        let init = b.const_aggregate(handler_ty, vec![fref]).unwrap();
        b.set_initializer(g, init).unwrap();

        let program = b.finish();
        assert_eq!(program.modules().len(), 1);
        assert_eq!(program.global(g).initializer, Some(init));
        // The aggregate uses the function reference.
        assert_eq!(program.users(fref), &[init]);
    }

    #[test]
    fn test_malformed_aggregate_rejected() {
        let mut b = ProgramBuilder::new();
        let m = b.add_module("m.bc", DataLayout::default());
        let f = b.add_function(m, "cb", FunctionType::new(Type::void(), vec![]));
        let fref = b.function_ref(f);
        let two_fields = Type::strukt("pair", vec![fp_ty(), fp_ty()]);
        let err = b.const_aggregate(two_fields, vec![fref]).unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedAggregate {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn test_gep_result_type() {
        let mut b = ProgramBuilder::new();
        let m = b.add_module("m.bc", DataLayout::default());
        let st = Type::strukt("s", vec![Type::int(64), fp_ty()]);
        let f = b.add_function(
            m,
            "use",
            FunctionType::new(Type::void(), vec![Type::ptr(st.clone())]),
        );
        let p = b.param(f, 0);
        let gep = b.inst_gep(f, p, &[0, 1]);
        let program = b.finish();
        assert_eq!(*program.ty(gep), Type::ptr(fp_ty()));
        match &program.value(gep).kind {
            ValueKind::Gep { source_ty, .. } => assert_eq!(*source_ty, st),
            other => panic!("expected gep, got {other:?}"),
        }
    }

    #[test]
    fn test_function_ref_is_shared() {
        let mut b = ProgramBuilder::new();
        let m = b.add_module("m.bc", DataLayout::default());
        let f = b.add_function(m, "cb", FunctionType::new(Type::void(), vec![]));
        assert_eq!(b.function_ref(f), b.function_ref(f));
    }

    #[test]
    fn test_indirect_call_detection() {
        let mut b = ProgramBuilder::new();
        let m = b.add_module("m.bc", DataLayout::default());
        let callee = b.add_function(m, "target", FunctionType::new(Type::void(), vec![]));
        let caller = b.add_function(
            m,
            "caller",
            FunctionType::new(Type::void(), vec![fp_ty()]),
        );
        let fp_arg = b.param(caller, 0);

        let direct = {
            let fref = b.function_ref(callee);
            b.inst_call(caller, fref, vec![])
        };
        let indirect = b.inst_call(caller, fp_arg, vec![]);

        let program = b.finish();
        assert!(!program.is_indirect_call(direct));
        assert!(program.is_indirect_call(indirect));
        assert_eq!(program.called_function(direct), Some(callee));
        assert_eq!(program.called_function(indirect), None);
    }

    #[test]
    fn test_base_function_through_cast() {
        let mut b = ProgramBuilder::new();
        let m = b.add_module("m.bc", DataLayout::default());
        let f = b.add_function(m, "cb", FunctionType::new(Type::void(), vec![]));
        let fref = b.function_ref(f);
        let cast = b.const_bitcast(Type::byte_ptr(), fref);
        let program = b.finish();
        assert_eq!(program.base_function(cast), Some(f));
        assert_eq!(program.strip_pointer_casts(cast), fref);
    }
}
