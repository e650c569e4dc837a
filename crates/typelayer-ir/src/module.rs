//! Modules, globals, and the whole-program container.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::function::{Function, FunctionId};
use crate::layout::DataLayout;
use crate::types::{FunctionType, Type};
use crate::value::{CastKind, ValueData, ValueId, ValueKind};

/// Identifies a module (one translation unit) in the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

/// Identifies a global variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalId(pub u32);

/// A global variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalVariable {
    /// Symbol name.
    pub name: String,
    /// Module that carries this global.
    pub module: ModuleId,
    /// Value type of the global (its address has type pointer-to-this).
    pub ty: Type,
    /// Initializer constant, if any.
    pub initializer: Option<ValueId>,
}

/// One translation unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// Module name (usually the source path).
    pub name: String,
    /// Data layout this module was compiled against.
    pub layout: DataLayout,
    /// Functions carried by this module.
    pub functions: Vec<FunctionId>,
    /// Globals carried by this module.
    pub globals: Vec<GlobalId>,
}

/// A whole program: every module, function, global, and value, plus the use
/// lists derived from the operand graph. Built once through
/// [`crate::ProgramBuilder`]; read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub(crate) modules: Vec<Module>,
    pub(crate) functions: Vec<Function>,
    pub(crate) globals: Vec<GlobalVariable>,
    pub(crate) values: Vec<ValueData>,
    pub(crate) uses: Vec<Vec<ValueId>>,
}

impl Program {
    /// All modules.
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0 as usize]
    }

    /// The data layout of a module.
    pub fn layout(&self, id: ModuleId) -> &DataLayout {
        &self.module(id).layout
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.0 as usize]
    }

    /// All functions, with their ids.
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionId(i as u32), f))
    }

    pub fn global(&self, id: GlobalId) -> &GlobalVariable {
        &self.globals[id.0 as usize]
    }

    /// All globals, with their ids.
    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &GlobalVariable)> {
        self.globals
            .iter()
            .enumerate()
            .map(|(i, g)| (GlobalId(i as u32), g))
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.0 as usize]
    }

    /// Static type of a value.
    pub fn ty(&self, id: ValueId) -> &Type {
        &self.value(id).ty
    }

    /// Values that use `id` as an operand.
    pub fn users(&self, id: ValueId) -> &[ValueId] {
        &self.uses[id.0 as usize]
    }

    /// The data layout governing a value: its parent function's module, or
    /// the default layout for detached constants.
    pub fn layout_of_value(&self, id: ValueId) -> DataLayout {
        match self.value(id).parent {
            Some(f) => self.module(self.function(f).module).layout,
            None => DataLayout::default(),
        }
    }

    /// Constant integer payload of a value, if it is one.
    pub fn const_int(&self, id: ValueId) -> Option<i64> {
        match self.value(id).kind {
            ValueKind::ConstInt { value } => Some(value),
            _ => None,
        }
    }

    /// Strip reinterpret-cast chains from a pointer value.
    pub fn strip_pointer_casts(&self, id: ValueId) -> ValueId {
        let mut cur = id;
        while let ValueKind::Cast {
            kind: CastKind::BitCast,
            operand,
        } = self.value(cur).kind
        {
            cur = operand;
        }
        cur
    }

    /// The non-intrinsic function a value resolves to, looking through
    /// reinterpret casts.
    pub fn base_function(&self, id: ValueId) -> Option<FunctionId> {
        let mut cur = id;
        loop {
            match self.value(cur).kind {
                ValueKind::FunctionRef(f) => {
                    return (!self.function(f).is_intrinsic()).then_some(f);
                }
                ValueKind::Cast {
                    kind: CastKind::BitCast,
                    operand,
                } => cur = operand,
                _ => return None,
            }
        }
    }

    /// The function type of a value whose static type is a function pointer.
    pub fn func_ptr_type(&self, id: ValueId) -> Option<&FunctionType> {
        match self.ty(id).pointee() {
            Some(Type::Function(ft)) => Some(ft),
            _ => None,
        }
    }

    /// The function called by a call value, if the callee operand strips to a
    /// function reference.
    pub fn called_function(&self, call: ValueId) -> Option<FunctionId> {
        match &self.value(call).kind {
            ValueKind::Call { callee, .. } => match self.value(*callee).kind {
                ValueKind::FunctionRef(f) => Some(f),
                _ => None,
            },
            _ => None,
        }
    }

    /// Check if a call value is an indirect call. A callee that is merely a
    /// cast of a function reference still counts as direct.
    pub fn is_indirect_call(&self, call: ValueId) -> bool {
        match &self.value(call).kind {
            ValueKind::Call {
                callee, inline_asm, ..
            } => {
                !inline_asm
                    && !matches!(
                        self.value(self.strip_pointer_casts(*callee)).kind,
                        ValueKind::FunctionRef(_)
                    )
            }
            _ => false,
        }
    }

    /// Find a function by name, preferring the definition.
    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        let mut decl = None;
        for (id, f) in self.functions() {
            if f.name == name {
                if f.is_definition {
                    return Some(id);
                }
                decl.get_or_insert(id);
            }
        }
        decl
    }

    /// Rebuild use lists from the operand graph. Called once by the builder.
    pub(crate) fn compute_uses(&mut self) {
        let mut uses: Vec<Vec<ValueId>> = vec![Vec::new(); self.values.len()];
        let mut seen: HashSet<(u32, u32)> = HashSet::new();
        for (i, data) in self.values.iter().enumerate() {
            let user = ValueId(i as u32);
            for op in data.kind.operands() {
                // One use entry per (user, operand) pair.
                if seen.insert((user.0, op.0)) {
                    uses[op.0 as usize].push(user);
                }
            }
        }
        self.uses = uses;
    }
}
