//! SPIR-V shader reflection.
//!
//! Parses compiled shader binaries to recover everything a pipeline needs
//! that would otherwise be hand-declared: the vertex input layout,
//! descriptor set/binding structure, and push-constant ranges. Uniform
//! buffer sizes are computed from the members a shader actually reaches,
//! not the declared struct size.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use ash::vk;
use glint_core::{DuplicateBindingPolicy, ShaderStage};
use thiserror::Error;

use crate::shader::{ShaderBinary, SPIRV_MAGIC};

// Opcodes, decorations, storage classes and execution modes from the
// SPIR-V specification. Only the subset reflection needs.
const OP_ENTRY_POINT: u32 = 15;
const OP_EXECUTION_MODE: u32 = 16;
const OP_TYPE_FLOAT: u32 = 22;
const OP_TYPE_INT: u32 = 21;
const OP_TYPE_VECTOR: u32 = 23;
const OP_TYPE_MATRIX: u32 = 24;
const OP_TYPE_IMAGE: u32 = 25;
const OP_TYPE_SAMPLER: u32 = 26;
const OP_TYPE_SAMPLED_IMAGE: u32 = 27;
const OP_TYPE_ARRAY: u32 = 28;
const OP_TYPE_RUNTIME_ARRAY: u32 = 29;
const OP_TYPE_STRUCT: u32 = 30;
const OP_TYPE_POINTER: u32 = 32;
const OP_CONSTANT: u32 = 43;
const OP_VARIABLE: u32 = 59;
const OP_LOAD: u32 = 61;
const OP_ACCESS_CHAIN: u32 = 65;
const OP_IN_BOUNDS_ACCESS_CHAIN: u32 = 66;
const OP_DECORATE: u32 = 71;
const OP_MEMBER_DECORATE: u32 = 72;

const DECORATION_BLOCK: u32 = 2;
const DECORATION_ARRAY_STRIDE: u32 = 6;
const DECORATION_MATRIX_STRIDE: u32 = 7;
const DECORATION_BUILTIN: u32 = 11;
const DECORATION_LOCATION: u32 = 30;
const DECORATION_BINDING: u32 = 33;
const DECORATION_DESCRIPTOR_SET: u32 = 34;
const DECORATION_OFFSET: u32 = 35;

const STORAGE_UNIFORM_CONSTANT: u32 = 0;
const STORAGE_INPUT: u32 = 1;
const STORAGE_UNIFORM: u32 = 2;
const STORAGE_OUTPUT: u32 = 3;
const STORAGE_PUSH_CONSTANT: u32 = 9;

const EXECUTION_MODE_OUTPUT_VERTICES: u32 = 26;

/// Reflection failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReflectError {
    /// The binary violates the SPIR-V encoding rules.
    #[error("malformed SPIR-V: {0}")]
    Malformed(String),

    /// A vertex input is not a 32-bit float vector of size 2, 3 or 4.
    #[error("unsupported vertex input type: {0}")]
    UnsupportedVertexInput(String),

    /// Two stages declared incompatible resources at the same coordinates
    /// and the policy is [`DuplicateBindingPolicy::HardFail`].
    #[error("conflicting duplicate binding at (set {set}, binding {binding})")]
    DuplicateBinding { set: u32, binding: u32 },
}

/// Descriptor resource kind recognized by reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    UniformBuffer,
    SampledImage,
}

impl From<BindingType> for vk::DescriptorType {
    fn from(kind: BindingType) -> Self {
        match kind {
            BindingType::UniformBuffer => Self::UNIFORM_BUFFER,
            BindingType::SampledImage => Self::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// One vertex input attribute, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: vk::Format,
    pub offset: u32,
}

/// One reflected descriptor binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflectedBinding {
    pub set: u32,
    pub binding: u32,
    pub kind: BindingType,
    /// For uniform buffers: the sum of active member byte ranges.
    pub size: u32,
    /// Descriptor count (array length for arrayed image bindings).
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

/// One descriptor set, discovered on first use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedSet {
    pub index: u32,
    /// Bindings sorted by binding index.
    pub bindings: Vec<ReflectedBinding>,
}

/// One push-constant block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    pub stages: vk::ShaderStageFlags,
    /// Minimum member offset of the block.
    pub offset: u32,
    /// Byte extent of the block above `offset`.
    pub size: u32,
}

/// Everything reflection recovers from a set of stage binaries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShaderReflection {
    pub vertex_attributes: Vec<VertexAttribute>,
    /// Running byte offset after the last vertex attribute.
    pub vertex_stride: u32,
    /// Sets in first-use order; always addressed by `index`, never by
    /// position.
    pub sets: Vec<ReflectedSet>,
    pub push_constant_ranges: Vec<PushConstantRange>,
    /// Number of non-builtin fragment stage outputs.
    pub fragment_output_count: u32,
    /// `OutputVertices` execution mode of the tessellation control stage.
    pub tessellation_control_points: Option<u32>,
}

impl ShaderReflection {
    /// Look up a set by its explicit index.
    pub fn set(&self, index: u32) -> Option<&ReflectedSet> {
        self.sets.iter().find(|s| s.index == index)
    }

    /// Highest set index in use, if any set exists.
    pub fn max_set_index(&self) -> Option<u32> {
        self.sets.iter().map(|s| s.index).max()
    }
}

/// Map a frontend stage to its Vulkan stage flag.
pub fn stage_flags(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ShaderStage::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
    }
}

/// Reflect a full set of stage binaries into one pipeline description.
///
/// Reflection is a pure function of the binaries: the same input always
/// produces identical output.
pub fn reflect(
    stages: &[(ShaderStage, &ShaderBinary)],
    duplicate_policy: DuplicateBindingPolicy,
) -> Result<ShaderReflection, ReflectError> {
    let mut reflection = ShaderReflection::default();
    let mut set_order: Vec<u32> = Vec::new();
    let mut bindings: HashMap<(u32, u32), ReflectedBinding> = HashMap::new();

    for &(stage, binary) in stages {
        let module = Module::parse(binary.words())?;
        let flags = stage_flags(stage);

        match stage {
            ShaderStage::Vertex => {
                (reflection.vertex_attributes, reflection.vertex_stride) =
                    module.vertex_inputs()?;
            }
            ShaderStage::Fragment => {
                reflection.fragment_output_count = module.output_count();
            }
            ShaderStage::TessellationControl => {
                reflection.tessellation_control_points = module.output_vertices;
            }
            _ => {}
        }

        for reflected in module.descriptor_bindings(flags)? {
            let key = (reflected.set, reflected.binding);
            match bindings.entry(key) {
                Entry::Vacant(entry) => {
                    if !set_order.contains(&reflected.set) {
                        set_order.push(reflected.set);
                    }
                    entry.insert(reflected);
                }
                Entry::Occupied(mut entry) => {
                    let existing = entry.get_mut();
                    if existing.kind == reflected.kind
                        && existing.size == reflected.size
                        && existing.count == reflected.count
                    {
                        // Same resource visible from another stage.
                        existing.stages |= flags;
                    } else {
                        match duplicate_policy {
                            DuplicateBindingPolicy::WarnAndDrop => {
                                tracing::warn!(
                                    set = key.0,
                                    binding = key.1,
                                    kept = ?existing.kind,
                                    dropped = ?reflected.kind,
                                    "conflicting duplicate binding; first reflected stage wins"
                                );
                            }
                            DuplicateBindingPolicy::HardFail => {
                                return Err(ReflectError::DuplicateBinding {
                                    set: key.0,
                                    binding: key.1,
                                });
                            }
                        }
                    }
                }
            }
        }

        for range in module.push_constant_ranges(flags)? {
            match reflection
                .push_constant_ranges
                .iter_mut()
                .find(|r| r.offset == range.offset && r.size == range.size)
            {
                Some(existing) => existing.stages |= flags,
                None => reflection.push_constant_ranges.push(range),
            }
        }
    }

    for set_index in set_order {
        let mut set_bindings: Vec<ReflectedBinding> = bindings
            .values()
            .filter(|b| b.set == set_index)
            .copied()
            .collect();
        set_bindings.sort_by_key(|b| b.binding);
        reflection.sets.push(ReflectedSet {
            index: set_index,
            bindings: set_bindings,
        });
    }

    Ok(reflection)
}

/// A type declaration inside one module.
#[derive(Debug, Clone)]
enum TypeDef {
    Float { width: u32 },
    Int,
    Vector { component: u32, count: u32 },
    Matrix { column: u32, columns: u32 },
    Image,
    Sampler,
    SampledImage,
    Array { element: u32, length_id: u32 },
    RuntimeArray,
    Struct { members: Vec<u32> },
    Pointer { storage_class: u32, pointee: u32 },
}

/// Decorations attached to one id.
#[derive(Debug, Clone, Copy, Default)]
struct Decorations {
    location: Option<u32>,
    binding: Option<u32>,
    set: Option<u32>,
    array_stride: Option<u32>,
    block: bool,
    builtin: bool,
}

/// Decorations attached to one struct member.
#[derive(Debug, Clone, Copy, Default)]
struct MemberDecorations {
    offset: Option<u32>,
    matrix_stride: Option<u32>,
    builtin: bool,
}

/// A global variable declaration.
#[derive(Debug, Clone, Copy)]
struct Variable {
    id: u32,
    pointer_type: u32,
    storage_class: u32,
}

/// Parsed instruction tables of one SPIR-V module.
struct Module {
    types: HashMap<u32, TypeDef>,
    constants: HashMap<u32, u32>,
    decorations: HashMap<u32, Decorations>,
    member_decorations: HashMap<(u32, u32), MemberDecorations>,
    /// Globals in declaration order.
    variables: Vec<Variable>,
    /// `(base id, first index id)` of every access chain.
    access_chains: Vec<(u32, u32)>,
    /// Pointers loaded whole (the entire block is active).
    whole_loads: Vec<u32>,
    output_vertices: Option<u32>,
}

impl Module {
    fn parse(words: &[u32]) -> Result<Self, ReflectError> {
        if words.len() < 5 || words[0] != SPIRV_MAGIC {
            return Err(ReflectError::Malformed("missing header".to_string()));
        }

        let mut module = Self {
            types: HashMap::new(),
            constants: HashMap::new(),
            decorations: HashMap::new(),
            member_decorations: HashMap::new(),
            variables: Vec::new(),
            access_chains: Vec::new(),
            whole_loads: Vec::new(),
            output_vertices: None,
        };

        let mut cursor = 5;
        while cursor < words.len() {
            let first = words[cursor];
            let opcode = first & 0xFFFF;
            let count = (first >> 16) as usize;
            if count == 0 || cursor + count > words.len() {
                return Err(ReflectError::Malformed(format!(
                    "instruction at word {cursor} overruns the module"
                )));
            }
            let operands = &words[cursor + 1..cursor + count];
            module.record(opcode, operands)?;
            cursor += count;
        }

        Ok(module)
    }

    fn record(&mut self, opcode: u32, operands: &[u32]) -> Result<(), ReflectError> {
        let need = |n: usize| -> Result<(), ReflectError> {
            if operands.len() < n {
                Err(ReflectError::Malformed(format!(
                    "opcode {opcode} with {} operands",
                    operands.len()
                )))
            } else {
                Ok(())
            }
        };

        match opcode {
            OP_ENTRY_POINT => {}
            OP_EXECUTION_MODE => {
                need(2)?;
                if operands[1] == EXECUTION_MODE_OUTPUT_VERTICES {
                    need(3)?;
                    self.output_vertices = Some(operands[2]);
                }
            }
            OP_TYPE_FLOAT => {
                need(2)?;
                self.types
                    .insert(operands[0], TypeDef::Float { width: operands[1] });
            }
            OP_TYPE_INT => {
                need(3)?;
                self.types.insert(operands[0], TypeDef::Int);
            }
            OP_TYPE_VECTOR => {
                need(3)?;
                self.types.insert(
                    operands[0],
                    TypeDef::Vector {
                        component: operands[1],
                        count: operands[2],
                    },
                );
            }
            OP_TYPE_MATRIX => {
                need(3)?;
                self.types.insert(
                    operands[0],
                    TypeDef::Matrix {
                        column: operands[1],
                        columns: operands[2],
                    },
                );
            }
            OP_TYPE_IMAGE => {
                need(1)?;
                self.types.insert(operands[0], TypeDef::Image);
            }
            OP_TYPE_SAMPLER => {
                need(1)?;
                self.types.insert(operands[0], TypeDef::Sampler);
            }
            OP_TYPE_SAMPLED_IMAGE => {
                need(2)?;
                self.types.insert(operands[0], TypeDef::SampledImage);
            }
            OP_TYPE_ARRAY => {
                need(3)?;
                self.types.insert(
                    operands[0],
                    TypeDef::Array {
                        element: operands[1],
                        length_id: operands[2],
                    },
                );
            }
            OP_TYPE_RUNTIME_ARRAY => {
                need(2)?;
                self.types.insert(operands[0], TypeDef::RuntimeArray);
            }
            OP_TYPE_STRUCT => {
                need(1)?;
                self.types.insert(
                    operands[0],
                    TypeDef::Struct {
                        members: operands[1..].to_vec(),
                    },
                );
            }
            OP_TYPE_POINTER => {
                need(3)?;
                self.types.insert(
                    operands[0],
                    TypeDef::Pointer {
                        storage_class: operands[1],
                        pointee: operands[2],
                    },
                );
            }
            OP_CONSTANT => {
                need(3)?;
                // Only the low word matters for the lengths and indices
                // reflection reads.
                self.constants.insert(operands[1], operands[2]);
            }
            OP_VARIABLE => {
                need(3)?;
                self.variables.push(Variable {
                    pointer_type: operands[0],
                    id: operands[1],
                    storage_class: operands[2],
                });
            }
            OP_LOAD => {
                need(3)?;
                self.whole_loads.push(operands[2]);
            }
            OP_ACCESS_CHAIN | OP_IN_BOUNDS_ACCESS_CHAIN => {
                need(3)?;
                if operands.len() >= 4 {
                    self.access_chains.push((operands[2], operands[3]));
                } else {
                    // Chain with no indices behaves like a whole load.
                    self.whole_loads.push(operands[2]);
                }
            }
            OP_DECORATE => {
                need(2)?;
                let deco = self.decorations.entry(operands[0]).or_default();
                match operands[1] {
                    DECORATION_BLOCK => deco.block = true,
                    DECORATION_BUILTIN => deco.builtin = true,
                    DECORATION_LOCATION => deco.location = operands.get(2).copied(),
                    DECORATION_BINDING => deco.binding = operands.get(2).copied(),
                    DECORATION_DESCRIPTOR_SET => deco.set = operands.get(2).copied(),
                    DECORATION_ARRAY_STRIDE => deco.array_stride = operands.get(2).copied(),
                    _ => {}
                }
            }
            OP_MEMBER_DECORATE => {
                need(3)?;
                let deco = self
                    .member_decorations
                    .entry((operands[0], operands[1]))
                    .or_default();
                match operands[2] {
                    DECORATION_OFFSET => deco.offset = operands.get(3).copied(),
                    DECORATION_MATRIX_STRIDE => deco.matrix_stride = operands.get(3).copied(),
                    DECORATION_BUILTIN => deco.builtin = true,
                    _ => {}
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn type_of(&self, id: u32) -> Result<&TypeDef, ReflectError> {
        self.types
            .get(&id)
            .ok_or_else(|| ReflectError::Malformed(format!("unknown type id {id}")))
    }

    fn decorations_of(&self, id: u32) -> Decorations {
        self.decorations.get(&id).copied().unwrap_or_default()
    }

    /// Dereference a variable's pointer type.
    fn pointee(&self, var: &Variable) -> Result<u32, ReflectError> {
        match self.type_of(var.pointer_type)? {
            TypeDef::Pointer { pointee, .. } => Ok(*pointee),
            _ => Err(ReflectError::Malformed(format!(
                "variable {} has a non-pointer type",
                var.id
            ))),
        }
    }

    /// Whether an interface variable is a builtin (directly decorated, or a
    /// block whose members are builtins, like `gl_PerVertex`).
    fn is_builtin(&self, var: &Variable) -> Result<bool, ReflectError> {
        if self.decorations_of(var.id).builtin {
            return Ok(true);
        }
        if let TypeDef::Struct { members } = self.type_of(self.pointee(var)?)? {
            let struct_id = self.pointee(var)?;
            for member in 0..members.len() as u32 {
                if let Some(deco) = self.member_decorations.get(&(struct_id, member)) {
                    if deco.builtin {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Vertex stage inputs in declaration order, plus the running stride.
    fn vertex_inputs(&self) -> Result<(Vec<VertexAttribute>, u32), ReflectError> {
        let mut attributes = Vec::new();
        let mut offset = 0u32;

        for var in &self.variables {
            if var.storage_class != STORAGE_INPUT || self.is_builtin(var)? {
                continue;
            }

            let pointee = self.pointee(var)?;
            let (format, size) = match self.type_of(pointee)? {
                TypeDef::Vector { component, count } => {
                    let float32 =
                        matches!(self.type_of(*component)?, TypeDef::Float { width: 32 });
                    match (float32, count) {
                        (true, 2) => (vk::Format::R32G32_SFLOAT, 8),
                        (true, 3) => (vk::Format::R32G32B32_SFLOAT, 12),
                        (true, 4) => (vk::Format::R32G32B32A32_SFLOAT, 16),
                        _ => {
                            return Err(ReflectError::UnsupportedVertexInput(format!(
                                "variable {}: vector is not a float vec2/3/4",
                                var.id
                            )));
                        }
                    }
                }
                other => {
                    return Err(ReflectError::UnsupportedVertexInput(format!(
                        "variable {}: {other:?}",
                        var.id
                    )));
                }
            };

            let location = self.decorations_of(var.id).location.ok_or_else(|| {
                ReflectError::Malformed(format!("input {} has no location", var.id))
            })?;

            attributes.push(VertexAttribute {
                location,
                format,
                offset,
            });
            offset += size;
        }

        Ok((attributes, offset))
    }

    /// Non-builtin output variable count (fragment color outputs).
    fn output_count(&self) -> u32 {
        self.variables
            .iter()
            .filter(|v| {
                v.storage_class == STORAGE_OUTPUT && !self.is_builtin(v).unwrap_or(true)
            })
            .count() as u32
    }

    /// Uniform-buffer and sampled-image bindings of this module.
    fn descriptor_bindings(
        &self,
        stages: vk::ShaderStageFlags,
    ) -> Result<Vec<ReflectedBinding>, ReflectError> {
        let mut out = Vec::new();

        for var in &self.variables {
            let deco = self.decorations_of(var.id);
            match var.storage_class {
                STORAGE_UNIFORM => {
                    let struct_id = self.pointee(var)?;
                    if !self.decorations_of(struct_id).block {
                        continue;
                    }
                    out.push(ReflectedBinding {
                        set: deco.set.unwrap_or(0),
                        binding: deco.binding.unwrap_or(0),
                        kind: BindingType::UniformBuffer,
                        size: self.active_block_size(var.id, struct_id)?,
                        count: 1,
                        stages,
                    });
                }
                STORAGE_UNIFORM_CONSTANT => {
                    let pointee = self.pointee(var)?;
                    let (element, count) = match self.type_of(pointee)? {
                        TypeDef::Array { element, length_id } => {
                            (*element, self.constants.get(length_id).copied().unwrap_or(1))
                        }
                        _ => (pointee, 1),
                    };
                    if !matches!(
                        self.type_of(element)?,
                        TypeDef::SampledImage | TypeDef::Image
                    ) {
                        // Plain samplers and other opaque kinds are not part
                        // of the reflected contract.
                        continue;
                    }
                    out.push(ReflectedBinding {
                        set: deco.set.unwrap_or(0),
                        binding: deco.binding.unwrap_or(0),
                        kind: BindingType::SampledImage,
                        size: 0,
                        count,
                        stages,
                    });
                }
                _ => {}
            }
        }

        Ok(out)
    }

    /// Push-constant blocks of this module.
    fn push_constant_ranges(
        &self,
        stages: vk::ShaderStageFlags,
    ) -> Result<Vec<PushConstantRange>, ReflectError> {
        let mut out = Vec::new();

        for var in &self.variables {
            if var.storage_class != STORAGE_PUSH_CONSTANT {
                continue;
            }
            let struct_id = self.pointee(var)?;
            let ranges = self.member_ranges(struct_id)?;
            if ranges.is_empty() {
                continue;
            }
            let min_offset = ranges.iter().map(|r| r.offset).min().unwrap_or(0);
            let extent = ranges
                .iter()
                .map(|r| r.offset + r.range)
                .max()
                .unwrap_or(0);
            out.push(PushConstantRange {
                stages,
                offset: min_offset,
                size: extent - min_offset,
            });
        }

        Ok(out)
    }

    /// Byte size of a block as the sum of its active member ranges.
    ///
    /// A member is active when an access chain rooted at the variable
    /// selects it, or when the variable is loaded whole. Members the shader
    /// never reaches contribute nothing, so no device memory is reserved
    /// for unused fields.
    fn active_block_size(&self, var_id: u32, struct_id: u32) -> Result<u32, ReflectError> {
        let ranges = self.member_ranges(struct_id)?;
        if ranges.is_empty() {
            return Ok(0);
        }

        let mut active = vec![false; ranges.len()];
        let mut all_active = self.whole_loads.contains(&var_id);

        for &(base, first_index) in &self.access_chains {
            if base != var_id {
                continue;
            }
            match self.constants.get(&first_index) {
                Some(&member) if (member as usize) < ranges.len() => {
                    active[member as usize] = true;
                }
                // A non-constant first index can reach any member.
                _ => all_active = true,
            }
        }

        let total = ranges
            .iter()
            .enumerate()
            .filter(|(i, _)| all_active || active[*i])
            .map(|(_, r)| r.range)
            .sum();
        Ok(total)
    }

    /// Per-member `(offset, range)` for a block struct. The range of a
    /// member runs to the next member's offset; the last member's range is
    /// its type size.
    fn member_ranges(&self, struct_id: u32) -> Result<Vec<MemberRange>, ReflectError> {
        let members = match self.type_of(struct_id)? {
            TypeDef::Struct { members } => members.clone(),
            other => {
                return Err(ReflectError::Malformed(format!(
                    "block {struct_id} is not a struct: {other:?}"
                )));
            }
        };

        let mut ranges = Vec::with_capacity(members.len());
        for (index, &member_type) in members.iter().enumerate() {
            let deco = self
                .member_decorations
                .get(&(struct_id, index as u32))
                .copied()
                .unwrap_or_default();
            let offset = deco.offset.ok_or_else(|| {
                ReflectError::Malformed(format!(
                    "block {struct_id} member {index} has no offset"
                ))
            })?;
            ranges.push(MemberRange {
                offset,
                range: self.type_size(member_type, deco.matrix_stride)?,
            });
        }

        // Tighten each range to the gap before the next member, in offset
        // order, so padding between members is not charged twice.
        let mut order: Vec<usize> = (0..ranges.len()).collect();
        order.sort_by_key(|&i| ranges[i].offset);
        for pair in order.windows(2) {
            let next_offset = ranges[pair[1]].offset;
            let current = &mut ranges[pair[0]];
            current.range = current.range.min(next_offset - current.offset);
        }

        Ok(ranges)
    }

    /// Byte size of a type as laid out in a uniform block.
    fn type_size(&self, type_id: u32, matrix_stride: Option<u32>) -> Result<u32, ReflectError> {
        match self.type_of(type_id)? {
            TypeDef::Float { width } => Ok(width / 8),
            TypeDef::Int => Ok(4),
            TypeDef::Vector { component, count } => {
                Ok(self.type_size(*component, None)? * count)
            }
            TypeDef::Matrix { column, columns } => {
                let stride = match matrix_stride {
                    Some(stride) => stride,
                    None => self.type_size(*column, None)?,
                };
                Ok(stride * columns)
            }
            TypeDef::Array { element, length_id } => {
                let length = self.constants.get(length_id).copied().unwrap_or(0);
                let stride = match self.decorations_of(type_id).array_stride {
                    Some(stride) => stride,
                    None => self.type_size(*element, None)?,
                };
                Ok(stride * length)
            }
            TypeDef::Struct { .. } => {
                let ranges = self.member_ranges(type_id)?;
                Ok(ranges.iter().map(|r| r.offset + r.range).max().unwrap_or(0))
            }
            other => Err(ReflectError::Malformed(format!(
                "type {type_id} ({other:?}) has no block size"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MemberRange {
    offset: u32,
    range: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assemble one instruction: word count in the high half-word, opcode
    /// in the low.
    fn op(opcode: u32, operands: &[u32]) -> Vec<u32> {
        let mut words = vec![((operands.len() as u32 + 1) << 16) | opcode];
        words.extend_from_slice(operands);
        words
    }

    fn assemble(instructions: &[Vec<u32>]) -> ShaderBinary {
        let mut words = vec![SPIRV_MAGIC, 0x0001_0300, 0, 128, 0];
        for instruction in instructions {
            words.extend_from_slice(instruction);
        }
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        ShaderBinary::from_bytes(&bytes).unwrap()
    }

    // Shared ids used by the test modules below.
    const F32: u32 = 2;
    const VEC2: u32 = 3;
    const VEC3: u32 = 4;
    const VEC4: u32 = 5;
    const U32: u32 = 6;

    fn scalar_types() -> Vec<Vec<u32>> {
        vec![
            op(OP_TYPE_FLOAT, &[F32, 32]),
            op(OP_TYPE_VECTOR, &[VEC2, F32, 2]),
            op(OP_TYPE_VECTOR, &[VEC3, F32, 3]),
            op(OP_TYPE_VECTOR, &[VEC4, F32, 4]),
            op(OP_TYPE_INT, &[U32, 32, 0]),
        ]
    }

    /// A vertex stage with `[vec3 position, vec3 normal, vec2 uv]` inputs.
    fn vertex_module() -> ShaderBinary {
        let mut instructions = vec![
            op(OP_DECORATE, &[10, DECORATION_LOCATION, 0]),
            op(OP_DECORATE, &[11, DECORATION_LOCATION, 1]),
            op(OP_DECORATE, &[12, DECORATION_LOCATION, 2]),
        ];
        instructions.extend(scalar_types());
        instructions.extend([
            op(OP_TYPE_POINTER, &[20, STORAGE_INPUT, VEC3]),
            op(OP_TYPE_POINTER, &[21, STORAGE_INPUT, VEC2]),
            op(OP_VARIABLE, &[20, 10, STORAGE_INPUT]),
            op(OP_VARIABLE, &[20, 11, STORAGE_INPUT]),
            op(OP_VARIABLE, &[21, 12, STORAGE_INPUT]),
        ]);
        assemble(&instructions)
    }

    /// A fragment stage with one uniform block `{ vec4 a; vec4 b; }` at
    /// (set 0, binding 1), a sampled image at (set 0, binding 2), and two
    /// color outputs. Only member `b` of the block is accessed.
    fn fragment_module() -> ShaderBinary {
        let mut instructions = vec![
            op(OP_DECORATE, &[30, DECORATION_BLOCK]),
            op(OP_MEMBER_DECORATE, &[30, 0, DECORATION_OFFSET, 0]),
            op(OP_MEMBER_DECORATE, &[30, 1, DECORATION_OFFSET, 16]),
            op(OP_DECORATE, &[40, DECORATION_DESCRIPTOR_SET, 0]),
            op(OP_DECORATE, &[40, DECORATION_BINDING, 1]),
            op(OP_DECORATE, &[41, DECORATION_DESCRIPTOR_SET, 0]),
            op(OP_DECORATE, &[41, DECORATION_BINDING, 2]),
            op(OP_DECORATE, &[50, DECORATION_LOCATION, 0]),
            op(OP_DECORATE, &[51, DECORATION_LOCATION, 1]),
        ];
        instructions.extend(scalar_types());
        instructions.extend([
            op(OP_TYPE_STRUCT, &[30, VEC4, VEC4]),
            op(OP_TYPE_IMAGE, &[31, F32, 1, 0, 0, 0, 1, 0]),
            op(OP_TYPE_SAMPLED_IMAGE, &[32, 31]),
            op(OP_TYPE_POINTER, &[33, STORAGE_UNIFORM, 30]),
            op(OP_TYPE_POINTER, &[34, STORAGE_UNIFORM_CONSTANT, 32]),
            op(OP_TYPE_POINTER, &[35, STORAGE_OUTPUT, VEC4]),
            op(OP_CONSTANT, &[U32, 60, 1]),
            op(OP_VARIABLE, &[33, 40, STORAGE_UNIFORM]),
            op(OP_VARIABLE, &[34, 41, STORAGE_UNIFORM_CONSTANT]),
            op(OP_VARIABLE, &[35, 50, STORAGE_OUTPUT]),
            op(OP_VARIABLE, &[35, 51, STORAGE_OUTPUT]),
            // %x = OpAccessChain %ptr %block %c1  (reads member 1 only)
            op(OP_ACCESS_CHAIN, &[33, 61, 40, 60]),
        ]);
        assemble(&instructions)
    }

    /// A vertex stage with a push-constant block `{ vec4 at 0; vec4 at 16 }`.
    fn push_constant_module() -> ShaderBinary {
        let mut instructions = vec![
            op(OP_DECORATE, &[30, DECORATION_BLOCK]),
            op(OP_MEMBER_DECORATE, &[30, 0, DECORATION_OFFSET, 0]),
            op(OP_MEMBER_DECORATE, &[30, 1, DECORATION_OFFSET, 16]),
        ];
        instructions.extend(scalar_types());
        instructions.extend([
            op(OP_TYPE_STRUCT, &[30, VEC4, VEC4]),
            op(OP_TYPE_POINTER, &[33, STORAGE_PUSH_CONSTANT, 30]),
            op(OP_VARIABLE, &[33, 40, STORAGE_PUSH_CONSTANT]),
        ]);
        assemble(&instructions)
    }

    #[test]
    fn vertex_stride_and_offsets() {
        let binary = vertex_module();
        let reflection =
            reflect(&[(ShaderStage::Vertex, &binary)], DuplicateBindingPolicy::default())
                .unwrap();

        assert_eq!(reflection.vertex_stride, 32);
        let offsets: Vec<u32> = reflection.vertex_attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, [0, 12, 24]);
        assert_eq!(
            reflection.vertex_attributes[0].format,
            vk::Format::R32G32B32_SFLOAT
        );
        assert_eq!(
            reflection.vertex_attributes[2].format,
            vk::Format::R32G32_SFLOAT
        );
    }

    #[test]
    fn reflection_is_idempotent() {
        let vertex = vertex_module();
        let fragment = fragment_module();
        let stages = [
            (ShaderStage::Vertex, &vertex),
            (ShaderStage::Fragment, &fragment),
        ];
        let first = reflect(&stages, DuplicateBindingPolicy::default()).unwrap();
        let second = reflect(&stages, DuplicateBindingPolicy::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn uniform_size_counts_only_active_members() {
        let binary = fragment_module();
        let reflection = reflect(
            &[(ShaderStage::Fragment, &binary)],
            DuplicateBindingPolicy::default(),
        )
        .unwrap();

        let set = reflection.set(0).unwrap();
        let block = set.bindings.iter().find(|b| b.binding == 1).unwrap();
        assert_eq!(block.kind, BindingType::UniformBuffer);
        // Only the second vec4 is reached through an access chain.
        assert_eq!(block.size, 16);

        let image = set.bindings.iter().find(|b| b.binding == 2).unwrap();
        assert_eq!(image.kind, BindingType::SampledImage);
        assert_eq!(image.count, 1);
    }

    #[test]
    fn fragment_outputs_counted() {
        let binary = fragment_module();
        let reflection = reflect(
            &[(ShaderStage::Fragment, &binary)],
            DuplicateBindingPolicy::default(),
        )
        .unwrap();
        assert_eq!(reflection.fragment_output_count, 2);
    }

    #[test]
    fn push_constant_block_extent() {
        let binary = push_constant_module();
        let reflection = reflect(
            &[(ShaderStage::Vertex, &binary)],
            DuplicateBindingPolicy::default(),
        )
        .unwrap();
        assert_eq!(reflection.push_constant_ranges.len(), 1);
        let range = reflection.push_constant_ranges[0];
        assert_eq!(range.offset, 0);
        assert_eq!(range.size, 32);
        assert_eq!(range.stages, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn push_constant_ranges_merge_across_stages() {
        let vertex = push_constant_module();
        let fragment = push_constant_module();
        let reflection = reflect(
            &[
                (ShaderStage::Vertex, &vertex),
                (ShaderStage::Fragment, &fragment),
            ],
            DuplicateBindingPolicy::default(),
        )
        .unwrap();
        assert_eq!(reflection.push_constant_ranges.len(), 1);
        assert_eq!(
            reflection.push_constant_ranges[0].stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn matching_duplicate_bindings_merge_stages() {
        let a = fragment_module();
        let b = fragment_module();
        let reflection = reflect(
            &[(ShaderStage::Vertex, &a), (ShaderStage::Fragment, &b)],
            DuplicateBindingPolicy::default(),
        )
        .unwrap();

        let set = reflection.set(0).unwrap();
        let block = set.bindings.iter().find(|b| b.binding == 1).unwrap();
        assert_eq!(
            block.stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    /// Same coordinates as the fragment module's block, different kind.
    fn conflicting_module() -> ShaderBinary {
        let mut instructions = vec![
            op(OP_DECORATE, &[41, DECORATION_DESCRIPTOR_SET, 0]),
            op(OP_DECORATE, &[41, DECORATION_BINDING, 1]),
        ];
        instructions.extend(scalar_types());
        instructions.extend([
            op(OP_TYPE_IMAGE, &[31, F32, 1, 0, 0, 0, 1, 0]),
            op(OP_TYPE_SAMPLED_IMAGE, &[32, 31]),
            op(OP_TYPE_POINTER, &[34, STORAGE_UNIFORM_CONSTANT, 32]),
            op(OP_VARIABLE, &[34, 41, STORAGE_UNIFORM_CONSTANT]),
        ]);
        assemble(&instructions)
    }

    #[test]
    fn conflicting_duplicate_first_stage_wins() {
        let first = fragment_module();
        let second = conflicting_module();
        let reflection = reflect(
            &[
                (ShaderStage::Fragment, &first),
                (ShaderStage::Vertex, &second),
            ],
            DuplicateBindingPolicy::WarnAndDrop,
        )
        .unwrap();

        let set = reflection.set(0).unwrap();
        let binding = set.bindings.iter().find(|b| b.binding == 1).unwrap();
        assert_eq!(binding.kind, BindingType::UniformBuffer);
        assert_eq!(binding.stages, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn conflicting_duplicate_hard_fails_when_configured() {
        let first = fragment_module();
        let second = conflicting_module();
        let result = reflect(
            &[
                (ShaderStage::Fragment, &first),
                (ShaderStage::Vertex, &second),
            ],
            DuplicateBindingPolicy::HardFail,
        );
        assert!(matches!(
            result,
            Err(ReflectError::DuplicateBinding { set: 0, binding: 1 })
        ));
    }

    #[test]
    fn unsupported_vertex_input_fails() {
        let mut instructions = vec![op(OP_DECORATE, &[10, DECORATION_LOCATION, 0])];
        instructions.extend(scalar_types());
        instructions.extend([
            op(OP_TYPE_POINTER, &[20, STORAGE_INPUT, F32]),
            op(OP_VARIABLE, &[20, 10, STORAGE_INPUT]),
        ]);
        let binary = assemble(&instructions);
        let result = reflect(
            &[(ShaderStage::Vertex, &binary)],
            DuplicateBindingPolicy::default(),
        );
        assert!(matches!(result, Err(ReflectError::UnsupportedVertexInput(_))));
    }

    #[test]
    fn builtin_inputs_are_skipped() {
        let mut instructions = vec![
            op(OP_DECORATE, &[10, DECORATION_BUILTIN, 42]),
            op(OP_DECORATE, &[11, DECORATION_LOCATION, 0]),
        ];
        instructions.extend(scalar_types());
        instructions.extend([
            op(OP_TYPE_POINTER, &[20, STORAGE_INPUT, VEC4]),
            op(OP_VARIABLE, &[20, 10, STORAGE_INPUT]),
            op(OP_VARIABLE, &[20, 11, STORAGE_INPUT]),
        ]);
        let binary = assemble(&instructions);
        let reflection = reflect(
            &[(ShaderStage::Vertex, &binary)],
            DuplicateBindingPolicy::default(),
        )
        .unwrap();
        assert_eq!(reflection.vertex_attributes.len(), 1);
        assert_eq!(reflection.vertex_attributes[0].location, 0);
    }

    #[test]
    fn tessellation_control_points_reflected() {
        let mut instructions = vec![op(
            OP_EXECUTION_MODE,
            &[1, EXECUTION_MODE_OUTPUT_VERTICES, 3],
        )];
        instructions.extend(scalar_types());
        let binary = assemble(&instructions);
        let reflection = reflect(
            &[(ShaderStage::TessellationControl, &binary)],
            DuplicateBindingPolicy::default(),
        )
        .unwrap();
        assert_eq!(reflection.tessellation_control_points, Some(3));
    }

    #[test]
    fn truncated_instruction_is_malformed() {
        // Instruction claims 4 words but the module ends after 2.
        let words = vec![SPIRV_MAGIC, 0x0001_0300, 0, 8, 0, (4 << 16) | OP_DECORATE, 1];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let binary = ShaderBinary::from_bytes(&bytes).unwrap();
        let result = reflect(
            &[(ShaderStage::Vertex, &binary)],
            DuplicateBindingPolicy::default(),
        );
        assert!(matches!(result, Err(ReflectError::Malformed(_))));
    }
}
