//! Runtime state inspected by the auditor.
//!
//! `RuntimeContext` gathers everything the auditor needs into one explicit
//! value: the block registry, the shared-string table, the root set and the
//! engine-maintained aggregate counters. The allocation and assignment
//! helpers here are what an interpreter built on this heap calls; each keeps
//! stored counts and counters in step, so a clean heap audits clean and every
//! diagnostic points at a real accounting bug.
//!
//! Ownership follows one rule: a `Value` passed in is moved into its new home
//! (it already carries its reference), while a `BlockId` passed in is retained
//! by the helper that stores it.

use std::collections::VecDeque;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    audit::RootProvider,
    config::AuditConfig,
    error::RuntimeError,
    heap::{BlockData, BlockId, Category, Heap, HeapBlock},
    intern::StringTable,
    types::{
        CallOut, CallTarget, FailMessage, FunctionKind, FunctionPtr, IdentEntry, IdentKind, IdentTable, Inherit,
        InputContinuation, MapNode, MapTable, Mapping, Object, Program, Sentence, SentenceTarget, Session,
    },
    value::Value,
};

/// Everything reachable without going through another block.
#[derive(Debug, Default)]
pub struct Roots {
    /// Live objects; the list holds one reference to each.
    pub objects: Vec<BlockId>,
    /// Destructed objects awaiting final release; one reference each.
    pub destructed: Vec<BlockId>,
    /// Interactive blocks of connected users.
    pub sessions: Vec<BlockId>,
    pub master: Option<BlockId>,
    pub simul_owner: Option<BlockId>,
    /// Plain-string blocks loaded from the driver config.
    pub config_strings: Vec<BlockId>,
    /// Text of the default "what?" message. The shared string `text + "\n"`
    /// is held on its behalf.
    pub default_fail_message: Option<String>,
    /// Value returned by the last apply.
    pub apply_return: Value,
    /// Interpreter value stack.
    pub stack: Vec<Value>,
    pub command_givers: Vec<BlockId>,
    pub call_outs: VecDeque<BlockId>,
    /// Sentence blocks kept for reuse.
    pub free_sentences: Vec<BlockId>,
    /// Shared-string names of globally visible functions.
    pub simul_names: Vec<BlockId>,
    /// Predefined macro blocks.
    pub predefines: Vec<BlockId>,
    /// Shared-string host names from the address resolver cache.
    pub address_names: Vec<BlockId>,
}

/// Aggregate counters maintained by the engine as it allocates and frees.
///
/// The auditor recomputes each from the registry and reports disagreements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RuntimeCounters {
    pub sentences: u64,
    pub objects: u64,
    pub program_blocks: u64,
    pub arrays: u64,
    pub array_bytes: u64,
    pub classes: u64,
    pub class_bytes: u64,
    pub mappings: u64,
    pub call_out_bytes: u64,
}

/// Description of a program to compile into a program block.
#[derive(Debug, Clone, Default)]
pub struct ProgramSource {
    filename: String,
    inherits: Vec<BlockId>,
    functions: Vec<String>,
    variables: Vec<String>,
    strings: Vec<String>,
    line_numbers: bool,
}

impl ProgramSource {
    #[must_use]
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn inherit(mut self, program: BlockId) -> Self {
        self.inherits.push(program);
        self
    }

    #[must_use]
    pub fn function(mut self, name: impl Into<String>) -> Self {
        self.functions.push(name.into());
        self
    }

    #[must_use]
    pub fn variable(mut self, name: impl Into<String>) -> Self {
        self.variables.push(name.into());
        self
    }

    #[must_use]
    pub fn string(mut self, literal: impl Into<String>) -> Self {
        self.strings.push(literal.into());
        self
    }

    #[must_use]
    pub fn with_line_numbers(mut self) -> Self {
        self.line_numbers = true;
        self
    }
}

#[derive(Debug, Default)]
pub struct RuntimeContext {
    heap: Heap,
    strings: StringTable,
    roots: Roots,
    counters: RuntimeCounters,
    config: AuditConfig,
    root_providers: IndexMap<String, Box<dyn RootProvider>>,
}

impl RuntimeContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: AuditConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    #[must_use]
    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn strings_mut(&mut self) -> &mut StringTable {
        &mut self.strings
    }

    #[must_use]
    pub fn roots(&self) -> &Roots {
        &self.roots
    }

    pub fn roots_mut(&mut self) -> &mut Roots {
        &mut self.roots
    }

    #[must_use]
    pub fn counters(&self) -> &RuntimeCounters {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut RuntimeCounters {
        &mut self.counters
    }

    #[must_use]
    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: AuditConfig) {
        self.config = config;
    }

    /// Registers a subsystem that holds references outside the core root set.
    ///
    /// Providers are consulted in registration order. Registering under an
    /// existing name replaces the previous provider and returns it.
    pub fn register_root_provider(
        &mut self,
        name: impl Into<String>,
        provider: Box<dyn RootProvider>,
    ) -> Option<Box<dyn RootProvider>> {
        self.root_providers.insert(name.into(), provider)
    }

    pub fn unregister_root_provider(&mut self, name: &str) -> Option<Box<dyn RootProvider>> {
        self.root_providers.shift_remove(name)
    }

    pub(crate) fn root_providers(&self) -> impl Iterator<Item = (&str, &dyn RootProvider)> {
        self.root_providers
            .iter()
            .map(|(name, provider)| (name.as_str(), provider.as_ref()))
    }

    // ========================================================================
    // Typed block access
    // ========================================================================

    fn block_of(&self, id: BlockId, expected: Category) -> Result<&HeapBlock, RuntimeError> {
        let block = self.heap.get(id).ok_or(RuntimeError::Freed(id))?;
        if block.category() == expected {
            Ok(block)
        } else {
            Err(RuntimeError::WrongCategory {
                id,
                expected,
                found: block.category(),
            })
        }
    }

    pub fn object(&self, id: BlockId) -> Result<&Object, RuntimeError> {
        match self.block_of(id, Category::Object)?.data() {
            BlockData::Object(ob) => Ok(ob),
            _ => Err(RuntimeError::Freed(id)),
        }
    }

    fn object_mut(&mut self, id: BlockId) -> Result<&mut Object, RuntimeError> {
        self.block_of(id, Category::Object)?;
        match self.heap.data_mut(id) {
            Some(BlockData::Object(ob)) => Ok(ob),
            _ => Err(RuntimeError::Freed(id)),
        }
    }

    pub fn program(&self, id: BlockId) -> Result<&Program, RuntimeError> {
        match self.block_of(id, Category::Program)?.data() {
            BlockData::Program(prog) => Ok(prog),
            _ => Err(RuntimeError::Freed(id)),
        }
    }

    fn program_mut(&mut self, id: BlockId) -> Result<&mut Program, RuntimeError> {
        self.block_of(id, Category::Program)?;
        match self.heap.data_mut(id) {
            Some(BlockData::Program(prog)) => Ok(prog),
            _ => Err(RuntimeError::Freed(id)),
        }
    }

    pub fn session(&self, id: BlockId) -> Result<&Session, RuntimeError> {
        match self.block_of(id, Category::Interactive)?.data() {
            BlockData::Session(session) => Ok(session),
            _ => Err(RuntimeError::Freed(id)),
        }
    }

    fn session_mut(&mut self, id: BlockId) -> Result<&mut Session, RuntimeError> {
        self.block_of(id, Category::Interactive)?;
        match self.heap.data_mut(id) {
            Some(BlockData::Session(session)) => Ok(session),
            _ => Err(RuntimeError::Freed(id)),
        }
    }

    // ========================================================================
    // Values
    // ========================================================================

    pub fn new_shared_string(&mut self, text: &str) -> Value {
        Value::SharedString(self.strings.intern(&mut self.heap, text))
    }

    pub fn new_malloc_string(&mut self, text: impl Into<String>) -> Value {
        Value::String(self.strings.new_owned(&mut self.heap, text.into()))
    }

    pub fn new_array(&mut self, items: Vec<Value>) -> Value {
        Value::Array(self.alloc_array(Category::Array, items))
    }

    pub fn new_class(&mut self, members: Vec<Value>) -> Value {
        Value::Class(self.alloc_array(Category::Class, members))
    }

    fn alloc_array(&mut self, category: Category, items: Vec<Value>) -> BlockId {
        let description = if category == Category::Class {
            "allocate_class"
        } else {
            "allocate_array"
        };
        let id = self.heap.allocate(category, BlockData::Array(items), description);
        let size = self.heap.get(id).map_or(0, |block| block.size() as u64);
        if category == Category::Class {
            self.counters.classes += 1;
            self.counters.class_bytes += size;
        } else {
            self.counters.arrays += 1;
            self.counters.array_bytes += size;
        }
        id
    }

    pub fn new_buffer(&mut self, bytes: Vec<u8>) -> Value {
        Value::Buffer(self.heap.allocate(Category::Buffer, BlockData::Buffer(bytes), "allocate_buffer"))
    }

    /// Builds a mapping with one node block per pair.
    pub fn new_mapping(&mut self, pairs: Vec<(Value, Value)>) -> Value {
        let nodes = pairs
            .into_iter()
            .map(|(key, value)| {
                self.heap
                    .allocate(Category::MapNode, BlockData::MapNode(MapNode { key, value }), "new_map_node")
            })
            .collect();
        let table = self
            .heap
            .allocate(Category::MapTable, BlockData::MapTable(MapTable { nodes }), "new_map_table");
        self.counters.mappings += 1;
        Value::Mapping(
            self.heap
                .allocate(Category::Mapping, BlockData::Mapping(Mapping { table }), "allocate_mapping"),
        )
    }

    /// Creates a closure. `owner` and the program named by the kind are retained;
    /// non-empty `args` become a bound argument array.
    ///
    /// A closure that pins its owner's program cannot be made on a swapped-out
    /// owner.
    pub fn new_function(
        &mut self,
        kind: FunctionKind,
        owner: Option<BlockId>,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let owner_program = match owner {
            Some(ob) => match self.object(ob) {
                Ok(object) => object.program,
                Err(err) => {
                    self.release_all(args);
                    return Err(err);
                }
            },
            None => None,
        };
        let mut ptr = FunctionPtr { kind, owner, args: None };
        if let (FunctionKind::Local { bindable: false, .. }, Some(ob), None) = (kind, owner, owner_program) {
            self.release_all(args);
            return Err(RuntimeError::SwappedOut(ob));
        }
        if let Some(program) = ptr.pinned_program(owner_program) {
            match self.program_mut(program) {
                Ok(prog) => prog.func_ref += 1,
                Err(err) => {
                    self.release_all(args);
                    return Err(err);
                }
            }
        }
        if let Some(ob) = owner {
            self.heap.inc_ref(ob);
        }
        if !args.is_empty() {
            ptr.args = Some(self.alloc_array(Category::Array, args));
        }
        Ok(Value::Function(
            self.heap
                .allocate(Category::Function, BlockData::Function(ptr), "make_funp"),
        ))
    }

    /// Returns a second handle to the same referent, bumping its count.
    pub fn clone_value(&mut self, value: &Value) -> Value {
        if let Some(id) = value.ref_id() {
            self.retain_block(id);
        }
        value.copy_unaccounted()
    }

    /// Adds one reference to a counted block.
    pub fn retain_block(&mut self, id: BlockId) -> bool {
        match self.heap.get(id).map(HeapBlock::category) {
            Some(Category::SharedString | Category::MallocString) => self.strings.retain(&self.heap, id),
            Some(_) => self.heap.inc_ref(id),
            None => false,
        }
    }

    pub fn release(&mut self, value: Value) {
        if let Some(id) = value.ref_id() {
            self.release_block(id);
        }
    }

    fn release_all(&mut self, values: impl IntoIterator<Item = Value>) {
        for value in values {
            self.release(value);
        }
    }

    /// Drops one reference to a counted block, reclaiming it and everything it
    /// exclusively owns once the last reference is gone.
    pub fn release_block(&mut self, id: BlockId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            match self.heap.get(id).map(HeapBlock::category) {
                None => {}
                Some(Category::SharedString | Category::MallocString) => self.strings.release(&mut self.heap, id),
                Some(_) => {
                    if let Some(block) = self.heap.dec_ref(id) {
                        self.reclaim(block, &mut pending);
                    }
                }
            }
        }
    }

    /// Frees a block that is owned exclusively rather than counted.
    fn reclaim_owned(&mut self, id: BlockId, pending: &mut Vec<BlockId>) {
        if let Some(block) = self.heap.remove(id) {
            self.reclaim(block, pending);
        }
    }

    fn reclaim(&mut self, block: HeapBlock, pending: &mut Vec<BlockId>) {
        let category = block.category();
        let size = block.size() as u64;
        match block.into_data() {
            BlockData::Array(items) => {
                if category == Category::Class {
                    self.counters.classes = self.counters.classes.saturating_sub(1);
                    self.counters.class_bytes = self.counters.class_bytes.saturating_sub(size);
                } else {
                    self.counters.arrays = self.counters.arrays.saturating_sub(1);
                    self.counters.array_bytes = self.counters.array_bytes.saturating_sub(size);
                }
                pending.extend(items.iter().filter_map(Value::ref_id));
            }
            BlockData::Mapping(map) => {
                self.counters.mappings = self.counters.mappings.saturating_sub(1);
                self.reclaim_owned(map.table, pending);
            }
            BlockData::MapTable(table) => {
                for node in table.nodes {
                    self.reclaim_owned(node, pending);
                }
            }
            BlockData::MapNode(node) => {
                pending.extend(node.key.ref_id());
                pending.extend(node.value.ref_id());
            }
            BlockData::Function(ptr) => {
                let owner_program = ptr.owner.and_then(|ob| self.object(ob).ok()).and_then(|ob| ob.program);
                if let Some(program) = ptr.pinned_program(owner_program)
                    && let Ok(prog) = self.program_mut(program)
                {
                    prog.func_ref = prog.func_ref.saturating_sub(1);
                }
                pending.extend(ptr.owner);
                pending.extend(ptr.args);
            }
            BlockData::Object(ob) => {
                self.counters.objects = self.counters.objects.saturating_sub(1);
                self.reclaim_owned(ob.name, pending);
                for sentence in ob.sentences {
                    self.reclaim_owned(sentence, pending);
                }
                pending.extend(ob.program);
                pending.extend(ob.variables.iter().filter_map(Value::ref_id));
                pending.extend(ob.living_name);
                pending.extend(ob.replaced_program);
                pending.extend(ob.privs);
            }
            BlockData::Program(prog) => {
                self.counters.program_blocks = self.counters.program_blocks.saturating_sub(1);
                pending.push(prog.filename);
                pending.extend(prog.inherits.iter().map(|inherit| inherit.program));
                pending.extend(prog.function_names.iter().flatten());
                pending.extend(prog.variable_names);
                pending.extend(prog.strings);
                if let Some(lines) = prog.line_info {
                    self.reclaim_owned(lines, pending);
                }
            }
            BlockData::Sentence(sentence) => {
                self.counters.sentences = self.counters.sentences.saturating_sub(1);
                pending.push(match sentence.target {
                    SentenceTarget::Function(id) | SentenceTarget::Name(id) => id,
                });
                pending.extend(sentence.verb);
            }
            BlockData::Session(session) => {
                pending.push(session.object);
                if let Some(input) = session.input_to {
                    self.reclaim_input(input, pending);
                }
                pending.extend(session.fail_message.map(|message| match message {
                    FailMessage::Function(id) | FailMessage::Text(id) => id,
                }));
            }
            BlockData::CallOut(call) => {
                self.counters.call_out_bytes = self.counters.call_out_bytes.saturating_sub(size);
                pending.push(match call.target {
                    CallTarget::Function(id) | CallTarget::Name(id) => id,
                });
                pending.extend(call.object);
                pending.extend(call.args.iter().filter_map(Value::ref_id));
            }
            BlockData::IdentTable(table) => {
                for entry in table.buckets.into_iter().flatten() {
                    if let Some(block) = entry.block {
                        self.reclaim_owned(block, pending);
                    }
                }
            }
            BlockData::Opaque
            | BlockData::Text(_)
            | BlockData::OwnedString(_)
            | BlockData::SharedString(_)
            | BlockData::Buffer(_) => {}
        }
    }

    fn reclaim_input(&mut self, input: InputContinuation, pending: &mut Vec<BlockId>) {
        if let Some(BlockData::Sentence(sentence)) = self.heap.data(input.sentence) {
            pending.push(sentence.owner);
        }
        self.reclaim_owned(input.sentence, pending);
        pending.extend(input.carryover.iter().filter_map(Value::ref_id));
    }

    // ========================================================================
    // Programs and objects
    // ========================================================================

    /// Compiles `source` into a program block. The caller owns the returned reference.
    pub fn new_program(&mut self, source: ProgramSource) -> Result<BlockId, RuntimeError> {
        let mut inherits = Vec::with_capacity(source.inherits.len());
        let (mut function_offset, mut variable_offset) = (0, 0);
        for &parent in &source.inherits {
            let prog = self.program(parent)?;
            inherits.push(Inherit {
                program: parent,
                function_offset,
                variable_offset,
            });
            function_offset += prog.total_functions;
            variable_offset += prog.total_variables;
        }
        for inherit in &inherits {
            self.heap.inc_ref(inherit.program);
        }

        let filename = self.strings.intern(&mut self.heap, &source.filename);
        let function_names = source
            .functions
            .iter()
            .map(|name| Some(self.strings.intern(&mut self.heap, name)))
            .collect::<Vec<_>>();
        let variable_names = source
            .variables
            .iter()
            .map(|name| self.strings.intern(&mut self.heap, name))
            .collect::<Vec<_>>();
        let strings = source
            .strings
            .iter()
            .map(|literal| self.strings.intern(&mut self.heap, literal))
            .collect::<Vec<_>>();
        let line_info = source.line_numbers.then(|| {
            self.heap.allocate_sized(
                Category::LineNumbers,
                BlockData::Opaque,
                16 + 4 * (function_names.len() + 1),
                "line numbers",
            )
        });

        let program = Program {
            filename,
            inherits,
            total_functions: function_offset + function_names.len(),
            total_variables: variable_offset + variable_names.len(),
            function_names,
            variable_names,
            strings,
            line_info,
            func_ref: 0,
        };
        self.counters.program_blocks += 1;
        Ok(self
            .heap
            .allocate(Category::Program, BlockData::Program(program), "compile_file"))
    }

    /// Loads a new object running `program` and adds it to the live-object list.
    ///
    /// The list holds the object's only reference until some value refers to it.
    pub fn new_object(&mut self, name: &str, program: BlockId) -> Result<BlockId, RuntimeError> {
        let total_variables = self.program(program)?.total_variables;
        self.heap.inc_ref(program);
        let name = self
            .heap
            .allocate(Category::ObjectName, BlockData::Text(name.to_owned()), "load_object");
        let object = Object {
            name,
            program: Some(program),
            variables: (0..total_variables).map(|_| Value::default()).collect(),
            sentences: SmallVec::new(),
            living_name: None,
            replaced_program: None,
            privs: None,
        };
        let id = self
            .heap
            .allocate(Category::Object, BlockData::Object(object), "load_object");
        self.roots.objects.push(id);
        self.counters.objects += 1;
        Ok(id)
    }

    /// Returns an object value, adding a reference to the object.
    pub fn object_value(&mut self, ob: BlockId) -> Result<Value, RuntimeError> {
        self.object(ob)?;
        self.heap.inc_ref(ob);
        Ok(Value::Object(ob))
    }

    /// Stores `value` in a variable slot, releasing what was there.
    ///
    /// On error the value is released instead of stored.
    pub fn set_variable(&mut self, ob: BlockId, index: usize, value: Value) -> Result<(), RuntimeError> {
        let slot = match self.object_mut(ob) {
            Ok(object) => {
                let len = object.variables.len();
                object
                    .variables
                    .get_mut(index)
                    .ok_or(RuntimeError::VariableIndex { index, len })
            }
            Err(err) => Err(err),
        };
        match slot {
            Ok(slot) => {
                let old = std::mem::replace(slot, value);
                self.release(old);
                Ok(())
            }
            Err(err) => {
                self.release(value);
                Err(err)
            }
        }
    }

    pub fn variable(&self, ob: BlockId, index: usize) -> Option<&Value> {
        self.object(ob).ok()?.variables.get(index)
    }

    /// Sets the object's living name, privilege label or replaced-program
    /// name. `None` clears the field.
    pub fn set_object_label(&mut self, ob: BlockId, label: ObjectLabel, text: Option<&str>) -> Result<(), RuntimeError> {
        self.object(ob)?;
        let new = text.map(|text| self.strings.intern(&mut self.heap, text));
        let object = self.object_mut(ob)?;
        let field = match label {
            ObjectLabel::LivingName => &mut object.living_name,
            ObjectLabel::Privs => &mut object.privs,
            ObjectLabel::ReplacedProgram => &mut object.replaced_program,
        };
        let old = std::mem::replace(field, new);
        if let Some(old) = old {
            self.release_block(old);
        }
        Ok(())
    }

    /// Swaps the object's program out, leaving its variables in place.
    ///
    /// Refused while closures pin code in the program.
    pub fn swap_out(&mut self, ob: BlockId) -> Result<(), RuntimeError> {
        let Some(program) = self.object(ob)?.program else {
            return Ok(());
        };
        let func_refs = self.program(program)?.func_ref;
        if func_refs > 0 {
            return Err(RuntimeError::ProgramPinned { program, func_refs });
        }
        self.object_mut(ob)?.program = None;
        self.release_block(program);
        Ok(())
    }

    /// Moves an object from the live list to the destructed list and drops its
    /// command sentences.
    pub fn destruct_object(&mut self, ob: BlockId) -> Result<(), RuntimeError> {
        let sentences = std::mem::take(&mut self.object_mut(ob)?.sentences);
        let mut pending = Vec::new();
        for sentence in sentences {
            self.reclaim_owned(sentence, &mut pending);
        }
        for id in pending {
            self.release_block(id);
        }
        if let Some(pos) = self.roots.objects.iter().position(|&id| id == ob) {
            self.roots.objects.remove(pos);
            self.roots.destructed.push(ob);
        }
        Ok(())
    }

    /// Drops the destructed list's references, freeing objects nothing else holds.
    pub fn flush_destructed(&mut self) {
        for ob in std::mem::take(&mut self.roots.destructed) {
            self.release_block(ob);
        }
    }

    /// Registers a command on `ob` that calls `function` when `verb` is typed.
    pub fn add_action(&mut self, ob: BlockId, function: &str, verb: &str) -> Result<BlockId, RuntimeError> {
        self.object(ob)?;
        let target = SentenceTarget::Name(self.strings.intern(&mut self.heap, function));
        self.attach_sentence(ob, target, verb)
    }

    /// Registers a command that calls a closure; takes over the closure's reference.
    pub fn add_action_closure(&mut self, ob: BlockId, closure: Value, verb: &str) -> Result<BlockId, RuntimeError> {
        let Value::Function(fp) = closure else {
            let (id, found) = closure
                .ref_id()
                .and_then(|id| self.heap.get(id).map(|block| (id, block.category())))
                .unwrap_or((ob, Category::Object));
            self.release(closure);
            return Err(RuntimeError::WrongCategory {
                id,
                expected: Category::Function,
                found,
            });
        };
        if let Err(err) = self.object(ob) {
            self.release_block(fp);
            return Err(err);
        }
        self.attach_sentence(ob, SentenceTarget::Function(fp), verb)
    }

    fn attach_sentence(&mut self, ob: BlockId, target: SentenceTarget, verb: &str) -> Result<BlockId, RuntimeError> {
        let verb = Some(self.strings.intern(&mut self.heap, verb));
        let sentence = self.heap.allocate(
            Category::Sentence,
            BlockData::Sentence(Sentence { owner: ob, target, verb }),
            "add_action",
        );
        self.counters.sentences += 1;
        self.object_mut(ob)?.sentences.push(sentence);
        Ok(sentence)
    }

    // ========================================================================
    // Sessions and scheduling
    // ========================================================================

    /// Attaches a new interactive session to `ob`.
    pub fn connect_session(&mut self, ob: BlockId) -> Result<BlockId, RuntimeError> {
        self.object(ob)?;
        self.heap.inc_ref(ob);
        let session = Session {
            object: ob,
            input_to: None,
            fail_message: None,
        };
        let id = self
            .heap
            .allocate(Category::Interactive, BlockData::Session(session), "new_user");
        self.roots.sessions.push(id);
        Ok(id)
    }

    pub fn disconnect_session(&mut self, session: BlockId) -> Result<(), RuntimeError> {
        self.session(session)?;
        self.roots.sessions.retain(|&id| id != session);
        let mut pending = Vec::new();
        self.reclaim_owned(session, &mut pending);
        for id in pending {
            self.release_block(id);
        }
        Ok(())
    }

    /// Redirects the session's next line of input to `function` on its object,
    /// passing `carryover` along. Replaces any pending redirect.
    pub fn set_input_to(&mut self, session: BlockId, function: &str, carryover: Vec<Value>) -> Result<(), RuntimeError> {
        let object = match self.session(session) {
            Ok(s) => s.object,
            Err(err) => {
                self.release_all(carryover);
                return Err(err);
            }
        };
        self.heap.inc_ref(object);
        let target = SentenceTarget::Name(self.strings.intern(&mut self.heap, function));
        let sentence = self.heap.allocate(
            Category::Sentence,
            BlockData::Sentence(Sentence {
                owner: object,
                target,
                verb: None,
            }),
            "input_to",
        );
        self.counters.sentences += 1;
        let previous = self.session_mut(session)?.input_to.replace(InputContinuation {
            sentence,
            carryover: carryover.into(),
        });
        if let Some(previous) = previous {
            self.drop_input(previous);
        }
        Ok(())
    }

    /// Cancels a pending redirect, releasing its sentence and carried values.
    pub fn clear_input_to(&mut self, session: BlockId) -> Result<(), RuntimeError> {
        if let Some(previous) = self.session_mut(session)?.input_to.take() {
            self.drop_input(previous);
        }
        Ok(())
    }

    fn drop_input(&mut self, input: InputContinuation) {
        let mut pending = Vec::new();
        self.reclaim_input(input, &mut pending);
        for id in pending {
            self.release_block(id);
        }
    }

    pub fn set_fail_message(&mut self, session: BlockId, text: &str) -> Result<(), RuntimeError> {
        self.session(session)?;
        let message = FailMessage::Text(self.strings.intern(&mut self.heap, text));
        self.replace_fail_message(session, message)
    }

    /// Uses a closure as the session's fail message; takes over its reference.
    pub fn set_fail_function(&mut self, session: BlockId, closure: BlockId) -> Result<(), RuntimeError> {
        self.session(session)?;
        self.block_of(closure, Category::Function)?;
        self.replace_fail_message(session, FailMessage::Function(closure))
    }

    fn replace_fail_message(&mut self, session: BlockId, message: FailMessage) -> Result<(), RuntimeError> {
        if let Some(FailMessage::Function(id) | FailMessage::Text(id)) =
            self.session_mut(session)?.fail_message.replace(message)
        {
            self.release_block(id);
        }
        Ok(())
    }

    /// Schedules `function` to be called on `ob` after `delay` ticks.
    pub fn call_out(&mut self, ob: BlockId, function: &str, args: Vec<Value>, delay: u64) -> Result<BlockId, RuntimeError> {
        if let Err(err) = self.object(ob) {
            self.release_all(args);
            return Err(err);
        }
        self.heap.inc_ref(ob);
        let target = CallTarget::Name(self.strings.intern(&mut self.heap, function));
        let call = CallOut {
            target,
            object: Some(ob),
            args,
            due: self.heap.tick() + delay,
        };
        let id = self
            .heap
            .allocate(Category::CallOut, BlockData::CallOut(call), "new_call_out");
        self.counters.call_out_bytes += self.heap.get(id).map_or(0, |block| block.size() as u64);
        self.roots.call_outs.push_back(id);
        Ok(id)
    }

    pub fn remove_call_out(&mut self, call: BlockId) -> Result<(), RuntimeError> {
        self.block_of(call, Category::CallOut)?;
        self.roots.call_outs.retain(|&id| id != call);
        let mut pending = Vec::new();
        self.reclaim_owned(call, &mut pending);
        for id in pending {
            self.release_block(id);
        }
        Ok(())
    }

    // ========================================================================
    // Interpreter and driver roots
    // ========================================================================

    pub fn push_stack(&mut self, value: Value) {
        self.roots.stack.push(value);
    }

    /// Pops the top of the value stack; the caller takes over its reference.
    pub fn pop_stack(&mut self) -> Option<Value> {
        self.roots.stack.pop()
    }

    pub fn set_apply_return(&mut self, value: Value) {
        let old = std::mem::replace(&mut self.roots.apply_return, value);
        self.release(old);
    }

    pub fn set_master(&mut self, ob: BlockId) -> Result<(), RuntimeError> {
        self.object(ob)?;
        self.heap.inc_ref(ob);
        if let Some(old) = self.roots.master.replace(ob) {
            self.release_block(old);
        }
        Ok(())
    }

    pub fn set_simul_owner(&mut self, ob: BlockId) -> Result<(), RuntimeError> {
        self.object(ob)?;
        self.heap.inc_ref(ob);
        if let Some(old) = self.roots.simul_owner.replace(ob) {
            self.release_block(old);
        }
        Ok(())
    }

    pub fn push_command_giver(&mut self, ob: BlockId) -> Result<(), RuntimeError> {
        self.object(ob)?;
        self.heap.inc_ref(ob);
        self.roots.command_givers.push(ob);
        Ok(())
    }

    pub fn pop_command_giver(&mut self) {
        if let Some(ob) = self.roots.command_givers.pop() {
            self.release_block(ob);
        }
    }

    /// Stores a config value as a plain-string block.
    pub fn add_config_string(&mut self, text: &str) -> BlockId {
        let id = self
            .heap
            .allocate(Category::PlainString, BlockData::Text(text.to_owned()), "config file");
        self.roots.config_strings.push(id);
        id
    }

    /// Sets the default "what?" message, holding the shared string `text + "\n"`.
    pub fn set_default_fail_message(&mut self, text: Option<&str>) {
        if let Some(old) = self.roots.default_fail_message.take()
            && let Some(id) = self.strings.find(&format!("{old}\n"))
        {
            self.release_block(id);
        }
        if let Some(text) = text {
            self.strings.intern(&mut self.heap, &format!("{text}\n"));
            self.roots.default_fail_message = Some(text.to_owned());
        }
    }

    /// Registers a globally visible function name.
    pub fn add_simul_name(&mut self, name: &str) -> BlockId {
        let id = self.strings.intern(&mut self.heap, name);
        self.roots.simul_names.push(id);
        id
    }

    pub fn add_predefine(&mut self, name: &str) -> BlockId {
        let id = self
            .heap
            .allocate(Category::Predefine, BlockData::Text(name.to_owned()), "predefines");
        self.roots.predefines.push(id);
        id
    }

    /// Caches a resolved host name.
    pub fn cache_address_name(&mut self, name: &str) -> BlockId {
        let id = self.strings.intern(&mut self.heap, name);
        self.roots.address_names.push(id);
        id
    }

    /// Builds the compiler's identifier table. Permanent kinds get a
    /// permanent-identifier block each.
    pub fn new_ident_table(&mut self, buckets: usize, entries: &[(&str, IdentKind)]) -> BlockId {
        let mut table = IdentTable::with_buckets(buckets);
        for &(name, kind) in entries {
            let block = kind.is_permanent().then(|| {
                self.heap
                    .allocate(Category::PermIdent, BlockData::Text(name.to_owned()), "add_permanent_ident")
            });
            table.insert(IdentEntry {
                name: name.to_owned(),
                kind,
                block,
            });
        }
        self.heap
            .allocate(Category::IdentTable, BlockData::IdentTable(table), "init_identifiers")
    }

    /// Allocates a bookkeeping block with no payload: tables, scratch space,
    /// editor buffers and similar.
    pub fn allocate_block(&mut self, category: Category, size: usize, description: &'static str) -> BlockId {
        self.heap
            .allocate_sized(category, BlockData::Opaque, size, description)
    }

    /// Frees a bookkeeping block regardless of its stored count.
    pub fn free_block(&mut self, id: BlockId) -> bool {
        self.heap.remove(id).is_some()
    }
}

/// Optional string labels carried by an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectLabel {
    LivingName,
    Privs,
    ReplacedProgram,
}
