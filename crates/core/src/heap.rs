//! Object Heap and Garbage Collector
//!
//! A non-moving, stop-the-world, tri-color mark-sweep collector over an
//! index-addressed arena. [`ObjRef`] handles are arena indices; a slot is
//! recycled through the free list only after its object is swept, so a
//! reachable handle never dangles.
//!
//! The heap owns the string interner as a weak set: after marking and
//! before sweeping, entries whose keys were left white are dropped so the
//! interner never keeps dead strings alive.
//!
//! Collection runs when `bytes_allocated` exceeds `next_gc` (growth factor
//! two), or on every allocation in stress mode. The heap itself never
//! decides to collect: mutators check [`Heap::should_collect`] before
//! allocating and call [`Heap::collect`] with their own roots. Collecting
//! *before* the allocation means a freshly returned handle is always safe
//! to hold across the next single allocation.

use tracing::{debug, trace};

use crate::object::{
    FerString, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjDictionary, ObjFunction, ObjInstance,
    ObjList, ObjNative, ObjUpvalue,
};
use crate::table::{Table, hash_bytes};
use crate::value::{ObjRef, Value};

/// After a collection the next trigger is twice the surviving volume.
const GC_HEAP_GROW_FACTOR: usize = 2;

/// First collection fires after a megabyte of allocation.
const GC_FIRST_TRIGGER: usize = 1024 * 1024;

#[derive(Debug)]
struct Slot {
    marked: bool,
    obj: Option<Obj>,
}

#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Gray worklist: marked objects whose references are not yet traced.
    gray: Vec<ObjRef>,
    /// Reused buffer for edge enumeration while blackening.
    scratch: Vec<ObjRef>,
    /// The string interner. A weak set: keys are the interned strings,
    /// values are nil.
    strings: Table,
    bytes_allocated: usize,
    next_gc: usize,
    stress: bool,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

impl Heap {
    pub fn new() -> Heap {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            gray: Vec::new(),
            scratch: Vec::new(),
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: GC_FIRST_TRIGGER,
            stress: false,
        }
    }

    /// Collect on every allocation. For flushing GC bugs out, not for
    /// running programs.
    pub fn set_stress(&mut self, stress: bool) {
        self.stress = stress;
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Whether the next allocation should be preceded by a collection.
    #[inline]
    pub fn should_collect(&self) -> bool {
        self.stress || self.bytes_allocated > self.next_gc
    }

    /// Place an object in the arena and return its handle. Callers that can
    /// reach a GC trigger are expected to have checked [`should_collect`]
    /// first, with their roots in hand.
    ///
    /// [`should_collect`]: Heap::should_collect
    pub fn alloc(&mut self, obj: Obj) -> ObjRef {
        self.bytes_allocated += obj.size_estimate();
        let slot = Slot {
            marked: false,
            obj: Some(obj),
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = slot;
                index
            }
            None => {
                self.slots.push(slot);
                (self.slots.len() - 1) as u32
            }
        };
        ObjRef(index)
    }

    /// Return the canonical string for `bytes`, allocating it on first
    /// sight. At most one live string exists for any byte content.
    pub fn intern(&mut self, bytes: &[u8]) -> ObjRef {
        let hash = hash_bytes(bytes);
        let slots = &self.slots;
        let existing = self.strings.find_string(hash, |r| {
            match &slots[r.index()].obj {
                Some(Obj::String(s)) => &*s.bytes == bytes,
                _ => false,
            }
        });
        if let Some(existing) = existing {
            return existing;
        }

        let r = self.alloc(Obj::String(FerString {
            bytes: bytes.into(),
            hash,
        }));
        self.strings.set(r, hash, Value::NIL);
        r
    }

    // =========================================================================
    // Collection
    // =========================================================================

    /// Run a full collection. `mark_roots` is handed the heap to mark every
    /// root the caller knows about: the VM contributes its stacks, frames,
    /// open upvalues and globals; the compiler contributes its chain of
    /// in-progress functions.
    pub fn collect<F>(&mut self, mark_roots: F)
    where
        F: FnOnce(&mut Heap),
    {
        let before = self.bytes_allocated;
        trace!("-- gc begin");

        mark_roots(self);
        self.trace_references();

        // The interner holds strings weakly: drop entries marking missed.
        let slots = &self.slots;
        self.strings.remove_white(|r| slots[r.index()].marked);

        let freed = self.sweep();
        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;

        debug!(
            freed,
            reclaimed = before.saturating_sub(self.bytes_allocated),
            live_bytes = self.bytes_allocated,
            next_gc = self.next_gc,
            "-- gc end"
        );
    }

    /// Mark an object gray. White objects get their mark bit set and join
    /// the worklist; already-marked objects are skipped.
    pub fn mark_object(&mut self, r: ObjRef) {
        let slot = &mut self.slots[r.index()];
        if slot.obj.is_none() || slot.marked {
            return;
        }
        slot.marked = true;
        self.gray.push(r);
    }

    pub fn mark_value(&mut self, value: Value) {
        if value.is_object() {
            self.mark_object(value.as_object());
        }
    }

    /// Blacken gray objects until the worklist drains.
    fn trace_references(&mut self) {
        let mut scratch = std::mem::take(&mut self.scratch);
        while let Some(r) = self.gray.pop() {
            scratch.clear();
            if let Some(obj) = &self.slots[r.index()].obj {
                obj.trace(&mut scratch);
            }
            for child in scratch.drain(..) {
                self.mark_object(child);
            }
        }
        self.scratch = scratch;
    }

    /// Free every white object and clear the survivors' mark bits for the
    /// next cycle. Returns how many objects were freed.
    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            match &slot.obj {
                Some(_) if slot.marked => slot.marked = false,
                Some(obj) => {
                    self.bytes_allocated = self.bytes_allocated.saturating_sub(obj.size_estimate());
                    slot.obj = None;
                    self.free.push(index as u32);
                    freed += 1;
                }
                None => {}
            }
        }
        freed
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Number of live objects in the arena.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.obj.is_some()).count()
    }

    /// Number of objects currently carrying a mark bit. Zero outside of a
    /// collection.
    pub fn marked_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.obj.is_some() && s.marked)
            .count()
    }

    // =========================================================================
    // Typed Access
    // =========================================================================

    pub fn get(&self, r: ObjRef) -> &Obj {
        self.slots[r.index()]
            .obj
            .as_ref()
            .expect("use of freed object")
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        self.slots[r.index()]
            .obj
            .as_mut()
            .expect("use of freed object")
    }

    pub fn is_string(&self, r: ObjRef) -> bool {
        matches!(self.get(r), Obj::String(_))
    }

    pub fn as_string(&self, r: ObjRef) -> &FerString {
        match self.get(r) {
            Obj::String(s) => s,
            obj => panic!("expected string, found {}", obj.type_name()),
        }
    }

    pub fn string_bytes(&self, r: ObjRef) -> &[u8] {
        &self.as_string(r).bytes
    }

    /// The string's content for host-facing text (diagnostics, traces).
    /// Program-visible paths use [`string_bytes`] so content round-trips.
    ///
    /// [`string_bytes`]: Heap::string_bytes
    pub fn string_lossy(&self, r: ObjRef) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.string_bytes(r))
    }

    pub fn string_hash(&self, r: ObjRef) -> u32 {
        self.as_string(r).hash
    }

    pub fn as_function(&self, r: ObjRef) -> &ObjFunction {
        match self.get(r) {
            Obj::Function(f) => f,
            obj => panic!("expected function, found {}", obj.type_name()),
        }
    }

    pub fn function_mut(&mut self, r: ObjRef) -> &mut ObjFunction {
        match self.get_mut(r) {
            Obj::Function(f) => f,
            obj => panic!("expected function, found {}", obj.type_name()),
        }
    }

    pub fn as_closure(&self, r: ObjRef) -> &ObjClosure {
        match self.get(r) {
            Obj::Closure(c) => c,
            obj => panic!("expected closure, found {}", obj.type_name()),
        }
    }

    pub fn closure_mut(&mut self, r: ObjRef) -> &mut ObjClosure {
        match self.get_mut(r) {
            Obj::Closure(c) => c,
            obj => panic!("expected closure, found {}", obj.type_name()),
        }
    }

    pub fn as_list(&self, r: ObjRef) -> &ObjList {
        match self.get(r) {
            Obj::List(l) => l,
            obj => panic!("expected list, found {}", obj.type_name()),
        }
    }

    pub fn list_mut(&mut self, r: ObjRef) -> &mut ObjList {
        match self.get_mut(r) {
            Obj::List(l) => l,
            obj => panic!("expected list, found {}", obj.type_name()),
        }
    }

    pub fn as_dictionary(&self, r: ObjRef) -> &ObjDictionary {
        match self.get(r) {
            Obj::Dictionary(d) => d,
            obj => panic!("expected dictionary, found {}", obj.type_name()),
        }
    }

    pub fn dictionary_mut(&mut self, r: ObjRef) -> &mut ObjDictionary {
        match self.get_mut(r) {
            Obj::Dictionary(d) => d,
            obj => panic!("expected dictionary, found {}", obj.type_name()),
        }
    }

    pub fn as_class(&self, r: ObjRef) -> &ObjClass {
        match self.get(r) {
            Obj::Class(c) => c,
            obj => panic!("expected class, found {}", obj.type_name()),
        }
    }

    pub fn class_mut(&mut self, r: ObjRef) -> &mut ObjClass {
        match self.get_mut(r) {
            Obj::Class(c) => c,
            obj => panic!("expected class, found {}", obj.type_name()),
        }
    }

    pub fn as_instance(&self, r: ObjRef) -> &ObjInstance {
        match self.get(r) {
            Obj::Instance(i) => i,
            obj => panic!("expected instance, found {}", obj.type_name()),
        }
    }

    pub fn instance_mut(&mut self, r: ObjRef) -> &mut ObjInstance {
        match self.get_mut(r) {
            Obj::Instance(i) => i,
            obj => panic!("expected instance, found {}", obj.type_name()),
        }
    }

    pub fn as_upvalue(&self, r: ObjRef) -> &ObjUpvalue {
        match self.get(r) {
            Obj::Upvalue(u) => u,
            obj => panic!("expected upvalue, found {}", obj.type_name()),
        }
    }

    pub fn upvalue_mut(&mut self, r: ObjRef) -> &mut ObjUpvalue {
        match self.get_mut(r) {
            Obj::Upvalue(u) => u,
            obj => panic!("expected upvalue, found {}", obj.type_name()),
        }
    }

    pub fn as_native(&self, r: ObjRef) -> &ObjNative {
        match self.get(r) {
            Obj::Native(n) => n,
            obj => panic!("expected native, found {}", obj.type_name()),
        }
    }

    pub fn as_bound_method(&self, r: ObjRef) -> &ObjBoundMethod {
        match self.get(r) {
            Obj::BoundMethod(b) => b,
            obj => panic!("expected bound method, found {}", obj.type_name()),
        }
    }

    // =========================================================================
    // Printing
    // =========================================================================

    /// Append a value's rendering, the way `print` shows it. Byte-exact:
    /// string content is copied as-is, everything else renders as ASCII.
    pub fn write_value(&self, value: Value, out: &mut Vec<u8>) {
        if value.is_number() {
            out.extend_from_slice(format_number(value.as_number()).as_bytes());
        } else if value.is_nil() {
            out.extend_from_slice(b"nil");
        } else if value.is_bool() {
            out.extend_from_slice(if value.as_bool() { b"true" } else { b"false" as &[u8] });
        } else {
            self.write_object(value.as_object(), out);
        }
    }

    /// A value's rendering as host text, for diagnostics and disassembly.
    pub fn format_value(&self, value: Value) -> String {
        let mut out = Vec::new();
        self.write_value(value, &mut out);
        String::from_utf8_lossy(&out).into_owned()
    }

    fn write_object(&self, r: ObjRef, out: &mut Vec<u8>) {
        match self.get(r) {
            Obj::String(s) => out.extend_from_slice(&s.bytes),
            Obj::List(list) => {
                out.push(b'[');
                for (i, item) in list.items.iter().enumerate() {
                    if i > 0 {
                        out.extend_from_slice(b", ");
                    }
                    self.write_value(*item, out);
                }
                out.push(b']');
            }
            Obj::Dictionary(dict) => {
                out.push(b'{');
                for (i, (key, value)) in dict.table.iter().enumerate() {
                    if i > 0 {
                        out.extend_from_slice(b", ");
                    }
                    out.extend_from_slice(self.string_bytes(key));
                    out.extend_from_slice(b": ");
                    self.write_value(value, out);
                }
                out.push(b'}');
            }
            Obj::Function(f) => self.write_function_name(f.name, out),
            Obj::Closure(c) => self.write_function_name(self.as_function(c.function).name, out),
            Obj::Upvalue(_) => out.extend_from_slice(b"upvalue"),
            Obj::Native(_) => out.extend_from_slice(b"<native fn>"),
            Obj::Class(c) => out.extend_from_slice(self.string_bytes(c.name)),
            Obj::Instance(i) => {
                out.extend_from_slice(self.string_bytes(self.as_class(i.class).name));
                out.extend_from_slice(b" instance");
            }
            Obj::BoundMethod(bound) => {
                let function = self.as_closure(bound.method).function;
                self.write_function_name(self.as_function(function).name, out);
            }
        }
    }

    fn write_function_name(&self, name: Option<ObjRef>, out: &mut Vec<u8>) {
        match name {
            Some(name) => {
                out.extend_from_slice(b"<fn ");
                out.extend_from_slice(self.string_bytes(name));
                out.push(b'>');
            }
            None => out.extend_from_slice(b"<script>"),
        }
    }
}

/// Print a number the way C's `%g` prints the common cases: integral finite
/// values without a decimal point.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n == n.trunc() && n.is_finite() && n.abs() < 1e15 {
        if n == 0.0 && n.is_sign_negative() {
            "-0".to_string()
        } else {
            format!("{}", n as i64)
        }
    } else {
        format!("{}", n)
    }
}
