//! Instrumented engine for lifecycle tests
//!
//! `MockEngine` counts every duplicate and release, detects releases of dead
//! values and reports anything still referenced when it is dropped. Its
//! "scripts" are `;`-separated commands:
//!
//! - `object`, `array`, `function` - allocate a value of that kind
//! - `<int>` - an integer
//! - `throw` - fail with a script error
//! - `jobs N` - enqueue a chain of N jobs, each enqueuing the next
//! - `corrupt` - enqueue a job that fails irrecoverably
//! - `rejected` - an already rejected promise
//! - `pending` - a promise rejected by a job

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use qjsbind_core::{
    Engine, EngineError, EngineResult, EvalKind, Inspected, ObjectKind, Primitive, ScriptError,
};
use qjsbind_runtime::{ContextConfig, EngineContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockRef {
    Undefined,
    Int(i32),
    Slot(u32),
}

#[derive(Debug, Default)]
pub struct MockStats {
    pub dups: Cell<u32>,
    pub frees: Cell<u32>,
    pub double_frees: Cell<u32>,
    pub dead_uses: Cell<u32>,
    pub jobs_run: Cell<u32>,
    pub leaked_at_drop: Cell<u32>,
    pub destroyed: Cell<bool>,
}

impl MockStats {
    fn bump(counter: &Cell<u32>) {
        counter.set(counter.get() + 1);
    }
}

struct Slot {
    kind: ObjectKind,
    refs: u32,
}

enum Job {
    Chain { remaining: u32 },
    Fail,
    Reject { slot: u32 },
}

const GLOBAL: u32 = 0;
pub const ARRAY_LENGTH: u32 = 3;

pub struct MockEngine {
    slots: Vec<Slot>,
    properties: HashMap<(u32, String), MockRef>,
    jobs: VecDeque<Job>,
    job_error: Option<EngineError>,
    rejected: HashSet<u32>,
    stats: Rc<MockStats>,
}

impl MockEngine {
    pub fn new() -> (Self, Rc<MockStats>) {
        let stats = Rc::new(MockStats::default());
        let engine = Self {
            slots: vec![Slot {
                kind: ObjectKind::Object,
                refs: 1,
            }],
            properties: HashMap::new(),
            jobs: VecDeque::new(),
            job_error: None,
            rejected: HashSet::new(),
            stats: Rc::clone(&stats),
        };
        (engine, stats)
    }

    fn alloc(&mut self, kind: ObjectKind) -> MockRef {
        self.slots.push(Slot { kind, refs: 1 });
        MockRef::Slot(self.slots.len() as u32 - 1)
    }

    fn slot(&mut self, value: MockRef) -> Option<&mut Slot> {
        let MockRef::Slot(index) = value else {
            return None;
        };
        let slot = &mut self.slots[index as usize];
        if slot.refs == 0 {
            MockStats::bump(&self.stats.dead_uses);
        }
        Some(slot)
    }

    fn run_command(&mut self, command: &str) -> EngineResult<MockRef> {
        match command {
            "object" => Ok(self.alloc(ObjectKind::Object)),
            "array" => Ok(self.alloc(ObjectKind::Array)),
            "function" => Ok(self.alloc(ObjectKind::Function)),
            "throw" => Err(ScriptError::new("Error", "mock failure")
                .with_stack("    at <mock>")
                .into()),
            "rejected" | "pending" => {
                let promise = self.alloc(ObjectKind::Object);
                let slot = self.slots.len() as u32 - 1;
                if command == "rejected" {
                    self.rejected.insert(slot);
                } else {
                    self.jobs.push_back(Job::Reject { slot });
                }
                Ok(promise)
            }
            "corrupt" => {
                self.jobs.push_back(Job::Fail);
                Ok(MockRef::Undefined)
            }
            other => {
                if let Some(count) = other.strip_prefix("jobs ") {
                    let remaining: u32 = count
                        .trim()
                        .parse()
                        .map_err(|_| EngineError::script_error("SyntaxError", other))?;
                    if remaining > 0 {
                        self.jobs.push_back(Job::Chain {
                            remaining: remaining - 1,
                        });
                    }
                    return Ok(MockRef::Undefined);
                }
                match other.parse() {
                    Ok(n) => Ok(MockRef::Int(n)),
                    Err(_) => Ok(MockRef::Undefined),
                }
            }
        }
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        for (_, value) in std::mem::take(&mut self.properties) {
            self.free_value(value);
        }
        self.free_value(MockRef::Slot(GLOBAL));

        let leaked = self.slots.iter().filter(|slot| slot.refs > 0).count() as u32;
        self.stats.leaked_at_drop.set(leaked);
        self.stats.destroyed.set(true);
    }
}

impl Engine for MockEngine {
    type Value = MockRef;

    fn build_id() -> &'static str {
        "mock-engine-1"
    }

    fn evaluate(&mut self, source: &str, _filename: &str, _kind: EvalKind) -> EngineResult<MockRef> {
        let mut last = MockRef::Undefined;
        for command in source.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            self.free_value(last);
            last = self.run_command(command)?;
        }
        Ok(last)
    }

    fn global_object(&mut self) -> MockRef {
        self.duplicate(MockRef::Slot(GLOBAL))
    }

    fn get_property(&mut self, object: MockRef, name: &str) -> EngineResult<MockRef> {
        let MockRef::Slot(index) = object else {
            return Ok(MockRef::Undefined);
        };
        if name == "throwing" {
            return Err(EngineError::script_error("TypeError", "getter threw"));
        }
        let value = self
            .properties
            .get(&(index, name.to_string()))
            .copied()
            .unwrap_or(MockRef::Undefined);
        Ok(self.duplicate(value))
    }

    fn set_property(&mut self, object: MockRef, name: &str, value: MockRef) -> EngineResult<()> {
        let MockRef::Slot(index) = object else {
            self.free_value(value);
            return Err(EngineError::script_error("TypeError", "not an object"));
        };
        if let Some(old) = self.properties.insert((index, name.to_string()), value) {
            self.free_value(old);
        }
        Ok(())
    }

    fn stringify(&mut self, value: MockRef) -> EngineResult<Option<String>> {
        Ok(match value {
            MockRef::Undefined => None,
            MockRef::Int(n) => Some(n.to_string()),
            slot => match self.slot(slot).map(|s| s.kind) {
                Some(ObjectKind::Array) => Some("[1,2,3]".to_string()),
                Some(ObjectKind::Function) | None => None,
                Some(ObjectKind::Object) => Some("{}".to_string()),
            },
        })
    }

    fn array_length(&mut self, array: MockRef) -> EngineResult<u32> {
        self.slot(array);
        Ok(ARRAY_LENGTH)
    }

    fn array_get(&mut self, array: MockRef, index: u32) -> EngineResult<MockRef> {
        self.slot(array);
        if index < ARRAY_LENGTH {
            Ok(MockRef::Int(index as i32 + 1))
        } else {
            Ok(MockRef::Undefined)
        }
    }

    /// Returns a new reference to the first argument, or the argument count
    fn call(&mut self, function: MockRef, _this: Option<MockRef>, args: &[MockRef]) -> EngineResult<MockRef> {
        self.slot(function);
        for arg in args {
            self.slot(*arg);
        }
        match args.first() {
            Some(MockRef::Undefined) => Err(EngineError::script_error("TypeError", "undefined argument")),
            Some(first @ MockRef::Slot(_)) => Ok(self.duplicate(*first)),
            _ => Ok(MockRef::Int(args.len() as i32)),
        }
    }

    fn duplicate(&mut self, value: MockRef) -> MockRef {
        let stats = Rc::clone(&self.stats);
        if let Some(slot) = self.slot(value) {
            slot.refs += 1;
            MockStats::bump(&stats.dups);
        }
        value
    }

    fn free_value(&mut self, value: MockRef) {
        let MockRef::Slot(index) = value else {
            return;
        };
        let slot = &mut self.slots[index as usize];
        if slot.refs == 0 {
            MockStats::bump(&self.stats.double_frees);
            return;
        }
        slot.refs -= 1;
        MockStats::bump(&self.stats.frees);
    }

    fn parse_json(&mut self, text: &str) -> EngineResult<MockRef> {
        match text.trim() {
            "{}" => Ok(self.alloc(ObjectKind::Object)),
            "[]" => Ok(self.alloc(ObjectKind::Array)),
            other => other
                .parse()
                .map(MockRef::Int)
                .map_err(|_| EngineError::script_error("SyntaxError", "unexpected token in JSON")),
        }
    }

    fn compile(&mut self, source: &str, _filename: &str) -> EngineResult<Vec<u8>> {
        if source.contains("syntax error") {
            return Err(EngineError::script_error("SyntaxError", "unexpected token"));
        }
        Ok(source.as_bytes().to_vec())
    }

    fn execute(&mut self, bytecode: &[u8]) -> EngineResult<MockRef> {
        let source = std::str::from_utf8(bytecode)
            .map_err(|_| EngineError::Bytecode("payload is not mock bytecode".to_string()))?;
        self.evaluate(source, "<bytecode>", EvalKind::Script)
    }

    fn execute_pending_job(&mut self) -> i32 {
        match self.jobs.pop_front() {
            None => 0,
            Some(Job::Chain { remaining }) => {
                MockStats::bump(&self.stats.jobs_run);
                if remaining > 0 {
                    self.jobs.push_back(Job::Chain {
                        remaining: remaining - 1,
                    });
                }
                1
            }
            Some(Job::Reject { slot }) => {
                MockStats::bump(&self.stats.jobs_run);
                self.rejected.insert(slot);
                1
            }
            Some(Job::Fail) => {
                self.job_error = Some(EngineError::script_error("InternalError", "job exploded"));
                -1
            }
        }
    }

    fn take_job_error(&mut self) -> Option<EngineError> {
        self.job_error.take()
    }

    fn rejection(&mut self, value: MockRef) -> Option<ScriptError> {
        match value {
            MockRef::Slot(slot) if self.rejected.contains(&slot) => {
                self.slot(value);
                Some(ScriptError::new("Error", "promise rejected"))
            }
            _ => None,
        }
    }

    fn inspect(&mut self, value: MockRef) -> EngineResult<Inspected> {
        Ok(match value {
            MockRef::Undefined => Inspected::Primitive(Primitive::Undefined),
            MockRef::Int(n) => Inspected::Primitive(Primitive::Int(n)),
            slot => match self.slot(slot) {
                Some(slot) => Inspected::Object(slot.kind),
                None => Inspected::Primitive(Primitive::Undefined),
            },
        })
    }

    fn make_primitive(&mut self, primitive: &Primitive) -> EngineResult<MockRef> {
        Ok(match primitive {
            Primitive::Int(n) => MockRef::Int(*n),
            _ => MockRef::Undefined,
        })
    }
}

/// A context over a fresh mock engine plus the engine's counters
pub fn mock_context() -> (EngineContext<MockEngine>, Rc<MockStats>) {
    let (engine, stats) = MockEngine::new();
    (EngineContext::from_engine(engine, ContextConfig::default()), stats)
}
