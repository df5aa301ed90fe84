//! lox-vm — Machine virtuelle d'exécution pour le langage Lox
//!
//! Une VM à pile, sans registre : le compilateur pousse, la boucle de
//! dispatch consomme. Le crate expose :
//!
//! - un type [`Vm`] possédé (pas de singleton), configuré par [`VmOptions`],
//! - `interpret(source)` qui enchaîne compilation et exécution,
//! - un trait [`Host`] pour router la sortie de `print` (stdout par défaut,
//!   un collecteur dans les tests),
//! - un système d'erreurs [`InterpretError`] distinguant compilation et
//!   exécution.
//!
//! Invariants de la boucle :
//! - `JumpIfFalse` ne pop pas : chaque site de contrôle équilibre ses `Pop`
//!   par branche, le court-circuit de `and`/`or` laisse la valeur gauche
//!   comme résultat.
//! - Une frame = une fenêtre sur la pile : slot 0 le callee, 1..=arité les
//!   arguments. `Return` tronque à `slot_base` et repousse le résultat.
//! - Erreur d'exécution : message + `[line N] in script` sur stderr, pile
//!   et frames remises à zéro, la VM reste utilisable.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

use std::fmt::Write as _;
use std::rc::Rc;

use thiserror::Error;

use lox_compiler::{compile, CompileError};
use lox_core::bytecode::disasm::disassemble_instruction;
use lox_core::bytecode::OpCode;
use lox_core::table::{Interner, Table};
use lox_core::value::{LoxFunction, Value};

/// Profondeur maximale de la pile d'appels.
pub const FRAMES_MAX: usize = 64;

/// Résultat d'un `interpret` : soit la compilation a refusé, soit
/// l'exécution a déraillé (le détail est déjà sur stderr).
#[derive(Debug, Error)]
pub enum InterpretError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("erreur d'exécution")]
    Runtime,
}

/// Options de construction de la VM.
#[derive(Debug, Clone, Copy, Default)]
pub struct VmOptions {
    /// Trace d'exécution : pile + instruction désassemblée avant chaque
    /// dispatch, sur stderr.
    pub trace: bool,
}

impl VmOptions {
    /// Active/désactive la trace.
    pub fn with_trace(mut self, on: bool) -> Self {
        self.trace = on;
        self
    }
}

/// Environnement *host* pour la sortie de `print`.
pub trait Host: 'static {
    fn print_line(&mut self, line: &str);
}

/// Host par défaut : stdout.
#[derive(Default)]
pub struct DefaultHost;

impl Host for DefaultHost {
    fn print_line(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Une invocation active : le callee, l'ip dans son chunk, et l'index de
/// pile de son slot 0.
struct CallFrame {
    function: Rc<LoxFunction>,
    ip: usize,
    slot_base: usize,
}

/// La machine virtuelle.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    strings: Interner,
    trace: bool,
    host: Box<dyn Host>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Self {
        Self {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            strings: Interner::new(),
            trace: options.trace,
            host: Box::<DefaultHost>::default(),
        }
    }

    /// Installe un host personnalisé (tests, embedding).
    pub fn with_host(mut self, host: Box<dyn Host>) -> Self {
        self.host = host;
        self
    }

    /// Valeur d'une globale, si elle existe. Pratique pour l'embedding et
    /// les tests.
    pub fn get_global(&mut self, name: &str) -> Option<Value> {
        let key = self.strings.intern(name);
        self.globals.get(&key)
    }

    /// Compile puis exécute `source`. Les littéraux sont internés dans la
    /// table de chaînes de la VM dès la compilation : le pool de constantes
    /// et l'exécution partagent les mêmes objets.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = Rc::new(compile(source, &mut self.strings)?);
        log::debug!("exécution de {function}");

        self.push(Value::Fun(function.clone()));
        self.call_function(function, 0)?;
        self.run()
    }

    // ******************** PILE ********************

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, InterpretError> {
        match self.stack.pop() {
            Some(value) => Ok(value),
            None => Err(self.runtime_error("operand stack underflow")),
        }
    }

    fn peek(&mut self, distance: usize) -> Result<Value, InterpretError> {
        let len = self.stack.len();
        if distance >= len {
            return Err(self.runtime_error("operand stack underflow"));
        }
        Ok(self.stack[len - 1 - distance].clone())
    }

    // ******************** FRAMES & LECTURE DU CODE ********************

    fn frame(&self) -> &CallFrame {
        // Invariant : run() ne tourne qu'avec au moins une frame.
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        let top = self.frames.len() - 1;
        &mut self.frames[top]
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> usize {
        let frame = self.frame_mut();
        let value = frame.function.chunk.read_u16(frame.ip);
        frame.ip += 2;
        usize::from(value)
    }

    fn read_constant(&mut self, long: bool) -> Result<Value, InterpretError> {
        let idx = if long {
            (u32::from(self.read_byte()) << 16)
                | (u32::from(self.read_byte()) << 8)
                | u32::from(self.read_byte())
        } else {
            u32::from(self.read_byte())
        };
        let value = self.frame().function.chunk.constants().get(idx).cloned();
        match value {
            Some(value) => Ok(value),
            None => Err(self.runtime_error(format!("constant index {idx} out of range"))),
        }
    }

    fn read_string(&mut self, long: bool) -> Result<Rc<lox_core::value::LoxStr>, InterpretError> {
        match self.read_constant(long)? {
            Value::Str(name) => Ok(name),
            other => {
                Err(self.runtime_error(format!("expected string constant, got {}", other.type_name())))
            }
        }
    }

    // ******************** ERREURS ********************

    /// Signale une erreur d'exécution : message + ligne de l'opcode qui
    /// vient d'être consommé, puis remise à zéro de la pile et des frames.
    fn runtime_error(&mut self, message: impl std::fmt::Display) -> InterpretError {
        eprintln!("{message}");
        if let Some(frame) = self.frames.last() {
            let offset = frame.ip.saturating_sub(1) as u32;
            let line = frame.function.chunk.lines().line_for(offset).unwrap_or(0);
            eprintln!("[line {line}] in script");
        }
        self.stack.clear();
        self.frames.clear();
        InterpretError::Runtime
    }

    // ******************** APPELS ********************

    fn call_value(&mut self, argc: usize) -> Result<(), InterpretError> {
        match self.peek(argc)? {
            Value::Fun(function) => self.call_function(function, argc),
            _ => Err(self.runtime_error("Can only call functions.")),
        }
    }

    fn call_function(&mut self, function: Rc<LoxFunction>, argc: usize) -> Result<(), InterpretError> {
        if argc != usize::from(function.arity) {
            let message =
                format!("Expected {} arguments but got {}.", function.arity, argc);
            return Err(self.runtime_error(message));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        // Slot 0 de la frame = le callee ; les arguments sont déjà en place.
        let slot_base = self.stack.len() - argc - 1;
        self.frames.push(CallFrame { function, ip: 0, slot_base });
        Ok(())
    }

    // ******************** DISPATCH ********************

    /// (num, num) → valeur, sinon erreur. Les deux opérandes sont vérifiés
    /// avant d'être dépilés.
    fn binary_number<F>(&mut self, op: F) -> Result<(), InterpretError>
    where
        F: FnOnce(f64, f64) -> Value,
    {
        let (Value::Number(b), Value::Number(a)) = (self.peek(0)?, self.peek(1)?) else {
            return Err(self.runtime_error("Operands must be numbers"));
        };
        self.pop()?;
        self.pop()?;
        self.push(op(a, b));
        Ok(())
    }

    fn trace_instruction(&mut self) {
        let mut cells = String::from("          ");
        for value in &self.stack {
            let _ = write!(cells, "[ {value} ]");
        }
        eprintln!("{cells}");
        if let Some(frame) = self.frames.last() {
            let (listing, _) = disassemble_instruction(&frame.function.chunk, frame.ip);
            eprintln!("{listing}");
        }
    }

    fn run(&mut self) -> Result<(), InterpretError> {
        loop {
            if self.trace {
                self.trace_instruction();
            }

            let byte = self.read_byte();
            let op = match OpCode::try_from(byte) {
                Ok(op) => op,
                Err(unknown) => {
                    return Err(self.runtime_error(format!("unknown opcode {unknown}")));
                }
            };

            match op {
                OpCode::Constant => {
                    let value = self.read_constant(false)?;
                    self.push(value);
                }
                OpCode::ConstantLong => {
                    let value = self.read_constant(true)?;
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),

                OpCode::Pop => {
                    self.pop()?;
                }

                OpCode::GetLocal => {
                    let slot = usize::from(self.read_byte());
                    let value = self.stack[self.frame().slot_base + slot].clone();
                    self.push(value);
                }
                OpCode::SetLocal => {
                    let slot = usize::from(self.read_byte());
                    let value = self.peek(0)?;
                    let base = self.frame().slot_base;
                    self.stack[base + slot] = value;
                }

                OpCode::GetGlobal => {
                    let name = self.read_string(false)?;
                    match self.globals.get(&name) {
                        Some(value) => self.push(value),
                        None => {
                            let message = format!("Undefined variable '{}'.", name.chars());
                            return Err(self.runtime_error(message));
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    // Redéfinir une globale est permis.
                    let name = self.read_string(false)?;
                    let value = self.peek(0)?;
                    self.globals.set(name, value);
                    self.pop()?;
                }
                OpCode::SetGlobal => {
                    let name = self.read_string(false)?;
                    let value = self.peek(0)?;
                    if self.globals.set(name.clone(), value) {
                        // Nouvelle clé = la globale n'existait pas.
                        // L'insertion est annulée avant de signaler.
                        self.globals.delete(&name);
                        let message = format!("Undefined variable '{}'.", name.chars());
                        return Err(self.runtime_error(message));
                    }
                }

                OpCode::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(a == b));
                }
                OpCode::SwitchEqual => {
                    // Equal qui laisse le discriminant en place.
                    let b = self.pop()?;
                    let a = self.peek(0)?;
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.binary_number(|a, b| Value::Bool(a > b))?,
                OpCode::Less => self.binary_number(|a, b| Value::Bool(a < b))?,

                OpCode::Add => match (self.peek(0)?, self.peek(1)?) {
                    (Value::Str(b), Value::Str(a)) => {
                        self.pop()?;
                        self.pop()?;
                        let result = self.strings.concat(&a, &b);
                        self.push(Value::Str(result));
                    }
                    (Value::Number(b), Value::Number(a)) => {
                        self.pop()?;
                        self.pop()?;
                        self.push(Value::Number(a + b));
                    }
                    _ => return Err(self.runtime_error("Operands must be numbers")),
                },
                OpCode::Subtract => self.binary_number(|a, b| Value::Number(a - b))?,
                OpCode::Multiply => self.binary_number(|a, b| Value::Number(a * b))?,
                // La division par zéro suit IEEE-754 : inf/nan, pas d'erreur.
                OpCode::Divide => self.binary_number(|a, b| Value::Number(a / b))?,

                OpCode::Not => {
                    let value = self.pop()?;
                    self.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => match self.peek(0)? {
                    Value::Number(n) => {
                        self.pop()?;
                        self.push(Value::Number(-n));
                    }
                    _ => return Err(self.runtime_error("Operand must be a number")),
                },

                OpCode::Print => {
                    let value = self.pop()?;
                    self.host.print_line(&value.to_string());
                }

                OpCode::Jump => {
                    let offset = self.read_u16();
                    self.frame_mut().ip += offset;
                }
                OpCode::JumpIfFalse => {
                    // Ne pop pas : chaque site de contrôle équilibre lui-même.
                    let offset = self.read_u16();
                    if self.peek(0)?.is_falsey() {
                        self.frame_mut().ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16();
                    self.frame_mut().ip -= offset;
                }

                OpCode::Call => {
                    let argc = usize::from(self.read_byte());
                    self.call_value(argc)?;
                }
                OpCode::Return => {
                    let result = self.pop()?;
                    let frame = match self.frames.pop() {
                        Some(frame) => frame,
                        None => return Err(self.runtime_error("call stack underflow")),
                    };
                    if self.frames.is_empty() {
                        // Fin du script : il reste la fonction script elle-même.
                        self.pop()?;
                        return Ok(());
                    }
                    self.stack.truncate(frame.slot_base);
                    self.push(result);
                }
            }
        }
    }
}

/* ------------------------------- Tests ------------------------------- */
