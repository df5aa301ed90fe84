//! lox-compiler — Frontend du langage Lox
//!
//! Compilateur **single-pass** : un parser Pratt qui émet le bytecode
//! directement dans le chunk de la fonction en cours, sans AST.
//!
//! Contenu :
//!  - Gestion d'erreurs (mode panique + resynchronisation aux frontières
//!    d'instructions)
//!  - Table de règles prefix/infix par type de token — des *données*
//!    (tags + précédence) dispatchées par `match`, pas des pointeurs de
//!    fonction
//!  - Résolution lexicale à la volée : miroir de pile des locales
//!    (256 max), profondeur -1 = "déclarée mais pas initialisée"
//!  - Patch des sauts avant (placeholders 16 bits big-endian)
//!  - Fonctions imbriquées : un état de compilation par `fun`, slot 0 de
//!    chaque frame réservé au callee
//!
//! API publique : [`compile`] — source → fonction script (arité 0, anonyme).
//! Les erreurs de parse partent sur stderr au fil de l'eau
//! (`[line N] Error at 'x': message`) ; l'appelant refuse d'exécuter si
//! `compile` retourne `Err`.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

pub mod scanner;

use std::rc::Rc;

use thiserror::Error;

use lox_core::bytecode::disasm::disassemble_chunk;
use lox_core::bytecode::{Chunk, OpCode};
use lox_core::table::Interner;
use lox_core::value::{LoxFunction, Value};

use crate::scanner::{Scanner, Token, TokenKind};

/// --------- API PUBLIQUE ---------

/// Compile un source Lox en fonction script. L'interneur est celui de la VM :
/// les littéraux chaîne et les noms de globales sont internés dès la
/// compilation, le pool de constantes et l'exécution partagent les mêmes
/// objets.
pub fn compile(source: &str, interner: &mut Interner) -> Result<LoxFunction, CompileError> {
    log::debug!("compilation ({} octets de source)", source.len());

    let mut compiler = Compiler::new(source, interner);
    compiler.advance();
    while !compiler.match_kind(TokenKind::Eof) {
        compiler.declaration();
    }
    let function = compiler.end_compiler();

    if compiler.parser.had_error {
        Err(CompileError { errors: compiler.parser.errors })
    } else {
        Ok(function)
    }
}

/// --------- ERREURS ---------

/// La compilation a rencontré au moins une erreur de syntaxe. Le détail est
/// déjà parti sur stderr ; ne reste que le compte.
#[derive(Debug, Error)]
#[error("la compilation a échoué ({errors} erreur(s))")]
pub struct CompileError {
    pub errors: usize,
}

/// --------- PRÉCÉDENCES & RÈGLES ---------

/// Niveaux de précédence, du plus faible au plus fort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // ()
    Primary,
}

impl Precedence {
    /// Le niveau juste au-dessus (pour l'associativité gauche des binaires).
    const fn one_higher(self) -> Self {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

/// Règle préfixe d'un token. `None` = pas d'expression possible ici.
#[derive(Debug, Clone, Copy)]
enum Prefix {
    None,
    Grouping,
    Unary,
    Number,
    String,
    Literal,
    Variable,
}

/// Règle infixe d'un token.
#[derive(Debug, Clone, Copy)]
enum Infix {
    None,
    Binary,
    And,
    Or,
    Call,
}

struct Rule {
    prefix: Prefix,
    infix: Infix,
    precedence: Precedence,
}

const fn rule_for(kind: TokenKind) -> Rule {
    use Precedence as P;
    use TokenKind as T;

    const fn rule(prefix: Prefix, infix: Infix, precedence: Precedence) -> Rule {
        Rule { prefix, infix, precedence }
    }

    match kind {
        T::LeftParen => rule(Prefix::Grouping, Infix::Call, P::Call),
        T::Minus => rule(Prefix::Unary, Infix::Binary, P::Term),
        T::Plus => rule(Prefix::None, Infix::Binary, P::Term),
        T::Slash | T::Star => rule(Prefix::None, Infix::Binary, P::Factor),
        T::Bang => rule(Prefix::Unary, Infix::None, P::None),
        T::BangEqual | T::EqualEqual => rule(Prefix::None, Infix::Binary, P::Equality),
        T::Greater | T::GreaterEqual | T::Less | T::LessEqual => {
            rule(Prefix::None, Infix::Binary, P::Comparison)
        }
        T::Identifier => rule(Prefix::Variable, Infix::None, P::None),
        T::String => rule(Prefix::String, Infix::None, P::None),
        T::Number => rule(Prefix::Number, Infix::None, P::None),
        T::And => rule(Prefix::None, Infix::And, P::And),
        T::Or => rule(Prefix::None, Infix::Or, P::Or),
        T::False | T::Nil | T::True => rule(Prefix::Literal, Infix::None, P::None),
        _ => rule(Prefix::None, Infix::None, P::None),
    }
}

/// --------- ÉTAT DU COMPILATEUR ---------

/// Nombre max de locales par fonction : les slots tiennent sur un octet.
const MAX_LOCALS: usize = 256;
/// Nombre max de cas dans un `switch`.
const MAX_SWITCH_CASES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
}

/// Une locale dans le miroir de pile. `depth == -1` : déclarée mais pas
/// encore initialisée (rejette `var x = x;`).
struct Local<'src> {
    name: &'src str,
    depth: i32,
}

/// État de compilation d'une fonction. Les `fun` imbriqués empilent un
/// nouvel état ; le script top-level est le fond de pile.
struct FnCompiler<'src> {
    function: LoxFunction,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    scope_depth: i32,
}

impl<'src> FnCompiler<'src> {
    fn new(kind: FunctionKind, name: Option<Rc<lox_core::value::LoxStr>>) -> Self {
        let mut locals = Vec::with_capacity(8);
        // Slot 0 : réservé au callee lui-même.
        locals.push(Local { name: "", depth: 0 });
        Self { function: LoxFunction::new(name), kind, locals, scope_depth: 0 }
    }
}

struct Parser<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: usize,
}

struct Compiler<'src, 'i> {
    parser: Parser<'src>,
    compilers: Vec<FnCompiler<'src>>,
    interner: &'i mut Interner,
}

impl<'src, 'i> Compiler<'src, 'i> {
    fn new(source: &'src str, interner: &'i mut Interner) -> Self {
        Self {
            parser: Parser {
                scanner: Scanner::new(source),
                current: Token::synthetic(),
                previous: Token::synthetic(),
                had_error: false,
                panic_mode: false,
                errors: 0,
            },
            compilers: vec![FnCompiler::new(FunctionKind::Script, None)],
            interner,
        }
    }

    // ---- accès à l'état courant ----

    fn current(&self) -> &FnCompiler<'src> {
        // Invariant : la pile contient toujours au moins le script.
        &self.compilers[self.compilers.len() - 1]
    }

    fn current_mut(&mut self) -> &mut FnCompiler<'src> {
        let top = self.compilers.len() - 1;
        &mut self.compilers[top]
    }

    fn chunk(&self) -> &Chunk {
        &self.current().function.chunk
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.current_mut().function.chunk
    }

    // ******************** ERREURS ********************

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        // En mode panique, les erreurs suivantes sont avalées jusqu'à la
        // resynchronisation.
        if self.parser.panic_mode {
            return;
        }
        self.parser.panic_mode = true;

        eprint!("[line {}] Error", token.line);
        match token.kind {
            TokenKind::Eof => eprint!(" at end"),
            TokenKind::Error => {}
            _ => eprint!(" at '{}'", token.lexeme),
        }
        eprintln!(": {message}");

        self.parser.had_error = true;
        self.parser.errors += 1;
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.parser.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.parser.current, message);
    }

    fn synchronize(&mut self) {
        self.parser.panic_mode = false;

        while self.parser.current.kind != TokenKind::Eof {
            if self.parser.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.parser.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ******************** PARSER ********************

    fn advance(&mut self) {
        self.parser.previous = self.parser.current;

        loop {
            self.parser.current = self.parser.scanner.scan_token();
            if self.parser.current.kind != TokenKind::Error {
                break;
            }
            let token = self.parser.current;
            self.error_at(token, token.lexeme);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.parser.current.kind == kind
    }

    fn match_kind(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.parser.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    // ---- émission ----

    fn emit_byte(&mut self, byte: u8) {
        let line = self.parser.previous.line;
        self.chunk_mut().write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_ops(&mut self, first: OpCode, second: OpCode) {
        self.emit_op(first);
        self.emit_op(second);
    }

    fn emit_return(&mut self) {
        self.emit_op(OpCode::Nil);
        self.emit_op(OpCode::Return);
    }

    fn emit_constant(&mut self, value: Value) {
        let line = self.parser.previous.line;
        self.chunk_mut().write_constant(value, line);
    }

    /// Ajoute une constante dont l'index doit tenir sur un octet (opérandes
    /// de nom pour les globales, fonctions).
    fn make_constant(&mut self, value: Value) -> u8 {
        let idx = self.chunk_mut().add_constant(value);
        if idx > u32::from(u8::MAX) {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        idx as u8
    }

    /// Émet un saut avant avec placeholder 16 bits ; retourne l'offset de
    /// l'opérande, à passer à `patch_jump`.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xFF);
        self.emit_byte(0xFF);
        self.chunk().len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        // -2 : l'opérande lui-même est sauté par la lecture.
        let jump = self.chunk().len() - offset - 2;
        if jump > usize::from(u16::MAX) {
            self.error("Too much code to jump over.");
        }
        self.chunk_mut().patch_u16(offset, jump as u16);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);

        // +2 : l'opérande de Loop est lu avant que l'ip recule.
        let offset = self.chunk().len() - loop_start + 2;
        if offset > usize::from(u16::MAX) {
            self.error("Loop body too large.");
        }

        self.emit_byte((offset >> 8) as u8);
        self.emit_byte(offset as u8);
    }

    fn end_compiler(&mut self) -> LoxFunction {
        self.emit_return();
        let done = self.compilers.pop().expect("compiler stack non vide");
        if !self.parser.had_error && log::log_enabled!(log::Level::Debug) {
            log::debug!("\n{}", disassemble_chunk(&done.function.chunk, &done.function.to_string()));
        }
        done.function
    }

    // ******************** PORTÉES & VARIABLES ********************

    fn begin_scope(&mut self) {
        self.current_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current_mut().scope_depth -= 1;

        // Dépile les locales de la profondeur qu'on quitte : un Pop par
        // locale, la pile d'opérandes retrouve sa taille d'entrée de bloc.
        loop {
            let done = {
                let fun = self.current();
                match fun.locals.last() {
                    Some(local) => local.depth <= fun.scope_depth,
                    None => true,
                }
            };
            if done {
                break;
            }
            self.emit_op(OpCode::Pop);
            self.current_mut().locals.pop();
        }
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let interned = self.interner.intern(name);
        self.make_constant(Value::Str(interned))
    }

    /// Cherche `name` dans les locales du compilateur courant, de la plus
    /// récente à la plus ancienne. `None` : c'est une globale.
    fn resolve_local(&mut self, name: &str) -> Option<u8> {
        let mut found = None;
        for (i, local) in self.current().locals.iter().enumerate().rev() {
            if local.name == name {
                found = Some((i as u8, local.depth == -1));
                break;
            }
        }
        match found {
            Some((slot, uninitialized)) => {
                if uninitialized {
                    self.error("Can't read local variable in its own initializer.");
                }
                Some(slot)
            }
            None => None,
        }
    }

    fn add_local(&mut self, name: &'src str) {
        if self.current().locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.current_mut().locals.push(Local { name, depth: -1 });
    }

    fn declare_variable(&mut self) {
        if self.current().scope_depth == 0 {
            return;
        }

        let name = self.parser.previous.lexeme;

        // Deux variables du même nom à la même profondeur : erreur.
        let mut duplicate = false;
        {
            let fun = self.current();
            for local in fun.locals.iter().rev() {
                if local.depth != -1 && local.depth < fun.scope_depth {
                    break;
                }
                if local.name == name {
                    duplicate = true;
                    break;
                }
            }
        }
        if duplicate {
            self.error("Already a variable in this scope.");
        }

        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);

        self.declare_variable();
        if self.current().scope_depth > 0 {
            return 0;
        }

        let name = self.parser.previous.lexeme;
        self.identifier_constant(name)
    }

    fn mark_initialized(&mut self) {
        let depth = self.current().scope_depth;
        if depth == 0 {
            return;
        }
        if let Some(local) = self.current_mut().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        // Une locale est déjà sur la pile après son initialiseur : la
        // valeur *est* la variable, aucun opcode à émettre.
        if self.current().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op(OpCode::DefineGlobal);
        self.emit_byte(global);
    }

    // ******************** DÉCLARATIONS & INSTRUCTIONS ********************

    fn declaration(&mut self) {
        if self.match_kind(TokenKind::Var) {
            self.var_declaration();
        } else if self.match_kind(TokenKind::Fun) {
            self.fun_declaration();
        } else {
            self.statement();
        }

        if self.parser.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.match_kind(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }

        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration");

        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // Le nom est utilisable dans le corps : la récursion directe marche.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    /// Compile un corps de fonction dans un état imbriqué, puis émet la
    /// fonction comme constante dans le chunk englobant.
    fn function(&mut self, kind: FunctionKind) {
        let name = self.interner.intern(self.parser.previous.lexeme);
        self.compilers.push(FnCompiler::new(kind, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let overflow = {
                    let fun = self.current_mut();
                    if fun.function.arity == u8::MAX {
                        true
                    } else {
                        fun.function.arity += 1;
                        false
                    }
                };
                if overflow {
                    self.error_at_current("Can't have more than 255 parameters.");
                }

                let param = self.parse_variable("Expect parameter name.");
                self.define_variable(param);

                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        // Pas de end_scope : Return tronque la fenêtre de pile de la frame.
        let function = self.end_compiler();
        self.emit_constant(Value::Fun(Rc::new(function)));
    }

    fn statement(&mut self) {
        if self.match_kind(TokenKind::Print) {
            self.print_statement();
        } else if self.match_kind(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else if self.match_kind(TokenKind::If) {
            self.if_statement();
        } else if self.match_kind(TokenKind::While) {
            self.while_statement();
        } else if self.match_kind(TokenKind::For) {
            self.for_statement();
        } else if self.match_kind(TokenKind::Switch) {
            self.switch_statement();
        } else if self.match_kind(TokenKind::Return) {
            self.return_statement();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after if.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after if condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop); // condition, branche prise
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop); // condition, branche sautée

        if self.match_kind(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().len();
        self.consume(TokenKind::LeftParen, "Expect '(' after while.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after while condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after for.");

        if self.match_kind(TokenKind::Semicolon) {
            // Pas d'initialisation.
        } else if self.match_kind(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk().len();
        let mut exit_jump = None;
        if !self.match_kind(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';'.");

            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_kind(TokenKind::RightParen) {
            // L'incrément s'exécute *après* le corps : on saute par-dessus,
            // le corps boucle vers lui, lui reboucle vers la condition.
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk().len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for condition.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }

    /// Un cas de `switch` : valeur, comparaison non destructive du
    /// discriminant, corps, saut vers la fin commune. Retourne l'offset du
    /// saut de fin à patcher.
    fn case_statement(&mut self) -> usize {
        self.consume(TokenKind::Case, "Expect 'case' for switch");
        self.expression();
        self.consume(TokenKind::Colon, "Expect ':' after case expression.");
        self.emit_op(OpCode::SwitchEqual);
        let next = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop); // résultat de la comparaison, cas retenu

        while !self.check(TokenKind::Case)
            && !self.check(TokenKind::Default)
            && !self.check(TokenKind::RightBrace)
            && !self.check(TokenKind::Eof)
        {
            self.statement();
        }
        let end = self.emit_jump(OpCode::Jump);
        self.patch_jump(next);
        self.emit_op(OpCode::Pop); // résultat de la comparaison, cas suivant
        end
    }

    /// Le cas `default` : pas de garde, corps jusqu'à `}`.
    fn default_statement(&mut self) -> usize {
        self.advance(); // 'default'
        self.consume(TokenKind::Colon, "Expect ':' after case expression.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.statement();
        }
        self.emit_jump(OpCode::Jump)
    }

    fn switch_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after switch.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after switch condition.");

        self.consume(TokenKind::LeftBrace, "Expect '{' after switch condition.");

        let mut case_ends: Vec<usize> = Vec::new();
        while !self.check(TokenKind::RightBrace)
            && !self.check(TokenKind::Default)
            && !self.check(TokenKind::Eof)
        {
            if case_ends.len() == MAX_SWITCH_CASES {
                self.error_at_current("Too many cases in switch statement.");
            }
            case_ends.push(self.case_statement());
        }

        if self.check(TokenKind::Default) {
            case_ends.push(self.default_statement());
        }

        self.consume(TokenKind::RightBrace, "Expect '}' after switch cases.");

        for end in case_ends {
            self.patch_jump(end);
        }

        self.emit_op(OpCode::Pop); // le discriminant
    }

    fn return_statement(&mut self) {
        if self.current().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_kind(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    // ******************** EXPRESSIONS ********************

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = rule_for(self.parser.previous.kind).prefix;
        if matches!(prefix, Prefix::None) {
            self.error("Expect expression");
            return;
        }

        let can_assign = precedence <= Precedence::Assignment;
        self.run_prefix(prefix, can_assign);

        while precedence <= rule_for(self.parser.current.kind).precedence {
            self.advance();
            let infix = rule_for(self.parser.previous.kind).infix;
            self.run_infix(infix);
        }

        if can_assign && self.match_kind(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn run_prefix(&mut self, prefix: Prefix, can_assign: bool) {
        match prefix {
            Prefix::Grouping => self.grouping(),
            Prefix::Unary => self.unary(),
            Prefix::Number => self.number(),
            Prefix::String => self.string(),
            Prefix::Literal => self.literal(),
            Prefix::Variable => self.variable(can_assign),
            Prefix::None => {}
        }
    }

    fn run_infix(&mut self, infix: Infix) {
        match infix {
            Infix::Binary => self.binary(),
            Infix::And => self.and_op(),
            Infix::Or => self.or_op(),
            Infix::Call => self.call(),
            Infix::None => {}
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self) {
        // Le scanner garantit un littéral valide.
        let value: f64 = self.parser.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self) {
        let lexeme = self.parser.previous.lexeme;
        // Sans les guillemets ; les octets sont préservés tels quels.
        let interned = self.interner.intern(&lexeme[1..lexeme.len() - 1]);
        self.emit_constant(Value::Str(interned));
    }

    fn literal(&mut self) {
        match self.parser.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => {}
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.parser.previous.lexeme;
        self.named_variable(name, can_assign);
    }

    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let (get_op, set_op, arg) = match self.resolve_local(name) {
            Some(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot),
            None => (OpCode::GetGlobal, OpCode::SetGlobal, self.identifier_constant(name)),
        };

        if can_assign && self.match_kind(TokenKind::Equal) {
            self.expression();
            self.emit_op(set_op);
            self.emit_byte(arg);
        } else {
            self.emit_op(get_op);
            self.emit_byte(arg);
        }
    }

    fn unary(&mut self) {
        let operator = self.parser.previous.kind;

        // L'opérande d'abord.
        self.parse_precedence(Precedence::Unary);

        match operator {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => {}
        }
    }

    fn binary(&mut self) {
        let operator = self.parser.previous.kind;
        let rule = rule_for(operator);
        self.parse_precedence(rule.precedence.one_higher());

        match operator {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::BangEqual => self.emit_ops(OpCode::Equal, OpCode::Not),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => self.emit_ops(OpCode::Less, OpCode::Not),
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => self.emit_ops(OpCode::Greater, OpCode::Not),
            _ => {}
        }
    }

    /// `and` court-circuite : si la gauche est falsy elle *reste* comme
    /// résultat de l'expression, sinon elle est dépilée et la droite prend
    /// sa place.
    fn and_op(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_op(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);

        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self) {
        let argc = self.argument_list();
        self.emit_op(OpCode::Call);
        self.emit_byte(argc);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == usize::from(u8::MAX) {
                    self.error("Can't have more than 255 arguments.");
                } else {
                    count += 1;
                }
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count as u8
    }
}

/* ------------------------------- Tests ------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;
    use lox_core::bytecode::ops::OpCode;

    fn compile_ok(source: &str) -> LoxFunction {
        let mut interner = Interner::new();
        compile(source, &mut interner).expect("compilation sans erreur")
    }

    fn compile_err(source: &str) -> CompileError {
        let mut interner = Interner::new();
        compile(source, &mut interner).expect_err("erreur attendue")
    }

    #[test]
    fn arithmetic_precedence_bytecode() {
        let function = compile_ok("print 1 + 2 * 3;");
        let code = &function.chunk.code;
        // 1, 2, 3 chargés puis Multiply avant Add : le Pratt respecte la
        // précédence sans parenthèses.
        let expected = [
            OpCode::Constant as u8, 0,
            OpCode::Constant as u8, 1,
            OpCode::Constant as u8, 2,
            OpCode::Multiply as u8,
            OpCode::Add as u8,
            OpCode::Print as u8,
            OpCode::Nil as u8,
            OpCode::Return as u8,
        ];
        assert_eq!(code.as_slice(), expected);
    }

    #[test]
    fn local_slots_and_scope_pops() {
        let function = compile_ok("{ var a = 1; var b = 2; print a; }");
        let code = &function.chunk.code;
        // `print a` lit le slot 1 (le slot 0 est le callee, les locales
        // vivent sur la pile) ; la sortie de bloc dépile les deux locales.
        assert!(code.windows(2).any(|w| w == [OpCode::GetLocal as u8, 1]));
        let tail = &code[code.len() - 4..];
        assert_eq!(tail, [
            OpCode::Pop as u8,
            OpCode::Pop as u8,
            OpCode::Nil as u8,
            OpCode::Return as u8
        ]);
    }

    #[test]
    fn globals_go_through_the_constant_pool() {
        let function = compile_ok("var a = 1; print a;");
        let code = &function.chunk.code;
        assert!(code.contains(&(OpCode::DefineGlobal as u8)));
        assert!(code.contains(&(OpCode::GetGlobal as u8)));
        // Le nom n'est mis qu'une fois dans le pool (dé-dupe).
        let names = function
            .chunk
            .constants()
            .iter()
            .filter(|(_, v)| matches!(v, Value::Str(s) if s.chars() == "a"))
            .count();
        assert_eq!(names, 1);
    }

    #[test]
    fn jumps_are_patched_within_bounds() {
        let function =
            compile_ok("if (true) { print 1; } else { print 2; } while (false) { print 3; }");
        let code = &function.chunk.code;
        let mut offset = 0;
        while offset < code.len() {
            let op = OpCode::try_from(code[offset]).expect("opcode valide");
            match op {
                OpCode::Jump | OpCode::JumpIfFalse => {
                    let jump = usize::from(function.chunk.read_u16(offset + 1));
                    assert!(offset + 3 + jump <= code.len(), "saut avant hors limites");
                }
                OpCode::Loop => {
                    let jump = usize::from(function.chunk.read_u16(offset + 1));
                    assert!(jump <= offset + 3, "saut arrière hors limites");
                }
                _ => {}
            }
            offset += 1 + op.operand_width();
        }
    }

    #[test]
    fn functions_compile_into_the_pool() {
        let function = compile_ok("fun add(a, b) { return a + b; }");
        let inner = function
            .chunk
            .constants()
            .iter()
            .find_map(|(_, v)| match v {
                Value::Fun(f) => Some(f.clone()),
                _ => None,
            })
            .expect("fonction dans le pool");
        assert_eq!(inner.arity, 2);
        assert_eq!(inner.to_string(), "<fn add>");
        // Les paramètres sont des locales : slots 1 et 2 (0 = callee).
        let code = &inner.chunk.code;
        assert!(code.windows(2).any(|w| w == [OpCode::GetLocal as u8, 1]));
        assert!(code.windows(2).any(|w| w == [OpCode::GetLocal as u8, 2]));
    }

    #[test]
    fn switch_emits_switch_equal_per_case() {
        let function =
            compile_ok("switch (2) { case 1: print 1; case 2: print 2; default: print 0; }");
        // Décodage instruction par instruction : un garde SwitchEqual par
        // `case`, aucun pour `default`.
        let code = &function.chunk.code;
        let mut guards = 0;
        let mut offset = 0;
        while offset < code.len() {
            let op = OpCode::try_from(code[offset]).expect("opcode valide");
            if op == OpCode::SwitchEqual {
                guards += 1;
            }
            offset += 1 + op.operand_width();
        }
        assert_eq!(guards, 2);
    }

    #[test]
    fn self_referential_initializer_is_rejected() {
        compile_err("{ var x = x; }");
    }

    #[test]
    fn duplicate_local_is_rejected() {
        compile_err("{ var a = 1; var a = 2; }");
    }

    #[test]
    fn top_level_return_is_rejected() {
        compile_err("return 1;");
    }

    #[test]
    fn invalid_assignment_target_is_rejected() {
        compile_err("1 = 2;");
        compile_err("a + b = c;");
    }

    #[test]
    fn error_recovery_reports_multiple_statements() {
        let err = compile_err("print ; var = 1;");
        assert!(err.errors >= 2);
    }

    #[test]
    fn too_many_switch_cases() {
        let mut source = String::from("switch (0) { ");
        for i in 0..33 {
            source.push_str(&format!("case {i}: print {i}; "));
        }
        source.push('}');
        compile_err(&source);
    }
}
