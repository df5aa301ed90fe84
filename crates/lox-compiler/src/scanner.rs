//! scanner.rs — Lexer à la demande pour Lox.
//!
//! Modèle *pull* : le compilateur demande les tokens un par un, le flux
//! complet n'est jamais matérialisé. Munch maximal, un caractère de
//! lookahead (plus un `peek_next` pour `.` fractionnaire et `//`).
//!
//! Le scanner n'alloue pas : chaque token porte une tranche du buffer
//! source et un numéro de ligne. Le buffer doit survivre à tous les tokens.

/// Nature d'un token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Ponctuation à un caractère
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Colon,
    Slash,
    Star,
    // Un ou deux caractères
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    // Littéraux
    Identifier,
    String,
    Number,
    // Mots-clés
    And,
    Case,
    Class,
    Default,
    Else,
    False,
    For,
    Fun,
    If,
    Nil,
    Or,
    Print,
    Return,
    Super,
    Switch,
    This,
    True,
    Var,
    While,
    // Spéciaux
    Error,
    Eof,
}

/// Un token : tranche empruntée au source + ligne. Pour `Error`, le lexème
/// est le message.
#[derive(Debug, Clone, Copy)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub lexeme: &'src str,
    pub line: u32,
}

impl Token<'_> {
    /// Token de départ, avant le premier `advance` du parser.
    pub fn synthetic() -> Self {
        Self { kind: TokenKind::Eof, lexeme: "", line: 0 }
    }
}

pub struct Scanner<'src> {
    source: &'src str,
    start: usize,
    current: usize,
    line: u32,
}

fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

fn is_alpha(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Self { source, start: 0, current: 0, line: 1 }
    }

    /// Le prochain token. En fin de source, `Eof` (répété si redemandé).
    pub fn scan_token(&mut self) -> Token<'src> {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();
        if is_digit(c) {
            return self.number();
        }
        if is_alpha(c) {
            return self.identifier();
        }

        match c {
            b'(' => self.make_token(TokenKind::LeftParen),
            b')' => self.make_token(TokenKind::RightParen),
            b'{' => self.make_token(TokenKind::LeftBrace),
            b'}' => self.make_token(TokenKind::RightBrace),
            b',' => self.make_token(TokenKind::Comma),
            b'.' => self.make_token(TokenKind::Dot),
            b'-' => self.make_token(TokenKind::Minus),
            b'+' => self.make_token(TokenKind::Plus),
            b';' => self.make_token(TokenKind::Semicolon),
            b':' => self.make_token(TokenKind::Colon),
            b'/' => self.make_token(TokenKind::Slash),
            b'*' => self.make_token(TokenKind::Star),
            b'!' => {
                let kind = if self.match_byte(b'=') { TokenKind::BangEqual } else { TokenKind::Bang };
                self.make_token(kind)
            }
            b'=' => {
                let kind = if self.match_byte(b'=') { TokenKind::EqualEqual } else { TokenKind::Equal };
                self.make_token(kind)
            }
            b'<' => {
                let kind = if self.match_byte(b'=') { TokenKind::LessEqual } else { TokenKind::Less };
                self.make_token(kind)
            }
            b'>' => {
                let kind =
                    if self.match_byte(b'=') { TokenKind::GreaterEqual } else { TokenKind::Greater };
                self.make_token(kind)
            }
            b'"' => self.string(),
            _ => self.error_token("Unexpected character."),
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' => {
                    self.current += 1;
                }
                b'\n' => {
                    self.line += 1;
                    self.current += 1;
                }
                b'/' if self.peek_next() == b'/' => {
                    // Commentaire ligne : jusqu'au \n exclu.
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.current += 1;
                    }
                }
                _ => return,
            }
        }
    }

    fn number(&mut self) -> Token<'src> {
        while is_digit(self.peek()) {
            self.current += 1;
        }

        // Partie fractionnaire : un '.' suivi d'au moins un chiffre.
        if self.peek() == b'.' && is_digit(self.peek_next()) {
            self.current += 1;
            while is_digit(self.peek()) {
                self.current += 1;
            }
        }

        self.make_token(TokenKind::Number)
    }

    fn identifier(&mut self) -> Token<'src> {
        while is_alpha(self.peek()) || is_digit(self.peek()) {
            self.current += 1;
        }
        self.make_token(self.identifier_kind())
    }

    /// Classement mot-clé / identifiant, en forme de trie sur le premier
    /// caractère.
    fn identifier_kind(&self) -> TokenKind {
        let lexeme = &self.source.as_bytes()[self.start..self.current];
        match lexeme[0] {
            b'a' => self.check_keyword(1, "nd", TokenKind::And),
            b'c' => match lexeme.get(1) {
                Some(b'a') => self.check_keyword(2, "se", TokenKind::Case),
                Some(b'l') => self.check_keyword(2, "ass", TokenKind::Class),
                _ => TokenKind::Identifier,
            },
            b'd' => self.check_keyword(1, "efault", TokenKind::Default),
            b'e' => self.check_keyword(1, "lse", TokenKind::Else),
            b'f' => match lexeme.get(1) {
                Some(b'a') => self.check_keyword(2, "lse", TokenKind::False),
                Some(b'o') => self.check_keyword(2, "r", TokenKind::For),
                Some(b'u') => self.check_keyword(2, "n", TokenKind::Fun),
                _ => TokenKind::Identifier,
            },
            b'i' => self.check_keyword(1, "f", TokenKind::If),
            b'n' => self.check_keyword(1, "il", TokenKind::Nil),
            b'o' => self.check_keyword(1, "r", TokenKind::Or),
            b'p' => self.check_keyword(1, "rint", TokenKind::Print),
            b'r' => self.check_keyword(1, "eturn", TokenKind::Return),
            b's' => match lexeme.get(1) {
                Some(b'u') => self.check_keyword(2, "per", TokenKind::Super),
                Some(b'w') => self.check_keyword(2, "itch", TokenKind::Switch),
                _ => TokenKind::Identifier,
            },
            b't' => match lexeme.get(1) {
                Some(b'h') => self.check_keyword(2, "is", TokenKind::This),
                Some(b'r') => self.check_keyword(2, "ue", TokenKind::True),
                _ => TokenKind::Identifier,
            },
            b'v' => self.check_keyword(1, "ar", TokenKind::Var),
            b'w' => self.check_keyword(1, "hile", TokenKind::While),
            _ => TokenKind::Identifier,
        }
    }

    fn check_keyword(&self, offset: usize, rest: &str, kind: TokenKind) -> TokenKind {
        if &self.source[self.start + offset..self.current] == rest {
            kind
        } else {
            TokenKind::Identifier
        }
    }

    fn string(&mut self) -> Token<'src> {
        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.current += 1;
        }

        if self.is_at_end() {
            return self.error_token("Unterminated string.");
        }

        // Le guillemet fermant.
        self.current += 1;
        self.make_token(TokenKind::String)
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> u8 {
        let c = self.source.as_bytes()[self.current];
        self.current += 1;
        c
    }

    fn peek(&self) -> u8 {
        *self.source.as_bytes().get(self.current).unwrap_or(&0)
    }

    fn peek_next(&self) -> u8 {
        *self.source.as_bytes().get(self.current + 1).unwrap_or(&0)
    }

    fn match_byte(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.source.as_bytes()[self.current] != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn make_token(&self, kind: TokenKind) -> Token<'src> {
        Token { kind, lexeme: &self.source[self.start..self.current], line: self.line }
    }

    fn error_token(&self, message: &'static str) -> Token<'src> {
        Token { kind: TokenKind::Error, lexeme: message, line: self.line }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source);
        let mut out = Vec::new();
        loop {
            let token = scanner.scan_token();
            let eof = token.kind == TokenKind::Eof;
            out.push(token.kind);
            if eof {
                break;
            }
        }
        out
    }

    #[test]
    fn punctuation_and_maximal_munch() {
        use TokenKind::*;
        assert_eq!(kinds("!= ! == = <= < >= >"), vec![
            BangEqual, Bang, EqualEqual, Equal, LessEqual, Less, GreaterEqual, Greater, Eof
        ]);
    }

    #[test]
    fn keywords_and_identifiers() {
        use TokenKind::*;
        assert_eq!(kinds("var x = fun;"), vec![Var, Identifier, Equal, Fun, Semicolon, Eof]);
        assert_eq!(kinds("switch case default"), vec![Switch, Case, Default, Eof]);
        // Préfixes de mots-clés : identifiants.
        assert_eq!(kinds("vars fo classy"), vec![Identifier, Identifier, Identifier, Eof]);
    }

    #[test]
    fn numbers() {
        use TokenKind::*;
        assert_eq!(kinds("12 12.5 12."), vec![Number, Number, Number, Dot, Eof]);
        let mut scanner = Scanner::new("3.25");
        let token = scanner.scan_token();
        assert_eq!(token.lexeme, "3.25");
    }

    #[test]
    fn strings_track_lines() {
        let mut scanner = Scanner::new("\"a\nb\" x");
        let s = scanner.scan_token();
        assert_eq!(s.kind, TokenKind::String);
        assert_eq!(s.lexeme, "\"a\nb\"");
        assert_eq!(s.line, 2);
        let x = scanner.scan_token();
        assert_eq!(x.line, 2);
    }

    #[test]
    fn comments_are_skipped() {
        use TokenKind::*;
        assert_eq!(kinds("1 // deux trois\n2"), vec![Number, Number, Eof]);
    }

    #[test]
    fn error_tokens() {
        let mut scanner = Scanner::new("\"ouverte");
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(token.lexeme, "Unterminated string.");

        let mut scanner = Scanner::new("@");
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(token.lexeme, "Unexpected character.");
    }

    #[test]
    fn lexemes_borrow_the_source() {
        let source = String::from("abc + def");
        let mut scanner = Scanner::new(&source);
        let a = scanner.scan_token();
        assert_eq!(a.lexeme, "abc");
        // La tranche pointe dans le buffer d'origine.
        assert_eq!(a.lexeme.as_ptr(), source.as_ptr());
    }
}
