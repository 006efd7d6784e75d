//! Lexer for the textual CG IR.
//!
//! The token set mirrors the printer: instruction mnemonics, condition
//! names, the structural keywords, registers (`%rN`/`%sp`/`%lr`/`%pc`
//! hardware, `%vN` virtual), block definitions (`bbN:`) and references
//! (`%bbN`), `#`-prefixed immediates, `@`-prefixed symbols, and bare
//! integers. Everything from `;;` to the end of the line is a comment.

use crate::error::{err, Location, ParseResult};
use mycc_codegen::cg::{reg, Cond, Opcode};

/// A lexical token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    /// An instruction mnemonic.
    Op(Opcode),
    /// The `branch` keyword.
    Branch,
    /// A condition name.
    CondTok(Cond),
    /// `define`.
    Define,
    /// `size`.
    Size,
    /// `align`.
    Align,
    /// `init`.
    Init,
    /// `{`.
    LBrace,
    /// `}`.
    RBrace,
    /// `,`.
    Comma,
    /// `=`.
    Assign,
    /// `[`.
    LBracket,
    /// `]`.
    RBracket,
    /// `(`.
    LParen,
    /// `)`.
    RParen,
    /// A register, virtual or hardware, by number.
    Reg(u32),
    /// `#`-prefixed immediate.
    Imm(u32),
    /// `@`-prefixed symbol.
    Sym(String),
    /// `bbN:` block definition.
    BbDef(u32),
    /// `%bbN` block reference.
    BbRef(u32),
    /// A bare integer.
    Int(u64),
    /// End of input.
    Eof,
}

pub struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn location(&self) -> Location {
        Location {
            line: self.line,
            column: self.column,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b';') if self.bytes.get(self.pos + 1) == Some(&b';') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn take_ident(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                s.push(c as char);
                self.bump();
            } else {
                break;
            }
        }
        s
    }

    fn take_number(&mut self) -> ParseResult<u64> {
        let loc = self.location();
        let digits = self.take_ident();
        let parsed = if let Some(hex) = digits.strip_prefix("0x") {
            u64::from_str_radix(hex, 16)
        } else {
            digits.parse::<u64>()
        };
        match parsed {
            Ok(v) => Ok(v),
            Err(_) => err(loc, format!("bad number `{}`", digits)),
        }
    }

    fn reg_from_name(&self, loc: Location, name: &str) -> ParseResult<Token> {
        if let Some(num) = name.strip_prefix('v') {
            if let Ok(n) = num.parse::<u32>() {
                if n >= reg::FIRST_VREG {
                    return Ok(Token::Reg(n));
                }
            }
        }
        if let Some(num) = name.strip_prefix("bb") {
            if let Ok(n) = num.parse::<u32>() {
                return Ok(Token::BbRef(n));
            }
        }
        for r in 0..reg::FIRST_VREG {
            if name == reg::name(r) {
                return Ok(Token::Reg(r));
            }
        }
        err(loc, format!("bad register `%{}`", name))
    }

    /// Produce the next token.
    pub fn next_token(&mut self) -> ParseResult<(Location, Token)> {
        self.skip_ws_and_comments();
        let loc = self.location();

        let c = match self.peek() {
            None => return Ok((loc, Token::Eof)),
            Some(c) => c,
        };

        let tok = match c {
            b'{' => {
                self.bump();
                Token::LBrace
            }
            b'}' => {
                self.bump();
                Token::RBrace
            }
            b',' => {
                self.bump();
                Token::Comma
            }
            b'=' => {
                self.bump();
                Token::Assign
            }
            b'[' => {
                self.bump();
                Token::LBracket
            }
            b']' => {
                self.bump();
                Token::RBracket
            }
            b'(' => {
                self.bump();
                Token::LParen
            }
            b')' => {
                self.bump();
                Token::RParen
            }
            b'%' => {
                self.bump();
                let name = self.take_ident();
                self.reg_from_name(loc, &name)?
            }
            b'#' => {
                self.bump();
                Token::Imm(self.take_number()? as u32)
            }
            b'@' => {
                self.bump();
                let name = self.take_ident();
                if name.is_empty() {
                    return err(loc, "empty symbol name");
                }
                Token::Sym(name)
            }
            b'0'..=b'9' => Token::Int(self.take_number()?),
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let ident = self.take_ident();
                // `bbN:` introduces a block.
                if let Some(num) = ident.strip_prefix("bb") {
                    if let Ok(n) = num.parse::<u32>() {
                        if self.peek() == Some(b':') {
                            self.bump();
                            return Ok((loc, Token::BbDef(n)));
                        }
                        return err(loc, format!("block label `{}` without `:`", ident));
                    }
                }
                keyword(&ident)
                    .ok_or(())
                    .or_else(|_| err(loc, format!("unknown word `{}`", ident)))?
            }
            c => return err(loc, format!("stray character `{}`", c as char)),
        };

        Ok((loc, tok))
    }
}

fn keyword(ident: &str) -> Option<Token> {
    use Opcode::*;
    let op = match ident {
        "mov" => Some(Mov),
        "add" => Some(Add),
        "sub" => Some(Sub),
        "mul" => Some(Mul),
        "and" => Some(And),
        "orr" => Some(Orr),
        "eor" => Some(Eor),
        "lsl" => Some(Lsl),
        "lsr" => Some(Lsr),
        "asr" => Some(Asr),
        "sxtb" => Some(Sxtb),
        "sxth" => Some(Sxth),
        "uxtb" => Some(Uxtb),
        "uxth" => Some(Uxth),
        "ldr" => Some(Ldr),
        "ldrh" => Some(Ldrh),
        "ldrb" => Some(Ldrb),
        "str" => Some(Str),
        "strh" => Some(Strh),
        "strb" => Some(Strb),
        "cmp" => Some(Cmp),
        "call" => Some(Call),
        "ret" => Some(Ret),
        "arg" => Some(Arg),
        "phi" => Some(Phi),
        "spill" => Some(Spill),
        "reload" => Some(Reload),
        "undef" => Some(Undef),
        _ => None,
    };
    if let Some(op) = op {
        return Some(Token::Op(op));
    }

    let cond = match ident {
        "eq" => Some(Cond::Eq),
        "ne" => Some(Cond::Ne),
        "lt" => Some(Cond::Lt),
        "le" => Some(Cond::Le),
        "gt" => Some(Cond::Gt),
        "ge" => Some(Cond::Ge),
        "al" => Some(Cond::Al),
        _ => None,
    };
    if let Some(cond) = cond {
        return Some(Token::CondTok(cond));
    }

    match ident {
        "branch" => Some(Token::Branch),
        "define" => Some(Token::Define),
        "size" => Some(Token::Size),
        "align" => Some(Token::Align),
        "init" => Some(Token::Init),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(text: &str) -> Vec<Token> {
        let mut l = Lexer::new(text);
        let mut out = Vec::new();
        loop {
            let (_, t) = l.next_token().unwrap();
            if t == Token::Eof {
                return out;
            }
            out.push(t);
        }
    }

    #[test]
    fn instruction_line() {
        let toks = lex("%v17 = add %v16, #0x1 ;; comment\n");
        assert_eq!(
            toks,
            vec![
                Token::Reg(17),
                Token::Assign,
                Token::Op(Opcode::Add),
                Token::Reg(16),
                Token::Comma,
                Token::Imm(1),
            ]
        );
    }

    #[test]
    fn registers_blocks_and_symbols() {
        let toks = lex("bb3: branch{le} %bb4, %bb5\n@tab %sp %r12");
        assert_eq!(
            toks,
            vec![
                Token::BbDef(3),
                Token::Branch,
                Token::LBrace,
                Token::CondTok(Cond::Le),
                Token::RBrace,
                Token::BbRef(4),
                Token::Comma,
                Token::BbRef(5),
                Token::Sym("tab".to_string()),
                Token::Reg(13),
                Token::Reg(12),
            ]
        );
    }

    #[test]
    fn rejects_low_virtual_register() {
        let mut l = Lexer::new("%v3");
        assert!(l.next_token().is_err());
    }
}
