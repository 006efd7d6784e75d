//! Recursive-descent parser for the textual CG IR.
//!
//! Register and block references may point forwards, so operand wiring,
//! phi arguments and branch targets are collected into fix-up tables and
//! resolved once the function body has been read.

use crate::error::{err, Location, ParseResult};
use crate::lexer::{Lexer, Token};
use mycc_codegen::cg::{self, reg, Arg, Cond, Opcode};
use std::collections::HashMap;

/// Parse a whole translation unit.
pub fn parse_tu(text: &str) -> ParseResult<cg::TranslationUnit> {
    Parser::new(text)?.parse()
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    loc: Location,
    tok: Token,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> ParseResult<Self> {
        let mut lexer = Lexer::new(text);
        let (loc, tok) = lexer.next_token()?;
        Ok(Self { lexer, loc, tok })
    }

    fn consume(&mut self) -> ParseResult<()> {
        let (loc, tok) = self.lexer.next_token()?;
        self.loc = loc;
        self.tok = tok;
        Ok(())
    }

    fn expect(&mut self, t: &Token, what: &str) -> ParseResult<()> {
        if &self.tok == t {
            self.consume()
        } else {
            err(self.loc, format!("expected {}", what))
        }
    }

    fn expect_int(&mut self, what: &str) -> ParseResult<u64> {
        match self.tok {
            Token::Int(v) => {
                self.consume()?;
                Ok(v)
            }
            _ => err(self.loc, format!("expected {}", what)),
        }
    }

    fn parse(&mut self) -> ParseResult<cg::TranslationUnit> {
        let mut tu = cg::TranslationUnit::new();
        loop {
            match &self.tok {
                Token::Eof => return Ok(tu),
                Token::Define => self.parse_define(&mut tu)?,
                Token::Sym(_) => self.parse_data(&mut tu)?,
                _ => return err(self.loc, "expected a data declaration or `define`"),
            }
        }
    }

    fn parse_data(&mut self, tu: &mut cg::TranslationUnit) -> ParseResult<()> {
        let name = match &self.tok {
            Token::Sym(s) => s.clone(),
            _ => unreachable!(),
        };
        self.consume()?;
        self.expect(&Token::Assign, "`=`")?;

        self.expect(&Token::Size, "`size`")?;
        self.expect(&Token::LParen, "`(`")?;
        let size = self.expect_int("size in bytes")? as u32;
        self.expect(&Token::RParen, "`)`")?;
        self.expect(&Token::Comma, "`,`")?;

        self.expect(&Token::Align, "`align`")?;
        self.expect(&Token::LParen, "`(`")?;
        let align = self.expect_int("alignment")? as u32;
        self.expect(&Token::RParen, "`)`")?;

        let init = if self.tok == Token::Comma {
            self.consume()?;
            self.expect(&Token::Init, "`init`")?;
            self.expect(&Token::LParen, "`(`")?;
            let mut bytes = Vec::new();
            while self.tok != Token::RParen {
                bytes.push(self.expect_int("initialiser byte")? as u8);
                if self.tok == Token::Comma {
                    self.consume()?;
                }
            }
            self.expect(&Token::RParen, "`)`")?;
            if bytes.len() != size as usize {
                return err(self.loc, format!("init has {} bytes, size is {}", bytes.len(), size));
            }
            Some(bytes)
        } else {
            None
        };

        tu.datas.push(cg::DataDecl {
            name,
            size,
            align,
            init,
        });
        Ok(())
    }

    fn parse_define(&mut self, tu: &mut cg::TranslationUnit) -> ParseResult<()> {
        self.expect(&Token::Define, "`define`")?;
        let name = match &self.tok {
            Token::Sym(s) => s.clone(),
            _ => return err(self.loc, "expected function name"),
        };
        self.consume()?;

        let mut func = cg::Function::new(&name);

        // Parameter register list; the `arg` instructions are materialised
        // once the entry block exists.
        self.expect(&Token::LParen, "`(`")?;
        let mut param_regs = Vec::new();
        while let Token::Reg(r) = self.tok {
            param_regs.push(r);
            self.consume()?;
        }
        self.expect(&Token::RParen, "`)`")?;

        self.expect(&Token::LBracket, "`[`")?;
        func.frame_size = self.expect_int("frame size")? as u32;
        self.expect(&Token::Comma, "`,`")?;
        func.clobber_mask = self.expect_int("clobber mask")? as u32;
        self.expect(&Token::RBracket, "`]`")?;
        self.expect(&Token::LBrace, "`{`")?;

        let mut fix = Fixups::default();

        while self.tok != Token::RBrace {
            let id = match self.tok {
                Token::BbDef(id) => id,
                _ => return err(self.loc, "expected a block label"),
            };
            self.consume()?;

            let b = func.add_block();
            func.set_block_id(b, id);
            func.link_block_last(b);
            fix.blocks.insert(id, b);

            // The entry block hosts the parameter instructions.
            if !param_regs.is_empty() {
                for (idx, &r) in param_regs.iter().enumerate() {
                    if idx >= cg::MAX_PARAMS {
                        return err(self.loc, "too many parameters");
                    }
                    let arg = func.build_inst(b, Opcode::Arg);
                    set_reg(&mut func, arg, Some(r));
                    func.params[idx] = Some(arg);
                    if reg::is_vreg(r) {
                        fix.vregs.insert(r, arg);
                    }
                }
                param_regs.clear();
            }

            while !matches!(self.tok, Token::BbDef(_) | Token::RBrace) {
                self.parse_instruction(&mut func, b, &mut fix)?;
            }
        }
        self.consume()?; // `}`

        self.resolve(&mut func, fix)?;
        tu.funcs.push(func);
        Ok(())
    }

    fn parse_instruction(
        &mut self,
        func: &mut cg::Function,
        b: cg::Block,
        fix: &mut Fixups,
    ) -> ParseResult<()> {
        let def = if let Token::Reg(r) = self.tok {
            self.consume()?;
            self.expect(&Token::Assign, "`=`")?;
            Some(r)
        } else {
            None
        };

        match self.tok.clone() {
            Token::Op(Opcode::Phi) => {
                self.consume()?;
                let phi = func.build_phi(b);
                set_reg(func, phi, def);
                if let Some(r) = def {
                    if reg::is_vreg(r) {
                        fix.vregs.insert(r, phi);
                    }
                }

                loop {
                    self.expect(&Token::LBracket, "`[`")?;
                    let v = match self.tok {
                        Token::Reg(r) => r,
                        _ => return err(self.loc, "expected a phi argument register"),
                    };
                    self.consume()?;
                    self.expect(&Token::Comma, "`,`")?;
                    let bbid = match self.tok {
                        Token::BbRef(id) => id,
                        _ => return err(self.loc, "expected a phi argument block"),
                    };
                    self.consume()?;
                    self.expect(&Token::RBracket, "`]`")?;
                    fix.phi_args.push((self.loc, phi, v, bbid));

                    if self.tok == Token::Comma {
                        self.consume()?;
                    } else {
                        break;
                    }
                }
            }

            Token::Branch => {
                self.consume()?;
                let cond = if self.tok == Token::LBrace {
                    self.consume()?;
                    let c = match self.tok {
                        Token::CondTok(c) => c,
                        _ => return err(self.loc, "expected a condition"),
                    };
                    self.consume()?;
                    self.expect(&Token::RBrace, "`}`")?;
                    Some(c)
                } else {
                    None
                };

                let first = match self.tok {
                    Token::BbRef(id) => id,
                    _ => return err(self.loc, "expected a branch target"),
                };
                self.consume()?;

                match cond {
                    Some(c) => {
                        self.expect(&Token::Comma, "`,`")?;
                        let second = match self.tok {
                            Token::BbRef(id) => id,
                            _ => return err(self.loc, "expected the false branch target"),
                        };
                        self.consume()?;
                        fix.succs.push((self.loc, b, Some(c), first, Some(second)));
                    }
                    None => fix.succs.push((self.loc, b, None, first, None)),
                }
            }

            Token::Op(op) => {
                self.consume()?;
                let inst = func.build_inst(b, op);
                func.link_inst_last(inst);
                set_reg(func, inst, def);
                if let Some(r) = def {
                    if reg::is_vreg(r) {
                        fix.vregs.insert(r, inst);
                    }
                }

                if self.tok == Token::LBrace {
                    self.consume()?;
                    match self.tok {
                        Token::CondTok(c) => func.insts[inst].cond = c,
                        _ => return err(self.loc, "expected a condition"),
                    }
                    self.consume()?;
                    self.expect(&Token::RBrace, "`}`")?;
                }

                let mut aidx = 0;
                if operand_starts(&self.tok) {
                    loop {
                        self.parse_operand(func, inst, aidx, fix)?;
                        aidx += 1;
                        if self.tok == Token::Comma {
                            self.consume()?;
                        } else {
                            break;
                        }
                    }
                }
            }

            _ => return err(self.loc, "expected an instruction"),
        }

        Ok(())
    }

    fn parse_operand(
        &mut self,
        func: &mut cg::Function,
        inst: cg::Inst,
        aidx: usize,
        fix: &mut Fixups,
    ) -> ParseResult<()> {
        if aidx >= cg::N_ARGS {
            return err(self.loc, "too many operands");
        }

        match self.tok.clone() {
            Token::Reg(r) => {
                self.consume()?;
                if reg::is_vreg(r) {
                    fix.args.push((self.loc, inst, aidx, r));
                } else {
                    func.insts[inst].args[aidx] = Arg::hreg(r);
                }
            }
            Token::Imm(v) => {
                self.consume()?;
                func.insts[inst].args[aidx] = Arg::imm(v);
            }
            Token::Sym(s) => {
                self.consume()?;
                func.insts[inst].args[aidx] = Arg::sym(&s);
            }
            Token::LBracket => {
                self.consume()?;
                let r = match self.tok {
                    Token::Reg(r) => r,
                    _ => return err(self.loc, "expected a base register"),
                };
                self.consume()?;
                if reg::is_vreg(r) {
                    fix.args.push((self.loc, inst, aidx, r));
                } else {
                    func.insts[inst].args[aidx] = Arg::hreg(r);
                }
                if self.tok == Token::Comma {
                    self.consume()?;
                    match self.tok {
                        Token::Imm(off) => func.insts[inst].args[aidx].offset = off as i32,
                        _ => return err(self.loc, "expected an offset immediate"),
                    }
                    self.consume()?;
                }
                self.expect(&Token::RBracket, "`]`")?;
            }
            _ => return err(self.loc, "expected an operand"),
        }
        Ok(())
    }

    fn resolve(&self, func: &mut cg::Function, fix: Fixups) -> ParseResult<()> {
        for (loc, inst, aidx, v) in fix.args {
            match fix.vregs.get(&v) {
                Some(&def) => func.set_vreg_arg(inst, aidx, def),
                None => return err(loc, format!("%v{} is never defined", v)),
            }
        }

        for (loc, phi, v, bbid) in fix.phi_args {
            let def = match fix.vregs.get(&v) {
                Some(&def) => def,
                None => return err(loc, format!("%v{} is never defined", v)),
            };
            let bb = match fix.blocks.get(&bbid) {
                Some(&bb) => bb,
                None => return err(loc, format!("bb{} is never defined", bbid)),
            };
            func.add_phi_arg(phi, bb, def);
        }

        for (loc, b, cond, first, second) in fix.succs {
            let target = |id: u32| {
                fix.blocks
                    .get(&id)
                    .copied()
                    .ok_or(())
                    .or_else(|_| err(loc, format!("bb{} is never defined", id)))
            };
            match second {
                Some(second) => {
                    let t = target(first)?;
                    let f = target(second)?;
                    func.set_branch(b, cond.unwrap(), Some(t), Some(f));
                    func.link_cfg(b, t);
                    func.link_cfg(b, f);
                }
                None => {
                    let t = target(first)?;
                    func.link_cfg(b, t);
                }
            }
        }

        Ok(())
    }
}

fn operand_starts(tok: &Token) -> bool {
    matches!(
        tok,
        Token::Reg(_) | Token::Imm(_) | Token::Sym(_) | Token::LBracket
    )
}

/// Overwrite the auto-assigned register of a parsed instruction, keeping
/// the virtual register counter above everything seen.
fn set_reg(func: &mut cg::Function, inst: cg::Inst, r: Option<u32>) {
    func.insts[inst].reg = r;
    if let Some(r) = r {
        if r + 1 > func.vreg_count {
            func.vreg_count = r + 1;
        }
        func.ssa.set_sort_key(inst, i64::from(r));
    }
}

#[derive(Default)]
struct Fixups {
    vregs: HashMap<u32, cg::Inst>,
    blocks: HashMap<u32, cg::Block>,
    args: Vec<(Location, cg::Inst, usize, u32)>,
    phi_args: Vec<(Location, cg::Inst, u32, u32)>,
    succs: Vec<(Location, cg::Block, Option<Cond>, u32, Option<u32>)>,
}
