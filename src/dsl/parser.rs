//! Recursive-descent parser for the motet DSL.
//!
//! Precedence, low to high: declaration → ternary → `||` → `&` → equality →
//! comparison → additive → multiplicative → unary → call → primary. A
//! sequence body is steps separated by `;` or newline; a step is a control
//! message, jump, flag, inner sequence, or a `|`-separated track list.
//!
//! Any error aborts the whole-buffer parse; the caller reports it and keeps
//! the previous AST.

use std::collections::HashMap;

use super::ast::*;
use super::error::SyntaxError;
use super::token::{Token, TokenKind};

/// Token kinds that may legally follow a bare (value-less) param name.
const PARAM_FOLLOWERS: [TokenKind; 6] = [
    TokenKind::Comma,
    TokenKind::Pipe,
    TokenKind::Semicolon,
    TokenKind::Newline,
    TokenKind::RightBracket,
    TokenKind::Eof,
];

/// Token kinds that terminate a track list or a param list within a step.
const STEP_ENDERS: [TokenKind; 3] = [
    TokenKind::Semicolon,
    TokenKind::Newline,
    TokenKind::RightBracket,
];

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    current_declaration: String,
    registered_flags: HashMap<String, Vec<String>>,
}

impl Parser {
    /// Parse a token stream into top-level declarations.
    pub fn parse(tokens: Vec<Token>) -> Result<Vec<Expr>, SyntaxError> {
        let mut parser = Parser {
            tokens,
            current: 0,
            current_declaration: String::new(),
            registered_flags: HashMap::new(),
        };
        parser.declarations()
    }

    fn declarations(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut expressions = Vec::new();

        loop {
            self.consume_newlines();
            if self.at_end() {
                break;
            }
            expressions.push(self.assignment()?);
        }

        Ok(expressions)
    }

    fn assignment(&mut self) -> Result<Expr, SyntaxError> {
        self.consume_newlines();

        let identifier = self.consume(TokenKind::Identifier, "Expect identifier")?;
        self.current_declaration = identifier.lexeme.clone();

        let mut param_names = Vec::new();
        if self.match_kind(TokenKind::LeftParen) && !self.match_kind(TokenKind::RightParen) {
            loop {
                let name = self.consume(TokenKind::Identifier, "Expect parameter name")?;
                param_names.push(name.lexeme);
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
            self.consume(TokenKind::RightParen, "Expect \")\" after parameters")?;
        }

        self.consume_newlines();
        self.consume(TokenKind::Equal, "Expect \"=\" after identifier")?;

        let value = self.expression()?;

        Ok(Expr::Assign(Assign {
            name: identifier.lexeme,
            param_names,
            value: Box::new(value),
        }))
    }

    fn expression(&mut self) -> Result<Expr, SyntaxError> {
        self.consume_newlines();
        self.ternary()
    }

    fn ternary(&mut self) -> Result<Expr, SyntaxError> {
        let expr = self.or()?;

        if self.match_kind(TokenKind::Question) {
            let if_branch = self.expression()?;
            self.consume(TokenKind::Colon, "Expect \":\" after if branch")?;
            let else_branch = self.expression()?;

            return Ok(Expr::Ternary(Ternary {
                condition: Box::new(expr),
                if_branch: Box::new(if_branch),
                else_branch: Box::new(else_branch),
            }));
        }

        Ok(expr)
    }

    fn or(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.and()?;

        while self.match_kind(TokenKind::DoublePipe) {
            let right = self.and()?;
            expr = Expr::Logical(Logical {
                left: Box::new(expr),
                op: LogicalOp::Or,
                right: Box::new(right),
            });
        }

        Ok(expr)
    }

    fn and(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.equality()?;

        while self.match_any(&[TokenKind::Ampersand, TokenKind::DoubleAmpersand]) {
            let right = self.equality()?;
            expr = Expr::Logical(Logical {
                left: Box::new(expr),
                op: LogicalOp::And,
                right: Box::new(right),
            });
        }

        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.comparison()?;

        while let Some(op) = self.match_binary(&[
            (TokenKind::EqualEqual, BinaryOp::Equal),
            (TokenKind::BangEqual, BinaryOp::NotEqual),
        ]) {
            let right = self.comparison()?;
            expr = binary(expr, op, right);
        }

        Ok(expr)
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.addition()?;

        while let Some(op) = self.match_binary(&[
            (TokenKind::Greater, BinaryOp::Greater),
            (TokenKind::GreaterEqual, BinaryOp::GreaterEqual),
            (TokenKind::Less, BinaryOp::Less),
            (TokenKind::LessEqual, BinaryOp::LessEqual),
            (TokenKind::LeftLeft, BinaryOp::ShiftLeft),
            (TokenKind::RightRight, BinaryOp::ShiftRight),
        ]) {
            let right = self.addition()?;
            expr = binary(expr, op, right);
        }

        Ok(expr)
    }

    fn addition(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.multiplication()?;

        while let Some(op) = self.match_binary(&[
            (TokenKind::Minus, BinaryOp::Subtract),
            (TokenKind::Plus, BinaryOp::Add),
        ]) {
            let right = self.multiplication()?;
            expr = binary(expr, op, right);
        }

        Ok(expr)
    }

    fn multiplication(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.unary()?;

        while let Some(op) = self.match_binary(&[
            (TokenKind::Slash, BinaryOp::Divide),
            (TokenKind::Star, BinaryOp::Multiply),
        ]) {
            let right = self.unary()?;
            expr = binary(expr, op, right);
        }

        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        let op = if self.match_kind(TokenKind::Bang) {
            Some(UnaryOp::Not)
        } else if self.match_kind(TokenKind::Minus) {
            Some(UnaryOp::Negate)
        } else {
            None
        };

        if let Some(op) = op {
            let right = self.unary()?;
            return Ok(Expr::Unary(Unary {
                op,
                right: Box::new(right),
            }));
        }

        self.call()
    }

    fn call(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.primary()?;

        while self.match_kind(TokenKind::LeftParen) {
            let args = self.param_list(&[TokenKind::RightParen])?;
            self.consume(TokenKind::RightParen, "Expect \")\" after arguments")?;
            expr = Expr::Call(Call {
                callee: Box::new(expr),
                args,
            });
        }

        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        if self.match_any(&[
            TokenKind::Number,
            TokenKind::Str,
            TokenKind::True,
            TokenKind::False,
        ]) {
            let token = self.previous().clone();
            return Ok(Expr::Literal(LiteralExpr {
                value: token.literal.expect("literal token carries a value"),
            }));
        }

        if self.match_kind(TokenKind::LeftParen) {
            let expr = self.expression()?;
            self.consume(TokenKind::RightParen, "Expect \")\" after expression")?;
            return Ok(Expr::Grouping(Box::new(expr)));
        }

        if self.match_any(&[TokenKind::Identifier, TokenKind::Minus]) {
            if self.check(TokenKind::Hash) {
                return self.sequence_flag_ref();
            }
            return Ok(Expr::Variable(Variable {
                name: self.previous().lexeme.clone(),
            }));
        }

        if self.match_kind(TokenKind::LeftBracket) {
            self.consume_newlines();
            let sequence = self.sequence()?;
            self.consume_newlines();
            return Ok(Expr::Sequence(sequence));
        }

        let token = self.peek().clone();
        Err(self.error_at(&token, "Expect expression"))
    }

    fn sequence(&mut self) -> Result<Sequence, SyntaxError> {
        self.consume_newlines();

        if self.match_kind(TokenKind::RightBracket) {
            return Ok(Sequence::default());
        }

        let steps = self.sequence_steps()?;
        self.consume_newlines();
        self.consume(TokenKind::RightBracket, "Expect \"]\" after sequence")?;

        Ok(Sequence { steps })
    }

    fn sequence_steps(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut steps = Vec::new();

        loop {
            self.consume_newlines();

            if self.check(TokenKind::RightBracket) || self.at_end() {
                break;
            }

            if self.match_kind(TokenKind::Dollar) {
                steps.push(self.control_message()?);
            } else if self.match_kind(TokenKind::At) {
                steps.push(self.jump()?);
            } else if self.match_kind(TokenKind::Hash) {
                steps.push(self.flag()?);
            } else if self.match_kind(TokenKind::LeftBrace) {
                if self.match_kind(TokenKind::RightBrace) {
                    // `{}` is an empty step, not an error
                } else {
                    steps.push(self.inner_sequence()?);
                }
            } else {
                let tracks = self.track_list()?;
                if !tracks.is_empty() {
                    steps.push(Expr::Tracks(TrackList { tracks }));
                }
            }

            if !self.match_any(&[TokenKind::Semicolon, TokenKind::Newline]) {
                break;
            }
        }

        Ok(steps)
    }

    fn track_list(&mut self) -> Result<Vec<ParamList>, SyntaxError> {
        let mut tracks = Vec::new();

        loop {
            if self.check_any(&STEP_ENDERS) || self.at_end() {
                break;
            }

            if self.check(TokenKind::Pipe) {
                tracks.push(ParamList::default());
            } else {
                let params = self.param_list(&[TokenKind::Pipe])?;
                tracks.push(ParamList { params });
            }

            if !self.match_kind(TokenKind::Pipe) {
                break;
            }
        }

        Ok(tracks)
    }

    fn param_list(&mut self, closing: &[TokenKind]) -> Result<Vec<Expr>, SyntaxError> {
        let mut params = Vec::new();

        loop {
            if self.check_any(closing) || self.check_any(&STEP_ENDERS) || self.at_end() {
                break;
            }

            if self.match_kind(TokenKind::Comma) {
                // Elided slot; collapse runs of commas into one empty param.
                params.push(Expr::EmptyParam);
                while self.check(TokenKind::Comma) {
                    self.advance();
                }
                continue;
            }

            params.push(self.param(closing)?);

            if !self.match_kind(TokenKind::Comma) {
                break;
            }
        }

        Ok(params)
    }

    fn param(&mut self, closing: &[TokenKind]) -> Result<Expr, SyntaxError> {
        let expr = self.primary()?;

        if let Expr::Variable(variable) = expr {
            if self.match_kind(TokenKind::Colon) {
                let value = self.expression()?;
                return Ok(Expr::Param(Param {
                    name: variable.name,
                    value: Some(Box::new(value)),
                }));
            }

            if self.check_any(&PARAM_FOLLOWERS) || self.check_any(closing) {
                return Ok(Expr::Param(Param {
                    name: variable.name,
                    value: None,
                }));
            }
        }

        let token = self.previous().clone();
        Err(self.error_at(&token, "Invalid parameter name"))
    }

    fn inner_sequence(&mut self) -> Result<Expr, SyntaxError> {
        let content = self.expression()?;
        self.consume(TokenKind::RightBrace, "Expect \"}\" after inner sequence")?;

        Ok(Expr::InnerSequence(InnerSequence {
            content: Box::new(content),
        }))
    }

    fn jump(&mut self) -> Result<Expr, SyntaxError> {
        if self.match_kind(TokenKind::Identifier) {
            let first = self.previous().lexeme.clone();

            if self.match_kind(TokenKind::Hash) {
                if self.match_kind(TokenKind::Identifier) {
                    let flag = self.previous().lexeme.clone();
                    return Ok(Expr::Jump(Jump {
                        sequence: Some(first),
                        flag: Some(flag),
                    }));
                }
                return Ok(Expr::Jump(Jump {
                    sequence: Some(first),
                    flag: None,
                }));
            }

            // A lone name after `@` names a flag in the current sequence.
            return Ok(Expr::Jump(Jump {
                sequence: None,
                flag: Some(first),
            }));
        }

        if self.match_kind(TokenKind::Hash) {
            let flag = self.consume(TokenKind::Identifier, "Expect flag name after \"#\"")?;
            return Ok(Expr::Jump(Jump {
                sequence: None,
                flag: Some(flag.lexeme),
            }));
        }

        let token = self.peek().clone();
        Err(self.error_at(&token, "Expect sequence or flag name after \"@\""))
    }

    fn flag(&mut self) -> Result<Expr, SyntaxError> {
        let name = self.consume(TokenKind::Identifier, "Expect flag name after \"#\"")?;
        self.register_flag(&name)?;

        Ok(Expr::Flag(Flag { name: name.lexeme }))
    }

    fn control_message(&mut self) -> Result<Expr, SyntaxError> {
        let target = self.consume(
            TokenKind::Identifier,
            "Expect target name after control message operator",
        )?;
        let params = self.param_list(&[])?;

        Ok(Expr::Control(ControlMessage {
            target: target.lexeme,
            params,
        }))
    }

    fn sequence_flag_ref(&mut self) -> Result<Expr, SyntaxError> {
        let sequence_name = self.previous().lexeme.clone();

        let flag_name = if self.match_kind(TokenKind::Hash) {
            let flag = self.consume(TokenKind::Identifier, "Expect a flag name")?;
            Some(flag.lexeme)
        } else {
            None
        };

        Ok(Expr::SequenceFlagRef(SequenceFlagRef {
            sequence_name,
            flag_name,
        }))
    }

    fn register_flag(&mut self, token: &Token) -> Result<(), SyntaxError> {
        let declaration = self.current_declaration.clone();
        let collision = self
            .registered_flags
            .get(&declaration)
            .is_some_and(|flags| flags.contains(&token.lexeme));

        if collision {
            return Err(self.error_at(
                token,
                format!(
                    "a flag named \"{}\" was already registered within declaration \"{declaration}\"",
                    token.lexeme
                ),
            ));
        }

        self.registered_flags
            .entry(declaration)
            .or_default()
            .push(token.lexeme.clone());
        Ok(())
    }

    // Token-stream plumbing

    fn match_kind(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn match_any(&mut self, kinds: &[TokenKind]) -> bool {
        kinds.iter().any(|&kind| self.match_kind(kind))
    }

    fn match_binary(&mut self, table: &[(TokenKind, BinaryOp)]) -> Option<BinaryOp> {
        for &(kind, op) in table {
            if self.match_kind(kind) {
                return Some(op);
            }
        }
        None
    }

    fn check(&self, kind: TokenKind) -> bool {
        if kind != TokenKind::Eof && self.at_end() {
            return false;
        }
        self.peek().kind == kind
    }

    fn check_any(&self, kinds: &[TokenKind]) -> bool {
        kinds.iter().any(|&kind| self.check(kind))
    }

    fn advance(&mut self) -> &Token {
        if !self.at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, SyntaxError> {
        if self.check(kind) {
            return Ok(self.advance().clone());
        }
        let token = self.peek().clone();
        Err(self.error_at(&token, message))
    }

    fn consume_newlines(&mut self) {
        while self.check(TokenKind::Newline) {
            self.advance();
        }
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> SyntaxError {
        let mut message = message.into();
        if message.starts_with("Expect") {
            message = format!("{message}, got \"{}\"", token.kind.describe());
        }
        SyntaxError::parse(message, token.line, token.column)
    }
}

fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    Expr::Binary(Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::scanner::Scanner;

    fn parse(source: &str) -> Result<Vec<Expr>, SyntaxError> {
        Parser::parse(Scanner::scan(source).unwrap())
    }

    fn single_sequence(source: &str) -> Sequence {
        let exprs = parse(source).unwrap();
        assert_eq!(exprs.len(), 1);
        match &exprs[0] {
            Expr::Assign(assign) => match assign.value.as_ref() {
                Expr::Sequence(seq) => seq.clone(),
                other => panic!("expected sequence value, got {other:?}"),
            },
            other => panic!("expected assign, got {other:?}"),
        }
    }

    #[test]
    fn empty_declaration_list() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("  \n\n   \n").unwrap().is_empty());
    }

    #[test]
    fn empty_sequence() {
        let seq = single_sequence("mySeq = []");
        assert!(seq.steps.is_empty());
    }

    #[test]
    fn parametrized_declaration() {
        let exprs = parse("riff(root, vel) = [p: root]").unwrap();
        match &exprs[0] {
            Expr::Assign(assign) => {
                assert_eq!(assign.name, "riff");
                assert_eq!(assign.param_names, vec!["root", "vel"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ternary_precedence_is_lowest() {
        let exprs = parse("Program = a == b ? [] : []").unwrap();
        match &exprs[0] {
            Expr::Assign(assign) => match assign.value.as_ref() {
                Expr::Ternary(t) => {
                    assert!(matches!(t.condition.as_ref(), Expr::Binary(_)));
                    assert!(matches!(t.if_branch.as_ref(), Expr::Sequence(_)));
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let exprs = parse("Program = [] || [] & []").unwrap();
        match &exprs[0] {
            Expr::Assign(assign) => match assign.value.as_ref() {
                Expr::Logical(or) => {
                    assert_eq!(or.op, LogicalOp::Or);
                    assert!(matches!(or.left.as_ref(), Expr::Sequence(_)));
                    match or.right.as_ref() {
                        Expr::Logical(and) => assert_eq!(and.op, LogicalOp::And),
                        other => panic!("unexpected {other:?}"),
                    }
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn shift_operators_parse_as_binary() {
        let exprs = parse("Program = [] >> [] << []").unwrap();
        match &exprs[0] {
            Expr::Assign(assign) => match assign.value.as_ref() {
                Expr::Binary(outer) => {
                    assert_eq!(outer.op, BinaryOp::ShiftLeft);
                    match outer.left.as_ref() {
                        Expr::Binary(inner) => assert_eq!(inner.op, BinaryOp::ShiftRight),
                        other => panic!("unexpected {other:?}"),
                    }
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn duplicate_flag_in_declaration_is_an_error() {
        let err = parse("Program = [# a; p: 1|; # a]").unwrap_err();
        assert!(err.message.contains("\"a\""), "{}", err.message);
        assert!(err.message.contains("\"Program\""), "{}", err.message);
    }

    #[test]
    fn same_flag_in_two_declarations_is_fine() {
        assert!(parse("A = [# x]\nB = [# x]").is_ok());
    }

    #[test]
    fn silence_param() {
        let seq = single_sequence("Program = [-|]");
        match &seq.steps[0] {
            Expr::Tracks(tl) => match &tl.tracks[0].params[0] {
                Expr::Param(p) => {
                    assert_eq!(p.name, "-");
                    assert!(p.value.is_none());
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_param_slots_are_preserved() {
        let seq = single_sequence("Program = [p: 16 | , | p: 13\n]");
        match &seq.steps[0] {
            Expr::Tracks(tl) => {
                assert_eq!(tl.tracks.len(), 3);
                assert_eq!(tl.tracks[1].params, vec![Expr::EmptyParam]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn control_message_step() {
        let seq = single_sequence("Program = [$ player speed: 2]");
        match &seq.steps[0] {
            Expr::Control(control) => {
                assert_eq!(control.target, "player");
                assert_eq!(control.params.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn jump_forms() {
        let seq = single_sequence("Program = [@ intro; @ verse # drop; @ # top]");
        let jumps: Vec<&Jump> = seq
            .steps
            .iter()
            .map(|s| match s {
                Expr::Jump(j) => j,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(jumps[0], &Jump { sequence: None, flag: Some("intro".into()) });
        assert_eq!(
            jumps[1],
            &Jump { sequence: Some("verse".into()), flag: Some("drop".into()) }
        );
        assert_eq!(jumps[2], &Jump { sequence: None, flag: Some("top".into()) });
    }

    #[test]
    fn jump_to_sequence_start() {
        let seq = single_sequence("Program = [@ verse #]");
        assert_eq!(
            seq.steps[0],
            Expr::Jump(Jump { sequence: Some("verse".into()), flag: None })
        );
    }

    #[test]
    fn inner_sequence_with_flag_ref() {
        let seq = single_sequence("Program = [{inner#aze}]");
        match &seq.steps[0] {
            Expr::InnerSequence(inner) => match inner.content.as_ref() {
                Expr::SequenceFlagRef(r) => {
                    assert_eq!(r.sequence_name, "inner");
                    assert_eq!(r.flag_name.as_deref(), Some("aze"));
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn call_step_args() {
        let seq = single_sequence("Program = [{a(b: 14, c: false)}]");
        match &seq.steps[0] {
            Expr::InnerSequence(inner) => match inner.content.as_ref() {
                Expr::Call(call) => {
                    assert!(matches!(call.callee.as_ref(), Expr::Variable(_)));
                    assert_eq!(call.args.len(), 2);
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn trailing_pipe_before_step_separator() {
        let seq = single_sequence("Program = [p:60|; #f; p:61|; @#f]");
        assert_eq!(seq.steps.len(), 4);
        assert!(matches!(&seq.steps[0], Expr::Tracks(_)));
        assert!(matches!(&seq.steps[1], Expr::Flag(_)));
        assert!(matches!(&seq.steps[3], Expr::Jump(_)));
    }

    #[test]
    fn parse_error_carries_position() {
        let err = parse("Program = [p: ]").unwrap_err();
        assert_eq!(err.line, 0);
        assert!(err.column > 0);
    }

    #[test]
    fn unexpected_token_instead_of_identifier() {
        let err = parse("= 3").unwrap_err();
        assert!(err.message.contains("Expect identifier"), "{}", err.message);
    }
}
