//! A minimal reader/writer for the brace-delimited config grammar
//! described for human-authored config files: `group { … }` nesting,
//! `cmd { exec="…"; … }` leaves, and `script "name" { … }` blocks whose
//! bodies are semicolon-separated action statements such as
//! `start cmd "s1" wait "running";`.
//!
//! This is a convenience front-end over [`ConfigTree`] — not the
//! primary interface, which is `ConfigTree` plus `serde_yaml`. A real
//! deployment is free to swap this parser for one with better error
//! recovery without touching `config::binding` or anything downstream.

use super::error::ConfigError;
use super::tree::{CommandNode, ConfigTree, GroupNode, ScriptNode};
use crate::script::model::{Action, ActionKind, Target, WaitStatusKind};

struct Tokenizer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    LBrace,
    RBrace,
    Semi,
    Eq,
    Eof,
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str) -> Self {
        Self { chars: src.char_indices().peekable(), src }
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            while let Some((_, c)) = self.chars.peek() {
                if c.is_whitespace() {
                    self.chars.next();
                } else {
                    break;
                }
            }
            if let Some((_, '#')) = self.chars.peek() {
                while let Some((_, c)) = self.chars.next() {
                    if c == '\n' {
                        break;
                    }
                }
                continue;
            }
            break;
        }
    }

    fn next(&mut self) -> Result<Token, ConfigError> {
        self.skip_ws_and_comments();
        let Some((start, c)) = self.chars.next() else {
            return Ok(Token::Eof);
        };
        match c {
            '{' => Ok(Token::LBrace),
            '}' => Ok(Token::RBrace),
            ';' => Ok(Token::Semi),
            '=' => Ok(Token::Eq),
            '"' => {
                let mut s = String::new();
                loop {
                    match self.chars.next() {
                        Some((_, '"')) => break,
                        Some((_, c)) => s.push(c),
                        None => return Err(ConfigError::Text("unterminated string literal".into())),
                    }
                }
                Ok(Token::Str(s))
            }
            c if c.is_ascii_digit() || (c == '-' && self.peek_is_digit()) => {
                let mut end = start + c.len_utf8();
                while let Some((i, c)) = self.chars.peek().copied() {
                    if c.is_ascii_digit() {
                        end = i + c.len_utf8();
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                self.src[start..end]
                    .parse()
                    .map(Token::Int)
                    .map_err(|_| ConfigError::Text(format!("bad integer literal at byte {start}")))
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut end = start + c.len_utf8();
                while let Some((i, c)) = self.chars.peek().copied() {
                    if c.is_alphanumeric() || c == '_' {
                        end = i + c.len_utf8();
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                Ok(Token::Ident(self.src[start..end].to_string()))
            }
            other => Err(ConfigError::Text(format!("unexpected character `{other}`"))),
        }
    }

    fn peek_is_digit(&mut self) -> bool {
        matches!(self.chars.peek(), Some((_, c)) if c.is_ascii_digit())
    }
}

struct Parser<'a> {
    tok: Tokenizer<'a>,
    lookahead: Token,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self, ConfigError> {
        let mut tok = Tokenizer::new(src);
        let lookahead = tok.next()?;
        Ok(Self { tok, lookahead })
    }

    fn advance(&mut self) -> Result<Token, ConfigError> {
        let next = self.tok.next()?;
        Ok(std::mem::replace(&mut self.lookahead, next))
    }

    fn expect(&mut self, want: &Token) -> Result<(), ConfigError> {
        let got = self.advance()?;
        if &got == want {
            Ok(())
        } else {
            Err(ConfigError::Text(format!("expected {want:?}, found {got:?}")))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ConfigError> {
        match self.advance()? {
            Token::Ident(s) => Ok(s),
            other => Err(ConfigError::Text(format!("expected identifier, found {other:?}"))),
        }
    }

    fn expect_str(&mut self) -> Result<String, ConfigError> {
        match self.advance()? {
            Token::Str(s) => Ok(s),
            other => Err(ConfigError::Text(format!("expected string literal, found {other:?}"))),
        }
    }

    fn parse_tree(&mut self) -> Result<ConfigTree, ConfigError> {
        let mut tree = ConfigTree::default();
        loop {
            match &self.lookahead {
                Token::Eof => break,
                Token::Ident(kw) if kw == "group" => {
                    self.advance()?;
                    tree.groups.push(self.parse_group()?);
                }
                Token::Ident(kw) if kw == "cmd" => {
                    self.advance()?;
                    tree.commands.push(self.parse_cmd_body()?);
                }
                Token::Ident(kw) if kw == "script" => {
                    self.advance()?;
                    tree.scripts.push(self.parse_script()?);
                }
                other => return Err(ConfigError::Text(format!("unexpected top-level token {other:?}"))),
            }
        }
        Ok(tree)
    }

    fn parse_group(&mut self) -> Result<GroupNode, ConfigError> {
        let name = self.expect_str()?;
        self.expect(&Token::LBrace)?;
        let mut groups = Vec::new();
        let mut commands = Vec::new();
        loop {
            match &self.lookahead {
                Token::RBrace => {
                    self.advance()?;
                    break;
                }
                Token::Ident(kw) if kw == "group" => {
                    self.advance()?;
                    groups.push(self.parse_group()?);
                }
                Token::Ident(kw) if kw == "cmd" => {
                    self.advance()?;
                    commands.push(self.parse_cmd_body()?);
                }
                other => return Err(ConfigError::Text(format!("unexpected token in group body: {other:?}"))),
            }
        }
        Ok(GroupNode { name, groups, commands })
    }

    fn parse_cmd_body(&mut self) -> Result<CommandNode, ConfigError> {
        self.expect(&Token::LBrace)?;
        let mut node = CommandNode {
            exec: String::new(),
            command_id: String::new(),
            deputy: String::new(),
            auto_respawn: false,
            stop_signal: 15,
            stop_time_allowed: 0,
        };
        loop {
            match &self.lookahead {
                Token::RBrace => {
                    self.advance()?;
                    break;
                }
                Token::Ident(_) => {
                    let key = self.expect_ident()?;
                    self.expect(&Token::Eq)?;
                    match key.as_str() {
                        "exec" => node.exec = self.expect_str()?,
                        "command_id" => node.command_id = self.expect_str()?,
                        "deputy" => node.deputy = self.expect_str()?,
                        "auto_respawn" => node.auto_respawn = self.expect_ident()? == "true",
                        "stop_signal" => node.stop_signal = self.expect_int()? as i32,
                        "stop_time_allowed" => node.stop_time_allowed = self.expect_int()? as u32,
                        other => return Err(ConfigError::Text(format!("unknown cmd field `{other}`"))),
                    }
                    self.expect(&Token::Semi)?;
                }
                other => return Err(ConfigError::Text(format!("unexpected token in cmd body: {other:?}"))),
            }
        }
        Ok(node)
    }

    fn expect_int(&mut self) -> Result<i64, ConfigError> {
        match self.advance()? {
            Token::Int(i) => Ok(i),
            other => Err(ConfigError::Text(format!("expected integer, found {other:?}"))),
        }
    }

    fn parse_script(&mut self) -> Result<ScriptNode, ConfigError> {
        let name = self.expect_str()?;
        self.expect(&Token::LBrace)?;
        let mut actions = Vec::new();
        loop {
            if self.lookahead == Token::RBrace {
                self.advance()?;
                break;
            }
            actions.push(self.parse_action()?);
            self.expect(&Token::Semi)?;
        }
        Ok(ScriptNode { name, actions })
    }

    fn parse_action(&mut self) -> Result<Action, ConfigError> {
        let verb = self.expect_ident()?;
        match verb.as_str() {
            "start" | "stop" | "restart" => {
                let kind = match verb.as_str() {
                    "start" => ActionKind::Start,
                    "stop" => ActionKind::Stop,
                    _ => ActionKind::Restart,
                };
                let target = self.parse_target()?;
                let wait_status = self.parse_optional_wait()?;
                Ok(Action::StartStopRestart { kind, target, wait_status })
            }
            "wait" => match &self.lookahead {
                Token::Ident(kw) if kw == "ms" => {
                    self.advance()?;
                    let delay_ms = self.expect_int()?;
                    Ok(Action::WaitMs { delay_ms })
                }
                _ => {
                    let target = self.parse_target()?;
                    let wait_status = self.parse_wait_status_kind()?;
                    Ok(Action::WaitStatus { target, wait_status })
                }
            },
            "run_script" => {
                let name = self.expect_str()?;
                Ok(Action::RunScript { name })
            }
            other => Err(ConfigError::Text(format!("unknown script action `{other}`"))),
        }
    }

    fn parse_target(&mut self) -> Result<Target, ConfigError> {
        match self.expect_ident()?.as_str() {
            "everything" => Ok(Target::Everything),
            "group" => Ok(Target::Group(self.expect_str()?)),
            "cmd" => Ok(Target::Cmd(self.expect_str()?.into())),
            other => Err(ConfigError::Text(format!("unknown target kind `{other}`"))),
        }
    }

    fn parse_optional_wait(&mut self) -> Result<Option<WaitStatusKind>, ConfigError> {
        if let Token::Ident(kw) = &self.lookahead {
            if kw == "wait" {
                self.advance()?;
                return Ok(Some(self.parse_wait_status_kind()?));
            }
        }
        Ok(None)
    }

    fn parse_wait_status_kind(&mut self) -> Result<WaitStatusKind, ConfigError> {
        match self.expect_str()?.as_str() {
            "running" => Ok(WaitStatusKind::Running),
            "stopped" => Ok(WaitStatusKind::Stopped),
            other => Err(ConfigError::Text(format!("unknown wait status `{other}`"))),
        }
    }
}

pub fn parse(src: &str) -> Result<ConfigTree, ConfigError> {
    Parser::new(src)?.parse_tree()
}

/// Parses just a script body's action statements, as used by scenarios
/// that exercise the ScriptManager directly without a surrounding
/// config file — e.g. `start cmd "s1" wait "running"; wait ms 100;`.
pub fn parse_actions(src: &str) -> Result<Vec<Action>, ConfigError> {
    let mut parser = Parser::new(src)?;
    let mut actions = Vec::new();
    while parser.lookahead != Token::Eof {
        actions.push(parser.parse_action()?);
        parser.expect(&Token::Semi)?;
    }
    Ok(actions)
}

pub fn write(tree: &ConfigTree) -> String {
    let mut out = String::new();
    for cmd in &tree.commands {
        write_cmd(&mut out, 0, cmd);
    }
    for group in &tree.groups {
        write_group(&mut out, 0, group);
    }
    for script in &tree.scripts {
        write_script(&mut out, script);
    }
    out
}

fn indent(out: &mut String, depth: usize) {
    out.push_str(&"  ".repeat(depth));
}

fn write_group(out: &mut String, depth: usize, group: &GroupNode) {
    indent(out, depth);
    out.push_str(&format!("group \"{}\" {{\n", group.name));
    for cmd in &group.commands {
        write_cmd(out, depth + 1, cmd);
    }
    for sub in &group.groups {
        write_group(out, depth + 1, sub);
    }
    indent(out, depth);
    out.push_str("}\n");
}

fn write_cmd(out: &mut String, depth: usize, cmd: &CommandNode) {
    indent(out, depth);
    out.push_str("cmd {\n");
    indent(out, depth + 1);
    out.push_str(&format!("exec=\"{}\";\n", cmd.exec));
    indent(out, depth + 1);
    out.push_str(&format!("command_id=\"{}\";\n", cmd.command_id));
    indent(out, depth + 1);
    out.push_str(&format!("deputy=\"{}\";\n", cmd.deputy));
    indent(out, depth + 1);
    out.push_str(&format!("auto_respawn={};\n", cmd.auto_respawn));
    indent(out, depth + 1);
    out.push_str(&format!("stop_signal={};\n", cmd.stop_signal));
    indent(out, depth + 1);
    out.push_str(&format!("stop_time_allowed={};\n", cmd.stop_time_allowed));
    indent(out, depth);
    out.push_str("}\n");
}

fn write_script(out: &mut String, script: &ScriptNode) {
    out.push_str(&format!("script \"{}\" {{\n", script.name));
    for action in &script.actions {
        out.push_str("  ");
        out.push_str(&write_action(action));
        out.push_str(";\n");
    }
    out.push_str("}\n");
}

fn write_action(action: &Action) -> String {
    match action {
        Action::StartStopRestart { kind, target, wait_status } => {
            let verb = match kind {
                ActionKind::Start => "start",
                ActionKind::Stop => "stop",
                ActionKind::Restart => "restart",
            };
            let target = write_target(target);
            match wait_status {
                Some(w) => format!("{verb} {target} wait {}", write_wait_status(*w)),
                None => format!("{verb} {target}"),
            }
        }
        Action::WaitMs { delay_ms } => format!("wait ms {delay_ms}"),
        Action::WaitStatus { target, wait_status } => {
            format!("wait {} {}", write_target(target), write_wait_status(*wait_status))
        }
        Action::RunScript { name } => format!("run_script \"{name}\""),
    }
}

fn write_target(target: &Target) -> String {
    match target {
        Target::Everything => "everything".to_string(),
        Target::Group(path) => format!("group \"{path}\""),
        Target::Cmd(id) => format!("cmd \"{id}\""),
    }
}

fn write_wait_status(kind: WaitStatusKind) -> String {
    match kind {
        WaitStatusKind::Running => "\"running\"".to_string(),
        WaitStatusKind::Stopped => "\"stopped\"".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_group_and_cmd_grammar() {
        let src = r#"
            group "web" {
                cmd {
                    exec="/bin/sleep 60";
                    command_id="s1";
                    deputy="dep1";
                    auto_respawn=true;
                    stop_signal=15;
                    stop_time_allowed=5;
                }
            }
        "#;
        let tree = parse(src).unwrap();
        assert_eq!(tree.groups.len(), 1);
        assert_eq!(tree.groups[0].name, "web");
        assert_eq!(tree.groups[0].commands[0].command_id, "s1");
        assert!(tree.groups[0].commands[0].auto_respawn);
    }

    #[test]
    fn parses_script_with_wait_statements() {
        let src = r#"start cmd "s1" wait "running"; wait ms 100; stop cmd "s1" wait "stopped";"#;
        let actions = parse_actions(src).unwrap();
        assert_eq!(actions.len(), 3);
        assert!(matches!(
            actions[0],
            Action::StartStopRestart { kind: ActionKind::Start, wait_status: Some(WaitStatusKind::Running), .. }
        ));
        assert_eq!(actions[1], Action::WaitMs { delay_ms: 100 });
        assert!(matches!(
            actions[2],
            Action::StartStopRestart { kind: ActionKind::Stop, wait_status: Some(WaitStatusKind::Stopped), .. }
        ));
    }

    #[test]
    fn write_then_parse_round_trips() {
        let mut tree = ConfigTree::default();
        tree.commands.push(CommandNode {
            exec: "/bin/true".into(),
            command_id: "c1".into(),
            deputy: "dep1".into(),
            auto_respawn: false,
            stop_signal: 9,
            stop_time_allowed: 2,
        });
        tree.scripts.push(ScriptNode {
            name: "p".into(),
            actions: vec![Action::WaitMs { delay_ms: 50 }, Action::RunScript { name: "q".into() }],
        });

        let text = write(&tree);
        let reparsed = parse(&text).unwrap();
        assert_eq!(reparsed, tree);
    }

    #[test]
    fn unterminated_string_is_a_text_error() {
        let err = parse(r#"cmd { exec="oops }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Text(_)));
    }
}
