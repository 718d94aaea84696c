//! Transpiler bridge
//!
//! Converts between the two surface syntaxes over the same checked AST:
//! the canonical brace syntax (`.brio`) and the indentation-based flow
//! syntax (`.flow`). The bridge is purely a syntax transcoder: it shares
//! the emitter's semantic model and must not introduce constructs the
//! emitter cannot lower deterministically. Failures are reported as
//! ordinary diagnostics; neither direction panics past its boundary.

use brio_core::{
    BinOp, Block, CaseValue, CheckedProgram, ClassDecl, Diagnostic, DiagnosticCategory, Expr,
    FunctionDecl, LValue, Program, Stmt, Ty, UnOp,
};
use std::collections::BTreeMap;

/// One line-to-symbol record of the generated text.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMapEntry {
    pub line: u32,
    pub symbol: String,
}

/// Result of a bridge pass.
#[derive(Debug, Default)]
pub struct TranspileResult {
    pub outfiles: BTreeMap<String, String>,
    pub source_map: Vec<SourceMapEntry>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Diagnostic code for constructs the flow syntax cannot express.
const INEXPRESSIBLE: u32 = 7001;

#[derive(Clone, Copy, PartialEq)]
enum Style {
    Braces,
    Indent,
}

/// The transpiler bridge.
pub struct Bridge;

impl Bridge {
    /// Canonical → flow syntax.
    pub fn forward(program: &CheckedProgram) -> TranspileResult {
        Self::render(program, Style::Indent, "main.flow")
    }

    /// Flow → canonical syntax, into the named output file.
    pub fn reverse(program: &CheckedProgram, target_file: &str) -> TranspileResult {
        Self::render(program, Style::Braces, target_file)
    }

    fn render(program: &CheckedProgram, style: Style, outfile: &str) -> TranspileResult {
        let mut r = Renderer {
            program: &program.program,
            style,
            out: String::new(),
            indent: 0,
            line: 0,
            map: Vec::new(),
            diagnostics: Vec::new(),
        };
        r.render_program();
        let mut result = TranspileResult {
            outfiles: BTreeMap::new(),
            source_map: r.map,
            diagnostics: r.diagnostics,
        };
        result.outfiles.insert(outfile.to_string(), r.out);
        result
    }
}

struct Renderer<'a> {
    program: &'a Program,
    style: Style,
    out: String,
    indent: usize,
    line: u32,
    map: Vec<SourceMapEntry>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Renderer<'a> {
    fn push_line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
        self.line += 1;
    }

    fn mark(&mut self, symbol: &str) {
        self.map.push(SourceMapEntry {
            line: self.line,
            symbol: symbol.to_string(),
        });
    }

    fn open(&mut self, header: &str) {
        match self.style {
            Style::Braces => self.push_line(&format!("{} {{", header)),
            Style::Indent => self.push_line(&format!("{}:", header)),
        }
        self.indent += 1;
    }

    fn close(&mut self) {
        self.indent -= 1;
        if self.style == Style::Braces {
            self.push_line("}");
        }
    }

    fn render_program(&mut self) {
        let program = self.program;
        for (i, e) in program.enums.iter().enumerate() {
            self.mark(&e.name);
            let keyword = if e.is_bitmask { "flags enum" } else { "enum" };
            self.open(&format!("{} {}", keyword, e.name));
            for member in &e.members {
                match member.value {
                    Some(v) => self.push_line(&format!("{} = {}", member.name, v)),
                    None => self.push_line(&member.name),
                }
            }
            self.close();
            if i + 1 < program.enums.len() {
                self.push_line("");
            }
        }
        for g in &program.globals {
            self.mark(&g.name);
            let init = g
                .init
                .as_ref()
                .map(|e| format!(" = {}", self.expr(e)))
                .unwrap_or_default();
            let ty = self.ty(&g.ty);
            self.push_line(&format!("let {}: {}{}", g.name, ty, init));
        }
        for class in &program.classes {
            self.render_class(class);
        }
        for func in &program.functions {
            self.render_function(func, "function");
        }
    }

    fn render_class(&mut self, class: &ClassDecl) {
        self.mark(&class.name);
        let mut header = format!("class {}", class.name);
        if let Some(parent) = class.parent {
            if let Some(p) = self.program.class(parent) {
                header.push_str(&format!(" extends {}", p.name));
            }
        }
        self.open(&header);
        for field in &class.fields {
            let ty = self.ty(&field.ty);
            self.push_line(&format!("{}: {}", field.name, ty));
        }
        if let Some(ctor) = &class.ctor {
            self.render_function(ctor, "constructor");
        }
        for method in &class.methods {
            self.render_function(method, "method");
        }
        self.close();
        self.push_line("");
    }

    fn render_function(&mut self, func: &FunctionDecl, keyword: &str) {
        self.mark(&func.name);
        let params = func
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, self.ty(&p.ty)))
            .collect::<Vec<_>>()
            .join(", ");
        let ret = if func.ret == Ty::Void {
            String::new()
        } else {
            format!(" -> {}", self.ty(&func.ret))
        };
        let generics = if func.type_params.is_empty() {
            String::new()
        } else {
            format!("<{}>", func.type_params.join(", "))
        };
        self.open(&format!(
            "{} {}{}({}){}",
            keyword, func.name, generics, params, ret
        ));
        self.render_block(&func.body);
        self.close();
        self.push_line("");
    }

    fn render_block(&mut self, block: &Block) {
        if block.is_empty() {
            self.push_line("pass");
            return;
        }
        for stmt in block {
            self.render_stmt(stmt);
        }
    }

    fn render_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { name, ty, init } => {
                let init = init
                    .as_ref()
                    .map(|e| format!(" = {}", self.expr(e)))
                    .unwrap_or_default();
                let ty = self.ty(ty);
                self.push_line(&format!("let {}: {}{}", name, ty, init));
            }
            Stmt::Assign { target, value } => {
                let target = self.lvalue(target);
                let value = self.expr(value);
                self.push_line(&format!("{} = {}", target, value));
            }
            Stmt::Expr(e) => {
                let text = self.expr(e);
                self.push_line(&text);
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.expr(cond);
                self.open(&format!("if {}", cond));
                self.render_block(then_branch);
                self.close();
                if let Some(else_branch) = else_branch {
                    self.open("else");
                    self.render_block(else_branch);
                    self.close();
                }
            }
            Stmt::While { cond, body } => {
                let cond = self.expr(cond);
                self.open(&format!("while {}", cond));
                self.render_block(body);
                self.close();
            }
            Stmt::Break => self.push_line("break"),
            Stmt::Continue => self.push_line("continue"),
            Stmt::Return(value) => match value {
                Some(e) => {
                    let text = self.expr(e);
                    self.push_line(&format!("return {}", text));
                }
                None => self.push_line("return"),
            },
            Stmt::Switch { scrutinee, cases } => {
                let scrutinee = self.expr(scrutinee);
                self.open(&format!("switch {}", scrutinee));
                for case in cases {
                    match case.value {
                        Some(CaseValue::Int(v)) => self.open(&format!("case {}", v)),
                        Some(CaseValue::Enum(id, member)) => {
                            let name = self
                                .program
                                .enum_decl(id)
                                .and_then(|e| {
                                    e.members
                                        .get(member as usize)
                                        .map(|m| format!("{}.{}", e.name, m.name))
                                })
                                .unwrap_or_else(|| "?".to_string());
                            self.open(&format!("case {}", name));
                        }
                        None => self.open("default"),
                    }
                    self.render_block(&case.body);
                    self.close();
                }
                self.close();
            }
            Stmt::Try {
                body,
                catch,
                finally,
            } => {
                self.open("try");
                self.render_block(body);
                self.close();
                if let Some(catch) = catch {
                    self.open(&format!("catch {}", catch.name));
                    self.render_block(&catch.body);
                    self.close();
                }
                if let Some(finally) = finally {
                    self.open("finally");
                    self.render_block(finally);
                    self.close();
                }
            }
            Stmt::Throw(e) => {
                let text = self.expr(e);
                self.push_line(&format!("throw {}", text));
            }
            Stmt::Background(body) => {
                self.open("background");
                self.render_block(body);
                self.close();
            }
            Stmt::Block(block) => {
                self.open("do");
                self.render_block(block);
                self.close();
            }
        }
    }

    fn lvalue(&mut self, target: &LValue) -> String {
        match target {
            LValue::Local(name) | LValue::Global(name) => name.clone(),
            LValue::Field { obj, field } => format!("{}.{}", self.expr(obj), field),
            LValue::Index { array, index } => {
                format!("{}[{}]", self.expr(array), self.expr(index))
            }
        }
    }

    fn expr(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Int(v) => v.to_string(),
            Expr::Bool(v) => v.to_string(),
            Expr::Str(s) => format!("{:?}", s),
            Expr::Null => "null".to_string(),
            Expr::Image(img) => format!("img`{}x{}@{}`", img.width, img.height, img.bpp),
            Expr::Local(name) | Expr::Global(name) => name.clone(),
            Expr::This => "this".to_string(),
            Expr::ArrayLit { elems, .. } => {
                let elems = elems
                    .iter()
                    .map(|e| self.expr(e))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("[{}]", elems)
            }
            Expr::Index { array, index } => {
                format!("{}[{}]", self.expr(array), self.expr(index))
            }
            Expr::Unary { op, operand } => {
                let op = match op {
                    UnOp::Neg => "-",
                    UnOp::Not => "!",
                    UnOp::BitNot => "~",
                };
                format!("{}{}", op, self.expr(operand))
            }
            Expr::Binary { op, lhs, rhs } => {
                format!("({} {} {})", self.expr(lhs), bin_op(*op), self.expr(rhs))
            }
            Expr::Call { func, args, .. } => {
                format!("{}({})", func, self.args(args))
            }
            Expr::CallValue { callee, args } => {
                format!("{}({})", self.expr(callee), self.args(args))
            }
            Expr::MethodCall { recv, method, args } => {
                format!("{}.{}({})", self.expr(recv), method, self.args(args))
            }
            Expr::New { class, args } => {
                let name = self
                    .program
                    .class(*class)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| class.to_string());
                format!("new {}({})", name, self.args(args))
            }
            Expr::Field { obj, field } => format!("{}.{}", self.expr(obj), field),
            Expr::Lambda { params, body, .. } => {
                if self.style == Style::Indent && has_background(body) {
                    // Flow syntax has no background form inside a function
                    // expression; surface it rather than emit text the
                    // parser would reshape.
                    self.diagnostics.push(Diagnostic {
                        file: None,
                        line: self.line,
                        character: 0,
                        category: DiagnosticCategory::Semantic,
                        code: INEXPRESSIBLE,
                        message: "background block inside a function expression cannot be \
                                  expressed in flow syntax"
                            .to_string(),
                    });
                }
                let params = params
                    .iter()
                    .map(|p| p.name.clone())
                    .collect::<Vec<_>>()
                    .join(", ");
                // Function expressions render inline only in trivial
                // single-return form; otherwise as a placeholder body.
                if let [Stmt::Return(Some(e))] = body.as_slice() {
                    format!("({}) => {}", params, self.expr(e))
                } else {
                    format!("({}) => ...", params)
                }
            }
            Expr::InstanceOf { expr, class } => {
                let name = self
                    .program
                    .class(*class)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| class.to_string());
                format!("({} instanceof {})", self.expr(expr), name)
            }
            Expr::EnumRef { enum_id, member } => self
                .program
                .enum_decl(*enum_id)
                .and_then(|e| {
                    e.members
                        .get(*member as usize)
                        .map(|m| format!("{}.{}", e.name, m.name))
                })
                .unwrap_or_else(|| "?".to_string()),
            Expr::Cast { expr, ty } => {
                let ty = self.ty(ty);
                format!("({} as {})", self.expr(expr), ty)
            }
        }
    }

    fn args(&mut self, args: &[Expr]) -> String {
        args.iter()
            .map(|a| self.expr(a))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn ty(&self, ty: &Ty) -> String {
        match ty {
            Ty::Class(id) => self
                .program
                .class(*id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| id.to_string()),
            Ty::Interface(id) => self
                .program
                .interface(*id)
                .map(|i| i.name.clone())
                .unwrap_or_else(|| id.to_string()),
            Ty::Enum(id) => self
                .program
                .enum_decl(*id)
                .map(|e| e.name.clone())
                .unwrap_or_else(|| id.to_string()),
            Ty::Array(inner) => format!("{}[]", self.ty(inner)),
            other => other.to_string(),
        }
    }
}

/// Does a block contain a background statement at any nesting depth?
fn has_background(block: &Block) -> bool {
    block.iter().any(|stmt| match stmt {
        Stmt::Background(_) => true,
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => {
            has_background(then_branch)
                || else_branch.as_ref().is_some_and(|b| has_background(b))
        }
        Stmt::While { body, .. } => has_background(body),
        Stmt::Switch { cases, .. } => cases.iter().any(|c| has_background(&c.body)),
        Stmt::Try {
            body,
            catch,
            finally,
        } => {
            has_background(body)
                || catch.as_ref().is_some_and(|c| has_background(&c.body))
                || finally.as_ref().is_some_and(|f| has_background(f))
        }
        Stmt::Block(b) => has_background(b),
        _ => false,
    })
}

fn bin_op(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::And => "&&",
        BinOp::Or => "||",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
        BinOp::BitXor => "^",
        BinOp::Shl => "<<",
        BinOp::Shr => ">>",
    }
}
