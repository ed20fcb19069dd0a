//! IR Printer - human-readable dump of a module tree
//!
//! Used by the driver's `--dump-before` flag to show what the optimizer
//! receives. Loops print their plans, expressions print in source-like form
//! with pending casts made explicit.

use crate::middle::ir::*;

/// Pretty printer for module trees
pub struct IRPrinter {
    output: String,
    indent: usize,
}

impl IRPrinter {
    pub fn new() -> Self {
        Self {
            output: String::new(),
            indent: 0,
        }
    }

    /// Print a module to string
    pub fn print_module(&mut self, module: &Module) -> String {
        self.output.clear();
        self.indent = 0;

        self.line(&format!("; Module: stage {} (schema {})", module.east_stage, module.schema_version));
        self.line(&format!("; Statements: {}", module.body.len()));
        self.line("");
        self.print_block(&module.body);

        self.output.clone()
    }

    fn line(&mut self, text: &str) {
        if !text.is_empty() {
            for _ in 0..self.indent {
                self.output.push_str("    ");
            }
            self.output.push_str(text);
        }
        self.output.push('\n');
    }

    fn print_block(&mut self, stmts: &[Stmt]) {
        if stmts.is_empty() {
            self.line("pass");
            return;
        }
        for stmt in stmts {
            self.print_stmt(stmt);
        }
    }

    /// Print a nested block under a header line
    fn print_nested(&mut self, header: &str, stmts: &[Stmt]) {
        self.line(header);
        self.indent += 1;
        self.print_block(stmts);
        self.indent -= 1;
    }

    fn print_else(&mut self, orelse: &[Stmt]) {
        if !orelse.is_empty() {
            self.print_nested("else:", orelse);
        }
    }

    /// Print a statement
    fn print_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr { value } => self.line(&self.expr_str(value)),
            StmtKind::Assign { target, value } => {
                let text = format!(
                    "{}: {} = {}",
                    self.expr_str(target),
                    target.resolved_type,
                    self.expr_str(value)
                );
                self.line(&text);
            }
            StmtKind::AnnAssign { target, annotation, value, .. } => {
                let text = match value {
                    Some(value) => format!("{}: {} = {}", self.expr_str(target), annotation, self.expr_str(value)),
                    None => format!("{}: {}", self.expr_str(target), annotation),
                };
                self.line(&text);
            }
            StmtKind::AugAssign { target, op, value } => {
                let text = format!("{} {}= {}", self.expr_str(target), op, self.expr_str(value));
                self.line(&text);
            }
            StmtKind::Return { value } => match value {
                Some(v) => self.line(&format!("return {}", self.expr_str(v))),
                None => self.line("return"),
            },
            StmtKind::Raise { exc } => match exc {
                Some(e) => self.line(&format!("raise {}", self.expr_str(e))),
                None => self.line("raise"),
            },
            StmtKind::If { test, body, orelse } => {
                self.print_nested(&format!("if {}:", self.expr_str(test)), body);
                self.print_else(orelse);
            }
            StmtKind::While { test, body, orelse } => {
                self.print_nested(&format!("while {}:", self.expr_str(test)), body);
                self.print_else(orelse);
            }
            StmtKind::For { target, iter, body, orelse, .. } => {
                let header = format!("for {} in {}:", self.expr_str(target), self.expr_str(iter));
                self.print_nested(&header, body);
                self.print_else(orelse);
            }
            StmtKind::ForRange { target, start, stop, step, range_mode, body, orelse, .. } => {
                let header = format!(
                    "for {} in range({}, {}, {}) [{}]:",
                    self.expr_str(target),
                    self.expr_str(start),
                    self.expr_str(stop),
                    self.expr_str(step),
                    range_mode.as_str()
                );
                self.print_nested(&header, body);
                self.print_else(orelse);
            }
            StmtKind::ForCore { iter_mode, iter_plan, target_plan, body, orelse, normalized_cond, reserve_hints } => {
                let mut header = format!("for {} in {}", self.target_str(target_plan), self.plan_str(iter_plan));
                if let Some(cond) = normalized_cond {
                    header.push_str(&format!(" while {}", self.expr_str(cond)));
                }
                header.push(':');
                header.push_str(&format!("  ; {}", iter_mode.as_str()));
                for hint in reserve_hints {
                    header.push_str(&format!(" reserve {}({})", hint.owner, self.expr_str(&hint.count_expr)));
                }
                self.print_nested(&header, body);
                self.print_else(orelse);
            }
            StmtKind::Try { body, handlers, orelse, finalbody } => {
                self.print_nested("try:", body);
                for handler in handlers {
                    let mut header = "except".to_string();
                    if let Some(exc_type) = &handler.exc_type {
                        header.push_str(&format!(" {}", self.expr_str(exc_type)));
                    }
                    if let Some(name) = &handler.name {
                        header.push_str(&format!(" as {}", name));
                    }
                    header.push(':');
                    self.print_nested(&header, &handler.body);
                }
                self.print_else(orelse);
                if !finalbody.is_empty() {
                    self.print_nested("finally:", finalbody);
                }
            }
            StmtKind::FunctionDef { name, params, returns, body, .. } => {
                let params: Vec<_> = params.iter().map(|p| format!("{}: {}", p.name, p.annotation)).collect();
                self.print_nested(&format!("def {}({}) -> {}:", name, params.join(", "), returns), body);
            }
            StmtKind::ClassDef { name, bases, body, type_id } => {
                let mut header = format!("class {}({})", name, bases.join(", "));
                if let Some(id) = type_id {
                    header.push_str(&format!(" #{}", id));
                }
                header.push(':');
                self.print_nested(&header, body);
            }
            StmtKind::Pass => self.line("pass"),
            StmtKind::Break => self.line("break"),
            StmtKind::Continue => self.line("continue"),
        }
    }

    fn plan_str(&self, plan: &IterPlan) -> String {
        match plan {
            IterPlan::StaticRange { start, stop, step, range_mode } => format!(
                "static_range({}, {}, {}) [{}]",
                self.expr_str(start),
                self.expr_str(stop),
                self.expr_str(step),
                range_mode.as_str()
            ),
            IterPlan::RuntimeIter { iter_expr, dispatch_mode, iter_item_type, .. } => {
                let mode = match dispatch_mode {
                    DispatchMode::Native => "native",
                    DispatchMode::TypeId => "type_id",
                };
                format!("runtime_iter({}) [{}, item: {}]", self.expr_str(iter_expr), mode, iter_item_type)
            }
        }
    }

    fn target_str(&self, plan: &TargetPlan) -> String {
        match plan {
            TargetPlan::NameTarget { id, target_type } => format!("{}: {}", id, target_type),
            TargetPlan::TupleTarget { elements, direct_unpack, .. } => {
                let elems: Vec<_> = elements.iter().map(|e| self.target_str(e)).collect();
                let marker = if *direct_unpack { " [direct]" } else { "" };
                format!("({}){}", elems.join(", "), marker)
            }
            TargetPlan::ExprTarget { target, .. } => self.expr_str(target),
        }
    }

    fn join(&self, exprs: &[Expr]) -> String {
        exprs.iter().map(|e| self.expr_str(e)).collect::<Vec<_>>().join(", ")
    }

    /// Convert expression to string, wrapping pending casts
    fn expr_str(&self, expr: &Expr) -> String {
        let mut text = self.kind_str(expr);
        for cast in &expr.casts {
            text = format!("cast<{} -> {}>({})", cast.from, cast.to, text);
        }
        text
    }

    fn kind_str(&self, expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Constant { value } => value.to_string(),
            ExprKind::Name { id } => id.clone(),
            ExprKind::BinOp { left, op, right } => {
                format!("({} {} {})", self.expr_str(left), op, self.expr_str(right))
            }
            ExprKind::BoolOp { op, values } => {
                let sep = match op {
                    BoolOp::And => " and ",
                    BoolOp::Or => " or ",
                };
                let parts: Vec<_> = values.iter().map(|v| self.expr_str(v)).collect();
                format!("({})", parts.join(sep))
            }
            ExprKind::Compare { left, ops, comparators } => {
                let mut text = self.expr_str(left);
                for (op, right) in ops.iter().zip(comparators) {
                    text.push_str(&format!(" {} {}", op, self.expr_str(right)));
                }
                format!("({})", text)
            }
            ExprKind::UnaryOp { op, operand } => {
                let op_str = match op {
                    UnaryOp::UAdd => "+",
                    UnaryOp::USub => "-",
                    UnaryOp::Not => "not ",
                    UnaryOp::Invert => "~",
                };
                format!("{}{}", op_str, self.expr_str(operand))
            }
            ExprKind::IfExp { test, body, orelse } => format!(
                "({} if {} else {})",
                self.expr_str(body),
                self.expr_str(test),
                self.expr_str(orelse)
            ),
            ExprKind::Call { func, args, keywords, builtin } => {
                let mut parts = vec![self.join(args)];
                parts.extend(keywords.iter().map(|k| match &k.arg {
                    Some(arg) => format!("{}={}", arg, self.expr_str(&k.value)),
                    None => format!("**{}", self.expr_str(&k.value)),
                }));
                parts.retain(|p| !p.is_empty());
                let call = format!("{}({})", self.expr_str(func), parts.join(", "));
                match builtin {
                    Some(b) => format!("{}@{}", call, b.runtime_call.as_str()),
                    None => call,
                }
            }
            ExprKind::Attribute { value, attr } => format!("{}.{}", self.expr_str(value), attr),
            ExprKind::Subscript { value, slice } => format!("{}[{}]", self.expr_str(value), self.expr_str(slice)),
            ExprKind::List { elements } => format!("[{}]", self.join(elements)),
            ExprKind::Tuple { elements } => format!("({})", self.join(elements)),
            ExprKind::Set { elements } => format!("{{{}}}", self.join(elements)),
            ExprKind::Dict { keys, values } => {
                let items: Vec<_> = keys
                    .iter()
                    .zip(values)
                    .map(|(k, v)| format!("{}: {}", self.expr_str(k), self.expr_str(v)))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            ExprKind::ListComp { elt, generators } => {
                let mut text = format!("[{}", self.expr_str(elt));
                for generator in generators {
                    text.push_str(&format!(
                        " for {} in {}",
                        self.expr_str(&generator.target),
                        self.expr_str(&generator.iter)
                    ));
                    for cond in &generator.ifs {
                        text.push_str(&format!(" if {}", self.expr_str(cond)));
                    }
                }
                text.push(']');
                text
            }
            ExprKind::Boxed { value } => format!("box({})", self.expr_str(value)),
            ExprKind::Unbox { value, target } => format!("unbox<{}>({})", target, self.expr_str(value)),
            ExprKind::CastOrRaise { value, target } => {
                format!("cast_or_raise<{}>({})", target, self.expr_str(value))
            }
            ExprKind::ObjBool { value } => format!("obj_bool({})", self.expr_str(value)),
            ExprKind::ObjLen { value } => format!("obj_len({})", self.expr_str(value)),
            ExprKind::ObjStr { value } => format!("obj_str({})", self.expr_str(value)),
            ExprKind::ObjIterInit { value } => format!("obj_iter_init({})", self.expr_str(value)),
            ExprKind::ObjIterNext { iter } => format!("obj_iter_next({})", self.expr_str(iter)),
            ExprKind::ObjTypeId { value } => format!("obj_type_id({})", self.expr_str(value)),
            ExprKind::IsInstance { value, expected } => {
                format!("is_instance({}, {}#{})", self.expr_str(value), expected.name, expected.id)
            }
            ExprKind::IsSubclass { actual, expected } => {
                format!("is_subclass({}, {}#{})", self.expr_str(actual), expected.name, expected.id)
            }
            ExprKind::IsSubtype { actual, expected } => {
                format!("is_subtype({}, {}#{})", self.expr_str(actual), expected.name, expected.id)
            }
        }
    }
}

impl Default for IRPrinter {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function to print a module
pub fn print_ir(module: &Module) -> String {
    let mut printer = IRPrinter::new();
    printer.print_module(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeName;

    fn range_loop(body: Vec<Stmt>) -> Stmt {
        Stmt::new(StmtKind::for_core(
            IterPlan::StaticRange {
                start: Expr::int(0),
                stop: Expr::int(5),
                step: Expr::int(1),
                range_mode: RangeMode::Ascending,
            },
            TargetPlan::name("i", TypeName::int64()),
            body,
            vec![],
        ))
    }

    #[test]
    fn test_print_empty_module() {
        let ir = print_ir(&Module::new(STAGE_LOWERED, vec![]));
        assert!(ir.contains("; Module: stage 3"));
        assert!(ir.contains("pass"));
    }

    #[test]
    fn test_print_loop_plan() {
        let body = vec![Stmt::assign(
            Expr::name("y", "int64"),
            Expr::binop(Expr::int(2), BinOp::Add, Expr::int(3), "int64"),
        )];
        let ir = print_ir(&Module::new(STAGE_LOWERED, vec![range_loop(body)]));
        assert!(ir.contains("for i: int64 in static_range(0, 5, 1) [ascending]:  ; static_fastpath"));
        assert!(ir.contains("    y: int64 = (2 + 3)"));
        println!("{}", ir);
    }

    #[test]
    fn test_print_casts_and_lowered_nodes() {
        let value = Expr::new(
            ExprKind::Unbox { value: Box::new(Expr::name("o", "object")), target: TypeName::int64() },
            TypeName::int64(),
        )
        .with_casts(vec![Cast::new(TypeName::int64(), TypeName::float64(), "promote")]);
        let ir = print_ir(&Module::new(STAGE_LOWERED, vec![Stmt::expr(value)]));
        assert!(ir.contains("cast<int64 -> float64>(unbox<int64>(o))"));
    }
}
