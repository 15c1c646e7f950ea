//! Name resolution and type checking: untyped syntax tree → [`Module`].
//!
//! Checking runs in passes so declarations may be used before they appear:
//! 1. declare every namespace, processor, graph, function and constant;
//! 2. evaluate namespace constants in source order;
//! 3. check namespace function bodies;
//! 4. check processors (endpoints, state, handlers, bodies);
//! 5. check graphs (endpoints, then nodes and connections);
//! 6. reject recursion and self-containing graphs, then pick the main entry.
//!
//! The first error stops the pass.

use std::collections::{BTreeSet, HashSet};

use super::scope::{GlobalKind, GlobalScope, LocalScopes, LocalVar, Member, ProcessorScope};
use super::tir::{
    self, Connection, Endpoint, Expr, ExprKind, External, FunctionId, GraphId, Module, Node,
    Param, Place, PortRef, ProcessorId, ProcessorRef, Root, StateVar,
};
use super::types::Type;
use crate::diagnostic::{Diagnostic, SourceLocation};
use crate::runtime::ops::{Intrinsic, ProcessorProperty};
use crate::runtime::value::Value;
use crate::syntax::ast::{self, BinaryOp, Direction, EndpointKind, UnaryOp};

const ADVANCE_OUTSIDE_MAIN: &str = "advance() can only be called from a processor's main() function";
const ASSIGN_TO_CONSTANT: &str = "Cannot assign to a constant value";
const ASSIGN_TO_EXPRESSION: &str = "Cannot assign to this expression";

/// Check every fragment of a program as one unit.
pub fn check(units: &[ast::SourceUnit]) -> Result<Module, Diagnostic> {
    let mut checker = Checker::default();
    for unit in units {
        checker.declare_items(&[], &unit.items)?;
    }
    checker.check_constants()?;
    checker.check_namespace_functions()?;
    for id in 0..checker.module.processors.len() {
        checker.check_processor(id)?;
    }
    checker.check_graphs()?;
    checker.check_recursion()?;
    checker.module.main = checker.flagged_main.or(checker.declared.last().copied());
    Ok(checker.module)
}

fn error(message: impl Into<String>, location: &SourceLocation) -> Diagnostic {
    Diagnostic::semantic(message, location.clone())
}

fn name_in_use(name: &str, location: &SourceLocation) -> Diagnostic {
    error(format!("The name '{name}' is already in use"), location)
}

fn type_list(args: &[Expr]) -> String {
    args.iter()
        .map(|a| a.ty.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn same_params(a: &[Param], b: &[Param]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.ty == y.ty)
}

/// State for the body currently being checked.
struct Context {
    namespace: Vec<String>,
    processor: Option<ProcessorId>,
    is_main: bool,
    return_type: Type,
    locals: Vec<Type>,
    scopes: LocalScopes,
    loop_depth: usize,
    calls: BTreeSet<FunctionId>,
    writes_console: bool,
}

impl Context {
    fn new(namespace: Vec<String>, processor: Option<ProcessorId>, return_type: Type) -> Self {
        Self {
            namespace,
            processor,
            is_main: false,
            return_type,
            locals: Vec::new(),
            scopes: LocalScopes::default(),
            loop_depth: 0,
            calls: BTreeSet::new(),
            writes_console: false,
        }
    }

    fn allocate(&mut self, ty: Type) -> usize {
        self.locals.push(ty);
        self.locals.len() - 1
    }
}

enum WriteTarget {
    Console,
    Output {
        index: usize,
        kind: EndpointKind,
        ty: Type,
    },
}

#[derive(Default)]
struct Checker<'a> {
    module: Module,
    globals: GlobalScope,
    members: Vec<ProcessorScope>,
    processor_src: Vec<(Vec<String>, &'a ast::ProcessorDecl)>,
    graph_src: Vec<(Vec<String>, &'a ast::GraphDecl)>,
    function_src: Vec<(Vec<String>, &'a ast::FunctionDecl, FunctionId)>,
    constant_src: Vec<(Vec<String>, &'a ast::VarDecl)>,
    declared: Vec<ProcessorRef>,
    flagged_main: Option<ProcessorRef>,
}

impl<'a> Checker<'a> {
    // ---- pass 1: declarations --------------------------------------------

    fn declare_items(&mut self, namespace: &[String], items: &'a [ast::Item]) -> Result<(), Diagnostic> {
        for item in items {
            match item {
                ast::Item::Namespace(ns) => {
                    let qualified = GlobalScope::qualify(namespace, &ns.name);
                    if !self.globals.reserve(&qualified, GlobalKind::Namespace) {
                        return Err(name_in_use(&ns.name, &ns.location));
                    }
                    let mut inner = namespace.to_vec();
                    inner.push(ns.name.clone());
                    self.declare_items(&inner, &ns.items)?;
                }
                ast::Item::Processor(p) => {
                    let qualified = GlobalScope::qualify(namespace, &p.name);
                    if !self.globals.reserve(&qualified, GlobalKind::Processor) {
                        return Err(name_in_use(&p.name, &p.location));
                    }
                    let id = self.module.processors.len();
                    self.module.processors.push(tir::Processor {
                        name: qualified.clone(),
                        location: p.location.clone(),
                        inputs: Vec::new(),
                        outputs: Vec::new(),
                        state: Vec::new(),
                        externals: Vec::new(),
                        init: 0,
                        main: 0,
                        handlers: Vec::new(),
                    });
                    self.members.push(ProcessorScope::default());
                    self.processor_src.push((namespace.to_vec(), p));
                    let r = ProcessorRef::Processor(id);
                    self.globals.processors.insert(qualified, r);
                    self.register_entry(r, p.is_main, &p.location)?;
                }
                ast::Item::Graph(g) => {
                    let qualified = GlobalScope::qualify(namespace, &g.name);
                    if !self.globals.reserve(&qualified, GlobalKind::Processor) {
                        return Err(name_in_use(&g.name, &g.location));
                    }
                    let id = self.module.graphs.len();
                    self.module.graphs.push(tir::Graph {
                        name: qualified.clone(),
                        location: g.location.clone(),
                        inputs: Vec::new(),
                        outputs: Vec::new(),
                        nodes: Vec::new(),
                        connections: Vec::new(),
                    });
                    self.graph_src.push((namespace.to_vec(), g));
                    let r = ProcessorRef::Graph(id);
                    self.globals.processors.insert(qualified, r);
                    self.register_entry(r, g.is_main, &g.location)?;
                }
                ast::Item::Function(f) => {
                    let qualified = GlobalScope::qualify(namespace, &f.name);
                    if !self.globals.reserve(&qualified, GlobalKind::Function) {
                        return Err(name_in_use(&f.name, &f.location));
                    }
                    let (params, return_type) = self.signature(f)?;
                    if let Some(existing) = self.globals.functions.get(&qualified) {
                        if existing
                            .iter()
                            .any(|&id| same_params(&self.module.functions[id].params, &params))
                        {
                            return Err(name_in_use(&f.name, &f.location));
                        }
                    }
                    let id = self.new_function(&f.name, None, params, return_type, &f.location);
                    self.globals.functions.entry(qualified).or_default().push(id);
                    self.function_src.push((namespace.to_vec(), f, id));
                }
                ast::Item::Constant(c) => {
                    let qualified = GlobalScope::qualify(namespace, &c.name);
                    if !self.globals.reserve(&qualified, GlobalKind::Constant) {
                        return Err(name_in_use(&c.name, &c.location));
                    }
                    self.constant_src.push((namespace.to_vec(), c));
                }
            }
        }
        Ok(())
    }

    fn register_entry(
        &mut self,
        r: ProcessorRef,
        is_main: bool,
        location: &SourceLocation,
    ) -> Result<(), Diagnostic> {
        self.declared.push(r);
        if is_main {
            if self.flagged_main.is_some() {
                return Err(error("Multiple processors are marked as main", location));
            }
            self.flagged_main = Some(r);
        }
        Ok(())
    }

    fn signature(&self, f: &ast::FunctionDecl) -> Result<(Vec<Param>, Type), Diagnostic> {
        let mut params = Vec::with_capacity(f.params.len());
        for p in &f.params {
            let ty = Type::from_expr(&p.ty)?;
            if ty.is_void() {
                return Err(error("Parameters cannot be void", &p.location));
            }
            params.push(Param {
                name: p.name.clone(),
                ty,
                is_ref: p.ty.is_ref,
            });
        }
        if f.return_type.is_ref {
            return Err(error(
                "Functions cannot return references",
                &f.return_type.location,
            ));
        }
        let return_type = Type::from_expr(&f.return_type)?;
        Ok((params, return_type))
    }

    fn new_function(
        &mut self,
        name: &str,
        owner: Option<ProcessorId>,
        params: Vec<Param>,
        return_type: Type,
        location: &SourceLocation,
    ) -> FunctionId {
        self.module.functions.push(tir::Function {
            name: name.to_string(),
            owner,
            params,
            return_type,
            locals: Vec::new(),
            body: Vec::new(),
            calls: Vec::new(),
            writes_console: false,
            location: location.clone(),
        });
        self.module.functions.len() - 1
    }

    fn finish_function(&mut self, id: FunctionId, ctx: Context, body: Vec<tir::Stmt>) {
        let f = &mut self.module.functions[id];
        f.body = body;
        f.locals = ctx.locals;
        f.calls = ctx.calls.into_iter().collect();
        f.writes_console = ctx.writes_console;
    }

    // ---- pass 2 and 3: constants and namespace functions ------------------

    fn check_constants(&mut self) -> Result<(), Diagnostic> {
        for (namespace, decl) in std::mem::take(&mut self.constant_src) {
            let mut ctx = Context::new(namespace.clone(), None, Type::VOID);
            let (_, value) = self.check_var_decl(&mut ctx, decl)?;
            let folded = value.fold().ok_or_else(|| {
                error(
                    format!(
                        "Constant '{}' must be initialised with a constant value",
                        decl.name
                    ),
                    &decl.location,
                )
            })?;
            self.globals.constants.insert(
                GlobalScope::qualify(&namespace, &decl.name),
                Expr::constant(folded, value.ty),
            );
        }
        Ok(())
    }

    fn check_namespace_functions(&mut self) -> Result<(), Diagnostic> {
        for (namespace, decl, id) in std::mem::take(&mut self.function_src) {
            let ctx = Context::new(namespace, None, self.module.functions[id].return_type.clone());
            self.check_function_body(ctx, id, decl)?;
        }
        Ok(())
    }

    fn check_function_body(
        &mut self,
        mut ctx: Context,
        id: FunctionId,
        decl: &ast::FunctionDecl,
    ) -> Result<(), Diagnostic> {
        let params = self.module.functions[id].params.clone();
        ctx.scopes.push();
        for (param, written) in params.iter().zip(&decl.params) {
            let slot = ctx.allocate(param.ty.clone());
            let var = LocalVar {
                slot,
                ty: param.ty.clone(),
                is_const: written.ty.is_const,
            };
            if !ctx.scopes.declare(&param.name, var) {
                return Err(name_in_use(&param.name, &written.location));
            }
        }
        let body = self.check_block(&mut ctx, &decl.body)?;
        ctx.scopes.pop();

        if !ctx.return_type.is_void() && !always_returns(&body) {
            return Err(error(
                format!("Function '{}' does not return a value on all paths", decl.name),
                &decl.location,
            ));
        }
        self.finish_function(id, ctx, body);
        Ok(())
    }

    // ---- pass 4: processors -----------------------------------------------

    fn check_processor(&mut self, id: ProcessorId) -> Result<(), Diagnostic> {
        let (namespace, decl) = self.processor_src[id].clone();
        let mut scope = ProcessorScope::default();

        let (inputs, outputs) = self.check_endpoints(&decl.endpoints, &mut scope)?;
        if outputs.is_empty() {
            return Err(error(
                format!("'{}' must declare at least one output", decl.name),
                &decl.location,
            ));
        }

        let mut externals = Vec::new();
        for ext in &decl.externals {
            let ty = Type::from_expr(&ext.ty)?;
            if ty.is_void() || ext.ty.is_ref {
                return Err(error("Illegal type for an external variable", &ext.location));
            }
            if !scope.declare(&ext.name, Member::External(externals.len())) {
                return Err(name_in_use(&ext.name, &ext.location));
            }
            externals.push(External {
                name: ext.name.clone(),
                ty,
                location: ext.location.clone(),
            });
        }

        let mut functions = Vec::new();
        for f in &decl.functions {
            let (params, return_type) = self.signature(f)?;
            match scope.members.get(&f.name) {
                Some(Member::Functions(ids)) => {
                    if ids
                        .iter()
                        .any(|&existing| same_params(&self.module.functions[existing].params, &params))
                    {
                        return Err(name_in_use(&f.name, &f.location));
                    }
                }
                Some(_) => return Err(name_in_use(&f.name, &f.location)),
                None => {}
            }
            let fid = self.new_function(&f.name, Some(id), params, return_type, &f.location);
            if let Member::Functions(ids) = scope
                .members
                .entry(f.name.clone())
                .or_insert_with(|| Member::Functions(Vec::new()))
            {
                ids.push(fid);
            }
            functions.push((f, fid));
        }

        let Some(&(main_decl, main_id)) = functions.iter().find(|(f, _)| f.name == "main") else {
            return Err(error(
                format!("Processor '{}' must contain a main() function", decl.name),
                &decl.location,
            ));
        };
        let main_fn = &self.module.functions[main_id];
        if !main_fn.params.is_empty() || !main_fn.return_type.is_void() {
            return Err(error(
                "The main() function must return void and take no parameters",
                &main_decl.location,
            ));
        }

        let input_count = inputs.len();
        {
            let p = &mut self.module.processors[id];
            p.inputs = inputs;
            p.outputs = outputs;
            p.externals = externals;
            p.main = main_id;
            p.handlers = vec![None; input_count];
        }
        self.members[id] = scope;

        // State variables are initialised in declaration order by a synthetic function.
        let init_id = self.new_function("init", Some(id), Vec::new(), Type::VOID, &decl.location);
        let mut ctx = Context::new(namespace.clone(), Some(id), Type::VOID);
        ctx.scopes.push();
        let mut init_body = Vec::new();
        for var in &decl.state {
            let (ty, value) = self.check_var_decl(&mut ctx, var)?;
            let slot = self.module.processors[id].state.len();
            let member = Member::State {
                slot,
                is_const: var.is_const,
            };
            if !self.members[id].declare(&var.name, member) {
                return Err(name_in_use(&var.name, &var.location));
            }
            self.module.processors[id].state.push(StateVar {
                name: var.name.clone(),
                ty: ty.clone(),
            });
            init_body.push(tir::Stmt::Assign {
                target: Place {
                    root: Root::State(slot),
                    root_ty: ty.clone(),
                    indices: Vec::new(),
                    ty,
                },
                value,
            });
        }
        self.module.processors[id].init = init_id;
        self.finish_function(init_id, ctx, init_body);

        for handler in &decl.handlers {
            self.check_handler(id, &namespace, handler)?;
        }

        for (f, fid) in functions {
            let mut ctx = Context::new(
                namespace.clone(),
                Some(id),
                self.module.functions[fid].return_type.clone(),
            );
            ctx.is_main = fid == main_id;
            self.check_function_body(ctx, fid, f)?;
        }
        Ok(())
    }

    fn check_endpoints(
        &self,
        decls: &[ast::EndpointDecl],
        scope: &mut ProcessorScope,
    ) -> Result<(Vec<Endpoint>, Vec<Endpoint>), Diagnostic> {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for ep in decls {
            let ty = Type::from_expr(&ep.ty)?;
            if ep.kind == EndpointKind::Stream && !ty.is_stream_type() {
                return Err(error("Illegal type for a stream endpoint", &ep.ty.location));
            }
            if ty.is_void() || ep.ty.is_ref {
                return Err(error("Illegal type for an endpoint", &ep.ty.location));
            }
            let member = match ep.direction {
                Direction::Input => Member::Input(inputs.len()),
                Direction::Output => Member::Output(outputs.len()),
            };
            if !scope.declare(&ep.name, member) {
                return Err(name_in_use(&ep.name, &ep.location));
            }
            let endpoint = Endpoint {
                name: ep.name.clone(),
                direction: ep.direction,
                kind: ep.kind,
                ty,
                location: ep.location.clone(),
            };
            match ep.direction {
                Direction::Input => inputs.push(endpoint),
                Direction::Output => outputs.push(endpoint),
            }
        }
        Ok((inputs, outputs))
    }

    fn check_handler(
        &mut self,
        id: ProcessorId,
        namespace: &[String],
        handler: &ast::HandlerDecl,
    ) -> Result<(), Diagnostic> {
        let processor = &self.module.processors[id];
        let Some(index) = processor
            .inputs
            .iter()
            .position(|e| e.name == handler.endpoint && e.kind == EndpointKind::Event)
        else {
            return Err(error(
                format!(
                    "Cannot find an input event endpoint named '{}'",
                    handler.endpoint
                ),
                &handler.location,
            ));
        };
        let endpoint_ty = processor.inputs[index].ty.clone();
        let ty = Type::from_expr(&handler.param.ty)?;
        if ty != endpoint_ty {
            return Err(error(
                format!("Event handler parameter type must match endpoint type '{endpoint_ty}'"),
                &handler.param.location,
            ));
        }
        if processor.handlers[index].is_some() {
            return Err(name_in_use(&handler.endpoint, &handler.location));
        }

        let params = vec![Param {
            name: handler.param.name.clone(),
            ty: ty.clone(),
            is_ref: false,
        }];
        let fid = self.new_function(
            &format!("event {}", handler.endpoint),
            Some(id),
            params,
            Type::VOID,
            &handler.location,
        );
        self.module.processors[id].handlers[index] = Some(fid);

        let mut ctx = Context::new(namespace.to_vec(), Some(id), Type::VOID);
        ctx.scopes.push();
        let slot = ctx.allocate(ty.clone());
        ctx.scopes.declare(
            &handler.param.name,
            LocalVar {
                slot,
                ty,
                is_const: handler.param.ty.is_const,
            },
        );
        let body = self.check_block(&mut ctx, &handler.body)?;
        ctx.scopes.pop();
        self.finish_function(fid, ctx, body);
        Ok(())
    }

    // ---- pass 5: graphs ---------------------------------------------------

    fn check_graphs(&mut self) -> Result<(), Diagnostic> {
        let sources = self.graph_src.clone();

        for (id, (_, decl)) in sources.iter().enumerate() {
            let mut scope = ProcessorScope::default();
            let (inputs, outputs) = self.check_endpoints(&decl.endpoints, &mut scope)?;
            if outputs.is_empty() {
                return Err(error(
                    format!("'{}' must declare at least one output", decl.name),
                    &decl.location,
                ));
            }
            self.module.graphs[id].inputs = inputs;
            self.module.graphs[id].outputs = outputs;
        }

        for (id, (namespace, decl)) in sources.iter().enumerate() {
            let mut nodes: Vec<Node> = Vec::new();
            for node in &decl.nodes {
                if nodes.iter().any(|n| n.name == node.name)
                    || self.module.graphs[id].inputs.iter().any(|e| e.name == node.name)
                    || self.module.graphs[id].outputs.iter().any(|e| e.name == node.name)
                {
                    return Err(name_in_use(&node.name, &node.location));
                }
                let target = GlobalScope::resolve(&self.globals.processors, namespace, &node.target)
                    .copied()
                    .ok_or_else(|| {
                        error(
                            format!("Cannot find processor '{}'", node.target.join("::")),
                            &node.location,
                        )
                    })?;
                nodes.push(Node {
                    name: node.name.clone(),
                    target,
                    location: node.location.clone(),
                });
            }

            let mut connections = Vec::new();
            for conn in &decl.connections {
                for pair in conn.chain.windows(2) {
                    let (source, source_ep) = self.resolve_source(id, &nodes, &pair[0])?;
                    let (dest, dest_ep) = self.resolve_dest(id, &nodes, &pair[1])?;
                    if source_ep.kind != dest_ep.kind {
                        return Err(error(
                            format!(
                                "Cannot connect {} endpoint to {} endpoint",
                                article(source_ep.kind),
                                article(dest_ep.kind)
                            ),
                            &pair[0].location,
                        ));
                    }
                    if !source_ep.ty.converts_to(&dest_ep.ty, false) {
                        return Err(error(
                            format!("Cannot connect '{}' to '{}'", source_ep.ty, dest_ep.ty),
                            &pair[0].location,
                        ));
                    }
                    connections.push(Connection {
                        source,
                        dest,
                        location: pair[0].location.clone(),
                    });
                }
            }

            self.module.graphs[id].nodes = nodes;
            self.module.graphs[id].connections = connections;
        }

        for (id, (_, decl)) in sources.iter().enumerate() {
            if self.graph_reaches(id, id, &mut HashSet::new()) {
                return Err(error(
                    format!("Graph '{}' cannot contain itself", decl.name),
                    &decl.location,
                ));
            }
        }
        Ok(())
    }

    fn resolve_source(
        &self,
        graph: GraphId,
        nodes: &[Node],
        r: &ast::EndpointRef,
    ) -> Result<(PortRef, Endpoint), Diagnostic> {
        let g = &self.module.graphs[graph];
        match &r.node {
            Some(node_name) => {
                let (node, target) = find_node(nodes, node_name, &r.location)?;
                let outputs = self.module.outputs_of(target);
                if let Some(endpoint) = outputs.iter().position(|e| e.name == r.endpoint) {
                    return Ok((PortRef::Node { node, endpoint }, outputs[endpoint].clone()));
                }
                if self.module.inputs_of(target).iter().any(|e| e.name == r.endpoint) {
                    return Err(error(
                        format!("'{node_name}.{}' is not an output endpoint", r.endpoint),
                        &r.location,
                    ));
                }
                Err(error(
                    format!("Cannot find endpoint '{node_name}.{}'", r.endpoint),
                    &r.location,
                ))
            }
            None => {
                if let Some(i) = g.inputs.iter().position(|e| e.name == r.endpoint) {
                    return Ok((PortRef::Graph(i), g.inputs[i].clone()));
                }
                if let Some(node) = nodes.iter().position(|n| n.name == r.endpoint) {
                    let outputs = self.module.outputs_of(nodes[node].target);
                    if outputs.len() != 1 {
                        return Err(error(
                            format!("Node '{}' must have exactly one output to be connected by name", r.endpoint),
                            &r.location,
                        ));
                    }
                    return Ok((PortRef::Node { node, endpoint: 0 }, outputs[0].clone()));
                }
                if g.outputs.iter().any(|e| e.name == r.endpoint) {
                    return Err(error(
                        format!("'{}' is not an input endpoint", r.endpoint),
                        &r.location,
                    ));
                }
                Err(error(
                    format!("Cannot find endpoint '{}'", r.endpoint),
                    &r.location,
                ))
            }
        }
    }

    fn resolve_dest(
        &self,
        graph: GraphId,
        nodes: &[Node],
        r: &ast::EndpointRef,
    ) -> Result<(PortRef, Endpoint), Diagnostic> {
        let g = &self.module.graphs[graph];
        match &r.node {
            Some(node_name) => {
                let (node, target) = find_node(nodes, node_name, &r.location)?;
                let inputs = self.module.inputs_of(target);
                if let Some(endpoint) = inputs.iter().position(|e| e.name == r.endpoint) {
                    return Ok((PortRef::Node { node, endpoint }, inputs[endpoint].clone()));
                }
                if self.module.outputs_of(target).iter().any(|e| e.name == r.endpoint) {
                    return Err(error(
                        format!("'{node_name}.{}' is not an input endpoint", r.endpoint),
                        &r.location,
                    ));
                }
                Err(error(
                    format!("Cannot find endpoint '{node_name}.{}'", r.endpoint),
                    &r.location,
                ))
            }
            None => {
                if let Some(i) = g.outputs.iter().position(|e| e.name == r.endpoint) {
                    return Ok((PortRef::Graph(i), g.outputs[i].clone()));
                }
                if let Some(node) = nodes.iter().position(|n| n.name == r.endpoint) {
                    let inputs = self.module.inputs_of(nodes[node].target);
                    if inputs.len() != 1 {
                        return Err(error(
                            format!("Node '{}' must have exactly one input to be connected by name", r.endpoint),
                            &r.location,
                        ));
                    }
                    return Ok((PortRef::Node { node, endpoint: 0 }, inputs[0].clone()));
                }
                if g.inputs.iter().any(|e| e.name == r.endpoint) {
                    return Err(error(
                        format!("'{}' is not an output endpoint", r.endpoint),
                        &r.location,
                    ));
                }
                Err(error(
                    format!("Cannot find endpoint '{}'", r.endpoint),
                    &r.location,
                ))
            }
        }
    }

    fn graph_reaches(&self, from: GraphId, target: GraphId, visited: &mut HashSet<GraphId>) -> bool {
        for node in &self.module.graphs[from].nodes {
            if let ProcessorRef::Graph(child) = node.target {
                if child == target {
                    return true;
                }
                if visited.insert(child) && self.graph_reaches(child, target, visited) {
                    return true;
                }
            }
        }
        false
    }

    // ---- pass 6: recursion ------------------------------------------------

    fn check_recursion(&self) -> Result<(), Diagnostic> {
        let mut state = vec![Visit::New; self.module.functions.len()];
        for id in 0..self.module.functions.len() {
            if state[id] == Visit::New {
                if let Some(culprit) = self.find_cycle(id, &mut state) {
                    let f = &self.module.functions[culprit];
                    return Err(error(
                        format!("Recursive function calls are not supported: {}", f.name),
                        &f.location,
                    ));
                }
            }
        }
        Ok(())
    }

    fn find_cycle(&self, id: FunctionId, state: &mut [Visit]) -> Option<FunctionId> {
        state[id] = Visit::Active;
        for &callee in &self.module.functions[id].calls {
            match state[callee] {
                Visit::Active => return Some(callee),
                Visit::New => {
                    if let Some(found) = self.find_cycle(callee, state) {
                        return Some(found);
                    }
                }
                Visit::Done => {}
            }
        }
        state[id] = Visit::Done;
        None
    }

    // ---- statements -------------------------------------------------------

    fn check_block(&self, ctx: &mut Context, block: &ast::Block) -> Result<Vec<tir::Stmt>, Diagnostic> {
        ctx.scopes.push();
        let mut out = Vec::new();
        for stmt in &block.stmts {
            self.check_stmt(ctx, stmt, &mut out)?;
        }
        ctx.scopes.pop();
        Ok(out)
    }

    fn check_scoped(&self, ctx: &mut Context, stmt: &ast::Stmt) -> Result<Vec<tir::Stmt>, Diagnostic> {
        ctx.scopes.push();
        let mut out = Vec::new();
        let result = self.check_stmt(ctx, stmt, &mut out);
        ctx.scopes.pop();
        result.map(|_| out)
    }

    fn check_loop_body(&self, ctx: &mut Context, stmt: &ast::Stmt) -> Result<Vec<tir::Stmt>, Diagnostic> {
        ctx.loop_depth += 1;
        let body = self.check_scoped(ctx, stmt);
        ctx.loop_depth -= 1;
        body
    }

    fn check_stmt(
        &self,
        ctx: &mut Context,
        stmt: &ast::Stmt,
        out: &mut Vec<tir::Stmt>,
    ) -> Result<(), Diagnostic> {
        match stmt {
            ast::Stmt::Block(block) => out.extend(self.check_block(ctx, block)?),
            ast::Stmt::Local(var) => {
                let (ty, value) = self.check_var_decl(ctx, var)?;
                let slot = ctx.allocate(ty.clone());
                let local = LocalVar {
                    slot,
                    ty: ty.clone(),
                    is_const: var.is_const,
                };
                if !ctx.scopes.declare(&var.name, local) {
                    return Err(name_in_use(&var.name, &var.location));
                }
                out.push(tir::Stmt::Assign {
                    target: Place {
                        root: Root::Local(slot),
                        root_ty: ty.clone(),
                        indices: Vec::new(),
                        ty,
                    },
                    value,
                });
            }
            ast::Stmt::Expr(expr) => {
                if let ast::ExprKind::Call { callee, args } = &expr.kind {
                    if callee.len() == 1 && callee[0] == "advance" {
                        if !ctx.is_main {
                            return Err(error(ADVANCE_OUTSIDE_MAIN, &expr.location));
                        }
                        if !args.is_empty() {
                            return Err(error("advance() does not take any arguments", &expr.location));
                        }
                        out.push(tir::Stmt::Advance);
                        return Ok(());
                    }
                }
                out.push(tir::Stmt::Eval(self.check_expr(ctx, expr)?));
            }
            ast::Stmt::Assign {
                target,
                op,
                value,
                location,
            } => {
                let place = self.check_place(ctx, target)?;
                let rhs = self.check_expr(ctx, value)?;
                let value = match op {
                    Some(op) => {
                        let combined = self.check_binary(*op, place.to_expr(), rhs, location)?;
                        self.coerce(combined, &place.ty, location)?
                    }
                    None => self.coerce(rhs, &place.ty, &value.location)?,
                };
                out.push(tir::Stmt::Assign {
                    target: place,
                    value,
                });
            }
            ast::Stmt::Write { target, values, .. } => {
                let target = self.resolve_write_target(ctx, target)?;
                for v in values {
                    let value = self.check_expr(ctx, v)?;
                    match &target {
                        WriteTarget::Console => {
                            if value.ty.is_void() {
                                return Err(error("Cannot write a void value", &v.location));
                            }
                            ctx.writes_console = true;
                            out.push(tir::Stmt::WriteConsole(value));
                        }
                        WriteTarget::Output { index, kind, ty } => {
                            let value = self.coerce(value, ty, &v.location)?;
                            out.push(tir::Stmt::Write {
                                endpoint: *index,
                                kind: *kind,
                                value,
                            });
                        }
                    }
                }
            }
            ast::Stmt::If {
                cond,
                then,
                otherwise,
                ..
            } => {
                let cond = self.check_condition(ctx, cond)?;
                let then = self.check_scoped(ctx, then)?;
                let otherwise = match otherwise {
                    Some(s) => self.check_scoped(ctx, s)?,
                    None => Vec::new(),
                };
                out.push(tir::Stmt::If {
                    cond,
                    then,
                    otherwise,
                });
            }
            ast::Stmt::While { cond, body, .. } => {
                let cond = self.check_condition(ctx, cond)?;
                let body = self.check_loop_body(ctx, body)?;
                out.push(tir::Stmt::Loop {
                    cond: Some(cond),
                    body,
                    step: Vec::new(),
                });
            }
            ast::Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                ctx.scopes.push();
                let result = self.check_for(ctx, init, cond, step, body, out);
                ctx.scopes.pop();
                result?;
            }
            ast::Stmt::Loop { count, body, .. } => match count {
                None => {
                    let body = self.check_loop_body(ctx, body)?;
                    out.push(tir::Stmt::Loop {
                        cond: None,
                        body,
                        step: Vec::new(),
                    });
                }
                Some(count_expr) => {
                    let count = self.check_expr(ctx, count_expr)?;
                    if !count.ty.is_integer() {
                        return Err(error("Loop count must be an integer", &count_expr.location));
                    }
                    let counter = ctx.allocate(count.ty.clone());
                    let body = self.check_loop_body(ctx, body)?;
                    out.push(tir::Stmt::Repeat {
                        counter,
                        count,
                        body,
                    });
                }
            },
            ast::Stmt::Break(location) => {
                if ctx.loop_depth == 0 {
                    return Err(error("'break' can only be used inside a loop", location));
                }
                out.push(tir::Stmt::Break);
            }
            ast::Stmt::Continue(location) => {
                if ctx.loop_depth == 0 {
                    return Err(error("'continue' can only be used inside a loop", location));
                }
                out.push(tir::Stmt::Continue);
            }
            ast::Stmt::Return(value, location) => {
                let expected = ctx.return_type.clone();
                match value {
                    None if expected.is_void() => out.push(tir::Stmt::Return(None)),
                    None => {
                        return Err(error(
                            format!("Expected a return value of type '{expected}'"),
                            location,
                        ));
                    }
                    Some(v) if expected.is_void() => {
                        return Err(error("A void function cannot return a value", &v.location));
                    }
                    Some(v) => {
                        let value = self.check_expr(ctx, v)?;
                        let value = self.coerce(value, &expected, &v.location)?;
                        out.push(tir::Stmt::Return(Some(value)));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_for(
        &self,
        ctx: &mut Context,
        init: &Option<Box<ast::Stmt>>,
        cond: &Option<ast::Expr>,
        step: &Option<Box<ast::Stmt>>,
        body: &ast::Stmt,
        out: &mut Vec<tir::Stmt>,
    ) -> Result<(), Diagnostic> {
        if let Some(init) = init {
            self.check_stmt(ctx, init, out)?;
        }
        let cond = match cond {
            Some(c) => Some(self.check_condition(ctx, c)?),
            None => None,
        };
        let mut step_stmts = Vec::new();
        if let Some(step) = step {
            self.check_stmt(ctx, step, &mut step_stmts)?;
        }
        let body = self.check_loop_body(ctx, body)?;
        out.push(tir::Stmt::Loop {
            cond,
            body,
            step: step_stmts,
        });
        Ok(())
    }

    fn check_condition(&self, ctx: &mut Context, expr: &ast::Expr) -> Result<Expr, Diagnostic> {
        let cond = self.check_expr(ctx, expr)?;
        if !cond.ty.is_bool() {
            return Err(error("Expected a boolean condition", &expr.location));
        }
        Ok(cond)
    }

    /// Type and initial value of a variable declaration.
    fn check_var_decl(&self, ctx: &mut Context, var: &ast::VarDecl) -> Result<(Type, Expr), Diagnostic> {
        let declared = match &var.ty {
            Some(t) if t.is_ref => {
                return Err(error("Variables cannot be references", &t.location));
            }
            Some(t) => Some(Type::from_expr(t)?),
            None => None,
        };
        let init = match &var.init {
            Some(e) => Some((self.check_expr(ctx, e)?, &e.location)),
            None => None,
        };
        let (ty, value) = match (declared, init) {
            (Some(ty), Some((e, location))) => {
                let value = self.coerce(e, &ty, location)?;
                (ty, value)
            }
            (Some(ty), None) => (ty.clone(), Expr::constant(ty.default_value(), ty)),
            (None, Some((e, _))) => (e.ty.clone(), e),
            (None, None) => {
                return Err(error(
                    format!("Variable '{}' must be given an initial value", var.name),
                    &var.location,
                ));
            }
        };
        if ty.is_void() {
            return Err(error("Variables cannot be void", &var.location));
        }
        Ok((ty, value))
    }

    fn resolve_write_target(&self, ctx: &Context, target: &ast::Expr) -> Result<WriteTarget, Diagnostic> {
        if let ast::ExprKind::Name(path) = &target.kind {
            if let [name] = path.as_slice() {
                if ctx.scopes.lookup(name).is_none() {
                    if let Some(pid) = ctx.processor {
                        match self.members[pid].get(name) {
                            Some(Member::Output(index)) => {
                                let ep = &self.module.processors[pid].outputs[*index];
                                return Ok(WriteTarget::Output {
                                    index: *index,
                                    kind: ep.kind,
                                    ty: ep.ty.clone(),
                                });
                            }
                            Some(Member::Input(_)) => {
                                return Err(error(
                                    "Cannot write to an input endpoint",
                                    &target.location,
                                ));
                            }
                            Some(_) => {
                                return Err(error("Expected an output endpoint", &target.location));
                            }
                            None => {}
                        }
                    }
                    if name == "console" {
                        return Ok(WriteTarget::Console);
                    }
                }
            }
        }
        Err(error("Expected an output endpoint", &target.location))
    }

    // ---- expressions ------------------------------------------------------

    fn coerce(&self, expr: Expr, to: &Type, location: &SourceLocation) -> Result<Expr, Diagnostic> {
        if expr.ty == *to {
            return Ok(expr);
        }
        if !expr.ty.converts_to(to, expr.is_constant()) {
            return Err(error(
                format!("Cannot implicitly convert '{}' to '{to}'", expr.ty),
                location,
            ));
        }
        Ok(expr.cast(to.clone()))
    }

    fn check_place(&self, ctx: &mut Context, expr: &ast::Expr) -> Result<Place, Diagnostic> {
        match &expr.kind {
            ast::ExprKind::Name(path) => {
                if let [name] = path.as_slice() {
                    if let Some(var) = ctx.scopes.lookup(name) {
                        if var.is_const {
                            return Err(error(ASSIGN_TO_CONSTANT, &expr.location));
                        }
                        return Ok(Place {
                            root: Root::Local(var.slot),
                            root_ty: var.ty.clone(),
                            indices: Vec::new(),
                            ty: var.ty.clone(),
                        });
                    }
                    if let Some(pid) = ctx.processor {
                        if let Some(member) = self.members[pid].get(name) {
                            return match member {
                                Member::State { slot, is_const } => {
                                    if *is_const {
                                        return Err(error(ASSIGN_TO_CONSTANT, &expr.location));
                                    }
                                    let ty = self.module.processors[pid].state[*slot].ty.clone();
                                    Ok(Place {
                                        root: Root::State(*slot),
                                        root_ty: ty.clone(),
                                        indices: Vec::new(),
                                        ty,
                                    })
                                }
                                Member::Input(_) | Member::External(_) => {
                                    Err(error(ASSIGN_TO_CONSTANT, &expr.location))
                                }
                                Member::Output(_) | Member::Functions(_) => {
                                    Err(error(ASSIGN_TO_EXPRESSION, &expr.location))
                                }
                            };
                        }
                    }
                }
                if GlobalScope::resolve(&self.globals.constants, &ctx.namespace, path).is_some()
                    || builtin_constant(path).is_some()
                {
                    return Err(error(ASSIGN_TO_CONSTANT, &expr.location));
                }
                Err(error(
                    format!("Cannot find symbol '{}'", path.join("::")),
                    &expr.location,
                ))
            }
            ast::ExprKind::Index { object, index } => {
                let mut place = self.check_place(ctx, object)?;
                let Some(elem) = place.ty.element_type() else {
                    return Err(error(
                        format!("Cannot index a value of type '{}'", place.ty),
                        &expr.location,
                    ));
                };
                let index_expr = self.check_expr(ctx, index)?;
                if !index_expr.ty.is_integer() {
                    return Err(error("Array index must be an integer", &index.location));
                }
                place.indices.push(index_expr);
                place.ty = elem;
                Ok(place)
            }
            _ => Err(error(ASSIGN_TO_EXPRESSION, &expr.location)),
        }
    }

    fn check_expr(&self, ctx: &mut Context, expr: &ast::Expr) -> Result<Expr, Diagnostic> {
        let location = &expr.location;
        match &expr.kind {
            ast::ExprKind::Bool(b) => Ok(Expr::constant(Value::Bool(*b), Type::BOOL)),
            ast::ExprKind::Int { value, wide } => Ok(if *wide {
                Expr::constant(Value::Int64(*value), Type::INT64)
            } else {
                Expr::constant(Value::Int32(*value as i32), Type::INT32)
            }),
            ast::ExprKind::Float { value, single } => Ok(if *single {
                Expr::constant(Value::Float32(*value as f32), Type::FLOAT32)
            } else {
                Expr::constant(Value::Float64(*value), Type::FLOAT64)
            }),
            ast::ExprKind::Str(s) => Ok(Expr::constant(Value::String(s.clone()), Type::STRING)),
            ast::ExprKind::Name(path) => self.check_name(ctx, path, location),
            ast::ExprKind::ProcessorProperty(name) => {
                if ctx.processor.is_none() {
                    return Err(error(
                        "Processor properties can only be used inside a processor",
                        location,
                    ));
                }
                let property = ProcessorProperty::from_name(name).ok_or_else(|| {
                    error(format!("Unknown processor property '{name}'"), location)
                })?;
                Ok(Expr {
                    kind: ExprKind::Property(property),
                    ty: property.ty(),
                })
            }
            ast::ExprKind::Member { object, member } => {
                let object = self.check_expr(ctx, object)?;
                match (member.as_str(), object.ty.size()) {
                    ("size", Some(n)) => Ok(Expr::constant(Value::Int32(n as i32), Type::INT32)),
                    _ => Err(error(
                        format!("Cannot find member '{member}' of type '{}'", object.ty),
                        location,
                    )),
                }
            }
            ast::ExprKind::Index { object, index } => {
                let object = self.check_expr(ctx, object)?;
                let Some(elem) = object.ty.element_type() else {
                    return Err(error(
                        format!("Cannot index a value of type '{}'", object.ty),
                        location,
                    ));
                };
                let index_expr = self.check_expr(ctx, index)?;
                if !index_expr.ty.is_integer() {
                    return Err(error("Array index must be an integer", &index.location));
                }
                Ok(Expr {
                    kind: ExprKind::Index {
                        object: Box::new(object),
                        index: Box::new(index_expr),
                    },
                    ty: elem,
                })
            }
            ast::ExprKind::Call { callee, args } => self.check_call(ctx, callee, args, location),
            ast::ExprKind::Construct { ty, args } => self.check_construct(ctx, ty, args, location),
            ast::ExprKind::Unary { op, operand } => {
                let operand = self.check_expr(ctx, operand)?;
                let valid = match op {
                    UnaryOp::Negate => operand.ty.is_numeric_or_vector(),
                    UnaryOp::Not => operand.ty.is_bool(),
                    UnaryOp::BitNot => operand.ty.is_integer(),
                };
                if !valid {
                    return Err(error(
                        format!("Illegal type for unary operator '{op}' ('{}')", operand.ty),
                        location,
                    ));
                }
                let ty = operand.ty.clone();
                let e = Expr {
                    kind: ExprKind::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    ty: ty.clone(),
                };
                // keep `-1` a literal
                Ok(match e.fold() {
                    Some(v) => Expr::constant(v, ty),
                    None => e,
                })
            }
            ast::ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.check_expr(ctx, lhs)?;
                let rhs = self.check_expr(ctx, rhs)?;
                self.check_binary(*op, lhs, rhs, location)
            }
            ast::ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.check_condition(ctx, cond)?;
                let then = self.check_expr(ctx, then)?;
                let otherwise = self.check_expr(ctx, otherwise)?;
                let ty = Type::common_type(
                    &then.ty,
                    &otherwise.ty,
                    then.is_constant(),
                    otherwise.is_constant(),
                )
                .filter(|t| !t.is_void())
                .ok_or_else(|| {
                    error(
                        format!(
                            "Ternary operator branches have incompatible types '{}' and '{}'",
                            then.ty, otherwise.ty
                        ),
                        location,
                    )
                })?;
                Ok(Expr {
                    kind: ExprKind::Ternary {
                        cond: Box::new(cond),
                        then: Box::new(then.cast(ty.clone())),
                        otherwise: Box::new(otherwise.cast(ty.clone())),
                    },
                    ty,
                })
            }
            ast::ExprKind::Update {
                target,
                increment,
                prefix,
            } => {
                let place = self.check_place(ctx, target)?;
                if !place.ty.is_numeric() {
                    let op = if *increment { "++" } else { "--" };
                    return Err(error(
                        format!("Illegal type for operator '{op}' ('{}')", place.ty),
                        location,
                    ));
                }
                let ty = place.ty.clone();
                Ok(Expr {
                    kind: ExprKind::Update {
                        target: place,
                        delta: if *increment { 1 } else { -1 },
                        prefix: *prefix,
                    },
                    ty,
                })
            }
        }
    }

    fn check_name(&self, ctx: &Context, path: &[String], location: &SourceLocation) -> Result<Expr, Diagnostic> {
        if let [name] = path {
            if let Some(var) = ctx.scopes.lookup(name) {
                return Ok(Expr {
                    kind: ExprKind::Local(var.slot),
                    ty: var.ty.clone(),
                });
            }
            if let Some(pid) = ctx.processor {
                let p = &self.module.processors[pid];
                match self.members[pid].get(name) {
                    Some(Member::Input(i)) => {
                        let ep = &p.inputs[*i];
                        if ep.kind == EndpointKind::Event {
                            return Err(error("Cannot read from an event input", location));
                        }
                        return Ok(Expr {
                            kind: ExprKind::Input(*i),
                            ty: ep.ty.clone(),
                        });
                    }
                    Some(Member::Output(_)) => {
                        return Err(error("Cannot read from an output endpoint", location));
                    }
                    Some(Member::State { slot, .. }) => {
                        return Ok(Expr {
                            kind: ExprKind::State(*slot),
                            ty: p.state[*slot].ty.clone(),
                        });
                    }
                    Some(Member::External(i)) => {
                        return Ok(Expr {
                            kind: ExprKind::External(*i),
                            ty: p.externals[*i].ty.clone(),
                        });
                    }
                    Some(Member::Functions(_)) | None => {}
                }
            }
        }
        if let Some(constant) = GlobalScope::resolve(&self.globals.constants, &ctx.namespace, path) {
            return Ok(constant.clone());
        }
        if let Some(constant) = builtin_constant(path) {
            return Ok(constant);
        }
        Err(error(
            format!("Cannot find symbol '{}'", path.join("::")),
            location,
        ))
    }

    fn check_call(
        &self,
        ctx: &mut Context,
        callee: &[String],
        args: &[ast::Expr],
        location: &SourceLocation,
    ) -> Result<Expr, Diagnostic> {
        let display = callee.join("::");
        if display == "advance" {
            return Err(error(ADVANCE_OUTSIDE_MAIN, location));
        }

        let mut candidates = None;
        if let ([name], Some(pid)) = (callee, ctx.processor) {
            if let Some(Member::Functions(ids)) = self.members[pid].get(name) {
                candidates = Some(ids.clone());
            }
        }
        if candidates.is_none() {
            candidates =
                GlobalScope::resolve(&self.globals.functions, &ctx.namespace, callee).cloned();
        }

        let mut checked = Vec::with_capacity(args.len());
        for arg in args {
            checked.push(self.check_expr(ctx, arg)?);
        }

        let Some(candidates) = candidates else {
            if let Some(intrinsic) = Intrinsic::from_name(&display) {
                return self.check_intrinsic(intrinsic, checked, location);
            }
            return Err(error(format!("Cannot find function '{display}'"), location));
        };

        let mut best: Option<(FunctionId, usize)> = None;
        for id in candidates {
            let f = &self.module.functions[id];
            if f.params.len() != checked.len() {
                continue;
            }
            let mut exact = 0;
            let mut viable = true;
            for (param, arg) in f.params.iter().zip(&checked) {
                if arg.ty == param.ty {
                    exact += 1;
                } else if param.is_ref || !arg.ty.converts_to(&param.ty, arg.is_constant()) {
                    viable = false;
                    break;
                }
            }
            if viable && best.map_or(true, |(_, e)| exact > e) {
                best = Some((id, exact));
            }
        }
        let Some((id, _)) = best else {
            return Err(error(
                format!(
                    "No suitable override found for function call: {display}({})",
                    type_list(&checked)
                ),
                location,
            ));
        };

        let f = &self.module.functions[id];
        if f.owner.is_some() && f.name == "main" {
            return Err(error("The main() function cannot be called directly", location));
        }
        let params = f.params.clone();
        let return_type = f.return_type.clone();

        let mut final_args = Vec::with_capacity(checked.len());
        let mut writeback = Vec::with_capacity(checked.len());
        for ((param, arg), written) in params.iter().zip(checked).zip(args) {
            if param.is_ref {
                writeback.push(Some(self.check_place(ctx, written)?));
                final_args.push(arg);
            } else {
                writeback.push(None);
                final_args.push(self.coerce(arg, &param.ty, &written.location)?);
            }
        }
        ctx.calls.insert(id);
        Ok(Expr {
            kind: ExprKind::Call {
                function: id,
                args: final_args,
                writeback,
            },
            ty: return_type,
        })
    }

    fn check_intrinsic(
        &self,
        intrinsic: Intrinsic,
        args: Vec<Expr>,
        location: &SourceLocation,
    ) -> Result<Expr, Diagnostic> {
        let no_match = || {
            error(
                format!(
                    "No suitable override found for function call: {intrinsic}({})",
                    type_list(&args)
                ),
                location,
            )
        };
        if args.len() != intrinsic.arity() {
            return Err(no_match());
        }
        let mut ty = args[0].ty.clone();
        let mut literal = args[0].is_constant();
        for arg in &args[1..] {
            ty = Type::common_type(&ty, &arg.ty, literal, arg.is_constant()).ok_or_else(no_match)?;
            literal = literal && arg.is_constant();
        }
        if !ty.is_numeric_or_vector() {
            return Err(no_match());
        }
        if intrinsic.is_float_only() && !ty.scalar_primitive().is_some_and(|p| Type::Primitive(p).is_float()) {
            if ty.is_vector() {
                return Err(no_match());
            }
            ty = Type::FLOAT64;
        }
        let args = args.into_iter().map(|a| a.cast(ty.clone())).collect();
        Ok(Expr {
            kind: ExprKind::Intrinsic { intrinsic, args },
            ty,
        })
    }

    fn check_construct(
        &self,
        ctx: &mut Context,
        written: &ast::TypeExpr,
        args: &[ast::Expr],
        location: &SourceLocation,
    ) -> Result<Expr, Diagnostic> {
        let ty = Type::from_expr(written)?;
        if ty.is_void() || written.is_ref {
            return Err(error(format!("Cannot construct a value of type '{ty}'"), location));
        }
        let mut checked = Vec::with_capacity(args.len());
        for arg in args {
            checked.push(self.check_expr(ctx, arg)?);
        }

        match checked.len() {
            0 => Ok(Expr::constant(ty.default_value(), ty)),
            1 if !ty.is_array() || checked[0].ty.is_array() => {
                let arg = checked.remove(0);
                if !arg.ty.casts_to(&ty) {
                    return Err(error(
                        format!("Cannot convert '{}' to '{ty}'", arg.ty),
                        location,
                    ));
                }
                Ok(arg.cast(ty))
            }
            n if ty.size() == Some(n as u32) => {
                let elem = ty.element_type().unwrap_or(Type::VOID);
                let mut items = Vec::with_capacity(n);
                for arg in checked {
                    if !arg.ty.casts_to(&elem) {
                        return Err(error(
                            format!("Cannot convert '{}' to '{elem}'", arg.ty),
                            location,
                        ));
                    }
                    items.push(arg.cast(elem.clone()));
                }
                Ok(Expr {
                    kind: ExprKind::Construct(items),
                    ty,
                })
            }
            _ => Err(error(
                format!("Wrong number of arguments for type '{ty}'"),
                location,
            )),
        }
    }

    fn check_binary(
        &self,
        op: BinaryOp,
        lhs: Expr,
        rhs: Expr,
        location: &SourceLocation,
    ) -> Result<Expr, Diagnostic> {
        let illegal = error(
            format!(
                "Illegal types for binary operator '{op}' ('{}', '{}')",
                lhs.ty, rhs.ty
            ),
            location,
        );

        if op.is_logical() {
            if !(lhs.ty.is_bool() && rhs.ty.is_bool()) {
                return Err(illegal);
            }
            let kind = if op == BinaryOp::And {
                ExprKind::And(Box::new(lhs), Box::new(rhs))
            } else {
                ExprKind::Or(Box::new(lhs), Box::new(rhs))
            };
            return Ok(Expr {
                kind,
                ty: Type::BOOL,
            });
        }

        let Some(common) = Type::common_type(&lhs.ty, &rhs.ty, lhs.is_constant(), rhs.is_constant())
        else {
            return Err(illegal);
        };
        let valid = if op.is_bitwise() {
            common.is_integer()
                || (common.is_bool()
                    && matches!(op, BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor))
        } else if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
            !common.is_void() && !common.is_array()
        } else if op.is_comparison() {
            common.is_numeric()
        } else {
            common.is_numeric_or_vector()
        };
        if !valid {
            return Err(illegal);
        }

        let ty = if op.is_comparison() {
            Type::BOOL
        } else {
            common.clone()
        };
        Ok(Expr {
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(lhs.cast(common.clone())),
                rhs: Box::new(rhs.cast(common)),
            },
            ty,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Active,
    Done,
}

fn find_node(nodes: &[Node], name: &str, location: &SourceLocation) -> Result<(usize, ProcessorRef), Diagnostic> {
    nodes
        .iter()
        .position(|n| n.name == name)
        .map(|i| (i, nodes[i].target))
        .ok_or_else(|| error(format!("Cannot find node '{name}'"), location))
}

fn article(kind: EndpointKind) -> &'static str {
    match kind {
        EndpointKind::Stream => "a stream",
        EndpointKind::Event => "an event",
        EndpointKind::Value => "a value",
    }
}

fn builtin_constant(path: &[String]) -> Option<Expr> {
    match path {
        [name] if name == "pi" => Some(Expr::constant(
            Value::Float64(std::f64::consts::PI),
            Type::FLOAT64,
        )),
        [name] if name == "twoPi" => Some(Expr::constant(
            Value::Float64(std::f64::consts::TAU),
            Type::FLOAT64,
        )),
        _ => None,
    }
}

/// True when control cannot fall off the end of `stmts`.
fn always_returns(stmts: &[tir::Stmt]) -> bool {
    stmts.iter().any(|s| match s {
        tir::Stmt::Return(_) => true,
        tir::Stmt::If {
            then, otherwise, ..
        } => always_returns(then) && always_returns(otherwise),
        tir::Stmt::Loop {
            cond: None, body, ..
        } => !contains_break(body),
        _ => false,
    })
}

/// Whether a `break` in `stmts` targets the enclosing loop.
fn contains_break(stmts: &[tir::Stmt]) -> bool {
    stmts.iter().any(|s| match s {
        tir::Stmt::Break => true,
        tir::Stmt::If {
            then, otherwise, ..
        } => contains_break(then) || contains_break(otherwise),
        _ => false,
    })
}
